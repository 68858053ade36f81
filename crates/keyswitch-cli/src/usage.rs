//! Usage lookups against provider billing endpoints
//!
//! OpenAI-style keys are asked for `GET {base}/usage?date=YYYY-MM-DD`, relay
//! gateways for `GET {base}/v1/dashboard/billing/usage`. Both use bearer auth.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use keyswitch_core::registry::DEFAULT_OPENAI_BASE_URL;
use keyswitch_core::{KeyKind, KeyRecord};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Spend reported by a provider for one key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    /// Total spend; this is what gets stored as the key's used quota
    pub used: f64,
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    total_usage: f64,
    #[serde(default)]
    daily_costs: Vec<DailyCost>,
}

#[derive(Debug, Deserialize)]
struct DailyCost {
    timestamp: i64,
    #[serde(default)]
    line_items: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
struct LineItem {
    #[serde(default)]
    cost: f64,
}

impl OpenAiUsage {
    /// Cost of the days that fall within `days` of `now`
    fn sum_recent(&self, days: i64, now: DateTime<Utc>) -> f64 {
        let cutoff = (now - ChronoDuration::days(days)).timestamp();
        self.daily_costs
            .iter()
            .filter(|day| day.timestamp >= cutoff)
            .flat_map(|day| &day.line_items)
            .map(|item| item.cost)
            .sum()
    }
}

#[derive(Debug, Deserialize)]
struct GatewayUsage {
    #[serde(default)]
    total_usage: f64,
    #[serde(default)]
    today_usage: f64,
    #[serde(default)]
    week_usage: f64,
    #[serde(default)]
    month_usage: f64,
}

/// Fetches usage for keys of the supported kinds
pub struct UsageClient {
    http: Client,
}

impl UsageClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    pub async fn fetch(&self, key: &KeyRecord) -> Result<Usage> {
        match &key.kind {
            KeyKind::OpenAi => self.fetch_openai(key, Utc::now()).await,
            KeyKind::Crs => self.fetch_gateway(key).await,
            KeyKind::Other(kind) => bail!("usage lookup is not supported for key type {}", kind),
        }
    }

    async fn fetch_openai(&self, key: &KeyRecord, now: DateTime<Utc>) -> Result<Usage> {
        let base = match base_url(key) {
            "" => DEFAULT_OPENAI_BASE_URL.trim_end_matches('/'),
            base => base,
        };
        let url = format!("{}/usage?date={}", base, now.format("%Y-%m-%d"));
        debug!("Fetching OpenAI usage for key {}", key.id);

        let response = self.http.get(&url).bearer_auth(&key.secret).send().await?;
        let payload: OpenAiUsage = read_json("OpenAI", response).await?;
        Ok(Usage {
            used: payload.total_usage,
            daily: payload.sum_recent(1, now),
            weekly: payload.sum_recent(7, now),
            monthly: payload.sum_recent(30, now),
        })
    }

    async fn fetch_gateway(&self, key: &KeyRecord) -> Result<Usage> {
        let base = base_url(key);
        if base.is_empty() {
            bail!("key {} has no base URL to query", key.name);
        }
        let url = format!("{}/v1/dashboard/billing/usage", base);
        debug!("Fetching gateway usage for key {}", key.id);

        let response = self.http.get(&url).bearer_auth(&key.secret).send().await?;
        let payload: GatewayUsage = read_json("CRS", response).await?;
        Ok(Usage {
            used: payload.total_usage,
            daily: payload.today_usage,
            weekly: payload.week_usage,
            monthly: payload.month_usage,
        })
    }
}

fn base_url(key: &KeyRecord) -> &str {
    key.endpoint.trim().trim_end_matches('/')
}

async fn read_json<T: DeserializeOwned>(provider: &str, response: Response) -> Result<T> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        bail!("{} usage API returned HTTP {}: {}", provider, status.as_u16(), body.trim());
    }
    response
        .json()
        .await
        .with_context(|| format!("{} usage response is not valid JSON", provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    const SECRET: &str = "sk-usage-test";

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer sk-usage-test")
    }

    async fn openai_usage(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> AxumResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
        }
        if query.get("date").map(String::len) != Some(10) {
            return (StatusCode::BAD_REQUEST, "missing date").into_response();
        }
        let now = Utc::now().timestamp();
        Json(json!({
            "object": "list",
            "total_usage": 12.5,
            "daily_costs": [
                { "timestamp": now - 3600, "line_items": [{ "name": "gpt", "cost": 1.5 }, { "name": "emb", "cost": 0.5 }] },
                { "timestamp": now - 3 * 86_400, "line_items": [{ "name": "gpt", "cost": 4.0 }] },
                { "timestamp": now - 60 * 86_400, "line_items": [{ "name": "gpt", "cost": 100.0 }] }
            ]
        }))
        .into_response()
    }

    async fn gateway_usage(headers: HeaderMap) -> AxumResponse {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
        }
        Json(json!({ "total_usage": 30.0, "today_usage": 1.0, "week_usage": 5.0, "month_usage": 20.0 })).into_response()
    }

    async fn spawn_provider() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/v1/usage", get(openai_usage))
            .route("/v1/dashboard/billing/usage", get(gateway_usage));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn key(kind: KeyKind, endpoint: String, secret: &str) -> KeyRecord {
        KeyRecord {
            kind,
            endpoint,
            ..KeyRecord::new("metered", secret)
        }
    }

    #[tokio::test]
    async fn test_openai_usage_sums_recent_days() {
        let base = spawn_provider().await;
        let client = UsageClient::new().unwrap();

        let usage = client
            .fetch(&key(KeyKind::OpenAi, format!("{}/v1/", base), SECRET))
            .await
            .unwrap();
        assert_eq!(usage.used, 12.5);
        assert_eq!(usage.daily, 2.0);
        assert_eq!(usage.weekly, 6.0);
        assert_eq!(usage.monthly, 6.0);
    }

    #[tokio::test]
    async fn test_gateway_usage() {
        let base = spawn_provider().await;
        let client = UsageClient::new().unwrap();

        let usage = client.fetch(&key(KeyKind::Crs, base, SECRET)).await.unwrap();
        assert_eq!(
            usage,
            Usage {
                used: 30.0,
                daily: 1.0,
                weekly: 5.0,
                monthly: 20.0,
            }
        );
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let base = spawn_provider().await;
        let client = UsageClient::new().unwrap();

        let err = client
            .fetch(&key(KeyKind::Crs, base, "sk-wrong"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTP 401"));
        assert!(message.contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_unsupported_or_unroutable_keys() {
        let client = UsageClient::new().unwrap();

        let other = key(KeyKind::Other("azure".to_string()), "http://127.0.0.1:9".to_string(), SECRET);
        assert!(client.fetch(&other).await.unwrap_err().to_string().contains("azure"));

        let no_base = key(KeyKind::Crs, String::new(), SECRET);
        assert!(client.fetch(&no_base).await.unwrap_err().to_string().contains("no base URL"));
    }
}
