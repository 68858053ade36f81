//! Registry type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{RegistryError, Result};
use crate::quota::{self, QuotaPeriod};

/// Schema version written into new registries
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0.0";

/// Endpoint assumed for primary-kind keys that do not name one
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub(crate) const DEFAULT_AUTH_METHOD: &str = "apikey";
pub(crate) const DEFAULT_WIRE_API: &str = "responses";

/// Provider family a key belongs to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeyKind {
    /// OpenAI-compatible API (the primary kind)
    #[default]
    OpenAi,
    /// Custom relay gateway
    Crs,
    /// Unrecognised kind, preserved verbatim
    Other(String),
}

impl KeyKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenAi => "openai",
            Self::Crs => "crs",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for KeyKind {
    fn from(raw: String) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("openai") {
            Self::OpenAi
        } else if trimmed.eq_ignore_ascii_case("crs") {
            Self::Crs
        } else {
            Self::Other(raw)
        }
    }
}

impl From<KeyKind> for String {
    fn from(kind: KeyKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One managed API credential with quota and provider metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyRecord {
    /// Registry-assigned decimal id, unless supplied by the caller
    pub id: String,

    /// Display name, unique case-insensitively
    pub name: String,

    /// The credential itself
    #[serde(rename = "api_key")]
    pub secret: String,

    /// Base URL of the provider API (may be empty)
    #[serde(rename = "base_url")]
    pub endpoint: String,

    #[serde(rename = "type")]
    pub kind: KeyKind,

    pub description: String,

    pub created_at: Option<DateTime<Utc>>,

    /// Last remote usage check; anchors the quota period
    #[serde(rename = "last_checked")]
    pub last_checked_at: Option<DateTime<Utc>>,

    #[serde(rename = "last_used")]
    pub last_used_at: Option<DateTime<Utc>>,

    pub active: bool,

    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<String>,

    // Hints consumed by tool configuration generators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(rename = "preferred_auth_method", skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,

    #[serde(rename = "wire_api", skip_serializing_if = "Option::is_none")]
    pub wire_protocol: Option<String>,

    #[serde(rename = "env_key", skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,

    /// Unset means true
    #[serde(rename = "requires_openai_auth", skip_serializing_if = "Option::is_none")]
    pub requires_upstream_auth: Option<bool>,

    /// Verbatim configuration that overrides anything generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_config: Option<String>,

    #[serde(rename = "quota_type")]
    pub quota_period: QuotaPeriod,

    /// 0 means unlimited
    pub quota_limit: f64,

    pub quota_used: f64,
}

impl KeyRecord {
    /// Create a draft with just a name and secret; everything else defaults on add
    pub fn new(name: &str, secret: &str) -> Self {
        Self {
            name: name.to_string(),
            secret: secret.to_string(),
            ..Default::default()
        }
    }

    /// Remaining quota as of now, honouring period rollover
    pub fn remaining_quota(&self) -> f64 {
        let last_checked = self.last_checked_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        quota::remaining(self.quota_limit, self.quota_used, &self.quota_period, last_checked)
    }

    /// Whether upstream auth is required, with the unset default applied
    pub fn requires_upstream_auth(&self) -> bool {
        self.requires_upstream_auth.unwrap_or(true)
    }

    /// Fill unset hint fields with the capability defaults
    pub(crate) fn apply_capability_defaults(&mut self) {
        if is_blank(&self.auth_method) {
            self.auth_method = Some(DEFAULT_AUTH_METHOD.to_string());
        }
        if is_blank(&self.wire_protocol) {
            self.wire_protocol = Some(DEFAULT_WIRE_API.to_string());
        }
        if self.requires_upstream_auth.is_none() {
            self.requires_upstream_auth = Some(true);
        }
        if self.endpoint.trim().is_empty() && self.kind == KeyKind::OpenAi {
            self.endpoint = DEFAULT_OPENAI_BASE_URL.to_string();
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Remote sync configuration persisted inside the registry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSyncSettings {
    /// Provider identifier, e.g. "b2"
    pub provider: String,
    pub bucket_name: String,
    /// Resolved bucket id, cached after the first lookup
    pub bucket_id: String,
    /// Profile whose snapshot this machine syncs
    pub object_key: String,
    pub key_id: String,
    pub application_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Stable per-registry instance marker (not an encryption key)
    pub sync_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl RemoteSyncSettings {
    /// Enabled settings must carry credentials and a bucket name
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let missing: Vec<&str> = [
            ("key_id", &self.key_id),
            ("application_key", &self.application_key),
            ("bucket_name", &self.bucket_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Validation(format!(
                "remote sync is enabled but {} is empty",
                missing.join(", ")
            )))
        }
    }
}

/// Top-level persisted document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    #[serde(rename = "version")]
    pub schema_version: String,

    #[serde(rename = "active_key_id")]
    pub active_id: String,

    /// Insertion order is creation order
    #[serde(deserialize_with = "null_as_default")]
    pub keys: Vec<KeyRecord>,

    #[serde(rename = "last_updated")]
    pub last_updated_at: Option<DateTime<Utc>>,

    /// Next auto-assigned id; never decreases
    #[serde(skip_serializing_if = "is_zero")]
    pub next_id: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSyncSettings>,
}

impl Registry {
    /// A fresh registry with no keys
    pub fn empty() -> Self {
        Self {
            schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            last_updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn find(&self, id: &str) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.id == id)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.keys.iter().position(|k| k.id == id)
    }

    pub(crate) fn position_by_name(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| names_match(&k.name, name))
    }
}

/// Case-insensitive name equality
pub(crate) fn names_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Older writers emit `null` for empty lists
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
