//! `ckm check`: report quota usage, optionally refreshed from the providers

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use futures::stream::{self, StreamExt};
use std::io::Write;
use tracing::{debug, info, warn};

use super::keys::format_remaining;
use crate::usage::UsageClient;
use keyswitch_core::{KeyRecord, RegistryManager, SortMode};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Check every key instead of only the active one
    #[arg(long)]
    pub all: bool,

    /// Ask the provider usage APIs and store what they report
    #[arg(long)]
    pub refresh: bool,

    /// Usage requests in flight at once; 0 is treated as 1
    #[arg(long, default_value_t = 4)]
    pub parallel: usize,
}

/// A key whose usage lookup failed
struct Failure {
    name: String,
    error: anyhow::Error,
}

pub async fn check(manager: &RegistryManager, args: &CheckArgs, out: &mut dyn Write) -> Result<()> {
    let client = UsageClient::new()?;
    check_with(manager, &client, args, out).await
}

async fn check_with(
    manager: &RegistryManager,
    client: &UsageClient,
    args: &CheckArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let targets = if args.all {
        manager.list_keys(SortMode::ActiveFirst).await?
    } else if manager.config().await?.keys.is_empty() {
        Vec::new()
    } else {
        vec![manager.active_key().await?]
    };
    if targets.is_empty() {
        writeln!(out, "No keys to check.")?;
        return Ok(());
    }

    info!("Checking usage of {} keys (refresh: {})", targets.len(), args.refresh);
    let failures = if args.refresh {
        refresh(manager, client, &targets, args.parallel.max(1)).await?
    } else {
        Vec::new()
    };

    let mut total_used = 0.0;
    for target in &targets {
        let key = manager.get_key(&target.id).await?;
        write_report(out, &key)?;
        total_used += key.quota_used;
    }
    writeln!(out, "Total used: ${:.2}", total_used)?;

    if !failures.is_empty() {
        for failure in &failures {
            writeln!(out, "⚠ Usage lookup for {} failed: {:#}", failure.name, failure.error)?;
        }
        warn!("Usage check finished with {} failures", failures.len());
        bail!("{} usage lookups failed", failures.len());
    }
    info!("Usage check finished, total used {:.2}", total_used);
    Ok(())
}

/// Fetch usage for `targets` with at most `parallel` requests in flight, then
/// store every successful reading and save once
async fn refresh(
    manager: &RegistryManager,
    client: &UsageClient,
    targets: &[KeyRecord],
    parallel: usize,
) -> Result<Vec<Failure>> {
    let checked_at = Utc::now();
    let fetched: Vec<_> = stream::iter(targets)
        .map(|key| async move { (key, client.fetch(key).await) })
        .buffer_unordered(parallel)
        .collect()
        .await;

    let mut failures = Vec::new();
    for (key, result) in fetched {
        let recorded = match result {
            Ok(usage) => manager
                .record_usage(&key.id, usage.used, checked_at)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match recorded {
            Ok(_) => debug!("Refreshed usage of {} ({})", key.name, key.id),
            Err(error) => {
                warn!("Usage lookup failed for {} ({}): {:#}", key.name, key.id, error);
                failures.push(Failure {
                    name: key.name.clone(),
                    error,
                });
            }
        }
    }

    manager.save().await?;
    Ok(failures)
}

fn write_report(out: &mut dyn Write, key: &KeyRecord) -> Result<()> {
    let marker = if key.active { " *" } else { "" };
    writeln!(out, "{} ({}){}", key.name, key.id, marker)?;
    writeln!(out, "  Used:       ${:.2}", key.quota_used)?;
    writeln!(out, "  Remaining:  {} ({})", format_remaining(key), key.quota_period)?;
    let checked = key
        .last_checked_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    writeln!(out, "  Checked:    {}", checked)?;
    writeln!(out)?;
    Ok(())
}
