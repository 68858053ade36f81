//! Key commands: list, show, add, update, remove, switch

use anyhow::{bail, Context, Result};
use clap::Args;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use super::resolve_key;
use keyswitch_core::{FieldUpdate, KeyKind, KeyPatch, KeyRecord, QuotaPeriod, RegistryManager, SortMode};

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Sort order: default (active first, oldest first) or name
    #[arg(long, default_value = "default")]
    pub sort: String,

    /// Output format: table or json
    #[arg(long, default_value = "table")]
    pub format: String,

    /// Only show keys of this type (openai, crs, ...)
    #[arg(long)]
    pub filter_type: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct AddArgs {
    /// Display name, unique case-insensitively
    #[arg(long)]
    pub name: String,

    /// The API key itself
    #[arg(long)]
    pub key: String,

    /// Provider base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Key type (openai, crs, ...)
    #[arg(long = "type")]
    pub kind: Option<String>,

    /// Quota period: daily, weekly, monthly, yearly, unlimited
    #[arg(long, default_value = "monthly")]
    pub quota_type: String,

    /// Quota limit; 0 means unlimited
    #[arg(long, default_value_t = 0.0)]
    pub quota_limit: f64,

    /// Comma-separated tags
    #[arg(long)]
    pub tags: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// File whose contents replace the generated tool configuration verbatim
    #[arg(long = "config-file")]
    pub raw_config_file: Option<PathBuf>,

    /// Make the new key active
    #[arg(long)]
    pub activate: bool,
}

#[derive(Args, Debug, Default)]
pub struct UpdateArgs {
    /// Key id or name
    pub target: String,

    #[arg(long)]
    pub set_name: Option<String>,

    #[arg(long)]
    pub set_key: Option<String>,

    #[arg(long)]
    pub set_base_url: Option<String>,

    #[arg(long)]
    pub set_quota_type: Option<String>,

    #[arg(long)]
    pub set_quota_limit: Option<f64>,

    /// Replace all tags (comma-separated; empty clears them)
    #[arg(long)]
    pub set_tags: Option<String>,

    /// File whose contents replace the raw tool configuration
    #[arg(long, conflicts_with = "clear_config")]
    pub set_config_file: Option<PathBuf>,

    /// Drop the raw tool configuration
    #[arg(long)]
    pub clear_config: bool,
}

#[derive(Args, Debug, Default)]
pub struct ShowArgs {
    /// Key id or name (default: the active key)
    pub target: Option<String>,

    /// Print a single field: id, name, api_key, base_url, type, quota_type,
    /// quota_limit, quota_used, remaining, raw_config
    #[arg(long)]
    pub field: Option<String>,
}

pub async fn list(manager: &RegistryManager, args: &ListArgs, out: &mut dyn Write) -> Result<()> {
    let mut keys = manager.list_keys(SortMode::parse(&args.sort)).await?;
    if let Some(kind) = args.filter_type.as_deref() {
        keys.retain(|k| k.kind.as_str().eq_ignore_ascii_case(kind.trim()));
    }

    match args.format.to_ascii_lowercase().as_str() {
        "json" => {
            serde_json::to_writer_pretty(&mut *out, &keys)?;
            writeln!(out)?;
            return Ok(());
        }
        "table" => {}
        other => bail!("unsupported list format {}", other),
    }

    if keys.is_empty() {
        writeln!(out, "No keys configured. Add one with `ckm add`.")?;
        return Ok(());
    }

    writeln!(out, "  {:<4} {:<24} {:<8} {:<10} REMAINING", "ID", "NAME", "TYPE", "QUOTA")?;
    for key in &keys {
        let marker = if key.active { '*' } else { ' ' };
        writeln!(
            out,
            "{} {:<4} {:<24} {:<8} {:<10} {}",
            marker,
            key.id,
            key.name,
            key.kind,
            key.quota_period,
            format_remaining(key)
        )?;
    }

    let active = keys
        .iter()
        .find(|k| k.active)
        .map(|k| k.name.as_str())
        .unwrap_or("none");
    writeln!(out, "\nTotal: {} keys | Active: {}", keys.len(), active)?;
    Ok(())
}

pub(super) fn format_remaining(key: &KeyRecord) -> String {
    if key.quota_limit == 0.0 {
        return "∞".to_string();
    }
    format!("{:.2} / {:.2}", key.remaining_quota(), key.quota_limit)
}

pub async fn add(manager: &RegistryManager, args: AddArgs, out: &mut dyn Write) -> Result<()> {
    let quota_period = QuotaPeriod::parse_strict(&args.quota_type)
        .with_context(|| format!("unsupported quota type {}", args.quota_type))?;
    if args.quota_limit < 0.0 {
        bail!("quota limit must not be negative");
    }

    let raw_config = match &args.raw_config_file {
        Some(path) => Some(read_raw_config(path).await?),
        None => None,
    };

    let draft = KeyRecord {
        endpoint: args.base_url.unwrap_or_default().trim().to_string(),
        kind: args.kind.map(KeyKind::from).unwrap_or_default(),
        description: args.description.unwrap_or_default(),
        tags: split_tags(args.tags.as_deref().unwrap_or_default()),
        raw_config,
        quota_period,
        quota_limit: args.quota_limit,
        active: args.activate,
        ..KeyRecord::new(args.name.trim(), args.key.trim())
    };

    let created = manager.add_key(draft).await?;
    manager.save().await?;

    writeln!(out, "✓ Added key {} ({})", created.name, created.id)?;
    info!("Added key {} ({})", created.name, created.id);
    Ok(())
}

pub async fn update(manager: &RegistryManager, args: UpdateArgs, out: &mut dyn Write) -> Result<()> {
    let key = resolve_key(manager, &args.target).await?;
    let mut patch = KeyPatch::new(&key.id);

    patch.name = non_blank(args.set_name);
    patch.secret = non_blank(args.set_key);
    if let Some(url) = args.set_base_url {
        patch.endpoint = match url.trim() {
            "" => FieldUpdate::Clear,
            url => FieldUpdate::Set(url.to_string()),
        };
    }
    if let Some(quota_type) = non_blank(args.set_quota_type) {
        let period = QuotaPeriod::parse_strict(&quota_type)
            .with_context(|| format!("unsupported quota type {}", quota_type))?;
        patch.quota_period = Some(period);
    }
    if let Some(limit) = args.set_quota_limit {
        if limit < 0.0 {
            bail!("quota limit must not be negative");
        }
        patch.quota_limit = Some(limit);
    }
    if let Some(tags) = args.set_tags {
        patch.tags = Some(split_tags(&tags));
    }
    if let Some(path) = &args.set_config_file {
        patch.raw_config = FieldUpdate::Set(read_raw_config(path).await?);
    } else if args.clear_config {
        patch.raw_config = FieldUpdate::Clear;
    }

    let updated = manager.update_key(patch).await?;
    manager.save().await?;

    writeln!(out, "✓ Updated key {} ({})", updated.name, updated.id)?;
    info!("Updated key {} ({})", updated.name, updated.id);
    Ok(())
}

pub async fn show(manager: &RegistryManager, args: &ShowArgs, out: &mut dyn Write) -> Result<()> {
    let key = match args.target.as_deref() {
        Some(target) => resolve_key(manager, target).await?,
        None => manager.active_key().await.context("no active key")?,
    };

    if let Some(field) = args.field.as_deref() {
        writeln!(out, "{}", key_field(&key, field)?)?;
        return Ok(());
    }

    writeln!(out, "ID:          {}", key.id)?;
    writeln!(out, "Name:        {}", key.name)?;
    writeln!(out, "Type:        {}", key.kind)?;
    writeln!(out, "API key:     {}", mask_secret(&key.secret))?;
    if !key.endpoint.is_empty() {
        writeln!(out, "Base URL:    {}", key.endpoint)?;
    }
    if !key.description.is_empty() {
        writeln!(out, "Description: {}", key.description)?;
    }
    if !key.tags.is_empty() {
        writeln!(out, "Tags:        {}", key.tags.join(", "))?;
    }
    writeln!(out, "Quota:       {} ({})", format_remaining(&key), key.quota_period)?;
    writeln!(out, "Active:      {}", if key.active { "yes" } else { "no" })?;
    if let Some(used) = key.last_used_at {
        writeln!(out, "Last used:   {}", used.to_rfc3339())?;
    }
    if key.raw_config.is_some() {
        writeln!(out, "Raw config:  set")?;
    }
    Ok(())
}

fn key_field(key: &KeyRecord, field: &str) -> Result<String> {
    Ok(match field.trim().to_ascii_lowercase().as_str() {
        "id" => key.id.clone(),
        "name" => key.name.clone(),
        "api_key" => key.secret.clone(),
        "base_url" => key.endpoint.clone(),
        "type" => key.kind.to_string(),
        "quota_type" => key.quota_period.to_string(),
        "quota_limit" => format!("{:.2}", key.quota_limit),
        "quota_used" => format!("{:.2}", key.quota_used),
        "remaining" => format!("{:.2}", key.remaining_quota()),
        "raw_config" => key.raw_config.clone().unwrap_or_default(),
        other => bail!("unknown field {}", other),
    })
}

/// Keep the first and last four characters of long secrets
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub async fn remove(manager: &RegistryManager, target: &str, out: &mut dyn Write) -> Result<()> {
    let key = resolve_key(manager, target).await?;
    manager.remove_key(&key.id).await?;
    manager.save().await?;

    writeln!(out, "✓ Removed key {} ({})", key.name, key.id)?;
    match manager.active_key().await {
        Ok(active) if key.active => writeln!(out, "Active key is now {} ({})", active.name, active.id)?,
        _ => {}
    }
    info!("Removed key {} ({})", key.name, key.id);
    Ok(())
}

pub async fn switch(manager: &RegistryManager, target: &str, out: &mut dyn Write) -> Result<()> {
    let key = resolve_key(manager, target).await?;
    manager.set_active_key(&key.id).await?;
    manager.touch_key(&key.id).await?;
    manager.save().await?;

    writeln!(out, "✓ Switched to {} ({})", key.name, key.id)?;
    info!("Switched active key to {} ({})", key.name, key.id);
    Ok(())
}

async fn read_raw_config(path: &Path) -> Result<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    if contents.trim().is_empty() {
        bail!("configuration file {} is empty", path.display());
    }
    Ok(contents)
}

fn split_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
