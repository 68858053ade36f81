//! Registry import and export

use anyhow::{bail, Context, Result};
use clap::Args;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use keyswitch_core::storage::{ensure_private_dir, write_private};
use keyswitch_core::{merge_registries, Registry, RegistryManager};

#[derive(Args, Debug, Default)]
pub struct ImportArgs {
    /// File to import
    #[arg(long)]
    pub input: PathBuf,

    /// json, yaml or toml; inferred from the extension when omitted
    #[arg(long)]
    pub format: Option<String>,

    /// Merge into the current registry instead of replacing it
    #[arg(long)]
    pub merge: bool,
}

#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// Destination file; stdout when omitted
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// json, yaml or toml
    #[arg(long, default_value = "json")]
    pub format: String,
}

/// Document encodings accepted by import and export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    pub fn parse(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => bail!("unsupported format {}", other),
        }
    }

    /// `.yaml`/`.yml` are YAML, `.toml` is TOML, anything else is JSON
    pub fn infer(path: &Path) -> Self {
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yaml" | "yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            _ => Self::Json,
        }
    }

    fn decode(self, data: &[u8]) -> Result<Registry> {
        Ok(match self {
            Self::Json => serde_json::from_slice(data)?,
            Self::Yaml => serde_yaml::from_slice(data)?,
            Self::Toml => toml::from_str(std::str::from_utf8(data)?)?,
        })
    }

    fn encode(self, registry: &Registry) -> Result<Vec<u8>> {
        Ok(match self {
            Self::Json => serde_json::to_vec_pretty(registry)?,
            Self::Yaml => serde_yaml::to_string(registry)?.into_bytes(),
            Self::Toml => toml::to_string_pretty(registry)?.into_bytes(),
        })
    }
}

pub async fn import(manager: &RegistryManager, args: &ImportArgs, out: &mut dyn Write) -> Result<()> {
    let data = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let format = match &args.format {
        Some(format) => Format::parse(format)?,
        None => Format::infer(&args.input),
    };
    let incoming = format
        .decode(&data)
        .with_context(|| format!("failed to decode {}", args.input.display()))?;
    let imported = incoming.keys.len();

    let registry = if args.merge {
        let current = manager.config().await?;
        info!("Merging registry from {}", args.input.display());
        merge_registries(&current, &incoming)
    } else {
        warn!("Replacing registry with {}", args.input.display());
        incoming
    };

    manager.replace_config(registry).await?;
    manager.save().await?;

    writeln!(out, "✓ Imported {} keys from {}", imported, args.input.display())?;
    info!("Imported {} keys", imported);
    Ok(())
}

pub async fn export(manager: &RegistryManager, args: &ExportArgs, out: &mut dyn Write) -> Result<()> {
    let format = Format::parse(&args.format)?;
    let data = format.encode(&manager.config().await?)?;

    let Some(path) = &args.output else {
        out.write_all(&data)?;
        if !data.ends_with(b"\n") {
            writeln!(out)?;
        }
        return Ok(());
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty() && !d.exists()) {
        ensure_private_dir(dir).await?;
    }
    write_private(path, &data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    writeln!(out, "✓ Exported registry to {}", path.display())?;
    info!("Exported registry to {} as {:?}", path.display(), format);
    Ok(())
}
