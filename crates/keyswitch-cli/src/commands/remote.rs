//! `ckm remote`: sync the registry through a B2 bucket
//!
//! One object per profile, `<profile>.json`. Each command works on a copy of
//! the registry so no registry lock is held while network calls run, then
//! writes the result back with `replace_config` and `save`.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use keyswitch_b2::{normalize_profile, object_name, B2Client, RequestContext, DEFAULT_AUTH_URL};
use keyswitch_core::snapshot::snapshot_path;
use keyswitch_core::{Registry, RegistryManager, RemoteSyncSettings, Snapshot};

const PROVIDER: &str = "b2";
const DEFAULT_PROFILE: &str = "default";

#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// Configure B2 credentials and verify the bucket
    Init(InitArgs),
    /// Upload the local keys as a profile snapshot
    Push(ProfileArgs),
    /// Replace the local keys with a profile snapshot
    Pull(ProfileArgs),
    /// Delete a profile snapshot remotely and locally
    Delete(ProfileArgs),
}

impl RemoteCommand {
    /// Upper bound on the network work of one command
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Init(_) | Self::Delete(_) => Duration::from_secs(30),
            Self::Push(_) | Self::Pull(_) => Duration::from_secs(60),
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// B2 application key id
    #[arg(long, env = "KEYSWITCH_B2_KEY_ID", hide_env_values = true)]
    pub key_id: Option<String>,

    /// B2 application key
    #[arg(long, env = "KEYSWITCH_B2_APP_KEY", hide_env_values = true)]
    pub app_key: Option<String>,

    /// Bucket name
    #[arg(long)]
    pub bucket: Option<String>,

    /// Profile label distinguishing this machine or environment
    #[arg(long, default_value = DEFAULT_PROFILE)]
    pub profile: String,
}

#[derive(Args, Debug, Default)]
pub struct ProfileArgs {
    /// Profile to sync (default: the configured one)
    #[arg(long)]
    pub profile: Option<String>,
}

/// Runs remote commands against one registry
pub struct RemoteSync<'a> {
    manager: &'a RegistryManager,
    auth_url: String,
}

impl<'a> RemoteSync<'a> {
    pub fn new(manager: &'a RegistryManager) -> Self {
        Self::with_auth_url(manager, DEFAULT_AUTH_URL)
    }

    pub fn with_auth_url(manager: &'a RegistryManager, auth_url: &str) -> Self {
        Self {
            manager,
            auth_url: auth_url.to_string(),
        }
    }

    /// Run `command` under its timeout; Ctrl-C cancels the in-flight call
    pub async fn run(&self, command: RemoteCommand, out: &mut dyn Write) -> Result<()> {
        let (ctx, cancel) = RequestContext::background()
            .with_timeout(command.timeout())
            .cancellable();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let result = match command {
            RemoteCommand::Init(args) => self.init(&ctx, &args, out).await,
            RemoteCommand::Push(args) => self.push(&ctx, &args, out).await,
            RemoteCommand::Pull(args) => self.pull(&ctx, &args, out).await,
            RemoteCommand::Delete(args) => self.delete(&ctx, &args, out).await,
        };
        interrupt.abort();
        result
    }

    pub async fn init(&self, ctx: &RequestContext, args: &InitArgs, out: &mut dyn Write) -> Result<()> {
        let mut registry = self.manager.config().await?;
        let settings = registry.remote.get_or_insert_with(RemoteSyncSettings::default);

        let key_id = pick(args.key_id.as_deref(), &settings.key_id);
        let app_key = pick(args.app_key.as_deref(), &settings.application_key);
        if key_id.is_empty() || app_key.is_empty() {
            bail!("--key-id and --app-key are required");
        }
        let bucket = pick(args.bucket.as_deref(), &settings.bucket_name);
        if bucket.is_empty() {
            bail!("--bucket is required");
        }

        if !settings.bucket_name.eq_ignore_ascii_case(&bucket) {
            settings.bucket_id.clear();
        }
        settings.provider = PROVIDER.to_string();
        settings.key_id = key_id;
        settings.application_key = app_key;
        settings.bucket_name = bucket;
        let profile = normalize_profile(&args.profile, DEFAULT_PROFILE);
        settings.object_key = profile.clone();
        settings.enabled = true;

        let client = self.client(settings)?;
        client
            .prepare(ctx)
            .await
            .with_context(|| format!("failed to reach bucket {}", settings.bucket_name))?;
        client.write_back(settings).await;
        let bucket = settings.bucket_name.clone();

        self.commit(registry).await?;

        writeln!(out, "✓ Remote sync configured for bucket {}", bucket)?;
        writeln!(out, "Next: ckm remote push --profile {}", profile)?;
        writeln!(out, "On other machines: ckm remote pull --profile {}", profile)?;
        info!("Configured remote sync: bucket={} profile={}", bucket, profile);
        Ok(())
    }

    pub async fn push(&self, ctx: &RequestContext, args: &ProfileArgs, out: &mut dyn Write) -> Result<()> {
        let mut registry = self.manager.config().await?;
        let snapshot = Snapshot::build(&registry);
        let data = snapshot.marshal()?;

        let settings = enabled_settings(&mut registry)?;
        let profile = pick_profile(args, settings);
        let object = object_name(&profile);

        let local_path = self.local_snapshot_path(&profile);
        snapshot
            .save_to_file(&local_path)
            .await
            .with_context(|| format!("failed to write {}", local_path.display()))?;

        let client = self.client(settings)?;
        client.prepare(ctx).await?;
        client
            .upload(ctx, &object, &data)
            .await
            .with_context(|| format!("failed to upload {}", object))?;

        client.write_back(settings).await;
        settings.object_key = profile.clone();
        settings.enabled = true;
        settings.last_sync = Some(Utc::now());

        self.commit(registry).await?;

        writeln!(out, "✓ Uploaded snapshot to {}", object)?;
        writeln!(out, "Local copy: {}", local_path.display())?;
        info!("Pushed snapshot: object={} profile={}", object, profile);
        Ok(())
    }

    pub async fn pull(&self, ctx: &RequestContext, args: &ProfileArgs, out: &mut dyn Write) -> Result<()> {
        let mut registry = self.manager.config().await?;
        let settings = enabled_settings(&mut registry)?;
        let profile = pick_profile(args, settings);
        let object = object_name(&profile);

        let client = self.client(settings)?;
        client.prepare(ctx).await?;
        let data = client
            .download(ctx, &object)
            .await
            .with_context(|| format!("failed to download {}", object))?;
        let snapshot = Snapshot::unmarshal(&data).with_context(|| format!("{} is not a valid snapshot", object))?;

        let local_path = self.local_snapshot_path(&profile);
        snapshot
            .save_to_file(&local_path)
            .await
            .with_context(|| format!("failed to write {}", local_path.display()))?;

        client.write_back(settings).await;
        settings.object_key = profile.clone();
        settings.enabled = true;
        settings.last_sync = Some(Utc::now());

        let pulled = snapshot.keys.len();
        apply_snapshot(&mut registry, snapshot);
        self.commit(registry).await?;

        writeln!(out, "✓ Pulled {} keys from {}", pulled, object)?;
        writeln!(out, "Local copy: {}", local_path.display())?;
        info!("Pulled snapshot: object={} profile={}", object, profile);
        Ok(())
    }

    pub async fn delete(&self, ctx: &RequestContext, args: &ProfileArgs, out: &mut dyn Write) -> Result<()> {
        let mut registry = self.manager.config().await?;
        let settings = enabled_settings(&mut registry)?;
        let profile = pick_profile(args, settings);
        let object = object_name(&profile);

        let client = self.client(settings)?;
        client.prepare(ctx).await?;
        client
            .delete(ctx, &object)
            .await
            .with_context(|| format!("failed to delete {}", object))?;

        remove_local_snapshot(&self.local_snapshot_path(&profile)).await;
        client.write_back(settings).await;
        forget_profile(settings, &profile);

        self.commit(registry).await?;

        writeln!(out, "✓ Deleted remote snapshot {} and its local copy", object)?;
        info!("Deleted snapshot: object={} profile={}", object, profile);
        Ok(())
    }

    fn client(&self, settings: &RemoteSyncSettings) -> Result<B2Client> {
        Ok(B2Client::with_auth_url(settings, &self.auth_url)?)
    }

    fn local_snapshot_path(&self, profile: &str) -> PathBuf {
        snapshot_path(Path::new(&self.manager.config_path()), profile)
    }

    async fn commit(&self, registry: Registry) -> Result<()> {
        self.manager.replace_config(registry).await?;
        self.manager.save().await?;
        Ok(())
    }
}

/// Flag value if given, else the stored value; both trimmed
fn pick(flag: Option<&str>, stored: &str) -> String {
    flag.map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| stored.trim())
        .to_string()
}

fn pick_profile(args: &ProfileArgs, settings: &RemoteSyncSettings) -> String {
    normalize_profile(args.profile.as_deref().unwrap_or_default(), &settings.object_key)
}

fn enabled_settings(registry: &mut Registry) -> Result<&mut RemoteSyncSettings> {
    registry
        .remote
        .as_mut()
        .filter(|s| s.enabled)
        .context("remote sync is not configured; run `ckm remote init` first")
}

/// Pulled keys and active pointer replace the local ones; remote settings stay
fn apply_snapshot(registry: &mut Registry, snapshot: Snapshot) {
    registry.keys = snapshot.keys;
    registry.active_id = snapshot.active_id;
}

/// Deleting the configured profile turns sync off
fn forget_profile(settings: &mut RemoteSyncSettings, profile: &str) {
    if settings.object_key == profile {
        settings.enabled = false;
        settings.object_key.clear();
        settings.last_sync = None;
    }
}

async fn remove_local_snapshot(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove local snapshot {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open_registry;
    use crate::commands::test_support::manager;
    use keyswitch_b2::testing::{self as fake, APP_KEY, BUCKET_ID, BUCKET_NAME, KEY_ID};
    use keyswitch_core::KeyRecord;
    use tempfile::TempDir;

    fn init_args(profile: &str) -> InitArgs {
        InitArgs {
            key_id: Some(KEY_ID.to_string()),
            app_key: Some(APP_KEY.to_string()),
            bucket: Some(BUCKET_NAME.to_string()),
            profile: profile.to_string(),
        }
    }

    fn enabled() -> RemoteSyncSettings {
        RemoteSyncSettings {
            provider: PROVIDER.to_string(),
            bucket_name: "team-sync".to_string(),
            key_id: "kid".to_string(),
            application_key: "secret".to_string(),
            object_key: "laptop".to_string(),
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(RemoteCommand::Init(InitArgs::default()).timeout(), Duration::from_secs(30));
        assert_eq!(RemoteCommand::Push(ProfileArgs::default()).timeout(), Duration::from_secs(60));
        assert_eq!(RemoteCommand::Pull(ProfileArgs::default()).timeout(), Duration::from_secs(60));
        assert_eq!(RemoteCommand::Delete(ProfileArgs::default()).timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_pick_prefers_flag() {
        assert_eq!(pick(Some(" new "), "old"), "new");
        assert_eq!(pick(Some("  "), " old "), "old");
        assert_eq!(pick(None, ""), "");
    }

    #[test]
    fn test_profile_falls_back_to_configured() {
        let settings = enabled();
        assert_eq!(pick_profile(&ProfileArgs::default(), &settings), "laptop");
        let args = ProfileArgs {
            profile: Some("Build Box".to_string()),
        };
        assert_eq!(pick_profile(&args, &settings), "build-box");
    }

    #[test]
    fn test_apply_snapshot_keeps_remote_settings() {
        let mut registry = Registry {
            keys: vec![KeyRecord::new("old", "sk")],
            active_id: "1".to_string(),
            remote: Some(enabled()),
            ..Default::default()
        };
        let snapshot = Snapshot {
            schema_version: "1.0".to_string(),
            generated_at: Utc::now(),
            active_id: "7".to_string(),
            keys: vec![KeyRecord {
                id: "7".to_string(),
                ..KeyRecord::new("pulled", "sk")
            }],
        };

        apply_snapshot(&mut registry, snapshot);
        assert_eq!(registry.active_id, "7");
        assert_eq!(registry.keys[0].name, "pulled");
        assert_eq!(registry.remote, Some(enabled()));
    }

    #[test]
    fn test_forget_profile_only_for_configured_one() {
        let mut settings = enabled();
        settings.last_sync = Some(Utc::now());

        forget_profile(&mut settings, "desktop");
        assert!(settings.enabled);

        forget_profile(&mut settings, "laptop");
        assert!(!settings.enabled);
        assert!(settings.object_key.is_empty());
        assert!(settings.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_push_requires_enabled_sync() {
        let manager = manager().await;
        let sync = RemoteSync::new(&manager);
        let err = sync
            .push(&RequestContext::background(), &ProfileArgs::default(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ckm remote init"));
    }

    #[tokio::test]
    async fn test_init_requires_credentials_before_network() {
        let manager = manager().await;
        let sync = RemoteSync::with_auth_url(&manager, "http://127.0.0.1:9/unused");

        let missing_key = InitArgs {
            key_id: Some("kid".to_string()),
            bucket: Some("bucket".to_string()),
            profile: DEFAULT_PROFILE.to_string(),
            ..Default::default()
        };
        let err = sync
            .init(&RequestContext::background(), &missing_key, &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--app-key"));

        let missing_bucket = InitArgs {
            key_id: Some("kid".to_string()),
            app_key: Some("secret".to_string()),
            profile: DEFAULT_PROFILE.to_string(),
            ..Default::default()
        };
        let err = sync
            .init(&RequestContext::background(), &missing_bucket, &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--bucket"));

        let remote = manager.config().await.unwrap().remote.unwrap();
        assert!(!remote.enabled);
    }

    #[tokio::test]
    async fn test_remove_local_snapshot_tolerates_missing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("laptop.json");
        remove_local_snapshot(&path).await;

        std::fs::write(&path, b"{}").unwrap();
        remove_local_snapshot(&path).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_push_pull_delete_round_trip() {
        let bucket = fake::spawn().await;
        let auth_url = bucket.auth_url();
        let ctx = RequestContext::background();

        let laptop_dir = TempDir::new().unwrap();
        let laptop_config = laptop_dir.path().join("config.json");
        let laptop = open_registry(&laptop_config).await.unwrap();
        laptop.add_key(KeyRecord::new("work", "sk-work")).await.unwrap();
        let personal = laptop.add_key(KeyRecord::new("personal", "sk-personal")).await.unwrap();
        laptop.set_active_key(&personal.id).await.unwrap();
        laptop.save().await.unwrap();

        let laptop_sync = RemoteSync::with_auth_url(&laptop, &auth_url);
        laptop_sync.init(&ctx, &init_args("Laptop"), &mut Vec::new()).await.unwrap();

        // Resolved bucket id is persisted with the rest of the settings
        let reopened = open_registry(&laptop_config).await.unwrap();
        let remote = reopened.config().await.unwrap().remote.unwrap();
        assert_eq!(remote.bucket_id, BUCKET_ID);
        assert_eq!(remote.object_key, "laptop");
        assert!(remote.enabled);

        laptop_sync.push(&ctx, &ProfileArgs::default(), &mut Vec::new()).await.unwrap();
        let uploaded = Snapshot::unmarshal(&bucket.object("laptop.json").unwrap()).unwrap();
        assert_eq!(uploaded.keys.len(), 2);
        assert_eq!(uploaded.active_id, personal.id);
        let laptop_copy = snapshot_path(&laptop_config, "laptop");
        assert!(laptop_copy.exists());
        assert!(laptop.config().await.unwrap().remote.unwrap().last_sync.is_some());

        let desktop_dir = TempDir::new().unwrap();
        let desktop_config = desktop_dir.path().join("config.json");
        let desktop = open_registry(&desktop_config).await.unwrap();
        desktop.add_key(KeyRecord::new("desktop-only", "sk-desk")).await.unwrap();
        let desktop_sync = RemoteSync::with_auth_url(&desktop, &auth_url);
        desktop_sync.init(&ctx, &init_args("desktop"), &mut Vec::new()).await.unwrap();

        let laptop_profile = ProfileArgs {
            profile: Some("laptop".to_string()),
        };
        let mut out = Vec::new();
        desktop_sync.pull(&ctx, &laptop_profile, &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Pulled 2 keys"));

        let pulled = open_registry(&desktop_config).await.unwrap().config().await.unwrap();
        let names: Vec<&str> = pulled.keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["work", "personal"]);
        assert_eq!(pulled.active_id, personal.id);
        assert!(pulled.find(&personal.id).unwrap().active);
        let remote = pulled.remote.unwrap();
        assert!(remote.enabled);
        assert_eq!(remote.bucket_name, BUCKET_NAME);
        assert_eq!(remote.bucket_id, BUCKET_ID);
        assert_eq!(remote.key_id, KEY_ID);
        assert_eq!(remote.object_key, "laptop");
        assert!(snapshot_path(&desktop_config, "laptop").exists());

        laptop_sync.delete(&ctx, &ProfileArgs::default(), &mut Vec::new()).await.unwrap();
        assert!(bucket.object("laptop.json").is_none());
        assert!(!laptop_copy.exists());
        let remote = open_registry(&laptop_config).await.unwrap().config().await.unwrap().remote.unwrap();
        assert!(!remote.enabled);
        assert!(remote.object_key.is_empty());

        let err = laptop_sync
            .push(&ctx, &ProfileArgs::default(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ckm remote init"));
    }
}
