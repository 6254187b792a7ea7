use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::{supabase::DEFAULT_BUCKET, DeletionConfig, SupabaseConfig};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "console.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: String,
    pub supabase_access_token: Option<String>,
    pub supabase_bucket: String,
    pub database_url: String,
    pub grace_period_secs: u32,
    pub http_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: String::new(),
            supabase_access_token: None,
            supabase_bucket: DEFAULT_BUCKET.into(),
            database_url: "sqlite://./data/console.db".into(),
            grace_period_secs: client_core::deletion::DEFAULT_GRACE_PERIOD_SECS,
            http_timeout_secs: client_core::supabase::DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

/// Environment variables and the setting each one overrides. Later entries
/// win, so the `APP__` aliases take precedence.
const ENV_KEYS: &[(&str, &str)] = &[
    ("SUPABASE_URL", "supabase_url"),
    ("APP__SUPABASE_URL", "supabase_url"),
    ("SUPABASE_ANON_KEY", "supabase_anon_key"),
    ("APP__SUPABASE_ANON_KEY", "supabase_anon_key"),
    ("SUPABASE_ACCESS_TOKEN", "supabase_access_token"),
    ("APP__SUPABASE_ACCESS_TOKEN", "supabase_access_token"),
    ("SUPABASE_BUCKET", "supabase_bucket"),
    ("APP__SUPABASE_BUCKET", "supabase_bucket"),
    ("DATABASE_URL", "database_url"),
    ("APP__DATABASE_URL", "database_url"),
    ("APP__GRACE_PERIOD_SECS", "grace_period_secs"),
    ("APP__HTTP_TIMEOUT_SECS", "http_timeout_secs"),
];

impl Settings {
    fn set(&mut self, key: &str, value: String) {
        let optional = |value: String| {
            let value = value.trim().to_string();
            (!value.is_empty()).then_some(value)
        };
        match key {
            "supabase_url" => self.supabase_url = optional(value),
            "supabase_anon_key" => self.supabase_anon_key = value,
            "supabase_access_token" => self.supabase_access_token = optional(value),
            "supabase_bucket" => self.supabase_bucket = value,
            "database_url" => self.database_url = value,
            "grace_period_secs" => match value.trim().parse::<u32>() {
                Ok(parsed) => self.grace_period_secs = parsed,
                Err(_) => warn!(%value, "config: ignoring invalid grace_period_secs"),
            },
            "http_timeout_secs" => match value.trim().parse::<u64>() {
                Ok(parsed) => self.http_timeout_secs = parsed,
                Err(_) => warn!(%value, "config: ignoring invalid http_timeout_secs"),
            },
            other => warn!(key = other, "config: ignoring unknown setting"),
        }
    }

    fn apply_file(&mut self, raw: &str) {
        let file_cfg = match toml::from_str::<HashMap<String, toml::Value>>(raw) {
            Ok(file_cfg) => file_cfg,
            Err(error) => {
                warn!(%error, "config: ignoring malformed config file");
                return;
            }
        };
        for (key, value) in file_cfg {
            let value = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            self.set(&key, value);
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (var, key) in ENV_KEYS {
            if let Some(value) = lookup(var) {
                self.set(key, value);
            }
        }
    }

    /// Hosted backend settings, when a project URL is configured.
    pub fn supabase_config(&self) -> Option<SupabaseConfig> {
        let url = self.supabase_url.as_ref()?;
        let mut config = SupabaseConfig::new(url.clone(), self.supabase_anon_key.clone());
        config.access_token = self.supabase_access_token.clone();
        config.bucket = self.supabase_bucket.clone();
        config.timeout = Duration::from_secs(self.http_timeout_secs.max(1));
        Some(config)
    }

    pub fn deletion_config(&self) -> DeletionConfig {
        DeletionConfig {
            grace_period_secs: self.grace_period_secs,
            ..DeletionConfig::default()
        }
    }
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        settings.apply_file(&raw);
    }
    settings.apply_env(|var| std::env::var(var).ok());

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url
        .strip_prefix("sqlite:")
        .unwrap_or(raw_database_url);
    format!("sqlite://{}", path.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(parent) = sqlite_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    (!path.is_empty()).then(|| PathBuf::from(path))
}
