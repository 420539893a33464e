use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Redis,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StorageBackend::Redis),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("expected `redis` or `memory`, got {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl SmtpConfig {
    /// Both halves must be present for email to go out.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.user.as_deref()?, self.pass.as_deref()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub storage: StorageBackend,
    pub redis_url: String,
    pub static_dir: PathBuf,
    pub slack_webhook_url: Option<String>,
    pub smtp: SmtpConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::load(|key| env::var(key).ok())
    }

    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Config {
            port: try_load(&lookup, "PORT", "3000")?,
            storage: try_load(&lookup, "STORAGE", "redis")?,
            redis_url: try_load(&lookup, "REDIS_URL", "127.0.0.1:6379")?,
            static_dir: try_load(&lookup, "STATIC_DIR", "public")?,
            slack_webhook_url: optional(&lookup, "SLACK_WEBHOOK_URL"),
            smtp: SmtpConfig {
                host: try_load(&lookup, "SMTP_HOST", "smtp.gmail.com")?,
                port: try_load(&lookup, "SMTP_PORT", "587")?,
                user: optional(&lookup, "SMTP_USER"),
                pass: optional(&lookup, "SMTP_PASS"),
            },
        })
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T>
where
    T::Err: Display,
{
    optional(lookup, key)
        .unwrap_or_else(|| {
            info!("{} not set, using default: {}", key, default);
            default.to_string()
        })
        .parse()
        .map_err(|e| anyhow!("invalid {} value: {}", key, e))
}
