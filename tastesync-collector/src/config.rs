//! Configuration resolution for tastesync-collector
//!
//! Values come from the TOML bootstrap file with compiled-in defaults for
//! every field. A few operational knobs can be overridden from the
//! environment; the environment wins when both are set.

use std::str::FromStr;
use std::time::Duration;
use tastesync_common::config::TomlConfig;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::fetcher::RetryPolicy;
use crate::store::ArchiveRetention;
use crate::sync::CollectorSettings;

pub const RATE_LIMIT_ENV: &str = "TASTESYNC_RATE_LIMIT";
pub const FRESHNESS_HOURS_ENV: &str = "TASTESYNC_FRESHNESS_HOURS";

/// Fully resolved collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub toml: TomlConfig,
    pub rate_limit_per_second: u32,
    pub freshness_hours: u64,
}

impl CollectorConfig {
    /// Apply environment overrides to a loaded TOML config
    pub fn resolve(toml: TomlConfig) -> Result<Self, SyncError> {
        Self::resolve_with_env(toml, |name| std::env::var(name).ok())
    }

    /// Same as [`resolve`](Self::resolve) with an explicit environment lookup
    pub fn resolve_with_env<F>(toml: TomlConfig, env: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rate_limit_per_second = resolve_override(
            "rate limit",
            RATE_LIMIT_ENV,
            env(RATE_LIMIT_ENV),
            toml.upstream.rate_limit_per_second,
        )?;
        if rate_limit_per_second == 0 {
            return Err(SyncError::Config(
                "Rate limit must be at least 1 request/second".to_string(),
            ));
        }

        let freshness_hours = resolve_override(
            "freshness window",
            FRESHNESS_HOURS_ENV,
            env(FRESHNESS_HOURS_ENV),
            toml.sync.freshness_hours,
        )?;

        if !(0.0..=1.0).contains(&toml.enrichment.fuzzy_threshold) {
            return Err(SyncError::Config(format!(
                "Fuzzy threshold must be within 0.0-1.0, got {}",
                toml.enrichment.fuzzy_threshold
            )));
        }

        Ok(Self {
            toml,
            rate_limit_per_second,
            freshness_hours,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.toml.retry)
    }

    pub fn retention(&self) -> ArchiveRetention {
        ArchiveRetention::new(self.toml.storage.archive_keep_last)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.upstream.request_timeout_secs)
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            freshness: Duration::from_secs(self.freshness_hours * 3600),
            timeout: Duration::from_secs(self.toml.sync.timeout_secs),
            recent_limit: self.toml.upstream.recent_limit,
            top_limit: self.toml.upstream.top_limit,
            ..CollectorSettings::default()
        }
    }

    /// Client id and secret when both are configured
    pub fn client_credentials(&self) -> Option<(String, String)> {
        let upstream = &self.toml.upstream;
        match (&upstream.client_id, &upstream.client_secret) {
            (Some(id), Some(secret)) if is_set(id) && is_set(secret) => Some((id.clone(), secret.clone())),
            _ => None,
        }
    }
}

fn is_set(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Environment value when set and non-blank, otherwise the TOML value
fn resolve_override<T>(label: &str, env_name: &str, env_value: Option<String>, toml_value: T) -> Result<T, SyncError>
where
    T: FromStr + std::fmt::Display + PartialEq + Copy,
{
    let Some(raw) = env_value.filter(|v| is_set(v)) else {
        return Ok(toml_value);
    };

    let parsed: T = raw
        .trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("{} is not a valid {}: {:?}", env_name, label, raw)))?;

    if parsed != toml_value {
        warn!(
            "{} set in multiple sources (environment {}, TOML {}). Using environment.",
            label, parsed, toml_value
        );
    }
    info!("{} loaded from environment variable {}", label, env_name);
    Ok(parsed)
}
