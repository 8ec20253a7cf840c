//! Runtime settings for the sync core, read from the environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, non_blank};

pub const DB_PATH_VAR: &str = "COFRADIA_DB_PATH";
pub const REMOTE_URL_VAR: &str = "COFRADIA_REMOTE_URL";
pub const REMOTE_API_KEY_VAR: &str = "COFRADIA_REMOTE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connection details for the hosted backend
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for RemoteSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteSettings")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Queue database location; callers pick a platform default when unset
    pub db_path: Option<PathBuf>,
    pub remote: Option<RemoteSettings>,
    pub good_rtt: Duration,
    pub sync_interval: Duration,
    pub remote_timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            remote: None,
            good_rtt: crate::network::DEFAULT_GOOD_RTT,
            sync_interval: crate::sync::DEFAULT_SYNC_INTERVAL,
            remote_timeout: crate::gateway::DEFAULT_REMOTE_TIMEOUT,
            probe_interval: Duration::from_secs(15),
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = optional_trimmed(&lookup, DB_PATH_VAR).map(PathBuf::from);

        let remote = match optional_trimmed(&lookup, REMOTE_URL_VAR) {
            Some(url) => {
                if !is_http_url(&url) {
                    return Err(ConfigError::Invalid(format!(
                        "{REMOTE_URL_VAR} must start with http:// or https://"
                    )));
                }
                Some(RemoteSettings {
                    url: url.trim_end_matches('/').to_string(),
                    api_key: optional_trimmed(&lookup, REMOTE_API_KEY_VAR),
                })
            }
            None => None,
        };

        let good_rtt_ms = bounded_integer(&lookup, "COFRADIA_GOOD_RTT_MS", 3_000, 50..=60_000)?;
        let sync_interval_secs =
            bounded_integer(&lookup, "COFRADIA_SYNC_INTERVAL_SECS", 30, 5..=3_600)?;
        let remote_timeout_secs =
            bounded_integer(&lookup, "COFRADIA_REMOTE_TIMEOUT_SECS", 10, 1..=120)?;
        let probe_interval_secs =
            bounded_integer(&lookup, "COFRADIA_PROBE_INTERVAL_SECS", 15, 1..=3_600)?;

        Ok(Self {
            db_path,
            remote,
            good_rtt: Duration::from_millis(good_rtt_ms),
            sync_interval: Duration::from_secs(sync_interval_secs),
            remote_timeout: Duration::from_secs(remote_timeout_secs),
            probe_interval: Duration::from_secs(probe_interval_secs),
        })
    }

    /// Remote settings, for operations that cannot run without a backend.
    pub fn require_remote(&self) -> Result<&RemoteSettings, ConfigError> {
        self.remote
            .as_ref()
            .ok_or(ConfigError::MissingVar(REMOTE_URL_VAR))
    }
}

fn bounded_integer(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    non_blank(lookup(name))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<SyncSettings, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncSettings::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.good_rtt, Duration::from_millis(3_000));
        assert_eq!(settings.sync_interval, Duration::from_secs(30));
        assert!(settings.remote.is_none());
    }

    #[test]
    fn remote_is_required_only_on_demand() {
        let settings = settings(&[]).unwrap();
        let err = settings.require_remote().unwrap_err();
        assert!(err.to_string().contains(REMOTE_URL_VAR));
    }

    #[test]
    fn remote_url_must_be_http() {
        let err = settings(&[(REMOTE_URL_VAR, "ftp://example.com")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn remote_url_is_trimmed() {
        let settings = settings(&[
            (REMOTE_URL_VAR, "  https://project.supabase.co/  "),
            (DB_PATH_VAR, "/tmp/cofradia/queue.db"),
        ])
        .unwrap();
        assert_eq!(
            settings.require_remote().unwrap().url,
            "https://project.supabase.co"
        );
        assert_eq!(
            settings.db_path,
            Some(PathBuf::from("/tmp/cofradia/queue.db"))
        );
    }

    #[test]
    fn out_of_range_intervals_are_rejected() {
        let err = settings(&[("COFRADIA_SYNC_INTERVAL_SECS", "1")]).unwrap_err();
        assert!(err.to_string().contains("COFRADIA_SYNC_INTERVAL_SECS"));

        let err = settings(&[("COFRADIA_GOOD_RTT_MS", "fast")]).unwrap_err();
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let settings = settings(&[
            (REMOTE_URL_VAR, "https://project.supabase.co"),
            (REMOTE_API_KEY_VAR, "sensitive-service-key"),
        ])
        .unwrap();

        let debug_output = format!("{settings:?}");
        assert!(!debug_output.contains("sensitive-service-key"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
