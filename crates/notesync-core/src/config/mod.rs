//! Client configuration.
//!
//! `SyncConfig` is read from an optional JSON file and then overridden by
//! environment variables. Every field has a default, so an empty file (or no
//! file) yields a working local-only configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::background::SYNC_TAG;
use crate::error::{Error, Result};
use crate::remote::RestServiceConfig;
use crate::sync::{EngineOptions, RetryPolicy, MAX_RETRY_COUNT, REQUEST_TIMEOUT_MS, RETRY_DELAY_MS};
use crate::util::{compact_text, is_http_url, normalize_text_option};

pub const ENV_API_URL: &str = "NOTESYNC_API_URL";
pub const ENV_API_KEY: &str = "NOTESYNC_API_KEY";
pub const ENV_USER_ID: &str = "NOTESYNC_USER_ID";

const PROBE_INTERVAL_MS: u64 = 15_000;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncConfig {
    /// REST root of the remote notes service
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    /// Owner of every note this client reads and writes
    pub user_id: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retry_count: u32,
    pub retry_delay_ms: u64,
    pub sync_tag: String,
    pub pull_on_sync: bool,
    /// Schedule a sync after each local mutation made while online
    pub sync_on_mutation: bool,
    pub probe_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_key: None,
            user_id: None,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            max_retry_count: MAX_RETRY_COUNT,
            retry_delay_ms: RETRY_DELAY_MS,
            sync_tag: SYNC_TAG.to_string(),
            pull_on_sync: true,
            sync_on_mutation: true,
            probe_interval_ms: PROBE_INTERVAL_MS,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("user_id", &self.user_id)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_retry_count", &self.max_retry_count)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("sync_tag", &self.sync_tag)
            .field("pull_on_sync", &self.pull_on_sync)
            .field("sync_on_mutation", &self.sync_on_mutation)
            .field("probe_interval_ms", &self.probe_interval_ms)
            .finish()
    }
}

impl SyncConfig {
    /// Parse a JSON config document
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str::<Self>(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))
            .map(Self::normalized)
    }

    /// Load from `path` (a missing file yields defaults), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                let payload = std::fs::read_to_string(path)?;
                tracing::debug!("Loaded config from {}", path.display());
                Self::from_json(&payload)?
            }
            _ => Self::default(),
        };

        let config = config.with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(key) = normalize_text_option(lookup(ENV_API_KEY)) {
            self.api_key = Some(key);
        }
        if let Some(user_id) = normalize_text_option(lookup(ENV_USER_ID)) {
            self.user_id = Some(user_id);
        }
        self.normalized()
    }

    #[must_use]
    fn normalized(mut self) -> Self {
        self.api_base_url = normalize_text_option(self.api_base_url)
            .map(|url| url.trim_end_matches('/').to_string());
        self.api_key = normalize_text_option(self.api_key);
        self.user_id = normalize_text_option(self.user_id);
        self.sync_tag = self.sync_tag.trim().to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(Error::Config(format!(
                    "api_base_url must include http:// or https:// (got '{}')",
                    compact_text(url)
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_retry_count == 0 {
            return Err(Error::Config(
                "max_retry_count must be greater than zero".to_string(),
            ));
        }
        if self.probe_interval_ms == 0 {
            return Err(Error::Config(
                "probe_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.sync_tag.is_empty() {
            return Err(Error::Config("sync_tag must not be empty".to_string()));
        }
        Ok(())
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub const fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            retry: RetryPolicy::new(
                self.max_retry_count,
                Duration::from_millis(self.retry_delay_ms),
            ),
            request_timeout: self.request_timeout(),
            pull: self.pull_on_sync,
        }
    }

    /// REST settings, when URL, key, and user are all configured
    pub fn rest_config(&self) -> Option<RestServiceConfig> {
        Some(RestServiceConfig {
            base_url: self.api_base_url.clone()?,
            api_key: self.api_key.clone()?,
            user_id: self.user_id.clone()?,
            request_timeout: self.request_timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_document_yields_defaults() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.sync_tag, "notes-sync");
        assert_eq!(config.engine_options(), EngineOptions::default());
        assert!(config.rest_config().is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let error = SyncConfig::from_json(r#"{"api_base_url":"https://x","colour":"red"}"#)
            .unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = SyncConfig::from_json(
            r#"{"api_base_url":"https://file.example.com/rest/v1/","user_id":"file-user"}"#,
        )
        .unwrap();
        let env = HashMap::from([
            (ENV_USER_ID, "env-user".to_string()),
            (ENV_API_KEY, "  key  ".to_string()),
            (ENV_API_URL, "   ".to_string()),
        ]);

        let config = config.with_overrides(|key| env.get(key).cloned());
        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://file.example.com/rest/v1")
        );
        assert_eq!(config.user_id.as_deref(), Some("env-user"));
        assert_eq!(config.api_key.as_deref(), Some("key"));

        let rest = config.rest_config().unwrap();
        assert_eq!(rest.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let config = SyncConfig {
            api_base_url: Some("file:///tmp".to_string()),
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = SyncConfig {
            max_retry_count: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = SyncConfig::from_json("{}").unwrap();
        let loaded = SyncConfig::load(Some(&tmp.path().join("absent.json"))).unwrap();
        assert_eq!(loaded.request_timeout_ms, config.request_timeout_ms);
        assert_eq!(loaded.max_retry_count, config.max_retry_count);
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"retry_delay_ms": 250, "pull_on_sync": false}"#).unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.retry_delay_ms, 250);
        assert!(!config.engine_options().pull);
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = SyncConfig {
            api_key: Some("secret-key".to_string()),
            ..SyncConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }
}
