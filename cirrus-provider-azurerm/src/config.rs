//! Provider configuration
//!
//! Read from `ARM_*` environment variables or a JSON file such as:
//!
//! ```json
//! {
//!   "subscription_id": "00000000-0000-0000-0000-000000000000",
//!   "access_token": "eyJ0eXAi...",
//!   "timeouts": { "create": 600 },
//!   "poll_interval_secs": 5
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use cirrus_core::Timeouts;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com/";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Per-operation deadline overrides, in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub subscription_id: String,
    pub access_token: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub timeouts: TimeoutOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ProviderConfig {
    pub fn new(subscription_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            access_token: access_token.into(),
            endpoint: default_endpoint(),
            timeouts: TimeoutOverrides::default(),
            poll_interval_secs: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Build from a variable lookup (`ARM_SUBSCRIPTION_ID`, `ARM_ACCESS_TOKEN`,
    /// `ARM_ENDPOINT`, `ARM_POLL_INTERVAL`)
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let subscription_id =
            get("ARM_SUBSCRIPTION_ID").ok_or(ConfigError::Missing("ARM_SUBSCRIPTION_ID"))?;
        let access_token =
            get("ARM_ACCESS_TOKEN").ok_or(ConfigError::Missing("ARM_ACCESS_TOKEN"))?;

        let mut config = Self::new(subscription_id, access_token);
        if let Some(endpoint) = get("ARM_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(interval) = get("ARM_POLL_INTERVAL") {
            let secs = interval.parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "ARM_POLL_INTERVAL",
                message: e.to_string(),
            })?;
            config.poll_interval_secs = Some(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription_id.trim().is_empty() {
            return Err(ConfigError::Missing("subscription_id"));
        }
        if self.access_token.trim().is_empty() {
            return Err(ConfigError::Missing("access_token"));
        }
        if self.poll_interval_secs == Some(0) {
            return Err(ConfigError::Invalid {
                name: "poll_interval_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid {
                name: "max_retries",
                message: format!("must be at most {}", MAX_RETRIES_LIMIT),
            });
        }
        self.endpoint_url().map(|_| ())
    }

    /// Endpoint with a trailing slash, so identifiers join onto it
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let mut endpoint = self.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Url::parse(&endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            source,
        })
    }

    /// Apply the configured overrides on top of a kind's own deadlines
    pub fn apply_timeouts(&self, base: Timeouts) -> Timeouts {
        let pick = |over: Option<u64>, base: Duration| over.map(Duration::from_secs).unwrap_or(base);
        Timeouts {
            create: pick(self.timeouts.create, base.create),
            read: pick(self.timeouts.read, base.read),
            update: pick(self.timeouts.update, base.update),
            delete: pick(self.timeouts.delete, base.delete),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs.map(Duration::from_secs)
    }
}
