//! Runtime configuration, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use stockdesk_auth::PermissionGraph;
use stockdesk_core::DomainError;

pub const ENV_API_URL: &str = "STOCKDESK_API_URL";
pub const ENV_SESSION_DB: &str = "STOCKDESK_SESSION_DB";
pub const ENV_ON_UNREACHABLE: &str = "STOCKDESK_ON_UNREACHABLE";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "STOCKDESK_HTTP_TIMEOUT_SECS";
pub const ENV_PERMISSION_GRAPH: &str = "STOCKDESK_PERMISSION_GRAPH";

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// What bootstrap does when the gateway cannot be reached while revalidating
/// a cached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnreachablePolicy {
    /// Tear the session down, as for an explicit rejection.
    #[default]
    Teardown,
    /// Keep the cached session; the next authenticated call decides.
    KeepCached,
}

impl FromStr for UnreachablePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teardown" => Ok(UnreachablePolicy::Teardown),
            "keep-cached" => Ok(UnreachablePolicy::KeepCached),
            other => Err(format!("expected 'teardown' or 'keep-cached', got '{other}'")),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("failed to read permission graph at {path:?}: {source}")]
    GraphIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid permission graph at {path:?}: {source}")]
    Graph {
        path: PathBuf,
        #[source]
        source: DomainError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub api_url: String,
    /// `None` selects the default data-directory location.
    pub store_path: Option<PathBuf>,
    pub unreachable_policy: UnreachablePolicy,
    pub http_timeout: Duration,
    /// `None` selects the built-in inventory table.
    pub permission_graph_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            store_path: None,
            unreachable_policy: UnreachablePolicy::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            permission_graph_path: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get(ENV_API_URL) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    key: ENV_API_URL,
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
            config.api_url = url;
        }

        config.store_path = get(ENV_SESSION_DB).map(PathBuf::from);
        config.permission_graph_path = get(ENV_PERMISSION_GRAPH).map(PathBuf::from);

        if let Some(policy) = get(ENV_ON_UNREACHABLE) {
            config.unreachable_policy = policy
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    key: ENV_ON_UNREACHABLE,
                    reason,
                })?;
        }

        if let Some(secs) = get(ENV_HTTP_TIMEOUT_SECS) {
            let secs: u64 = secs.parse().map_err(|e| ConfigError::InvalidValue {
                key: ENV_HTTP_TIMEOUT_SECS,
                reason: format!("{e}"),
            })?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_HTTP_TIMEOUT_SECS,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.http_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Load the permission table once, at startup.
    pub fn load_permission_graph(&self) -> Result<PermissionGraph, ConfigError> {
        let Some(path) = &self.permission_graph_path else {
            return Ok(PermissionGraph::inventory_defaults());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::GraphIo {
            path: path.clone(),
            source,
        })?;

        PermissionGraph::from_json_str(&raw).map_err(|source| ConfigError::Graph {
            path: path.clone(),
            source,
        })
    }
}
