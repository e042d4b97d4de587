//! Node configuration.
//!
//! Settings are layered, later sources winning:
//!
//! 1. built-in defaults
//! 2. an optional config file (any format the `config` crate recognises)
//! 3. `NECHO_*` environment variables, e.g. `NECHO_API_ADDR=0.0.0.0:8080`
//! 4. command-line flags (applied by the binary)

use necho_realtime::DEFAULT_MAX_CONNECTIONS;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use validator::Validate;

/// Prefix of environment variables that override the config file.
pub const ENV_PREFIX: &str = "NECHO";

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The merged values are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Configuration for the Necho node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP and WebSocket listen address.
    pub api_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    #[validate(length(min = 1))]
    pub log_level: String,
    /// Log format: `pretty` or `json`.
    pub log_format: String,
    /// Maximum concurrent WebSocket connections.
    #[validate(range(min = 1))]
    pub max_connections: usize,
    /// Usernames created at startup, each with a freshly issued token.
    pub demo_users: Vec<String>,
    /// Put all demo users in one shared chat.
    pub demo_chat: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            demo_users: Vec::new(),
            demo_chat: true,
        }
    }
}

impl NodeConfig {
    /// Merge defaults, the optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&NodeConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: NodeConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("demo_users"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Whether logs should be JSON.
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
