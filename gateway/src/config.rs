use dispatcher::{BackendSettings, CacheSettings};
use serde::Deserialize;
use std::fs::File;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener cannot share a port")]
    ListenerPortCollision,

    #[error("endpoints_file cannot be empty")]
    EmptyEndpointsFile,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StatsdConfig {
    pub host: String,
    pub port: u16,
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming API requests
    pub listener: Listener,
    /// Admin listener for health/readiness endpoints
    pub admin_listener: Listener,
    /// Path to the YAML endpoint definition file
    pub endpoints_file: PathBuf,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Optional statsd metrics sink
    #[serde(default)]
    pub statsd: Option<StatsdConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.listener.port == self.admin_listener.port {
            return Err(ValidationError::ListenerPortCollision);
        }
        if self.endpoints_file.as_os_str().is_empty() {
            return Err(ValidationError::EmptyEndpointsFile);
        }
        Ok(())
    }
}
