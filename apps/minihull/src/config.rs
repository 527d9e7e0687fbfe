//! # Configuration
//!
//! Settings for one mock platform instance, layered from lowest to highest
//! precedence: defaults, an optional TOML file, `MINIHULL_*` environment
//! variables, then CLI flags (applied by the caller).
//!
//! ## Environment Variables
//!
//! - `MINIHULL_HOST`: host to bind and advertise (default: localhost)
//! - `MINIHULL_PORT`: port to bind (default: 8001)
//! - `MINIHULL_SECRET`: shared secret echoed to connectors (default: 1234)
//! - `MINIHULL_PUBLIC_ADDR`: organization address override
//! - `MINIHULL_SNAPSHOT_DIR`: directory for snapshots (default: .)

use minihull_core::MinihullError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_SECRET: &str = "1234";

/// Maximum accepted config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Instance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub secret: String,
    /// Organization address announced to connectors instead of `host:port`.
    pub public_addr: Option<String>,
    pub snapshot_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            secret: DEFAULT_SECRET.to_string(),
            public_addr: None,
            snapshot_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, MinihullError> {
        toml::from_str(text)
            .map_err(|e| MinihullError::DeserializationError(format!("Invalid config: {}", e)))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, MinihullError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            MinihullError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(MinihullError::DeserializationError(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            MinihullError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Apply `MINIHULL_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MINIHULL_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("MINIHULL_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid MINIHULL_PORT '{}'", port),
            }
        }
        if let Some(secret) = lookup("MINIHULL_SECRET") {
            self.secret = secret;
        }
        if let Some(addr) = lookup("MINIHULL_PUBLIC_ADDR") {
            self.public_addr = Some(addr).filter(|a| !a.is_empty());
        }
        if let Some(dir) = lookup("MINIHULL_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
    }

    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, MinihullError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }
}

// =============================================================================
// PUBLIC ADDRESS
// =============================================================================

/// The organization address connectors are told to call back.
///
/// Derived from the host and the port actually bound unless an override is
/// configured.
#[derive(Debug)]
pub struct PublicAddress {
    host: String,
    port: AtomicU16,
    override_addr: Option<String>,
}

impl PublicAddress {
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: AtomicU16::new(config.port),
            override_addr: config.public_addr.clone(),
        }
    }

    /// Record the port the listener is bound to.
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    /// `override` if set, else `host:port`.
    pub fn get(&self) -> String {
        match &self.override_addr {
            Some(addr) => addr.clone(),
            None => format!("{}:{}", self.host, self.port()),
        }
    }
}
