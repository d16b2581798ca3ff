//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`UMLSYNC__PORT`, `UMLSYNC__TRANSPORT__SYNC_PATH`, ...)
//! - `UMLSYNC_HOST` / `UMLSYNC_PORT` as defaults for the bind address

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use umlsync_core::Namespace;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Endpoint configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Cross-origin policy.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the default namespace.
    #[serde(default = "default_ws_path")]
    pub default_path: String,

    /// Path of the dedicated sync namespace.
    #[serde(default = "default_sync_path")]
    pub sync_path: String,

    /// Bind the sync namespace.
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
}

/// Cross-origin policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. `"*"` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("UMLSYNC_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("UMLSYNC_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5001)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_sync_path() -> String {
    "/plantuml-sync".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_message_size() -> usize {
    64 << 20 // 64 MiB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            cors: CorsConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_path: default_ws_path(),
            sync_path: default_sync_path(),
            sync_enabled: true,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result is invalid.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "umlsync.toml",
            "/etc/umlsync/umlsync.toml",
            "~/.config/umlsync/umlsync.toml",
        ];

        let file = config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::load_layered(file.as_deref())
    }

    /// Load configuration from an optional file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an override cannot be parsed, or the
    /// result is invalid.
    pub fn load_layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("UMLSYNC")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins"),
            )
            .build()
            .context("Failed to assemble configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;

        Ok(config)
    }

    /// Check that the endpoints can be bound side by side.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is not absolute or both namespaces share a
    /// path.
    pub fn validate(&self) -> Result<()> {
        for (namespace, path) in self.endpoints() {
            if !path.starts_with('/') {
                bail!("Path for the {namespace} namespace must start with '/': {path}");
            }
        }
        if self.transport.sync_enabled && self.transport.default_path == self.transport.sync_path {
            bail!(
                "Default and sync namespaces cannot share the path {}",
                self.transport.default_path
            );
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Get the bound namespaces with their paths.
    #[must_use]
    pub fn endpoints(&self) -> Vec<(Namespace, &str)> {
        Namespace::ALL
            .into_iter()
            .filter(|namespace| *namespace != Namespace::Sync || self.transport.sync_enabled)
            .map(|namespace| (namespace, self.path(namespace)))
            .collect()
    }

    /// Get the configured path of a namespace.
    #[must_use]
    pub fn path(&self, namespace: Namespace) -> &str {
        match namespace {
            Namespace::Default => &self.transport.default_path,
            Namespace::Sync => &self.transport.sync_path,
        }
    }

    /// Whether any origin is allowed.
    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.cors.allowed_origins.iter().any(|origin| origin == "*")
    }
}
