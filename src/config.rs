//! Configuration for the route schema registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (route-schemas.toml)
//! - Environment variables (ROUTE_SCHEMAS__*)
//!
//! ## Example config file (route-schemas.toml):
//! ```toml
//! [paths]
//! server_protos = "config/serverProtos.json"
//! client_protos = "config/clientProtos.json"
//! server_route_dic = "config/serverRouteRelationship.json"
//! client_route_dic = "config/clientRouteRelationship.json"
//! server_message_path = "config/protoFile/serverProto.proto"
//! client_message_path = "config/protoFile/clientProto.proto"
//!
//! [registry]
//! public_key = ""
//!
//! [watch]
//! enabled = true
//! debounce_ms = 100
//! ```
//!
//! Every path is relative to the host's base directory unless absolute.

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::Artifact;

/// Main configuration for the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Artifact locations
    #[serde(default)]
    pub paths: ArtifactPaths,

    /// Registry settings
    #[serde(default)]
    pub registry: RegistrySettings,

    /// File watching
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Locations of the six artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// JSON mirror of the server schema, exported in snapshots
    #[serde(default = "default_server_protos")]
    pub server_protos: PathBuf,

    /// JSON mirror of the client schema, exported in snapshots
    #[serde(default = "default_client_protos")]
    pub client_protos: PathBuf,

    /// Route aliases used when encoding
    #[serde(default = "default_server_route_dic")]
    pub server_route_dic: PathBuf,

    /// Route aliases used when decoding
    #[serde(default = "default_client_route_dic")]
    pub client_route_dic: PathBuf,

    /// `.proto` file or directory for server messages
    #[serde(default = "default_server_message_path")]
    pub server_message_path: PathBuf,

    /// `.proto` file or directory for client messages
    #[serde(default = "default_client_message_path")]
    pub client_message_path: PathBuf,
}

/// Registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Key shipped to peers alongside the schema snapshot
    #[serde(default)]
    pub public_key: String,
}

/// File watching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Reload artifacts when their files change
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quiet period before a burst of change events is applied
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

// Default value functions
fn default_server_protos() -> PathBuf {
    PathBuf::from("config/serverProtos.json")
}

fn default_client_protos() -> PathBuf {
    PathBuf::from("config/clientProtos.json")
}

fn default_server_route_dic() -> PathBuf {
    PathBuf::from("config/serverRouteRelationship.json")
}

fn default_client_route_dic() -> PathBuf {
    PathBuf::from("config/clientRouteRelationship.json")
}

fn default_server_message_path() -> PathBuf {
    PathBuf::from("config/protoFile/serverProto.proto")
}

fn default_client_message_path() -> PathBuf {
    PathBuf::from("config/protoFile/clientProto.proto")
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            server_protos: default_server_protos(),
            client_protos: default_client_protos(),
            server_route_dic: default_server_route_dic(),
            client_route_dic: default_client_route_dic(),
            server_message_path: default_server_message_path(),
            client_message_path: default_client_message_path(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl ArtifactPaths {
    /// Configured path for an artifact
    pub fn get(&self, artifact: Artifact) -> &Path {
        match artifact {
            Artifact::ServerSource => &self.server_protos,
            Artifact::ClientSource => &self.client_protos,
            Artifact::ServerRoutes => &self.server_route_dic,
            Artifact::ClientRoutes => &self.client_route_dic,
            Artifact::ServerSchema => &self.server_message_path,
            Artifact::ClientSchema => &self.client_message_path,
        }
    }

    /// Resolve an artifact path against the base directory.
    ///
    /// A leading `/` is treated as relative to `base`, the way the default
    /// paths were historically written.
    pub fn resolve(&self, base: &Path, artifact: Artifact) -> PathBuf {
        let path = self.get(artifact);
        if path.is_absolute() && path.starts_with(base) {
            return path.to_path_buf();
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        base.join(relative)
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl RegistryConfig {
    /// Load configuration from the default locations, then `config_path`
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "route-schemas.toml",
            ".route-schemas.toml",
            "config/route-schemas.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "route-schemas") {
            let xdg_config = config_dir.config_dir().join("route-schemas.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (ROUTE_SCHEMAS__*)
        builder = builder.add_source(
            Environment::with_prefix("ROUTE_SCHEMAS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Builder-style override of the public key
    pub fn with_public_key(mut self, key: impl Into<String>) -> Self {
        self.registry.public_key = key.into();
        self
    }
}
