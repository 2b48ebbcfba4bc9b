//! Plugin configuration.
//!
//! All knobs the discovery and reconciliation paths consume are carried in
//! one [`PluginConfig`] value constructed at startup and passed explicitly;
//! nothing here is process-global.

use std::path::PathBuf;

/// Environment variable that opts the plugin into startup discovery.
pub const DISCOVER_VOLUMES_ENV: &str = "KEG_DISCOVER_VOLUMES";

/// Default root directory under which plugin volumes are mounted.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/keg";

/// Default local admin socket of the container engine.
pub const DEFAULT_ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Engine API version the client pins to.
pub const ENGINE_API_VERSION: &str = "v1.22";

/// Mount table consulted during discovery.
pub const DEFAULT_MOUNTS_FILE: &str = "/proc/mounts";

/// Configuration for the refcount and discovery subsystem.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Directory under which this plugin's volumes are mounted. Only mount
    /// table entries whose parent directory equals this path are considered.
    pub mount_root: PathBuf,
    /// Driver name the engine reports for mounts belonging to this plugin.
    pub driver_name: String,
    /// Unix socket path of the container engine's admin API.
    pub engine_socket: PathBuf,
    /// Path of the OS mount table to scan.
    pub mounts_file: PathBuf,
    /// Whether startup discovery is enabled at all.
    pub discover: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            driver_name: "keg".to_string(),
            engine_socket: PathBuf::from(DEFAULT_ENGINE_SOCKET),
            mounts_file: PathBuf::from(DEFAULT_MOUNTS_FILE),
            discover: false,
        }
    }
}

impl PluginConfig {
    /// Create a config for the given mount root and driver name, reading
    /// the discovery opt-in flag from the environment.
    #[must_use]
    pub fn from_env(mount_root: impl Into<PathBuf>, driver_name: impl Into<String>) -> Self {
        Self {
            mount_root: mount_root.into(),
            driver_name: driver_name.into(),
            discover: std::env::var(DISCOVER_VOLUMES_ENV).is_ok_and(|v| !v.is_empty()),
            ..Self::default()
        }
    }

    /// Set the mount root.
    #[must_use]
    pub fn with_mount_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.mount_root = root.into();
        self
    }

    /// Set the engine admin socket path.
    #[must_use]
    pub fn with_engine_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.engine_socket = socket.into();
        self
    }

    /// Set the mount table path.
    #[must_use]
    pub fn with_mounts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    /// Enable or disable startup discovery.
    #[must_use]
    pub const fn with_discovery(mut self, discover: bool) -> Self {
        self.discover = discover;
        self
    }
}
