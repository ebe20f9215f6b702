//! Server configuration
//!
//! Settings are read from an optional `quickdev.config.json` in the project
//! root. Every field has a default, so an empty object (or no file at all)
//! is a valid configuration. Command-line flags are applied on top.
//!
//! ```json
//! {
//!   "port": 3000,
//!   "hmrPort": 24678,
//!   "entries": ["src/main.tsx"],
//!   "optimizeDeps": true
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the project root
pub const CONFIG_FILE: &str = "quickdev.config.json";

/// URL of the hot-update client module injected into every page
pub const CLIENT_PUBLIC_PATH: &str = "/@quickdev/client";

/// Pre-bundled dependency output, relative to the project root
pub const PRE_BUNDLE_DIR: &str = "node_modules/.quickdev";

/// Sub-protocol spoken on the update channel
pub const HMR_PROTOCOL: &str = "quickdev-hmr";

/// Extensions probed when a relative import omits one
pub const DEFAULT_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs"];

/// File types that are served rather than bundled; the dependency scan
/// marks them external and never records them
pub const EXTERNAL_TYPES: &[&str] = &[
    "css", "less", "sass", "scss", "styl", "stylus", "pcss", "postcss", "vue", "svelte", "marko",
    "astro", "png", "jpe?g", "gif", "svg", "ico", "webp", "avif",
];

/// Static asset extensions rewritten to `?import` URLs by import analysis
pub const ASSET_EXTENSIONS: &[&str] = &["svg", "png", "jpg", "jpeg", "gif", "webp", "avif", "ico"];

/// Development server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Project root; relative paths are resolved against the working directory
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    /// Port of the update channel WebSocket server
    pub hmr_port: u16,
    /// Scan entry points, relative to root
    pub entries: Vec<String>,
    /// Run the dependency pre-bundle step at startup
    pub optimize_deps: bool,
    /// Executable used as the external bundler
    pub bundler_command: String,
    pub heartbeat_interval_ms: u64,
    pub asset_extensions: Vec<String>,
    pub external_types: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 3000,
            hmr_port: 24678,
            entries: vec!["src/main.tsx".to_string()],
            optimize_deps: true,
            bundler_command: "esbuild".to_string(),
            heartbeat_interval_ms: 30_000,
            asset_extensions: ASSET_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            external_types: EXTERNAL_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ServerConfig {
    /// Parse a config from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid {}: {}", CONFIG_FILE, e)))
    }

    /// Load `quickdev.config.json` from `root` if present, otherwise defaults.
    ///
    /// The returned config always has `root` set to the canonical project root.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            Self::from_json(&content)?
        } else {
            Self::default()
        };
        config.root = root.to_path_buf();
        config.normalize()?;
        Ok(config)
    }

    /// Canonicalize the root and validate ports
    pub fn normalize(&mut self) -> Result<()> {
        self.root = self
            .root
            .canonicalize()
            .map_err(|e| Error::Config(format!("root '{}': {}", self.root.display(), e)))?;
        if self.port != 0 && self.port == self.hmr_port {
            return Err(Error::Config(format!(
                "port and hmrPort must differ (both {})",
                self.port
            )));
        }
        Ok(())
    }

    /// Project root as a normalized string
    pub fn root_str(&self) -> String {
        crate::utils::normalize_path(&self.root.to_string_lossy())
    }

    /// Absolute pre-bundle output directory
    pub fn pre_bundle_dir(&self) -> PathBuf {
        self.root.join(PRE_BUNDLE_DIR)
    }
}
