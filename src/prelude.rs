//! Prelude module for convenient imports
//!
//! The types needed to embed the server or write a plugin:
//!
//! ```no_run
//! use quickdev::prelude::*;
//!
//! #[derive(Debug)]
//! struct Banner;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Banner {
//!     fn name(&self) -> &str {
//!         "banner"
//!     }
//! }
//! ```

// Server
pub use crate::config::ServerConfig;
pub use crate::server::{router, serve, transform_request, ServerContext};

// Error handling
pub use crate::error::{Error, Hook, Result, SourceLocation};

// Plugins
pub use crate::plugins::{
    builtin_plugins, Plugin, PluginContainer, PluginContext, ResolvedId, TransformResult,
};

// Module graph
pub use crate::graph::{ModuleGraph, ModuleIdx, ModuleNode, UrlResolver};

// Hot updates
pub use crate::hmr::{HmrClient, HmrPayload, HotContext, ModuleLoader, Update, UpdateKind};

// Dependency pre-bundling
pub use crate::optimizer::{optimize, Bundler, BundlerPlugin, DependencySet, EsbuildBundler};
