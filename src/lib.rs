//! Quickdev: a no-bundle development server for ES module projects
//!
//! Source files are served to the browser one module at a time, compiled
//! just in time, and replaced live when they change. Third-party packages
//! are pre-bundled once at startup by an external bundler.
//!
//! # Quick Start
//!
//! ```no_run
//! use quickdev::{plugins, server, ServerConfig, ServerContext};
//!
//! #[tokio::main]
//! async fn main() -> quickdev::Result<()> {
//!     let config = ServerConfig::load(std::path::Path::new("."))?;
//!     let ctx = ServerContext::new(config, plugins::builtin_plugins())?;
//!     server::serve(ctx).await
//! }
//! ```
//!
//! # Module Overview
//!
//! A request flows: [`server`] → [`graph`] cache → [`plugins`] resolve / load / transform → response.
//! A file change flows: [`hmr::watcher`] → [`graph`] invalidation → [`hmr`] broadcast → [`hmr::client`].
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`plugins`], [`graph`], [`server`], [`hmr`] |
//! | **Analysis** | [`lexer`], [`source_map`] |
//! | **Dependencies** | [`optimizer`], [`npm`] |
//! | **Support** | [`config`], [`utils`], [`error`](Error) |

pub mod config;
pub mod error;
pub mod graph;
pub mod hmr;
pub mod lexer;
pub mod npm;
pub mod optimizer;
pub mod plugins;
pub mod prelude;
pub mod server;
pub mod source_map;
pub mod utils;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::ServerContext;

/// Version of quickdev
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
