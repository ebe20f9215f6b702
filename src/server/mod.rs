//! Development server
//!
//! [`ServerContext`] owns all long-lived state: config, plugin container,
//! module graph, dependency set, resolver, bundler and the update
//! broadcaster. It is built once and shared by the HTTP handlers, the
//! update channel, the file watcher and every plugin hook.
//!
//! Request routing, in order:
//!
//! 1. script, style and `?import` requests: transform pipeline
//! 2. `/` and `*.html`: entry page through the markup hooks
//! 3. anything else: static files from the project root

pub mod html;
pub mod transform;

pub use html::transform_html;
pub use transform::transform_request;

use crate::config::{ServerConfig, DEFAULT_EXTENSIONS};
use crate::error::Result;
use crate::graph::{ModuleGraph, UrlResolver};
use crate::hmr::{self, FileChangeKind, FileWatcher, HmrBroadcaster};
use crate::npm::ModuleResolver;
use crate::optimizer::{self, Bundler, DependencySet, EsbuildBundler};
use crate::plugins::{Plugin, PluginContainer};
use crate::utils::{clean_url, is_css_request, is_import_request, is_js_request};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::TcpListener;
use tokio::signal;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

/// Shared state of a running dev server
pub struct ServerContext {
    pub config: ServerConfig,
    /// Normalized project root
    pub root: String,
    pub container: PluginContainer,
    pub graph: ModuleGraph,
    pub deps: DependencySet,
    pub resolver: Arc<ModuleResolver>,
    pub bundler: Arc<dyn Bundler>,
    pub hmr: HmrBroadcaster,
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("root", &self.root)
            .field("plugins", &self.container.plugin_names())
            .field("graph", &self.graph)
            .field("deps", &self.deps.len())
            .finish()
    }
}

/// Resolves graph URLs through the server's own plugin chain
struct ContainerResolver {
    server: Weak<ServerContext>,
}

#[async_trait]
impl UrlResolver for ContainerResolver {
    async fn resolve_url(&self, url: &str) -> Result<Option<String>> {
        let Some(server) = self.server.upgrade() else {
            return Ok(None);
        };
        let resolved = server.container.resolve_id(&server, clean_url(url), None).await?;
        Ok(resolved.map(|r| r.id))
    }
}

impl ServerContext {
    /// Build a context that bundles with the configured `esbuild` command
    pub fn new(config: ServerConfig, plugins: Vec<Arc<dyn Plugin>>) -> Result<Arc<Self>> {
        let bundler = Arc::new(EsbuildBundler::new(config.bundler_command.clone()));
        Self::with_bundler(config, plugins, bundler)
    }

    pub fn with_bundler(
        config: ServerConfig,
        plugins: Vec<Arc<dyn Plugin>>,
        bundler: Arc<dyn Bundler>,
    ) -> Result<Arc<Self>> {
        let container = PluginContainer::with_plugins(plugins)?;
        let root = config.root_str();
        let resolver = Arc::new(ModuleResolver::new(&config.root, DEFAULT_EXTENSIONS));

        Ok(Arc::new_cyclic(|weak: &Weak<ServerContext>| ServerContext {
            graph: ModuleGraph::new(Arc::new(ContainerResolver {
                server: weak.clone(),
            })),
            config,
            root,
            container,
            deps: DependencySet::default(),
            resolver,
            bundler,
            hmr: HmrBroadcaster::new(),
        }))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    pub fn hmr_addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.hmr_port)
    }
}

/// Router for the dev server's HTTP surface
pub fn router(server: Arc<ServerContext>) -> Router {
    Router::new()
        .fallback(dev_request)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()).into_inner())
        .with_state(server)
}

async fn dev_request(State(server): State<Arc<ServerContext>>, req: Request) -> Response {
    if req.method() != Method::GET {
        return serve_static(&server, req).await;
    }
    let path = req.uri().path().to_string();
    let url = match req.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.clone(),
    };

    if is_js_request(&url) || is_css_request(&url) || is_import_request(&url) {
        match transform_request(&server, &url).await {
            Ok(Some(result)) => {
                return (
                    [(header::CONTENT_TYPE, "application/javascript")],
                    result.code,
                )
                    .into_response();
            }
            Ok(None) => {}
            Err(e) => {
                warn!(url = %url, error = %e, "transform failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        }
        if is_import_request(&url) {
            return StatusCode::NOT_FOUND.into_response();
        }
    }

    if path == "/" || path.ends_with(".html") {
        match transform_html(&server, &path).await {
            Ok(Some(html)) => return Html(html).into_response(),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path, error = %e, "entry page failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        }
    }

    serve_static(&server, req).await
}

async fn serve_static(server: &ServerContext, req: Request) -> Response {
    match ServeDir::new(&server.config.root).oneshot(req).await {
        Ok(res) => res.map(Body::new).into_response(),
        Err(never) => match never {},
    }
}

/// Start everything and serve until Ctrl-C
pub async fn serve(server: Arc<ServerContext>) -> Result<()> {
    run(server, shutdown_signal()).await
}

/// Start everything and serve until `shutdown` resolves:
/// plugin configuration, dependency pre-bundling, the update channel, the
/// file watcher and the HTTP server
pub async fn run<F>(server: Arc<ServerContext>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    server.container.configure_server(&server).await?;

    if server.config.optimize_deps {
        // serving continues without pre-bundles
        if let Err(e) = optimizer::optimize(&server).await {
            warn!(error = %e, "dependency pre-bundling failed");
        }
    }

    let hmr_listener = TcpListener::bind(server.hmr_addr()).await?;
    let hmr_router = hmr::router(server.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(hmr_listener, hmr_router).await {
            warn!(error = %e, "update channel stopped");
        }
    });

    let (watcher, mut changes) = FileWatcher::spawn(&server.config.root)?;
    let watch_server = server.clone();
    tokio::spawn(async move {
        let _watcher = watcher;
        while let Some(change) = changes.recv().await {
            if change.kind == FileChangeKind::Removed {
                continue;
            }
            if let Err(e) = hmr::handle_file_change(&watch_server, &change.path) {
                warn!(path = %change.path, error = %e, "hot update failed");
            }
        }
    });

    let listener = TcpListener::bind(server.addr()).await?;
    let addr: SocketAddr = listener.local_addr()?;
    info!(
        "dev server running at http://{} (update channel on port {})",
        addr, server.config.hmr_port
    );

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("dev server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
