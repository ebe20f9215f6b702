//! Plugin container
//!
//! Every resolve, load and transform the dev server performs goes through an
//! ordered list of plugins. Hook categories have different chaining rules:
//!
//! - `resolve_id`, `load` and `transform_markup` are **first-match**: plugins
//!   are consulted in registration order and the first `Some` wins.
//! - `transform` is a **pipeline**: every plugin runs, each seeing the code
//!   produced by the one before it.
//!
//! A plugin that returns `Ok(None)` contributes nothing; a plugin that
//! returns `Err` aborts the current request, and the error is attributed to
//! the plugin and hook that raised it.
//!
//! Hooks receive a [`PluginContext`] whose [`resolve`](PluginContext::resolve)
//! re-enters the container's own `resolve_id` chain, so a transform can
//! resolve sibling specifiers with exactly the policy used for requests.
//!
//! # Example
//! ```text
//! #[derive(Debug)]
//! struct Banner;
//!
//! #[async_trait]
//! impl Plugin for Banner {
//!     fn name(&self) -> &str { "banner" }
//!     async fn transform(&self, _: &PluginContext<'_>, code: &str, _: &str)
//!         -> Result<Option<TransformResult>> {
//!         Ok(Some(TransformResult::code(format!("/* dev */\n{}", code))))
//!     }
//! }
//! ```

pub mod asset;
pub mod client_inject;
pub mod css;
pub mod import_analysis;
pub mod resolve;
pub mod transpile;

use crate::error::{Error, Hook, Result};
use crate::server::ServerContext;
use crate::source_map::SourceMap;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

pub use asset::AssetPlugin;
pub use client_inject::ClientInjectPlugin;
pub use css::CssPlugin;
pub use import_analysis::ImportAnalysisPlugin;
pub use resolve::ResolvePlugin;
pub use transpile::TranspilePlugin;

/// Result of a successful `resolve_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
    /// Canonical absolute id, usually a file path
    pub id: String,
}

impl ResolvedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Output of a transform step, and the value cached on a module node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    pub code: String,
    pub map: Option<SourceMap>,
}

impl TransformResult {
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }

    pub fn with_map(code: impl Into<String>, map: SourceMap) -> Self {
        Self {
            code: code.into(),
            map: Some(map),
        }
    }
}

/// A named bundle of optional hooks.
///
/// Every hook has a no-op default; a plugin implements only the ones it
/// cares about.
#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Called once per plugin when the server starts
    async fn configure_server(&self, _server: &ServerContext) -> Result<()> {
        Ok(())
    }

    async fn resolve_id(
        &self,
        _ctx: &PluginContext<'_>,
        _id: &str,
        _importer: Option<&str>,
    ) -> Result<Option<ResolvedId>> {
        Ok(None)
    }

    async fn load(&self, _ctx: &PluginContext<'_>, _id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn transform(
        &self,
        _ctx: &PluginContext<'_>,
        _code: &str,
        _id: &str,
    ) -> Result<Option<TransformResult>> {
        Ok(None)
    }

    async fn transform_markup(&self, _html: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Capability handed to every hook invocation
#[derive(Clone, Copy)]
pub struct PluginContext<'a> {
    server: &'a ServerContext,
}

impl<'a> PluginContext<'a> {
    pub fn new(server: &'a ServerContext) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &'a ServerContext {
        self.server
    }

    /// Resolve `id` through the full `resolve_id` chain
    pub fn resolve<'b>(
        &self,
        id: &'b str,
        importer: Option<&'b str>,
    ) -> BoxFuture<'b, Result<Option<ResolvedId>>>
    where
        'a: 'b,
    {
        let server = self.server;
        Box::pin(async move { server.container.resolve_id(server, id, importer).await })
    }
}

impl fmt::Debug for PluginContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("root", &self.server.root)
            .finish()
    }
}

/// Ordered plugin list and the hook drivers over it
#[derive(Debug, Default)]
pub struct PluginContainer {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container from plugins in registration order
    pub fn with_plugins(plugins: Vec<Arc<dyn Plugin>>) -> Result<Self> {
        let mut container = Self::new();
        for plugin in plugins {
            container.register(plugin)?;
        }
        Ok(container)
    }

    /// Append a plugin; names must be unique
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(Error::Config(format!(
                "plugin '{}' is already registered",
                plugin.name()
            )));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn configure_server(&self, server: &ServerContext) -> Result<()> {
        for plugin in &self.plugins {
            plugin
                .configure_server(server)
                .await
                .map_err(|e| e.in_plugin(plugin.name(), Hook::ConfigureServer, &server.root))?;
        }
        Ok(())
    }

    /// First-match: the first plugin to resolve `id` wins
    pub async fn resolve_id(
        &self,
        server: &ServerContext,
        id: &str,
        importer: Option<&str>,
    ) -> Result<Option<ResolvedId>> {
        let ctx = PluginContext::new(server);
        for plugin in &self.plugins {
            let resolved = plugin
                .resolve_id(&ctx, id, importer)
                .await
                .map_err(|e| e.in_plugin(plugin.name(), Hook::ResolveId, id))?;
            if let Some(resolved) = resolved {
                trace!(plugin = plugin.name(), id, resolved = %resolved.id, "resolveId");
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    /// First-match: the first plugin to produce source for `id` wins
    pub async fn load(&self, server: &ServerContext, id: &str) -> Result<Option<String>> {
        let ctx = PluginContext::new(server);
        for plugin in &self.plugins {
            let loaded = plugin
                .load(&ctx, id)
                .await
                .map_err(|e| e.in_plugin(plugin.name(), Hook::Load, id))?;
            if loaded.is_some() {
                trace!(plugin = plugin.name(), id, "load");
                return Ok(loaded);
            }
        }
        Ok(None)
    }

    /// Pipeline: each plugin transforms the previous plugin's output.
    ///
    /// The last map any plugin produced is carried through; plugins that
    /// return code without a map keep the earlier one.
    pub async fn transform(
        &self,
        server: &ServerContext,
        code: String,
        id: &str,
    ) -> Result<TransformResult> {
        let ctx = PluginContext::new(server);
        let mut current = TransformResult::code(code);
        for plugin in &self.plugins {
            let result = plugin
                .transform(&ctx, &current.code, id)
                .await
                .map_err(|e| e.in_plugin(plugin.name(), Hook::Transform, id))?;
            if let Some(result) = result {
                trace!(plugin = plugin.name(), id, "transform");
                current.code = result.code;
                if result.map.is_some() {
                    current.map = result.map;
                }
            }
        }
        Ok(current)
    }

    /// First-match over the entry HTML; unchanged when no plugin answers
    pub async fn transform_markup(&self, html: String) -> Result<String> {
        for plugin in &self.plugins {
            let result = plugin
                .transform_markup(&html)
                .await
                .map_err(|e| e.in_plugin(plugin.name(), Hook::TransformMarkup, "index.html"))?;
            if let Some(result) = result {
                return Ok(result);
            }
        }
        Ok(html)
    }
}

/// Built-in plugins in registration order
pub fn builtin_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(ClientInjectPlugin::new()),
        Arc::new(ResolvePlugin),
        Arc::new(TranspilePlugin),
        Arc::new(ImportAnalysisPlugin),
        Arc::new(CssPlugin),
        Arc::new(AssetPlugin),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default)]
    struct Recorder {
        name: &'static str,
        calls: Mutex<Vec<String>>,
        resolves_to: Option<&'static str>,
        loads: Option<&'static str>,
        suffix: Option<&'static str>,
        markup: Option<&'static str>,
        fail_load: bool,
    }

    impl Recorder {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn resolve_id(
            &self,
            _ctx: &PluginContext<'_>,
            id: &str,
            _importer: Option<&str>,
        ) -> Result<Option<ResolvedId>> {
            self.calls.lock().push(format!("resolveId:{}", id));
            Ok(self.resolves_to.map(ResolvedId::new))
        }

        async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<String>> {
            self.calls.lock().push(format!("load:{}", id));
            if self.fail_load {
                return Err(Error::load_error(id, "disk on fire"));
            }
            Ok(self.loads.map(str::to_string))
        }

        async fn transform(
            &self,
            _ctx: &PluginContext<'_>,
            code: &str,
            _id: &str,
        ) -> Result<Option<TransformResult>> {
            Ok(self.suffix.map(|s| TransformResult::code(format!("{}{}", code, s))))
        }

        async fn transform_markup(&self, html: &str) -> Result<Option<String>> {
            Ok(self.markup.map(|m| format!("{}{}", html, m)))
        }
    }

    /// Resolves `alias:x` by re-entering the container with `x`
    #[derive(Debug)]
    struct Alias;

    #[async_trait]
    impl Plugin for Alias {
        fn name(&self) -> &str {
            "alias"
        }

        async fn resolve_id(
            &self,
            ctx: &PluginContext<'_>,
            id: &str,
            importer: Option<&str>,
        ) -> Result<Option<ResolvedId>> {
            match id.strip_prefix("alias:") {
                Some(target) => ctx.resolve(target, importer).await,
                None => Ok(None),
            }
        }
    }

    fn server_with(plugins: Vec<Arc<dyn Plugin>>) -> Arc<ServerContext> {
        ServerContext::new(ServerConfig::default(), plugins).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_is_first_match_and_consults_earlier_plugins() {
        let p1 = Arc::new(Recorder::named("p1"));
        let p2 = Arc::new(Recorder {
            resolves_to: Some("/abs/x.js"),
            ..Recorder::named("p2")
        });
        let p3 = Arc::new(Recorder {
            resolves_to: Some("/never.js"),
            ..Recorder::named("p3")
        });
        let server = server_with(vec![p1.clone(), p2.clone(), p3.clone()]);

        let resolved = server.container.resolve_id(&server, "x", None).await.unwrap();
        assert_eq!(resolved, Some(ResolvedId::new("/abs/x.js")));
        assert_eq!(p1.calls(), vec!["resolveId:x"]);
        assert_eq!(p2.calls(), vec!["resolveId:x"]);
        assert!(p3.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_is_none_not_error() {
        let server = server_with(vec![Arc::new(Recorder::named("p1"))]);
        let resolved = server.container.resolve_id(&server, "nope", None).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_context_resolve_reenters_container() {
        let target = Arc::new(Recorder {
            resolves_to: Some("/abs/target.js"),
            ..Recorder::named("target")
        });
        let server = server_with(vec![Arc::new(Alias), target.clone()]);

        let resolved = server
            .container
            .resolve_id(&server, "alias:target", Some("/src/main.js"))
            .await
            .unwrap();
        assert_eq!(resolved, Some(ResolvedId::new("/abs/target.js")));
        // only the re-entrant pass reaches it; the alias answered the outer one
        assert_eq!(target.calls(), vec!["resolveId:target"]);
    }

    #[tokio::test]
    async fn test_load_first_match() {
        let p1 = Arc::new(Recorder {
            loads: Some("first"),
            ..Recorder::named("p1")
        });
        let p2 = Arc::new(Recorder {
            loads: Some("second"),
            ..Recorder::named("p2")
        });
        let server = server_with(vec![p1, p2.clone()]);
        let loaded = server.container.load(&server, "/a.js").await.unwrap();
        assert_eq!(loaded.as_deref(), Some("first"));
        assert!(p2.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transform_is_a_pipeline() {
        let server = server_with(vec![
            Arc::new(Recorder {
                suffix: Some("+a"),
                ..Recorder::named("a")
            }),
            Arc::new(Recorder::named("skip")),
            Arc::new(Recorder {
                suffix: Some("+b"),
                ..Recorder::named("b")
            }),
        ]);
        let result = server
            .container
            .transform(&server, "code".to_string(), "/x.js")
            .await
            .unwrap();
        assert_eq!(result.code, "code+a+b");
    }

    #[tokio::test]
    async fn test_transform_markup_first_match() {
        let server = server_with(vec![
            Arc::new(Recorder::named("none")),
            Arc::new(Recorder {
                markup: Some("<!-- one -->"),
                ..Recorder::named("one")
            }),
            Arc::new(Recorder {
                markup: Some("<!-- two -->"),
                ..Recorder::named("two")
            }),
        ]);
        let html = server.container.transform_markup("<html>".to_string()).await.unwrap();
        assert_eq!(html, "<html><!-- one -->");
    }

    #[tokio::test]
    async fn test_hook_error_is_attributed() {
        let server = server_with(vec![Arc::new(Recorder {
            fail_load: true,
            ..Recorder::named("broken")
        })]);
        let err = server.container.load(&server, "/a.js").await.unwrap_err();
        match &err {
            Error::Plugin { plugin, hook, id, .. } => {
                assert_eq!(plugin, "broken");
                assert_eq!(*hook, Hook::Load);
                assert_eq!(id, "/a.js");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root_cause(), Error::Load { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut container = PluginContainer::new();
        container.register(Arc::new(Recorder::named("dup"))).unwrap();
        assert!(container.register(Arc::new(Recorder::named("dup"))).is_err());
        assert_eq!(container.plugin_names(), vec!["dup"]);
    }

    #[test]
    fn test_builtin_order() {
        let container = PluginContainer::with_plugins(builtin_plugins()).unwrap();
        assert_eq!(
            container.plugin_names(),
            vec![
                "quickdev:client-inject",
                "quickdev:resolve",
                "quickdev:transpile",
                "quickdev:import-analysis",
                "quickdev:css",
                "quickdev:asset",
            ]
        );
    }
}
