//! Import analysis
//!
//! Rewrites every import specifier of a script module to a URL the browser
//! can fetch, records the module's imports in the graph, and binds
//! `import.meta.hot` for the module.
//!
//! | specifier            | becomes                                      |
//! |----------------------|----------------------------------------------|
//! | `./logo.svg`         | `/src/logo.svg?import`                       |
//! | `react` (pre-bundled)| `/node_modules/.quickdev/react.js`           |
//! | `./App`              | `/src/App.tsx`, plus `?t=<ts>` once invalidated |
//!
//! Only the specifier spans are replaced, so the source map is exact.

use super::{Plugin, PluginContext, TransformResult};
use crate::config::{CLIENT_PUBLIC_PATH, PRE_BUNDLE_DIR};
use crate::error::Result;
use crate::lexer;
use crate::server::ServerContext;
use crate::source_map::SpliceBuffer;
use crate::utils::{
    clean_url, dirname, is_asset, is_bare_import, is_internal_request, is_js_request, normalize_path,
    url_for_id,
};
use async_trait::async_trait;
use tracing::debug;

pub const NAME: &str = "quickdev:import-analysis";

#[derive(Debug, Default)]
pub struct ImportAnalysisPlugin;

/// URL of the pre-bundled artifact for a bare specifier
pub fn pre_bundle_url(specifier: &str) -> String {
    normalize_path(&format!("/{}/{}.js", PRE_BUNDLE_DIR, specifier))
}

/// Bootstrap binding `import.meta.hot` for the module served at `url`
pub fn hot_preamble(url: &str) -> Result<String> {
    Ok(format!(
        "import {{ createHotContext as __quickdev__createHotContext }} from \"{}\";\
         import.meta.hot = __quickdev__createHotContext({});",
        CLIENT_PUBLIC_PATH,
        serde_json::to_string(url)?
    ))
}

/// Request URL for a resolved id, cache-busted once the module has been
/// invalidated
fn served_url(server: &ServerContext, resolved_id: &str) -> String {
    let cleaned = clean_url(resolved_id);
    let url = url_for_id(cleaned, &server.root);
    match server.graph.get_module_by_id(cleaned) {
        Some(idx) => match server.graph.last_invalidation_timestamp(idx) {
            0 => url,
            ts => format!("{}?t={}", url, ts),
        },
        None => url,
    }
}

#[async_trait]
impl Plugin for ImportAnalysisPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn transform(
        &self,
        ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<TransformResult>> {
        if !is_js_request(id) || is_internal_request(id) {
            return Ok(None);
        }
        let server = ctx.server();
        let bindings = lexer::parse(code)?;
        let importer_url = url_for_id(id, &server.root);

        let mut out = SpliceBuffer::new(code);
        let mut imported: Vec<String> = Vec::new();

        for import in &bindings.imports {
            let Some(specifier) = import.name.as_deref() else {
                continue;
            };
            if is_internal_request(specifier) {
                continue;
            }

            if is_asset(specifier, &server.config.asset_extensions) && !is_bare_import(specifier) {
                let target = if specifier.starts_with('/') {
                    normalize_path(specifier)
                } else {
                    normalize_path(&format!("{}/{}", dirname(&importer_url), specifier))
                };
                out.overwrite(import.start, import.end, &format!("{}?import", target))?;
                continue;
            }

            if is_bare_import(specifier) && server.deps.contains(specifier) {
                let url = pre_bundle_url(specifier);
                out.overwrite(import.start, import.end, &url)?;
                imported.push(url);
                continue;
            }

            // relative, absolute, or a bare import that was not pre-bundled
            match ctx.resolve(specifier, Some(id)).await? {
                Some(resolved) => {
                    let url = served_url(server, &resolved.id);
                    out.overwrite(import.start, import.end, &url)?;
                    imported.push(clean_url(&url).to_string());
                }
                None => debug!(specifier, importer = id, "import left as written"),
            }
        }

        if !id.contains("node_modules") {
            out.prepend(&hot_preamble(&importer_url)?);
        }

        if let Some(idx) = server.graph.get_module_by_id(id) {
            server.graph.update_module_info(idx, &imported).await?;
        }

        let map = out.generate_map(&importer_url);
        Ok(Some(TransformResult::with_map(out.to_string(), map)))
    }
}
