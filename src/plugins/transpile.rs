//! Reads script sources and compiles TypeScript / JSX through the bundler

use super::{Plugin, PluginContext, TransformResult};
use crate::error::{Error, Result};
use crate::optimizer::Loader;
use crate::utils::{extension, is_js_request};
use async_trait::async_trait;

pub const NAME: &str = "quickdev:transpile";

#[derive(Debug, Default)]
pub struct TranspilePlugin;

/// Loader for ids that need compiling; plain scripts need none
fn compile_loader(id: &str) -> Option<Loader> {
    match extension(id)?.as_str() {
        ext @ ("ts" | "tsx" | "jsx") => Some(Loader::from_extension(ext)),
        _ => None,
    }
}

#[async_trait]
impl Plugin for TranspilePlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<String>> {
        if !is_js_request(id) {
            return Ok(None);
        }
        match tokio::fs::read_to_string(id).await {
            Ok(code) => Ok(Some(code)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::load_error(id, e)),
        }
    }

    async fn transform(
        &self,
        ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<TransformResult>> {
        if !is_js_request(id) {
            return Ok(None);
        }
        let Some(loader) = compile_loader(id) else {
            return Ok(None);
        };
        let output = ctx.server().bundler.transform(code, loader, id).await?;
        Ok(Some(TransformResult::code(output.code)))
    }
}
