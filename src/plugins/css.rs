//! Style sheets as hot-updatable script modules

use super::{Plugin, PluginContext, TransformResult};
use crate::config::CLIENT_PUBLIC_PATH;
use crate::error::{Error, Result};
use crate::utils::{is_css_request, url_for_id};
use async_trait::async_trait;

pub const NAME: &str = "quickdev:css";

#[derive(Debug, Default)]
pub struct CssPlugin;

/// Script module that injects `css` under `id` and removes it on prune.
///
/// Import analysis never sees style modules, so the module binds its own
/// hot context.
pub fn css_module(id: &str, css: &str) -> Result<String> {
    let id = serde_json::to_string(id)?;
    let css = serde_json::to_string(css)?;
    Ok(format!(
        "import {{ createHotContext as __quickdev__createHotContext, updateStyle, removeStyle }} from \"{client}\";\n\
         const id = {id};\n\
         import.meta.hot = __quickdev__createHotContext(id);\n\
         const css = {css};\n\
         updateStyle(id, css);\n\
         import.meta.hot.accept();\n\
         export default css;\n\
         import.meta.hot.prune(() => removeStyle(id));\n",
        client = CLIENT_PUBLIC_PATH,
        id = id,
        css = css,
    ))
}

#[async_trait]
impl Plugin for CssPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn load(&self, _ctx: &PluginContext<'_>, id: &str) -> Result<Option<String>> {
        if !is_css_request(id) {
            return Ok(None);
        }
        tokio::fs::read_to_string(id)
            .await
            .map(Some)
            .map_err(|e| Error::load_error(id, e))
    }

    async fn transform(
        &self,
        ctx: &PluginContext<'_>,
        code: &str,
        id: &str,
    ) -> Result<Option<TransformResult>> {
        if !is_css_request(id) {
            return Ok(None);
        }
        let url = url_for_id(id, &ctx.server().root);
        Ok(Some(TransformResult::code(css_module(&url, code)?)))
    }
}
