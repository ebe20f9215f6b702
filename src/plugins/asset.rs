//! `?import` static assets become modules exporting their URL

use super::{Plugin, PluginContext};
use crate::error::Result;
use crate::utils::{is_asset, remove_import_query, url_for_id};
use async_trait::async_trait;

pub const NAME: &str = "quickdev:asset";

#[derive(Debug, Default)]
pub struct AssetPlugin;

#[async_trait]
impl Plugin for AssetPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn load(&self, ctx: &PluginContext<'_>, id: &str) -> Result<Option<String>> {
        let server = ctx.server();
        let id = remove_import_query(id);
        if !is_asset(id, &server.config.asset_extensions) {
            return Ok(None);
        }
        let url = url_for_id(id, &server.root);
        Ok(Some(format!("export default {}", serde_json::to_string(&url)?)))
    }
}
