//! Serves the update-channel client and injects it into the entry page

use super::{Plugin, PluginContext, ResolvedId};
use crate::config::CLIENT_PUBLIC_PATH;
use crate::error::Result;
use async_trait::async_trait;

pub const NAME: &str = "quickdev:client-inject";

const CLIENT_SOURCE: &str = include_str!("../../client/client.mjs");

#[derive(Debug)]
pub struct ClientInjectPlugin {
    source: &'static str,
}

impl Default for ClientInjectPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientInjectPlugin {
    pub fn new() -> Self {
        Self {
            source: CLIENT_SOURCE,
        }
    }
}

/// Insert the client script right after `<head>`, or at the very top when
/// the page has no head
pub fn inject_client_script(html: &str) -> String {
    let tag = format!(r#"<script type="module" src="{}"></script>"#, CLIENT_PUBLIC_PATH);
    match html.find("<head>") {
        Some(pos) => {
            let at = pos + "<head>".len();
            format!("{}{}{}", &html[..at], tag, &html[at..])
        }
        None => format!("{}{}", tag, html),
    }
}

#[async_trait]
impl Plugin for ClientInjectPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn resolve_id(
        &self,
        _ctx: &PluginContext<'_>,
        id: &str,
        _importer: Option<&str>,
    ) -> Result<Option<ResolvedId>> {
        Ok((id == CLIENT_PUBLIC_PATH).then(|| ResolvedId::new(CLIENT_PUBLIC_PATH)))
    }

    async fn load(&self, ctx: &PluginContext<'_>, id: &str) -> Result<Option<String>> {
        if id != CLIENT_PUBLIC_PATH {
            return Ok(None);
        }
        let port = ctx.server().config.hmr_port.to_string();
        Ok(Some(self.source.replace("__HMR_PORT__", &port)))
    }

    async fn transform_markup(&self, html: &str) -> Result<Option<String>> {
        Ok(Some(inject_client_script(html)))
    }
}
