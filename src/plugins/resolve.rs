//! File system resolution for absolute, relative and bare specifiers

use super::{Plugin, PluginContext, ResolvedId};
use crate::error::Result;
use crate::utils::is_bare_import;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

pub const NAME: &str = "quickdev:resolve";

#[derive(Debug, Default)]
pub struct ResolvePlugin;

#[async_trait]
impl Plugin for ResolvePlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn resolve_id(
        &self,
        ctx: &PluginContext<'_>,
        id: &str,
        importer: Option<&str>,
    ) -> Result<Option<ResolvedId>> {
        let resolver = &ctx.server().resolver;
        let resolved = if id.starts_with('/') {
            resolver.resolve_absolute(id)
        } else if id.starts_with('.') {
            // relative specifiers only mean something next to a file
            match importer {
                Some(importer) => resolver.resolve_relative(id, importer),
                None => None,
            }
        } else if is_bare_import(id) {
            let basedir = importer
                .and_then(|i| Path::new(i).parent())
                .unwrap_or(resolver.root());
            resolver.resolve_bare(id, basedir)
        } else {
            None
        };

        if resolved.is_none() {
            debug!(id, importer, "unresolved");
        }
        Ok(resolved.map(ResolvedId::new))
    }
}
