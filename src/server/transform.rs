//! On-demand module transforms, cached on the module graph

use super::ServerContext;
use crate::error::Result;
use crate::plugins::TransformResult;
use crate::utils::clean_url;
use std::time::Instant;
use tracing::debug;

/// Resolve, load and transform the module behind `raw_url`.
///
/// A cached result is returned as-is without running any plugin. `None`
/// means no plugin could resolve or load the module; the caller should fall
/// through to its next handler. Concurrent misses for the same module may
/// each run the pipeline; the last result wins the cache.
pub async fn transform_request(server: &ServerContext, raw_url: &str) -> Result<Option<TransformResult>> {
    let url = clean_url(raw_url);
    let idx = server.graph.ensure_entry_from_url(url).await?;
    if let Some(cached) = server.graph.transform_result(idx) {
        debug!(url, "transform cache hit");
        return Ok(Some(cached));
    }

    let started = Instant::now();
    let Some(resolved) = server.container.resolve_id(server, url, None).await? else {
        debug!(url, "unresolved request");
        return Ok(None);
    };
    let Some(code) = server.container.load(server, &resolved.id).await? else {
        debug!(url, id = %resolved.id, "nothing loaded");
        return Ok(None);
    };
    let result = server.container.transform(server, code, &resolved.id).await?;
    server.graph.set_transform_result(idx, result.clone());

    debug!(
        url,
        id = %resolved.id,
        elapsed_us = started.elapsed().as_micros() as u64,
        "transformed"
    );
    Ok(Some(result))
}
