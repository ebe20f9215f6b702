//! HTML entry pages

use super::ServerContext;
use crate::error::{Error, Result};
use crate::utils::normalize_path;

/// The page behind `path` (`/` is `index.html`) run through the markup
/// hooks; `None` when the file does not exist
pub async fn transform_html(server: &ServerContext, path: &str) -> Result<Option<String>> {
    let page = if path == "/" { "/index.html" } else { path };
    // normalizing an absolute path never climbs above `/`
    let relative = normalize_path(page);
    let file = server.config.root.join(relative.trim_start_matches('/'));

    let html = match tokio::fs::read_to_string(&file).await {
        Ok(html) => html,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::load_error(file.to_string_lossy(), e)),
    };
    Ok(Some(server.container.transform_markup(html).await?))
}
