//! Path and URL helpers shared by the server, plugins and optimizer

use crate::config::CLIENT_PUBLIC_PATH;
use regex::Regex;
use std::sync::OnceLock;

/// Matches package-style specifiers: `react`, `@scope/pkg`, `lodash-es/fp`
fn bare_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w@][^:]").expect("static regex"))
}

/// Script extensions served through the transform pipeline
const JS_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs"];

/// Convert Windows separators to forward slashes
pub fn slash(p: &str) -> String {
    p.replace('\\', "/")
}

/// POSIX-normalize a path: forward slashes, no `.` segments, `..` folded,
/// duplicate separators collapsed
pub fn normalize_path(id: &str) -> String {
    let id = slash(id);
    let absolute = id.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in id.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Strip the hash and query from a URL
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Strip a trailing `?import` marker
pub fn remove_import_query(url: &str) -> &str {
    url.strip_suffix("?import").unwrap_or(url)
}

/// Lowercased extension of the last path segment, without the dot
pub fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next().unwrap_or(path);
    let dot = file.rfind('.')?;
    if dot == 0 || dot + 1 == file.len() {
        return None;
    }
    Some(file[dot + 1..].to_ascii_lowercase())
}

/// Whether a request targets a script module.
///
/// Extensionless paths count as scripts (`/src/App` resolves through
/// extension probing) unless they name a directory.
pub fn is_js_request(url: &str) -> bool {
    let url = clean_url(url);
    match extension(url) {
        Some(ext) => JS_EXTENSIONS.contains(&ext.as_str()),
        None => !url.ends_with('/'),
    }
}

/// Whether a request targets a style sheet
pub fn is_css_request(url: &str) -> bool {
    clean_url(url).ends_with(".css")
}

/// Whether a request carries the `?import` marker for raw asset modules
pub fn is_import_request(url: &str) -> bool {
    url.ends_with("?import")
}

/// Whether a request targets the server's own injected modules
pub fn is_internal_request(url: &str) -> bool {
    url.contains(CLIENT_PUBLIC_PATH)
}

/// Whether a specifier names a package rather than a path
pub fn is_bare_import(specifier: &str) -> bool {
    bare_import_re().is_match(specifier)
}

/// Whether a URL names a static asset with one of the given extensions
pub fn is_asset(url: &str, extensions: &[String]) -> bool {
    extension(clean_url(url)).is_some_and(|ext| extensions.iter().any(|e| *e == ext))
}

/// Path of `file` relative to `root` when it lives inside it, otherwise `file`
pub fn get_short_name<'a>(file: &'a str, root: &str) -> &'a str {
    let root = root.trim_end_matches('/');
    match file.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => file,
    }
}

/// Request URL (`/src/main.ts`) for an absolute file id under `root`
pub fn url_for_id(id: &str, root: &str) -> String {
    let short = get_short_name(id, root);
    if short.starts_with('/') {
        short.to_string()
    } else {
        format!("/{}", short)
    }
}

/// Directory portion of a URL or path (`/src/a/b.ts` -> `/src/a`)
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_url() {
        assert_eq!(clean_url("/src/main.ts?t=123"), "/src/main.ts");
        assert_eq!(clean_url("/src/main.ts#top"), "/src/main.ts");
        assert_eq!(clean_url("/src/logo.svg?import"), "/src/logo.svg");
        assert_eq!(clean_url("/src/main.ts"), "/src/main.ts");
    }

    #[test]
    fn test_is_js_request() {
        assert!(is_js_request("/src/main.tsx"));
        assert!(is_js_request("/src/util.mjs?t=1"));
        assert!(is_js_request("/src/App"));
        assert!(!is_js_request("/src/"));
        assert!(!is_js_request("/src/index.css"));
        assert!(!is_js_request("/src/logo.svg?import"));
    }

    #[test]
    fn test_style_and_import_requests() {
        assert!(is_css_request("/src/index.css?t=5"));
        assert!(!is_css_request("/src/index.scss"));
        assert!(is_import_request("/src/logo.svg?import"));
        assert!(!is_import_request("/src/logo.svg"));
        assert_eq!(remove_import_query("/src/logo.svg?import"), "/src/logo.svg");
    }

    #[test]
    fn test_internal_request() {
        assert!(is_internal_request("/@quickdev/client"));
        assert!(!is_internal_request("/src/client.ts"));
    }

    #[test]
    fn test_bare_imports() {
        assert!(is_bare_import("react"));
        assert!(is_bare_import("@vue/shared"));
        assert!(is_bare_import("lodash-es/debounce"));
        assert!(!is_bare_import("./App"));
        assert!(!is_bare_import("/src/App"));
        assert!(!is_bare_import("../App"));
        assert!(!is_bare_import("c:/windows"));
        assert!(!is_bare_import("x"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/./b/../c.js"), "/a/c.js");
        assert_eq!(normalize_path("C:\\proj\\src\\main.ts"), "C:/proj/src/main.ts");
        assert_eq!(normalize_path("/a//b/"), "/a/b");
        assert_eq!(normalize_path("../x/./y"), "../x/y");
    }

    #[test]
    fn test_short_name() {
        assert_eq!(get_short_name("/proj/src/main.ts", "/proj"), "src/main.ts");
        assert_eq!(get_short_name("/proj/src/main.ts", "/proj/"), "src/main.ts");
        assert_eq!(get_short_name("/project2/x.ts", "/proj"), "/project2/x.ts");
        assert_eq!(url_for_id("/proj/src/main.ts", "/proj"), "/src/main.ts");
        assert_eq!(url_for_id("/elsewhere/x.ts", "/proj"), "/elsewhere/x.ts");
    }

    #[test]
    fn test_extension_and_dirname() {
        assert_eq!(extension("/src/App.TSX").as_deref(), Some("tsx"));
        assert_eq!(extension("/src/.env"), None);
        assert_eq!(extension("/src/App"), None);
        assert_eq!(dirname("/src/a/b.ts"), "/src/a");
        assert_eq!(dirname("/main.ts"), "/");
        assert!(is_asset("/src/logo.svg", &["svg".to_string()]));
    }
}
