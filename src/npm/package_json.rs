//! package.json entry-point fields
//!
//! Only the fields that decide which file a specifier lands on are modelled:
//! `exports` (string, subpath map or condition map), `module`, `browser`
//! (string form) and `main`.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// Export conditions honoured by the dev server, in priority order
pub const CONDITIONS: &[&str] = &["browser", "import", "module", "default", "require"];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PackageJson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub browser: Option<Value>,
    #[serde(rename = "type", default)]
    pub package_type: Option<String>,
    #[serde(default)]
    pub exports: Option<PackageExports>,
    #[serde(default)]
    pub dependencies: Option<HashMap<String, String>>,
}

/// `exports` field: a bare path or an object of subpaths / conditions
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PackageExports {
    Simple(String),
    Map(Map<String, Value>),
}

impl PackageJson {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Entry for the package root.
    ///
    /// Priority: `exports["."]` → `module` → string `browser` → `main`.
    pub fn resolve_main(&self) -> Option<String> {
        if let Some(entry) = self.resolve_export(".") {
            return Some(entry);
        }
        if let Some(m) = &self.module {
            return Some(m.clone());
        }
        if let Some(Value::String(b)) = &self.browser {
            return Some(b.clone());
        }
        self.main.clone()
    }

    /// Entry for a subpath (`"."` or `"./fp"`) through the `exports` field
    pub fn resolve_export(&self, subpath: &str) -> Option<String> {
        match self.exports.as_ref()? {
            PackageExports::Simple(s) => (subpath == ".").then(|| s.clone()),
            PackageExports::Map(map) => {
                let is_subpath_map = map.keys().any(|k| k.starts_with('.'));
                if !is_subpath_map {
                    return if subpath == "." {
                        resolve_target(&Value::Object(map.clone()))
                    } else {
                        None
                    };
                }
                if let Some(target) = map.get(subpath) {
                    return resolve_target(target);
                }
                // "./*": "./dist/*.js"
                map.iter().find_map(|(key, target)| {
                    let (prefix, suffix) = key.split_once('*')?;
                    let matched = subpath.strip_prefix(prefix)?.strip_suffix(suffix)?;
                    resolve_target(target).map(|t| t.replace('*', matched))
                })
            }
        }
    }

    pub fn is_esm(&self) -> bool {
        self.package_type.as_deref() == Some("module")
    }
}

fn resolve_target(target: &Value) -> Option<String> {
    match target {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(resolve_target),
        Value::Object(conditions) => CONDITIONS
            .iter()
            .filter_map(|c| conditions.get(*c))
            .find_map(resolve_target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_and_module() {
        let pkg = PackageJson::from_json(r#"{ "name": "x", "main": "index.js", "module": "index.mjs" }"#).unwrap();
        assert_eq!(pkg.resolve_main().as_deref(), Some("index.mjs"));
        let pkg = PackageJson::from_json(r#"{ "main": "lib/x.js" }"#).unwrap();
        assert_eq!(pkg.resolve_main().as_deref(), Some("lib/x.js"));
    }

    #[test]
    fn test_simple_exports() {
        let pkg = PackageJson::from_json(r#"{ "exports": "./lib/index.js", "main": "no.js" }"#).unwrap();
        assert_eq!(pkg.resolve_main().as_deref(), Some("./lib/index.js"));
        assert_eq!(pkg.resolve_export("./sub"), None);
    }

    #[test]
    fn test_conditional_exports_prefer_import() {
        let pkg = PackageJson::from_json(
            r#"{ "exports": { "require": "./cjs/index.js", "import": "./esm/index.js" } }"#,
        )
        .unwrap();
        assert_eq!(pkg.resolve_main().as_deref(), Some("./esm/index.js"));
    }

    #[test]
    fn test_subpath_exports() {
        let pkg = PackageJson::from_json(
            r#"{
                "exports": {
                    ".": { "import": "./index.mjs", "require": "./index.cjs" },
                    "./fp": "./fp/index.js",
                    "./utils/*": { "default": "./dist/utils/*.js" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(pkg.resolve_main().as_deref(), Some("./index.mjs"));
        assert_eq!(pkg.resolve_export("./fp").as_deref(), Some("./fp/index.js"));
        assert_eq!(
            pkg.resolve_export("./utils/debounce").as_deref(),
            Some("./dist/utils/debounce.js")
        );
        assert_eq!(pkg.resolve_export("./missing"), None);
    }

    #[test]
    fn test_type_module() {
        let pkg = PackageJson::from_json(r#"{ "type": "module" }"#).unwrap();
        assert!(pkg.is_esm());
    }
}
