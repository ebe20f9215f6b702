//! Node-style module resolution
//!
//! Relative and absolute paths are probed with the configured extensions and
//! then as directories (`index.*`). Bare specifiers walk up `node_modules`
//! directories from the base directory and consult each package's
//! `package.json` entry fields. Bare lookups are cached; path lookups are not,
//! since source files come and go while the server runs.

use crate::npm::package_json::PackageJson;
use crate::utils::normalize_path;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Node-compatible resolver rooted at a project directory
#[derive(Debug)]
pub struct ModuleResolver {
    root: PathBuf,
    /// Extensions to probe, with leading dot
    extensions: Vec<String>,
    /// `(specifier, basedir)` → resolved file
    bare_cache: Mutex<HashMap<(String, String), Option<String>>>,
}

impl ModuleResolver {
    pub fn new(root: impl Into<PathBuf>, extensions: &[&str]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            bare_cache: Mutex::new(HashMap::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an absolute id: as a file system path first, then as a path
    /// under the project root (`/src/main.ts`)
    pub fn resolve_absolute(&self, id: &str) -> Option<String> {
        let as_is = Path::new(id);
        if as_is.is_file() {
            return Some(normalize_path(id));
        }
        let under_root = self.root.join(id.trim_start_matches('/'));
        self.try_resolve_file(&under_root)
    }

    /// Resolve `./x` or `../x` against the importing file
    pub fn resolve_relative(&self, specifier: &str, importer: &str) -> Option<String> {
        let dir = Path::new(importer).parent().unwrap_or(&self.root);
        self.try_resolve_file(&dir.join(specifier))
    }

    /// Resolve a package specifier (`react`, `@scope/pkg/sub`) from `basedir`
    pub fn resolve_bare(&self, specifier: &str, basedir: &Path) -> Option<String> {
        let key = (specifier.to_string(), basedir.to_string_lossy().to_string());
        if let Some(hit) = self.bare_cache.lock().get(&key) {
            return hit.clone();
        }
        let resolved = self.resolve_bare_uncached(specifier, basedir);
        debug!(specifier, resolved = ?resolved, "bare resolution");
        self.bare_cache.lock().insert(key, resolved.clone());
        resolved
    }

    /// Locate the directory of an installed package
    pub fn find_package_dir(&self, name: &str, basedir: &Path) -> Option<PathBuf> {
        let mut dir = basedir.to_path_buf();
        loop {
            let candidate = dir.join("node_modules").join(name);
            if candidate.is_dir() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    pub fn clear_cache(&self) {
        self.bare_cache.lock().clear();
    }

    fn resolve_bare_uncached(&self, specifier: &str, basedir: &Path) -> Option<String> {
        let (name, subpath) = Self::parse_bare(specifier);
        let package_dir = self.find_package_dir(&name, basedir)?;
        let manifest = package_dir.join("package.json");
        let pkg = if manifest.is_file() {
            PackageJson::load(&manifest).ok()
        } else {
            None
        };

        match subpath {
            Some(sub) => {
                let exported = pkg
                    .as_ref()
                    .and_then(|p| p.resolve_export(&format!("./{}", sub)));
                match exported {
                    Some(entry) => self.try_resolve_file(&package_dir.join(entry)),
                    None => self.try_resolve_file(&package_dir.join(sub)),
                }
            }
            None => pkg
                .as_ref()
                .and_then(PackageJson::resolve_main)
                .and_then(|entry| self.try_resolve_file(&package_dir.join(entry)))
                .or_else(|| self.try_resolve_file(&package_dir.join("index"))),
        }
    }

    /// Try the path as-is, then with each extension, then as a directory
    fn try_resolve_file(&self, path: &Path) -> Option<String> {
        if path.is_file() {
            return Some(normalize_path(&path.to_string_lossy()));
        }
        let base = path.to_string_lossy();
        for ext in &self.extensions {
            let candidate = format!("{}{}", base, ext);
            if Path::new(&candidate).is_file() {
                return Some(normalize_path(&candidate));
            }
        }
        if path.is_dir() {
            for ext in &self.extensions {
                let index = path.join(format!("index{}", ext));
                if index.is_file() {
                    return Some(normalize_path(&index.to_string_lossy()));
                }
            }
        }
        None
    }

    /// Split `@scope/pkg/sub/path` into `("@scope/pkg", Some("sub/path"))`
    pub fn parse_bare(specifier: &str) -> (String, Option<String>) {
        let split_at = if specifier.starts_with('@') { 2 } else { 1 };
        let parts: Vec<&str> = specifier.splitn(split_at + 1, '/').collect();
        if parts.len() > split_at {
            (parts[..split_at].join("/"), Some(parts[split_at].to_string()))
        } else {
            (specifier.to_string(), None)
        }
    }
}
