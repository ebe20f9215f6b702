//! Proxy modules for pre-bundled dependencies
//!
//! Each discovered dependency becomes a build entry in the `dep` namespace.
//! Its contents are a tiny proxy that re-exports the package's real entry, so
//! the bundler flattens the package into one ES module with stable names:
//!
//! ```text
//! // ES module entry
//! import d from "/proj/node_modules/x/index.mjs";export default d
//! export * from "/proj/node_modules/x/index.mjs"
//!
//! // CommonJS entry
//! export { foo,bar } from "/proj/node_modules/y/index.js"
//! export default require("/proj/node_modules/y/index.js")
//! ```

use super::bundler::{BundlerPlugin, Loader, OnLoadArgs, OnLoadResult, OnResolveArgs, OnResolveResult};
use super::cjs::cjs_exports;
use super::DependencySet;
use crate::error::{Error, Result};
use crate::lexer;
use crate::npm::ModuleResolver;
use crate::utils::is_bare_import;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "quickdev:pre-bundle";

/// Namespace of proxy entries
pub const DEP_NAMESPACE: &str = "dep";

#[derive(Debug)]
pub struct PreBundlePlugin {
    deps: DependencySet,
    resolver: Arc<ModuleResolver>,
}

impl PreBundlePlugin {
    pub fn new(deps: DependencySet, resolver: Arc<ModuleResolver>) -> Self {
        Self { deps, resolver }
    }

    fn resolve_entry(&self, id: &str) -> Result<String> {
        self.resolver
            .resolve_bare(id, self.resolver.root())
            .ok_or_else(|| Error::probe_error(id, "package entry not found"))
    }
}

/// Build the proxy for a dependency whose real entry is `entry_path`
pub fn proxy_module(entry_path: &str, code: &str, resolver: &ModuleResolver) -> Result<String> {
    let bindings = lexer::parse(code).map_err(|e| Error::probe_error(entry_path, e))?;
    let mut lines = Vec::new();

    if !bindings.has_module_syntax() {
        let names = cjs_exports(entry_path, resolver)?;
        if !names.is_empty() {
            lines.push(format!("export {{ {} }} from \"{}\"", names.join(","), entry_path));
        }
        lines.push(format!("export default require(\"{}\")", entry_path));
    } else {
        if bindings.has_default_export() {
            lines.push(format!("import d from \"{}\";export default d", entry_path));
        }
        lines.push(format!("export * from \"{}\"", entry_path));
    }
    Ok(lines.join("\n"))
}

#[async_trait]
impl BundlerPlugin for PreBundlePlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn on_resolve(&self, args: &OnResolveArgs<'_>) -> Result<Option<OnResolveResult>> {
        if !is_bare_import(args.path) || !self.deps.contains(args.path) {
            return Ok(None);
        }
        match args.importer {
            None => Ok(Some(OnResolveResult::in_namespace(args.path, DEP_NAMESPACE))),
            Some(_) => Ok(self
                .resolver
                .resolve_bare(args.path, self.resolver.root())
                .map(OnResolveResult::file)),
        }
    }

    async fn on_load(&self, args: &OnLoadArgs<'_>) -> Result<Option<OnLoadResult>> {
        if args.namespace != DEP_NAMESPACE {
            return Ok(None);
        }
        let entry_path = self.resolve_entry(args.path)?;
        let code = tokio::fs::read_to_string(&entry_path)
            .await
            .map_err(|e| Error::probe_error(args.path, e))?;
        let contents = proxy_module(&entry_path, &code, &self.resolver)?;
        debug!(dependency = args.path, proxy = %contents, "proxy module");

        Ok(Some(OnLoadResult {
            contents,
            loader: Loader::for_path(&entry_path),
            resolve_dir: Some(self.resolver.root().to_path_buf()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EXTENSIONS;
    use crate::optimizer::bundler::ResolveKind;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn install(root: &Path, name: &str, file: &str, code: &str) -> String {
        let pkg = root.join("node_modules").join(name);
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join(file), code).unwrap();
        crate::utils::normalize_path(&pkg.join(file).to_string_lossy())
    }

    fn plugin(root: &Path, deps: &[&str]) -> PreBundlePlugin {
        let set = DependencySet::default();
        for dep in deps {
            set.insert(dep);
        }
        PreBundlePlugin::new(set, Arc::new(ModuleResolver::new(root, DEFAULT_EXTENSIONS)))
    }

    #[tokio::test]
    async fn test_entry_goes_to_dep_namespace() {
        let dir = tempdir().unwrap();
        let entry = install(dir.path(), "react", "index.js", "exports.a = 1;");
        let p = plugin(dir.path(), &["react"]);

        let as_entry = OnResolveArgs { path: "react", importer: None, kind: ResolveKind::EntryPoint };
        let r = p.on_resolve(&as_entry).await.unwrap().unwrap();
        assert_eq!(r.namespace, DEP_NAMESPACE);

        let nested = OnResolveArgs { path: "react", importer: Some("/x.js"), kind: ResolveKind::Import };
        let r = p.on_resolve(&nested).await.unwrap().unwrap();
        assert_eq!(r.path, entry);

        let unknown = OnResolveArgs { path: "vue", importer: None, kind: ResolveKind::EntryPoint };
        assert!(p.on_resolve(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cjs_proxy_is_two_lines() {
        let dir = tempdir().unwrap();
        let entry = install(dir.path(), "y", "index.js", "exports.foo = 1;\nexports.bar = 2;\n");
        let p = plugin(dir.path(), &["y"]);

        let loaded = p
            .on_load(&OnLoadArgs { path: "y", namespace: DEP_NAMESPACE })
            .await
            .unwrap()
            .unwrap();
        let lines: Vec<&str> = loaded.contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!("export {{ foo,bar }} from \"{}\"", entry),
                format!("export default require(\"{}\")", entry),
            ]
        );
        assert_eq!(loaded.loader, Loader::Js);
    }

    #[tokio::test]
    async fn test_esm_proxy_with_default() {
        let dir = tempdir().unwrap();
        let entry = install(dir.path(), "x", "index.mjs", "export default 1;\nexport const y = 2;\n");
        let p = plugin(dir.path(), &["x"]);

        let loaded = p
            .on_load(&OnLoadArgs { path: "x", namespace: DEP_NAMESPACE })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            loaded.contents,
            format!("import d from \"{0}\";export default d\nexport * from \"{0}\"", entry)
        );
    }

    #[tokio::test]
    async fn test_esm_proxy_without_default() {
        let dir = tempdir().unwrap();
        let entry = install(dir.path(), "z", "index.js", "export function f() {}\n");
        let p = plugin(dir.path(), &["z"]);

        let loaded = p
            .on_load(&OnLoadArgs { path: "z", namespace: DEP_NAMESPACE })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.contents, format!("export * from \"{}\"", entry));
    }

    #[tokio::test]
    async fn test_missing_package_is_probe_error() {
        let dir = tempdir().unwrap();
        let p = plugin(dir.path(), &["ghost"]);
        let err = p
            .on_load(&OnLoadArgs { path: "ghost", namespace: DEP_NAMESPACE })
            .await
            .unwrap_err();
        assert!(err.is_dependency_probe());
    }

    #[tokio::test]
    async fn test_other_namespaces_ignored() {
        let dir = tempdir().unwrap();
        let p = plugin(dir.path(), &[]);
        let r = p.on_load(&OnLoadArgs { path: "/a.js", namespace: "file" }).await.unwrap();
        assert!(r.is_none());
    }
}
