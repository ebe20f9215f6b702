//! Dependency discovery
//!
//! Runs inside a resolution-only build: every bare specifier the bundler
//! meets is recorded and marked external so the walk never descends into
//! packages. Style sheets, framework components and images are external too.

use super::bundler::{BundlerPlugin, OnResolveArgs, OnResolveResult};
use super::DependencySet;
use crate::error::{Error, Result};
use crate::utils::is_bare_import;
use async_trait::async_trait;
use regex::Regex;

pub const NAME: &str = "quickdev:dep-scan";

#[derive(Debug)]
pub struct ScanPlugin {
    deps: DependencySet,
    external: Regex,
}

impl ScanPlugin {
    /// `external_types` are extension patterns such as `css` or `jpe?g`
    pub fn new(deps: DependencySet, external_types: &[String]) -> Result<Self> {
        let pattern = format!(r"\.({})$", external_types.join("|"));
        let external = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("invalid external type pattern: {}", e)))?;
        Ok(Self { deps, external })
    }
}

#[async_trait]
impl BundlerPlugin for ScanPlugin {
    fn name(&self) -> &str {
        NAME
    }

    async fn on_resolve(&self, args: &OnResolveArgs<'_>) -> Result<Option<OnResolveResult>> {
        if self.external.is_match(args.path) {
            return Ok(Some(OnResolveResult::external(args.path)));
        }
        if is_bare_import(args.path) {
            self.deps.insert(args.path);
            return Ok(Some(OnResolveResult::external(args.path)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EXTERNAL_TYPES;
    use crate::optimizer::bundler::ResolveKind;

    fn plugin(deps: &DependencySet) -> ScanPlugin {
        let types: Vec<String> = EXTERNAL_TYPES.iter().map(|s| s.to_string()).collect();
        ScanPlugin::new(deps.clone(), &types).unwrap()
    }

    fn import(path: &str) -> OnResolveArgs<'_> {
        OnResolveArgs {
            path,
            importer: Some("/proj/src/main.tsx"),
            kind: ResolveKind::Import,
        }
    }

    #[tokio::test]
    async fn test_records_bare_specifiers() {
        let deps = DependencySet::default();
        let scan = plugin(&deps);
        let result = scan.on_resolve(&import("react")).await.unwrap().unwrap();
        assert!(result.external);
        scan.on_resolve(&import("lodash-es/debounce")).await.unwrap();
        assert_eq!(deps.to_vec(), vec!["lodash-es/debounce", "react"]);
    }

    #[tokio::test]
    async fn test_external_types_not_recorded() {
        let deps = DependencySet::default();
        let scan = plugin(&deps);
        for path in ["./index.css", "some-pkg/dist/style.css", "./logo.jpeg", "./App.vue"] {
            let result = scan.on_resolve(&import(path)).await.unwrap().unwrap();
            assert!(result.external);
        }
        assert!(deps.is_empty());
    }

    #[tokio::test]
    async fn test_relative_imports_fall_through() {
        let deps = DependencySet::default();
        assert!(plugin(&deps).on_resolve(&import("./App")).await.unwrap().is_none());
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = ScanPlugin::new(DependencySet::default(), &["(".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
