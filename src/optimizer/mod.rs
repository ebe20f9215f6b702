//! Dependency pre-bundling
//!
//! Runs once at startup, before the first request:
//!
//! 1. **Scan**: a resolution-only build from the configured entries records
//!    every bare specifier in the shared [`DependencySet`].
//! 2. **Pre-bundle**: a second build turns each recorded dependency into a
//!    single ES module under `node_modules/.quickdev/`, through proxy entries
//!    produced by [`PreBundlePlugin`].
//!
//! Import analysis later rewrites bare specifiers that are in the set to the
//! pre-bundled URLs. A dependency whose exports cannot be probed is skipped
//! with a warning; its imports then fall through to normal resolution.

pub mod bundler;
pub mod cjs;
pub mod pre_bundle;
pub mod scan;

pub use bundler::{
    BuildOptions, BuildOutput, Bundler, BundlerPlugin, EsbuildBundler, Loader, OnLoadArgs,
    OnLoadResult, OnResolveArgs, OnResolveResult, ResolveKind, TransformOutput,
};
pub use pre_bundle::PreBundlePlugin;
pub use scan::ScanPlugin;

use crate::error::Result;
use crate::server::ServerContext;
use crate::utils::normalize_path;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Bare specifiers found by the scan, shared by the optimizer and import
/// analysis. Cloning shares the underlying set.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl DependencySet {
    pub fn insert(&self, specifier: &str) -> bool {
        self.inner.write().insert(specifier.to_string())
    }

    pub fn contains(&self, specifier: &str) -> bool {
        self.inner.read().contains(specifier)
    }

    pub fn remove(&self, specifier: &str) -> bool {
        self.inner.write().remove(specifier)
    }

    /// Sorted snapshot
    pub fn to_vec(&self) -> Vec<String> {
        self.inner.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// What a pre-bundle run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeSummary {
    pub dependencies: Vec<String>,
    pub outputs: Vec<PathBuf>,
    pub skipped: Vec<String>,
}

/// Scan the entries and pre-bundle every dependency found
pub async fn optimize(server: &ServerContext) -> Result<OptimizeSummary> {
    let started = Instant::now();
    let config = &server.config;

    let mut entry_points = Vec::new();
    for entry in &config.entries {
        let path = config.root.join(entry);
        if path.is_file() {
            entry_points.push(normalize_path(&path.to_string_lossy()));
        } else {
            warn!(entry = %entry, "scan entry not found");
        }
    }
    if entry_points.is_empty() {
        return Ok(OptimizeSummary::default());
    }

    let scan = ScanPlugin::new(server.deps.clone(), &config.external_types)?;
    server
        .bundler
        .build(BuildOptions {
            entry_points,
            plugins: vec![Arc::new(scan)],
            write: false,
            outdir: None,
            root: config.root.clone(),
            splitting: false,
        })
        .await?;

    let dependencies = server.deps.to_vec();
    info!(count = dependencies.len(), deps = ?dependencies, "dependency scan finished");
    if dependencies.is_empty() {
        return Ok(OptimizeSummary::default());
    }

    let pre_bundle = PreBundlePlugin::new(server.deps.clone(), server.resolver.clone());
    let output = server
        .bundler
        .build(BuildOptions {
            entry_points: dependencies.clone(),
            plugins: vec![Arc::new(pre_bundle)],
            write: true,
            outdir: Some(config.pre_bundle_dir()),
            root: config.root.clone(),
            splitting: true,
        })
        .await?;

    // skipped dependencies are served through normal resolution
    for skipped in &output.skipped {
        server.deps.remove(skipped);
    }
    info!(
        bundled = output.outputs.len(),
        skipped = output.skipped.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "dependencies pre-bundled"
    );

    Ok(OptimizeSummary {
        dependencies,
        outputs: output.outputs,
        skipped: output.skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_set_is_shared_and_sorted() {
        let deps = DependencySet::default();
        let alias = deps.clone();
        assert!(alias.insert("react"));
        assert!(alias.insert("lodash-es"));
        assert!(!deps.insert("react"));
        assert_eq!(deps.to_vec(), vec!["lodash-es", "react"]);
        assert!(deps.remove("react"));
        assert!(!alias.contains("react"));
        assert_eq!(alias.len(), 1);
    }
}
