//! Shared test helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use quickdev::optimizer::{
    BuildOptions, BuildOutput, Bundler, EsbuildBundler, Loader, OnLoadArgs, OnResolveArgs,
    OnResolveResult, ResolveKind, TransformOutput,
};
use quickdev::plugins::{builtin_plugins, Plugin, PluginContext, TransformResult};
use quickdev::{Result, ServerConfig, ServerContext};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A project directory on disk
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Write `contents` to `rel`, creating parent directories
    pub fn file(self, rel: &str, contents: &str) -> Self {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
        self
    }

    pub fn config(&self) -> ServerConfig {
        let mut config = ServerConfig {
            root: self.dir.path().to_path_buf(),
            entries: vec!["src/main.tsx".to_string()],
            optimize_deps: false,
            ..ServerConfig::default()
        };
        config.normalize().unwrap();
        config
    }

    /// Server with the built-in plugins, plus `extra` after them
    pub fn server(&self, extra: Vec<Arc<dyn Plugin>>) -> Arc<ServerContext> {
        let mut plugins = builtin_plugins();
        plugins.extend(extra);
        ServerContext::new(self.config(), plugins).unwrap()
    }

    pub fn server_with_bundler(&self, bundler: Arc<dyn Bundler>) -> Arc<ServerContext> {
        ServerContext::with_bundler(self.config(), builtin_plugins(), bundler).unwrap()
    }
}

/// Absolute id of `rel` under the server root
pub fn id(server: &ServerContext, rel: &str) -> String {
    format!("{}/{}", server.root, rel)
}

/// Counts how often the transform pipeline runs, per id
#[derive(Debug, Default)]
pub struct TransformCounter {
    calls: Mutex<BTreeMap<String, usize>>,
}

impl TransformCounter {
    pub fn count(&self, id: &str) -> usize {
        self.calls.lock().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Plugin for TransformCounter {
    fn name(&self) -> &str {
        "test:counter"
    }

    async fn transform(
        &self,
        _ctx: &PluginContext<'_>,
        _code: &str,
        id: &str,
    ) -> Result<Option<TransformResult>> {
        *self.calls.lock().entry(id.to_string()).or_default() += 1;
        Ok(None)
    }
}

/// Scans in-process like the real bundler, but records write builds
/// instead of spawning a bundler executable
#[derive(Debug, Default)]
pub struct RecordingBundler {
    /// Proxy module produced for each entry of a write build
    pub proxies: Mutex<BTreeMap<String, String>>,
    pub write_builds: AtomicUsize,
    pub scan_builds: AtomicUsize,
    pub transforms: AtomicUsize,
}

impl RecordingBundler {
    pub fn proxy(&self, entry: &str) -> Option<String> {
        self.proxies.lock().get(entry).cloned()
    }

    pub fn builds(&self) -> (usize, usize) {
        (
            self.scan_builds.load(Ordering::SeqCst),
            self.write_builds.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl Bundler for RecordingBundler {
    async fn build(&self, options: BuildOptions) -> Result<BuildOutput> {
        if !options.write {
            self.scan_builds.fetch_add(1, Ordering::SeqCst);
            return EsbuildBundler::new("esbuild").build(options).await;
        }
        self.write_builds.fetch_add(1, Ordering::SeqCst);

        let outdir = options.outdir.clone().unwrap_or_else(|| PathBuf::from("out"));
        let mut output = BuildOutput::default();
        'entries: for entry in &options.entry_points {
            let args = OnResolveArgs {
                path: entry,
                importer: None,
                kind: ResolveKind::EntryPoint,
            };
            let mut resolved = OnResolveResult::file(entry.clone());
            for plugin in &options.plugins {
                if let Some(r) = plugin.on_resolve(&args).await? {
                    resolved = r;
                    break;
                }
            }
            let load = OnLoadArgs {
                path: &resolved.path,
                namespace: &resolved.namespace,
            };
            for plugin in &options.plugins {
                match plugin.on_load(&load).await {
                    Ok(Some(loaded)) => {
                        self.proxies.lock().insert(entry.clone(), loaded.contents);
                        output.outputs.push(outdir.join(format!("{}.js", entry)));
                        continue 'entries;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_dependency_probe() => {
                        output.skipped.push(entry.clone());
                        continue 'entries;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(output)
    }

    async fn transform(&self, code: &str, _loader: Loader, _sourcefile: &str) -> Result<TransformOutput> {
        self.transforms.fetch_add(1, Ordering::SeqCst);
        Ok(TransformOutput {
            code: code.to_string(),
        })
    }
}
