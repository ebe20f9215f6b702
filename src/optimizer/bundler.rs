//! External bundler seam
//!
//! The optimizer never bundles anything itself. It drives a [`Bundler`]
//! with [`BundlerPlugin`]s that intercept resolution and loading, the same
//! shape esbuild's plugin API has.
//!
//! [`EsbuildBundler`] is the production host:
//!
//! - **scan builds** (`write: false`) walk the import graph in-process,
//!   running plugin `on_resolve` for every specifier; nothing is emitted.
//! - **write builds** run plugin hooks for each entry, write the resulting
//!   proxy modules to a scratch directory and hand them to the `esbuild`
//!   executable in one code-split invocation.
//! - **transforms** pipe a single module through `esbuild --loader=…`.

use crate::config::DEFAULT_EXTENSIONS;
use crate::error::{Error, Result};
use crate::lexer;
use crate::npm::ModuleResolver;
use crate::utils::{extension, is_bare_import, normalize_path};
use async_trait::async_trait;
use rustc_hash::FxHashSet as HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Namespace of modules read from disk
pub const FILE_NAMESPACE: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Css,
}

impl Loader {
    /// Loader for a file extension; unknown extensions are plain scripts
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jsx" => Loader::Jsx,
            "ts" | "mts" | "cts" => Loader::Ts,
            "tsx" => Loader::Tsx,
            "css" => Loader::Css,
            _ => Loader::Js,
        }
    }

    pub fn for_path(path: &str) -> Self {
        extension(path).map_or(Loader::Js, |ext| Self::from_extension(&ext))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Loader::Js => "js",
            Loader::Jsx => "jsx",
            Loader::Ts => "ts",
            Loader::Tsx => "tsx",
            Loader::Css => "css",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    EntryPoint,
    Import,
}

#[derive(Debug, Clone, Copy)]
pub struct OnResolveArgs<'a> {
    pub path: &'a str,
    pub importer: Option<&'a str>,
    pub kind: ResolveKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnResolveResult {
    pub path: String,
    pub external: bool,
    pub namespace: String,
}

impl OnResolveResult {
    pub fn external(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            external: true,
            namespace: FILE_NAMESPACE.to_string(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            external: false,
            namespace: FILE_NAMESPACE.to_string(),
        }
    }

    pub fn in_namespace(path: impl Into<String>, namespace: &str) -> Self {
        Self {
            path: path.into(),
            external: false,
            namespace: namespace.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OnLoadArgs<'a> {
    pub path: &'a str,
    pub namespace: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnLoadResult {
    pub contents: String,
    pub loader: Loader,
    pub resolve_dir: Option<PathBuf>,
}

/// Resolution and load interception, after esbuild's plugin API
#[async_trait]
pub trait BundlerPlugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn on_resolve(&self, _args: &OnResolveArgs<'_>) -> Result<Option<OnResolveResult>> {
        Ok(None)
    }

    async fn on_load(&self, _args: &OnLoadArgs<'_>) -> Result<Option<OnLoadResult>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub entry_points: Vec<String>,
    pub plugins: Vec<Arc<dyn BundlerPlugin>>,
    /// Emit artifacts; `false` runs resolution only
    pub write: bool,
    pub outdir: Option<PathBuf>,
    /// Working directory for resolution and the bundler process
    pub root: PathBuf,
    pub splitting: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Written artifacts, one per surviving entry
    pub outputs: Vec<PathBuf>,
    /// Entries skipped because a plugin could not probe them
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
}

/// A whole-program bundler invoked as a black box
#[async_trait]
pub trait Bundler: Send + Sync + fmt::Debug {
    async fn build(&self, options: BuildOptions) -> Result<BuildOutput>;

    /// Compile one module (TypeScript, JSX) to plain ES modules
    async fn transform(&self, code: &str, loader: Loader, sourcefile: &str) -> Result<TransformOutput>;
}

/// Run `on_resolve` across plugins; first answer wins
async fn plugin_resolve(
    plugins: &[Arc<dyn BundlerPlugin>],
    args: &OnResolveArgs<'_>,
) -> Result<Option<OnResolveResult>> {
    for plugin in plugins {
        if let Some(result) = plugin.on_resolve(args).await? {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

/// Run `on_load` across plugins; first answer wins
async fn plugin_load(
    plugins: &[Arc<dyn BundlerPlugin>],
    args: &OnLoadArgs<'_>,
) -> Result<Option<OnLoadResult>> {
    for plugin in plugins {
        if let Some(result) = plugin.on_load(args).await? {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

/// Drives the `esbuild` executable
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    command: String,
}

impl EsbuildBundler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn default_resolve(resolver: &ModuleResolver, specifier: &str, importer: &str) -> Option<String> {
        if specifier.starts_with('.') {
            resolver.resolve_relative(specifier, importer)
        } else if specifier.starts_with('/') {
            resolver.resolve_absolute(specifier)
        } else if is_bare_import(specifier) {
            let dir = Path::new(importer).parent().unwrap_or(resolver.root());
            resolver.resolve_bare(specifier, dir)
        } else {
            None
        }
    }

    /// Walk every module reachable from the entries, letting plugins see
    /// each specifier. Unreadable or unlexable modules are skipped.
    async fn scan(&self, options: &BuildOptions) -> Result<BuildOutput> {
        let resolver = ModuleResolver::new(&options.root, DEFAULT_EXTENSIONS);
        let mut visited: HashSet<String> = HashSet::default();
        let mut queue: Vec<String> = Vec::new();

        for entry in &options.entry_points {
            let args = OnResolveArgs {
                path: entry,
                importer: None,
                kind: ResolveKind::EntryPoint,
            };
            match plugin_resolve(&options.plugins, &args).await? {
                Some(r) if r.external => {}
                Some(r) => queue.push(r.path),
                None => queue.push(normalize_path(entry)),
            }
        }

        while let Some(path) = queue.pop() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let load_args = OnLoadArgs {
                path: &path,
                namespace: FILE_NAMESPACE,
            };
            let (contents, loader) = match plugin_load(&options.plugins, &load_args).await? {
                Some(loaded) => (loaded.contents, loaded.loader),
                None => match tokio::fs::read_to_string(&path).await {
                    Ok(contents) => (contents, Loader::for_path(&path)),
                    Err(e) => {
                        warn!(path = %path, error = %e, "scan: cannot read module");
                        continue;
                    }
                },
            };
            if loader == Loader::Css {
                continue;
            }
            let bindings = match lexer::parse(&contents) {
                Ok(bindings) => bindings,
                Err(e) => {
                    warn!(path = %path, error = %e, "scan: cannot lex module");
                    continue;
                }
            };

            for specifier in bindings.imports.iter().filter_map(|i| i.name.as_deref()) {
                let args = OnResolveArgs {
                    path: specifier,
                    importer: Some(&path),
                    kind: ResolveKind::Import,
                };
                match plugin_resolve(&options.plugins, &args).await? {
                    Some(r) if r.external => {}
                    Some(r) => queue.push(r.path),
                    None => match Self::default_resolve(&resolver, specifier, &path) {
                        Some(resolved) => queue.push(resolved),
                        None => debug!(specifier, importer = %path, "scan: unresolved import"),
                    },
                }
            }
        }

        Ok(BuildOutput::default())
    }

    /// Produce one proxy per entry via the plugins, then bundle them all
    async fn write(&self, options: &BuildOptions) -> Result<BuildOutput> {
        let outdir = options
            .outdir
            .clone()
            .ok_or_else(|| Error::Bundler("write build needs an outdir".to_string()))?;
        let scratch = outdir.join(".proxy");
        tokio::fs::create_dir_all(&scratch).await?;

        let mut output = BuildOutput::default();
        let mut entry_args = Vec::new();

        for (i, entry) in options.entry_points.iter().enumerate() {
            match self.proxy_entry(options, entry).await {
                Ok(loaded) => {
                    let ext = match loaded.loader {
                        Loader::Css => "css",
                        other => other.as_str(),
                    };
                    let proxy = scratch.join(format!("{}.{}", i, ext));
                    tokio::fs::write(&proxy, loaded.contents).await?;
                    entry_args.push(format!("{}={}", entry, normalize_path(&proxy.to_string_lossy())));
                    output.outputs.push(outdir.join(format!("{}.js", entry)));
                }
                Err(e) if e.is_dependency_probe() => {
                    warn!(dependency = %entry, error = %e, "skipping dependency");
                    output.skipped.push(entry.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if !entry_args.is_empty() {
            let mut cmd = Command::new(&self.command);
            cmd.args(&entry_args)
                .arg("--bundle")
                .arg("--format=esm")
                .arg("--log-level=warning")
                .arg(format!("--outdir={}", outdir.display()));
            if options.splitting {
                cmd.arg("--splitting");
            }
            cmd.current_dir(&options.root);
            debug!(command = %self.command, entries = entry_args.len(), "running bundler");

            let result = cmd.output().await.map_err(|e| {
                Error::Bundler(format!("failed to start '{}': {}", self.command, e))
            })?;
            if !result.status.success() {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return Err(Error::Bundler(String::from_utf8_lossy(&result.stderr).into_owned()));
            }
        }

        let _ = tokio::fs::remove_dir_all(&scratch).await;
        Ok(output)
    }

    async fn proxy_entry(&self, options: &BuildOptions, entry: &str) -> Result<OnLoadResult> {
        let args = OnResolveArgs {
            path: entry,
            importer: None,
            kind: ResolveKind::EntryPoint,
        };
        let resolved = plugin_resolve(&options.plugins, &args)
            .await?
            .unwrap_or_else(|| OnResolveResult::file(entry));
        let load_args = OnLoadArgs {
            path: &resolved.path,
            namespace: &resolved.namespace,
        };
        match plugin_load(&options.plugins, &load_args).await? {
            Some(loaded) => Ok(loaded),
            None => {
                let contents = tokio::fs::read_to_string(&resolved.path)
                    .await
                    .map_err(|e| Error::probe_error(entry, e))?;
                Ok(OnLoadResult {
                    loader: Loader::for_path(&resolved.path),
                    contents,
                    resolve_dir: None,
                })
            }
        }
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn build(&self, options: BuildOptions) -> Result<BuildOutput> {
        if options.write {
            self.write(&options).await
        } else {
            self.scan(&options).await
        }
    }

    async fn transform(&self, code: &str, loader: Loader, sourcefile: &str) -> Result<TransformOutput> {
        let mut child = Command::new(&self.command)
            .arg(format!("--loader={}", loader.as_str()))
            .arg("--format=esm")
            .arg("--target=esnext")
            .arg(format!("--sourcefile={}", sourcefile))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Bundler(format!("failed to start '{}': {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
        }
        let result = child.wait_with_output().await?;
        if !result.status.success() {
            return Err(Error::transform_error(
                sourcefile,
                String::from_utf8_lossy(&result.stderr).trim(),
            ));
        }
        Ok(TransformOutput {
            code: String::from_utf8_lossy(&result.stdout).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::tempdir;

    #[derive(Debug, Default)]
    struct Seen(Mutex<Vec<(String, Option<String>)>>);

    #[async_trait]
    impl BundlerPlugin for Seen {
        fn name(&self) -> &str {
            "seen"
        }

        async fn on_resolve(&self, args: &OnResolveArgs<'_>) -> Result<Option<OnResolveResult>> {
            self.0
                .lock()
                .push((args.path.to_string(), args.importer.map(str::to_string)));
            if is_bare_import(args.path) && args.importer.is_some() {
                return Ok(Some(OnResolveResult::external(args.path)));
            }
            Ok(None)
        }
    }

    #[test]
    fn test_loader_for_path() {
        assert_eq!(Loader::for_path("/a/b.tsx"), Loader::Tsx);
        assert_eq!(Loader::for_path("/a/b.mjs"), Loader::Js);
        assert_eq!(Loader::for_path("/a/b.css"), Loader::Css);
        assert_eq!(Loader::for_path("/a/b"), Loader::Js);
    }

    #[tokio::test]
    async fn test_scan_walks_relative_imports_and_reports_bare_ones() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.tsx"), "import React from 'react';\nimport App from './App';\n").unwrap();
        fs::write(src.join("App.tsx"), "import { debounce } from 'lodash-es';\nexport default 1;\n").unwrap();

        let seen = Arc::new(Seen::default());
        let options = BuildOptions {
            entry_points: vec![normalize_path(&src.join("main.tsx").to_string_lossy())],
            plugins: vec![seen.clone()],
            write: false,
            outdir: None,
            root: dir.path().to_path_buf(),
            splitting: false,
        };
        let out = EsbuildBundler::new("esbuild").build(options).await.unwrap();
        assert!(out.outputs.is_empty());

        let specifiers: Vec<String> = seen.0.lock().iter().map(|(p, _)| p.clone()).collect();
        assert!(specifiers.contains(&"react".to_string()));
        assert!(specifiers.contains(&"./App".to_string()));
        assert!(specifiers.contains(&"lodash-es".to_string()));
    }

    #[tokio::test]
    async fn test_write_build_requires_outdir() {
        let options = BuildOptions {
            entry_points: vec!["react".to_string()],
            plugins: vec![],
            write: true,
            outdir: None,
            root: PathBuf::from("."),
            splitting: true,
        };
        let err = EsbuildBundler::new("esbuild").build(options).await.unwrap_err();
        assert!(matches!(err, Error::Bundler(_)));
    }
}
