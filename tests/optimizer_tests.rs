//! Dependency scan and pre-bundling

mod common;

use common::{id, Project, RecordingBundler};
use pretty_assertions::assert_eq;
use quickdev::optimizer::optimize;
use quickdev::server::transform_request;
use std::sync::Arc;

fn react_app() -> Project {
    Project::new()
        .file(
            "src/main.tsx",
            "import { createElement } from 'react';\nimport App from './App';\nimport './index.css';\nimport 'broken-pkg';\ncreateElement(App);\n",
        )
        .file(
            "src/App.tsx",
            "import { debounce } from 'lodash-es';\nimport logo from './logo.svg';\nexport default function App() { return debounce(logo); }\n",
        )
        .file("src/index.css", "body {}\n")
        .file("src/logo.svg", "<svg></svg>")
        .file("node_modules/react/package.json", r#"{ "name": "react", "main": "index.js" }"#)
        .file(
            "node_modules/react/index.js",
            "exports.useState = function () {};\nexports.createElement = function () {};\n",
        )
        .file("node_modules/lodash-es/package.json", r#"{ "name": "lodash-es", "module": "lodash.js" }"#)
        .file(
            "node_modules/lodash-es/lodash.js",
            "export default {};\nexport const debounce = (f) => f;\n",
        )
        // installed but has no entry file
        .file("node_modules/broken-pkg/package.json", r#"{ "name": "broken-pkg" }"#)
}

#[tokio::test]
async fn test_scan_finds_bare_imports_only() {
    let project = react_app();
    let bundler = Arc::new(RecordingBundler::default());
    let server = project.server_with_bundler(bundler.clone());

    let summary = optimize(&server).await.unwrap();
    assert_eq!(summary.dependencies, vec!["broken-pkg", "lodash-es", "react"]);
    assert_eq!(bundler.builds(), (1, 1));
}

#[tokio::test]
async fn test_pre_bundle_proxies() {
    let project = react_app();
    let bundler = Arc::new(RecordingBundler::default());
    let server = project.server_with_bundler(bundler.clone());
    optimize(&server).await.unwrap();

    let react = id(&server, "node_modules/react/index.js");
    assert_eq!(
        bundler.proxy("react").unwrap(),
        format!(
            "export {{ useState,createElement }} from \"{0}\"\nexport default require(\"{0}\")",
            react
        )
    );

    let lodash = id(&server, "node_modules/lodash-es/lodash.js");
    assert_eq!(
        bundler.proxy("lodash-es").unwrap(),
        format!(
            "import d from \"{0}\";export default d\nexport * from \"{0}\"",
            lodash
        )
    );
}

#[tokio::test]
async fn test_unprobeable_dependency_is_skipped() {
    let project = react_app();
    let bundler = Arc::new(RecordingBundler::default());
    let server = project.server_with_bundler(bundler.clone());

    let summary = optimize(&server).await.unwrap();
    assert_eq!(summary.skipped, vec!["broken-pkg"]);
    assert_eq!(summary.outputs.len(), 2);
    assert!(bundler.proxy("broken-pkg").is_none());
    assert_eq!(server.deps.to_vec(), vec!["lodash-es", "react"]);

    // import analysis now rewrites the survivors and leaves the rest alone
    let main = transform_request(&server, "/src/main.tsx").await.unwrap().unwrap();
    assert!(main.code.contains("from '/node_modules/.quickdev/react.js';"));
    assert!(main.code.contains("import 'broken-pkg';"));
    assert!(main.code.contains("from '/src/App.tsx';"));
}

#[tokio::test]
async fn test_missing_entries_skip_both_builds() {
    let project = Project::new().file("src/other.ts", "import 'react';\n");
    let bundler = Arc::new(RecordingBundler::default());
    let server = project.server_with_bundler(bundler.clone());

    let summary = optimize(&server).await.unwrap();
    assert!(summary.dependencies.is_empty());
    assert_eq!(bundler.builds(), (0, 0));
}

#[tokio::test]
async fn test_no_dependencies_skips_write_build() {
    let project = Project::new().file("src/main.tsx", "import './App';\n").file("src/App.tsx", "export {};\n");
    let bundler = Arc::new(RecordingBundler::default());
    let server = project.server_with_bundler(bundler.clone());

    let summary = optimize(&server).await.unwrap();
    assert!(summary.dependencies.is_empty());
    assert_eq!(bundler.builds(), (1, 0));
}
