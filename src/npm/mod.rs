//! Node-style package resolution
//!
//! Used by the resolve plugin for bare and relative specifiers, and by the
//! pre-bundle proxy to find the file behind each dependency.

pub mod package_json;
pub mod resolver;

pub use package_json::{PackageExports, PackageJson};
pub use resolver::ModuleResolver;
