//! Error types for the quickdev development server

use std::fmt;
use thiserror::Error;

/// Source location in a script module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
    /// Byte offset in source
    pub offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Format a source context with caret pointer for errors
pub fn format_error_context(source: &str, location: &SourceLocation) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let line_idx = (location.line.saturating_sub(1)) as usize;

    if line_idx >= lines.len() {
        return String::new();
    }

    let mut result = String::new();
    let line_num_width = format!("{}", location.line + 1).len().max(3);

    if line_idx > 0 {
        result.push_str(&format!(
            "{:>width$} | {}\n",
            location.line - 1,
            lines[line_idx - 1],
            width = line_num_width
        ));
    }

    result.push_str(&format!(
        "{:>width$} | {}\n",
        location.line,
        lines[line_idx],
        width = line_num_width
    ));

    let pointer_offset = (location.column.saturating_sub(1)) as usize;
    result.push_str(&format!(
        "{:>width$} | {}^\n",
        "",
        " ".repeat(pointer_offset),
        width = line_num_width
    ));

    if line_idx + 1 < lines.len() {
        result.push_str(&format!(
            "{:>width$} | {}\n",
            location.line + 1,
            lines[line_idx + 1],
            width = line_num_width
        ));
    }

    result
}

/// Plugin hook names, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    ConfigureServer,
    ResolveId,
    Load,
    Transform,
    TransformMarkup,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::ConfigureServer => write!(f, "configureServer"),
            Hook::ResolveId => write!(f, "resolveId"),
            Hook::Load => write!(f, "load"),
            Hook::Transform => write!(f, "transform"),
            Hook::TransformMarkup => write!(f, "transformMarkup"),
        }
    }
}

/// Main error type for quickdev
#[derive(Error, Debug)]
pub enum Error {
    /// A plugin hook failed; the request that triggered it is aborted
    #[error("[{plugin}] {hook} failed for '{id}': {source}")]
    Plugin {
        plugin: String,
        hook: Hook,
        id: String,
        #[source]
        source: Box<Error>,
    },

    /// A specifier could not be resolved where resolution is mandatory
    #[error("ResolveError: cannot resolve '{specifier}'{}", importer.as_ref().map(|i| format!(" from '{}'", i)).unwrap_or_default())]
    Resolve {
        specifier: String,
        importer: Option<String>,
    },

    /// Reading a module's source failed
    #[error("LoadError: {id}: {message}")]
    Load { id: String, message: String },

    /// Transforming a module failed
    #[error("TransformError: {id}: {message}")]
    Transform { id: String, message: String },

    /// Module lexing failed
    #[error("SyntaxError: {message} at {location}{}", if source_context.is_empty() { String::new() } else { format!("\n{}", source_context) })]
    Parse {
        message: String,
        location: SourceLocation,
        source_context: String,
    },

    /// A single dependency could not be probed for its exports during pre-bundling
    #[error("DependencyProbeError: {dependency}: {message}")]
    DependencyProbe { dependency: String, message: String },

    /// The external bundler failed or could not be started
    #[error("BundlerError: {0}")]
    Bundler(String),

    /// The update channel failed (connect, send, or fetching an update)
    #[error("ChannelError: {0}")]
    Channel(String),

    /// Invalid configuration
    #[error("ConfigError: {0}")]
    Config(String),

    /// IO error
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization error
    #[error("JSONError: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// Internal invariant violation
    #[error("InternalError: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new parse error with source context
    pub fn parse_error_with_context(
        message: impl Into<String>,
        location: SourceLocation,
        source: &str,
    ) -> Self {
        Error::Parse {
            message: message.into(),
            source_context: format_error_context(source, &location),
            location,
        }
    }

    /// Create a load error
    pub fn load_error(id: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Load {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// Create a transform error
    pub fn transform_error(id: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Transform {
            id: id.into(),
            message: message.to_string(),
        }
    }

    /// Create a dependency probe error
    pub fn probe_error(dependency: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::DependencyProbe {
            dependency: dependency.into(),
            message: message.to_string(),
        }
    }

    /// Attribute this error to a plugin hook
    pub fn in_plugin(self, plugin: &str, hook: Hook, id: &str) -> Self {
        Error::Plugin {
            plugin: plugin.to_string(),
            hook,
            id: id.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through plugin attribution
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Plugin { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this failure should skip a dependency instead of aborting pre-bundling
    pub fn is_dependency_probe(&self) -> bool {
        matches!(self.root_cause(), Error::DependencyProbe { .. })
    }
}

/// Result type alias for quickdev
pub type Result<T> = std::result::Result<T, Error>;
