//! Lexical CommonJS export detection
//!
//! Pre-bundling needs the named exports of CommonJS packages without
//! executing them. The probe recognises the assignment shapes compilers and
//! hand-written packages emit:
//!
//! - `exports.foo = …` and `module.exports.foo = …`
//! - `exports["foo"] = …`
//! - `Object.defineProperty(exports, "foo", …)`
//! - `module.exports = { foo, bar: …, baz() {} }`
//! - `module.exports = require("./impl")` and `__exportStar(require("./x"), exports)`,
//!   followed to the target file

use crate::error::{Error, Result};
use crate::npm::ModuleResolver;
use crate::utils::is_bare_import;
use regex::Regex;
use rustc_hash::FxHashSet as HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// Re-export chains longer than this are cut off
const MAX_REEXPORT_DEPTH: usize = 8;

/// Names that never become named exports of a proxy
const RESERVED: &[&str] = &["default", "__esModule"];

struct Patterns {
    dotted: Regex,
    bracket: Regex,
    define: Regex,
    object: Regex,
    reexport: Regex,
    star: Regex,
    spread: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        dotted: Regex::new(r"(?:^|[^.\w$])(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=(?:[^=]|$)")
            .expect("static regex"),
        bracket: Regex::new(r#"(?:^|[^.\w$])(?:module\.)?exports\[\s*["']([^"']+)["']\s*\]\s*=(?:[^=]|$)"#)
            .expect("static regex"),
        define: Regex::new(
            r#"Object\.defineProperty\(\s*(?:module\.)?exports\s*,\s*["']([^"']+)["']"#,
        )
        .expect("static regex"),
        object: Regex::new(r"(?:^|[^.\w$])module\.exports\s*=\s*\{").expect("static regex"),
        reexport: Regex::new(r#"(?:^|[^.\w$])module\.exports\s*=\s*require\(\s*["']([^"']+)["']\s*\)"#)
            .expect("static regex"),
        star: Regex::new(
            r#"__export(?:Star)?\(\s*require\(\s*["']([^"']+)["']\s*\)"#,
        )
        .expect("static regex"),
        spread: Regex::new(r#"^\.\.\.\s*require\(\s*["']([^"']+)["']\s*\)"#).expect("static regex"),
    })
}

/// What a single file contributes
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CjsAnalysis {
    pub exports: Vec<String>,
    pub reexports: Vec<String>,
}

impl CjsAnalysis {
    fn add_export(&mut self, name: &str) {
        if is_identifier(name) && !RESERVED.contains(&name) && !self.exports.iter().any(|e| e == name) {
            self.exports.push(name.to_string());
        }
    }
}

/// Analyse one CommonJS source text
pub fn analyze(source: &str) -> CjsAnalysis {
    let p = patterns();
    let mut analysis = CjsAnalysis::default();

    // (offset, name) so exports come out in source order
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [&p.dotted, &p.bracket, &p.define] {
        for caps in re.captures_iter(source) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.as_str().to_string()));
            }
        }
    }
    for m in p.object.find_iter(source) {
        let body_start = m.end();
        for (offset, key) in object_literal_keys(source, body_start) {
            found.push((offset, key));
        }
        analysis.reexports.extend(object_literal_spreads(source, body_start));
    }
    found.sort_by_key(|(offset, _)| *offset);
    for (_, name) in &found {
        analysis.add_export(name);
    }

    for re in [&p.reexport, &p.star] {
        for caps in re.captures_iter(source) {
            if let Some(m) = caps.get(1) {
                analysis.reexports.push(m.as_str().to_string());
            }
        }
    }
    analysis
}

/// Named exports of the CommonJS module at `path`, following re-exports.
///
/// Fails with a probe error when the entry file cannot be read.
pub fn cjs_exports(path: &str, resolver: &ModuleResolver) -> Result<Vec<String>> {
    let mut visited: HashSet<String> = HashSet::default();
    let mut exports = Vec::new();
    collect(path, resolver, 0, &mut visited, &mut exports)?;
    Ok(exports)
}

fn collect(
    path: &str,
    resolver: &ModuleResolver,
    depth: usize,
    visited: &mut HashSet<String>,
    out: &mut Vec<String>,
) -> Result<()> {
    if depth > MAX_REEXPORT_DEPTH || !visited.insert(path.to_string()) {
        return Ok(());
    }
    let source = std::fs::read_to_string(path).map_err(|e| Error::probe_error(path, e))?;
    let analysis = analyze(&source);
    for name in analysis.exports {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    for specifier in analysis.reexports {
        let target = if is_bare_import(&specifier) {
            let dir = Path::new(path).parent().unwrap_or(resolver.root());
            resolver.resolve_bare(&specifier, dir)
        } else {
            resolver.resolve_relative(&specifier, path)
        };
        // unresolvable re-exports contribute nothing
        if let Some(target) = target {
            collect(&target, resolver, depth + 1, visited, out)?;
        }
    }
    Ok(())
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || unicode_xid::UnicodeXID::is_xid_start(c) => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || unicode_xid::UnicodeXID::is_xid_continue(c))
}

/// Walk a `{ … }` literal whose body begins at `start`, calling `f` with the
/// offset and text of each top-level entry
fn for_each_entry(source: &str, start: usize, mut f: impl FnMut(usize, &str)) {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut entry_start = start;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => {
                if depth == 0 {
                    f(entry_start, &source[entry_start..i]);
                    return;
                }
                depth -= 1;
            }
            b',' if depth == 0 => {
                f(entry_start, &source[entry_start..i]);
                entry_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
}

fn object_literal_keys(source: &str, start: usize) -> Vec<(usize, String)> {
    let mut keys = Vec::new();
    for_each_entry(source, start, |offset, entry| {
        let trimmed = strip_comments(entry);
        let trimmed = trimmed.trim();
        if trimmed.is_empty() || trimmed.starts_with("...") {
            return;
        }
        let trimmed = trimmed
            .strip_prefix("async ")
            .or_else(|| trimmed.strip_prefix("get "))
            .or_else(|| trimmed.strip_prefix("set "))
            .unwrap_or(trimmed)
            .trim_start();
        let key = if let Some(rest) = trimmed.strip_prefix(['"', '\'']) {
            rest.split(['"', '\'']).next().unwrap_or("")
        } else {
            let end = trimmed
                .find(|c: char| !(c == '$' || c == '_' || c.is_alphanumeric()))
                .unwrap_or(trimmed.len());
            &trimmed[..end]
        };
        if !key.is_empty() {
            keys.push((offset, key.to_string()));
        }
    });
    keys
}

/// `...require("./x")` entries of an exports object literal
fn object_literal_spreads(source: &str, start: usize) -> Vec<String> {
    let mut spreads = Vec::new();
    for_each_entry(source, start, |_, entry| {
        if let Some(m) = patterns().spread.captures(entry.trim()).and_then(|caps| caps.get(1)) {
            spreads.push(m.as_str().to_string());
        }
    });
    spreads
}

fn strip_comments(entry: &str) -> String {
    let mut out = String::with_capacity(entry.len());
    let mut rest = entry;
    loop {
        let line = rest.find("//").map(|pos| (pos, false));
        let block = rest.find("/*").map(|pos| (pos, true));
        match line.into_iter().chain(block).min_by_key(|(pos, _)| *pos) {
            None => {
                out.push_str(rest);
                return out;
            }
            Some((pos, false)) => {
                out.push_str(&rest[..pos]);
                match rest[pos..].find('\n') {
                    Some(nl) => rest = &rest[pos + nl..],
                    None => return out,
                }
            }
            Some((pos, true)) => {
                out.push_str(&rest[..pos]);
                match rest[pos + 2..].find("*/") {
                    Some(end) => rest = &rest[pos + 2 + end + 2..],
                    None => return out,
                }
            }
        }
    }
}
