//! ES module lexer
//!
//! Finds the import specifiers and export names of a script module without
//! building an AST. The scan is token-level: comments, strings, template
//! literals and regular expressions are skipped so that text inside them is
//! never mistaken for module syntax, and everything else is treated as an
//! opaque token stream.
//!
//! Specifier spans point *inside* the quotes, so a caller can splice a new
//! specifier in place without touching the surrounding statement.
//!
//! The lexer is lenient where browsers are strict: an unterminated string or
//! regular expression ends at the line break (JSX text routinely contains
//! stray quotes). An unterminated block comment or template literal is
//! reported as an error, since nothing after it can be trusted. So is an
//! unterminated string used as a specifier or export name.

use crate::error::{Error, Result, SourceLocation};

/// How a specifier was referenced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import x from "a"` or `import "a"`
    Static,
    /// `import("a")`
    Dynamic,
    /// `export { x } from "a"` or `export * from "a"`
    ReExport,
}

/// One import reference found in a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecifier {
    /// Byte offset of the first character inside the quotes
    pub start: usize,
    /// Byte offset one past the last character inside the quotes
    pub end: usize,
    /// Specifier text; `None` for dynamic imports of a non-literal expression
    pub name: Option<String>,
    pub kind: ImportKind,
}

/// Import and export bindings of a module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleBindings {
    pub imports: Vec<ImportSpecifier>,
    /// Exported names in source order, `default` included
    pub exports: Vec<String>,
}

impl ModuleBindings {
    /// Whether the module uses any ES module syntax at all
    pub fn has_module_syntax(&self) -> bool {
        !self.imports.is_empty() || !self.exports.is_empty()
    }

    /// Whether the module has a default export
    pub fn has_default_export(&self) -> bool {
        self.exports.iter().any(|e| e == "default")
    }
}

/// Lex `source` and collect its module bindings
pub fn parse(source: &str) -> Result<ModuleBindings> {
    Lexer::new(source).run()
}

/// Keywords after which a `/` starts a regular expression
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await", "default",
];

/// Keywords that start a new statement after a line break
const STATEMENT_KEYWORDS: &[&str] = &[
    "import", "export", "const", "let", "var", "function", "class", "if", "for", "while", "return",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    Start,
    Punct(char),
    Keyword,
    Ident,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok<'src> {
    Ident(&'src str),
    Str { start: usize, end: usize, closed: bool },
    Template,
    Regex,
    Number,
    Punct(char),
}

struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    pos: usize,
    last: Last,
    /// Whether the whitespace skipped before the current token crossed a line break
    newline_before: bool,
    bindings: ModuleBindings,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            last: Last::Start,
            newline_before: false,
            bindings: ModuleBindings::default(),
        }
    }

    fn run(mut self) -> Result<ModuleBindings> {
        loop {
            let after_dot = self.last == Last::Punct('.');
            match self.next_token()? {
                None => break,
                Some(Tok::Ident("import")) if !after_dot => self.lex_import()?,
                Some(Tok::Ident("export")) if !after_dot => self.lex_export()?,
                Some(_) => {}
            }
        }
        Ok(self.bindings)
    }

    // ── character level ─────────────────────────────────────────────

    fn location_at(&self, offset: usize) -> SourceLocation {
        let before = &self.source[..offset.min(self.source.len())];
        let line = before.matches('\n').count() as u32 + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        SourceLocation {
            line,
            column: before[line_start..].chars().count() as u32 + 1,
            offset,
        }
    }

    fn error(&self, message: &str, offset: usize) -> Error {
        Error::parse_error_with_context(message, self.location_at(offset), self.source)
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos..).and_then(|s| s.chars().next())
    }

    fn byte_at(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    fn is_id_start(c: char) -> bool {
        c == '_' || c == '$' || unicode_xid::UnicodeXID::is_xid_start(c)
    }

    fn is_id_continue(c: char) -> bool {
        c == '_' || c == '$' || unicode_xid::UnicodeXID::is_xid_continue(c)
    }

    /// Skip whitespace and comments
    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        self.newline_before = false;
        loop {
            while let Some(c) = self.peek() {
                if c.is_whitespace() {
                    if c == '\n' {
                        self.newline_before = true;
                    }
                    self.pos += c.len_utf8();
                } else {
                    break;
                }
            }

            if self.byte_at(self.pos) == Some(b'/') {
                match self.byte_at(self.pos + 1) {
                    Some(b'/') => {
                        while let Some(b) = self.byte_at(self.pos) {
                            if b == b'\n' {
                                break;
                            }
                            self.pos += 1;
                        }
                        continue;
                    }
                    Some(b'*') => {
                        let start = self.pos;
                        match self.source[self.pos + 2..].find("*/") {
                            Some(idx) => {
                                let end = self.pos + 2 + idx + 2;
                                if self.source[self.pos..end].contains('\n') {
                                    self.newline_before = true;
                                }
                                self.pos = end;
                            }
                            None => return Err(self.error("Unterminated comment", start)),
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            return Ok(());
        }
    }

    fn scan_identifier(&mut self) -> &'src str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if Self::is_id_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        &self.source[start..self.pos]
    }

    fn scan_string(&mut self, quote: u8) -> Tok<'src> {
        let start = self.pos + 1;
        self.pos += 1;
        loop {
            match self.byte_at(self.pos) {
                None | Some(b'\n') | Some(b'\r') => {
                    return Tok::Str { start, end: self.pos, closed: false };
                }
                Some(b'\\') => self.pos = (self.pos + 2).min(self.source.len()),
                Some(b) if b == quote => {
                    self.pos += 1;
                    return Tok::Str { start, end: self.pos - 1, closed: true };
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Skip a template literal; `start` is the offset of the opening backtick
    /// and `pos` is just past it. Substitutions are lexed as tokens so nested
    /// templates and braces balance.
    fn skip_template(&mut self, start: usize) -> Result<()> {
        loop {
            match self.byte_at(self.pos) {
                None => return Err(self.error("Unterminated template literal", start)),
                Some(b'\\') => self.pos = (self.pos + 2).min(self.source.len()),
                Some(b'`') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'$') if self.byte_at(self.pos + 1) == Some(b'{') => {
                    self.pos += 2;
                    self.last = Last::Punct('{');
                    let mut depth = 0usize;
                    loop {
                        match self.next_token()? {
                            None => return Err(self.error("Unterminated template literal", start)),
                            Some(Tok::Punct('{')) => depth += 1,
                            Some(Tok::Punct('}')) if depth == 0 => break,
                            Some(Tok::Punct('}')) => depth -= 1,
                            Some(_) => {}
                        }
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn scan_regex(&mut self) {
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.byte_at(self.pos) {
                None | Some(b'\n') => return,
                Some(b'\\') => self.pos += 2,
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some(b'/') if !in_class => {
                    self.pos += 1;
                    self.scan_identifier();
                    return;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn skip_number(&mut self) {
        while let Some(b) = self.byte_at(self.pos) {
            if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn regex_allowed(&self) -> bool {
        match self.last {
            Last::Start | Last::Keyword => true,
            Last::Punct(')') | Last::Punct(']') => false,
            Last::Punct(_) => true,
            Last::Ident | Last::Value => false,
        }
    }

    // ── token level ─────────────────────────────────────────────────

    fn next_token(&mut self) -> Result<Option<Tok<'src>>> {
        self.skip_whitespace_and_comments()?;
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let tok = match c {
            '\'' | '"' => self.scan_string(c as u8),
            '`' => {
                let start = self.pos;
                self.pos += 1;
                self.skip_template(start)?;
                Tok::Template
            }
            '/' if self.regex_allowed() => {
                self.scan_regex();
                Tok::Regex
            }
            c if Self::is_id_start(c) => Tok::Ident(self.scan_identifier()),
            c if c.is_ascii_digit() => {
                self.skip_number();
                Tok::Number
            }
            c => {
                self.pos += c.len_utf8();
                Tok::Punct(c)
            }
        };
        self.last = match tok {
            Tok::Ident(word) if REGEX_KEYWORDS.contains(&word) && self.last != Last::Punct('.') => {
                Last::Keyword
            }
            Tok::Ident(_) => Last::Ident,
            Tok::Punct(c) => Last::Punct(c),
            _ => Last::Value,
        };
        Ok(Some(tok))
    }

    fn peek_token(&mut self) -> Result<Option<Tok<'src>>> {
        let saved = (self.pos, self.last, self.newline_before);
        let tok = self.next_token();
        (self.pos, self.last, self.newline_before) = saved;
        tok
    }

    /// Text of a closed string literal; an unterminated one is a parse error
    fn string_text(&self, tok: Tok<'src>) -> Result<String> {
        match tok {
            Tok::Str { start, end, closed: true } => Ok(self.source[start..end].to_string()),
            Tok::Str { start, .. } => Err(self.error("Unterminated string literal", start - 1)),
            _ => Err(self.error("Expected a string literal", self.pos)),
        }
    }

    fn push_import(&mut self, start: usize, end: usize, kind: ImportKind) -> Result<()> {
        let name = Some(self.string_text(Tok::Str { start, end, closed: true })?);
        self.bindings.imports.push(ImportSpecifier { start, end, name, kind });
        Ok(())
    }

    /// Consume `"specifier"` after `from`, if present
    fn lex_from_source(&mut self, kind: ImportKind) -> Result<()> {
        match self.peek_token()? {
            Some(Tok::Str { start, end, closed: true }) => {
                self.next_token()?;
                self.push_import(start, end, kind)?;
            }
            Some(Tok::Str { start, .. }) => {
                return Err(self.error("Unterminated string literal", start - 1));
            }
            _ => {}
        }
        Ok(())
    }

    // ── module syntax ───────────────────────────────────────────────

    fn lex_import(&mut self) -> Result<()> {
        let saved = (self.pos, self.last);
        match self.next_token()? {
            Some(Tok::Punct('(')) => {
                let expr_start = self.pos;
                match self.next_token()? {
                    Some(Tok::Str { start, end, closed: true })
                        if self.peek_token()? == Some(Tok::Punct(')')) =>
                    {
                        self.push_import(start, end, ImportKind::Dynamic)?;
                    }
                    _ => {
                        self.bindings.imports.push(ImportSpecifier {
                            start: expr_start,
                            end: expr_start,
                            name: None,
                            kind: ImportKind::Dynamic,
                        });
                    }
                }
            }
            // import.meta
            Some(Tok::Punct('.')) => {}
            Some(Tok::Str { start, end, closed: true }) => {
                self.push_import(start, end, ImportKind::Static)?;
            }
            Some(_) => {
                (self.pos, self.last) = saved;
                self.lex_import_clause()?;
            }
            None => {}
        }
        Ok(())
    }

    /// `import a, { b as c } from "x"` / `import * as ns from "x"`
    fn lex_import_clause(&mut self) -> Result<()> {
        loop {
            match self.next_token()? {
                Some(Tok::Ident("from")) => {
                    if let Some(Tok::Str { .. }) = self.peek_token()? {
                        return self.lex_from_source(ImportKind::Static);
                    }
                }
                Some(Tok::Ident(_))
                | Some(Tok::Str { .. })
                | Some(Tok::Punct('{'))
                | Some(Tok::Punct('}'))
                | Some(Tok::Punct(','))
                | Some(Tok::Punct('*')) => {}
                _ => return Ok(()),
            }
        }
    }

    fn lex_export(&mut self) -> Result<()> {
        match self.next_token()? {
            Some(Tok::Punct('*')) => {
                let mut tok = self.next_token()?;
                if tok == Some(Tok::Ident("as")) {
                    match self.next_token()? {
                        Some(Tok::Ident(name)) => self.bindings.exports.push(name.to_string()),
                        Some(tok @ Tok::Str { .. }) => {
                            let name = self.string_text(tok)?;
                            self.bindings.exports.push(name);
                        }
                        _ => return Ok(()),
                    }
                    tok = self.next_token()?;
                }
                if tok == Some(Tok::Ident("from")) {
                    self.lex_from_source(ImportKind::ReExport)?;
                }
            }
            Some(Tok::Punct('{')) => {
                self.lex_export_list()?;
                if self.peek_token()? == Some(Tok::Ident("from")) {
                    self.next_token()?;
                    self.lex_from_source(ImportKind::ReExport)?;
                }
            }
            Some(Tok::Ident(word)) => match word {
                "default" => self.bindings.exports.push("default".to_string()),
                "var" | "let" | "const" => self.lex_declarations()?,
                "function" | "class" | "enum" => self.lex_declared_name()?,
                "async" => {
                    if self.peek_token()? == Some(Tok::Ident("function")) {
                        self.next_token()?;
                        self.lex_declared_name()?;
                    }
                }
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    /// `{ a, b as c, d as default }` after the opening brace
    fn lex_export_list(&mut self) -> Result<()> {
        loop {
            let local = match self.next_token()? {
                Some(Tok::Punct('}')) | None => return Ok(()),
                Some(Tok::Punct(',')) => continue,
                Some(Tok::Ident(name)) => name.to_string(),
                Some(tok @ Tok::Str { .. }) => self.string_text(tok)?,
                Some(_) => return Ok(()),
            };

            // `export { type Foo }` exports nothing at runtime
            if local == "type" {
                if let Some(Tok::Ident(next)) = self.peek_token()? {
                    if next != "as" {
                        self.next_token()?;
                        continue;
                    }
                }
            }

            let exported = if self.peek_token()? == Some(Tok::Ident("as")) {
                self.next_token()?;
                match self.next_token()? {
                    Some(Tok::Ident(name)) => name.to_string(),
                    Some(tok @ Tok::Str { .. }) => self.string_text(tok)?,
                    _ => return Ok(()),
                }
            } else {
                local
            };
            self.bindings.exports.push(exported);
        }
    }

    /// `function* name`, `class Name`, `enum Name`
    fn lex_declared_name(&mut self) -> Result<()> {
        let mut tok = self.next_token()?;
        if tok == Some(Tok::Punct('*')) {
            tok = self.next_token()?;
        }
        if let Some(Tok::Ident(name)) = tok {
            self.bindings.exports.push(name.to_string());
        }
        Ok(())
    }

    /// `const a = 1, { b, c: d } = obj, [e] = arr`
    fn lex_declarations(&mut self) -> Result<()> {
        loop {
            match self.next_token()? {
                Some(Tok::Ident(name)) => self.bindings.exports.push(name.to_string()),
                Some(Tok::Punct('{')) | Some(Tok::Punct('[')) => self.lex_binding_pattern()?,
                _ => return Ok(()),
            }
            if self.peek_token()? == Some(Tok::Punct('=')) {
                self.next_token()?;
                self.skip_initializer()?;
            }
            if self.peek_token()? == Some(Tok::Punct(',')) {
                self.next_token()?;
            } else {
                return Ok(());
            }
        }
    }

    /// Collect binding names from a destructuring pattern; the opening
    /// bracket has been consumed
    fn lex_binding_pattern(&mut self) -> Result<()> {
        let mut depth = 1usize;
        loop {
            match self.next_token()? {
                None => return Ok(()),
                Some(Tok::Punct('{')) | Some(Tok::Punct('[')) => depth += 1,
                Some(Tok::Punct('}')) | Some(Tok::Punct(']')) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(Tok::Punct('=')) => self.skip_initializer()?,
                Some(Tok::Ident(name)) => {
                    if self.peek_token()? == Some(Tok::Punct(':')) {
                        self.next_token()?;
                    } else {
                        self.bindings.exports.push(name.to_string());
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Skip an initializer expression up to (not including) the `,`, `;` or
    /// closing bracket that ends it
    fn skip_initializer(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let Some(tok) = self.peek_token()? else {
                return Ok(());
            };
            match tok {
                Tok::Punct('(') | Tok::Punct('[') | Tok::Punct('{') => depth += 1,
                Tok::Punct(')') | Tok::Punct(']') | Tok::Punct('}') => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                Tok::Punct(',') | Tok::Punct(';') if depth == 0 => return Ok(()),
                Tok::Ident(word) if depth == 0 => {
                    // peek_token restored state; measure the gap ourselves
                    let saved = (self.pos, self.last);
                    self.skip_whitespace_and_comments()?;
                    let crossed_line = self.newline_before;
                    (self.pos, self.last) = saved;
                    if crossed_line && STATEMENT_KEYWORDS.contains(&word) {
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.next_token()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(source: &str) -> Vec<String> {
        parse(source)
            .unwrap()
            .imports
            .into_iter()
            .filter_map(|i| i.name)
            .collect()
    }

    #[test]
    fn test_static_imports() {
        let src = r#"
            import React from 'react';
            import { useState, useEffect as effect } from "react";
            import * as utils from './utils';
            import './index.css';
            import App, { helper } from "./App";
        "#;
        assert_eq!(
            names(src),
            vec!["react", "react", "./utils", "./index.css", "./App"]
        );
    }

    #[test]
    fn test_specifier_span_is_inside_quotes() {
        let src = "import a from './a.js';";
        let bindings = parse(src).unwrap();
        let imp = &bindings.imports[0];
        assert_eq!(&src[imp.start..imp.end], "./a.js");
        assert_eq!(imp.kind, ImportKind::Static);
    }

    #[test]
    fn test_dynamic_imports() {
        let src = "const m = await import('./lazy.js');\nconst n = import(name);";
        let bindings = parse(src).unwrap();
        assert_eq!(bindings.imports.len(), 2);
        assert_eq!(bindings.imports[0].name.as_deref(), Some("./lazy.js"));
        assert_eq!(bindings.imports[0].kind, ImportKind::Dynamic);
        assert_eq!(bindings.imports[1].name, None);
    }

    #[test]
    fn test_import_meta_is_not_an_import() {
        let bindings = parse("console.log(import.meta.url); import.meta.hot.accept();").unwrap();
        assert!(bindings.imports.is_empty());
    }

    #[test]
    fn test_ignores_strings_comments_templates_and_regex() {
        let src = r#"
            // import x from 'commented';
            /* export const y = 1; import z from "block"; */
            const s = "import a from 'in-string'";
            const t = `template ${ "import b from 'c'" } export default`;
            const r = /import d from 'regex'/g;
            obj.import('not-a-dynamic-import');
        "#;
        let bindings = parse(src).unwrap();
        assert!(bindings.imports.is_empty());
        assert!(bindings.exports.is_empty());
    }

    #[test]
    fn test_exports() {
        let src = r#"
            export const a = 1, b = { x: [1, 2] };
            export let { c, d: e, ...rest } = obj;
            export function f() {}
            export async function g() {}
            export function* h() {}
            export class K {}
            export { i, j as jj, k as default };
        "#;
        let bindings = parse(src).unwrap();
        assert_eq!(
            bindings.exports,
            vec!["a", "b", "c", "e", "rest", "f", "g", "h", "K", "i", "jj", "default"]
        );
        assert!(bindings.has_default_export());
    }

    #[test]
    fn test_reexports() {
        let src = r#"
            export * from './all';
            export * as ns from "./ns";
            export { x, y as z } from './pick';
        "#;
        let bindings = parse(src).unwrap();
        let kinds: Vec<_> = bindings.imports.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![ImportKind::ReExport; 3]);
        assert_eq!(bindings.exports, vec!["ns", "x", "z"]);
    }

    #[test]
    fn test_export_default_expression() {
        let bindings = parse("export default function () { return 1 }").unwrap();
        assert_eq!(bindings.exports, vec!["default"]);
    }

    #[test]
    fn test_commonjs_has_no_module_syntax() {
        let src = "'use strict';\nmodule.exports = { foo: 1, bar: 2 };\nexports.baz = require('./baz');";
        let bindings = parse(src).unwrap();
        assert!(!bindings.has_module_syntax());
    }

    #[test]
    fn test_jsx_with_apostrophe() {
        let src = "import React from 'react';\nconst el = <p>Don't stop</p>;\nexport default el;";
        let bindings = parse(src).unwrap();
        assert_eq!(names(src), vec!["react"]);
        assert_eq!(bindings.exports, vec!["default"]);
    }

    #[test]
    fn test_unterminated_template_is_error() {
        let err = parse("import a from 'a';\nconst t = `oops").unwrap_err();
        match err {
            Error::Parse { location, .. } => {
                assert_eq!(location.line, 2);
                assert_eq!(location.column, 11);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unterminated_comment_is_error() {
        assert!(matches!(parse("/* never closed"), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_unterminated_string_at_eof_is_error() {
        for src in [
            "export { \"a\\",
            "export { a as \"b\\",
            "export * as \"ns\\",
            "export * as \"ns",
            "import x from 'a\\",
            "export { a } from \"./a",
        ] {
            assert!(matches!(parse(src), Err(Error::Parse { .. })), "{src:?}");
        }
    }

    #[test]
    fn test_trailing_backslash_does_not_overrun() {
        let err = parse("import a from 'a';\nexport { \"b\\").unwrap_err();
        match err {
            Error::Parse { location, .. } => {
                assert_eq!(location.line, 2);
                assert_eq!(location.column, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        // unterminated string in ordinary code is skipped
        assert_eq!(names("import a from './a';\nconst s = 'x\\"), vec!["./a"]);
        assert!(parse("const t = `x\\").is_err());
    }

    #[test]
    fn test_initializer_ends_at_statement_keyword() {
        let src = "export const a = value\nimport b from './b'";
        let bindings = parse(src).unwrap();
        assert_eq!(bindings.exports, vec!["a"]);
        assert_eq!(names(src), vec!["./b"]);
    }

    #[test]
    fn test_typescript_type_only_export() {
        let bindings = parse("export { type Props, App }").unwrap();
        assert_eq!(bindings.exports, vec!["App"]);
    }
}
