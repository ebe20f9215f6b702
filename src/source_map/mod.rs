//! Source Map V3 model and a splice buffer for surgical rewrites
//!
//! Import analysis edits a module by replacing a handful of specifier spans
//! and prepending a preamble. [`SpliceBuffer`] records those edits against
//! the untouched source and can emit both the rewritten text and a
//! [`SourceMap`] whose segments cover the unchanged chunks and the replaced
//! spans, without re-printing the module.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE64_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const VLQ_BASE_SHIFT: u8 = 5;
const VLQ_BASE: i64 = 1 << VLQ_BASE_SHIFT;
const VLQ_BASE_MASK: i64 = VLQ_BASE - 1;
const VLQ_CONTINUATION_BIT: i64 = VLQ_BASE;

fn base64_decode_char(c: u8) -> Option<i64> {
    BASE64_CHARS.iter().position(|&b| b == c).map(|i| i as i64)
}

/// Encode an integer as a Base64 VLQ string.
///
/// Bit 0 carries the sign; the magnitude follows in 5-bit groups, low
/// group first, with bit 5 set on every group but the last.
pub fn vlq_encode(value: i64) -> String {
    let mut out = String::new();
    let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = vlq & VLQ_BASE_MASK;
        vlq >>= VLQ_BASE_SHIFT;
        if vlq > 0 {
            digit |= VLQ_CONTINUATION_BIT;
        }
        out.push(BASE64_CHARS[digit as usize] as char);
        if vlq == 0 {
            return out;
        }
    }
}

/// Decode a run of Base64 VLQ values (one mapping segment)
pub fn vlq_decode(input: &str) -> Vec<i64> {
    let mut values = Vec::new();
    let mut value = 0i64;
    let mut shift = 0u32;
    for digit in input.bytes().filter_map(base64_decode_char) {
        value += (digit & VLQ_BASE_MASK) << shift;
        if digit & VLQ_CONTINUATION_BIT != 0 {
            shift += VLQ_BASE_SHIFT as u32;
            continue;
        }
        let magnitude = value >> 1;
        values.push(if value & 1 == 1 { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }
    values
}

/// V3 source map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sources: Vec<String>,
    #[serde(rename = "sourcesContent", skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let map: SourceMap = serde_json::from_str(json)?;
        if map.version != 3 {
            return Err(Error::Internal(format!(
                "unsupported source map version: {}",
                map.version
            )));
        }
        Ok(map)
    }

    /// Decode `mappings` into `(generated_line, generated_column, original_line, original_column)`
    /// tuples, all 0-based. Segments without a source position are skipped.
    pub fn decoded(&self) -> Vec<(u32, u32, u32, u32)> {
        let mut out = Vec::new();
        let (mut orig_line, mut orig_col) = (0i64, 0i64);
        for (line, segments) in self.mappings.split(';').enumerate() {
            let mut gen_col = 0i64;
            for segment in segments.split(',').filter(|s| !s.is_empty()) {
                let fields = vlq_decode(segment);
                let Some(&col) = fields.first() else {
                    continue;
                };
                gen_col += col;
                if fields.len() >= 4 {
                    orig_line += fields[2];
                    orig_col += fields[3];
                    out.push((line as u32, gen_col as u32, orig_line as u32, orig_col as u32));
                }
            }
        }
        out
    }
}

/// One mapping segment, 0-based
#[derive(Debug, Clone, Copy)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    pub source: u32,
    pub original_line: u32,
    pub original_column: u32,
}

/// Incremental source map construction
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    file: Option<String>,
    sources: Vec<String>,
    sources_content: Vec<Option<String>>,
    lines: Vec<Vec<Mapping>>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_file(&mut self, file: &str) {
        self.file = Some(file.to_string());
    }

    /// Add a source file and return its index
    pub fn add_source(&mut self, source: &str, content: Option<&str>) -> u32 {
        if let Some(idx) = self.sources.iter().position(|s| s == source) {
            return idx as u32;
        }
        self.sources.push(source.to_string());
        self.sources_content.push(content.map(str::to_string));
        (self.sources.len() - 1) as u32
    }

    pub fn add_mapping(&mut self, mapping: Mapping) {
        let line = mapping.generated_line as usize;
        if self.lines.len() <= line {
            self.lines.resize_with(line + 1, Vec::new);
        }
        self.lines[line].push(mapping);
    }

    pub fn build(mut self) -> SourceMap {
        for line in &mut self.lines {
            line.sort_by_key(|m| m.generated_column);
            line.dedup_by_key(|m| m.generated_column);
        }

        let mut mappings = String::new();
        let (mut prev_source, mut prev_line, mut prev_col) = (0i64, 0i64, 0i64);
        for (idx, line) in self.lines.iter().enumerate() {
            if idx > 0 {
                mappings.push(';');
            }
            let mut prev_gen_col = 0i64;
            for (seg, m) in line.iter().enumerate() {
                if seg > 0 {
                    mappings.push(',');
                }
                mappings.push_str(&vlq_encode(m.generated_column as i64 - prev_gen_col));
                mappings.push_str(&vlq_encode(m.source as i64 - prev_source));
                mappings.push_str(&vlq_encode(m.original_line as i64 - prev_line));
                mappings.push_str(&vlq_encode(m.original_column as i64 - prev_col));
                prev_gen_col = m.generated_column as i64;
                prev_source = m.source as i64;
                prev_line = m.original_line as i64;
                prev_col = m.original_column as i64;
            }
        }

        let sources_content = self
            .sources_content
            .iter()
            .any(Option::is_some)
            .then_some(self.sources_content);

        SourceMap {
            version: 3,
            file: self.file,
            sources: self.sources,
            sources_content,
            names: Vec::new(),
            mappings,
        }
    }
}

#[derive(Debug, Clone)]
struct Splice {
    start: usize,
    end: usize,
    text: String,
}

/// Records span replacements and a prefix over an unchanged source
#[derive(Debug, Clone)]
pub struct SpliceBuffer<'src> {
    original: &'src str,
    intro: String,
    splices: Vec<Splice>,
}

impl<'src> SpliceBuffer<'src> {
    pub fn new(original: &'src str) -> Self {
        Self {
            original,
            intro: String::new(),
            splices: Vec::new(),
        }
    }

    /// Insert `text` before everything previously prepended
    pub fn prepend(&mut self, text: &str) -> &mut Self {
        self.intro.insert_str(0, text);
        self
    }

    /// Replace the original bytes `start..end` with `text`
    pub fn overwrite(&mut self, start: usize, end: usize, text: &str) -> Result<&mut Self> {
        if start >= end || end > self.original.len() {
            return Err(Error::Internal(format!(
                "invalid splice range {}..{} (source length {})",
                start,
                end,
                self.original.len()
            )));
        }
        if !self.original.is_char_boundary(start) || !self.original.is_char_boundary(end) {
            return Err(Error::Internal(format!(
                "splice range {}..{} splits a character",
                start, end
            )));
        }
        let idx = self.splices.partition_point(|s| s.start < start);
        let overlaps_prev = idx > 0 && self.splices[idx - 1].end > start;
        let overlaps_next = self.splices.get(idx).is_some_and(|s| s.start < end);
        if overlaps_prev || overlaps_next {
            return Err(Error::Internal(format!(
                "splice range {}..{} overlaps an earlier edit",
                start, end
            )));
        }
        self.splices.insert(
            idx,
            Splice {
                start,
                end,
                text: text.to_string(),
            },
        );
        Ok(self)
    }

    pub fn has_changed(&self) -> bool {
        !self.intro.is_empty() || !self.splices.is_empty()
    }

    /// Map the edited text back onto `source_name`.
    ///
    /// The prefix is unmapped; each unchanged chunk gets a segment at its
    /// start and at every line start inside it; each replacement gets one
    /// segment pointing at the start of the span it replaced.
    pub fn generate_map(&self, source_name: &str) -> SourceMap {
        let mut builder = SourceMapBuilder::new();
        builder.set_file(source_name);
        let source = builder.add_source(source_name, Some(self.original));
        let lines = LineIndex::new(self.original);
        let mut out = Cursor::default();
        out.advance(&self.intro);

        let emit_chunk = |builder: &mut SourceMapBuilder, out: &mut Cursor, from: usize, to: usize| {
            let mut at = from;
            for piece in self.original[from..to].split_inclusive('\n') {
                if piece != "\n" {
                    let (line, column) = lines.position(self.original, at);
                    builder.add_mapping(Mapping {
                        generated_line: out.line,
                        generated_column: out.column,
                        source,
                        original_line: line,
                        original_column: column,
                    });
                }
                out.advance(piece);
                at += piece.len();
            }
        };

        let mut cursor = 0;
        for splice in &self.splices {
            emit_chunk(&mut builder, &mut out, cursor, splice.start);
            let (line, column) = lines.position(self.original, splice.start);
            builder.add_mapping(Mapping {
                generated_line: out.line,
                generated_column: out.column,
                source,
                original_line: line,
                original_column: column,
            });
            out.advance(&splice.text);
            cursor = splice.end;
        }
        emit_chunk(&mut builder, &mut out, cursor, self.original.len());

        builder.build()
    }
}

impl fmt::Display for SpliceBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.intro)?;
        let mut cursor = 0;
        for splice in &self.splices {
            f.write_str(&self.original[cursor..splice.start])?;
            f.write_str(&splice.text)?;
            cursor = splice.end;
        }
        f.write_str(&self.original[cursor..])
    }
}

/// Generated position, columns in UTF-16 units
#[derive(Debug, Default)]
struct Cursor {
    line: u32,
    column: u32,
}

impl Cursor {
    fn advance(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += c.len_utf16() as u32;
            }
        }
    }
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn position(&self, source: &str, offset: usize) -> (u32, u32) {
        let line = self.starts.partition_point(|&s| s <= offset) - 1;
        let column: usize = source[self.starts[line]..offset].chars().map(char::len_utf16).sum();
        (line as u32, column as u32)
    }
}
