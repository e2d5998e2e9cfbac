//! Source file management.

use std::fmt;
use std::sync::Arc;

use crate::span::Span;

/// Line and column information for a position in a source file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LineCol {
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed column number (in UTF-8 bytes).
    pub column: u32,
}

impl LineCol {
    #[inline]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A source file with its content and a line-start index.
#[derive(Clone)]
pub struct SourceFile {
    name: Arc<str>,
    source: Arc<str>,
    /// Byte offsets of line starts (0-indexed). The first element is always 0.
    line_starts: Vec<u32>,
}

impl SourceFile {
    pub fn new(name: impl Into<Arc<str>>, source: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        let source = source.into();
        let line_starts = Self::compute_line_starts(&source);
        Self {
            name,
            source,
            line_starts,
        }
    }

    fn compute_line_starts(source: &str) -> Vec<u32> {
        let mut starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                starts.push((i + 1) as u32);
            }
        }
        starts
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Converts a byte offset to line/column.
    pub fn line_col(&self, offset: u32) -> LineCol {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };
        let line_start = self.line_starts[line];
        LineCol {
            line: (line + 1) as u32,
            column: offset.saturating_sub(line_start) + 1,
        }
    }

    /// Source text covered by a span.
    pub fn span_text(&self, span: Span) -> &str {
        let start = (span.start as usize).min(self.source.len());
        let end = (span.end as usize).min(self.source.len());
        &self.source[start..end]
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("len", &self.source.len())
            .field("lines", &self.line_starts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col() {
        let file = SourceFile::new("test.claw", "abc\ndefgh\nij");
        assert_eq!(file.line_col(0), LineCol::new(1, 1));
        assert_eq!(file.line_col(2), LineCol::new(1, 3));
        assert_eq!(file.line_col(4), LineCol::new(2, 1));
        assert_eq!(file.line_col(7), LineCol::new(2, 4));
        assert_eq!(file.line_col(10), LineCol::new(3, 1));
    }

    #[test]
    fn test_span_text() {
        let file = SourceFile::new("test.claw", "hello world");
        assert_eq!(file.span_text(Span::new(0, 5)), "hello");
        assert_eq!(file.span_text(Span::new(6, 11)), "world");
    }

    #[test]
    fn test_empty_file() {
        let file = SourceFile::new("empty.claw", "");
        assert_eq!(file.line_count(), 1);
        assert_eq!(file.line_col(0), LineCol::new(1, 1));
    }
}
