//! Diagnostics with stable error codes.

use std::fmt;

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term;
use termcolor::{ColorChoice, StandardStream};
use thiserror::Error;

use crate::source::SourceFile;
use crate::span::Span;

/// Stable numeric error codes. The wire-visible form is `E<code>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum ErrorCode {
    /// Reported by the parser.
    Syntax = 1001,
    /// Operand types incompatible with an operation.
    TypeMismatch = 2001,
    /// Called value is not a function, closure, or class.
    NotCallable = 2002,
    /// Index operation on a non-array/map.
    NotIndexable = 2003,
    /// Global lookup miss.
    UndefinedVariable = 3001,
    /// Division by zero.
    DivisionByZero = 4001,
    /// Array index negative or past the end.
    IndexOutOfBounds = 4002,
    /// Frame or value stack exhausted.
    StackOverflow = 4003,
    /// Arity violation on a user or native call.
    ArityMismatch = 4007,
}

impl ErrorCode {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", *self as u32)
    }
}

/// A single reported problem with its source location.
#[derive(Clone, Debug, Error)]
#[error("[{code}] line {line}, col {column}: {message}")]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    pub span: Span,
    pub line: u32,
    pub column: u32,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>, span: Span, line: u32, column: u32) -> Self {
        Self {
            code,
            message: message.into(),
            span,
            line,
            column,
        }
    }
}

/// Accumulated diagnostics for one compilation.
#[derive(Default, Debug)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    #[inline]
    pub fn has_errors(&self) -> bool {
        !self.items.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Render every diagnostic with source context to stderr.
    pub fn emit(&self, file: &SourceFile) {
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        let cs_file = SimpleFile::new(file.name().to_string(), file.source().to_string());
        for diag in &self.items {
            let cs = CsDiagnostic::error()
                .with_code(diag.code.to_string())
                .with_message(&diag.message)
                .with_labels(vec![Label::primary(
                    (),
                    diag.span.start as usize..diag.span.end as usize,
                )]);
            // Rendering failure only loses the pretty output, not the diagnostic.
            let _ = term::emit(&mut writer.lock(), &config, &cs_file, &cs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Syntax.to_string(), "E1001");
        assert_eq!(ErrorCode::TypeMismatch.to_string(), "E2001");
        assert_eq!(ErrorCode::ArityMismatch.to_string(), "E4007");
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::new(
            ErrorCode::UndefinedVariable,
            "Undefined variable 'x'.",
            Span::new(4, 5),
            2,
            7,
        );
        assert_eq!(
            d.to_string(),
            "[E3001] line 2, col 7: Undefined variable 'x'."
        );
    }

    #[test]
    fn test_collection() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());
        diags.push(Diagnostic::new(
            ErrorCode::Syntax,
            "Expected ';'.",
            Span::DUMMY,
            1,
            1,
        ));
        assert!(diags.has_errors());
        assert_eq!(diags.len(), 1);
    }
}
