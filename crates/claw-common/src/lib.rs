//! # claw-common
//!
//! Shared infrastructure for the Claw language:
//! - `Span` and line/column mapping over source text
//! - `ErrorCode` - stable numeric error codes
//! - `Diagnostic` collection and terminal rendering

pub mod diag;
pub mod source;
pub mod span;

pub use diag::{Diagnostic, Diagnostics, ErrorCode};
pub use source::{LineCol, SourceFile};
pub use span::Span;
