//! Diagnostics for the pl2 platform.
//!
//! Provides [`Diagnostic`], [`Severity`], [`SourceInfo`], and [`Span`] types
//! used to report errors and warnings from the parser, the loader, and the
//! dispatch engine. Numeric codes live in the [`codes`] module.

#![warn(missing_docs)]

/// Numeric diagnostic codes.
pub mod codes;

pub use codes::ErrorCode;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maximum length in bytes of a diagnostic message.
///
/// Longer messages are truncated on a character boundary. The same bound
/// applies to the reason buffer exchanged with native backends.
pub const REASON_CAPACITY: usize = 512;

// ── SourceInfo ───────────────────────────────────────────────────────────

/// A source location: file name plus 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Name of the source file (shared by every command parsed from it).
    pub file: Arc<str>,
    /// 1-based line number. `0` means "no particular line".
    pub line: u32,
}

impl SourceInfo {
    /// Create a source location.
    pub fn new(file: impl Into<Arc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

// ── Span ─────────────────────────────────────────────────────────────────

/// Byte span in the source input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Span {
    /// Byte offset of the first character (0-based).
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

impl Span {
    /// Create a span covering `[start, end)`.
    ///
    /// Panics if `end < start`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(end >= start, "Span end ({end}) < start ({start})");
        Self { start, end }
    }

    /// Create a zero-width span at the given position.
    pub fn empty(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

// ── Severity ─────────────────────────────────────────────────────────────

/// Severity level for a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Severity {
    /// Hard error: parsing or execution stops.
    Error,
    /// Warning: execution continues.
    Warn,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warn => write!(f, "warn"),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic produced by the parser, the loader, the engine, or a backend.
///
/// This is the platform's error value: every fallible operation reports
/// failure through one of these, never by unwinding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Numeric code.
    pub code: ErrorCode,
    /// Severity level.
    pub severity: Severity,
    /// Human-readable message, at most [`REASON_CAPACITY`] bytes.
    pub message: String,
    /// Where the problem was found, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
    /// Byte span in the source text, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    /// Caller-defined extra data. Keys and values are free-form strings.
    ///
    /// Uses `BTreeMap` for deterministic key ordering in serialized output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, String>>,
}

impl Diagnostic {
    /// Create a diagnostic with the given fields.
    pub fn new(code: ErrorCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: truncate_reason(message.into()),
            source: None,
            span: None,
            context: None,
        }
    }

    /// Shorthand for an `Error` diagnostic.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, message)
    }

    /// Shorthand for a `Warn` diagnostic.
    pub fn warn(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warn, message)
    }

    /// Attach a source location (builder pattern).
    pub fn at(mut self, source: SourceInfo) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a byte span (builder pattern).
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach machine-readable context metadata (builder pattern).
    pub fn with_context(mut self, ctx: BTreeMap<String, String>) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Line number of the source location, or `0` when unknown.
    pub fn line(&self) -> u32 {
        self.source.as_ref().map_or(0, |s| s.line)
    }

    /// Whether this diagnostic stops parsing or execution.
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }

    /// Returns the human-readable explanation for this diagnostic's code, if available.
    pub fn explain(&self) -> Option<&'static str> {
        self.code.explain()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]: ", self.severity, self.code)?;
        if let Some(source) = &self.source {
            write!(f, "line {}: ", source.line)?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Truncate a message to [`REASON_CAPACITY`] bytes on a character boundary.
pub fn truncate_reason(mut message: String) -> String {
    if message.len() > REASON_CAPACITY {
        let mut end = REASON_CAPACITY;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
