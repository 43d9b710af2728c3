//! Single-error diagnostics.
//!
//! The pipeline is fail-fast: each stage reports the first problem it
//! finds and stops, so a diagnostic is just one message anchored to a
//! span. Rendering against the source happens once, at the facade.

use crate::span::{Span, line_col};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            message: message.into(),
            span,
        }
    }

    /// Resolve this diagnostic's span start to a 1-based line/column
    /// pair against the source it was produced from.
    pub fn position(&self, source: &str) -> (u32, u32) {
        let lc = line_col(source, self.span.start);
        (lc.line, lc.col)
    }
}
