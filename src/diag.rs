//! The append-only diagnostic sink described in spec.md §7.
//!
//! Non-fatal diagnostics (syntax/semantic/evaluation/assemble-path format
//! errors, and all warnings) flow here rather than through a `Result`.
//! Fatal errors (§7) instead unwind as [`crate::AsmError`] / [`crate::DisasmError`].

use std::fmt;

use crate::pos::PositionChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub pos: PositionChain,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.pos, self.severity, self.message)
    }
}

/// Single-writer, append-only diagnostic stream.
///
/// Ordering guarantee (spec.md §5): diagnostics are emitted in source
/// order because the driver only ever pushes to the tail as it walks the
/// input; nothing here reorders or buffers out of order.
#[derive(Debug, Default)]
pub struct Sink {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl Sink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, pos: PositionChain, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic { pos, severity: Severity::Warning, message: message.into() });
    }

    pub fn error(&mut self, pos: PositionChain, message: impl Into<String>) {
        self.error_count += 1;
        self.diagnostics.push(Diagnostic { pos, severity: Severity::Error, message: message.into() });
    }

    /// The `good` return value from spec.md §7: false once any error was
    /// emitted, regardless of how many warnings preceded it.
    #[must_use]
    pub fn good(&self) -> bool {
        self.error_count == 0
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::{FileId, PositionChain, SourcePos};

    fn pos() -> PositionChain {
        PositionChain::root(SourcePos::new(FileId(0), 1, 1))
    }

    #[test]
    fn good_flips_to_false_after_first_error() {
        let mut sink = Sink::new();
        assert!(sink.good());
        sink.warn(pos(), "just a warning");
        assert!(sink.good());
        sink.error(pos(), "broke");
        assert!(!sink.good());
        assert_eq!(sink.error_count(), 1);
    }
}
