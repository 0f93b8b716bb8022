//! Diagnostic collection and rendering shared by the parser and the code
//! generator.
//!
//! Both stages report through this type rather than panicking or
//! returning an ad hoc error string, so the driver has one place to print
//! from regardless of which stage failed. Closure conversion has no
//! fallible paths of its own -- every nested-function reference it rewrites
//! was already resolved by the parser -- so it never constructs one.

mod message;
mod printer;

#[cfg(test)]
mod tests;

pub use message::Severity;
pub use printer::DiagnosticsPrinter;

use message::DiagnosticMessage;

/// A half-open byte range into the source text being diagnosed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn point(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }
}

/// Collection of diagnostic messages from one stage's pass over one
/// top-level form.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    messages: Vec<DiagnosticMessage>,
}

/// Builder for a single diagnostic, so the caller cannot forget to emit it
/// (see the `#[must_use]` below).
#[must_use = "diagnostic not emitted, call .emit()"]
pub struct DiagnosticBuilder<'a> {
    diagnostics: &'a mut Diagnostics,
    message: DiagnosticMessage,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, msg: impl Into<String>, span: Span) -> DiagnosticBuilder<'_> {
        DiagnosticBuilder {
            diagnostics: self,
            message: DiagnosticMessage::new(Severity::Error, msg.into(), span),
        }
    }

    pub fn warning(&mut self, msg: impl Into<String>, span: Span) -> DiagnosticBuilder<'_> {
        DiagnosticBuilder {
            diagnostics: self,
            message: DiagnosticMessage::new(Severity::Warning, msg.into(), span),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.severity == Severity::Error)
            .count()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.messages.extend(other.messages);
    }

    pub fn printer<'a>(&'a self, source: &'a str) -> DiagnosticsPrinter<'a> {
        DiagnosticsPrinter::new(&self.messages, source)
    }
}

impl<'a> DiagnosticBuilder<'a> {
    pub fn emit(self) {
        self.diagnostics.messages.push(self.message);
    }
}
