use super::message::{DiagnosticMessage, Severity};
use annotate_snippets::{AnnotationKind, Group, Level, Renderer, Snippet};
use std::fmt;

/// Renders a batch of diagnostics against the source they were raised
/// from. `Display`-able so the driver can just write it to stderr.
pub struct DiagnosticsPrinter<'a> {
    messages: &'a [DiagnosticMessage],
    source: &'a str,
}

impl<'a> DiagnosticsPrinter<'a> {
    pub fn new(messages: &'a [DiagnosticMessage], source: &'a str) -> Self {
        Self { messages, source }
    }
}

fn level(severity: Severity) -> Level<'static> {
    match severity {
        Severity::Error => Level::ERROR,
        Severity::Warning => Level::WARNING,
    }
}

fn clamped_span(span: super::Span, limit: usize) -> std::ops::Range<usize> {
    if span.start == span.end {
        return span.start..(span.start + 1).min(limit);
    }
    span.start..span.end
}

impl<'a> fmt::Display for DiagnosticsPrinter<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let renderer = Renderer::plain();
        for msg in self.messages {
            let range = clamped_span(msg.span, self.source.len());
            let snippet = Snippet::source(self.source)
                .line_start(1)
                .annotation(AnnotationKind::Primary.span(range).label(&msg.text));
            let title_group = level(msg.severity).primary_title(&msg.text).element(snippet);
            let report: Vec<Group> = vec![title_group];
            writeln!(f, "{}", renderer.render(&report))?;
        }
        Ok(())
    }
}
