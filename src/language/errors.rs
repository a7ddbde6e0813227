use crate::language::span::Span;
use miette::SourceSpan;
use thiserror::Error;

/// A reader or template-header failure, located by byte span in its source text.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn to_source_span(&self) -> SourceSpan {
        self.span.into()
    }

    /// `line:column: message` against the text the span indexes into.
    pub fn describe(&self, source: &str) -> String {
        let (line, column) = self.span.line_col(source);
        format!("{line}:{column}: {}", self.message)
    }
}
