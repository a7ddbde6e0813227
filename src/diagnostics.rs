use crate::{
    language::{compiler::CompileError, errors::SyntaxError, synth::SynthError},
    runtime::error::RuntimeError,
};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct SyntaxDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{message}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
}

impl SyntaxDiagnostic {
    pub fn from_error(src: NamedSource<String>, err: SyntaxError) -> Self {
        Self {
            src,
            span: err.to_source_span(),
            help: err.help,
            message: err.message,
        }
    }
}

pub fn report_syntax_error(name: &str, source: &str, err: SyntaxError) {
    let src = NamedSource::new(name, source.to_string());
    eprintln!("{:?}", Report::new(SyntaxDiagnostic::from_error(src, err)));
}

pub fn report_compile_error(path: &Path, err: CompileError) {
    log::error!(
        "failed to compile {} ({}:{}): {}",
        path.display(),
        err.line,
        err.column,
        err.message
    );
    eprintln!("{:?}", Report::new(err));
}

pub fn report_synth_error(err: SynthError) {
    log::error!("container synthesis failed: {err}");
    eprintln!("{:?}", Report::new(err));
}

pub fn report_runtime_error(error: &RuntimeError) {
    eprintln!("Runtime error: {}", error);
}

pub fn report_io_error(path: &Path, error: &std::io::Error) {
    eprintln!("Failed to access {}: {}", path.display(), error);
}
