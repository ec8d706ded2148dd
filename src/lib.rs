//! The solum compiler
//!
//! Source text goes through a fixed pipeline:
//! [parsing] → [analysis] → [lowering] → [codegen].
//! Every stage collects its own diagnostics and keeps going, so one run reports as many
//! independent problems as possible. [compile] drives the whole pipeline.

use std::fmt;
use std::time::{Duration, Instant};

use miette::{Diagnostic, NamedSource, Severity};
use thiserror::Error;

pub mod analysis;
pub mod ast;
pub mod builtin;
pub mod codegen;
pub mod ir;
pub mod lowering;
pub mod parsing;
pub mod util;
pub mod vm;

pub use analysis::{build_global_scope, AnalysisError};
pub use codegen::emit;
pub use lowering::{lower, LoweringError};
pub use parsing::{parse, ParsingError};
pub use util::{Ident, Span};

/// Built-in scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
            PrimitiveType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A diagnostic from any stage of the pipeline
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum SolumError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parsing(#[from] ParsingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lowering(#[from] LoweringError),
}

impl SolumError {
    pub fn is_fatal(&self) -> bool {
        self.severity().unwrap_or(Severity::Error) != Severity::Warning
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("Could not compile `{name}`")]
pub struct CompileFailure {
    pub name: String,

    #[related]
    pub errs: Vec<SolumError>,

    #[source_code]
    pub src: NamedSource<String>,
}

/// Result of a successful compilation
#[derive(Debug)]
pub struct Compilation {
    pub program: ir::IrProgram,
    pub assembly: String,
    /// Non-fatal diagnostics
    pub warnings: Vec<SolumError>,
    /// Wall time spent in each stage
    pub timings: Vec<(&'static str, Duration)>,
}

/// Run the full pipeline on one source file
///
/// `name` only labels diagnostics. All stages run even when an earlier one reported errors;
/// compilation fails if any diagnostic is fatal.
#[tracing::instrument(level = "debug", skip(source))]
pub fn compile(name: &str, source: &str) -> Result<Compilation, CompileFailure> {
    let mut timings = Vec::new();

    let start = Instant::now();
    let parsed = parsing::parse(source);
    timings.push(("parse", start.elapsed()));

    let start = Instant::now();
    let analysis = analysis::build_global_scope(&parsed.ast, &parsed.roots);
    timings.push(("analysis", start.elapsed()));

    let start = Instant::now();
    let lowered = lowering::lower(&parsed.ast, &parsed.roots, analysis.scope);
    timings.push(("lowering", start.elapsed()));

    let diagnostics: Vec<SolumError> = parsed
        .errors
        .into_iter()
        .map(SolumError::from)
        .chain(analysis.errors.into_iter().map(SolumError::from))
        .chain(lowered.errors.into_iter().map(SolumError::from))
        .collect();

    if diagnostics.iter().any(SolumError::is_fatal) {
        tracing::info!(count = diagnostics.len(), "compilation failed");
        return Err(CompileFailure {
            name: name.to_string(),
            errs: diagnostics,
            src: NamedSource::new(name, source.to_string()),
        });
    }

    let start = Instant::now();
    let assembly = codegen::emit(&lowered.program);
    timings.push(("codegen", start.elapsed()));

    tracing::info!(
        functions = lowered.program.functions.len(),
        warnings = diagnostics.len(),
        "compilation successful"
    );

    Ok(Compilation {
        program: lowered.program,
        assembly,
        warnings: diagnostics,
        timings,
    })
}
