use std::fs;
use std::io::Write;
use std::path::Path;

use clap::Parser;
use miette::{bail, miette, IntoDiagnostic, NamedSource, Report, Result};
use tempfile::NamedTempFile;
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use solum::vm::Vm;
use solum::{parsing, SolumError};

mod cli;

use cli::{Args, Mode};

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else if args.link_time {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_ansi(!args.no_ansi)
                .with_writer(std::io::stderr),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let color = !args.no_ansi;
    miette::set_hook(Box::new(move |_| {
        Box::new(miette::MietteHandlerOpts::new().color(color).build())
    }))
    .into_diagnostic()?;

    if !args.input_file.is_file() {
        bail!("No proper input file: {:?}", args.input_file);
    }

    let name = args.input_file.display().to_string();
    let source = fs::read_to_string(&args.input_file).into_diagnostic()?;

    if args.mode == Mode::Parse {
        return print_ast(&name, &source);
    }

    let compilation = solum::compile(&name, &source)?;
    for warning in &compilation.warnings {
        report_warning(&name, &source, warning);
    }
    if args.link_time {
        for (stage, duration) in &compilation.timings {
            info!(stage = %stage, ?duration, "stage finished");
        }
    }

    match args.mode {
        Mode::Ir => print!("{}", compilation.program),
        Mode::Run => {
            let mut vm = Vm::new(&compilation.program);
            let result = vm.call("main").map_err(|error| miette!("{error}"))?;
            print!("{}", vm.output_string());
            println!("main returned {result:?}");
        }
        Mode::Compile => {
            let path = args.output_path();
            write_atomically(&path, &compilation.assembly)?;
            info!("Wrote assembly to {}", path.display());
        }
        Mode::Parse => {}
    }

    Ok(())
}

fn print_ast(name: &str, source: &str) -> Result<()> {
    let parsed = parsing::parse(source);
    for &root in &parsed.roots {
        ptree::print_tree(&parsed.ast.tree(root)).into_diagnostic()?;
    }

    if parsed.is_success() {
        info!("Parsing successful");
        return Ok(());
    }
    Err(solum::CompileFailure {
        name: name.to_string(),
        errs: parsed.errors.into_iter().map(SolumError::from).collect(),
        src: NamedSource::new(name, source.to_string()),
    }
    .into())
}

fn report_warning(name: &str, source: &str, warning: &SolumError) {
    let report = Report::new(warning.clone()).with_source_code(NamedSource::new(name, source.to_string()));
    eprintln!("{report:?}");
}

/// Write through a temporary file in the destination directory
fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut file = NamedTempFile::new_in(dir).into_diagnostic()?;
    file.write_all(contents.as_bytes()).into_diagnostic()?;
    file.persist(path).into_diagnostic()?;
    Ok(())
}
