use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about = "Compiles Solum source code to x86-64 NASM assembly", long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Source code input file
    #[arg(default_value = "test.slm")]
    pub input_file: PathBuf,

    /// Path of the generated assembly, defaults to the input name with an `.asm` extension
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Execution mode
    #[arg(value_enum)]
    #[arg(short, long)]
    #[arg(default_value_t = Mode::Compile)]
    pub mode: Mode,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colors in diagnostics and logs
    #[arg(long)]
    pub no_ansi: bool,

    /// Log the time spent in each compilation stage
    #[arg(long)]
    pub link_time: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Compile the source code to assembly
    Compile,

    /// Inspect the AST of the parsed source code
    Parse,

    /// Inspect the IR of the lowered AST
    Ir,

    /// Interpret `main` and print its result
    Run,
}

impl Args {
    /// Where the assembly ends up
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input_file.with_extension("asm"))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let args = Args::parse_from(["solum"]);
        assert_eq!(args.input_file, PathBuf::from("test.slm"));
        assert_eq!(args.mode, Mode::Compile);
        assert_eq!(args.output_path(), PathBuf::from("test.asm"));
    }

    #[test]
    fn explicit_output() {
        let args = Args::parse_from(["solum", "dir/prog.slm", "-o", "out.s", "--mode", "ir", "--no-ansi"]);
        assert_eq!(args.output_path(), PathBuf::from("out.s"));
        assert_eq!(args.mode, Mode::Ir);
        assert!(args.no_ansi);
        assert!(!args.verbose);
    }
}
