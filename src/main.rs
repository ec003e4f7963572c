use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, metadata::LevelFilter};
use tracing_subscriber::EnvFilter;

use tlang::{Interpreter, Logged, Value};

#[derive(Parser, Debug)]
#[command(author, version, about = "The T language runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a source file and print its results
    Run {
        /// Source file to evaluate
        file: PathBuf,

        /// Permit filesystem-touching builtins inside pipeline nodes
        #[arg(long = "unsafe")]
        unsafe_mode: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { file, unsafe_mode } => {
            let source = std::fs::read_to_string(&file)
                .log()
                .with_context(|| format!("cannot read {}", file.display()))?;
            info!("running {}", file.display());
            let interp = Interpreter::new().with_unsafe(unsafe_mode);
            let mut last_printed_error = false;
            let last = interp.run_script(&source, |value| {
                last_printed_error = value.is_error();
                println!("{value}");
            });
            if last_printed_error || matches!(last, Value::Error(_)) {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}
