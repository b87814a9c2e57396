use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre;
use jar_invoker::pipeline;
use tracing_subscriber::EnvFilter;

/// Loads a JAR, resolves the method named in a descriptor file and invokes it.
#[derive(clap::Parser)]
#[command(name = "invoke")]
struct Args {
    /// Descriptor file: archive path, type name, method name, parameter type
    /// tokens, then one argument value per line.
    descriptor: Option<PathBuf>,
}

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let Some(path) = args.descriptor else {
        println!("Usage: invoke <descriptor-file-path>");
        return Ok(ExitCode::SUCCESS);
    };

    let mut out = io::stdout();
    let result = pipeline::run(&path, &mut out);

    match result {
        Ok(report) => {
            writeln!(out, "{report}")?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            writeln!(out, "{}", failure.summary())?;
            Ok(ExitCode::FAILURE)
        }
    }
}
