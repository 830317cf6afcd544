use std::{path::PathBuf, process::ExitCode};

use clap::Parser;

use stack_to_vdb::convert::Session;

/// Export microscopy stacks as OpenVDB volumes.
#[derive(Parser, Debug)]
struct Args {
    /// Export configuration files (INI with a [DATA] section)
    #[arg(required = true)]
    configs: Vec<PathBuf>,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error + Sync + Send>> {
    let args = Args::parse();

    let mut session = Session::start()?;
    for cfg_path in &args.configs {
        session.run(cfg_path);
    }

    if session.close() > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
