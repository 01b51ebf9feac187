use std::process::ExitCode;

use clap::Parser;
use sketchfe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Session log (overwrites previous session log)
    logger::init();
    logger::set_verbose(args.verbose);

    cli::run(args)
}
