//! `s2lu`: handle one imagery notification.

use clap::Parser;
use s2lu_runner::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    s2lu_runner::main_with(Cli::parse())
}
