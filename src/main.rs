use clap::Parser;
use dirsync::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dirsync::run(Cli::parse()).await
}
