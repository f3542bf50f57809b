use anyhow::Result;
use clap::Parser;
use js2sb3::cli::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    js2sb3::run_cli(&args)
}
