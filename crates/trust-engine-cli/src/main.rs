use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();
    let cli = trust_engine_cli::Cli::parse();
    trust_engine_cli::run_cli(cli)
}
