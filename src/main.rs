use anyhow::Result;
use chroma_index::cli::Cli;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();
    Cli::parse().run()
}
