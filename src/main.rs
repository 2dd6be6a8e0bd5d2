//! Pangenome dashboard extractor.
//!
//! Reads pangenome SQLite databases produced by the annotation pipeline
//! and emits the JSON documents backing the interactive heatmap viewer:
//! per-gene score records, a genome tree over cluster presence/absence,
//! reaction and phenotype summaries, and genome metadata.

mod bio;
mod cli;
mod database;
mod error;
mod extract;
mod report;
mod stats;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    run_cli(cli)
}
