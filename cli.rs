use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use auction_portfolio::auction::AuctionKind;
use auction_portfolio::runner::{self, RunConfig, RunMode};

/// Run an algorithm portfolio for single-minded combinatorial double
/// auctions over YAML instance files, one CSV stats row per run.
#[derive(Parser)]
#[command(name = "auction-portfolio", version)]
struct Cli {
    /// Portfolio mode to run
    #[arg(
        short,
        long,
        value_enum,
        ignore_case = true,
        default_value_t = RunMode::Heuristics,
        conflicts_with = "algo"
    )]
    mode: RunMode,

    /// Run a single algorithm instead of a portfolio mode
    #[arg(short, long, value_enum, ignore_case = true)]
    algo: Option<AuctionKind>,

    /// Append stats rows to this file instead of stdout
    #[arg(short, long, value_name = "OUTFILE")]
    out: Option<PathBuf>,

    /// Base seed for stochastic algorithms and subsampling; defaults to OS entropy
    #[arg(long)]
    seed: Option<u64>,

    /// Runs per stochastic algorithm and instance
    #[arg(long, default_value_t = 10)]
    runs: usize,

    /// Auction instance files, one YAML document each
    #[arg(required = true, value_name = "INFILE")]
    infiles: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    runner::run(&RunConfig {
        mode: cli.mode,
        algo: cli.algo,
        outfile: cli.out,
        infiles: cli.infiles,
        seed: cli.seed,
        runs: cli.runs,
    })
}
