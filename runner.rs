use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::auction::{Auction, AuctionKind};
use crate::types::{Instance, Stats};

/// Portfolio run modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Every algorithm, MILP-backed ones included.
    #[value(name = "ALL")]
    All,
    /// Every algorithm except CPLEX and RLPS.
    #[value(name = "HEURISTICS")]
    Heuristics,
    /// Heuristics over subsampled instances at ratios 0.05 … 0.95.
    #[value(name = "SAMPLES")]
    Samples,
    /// The stochastic local-search four: HILL2, HILL2S, SA, SAS.
    #[value(name = "RANDOM")]
    Random,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::All => "ALL",
            Self::Heuristics => "HEURISTICS",
            Self::Samples => "SAMPLES",
            Self::Random => "RANDOM",
        })
    }
}

pub struct RunConfig {
    pub mode: RunMode,
    pub algo: Option<AuctionKind>,
    pub outfile: Option<PathBuf>,
    pub infiles: Vec<PathBuf>,
    /// Base seed; repeat `r` of a stochastic algorithm runs with `seed + r`.
    pub seed: Option<u64>,
    /// Repeats per stochastic algorithm and instance.
    pub runs: usize,
}

/// Run the portfolio over every instance file, appending one CSV stats row
/// per completed auction run to the configured sink. A malformed instance
/// file is logged and skipped; an unavailable or failing algorithm is
/// logged and produces no row.
pub fn run(config: &RunConfig) -> Result<()> {
    let mut sink: Box<dyn Write> = match &config.outfile {
        Some(path) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    for infile in &config.infiles {
        let instance = match Instance::load(infile) {
            Ok(inst) => Arc::new(inst),
            Err(e) => {
                warn!(file = %infile.display(), error = %e, "skipping instance");
                continue;
            }
        };
        info!(
            file = %infile.display(),
            bids = instance.bids().n(),
            asks = instance.asks().n(),
            resources = instance.l(),
            "loaded instance"
        );

        match config.algo {
            Some(kind) => run_algo(&instance, kind, infile, None, config, &mut sink)?,
            None => run_mode(&instance, infile, config, &mut sink)?,
        }
    }
    Ok(())
}

fn run_mode(
    instance: &Arc<Instance>,
    infile: &Path,
    config: &RunConfig,
    sink: &mut dyn Write,
) -> Result<()> {
    match config.mode {
        RunMode::All => {
            for kind in AuctionKind::ALL {
                run_algo(instance, kind, infile, None, config, sink)?;
            }
        }
        RunMode::Heuristics => {
            for kind in AuctionKind::heuristics() {
                run_algo(instance, kind, infile, None, config, sink)?;
            }
        }
        RunMode::Random => {
            for kind in AuctionKind::STOCHASTIC_LOCAL_SEARCH {
                run_algo(instance, kind, infile, None, config, sink)?;
            }
        }
        RunMode::Samples => {
            let mut rng = match config.seed {
                Some(s) => ChaCha8Rng::seed_from_u64(s),
                None => ChaCha8Rng::from_entropy(),
            };
            for step in 1..=19 {
                let ratio = f64::from(step) * 0.05;
                let probe = Arc::new(instance.sample(ratio, &mut rng));
                for kind in AuctionKind::heuristics() {
                    run_algo(&probe, kind, infile, Some(ratio), config, sink)?;
                }
            }
        }
    }
    Ok(())
}

/// Run one algorithm on one instance, repeating stochastic ones. Repeats
/// are independent auctions over the shared instance, so they fan out on
/// the rayon pool.
fn run_algo(
    instance: &Arc<Instance>,
    kind: AuctionKind,
    infile: &Path,
    ratio: Option<f64>,
    config: &RunConfig,
    sink: &mut dyn Write,
) -> Result<()> {
    let repeats = if kind.is_stochastic() {
        config.runs.max(1) as u64
    } else {
        1
    };

    let collected: Vec<Option<Stats>> = (0..repeats)
        .into_par_iter()
        .map(|r| {
            let built = match config.seed {
                Some(s) => Auction::seeded(instance.clone(), kind, s.wrapping_add(r)),
                None => Auction::new(instance.clone(), kind),
            };
            let mut auction = match built {
                Ok(a) => a,
                Err(e) => {
                    warn!(algo = %kind, error = %e, "skipping algorithm");
                    return None;
                }
            };
            if let Err(e) = auction.run() {
                error!(algo = %kind, error = %e, "run failed; no stats recorded");
                return None;
            }
            Some(auction.stats().clone())
        })
        .collect();

    for stats in collected.into_iter().flatten() {
        writeln!(sink, "{}", csv_line(infile, kind, &stats, ratio))?;
    }
    Ok(())
}

fn csv_line(infile: &Path, kind: AuctionKind, s: &Stats, ratio: Option<f64>) -> String {
    let core = format!(
        "{},{},{},{},{},{},{},{},{}",
        infile.display(),
        kind,
        s.time_wdp_ms,
        s.welfare,
        s.num_goods_traded,
        s.num_winners,
        s.mean_utility,
        s.stddev_utility,
        s.avg_unit_price
    );
    match ratio {
        Some(r) => format!("{r},{core}"),
        None => core,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_line_layout() {
        let stats = Stats {
            time_wdp_ms: 0.5,
            welfare: 7.0,
            num_goods_traded: 2,
            num_winners: 2,
            mean_utility: 3.5,
            stddev_utility: 0.0,
            avg_unit_price: 3.25,
        };
        let line = csv_line(Path::new("in.yaml"), AuctionKind::Greedy1, &stats, None);
        assert_eq!(line, "in.yaml,GREEDY1,0.5,7,2,2,3.5,0,3.25");

        let line = csv_line(Path::new("in.yaml"), AuctionKind::Sa, &stats, Some(0.25));
        assert!(line.starts_with("0.25,in.yaml,SA,"));
    }
}
