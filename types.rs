use std::path::Path;

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

/// Floor for relevance factors so a resource in exact supply/demand balance
/// does not produce an infinite density under relative scarcity.
pub const RELEVANCE_EPS: f64 = 1e-9;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("cannot read {0}: {1}")]
    Io(std::path::PathBuf, #[source] std::io::Error),
    #[error("{0}: {1}")]
    Parse(std::path::PathBuf, #[source] serde_yaml::Error),
    #[error("{0}")]
    Malformed(String),
}

// ─── Order collections ────────────────────────────────────────────────────────

/// One side of an auction instance: `N` single-minded orders, each a
/// reservation price and an integer quantity row over `L` resource types.
#[derive(Clone, Debug)]
pub struct BidSet {
    values: Vec<f64>,
    quantities: Vec<Vec<u32>>,
}

impl BidSet {
    pub fn new(values: Vec<f64>, quantities: Vec<Vec<u32>>) -> Result<Self, InstanceError> {
        if values.len() != quantities.len() {
            return Err(InstanceError::Malformed(format!(
                "{} values but {} quantity rows",
                values.len(),
                quantities.len()
            )));
        }
        let l = quantities.first().map_or(0, Vec::len);
        for (i, row) in quantities.iter().enumerate() {
            if row.len() != l {
                return Err(InstanceError::Malformed(format!(
                    "quantity row {i} has {} columns, expected {l}",
                    row.len()
                )));
            }
            if row.iter().all(|&q| q == 0) {
                return Err(InstanceError::Malformed(format!(
                    "order {i} requests zero units of every resource"
                )));
            }
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite() || *v < 0.0) {
            return Err(InstanceError::Malformed(format!(
                "order {i} has invalid value {}",
                values[i]
            )));
        }
        Ok(Self { values, quantities })
    }

    /// Number of orders.
    #[inline]
    pub fn n(&self) -> usize {
        self.values.len()
    }

    /// Number of resource types.
    #[inline]
    pub fn l(&self) -> usize {
        self.quantities.first().map_or(0, Vec::len)
    }

    #[inline]
    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }

    #[inline]
    pub fn quantity(&self, i: usize, k: usize) -> u32 {
        self.quantities[i][k]
    }

    /// Per-unit price implied by each order: value divided by total quantity.
    pub fn avg_prices(&self) -> Vec<f64> {
        self.quantities
            .iter()
            .zip(&self.values)
            .map(|(row, v)| v / row.iter().map(|&q| q as f64).sum::<f64>())
            .collect()
    }

    /// Volume-normalized price per order: value / √(Σₖ f[k]·Q[i][k]).
    pub fn densities(&self, f: &[f64]) -> Vec<f64> {
        self.quantities
            .iter()
            .zip(&self.values)
            .map(|(row, v)| {
                let mass: f64 = row.iter().zip(f).map(|(&q, &fk)| q as f64 * fk).sum();
                v / mass.sqrt()
            })
            .collect()
    }

    /// Aggregate quantity per resource across all orders.
    pub fn q_per_resource(&self) -> Vec<u32> {
        let mut qpr = vec![0u32; self.l()];
        for row in &self.quantities {
            for (k, &q) in row.iter().enumerate() {
                qpr[k] += q;
            }
        }
        qpr
    }

    /// Keep a random subset of roughly `ratio · N` orders (at least one),
    /// preserving the relative order of the survivors.
    pub fn sample(&self, ratio: f64, rng: &mut impl Rng) -> Self {
        let n = self.n();
        if n == 0 {
            return self.clone();
        }
        let amount = ((ratio * n as f64).round() as usize).clamp(1, n);
        let mut keep = rand::seq::index::sample(rng, n, amount).into_vec();
        keep.sort_unstable();
        Self {
            values: keep.iter().map(|&i| self.values[i]).collect(),
            quantities: keep.iter().map(|&i| self.quantities[i].clone()).collect(),
        }
    }
}

// ─── Instance ─────────────────────────────────────────────────────────────────

/// An auction instance: a buy side and a sell side over the same `L`
/// resource types. Immutable once built; auctions share it by reference.
#[derive(Clone, Debug)]
pub struct Instance {
    bids: BidSet,
    asks: BidSet,
}

/// On-disk instance layout. The `params` block some generators emit is
/// skipped by serde's default unknown-field handling.
#[derive(Deserialize)]
struct InstanceFile {
    bids: BidSetFile,
    asks: BidSetFile,
}

#[derive(Deserialize)]
struct BidSetFile {
    values: Vec<f64>,
    quantities: Vec<Vec<u32>>,
}

impl Instance {
    pub fn new(bids: BidSet, asks: BidSet) -> Result<Self, InstanceError> {
        if bids.l() != asks.l() {
            return Err(InstanceError::Malformed(format!(
                "bids cover {} resource types but asks cover {}",
                bids.l(),
                asks.l()
            )));
        }
        Ok(Self { bids, asks })
    }

    /// Load an instance from a YAML file.
    pub fn load(path: &Path) -> Result<Self, InstanceError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| InstanceError::Io(path.to_path_buf(), e))?;
        let file: InstanceFile = serde_yaml::from_str(&text)
            .map_err(|e| InstanceError::Parse(path.to_path_buf(), e))?;
        let prefix = |e| match e {
            InstanceError::Malformed(reason) => {
                InstanceError::Malformed(format!("{}: {reason}", path.display()))
            }
            other => other,
        };
        let bids = BidSet::new(file.bids.values, file.bids.quantities).map_err(prefix)?;
        let asks = BidSet::new(file.asks.values, file.asks.quantities).map_err(prefix)?;
        Self::new(bids, asks).map_err(prefix)
    }

    #[inline]
    pub fn bids(&self) -> &BidSet {
        &self.bids
    }

    #[inline]
    pub fn asks(&self) -> &BidSet {
        &self.asks
    }

    #[inline]
    pub fn l(&self) -> usize {
        self.bids.l()
    }

    /// Whether seller `j` can serve bidder `i` exclusively: the bid clears
    /// the seller's reservation price and the seller has enough of every
    /// resource.
    pub fn can_allocate(&self, i: usize, j: usize) -> bool {
        if self.bids.value(i) < self.asks.value(j) {
            return false;
        }
        (0..self.l()).all(|k| self.bids.quantity(i, k) <= self.asks.quantity(j, k))
    }

    /// Subsample both sides at the same ratio.
    pub fn sample(&self, ratio: f64, rng: &mut impl Rng) -> Self {
        Self {
            bids: self.bids.sample(ratio, rng),
            asks: self.asks.sample(ratio, rng),
        }
    }
}

// ─── Relevance factors ────────────────────────────────────────────────────────

/// Per-resource weighting schemes used inside the density metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelevanceMode {
    Uniform,
    Scarcity,
    RelativeScarcity,
}

/// Factor vectors `(f_bid, f_ask)` for the given mode.
///
/// SCARCITY weights each resource by the inverse of the other side's
/// aggregate quantity; RELATIVE_SCARCITY by the supply/demand imbalance
/// relative to the own side's aggregate. A zero imbalance is floored at
/// `RELEVANCE_EPS` to keep densities finite.
pub fn relevance_factors(mode: RelevanceMode, instance: &Instance) -> (Vec<f64>, Vec<f64>) {
    let l = instance.l();
    match mode {
        RelevanceMode::Uniform => (vec![1.0; l], vec![1.0; l]),
        RelevanceMode::Scarcity => {
            let capacity = instance.asks().q_per_resource();
            let demand = instance.bids().q_per_resource();
            let f_bid = capacity.iter().map(|&c| 1.0 / c as f64).collect();
            let f_ask = demand.iter().map(|&d| 1.0 / d as f64).collect();
            (f_bid, f_ask)
        }
        RelevanceMode::RelativeScarcity => {
            let capacity = instance.asks().q_per_resource();
            let demand = instance.bids().q_per_resource();
            let gap: Vec<f64> = demand
                .iter()
                .zip(&capacity)
                .map(|(&d, &c)| (d as f64 - c as f64).abs().max(RELEVANCE_EPS))
                .collect();
            let f_bid = gap.iter().zip(&demand).map(|(&g, &d)| g / d as f64).collect();
            let f_ask = gap.iter().zip(&capacity).map(|(&g, &c)| g / c as f64).collect();
            (f_bid, f_ask)
        }
    }
}

/// Precomputed sort keys for one side of an instance.
#[derive(Clone, Debug)]
pub struct OrderMetrics {
    pub avg_price: Vec<f64>,
    pub density: Vec<f64>,
}

impl OrderMetrics {
    pub fn new(set: &BidSet, f: &[f64]) -> Self {
        Self {
            avg_price: set.avg_prices(),
            density: set.densities(f),
        }
    }
}

// ─── Per-run measurements ─────────────────────────────────────────────────────

/// Plain record of one auction run, written out as one CSV row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stats {
    pub time_wdp_ms: f64,
    pub welfare: f64,
    pub num_goods_traded: u32,
    pub num_winners: u32,
    pub mean_utility: f64,
    pub stddev_utility: f64,
    pub avg_unit_price: f64,
}
