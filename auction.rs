use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use clap::ValueEnum;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::types::{relevance_factors, Instance, OrderMetrics, RelevanceMode, Stats};
use crate::{anneal, casanova, greedy, hill};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("{0} requires the MILP backend; rebuild with the `milp` cargo feature")]
    Unavailable(AuctionKind),
    #[cfg(feature = "milp")]
    #[error("MILP solver failed: {0}")]
    Solver(#[from] good_lp::ResolutionError),
}

// ─── Algorithm tags ───────────────────────────────────────────────────────────

/// The portfolio's algorithm tags, as accepted on the command line and
/// written into stats rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum AuctionKind {
    #[value(name = "GREEDY1")]
    Greedy1,
    #[value(name = "GREEDY2")]
    Greedy2,
    #[value(name = "GREEDY3")]
    Greedy3,
    #[value(name = "GREEDY1S")]
    Greedy1S,
    #[value(name = "HILL1")]
    Hill1,
    #[value(name = "HILL1S")]
    Hill1S,
    #[value(name = "HILL2")]
    Hill2,
    #[value(name = "HILL2S")]
    Hill2S,
    #[value(name = "SA")]
    Sa,
    #[value(name = "SAS")]
    Sas,
    #[value(name = "CASANOVA")]
    Casanova,
    #[value(name = "CASANOVAS")]
    CasanovaS,
    #[value(name = "CPLEX")]
    Cplex,
    #[value(name = "RLPS")]
    Rlps,
}

impl AuctionKind {
    pub const ALL: [Self; 14] = [
        Self::Greedy1,
        Self::Greedy2,
        Self::Greedy3,
        Self::Greedy1S,
        Self::Hill1,
        Self::Hill1S,
        Self::Hill2,
        Self::Hill2S,
        Self::Sa,
        Self::Sas,
        Self::Casanova,
        Self::CasanovaS,
        Self::Cplex,
        Self::Rlps,
    ];

    /// The stochastic local-search family: random-walk hill climbing and
    /// simulated annealing, both sides.
    pub const STOCHASTIC_LOCAL_SEARCH: [Self; 4] =
        [Self::Hill2, Self::Hill2S, Self::Sa, Self::Sas];

    /// Everything except the MILP-backed pair.
    pub fn heuristics() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(|k| !k.is_exact())
    }

    pub fn is_exact(self) -> bool {
        matches!(self, Self::Cplex | Self::Rlps)
    }

    /// Whether repeated runs of this algorithm can differ (PRNG-driven).
    pub fn is_stochastic(self) -> bool {
        matches!(
            self,
            Self::Hill2 | Self::Hill2S | Self::Sa | Self::Sas | Self::Casanova | Self::CasanovaS
        )
    }

    pub fn relevance_mode(self) -> RelevanceMode {
        match self {
            Self::Greedy2 => RelevanceMode::Scarcity,
            Self::Greedy3 => RelevanceMode::RelativeScarcity,
            _ => RelevanceMode::Uniform,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Greedy1 => "GREEDY1",
            Self::Greedy2 => "GREEDY2",
            Self::Greedy3 => "GREEDY3",
            Self::Greedy1S => "GREEDY1S",
            Self::Hill1 => "HILL1",
            Self::Hill1S => "HILL1S",
            Self::Hill2 => "HILL2",
            Self::Hill2S => "HILL2S",
            Self::Sa => "SA",
            Self::Sas => "SAS",
            Self::Casanova => "CASANOVA",
            Self::CasanovaS => "CASANOVAS",
            Self::Cplex => "CPLEX",
            Self::Rlps => "RLPS",
        }
    }
}

impl fmt::Display for AuctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ─── Allocation ───────────────────────────────────────────────────────────────

/// The bidder↔seller matching, kept as two mirrored index maps so both
/// "each winner has exactly one seller" and "each seller serves at most one
/// bidder" hold by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    to_seller: Vec<Option<usize>>,
    to_bidder: Vec<Option<usize>>,
}

impl Allocation {
    pub(crate) fn new(n: usize, m: usize) -> Self {
        Self {
            to_seller: vec![None; n],
            to_bidder: vec![None; m],
        }
    }

    pub(crate) fn clear(&mut self) {
        self.to_seller.fill(None);
        self.to_bidder.fill(None);
    }

    /// Match bidder `i` with seller `j`. Both must be free.
    pub(crate) fn assign(&mut self, i: usize, j: usize) {
        debug_assert!(self.to_seller[i].is_none() && self.to_bidder[j].is_none());
        self.to_seller[i] = Some(j);
        self.to_bidder[j] = Some(i);
    }

    /// Undo bidder `i`'s match, returning the seller it was paired with.
    pub(crate) fn release_bidder(&mut self, i: usize) -> Option<usize> {
        let j = self.to_seller[i].take()?;
        self.to_bidder[j] = None;
        Some(j)
    }

    /// Undo seller `j`'s match, returning the bidder it was serving.
    pub(crate) fn release_seller(&mut self, j: usize) -> Option<usize> {
        let i = self.to_bidder[j].take()?;
        self.to_seller[i] = None;
        Some(i)
    }

    #[inline]
    pub fn seller_of(&self, i: usize) -> Option<usize> {
        self.to_seller[i]
    }

    #[inline]
    pub fn bidder_of(&self, j: usize) -> Option<usize> {
        self.to_bidder[j]
    }

    #[inline]
    pub fn is_winner(&self, i: usize) -> bool {
        self.to_seller[i].is_some()
    }

    #[inline]
    pub fn is_taken(&self, j: usize) -> bool {
        self.to_bidder[j].is_some()
    }

    /// y(i, j) of the allocation matrix.
    #[inline]
    pub fn y(&self, i: usize, j: usize) -> bool {
        self.to_seller[i] == Some(j)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.to_seller
            .iter()
            .enumerate()
            .filter_map(|(i, j)| j.map(|j| (i, j)))
    }

    pub fn num_pairs(&self) -> usize {
        self.to_seller.iter().flatten().count()
    }

    pub(crate) fn is_clear(&self) -> bool {
        self.to_seller.iter().all(Option::is_none) && self.to_bidder.iter().all(Option::is_none)
    }
}

// ─── Shared auction state ─────────────────────────────────────────────────────

/// Allocation state shared by every algorithm in the portfolio. The order
/// vectors start as identity permutations and double as working orderings
/// for the sorting-based algorithms.
pub struct AuctionState {
    pub(crate) instance: Arc<Instance>,
    pub(crate) bid_metrics: OrderMetrics,
    pub(crate) ask_metrics: OrderMetrics,
    pub(crate) bid_order: Vec<usize>,
    pub(crate) ask_order: Vec<usize>,
    pub(crate) allocation: Allocation,
    pub(crate) welfare: f64,
    pub(crate) price_buyer: Vec<f64>,
    pub(crate) price_seller: Vec<f64>,
    pub(crate) stats: Stats,
}

impl AuctionState {
    fn new(instance: Arc<Instance>, mode: RelevanceMode) -> Self {
        let (f_bid, f_ask) = relevance_factors(mode, &instance);
        let n = instance.bids().n();
        let m = instance.asks().n();
        Self {
            bid_metrics: OrderMetrics::new(instance.bids(), &f_bid),
            ask_metrics: OrderMetrics::new(instance.asks(), &f_ask),
            bid_order: (0..n).collect(),
            ask_order: (0..m).collect(),
            allocation: Allocation::new(n, m),
            welfare: 0.0,
            price_buyer: vec![0.0; n],
            price_seller: vec![0.0; m],
            stats: Stats::default(),
            instance,
        }
    }
}

// ─── Auction ──────────────────────────────────────────────────────────────────

/// Per-variant configuration. Search state itself (working orderings,
/// candidate pools, birthdays, temperatures) lives on the stack of
/// `compute_allocation`, so `reset` restores the constructor post-state
/// exactly.
enum Algo {
    Greedy,
    GreedySellers,
    Hill,
    HillSellers,
    RandomHill { seed: Option<u64>, greedy_seed: bool },
    RandomHillSellers { seed: Option<u64>, greedy_seed: bool },
    Anneal { seed: Option<u64>, greedy_seed: bool },
    AnnealSellers { seed: Option<u64>, greedy_seed: bool },
    Casanova { seed: Option<u64> },
    CasanovaSellers { seed: Option<u64> },
    #[cfg(feature = "milp")]
    Exact,
    #[cfg(feature = "milp")]
    RelaxAndRound,
}

/// One auction mechanism bound to one instance: the variant's winner
/// determination, k-pricing, statistics and reset behind a single `run`.
pub struct Auction {
    kind: AuctionKind,
    state: AuctionState,
    algo: Algo,
}

fn make_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    }
}

impl Auction {
    /// Build an auction of the given kind. Stochastic variants draw their
    /// seed from OS entropy on every run.
    pub fn new(instance: Arc<Instance>, kind: AuctionKind) -> Result<Self, AuctionError> {
        Self::build(instance, kind, None)
    }

    /// Like [`Auction::new`] but with an injected seed, making stochastic
    /// variants reproducible run for run.
    pub fn seeded(
        instance: Arc<Instance>,
        kind: AuctionKind,
        seed: u64,
    ) -> Result<Self, AuctionError> {
        Self::build(instance, kind, Some(seed))
    }

    fn build(
        instance: Arc<Instance>,
        kind: AuctionKind,
        seed: Option<u64>,
    ) -> Result<Self, AuctionError> {
        let algo = match kind {
            AuctionKind::Greedy1 | AuctionKind::Greedy2 | AuctionKind::Greedy3 => Algo::Greedy,
            AuctionKind::Greedy1S => Algo::GreedySellers,
            AuctionKind::Hill1 => Algo::Hill,
            AuctionKind::Hill1S => Algo::HillSellers,
            // The random climbers historically start from the empty
            // allocation; annealing starts from its greedy seed.
            AuctionKind::Hill2 => Algo::RandomHill { seed, greedy_seed: false },
            AuctionKind::Hill2S => Algo::RandomHillSellers { seed, greedy_seed: false },
            AuctionKind::Sa => Algo::Anneal { seed, greedy_seed: true },
            AuctionKind::Sas => Algo::AnnealSellers { seed, greedy_seed: true },
            AuctionKind::Casanova => Algo::Casanova { seed },
            AuctionKind::CasanovaS => Algo::CasanovaSellers { seed },
            #[cfg(feature = "milp")]
            AuctionKind::Cplex => Algo::Exact,
            #[cfg(feature = "milp")]
            AuctionKind::Rlps => Algo::RelaxAndRound,
            #[cfg(not(feature = "milp"))]
            AuctionKind::Cplex | AuctionKind::Rlps => {
                return Err(AuctionError::Unavailable(kind));
            }
        };
        let state = AuctionState::new(instance, kind.relevance_mode());
        Ok(Self { kind, state, algo })
    }

    /// Override whether a stochastic variant starts from its greedy seed
    /// instead of the empty allocation. No effect on other variants.
    pub fn set_greedy_seed(&mut self, on: bool) {
        match &mut self.algo {
            Algo::RandomHill { greedy_seed, .. }
            | Algo::RandomHillSellers { greedy_seed, .. }
            | Algo::Anneal { greedy_seed, .. }
            | Algo::AnnealSellers { greedy_seed, .. } => *greedy_seed = on,
            _ => {}
        }
    }

    /// Solve the winner determination problem, price the matches with
    /// κ = 0.5 and fill in the run statistics.
    pub fn run(&mut self) -> Result<(), AuctionError> {
        self.reset();
        let t0 = Instant::now();
        self.compute_allocation()?;
        let elapsed_ms = t0.elapsed().as_secs_f64() * 1_000.0;
        self.compute_k_pricing(0.5);
        self.compute_statistics();
        self.state.stats.time_wdp_ms = elapsed_ms;
        Ok(())
    }

    fn compute_allocation(&mut self) -> Result<(), AuctionError> {
        let state = &mut self.state;
        match &self.algo {
            Algo::Greedy => greedy::greedy_buyers(state),
            Algo::GreedySellers => greedy::greedy_sellers(state),
            Algo::Hill => hill::climb_buyers(state),
            Algo::HillSellers => hill::climb_sellers(state),
            Algo::RandomHill { seed, greedy_seed } => {
                hill::random_climb_buyers(state, &mut make_rng(*seed), *greedy_seed)
            }
            Algo::RandomHillSellers { seed, greedy_seed } => {
                hill::random_climb_sellers(state, &mut make_rng(*seed), *greedy_seed)
            }
            Algo::Anneal { seed, greedy_seed } => {
                anneal::anneal_buyers(state, &mut make_rng(*seed), *greedy_seed)
            }
            Algo::AnnealSellers { seed, greedy_seed } => {
                anneal::anneal_sellers(state, &mut make_rng(*seed), *greedy_seed)
            }
            Algo::Casanova { seed } => casanova::search_buyers(state, &mut make_rng(*seed)),
            Algo::CasanovaSellers { seed } => {
                casanova::search_sellers(state, &mut make_rng(*seed))
            }
            #[cfg(feature = "milp")]
            Algo::Exact => crate::exact::solve_binary(state)?,
            #[cfg(feature = "milp")]
            Algo::RelaxAndRound => crate::exact::relax_and_round(state)?,
        }
        Ok(())
    }

    /// k-pricing: each matched pair trades at
    /// `κ·ask_value + (1−κ)·bid_value`, so κ = 0.5 balances the budget
    /// pair by pair.
    fn compute_k_pricing(&mut self, kappa: f64) {
        let st = &mut self.state;
        for i in 0..st.instance.bids().n() {
            if let Some(j) = st.allocation.seller_of(i) {
                let price = kappa * st.instance.asks().value(j)
                    + (1.0 - kappa) * st.instance.bids().value(i);
                st.price_buyer[i] = price;
                st.price_seller[j] = price;
            }
        }
    }

    fn compute_statistics(&mut self) {
        let st = &mut self.state;
        let bids = st.instance.bids();
        let asks = st.instance.asks();

        let mut stats = Stats::default();
        let mut utilities = Vec::new();
        for (i, j) in st.allocation.pairs() {
            let buyer_utility = bids.value(i) - st.price_buyer[i];
            let seller_utility = st.price_seller[j] - asks.value(j);
            stats.welfare += buyer_utility + seller_utility;
            stats.num_winners += 2;
            for k in 0..st.instance.l() {
                stats.num_goods_traded += bids.quantity(i, k);
            }
            utilities.push(buyer_utility);
            utilities.push(seller_utility);
        }

        if stats.num_winners > 0 {
            let mean = stats.welfare / f64::from(stats.num_winners);
            stats.mean_utility = mean;
            stats.stddev_utility = (utilities.iter().map(|u| (u - mean).powi(2)).sum::<f64>()
                / f64::from(stats.num_winners))
            .sqrt();
            if stats.num_goods_traded > 0 {
                stats.avg_unit_price =
                    st.price_buyer.iter().sum::<f64>() / f64::from(stats.num_goods_traded);
            }
        }
        st.stats = stats;
    }

    /// Restore the constructor post-state: empty allocation, identity
    /// orderings, zero prices, zero stats.
    pub fn reset(&mut self) {
        let st = &mut self.state;
        st.allocation.clear();
        st.welfare = 0.0;
        st.bid_order.clear();
        st.bid_order.extend(0..st.instance.bids().n());
        st.ask_order.clear();
        st.ask_order.extend(0..st.instance.asks().n());
        st.price_buyer.fill(0.0);
        st.price_seller.fill(0.0);
        st.stats = Stats::default();
    }

    /// Whether the auction is back in its constructor post-state.
    pub fn no_side_effects(&self) -> bool {
        let st = &self.state;
        st.welfare == 0.0
            && st.allocation.is_clear()
            && st.price_buyer.iter().all(|&p| p == 0.0)
            && st.price_seller.iter().all(|&p| p == 0.0)
            && st.bid_order.iter().copied().eq(0..st.instance.bids().n())
            && st.ask_order.iter().copied().eq(0..st.instance.asks().n())
            && st.stats == Stats::default()
    }

    #[inline]
    pub fn kind(&self) -> AuctionKind {
        self.kind
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.state.instance
    }

    #[inline]
    pub fn allocation(&self) -> &Allocation {
        &self.state.allocation
    }

    #[inline]
    pub fn buyer_prices(&self) -> &[f64] {
        &self.state.price_buyer
    }

    #[inline]
    pub fn seller_prices(&self) -> &[f64] {
        &self.state.price_seller
    }

    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.state.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_maps_stay_mirrored() {
        let mut alloc = Allocation::new(3, 2);
        alloc.assign(1, 0);
        assert!(alloc.is_winner(1));
        assert!(alloc.is_taken(0));
        assert_eq!(alloc.seller_of(1), Some(0));
        assert_eq!(alloc.bidder_of(0), Some(1));
        assert!(alloc.y(1, 0));
        assert!(!alloc.y(1, 1));

        assert_eq!(alloc.release_bidder(1), Some(0));
        assert!(alloc.is_clear());

        alloc.assign(2, 1);
        assert_eq!(alloc.release_seller(1), Some(2));
        assert!(alloc.is_clear());
        assert_eq!(alloc.release_bidder(0), None);
    }

    #[test]
    fn tags_round_trip_through_display() {
        for kind in AuctionKind::ALL {
            assert_eq!(kind.to_string(), kind.tag());
        }
        assert_eq!(AuctionKind::Greedy2.relevance_mode(), RelevanceMode::Scarcity);
        assert!(AuctionKind::Casanova.is_stochastic());
        assert!(!AuctionKind::Hill1.is_stochastic());
        assert!(AuctionKind::Rlps.is_exact());
        assert_eq!(AuctionKind::heuristics().count(), 12);
    }
}
