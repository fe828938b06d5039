use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::auction::AuctionState;
use crate::greedy::{buyer_pass, seller_pass, sort_by_avg_price, sort_by_density};

const T_MIN: f64 = 1e-5;
const ALPHA: f64 = 0.9;
/// Proposals per temperature step.
const SWEEP_LEN: usize = 20;
/// Consecutive sweeps without an accepted move before the search counts as
/// frozen and stops.
const MAX_FROZEN: usize = 3;

/// SA. Density-ordered greedy seed, then single-bit-flip annealing: a
/// sampled bidder is either unmatched (dropping its pair) or offered the
/// first free feasible ask. A move with welfare delta Δ is accepted when a
/// uniform draw falls below exp(Δ/T), so improvements always pass.
/// The starting temperature is the largest possible single-step gain,
/// `max bid value − min ask value`.
pub(crate) fn anneal_buyers(state: &mut AuctionState, rng: &mut ChaCha8Rng, greedy_seed: bool) {
    sort_by_density(state);
    let AuctionState {
        instance,
        bid_order,
        ask_order,
        allocation,
        welfare,
        ..
    } = state;
    let n = instance.bids().n();
    let m = instance.asks().n();
    if n == 0 || m == 0 {
        return;
    }

    let mut current = if greedy_seed {
        buyer_pass(instance, bid_order, ask_order, allocation).welfare
    } else {
        0.0
    };

    let t_max = (0..n).map(|i| instance.bids().value(i)).fold(f64::MIN, f64::max)
        - (0..m).map(|j| instance.asks().value(j)).fold(f64::MAX, f64::min);

    let mut t = t_max;
    let mut frozen = 0;
    while t > T_MIN && frozen < MAX_FROZEN {
        let mut accepted_any = false;
        for _ in 0..SWEEP_LEN {
            let i = rng.gen_range(0..n);
            let (j, add) = match allocation.seller_of(i) {
                Some(j) => (j, false),
                None => {
                    let free = ask_order
                        .iter()
                        .copied()
                        .find(|&j| !allocation.is_taken(j) && instance.can_allocate(i, j));
                    match free {
                        Some(j) => (j, true),
                        None => continue,
                    }
                }
            };
            let gain = instance.bids().value(i) - instance.asks().value(j);
            let delta = if add { gain } else { -gain };
            let u: f64 = rng.gen();
            if u < (delta / t).exp() {
                if add {
                    allocation.assign(i, j);
                } else {
                    allocation.release_bidder(i);
                }
                current += delta;
                accepted_any = true;
            }
        }
        if accepted_any {
            frozen = 0;
        } else {
            frozen += 1;
        }
        t *= ALPHA;
    }
    *welfare = current;
}

/// SAS: the seller-side mirror. Seeded with the average-price greedy;
/// samples asks and flips their match against the bid ordering.
pub(crate) fn anneal_sellers(state: &mut AuctionState, rng: &mut ChaCha8Rng, greedy_seed: bool) {
    sort_by_avg_price(state);
    let AuctionState {
        instance,
        bid_order,
        ask_order,
        allocation,
        welfare,
        ..
    } = state;
    let n = instance.bids().n();
    let m = instance.asks().n();
    if n == 0 || m == 0 {
        return;
    }

    let mut current = if greedy_seed {
        seller_pass(instance, bid_order, ask_order, allocation).welfare
    } else {
        0.0
    };

    let t_max = (0..n).map(|i| instance.bids().value(i)).fold(f64::MIN, f64::max)
        - (0..m).map(|j| instance.asks().value(j)).fold(f64::MAX, f64::min);

    let mut t = t_max;
    let mut frozen = 0;
    while t > T_MIN && frozen < MAX_FROZEN {
        let mut accepted_any = false;
        for _ in 0..SWEEP_LEN {
            let j = rng.gen_range(0..m);
            let (i, add) = match allocation.bidder_of(j) {
                Some(i) => (i, false),
                None => {
                    let buyer = bid_order
                        .iter()
                        .copied()
                        .find(|&i| !allocation.is_winner(i) && instance.can_allocate(i, j));
                    match buyer {
                        Some(i) => (i, true),
                        None => continue,
                    }
                }
            };
            let gain = instance.bids().value(i) - instance.asks().value(j);
            let delta = if add { gain } else { -gain };
            let u: f64 = rng.gen();
            if u < (delta / t).exp() {
                if add {
                    allocation.assign(i, j);
                } else {
                    allocation.release_seller(j);
                }
                current += delta;
                accepted_any = true;
            }
        }
        if accepted_any {
            frozen = 0;
        } else {
            frozen += 1;
        }
        t *= ALPHA;
    }
    *welfare = current;
}
