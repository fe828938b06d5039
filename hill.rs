use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::auction::{Allocation, AuctionState};
use crate::greedy::{buyer_pass, seller_pass, sort_by_avg_price, sort_by_density};

/// Move the order at position `i` to the front, shifting the prefix right.
/// Earlier picks then intercept different counterparties, which is what
/// gives the rotation neighborhood its reach.
fn rotate_to_front(order: &mut [usize], i: usize) {
    order[..=i].rotate_right(1);
}

// ─── HILL1 / HILL1S: deterministic rotate-to-front climbing ──────────────────

/// HILL1. Seed with the density-ordered greedy, then repeatedly rotate a
/// bid from beyond the critical position (the last matched one) to the
/// front. An improving rotation is kept and the scan restarts past the new
/// critical position; the final allocation is rebuilt from the best
/// ordering found.
pub(crate) fn climb_buyers(state: &mut AuctionState) {
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
    let mut scratch = Allocation::new(n, instance.asks().n());

    let seed = buyer_pass(instance, bid_order, ask_order, &mut scratch);
    let mut best_welfare = seed.welfare;
    let mut critical = seed.critical;
    let mut best_order = bid_order.clone();

    'restart: loop {
        let mut i = critical + 1;
        while i < n {
            rotate_to_front(bid_order, i);
            let probe = buyer_pass(instance, bid_order, ask_order, &mut scratch);
            if probe.welfare > best_welfare {
                best_welfare = probe.welfare;
                critical = probe.critical;
                best_order.copy_from_slice(bid_order);
                continue 'restart;
            }
            i += 1;
        }
        break;
    }

    bid_order.copy_from_slice(&best_order);
    *welfare = buyer_pass(instance, bid_order, ask_order, allocation).welfare;
}

/// HILL1S: the seller-side mirror, seeded with the average-price greedy
/// and rotating asks beyond the critical position.
pub(crate) fn climb_sellers(state: &mut AuctionState) {
    sort_by_avg_price(state);
    let AuctionState {
        instance,
        bid_order,
        ask_order,
        allocation,
        welfare,
        ..
    } = state;
    let m = instance.asks().n();
    let mut scratch = Allocation::new(instance.bids().n(), m);

    let seed = seller_pass(instance, bid_order, ask_order, &mut scratch);
    let mut best_welfare = seed.welfare;
    let mut critical = seed.critical;
    let mut best_order = ask_order.clone();

    'restart: loop {
        let mut j = critical + 1;
        while j < m {
            rotate_to_front(ask_order, j);
            let probe = seller_pass(instance, bid_order, ask_order, &mut scratch);
            if probe.welfare > best_welfare {
                best_welfare = probe.welfare;
                critical = probe.critical;
                best_order.copy_from_slice(ask_order);
                continue 'restart;
            }
            j += 1;
        }
        break;
    }

    ask_order.copy_from_slice(&best_order);
    *welfare = seller_pass(instance, bid_order, ask_order, allocation).welfare;
}

// ─── HILL2 / HILL2S: stochastic first-fit climbing ────────────────────────────

/// HILL2. The allocation itself is the search state. Each step samples a
/// bidder; an unmatched one is offered the first free feasible ask in
/// density order, and the move is kept only if it strictly raises welfare.
/// There is no removing move. Stops after `N` consecutive proposals
/// without improvement.
pub(crate) fn random_climb_buyers(
    state: &mut AuctionState,
    rng: &mut ChaCha8Rng,
    greedy_seed: bool,
) {
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

    let mut stale = 0;
    while stale < n {
        let i = rng.gen_range(0..n);
        let mut improved = false;
        if !allocation.is_winner(i) {
            let free = ask_order
                .iter()
                .copied()
                .find(|&j| !allocation.is_taken(j) && instance.can_allocate(i, j));
            if let Some(j) = free {
                let delta = instance.bids().value(i) - instance.asks().value(j);
                if delta > 0.0 {
                    allocation.assign(i, j);
                    current += delta;
                    improved = true;
                }
            }
        }
        if improved {
            stale = 0;
        } else {
            stale += 1;
        }
    }
    *welfare = current;
}

/// HILL2S: mirror of HILL2, sampling asks and scanning bids.
pub(crate) fn random_climb_sellers(
    state: &mut AuctionState,
    rng: &mut ChaCha8Rng,
    greedy_seed: bool,
) {
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
        seller_pass(instance, bid_order, ask_order, allocation).welfare
    } else {
        0.0
    };

    let mut stale = 0;
    while stale < m {
        let j = rng.gen_range(0..m);
        let mut improved = false;
        if !allocation.is_taken(j) {
            let buyer = bid_order
                .iter()
                .copied()
                .find(|&i| !allocation.is_winner(i) && instance.can_allocate(i, j));
            if let Some(i) = buyer {
                let delta = instance.bids().value(i) - instance.asks().value(j);
                if delta > 0.0 {
                    allocation.assign(i, j);
                    current += delta;
                    improved = true;
                }
            }
        }
        if improved {
            stale = 0;
        } else {
            stale += 1;
        }
    }
    *welfare = current;
}
