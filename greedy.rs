use std::cmp::Ordering;

use crate::auction::{Allocation, AuctionState};
use crate::types::Instance;

// ─── Sort orders ──────────────────────────────────────────────────────────────

/// Buyer-focused ordering: bids descending by density, asks ascending by
/// density. Stable, so ties keep index order and reruns are bit-identical.
pub(crate) fn sort_by_density(state: &mut AuctionState) {
    let AuctionState {
        bid_order,
        ask_order,
        bid_metrics,
        ask_metrics,
        ..
    } = state;
    bid_order.sort_by(|&a, &b| {
        bid_metrics.density[b]
            .partial_cmp(&bid_metrics.density[a])
            .unwrap_or(Ordering::Equal)
    });
    ask_order.sort_by(|&a, &b| {
        ask_metrics.density[a]
            .partial_cmp(&ask_metrics.density[b])
            .unwrap_or(Ordering::Equal)
    });
}

/// Seller-focused ordering: bids ascending by average price, asks
/// descending by average price.
pub(crate) fn sort_by_avg_price(state: &mut AuctionState) {
    let AuctionState {
        bid_order,
        ask_order,
        bid_metrics,
        ask_metrics,
        ..
    } = state;
    bid_order.sort_by(|&a, &b| {
        bid_metrics.avg_price[a]
            .partial_cmp(&bid_metrics.avg_price[b])
            .unwrap_or(Ordering::Equal)
    });
    ask_order.sort_by(|&a, &b| {
        ask_metrics.avg_price[b]
            .partial_cmp(&ask_metrics.avg_price[a])
            .unwrap_or(Ordering::Equal)
    });
}

// ─── One-pass walks ───────────────────────────────────────────────────────────

pub(crate) struct PassOutcome {
    pub welfare: f64,
    /// Position (within the walked ordering) of the last matched order.
    pub critical: usize,
}

/// Two-pointer walk over the current orderings, buyer side leading: each
/// bid in turn is offered the current ask; a match advances the bid
/// pointer, the ask pointer advances unconditionally.
pub(crate) fn buyer_pass(
    instance: &Instance,
    bid_order: &[usize],
    ask_order: &[usize],
    alloc: &mut Allocation,
) -> PassOutcome {
    alloc.clear();
    let mut out = PassOutcome {
        welfare: 0.0,
        critical: 0,
    };
    let (mut i, mut j) = (0, 0);
    while i < bid_order.len() && j < ask_order.len() {
        let (b, a) = (bid_order[i], ask_order[j]);
        if instance.can_allocate(b, a) {
            alloc.assign(b, a);
            out.welfare += instance.bids().value(b) - instance.asks().value(a);
            out.critical = i;
            i += 1;
        }
        j += 1;
    }
    out
}

/// Mirror walk with the seller side leading: a match advances the ask
/// pointer, the bid pointer advances unconditionally. `critical` is the
/// position of the last matched ask.
pub(crate) fn seller_pass(
    instance: &Instance,
    bid_order: &[usize],
    ask_order: &[usize],
    alloc: &mut Allocation,
) -> PassOutcome {
    alloc.clear();
    let mut out = PassOutcome {
        welfare: 0.0,
        critical: 0,
    };
    let (mut i, mut j) = (0, 0);
    while i < bid_order.len() && j < ask_order.len() {
        let (b, a) = (bid_order[i], ask_order[j]);
        if instance.can_allocate(b, a) {
            alloc.assign(b, a);
            out.welfare += instance.bids().value(b) - instance.asks().value(a);
            out.critical = j;
            j += 1;
        }
        i += 1;
    }
    out
}

// ─── Greedy allocators ────────────────────────────────────────────────────────

/// GREEDY1/2/3: density-ordered one-pass greedy. The relevance mode only
/// changes the density metric, precomputed at construction.
pub(crate) fn greedy_buyers(state: &mut AuctionState) {
    sort_by_density(state);
    let AuctionState {
        instance,
        bid_order,
        ask_order,
        allocation,
        welfare,
        ..
    } = state;
    *welfare = buyer_pass(instance, bid_order, ask_order, allocation).welfare;
}

/// GREEDY1S: average-price-ordered greedy with the seller side leading.
pub(crate) fn greedy_sellers(state: &mut AuctionState) {
    sort_by_avg_price(state);
    let AuctionState {
        instance,
        bid_order,
        ask_order,
        allocation,
        welfare,
        ..
    } = state;
    *welfare = seller_pass(instance, bid_order, ask_order, allocation).welfare;
}
