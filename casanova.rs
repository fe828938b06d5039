use std::cmp::Ordering;
use std::collections::HashMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::auction::AuctionState;
use crate::types::Instance;

/// Walk probability: chance of inserting a uniformly random candidate
/// instead of following the age heuristic.
const WP: f64 = 0.15;
/// Novelty probability: chance of preferring the second-best candidate
/// when the best one is not the oldest.
const NP: f64 = 0.5;
const MAX_TRIES: usize = 10;

/// Working state of a single try. `matched` is a sparse seller→bidder map;
/// only the best try is ever materialized into the allocation matrix.
struct Try {
    bid_pool: Vec<usize>,
    ask_pool: Vec<usize>,
    matched: HashMap<usize, usize>,
    /// Era of last allocation per order; −1 means never allocated.
    birthday: Vec<i64>,
    welfare: f64,
    era: usize,
    last_improved: usize,
}

impl Try {
    fn age(&self, order: usize) -> i64 {
        self.era as i64 - self.birthday[order]
    }
}

/// Pick a pool position: with probability `WP` a uniformly random one,
/// otherwise the front unless the runner-up is at least as old and a
/// novelty draw favors it.
fn pick_position(t: &Try, pool: &[usize], rng: &mut ChaCha8Rng) -> usize {
    if rng.gen::<f64>() < WP {
        return rng.gen_range(0..pool.len());
    }
    if pool.len() == 1 || t.age(pool[0]) > t.age(pool[1]) {
        0
    } else if rng.gen::<f64>() < NP {
        1
    } else {
        0
    }
}

// ─── CASANOVA (buyer side) ────────────────────────────────────────────────────

/// CASANOVA. Up to `MAX_TRIES` soft-restarted tries; each try works
/// through a bid pool sorted descending by average price and an ask pool
/// sorted ascending by density, inserting bids until the step limit runs
/// out, a pool drains, or progress stalls past the θ threshold. The best
/// try across restarts becomes the allocation.
pub(crate) fn search_buyers(state: &mut AuctionState, rng: &mut ChaCha8Rng) {
    let AuctionState {
        instance,
        bid_metrics,
        ask_metrics,
        allocation,
        welfare,
        ..
    } = state;
    let n = instance.bids().n();
    let m = instance.asks().n();
    if n == 0 || m == 0 {
        return;
    }

    let mut bids_sorted: Vec<usize> = (0..n).collect();
    bids_sorted.sort_by(|&a, &b| {
        bid_metrics.avg_price[b]
            .partial_cmp(&bid_metrics.avg_price[a])
            .unwrap_or(Ordering::Equal)
    });
    let mut asks_sorted: Vec<usize> = (0..m).collect();
    asks_sorted.sort_by(|&a, &b| {
        ask_metrics.density[a]
            .partial_cmp(&ask_metrics.density[b])
            .unwrap_or(Ordering::Equal)
    });

    let max_steps = n;
    let theta = (n / 4).max(1);

    let mut best_welfare = 0.0;
    let mut best_pairs: Vec<(usize, usize)> = Vec::new();

    for _ in 0..MAX_TRIES {
        let mut t = Try {
            bid_pool: bids_sorted.clone(),
            ask_pool: asks_sorted.clone(),
            matched: HashMap::new(),
            birthday: vec![-1; n],
            welfare: 0.0,
            era: 0,
            last_improved: 0,
        };
        while t.era < max_steps
            && !t.bid_pool.is_empty()
            && !t.ask_pool.is_empty()
            && (t.era < theta || t.era - t.last_improved < theta / 2)
        {
            let pick = pick_position(&t, &t.bid_pool, rng);
            insert_bid(instance, &bid_metrics.avg_price, &asks_sorted, &mut t, pick);
            t.era += 1;
        }
        if t.welfare > best_welfare {
            best_welfare = t.welfare;
            best_pairs = t.matched.iter().map(|(&j, &i)| (i, j)).collect();
        }
    }

    for &(i, j) in &best_pairs {
        allocation.assign(i, j);
    }
    *welfare = best_welfare;
}

/// Try to allocate the bid at pool position `pick`: first against a free
/// ask, otherwise by displacing a strictly lower-valued bid from an
/// already-matched ask. The displaced bid rejoins the pool at its
/// average-price rank.
fn insert_bid(
    instance: &Instance,
    bid_avg: &[f64],
    asks_sorted: &[usize],
    t: &mut Try,
    pick: usize,
) {
    let bid = t.bid_pool[pick];

    if let Some(pos) = t.ask_pool.iter().position(|&j| instance.can_allocate(bid, j)) {
        let j = t.ask_pool.remove(pos);
        t.matched.insert(j, bid);
        t.welfare += instance.bids().value(bid) - instance.asks().value(j);
        t.birthday[bid] = t.era as i64;
        t.last_improved = t.era;
        t.bid_pool.remove(pick);
        return;
    }

    for &j in asks_sorted {
        let Some(&holder) = t.matched.get(&j) else {
            continue;
        };
        if instance.can_allocate(bid, j)
            && instance.bids().value(bid) > instance.bids().value(holder)
        {
            t.matched.insert(j, bid);
            t.welfare += instance.bids().value(bid) - instance.bids().value(holder);
            t.birthday[bid] = t.era as i64;
            t.last_improved = t.era;
            t.bid_pool.remove(pick);
            let back = t
                .bid_pool
                .iter()
                .position(|&b| bid_avg[b] < bid_avg[holder])
                .unwrap_or(t.bid_pool.len());
            t.bid_pool.insert(back, holder);
            return;
        }
    }
}

// ─── CASANOVAS (seller side) ──────────────────────────────────────────────────

/// CASANOVAS: the seller-side mirror. Asks are the worked pool (ascending
/// average price), bids the counterpart list (descending density); the
/// displacement rule prefers the strictly cheaper ask.
pub(crate) fn search_sellers(state: &mut AuctionState, rng: &mut ChaCha8Rng) {
    let AuctionState {
        instance,
        bid_metrics,
        ask_metrics,
        allocation,
        welfare,
        ..
    } = state;
    let n = instance.bids().n();
    let m = instance.asks().n();
    if n == 0 || m == 0 {
        return;
    }

    let mut bids_sorted: Vec<usize> = (0..n).collect();
    bids_sorted.sort_by(|&a, &b| {
        bid_metrics.density[b]
            .partial_cmp(&bid_metrics.density[a])
            .unwrap_or(Ordering::Equal)
    });
    let mut asks_sorted: Vec<usize> = (0..m).collect();
    asks_sorted.sort_by(|&a, &b| {
        ask_metrics.avg_price[a]
            .partial_cmp(&ask_metrics.avg_price[b])
            .unwrap_or(Ordering::Equal)
    });

    let max_steps = m;
    let theta = (m / 4).max(1);

    let mut best_welfare = 0.0;
    let mut best_pairs: Vec<(usize, usize)> = Vec::new();

    for _ in 0..MAX_TRIES {
        let mut t = Try {
            bid_pool: bids_sorted.clone(),
            ask_pool: asks_sorted.clone(),
            matched: HashMap::new(),
            birthday: vec![-1; m],
            welfare: 0.0,
            era: 0,
            last_improved: 0,
        };
        while t.era < max_steps
            && !t.bid_pool.is_empty()
            && !t.ask_pool.is_empty()
            && (t.era < theta || t.era - t.last_improved < theta / 2)
        {
            let pick = pick_position(&t, &t.ask_pool, rng);
            insert_ask(instance, &ask_metrics.avg_price, &bids_sorted, &mut t, pick);
            t.era += 1;
        }
        if t.welfare > best_welfare {
            best_welfare = t.welfare;
            best_pairs = t.matched.iter().map(|(&j, &i)| (i, j)).collect();
        }
    }

    for &(i, j) in &best_pairs {
        allocation.assign(i, j);
    }
    *welfare = best_welfare;
}

/// Seller-side insert: first a free bidder from the pool, otherwise steal
/// a matched bidder whose current seller asks strictly more. The displaced
/// ask rejoins the pool at its average-price rank.
fn insert_ask(
    instance: &Instance,
    ask_avg: &[f64],
    bids_sorted: &[usize],
    t: &mut Try,
    pick: usize,
) {
    let ask = t.ask_pool[pick];

    if let Some(pos) = t.bid_pool.iter().position(|&i| instance.can_allocate(i, ask)) {
        let i = t.bid_pool.remove(pos);
        t.matched.insert(ask, i);
        t.welfare += instance.bids().value(i) - instance.asks().value(ask);
        t.birthday[ask] = t.era as i64;
        t.last_improved = t.era;
        t.ask_pool.remove(pick);
        return;
    }

    for &i in bids_sorted {
        let Some(current) = t
            .matched
            .iter()
            .find(|&(_, &b)| b == i)
            .map(|(&j, _)| j)
        else {
            continue;
        };
        if instance.can_allocate(i, ask)
            && instance.asks().value(ask) < instance.asks().value(current)
        {
            t.matched.remove(&current);
            t.matched.insert(ask, i);
            t.welfare += instance.asks().value(current) - instance.asks().value(ask);
            t.birthday[ask] = t.era as i64;
            t.last_improved = t.era;
            t.ask_pool.remove(pick);
            let back = t
                .ask_pool
                .iter()
                .position(|&a| ask_avg[a] > ask_avg[current])
                .unwrap_or(t.ask_pool.len());
            t.ask_pool.insert(back, current);
            return;
        }
    }
}
