use std::cmp::Ordering;

use good_lp::solvers::highs::highs;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel, Variable};
use tracing::debug;

use crate::auction::{AuctionError, AuctionState};
use crate::greedy::buyer_pass;
use crate::types::Instance;

struct WdpVars {
    x: Vec<Variable>,
    y: Vec<Vec<Variable>>,
}

/// Decision variables: x_i per bidder, y_ij per bidder/seller pair.
/// Binary for the exact solve, relaxed to [0, 1] for the rounding heuristic.
fn declare_variables(
    vars: &mut good_lp::ProblemVariables,
    n: usize,
    m: usize,
    binary: bool,
) -> WdpVars {
    let def = |name: String| {
        if binary {
            variable().binary().name(name)
        } else {
            variable().min(0.0).max(1.0).name(name)
        }
    };
    let x: Vec<Variable> = (0..n).map(|i| vars.add(def(format!("x{i}")))).collect();
    let y: Vec<Vec<Variable>> = (0..n)
        .map(|i| (0..m).map(|j| vars.add(def(format!("y{i}_{j}")))).collect())
        .collect();
    WdpVars { x, y }
}

/// Reported welfare: Σᵢ v_bid·x_i − Σᵢⱼ v_ask·y_ij.
fn objective(instance: &Instance, dv: &WdpVars) -> Expression {
    let revenue: Expression = dv
        .x
        .iter()
        .enumerate()
        .map(|(i, &xi)| xi * instance.bids().value(i))
        .sum();
    let cost: Expression = dv
        .y
        .iter()
        .flat_map(|row| row.iter().enumerate())
        .map(|(j, &yij)| yij * instance.asks().value(j))
        .sum();
    revenue - cost
}

fn add_constraints<P: SolverModel>(mut problem: P, instance: &Instance, dv: &WdpVars) -> P {
    let n = instance.bids().n();
    let m = instance.asks().n();
    let l = instance.l();

    // Each seller serves at most one bidder.
    for j in 0..m {
        let served: Expression = (0..n).map(|i| dv.y[i][j]).sum();
        problem = problem.with(constraint!(served <= 1));
    }

    // A winning bidder is served by exactly one seller.
    for i in 0..n {
        let served: Expression = (0..m).map(|j| dv.y[i][j]).sum();
        problem = problem.with(constraint!(served - dv.x[i] == 0));
    }

    // The chosen seller covers the bidder's quantities on every resource.
    for i in 0..n {
        for k in 0..l {
            let supplied: Expression = (0..m)
                .map(|j| dv.y[i][j] * f64::from(instance.asks().quantity(j, k)))
                .sum();
            let demanded = dv.x[i] * f64::from(instance.bids().quantity(i, k));
            problem = problem.with(constraint!(demanded - supplied <= 0));
        }
    }

    problem
}

/// CPLEX tag: the winner determination problem as a binary program, solved
/// to optimality by HiGHS.
pub(crate) fn solve_binary(state: &mut AuctionState) -> Result<(), AuctionError> {
    let instance = state.instance.clone();
    let n = instance.bids().n();
    let m = instance.asks().n();
    if n == 0 || m == 0 {
        return Ok(());
    }

    let mut vars = variables!();
    let dv = declare_variables(&mut vars, n, m, true);
    let problem = vars.maximise(objective(&instance, &dv)).using(highs);
    let problem = add_constraints(problem, &instance, &dv);

    debug!(n, m, "solving binary WDP");
    let solution = problem.solve()?;

    let mut welfare = 0.0;
    for i in 0..n {
        for j in 0..m {
            if solution.value(dv.y[i][j]) > 0.5 {
                state.allocation.assign(i, j);
                welfare += instance.bids().value(i) - instance.asks().value(j);
            }
        }
    }
    state.welfare = welfare;
    Ok(())
}

/// RLPS tag: solve the LP relaxation, then run the density-style greedy
/// walk over bids ordered by fractional x̃_i and asks ordered by their
/// fractional load Σᵢ ỹ_ij, both descending.
pub(crate) fn relax_and_round(state: &mut AuctionState) -> Result<(), AuctionError> {
    let instance = state.instance.clone();
    let n = instance.bids().n();
    let m = instance.asks().n();
    if n == 0 || m == 0 {
        return Ok(());
    }

    let mut vars = variables!();
    let dv = declare_variables(&mut vars, n, m, false);
    let problem = vars.maximise(objective(&instance, &dv)).using(highs);
    let problem = add_constraints(problem, &instance, &dv);

    debug!(n, m, "solving LP relaxation");
    let solution = problem.solve()?;

    let x_frac: Vec<f64> = dv.x.iter().map(|&xi| solution.value(xi)).collect();
    let load_frac: Vec<f64> = (0..m)
        .map(|j| (0..n).map(|i| solution.value(dv.y[i][j])).sum())
        .collect();

    state.bid_order.sort_by(|&a, &b| {
        x_frac[b].partial_cmp(&x_frac[a]).unwrap_or(Ordering::Equal)
    });
    state.ask_order.sort_by(|&a, &b| {
        load_frac[b].partial_cmp(&load_frac[a]).unwrap_or(Ordering::Equal)
    });

    state.welfare = buyer_pass(
        &instance,
        &state.bid_order,
        &state.ask_order,
        &mut state.allocation,
    )
    .welfare;
    Ok(())
}
