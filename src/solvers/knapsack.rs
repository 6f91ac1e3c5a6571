use itertools::Itertools;

use crate::decomp::Subproblem;
use crate::pricing::column_pool::Column;
use crate::pricing::job::SolverLimits;
use crate::pricing::solver::{
    PricingSolver, SolveOutcome, SolveStatus, SolverError, SubproblemUpdate,
};
use crate::pricing::REDCOST_TOL;

const INT_TOL: f64 = 1e-9;

/// Per-block knapsack model. Only blocks of the shape
/// `min c'x  s.t.  w'x <= C,  0 <= x <= u,  x integral`
/// with nonnegative integral weights are recognized.
struct KnapsackModel {
    capacity: u64,
    weights: Vec<u64>,
    ub: Vec<f64>,
    objectives: Vec<f64>,
    conv_dual: f64,
    /// Set when an update pushed something the structure cannot absorb
    invalid: bool,
}

/// Specialized pricing solver for knapsack-structured blocks. Exact mode
/// runs a bounded-knapsack dynamic program and yields a proven lower
/// bound; heuristic mode is a profit/weight greedy without any claim.
/// Blocks of any other shape report `NotApplicable` so the cursor moves
/// on to a generic solver.
pub struct KnapsackSolver {
    models: Vec<Option<KnapsackModel>>,
}

impl Default for KnapsackSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KnapsackSolver {
    pub fn new() -> Self {
        KnapsackSolver { models: Vec::new() }
    }

    fn recognize(sub: &Subproblem) -> Option<KnapsackModel> {
        if sub.conss.len() != 1 {
            return None;
        }
        let cons = &sub.conss[0];
        if cons.lhs.is_finite() || !cons.rhs.is_finite() || cons.rhs < 0.0 {
            return None;
        }
        let mut weights = vec![0u64; sub.vars.len()];
        for (j, a) in &cons.coefs {
            if *a < 0.0 || (a - a.round()).abs() > INT_TOL {
                return None;
            }
            weights[*j] = a.round() as u64;
        }
        for var in &sub.vars {
            if !var.integral || var.lb != 0.0 {
                return None;
            }
        }
        Some(KnapsackModel {
            capacity: cons.rhs.floor() as u64,
            weights,
            ub: sub.vars.iter().map(|v| v.ub).collect(),
            objectives: vec![0.0; sub.vars.len()],
            conv_dual: 0.0,
            invalid: false,
        })
    }

    /// A zero-weight variable with unbounded range and negative cost
    /// makes the block unbounded; the unit direction is the ray.
    fn find_ray(model: &KnapsackModel, probnr: usize) -> Option<Column> {
        for (j, w) in model.weights.iter().enumerate() {
            if *w == 0 && model.ub[j].is_infinite() && model.objectives[j] < -INT_TOL {
                let redcost = model.objectives[j];
                return Some(Column::new(probnr, vec![(j, 1.0)], true, redcost));
            }
        }
        None
    }

    /// Units each variable can take at most within the capacity
    fn max_units(model: &KnapsackModel, j: usize) -> u64 {
        let by_bound = if model.ub[j].is_finite() {
            model.ub[j].floor() as u64
        } else {
            u64::MAX
        };
        if model.weights[j] == 0 {
            by_bound
        } else {
            by_bound.min(model.capacity / model.weights[j])
        }
    }

    /// Take every profitable zero-weight variable at its (finite) bound
    fn fixed_take(model: &KnapsackModel, taken: &mut [u64]) {
        for (j, w) in model.weights.iter().enumerate() {
            if *w == 0 && -model.objectives[j] > INT_TOL && model.ub[j].is_finite() {
                taken[j] = model.ub[j].floor() as u64;
            }
        }
    }

    fn solve_dp(model: &KnapsackModel) -> Vec<u64> {
        struct Bundle {
            var: usize,
            units: u64,
            weight: usize,
            profit: f64,
        }

        let cap = model.capacity as usize;
        let mut bundles: Vec<Bundle> = Vec::new();
        for j in 0..model.weights.len() {
            let weight = model.weights[j];
            let profit = -model.objectives[j];
            if profit <= INT_TOL || weight == 0 || weight > model.capacity {
                continue;
            }
            // binary splitting keeps the 0/1 program pseudo-polynomial
            let mut left = Self::max_units(model, j);
            let mut size = 1u64;
            while left > 0 {
                let units = size.min(left);
                bundles.push(Bundle {
                    var: j,
                    units,
                    weight: (weight * units) as usize,
                    profit: profit * units as f64,
                });
                left -= units;
                size = size.saturating_mul(2);
            }
        }

        let n = bundles.len();
        let mut dp = vec![vec![0.0f64; cap + 1]; n + 1];
        for i in 1..=n {
            let b = &bundles[i - 1];
            for c in 0..=cap {
                let skip = dp[i - 1][c];
                let take = if b.weight <= c {
                    dp[i - 1][c - b.weight] + b.profit
                } else {
                    f64::NEG_INFINITY
                };
                dp[i][c] = skip.max(take);
            }
        }

        let mut taken = vec![0u64; model.weights.len()];
        let mut c = cap;
        for i in (1..=n).rev() {
            let b = &bundles[i - 1];
            if dp[i][c] > dp[i - 1][c] + 1e-12 {
                taken[b.var] += b.units;
                c -= b.weight;
            }
        }
        Self::fixed_take(model, &mut taken);
        taken
    }

    fn greedy(model: &KnapsackModel) -> Vec<u64> {
        let mut taken = vec![0u64; model.weights.len()];
        let order = (0..model.weights.len())
            .filter(|j| model.weights[*j] > 0 && -model.objectives[*j] > INT_TOL)
            .sorted_by(|a, b| {
                let ratio_a = -model.objectives[*a] / model.weights[*a] as f64;
                let ratio_b = -model.objectives[*b] / model.weights[*b] as f64;
                ratio_b.total_cmp(&ratio_a)
            });
        let mut cap_left = model.capacity;
        for j in order {
            let units = Self::max_units(model, j).min(cap_left / model.weights[j]);
            if units > 0 {
                taken[j] = units;
                cap_left -= units * model.weights[j];
            }
        }
        Self::fixed_take(model, &mut taken);
        taken
    }

    fn column_from_taken(model: &KnapsackModel, probnr: usize, taken: &[u64]) -> (f64, Option<Column>) {
        let objval: f64 = taken
            .iter()
            .enumerate()
            .map(|(j, x)| model.objectives[j] * *x as f64)
            .sum();
        let redcost = objval - model.conv_dual;
        if redcost < -REDCOST_TOL {
            let entries = taken
                .iter()
                .enumerate()
                .filter(|(_, x)| **x > 0)
                .map(|(j, x)| (j, *x as f64))
                .collect();
            (objval, Some(Column::new(probnr, entries, false, redcost)))
        } else {
            (objval, None)
        }
    }

    fn model(&self, probnr: usize) -> Option<&KnapsackModel> {
        self.models
            .get(probnr)
            .and_then(|m| m.as_ref())
            .filter(|m| !m.invalid)
    }
}

impl PricingSolver for KnapsackSolver {
    fn name(&self) -> &'static str {
        "knapsack"
    }

    fn description(&self) -> &'static str {
        "dynamic program for knapsack-structured pricing subproblems"
    }

    fn priority(&self) -> i32 {
        200
    }

    fn heuristic_enabled(&self) -> bool {
        true
    }

    fn exact_enabled(&self) -> bool {
        true
    }

    fn init_sol(&mut self, subproblems: &[Subproblem]) -> Result<(), SolverError> {
        self.models = subproblems.iter().map(Self::recognize).collect();
        Ok(())
    }

    fn exit_sol(&mut self) {
        self.models.clear();
    }

    fn update(&mut self, probnr: usize, update: &SubproblemUpdate) -> Result<(), SolverError> {
        let Some(model) = self.models.get_mut(probnr).and_then(|m| m.as_mut()) else {
            return Ok(());
        };
        model.objectives.clone_from(&update.objectives);
        model.conv_dual = update.convexity_dual;
        if let Some(bounds) = &update.bounds {
            for (j, (lb, ub)) in bounds.iter().enumerate() {
                if *lb != 0.0 {
                    // a raised lower bound leaves the recognized shape
                    model.invalid = true;
                }
                model.ub[j] = *ub;
            }
        }
        if !update.branch_conss.is_empty() {
            // an extra row makes the block a general MIP
            model.invalid = true;
        }
        Ok(())
    }

    fn solve_heuristic(
        &mut self,
        probnr: usize,
        _limits: &SolverLimits,
    ) -> Result<SolveOutcome, SolverError> {
        let Some(model) = self.model(probnr) else {
            return Ok(SolveOutcome::status_only(SolveStatus::NotApplicable));
        };
        if let Some(ray) = Self::find_ray(model, probnr) {
            return Ok(SolveOutcome {
                status: SolveStatus::Unbounded,
                lower_bound: None,
                columns: vec![ray],
                stats: Default::default(),
            });
        }
        let taken = Self::greedy(model);
        let (_, column) = Self::column_from_taken(model, probnr, &taken);
        Ok(SolveOutcome {
            status: SolveStatus::Unknown,
            lower_bound: None,
            columns: column.into_iter().collect(),
            stats: Default::default(),
        })
    }

    fn solve_exact(&mut self, probnr: usize) -> Result<SolveOutcome, SolverError> {
        let Some(model) = self.model(probnr) else {
            return Ok(SolveOutcome::status_only(SolveStatus::NotApplicable));
        };
        if let Some(ray) = Self::find_ray(model, probnr) {
            return Ok(SolveOutcome {
                status: SolveStatus::Unbounded,
                lower_bound: None,
                columns: vec![ray],
                stats: Default::default(),
            });
        }
        let taken = Self::solve_dp(model);
        let (objval, column) = Self::column_from_taken(model, probnr, &taken);
        Ok(SolveOutcome {
            status: SolveStatus::Optimal,
            lower_bound: Some(objval - model.conv_dual),
            columns: column.into_iter().collect(),
            stats: Default::default(),
        })
    }
}
