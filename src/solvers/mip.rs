use crate::decomp::{LinCons, Subproblem};
use crate::pricing::column_pool::Column;
use crate::pricing::job::{SolverLimits, NO_LIMIT};
use crate::pricing::solver::{
    BackendStats, LimitHit, PricingSolver, SolveOutcome, SolveStatus, SolverError,
    SubproblemUpdate,
};
use crate::pricing::REDCOST_TOL;

/// Termination state of one backend solve
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipStatus {
    Optimal,
    Infeasible,
    Unbounded,
    NodeLimit,
    GapLimit,
    SolutionLimit,
    TimeLimit,
}

/// What a backend reports back from one solve
#[derive(Clone, Debug)]
pub struct MipOutcome {
    pub status: MipStatus,
    /// Dual bound on the pricing objective
    pub best_bound: f64,
    pub gap: f64,
    pub nodes: u64,
    pub sol_count: u64,
    /// Feasible points found, best first, dense over the block's variables
    pub solutions: Vec<Vec<f64>>,
}

/// Seam to a branch-and-bound MIP backend for one pricing subproblem.
///
/// One backend instance holds one subproblem's model; `MipSolver` keeps
/// one instance per block. All calls happen under the registry's solver
/// lock, so implementations need no internal synchronization.
pub trait MipBackend: Send {
    fn build(&mut self, sub: &Subproblem) -> Result<(), SolverError>;
    fn set_objective(&mut self, objectives: &[f64]) -> Result<(), SolverError>;
    fn set_bounds(&mut self, bounds: &[(f64, f64)]) -> Result<(), SolverError>;
    fn add_row(&mut self, cons: &LinCons) -> Result<(), SolverError>;
    fn set_limits(&mut self, limits: &SolverLimits) -> Result<(), SolverError>;
    fn set_presolve(&mut self, enabled: bool) -> Result<(), SolverError>;
    fn solve(&mut self) -> Result<MipOutcome, SolverError>;
    /// Primal ray of the last solve, if one is available
    fn extract_ray(&mut self) -> Result<Option<Vec<f64>>, SolverError>;
}

/// Generic MIP-based pricing solver over a pluggable backend.
///
/// Supports both modes: heuristic solves run under the job's current
/// node/gap/solution limits, exact solves under the exact sentinels.
pub struct MipSolver<B: MipBackend> {
    name: &'static str,
    priority: i32,
    backends: Vec<B>,
    subproblems: Vec<Subproblem>,
    objectives: Vec<Vec<f64>>,
    conv_duals: Vec<f64>,
    n_branch_rows: Vec<usize>,
    factory: Box<dyn Fn() -> B + Send>,
}

impl<B: MipBackend> MipSolver<B> {
    pub fn new(name: &'static str, priority: i32, factory: Box<dyn Fn() -> B + Send>) -> Self {
        MipSolver {
            name,
            priority,
            backends: Vec::new(),
            subproblems: Vec::new(),
            objectives: Vec::new(),
            conv_duals: Vec::new(),
            n_branch_rows: Vec::new(),
            factory,
        }
    }

    /// Round integer-constrained ray components away from zero, toward
    /// the objective-improving direction. A mis-rounded ray would leave
    /// the recession cone or stop improving, so the result is validated
    /// by the caller.
    fn round_ray(sub: &Subproblem, mut ray: Vec<f64>) -> Vec<f64> {
        for (j, v) in ray.iter_mut().enumerate() {
            if sub.vars[j].integral {
                *v = if *v > 0.0 { v.ceil() } else { v.floor() };
            }
        }
        ray
    }

    /// Recover a valid improving ray from an unbounded subproblem.
    /// Backends may lose the ray to presolve; in that case presolve is
    /// disabled for one re-solve. Failure is soft: the caller downgrades
    /// to `Unknown`.
    fn recover_ray(&mut self, probnr: usize) -> Result<Option<Column>, SolverError> {
        let backend = &mut self.backends[probnr];
        let mut ray = backend.extract_ray()?;
        if ray.is_none() {
            backend.set_presolve(false)?;
            let resolved = backend.solve();
            let extracted = match resolved {
                Ok(outcome) if outcome.status == MipStatus::Unbounded => backend.extract_ray(),
                Ok(_) | Err(_) => Ok(None),
            };
            backend.set_presolve(true)?;
            ray = extracted?;
        }
        let Some(raw) = ray else {
            return Ok(None);
        };

        let sub = &self.subproblems[probnr];
        let rounded = Self::round_ray(sub, raw);
        let direction_cost: f64 = rounded
            .iter()
            .zip(&self.objectives[probnr])
            .map(|(d, c)| d * c)
            .sum();
        let column = Column::from_dense(probnr, &rounded, true, direction_cost);
        if direction_cost < -REDCOST_TOL && column.check(sub).is_ok() {
            Ok(Some(column))
        } else {
            Ok(None)
        }
    }

    fn columns_from(&self, probnr: usize, solutions: &[Vec<f64>]) -> Vec<Column> {
        let objectives = &self.objectives[probnr];
        let conv_dual = self.conv_duals[probnr];
        solutions
            .iter()
            .map(|x| {
                let objval: f64 = x.iter().zip(objectives).map(|(v, c)| v * c).sum();
                Column::from_dense(probnr, x, false, objval - conv_dual)
            })
            .filter(|col| col.redcost < -REDCOST_TOL)
            .collect()
    }

    fn solve_with_limits(
        &mut self,
        probnr: usize,
        limits: &SolverLimits,
    ) -> Result<SolveOutcome, SolverError> {
        self.backends[probnr].set_limits(limits)?;
        let outcome = self.backends[probnr].solve()?;
        let lower_bound = Some(outcome.best_bound - self.conv_duals[probnr]);
        let stats = BackendStats {
            nodes: outcome.nodes,
            solutions: outcome.sol_count,
            gap: outcome.gap,
            limit_hit: match outcome.status {
                MipStatus::NodeLimit => Some(LimitHit::Nodes),
                MipStatus::GapLimit => Some(LimitHit::Gap),
                MipStatus::SolutionLimit => Some(LimitHit::Solutions),
                _ => None,
            },
        };

        match outcome.status {
            MipStatus::Optimal => Ok(SolveOutcome {
                status: SolveStatus::Optimal,
                lower_bound,
                columns: self.columns_from(probnr, &outcome.solutions),
                stats,
            }),
            MipStatus::Infeasible => Ok(SolveOutcome::status_only(SolveStatus::Infeasible)),
            MipStatus::Unbounded => {
                let ray = self.recover_ray(probnr)?;
                match ray {
                    Some(column) => Ok(SolveOutcome {
                        status: SolveStatus::Unbounded,
                        lower_bound: None,
                        columns: vec![column],
                        stats,
                    }),
                    // no usable ray: this block contributes nothing this
                    // round, which the round tolerates
                    None => Ok(SolveOutcome::status_only(SolveStatus::Unknown)),
                }
            }
            MipStatus::NodeLimit
            | MipStatus::GapLimit
            | MipStatus::SolutionLimit
            | MipStatus::TimeLimit => Ok(SolveOutcome {
                status: SolveStatus::SolverLimit,
                lower_bound,
                columns: self.columns_from(probnr, &outcome.solutions),
                stats,
            }),
        }
    }
}

impl<B: MipBackend> PricingSolver for MipSolver<B> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "branch-and-bound MIP solver for arbitrary pricing subproblems"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn heuristic_enabled(&self) -> bool {
        true
    }

    fn exact_enabled(&self) -> bool {
        true
    }

    fn init_sol(&mut self, subproblems: &[Subproblem]) -> Result<(), SolverError> {
        self.subproblems = subproblems.to_vec();
        self.objectives = subproblems.iter().map(|s| vec![0.0; s.n_vars()]).collect();
        self.conv_duals = vec![0.0; subproblems.len()];
        self.n_branch_rows = vec![0; subproblems.len()];
        self.backends = Vec::with_capacity(subproblems.len());
        for sub in subproblems {
            let mut backend = (self.factory)();
            backend.build(sub)?;
            self.backends.push(backend);
        }
        Ok(())
    }

    fn exit_sol(&mut self) {
        self.backends.clear();
        self.subproblems.clear();
    }

    fn update(&mut self, probnr: usize, update: &SubproblemUpdate) -> Result<(), SolverError> {
        self.objectives[probnr].clone_from(&update.objectives);
        self.conv_duals[probnr] = update.convexity_dual;
        let backend = &mut self.backends[probnr];
        backend.set_objective(&update.objectives)?;
        if let Some(bounds) = &update.bounds {
            backend.set_bounds(bounds)?;
            let sub = &mut self.subproblems[probnr];
            for (var, (lb, ub)) in sub.vars.iter_mut().zip(bounds) {
                var.lb = *lb;
                var.ub = *ub;
            }
        }
        // the branching list only grows; materialize the unseen tail
        let seen = self.n_branch_rows[probnr];
        for (cons, _dual) in &update.branch_conss[seen..] {
            backend.add_row(cons)?;
            self.subproblems[probnr].conss.push(cons.clone());
        }
        self.n_branch_rows[probnr] = update.branch_conss.len();
        Ok(())
    }

    fn solve_heuristic(
        &mut self,
        probnr: usize,
        limits: &SolverLimits,
    ) -> Result<SolveOutcome, SolverError> {
        self.solve_with_limits(probnr, limits)
    }

    fn solve_exact(&mut self, probnr: usize) -> Result<SolveOutcome, SolverError> {
        self.solve_with_limits(probnr, &SolverLimits::exact())
    }
}
