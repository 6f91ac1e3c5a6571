use compare::Compare;
use std::cmp::Ordering;

use crate::pricing::solver::{BackendStats, LimitHit, SolverRegistry, SubproblemUpdate};

/// Sentinel for an unbounded node or solution count
pub const NO_LIMIT: u64 = u64::MAX;

/// Start values and growth factors for the adaptive solver limits.
///
/// A factor above 1.0 multiplies the limit on escalation, a factor at or
/// below 1.0 adds the start value instead. The gap factor works the other
/// way around: below 1.0 it shrinks the gap, otherwise the gap drops to
/// zero at once.
#[derive(Clone, Debug)]
pub struct LimitSettings {
    pub start_node_limit: u64,
    pub node_limit_fac: f64,
    pub start_gap_limit: f64,
    pub gap_limit_fac: f64,
    pub start_sol_limit: u64,
    pub sol_limit_fac: f64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        LimitSettings {
            start_node_limit: 1_000,
            node_limit_fac: 10.0,
            start_gap_limit: 0.2,
            gap_limit_fac: 0.8,
            start_sol_limit: 10,
            sol_limit_fac: 10.0,
        }
    }
}

/// Current node, gap and solution limits of one job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverLimits {
    pub nodes: u64,
    pub gap: f64,
    pub solutions: u64,
}

impl SolverLimits {
    pub fn from_settings(settings: &LimitSettings) -> Self {
        SolverLimits {
            nodes: settings.start_node_limit,
            gap: settings.start_gap_limit,
            solutions: settings.start_sol_limit,
        }
    }

    /// Limits of an exact solve: unbounded nodes and solutions, zero gap
    pub fn exact() -> Self {
        SolverLimits {
            nodes: NO_LIMIT,
            gap: 0.0,
            solutions: NO_LIMIT,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.nodes == NO_LIMIT && self.gap == 0.0 && self.solutions == NO_LIMIT
    }
}

/// Which limit an escalation step touched
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Escalation {
    Nodes(u64),
    Gap(f64),
    Solutions(u64),
    Exact,
}

/// How pricing subproblems are ranked for solver attempts. The formula
/// only influences the attempt order, never correctness; tie-breaks are
/// always by ascending problem index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScoringMode {
    /// Dual value of the block's convexity constraint
    ConvexityDual,
    /// Recent column yield, damped by the columns already generated
    #[default]
    RecentYield,
    /// No ordering besides the problem index
    Uniform,
}

fn grow(limit: u64, fac: f64, start: u64) -> u64 {
    if fac > 1.0 {
        (limit as f64 * fac).min(9.0e18) as u64
    } else {
        limit.saturating_add(start)
    }
}

/// One unit of scheduled pricing work: a subproblem paired with a cursor
/// into the solver registry, a mode, and the adaptive limits of the
/// current attempt. Jobs live for a single pricing round.
pub struct PricingJob {
    probnr: usize,
    heuristic: bool,
    chunk: usize,
    score: f64,
    solver_cursor: Option<usize>,
    n_heur_iters: u32,
    limits: SolverLimits,
    update: SubproblemUpdate,
    needs_update: bool,
}

impl PricingJob {
    pub fn new(probnr: usize, update: SubproblemUpdate) -> Self {
        PricingJob {
            probnr,
            heuristic: false,
            chunk: 0,
            score: 0.0,
            solver_cursor: None,
            n_heur_iters: 0,
            limits: SolverLimits::exact(),
            update,
            needs_update: true,
        }
    }

    /// Compute the job's priority score and fix its mode for this round
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        &mut self,
        heuristic: bool,
        scoring: ScoringMode,
        ncols_recent: u32,
        conv_dual: f64,
        npoints: u64,
        nrays: u64,
        registry: &SolverRegistry,
        limit_settings: &LimitSettings,
    ) {
        self.heuristic = heuristic;
        self.limits = if heuristic {
            SolverLimits::from_settings(limit_settings)
        } else {
            SolverLimits::exact()
        };
        self.score = match scoring {
            ScoringMode::ConvexityDual => conv_dual,
            ScoringMode::RecentYield => {
                f64::from(ncols_recent) / (1 + npoints + nrays) as f64
            }
            ScoringMode::Uniform => 0.0,
        };
        self.n_heur_iters = 0;
        self.reset_solver(registry);
    }

    pub fn probnr(&self) -> usize {
        self.probnr
    }

    pub fn is_heuristic(&self) -> bool {
        self.heuristic
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    pub fn set_chunk(&mut self, chunk: usize) {
        self.chunk = chunk;
    }

    pub fn limits(&self) -> &SolverLimits {
        &self.limits
    }

    pub fn update_payload(&self) -> &SubproblemUpdate {
        &self.update
    }

    /// Index of the active solver in the registry, `None` once the cursor
    /// is exhausted for the current mode
    pub fn current_solver(&self) -> Option<usize> {
        self.solver_cursor
    }

    /// Rewind the cursor to the highest-priority solver for the mode
    pub fn reset_solver(&mut self, registry: &SolverRegistry) {
        self.solver_cursor = registry.next_supporting(0, self.heuristic);
        self.needs_update = true;
    }

    /// Advance to the next solver in priority order that supports the
    /// current mode
    pub fn next_solver(&mut self, registry: &SolverRegistry) {
        self.solver_cursor = self
            .solver_cursor
            .and_then(|c| registry.next_supporting(c + 1, self.heuristic));
        self.needs_update = true;
    }

    /// Convert the job to exact mode in place: limits go to their exact
    /// sentinels and the cursor rewinds over the exact-capable solvers.
    pub fn set_exact(&mut self, registry: &SolverRegistry) {
        self.heuristic = false;
        self.limits = SolverLimits::exact();
        self.reset_solver(registry);
    }

    pub fn n_heur_iters(&self) -> u32 {
        self.n_heur_iters
    }

    pub fn reset_heuristic(&mut self) {
        self.n_heur_iters = 0;
    }

    pub fn increase_n_heur_iters(&mut self) {
        self.n_heur_iters += 1;
    }

    /// Whether the active solver still needs an `update` call before the
    /// next solve; consumed by the dispatcher.
    pub fn take_needs_update(&mut self) -> bool {
        std::mem::replace(&mut self.needs_update, false)
    }

    /// Relax exactly one limit based on what the backend ran into.
    /// Only meaningful for heuristic jobs after a `SolverLimit` outcome.
    pub fn escalate_limits(&mut self, stats: &BackendStats, settings: &LimitSettings) -> Escalation {
        debug_assert!(self.heuristic);
        if stats.limit_hit == Some(LimitHit::Nodes)
            && stats.solutions > 0
            && stats.nodes > self.limits.nodes
        {
            self.limits.nodes = grow(
                self.limits.nodes,
                settings.node_limit_fac,
                settings.start_node_limit,
            );
            Escalation::Nodes(self.limits.nodes)
        } else if stats.limit_hit == Some(LimitHit::Gap) && self.limits.gap > 0.0 {
            self.limits.gap = if settings.gap_limit_fac < 1.0 {
                self.limits.gap * settings.gap_limit_fac
            } else {
                0.0
            };
            Escalation::Gap(self.limits.gap)
        } else {
            self.limits.solutions = grow(
                self.limits.solutions,
                settings.sol_limit_fac,
                settings.start_sol_limit,
            );
            Escalation::Solutions(self.limits.solutions)
        }
    }
}

#[derive(Clone, Default)]
/// Orders jobs by descending score, ties by ascending problem index.
/// The same comparator drives the setup sort and the dispatch heap, so
/// two runs over identical inputs dispatch in identical order.
pub struct JobComparator;

impl Compare<PricingJob> for JobComparator {
    fn compare(&self, l: &PricingJob, r: &PricingJob) -> Ordering {
        l.score
            .total_cmp(&r.score)
            .then_with(|| r.probnr.cmp(&l.probnr))
    }
}
