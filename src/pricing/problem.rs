use crate::decomp::LinCons;
use crate::pricing::solver::SolveStatus;

/// Ring buffer over the improving-column counts of the last rounds.
///
/// `advance` opens the slot for a new round, `add` accumulates into the
/// current slot. Queries are O(k) over the fixed window.
#[derive(Clone, Debug)]
pub struct ColHistory {
    ring: Vec<u32>,
    head: usize,
    rounds: u64,
}

impl ColHistory {
    pub fn new(window: usize) -> Self {
        assert!(window > 0);
        ColHistory {
            ring: vec![0; window],
            head: 0,
            rounds: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.ring.len()
    }

    /// Total rounds recorded so far
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn advance(&mut self) {
        self.head = (self.head + 1) % self.ring.len();
        self.ring[self.head] = 0;
        self.rounds += 1;
    }

    pub fn add(&mut self, ncols: u32) {
        self.ring[self.head] += ncols;
    }

    /// Sum of the column counts over the last `k` rounds, including the
    /// current one. `k` must not exceed the window.
    pub fn last_rounds(&self, k: usize) -> u32 {
        debug_assert!(k <= self.ring.len());
        let n = self.ring.len();
        (0..k.min(n)).map(|i| self.ring[(self.head + n - i) % n]).sum()
    }
}

/// Per-block runtime state of one pricing subproblem.
///
/// Created once per block at the start of the solving process and kept
/// across rounds and nodes; only the per-round counters are cleared by
/// `reset`.
#[derive(Clone, Debug)]
pub struct PricingProblem {
    probnr: usize,
    status: SolveStatus,
    lower_bound: f64,
    ncols_round: u32,
    solve_count: u64,
    npoints: u64,
    nrays: u64,
    history: ColHistory,
    branch_conss: Vec<(LinCons, f64)>,
    next_branch_cons: usize,
    branch_conss_materialized: bool,
    bounds_changed: bool,
    updated_this_round: bool,
}

impl PricingProblem {
    pub fn new(probnr: usize, col_history_window: usize) -> Self {
        PricingProblem {
            probnr,
            status: SolveStatus::Unknown,
            lower_bound: f64::NEG_INFINITY,
            ncols_round: 0,
            solve_count: 0,
            npoints: 0,
            nrays: 0,
            history: ColHistory::new(col_history_window),
            branch_conss: Vec::new(),
            next_branch_cons: 0,
            branch_conss_materialized: true,
            bounds_changed: false,
            updated_this_round: false,
        }
    }

    pub fn probnr(&self) -> usize {
        self.probnr
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    /// Lower bound of the current round. Only meaningful while the status
    /// is `Optimal` or `SolverLimit`.
    pub fn lower_bound(&self) -> Option<f64> {
        if self.status.bound_usable() {
            Some(self.lower_bound)
        } else {
            None
        }
    }

    pub fn ncols_round(&self) -> u32 {
        self.ncols_round
    }

    pub fn solve_count(&self) -> u64 {
        self.solve_count
    }

    pub fn npoints(&self) -> u64 {
        self.npoints
    }

    pub fn nrays(&self) -> u64 {
        self.nrays
    }

    pub fn rounds_recorded(&self) -> u64 {
        self.history.rounds()
    }

    /// Clear the per-round counters. Cumulative statistics and the
    /// branching list are untouched; the history window advances so the
    /// new round starts at zero.
    pub fn reset(&mut self) {
        self.status = SolveStatus::Unknown;
        self.lower_bound = f64::NEG_INFINITY;
        self.ncols_round = 0;
        self.history.advance();
        self.updated_this_round = false;
    }

    /// Record the result of this round's job. Must be called at most once
    /// between two `reset` calls.
    pub fn update(&mut self, status: SolveStatus, lower_bound: f64, n_improving_cols: u32) {
        debug_assert!(!self.updated_this_round, "double update within one round");
        self.updated_this_round = true;
        self.status = status;
        if status.bound_usable() {
            self.lower_bound = lower_bound;
        }
        self.ncols_round += n_improving_cols;
        self.history.add(n_improving_cols);
        self.solve_count += 1;
    }

    /// Record how many points and rays the round's job generated
    pub fn record_generated(&mut self, npoints: u64, nrays: u64) {
        self.npoints += npoints;
        self.nrays += nrays;
    }

    /// Sum of improving columns found in the last `k` rounds. This is the
    /// sole signal the controller uses for skip decisions.
    pub fn ncols_last_rounds(&self, k: usize) -> u32 {
        self.history.last_rounds(k)
    }

    /// Append a generic branching row with its dual value. The row is
    /// materialized in the backends through the next `update` call with
    /// changed constraints.
    pub fn add_generic_branching_data(&mut self, cons: LinCons, dual: f64) {
        self.branch_conss.push((cons, dual));
        self.branch_conss_materialized = false;
    }

    /// Branching rows not yet pushed into the backend models
    pub fn pending_branch_conss(&self) -> &[(LinCons, f64)] {
        &self.branch_conss[self.next_branch_cons..]
    }

    pub fn branch_conss(&self) -> &[(LinCons, f64)] {
        &self.branch_conss
    }

    /// Mark all pending branching rows as materialized
    pub fn mark_branch_conss_materialized(&mut self) {
        self.next_branch_cons = self.branch_conss.len();
        self.branch_conss_materialized = true;
    }

    pub fn branch_conss_materialized(&self) -> bool {
        self.branch_conss_materialized
    }

    pub fn notify_bounds_changed(&mut self) {
        self.bounds_changed = true;
    }

    pub fn bounds_changed(&self) -> bool {
        self.bounds_changed
    }

    pub fn clear_bounds_changed(&mut self) {
        self.bounds_changed = false;
    }
}
