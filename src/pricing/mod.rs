use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::Instant;

pub mod column_pool;
pub mod job;
pub mod problem;
pub mod solver;

use crate::decomp::{Decomposition, LinCons};
use crate::misc::dispatch_queue::DispatchQueue;
use crate::ui::{
    EscalationUIState, JobUIState, RoundUIState, UISender, UIUserMessage,
};
use column_pool::{AddResult, Column, ColumnPool};
use job::{Escalation, JobComparator, LimitSettings, PricingJob, ScoringMode};
use problem::PricingProblem;
use solver::{PricingType, SolveStatus, SolverError, SolverRegistry, SubproblemUpdate};

use compare::Compare;

/// Reduced-cost tolerance: a column improves the master iff its reduced
/// cost is below the negative of this value.
pub const REDCOST_TOL: f64 = 1e-6;

/// When a heuristic job whose solvers are all exhausted may convert
/// itself to an exact job within the same round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExactEscalation {
    /// Immediately on first exhaustion
    #[default]
    OnExhaustion,
    /// Only once that many consecutive heuristic rounds yielded nothing
    AfterHeurRounds(u32),
    /// Heuristic jobs end with their last status; only exact rounds prove
    Never,
}

#[derive(Clone, Debug)]
pub struct PricingSettings {
    /// Jobs per chunk; 0 puts all jobs into a single chunk
    pub chunk_size: usize,
    /// Worker threads dispatching jobs within a chunk
    pub num_threads: usize,
    /// Stop creating dispatches once this many improving columns were
    /// found in a round; 0 disables the early stop
    pub max_cols_round: usize,
    /// Slots of the per-problem column-yield ring buffer
    pub col_history_window: usize,
    /// Rounds of the window consulted for scoring and skip decisions
    pub nrounds_col: usize,
    /// Skip historically unproductive problems in heuristic rounds
    pub skip_unyielding: bool,
    pub use_heuristic_pricing: bool,
    /// Zero-yield heuristic rounds tolerated before rounds turn exact
    pub max_heur_rounds_without_yield: u32,
    /// Limit-escalation retries per job and round
    pub max_heur_iters: u32,
    pub exact_escalation: ExactEscalation,
    pub scoring: ScoringMode,
    pub limits: LimitSettings,
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            chunk_size: 0,
            num_threads: 1,
            max_cols_round: 0,
            col_history_window: 3,
            nrounds_col: 3,
            skip_unyielding: false,
            use_heuristic_pricing: true,
            max_heur_rounds_without_yield: 3,
            max_heur_iters: 4,
            exact_escalation: ExactEscalation::default(),
            scoring: ScoringMode::default(),
            limits: LimitSettings::default(),
        }
    }
}

/// Dual information for one pricing round, supplied by the master loop.
/// `objectives[p]` are the dual-adjusted pricing objective coefficients
/// of block `p`; building them is the master's business.
pub struct RoundInput<'a> {
    pub pricing_type: PricingType,
    pub objectives: &'a [Vec<f64>],
    pub convexity_duals: &'a [f64],
    pub deadline: Option<Instant>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Every scheduled job ran to completion
    Finished,
    /// The improving-column threshold cut the round short
    EarlyStop,
    /// The round's deadline cut it short
    TimeLimit,
}

/// Aggregate result of one pricing round
#[derive(Clone, Debug)]
pub struct RoundOutcome {
    pub round: u32,
    /// Improving columns found (including any rejected by the pool quota)
    pub cols_found: usize,
    /// Every relevant problem reached a determined status
    pub all_determined: bool,
    /// Per-problem lower bounds where the status makes them usable
    pub lower_bounds: Vec<Option<f64>>,
    pub stop: StopReason,
}

impl RoundOutcome {
    /// True iff the round certifies that no negative-reduced-cost column
    /// exists anywhere: the master's dual solution is reduced-cost
    /// optimal for this node.
    pub fn proves_no_improving_columns(&self) -> bool {
        self.all_determined && self.cols_found == 0
    }
}

/// What one finished job reports back to the controller
struct JobOutcome {
    probnr: usize,
    status: SolveStatus,
    lower_bound: f64,
    n_improving: u32,
    npoints: u64,
    nrays: u64,
    update_delivered: bool,
    heuristic: bool,
    solver: &'static str,
    runtime: f64,
}

/// Cooperative round state shared with the workers. The abort flag only
/// prevents new dispatches; running solves always finish and report.
struct RoundFlags {
    abort: AtomicBool,
    early_stopped: AtomicBool,
    timed_out: AtomicBool,
    cols_found: AtomicUsize,
    in_flight: Vec<AtomicBool>,
}

impl RoundFlags {
    fn new(n_problems: usize) -> Self {
        RoundFlags {
            abort: AtomicBool::new(false),
            early_stopped: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            cols_found: AtomicUsize::new(0),
            in_flight: (0..n_problems).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    fn stopped(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn begin_job(&self, probnr: usize) {
        let was_busy = self.in_flight[probnr].swap(true, Ordering::SeqCst);
        debug_assert!(!was_busy, "two jobs in flight for one pricing problem");
    }

    fn end_job(&self, probnr: usize) {
        self.in_flight[probnr].store(false, Ordering::SeqCst);
    }

    /// Account a finished job's columns; trips the early stop once the
    /// threshold is reached.
    fn add_cols(&self, n: usize, threshold: usize, ui: &UISender) {
        let total = self.cols_found.fetch_add(n, Ordering::SeqCst) + n;
        if threshold > 0 && total >= threshold && !self.early_stopped.swap(true, Ordering::SeqCst) {
            self.abort.store(true, Ordering::SeqCst);
            ui.send(UIUserMessage::EarlyStop { cols: total });
        }
    }

    fn check_deadline(&self, deadline: Option<Instant>, ui: &UISender) {
        if let Some(deadline) = deadline {
            if Instant::now() > deadline && !self.timed_out.swap(true, Ordering::SeqCst) {
                self.abort.store(true, Ordering::SeqCst);
                ui.send(UIUserMessage::TimeLimitReached);
            }
        }
    }
}

/// Owns the pricing problems, the solver registry and the column pool,
/// and runs the round-based scheduling algorithm: set up one job per
/// relevant problem, dispatch the jobs chunk by chunk across worker
/// threads, collect results, and report whether the round proved that no
/// improving column exists.
pub struct PricingController {
    decomposition: Decomposition,
    problems: Vec<PricingProblem>,
    registry: SolverRegistry,
    pool: RwLock<ColumnPool>,
    settings: PricingSettings,
    ui: UISender,
    round_counter: u32,
    heur_rounds_without_yield: u32,
    solvers_initialized: bool,
}

impl PricingController {
    pub fn new(
        decomposition: Decomposition,
        settings: PricingSettings,
        registry: SolverRegistry,
        pool: ColumnPool,
        ui: UISender,
    ) -> Self {
        decomposition.validate();
        let problems = (0..decomposition.n_blocks())
            .map(|p| PricingProblem::new(p, settings.col_history_window))
            .collect();
        PricingController {
            decomposition,
            problems,
            registry,
            pool: RwLock::new(pool),
            settings,
            ui,
            round_counter: 0,
            heur_rounds_without_yield: 0,
            solvers_initialized: false,
        }
    }

    /// Build the backend models in every registered solver. Called once
    /// before the first round.
    pub fn init_solvers(&mut self) -> Result<(), SolverError> {
        for reg in self.registry.iter() {
            let mut solver = reg.solver.lock().unwrap();
            solver.init();
            solver.init_sol(&self.decomposition.subproblems)?;
        }
        self.solvers_initialized = true;
        Ok(())
    }

    /// Release the backend models. Safe to call more than once.
    pub fn exit_solvers(&mut self) {
        if !self.solvers_initialized {
            return;
        }
        for reg in self.registry.iter() {
            let mut solver = reg.solver.lock().unwrap();
            solver.exit_sol();
            solver.exit();
        }
        self.solvers_initialized = false;
    }

    pub fn n_problems(&self) -> usize {
        self.problems.len()
    }

    pub fn problem(&self, probnr: usize) -> &PricingProblem {
        &self.problems[probnr]
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    pub fn registry(&self) -> &SolverRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &RwLock<ColumnPool> {
        &self.pool
    }

    pub fn settings(&self) -> &PricingSettings {
        &self.settings
    }

    /// Record a generic branching row for one block, taken from the
    /// active branching constraint at the start of a node. The row is
    /// pushed into the backends before the block is solved again.
    pub fn add_generic_branching_data(&mut self, probnr: usize, cons: LinCons, dual: f64) {
        self.problems[probnr].add_generic_branching_data(cons, dual);
    }

    /// Replace the variable bounds of one block (e.g. after branching on
    /// original variables) and mark the block dirty.
    pub fn set_var_bounds(&mut self, probnr: usize, bounds: &[(f64, f64)]) {
        let sub = &mut self.decomposition.subproblems[probnr];
        assert_eq!(bounds.len(), sub.vars.len());
        for (var, (lb, ub)) in sub.vars.iter_mut().zip(bounds) {
            var.lb = *lb;
            var.ub = *ub;
        }
        self.problems[probnr].notify_bounds_changed();
    }

    fn heuristic_round(&self, pricing_type: PricingType) -> bool {
        self.settings.use_heuristic_pricing
            && pricing_type == PricingType::Redcost
            && self.heur_rounds_without_yield < self.settings.max_heur_rounds_without_yield
    }

    fn exact_escalation_allowed(&self) -> bool {
        match self.settings.exact_escalation {
            ExactEscalation::OnExhaustion => true,
            ExactEscalation::AfterHeurRounds(n) => self.heur_rounds_without_yield >= n,
            ExactEscalation::Never => false,
        }
    }

    /// Run one pricing round over the given duals.
    pub fn run_round(&mut self, input: &RoundInput) -> RoundOutcome {
        assert_eq!(input.objectives.len(), self.problems.len());
        assert_eq!(input.convexity_duals.len(), self.problems.len());
        debug_assert!(self.solvers_initialized);

        self.round_counter += 1;
        let round = self.round_counter;
        let round_start = Instant::now();
        let heuristic = self.heuristic_round(input.pricing_type);

        // setup phase: reset every relevant problem, create one job per
        // problem that is actually scheduled this round
        let mut jobs: Vec<PricingJob> = Vec::new();
        for probnr in 0..self.problems.len() {
            if !self.decomposition.is_representative(probnr) {
                continue;
            }
            self.problems[probnr].reset();
            let prob = &self.problems[probnr];

            if heuristic
                && self.settings.skip_unyielding
                && prob.rounds_recorded() > self.settings.nrounds_col as u64
                && prob.ncols_last_rounds(self.settings.nrounds_col) == 0
            {
                continue;
            }

            let update = SubproblemUpdate {
                objectives: input.objectives[probnr].clone(),
                bounds: prob.bounds_changed().then(|| {
                    self.decomposition.subproblems[probnr]
                        .vars
                        .iter()
                        .map(|v| (v.lb, v.ub))
                        .collect()
                }),
                branch_conss: prob.branch_conss().to_vec(),
                convexity_dual: input.convexity_duals[probnr],
            };

            let mut job = PricingJob::new(probnr, update);
            job.setup(
                heuristic,
                self.settings.scoring,
                prob.ncols_last_rounds(self.settings.nrounds_col),
                input.convexity_duals[probnr],
                prob.npoints(),
                prob.nrays(),
                &self.registry,
                &self.settings.limits,
            );
            jobs.push(job);
        }

        // fixed dispatch preference: descending score, ascending index
        let comparator = JobComparator;
        jobs.sort_by(|a, b| comparator.compare(b, a));

        let chunk_size = if self.settings.chunk_size == 0 {
            jobs.len().max(1)
        } else {
            self.settings.chunk_size
        };
        for (i, job) in jobs.iter_mut().enumerate() {
            job.set_chunk(i / chunk_size);
        }
        let n_chunks = jobs.len().div_ceil(chunk_size);

        self.ui.send(UIUserMessage::RoundStart(RoundUIState {
            round,
            farkas: input.pricing_type == PricingType::Farkas,
            heuristic,
            n_jobs: jobs.len(),
            n_chunks,
            cols: 0,
            determined: false,
            runtime: 0.0,
        }));

        self.pool
            .write()
            .unwrap()
            .start_round(self.settings.max_cols_round);

        let flags = RoundFlags::new(self.problems.len());

        // chunks run strictly one after another; the early-stop flag only
        // suppresses dispatches, results of running jobs are kept
        let mut remaining = jobs;
        while !remaining.is_empty() {
            if flags.stopped() {
                break;
            }
            let rest = remaining.split_off(chunk_size.min(remaining.len()));
            let chunk = std::mem::replace(&mut remaining, rest);
            let outcomes = self.run_chunk(chunk, input, &flags);

            for outcome in outcomes {
                let prob = &mut self.problems[outcome.probnr];
                prob.update(outcome.status, outcome.lower_bound, outcome.n_improving);
                prob.record_generated(outcome.npoints, outcome.nrays);
                if outcome.update_delivered {
                    prob.mark_branch_conss_materialized();
                    prob.clear_bounds_changed();
                }
            }
        }

        let cols_found = flags.cols_found.load(Ordering::SeqCst);
        let all_determined = (0..self.problems.len())
            .filter(|p| self.decomposition.is_representative(*p))
            .all(|p| self.problems[p].status().is_determined());
        let lower_bounds = self.problems.iter().map(PricingProblem::lower_bound).collect();
        let stop = if flags.timed_out.load(Ordering::SeqCst) {
            StopReason::TimeLimit
        } else if flags.early_stopped.load(Ordering::SeqCst) {
            StopReason::EarlyStop
        } else {
            StopReason::Finished
        };

        if heuristic {
            if cols_found == 0 {
                self.heur_rounds_without_yield += 1;
            } else {
                self.heur_rounds_without_yield = 0;
            }
        } else if cols_found > 0 {
            self.heur_rounds_without_yield = 0;
        }

        self.ui.send(UIUserMessage::RoundFinish(RoundUIState {
            round,
            farkas: input.pricing_type == PricingType::Farkas,
            heuristic,
            n_jobs: 0,
            n_chunks,
            cols: cols_found,
            determined: all_determined,
            runtime: round_start.elapsed().as_secs_f64(),
        }));

        RoundOutcome {
            round,
            cols_found,
            all_determined,
            lower_bounds,
            stop,
        }
    }

    /// Dispatch one chunk across the worker threads and return the
    /// collected job outcomes.
    fn run_chunk(
        &self,
        chunk: Vec<PricingJob>,
        input: &RoundInput,
        flags: &RoundFlags,
    ) -> Vec<JobOutcome> {
        let n_workers = self.settings.num_threads.max(1).min(chunk.len());
        let queue = DispatchQueue::new(JobComparator);
        for job in chunk {
            queue.push(job);
        }
        let outcomes: Mutex<Vec<JobOutcome>> = Mutex::new(Vec::new());

        thread::scope(|s| {
            for _ in 0..n_workers {
                s.spawn(|| loop {
                    flags.check_deadline(input.deadline, &self.ui);
                    if flags.stopped() {
                        break;
                    }
                    let Some(mut job) = queue.pop() else {
                        break;
                    };
                    let probnr = job.probnr();
                    flags.begin_job(probnr);
                    let outcome = self.run_job(&mut job, input);
                    flags.end_job(probnr);
                    flags.add_cols(
                        outcome.n_improving as usize,
                        self.settings.max_cols_round,
                        &self.ui,
                    );
                    self.ui.send(UIUserMessage::JobFinish(JobUIState {
                        probnr,
                        solver: outcome.solver,
                        status: outcome.status,
                        heuristic: outcome.heuristic,
                        ncols: outcome.n_improving,
                        runtime: outcome.runtime,
                    }));
                    outcomes.lock().unwrap().push(outcome);
                });
            }
        });

        outcomes.into_inner().unwrap()
    }

    /// Drive one job to completion: walk the solver cursor, escalate
    /// limits on `SolverLimit`, convert to exact once the heuristic
    /// cursor is exhausted. Strictly sequential per job.
    fn run_job(&self, job: &mut PricingJob, input: &RoundInput) -> JobOutcome {
        let probnr = job.probnr();
        let job_start = Instant::now();
        let mut status = SolveStatus::Unknown;
        let mut lower_bound = f64::NEG_INFINITY;
        let mut n_improving = 0u32;
        let mut npoints = 0u64;
        let mut nrays = 0u64;
        let mut update_delivered = false;
        let mut saw_applicable = false;
        let mut last_solver: &'static str = "-";

        loop {
            let Some(cursor) = job.current_solver() else {
                if job.is_heuristic() && self.exact_escalation_allowed() {
                    job.set_exact(&self.registry);
                    self.ui.send(UIUserMessage::Escalated(EscalationUIState {
                        probnr,
                        escalation: Escalation::Exact,
                    }));
                    if job.current_solver().is_some() {
                        continue;
                    }
                }
                break;
            };

            let reg = self.registry.get(cursor);
            last_solver = reg.name();
            let attempt_start = Instant::now();
            let needs_update = job.take_needs_update();

            let result = {
                let mut solver = reg.solver.lock().unwrap();
                let updated = if needs_update {
                    solver.update(probnr, job.update_payload())
                } else {
                    Ok(())
                };
                match updated {
                    Err(err) => Err(err),
                    Ok(()) => {
                        if needs_update {
                            update_delivered = true;
                        }
                        if job.is_heuristic() {
                            solver.solve_heuristic(probnr, job.limits())
                        } else {
                            solver.solve_exact(probnr)
                        }
                    }
                }
            };

            match result {
                Err(err) => {
                    // partial failure is expected: leave the status as is
                    // and let the remaining solvers try
                    self.ui.send(UIUserMessage::Log(format!(
                        "solver <{}> failed on block {probnr}: {err}",
                        reg.name()
                    )));
                    job.next_solver(&self.registry);
                }
                Ok(outcome) => {
                    reg.stats.lock().unwrap().record(
                        input.pricing_type,
                        job.is_heuristic(),
                        attempt_start.elapsed(),
                        outcome.columns.len() as u64,
                    );
                    let (imp, pts, rys) = self.accept_columns(probnr, outcome.columns, input);
                    n_improving += imp;
                    npoints += pts;
                    nrays += rys;

                    match outcome.status {
                        SolveStatus::Optimal | SolveStatus::Infeasible | SolveStatus::Unbounded => {
                            saw_applicable = true;
                            status = outcome.status;
                            if status.bound_usable() {
                                if let Some(lb) = outcome.lower_bound {
                                    lower_bound = lower_bound.max(lb);
                                }
                            }
                            break;
                        }
                        SolveStatus::SolverLimit => {
                            saw_applicable = true;
                            status = SolveStatus::SolverLimit;
                            if let Some(lb) = outcome.lower_bound {
                                lower_bound = lower_bound.max(lb);
                            }
                            if job.is_heuristic() && job.n_heur_iters() < self.settings.max_heur_iters
                            {
                                job.increase_n_heur_iters();
                                let escalation =
                                    job.escalate_limits(&outcome.stats, &self.settings.limits);
                                self.ui.send(UIUserMessage::Escalated(EscalationUIState {
                                    probnr,
                                    escalation,
                                }));
                                // same solver, relaxed limits
                            } else {
                                job.next_solver(&self.registry);
                            }
                        }
                        SolveStatus::NotApplicable => {
                            job.next_solver(&self.registry);
                        }
                        SolveStatus::Unknown => {
                            saw_applicable = true;
                            job.next_solver(&self.registry);
                        }
                    }
                }
            }
        }

        if status == SolveStatus::Unknown && !saw_applicable {
            status = SolveStatus::NotApplicable;
        }

        JobOutcome {
            probnr,
            status,
            lower_bound,
            n_improving,
            npoints,
            nrays,
            update_delivered,
            heuristic: job.is_heuristic(),
            solver: last_solver,
            runtime: job_start.elapsed().as_secs_f64(),
        }
    }

    /// Validate, reprice and insert the columns one solve emitted.
    /// Returns (improving columns, points stored, rays stored).
    fn accept_columns(
        &self,
        probnr: usize,
        columns: Vec<Column>,
        input: &RoundInput,
    ) -> (u32, u64, u64) {
        let sub = &self.decomposition.subproblems[probnr];
        let objectives = &input.objectives[probnr];
        let conv_dual = input.convexity_duals[probnr];
        let mut improving = 0u32;
        let mut npoints = 0u64;
        let mut nrays = 0u64;

        for mut column in columns {
            if column.block != probnr {
                debug_assert!(false, "solver emitted column for foreign block");
                continue;
            }
            if let Err(err) = column.check(sub) {
                self.ui.send(UIUserMessage::Log(format!(
                    "rejected column for block {probnr}: {err}"
                )));
                continue;
            }
            // the backend's claim is not trusted: reduced cost is derived
            // from this round's duals
            let redcost = if column.is_ray {
                column.dot(objectives)
            } else {
                column.dot(objectives) - conv_dual
            };
            column.redcost = redcost;
            let is_ray = column.is_ray;
            let is_improving = redcost < -REDCOST_TOL;

            match self.pool.write().unwrap().add_column(column) {
                AddResult::Added(_) => {
                    if is_improving {
                        improving += 1;
                    }
                    if is_ray {
                        nrays += 1;
                    } else {
                        npoints += 1;
                    }
                }
                AddResult::QuotaReached => {
                    // the find still counts for statistics and early stop
                    if is_improving {
                        improving += 1;
                    }
                }
                AddResult::Duplicate(_) => {}
            }
        }
        (improving, npoints, nrays)
    }

    /// Emit the closing statistics and shut the UI down.
    pub fn finish(&self) {
        let mut solver_summaries = Vec::new();
        for reg in self.registry.iter() {
            let stats = reg.stats();
            solver_summaries.push(format!(
                "solver <{}>: {} calls / {} cols / {:>6.2}s (heur redcost {} / exact redcost {} / heur farkas {} / exact farkas {})",
                reg.name(),
                stats.total_calls(),
                stats.total_cols(),
                stats.total_time().as_secs_f64(),
                stats.calls(PricingType::Redcost, true),
                stats.calls(PricingType::Redcost, false),
                stats.calls(PricingType::Farkas, true),
                stats.calls(PricingType::Farkas, false),
            ));
        }
        self.ui.send(UIUserMessage::ExitUi { solver_summaries });
    }
}

impl Drop for PricingController {
    fn drop(&mut self) {
        self.exit_solvers();
    }
}
