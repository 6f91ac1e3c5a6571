// Round scheduling: sliding-window statistics, deterministic job
// ordering, symmetry skipping and the cooperative early stop.

#[cfg(test)]
mod tests {
    use dw_pricing::column_pool::{Column, ColumnPool};
    use dw_pricing::job::{JobComparator, LimitSettings, PricingJob, ScoringMode, SolverLimits};
    use dw_pricing::problem::PricingProblem;
    use dw_pricing::solver::{
        PricingSolver, PricingType, SolveOutcome, SolveStatus, SolverError, SolverRegistry,
        SubproblemUpdate,
    };
    use dw_pricing::{
        Decomposition, LinCons, PricingController, PricingSettings, RoundInput, StopReason,
        SubVar, Subproblem, UI,
    };

    use compare::Compare;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    struct Call {
        solver: &'static str,
        probnr: usize,
        heuristic: bool,
        limits: SolverLimits,
    }

    /// Backend stand-in that replays prepared outcomes and records every
    /// solve call it receives.
    struct ScriptedSolver {
        name: &'static str,
        priority: i32,
        heuristic_enabled: bool,
        exact_enabled: bool,
        script: HashMap<(usize, bool), VecDeque<SolveOutcome>>,
        fallback: SolveOutcome,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl ScriptedSolver {
        fn new(name: &'static str, priority: i32, calls: Arc<Mutex<Vec<Call>>>) -> Self {
            ScriptedSolver {
                name,
                priority,
                heuristic_enabled: true,
                exact_enabled: true,
                script: HashMap::new(),
                fallback: SolveOutcome::status_only(SolveStatus::Optimal),
                calls,
            }
        }

        fn on(mut self, probnr: usize, heuristic: bool, outcome: SolveOutcome) -> Self {
            self.script
                .entry((probnr, heuristic))
                .or_default()
                .push_back(outcome);
            self
        }

        fn next(&mut self, probnr: usize, heuristic: bool) -> SolveOutcome {
            self.script
                .get_mut(&(probnr, heuristic))
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    impl PricingSolver for ScriptedSolver {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn heuristic_enabled(&self) -> bool {
            self.heuristic_enabled
        }
        fn exact_enabled(&self) -> bool {
            self.exact_enabled
        }

        fn update(&mut self, _probnr: usize, _update: &SubproblemUpdate) -> Result<(), SolverError> {
            Ok(())
        }

        fn solve_heuristic(
            &mut self,
            probnr: usize,
            limits: &SolverLimits,
        ) -> Result<SolveOutcome, SolverError> {
            self.calls.lock().unwrap().push(Call {
                solver: self.name,
                probnr,
                heuristic: true,
                limits: *limits,
            });
            Ok(self.next(probnr, true))
        }

        fn solve_exact(&mut self, probnr: usize) -> Result<SolveOutcome, SolverError> {
            self.calls.lock().unwrap().push(Call {
                solver: self.name,
                probnr,
                heuristic: false,
                limits: SolverLimits::exact(),
            });
            Ok(self.next(probnr, false))
        }
    }

    fn two_var_block(block: usize) -> Subproblem {
        Subproblem {
            block,
            vars: vec![
                SubVar {
                    cost: 0.0,
                    lb: 0.0,
                    ub: 10.0,
                    integral: true,
                },
                SubVar {
                    cost: 0.0,
                    lb: 0.0,
                    ub: 10.0,
                    integral: true,
                },
            ],
            conss: vec![LinCons::le(vec![(0, 1.0), (1, 1.0)], 10.0)],
        }
    }

    fn point(block: usize, var: usize) -> Column {
        Column::new(block, vec![(var, 1.0)], false, 0.0)
    }

    fn optimal_with(columns: Vec<Column>, lower_bound: f64) -> SolveOutcome {
        SolveOutcome {
            status: SolveStatus::Optimal,
            lower_bound: Some(lower_bound),
            columns,
            stats: Default::default(),
        }
    }

    #[test]
    fn sliding_window_sums_last_rounds() {
        let mut prob = PricingProblem::new(0, 5);
        let counts = [3u32, 1, 4, 1, 5];
        for c in counts {
            prob.reset();
            prob.update(SolveStatus::Optimal, 0.0, c);
        }
        assert_eq!(prob.ncols_last_rounds(1), 5);
        assert_eq!(prob.ncols_last_rounds(2), 6);
        assert_eq!(prob.ncols_last_rounds(3), 10);
        assert_eq!(prob.ncols_last_rounds(5), 14);
    }

    #[test]
    fn window_rolls_over_old_rounds() {
        let mut prob = PricingProblem::new(0, 3);
        for c in [7u32, 1, 1, 1] {
            prob.reset();
            prob.update(SolveStatus::Optimal, 0.0, c);
        }
        // the 7 from round one left the window
        assert_eq!(prob.ncols_last_rounds(3), 3);
    }

    #[test]
    fn reset_only_clears_current_round() {
        let mut prob = PricingProblem::new(0, 3);
        prob.reset();
        prob.update(SolveStatus::Optimal, -1.0, 2);
        assert_eq!(prob.ncols_round(), 2);

        prob.reset();
        assert_eq!(prob.ncols_round(), 0);
        assert_eq!(prob.status(), SolveStatus::Unknown);
        // history survives the reset, only the fresh slot is empty
        assert_eq!(prob.ncols_last_rounds(1), 0);
        assert_eq!(prob.ncols_last_rounds(2), 2);

        prob.update(SolveStatus::Optimal, -1.0, 0);
        assert_eq!(prob.ncols_last_rounds(1), 0);
        assert_eq!(prob.ncols_last_rounds(2), 2);
    }

    #[test]
    fn double_update_without_reset_panics_in_debug() {
        let result = std::panic::catch_unwind(|| {
            let mut prob = PricingProblem::new(0, 3);
            prob.reset();
            prob.update(SolveStatus::Optimal, 0.0, 1);
            prob.update(SolveStatus::Optimal, 0.0, 1);
        });
        if cfg!(debug_assertions) {
            assert!(result.is_err());
        }
    }

    fn setup_job(probnr: usize, score_cols: u32, registry: &SolverRegistry) -> PricingJob {
        let update = SubproblemUpdate {
            objectives: vec![],
            bounds: None,
            branch_conss: vec![],
            convexity_dual: 0.0,
        };
        let mut job = PricingJob::new(probnr, update);
        job.setup(
            true,
            ScoringMode::RecentYield,
            score_cols,
            0.0,
            0,
            0,
            registry,
            &LimitSettings::default(),
        );
        job
    }

    #[test]
    fn job_ordering_is_deterministic() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SolverRegistry::new();
        registry.register(Box::new(ScriptedSolver::new("scripted", 0, calls)));
        let comparator = JobComparator;

        // equal scores fall back to ascending problem index
        let mut jobs: Vec<PricingJob> =
            [3usize, 0, 2, 1].iter().map(|p| setup_job(*p, 1, &registry)).collect();
        jobs.sort_by(|a, b| comparator.compare(b, a));
        let order: Vec<usize> = jobs.iter().map(PricingJob::probnr).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);

        // higher recent yield is dispatched first
        let mut jobs: Vec<PricingJob> = vec![
            setup_job(0, 1, &registry),
            setup_job(1, 5, &registry),
            setup_job(2, 3, &registry),
        ];
        jobs.sort_by(|a, b| comparator.compare(b, a));
        let order: Vec<usize> = jobs.iter().map(PricingJob::probnr).collect();
        assert_eq!(order, vec![1, 2, 0]);

        // identical input, identical order
        let mut rerun: Vec<PricingJob> = vec![
            setup_job(0, 1, &registry),
            setup_job(1, 5, &registry),
            setup_job(2, 3, &registry),
        ];
        rerun.sort_by(|a, b| comparator.compare(b, a));
        let order_rerun: Vec<usize> = rerun.iter().map(PricingJob::probnr).collect();
        assert_eq!(order, order_rerun);
    }

    #[test]
    fn symmetry_duplicates_are_never_dispatched() {
        // Scenario: block 2 is a duplicate of block 1; block 0 yields two
        // columns, block 1 proves optimality with zero columns.
        let ui = UI::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let solver = ScriptedSolver::new("knapsack", 100, calls.clone())
            .on(
                0,
                true,
                optimal_with(vec![point(0, 0), point(0, 1)], -2.0),
            )
            .on(1, true, optimal_with(vec![], 0.0));
        let mut registry = SolverRegistry::new();
        registry.register(Box::new(solver));

        let decomposition = Decomposition {
            subproblems: (0..3).map(two_var_block).collect(),
            identical: vec![0, 1, 1],
        };

        let mut controller = PricingController::new(
            decomposition,
            PricingSettings::default(),
            registry,
            ColumnPool::new(),
            ui.get_sender(),
        );
        controller.init_solvers().unwrap();

        let objectives = vec![vec![-1.0, -1.0]; 3];
        let convexity_duals = vec![0.0; 3];
        let outcome = controller.run_round(&RoundInput {
            pricing_type: PricingType::Redcost,
            objectives: &objectives,
            convexity_duals: &convexity_duals,
            deadline: None,
        });

        assert_eq!(outcome.cols_found, 2);
        assert!(outcome.all_determined);
        // two columns were found, so this is no certificate
        assert!(!outcome.proves_no_improving_columns());
        assert_eq!(outcome.stop, StopReason::Finished);

        assert_eq!(controller.problem(0).status(), SolveStatus::Optimal);
        assert_eq!(controller.problem(1).status(), SolveStatus::Optimal);
        assert_eq!(controller.problem(2).status(), SolveStatus::Unknown);
        assert_eq!(controller.problem(2).solve_count(), 0);
        assert_eq!(outcome.lower_bounds[0], Some(-2.0));
        assert_eq!(outcome.lower_bounds[1], Some(0.0));
        assert_eq!(outcome.lower_bounds[2], None);

        let recorded = calls.lock().unwrap();
        assert!(recorded.iter().all(|c| c.probnr != 2));
        assert_eq!(controller.pool().read().unwrap().count(), 2);
    }

    #[test]
    fn early_stop_suppresses_remaining_dispatches() {
        // Scenario: threshold of two columns is reached inside the first
        // of three chunks; nothing else may be dispatched afterwards.
        let ui = UI::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut solver = ScriptedSolver::new("scripted", 0, calls.clone());
        for p in 0..9 {
            solver = solver.on(p, true, optimal_with(vec![point(p, 0)], -1.0));
        }
        let mut registry = SolverRegistry::new();
        registry.register(Box::new(solver));

        let settings = PricingSettings {
            chunk_size: 3,
            num_threads: 1,
            max_cols_round: 2,
            scoring: ScoringMode::Uniform,
            ..PricingSettings::default()
        };

        let mut controller = PricingController::new(
            Decomposition::trivial((0..9).map(two_var_block).collect()),
            settings,
            registry,
            ColumnPool::new(),
            ui.get_sender(),
        );
        controller.init_solvers().unwrap();

        let objectives = vec![vec![-1.0, -1.0]; 9];
        let convexity_duals = vec![0.0; 9];
        let outcome = controller.run_round(&RoundInput {
            pricing_type: PricingType::Redcost,
            objectives: &objectives,
            convexity_duals: &convexity_duals,
            deadline: None,
        });

        assert_eq!(outcome.stop, StopReason::EarlyStop);
        assert_eq!(outcome.cols_found, 2);
        assert!(!outcome.all_determined);

        // with uniform scores dispatch order is the problem index; only
        // the first two jobs may have run
        let recorded: Vec<usize> = calls.lock().unwrap().iter().map(|c| c.probnr).collect();
        assert_eq!(recorded, vec![0, 1]);
        for p in 2..9 {
            assert_eq!(controller.problem(p).solve_count(), 0);
            assert_eq!(controller.problem(p).status(), SolveStatus::Unknown);
        }
        // the two finished jobs still updated their problems
        assert_eq!(controller.problem(0).ncols_round(), 1);
        assert_eq!(controller.problem(1).ncols_round(), 1);
    }

    #[test]
    fn zero_columns_with_all_optimal_is_a_certificate() {
        let ui = UI::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let solver = ScriptedSolver::new("scripted", 0, calls)
            .on(0, true, optimal_with(vec![], 0.1))
            .on(1, true, optimal_with(vec![], 0.4));
        let mut registry = SolverRegistry::new();
        registry.register(Box::new(solver));

        let mut controller = PricingController::new(
            Decomposition::trivial((0..2).map(two_var_block).collect()),
            PricingSettings::default(),
            registry,
            ColumnPool::new(),
            ui.get_sender(),
        );
        controller.init_solvers().unwrap();

        let objectives = vec![vec![1.0, 1.0]; 2];
        let convexity_duals = vec![0.0; 2];
        let outcome = controller.run_round(&RoundInput {
            pricing_type: PricingType::Redcost,
            objectives: &objectives,
            convexity_duals: &convexity_duals,
            deadline: None,
        });

        assert_eq!(outcome.cols_found, 0);
        assert!(outcome.all_determined);
        assert!(outcome.proves_no_improving_columns());
        controller.finish();
    }
}
