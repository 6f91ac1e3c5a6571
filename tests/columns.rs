// Column validation, pool deduplication, and ray recovery from an
// unbounded pricing subproblem.

#[cfg(test)]
mod tests {
    use dw_pricing::column_pool::{AddResult, Column, ColumnCheckError, ColumnPool};
    use dw_pricing::job::SolverLimits;
    use dw_pricing::solver::{PricingSolver, SolveStatus, SolverError, SubproblemUpdate};
    use dw_pricing::solvers::mip::{MipBackend, MipOutcome, MipSolver, MipStatus};
    use dw_pricing::{LinCons, SubVar, Subproblem};

    use std::sync::{Arc, Mutex};

    fn sub_with_free_var() -> Subproblem {
        Subproblem {
            block: 0,
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
                    ub: f64::INFINITY,
                    integral: true,
                },
            ],
            conss: vec![LinCons::le(vec![(0, 1.0)], 10.0)],
        }
    }

    #[test]
    fn columns_must_reference_block_variables() {
        let sub = sub_with_free_var();
        let valid = Column::new(0, vec![(0, 2.0), (1, 1.0)], false, 0.0);
        assert!(valid.check(&sub).is_ok());

        let foreign = Column::new(0, vec![(5, 1.0)], false, 0.0);
        assert_eq!(foreign.check(&sub), Err(ColumnCheckError::VarOutOfRange));
    }

    #[test]
    fn rays_must_stay_in_the_recession_cone() {
        let sub = sub_with_free_var();

        let good = Column::new(0, vec![(1, 2.0)], true, -1.0);
        assert!(good.check(&sub).is_ok());

        // positive direction on a variable with a finite upper bound
        let bad_bound = Column::new(0, vec![(0, 1.0)], true, -1.0);
        assert_eq!(
            bad_bound.check(&sub),
            Err(ColumnCheckError::RayViolatesBounds)
        );

        // direction increasing the activity of a finite <= row
        let mut sub_row = sub_with_free_var();
        sub_row.vars[0].ub = f64::INFINITY;
        let bad_row = Column::new(0, vec![(0, 1.0)], true, -1.0);
        assert_eq!(bad_row.check(&sub_row), Err(ColumnCheckError::RayViolatesRows));
    }

    #[test]
    fn pool_deduplicates_by_content() {
        let mut pool = ColumnPool::new();
        pool.start_round(0);

        let first = pool.add_column(Column::new(0, vec![(0, 1.0)], false, -1.0));
        assert!(first.was_added());

        // same entries, different reduced cost: still the same column
        let again = pool.add_column(Column::new(0, vec![(0, 1.0)], false, -7.0));
        assert!(matches!(again, AddResult::Duplicate(_)));

        // a ray with identical entries is a different column
        let ray = pool.add_column(Column::new(0, vec![(0, 1.0)], true, -1.0));
        assert!(ray.was_added());

        // same entries in another block are a different column
        let other_block = pool.add_column(Column::new(1, vec![(0, 1.0)], false, -1.0));
        assert!(other_block.was_added());

        assert_eq!(pool.count(), 3);
    }

    #[test]
    fn round_quota_closes_the_pool() {
        let mut pool = ColumnPool::new();
        pool.start_round(1);
        assert!(pool
            .add_column(Column::new(0, vec![(0, 1.0)], false, -1.0))
            .was_added());
        assert_eq!(
            pool.add_column(Column::new(0, vec![(1, 1.0)], false, -1.0)),
            AddResult::QuotaReached
        );
        // duplicates are recognized before the quota applies
        assert!(matches!(
            pool.add_column(Column::new(0, vec![(0, 1.0)], false, -1.0)),
            AddResult::Duplicate(_)
        ));

        // the next round reopens the pool
        pool.start_round(0);
        assert!(pool
            .add_column(Column::new(0, vec![(1, 1.0)], false, -1.0))
            .was_added());
        assert_eq!(pool.round_count(), 1);
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn tickets_partition_the_pool_by_round() {
        let mut pool = ColumnPool::new();
        pool.start_round(0);
        pool.add_column(Column::new(0, vec![(0, 1.0)], false, -1.0));
        let ticket = pool.ticket();
        pool.add_column(Column::new(0, vec![(0, 2.0)], false, -1.0));
        pool.add_column(Column::new(0, vec![(0, 3.0)], false, -1.0));

        assert_eq!(pool.columns_since(ticket).len(), 2);
        assert_eq!(pool.round_columns().len(), 3);
    }

    /// Backend stand-in: reports the block unbounded, yields its ray only
    /// after presolve was switched off, and records the call order.
    struct UnboundedBackend {
        ray: Option<Vec<f64>>,
        presolve: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl UnboundedBackend {
        fn new(ray: Option<Vec<f64>>, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
            UnboundedBackend {
                ray,
                presolve: true,
                log,
            }
        }
    }

    impl MipBackend for UnboundedBackend {
        fn build(&mut self, _sub: &Subproblem) -> Result<(), SolverError> {
            Ok(())
        }

        fn set_objective(&mut self, _objectives: &[f64]) -> Result<(), SolverError> {
            Ok(())
        }

        fn set_bounds(&mut self, _bounds: &[(f64, f64)]) -> Result<(), SolverError> {
            Ok(())
        }

        fn add_row(&mut self, _cons: &LinCons) -> Result<(), SolverError> {
            Ok(())
        }

        fn set_limits(&mut self, _limits: &SolverLimits) -> Result<(), SolverError> {
            Ok(())
        }

        fn set_presolve(&mut self, enabled: bool) -> Result<(), SolverError> {
            self.presolve = enabled;
            self.log
                .lock()
                .unwrap()
                .push(if enabled { "presolve_on" } else { "presolve_off" });
            Ok(())
        }

        fn solve(&mut self) -> Result<MipOutcome, SolverError> {
            self.log.lock().unwrap().push("solve");
            Ok(MipOutcome {
                status: MipStatus::Unbounded,
                best_bound: f64::NEG_INFINITY,
                gap: f64::INFINITY,
                nodes: 0,
                sol_count: 0,
                solutions: vec![],
            })
        }

        fn extract_ray(&mut self) -> Result<Option<Vec<f64>>, SolverError> {
            // presolve swallows the ray on the first attempt
            if self.presolve {
                self.log.lock().unwrap().push("ray_missing");
                return Ok(None);
            }
            self.log.lock().unwrap().push("ray_found");
            Ok(self.ray.clone())
        }
    }

    #[test]
    fn unbounded_block_recovers_rounded_ray_after_presolve_retry() {
        // Scenario: the fractional ray (0, 1.3) is only available after
        // the presolve-disable re-solve; the integral component rounds up
        // toward the improving direction and passes validation.
        let log = Arc::new(Mutex::new(Vec::new()));
        let ray_log = log.clone();
        let mut solver = MipSolver::new(
            "mip",
            0,
            Box::new(move || UnboundedBackend::new(Some(vec![0.0, 1.3]), ray_log.clone())),
        );
        solver.init_sol(&[sub_with_free_var()]).unwrap();
        solver
            .update(
                0,
                &SubproblemUpdate {
                    objectives: vec![1.0, -2.0],
                    bounds: None,
                    branch_conss: vec![],
                    convexity_dual: 0.0,
                },
            )
            .unwrap();

        let outcome = solver.solve_exact(0).unwrap();
        assert_eq!(outcome.status, SolveStatus::Unbounded);
        assert_eq!(outcome.columns.len(), 1);

        let ray = &outcome.columns[0];
        assert!(ray.is_ray);
        assert_eq!(ray.entries(), &[(1, 2.0)]);
        // rounded direction still improves: 2 * -2.0
        assert!((ray.redcost - -4.0).abs() < 1e-9);
        assert!(ray.check(&sub_with_free_var()).is_ok());

        let recorded = log.lock().unwrap();
        assert_eq!(
            *recorded,
            vec![
                "solve",
                "ray_missing",
                "presolve_off",
                "solve",
                "ray_found",
                "presolve_on",
            ]
        );
    }

    #[test]
    fn unrecoverable_ray_downgrades_to_unknown() {
        // the reported direction pushes a bounded variable, so no valid
        // ray exists and the block is given up for this round
        let log = Arc::new(Mutex::new(Vec::new()));
        let ray_log = log.clone();
        let mut solver = MipSolver::new(
            "mip",
            0,
            Box::new(move || UnboundedBackend::new(Some(vec![1.0, 0.0]), ray_log.clone())),
        );
        solver.init_sol(&[sub_with_free_var()]).unwrap();
        solver
            .update(
                0,
                &SubproblemUpdate {
                    objectives: vec![-1.0, 0.0],
                    bounds: None,
                    branch_conss: vec![],
                    convexity_dual: 0.0,
                },
            )
            .unwrap();

        let outcome = solver.solve_exact(0).unwrap();
        assert_eq!(outcome.status, SolveStatus::Unknown);
        assert!(outcome.columns.is_empty());
    }
}
