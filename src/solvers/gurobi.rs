use gurobi::{attr, param, ConstrSense, LinExpr, Model, Var, VarType};

use crate::decomp::{LinCons, Subproblem};
use crate::pricing::job::{SolverLimits, NO_LIMIT};
use crate::pricing::solver::SolverError;
use crate::solvers::mip::{MipBackend, MipOutcome, MipStatus};

// gurobi optimization status codes
const STATUS_OPTIMAL: i32 = 2;
const STATUS_INFEASIBLE: i32 = 3;
const STATUS_INF_OR_UNBD: i32 = 4;
const STATUS_UNBOUNDED: i32 = 5;
const STATUS_NODE_LIMIT: i32 = 8;
const STATUS_TIME_LIMIT: i32 = 9;
const STATUS_SOLUTION_LIMIT: i32 = 10;

fn backend_err<E: std::fmt::Debug>(err: E) -> SolverError {
    SolverError::Backend(format!("{err:?}"))
}

/// `MipBackend` on top of the gurobi crate. The model is rebuilt from the
/// stored subproblem on every solve so that limit and presolve parameters
/// set on the environment always apply.
pub struct GurobiBackend {
    env: gurobi::Env,
    sub: Option<Subproblem>,
    objectives: Vec<f64>,
    limits: SolverLimits,
    presolve: bool,
    last: Option<(Model, Vec<Var>)>,
}

impl GurobiBackend {
    pub fn new() -> Self {
        let mut env = gurobi::Env::new("").unwrap();
        env.set(param::Threads, 1).unwrap();
        env.set(param::OutputFlag, 0).unwrap();
        GurobiBackend {
            env,
            sub: None,
            objectives: Vec::new(),
            limits: SolverLimits::exact(),
            presolve: true,
            last: None,
        }
    }

    fn apply_params(&mut self) -> Result<(), SolverError> {
        if self.limits.nodes != NO_LIMIT {
            self.env
                .set(param::NodeLimit, self.limits.nodes as f64)
                .map_err(backend_err)?;
        } else {
            // gurobi's own "no limit" value for double parameters
            self.env
                .set(param::NodeLimit, 1e100)
                .map_err(backend_err)?;
        }
        if self.limits.solutions != NO_LIMIT {
            self.env
                .set(param::SolutionLimit, self.limits.solutions.min(2_000_000_000) as i32)
                .map_err(backend_err)?;
        } else {
            self.env
                .set(param::SolutionLimit, 2_000_000_000)
                .map_err(backend_err)?;
        }
        self.env
            .set(param::MIPGap, self.limits.gap)
            .map_err(backend_err)?;
        self.env
            .set(param::Presolve, if self.presolve { -1 } else { 0 })
            .map_err(backend_err)?;
        // keep ray information available on unbounded models
        self.env.set(param::InfUnbdInfo, 1).map_err(backend_err)?;
        self.env.set(param::DualReductions, 0).map_err(backend_err)?;
        Ok(())
    }

    fn build_model(&mut self) -> Result<(Model, Vec<Var>), SolverError> {
        let sub = self.sub.as_ref().expect("build must precede solve");
        let mut model = Model::new("pricing", &self.env).map_err(backend_err)?;

        let mut rows: Vec<gurobi::Constr> = Vec::new();
        let mut memberships: Vec<Vec<(usize, f64)>> = vec![Vec::new(); sub.vars.len()];
        for (row_idx, cons) in sub.conss.iter().enumerate() {
            if cons.rhs.is_finite() {
                let constr = model
                    .add_constr(
                        &format!("row_le_{row_idx}"),
                        LinExpr::new(),
                        ConstrSense::Less,
                        cons.rhs,
                    )
                    .map_err(backend_err)?;
                for (j, a) in &cons.coefs {
                    memberships[*j].push((rows.len(), *a));
                }
                rows.push(constr);
            }
            if cons.lhs.is_finite() {
                let constr = model
                    .add_constr(
                        &format!("row_ge_{row_idx}"),
                        LinExpr::new(),
                        ConstrSense::Greater,
                        cons.lhs,
                    )
                    .map_err(backend_err)?;
                for (j, a) in &cons.coefs {
                    memberships[*j].push((rows.len(), *a));
                }
                rows.push(constr);
            }
        }

        let mut vars = Vec::with_capacity(sub.vars.len());
        for (j, var) in sub.vars.iter().enumerate() {
            let constrs: Vec<gurobi::Constr> = memberships[j]
                .iter()
                .map(|(r, _)| rows[*r].clone())
                .collect();
            let coefs: Vec<f64> = memberships[j].iter().map(|(_, a)| *a).collect();
            let added = model
                .add_var(
                    &format!("x{j}"),
                    if var.integral {
                        VarType::Integer
                    } else {
                        VarType::Continuous
                    },
                    self.objectives.get(j).copied().unwrap_or(0.0),
                    var.lb,
                    var.ub,
                    &constrs,
                    &coefs,
                )
                .map_err(backend_err)?;
            vars.push(added);
        }

        model.update().map_err(backend_err)?;
        Ok((model, vars))
    }
}

impl Default for GurobiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MipBackend for GurobiBackend {
    fn build(&mut self, sub: &Subproblem) -> Result<(), SolverError> {
        self.objectives = vec![0.0; sub.vars.len()];
        self.sub = Some(sub.clone());
        Ok(())
    }

    fn set_objective(&mut self, objectives: &[f64]) -> Result<(), SolverError> {
        self.objectives = objectives.to_vec();
        Ok(())
    }

    fn set_bounds(&mut self, bounds: &[(f64, f64)]) -> Result<(), SolverError> {
        let sub = self.sub.as_mut().expect("build must precede update");
        for (var, (lb, ub)) in sub.vars.iter_mut().zip(bounds) {
            var.lb = *lb;
            var.ub = *ub;
        }
        Ok(())
    }

    fn add_row(&mut self, cons: &LinCons) -> Result<(), SolverError> {
        let sub = self.sub.as_mut().expect("build must precede update");
        sub.conss.push(cons.clone());
        Ok(())
    }

    fn set_limits(&mut self, limits: &SolverLimits) -> Result<(), SolverError> {
        self.limits = *limits;
        Ok(())
    }

    fn set_presolve(&mut self, enabled: bool) -> Result<(), SolverError> {
        self.presolve = enabled;
        Ok(())
    }

    fn solve(&mut self) -> Result<MipOutcome, SolverError> {
        self.apply_params()?;
        let (mut model, vars) = self.build_model()?;
        model.optimize().map_err(backend_err)?;

        let status: i32 = model.get(attr::Status).map_err(backend_err)?;
        let sol_count: i32 = model.get(attr::SolCount).map_err(backend_err)?;
        let nodes: f64 = model.get(attr::NodeCount).map_err(backend_err)?;

        let mut solutions = Vec::new();
        let mut best_obj = f64::INFINITY;
        if sol_count > 0 {
            let x = model.get_values(attr::X, &vars).map_err(backend_err)?;
            best_obj = model.get(attr::ObjVal).map_err(backend_err)?;
            solutions.push(x);
        }
        let best_bound = match model.get(attr::ObjBound) {
            Ok(bound) => bound,
            Err(_) => f64::NEG_INFINITY,
        };
        let gap = if best_obj.is_finite() && best_obj.abs() > 1e-10 {
            ((best_obj - best_bound) / best_obj.abs()).max(0.0)
        } else {
            f64::INFINITY
        };

        let mapped = match status {
            STATUS_OPTIMAL => {
                if gap.is_finite() && gap > 1e-6 {
                    MipStatus::GapLimit
                } else {
                    MipStatus::Optimal
                }
            }
            STATUS_INFEASIBLE => MipStatus::Infeasible,
            STATUS_UNBOUNDED | STATUS_INF_OR_UNBD => MipStatus::Unbounded,
            STATUS_NODE_LIMIT => MipStatus::NodeLimit,
            STATUS_TIME_LIMIT => MipStatus::TimeLimit,
            STATUS_SOLUTION_LIMIT => MipStatus::SolutionLimit,
            other => {
                return Err(SolverError::Backend(format!(
                    "unexpected gurobi status {other}"
                )))
            }
        };

        self.last = Some((model, vars));

        Ok(MipOutcome {
            status: mapped,
            best_bound,
            gap,
            nodes: nodes as u64,
            sol_count: sol_count.max(0) as u64,
            solutions,
        })
    }

    fn extract_ray(&mut self) -> Result<Option<Vec<f64>>, SolverError> {
        let Some((model, vars)) = &self.last else {
            return Ok(None);
        };
        match model.get_values(attr::UnbdRay, vars) {
            Ok(ray) => Ok(Some(ray)),
            Err(_) => Ok(None),
        }
    }
}
