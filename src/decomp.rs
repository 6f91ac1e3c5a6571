use std::fmt::{Debug, Display, Formatter};

/// A single variable of a pricing subproblem.
///
/// `cost` is the variable's coefficient in the original objective;
/// the dual-adjusted pricing objective is supplied per round by the
/// master loop and is not stored here.
#[derive(Clone, Debug, PartialEq)]
pub struct SubVar {
    pub cost: f64,
    pub lb: f64,
    pub ub: f64,
    pub integral: bool,
}

/// Sparse linear row `lhs <= coefs * x <= rhs` over subproblem-local
/// variable indices. Either side may be infinite.
#[derive(Clone, Debug, PartialEq)]
pub struct LinCons {
    pub coefs: Vec<(usize, f64)>,
    pub lhs: f64,
    pub rhs: f64,
}

impl LinCons {
    /// Row with only an upper bound
    pub fn le(coefs: Vec<(usize, f64)>, rhs: f64) -> Self {
        LinCons {
            coefs,
            lhs: f64::NEG_INFINITY,
            rhs,
        }
    }

    /// Row with only a lower bound
    pub fn ge(coefs: Vec<(usize, f64)>, lhs: f64) -> Self {
        LinCons {
            coefs,
            lhs,
            rhs: f64::INFINITY,
        }
    }

    /// Evaluate the row at a dense point or direction
    pub fn activity(&self, x: &[f64]) -> f64 {
        self.coefs.iter().map(|(j, a)| a * x[*j]).sum()
    }
}

impl Display for LinCons {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <= ", self.lhs)?;
        for (j, a) in &self.coefs {
            write!(f, "{a:+}*x{j} ")?;
        }
        write!(f, "<= {}", self.rhs)
    }
}

/// One block of the Dantzig-Wolfe decomposition: the pricing subproblem
/// that generates columns for this block.
#[derive(Clone, Debug)]
pub struct Subproblem {
    pub block: usize,
    pub vars: Vec<SubVar>,
    pub conss: Vec<LinCons>,
}

impl Subproblem {
    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }
}

/// Static decomposition input, produced once by the (external) structure
/// detection and consumed by the pricing controller.
///
/// `identical[p]` names the representative block for `p`. A block is
/// *relevant* (actually scheduled) iff it is its own representative;
/// all other blocks are symmetry duplicates whose columns are supplied
/// by their representative.
#[derive(Clone, Debug)]
pub struct Decomposition {
    pub subproblems: Vec<Subproblem>,
    pub identical: Vec<usize>,
}

impl Decomposition {
    /// Decomposition without any symmetric blocks
    pub fn trivial(subproblems: Vec<Subproblem>) -> Self {
        let identical = (0..subproblems.len()).collect();
        Decomposition {
            subproblems,
            identical,
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.subproblems.len()
    }

    pub fn is_representative(&self, probnr: usize) -> bool {
        self.identical[probnr] == probnr
    }

    /// Number of structurally identical blocks represented by `probnr`,
    /// including itself. Zero for a block that is itself a duplicate.
    pub fn multiplicity(&self, probnr: usize) -> usize {
        if !self.is_representative(probnr) {
            return 0;
        }
        self.identical.iter().filter(|r| **r == probnr).count()
    }

    /// Check index closure of all rows and the representative mapping.
    /// A violation is a construction error in the caller, hence panic.
    pub fn validate(&self) {
        assert_eq!(self.identical.len(), self.subproblems.len());
        for (p, sub) in self.subproblems.iter().enumerate() {
            let rep = self.identical[p];
            assert!(rep < self.subproblems.len());
            // representative mapping must be idempotent
            assert_eq!(self.identical[rep], rep);
            for cons in &sub.conss {
                for (j, _) in &cons.coefs {
                    assert!(*j < sub.vars.len());
                }
            }
            for var in &sub.vars {
                assert!(var.lb <= var.ub);
            }
        }
    }
}
