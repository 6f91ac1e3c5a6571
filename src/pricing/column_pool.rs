use std::fmt::{Debug, Display, Formatter};
use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::decomp::Subproblem;
use crate::misc::IntMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnId(pub u32);

impl std::hash::Hash for ColumnId {
    fn hash<H: std::hash::Hasher>(&self, hasher: &mut H) {
        hasher.write_u32(self.0);
    }
}

impl nohash_hasher::IsEnabled for ColumnId {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Marks a position in the pool. Handed out when a round starts so that
/// the columns generated within the round can be identified afterwards,
/// also when several workers insert concurrently.
pub struct ColumnTicket(pub usize);

/// A point or ray generated by a pricing subproblem, expressed over the
/// owning block's local variable indices.
///
/// Equality and hashing ignore the reduced cost: two columns with the
/// same block, entries and ray flag are the same column.
#[derive(Clone, Debug)]
pub struct Column {
    pub block: usize,
    entries: Vec<(usize, f64)>,
    pub is_ray: bool,
    pub redcost: f64,
}

impl Column {
    /// Build a column from sparse entries. Entries are sorted by variable
    /// index and exact zeros are dropped.
    pub fn new(block: usize, mut entries: Vec<(usize, f64)>, is_ray: bool, redcost: f64) -> Self {
        entries.retain(|(_, v)| *v != 0.0);
        entries.sort_unstable_by_key(|(j, _)| *j);
        Column {
            block,
            entries,
            is_ray,
            redcost,
        }
    }

    /// Build a column from a dense solution vector
    pub fn from_dense(block: usize, values: &[f64], is_ray: bool, redcost: f64) -> Self {
        let entries = values
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(j, v)| (j, *v))
            .collect();
        Column {
            block,
            entries,
            is_ray,
            redcost,
        }
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    /// Value of the column in variable `j`
    pub fn value(&self, j: usize) -> f64 {
        self.entries
            .iter()
            .find(|(i, _)| *i == j)
            .map_or(0.0, |(_, v)| *v)
    }

    /// Objective of the column under a dense coefficient vector
    pub fn dot(&self, coefficients: &[f64]) -> f64 {
        self.entries
            .iter()
            .map(|(j, v)| coefficients[*j] * v)
            .sum()
    }

    pub(crate) fn content_hash(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write_usize(self.block);
        hasher.write_u8(u8::from(self.is_ray));
        for (j, v) in &self.entries {
            hasher.write_usize(*j);
            hasher.write_u64(v.to_bits());
        }
        hasher.finish()
    }

    /// Validate the column against its owning subproblem: every entry must
    /// reference a variable of the block, and a ray must lie in the
    /// recession cone (positive components need an infinite upper bound,
    /// negative ones an infinite lower bound, and every finite row side
    /// must be respected by the direction).
    pub fn check(&self, sub: &Subproblem) -> Result<(), ColumnCheckError> {
        let eps = 1e-9;
        let mut last: Option<usize> = None;
        for (j, _) in &self.entries {
            if *j >= sub.vars.len() {
                return Err(ColumnCheckError::VarOutOfRange);
            }
            if let Some(prev) = last {
                if *j <= prev {
                    return Err(ColumnCheckError::UnsortedEntries);
                }
            }
            last = Some(*j);
        }
        if self.is_ray {
            for (j, v) in &self.entries {
                if *v > 0.0 && sub.vars[*j].ub.is_finite() {
                    return Err(ColumnCheckError::RayViolatesBounds);
                }
                if *v < 0.0 && sub.vars[*j].lb.is_finite() {
                    return Err(ColumnCheckError::RayViolatesBounds);
                }
            }
            for cons in &sub.conss {
                let activity: f64 = cons
                    .coefs
                    .iter()
                    .map(|(j, a)| a * self.value(*j))
                    .sum();
                if cons.rhs.is_finite() && activity > eps {
                    return Err(ColumnCheckError::RayViolatesRows);
                }
                if cons.lhs.is_finite() && activity < -eps {
                    return Err(ColumnCheckError::RayViolatesRows);
                }
            }
        } else {
            #[cfg(feature = "validity_assertions")]
            for (j, v) in &self.entries {
                assert!(
                    *v >= sub.vars[*j].lb - eps && *v <= sub.vars[*j].ub + eps,
                    "column entry outside variable bounds"
                );
            }
        }
        Ok(())
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.block == other.block && self.is_ray == other.is_ray && self.entries == other.entries
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnCheckError {
    VarOutOfRange,
    UnsortedEntries,
    RayViolatesBounds,
    RayViolatesRows,
}

impl Display for ColumnCheckError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnCheckError::VarOutOfRange => write!(f, "entry references unknown variable"),
            ColumnCheckError::UnsortedEntries => write!(f, "entries not strictly sorted"),
            ColumnCheckError::RayViolatesBounds => write!(f, "ray leaves a finite bound"),
            ColumnCheckError::RayViolatesRows => write!(f, "ray leaves a finite row side"),
        }
    }
}

/// Result of an insertion attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddResult {
    Added(ColumnId),
    Duplicate(ColumnId),
    QuotaReached,
}

impl AddResult {
    pub fn was_added(&self) -> bool {
        matches!(self, AddResult::Added(_))
    }
}

/// Holds all accepted columns, persistent across rounds.
///
/// Deduplication compares a new column against every previously accepted
/// one through a content-hash bucket index, so concurrent workers can
/// insert without generating the same column twice.
pub struct ColumnPool {
    columns: Vec<Column>,
    by_hash: IntMap<u64, Vec<u32>>,
    round_start: usize,
    round_quota: usize,
}

impl Default for ColumnPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnPool {
    pub fn new() -> Self {
        ColumnPool {
            columns: Vec::new(),
            by_hash: IntMap::default(),
            round_start: 0,
            round_quota: 0,
        }
    }

    /// Total number of columns in pool
    pub fn count(&self) -> usize {
        self.columns.len()
    }

    /// Returns a specific column from the pool
    pub fn get_column(&self, id: ColumnId) -> &Column {
        &self.columns[id.0 as usize]
    }

    /// Current position marker
    pub fn ticket(&self) -> ColumnTicket {
        ColumnTicket(self.columns.len())
    }

    /// Open a new round: further insertions count against `quota`
    /// (0 = unlimited) and `round_columns` starts empty.
    pub fn start_round(&mut self, quota: usize) {
        self.round_start = self.columns.len();
        self.round_quota = quota;
    }

    /// Columns accepted since the round started
    pub fn round_columns(&self) -> &[Column] {
        &self.columns[self.round_start..]
    }

    pub fn round_count(&self) -> usize {
        self.columns.len() - self.round_start
    }

    /// Columns accepted after the given ticket
    pub fn columns_since(&self, ticket: ColumnTicket) -> &[Column] {
        &self.columns[ticket.0..]
    }

    /// Adds a column to the column pool, filtering duplicates over the
    /// whole pool. A full round quota rejects the column; the caller may
    /// still count it in its statistics.
    pub fn add_column(&mut self, column: Column) -> AddResult {
        let hash = column.content_hash();
        if let Some(bucket) = self.by_hash.get(&hash) {
            for idx in bucket {
                if self.columns[*idx as usize] == column {
                    return AddResult::Duplicate(ColumnId(*idx));
                }
            }
        }

        #[cfg(feature = "validity_assertions")]
        {
            // the hash index must agree with a full scan
            let existing = self.columns.iter().find(|c| **c == column);
            assert!(existing.is_none());
        }

        if self.round_quota > 0 && self.round_count() >= self.round_quota {
            return AddResult::QuotaReached;
        }

        let id = ColumnId(u32::try_from(self.columns.len()).expect("column pool overflow"));
        self.by_hash.entry(hash).or_default().push(id.0);
        self.columns.push(column);
        AddResult::Added(id)
    }
}
