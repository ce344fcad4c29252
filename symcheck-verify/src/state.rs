//! Symbolic program state: typed variables and the derived relations the
//! bug checks are phrased over.

use std::collections::BTreeMap;
use std::sync::Arc;

use symcheck_ast::{call, Constraint, Expr, FuncSym, Sort, Var};

use crate::error::{OracleError, VerifyError};

pub const DEFAULT_MEMORY_SIZE: i64 = 100;
pub const DEFAULT_UNROLL_BOUND: u32 = 32;
/// Largest `unroll_bound`. Unrolled terms nest once per level and every walk
/// over a term recurses on its nesting, so larger bounds exhaust a worker
/// thread's stack. [`RecursionProfile::new`] clamps to it.
pub const MAX_UNROLL_BOUND: u32 = 1024;

/// Sort table for one scenario.
#[derive(Debug, Default, Clone)]
pub struct SymbolicState {
    sorts: BTreeMap<String, Sort>,
}

impl SymbolicState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name`, or look it up if it already exists with the same sort.
    pub fn declare(&mut self, name: &str, sort: Sort) -> Result<Expr, VerifyError> {
        match self.sorts.get(name) {
            Some(existing) if *existing != sort => Err(OracleError::SortMismatch {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: sort.to_string(),
            }
            .into()),
            Some(_) => Ok(Expr::var(Var::new(name, sort))),
            None => {
                self.sorts.insert(name.to_string(), sort);
                Ok(Expr::var(Var::new(name, sort)))
            }
        }
    }

    pub fn int(&mut self, name: &str) -> Result<Expr, VerifyError> {
        self.declare(name, Sort::Int)
    }

    pub fn bool(&mut self, name: &str) -> Result<Expr, VerifyError> {
        self.declare(name, Sort::Bool)
    }

    pub fn sort_of(&self, name: &str) -> Option<Sort> {
        self.sorts.get(name).copied()
    }
}

/// Flat allocation model over two uninterpreted functions.
///
/// All facts about one address land in the same query, so allocating and
/// freeing the same address is contradictory. There is no notion of time.
#[derive(Debug, Clone)]
pub struct AllocationTable {
    is_allocated: Arc<FuncSym>,
    allocated_size: Arc<FuncSym>,
    memory_size: i64,
}

impl Default for AllocationTable {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl AllocationTable {
    pub fn new(memory_size: i64) -> Self {
        Self {
            is_allocated: FuncSym::new("is_allocated", vec![Sort::Int], Sort::Bool),
            allocated_size: FuncSym::new("allocated_size", vec![Sort::Int], Sort::Int),
            memory_size,
        }
    }

    pub fn memory_size(&self) -> i64 {
        self.memory_size
    }

    pub fn is_allocated(&self, addr: impl Into<Expr>) -> Expr {
        call(&self.is_allocated, vec![addr.into()])
    }

    pub fn allocated_size(&self, addr: impl Into<Expr>) -> Expr {
        call(&self.allocated_size, vec![addr.into()])
    }

    /// `size <= 0` is not rejected.
    pub fn allocate(&self, addr: impl Into<Expr>, size: impl Into<Expr>) -> Constraint {
        let addr = addr.into();
        let size = size.into();
        let label = format!("allocate({addr}, {size})");
        Constraint::labeled(
            Expr::and([
                self.is_allocated(&addr),
                self.allocated_size(&addr).equals(&size),
                addr.ge(0),
                (&addr + &size).le(self.memory_size),
            ]),
            label,
        )
    }

    pub fn free(&self, addr: impl Into<Expr>) -> Constraint {
        let addr = addr.into();
        let label = format!("free({addr})");
        Constraint::labeled(self.is_allocated(&addr).not(), label)
    }
}

/// Shape of a recursive function: when it stops, and how far each recursive
/// call moves the input toward (or away from) the base cases.
pub trait RecursionPattern: Send + Sync {
    fn name(&self) -> &str;

    /// Guards under which the function returns without recursing.
    fn base_cases(&self, n: &Expr) -> Vec<Expr>;

    /// Each recursive call is made on `n - offset`.
    fn offsets(&self) -> &[i64];

    fn is_base(&self, n: &Expr) -> Expr {
        Expr::or(self.base_cases(n))
    }
}

/// `fact(n) = n * fact(n - 1)`, returning at `n <= 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Factorial;

impl RecursionPattern for Factorial {
    fn name(&self) -> &str {
        "factorial"
    }

    fn base_cases(&self, n: &Expr) -> Vec<Expr> {
        vec![n.le(0)]
    }

    fn offsets(&self) -> &[i64] {
        &[1]
    }
}

/// `fib(n) = fib(n - 1) + fib(n - 2)`, returning at `n <= 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fibonacci;

impl RecursionPattern for Fibonacci {
    fn name(&self) -> &str {
        "fibonacci"
    }

    fn base_cases(&self, n: &Expr) -> Vec<Expr> {
        vec![n.le(1)]
    }

    fn offsets(&self) -> &[i64] {
        &[1, 2]
    }
}

/// Traversal of a complete binary tree; the input is the remaining height.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeTraversal;

impl RecursionPattern for TreeTraversal {
    fn name(&self) -> &str {
        "tree_traversal"
    }

    fn base_cases(&self, n: &Expr) -> Vec<Expr> {
        vec![n.le(0)]
    }

    fn offsets(&self) -> &[i64] {
        &[1, 1]
    }
}

/// Walk over an array; the input is the number of elements left.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayTraversal;

impl RecursionPattern for ArrayTraversal {
    fn name(&self) -> &str {
        "array_traversal"
    }

    fn base_cases(&self, n: &Expr) -> Vec<Expr> {
        vec![n.le(0)]
    }

    fn offsets(&self) -> &[i64] {
        &[1]
    }
}

/// `is_even(n) = n == 0 || is_odd(n - 1)` and its mirror. Negative inputs
/// never reach the base case.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvenOdd;

impl RecursionPattern for EvenOdd {
    fn name(&self) -> &str {
        "even_odd_mutual"
    }

    fn base_cases(&self, n: &Expr) -> Vec<Expr> {
        vec![n.equals(0)]
    }

    fn offsets(&self) -> &[i64] {
        &[1]
    }
}

/// Bounded symbolic unrolling of a [`RecursionPattern`].
///
/// Calls are expanded while the input has shrunk by at most `unroll_bound`.
/// Beyond that, `depth` and `calls` stop counting, and
/// [`RecursionProfile::within_unrolling`] is false. Intermediate terms are
/// memoized per accumulated offset, so the produced terms are DAGs with one
/// node per reachable offset.
#[derive(Clone)]
pub struct RecursionProfile {
    pattern: Arc<dyn RecursionPattern>,
    unroll_bound: u32,
}

impl std::fmt::Debug for RecursionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursionProfile")
            .field("pattern", &self.pattern.name())
            .field("unroll_bound", &self.unroll_bound)
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Measure {
    Depth,
    Calls,
    Terminates,
}

impl RecursionProfile {
    pub fn new(pattern: impl RecursionPattern + 'static, unroll_bound: u32) -> Self {
        Self {
            pattern: Arc::new(pattern),
            unroll_bound: unroll_bound.min(MAX_UNROLL_BOUND),
        }
    }

    pub fn name(&self) -> &str {
        self.pattern.name()
    }

    pub fn pattern(&self) -> &dyn RecursionPattern {
        self.pattern.as_ref()
    }

    pub fn unroll_bound(&self) -> u32 {
        self.unroll_bound
    }

    /// Deepest chain of nested calls below the entry call for input `n`.
    pub fn depth(&self, n: &Expr) -> Expr {
        self.unroll(n, Measure::Depth)
    }

    /// Total number of calls, entry call included.
    pub fn calls(&self, n: &Expr) -> Expr {
        self.unroll(n, Measure::Calls)
    }

    /// Every call path reaches a base case within the unrolling bound.
    pub fn within_unrolling(&self, n: &Expr) -> Expr {
        self.unroll(n, Measure::Terminates)
    }

    /// Built from the cutoff towards offset 0 so that no step recurses; each
    /// level refers to the shared terms of the levels below it.
    fn unroll(&self, n: &Expr, measure: Measure) -> Expr {
        let bound = self.unroll_bound as usize;
        let mut levels = vec![Self::leaf(measure); bound + 1];
        for offset in (0..=bound).rev() {
            let input = if offset == 0 { n.clone() } else { n - offset as i64 };
            let base = self.pattern.is_base(&input);
            let children = self
                .pattern
                .offsets()
                .iter()
                .map(|d| {
                    // A call that does not shrink the input cannot be unrolled.
                    if *d <= 0 {
                        return Self::leaf(measure);
                    }
                    levels
                        .get(offset + *d as usize)
                        .cloned()
                        .unwrap_or_else(|| Self::leaf(measure))
                })
                .collect::<Vec<_>>();
            levels[offset] = Self::combine(base, children, measure);
        }
        levels.swap_remove(0)
    }

    fn leaf(measure: Measure) -> Expr {
        match measure {
            Measure::Depth => Expr::int(0),
            Measure::Calls => Expr::int(1),
            Measure::Terminates => Expr::bool(false),
        }
    }

    fn combine(base: Expr, children: Vec<Expr>, measure: Measure) -> Expr {
        match measure {
            Measure::Depth => {
                let deepest = children
                    .into_iter()
                    .reduce(|a, b| a.max(b))
                    .unwrap_or_else(|| Expr::int(0));
                base.ite(0, deepest + 1)
            }
            Measure::Calls => {
                let total = children.into_iter().fold(Expr::int(1), |acc, c| acc + c);
                base.ite(1, total)
            }
            Measure::Terminates => Expr::or([base, Expr::and(children)]),
        }
    }
}

/// Largest exponent [`exp2`] represents exactly.
pub const EXP2_CAP: i64 = 62;

/// `2^n` as a bounded if-then-else chain over linear arithmetic.
///
/// Negative `n` yields 0; `n >= EXP2_CAP` saturates at `2^EXP2_CAP`.
pub fn exp2(n: &Expr) -> Expr {
    let mut out = Expr::int(1_i64 << EXP2_CAP);
    for k in (0..EXP2_CAP).rev() {
        out = n.equals(k).ite(1_i64 << k, out);
    }
    n.lt(0).ite(0, out)
}

/// Index/size pair an array access is checked against.
#[derive(Debug, Clone)]
pub struct ArrayBounds {
    pub index: Expr,
    pub size: Expr,
}

impl ArrayBounds {
    pub fn new(index: impl Into<Expr>, size: impl Into<Expr>) -> Self {
        Self {
            index: index.into(),
            size: size.into(),
        }
    }

    pub fn negative_index(&self) -> Expr {
        self.index.lt(0)
    }

    pub fn index_too_large(&self) -> Expr {
        self.index.ge(&self.size)
    }
}
