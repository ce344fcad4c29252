//! Bug checks.
//!
//! Each check is one transaction on the store: open a frame, assert the
//! negation of a safety condition, query, close the frame. The frame is
//! closed on every path, so a check never changes what the caller sees.
//! Assertion failure and dead code read the verdict the other way round: an
//! UNSAT query is the defect.

use symcheck_ast::{Constraint, Expr};
use tracing::{debug, warn};

use crate::error::VerifyError;
use crate::model::{Model, Verdict};
use crate::solver::Oracle;
use crate::state::{AllocationTable, ArrayBounds};
use crate::store::ConstraintStore;
use crate::witness::{assignment, BugKind, CheckOutcome, CheckReport, Witness};

/// Recursive function under analysis. `measure` is the quantity a
/// threshold is applied to: recursion depth or number of calls.
#[derive(Debug, Clone)]
pub struct RecursionSite {
    pub function: String,
    pub input: Expr,
    pub measure: Expr,
    pub condition: Expr,
}

impl RecursionSite {
    pub fn new(
        function: impl Into<String>,
        input: impl Into<Expr>,
        measure: impl Into<Expr>,
        condition: impl Into<Expr>,
    ) -> Self {
        Self {
            function: function.into(),
            input: input.into(),
            measure: measure.into(),
            condition: condition.into(),
        }
    }
}

fn detect<O, W>(
    store: &mut ConstraintStore<O>,
    kind: BugKind,
    subject: Option<String>,
    assumptions: Vec<Constraint>,
    probes: &[Expr],
    witness: W,
) -> Result<CheckReport, VerifyError>
where
    O: Oracle,
    W: FnOnce(&Model) -> Result<Witness, VerifyError>,
{
    let verdict = transaction(store, kind, assumptions, probes)?;
    let outcome = match verdict {
        Verdict::Sat(model) => CheckOutcome::BugFound(witness(&model)?),
        Verdict::Unsat => CheckOutcome::NoBugFound,
        Verdict::Unknown(reason) => inconclusive(kind, reason),
    };
    Ok(CheckReport::new(kind, subject, outcome))
}

fn refute<O: Oracle>(
    store: &mut ConstraintStore<O>,
    kind: BugKind,
    subject: Option<String>,
    assumptions: Vec<Constraint>,
    witness: Witness,
) -> Result<CheckReport, VerifyError> {
    let verdict = transaction(store, kind, assumptions, &[])?;
    let outcome = match verdict {
        Verdict::Unsat => CheckOutcome::BugFound(witness),
        Verdict::Sat(_) => CheckOutcome::NoBugFound,
        Verdict::Unknown(reason) => inconclusive(kind, reason),
    };
    Ok(CheckReport::new(kind, subject, outcome))
}

fn transaction<O: Oracle>(
    store: &mut ConstraintStore<O>,
    kind: BugKind,
    assumptions: Vec<Constraint>,
    probes: &[Expr],
) -> Result<Verdict, VerifyError> {
    let verdict = store.scoped(|s| {
        s.assert_all(assumptions)?;
        s.query_with(probes)
    })?;
    debug!(check = kind.id(), %verdict, "check");
    Ok(verdict)
}

fn inconclusive(kind: BugKind, reason: String) -> CheckOutcome {
    warn!(check = kind.id(), %reason, "check inconclusive");
    CheckOutcome::Inconclusive(reason)
}

pub fn check_null_pointer<O: Oracle>(
    store: &mut ConstraintStore<O>,
    addr: &Expr,
) -> Result<CheckReport, VerifyError> {
    detect(
        store,
        BugKind::NullPointer,
        Some(addr.to_string()),
        vec![addr.equals(0).into()],
        std::slice::from_ref(addr),
        |m| Ok(Witness::new().with("Address", m.render(addr)?)),
    )
}

pub fn check_use_after_free<O: Oracle>(
    store: &mut ConstraintStore<O>,
    table: &AllocationTable,
    addr: &Expr,
) -> Result<CheckReport, VerifyError> {
    unallocated(store, BugKind::UseAfterFree, table, addr)
}

/// Freeing `addr` when it is already unallocated.
pub fn check_double_free<O: Oracle>(
    store: &mut ConstraintStore<O>,
    table: &AllocationTable,
    addr: &Expr,
) -> Result<CheckReport, VerifyError> {
    unallocated(store, BugKind::DoubleFree, table, addr)
}

fn unallocated<O: Oracle>(
    store: &mut ConstraintStore<O>,
    kind: BugKind,
    table: &AllocationTable,
    addr: &Expr,
) -> Result<CheckReport, VerifyError> {
    detect(
        store,
        kind,
        Some(addr.to_string()),
        vec![table.is_allocated(addr).not().into()],
        std::slice::from_ref(addr),
        |m| Ok(Witness::new().with("Address", m.render(addr)?)),
    )
}

pub fn check_buffer_overflow<O: Oracle>(
    store: &mut ConstraintStore<O>,
    table: &AllocationTable,
    addr: &Expr,
    access_size: &Expr,
) -> Result<CheckReport, VerifyError> {
    let allocated = table.allocated_size(addr);
    let probes = [addr.clone(), allocated.clone(), access_size.clone()];
    detect(
        store,
        BugKind::BufferOverflow,
        Some(addr.to_string()),
        vec![
            table.is_allocated(addr).into(),
            access_size.gt(&allocated).into(),
        ],
        &probes,
        |m| {
            let alloc = m.int(&allocated)?;
            let access = m.int(access_size)?;
            let overflow = i128::from(access) - i128::from(alloc);
            Ok(Witness::new()
                .with("Address", m.render(addr)?)
                .with("Allocated size", format!("{alloc} bytes"))
                .with("Access size", format!("{access} bytes"))
                .with("Overflow", format!("{overflow} bytes")))
        },
    )
}

pub fn check_division_by_zero<O: Oracle>(
    store: &mut ConstraintStore<O>,
    divisor: &Expr,
) -> Result<CheckReport, VerifyError> {
    let operands = divisor.free_vars();
    detect(
        store,
        BugKind::DivisionByZero,
        Some(divisor.to_string()),
        vec![divisor.equals(0).into()],
        std::slice::from_ref(divisor),
        |m| {
            let mut w = Witness::new().with("Divisor", assignment(m, divisor)?);
            if divisor.as_var().is_none() {
                for name in operands.keys() {
                    let value = m.get(name).ok_or_else(|| {
                        VerifyError::model_access(format!("no binding for `{name}`"))
                    })?;
                    w = w.with(name.as_str(), value);
                }
            }
            Ok(w)
        },
    )
}

/// Negative and too-large indices are separate defects with separate reports.
pub fn check_array_bounds<O: Oracle>(
    store: &mut ConstraintStore<O>,
    bounds: &ArrayBounds,
) -> Result<Vec<CheckReport>, VerifyError> {
    let probes = [bounds.index.clone(), bounds.size.clone()];
    let witness = |m: &Model| -> Result<Witness, VerifyError> {
        Ok(Witness::new()
            .with("Index", m.render(&bounds.index)?)
            .with("Size", m.render(&bounds.size)?))
    };
    let subject = Some(format!("{}[{}]", bounds.size, bounds.index));
    let negative = detect(
        store,
        BugKind::NegativeIndex,
        subject.clone(),
        vec![bounds.negative_index().into()],
        &probes,
        witness,
    )?;
    let too_large = detect(
        store,
        BugKind::IndexTooLarge,
        subject,
        vec![bounds.index_too_large().into()],
        &probes,
        witness,
    )?;
    Ok(vec![negative, too_large])
}

/// `relation` is the asserted property; under the current backdrop it must
/// be satisfiable, otherwise the assertion can never hold.
pub fn check_assertion<O: Oracle>(
    store: &mut ConstraintStore<O>,
    relation: &Expr,
) -> Result<CheckReport, VerifyError> {
    refute(
        store,
        BugKind::AssertionFailure,
        Some(relation.to_string()),
        vec![relation.clone().into()],
        Witness::new()
            .with("Assertion", relation)
            .with("Reason", "no input satisfies the assertion"),
    )
}

/// A branch is dead when its guards cannot hold together.
pub fn check_dead_code<O: Oracle>(
    store: &mut ConstraintStore<O>,
    guards: &[Expr],
) -> Result<CheckReport, VerifyError> {
    let guard = Expr::and(guards.iter().cloned());
    refute(
        store,
        BugKind::DeadCode,
        Some(guard.to_string()),
        vec![guard.clone().into()],
        Witness::new()
            .with("Guard", &guard)
            .with("Reason", "branch condition is unsatisfiable"),
    )
}

pub fn check_infinite_recursion<O: Oracle>(
    store: &mut ConstraintStore<O>,
    site: &RecursionSite,
    max_depth: i64,
) -> Result<CheckReport, VerifyError> {
    let probes = [site.input.clone(), site.measure.clone()];
    detect(
        store,
        BugKind::InfiniteRecursion,
        Some(site.function.clone()),
        vec![
            site.measure.gt(max_depth).into(),
            site.condition.clone().into(),
        ],
        &probes,
        |m| {
            Ok(Witness::new()
                .with("Function", &site.function)
                .with("Input value", assignment(m, &site.input)?)
                .with("Recursion depth", m.int(&site.measure)?)
                .with("Maximum allowed depth", max_depth))
        },
    )
}

pub fn check_stack_overflow<O: Oracle>(
    store: &mut ConstraintStore<O>,
    site: &RecursionSite,
    stack_limit: i64,
) -> Result<CheckReport, VerifyError> {
    let probes = [site.input.clone(), site.measure.clone()];
    detect(
        store,
        BugKind::StackOverflow,
        Some(site.function.clone()),
        vec![
            site.measure.ge(stack_limit).into(),
            site.condition.clone().into(),
        ],
        &probes,
        |m| {
            Ok(Witness::new()
                .with("Function", &site.function)
                .with("Input value", assignment(m, &site.input)?)
                .with("Estimated stack frames", m.int(&site.measure)?)
                .with("Stack limit", stack_limit))
        },
    )
}

/// Some input in `domain` satisfies none of `base_cases`.
pub fn check_missing_base_case<O: Oracle>(
    store: &mut ConstraintStore<O>,
    function: &str,
    input: &Expr,
    base_cases: &[Expr],
    domain: &Expr,
) -> Result<CheckReport, VerifyError> {
    let mut assumptions: Vec<Constraint> = vec![domain.clone().into()];
    assumptions.extend(base_cases.iter().map(|b| Constraint::new(b.not())));
    detect(
        store,
        BugKind::MissingBaseCase,
        Some(function.to_string()),
        assumptions,
        std::slice::from_ref(input),
        |m| {
            Ok(Witness::new()
                .with("Function", function)
                .with("Problematic input", assignment(m, input)?))
        },
    )
}

/// More than `call_threshold` calls for an input below `input_bound`.
pub fn check_exponential_growth<O: Oracle>(
    store: &mut ConstraintStore<O>,
    site: &RecursionSite,
    call_threshold: i64,
    input_bound: i64,
) -> Result<CheckReport, VerifyError> {
    let probes = [site.input.clone(), site.measure.clone()];
    detect(
        store,
        BugKind::ExponentialGrowth,
        Some(site.function.clone()),
        vec![
            site.measure.gt(call_threshold).into(),
            site.input.lt(input_bound).into(),
            site.condition.clone().into(),
        ],
        &probes,
        |m| {
            Ok(Witness::new()
                .with("Function", &site.function)
                .with("Input value", assignment(m, &site.input)?)
                .with("Estimated function calls", m.int(&site.measure)?)
                .with("Call threshold", call_threshold))
        },
    )
}

/// A check as data, so scenarios can carry them.
#[derive(Debug, Clone)]
pub enum Check {
    NullPointer {
        addr: Expr,
    },
    UseAfterFree {
        table: AllocationTable,
        addr: Expr,
    },
    DoubleFree {
        table: AllocationTable,
        addr: Expr,
    },
    BufferOverflow {
        table: AllocationTable,
        addr: Expr,
        access_size: Expr,
    },
    DivisionByZero {
        divisor: Expr,
    },
    ArrayBounds(ArrayBounds),
    AssertionFailure {
        relation: Expr,
    },
    DeadCode {
        guards: Vec<Expr>,
    },
    InfiniteRecursion {
        site: RecursionSite,
        max_depth: i64,
    },
    StackOverflow {
        site: RecursionSite,
        stack_limit: i64,
    },
    MissingBaseCase {
        function: String,
        input: Expr,
        base_cases: Vec<Expr>,
        domain: Expr,
    },
    ExponentialGrowth {
        site: RecursionSite,
        call_threshold: i64,
        input_bound: i64,
    },
}

impl Check {
    /// Short name for listings.
    pub fn name(&self) -> &'static str {
        match self {
            Check::NullPointer { .. } => "null pointer",
            Check::UseAfterFree { .. } => "use-after-free",
            Check::DoubleFree { .. } => "double free",
            Check::BufferOverflow { .. } => "buffer overflow",
            Check::DivisionByZero { .. } => "division by zero",
            Check::ArrayBounds(_) => "array bounds",
            Check::AssertionFailure { .. } => "assertion failure",
            Check::DeadCode { .. } => "dead code",
            Check::InfiniteRecursion { .. } => "infinite recursion",
            Check::StackOverflow { .. } => "stack overflow",
            Check::MissingBaseCase { .. } => "missing base case",
            Check::ExponentialGrowth { .. } => "exponential growth",
        }
    }

    pub fn run<O: Oracle>(
        &self,
        store: &mut ConstraintStore<O>,
    ) -> Result<Vec<CheckReport>, VerifyError> {
        let one = |r: CheckReport| vec![r];
        Ok(match self {
            Check::NullPointer { addr } => one(check_null_pointer(store, addr)?),
            Check::UseAfterFree { table, addr } => one(check_use_after_free(store, table, addr)?),
            Check::DoubleFree { table, addr } => one(check_double_free(store, table, addr)?),
            Check::BufferOverflow {
                table,
                addr,
                access_size,
            } => one(check_buffer_overflow(store, table, addr, access_size)?),
            Check::DivisionByZero { divisor } => one(check_division_by_zero(store, divisor)?),
            Check::ArrayBounds(bounds) => check_array_bounds(store, bounds)?,
            Check::AssertionFailure { relation } => one(check_assertion(store, relation)?),
            Check::DeadCode { guards } => one(check_dead_code(store, guards)?),
            Check::InfiniteRecursion { site, max_depth } => {
                one(check_infinite_recursion(store, site, *max_depth)?)
            }
            Check::StackOverflow { site, stack_limit } => {
                one(check_stack_overflow(store, site, *stack_limit)?)
            }
            Check::MissingBaseCase {
                function,
                input,
                base_cases,
                domain,
            } => one(check_missing_base_case(store, function, input, base_cases, domain)?),
            Check::ExponentialGrowth {
                site,
                call_threshold,
                input_bound,
            } => one(check_exponential_growth(store, site, *call_threshold, *input_bound)?),
        })
    }
}
