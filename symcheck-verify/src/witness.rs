//! Check results and their human-readable rendering.

use std::fmt;

use symcheck_ast::Expr;

use crate::error::VerifyError;
use crate::model::Model;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BugKind {
    NullPointer,
    UseAfterFree,
    DoubleFree,
    BufferOverflow,
    DivisionByZero,
    NegativeIndex,
    IndexTooLarge,
    AssertionFailure,
    DeadCode,
    InfiniteRecursion,
    StackOverflow,
    MissingBaseCase,
    ExponentialGrowth,
}

impl BugKind {
    pub fn title(self) -> &'static str {
        match self {
            BugKind::NullPointer => "Null pointer dereference",
            BugKind::UseAfterFree => "Use-after-free",
            BugKind::DoubleFree => "Double free",
            BugKind::BufferOverflow => "Buffer overflow",
            BugKind::DivisionByZero => "Division by zero",
            BugKind::NegativeIndex => "Array out-of-bounds (negative index)",
            BugKind::IndexTooLarge => "Array out-of-bounds (index too large)",
            BugKind::AssertionFailure => "Assertion failure",
            BugKind::DeadCode => "Dead code",
            BugKind::InfiniteRecursion => "Infinite recursion",
            BugKind::StackOverflow => "Stack overflow risk",
            BugKind::MissingBaseCase => "Missing base case",
            BugKind::ExponentialGrowth => "Exponential call growth",
        }
    }

    /// Machine-readable identifier used in JSON reports.
    pub fn id(self) -> &'static str {
        match self {
            BugKind::NullPointer => "null_pointer",
            BugKind::UseAfterFree => "use_after_free",
            BugKind::DoubleFree => "double_free",
            BugKind::BufferOverflow => "buffer_overflow",
            BugKind::DivisionByZero => "division_by_zero",
            BugKind::NegativeIndex => "negative_index",
            BugKind::IndexTooLarge => "index_too_large",
            BugKind::AssertionFailure => "assertion_failure",
            BugKind::DeadCode => "dead_code",
            BugKind::InfiniteRecursion => "infinite_recursion",
            BugKind::StackOverflow => "stack_overflow",
            BugKind::MissingBaseCase => "missing_base_case",
            BugKind::ExponentialGrowth => "exponential_growth",
        }
    }

    /// Assertion failure and dead code are detected when the query is UNSAT.
    pub fn is_inverted(self) -> bool {
        matches!(self, BugKind::AssertionFailure | BugKind::DeadCode)
    }
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Ordered `key: value` explanation of a detected defect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Witness {
    fields: Vec<(String, String)>,
}

impl Witness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// `n = 101` for a variable input, `<term> = 101` otherwise.
pub(crate) fn assignment(model: &Model, term: &Expr) -> Result<String, VerifyError> {
    let value = model.render(term)?;
    Ok(format!("{term} = {value}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    BugFound(Witness),
    NoBugFound,
    /// The oracle could not decide; never a clean bill of health.
    Inconclusive(String),
}

impl CheckOutcome {
    pub fn is_bug(&self) -> bool {
        matches!(self, CheckOutcome::BugFound(_))
    }

    pub fn witness(&self) -> Option<&Witness> {
        match self {
            CheckOutcome::BugFound(w) => Some(w),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            CheckOutcome::BugFound(_) => "bug_found",
            CheckOutcome::NoBugFound => "no_bug_found",
            CheckOutcome::Inconclusive(_) => "inconclusive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub kind: BugKind,
    /// What was checked: a function name, a divisor, an address.
    pub subject: Option<String>,
    pub outcome: CheckOutcome,
}

impl CheckReport {
    pub fn new(kind: BugKind, subject: Option<String>, outcome: CheckOutcome) -> Self {
        Self {
            kind,
            subject,
            outcome,
        }
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = self.kind.title();
        match &self.outcome {
            CheckOutcome::BugFound(w) => {
                write!(f, "⚠️ {title} detected!")?;
                for (k, v) in w.fields() {
                    write!(f, "\n   {k}: {v}")?;
                }
                Ok(())
            }
            CheckOutcome::NoBugFound => write!(f, "✅ No {} possible", title.to_lowercase()),
            CheckOutcome::Inconclusive(reason) => {
                write!(f, "❔ {title} check inconclusive: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bug_found_lists_fields_in_order() {
        let r = CheckReport::new(
            BugKind::BufferOverflow,
            None,
            CheckOutcome::BugFound(
                Witness::new()
                    .with("Address", 5)
                    .with("Allocated size", "10 bytes")
                    .with("Access size", "15 bytes")
                    .with("Overflow", "5 bytes"),
            ),
        );
        assert_eq!(
            r.to_string(),
            "⚠️ Buffer overflow detected!\n   Address: 5\n   Allocated size: 10 bytes\n   \
             Access size: 15 bytes\n   Overflow: 5 bytes"
        );
    }

    #[test]
    fn absence_and_unknown_render_distinctly() {
        let none = CheckReport::new(BugKind::DivisionByZero, None, CheckOutcome::NoBugFound);
        assert_eq!(none.to_string(), "✅ No division by zero possible");

        let unknown = CheckReport::new(
            BugKind::DivisionByZero,
            None,
            CheckOutcome::Inconclusive("timeout".into()),
        );
        assert_eq!(
            unknown.to_string(),
            "❔ Division by zero check inconclusive: timeout"
        );
    }

    #[test]
    fn negative_index_title_matches_report_wording() {
        let r = CheckReport::new(
            BugKind::NegativeIndex,
            None,
            CheckOutcome::BugFound(Witness::new().with("Index", -1).with("Size", 10)),
        );
        assert!(r.to_string().starts_with("⚠️ Array out-of-bounds (negative index"));
    }

    #[test]
    fn witness_field_lookup() {
        let w = Witness::new().with("Function", "factorial");
        assert_eq!(w.field("Function"), Some("factorial"));
        assert_eq!(w.field("Missing"), None);
    }
}
