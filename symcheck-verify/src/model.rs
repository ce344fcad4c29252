// Model snapshots: oracle output → plain values
//
// A `Model` is produced once per SAT answer and never mutated afterwards.
// It carries a binding for every variable of the active constraint stack plus
// any compound terms the caller asked the oracle to evaluate (probes), so a
// witness can be explained without keeping the solver's own model alive.

use std::collections::BTreeMap;
use std::fmt;

use symcheck_ast::{Expr, ExprKind};

use crate::error::VerifyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    /// Value the backend could not express as a machine integer or boolean.
    Opaque(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Opaque(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    bindings: BTreeMap<String, Value>,
    probes: Vec<(Expr, Value)>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Record the value of a compound term. Variables go through [`Model::bind`].
    pub fn record(&mut self, term: Expr, value: Value) {
        match term.as_var() {
            Some(v) => {
                self.bindings.insert(v.name.clone(), value);
            }
            None => self.probes.push((term, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Variable bindings in name order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Value of a literal, a bound variable, or a recorded probe term.
    pub fn eval(&self, term: &Expr) -> Option<Value> {
        match term.kind() {
            ExprKind::IntLit(n) => Some(Value::Int(*n)),
            ExprKind::BoolLit(b) => Some(Value::Bool(*b)),
            ExprKind::Ident(v) => self.bindings.get(&v.name).cloned(),
            _ => self
                .probes
                .iter()
                .find(|(probe, _)| probe.node_id() == term.node_id() || probe == term)
                .map(|(_, value)| value.clone()),
        }
    }

    pub fn int(&self, term: &Expr) -> Result<i64, VerifyError> {
        match self.eval(term) {
            Some(Value::Int(n)) => Ok(n),
            Some(other) => Err(VerifyError::model_access(format!(
                "`{term}` evaluated to non-integer {other}"
            ))),
            None => Err(VerifyError::model_access(format!("no binding for `{term}`"))),
        }
    }

    pub fn render(&self, term: &Expr) -> Result<String, VerifyError> {
        self.eval(term)
            .map(|v| v.to_string())
            .ok_or_else(|| VerifyError::model_access(format!("no binding for `{term}`")))
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .bindings
            .iter()
            .map(|(k, v)| format!("{k} = {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{parts}")
    }
}

/// Answer of the decision procedure for the conjunction of active constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Sat(Model),
    Unsat,
    /// Timeout or undecidable fragment; never to be read as "no bug".
    Unknown(String),
}

impl Verdict {
    pub fn is_sat(&self) -> bool {
        matches!(self, Verdict::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, Verdict::Unsat)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Verdict::Unknown(_))
    }

    pub fn model(&self) -> Result<&Model, VerifyError> {
        match self {
            Verdict::Sat(m) => Ok(m),
            Verdict::Unsat => Err(VerifyError::model_access("verdict is UNSAT")),
            Verdict::Unknown(reason) => Err(VerifyError::model_access(format!(
                "verdict is UNKNOWN ({reason})"
            ))),
        }
    }

    /// Same answer, ignoring model contents.
    pub fn same_answer(&self, other: &Verdict) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Sat(_) => write!(f, "SAT"),
            Verdict::Unsat => write!(f, "UNSAT"),
            Verdict::Unknown(_) => write!(f, "UNKNOWN"),
        }
    }
}
