#![forbid(unsafe_code)]

//! Term language for hand-authored verification scenarios.
//!
//! Expressions are immutable and reference-counted: cloning an [`Expr`] or a
//! [`Constraint`] shares the underlying term graph. Builders that unroll
//! recursive definitions rely on this sharing, so every traversal in this
//! crate (free variables, rendering) is bounded by the number of distinct
//! nodes rather than the size of the unfolded tree.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sort {
    Int,
    Bool,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Int => write!(f, "Int"),
            Sort::Bool => write!(f, "Bool"),
        }
    }
}

/// A named symbolic placeholder. Two variables with the same name are the
/// same variable as far as the solver is concerned.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var {
    pub name: String,
    pub sort: Sort,
}

impl Var {
    pub fn new(name: impl Into<String>, sort: Sort) -> Self {
        Self {
            name: name.into(),
            sort,
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, Sort::Int)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, Sort::Bool)
    }

    pub fn expr(&self) -> Expr {
        Expr::var(self.clone())
    }
}

/// Uninterpreted function symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FuncSym {
    pub name: String,
    pub domain: Vec<Sort>,
    pub range: Sort,
}

impl FuncSym {
    pub fn new(name: impl Into<String>, domain: Vec<Sort>, range: Sort) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            domain,
            range,
        })
    }

    pub fn arity(&self) -> usize {
        self.domain.len()
    }
}

/// Apply `f` to `args`.
pub fn call(f: &Arc<FuncSym>, args: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Call {
        callee: Arc::clone(f),
        args,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    Implies,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Implies => "=>",
        }
    }

    pub fn result_sort(self) -> Sort {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => Sort::Int,
            _ => Sort::Bool,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprKind {
    IntLit(i64),
    BoolLit(bool),
    Ident(Var),
    Unary {
        op: UnaryOp,
        expr: Expr,
    },
    Binary {
        left: Expr,
        op: BinOp,
        right: Expr,
    },
    Call {
        callee: Arc<FuncSym>,
        args: Vec<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Ite {
        cond: Expr,
        then: Expr,
        els: Expr,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Expr(Arc<ExprKind>);

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    /// Stable identity of this node, shared by all clones.
    pub fn node_id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn int(n: i64) -> Self {
        Self::new(ExprKind::IntLit(n))
    }

    pub fn bool(b: bool) -> Self {
        Self::new(ExprKind::BoolLit(b))
    }

    pub fn var(v: Var) -> Self {
        Self::new(ExprKind::Ident(v))
    }

    pub fn int_var(name: impl Into<String>) -> Self {
        Self::var(Var::int(name))
    }

    pub fn bool_var(name: impl Into<String>) -> Self {
        Self::var(Var::bool(name))
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self.kind() {
            ExprKind::Ident(v) => Some(v),
            _ => None,
        }
    }

    pub fn sort(&self) -> Sort {
        match self.kind() {
            ExprKind::IntLit(_) => Sort::Int,
            ExprKind::BoolLit(_) => Sort::Bool,
            ExprKind::Ident(v) => v.sort,
            ExprKind::Unary { op: UnaryOp::Neg, .. } => Sort::Int,
            ExprKind::Unary { op: UnaryOp::Not, .. } => Sort::Bool,
            ExprKind::Binary { op, .. } => op.result_sort(),
            ExprKind::Call { callee, .. } => callee.range,
            ExprKind::And(_) | ExprKind::Or(_) => Sort::Bool,
            ExprKind::Ite { then, .. } => then.sort(),
        }
    }

    fn binary(&self, op: BinOp, right: impl Into<Expr>) -> Expr {
        Expr::new(ExprKind::Binary {
            left: self.clone(),
            op,
            right: right.into(),
        })
    }

    pub fn equals(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Eq, other)
    }

    pub fn not_equals(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Ne, other)
    }

    pub fn lt(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Lt, other)
    }

    pub fn le(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Le, other)
    }

    pub fn gt(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Gt, other)
    }

    pub fn ge(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Ge, other)
    }

    pub fn div(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Div, other)
    }

    pub fn modulo(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Mod, other)
    }

    pub fn implies(&self, other: impl Into<Expr>) -> Expr {
        self.binary(BinOp::Implies, other)
    }

    pub fn not(&self) -> Expr {
        Expr::new(ExprKind::Unary {
            op: UnaryOp::Not,
            expr: self.clone(),
        })
    }

    /// `self ? then : els`
    pub fn ite(&self, then: impl Into<Expr>, els: impl Into<Expr>) -> Expr {
        Expr::new(ExprKind::Ite {
            cond: self.clone(),
            then: then.into(),
            els: els.into(),
        })
    }

    pub fn max(&self, other: impl Into<Expr>) -> Expr {
        let other = other.into();
        self.ge(other.clone()).ite(self.clone(), other)
    }

    /// Conjunction. The empty conjunction is `true`; a singleton is returned as is.
    pub fn and(parts: impl IntoIterator<Item = Expr>) -> Expr {
        let mut parts: Vec<Expr> = parts.into_iter().collect();
        match parts.len() {
            0 => Expr::bool(true),
            1 => parts.remove(0),
            _ => Expr::new(ExprKind::And(parts)),
        }
    }

    /// Disjunction. The empty disjunction is `false`.
    pub fn or(parts: impl IntoIterator<Item = Expr>) -> Expr {
        let mut parts: Vec<Expr> = parts.into_iter().collect();
        match parts.len() {
            0 => Expr::bool(false),
            1 => parts.remove(0),
            _ => Expr::new(ExprKind::Or(parts)),
        }
    }

    /// Collect every variable reachable from this expression.
    ///
    /// Shared subterms are visited once.
    pub fn free_vars_into(&self, out: &mut BTreeMap<String, Sort>, seen: &mut HashSet<usize>) {
        let mut stack = vec![self.clone()];
        while let Some(e) = stack.pop() {
            if !seen.insert(e.node_id()) {
                continue;
            }
            match e.kind() {
                ExprKind::IntLit(_) | ExprKind::BoolLit(_) => {}
                ExprKind::Ident(v) => {
                    out.insert(v.name.clone(), v.sort);
                }
                ExprKind::Unary { expr, .. } => stack.push(expr.clone()),
                ExprKind::Binary { left, right, .. } => {
                    stack.push(left.clone());
                    stack.push(right.clone());
                }
                ExprKind::Call { args, .. } => stack.extend(args.iter().cloned()),
                ExprKind::And(parts) | ExprKind::Or(parts) => stack.extend(parts.iter().cloned()),
                ExprKind::Ite { cond, then, els } => {
                    stack.push(cond.clone());
                    stack.push(then.clone());
                    stack.push(els.clone());
                }
            }
        }
    }

    pub fn free_vars(&self) -> BTreeMap<String, Sort> {
        let mut out = BTreeMap::new();
        self.free_vars_into(&mut out, &mut HashSet::new());
        out
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Self {
        Expr::var(v)
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Self {
        Expr::var(v.clone())
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::int(n)
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::int(i64::from(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::bool(b)
    }
}

macro_rules! arith_impl {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                self.binary($op, rhs)
            }
        }

        impl<R: Into<Expr>> $trait<R> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                self.binary($op, rhs)
            }
        }
    };
}

arith_impl!(Add, add, BinOp::Add);
arith_impl!(Sub, sub, BinOp::Sub);
arith_impl!(Mul, mul, BinOp::Mul);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::new(ExprKind::Unary {
            op: UnaryOp::Neg,
            expr: self,
        })
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        -(self.clone())
    }
}

/// Rendering is capped so that deeply shared terms (unrolled recursion)
/// never expand into exponentially long strings.
const RENDER_LIMIT: usize = 512;

struct Capped {
    buf: String,
    limit: usize,
    truncated: bool,
}

impl fmt::Write for Capped {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.len() + s.len() > self.limit {
            self.truncated = true;
            return Err(fmt::Error);
        }
        self.buf.push_str(s);
        Ok(())
    }
}

fn render(out: &mut Capped, e: &Expr) -> fmt::Result {
    use fmt::Write;
    match e.kind() {
        ExprKind::IntLit(n) => write!(out, "{n}"),
        ExprKind::BoolLit(b) => write!(out, "{b}"),
        ExprKind::Ident(v) => out.write_str(&v.name),
        ExprKind::Unary { op: UnaryOp::Neg, expr } => {
            out.write_str("-")?;
            render_operand(out, expr)
        }
        ExprKind::Unary { op: UnaryOp::Not, expr } => {
            out.write_str("!")?;
            render_operand(out, expr)
        }
        ExprKind::Binary { left, op, right } => {
            render_operand(out, left)?;
            write!(out, " {} ", op.symbol())?;
            render_operand(out, right)
        }
        ExprKind::Call { callee, args } => {
            write!(out, "{}(", callee.name)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                render(out, a)?;
            }
            out.write_str(")")
        }
        ExprKind::And(parts) | ExprKind::Or(parts) => {
            let sep = if matches!(e.kind(), ExprKind::And(_)) { " && " } else { " || " };
            for (i, p) in parts.iter().enumerate() {
                if i > 0 {
                    out.write_str(sep)?;
                }
                render_operand(out, p)?;
            }
            Ok(())
        }
        ExprKind::Ite { cond, then, els } => {
            out.write_str("if ")?;
            render(out, cond)?;
            out.write_str(" then ")?;
            render(out, then)?;
            out.write_str(" else ")?;
            render(out, els)
        }
    }
}

fn render_operand(out: &mut Capped, e: &Expr) -> fmt::Result {
    use fmt::Write;
    match e.kind() {
        ExprKind::IntLit(n) if *n < 0 => write!(out, "({n})"),
        ExprKind::IntLit(_) | ExprKind::BoolLit(_) | ExprKind::Ident(_) | ExprKind::Call { .. } => {
            render(out, e)
        }
        _ => {
            out.write_str("(")?;
            render(out, e)?;
            out.write_str(")")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = Capped {
            buf: String::new(),
            limit: RENDER_LIMIT,
            truncated: false,
        };
        if render(&mut out, self).is_err() && !out.truncated {
            return Err(fmt::Error);
        }
        f.write_str(&out.buf)?;
        if out.truncated {
            f.write_str("…")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected a {expected} expression, found {found}: {expr}")]
pub struct SortError {
    pub expected: Sort,
    pub found: Sort,
    pub expr: String,
}

/// A boolean-valued fact that can be asserted into a constraint store.
///
/// Construction is unchecked so relational builders stay infallible; the
/// store validates the sort with [`Constraint::sort_check`] on assert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    expr: Expr,
    label: Option<String>,
}

impl Constraint {
    pub fn new(expr: Expr) -> Self {
        Self { expr, label: None }
    }

    /// Like [`Constraint::new`] but rejects non-boolean terms up front.
    pub fn checked(expr: Expr) -> Result<Self, SortError> {
        let c = Self::new(expr);
        c.sort_check()?;
        Ok(c)
    }

    pub fn labeled(expr: Expr, label: impl Into<String>) -> Self {
        Self::new(expr).with_label(label)
    }

    pub fn all(parts: impl IntoIterator<Item = Constraint>) -> Constraint {
        Constraint::new(Expr::and(parts.into_iter().map(|c| c.expr)))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn sort_check(&self) -> Result<(), SortError> {
        let found = self.expr.sort();
        if found != Sort::Bool {
            return Err(SortError {
                expected: Sort::Bool,
                found,
                expr: self.expr.to_string(),
            });
        }
        Ok(())
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn negate(&self) -> Constraint {
        Constraint::new(self.expr.not())
    }
}

impl From<Expr> for Constraint {
    fn from(expr: Expr) -> Self {
        Constraint::new(expr)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label}"),
            None => write!(f, "{}", self.expr),
        }
    }
}
