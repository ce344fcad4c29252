#![forbid(unsafe_code)]

use symcheck_ast::{Constraint, Expr};

use crate::error::OracleError;
use crate::model::Verdict;

/// Incremental decision procedure behind a [`crate::ConstraintStore`].
///
/// `check` answers for the conjunction of everything asserted in the
/// currently open scopes. On SAT the model must bind every probe term.
pub trait Oracle {
    fn push(&mut self) -> Result<(), OracleError>;

    fn pop(&mut self) -> Result<(), OracleError>;

    fn assert(&mut self, constraint: &Constraint) -> Result<(), OracleError>;

    fn check(&mut self, probes: &[Expr]) -> Result<Verdict, OracleError>;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn push(&mut self) -> Result<(), OracleError> {
        (**self).push()
    }

    fn pop(&mut self) -> Result<(), OracleError> {
        (**self).pop()
    }

    fn assert(&mut self, constraint: &Constraint) -> Result<(), OracleError> {
        (**self).assert(constraint)
    }

    fn check(&mut self, probes: &[Expr]) -> Result<Verdict, OracleError> {
        (**self).check(probes)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtProfile {
    /// Very low timeouts.
    Fast,
    /// CI-friendly medium timeouts.
    #[default]
    Ci,
    /// Higher timeouts.
    Thorough,
}

impl SmtProfile {
    pub fn timeout_ms(self) -> u32 {
        match self {
            SmtProfile::Fast => 50,
            SmtProfile::Ci => 250,
            SmtProfile::Thorough => 2_000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SmtProfile::Fast => "fast",
            SmtProfile::Ci => "ci",
            SmtProfile::Thorough => "thorough",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(SmtProfile::Fast),
            "ci" => Some(SmtProfile::Ci),
            "thorough" => Some(SmtProfile::Thorough),
            _ => None,
        }
    }
}

/// Fallback oracle when compiled without `--features symcheck-verify/z3`.
///
/// Scope bookkeeping works so the store can be exercised; every `check`
/// reports that no decision procedure is linked in.
#[derive(Debug, Default)]
pub struct NoZ3Oracle {
    depth: usize,
}

impl NoZ3Oracle {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Oracle for NoZ3Oracle {
    fn push(&mut self) -> Result<(), OracleError> {
        self.depth += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<(), OracleError> {
        self.depth = self
            .depth
            .checked_sub(1)
            .ok_or_else(|| OracleError::Backend("pop without matching push".to_string()))?;
        Ok(())
    }

    fn assert(&mut self, _constraint: &Constraint) -> Result<(), OracleError> {
        Ok(())
    }

    fn check(&mut self, _probes: &[Expr]) -> Result<Verdict, OracleError> {
        Err(OracleError::Unavailable(
            "Z3 oracle is not enabled in this build".to_string(),
        ))
    }
}

#[cfg(feature = "z3")]
pub mod z3_oracle {
    use std::collections::HashMap;
    use std::sync::Arc;

    use symcheck_ast::{BinOp, Constraint, Expr, ExprKind, FuncSym, Sort, UnaryOp};
    use tracing::{debug, trace};
    use z3::{
        ast::{Ast, Bool, Dynamic, Int},
        Config, Context, FuncDecl, Params, SatResult, Solver,
    };

    use super::{Oracle, SmtProfile};
    use crate::error::OracleError;
    use crate::model::{Model, Value, Verdict};

    type Memo = HashMap<usize, Dynamic<'static>>;

    pub struct Z3Oracle {
        ctx: &'static Context,
        solver: Solver<'static>,
        consts: HashMap<String, (Sort, Dynamic<'static>)>,
        funcs: HashMap<String, (Arc<FuncSym>, FuncDecl<'static>)>,
        depth: usize,
    }

    impl Z3Oracle {
        pub fn new(profile: SmtProfile) -> Self {
            Self::with_options(profile.timeout_ms(), 0)
        }

        pub fn with_options(timeout_ms: u32, random_seed: u32) -> Self {
            let mut cfg = Config::new();
            cfg.set_model_generation(true);
            // Leak the Z3 context so the solver can be stored next to it without
            // self-referential structs or unsafe code. One context per oracle;
            // oracles live as long as their store.
            let ctx: &'static Context = Box::leak(Box::new(Context::new(&cfg)));

            let solver = Solver::new(ctx);
            let mut params = Params::new(ctx);
            params.set_u32("timeout", timeout_ms);
            // Determinism: same answers and models across runs.
            params.set_u32("smt.random_seed", random_seed);
            params.set_u32("sat.random_seed", random_seed);
            solver.set_params(&params);

            Self {
                ctx,
                solver,
                consts: HashMap::new(),
                funcs: HashMap::new(),
                depth: 0,
            }
        }

        pub fn ctx(&self) -> &'static Context {
            self.ctx
        }

        fn z3_sort(&self, sort: Sort) -> z3::Sort<'static> {
            match sort {
                Sort::Int => z3::Sort::int(self.ctx),
                Sort::Bool => z3::Sort::bool(self.ctx),
            }
        }

        fn constant(&mut self, name: &str, sort: Sort) -> Result<Dynamic<'static>, OracleError> {
            if let Some((existing, c)) = self.consts.get(name) {
                if *existing != sort {
                    return Err(OracleError::SortMismatch {
                        name: name.to_string(),
                        existing: existing.to_string(),
                        requested: sort.to_string(),
                    });
                }
                return Ok(c.clone());
            }
            let c = match sort {
                Sort::Int => Dynamic::from_ast(&Int::new_const(self.ctx, name)),
                Sort::Bool => Dynamic::from_ast(&Bool::new_const(self.ctx, name)),
            };
            trace!(name, %sort, "declare constant");
            self.consts.insert(name.to_string(), (sort, c.clone()));
            Ok(c)
        }

        fn function(&mut self, sym: &Arc<FuncSym>) -> Result<FuncDecl<'static>, OracleError> {
            if let Some((existing, decl)) = self.funcs.get(&sym.name) {
                if existing.domain != sym.domain || existing.range != sym.range {
                    return Err(OracleError::SortMismatch {
                        name: sym.name.clone(),
                        existing: signature(existing),
                        requested: signature(sym),
                    });
                }
                return Ok(decl.clone());
            }
            let domain = sym.domain.iter().map(|s| self.z3_sort(*s)).collect::<Vec<_>>();
            let domain_refs = domain.iter().collect::<Vec<_>>();
            let range = self.z3_sort(sym.range);
            let decl = FuncDecl::new(self.ctx, sym.name.as_str(), &domain_refs, &range);
            trace!(name = %sym.name, "declare function");
            self.funcs.insert(sym.name.clone(), (Arc::clone(sym), decl.clone()));
            Ok(decl)
        }

        fn translate(
            &mut self,
            e: &Expr,
            memo: &mut Memo,
        ) -> Result<Dynamic<'static>, OracleError> {
            if let Some(d) = memo.get(&e.node_id()) {
                return Ok(d.clone());
            }
            let ctx = self.ctx;
            let out = match e.kind() {
                ExprKind::IntLit(n) => Dynamic::from_ast(&Int::from_i64(ctx, *n)),
                ExprKind::BoolLit(b) => Dynamic::from_ast(&Bool::from_bool(ctx, *b)),
                ExprKind::Ident(v) => self.constant(&v.name, v.sort)?,
                ExprKind::Unary { op: UnaryOp::Neg, expr } => {
                    let i = self.translate_int(expr, memo)?;
                    Dynamic::from_ast(&i.unary_minus())
                }
                ExprKind::Unary { op: UnaryOp::Not, expr } => {
                    let b = self.translate_bool(expr, memo)?;
                    Dynamic::from_ast(&b.not())
                }
                ExprKind::Binary { left, op, right } => {
                    self.translate_binary(e, left, *op, right, memo)?
                }
                ExprKind::Call { callee, args } => {
                    if callee.arity() != args.len() {
                        let reason =
                            format!("{} expects {} argument(s)", callee.name, callee.arity());
                        return Err(mismatch(e, reason));
                    }
                    for (arg, sort) in args.iter().zip(&callee.domain) {
                        if arg.sort() != *sort {
                            return Err(mismatch(e, format!("argument `{arg}` is not {sort}")));
                        }
                    }
                    let decl = self.function(callee)?;
                    let translated = args
                        .iter()
                        .map(|a| self.translate(a, memo))
                        .collect::<Result<Vec<_>, _>>()?;
                    let refs = translated
                        .iter()
                        .map(|a| a as &dyn Ast<'static>)
                        .collect::<Vec<_>>();
                    decl.apply(&refs)
                }
                ExprKind::And(parts) | ExprKind::Or(parts) => {
                    let bools = parts
                        .iter()
                        .map(|p| self.translate_bool(p, memo))
                        .collect::<Result<Vec<_>, _>>()?;
                    let refs = bools.iter().collect::<Vec<_>>();
                    if matches!(e.kind(), ExprKind::And(_)) {
                        Dynamic::from_ast(&Bool::and(ctx, &refs))
                    } else {
                        Dynamic::from_ast(&Bool::or(ctx, &refs))
                    }
                }
                ExprKind::Ite { cond, then, els } => {
                    if then.sort() != els.sort() {
                        return Err(mismatch(e, "if-then-else branches differ in sort".to_string()));
                    }
                    let c = self.translate_bool(cond, memo)?;
                    let t = self.translate(then, memo)?;
                    let f = self.translate(els, memo)?;
                    c.ite(&t, &f)
                }
            };
            memo.insert(e.node_id(), out.clone());
            Ok(out)
        }

        fn translate_binary(
            &mut self,
            whole: &Expr,
            left: &Expr,
            op: BinOp,
            right: &Expr,
            memo: &mut Memo,
        ) -> Result<Dynamic<'static>, OracleError> {
            let ctx = self.ctx;
            let out = match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                    let l = self.translate_int(left, memo)?;
                    let r = self.translate_int(right, memo)?;
                    let i = match op {
                        BinOp::Add => Int::add(ctx, &[&l, &r]),
                        BinOp::Sub => Int::sub(ctx, &[&l, &r]),
                        BinOp::Mul => Int::mul(ctx, &[&l, &r]),
                        BinOp::Div => l.div(&r),
                        _ => l.modulo(&r),
                    };
                    Dynamic::from_ast(&i)
                }
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let l = self.translate_int(left, memo)?;
                    let r = self.translate_int(right, memo)?;
                    let b = match op {
                        BinOp::Lt => l.lt(&r),
                        BinOp::Le => l.le(&r),
                        BinOp::Gt => l.gt(&r),
                        _ => l.ge(&r),
                    };
                    Dynamic::from_ast(&b)
                }
                BinOp::Eq | BinOp::Ne => {
                    if left.sort() != right.sort() {
                        let reason = "comparison operands differ in sort".to_string();
                        return Err(mismatch(whole, reason));
                    }
                    let l = self.translate(left, memo)?;
                    let r = self.translate(right, memo)?;
                    let eq = l._eq(&r);
                    if op == BinOp::Eq {
                        Dynamic::from_ast(&eq)
                    } else {
                        Dynamic::from_ast(&eq.not())
                    }
                }
                BinOp::Implies => {
                    let l = self.translate_bool(left, memo)?;
                    let r = self.translate_bool(right, memo)?;
                    Dynamic::from_ast(&l.implies(&r))
                }
            };
            Ok(out)
        }

        fn translate_int(
            &mut self,
            e: &Expr,
            memo: &mut Memo,
        ) -> Result<Int<'static>, OracleError> {
            self.translate(e, memo)?
                .as_int()
                .ok_or_else(|| mismatch(e, "expected an Int term".to_string()))
        }

        fn translate_bool(
            &mut self,
            e: &Expr,
            memo: &mut Memo,
        ) -> Result<Bool<'static>, OracleError> {
            self.translate(e, memo)?
                .as_bool()
                .ok_or_else(|| mismatch(e, "expected a Bool term".to_string()))
        }
    }

    fn signature(sym: &FuncSym) -> String {
        let domain = sym.domain.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ");
        format!("({domain}) -> {}", sym.range)
    }

    fn mismatch(e: &Expr, reason: String) -> OracleError {
        OracleError::Translation {
            expr: e.to_string(),
            reason,
        }
    }

    fn value_of(d: &Dynamic<'static>) -> Value {
        if let Some(i) = d.as_int() {
            return i.as_i64().map(Value::Int).unwrap_or_else(|| Value::Opaque(i.to_string()));
        }
        if let Some(b) = d.as_bool() {
            return b.as_bool().map(Value::Bool).unwrap_or_else(|| Value::Opaque(b.to_string()));
        }
        Value::Opaque(d.to_string())
    }

    impl Oracle for Z3Oracle {
        fn push(&mut self) -> Result<(), OracleError> {
            self.solver.push();
            self.depth += 1;
            Ok(())
        }

        fn pop(&mut self) -> Result<(), OracleError> {
            if self.depth == 0 {
                return Err(OracleError::Backend("pop without matching push".to_string()));
            }
            self.solver.pop(1);
            self.depth -= 1;
            Ok(())
        }

        fn assert(&mut self, constraint: &Constraint) -> Result<(), OracleError> {
            let mut memo = Memo::new();
            let b = self.translate_bool(constraint.expr(), &mut memo)?;
            self.solver.assert(&b);
            Ok(())
        }

        fn check(&mut self, probes: &[Expr]) -> Result<Verdict, OracleError> {
            let mut memo = Memo::new();
            let translated = probes
                .iter()
                .map(|p| self.translate(p, &mut memo))
                .collect::<Result<Vec<_>, _>>()?;

            let sat = self.solver.check();
            debug!(?sat, probes = probes.len(), "z3 check");
            match sat {
                SatResult::Unsat => Ok(Verdict::Unsat),
                SatResult::Unknown => {
                    let reason = self
                        .solver
                        .get_reason_unknown()
                        .unwrap_or_else(|| "unknown".to_string());
                    Ok(Verdict::Unknown(reason))
                }
                SatResult::Sat => {
                    let z3_model = self
                        .solver
                        .get_model()
                        .ok_or_else(|| OracleError::Backend("SAT without a model".to_string()))?;
                    let mut model = Model::new();
                    for (probe, term) in probes.iter().zip(&translated) {
                        let value = z3_model.eval(term, true).map(|v| value_of(&v)).ok_or_else(|| {
                            OracleError::Backend(format!("model cannot evaluate `{probe}`"))
                        })?;
                        model.record(probe.clone(), value);
                    }
                    Ok(Verdict::Sat(model))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_timeouts_increase() {
        assert!(SmtProfile::Fast.timeout_ms() < SmtProfile::Ci.timeout_ms());
        assert!(SmtProfile::Ci.timeout_ms() < SmtProfile::Thorough.timeout_ms());
    }

    #[test]
    fn profile_parse_is_case_insensitive() {
        assert_eq!(SmtProfile::parse("Thorough"), Some(SmtProfile::Thorough));
        assert_eq!(SmtProfile::parse(" ci "), Some(SmtProfile::Ci));
        assert_eq!(SmtProfile::parse("slow"), None);
    }

    #[test]
    fn no_z3_oracle_refuses_to_decide() {
        let mut o = NoZ3Oracle::new();
        o.push().expect("push");
        o.pop().expect("pop");
        assert!(o.pop().is_err());
        let err = o.check(&[]).expect_err("no solver");
        assert!(matches!(err, OracleError::Unavailable(_)));
    }
}
