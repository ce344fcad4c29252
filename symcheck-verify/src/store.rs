//! Scoped constraint store.
//!
//! The store mirrors the oracle's incremental scopes with its own frame
//! stack so that it can report depth and active constraints, and so that
//! scope misuse is caught here instead of deep inside the solver.

use std::collections::{BTreeMap, HashSet};

use symcheck_ast::{Constraint, Expr};
use tracing::{debug, trace, warn};

use crate::error::{ScopeError, VerifyError};
use crate::model::Verdict;
use crate::solver::Oracle;

pub struct ConstraintStore<O: Oracle> {
    oracle: O,
    /// `frames[0]` is the root frame and is never popped.
    frames: Vec<Vec<Constraint>>,
}

impl<O: Oracle> ConstraintStore<O> {
    pub fn new(oracle: O) -> Self {
        Self {
            oracle,
            frames: vec![Vec::new()],
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn into_oracle(self) -> O {
        self.oracle
    }

    /// Number of frames above the root frame.
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn push(&mut self) -> Result<(), VerifyError> {
        self.oracle.push()?;
        self.frames.push(Vec::new());
        trace!(depth = self.depth(), "push");
        Ok(())
    }

    pub fn assert(&mut self, constraint: impl Into<Constraint>) -> Result<(), VerifyError> {
        let constraint = constraint.into();
        constraint.sort_check()?;
        if self.frames.is_empty() {
            return Err(ScopeError::NoOpenFrame.into());
        }
        self.oracle.assert(&constraint)?;
        trace!(depth = self.depth(), %constraint, "assert");
        if let Some(top) = self.frames.last_mut() {
            top.push(constraint);
        }
        Ok(())
    }

    pub fn assert_all(
        &mut self,
        constraints: impl IntoIterator<Item = Constraint>,
    ) -> Result<(), VerifyError> {
        for c in constraints {
            self.assert(c)?;
        }
        Ok(())
    }

    /// Discard the top frame and everything asserted into it.
    pub fn pop(&mut self) -> Result<(), VerifyError> {
        if self.frames.len() <= 1 {
            return Err(ScopeError::EmptyStack.into());
        }
        self.oracle.pop()?;
        let dropped = self.frames.pop().map(|f| f.len()).unwrap_or(0);
        trace!(depth = self.depth(), dropped, "pop");
        Ok(())
    }

    /// Constraints of every open frame, root first.
    pub fn active_constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.frames.iter().flatten()
    }

    pub fn query(&mut self) -> Result<Verdict, VerifyError> {
        self.query_with(&[])
    }

    /// Decide the active stack. On SAT the model binds every variable that
    /// occurs in an active constraint plus each term in `probes`.
    pub fn query_with(&mut self, probes: &[Expr]) -> Result<Verdict, VerifyError> {
        let mut vars = BTreeMap::new();
        let mut seen = HashSet::new();
        for c in self.active_constraints() {
            c.expr().free_vars_into(&mut vars, &mut seen);
        }
        let mut terms = vars
            .into_iter()
            .map(|(name, sort)| Expr::var(symcheck_ast::Var::new(name, sort)))
            .collect::<Vec<_>>();
        terms.extend(probes.iter().cloned());

        let verdict = self.oracle.check(&terms)?;
        debug!(
            depth = self.depth(),
            constraints = self.active_constraints().count(),
            %verdict,
            "query"
        );
        Ok(verdict)
    }

    /// Run `f` inside a fresh frame. The store is returned to its entry depth
    /// on every exit path; an error from `f` takes precedence over a failure
    /// to unwind.
    pub fn scoped<T, F>(&mut self, f: F) -> Result<T, VerifyError>
    where
        F: FnOnce(&mut Self) -> Result<T, VerifyError>,
    {
        let entry = self.depth();
        self.push()?;
        let result = f(self);
        let unwound = self.unwind_to(entry);
        match (result, unwound) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unwind_err)) => {
                warn!(error = %unwind_err, "failed to unwind scope after error");
                Err(e)
            }
        }
    }

    fn unwind_to(&mut self, depth: usize) -> Result<(), VerifyError> {
        while self.depth() > depth {
            self.pop()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::model::Model;
    use crate::testing::ScriptedOracle;

    fn x() -> Expr {
        Expr::int_var("x")
    }

    #[test]
    fn pop_at_root_is_an_error() {
        let mut store = ConstraintStore::new(ScriptedOracle::new());
        let err = store.pop().expect_err("root frame");
        assert!(matches!(err, VerifyError::Scope(ScopeError::EmptyStack)));
        assert_eq!(store.depth(), 0);
    }

    #[test]
    fn assert_rejects_int_terms() {
        let mut store = ConstraintStore::new(ScriptedOracle::new());
        let err = store.assert(x() + 1).expect_err("int term");
        assert!(matches!(err, VerifyError::Sort(_)));
        assert_eq!(store.active_constraints().count(), 0);
    }

    #[test]
    fn failed_oracle_pop_keeps_the_frame() {
        let mut store = ConstraintStore::new(ScriptedOracle::new().failing_pops());
        store.push().expect("push");
        store.assert(x().equals(0)).expect("assert");
        let err = store.pop().expect_err("oracle refuses");
        assert!(matches!(err, VerifyError::Oracle(OracleError::Backend(_))));
        assert_eq!(store.depth(), 1);
        assert_eq!(store.oracle().depth(), 1);
        assert_eq!(store.active_constraints().count(), 1);
    }

    #[test]
    fn pop_discards_frame_contents() {
        let mut store = ConstraintStore::new(ScriptedOracle::new());
        store.assert(x().gt(5)).expect("root assert");
        store.push().expect("push");
        store.assert(x().equals(0)).expect("assert");
        assert_eq!(store.active_constraints().count(), 2);
        store.pop().expect("pop");
        let left = store
            .active_constraints()
            .map(|c| c.to_string())
            .collect::<Vec<_>>();
        assert_eq!(left, vec!["x > 5"]);
        assert_eq!(store.oracle().depth(), 0);
    }

    #[test]
    fn query_probes_every_free_variable_once() {
        let oracle = ScriptedOracle::answering([Verdict::Sat(Model::new())]);
        let mut store = ConstraintStore::new(oracle);
        store.assert(x().gt(5)).expect("assert");
        store.assert(Expr::int_var("y").equals(x() - 5)).expect("assert");
        let probe = x() * 2;
        store.query_with(&[probe.clone()]).expect("query");

        let probes = &store.oracle().probes[0];
        let rendered = probes.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        assert_eq!(rendered, vec!["x", "y", "x * 2"]);
    }

    #[test]
    fn scoped_unwinds_after_closure_error() {
        let oracle = ScriptedOracle::new().then(Err(OracleError::Backend("boom".into())));
        let mut store = ConstraintStore::new(oracle);
        let err = store
            .scoped(|s| {
                s.assert(x().equals(0))?;
                s.push()?;
                s.query()
            })
            .expect_err("oracle failure");
        assert!(matches!(err, VerifyError::Oracle(OracleError::Backend(_))));
        assert_eq!(store.depth(), 0);
        assert_eq!(store.oracle().depth(), 0);
        assert_eq!(store.active_constraints().count(), 0);
    }

    #[test]
    fn scoped_assumptions_do_not_leak_to_siblings() {
        let oracle = ScriptedOracle::answering([Verdict::Unsat, Verdict::Unsat]);
        let mut store = ConstraintStore::new(oracle);
        store.assert(x().gt(5)).expect("assert");
        store
            .scoped(|s| {
                s.assert(x().equals(0))?;
                s.query()
            })
            .expect("first");
        store
            .scoped(|s| {
                s.assert(x().equals(7))?;
                s.query()
            })
            .expect("second");

        let seen = &store.oracle().seen;
        assert_eq!(seen[0], vec!["x > 5", "x == 0"]);
        assert_eq!(seen[1], vec!["x > 5", "x == 7"]);
    }
}
