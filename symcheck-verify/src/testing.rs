//! Scripted oracle for exercising the store and checks without a solver.

use std::collections::VecDeque;

use symcheck_ast::{Constraint, Expr};

use crate::error::OracleError;
use crate::model::Verdict;
use crate::solver::Oracle;

#[derive(Debug, Default)]
pub(crate) struct ScriptedOracle {
    frames: Vec<Vec<Constraint>>,
    answers: VecDeque<Result<Verdict, OracleError>>,
    /// Active constraints (rendered) at each `check`, in call order.
    pub(crate) seen: Vec<Vec<String>>,
    /// Probe terms passed to each `check`.
    pub(crate) probes: Vec<Vec<Expr>>,
    fail_pops: bool,
}

impl ScriptedOracle {
    pub(crate) fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
            ..Self::default()
        }
    }

    pub(crate) fn answering(answers: impl IntoIterator<Item = Verdict>) -> Self {
        let mut o = Self::new();
        o.answers.extend(answers.into_iter().map(Ok));
        o
    }

    pub(crate) fn then(mut self, answer: Result<Verdict, OracleError>) -> Self {
        self.answers.push_back(answer);
        self
    }

    pub(crate) fn failing_pops(mut self) -> Self {
        self.fail_pops = true;
        self
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len() - 1
    }
}

impl Oracle for ScriptedOracle {
    fn push(&mut self) -> Result<(), OracleError> {
        self.frames.push(Vec::new());
        Ok(())
    }

    fn pop(&mut self) -> Result<(), OracleError> {
        if self.fail_pops {
            return Err(OracleError::Backend("pop refused".to_string()));
        }
        if self.frames.len() == 1 {
            return Err(OracleError::Backend("pop without matching push".to_string()));
        }
        self.frames.pop();
        Ok(())
    }

    fn assert(&mut self, constraint: &Constraint) -> Result<(), OracleError> {
        if let Some(top) = self.frames.last_mut() {
            top.push(constraint.clone());
        }
        Ok(())
    }

    fn check(&mut self, probes: &[Expr]) -> Result<Verdict, OracleError> {
        self.seen.push(
            self.frames
                .iter()
                .flatten()
                .map(|c| c.expr().to_string())
                .collect(),
        );
        self.probes.push(probes.to_vec());
        self.answers
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Backend("script exhausted".to_string())))
    }
}
