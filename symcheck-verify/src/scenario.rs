//! Scenario runner: permanent assumptions plus scoped checks inside one
//! outer frame per scenario.

use std::fmt;

use rayon::prelude::*;
use symcheck_ast::{Constraint, Expr};
use tracing::{debug, info, warn};

use crate::checks::Check;
use crate::error::VerifyError;
use crate::model::Verdict;
use crate::solver::Oracle;
use crate::store::ConstraintStore;
use crate::witness::{CheckOutcome, CheckReport};

#[derive(Debug, Clone)]
pub enum Step {
    /// Holds for the rest of the scenario.
    Assume(Constraint),
    Check(Check),
    /// Ask for one concrete assignment satisfying the backdrop.
    Sample { label: String, probes: Vec<Expr> },
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    pub fn assume(mut self, c: impl Into<Constraint>) -> Self {
        self.steps.push(Step::Assume(c.into()));
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.steps.push(Step::Check(check));
        self
    }

    pub fn sample(mut self, label: impl Into<String>, probes: Vec<Expr>) -> Self {
        self.steps.push(Step::Sample {
            label: label.into(),
            probes,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    /// `(term, value)` pairs in probe order.
    Feasible(Vec<(String, String)>),
    Infeasible,
    Inconclusive(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleReport {
    pub label: String,
    pub outcome: SampleOutcome,
}

impl fmt::Display for SampleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            SampleOutcome::Feasible(values) => {
                let values = values
                    .iter()
                    .map(|(k, v)| format!("{k} = {v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "✅ {}: {values}", self.label)
            }
            SampleOutcome::Infeasible => write!(f, "❌ {}: no valid solution found", self.label),
            SampleOutcome::Inconclusive(reason) => {
                write!(f, "❔ {}: inconclusive: {reason}", self.label)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReport {
    Check(CheckReport),
    Sample(SampleReport),
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepReport::Check(r) => fmt::Display::fmt(r, f),
            StepReport::Sample(r) => fmt::Display::fmt(r, f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: String,
    pub description: String,
    pub steps: Vec<StepReport>,
    /// Set when the permanent assumptions became unsatisfiable; names the
    /// assumption after which that was first observed. Every later
    /// "no bug" verdict in this scenario is vacuous.
    pub infeasible_backdrop: Option<String>,
}

impl ScenarioReport {
    pub fn checks(&self) -> impl Iterator<Item = &CheckReport> {
        self.steps.iter().filter_map(|s| match s {
            StepReport::Check(r) => Some(r),
            StepReport::Sample(_) => None,
        })
    }

    pub fn bugs_found(&self) -> usize {
        self.checks().filter(|r| r.outcome.is_bug()).count()
    }

    pub fn inconclusive(&self) -> usize {
        self.checks()
            .filter(|r| matches!(r.outcome, CheckOutcome::Inconclusive(_)))
            .count()
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--- {}: {} ---", self.name, self.description)?;
        if let Some(after) = &self.infeasible_backdrop {
            write!(
                f,
                "\n⚠️ Assumptions are unsatisfiable after `{after}`; verdicts below hold vacuously"
            )?;
        }
        for step in &self.steps {
            write!(f, "\n{step}")?;
        }
        Ok(())
    }
}

/// Run `scenario` inside one outer frame. The frame is popped on every exit
/// path; an oracle or scope error aborts the remaining steps.
pub fn run_scenario<O: Oracle>(
    store: &mut ConstraintStore<O>,
    scenario: &Scenario,
) -> Result<ScenarioReport, VerifyError> {
    info!(scenario = %scenario.name, steps = scenario.steps.len(), "running scenario");
    let report = store.scoped(|s| run_steps(s, scenario))?;
    info!(
        scenario = %scenario.name,
        bugs = report.bugs_found(),
        inconclusive = report.inconclusive(),
        "scenario finished"
    );
    Ok(report)
}

fn run_steps<O: Oracle>(
    store: &mut ConstraintStore<O>,
    scenario: &Scenario,
) -> Result<ScenarioReport, VerifyError> {
    let mut report = ScenarioReport {
        name: scenario.name.clone(),
        description: scenario.description.clone(),
        steps: Vec::new(),
        infeasible_backdrop: None,
    };
    let mut last_assumption: Option<String> = None;
    for step in &scenario.steps {
        match step {
            Step::Assume(c) => {
                store.assert(c.clone())?;
                last_assumption = Some(c.to_string());
            }
            Step::Check(check) => {
                verify_backdrop(store, &mut report, last_assumption.take())?;
                for r in check.run(store)? {
                    report.steps.push(StepReport::Check(r));
                }
            }
            Step::Sample { label, probes } => {
                verify_backdrop(store, &mut report, last_assumption.take())?;
                report
                    .steps
                    .push(StepReport::Sample(sample(store, label, probes)?));
            }
        }
    }
    Ok(report)
}

/// Query the backdrop once after each batch of new assumptions.
fn verify_backdrop<O: Oracle>(
    store: &mut ConstraintStore<O>,
    report: &mut ScenarioReport,
    new_assumption: Option<String>,
) -> Result<(), VerifyError> {
    let Some(after) = new_assumption else {
        return Ok(());
    };
    if report.infeasible_backdrop.is_some() {
        return Ok(());
    }
    match store.query()? {
        Verdict::Unsat => {
            warn!(scenario = %report.name, after = %after, "assumptions are unsatisfiable");
            report.infeasible_backdrop = Some(after);
        }
        Verdict::Unknown(reason) => {
            debug!(scenario = %report.name, %reason, "backdrop feasibility unknown");
        }
        Verdict::Sat(_) => {}
    }
    Ok(())
}

fn sample<O: Oracle>(
    store: &mut ConstraintStore<O>,
    label: &str,
    probes: &[Expr],
) -> Result<SampleReport, VerifyError> {
    let outcome = match store.query_with(probes)? {
        Verdict::Sat(model) => {
            let values = probes
                .iter()
                .map(|p| Ok((p.to_string(), model.render(p)?)))
                .collect::<Result<Vec<_>, VerifyError>>()?;
            SampleOutcome::Feasible(values)
        }
        Verdict::Unsat => SampleOutcome::Infeasible,
        Verdict::Unknown(reason) => {
            warn!(%label, %reason, "sample inconclusive");
            SampleOutcome::Inconclusive(reason)
        }
    };
    Ok(SampleReport {
        label: label.to_string(),
        outcome,
    })
}

pub fn run_suite<O: Oracle>(
    store: &mut ConstraintStore<O>,
    scenarios: &[Scenario],
) -> Result<Vec<ScenarioReport>, VerifyError> {
    scenarios.iter().map(|sc| run_scenario(store, sc)).collect()
}

/// Run scenarios on the rayon pool. Each rayon job builds one store around an
/// oracle from `factory` and runs all of its scenarios on it, each in its own
/// outer frame; oracles never cross threads. Reports keep the input order.
pub fn run_suite_parallel<O, F>(
    scenarios: &[Scenario],
    factory: F,
) -> Result<Vec<ScenarioReport>, VerifyError>
where
    O: Oracle,
    F: Fn() -> O + Sync,
{
    scenarios
        .par_iter()
        .map_init(|| ConstraintStore::new(factory()), |store, sc| run_scenario(store, sc))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::OracleError;
    use crate::model::{Model, Value};
    use crate::testing::ScriptedOracle;
    use crate::witness::BugKind;

    fn x() -> Expr {
        Expr::int_var("x")
    }

    fn division(divisor: Expr) -> Check {
        Check::DivisionByZero { divisor }
    }

    #[test]
    fn assumptions_are_scoped_to_the_scenario() {
        let mut m = Model::new();
        m.bind("x", Value::Int(0));
        let oracle = ScriptedOracle::answering([Verdict::Sat(Model::new()), Verdict::Sat(m)]);
        let mut store = ConstraintStore::new(oracle);
        let sc = Scenario::new("s", "scoped").assume(x().ge(0)).check(division(x()));

        let report = run_scenario(&mut store, &sc).expect("run");
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.infeasible_backdrop, None);
        assert_eq!(store.depth(), 0);
        assert_eq!(store.active_constraints().count(), 0);
        // Backdrop query, then the check with its own frame on top.
        assert_eq!(store.oracle().seen[1], vec!["x >= 0", "x == 0"]);
    }

    #[test]
    fn infeasible_backdrop_is_flagged() {
        let oracle = ScriptedOracle::answering([Verdict::Unsat, Verdict::Unsat]);
        let mut store = ConstraintStore::new(oracle);
        let sc = Scenario::new("s", "contradiction")
            .assume(Constraint::labeled(x().gt(5), "x > 5"))
            .assume(Constraint::labeled(x().lt(0), "x < 0"))
            .check(division(x()));

        let report = run_scenario(&mut store, &sc).expect("run");
        assert_eq!(report.infeasible_backdrop.as_deref(), Some("x < 0"));
        assert!(report.to_string().contains("unsatisfiable after `x < 0`"));
    }

    #[test]
    fn inconclusive_check_does_not_abort() {
        let oracle = ScriptedOracle::answering([
            Verdict::Unknown("timeout".into()),
            Verdict::Unsat,
        ]);
        let mut store = ConstraintStore::new(oracle);
        let sc = Scenario::new("s", "two checks")
            .check(division(x()))
            .check(division(Expr::int_var("y")));

        let report = run_scenario(&mut store, &sc).expect("run");
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.inconclusive(), 1);
    }

    #[test]
    fn oracle_error_aborts_after_popping() {
        let oracle = ScriptedOracle::new()
            .then(Ok(Verdict::Sat(Model::new())))
            .then(Err(OracleError::Backend("crash".into())));
        let mut store = ConstraintStore::new(oracle);
        let sc = Scenario::new("s", "crash")
            .assume(x().gt(5))
            .check(division(x()))
            .check(division(x()));

        assert!(run_scenario(&mut store, &sc).is_err());
        assert_eq!(store.depth(), 0);
        assert_eq!(store.oracle().depth(), 0);
        // The second check never ran.
        assert_eq!(store.oracle().seen.len(), 2);
    }

    #[test]
    fn sample_reports_probe_values() {
        let mut m = Model::new();
        m.bind("x", Value::Int(6));
        m.bind("y", Value::Int(1));
        let oracle = ScriptedOracle::answering([Verdict::Sat(Model::new()), Verdict::Sat(m)]);
        let mut store = ConstraintStore::new(oracle);
        let y = Expr::int_var("y");
        let sc = Scenario::new("s", "sample")
            .assume(y.equals(x() - 5))
            .sample("Safe division example", vec![x(), y.clone()]);

        let report = run_scenario(&mut store, &sc).expect("run");
        assert_eq!(report.steps[0].to_string(), "✅ Safe division example: x = 6, y = 1");
    }

    #[test]
    fn parallel_suite_keeps_order() {
        let scenarios = (0..4)
            .map(|i| Scenario::new(format!("s{i}"), "parallel").check(division(x())))
            .collect::<Vec<_>>();
        let reports = run_suite_parallel(&scenarios, || {
            ScriptedOracle::answering((0..4).map(|_| Verdict::Unsat))
        })
        .expect("suite");
        let names = reports.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["s0", "s1", "s2", "s3"]);
        assert!(reports
            .iter()
            .all(|r| r.checks().all(|c| c.kind == BugKind::DivisionByZero
                && c.outcome == CheckOutcome::NoBugFound)));
    }

    #[test]
    fn parallel_workers_reuse_their_store() {
        let scenarios = (0..16)
            .map(|i| Scenario::new(format!("s{i}"), "shared").check(division(x())))
            .collect::<Vec<_>>();
        let built = AtomicUsize::new(0);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .expect("pool");
        let reports = pool
            .install(|| {
                run_suite_parallel(&scenarios, || {
                    built.fetch_add(1, Ordering::SeqCst);
                    ScriptedOracle::answering((0..16).map(|_| Verdict::Unsat))
                })
            })
            .expect("suite");

        assert_eq!(reports.len(), 16);
        assert!(reports.iter().all(|r| r.bugs_found() == 0));
        let built = built.load(Ordering::SeqCst);
        assert!((1..16).contains(&built), "{built} oracles for 16 scenarios");
    }
}
