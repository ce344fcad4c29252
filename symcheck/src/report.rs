#![forbid(unsafe_code)]

use serde::Serialize;
use symcheck_verify::{
    CheckOutcome, CheckReport, SampleOutcome, SampleReport, ScenarioReport, StepReport, Suite,
    VerifierConfig,
};

pub const SCHEMA: &str = "symcheck.report.v1";

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema: &'static str,
    pub profile: &'static str,
    pub timeout_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    pub suites: Vec<SuiteEntry>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub scenarios: Vec<ScenarioEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioEntry {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infeasible_backdrop: Option<String>,
    pub steps: Vec<StepEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEntry {
    Check {
        kind: &'static str,
        title: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        outcome: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        witness: Vec<Field>,
    },
    Sample {
        label: String,
        outcome: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        values: Vec<Field>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub scenarios: usize,
    pub checks: usize,
    pub bugs_found: usize,
    pub no_bug_found: usize,
    pub inconclusive: usize,
    pub infeasible_backdrops: usize,
}

impl Summary {
    fn add(&mut self, report: &ScenarioReport) {
        self.scenarios += 1;
        if report.infeasible_backdrop.is_some() {
            self.infeasible_backdrops += 1;
        }
        for check in report.checks() {
            self.checks += 1;
            match check.outcome {
                CheckOutcome::BugFound(_) => self.bugs_found += 1,
                CheckOutcome::NoBugFound => self.no_bug_found += 1,
                CheckOutcome::Inconclusive(_) => self.inconclusive += 1,
            }
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scenario(s), {} check(s): {} bug(s) found, {} clean, {} inconclusive",
            self.scenarios, self.checks, self.bugs_found, self.no_bug_found, self.inconclusive
        )?;
        if self.infeasible_backdrops > 0 {
            write!(f, ", {} with unsatisfiable assumptions", self.infeasible_backdrops)?;
        }
        Ok(())
    }
}

pub fn summarize(results: &[(Suite, Vec<ScenarioReport>)]) -> Summary {
    let mut summary = Summary::default();
    for (_, reports) in results {
        for r in reports {
            summary.add(r);
        }
    }
    summary
}

pub fn build_report(
    cfg: &VerifierConfig,
    config_path: Option<String>,
    results: &[(Suite, Vec<ScenarioReport>)],
) -> RunReport {
    let suites = results
        .iter()
        .map(|(suite, reports)| SuiteEntry {
            name: suite.name,
            description: suite.description,
            scenarios: reports.iter().map(scenario_entry).collect(),
        })
        .collect();
    RunReport {
        schema: SCHEMA,
        profile: cfg.profile.name(),
        timeout_ms: cfg.timeout_ms(),
        config: config_path,
        suites,
        summary: summarize(results),
    }
}

fn scenario_entry(report: &ScenarioReport) -> ScenarioEntry {
    ScenarioEntry {
        name: report.name.clone(),
        description: report.description.clone(),
        infeasible_backdrop: report.infeasible_backdrop.clone(),
        steps: report.steps.iter().map(step_entry).collect(),
    }
}

fn step_entry(step: &StepReport) -> StepEntry {
    match step {
        StepReport::Check(r) => check_entry(r),
        StepReport::Sample(r) => sample_entry(r),
    }
}

fn check_entry(r: &CheckReport) -> StepEntry {
    let (reason, witness) = match &r.outcome {
        CheckOutcome::BugFound(w) => (
            None,
            w.fields()
                .map(|(k, v)| Field {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        ),
        CheckOutcome::NoBugFound => (None, Vec::new()),
        CheckOutcome::Inconclusive(reason) => (Some(reason.clone()), Vec::new()),
    };
    StepEntry::Check {
        kind: r.kind.id(),
        title: r.kind.title(),
        subject: r.subject.clone(),
        outcome: r.outcome.id(),
        reason,
        witness,
    }
}

fn sample_entry(r: &SampleReport) -> StepEntry {
    let (outcome, reason, values) = match &r.outcome {
        SampleOutcome::Feasible(values) => (
            "feasible",
            None,
            values
                .iter()
                .map(|(k, v)| Field {
                    key: k.clone(),
                    value: v.clone(),
                })
                .collect(),
        ),
        SampleOutcome::Infeasible => ("infeasible", None, Vec::new()),
        SampleOutcome::Inconclusive(reason) => ("inconclusive", Some(reason.clone()), Vec::new()),
    };
    StepEntry::Sample {
        label: r.label.clone(),
        outcome,
        reason,
        values,
    }
}

pub fn render_text(results: &[(Suite, Vec<ScenarioReport>)]) -> String {
    let mut out = String::new();
    for (suite, reports) in results {
        out.push_str(&format!("=== {}: {} ===\n", suite.name, suite.description));
        for r in reports {
            out.push('\n');
            out.push_str(&r.to_string());
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str(&summarize(results).to_string());
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use symcheck_verify::{BugKind, Witness};

    fn sample_results() -> Vec<(Suite, Vec<ScenarioReport>)> {
        let suite = Suite {
            name: "basic",
            description: "demo",
            scenarios: Vec::new(),
        };
        let report = ScenarioReport {
            name: "division_by_zero".to_string(),
            description: "Division by zero".to_string(),
            steps: vec![
                StepReport::Check(CheckReport::new(
                    BugKind::DivisionByZero,
                    Some("x".to_string()),
                    CheckOutcome::BugFound(Witness::new().with("Divisor", "x = 0")),
                )),
                StepReport::Check(CheckReport::new(
                    BugKind::DeadCode,
                    None,
                    CheckOutcome::Inconclusive("timeout".to_string()),
                )),
            ],
            infeasible_backdrop: None,
        };
        vec![(suite, vec![report])]
    }

    #[test]
    fn json_report_has_schema_and_tagged_steps() {
        let results = sample_results();
        let report = build_report(&VerifierConfig::default(), None, &results);
        let json = serde_json::to_value(&report).expect("serialize");

        assert_eq!(json["schema"], SCHEMA);
        assert_eq!(json["profile"], "ci");
        assert_eq!(json["timeout_ms"], 250);
        assert!(json.get("config").is_none());

        let steps = &json["suites"][0]["scenarios"][0]["steps"];
        assert_eq!(steps[0]["type"], "check");
        assert_eq!(steps[0]["kind"], "division_by_zero");
        assert_eq!(steps[0]["outcome"], "bug_found");
        assert_eq!(steps[0]["witness"][0]["key"], "Divisor");
        assert_eq!(steps[1]["outcome"], "inconclusive");
        assert_eq!(steps[1]["reason"], "timeout");
        assert!(steps[1].get("witness").is_none());
    }

    #[test]
    fn summary_counts_outcomes() {
        let summary = summarize(&sample_results());
        assert_eq!(
            summary,
            Summary {
                scenarios: 1,
                checks: 2,
                bugs_found: 1,
                no_bug_found: 0,
                inconclusive: 1,
                infeasible_backdrops: 0,
            }
        );
    }

    #[test]
    fn text_report_uses_check_rendering() {
        let text = render_text(&sample_results());
        assert!(text.starts_with("=== basic: demo ===\n"));
        assert!(text.contains("⚠️ Division by zero detected!\n   Divisor: x = 0"));
        assert!(text.contains("❔ Dead code check inconclusive: timeout"));
        let summary = "1 scenario(s), 2 check(s): 1 bug(s) found, 0 clean, 1 inconclusive\n";
        assert!(text.ends_with(summary), "{text}");
    }
}
