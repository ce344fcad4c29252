#![cfg(feature = "z3")]

use symcheck_verify::{
    run_suite, run_suite_parallel, suite, BugKind, CheckOutcome, ConstraintStore, SampleOutcome,
    ScenarioReport, SmtProfile, StepReport, VerifierConfig,
};

fn config() -> VerifierConfig {
    VerifierConfig {
        profile: SmtProfile::Thorough,
        ..VerifierConfig::default()
    }
}

fn run(name: &str) -> Vec<ScenarioReport> {
    let cfg = config();
    let s = suite(name, &cfg).expect("suite");
    let mut store = ConstraintStore::new(cfg.z3_oracle());
    let reports = run_suite(&mut store, &s.scenarios).expect("run");
    assert_eq!(store.depth(), 0);
    reports
}

fn scenario<'a>(reports: &'a [ScenarioReport], name: &str) -> &'a ScenarioReport {
    reports
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no scenario {name}"))
}

fn outcomes(report: &ScenarioReport) -> Vec<(BugKind, bool)> {
    report.checks().map(|c| (c.kind, c.outcome.is_bug())).collect()
}

#[test]
fn z3_basic_suite_finds_every_seeded_bug() {
    let reports = run("basic");
    for r in &reports {
        assert!(r.infeasible_backdrop.is_none(), "{}", r.name);
        assert!(r.checks().all(|c| c.outcome.is_bug()), "{r}");
    }

    let bounds = scenario(&reports, "array_bounds");
    let indices = bounds
        .checks()
        .map(|c| {
            let index = c.outcome.witness().and_then(|w| w.field("Index"));
            index.and_then(|v| v.parse::<i64>().ok())
        })
        .collect::<Vec<_>>();
    assert!(matches!(indices[0], Some(i) if i < 0));
    assert!(matches!(indices[1], Some(i) if i >= 10));
}

#[test]
fn z3_functions_suite_samples_a_safe_division() {
    let reports = run("functions");
    let r = scenario(&reports, "divide_across_calls");
    assert_eq!(outcomes(r), vec![(BugKind::DivisionByZero, true)]);

    let sample = r
        .steps
        .iter()
        .find_map(|s| match s {
            StepReport::Sample(s) => Some(s),
            StepReport::Check(_) => None,
        })
        .expect("sample step");
    let SampleOutcome::Feasible(values) = &sample.outcome else {
        panic!("expected a feasible sample, got {sample}");
    };
    let x: i64 = values[0].1.parse().expect("x");
    let y: i64 = values[1].1.parse().expect("y");
    assert!(x > 5);
    assert_eq!(y, x - 5);
}

#[test]
fn z3_memory_suite() {
    let reports = run("memory");

    let alloc = scenario(&reports, "allocation");
    assert_eq!(
        outcomes(alloc),
        vec![
            (BugKind::NullPointer, true),
            (BugKind::UseAfterFree, false),
            (BugKind::BufferOverflow, true),
        ]
    );
    let overflow = alloc
        .checks()
        .last()
        .and_then(|c| c.outcome.witness())
        .expect("overflow witness");
    assert_eq!(overflow.field("Overflow"), Some("5 bytes"));

    let uaf = scenario(&reports, "use_after_free");
    assert!(uaf.infeasible_backdrop.is_some());

    let released = scenario(&reports, "use_after_free_released");
    assert!(released.infeasible_backdrop.is_none());
    assert_eq!(outcomes(released), vec![(BugKind::UseAfterFree, true)]);

    let double = scenario(&reports, "double_free");
    assert!(double.infeasible_backdrop.is_some());

    let symbolic = scenario(&reports, "symbolic_allocation");
    assert_eq!(outcomes(symbolic), vec![(BugKind::BufferOverflow, true)]);
}

#[test]
fn z3_recursion_suite() {
    let reports = run("recursion");

    let fact = scenario(&reports, "factorial");
    assert_eq!(
        outcomes(fact),
        vec![
            (BugKind::InfiniteRecursion, true),
            (BugKind::InfiniteRecursion, true),
            (BugKind::MissingBaseCase, true),
            (BugKind::StackOverflow, true),
        ]
    );
    let first = fact.checks().next().and_then(|c| c.outcome.witness()).expect("witness");
    let depth: i64 = first.field("Recursion depth").and_then(|d| d.parse().ok()).expect("depth");
    assert!(depth > 100);
    assert_eq!(first.field("Maximum allowed depth"), Some("100"));

    let unrolled = scenario(&reports, "factorial_unrolled");
    assert_eq!(outcomes(unrolled), vec![(BugKind::InfiniteRecursion, true)]);

    let fib = scenario(&reports, "fibonacci");
    let growth = fib.checks().next().expect("growth check");
    assert_eq!(growth.kind, BugKind::ExponentialGrowth);
    let calls: i64 = growth
        .outcome
        .witness()
        .and_then(|w| w.field("Estimated function calls"))
        .and_then(|c| c.parse().ok())
        .expect("calls");
    assert!(calls > 100);

    let tree = scenario(&reports, "binary_tree");
    assert!(tree.infeasible_backdrop.is_none());
    assert_eq!(
        outcomes(tree),
        vec![(BugKind::StackOverflow, true), (BugKind::ExponentialGrowth, true)]
    );

    let mutual = scenario(&reports, "mutual_recursion");
    assert_eq!(
        outcomes(mutual),
        vec![(BugKind::MissingBaseCase, true), (BugKind::InfiniteRecursion, true)]
    );
    let input = mutual
        .checks()
        .next()
        .and_then(|c| c.outcome.witness())
        .and_then(|w| w.field("Problematic input"));
    let n: i64 = input
        .and_then(|s| s.strip_prefix("n = "))
        .and_then(|v| v.parse().ok())
        .expect("input");
    assert!(n < 0 && n % 2 == 0);
}

#[test]
fn z3_parallel_and_sequential_runs_agree() {
    let cfg = config();
    let s = suite("memory", &cfg).expect("suite");
    let mut store = ConstraintStore::new(cfg.z3_oracle());
    let sequential = run_suite(&mut store, &s.scenarios).expect("sequential");
    let parallel = run_suite_parallel(&s.scenarios, || cfg.z3_oracle()).expect("parallel");

    assert_eq!(sequential.len(), parallel.len());
    for (a, b) in sequential.iter().zip(&parallel) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.infeasible_backdrop, b.infeasible_backdrop);
        assert_eq!(outcomes(a), outcomes(b));
        assert!(a.checks().all(|c| !matches!(c.outcome, CheckOutcome::Inconclusive(_))));
    }
}
