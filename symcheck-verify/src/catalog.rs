//! Built-in scenario suites.

use symcheck_ast::Expr;

use crate::checks::{Check, RecursionSite};
use crate::config::VerifierConfig;
use crate::error::VerifyError;
use crate::scenario::Scenario;
use crate::state::{
    exp2, ArrayBounds, EvenOdd, Factorial, Fibonacci, RecursionPattern, SymbolicState,
    TreeTraversal,
};

pub const SUITE_NAMES: [&str; 4] = ["basic", "functions", "memory", "recursion"];

#[derive(Debug, Clone)]
pub struct Suite {
    pub name: &'static str,
    pub description: &'static str,
    pub scenarios: Vec<Scenario>,
}

pub fn suite(name: &str, cfg: &VerifierConfig) -> Result<Suite, VerifyError> {
    match name {
        "basic" => basic(),
        "functions" => functions(),
        "memory" => memory(cfg),
        "recursion" => recursion(cfg),
        other => Err(VerifyError::config(format!(
            "unknown suite `{other}` (available: {})",
            SUITE_NAMES.join(", ")
        ))),
    }
}

pub fn all_suites(cfg: &VerifierConfig) -> Result<Vec<Suite>, VerifyError> {
    SUITE_NAMES.iter().map(|name| suite(name, cfg)).collect()
}

fn basic() -> Result<Suite, VerifyError> {
    let mut scenarios = Vec::new();

    let mut st = SymbolicState::new();
    let x = st.int("x")?;
    scenarios.push(
        Scenario::new("division_by_zero", "Division by zero")
            .assume(x.equals(0))
            .check(Check::DivisionByZero { divisor: x }),
    );

    let mut st = SymbolicState::new();
    let index = st.int("index")?;
    let size = st.int("size")?;
    scenarios.push(
        Scenario::new("array_bounds", "Array index against a 10-element array")
            .assume(size.equals(10))
            .check(Check::ArrayBounds(ArrayBounds::new(index, size))),
    );

    let mut st = SymbolicState::new();
    let a = st.int("a")?;
    let b = st.int("b")?;
    scenarios.push(
        Scenario::new("assertion_failure", "assert(a > b) with a = 5, b = 10")
            .assume(a.equals(5))
            .assume(b.equals(10))
            .check(Check::AssertionFailure { relation: a.gt(&b) }),
    );

    let mut st = SymbolicState::new();
    let x = st.int("x")?;
    let y = st.int("y")?;
    scenarios.push(
        Scenario::new("dead_code", "if (x > 10 && y < 5 && y > 10)").check(Check::DeadCode {
            guards: vec![x.gt(10), y.lt(5), y.gt(10)],
        }),
    );

    Ok(Suite {
        name: "basic",
        description: "Arithmetic, indexing and control-flow defects",
        scenarios,
    })
}

fn functions() -> Result<Suite, VerifyError> {
    let mut st = SymbolicState::new();
    let x = st.int("x")?;
    let y = st.int("y")?;
    let scenario = Scenario::new("divide_across_calls", "divide(x, y) called with x > 5")
        .assume(x.gt(5))
        .check(Check::DivisionByZero { divisor: y.clone() })
        .assume(y.equals(&x - 5))
        .sample("Safe division example", vec![x, y]);

    Ok(Suite {
        name: "functions",
        description: "Defects across a function boundary",
        scenarios: vec![scenario],
    })
}

fn memory(cfg: &VerifierConfig) -> Result<Suite, VerifyError> {
    let table = cfg.allocation_table();
    let mut scenarios = Vec::new();

    let mut st = SymbolicState::new();
    let addr = st.int("addr")?;
    let access_size = st.int("access_size")?;
    scenarios.push(
        Scenario::new("allocation", "allocate 10 bytes at address 5")
            .assume(table.allocate(5, 10))
            .check(Check::NullPointer { addr: addr.clone() })
            .assume(addr.equals(5))
            .check(Check::UseAfterFree {
                table: table.clone(),
                addr: addr.clone(),
            })
            .assume(access_size.equals(15))
            .check(Check::BufferOverflow {
                table: table.clone(),
                addr,
                access_size,
            }),
    );

    // Allocation and release of one address share a single query, so this
    // backdrop is contradictory and gets flagged by the runner.
    let mut st = SymbolicState::new();
    let addr = st.int("addr")?;
    scenarios.push(
        Scenario::new("use_after_free", "allocate, free, then use address 10")
            .assume(table.allocate(10, 20))
            .assume(table.free(10))
            .assume(addr.equals(10))
            .check(Check::UseAfterFree {
                table: table.clone(),
                addr,
            }),
    );

    let mut st = SymbolicState::new();
    let addr = st.int("addr")?;
    scenarios.push(
        Scenario::new("use_after_free_released", "use address 10 after free")
            .assume(table.free(10))
            .assume(addr.equals(10))
            .check(Check::UseAfterFree {
                table: table.clone(),
                addr,
            }),
    );

    let mut st = SymbolicState::new();
    let addr = st.int("addr")?;
    scenarios.push(
        Scenario::new("double_free", "allocate, free, then free address 15 again")
            .assume(table.allocate(15, 5))
            .assume(table.free(15))
            .assume(addr.equals(15))
            .check(Check::DoubleFree {
                table: table.clone(),
                addr,
            }),
    );

    let mut st = SymbolicState::new();
    let addr = st.int("addr")?;
    let size = st.int("size")?;
    let access_size = st.int("access_size")?;
    scenarios.push(
        Scenario::new("symbolic_allocation", "symbolic address and size")
            .assume(addr.ge(0))
            .assume(addr.lt(table.memory_size()))
            .assume(size.gt(0))
            .assume(size.lt(50))
            .assume(table.allocate(&addr, &size))
            .assume(access_size.ge(&size))
            .check(Check::BufferOverflow {
                table: table.clone(),
                addr,
                access_size,
            }),
    );

    Ok(Suite {
        name: "memory",
        description: "Allocation-table memory safety",
        scenarios,
    })
}

fn recursion(cfg: &VerifierConfig) -> Result<Suite, VerifyError> {
    let mut scenarios = Vec::new();

    let mut st = SymbolicState::new();
    let n = st.int("n")?;
    let depth = st.int("depth")?;
    let linear = Expr::and([n.ge(0), depth.equals(&n)]);
    scenarios.push(
        Scenario::new("factorial", "fact(n) = n * fact(n - 1)")
            .check(Check::InfiniteRecursion {
                site: RecursionSite::new("factorial", &n, &depth, linear.clone()),
                max_depth: 100,
            })
            .check(Check::InfiniteRecursion {
                site: RecursionSite::new("factorial", &n, &depth, n.lt(0)),
                max_depth: 10,
            })
            .check(Check::MissingBaseCase {
                function: "factorial".to_string(),
                input: n.clone(),
                base_cases: vec![n.equals(0), n.equals(1)],
                domain: n.lt(0),
            })
            .check(Check::StackOverflow {
                site: RecursionSite::new("factorial", &n, &depth, linear),
                stack_limit: 1000,
            }),
    );

    let mut st = SymbolicState::new();
    let n = st.int("n")?;
    let profile = cfg.recursion_profile(Factorial);
    scenarios.push(
        Scenario::new("factorial_unrolled", "factorial depth by symbolic unrolling").check(
            Check::InfiniteRecursion {
                site: RecursionSite::new(
                    profile.name(),
                    &n,
                    profile.depth(&n),
                    Expr::and([n.ge(0), profile.within_unrolling(&n)]),
                ),
                max_depth: 20,
            },
        ),
    );

    let mut st = SymbolicState::new();
    let n = st.int("n")?;
    let depth = st.int("depth")?;
    let calls = st.int("calls")?;
    let profile = cfg.recursion_profile(Fibonacci);
    scenarios.push(
        Scenario::new("fibonacci", "fib(n) = fib(n - 1) + fib(n - 2)")
            .check(Check::ExponentialGrowth {
                site: RecursionSite::new(
                    profile.name(),
                    &n,
                    &calls,
                    Expr::and([
                        n.ge(10),
                        calls.equals(profile.calls(&n)),
                        profile.within_unrolling(&n),
                    ]),
                ),
                call_threshold: cfg.exponential_call_threshold,
                input_bound: cfg.exponential_input_bound,
            })
            .check(Check::InfiniteRecursion {
                site: RecursionSite::new(profile.name(), &n, &depth, n.lt(0)),
                max_depth: 10,
            }),
    );

    let mut st = SymbolicState::new();
    let tree_depth = st.int("tree_depth")?;
    let tree_nodes = st.int("tree_nodes")?;
    let depth = st.int("depth")?;
    let calls = st.int("calls")?;
    let profile = cfg.recursion_profile(TreeTraversal);
    scenarios.push(
        Scenario::new("binary_tree", "traversal of a complete binary tree")
            .assume(tree_nodes.equals(exp2(&tree_depth) - 1))
            .check(Check::StackOverflow {
                site: RecursionSite::new(
                    profile.name(),
                    &tree_depth,
                    &depth,
                    Expr::and([tree_depth.ge(5), depth.equals(&tree_depth)]),
                ),
                stack_limit: 1000,
            })
            .check(Check::ExponentialGrowth {
                site: RecursionSite::new(
                    profile.name(),
                    &tree_depth,
                    &calls,
                    Expr::and([
                        tree_depth.ge(0),
                        calls.equals(profile.calls(&tree_depth)),
                        profile.within_unrolling(&tree_depth),
                    ]),
                ),
                call_threshold: cfg.exponential_call_threshold,
                input_bound: cfg.exponential_input_bound,
            }),
    );

    let mut st = SymbolicState::new();
    let n = st.int("n")?;
    let profile = cfg.recursion_profile(EvenOdd);
    scenarios.push(
        Scenario::new("mutual_recursion", "is_even / is_odd").check(Check::MissingBaseCase {
            function: profile.name().to_string(),
            input: n.clone(),
            base_cases: EvenOdd.base_cases(&n),
            domain: Expr::and([n.modulo(2).equals(0), n.lt(0)]),
        })
        .check(Check::InfiniteRecursion {
            site: RecursionSite::new(profile.name(), &n, profile.depth(&n), n.lt(0)),
            max_depth: 10,
        }),
    );

    Ok(Suite {
        name: "recursion",
        description: "Termination and growth of recursive functions",
        scenarios,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_suite_builds() {
        let cfg = VerifierConfig::default();
        let suites = all_suites(&cfg).expect("catalog");
        let names = suites.iter().map(|s| s.name).collect::<Vec<_>>();
        assert_eq!(names, SUITE_NAMES);
        assert!(suites.iter().all(|s| !s.scenarios.is_empty()));
    }

    #[test]
    fn unknown_suite_is_a_config_error() {
        let err = suite("network", &VerifierConfig::default()).expect_err("unknown");
        assert!(err.to_string().contains("basic, functions, memory, recursion"));
    }

    #[test]
    fn memory_size_flows_from_config() {
        let cfg = VerifierConfig {
            memory_size: 64,
            ..VerifierConfig::default()
        };
        let memory = suite("memory", &cfg).expect("memory");
        let rendered = memory.scenarios[0]
            .steps
            .iter()
            .find_map(|s| match s {
                crate::scenario::Step::Assume(c) => Some(c.expr().to_string()),
                _ => None,
            })
            .expect("assumption");
        assert!(rendered.ends_with("<= 64)"), "{rendered}");
    }
}
