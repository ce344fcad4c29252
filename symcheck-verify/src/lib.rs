#![forbid(unsafe_code)]

pub mod catalog;
pub mod checks;
pub mod config;
pub mod error;
pub mod model;
pub mod scenario;
pub mod solver;
pub mod state;
pub mod store;
pub mod witness;

#[cfg(test)]
mod testing;

pub use catalog::{all_suites, suite, Suite, SUITE_NAMES};
pub use checks::{
    check_array_bounds, check_assertion, check_buffer_overflow, check_dead_code,
    check_division_by_zero, check_double_free, check_exponential_growth, check_infinite_recursion,
    check_missing_base_case, check_null_pointer, check_stack_overflow, check_use_after_free, Check,
    RecursionSite,
};
pub use config::{find_config, VerifierConfig, CONFIG_FILE_NAME};
pub use error::{OracleError, ScopeError, VerifyError};
pub use model::{Model, Value, Verdict};
pub use scenario::{
    run_scenario, run_suite, run_suite_parallel, SampleOutcome, SampleReport, Scenario,
    ScenarioReport, Step, StepReport,
};
pub use solver::{NoZ3Oracle, Oracle, SmtProfile};
#[cfg(feature = "z3")]
pub use solver::z3_oracle::Z3Oracle;
pub use state::{
    exp2, AllocationTable, ArrayBounds, ArrayTraversal, EvenOdd, Factorial, Fibonacci,
    RecursionPattern, RecursionProfile, SymbolicState, TreeTraversal, MAX_UNROLL_BOUND,
};
pub use store::ConstraintStore;
pub use witness::{BugKind, CheckOutcome, CheckReport, Witness};
