#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use symcheck_verify::{
    all_suites, run_suite_parallel, suite, Oracle, ScenarioReport, SmtProfile, Suite,
    VerifierConfig,
};

mod report;

/// Solver translation recurses on term nesting, which grows with `unroll_bound`.
const WORKER_STACK_BYTES: usize = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "symcheck", version, about = "Symbolic bug-pattern verifier")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SmtProfileArg {
    Fast,
    Ci,
    Thorough,
}

impl From<SmtProfileArg> for SmtProfile {
    fn from(v: SmtProfileArg) -> Self {
        match v {
            SmtProfileArg::Fast => SmtProfile::Fast,
            SmtProfileArg::Ci => SmtProfile::Ci,
            SmtProfileArg::Thorough => SmtProfile::Thorough,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the built-in suites and their scenarios.
    List,

    /// Run suites (all of them when none are named).
    Run {
        suites: Vec<String>,

        /// Solver timeout profile. Overrides `symcheck.toml` and SYMCHECK_PROFILE.
        #[arg(long, value_enum)]
        profile: Option<SmtProfileArg>,

        /// Explicit config file instead of the nearest `symcheck.toml`.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Emit a JSON report on stdout.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Worker threads (default: one per core).
        #[arg(long)]
        jobs: Option<usize>,
    },
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "z3")]
fn make_oracle(cfg: &VerifierConfig) -> Box<dyn Oracle> {
    Box::new(cfg.z3_oracle())
}

#[cfg(not(feature = "z3"))]
fn make_oracle(_cfg: &VerifierConfig) -> Box<dyn Oracle> {
    Box::new(symcheck_verify::NoZ3Oracle::new())
}

fn resolve_config(
    explicit: Option<PathBuf>,
    profile: Option<SmtProfileArg>,
) -> miette::Result<(VerifierConfig, Option<PathBuf>)> {
    let cwd = std::env::current_dir().into_diagnostic()?;
    let (cfg, used) = VerifierConfig::discover(explicit.as_deref(), &cwd)?;
    let mut cfg = cfg.with_process_env()?;
    if let Some(p) = profile {
        cfg.profile = p.into();
    }
    tracing::debug!(
        profile = cfg.profile.name(),
        timeout_ms = cfg.timeout_ms(),
        config = ?used,
        "resolved configuration"
    );
    Ok((cfg, used))
}

fn run(
    names: Vec<String>,
    profile: Option<SmtProfileArg>,
    config: Option<PathBuf>,
    json: bool,
    jobs: Option<usize>,
) -> miette::Result<()> {
    let (cfg, used) = resolve_config(config, profile)?;

    let suites = if names.is_empty() {
        all_suites(&cfg)?
    } else {
        names
            .iter()
            .map(|n| suite(n, &cfg))
            .collect::<Result<Vec<_>, _>>()?
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.unwrap_or(0))
        .stack_size(WORKER_STACK_BYTES)
        .build()
        .into_diagnostic()?;

    let results = pool.install(|| {
        suites
            .into_iter()
            .map(|s| {
                let reports = run_suite_parallel(&s.scenarios, || make_oracle(&cfg))?;
                Ok((s, reports))
            })
            .collect::<Result<Vec<(Suite, Vec<ScenarioReport>)>, symcheck_verify::VerifyError>>()
    })?;

    if json {
        let report = report::build_report(&cfg, used.map(|p| p.display().to_string()), &results);
        let text = serde_json::to_string_pretty(&report).into_diagnostic()?;
        println!("{text}");
    } else {
        print!("{}", report::render_text(&results));
    }
    Ok(())
}

fn list() -> miette::Result<()> {
    for s in all_suites(&VerifierConfig::default())? {
        println!("{}: {}", s.name, s.description);
        for sc in &s.scenarios {
            println!("  {:<24} {}", sc.name, sc.description);
        }
    }
    Ok(())
}

fn main() -> miette::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::List => list(),
        Cmd::Run {
            suites,
            profile,
            config,
            json,
            jobs,
        } => run(suites, profile, config, json, jobs),
    }
}
