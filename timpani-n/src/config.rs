//! CLI/fixture front-end: assembles a [`RunConfig`] from process arguments,
//! an optional YAML fixture, or — failing both — a sequence of interactive
//! stdin prompts.

use std::io::BufRead;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::Policy;

/// Fully assembled, validated input for one test run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub algorithm: Policy,
    pub runtime: Duration,
    /// `(compute_ms, period_ms)` pairs, in the order they'll be assigned
    /// task ids 0..N.
    pub tasks: Vec<(u64, u64)>,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks);
        }
        for (index, &(compute_ms, period_ms)) in self.tasks.iter().enumerate() {
            if compute_ms > period_ms {
                return Err(ConfigError::ComputeExceedsPeriod {
                    index,
                    compute_ms,
                    period_ms,
                });
            }
        }
        Ok(())
    }
}

/// Real-time scheduling testbed: drives periodic tasks on a preemptive
/// priority-based OS scheduler under a chosen policy and reports deadline
/// hits/misses and overhead.
#[derive(Debug, Parser)]
#[command(name = "timpani-n", version, about)]
pub struct Cli {
    /// Scheduling policy: rma, edf, or sct.
    #[arg(long)]
    pub algorithm: Option<String>,

    /// Test runtime in seconds.
    #[arg(long)]
    pub runtime: Option<u64>,

    /// YAML fixture file (runtime, algorithm, tasks). Overrides interactive
    /// prompts entirely when given.
    #[arg(long)]
    pub fixture: Option<String>,

    /// Tracing verbosity (error, warn, info, debug, trace). Overrides
    /// `RUST_LOG` when set.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Suppress tracing output; the stdout protocol lines are unaffected.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Debug, Deserialize)]
struct FixtureTask {
    compute_ms: u64,
    period_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    runtime: u64,
    algorithm: String,
    tasks: Vec<FixtureTask>,
}

/// Build a [`RunConfig`] from the CLI. Precedence: `--fixture` file, then
/// `--algorithm`/`--runtime` flags layered over interactive stdin prompts
/// for whatever those flags didn't supply.
pub fn load(cli: &Cli) -> Result<RunConfig, ConfigError> {
    if let Some(path) = &cli.fixture {
        return load_fixture(path);
    }
    load_interactive(cli)
}

fn load_fixture(path: &str) -> Result<RunConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FixtureIo {
        path: path.to_string(),
        source,
    })?;
    let fixture: Fixture =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::FixtureParse {
            path: path.to_string(),
            source,
        })?;
    let algorithm = Policy::from_name(&fixture.algorithm)
        .ok_or_else(|| ConfigError::UnknownAlgorithm(fixture.algorithm.clone()))?;
    let tasks = fixture
        .tasks
        .iter()
        .map(|t| (t.compute_ms, t.period_ms))
        .collect();
    let config = RunConfig {
        algorithm,
        runtime: Duration::from_secs(fixture.runtime),
        tasks,
    };
    config.validate()?;
    Ok(config)
}

/// Falls back to an interactive prompt sequence whenever `--algorithm`/
/// `--runtime` aren't both given on the command line.
fn load_interactive(cli: &Cli) -> Result<RunConfig, ConfigError> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    let algorithm = match &cli.algorithm {
        Some(name) => {
            Policy::from_name(name).ok_or_else(|| ConfigError::UnknownAlgorithm(name.clone()))?
        }
        None => {
            print!("Algorithm choice: ");
            flush_stdout();
            let v: i64 = read_int(&mut lines)?;
            Policy::from_index(v).ok_or_else(|| ConfigError::UnknownAlgorithm(v.to_string()))?
        }
    };

    let runtime = match cli.runtime {
        Some(secs) => Duration::from_secs(secs),
        None => {
            print!("Test runtime: ");
            flush_stdout();
            Duration::from_secs(read_int::<u64>(&mut lines)?)
        }
    };

    print!("Number of tasks: ");
    flush_stdout();
    let n: usize = read_int(&mut lines)?;

    println!("Task data ([c,p] pairs):");
    let mut tasks = Vec::with_capacity(n);
    for _ in 0..n {
        let line = next_line(&mut lines)?;
        let mut parts = line.split_whitespace();
        let c: u64 = parts
            .next()
            .unwrap_or("")
            .parse()
            .map_err(ConfigError::InvalidNumber)?;
        let p: u64 = parts
            .next()
            .unwrap_or("")
            .parse()
            .map_err(ConfigError::InvalidNumber)?;
        tasks.push((c, p));
    }

    let config = RunConfig {
        algorithm,
        runtime,
        tasks,
    };
    config.validate()?;
    Ok(config)
}

fn flush_stdout() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

fn next_line(lines: &mut std::io::Lines<std::io::StdinLock<'_>>) -> Result<String, ConfigError> {
    lines
        .next()
        .transpose()
        .map_err(ConfigError::StdinIo)?
        .ok_or_else(|| ConfigError::StdinIo(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)))
}

fn read_int<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    lines: &mut std::io::Lines<std::io::StdinLock<'_>>,
) -> Result<T, ConfigError> {
    next_line(lines)?
        .trim()
        .parse()
        .map_err(ConfigError::InvalidNumber)
}
