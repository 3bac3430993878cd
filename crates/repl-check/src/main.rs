//! repl-check: run a declarative test file against an interactive REPL.
//!
//! Usage:
//!   repl-check [OPTIONS] TEST_FILE -- COMMAND [ARGS...]
//!
//! Examples:
//!   repl-check tests/step1.mal ./my-repl
//!   repl-check --no-pty tests/step1.mal -- ./my-repl --quiet
//!   repl-check --test-timeout 60 tests/slow.mal ./my-repl

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use repl_check::{
    ExecutionResult, HarnessConfig, HarnessError, SessionDriver, TestFileParser, Transport,
    TransportMode,
};

/// Run a test file against an interactive REPL implementation.
#[derive(Parser, Debug)]
#[command(name = "repl-check")]
#[command(version, about, long_about = None)]
struct Args {
    /// Change to this directory before spawning the REPL.
    #[arg(long)]
    rundir: Option<PathBuf>,

    /// Timeout in seconds for the initial prompt.
    #[arg(long, default_value = "10", value_name = "SECONDS")]
    start_timeout: u64,

    /// Timeout in seconds for each individual test case.
    #[arg(long, default_value = "20", value_name = "SECONDS")]
    test_timeout: u64,

    /// Form to evaluate before running the tests.
    #[arg(long, value_name = "FORM")]
    pre_eval: Option<String>,

    /// Use plain pipes instead of a pseudo-terminal.
    #[arg(long)]
    no_pty: bool,

    /// The test file to run.
    #[arg(value_name = "TEST_FILE")]
    test_file: PathBuf,

    /// REPL command line. Use '--' before a command with dashed options.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

impl Args {
    fn config(&self) -> HarnessConfig {
        let mode = if self.no_pty {
            TransportMode::Pipe
        } else {
            TransportMode::Pty
        };
        let mut config = HarnessConfig::new(mode)
            .start_timeout(Duration::from_secs(self.start_timeout))
            .test_timeout(Duration::from_secs(self.test_timeout));
        config.rundir.clone_from(&self.rundir);
        config.pre_eval.clone_from(&self.pre_eval);
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(result) if result.all_passed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<ExecutionResult, HarnessError> {
    // Read the file before any directory change takes effect, so a path
    // relative to the invocation directory keeps working with --rundir.
    let content = std::fs::read_to_string(&args.test_file).map_err(|e| {
        HarnessError::io_context(format!("reading {}", args.test_file.display()), e)
    })?;
    let config = args.config();

    // The protocol is strictly sequential; one thread is all it needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| HarnessError::io_context("starting async runtime", e))?;

    runtime.block_on(async {
        let transport = Transport::spawn(&args.command, &config)?;
        let mut driver = SessionDriver::new(transport, &config);
        let mut parser = TestFileParser::new(&content);
        driver.run(&mut parser).await
    })
}
