//! Configuration for a harness run.
//!
//! Everything the driver and transport need up front: transport mode,
//! timeouts, the child environment overrides, and the fixed PTY geometry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for the initial prompt.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for each individual test case.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Fixed PTY columns. Large enough that readline never wraps a test form
/// and starts emitting VT escape sequences.
pub const PTY_COLS: u16 = 200;

/// Fixed PTY rows.
pub const PTY_ROWS: u16 = 100;

/// How the child's stdio is wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Child runs on the slave side of a pseudo-terminal; interactive
    /// readline works and input is echoed by the line discipline.
    #[default]
    Pty,
    /// Child runs on plain pipes with stderr merged into stdout; no echo.
    Pipe,
}

/// Configuration for a harness session.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Transport mode for the child's stdio.
    pub mode: TransportMode,

    /// Timeout for the initial prompt handshake.
    pub start_timeout: Duration,

    /// Timeout for each individual test case.
    pub test_timeout: Duration,

    /// Form to evaluate before the first test case, if any.
    pub pre_eval: Option<String>,

    /// Working directory to change to before spawning the child.
    pub rundir: Option<PathBuf>,

    /// Extra environment variables for the child.
    pub env: HashMap<String, String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            start_timeout: DEFAULT_START_TIMEOUT,
            test_timeout: DEFAULT_TEST_TIMEOUT,
            pre_eval: None,
            rundir: None,
            env: HashMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Create a configuration with the given transport mode.
    #[must_use]
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set the start timeout.
    #[must_use]
    pub const fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Set the per-test timeout.
    #[must_use]
    pub const fn test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Set the pre-eval form.
    #[must_use]
    pub fn pre_eval(mut self, form: impl Into<String>) -> Self {
        self.pre_eval = Some(form.into());
        self
    }

    /// Add an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The environment the child is spawned with: the parent environment
    /// plus overrides that keep line-editing libraries quiet, plus any
    /// user-supplied variables.
    #[must_use]
    pub fn effective_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = std::env::vars().collect();
        let mut set = |key: &str, value: &str| {
            if let Some(slot) = env.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value.to_string();
            } else {
                env.push((key.to_string(), value.to_string()));
            }
        };
        set("TERM", "dumb");
        set("INPUTRC", "/dev/null");
        set("PERL_RL", "false");
        for (key, value) in &self.env {
            set(key, value);
        }
        env
    }
}
