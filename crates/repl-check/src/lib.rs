//! repl-check: conformance test harness for interactive REPLs
//!
//! Drives a child read-eval-print loop through a declarative test file:
//! spawn the child on a pseudo-terminal (or plain pipes), wait for its
//! prompt, send one form at a time, and compare everything printed before
//! the next prompt against the file's expectations.
//!
//! # Features
//!
//! - **Byte-at-a-time prompt detection** that races several prompt
//!   variants against the output stream under a deadline
//! - **Two transports**: pseudo-terminal for `readline`-style children,
//!   pipes for plain ones, with line endings canonicalized to CR+LF
//! - **A line-oriented test-file mini-language** with expected output,
//!   expected return values, and wildcard cases
//! - **Deterministic exit codes**: success, comparison failures, or a
//!   protocol-level failure that aborted the run
//!
//! # Example
//!
//! ```ignore
//! use repl_check::{HarnessConfig, SessionDriver, TestFileParser, Transport};
//!
//! # async fn run() -> repl_check::Result<()> {
//! let config = HarnessConfig::default();
//! let transport = Transport::spawn(&["./my-repl".to_string()], &config)?;
//! let mut driver = SessionDriver::new(transport, &config);
//! let mut parser = TestFileParser::new("(+ 1 2)\n;=>3\n");
//! let result = driver.run(&mut parser).await?;
//! assert!(result.all_passed());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod prompt;
pub mod testfile;
pub mod transport;

pub use config::{HarnessConfig, TransportMode};
pub use driver::{ExecutionResult, SessionDriver};
pub use error::{HarnessError, Result};
pub use prompt::{PromptReader, PromptSet, ReadOutcome};
pub use testfile::{Directive, Expected, TestCase, TestFileParser};
pub use transport::Transport;
