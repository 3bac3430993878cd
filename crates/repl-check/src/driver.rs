//! The send/compare session driver.
//!
//! Strictly sequential: one test case is in flight at a time, and a new
//! form is never sent before the previous one is fully resolved. The
//! driver owns the startup handshake, the optional pre-eval form, the
//! per-case comparison, and the progress reporting on stdout.

use std::io::Write as _;
use std::time::Duration;

use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::prompt::{PromptReader, PromptSet, ReadOutcome};
use crate::testfile::{Directive, Expected, LINE_SEP, TestCase, TestFileParser};
use crate::transport::Transport;

/// Prompts recognized during the startup handshake. Two variants, to
/// accommodate implementations with different top-level names.
pub const START_PROMPTS: [&str; 2] = ["user> ", "mal-user> "];

/// Prompts recognized after a form has been sent. Anchored to a line
/// break so that prompt-like text inside a test's own output cannot
/// satisfy the match.
pub const REPLY_PROMPTS: [&str; 4] = [
    "\r\nuser> ",
    "\nuser> ",
    "\r\nmal-user> ",
    "\nmal-user> ",
];

/// Aggregate pass/fail counts for a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Number of cases whose response matched.
    pub passed: usize,
    /// Number of cases whose response did not match.
    pub failed: usize,
}

impl ExecutionResult {
    /// Whether every case passed.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// The two responses accepted as success for a non-wildcard case: the
/// expected text as written, and a variant with the form echoed a second
/// time. Some terminal stacks occasionally echo the input line twice, and
/// both shapes are equally valid.
#[must_use]
pub fn accepted_responses(form: &str, output: &str, ret: &str) -> [String; 2] {
    [
        format!("{form}{LINE_SEP}{output}{ret}"),
        format!("{form}{LINE_SEP}{form}{LINE_SEP}{output}{ret}"),
    ]
}

/// Drives one child REPL session through a parsed test file.
#[derive(Debug)]
pub struct SessionDriver {
    transport: Transport,
    reader: PromptReader,
    start_prompts: PromptSet,
    reply_prompts: PromptSet,
    start_timeout: Duration,
    test_timeout: Duration,
    pre_eval: Option<String>,
}

impl SessionDriver {
    /// Wrap a spawned transport with the session protocol state.
    #[must_use]
    pub fn new(transport: Transport, config: &HarnessConfig) -> Self {
        let reader = PromptReader::new(transport.lf_to_crlf());
        Self {
            transport,
            reader,
            start_prompts: PromptSet::literals(START_PROMPTS),
            reply_prompts: PromptSet::literals(REPLY_PROMPTS),
            start_timeout: config.start_timeout,
            test_timeout: config.test_timeout,
            pre_eval: config.pre_eval.clone(),
        }
    }

    /// Run the whole session: handshake, pre-eval, every test case, and
    /// the final summary line.
    ///
    /// Only a comparison mismatch is recoverable per-case. A timeout after
    /// a form has been sent, or an unexpected child exit, aborts the run:
    /// after a partial unmatched read the buffer position relative to the
    /// child's output stream cannot be trusted.
    pub async fn run(&mut self, parser: &mut TestFileParser) -> Result<ExecutionResult> {
        self.await_startup().await?;

        if let Some(form) = self.pre_eval.take() {
            println!("RUNNING pre-eval: {form}");
            self.transport.write_line(&form).await?;
            self.await_reply().await?;
        }

        let mut result = ExecutionResult::default();
        while let Some(directive) = parser.next()? {
            match directive {
                Directive::Announce(text) => println!("{text}"),
                Directive::Case(case) => {
                    if self.run_case(&case).await? {
                        result.passed += 1;
                    } else {
                        result.failed += 1;
                    }
                }
            }
        }

        if result.failed > 0 {
            println!("FAILURES: {}", result.failed);
        }
        self.transport.terminate();
        Ok(result)
    }

    /// Wait for the initial prompt and surface any banner that preceded it.
    async fn await_startup(&mut self) -> Result<()> {
        let prompts = self.start_prompts.clone();
        let outcome = self
            .reader
            .read_to_prompt(self.transport.reader_mut(), &prompts, self.start_timeout)
            .await?;
        match outcome {
            ReadOutcome::Matched(header) => {
                debug!(prompt = ?self.reader.last_prompt(), "startup handshake complete");
                if !header.is_empty() {
                    println!("Started with:\n{header}");
                }
                Ok(())
            }
            ReadOutcome::Timeout => Err(HarnessError::prompt_timeout(
                self.start_timeout,
                prompts.describe(),
                self.reader.buffer(),
            )),
        }
    }

    /// Wait for the next post-form prompt, converting a timeout into the
    /// fatal error it is at this stage.
    async fn await_reply(&mut self) -> Result<String> {
        let prompts = self.reply_prompts.clone();
        let outcome = self
            .reader
            .read_to_prompt(self.transport.reader_mut(), &prompts, self.test_timeout)
            .await?;
        match outcome {
            ReadOutcome::Matched(response) => Ok(response),
            ReadOutcome::Timeout => Err(HarnessError::prompt_timeout(
                self.test_timeout,
                prompts.describe(),
                self.reader.buffer(),
            )),
        }
    }

    /// Send one form and judge the response. Returns whether the case
    /// passed; a mismatch is reported but does not abort the run.
    async fn run_case(&mut self, case: &TestCase) -> Result<bool> {
        let ret_display = match &case.ret {
            Expected::Value(value) => format!("{value:?}"),
            Expected::Any => "\"*\"".to_string(),
        };
        print!("TEST: {} -> [{:?},{ret_display}]", case.form, case.output);
        let _ = std::io::stdout().flush();

        self.transport.write_line(&case.form).await?;
        let response = self.await_reply().await?;

        if let Expected::Value(ret) = &case.ret {
            let expected = accepted_responses(&case.form, &case.output, ret);
            if !expected.contains(&response) {
                println!(" -> FAIL (line {}):", case.line);
                println!("    Expected : {expected:?}");
                println!("    Got      : {response:?}");
                return Ok(false);
            }
        }
        println!(" -> SUCCESS");
        Ok(true)
    }
}
