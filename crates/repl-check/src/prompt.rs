//! Prompt detection over the child's output stream.
//!
//! [`PromptReader`] accumulates bytes one at a time and races an ordered
//! [`PromptSet`] against the buffer after every append. Prompts are
//! end-of-stream markers with no terminator of their own, and candidate
//! prompts can share prefixes, so reading in larger batches risks consuming
//! past a prompt boundary and corrupting the next test's baseline; the
//! byte-at-a-time loop guarantees the earliest completed match wins.
//!
//! A missed deadline is a first-class outcome ([`ReadOutcome::Timeout`]),
//! not an error: the caller decides whether it aborts the run. The buffer
//! tail that was read but never matched carries over to the next call as
//! unread-ahead input, and is preserved for diagnostics on timeout.

use std::time::{Duration, Instant};

use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::{HarnessError, Result};

/// Upper bound on a single wait for readiness; the deadline is re-checked
/// between polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// An ordered list of prompt patterns raced against the buffer.
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    patterns: Vec<Regex>,
}

impl PromptSet {
    /// Build a set from literal prompt strings, in priority order.
    pub fn literals<I, S>(prompts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = prompts
            .into_iter()
            .map(|p| {
                Regex::new(&regex::escape(p.as_ref()))
                    .expect("escaped literal is a valid pattern")
            })
            .collect();
        Self { patterns }
    }

    /// Build a set from raw regex patterns, in priority order.
    pub fn patterns<I, S>(prompts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = prompts
            .into_iter()
            .map(|p| Regex::new(p.as_ref()).map_err(HarnessError::from))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Find the first satisfying match: patterns are tried in set order
    /// against the whole buffer, and the first one that matches wins.
    fn find_match(&self, buffer: &[u8]) -> Option<PromptMatch> {
        self.patterns.iter().find_map(|pattern| {
            pattern.find(buffer).map(|m| PromptMatch {
                start: m.start(),
                end: m.end(),
                prompt: pattern.as_str().to_string(),
            })
        })
    }

    /// Human-readable pattern list for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        let sources: Vec<String> = self
            .patterns
            .iter()
            .map(|p| format!("{:?}", p.as_str()))
            .collect();
        sources.join(", ")
    }
}

/// Location of a matched prompt within the buffer.
#[derive(Debug, Clone)]
struct PromptMatch {
    start: usize,
    end: usize,
    prompt: String,
}

/// Outcome of a [`PromptReader::read_to_prompt`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A prompt matched; this is everything that preceded it. The prompt's
    /// own text is consumed but not included.
    Matched(String),
    /// The deadline passed with no prompt. The buffer is left intact.
    Timeout,
}

impl ReadOutcome {
    /// The matched prefix, if any.
    #[must_use]
    pub fn into_matched(self) -> Option<String> {
        match self {
            Self::Matched(prefix) => Some(prefix),
            Self::Timeout => None,
        }
    }
}

/// Buffered prompt-seeking reader over the child's byte stream.
///
/// Owns all read-side session state: the accumulation buffer and the
/// identity of the last prompt that matched.
#[derive(Debug)]
pub struct PromptReader {
    buffer: Vec<u8>,
    last_prompt: Option<String>,
    lf_to_crlf: bool,
}

impl PromptReader {
    /// Create a reader. `lf_to_crlf` selects pipe-mode canonicalization of
    /// bare LF bytes to CR+LF as they are buffered.
    #[must_use]
    pub const fn new(lf_to_crlf: bool) -> Self {
        Self {
            buffer: Vec::new(),
            last_prompt: None,
            lf_to_crlf,
        }
    }

    /// The unconsumed buffer content, for diagnostics.
    #[must_use]
    pub fn buffer(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// The pattern that satisfied the most recent successful read.
    #[must_use]
    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    /// Read until one of `prompts` matches the buffer or `timeout` elapses.
    ///
    /// On a match, returns the buffer content preceding the match and
    /// consumes everything through the end of the matched prompt; any bytes
    /// after it stay buffered for the next call. On timeout the buffer is
    /// left untouched. A closed stream is a hard error: once the child is
    /// gone no prompt can ever arrive.
    pub async fn read_to_prompt<R>(
        &mut self,
        source: &mut R,
        prompts: &PromptSet,
        timeout: Duration,
    ) -> Result<ReadOutcome>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let deadline = Instant::now() + timeout;

        // The previous call may have left a complete prompt behind.
        if let Some(m) = prompts.find_match(&self.buffer) {
            return Ok(self.consume(m));
        }

        let mut byte = [0u8; 1];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                trace!(buffer = %self.buffer(), "prompt deadline reached");
                return Ok(ReadOutcome::Timeout);
            }

            let wait = remaining.min(POLL_INTERVAL);
            match tokio::time::timeout(wait, source.read(&mut byte)).await {
                Ok(Ok(0)) => {
                    return Err(HarnessError::process_exited(self.buffer()));
                }
                Ok(Ok(_)) => {
                    self.append(byte[0]);
                    if let Some(m) = prompts.find_match(&self.buffer) {
                        return Ok(self.consume(m));
                    }
                }
                Ok(Err(e)) => {
                    return Err(HarnessError::io_context("reading from child", e));
                }
                // Poll slice elapsed; loop re-checks the deadline.
                Err(_) => {}
            }
        }
    }

    /// Append one byte, canonicalizing line endings in pipe mode.
    fn append(&mut self, byte: u8) {
        if self.lf_to_crlf && byte == b'\n' {
            self.buffer.extend_from_slice(b"\r\n");
        } else {
            self.buffer.push(byte);
        }
    }

    /// Cut the matched region out of the buffer: return what preceded the
    /// prompt, drop the prompt text itself, keep the tail.
    fn consume(&mut self, m: PromptMatch) -> ReadOutcome {
        let prefix = String::from_utf8_lossy(&self.buffer[..m.start]).into_owned();
        self.buffer.drain(..m.end);
        trace!(prompt = %m.prompt, prefix = %prefix, "prompt matched");
        self.last_prompt = Some(m.prompt);
        ReadOutcome::Matched(prefix)
    }
}
