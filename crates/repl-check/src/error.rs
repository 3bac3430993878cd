//! Error types for repl-check.
//!
//! Errors carry enough context to diagnose a desynchronized session:
//! timeout and EOF variants include the unconsumed buffer content at the
//! moment the harness gave up, and parse errors name the offending
//! test-file line.

use std::time::Duration;

use thiserror::Error;

/// Maximum length of buffer content to display in error messages.
const MAX_BUFFER_DISPLAY: usize = 500;

/// Format buffer content for display, truncating long buffers to a tail.
fn format_buffer_snippet(buffer: &str) -> String {
    if buffer.is_empty() {
        return "(empty buffer)".to_string();
    }

    if buffer.len() <= MAX_BUFFER_DISPLAY {
        return format!("buffer ({} bytes): {buffer:?}", buffer.len());
    }

    let tail_start = buffer.len() - MAX_BUFFER_DISPLAY;
    // Avoid slicing inside a UTF-8 sequence.
    let tail_start = (tail_start..buffer.len())
        .find(|&i| buffer.is_char_boundary(i))
        .unwrap_or(buffer.len());
    format!(
        "buffer ({} bytes, tail shown): ...{:?}",
        buffer.len(),
        &buffer[tail_start..]
    )
}

/// Format a prompt-timeout error message.
fn format_timeout_error(duration: Duration, prompts: &str, buffer: &str) -> String {
    format!(
        "no prompt within {duration:?}\n\
         Prompts : {prompts}\n\
         Got     : {}",
        format_buffer_snippet(buffer)
    )
}

/// The error type for harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Failed to spawn or configure the child process.
    #[error("failed to spawn child process: {reason}")]
    Spawn {
        /// What went wrong during spawn.
        reason: String,
    },

    /// An I/O error occurred with additional context.
    #[error("{context}: {source}")]
    Io {
        /// What operation was being performed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No recognized prompt arrived before the deadline.
    ///
    /// After an unmatched partial read the buffer position relative to the
    /// child's output stream cannot be trusted, so this aborts the run.
    #[error("{}", format_timeout_error(*duration, prompts, buffer))]
    PromptTimeout {
        /// The timeout window that elapsed.
        duration: Duration,
        /// The prompt patterns that were raced.
        prompts: String,
        /// Unconsumed buffer content at the time of the timeout.
        buffer: String,
    },

    /// The child process closed its output stream.
    #[error("child process exited unexpectedly\n{}", format_buffer_snippet(buffer))]
    ProcessExited {
        /// Unconsumed buffer content when the stream closed.
        buffer: String,
    },

    /// A test-file line that fits no directive class.
    #[error("test data error at line {line}:\n{text}")]
    MalformedLine {
        /// Source line number (1-based) of the offending line.
        line: usize,
        /// The offending line text.
        text: String,
    },

    /// Invalid prompt pattern.
    #[error("invalid prompt pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Create a spawn error.
    pub fn spawn(reason: impl Into<String>) -> Self {
        Self::Spawn {
            reason: reason.into(),
        }
    }

    /// Create an I/O error with context.
    pub fn io_context(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a prompt-timeout error.
    pub fn prompt_timeout(
        duration: Duration,
        prompts: impl Into<String>,
        buffer: impl Into<String>,
    ) -> Self {
        Self::PromptTimeout {
            duration,
            prompts: prompts.into(),
            buffer: buffer.into(),
        }
    }

    /// Create a process-exited error.
    pub fn process_exited(buffer: impl Into<String>) -> Self {
        Self::ProcessExited {
            buffer: buffer.into(),
        }
    }

    /// Check if this is a prompt timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::PromptTimeout { .. })
    }

    /// Get the buffer contents if this error carries them.
    #[must_use]
    pub fn buffer(&self) -> Option<&str> {
        match self {
            Self::PromptTimeout { buffer, .. } | Self::ProcessExited { buffer } => Some(buffer),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_includes_prompts_and_buffer() {
        let err = HarnessError::prompt_timeout(
            Duration::from_secs(10),
            "\"user> \", \"mal-user> \"",
            "garbage banner",
        );
        let msg = err.to_string();
        assert!(msg.contains("10s"));
        assert!(msg.contains("user> "));
        assert!(msg.contains("garbage banner"));
    }

    #[test]
    fn timeout_display_empty_buffer() {
        let err = HarnessError::prompt_timeout(Duration::from_secs(1), "\"user> \"", "");
        assert!(err.to_string().contains("(empty buffer)"));
    }

    #[test]
    fn large_buffer_is_truncated_to_tail() {
        let big = "x".repeat(2000) + "the-end";
        let err = HarnessError::process_exited(big);
        let msg = err.to_string();
        assert!(msg.contains("tail shown"));
        assert!(msg.contains("the-end"));
        assert!(!msg.contains(&"x".repeat(1000)));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = HarnessError::MalformedLine {
            line: 12,
            text: ";bad comment".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 12"));
        assert!(msg.contains(";bad comment"));
    }

    #[test]
    fn buffer_accessor() {
        let err = HarnessError::process_exited("tail");
        assert_eq!(err.buffer(), Some("tail"));

        let io = HarnessError::io_context("reading", std::io::Error::other("boom"));
        assert!(io.buffer().is_none());
        assert!(!io.is_timeout());
    }
}
