//! The declarative test-file mini-language.
//!
//! One line is one directive:
//!
//! | Prefix      | Meaning                                             |
//! |-------------|-----------------------------------------------------|
//! | (blank)     | ignored                                             |
//! | `;;;`       | pure comment, ignored                               |
//! | `;; text`   | announcement, surfaced but not part of any case     |
//! | `; text`    | one line of expected output, accumulated            |
//! | `;=>text`   | expected return value; ends the case                |
//! | anything    | a form to send (starts a new case), or ends the     |
//! |             | prior case with a wildcard return                   |
//!
//! The parser consumes lines progressively and yields one directive at a
//! time, tracking a running line counter for diagnostics.

use crate::error::{HarnessError, Result};

/// Canonical line separator used for expected output accumulation; both
/// transport modes are normalized to it.
pub const LINE_SEP: &str = "\r\n";

/// What a test case demands of the value printed after its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// The return value must print exactly this text.
    Value(String),
    /// Any return value is acceptable, provided a prompt follows.
    Any,
}

impl Expected {
    /// Check if this is the wildcard.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

/// One executable test case, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// The literal input line to send to the REPL.
    pub form: String,
    /// Concatenated expected intermediate output lines, each terminated
    /// with [`LINE_SEP`].
    pub output: String,
    /// The expected return value.
    pub ret: Expected,
    /// Source line number of the last line belonging to this case.
    pub line: usize,
}

/// A parsed directive: either something to run or something to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// An announcement line's text, to be surfaced to the operator.
    Announce(String),
    /// A complete test case.
    Case(TestCase),
}

/// Progressive parser over the raw test-file lines.
///
/// Not restartable: each [`next`](Self::next) call advances the cursor.
#[derive(Debug)]
pub struct TestFileParser {
    lines: Vec<String>,
    cursor: usize,
    /// Running diagnostic line counter (1-based once a line is consumed).
    line: usize,
}

impl TestFileParser {
    /// Parse the given raw file content.
    #[must_use]
    pub fn new(content: &str) -> Self {
        Self {
            lines: content.split('\n').map(str::to_string).collect(),
            cursor: 0,
            line: 0,
        }
    }

    /// The current diagnostic line number.
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    /// Yield the next directive, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// A bare `;` comment outside an expected-output position is malformed;
    /// parsing halts with the offending line number.
    pub fn next(&mut self) -> Result<Option<Directive>> {
        while let Some(line) = self.take_line() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with(";;;") {
                continue;
            }
            if line.starts_with(";;") {
                return Ok(Some(Directive::Announce(
                    line.get(3..).unwrap_or("").to_string(),
                )));
            }
            if line.starts_with(';') {
                return Err(HarnessError::MalformedLine {
                    line: self.line,
                    text: line,
                });
            }
            return Ok(Some(Directive::Case(self.finish_case(line))));
        }
        Ok(None)
    }

    /// Collect the expected-output and return lines that belong to the
    /// form just consumed.
    fn finish_case(&mut self, form: String) -> TestCase {
        let mut output = String::new();
        let ret;

        loop {
            let Some(next) = self.peek_line() else {
                // File ended right after the form; accept whatever comes
                // back as long as the REPL prompts again.
                ret = Expected::Any;
                break;
            };
            if let Some(text) = next.strip_prefix(";=>") {
                ret = Expected::Value(expand_escapes(text));
                self.take_line();
                break;
            }
            if let Some(text) = next.strip_prefix("; ") {
                output.push_str(text);
                output.push_str(LINE_SEP);
                self.take_line();
                continue;
            }
            // Any other line belongs to the next case; leave it unconsumed.
            ret = Expected::Any;
            break;
        }

        TestCase {
            form,
            output,
            ret,
            line: self.line,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let line = self.lines.get(self.cursor).cloned()?;
        self.cursor += 1;
        self.line += 1;
        Some(line)
    }

    fn peek_line(&self) -> Option<&str> {
        self.lines.get(self.cursor).map(String::as_str)
    }
}

/// Expand the two-character escapes `\r` and `\n` in a return-value line to
/// the corresponding control characters. Applied exactly once, at parse
/// time.
fn expand_escapes(text: &str) -> String {
    text.replace("\\r", "\r").replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cases(content: &str) -> Vec<TestCase> {
        let mut parser = TestFileParser::new(content);
        let mut out = Vec::new();
        while let Some(directive) = parser.next().expect("parse failed") {
            if let Directive::Case(case) = directive {
                out.push(case);
            }
        }
        out
    }

    #[test]
    fn simple_case() {
        let parsed = cases("(+ 1 2)\n;=>3\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].form, "(+ 1 2)");
        assert_eq!(parsed[0].output, "");
        assert_eq!(parsed[0].ret, Expected::Value("3".to_string()));
        assert_eq!(parsed[0].line, 2);
    }

    #[test]
    fn output_lines_accumulate_with_crlf() {
        let parsed = cases("(prn 1 2)\n; 1 2\n; more\n;=>nil\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].output, "1 2\r\nmore\r\n");
        assert_eq!(parsed[0].ret, Expected::Value("nil".to_string()));
    }

    #[test]
    fn blank_lines_and_pure_comments_are_skipped() {
        let parsed = cases(";;; header comment\n\n   \n(+ 1 2)\n;=>3\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].line, 5);
    }

    #[test]
    fn announcement_is_surfaced_not_a_case() {
        let mut parser = TestFileParser::new(";; Testing arithmetic\n(+ 1 2)\n;=>3\n");
        let first = parser.next().unwrap().unwrap();
        assert_eq!(
            first,
            Directive::Announce("Testing arithmetic".to_string())
        );
        let second = parser.next().unwrap().unwrap();
        assert!(matches!(second, Directive::Case(_)));
    }

    #[test]
    fn form_followed_by_form_gets_wildcard_return() {
        let parsed = cases("(def! x 1)\n(+ x 1)\n;=>2\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].ret, Expected::Any);
        assert!(parsed[0].ret.is_any());
        assert_eq!(parsed[1].ret, Expected::Value("2".to_string()));
    }

    #[test]
    fn trailing_form_without_return_gets_wildcard() {
        let parsed = cases("(+ 1 2)\n;=>3\n(prn \"bye\")");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].ret, Expected::Any);
    }

    #[test]
    fn case_count_matches_form_lines() {
        let content = ";; suite\n(a)\n;=>1\n(b)\n; out\n;=>2\n(c)\n(d)\n;=>4\n";
        assert_eq!(cases(content).len(), 4);
    }

    #[test]
    fn escapes_expand_exactly_once() {
        let parsed = cases("(pr-str \"a\")\n;=>line1\\nline2\\rend\n");
        assert_eq!(
            parsed[0].ret,
            Expected::Value("line1\nline2\rend".to_string())
        );

        // A double backslash stays literal-backslash-then-control after the
        // single pass.
        let parsed = cases("(x)\n;=>a\\\\nb\n");
        assert_eq!(parsed[0].ret, Expected::Value("a\\\nb".to_string()));
    }

    #[test]
    fn bare_comment_is_a_parse_error_with_line_number() {
        let mut parser = TestFileParser::new("(+ 1 2)\n;=>3\n;stray\n(+ 2 2)\n");
        assert!(parser.next().unwrap().is_some());
        let err = parser.next().unwrap_err();
        match err {
            HarnessError::MalformedLine { line, text } => {
                assert_eq!(line, 3);
                assert_eq!(text, ";stray");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn announcement_with_no_text() {
        let mut parser = TestFileParser::new(";;\n");
        let directive = parser.next().unwrap().unwrap();
        assert_eq!(directive, Directive::Announce(String::new()));
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut parser = TestFileParser::new("");
        assert!(parser.next().unwrap().is_none());
    }

    #[test]
    fn line_counter_tracks_consumed_lines() {
        let mut parser = TestFileParser::new("\n;;; skip\n(+ 1 2)\n;=>3\n");
        let directive = parser.next().unwrap().unwrap();
        let Directive::Case(case) = directive else {
            panic!("expected a case");
        };
        assert_eq!(case.line, 4);
        assert_eq!(parser.line(), 4);
    }
}
