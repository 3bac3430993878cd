//! Exit-code tests for the repl-check binary.

#![cfg(unix)]

use std::io::Write;
use std::process::Command;

const ECHOING_REPL: &str = r#"
printf 'user> '
while IFS= read -r line; do
    printf '%s\n' "$line"
    case "$line" in
        '(+ 1 2)') printf '3\n' ;;
        *) printf 'nil\n' ;;
    esac
    printf 'user> '
done
"#;

fn test_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create test file");
    file.write_all(content.as_bytes()).expect("write test file");
    file
}

fn run_harness(content: &str, script: &str, extra: &[&str]) -> i32 {
    let file = test_file(content);
    let status = Command::new(env!("CARGO_BIN_EXE_repl-check"))
        .arg("--no-pty")
        .args(extra)
        .arg(file.path())
        .args(["--", "/bin/sh", "-c", script])
        .status()
        .expect("run repl-check");
    status.code().expect("exit code")
}

#[test]
fn exits_zero_when_all_cases_pass() {
    assert_eq!(run_harness("(+ 1 2)\n;=>3\n", ECHOING_REPL, &[]), 0);
}

#[test]
fn exits_two_on_comparison_failure() {
    assert_eq!(run_harness("(+ 1 2)\n;=>4\n", ECHOING_REPL, &[]), 2);
}

#[test]
fn exits_one_on_startup_timeout() {
    let code = run_harness("(+ 1 2)\n;=>3\n", "sleep 5", &["--start-timeout", "1"]);
    assert_eq!(code, 1);
}

#[test]
fn exits_one_on_malformed_test_file() {
    assert_eq!(run_harness(";bad directive\n", ECHOING_REPL, &[]), 1);
}

#[test]
fn pre_eval_runs_before_the_first_case() {
    let code = run_harness(
        "(+ 1 2)\n;=>3\n",
        ECHOING_REPL,
        &["--pre-eval", "(def! x 1)"],
    );
    assert_eq!(code, 0);
}
