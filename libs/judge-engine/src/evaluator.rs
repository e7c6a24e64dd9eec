/// Test Evaluator - Language-Agnostic Judging
///
/// Knows nothing about sandboxes or languages. Turns raw exec outputs into
/// `TestCaseResult`s and aggregates them into a `CodeExecutionResult`.
///
/// **Comparison Rules (all languages):**
/// - Trim leading and trailing whitespace on both sides
/// - Everything else is exact: internal whitespace, case, numeric formatting
/// - Output cut at the capture cap never passes and is reported as truncated

use crate::sandbox::ExecOutput;
use judge_common::config::VerdictPolicy;
use judge_common::types::{CodeExecutionResult, SubmissionStatus, TestCase, TestCaseResult};

/// Exit code reported when compilation hits its time limit
const COMPILE_TIMEOUT_EXIT_CODE: i64 = 124;

fn normalize_output(output: &str) -> &str {
    output.trim()
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

/// Judge one finished test run. `passed` depends on stdout only.
pub fn evaluate_test(
    index: usize,
    test_case: &TestCase,
    output: &ExecOutput,
    execution_time_ms: u64,
) -> TestCaseResult {
    TestCaseResult {
        index,
        input: test_case.input.clone(),
        output: output.stdout.clone(),
        expected: test_case.expected_output.clone(),
        passed: !output.truncated && outputs_match(&output.stdout, &test_case.expected_output),
        stderr: output.stderr.clone(),
        exit_code: Some(output.exit_code),
        execution_time_ms,
        timed_out: false,
        output_truncated: output.truncated,
    }
}

/// Result entry for a test whose run was cut off by the time limit
pub fn timed_out_test(index: usize, test_case: &TestCase, execution_time_ms: u64) -> TestCaseResult {
    TestCaseResult {
        index,
        input: test_case.input.clone(),
        output: String::new(),
        expected: test_case.expected_output.clone(),
        passed: false,
        stderr: String::new(),
        exit_code: None,
        execution_time_ms,
        timed_out: true,
        output_truncated: false,
    }
}

pub fn summarize(passed: usize, total: usize) -> String {
    format!("{} / {} test cases passed", passed, total)
}

/// Verdict for a run that executed every test case
pub fn verdict(results: &[TestCaseResult], policy: VerdictPolicy) -> SubmissionStatus {
    match policy {
        VerdictPolicy::RanToCompletion => SubmissionStatus::Accepted,
        VerdictPolicy::AllTestsPassed => match results.iter().find(|r| !r.passed) {
            None => SubmissionStatus::Accepted,
            Some(r) if r.timed_out => SubmissionStatus::TimeLimitExceeded,
            Some(r) if r.exit_code.is_some_and(|code| code != 0) => SubmissionStatus::RuntimeError,
            Some(_) => SubmissionStatus::WrongAnswer,
        },
    }
}

/// Aggregate a complete run
pub fn aggregate(results: Vec<TestCaseResult>, policy: VerdictPolicy) -> CodeExecutionResult {
    let passed = results.iter().filter(|r| r.passed).count();
    let submission_status = verdict(&results, policy);

    // Truncated output first, otherwise the first crash
    let error = match results.iter().find(|r| r.output_truncated) {
        Some(r) => format!("Output limit exceeded on test case {}", r.index),
        None => results
            .iter()
            .find(|r| r.exit_code.is_some_and(|code| code != 0))
            .map(|r| r.stderr.clone())
            .unwrap_or_default(),
    };

    CodeExecutionResult {
        output: summarize(passed, results.len()),
        error,
        exit_code: 0,
        timed_out: false,
        submission_status,
        test_case_results: results,
    }
}

pub fn compilation_failed(output: &ExecOutput) -> CodeExecutionResult {
    CodeExecutionResult {
        output: output.combined(),
        error: output.stderr.clone(),
        exit_code: output.exit_code,
        timed_out: false,
        submission_status: SubmissionStatus::CompilationError,
        test_case_results: Vec::new(),
    }
}

pub fn compilation_timed_out(limit_ms: u64) -> CodeExecutionResult {
    let message = format!("Compilation exceeded the {} ms limit", limit_ms);
    CodeExecutionResult {
        output: message.clone(),
        error: message,
        exit_code: COMPILE_TIMEOUT_EXIT_CODE,
        timed_out: false,
        submission_status: SubmissionStatus::CompilationError,
        test_case_results: Vec::new(),
    }
}

/// Result of a run aborted by the per-test time limit. `results` ends with the timed-out test.
pub fn time_limit_exceeded(
    results: Vec<TestCaseResult>,
    total: usize,
    limit_ms: u64,
) -> CodeExecutionResult {
    let passed = results.iter().filter(|r| r.passed).count();
    let error = format!(
        "Time limit of {} ms exceeded on test case {}",
        limit_ms,
        results.len()
    );

    CodeExecutionResult {
        output: summarize(passed, total),
        error,
        exit_code: 0,
        timed_out: true,
        submission_status: SubmissionStatus::TimeLimitExceeded,
        test_case_results: results,
    }
}
