use crate::SubmissionStatus;
use serde::{Deserialize, Serialize};

/// Displayed actual output is cut beyond this many characters.
pub const MAX_DISPLAY_OUTPUT_CHARS: usize = 1000;

pub const TIMED_OUT: &str = "timed out";
pub const MEMORY_LIMIT_EXCEEDED: &str = "memory limit exceeded";
pub const RUNTIME_ERROR: &str = "runtime error";
pub const WRONG_ANSWER: &str = "wrong answer";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeSystemErrorInfo {
    /// Machine-readable error code (e.g., "SANDBOX_ERROR", "NO_TEST_CASES").
    pub code: String,
    /// Human-readable error description.
    pub message: String,
    /// Whether another attempt on a fresh delivery may succeed.
    #[serde(default)]
    pub retryable: bool,
}

impl JudgeSystemErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

/// Outcome of judging one submission attempt.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JudgeResult {
    pub success: bool,
    pub status: SubmissionStatus,
    /// 0..=100, floor(100 * passed / total).
    pub score: i32,
    /// Maximum time used across executed test cases.
    pub time_used_ms: u64,
    /// Maximum memory used across executed test cases.
    pub memory_used_kb: u64,
    pub compile_time_ms: u64,
    /// Sum of run times across executed test cases.
    pub total_run_time_ms: u64,
    pub error_message: Option<String>,
    pub passed_count: u32,
    pub total_count: u32,
    pub test_case_results: Vec<TestCaseResult>,
    /// Structured error info (only for SystemError status).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<JudgeSystemErrorInfo>,
}

impl JudgeResult {
    fn empty(status: SubmissionStatus, total_count: u32) -> Self {
        Self {
            success: false,
            status,
            score: 0,
            time_used_ms: 0,
            memory_used_kb: 0,
            compile_time_ms: 0,
            total_run_time_ms: 0,
            error_message: None,
            passed_count: 0,
            total_count,
            test_case_results: vec![],
            error_info: None,
        }
    }

    /// Create a result indicating system error.
    pub fn system_error(total_count: u32, error_info: JudgeSystemErrorInfo) -> Self {
        Self {
            error_message: Some(error_info.message.clone()),
            error_info: Some(error_info),
            ..Self::empty(SubmissionStatus::SystemError, total_count)
        }
    }

    /// Compilation failed; no test case was run.
    pub fn compile_error(total_count: u32, output: impl Into<String>, compile_time_ms: u64) -> Self {
        Self {
            error_message: Some(output.into()),
            compile_time_ms,
            ..Self::empty(SubmissionStatus::CompileError, total_count)
        }
    }

    /// Rejected before compilation (security scan).
    pub fn rejected(total_count: u32, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::empty(SubmissionStatus::CompileError, total_count)
        }
    }

    /// Aggregate executed cases (in order, possibly cut short by fail-fast)
    /// into a verdict.
    pub fn from_case_results(
        total_count: u32,
        test_case_results: Vec<TestCaseResult>,
        compile_time_ms: u64,
    ) -> Self {
        let passed_count = test_case_results.iter().filter(|r| r.passed).count() as u32;
        let error_message = test_case_results
            .iter()
            .find(|r| !r.passed)
            .and_then(|r| r.error_message.clone());
        let time_used_ms = test_case_results.iter().map(|r| r.time_used_ms).max().unwrap_or(0);
        let memory_used_kb = test_case_results.iter().map(|r| r.memory_used_kb).max().unwrap_or(0);
        let total_run_time_ms = test_case_results.iter().map(|r| r.time_used_ms).sum();

        let all_passed = total_count > 0 && passed_count == total_count;
        let status = if all_passed {
            SubmissionStatus::Accepted
        } else {
            classify_failure(error_message.as_deref())
        };
        let score = if total_count == 0 {
            0
        } else {
            (100 * passed_count / total_count) as i32
        };

        Self {
            success: all_passed,
            status,
            score,
            time_used_ms,
            memory_used_kb,
            compile_time_ms,
            total_run_time_ms,
            error_message,
            passed_count,
            total_count,
            test_case_results,
            error_info: None,
        }
    }

    /// Downgrade to WRONG_ANSWER with score 0 after a cheating flag.
    pub fn flag_cheating(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.status = SubmissionStatus::WrongAnswer;
        self.score = 0;
        self.passed_count = 0;
        self.error_message = Some(message.into());
        self
    }

    /// Percentage of passed cases, rounded to two decimals.
    pub fn pass_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        let rate = self.passed_count as f64 * 100.0 / self.total_count as f64;
        (rate * 100.0).round() / 100.0
    }

    /// True when the attempt failed for reasons outside the submission.
    pub fn is_retryable_failure(&self) -> bool {
        self.status == SubmissionStatus::SystemError
            && self.error_info.as_ref().is_some_and(|info| info.retryable)
    }
}

fn classify_failure(first_error: Option<&str>) -> SubmissionStatus {
    match first_error {
        Some(e) if e.starts_with(TIMED_OUT) => SubmissionStatus::TimeLimitExceeded,
        Some(e) if e.starts_with(MEMORY_LIMIT_EXCEEDED) => SubmissionStatus::MemoryLimitExceeded,
        Some(e) if e.starts_with(RUNTIME_ERROR) => SubmissionStatus::RuntimeError,
        _ => SubmissionStatus::WrongAnswer,
    }
}

/// Result for a single test case execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TestCaseResult {
    pub test_case_id: i64,
    pub passed: bool,
    /// Program stdout, truncated for display.
    pub actual_output: String,
    pub expected_output: String,
    pub time_used_ms: u64,
    pub memory_used_kb: u64,
    pub error_message: Option<String>,
}

/// Truncate program output for display, appending "..." when cut.
pub fn truncate_for_display(output: &str) -> String {
    match output.char_indices().nth(MAX_DISPLAY_OUTPUT_CHARS) {
        Some((idx, _)) => format!("{}...", &output[..idx]),
        None => output.to_string(),
    }
}
