use anyhow::Context;
use common::judge_result::{
    JudgeResult, JudgeSystemErrorInfo, MEMORY_LIMIT_EXCEEDED, RUNTIME_ERROR, TIMED_OUT,
    TestCaseResult, WRONG_ANSWER, truncate_for_display,
};
use common::TestCase;
use tracing::{debug, instrument, warn};

use super::language::LanguageSpec;
use crate::sandbox::{ExecOutcome, SandboxError, SandboxOrchestrator};

const INPUT_FILE: &str = "input.txt";

/// Drives one sandbox through compile and run-against-each-case.
pub struct LanguageAdapter<'a> {
    orchestrator: &'a SandboxOrchestrator,
    spec: &'a LanguageSpec,
    compile_timeout_floor_secs: u64,
}

impl<'a> LanguageAdapter<'a> {
    pub fn new(
        orchestrator: &'a SandboxOrchestrator,
        spec: &'a LanguageSpec,
        compile_timeout_floor_secs: u64,
    ) -> Self {
        Self {
            orchestrator,
            spec,
            compile_timeout_floor_secs,
        }
    }

    /// Judge `code` against `test_cases`. Never fails: faults become SYSTEM_ERROR.
    #[instrument(skip_all, fields(language = %self.spec.language, cases = test_cases.len()))]
    pub async fn judge(
        &self,
        code: &str,
        test_cases: &[TestCase],
        time_limit_ms: u64,
        memory_limit_mb: u64,
    ) -> JudgeResult {
        if test_cases.is_empty() {
            return JudgeResult::system_error(
                0,
                JudgeSystemErrorInfo::new("NO_TEST_CASES", "no test cases"),
            );
        }

        let total = test_cases.len() as u32;
        match self
            .try_judge(code, test_cases, time_limit_ms, memory_limit_mb)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let code = match e.downcast_ref::<SandboxError>() {
                    Some(SandboxError::ImagePull { .. }) => "IMAGE_PULL_FAILED",
                    Some(SandboxError::Runtime(_)) => "SANDBOX_ERROR",
                    _ => "IO_ERROR",
                };
                let message = format!("{e:#}");
                warn!(error = %message, code, "Judging aborted by a system fault");
                JudgeResult::system_error(total, JudgeSystemErrorInfo::new(code, message).retryable())
            }
        }
    }

    async fn try_judge(
        &self,
        code: &str,
        test_cases: &[TestCase],
        time_limit_ms: u64,
        memory_limit_mb: u64,
    ) -> anyhow::Result<JudgeResult> {
        let total = test_cases.len() as u32;
        let lease = self
            .orchestrator
            .lease(&self.spec.image)
            .await
            .context("failed to prepare sandbox")?;
        lease
            .work_dir()
            .write_file(self.spec.source_file, code)
            .await
            .context("failed to write source file")?;

        let time_limit_secs = time_limit_ms.div_ceil(1000).max(1);

        let mut compile_time_ms = 0;
        let compile_timeout_secs = time_limit_secs.max(self.compile_timeout_floor_secs);
        if let Some(command) = self.spec.compile_command(compile_timeout_secs) {
            let outcome = self
                .orchestrator
                .run(&lease, &command, compile_timeout_secs + 1)
                .await
                .context("compile step failed")?;
            compile_time_ms = outcome.execute_time_ms;

            if !outcome.success {
                debug!(exit_code = outcome.exit_code, "Compilation failed");
                return Ok(JudgeResult::compile_error(
                    total,
                    compiler_message(&outcome),
                    compile_time_ms,
                ));
            }
        }

        // Pooled containers report a container-wide peak, so only transient
        // runs are held to the problem's memory limit by sampling.
        let sampled_limit = (!lease.is_pooled()).then_some(memory_limit_mb * 1024 * 1024);
        let run_command = self.spec.run_command(time_limit_secs);

        let mut results = Vec::with_capacity(test_cases.len());
        for case in test_cases {
            lease
                .work_dir()
                .write_file(INPUT_FILE, &case.input)
                .await
                .context("failed to write test input")?;

            let outcome = self
                .orchestrator
                .run(&lease, &run_command, time_limit_secs + 1)
                .await
                .with_context(|| format!("run failed on test case {}", case.id))?;

            let result = evaluate_case(case, &outcome, sampled_limit);
            // Anything but a wrong answer (TLE, MLE, RE) ends the run.
            let stop = result
                .error_message
                .as_deref()
                .is_some_and(|message| message != WRONG_ANSWER);
            results.push(result);
            if stop {
                debug!(test_case_id = case.id, exit_code = outcome.exit_code, "Stopping after failed case");
                break;
            }
        }

        Ok(JudgeResult::from_case_results(total, results, compile_time_ms))
    }
}

fn compiler_message(outcome: &ExecOutcome) -> String {
    if outcome.is_timeout() {
        return "compilation timed out".to_string();
    }
    let output = outcome.output.trim();
    if output.is_empty() {
        outcome.error.trim().to_string()
    } else {
        output.to_string()
    }
}

fn evaluate_case(case: &TestCase, outcome: &ExecOutcome, memory_limit_bytes: Option<u64>) -> TestCaseResult {
    let actual = outcome.output.trim();
    let expected = case.expected_output.trim();
    let over_memory =
        outcome.oom_killed || memory_limit_bytes.is_some_and(|limit| outcome.memory_used_bytes > limit);

    let error_message = if outcome.is_timeout() {
        Some(TIMED_OUT.to_string())
    } else if over_memory {
        Some(MEMORY_LIMIT_EXCEEDED.to_string())
    } else if !outcome.success {
        let detail = match (outcome.error.trim(), actual) {
            ("", "") => format!("exit code {}", outcome.exit_code),
            ("", stdout) => stdout.to_string(),
            (stderr, _) => stderr.to_string(),
        };
        Some(format!("{RUNTIME_ERROR}: {detail}"))
    } else if actual != expected {
        Some(WRONG_ANSWER.to_string())
    } else {
        None
    };

    TestCaseResult {
        test_case_id: case.id,
        passed: error_message.is_none(),
        actual_output: truncate_for_display(actual),
        expected_output: expected.to_string(),
        time_used_ms: outcome.execute_time_ms,
        memory_used_kb: outcome.memory_used_bytes / 1024,
        error_message,
    }
}
