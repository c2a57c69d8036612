use std::sync::Arc;
use std::time::Instant;

use common::dlq::SubmissionDlqErrorCode;
use common::observe::{JudgeEvent, ObserverSet};
use common::{JudgeResult, JudgeTask, Submission, SubmissionStatus};
use tracing::{debug, info, instrument, warn};

use super::adapter::LanguageAdapter;
use super::anticheat::{AntiCheatAnalyzer, AntiCheatPolicy, CheatReport};
use super::language::LanguageTable;
use super::security::SecurityScanner;
use crate::collab::{
    JudgeNotification, NotificationSink, ProgressUpdater, SubmissionStore, TestCaseSource,
};
use crate::error::JudgeError;
use crate::sandbox::SandboxOrchestrator;

const DEFAULT_COMPILE_TIMEOUT_FLOOR_SECS: u64 = 10;

/// External services the engine reads from and reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub submissions: Arc<dyn SubmissionStore>,
    pub test_cases: Arc<dyn TestCaseSource>,
    pub notifier: Arc<dyn NotificationSink>,
    pub progress: Arc<dyn ProgressUpdater>,
}

/// Security check, anti-cheat, adapter dispatch, then persistence and
/// notification of the verdict.
pub struct JudgeEngine {
    orchestrator: Arc<SandboxOrchestrator>,
    languages: LanguageTable,
    security: SecurityScanner,
    anti_cheat: AntiCheatAnalyzer,
    anti_cheat_policy: AntiCheatPolicy,
    compile_timeout_floor_secs: u64,
    collab: Collaborators,
    observers: ObserverSet,
}

impl JudgeEngine {
    pub fn new(orchestrator: Arc<SandboxOrchestrator>, collab: Collaborators) -> Self {
        Self {
            orchestrator,
            languages: LanguageTable::default(),
            security: SecurityScanner::new(),
            anti_cheat: AntiCheatAnalyzer::new(),
            anti_cheat_policy: AntiCheatPolicy::default(),
            compile_timeout_floor_secs: DEFAULT_COMPILE_TIMEOUT_FLOOR_SECS,
            collab,
            observers: ObserverSet::new(),
        }
    }

    pub fn with_languages(mut self, languages: LanguageTable) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_anti_cheat(mut self, policy: AntiCheatPolicy) -> Self {
        self.anti_cheat_policy = policy;
        self
    }

    pub fn with_compile_timeout_floor(mut self, secs: u64) -> Self {
        self.compile_timeout_floor_secs = secs;
        self
    }

    pub fn with_observers(mut self, observers: ObserverSet) -> Self {
        self.observers = observers;
        self
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    /// Judge one task end to end.
    ///
    /// Verdicts (including compile errors and security rejections) are
    /// persisted and returned as `Ok`. `Err` means nothing terminal was
    /// recorded for a retryable error, or the error is final
    /// (see [`JudgeError::is_retryable`]).
    #[instrument(
        skip_all,
        fields(
            submission_id = task.submission_id,
            problem_id = task.problem_id,
            language = %task.language,
        )
    )]
    pub async fn judge_task(&self, task: &JudgeTask) -> Result<JudgeResult, JudgeError> {
        if task.retry_count > 0 {
            debug!(retry_count = task.retry_count, "Task carries a retry count");
        }

        let started = Instant::now();
        match self.run(task, started).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.observers
                    .emit(JudgeEvent::Failed {
                        submission_id: task.submission_id,
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn run(&self, task: &JudgeTask, started: Instant) -> Result<JudgeResult, JudgeError> {
        let submission = self
            .collab
            .submissions
            .load(task.submission_id)
            .await?
            .ok_or(JudgeError::SubmissionNotFound(task.submission_id))?;

        self.collab.submissions.mark_judging(submission.id).await?;
        if let Err(e) = self
            .collab
            .notifier
            .notify_status(submission.user_id, submission.id, SubmissionStatus::Judging)
            .await
        {
            warn!(error = %e, "Failed to send judging status notification");
        }
        self.observers
            .emit(JudgeEvent::Started {
                submission_id: submission.id,
                language: task.language.clone(),
            })
            .await;

        let spec = match self.languages.resolve(&task.language) {
            Ok(spec) => spec,
            Err(e) => {
                let result = JudgeResult::system_error(
                    0,
                    common::JudgeSystemErrorInfo::new("UNSUPPORTED_LANGUAGE", e.to_string()),
                );
                if let Err(store_err) = self
                    .collab
                    .submissions
                    .save_result(submission.id, &result)
                    .await
                {
                    warn!(error = %store_err, "Failed to record unsupported language");
                }
                self.notify_result(&submission, &result).await;
                return Err(e);
            }
        };

        if let Some(violation) = self.security.scan(&task.code, spec.language) {
            self.observers
                .emit(JudgeEvent::SecurityRejected {
                    submission_id: submission.id,
                    category: violation.category.as_str().to_string(),
                })
                .await;
            let result = JudgeResult::rejected(0, violation.message);
            return self.finish(&submission, result, started).await;
        }

        let cases = self.collab.test_cases.test_cases(task.problem_id).await?;
        let limits = self.collab.test_cases.limits(task.problem_id).await?;
        debug!(
            cases = cases.len(),
            time_limit_ms = limits.time_limit_ms,
            memory_limit_mb = limits.memory_limit_mb,
            "Loaded test cases"
        );

        let report = match self.anti_cheat_policy {
            AntiCheatPolicy::Off => CheatReport::default(),
            _ => self.anti_cheat.analyze(&task.code, spec.language, &cases),
        };
        let enforced = self.anti_cheat_policy == AntiCheatPolicy::Enforce;
        if let Some(kind) = report.kind.filter(|_| report.detected) {
            self.observers
                .emit(JudgeEvent::CheatFlagged {
                    submission_id: submission.id,
                    kind: kind.as_str().to_string(),
                    enforced,
                })
                .await;
        }

        let adapter =
            LanguageAdapter::new(&self.orchestrator, spec, self.compile_timeout_floor_secs);
        let mut result = adapter
            .judge(&task.code, &cases, limits.time_limit_ms, limits.memory_limit_mb)
            .await;

        if result.is_retryable_failure() {
            let message = result
                .error_message
                .unwrap_or_else(|| "sandbox failure".to_string());
            return Err(JudgeError::Infrastructure(message));
        }

        if report.detected && enforced && result.score > 0 {
            info!(judged_score = result.score, "Anti-cheat verdict applied");
            result = result.flag_cheating(report.message);
        }

        self.finish(&submission, result, started).await
    }

    async fn finish(
        &self,
        submission: &Submission,
        result: JudgeResult,
        started: Instant,
    ) -> Result<JudgeResult, JudgeError> {
        self.collab
            .submissions
            .save_result(submission.id, &result)
            .await?;

        self.notify_result(submission, &result).await;

        let mut judged = submission.clone();
        judged.apply_result(&result);
        if let Err(e) = self.collab.progress.record(&judged, &result).await {
            warn!(error = %e, "Failed to record progress");
        }

        self.observers
            .emit(JudgeEvent::Completed {
                submission_id: submission.id,
                status: result.status,
                score: result.score,
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
            .await;
        Ok(result)
    }

    async fn notify_result(&self, submission: &Submission, result: &JudgeResult) {
        let notification = JudgeNotification {
            submission_id: submission.id,
            status: result.status,
            score: result.score,
        };
        if let Err(e) = self
            .collab
            .notifier
            .notify_result(submission.user_id, &notification)
            .await
        {
            warn!(error = %e, "Failed to send result notification");
        }
    }

    /// Record the terminal failure of a dead-lettered task.
    #[instrument(skip(self))]
    pub async fn dead_letter(&self, submission_id: i64, user_id: Option<i64>) -> Result<(), JudgeError> {
        self.collab
            .submissions
            .mark_system_error(submission_id, SubmissionDlqErrorCode::PROCESSING_FAILED_MESSAGE)
            .await?;

        if let Some(user_id) = user_id {
            let notification = JudgeNotification {
                submission_id,
                status: SubmissionStatus::SystemError,
                score: 0,
            };
            if let Err(e) = self.collab.notifier.notify_result(user_id, &notification).await {
                warn!(error = %e, "Failed to send result notification");
            }
        }

        self.observers
            .emit(JudgeEvent::DeadLettered { submission_id })
            .await;
        Ok(())
    }
}
