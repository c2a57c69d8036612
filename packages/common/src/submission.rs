use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SubmissionStatus;
use crate::judge_result::{JudgeResult, TestCaseResult};

/// A submission record. Created on intake; the judge only mutates it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub problem_id: i64,
    pub user_id: i64,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub status: SubmissionStatus,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub time_used_ms: u64,
    #[serde(default)]
    pub memory_used_kb: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub pass_rate: f64,
    #[serde(default)]
    pub test_case_results: Vec<TestCaseResult>,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub judged_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(
        id: i64,
        problem_id: i64,
        user_id: i64,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            problem_id,
            user_id,
            language: language.into(),
            code: code.into(),
            status: SubmissionStatus::Pending,
            score: 0,
            time_used_ms: 0,
            memory_used_kb: 0,
            error_message: None,
            pass_rate: 0.0,
            test_case_results: vec![],
            ip_address: None,
            created_at: Utc::now(),
            judged_at: None,
        }
    }

    pub fn mark_judging(&mut self) {
        self.status = SubmissionStatus::Judging;
    }

    /// Copy a finished judge result onto the record.
    pub fn apply_result(&mut self, result: &JudgeResult) {
        self.status = result.status;
        self.score = result.score;
        self.time_used_ms = result.time_used_ms;
        self.memory_used_kb = result.memory_used_kb;
        self.error_message = result.error_message.clone();
        self.pass_rate = result.pass_rate();
        self.test_case_results = result.test_case_results.clone();
        self.judged_at = Some(Utc::now());
    }

    pub fn mark_system_error(&mut self, message: impl Into<String>) {
        self.status = SubmissionStatus::SystemError;
        self.score = 0;
        self.pass_rate = 0.0;
        self.error_message = Some(message.into());
        self.judged_at = Some(Utc::now());
    }
}
