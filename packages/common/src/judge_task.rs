use serde::{Deserialize, Serialize};

/// A judge task as carried on the judge queue (and, unchanged, on the
/// dead-letter queue).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeTask {
    pub submission_id: i64,
    pub problem_id: i64,
    pub user_id: i64,
    /// Language identifier as submitted (e.g. "java", "C++", "python3").
    pub language: String,
    pub code: String,
    /// Producer-side retry hint. Logged only; the broker redelivery count decides retries.
    #[serde(default)]
    pub retry_count: i32,
}

impl JudgeTask {
    pub fn new(
        submission_id: i64,
        problem_id: i64,
        user_id: i64,
        language: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            submission_id,
            problem_id,
            user_id,
            language: language.into(),
            code: code.into(),
            retry_count: 0,
        }
    }
}
