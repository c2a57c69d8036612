pub mod config;
pub mod dlq;
pub mod judge_result;
pub mod judge_task;
pub mod observe;
pub mod retry;
pub mod submission;
pub mod submission_status;
pub mod test_case;

pub use config::{DlqConfig, MqAppConfig};
pub use judge_result::{JudgeResult, JudgeSystemErrorInfo, TestCaseResult};
pub use judge_task::JudgeTask;
pub use submission::Submission;
pub use submission_status::SubmissionStatus;
pub use test_case::{ProblemLimits, TestCase};
