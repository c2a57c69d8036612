use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::{ProblemLimits, TestCase};
use tracing::debug;

use super::{CollabResult, TestCaseSource};

const CASES_FILE: &str = "cases.json";
const LIMITS_FILE: &str = "limits.json";

/// Reads `<root>/<problem_id>/cases.json` and the optional `limits.json`.
#[derive(Debug, Clone)]
pub struct FsTestCaseCatalog {
    root: PathBuf,
}

impl FsTestCaseCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn problem_dir(&self, problem_id: i64) -> PathBuf {
        self.root.join(problem_id.to_string())
    }
}

async fn read_optional(path: &Path) -> CollabResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl TestCaseSource for FsTestCaseCatalog {
    async fn test_cases(&self, problem_id: i64) -> CollabResult<Vec<TestCase>> {
        let path = self.problem_dir(problem_id).join(CASES_FILE);
        let Some(bytes) = read_optional(&path).await? else {
            debug!(problem_id, path = %path.display(), "No test case file");
            return Ok(vec![]);
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn limits(&self, problem_id: i64) -> CollabResult<ProblemLimits> {
        let path = self.problem_dir(problem_id).join(LIMITS_FILE);
        match read_optional(&path).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(ProblemLimits::default()),
        }
    }
}
