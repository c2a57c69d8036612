//! Scripted fakes shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{JudgeResult, ProblemLimits, Submission, SubmissionStatus, TestCase};

use crate::collab::{
    CollabError, CollabResult, JudgeNotification, NotificationSink, ProgressUpdater,
    SubmissionStore, TestCaseSource,
};
use crate::sandbox::{ContainerRuntime, ContainerSpec, RawExit, SandboxError, WORKSPACE_MOUNT};

/// What a scripted command does.
pub enum Scripted {
    Exit(RawExit),
    /// Never returns; only the outer deadline ends it.
    Hang,
    /// Runtime-level failure (daemon gone, container missing).
    Fail(String),
}

/// One command observed by the fake runtime.
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub container_id: String,
    pub cmd: Vec<String>,
    pub working_dir: String,
    /// Host directory backing `working_dir`.
    pub host_dir: PathBuf,
}

impl FakeCall {
    /// The shell snippet of an `sh -c <script>` command.
    pub fn script(&self) -> &str {
        self.cmd.last().map(String::as_str).unwrap_or_default()
    }

    pub fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.host_dir.join(file)).unwrap_or_default()
    }
}

type Script = Box<dyn Fn(&FakeCall) -> Scripted + Send + Sync>;

#[derive(Default)]
struct FakeState {
    images: HashSet<String>,
    pull_delays: HashMap<String, Duration>,
    containers: HashMap<String, ContainerSpec>,
    created: Vec<ContainerSpec>,
    container_ids: Vec<String>,
    removed: Vec<String>,
    calls: Vec<FakeCall>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    script: Option<Script>,
    next_id: AtomicUsize,
    pulls: AtomicUsize,
    memory_usage: AtomicU64,
    fail_pulls: AtomicBool,
    fail_starts: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&FakeCall) -> Scripted + Send + Sync + 'static,
    {
        self.script = Some(Box::new(script));
        self
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    /// Make pulling `image` take `delay`.
    pub fn delay_pull(&self, image: &str, delay: Duration) {
        self.state.lock().unwrap().pull_delays.insert(image.to_string(), delay);
    }

    pub fn fail_pulls(&self) {
        self.fail_pulls.store(true, Ordering::SeqCst);
    }

    pub fn fail_starts(&self) {
        self.fail_starts.store(true, Ordering::SeqCst);
    }

    pub fn set_memory_usage(&self, bytes: u64) {
        self.memory_usage.store(bytes, Ordering::SeqCst);
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().container_ids.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, id: &str, cmd: &[String], working_dir: &str) -> Result<FakeCall, SandboxError> {
        let mut state = self.state.lock().unwrap();
        let spec = state
            .containers
            .get(id)
            .ok_or_else(|| SandboxError::Runtime(format!("no such container: {id}")))?;
        let host_root = spec
            .binds
            .first()
            .and_then(|bind| bind.rsplit_once(':'))
            .map(|(host, _)| PathBuf::from(host))
            .unwrap_or_default();
        let relative = working_dir
            .strip_prefix(WORKSPACE_MOUNT)
            .unwrap_or(working_dir)
            .trim_start_matches('/');

        let call = FakeCall {
            container_id: id.to_string(),
            cmd: cmd.to_vec(),
            working_dir: working_dir.to_string(),
            host_dir: host_root.join(relative),
        };
        state.calls.push(call.clone());
        Ok(call)
    }

    async fn respond(&self, call: &FakeCall) -> Result<RawExit, SandboxError> {
        let scripted = match &self.script {
            Some(script) => script(call),
            None => Scripted::Exit(RawExit::default()),
        };
        match scripted {
            Scripted::Exit(raw) => {
                // Give the memory sampler a turn before the run completes.
                tokio::task::yield_now().await;
                Ok(raw)
            }
            Scripted::Hang => std::future::pending().await,
            Scripted::Fail(message) => Err(SandboxError::Runtime(message)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(SandboxError::Runtime(format!("manifest for {image} not found")));
        }
        let delay = self.state.lock().unwrap().pull_delays.get(image).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.add_image(image);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state.containers.insert(id.clone(), spec.clone());
        state.created.push(spec.clone());
        state.container_ids.push(id.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), SandboxError> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(SandboxError::Runtime(format!("cannot start {id}")));
        }
        Ok(())
    }

    async fn run_container(&self, id: &str) -> Result<RawExit, SandboxError> {
        let spec = self
            .state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::Runtime(format!("no such container: {id}")))?;
        let call = self.record(id, &spec.cmd, &spec.working_dir)?;
        self.respond(&call).await
    }

    async fn exec(&self, id: &str, cmd: &[String], working_dir: &str) -> Result<RawExit, SandboxError> {
        let call = self.record(id, cmd, working_dir)?;
        self.respond(&call).await
    }

    async fn memory_usage(&self, _id: &str) -> Result<Option<u64>, SandboxError> {
        Ok(Some(self.memory_usage.load(Ordering::SeqCst)))
    }

    async fn remove_container(&self, id: &str) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.containers.remove(id);
        state.removed.push(id.to_string());
        Ok(())
    }
}

/// Test cases held in memory, keyed by problem.
#[derive(Default)]
pub struct MemoryTestCaseSource {
    cases: Mutex<HashMap<i64, Vec<TestCase>>>,
    limits: Mutex<HashMap<i64, ProblemLimits>>,
}

impl MemoryTestCaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, problem_id: i64, cases: Vec<TestCase>) {
        self.cases.lock().unwrap().insert(problem_id, cases);
    }

    pub fn set_limits(&self, problem_id: i64, limits: ProblemLimits) {
        self.limits.lock().unwrap().insert(problem_id, limits);
    }
}

#[async_trait]
impl TestCaseSource for MemoryTestCaseSource {
    async fn test_cases(&self, problem_id: i64) -> CollabResult<Vec<TestCase>> {
        Ok(self.cases.lock().unwrap().get(&problem_id).cloned().unwrap_or_default())
    }

    async fn limits(&self, problem_id: i64) -> CollabResult<ProblemLimits> {
        Ok(self
            .limits
            .lock()
            .unwrap()
            .get(&problem_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Submission records held in memory. `fail_writes` simulates an unavailable store.
#[derive(Default)]
pub struct MemorySubmissionStore {
    submissions: Mutex<HashMap<i64, Submission>>,
    system_errors: Mutex<Vec<(i64, String)>>,
    fail_writes: AtomicBool,
    last_id: AtomicI64,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, submission: Submission) {
        self.submissions.lock().unwrap().insert(submission.id, submission);
    }

    pub fn get(&self, submission_id: i64) -> Option<Submission> {
        self.submissions.lock().unwrap().get(&submission_id).cloned()
    }

    /// Every `mark_system_error` call, in order.
    pub fn system_errors(&self) -> Vec<(i64, String)> {
        self.system_errors.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> CollabResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CollabError::Backend("store unavailable".into()));
        }
        Ok(())
    }

    fn update(&self, submission_id: i64, f: impl FnOnce(&mut Submission)) -> CollabResult<()> {
        self.check_writable()?;
        let mut submissions = self.submissions.lock().unwrap();
        let submission = submissions
            .get_mut(&submission_id)
            .ok_or_else(|| CollabError::Backend(format!("submission {submission_id} not found")))?;
        f(submission);
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn next_id(&self) -> CollabResult<i64> {
        Ok(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn create(&self, submission: &Submission) -> CollabResult<()> {
        self.check_writable()?;
        self.insert(submission.clone());
        Ok(())
    }

    async fn load(&self, submission_id: i64) -> CollabResult<Option<Submission>> {
        Ok(self.get(submission_id))
    }

    async fn mark_judging(&self, submission_id: i64) -> CollabResult<()> {
        self.update(submission_id, Submission::mark_judging)
    }

    async fn save_result(&self, submission_id: i64, result: &JudgeResult) -> CollabResult<()> {
        self.update(submission_id, |s| s.apply_result(result))
    }

    async fn mark_system_error(&self, submission_id: i64, message: &str) -> CollabResult<()> {
        self.update(submission_id, |s| s.mark_system_error(message))?;
        self.system_errors.lock().unwrap().push((submission_id, message.to_string()));
        Ok(())
    }
}

/// Records notifications instead of delivering them.
#[derive(Default)]
pub struct RecordingNotifier {
    results: Mutex<Vec<(i64, JudgeNotification)>>,
    statuses: Mutex<Vec<(i64, i64, SubmissionStatus)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<(i64, JudgeNotification)> {
        self.results.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(i64, i64, SubmissionStatus)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify_result(&self, user_id: i64, notification: &JudgeNotification) -> CollabResult<()> {
        self.results.lock().unwrap().push((user_id, notification.clone()));
        Ok(())
    }

    async fn notify_status(
        &self,
        user_id: i64,
        submission_id: i64,
        status: SubmissionStatus,
    ) -> CollabResult<()> {
        self.statuses.lock().unwrap().push((user_id, submission_id, status));
        Ok(())
    }
}

/// Records progress updates; `fail` makes every call error.
#[derive(Default)]
pub struct RecordingProgress {
    records: Mutex<Vec<(i64, SubmissionStatus)>>,
    fail: AtomicBool,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let progress = Self::default();
        progress.fail.store(true, Ordering::SeqCst);
        progress
    }

    pub fn records(&self) -> Vec<(i64, SubmissionStatus)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressUpdater for RecordingProgress {
    async fn record(&self, submission: &Submission, result: &JudgeResult) -> CollabResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollabError::Backend("progress service unavailable".into()));
        }
        self.records.lock().unwrap().push((submission.id, result.status));
        Ok(())
    }
}
