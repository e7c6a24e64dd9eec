use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Languages the judge knows how to sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Node,
    Cpp,
    Python,
}

impl Language {
    /// Single source of truth for the supported set
    pub fn all_variants() -> &'static [Language] {
        &[Language::Java, Language::Node, Language::Cpp, Language::Python]
    }

    /// Parse a language identifier (case-insensitive, common aliases accepted)
    pub fn parse(s: &str) -> Option<Language> {
        match s.trim().to_lowercase().as_str() {
            "java" => Some(Language::Java),
            "node" | "nodejs" | "javascript" | "js" => Some(Language::Node),
            "cpp" | "c++" | "g++" => Some(Language::Cpp),
            "python" | "python3" | "py" => Some(Language::Python),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Java => "java",
            Language::Node => "node",
            Language::Cpp => "cpp",
            Language::Python => "python",
        };
        f.write_str(name)
    }
}

/// Opaque job identifier handed back to callers for polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub i64);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemId(pub i64);

impl fmt::Display for ProblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Test case definition (immutable input).
/// Ordering matters - execution is sequential and results are indexed by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/// Everything an executor needs to judge one piece of source code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutionRequest {
    /// Raw identifier as supplied by the caller; resolved by the registry on dequeue
    pub language: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u32,
}

/// Judge-visible verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompilationError,
}

impl Default for SubmissionStatus {
    fn default() -> Self {
        SubmissionStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// 1-based position in the request's test case list
    pub index: usize,
    pub input: String,
    /// Captured stdout
    pub output: String,
    pub expected: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
    /// stdout hit the capture cap; such a run never passes
    #[serde(default)]
    pub output_truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExecutionResult {
    pub output: String,
    pub error: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub submission_status: SubmissionStatus,
    pub test_case_results: Vec<TestCaseResult>,
}

impl CodeExecutionResult {
    pub fn passed_count(&self) -> usize {
        self.test_case_results.iter().filter(|t| t.passed).count()
    }

    /// Slowest single test case, reported to the submission tracker
    pub fn max_execution_time_ms(&self) -> u64 {
        self.test_case_results
            .iter()
            .map(|t| t.execution_time_ms)
            .max()
            .unwrap_or(0)
    }
}

/// Job lifecycle: Queued -> Running -> {Completed, Failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            // Queued jobs are failed directly when they are discarded or rejected
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub job_id: JobId,
    /// `None` for ephemeral "run" jobs
    pub submission_id: Option<SubmissionId>,
    pub status: JobStatus,
    pub result: Option<CodeExecutionResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionJob {
    pub fn new(submission_id: Option<SubmissionId>) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            submission_id,
            status: JobStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Problem record as served by the problem-data collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: ProblemId,
    #[serde(default)]
    pub title: String,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u32,
    pub test_cases: Vec<ProblemTestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemTestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_sample: bool,
}

impl Problem {
    /// Test cases visible to the user, in problem order
    pub fn sample_test_cases(&self) -> Vec<TestCase> {
        self.test_cases
            .iter()
            .filter(|tc| tc.is_sample)
            .map(ProblemTestCase::to_test_case)
            .collect()
    }

    pub fn all_test_cases(&self) -> Vec<TestCase> {
        self.test_cases
            .iter()
            .map(ProblemTestCase::to_test_case)
            .collect()
    }
}

impl ProblemTestCase {
    fn to_test_case(&self) -> TestCase {
        TestCase {
            input: self.input.clone(),
            expected_output: self.expected_output.clone(),
        }
    }
}
