// In-memory problem catalog and submission tracker used by the binaries

use crate::service::{ProblemProvider, SubmissionTracker};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use judge_common::types::{Problem, ProblemId, SubmissionId, SubmissionStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

#[derive(Debug, Deserialize)]
struct ProblemsJson {
    problems: Vec<Problem>,
}

/// Read-only set of problems, keyed by id
#[derive(Debug, Clone, Default)]
pub struct InMemoryProblemCatalog {
    problems: HashMap<ProblemId, Problem>,
}

impl InMemoryProblemCatalog {
    pub fn from_problems(problems: Vec<Problem>) -> Self {
        Self {
            problems: problems.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    /// Load problems from a JSON file of the form `{"problems": [...]}`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read problems file {}", path.display()))?;

        let parsed: ProblemsJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse problems file {}", path.display()))?;

        let mut problems = HashMap::new();
        for problem in parsed.problems {
            if problem.test_cases.is_empty() {
                bail!("Problem {} has no test cases", problem.id);
            }
            if problems.insert(problem.id, problem).is_some() {
                bail!("Duplicate problem id in {}", path.display());
            }
        }

        info!(count = problems.len(), path = %path.display(), "Loaded problem catalog");
        Ok(Self { problems })
    }

    pub fn get(&self, problem_id: ProblemId) -> Option<&Problem> {
        self.problems.get(&problem_id)
    }

    pub fn ids(&self) -> Vec<ProblemId> {
        let mut ids: Vec<ProblemId> = self.problems.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

#[async_trait]
impl ProblemProvider for InMemoryProblemCatalog {
    async fn get_problem(&self, problem_id: ProblemId) -> Result<Option<Problem>> {
        Ok(self.problems.get(&problem_id).cloned())
    }
}

/// Persisted view of one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: SubmissionId,
    pub problem_id: ProblemId,
    pub language: String,
    pub status: SubmissionStatus,
    pub time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Submission table. Ids are allocated sequentially starting at 1.
#[derive(Debug)]
pub struct InMemorySubmissionTracker {
    next_id: AtomicI64,
    records: DashMap<SubmissionId, SubmissionRecord>,
}

impl Default for InMemorySubmissionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySubmissionTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            records: DashMap::new(),
        }
    }

    /// Record a Pending submission and return its id
    pub fn register(&self, problem_id: ProblemId, language: &str) -> SubmissionId {
        let submission_id = SubmissionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.records.insert(
            submission_id,
            SubmissionRecord {
                submission_id,
                problem_id,
                language: language.to_string(),
                status: SubmissionStatus::Pending,
                time_ms: None,
                memory_kb: None,
                created_at: Utc::now(),
            },
        );
        submission_id
    }

    pub fn get(&self, submission_id: SubmissionId) -> Option<SubmissionRecord> {
        self.records.get(&submission_id).map(|r| r.value().clone())
    }

    /// Drop a submission that was never handed to the engine
    pub fn remove(&self, submission_id: SubmissionId) -> Option<SubmissionRecord> {
        self.records.remove(&submission_id).map(|(_, record)| record)
    }
}

#[async_trait]
impl SubmissionTracker for InMemorySubmissionTracker {
    async fn update_result(
        &self,
        submission_id: SubmissionId,
        status: SubmissionStatus,
        time_ms: u64,
        memory_kb: u64,
    ) -> Result<()> {
        let mut record = self
            .records
            .get_mut(&submission_id)
            .with_context(|| format!("Unknown submission {}", submission_id))?;

        record.status = status;
        record.time_ms = Some(time_ms);
        record.memory_kb = Some(memory_kb);
        Ok(())
    }
}
