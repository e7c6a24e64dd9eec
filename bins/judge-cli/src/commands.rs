// CLI commands: judge a local source file with the in-process engine
use anyhow::{Context, Result, bail};
use clap::Args;
use judge_common::config::{EngineSettings, LanguageConfigManager};
use judge_common::types::{ExecutionJob, JobStatus, ProblemId, SubmissionStatus};
use judge_engine::catalog::{InMemoryProblemCatalog, InMemorySubmissionTracker};
use judge_engine::docker::DockerRuntime;
use judge_engine::job_store::JobStore;
use judge_engine::registry::ExecutorRegistry;
use judge_engine::service::ExecutionService;
use judge_engine::worker::{self, Worker};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Interval between job status polls
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Longest stdout/stderr excerpt shown per test case
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Args)]
pub struct Target {
    /// Problems catalog file
    #[arg(long, env = "JUDGE_PROBLEMS_FILE", default_value = "config/problems.json")]
    pub problems: PathBuf,

    /// Problem id in the catalog
    #[arg(short, long)]
    pub problem: i64,

    /// Language identifier (java, node, cpp, python)
    #[arg(short, long)]
    pub language: String,

    /// Source file to judge
    #[arg(short, long)]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Submit,
}

/// Judge `target` and print the report. Returns whether the verdict was Accepted.
pub async fn judge(languages_path: &Path, target: &Target, mode: Mode) -> Result<bool> {
    let mut settings = EngineSettings::from_env()?;
    settings.languages_config = languages_path.to_path_buf();

    let languages = LanguageConfigManager::load_or_builtin(&settings.languages_config)?;
    let problems = Arc::new(InMemoryProblemCatalog::load(&target.problems)?);

    let source_code = fs::read_to_string(&target.file)
        .with_context(|| format!("Failed to read {}", target.file.display()))?;

    let runtime = Arc::new(DockerRuntime::connect(settings.pull_images)?);
    let registry = Arc::new(ExecutorRegistry::with_defaults(runtime, &languages, &settings)?);

    let store = JobStore::new();
    let submissions = Arc::new(InMemorySubmissionTracker::new());
    let (queue, receiver) = worker::channel();
    let workers = Worker::new(store.clone(), registry.clone())
        .with_tracker(submissions.clone())
        .spawn(receiver, 1);

    let service = ExecutionService::new(store.clone(), queue, registry, problems);
    let problem_id = ProblemId(target.problem);

    println!("🚀 Judging {} as {} against problem {}", target.file.display(), target.language, problem_id);

    let queued = match mode {
        Mode::Run => service.run(&target.language, &source_code, problem_id).await,
        Mode::Submit => {
            let submission_id = submissions.register(problem_id, &target.language);
            service
                .submit(&target.language, &source_code, problem_id, submission_id)
                .await
        }
    };

    let job_id = match queued {
        Ok(job_id) => job_id,
        Err(e) => {
            workers.shutdown().await;
            bail!("❌ {}", e);
        }
    };

    let job = loop {
        match store.get_job(&job_id) {
            Some(job) if job.status.is_terminal() => break job,
            Some(_) => tokio::time::sleep(POLL_INTERVAL).await,
            None => {
                workers.shutdown().await;
                bail!("Job {} disappeared", job_id);
            }
        }
    };

    workers.shutdown().await;

    print!("{}", render_report(&job));
    Ok(is_accepted(&job))
}

fn is_accepted(job: &ExecutionJob) -> bool {
    job.status == JobStatus::Completed
        && job
            .result
            .as_ref()
            .is_some_and(|r| r.submission_status == SubmissionStatus::Accepted)
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > PREVIEW_CHARS {
        let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        trimmed.to_string()
    }
}

/// Human-readable summary of a finished job
pub fn render_report(job: &ExecutionJob) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "\n📋 Job {} {}", job.job_id, job.status);

    if let Some(error) = &job.error {
        let _ = writeln!(out, "⚠️  {}", error);
    }

    let Some(result) = &job.result else {
        return out;
    };

    let _ = writeln!(out, "Verdict: {:?}", result.submission_status);

    if result.submission_status == SubmissionStatus::CompilationError {
        let _ = writeln!(out, "\n{}", result.output.trim_end());
        return out;
    }

    let _ = writeln!(out, "{:<6} {:<8} {:>10}  {}", "Test", "Result", "Time", "Output");
    let _ = writeln!(out, "{}", "─".repeat(60));

    for test in &result.test_case_results {
        let verdict = if test.timed_out {
            "⏱ TLE"
        } else if test.output_truncated {
            "✂ cut"
        } else if test.passed {
            "✅ pass"
        } else {
            "❌ fail"
        };

        let _ = writeln!(
            out,
            "{:<6} {:<8} {:>8} ms  {}",
            test.index,
            verdict,
            test.execution_time_ms,
            preview(&test.output)
        );

        if !test.passed && !test.timed_out && !test.output_truncated {
            let _ = writeln!(out, "{:>17}expected: {}", "", preview(&test.expected));
        }
        if !test.stderr.is_empty() {
            let _ = writeln!(out, "{:>17}stderr: {}", "", preview(&test.stderr));
        }
    }

    let _ = writeln!(out, "\n{}", result.output);
    out
}

/// List all configured languages
pub fn list_languages(path: &Path) -> Result<()> {
    let manager = LanguageConfigManager::load_or_builtin(path)?;

    println!("📋 Configured Languages:\n");
    println!("{:<10} {:<32} {:<10} {:<8} {:<6}",
             "Name", "Image", "Memory", "CPU", "Pids");
    println!("{}", "─".repeat(70));

    for language in manager.list_languages() {
        let config = manager.get_config(&language)?;
        println!("{:<10} {:<32} {:<10} {:<8.1} {:<6}",
                 language,
                 config.image,
                 format!("{} MB", config.memory_limit_mb),
                 config.cpu_limit,
                 config.pids_limit);
    }

    println!("\n✅ Total: {} language(s)", manager.list_languages().len());

    Ok(())
}
