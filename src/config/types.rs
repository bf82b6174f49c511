/// Core types shared by the runner, sandbox and interactor
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that switches the harness into pipeline (CI) mode
pub const PIPELINE_ENV: &str = "GITLAB_CI";
/// Tolerance used by the numeric checkers
pub const EPS_ENV: &str = "EPS";
/// Default real-time limit for tests without `time_limit_ms`
pub const REAL_TIME_LIMIT_ENV: &str = "EJUDGE_REAL_TIME_LIMIT_MS";
/// Variable handed to external checkers with the fixture base directory
pub const DIRENT_ENV: &str = "DIRENT";

/// Placeholder substituted with the problem directory
pub const PROBLEM_DIR_PLACEHOLDER: &str = "${problem.problem_dir}";

/// Error taxonomy of the harness.
///
/// Variants map onto the handling categories used by the runner: whether a
/// failure is retried, whether it may be skipped locally, and whether it
/// signals a violation of harness integrity.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Candidate(String),

    #[error("Time limit exceeded: {0}")]
    TimeLimit(String),

    #[error("Found {count} orphan processes. First {shown} of them are: {sample}")]
    Orphans {
        count: usize,
        shown: usize,
        sample: String,
    },

    #[error("Test output tampering detected: {}", .path.display())]
    Tampered { path: PathBuf },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarnessError {
    /// Failures caused by the candidate or its timing are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Candidate(_) | Self::TimeLimit(_))
    }

    /// Orphaned descendants and reference tampering are never forgiven
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Orphans { .. } | Self::Tampered { .. })
    }

    /// Only plain candidate failures may be downgraded by `--may-fail-local`
    pub fn is_locally_skippable(&self) -> bool {
        matches!(self, Self::Candidate(_))
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Snapshot of the environment variables the harness reacts to
#[derive(Clone, Debug, PartialEq)]
pub struct HarnessEnv {
    /// Strict mode: no locally-allowed failures, hard time limits, identity switch allowed
    pub pipeline: bool,
    /// Absolute tolerance for numeric checkers
    pub eps: f64,
    /// Time limit applied when the metadata does not specify one
    pub default_time_limit: Duration,
}

impl Default for HarnessEnv {
    fn default() -> Self {
        HarnessEnv {
            pipeline: false,
            eps: 0.0,
            default_time_limit: Duration::from_secs(1),
        }
    }
}

impl HarnessEnv {
    /// Read the snapshot from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the snapshot from an arbitrary lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = HarnessEnv::default();

        env.pipeline = lookup(PIPELINE_ENV).is_some_and(|v| !v.is_empty());

        if let Some(raw) = lookup(EPS_ENV) {
            env.eps = raw.trim().parse::<f64>().map_err(|e| {
                HarnessError::Config(format!("{EPS_ENV}={raw:?} is not a number: {e}"))
            })?;
        }

        if let Some(raw) = lookup(REAL_TIME_LIMIT_ENV) {
            let ms = raw.trim().parse::<u64>().map_err(|e| {
                HarnessError::Config(format!("{REAL_TIME_LIMIT_ENV}={raw:?} is not an integer: {e}"))
            })?;
            env.default_time_limit = Duration::from_millis(ms);
        }

        Ok(env)
    }
}

/// Options of one suite run, resolved from the command line
#[derive(Clone, Debug)]
pub struct RunnerOptions {
    /// Directory the suite runs in; relative paths resolve against it
    pub problem_dir: PathBuf,
    /// Directory holding `*.dat` fixtures
    pub tests_dir: PathBuf,
    /// Record produced output as the new reference instead of checking it
    pub prepare_answers: bool,
    /// File the candidate writes its answer to, relative to the run directory
    pub output_file: Option<String>,
    /// Command line used to start the candidate
    pub run_cmd: String,
    /// Checker selector (`cmp`, `sorted-lines`, ... or a path to a program)
    pub checker: String,
    /// Interactor program driving interactive tests
    pub interactor: Option<PathBuf>,
    /// Setup/teardown helper
    pub initializer: Option<String>,
    /// Keep the initializer alive during the run and interrupt it afterwards
    pub initializer_run_till_end: bool,
    /// Tests whose failures are tolerated outside pipeline mode
    pub may_fail_local: Vec<String>,
    /// Run the candidate as this OS user (pipeline mode only)
    pub user: Option<String>,
    /// Token in the command line standing for the input fixture
    pub input_filename: String,
    /// Copy the fixture directory instead of symlinking its entries
    pub static_copy: bool,
    /// Number of times the whole suite is repeated
    pub retests_count: u32,
    /// Attempts per test before the failure propagates
    pub retries_count: u32,
    /// Where to write the JSON suite report
    pub report: Option<PathBuf>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            problem_dir: PathBuf::from("."),
            tests_dir: PathBuf::from("tests"),
            prepare_answers: false,
            output_file: None,
            run_cmd: "./solution".to_string(),
            checker: "cmp".to_string(),
            interactor: None,
            initializer: None,
            initializer_run_till_end: false,
            may_fail_local: Vec::new(),
            user: None,
            input_filename: "input.txt".to_string(),
            static_copy: false,
            retests_count: 1,
            retries_count: 1,
            report: None,
        }
    }
}

impl RunnerOptions {
    /// Apply the pipeline-mode policy: no local skips in CI, no identity
    /// switch outside of it
    pub fn apply_env_policy(&mut self, env: &HarnessEnv) {
        if env.pipeline {
            self.may_fail_local.clear();
        } else {
            self.user = None;
        }
    }

    pub fn may_fail_locally(&self, test_name: &str) -> bool {
        self.may_fail_local.iter().any(|name| name == test_name)
    }
}

/// One fixture of the suite; all paths are absolute
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    /// File stem shared by the fixture files (`001` for `001.dat`)
    pub name: String,
    pub input: PathBuf,
    pub reference: PathBuf,
    /// Metadata record; may not exist
    pub info: PathBuf,
    /// Directory overlaid into the run directory; may not exist
    pub fixture_dir: PathBuf,
}

/// Final status of one test in the suite report
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TestStatus {
    #[serde(rename = "passed")]
    Passed,
    #[serde(rename = "skipped")]
    Skipped,
    #[serde(rename = "failed")]
    Failed,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Skipped => write!(f, "skipped"),
            TestStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One line of the suite report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub attempts: u32,
    pub status: TestStatus,
    pub cpu_time_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Machine-readable summary of a suite run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SuiteReport {
    pub passed: bool,
    pub pipeline: bool,
    pub tests: Vec<TestReport>,
}
