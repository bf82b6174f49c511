//! Integration tests for the suite runner
//!
//! These run real candidates (`/bin/sh` scripts) through the full pipeline:
//! run directory, sandbox, checker, checksum, time and orphan checks.
//! Orphan detection looks at every child of this process, so the tests are
//! serialised.

use judgebox::config::types::{HarnessEnv, HarnessError, RunnerOptions, SuiteReport, TestStatus};
use judgebox::runner::SuiteRunner;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

struct Problem {
    dir: tempfile::TempDir,
}

impl Problem {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();
        Problem { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn file(&self, rel: &str, content: &str) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel)).unwrap()
    }

    fn options(&self) -> RunnerOptions {
        RunnerOptions {
            problem_dir: self.path().to_path_buf(),
            ..RunnerOptions::default()
        }
    }

    fn run(&self, options: RunnerOptions) -> (Result<(), HarnessError>, SuiteReport) {
        self.run_with_env(options, HarnessEnv::default())
    }

    fn run_with_env(
        &self,
        options: RunnerOptions,
        env: HarnessEnv,
    ) -> (Result<(), HarnessError>, SuiteReport) {
        let mut report = SuiteReport::default();
        let result = SuiteRunner::new(options, env).and_then(|runner| runner.run(&mut report));
        (result, report)
    }
}

#[test]
fn test_cmp_pass() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "read a b c\necho $(( (a + b + c) % 2 ))");
    problem.file("tests/001.dat", "2 1 5\n");
    problem.file("tests/001.ans", "0\n");

    let (result, report) = problem.run(problem.options());
    result.unwrap();
    assert!(report.passed);
    assert_eq!(report.tests.len(), 1);
    assert_eq!(report.tests[0].status, TestStatus::Passed);
    assert_eq!(report.tests[0].attempts, 1);
}

#[test]
fn test_cmp_mismatch_keeps_output() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 1");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        retries_count: 2,
        ..problem.options()
    };
    let (result, report) = problem.run(options);
    let err = result.unwrap_err();
    assert!(matches!(err, HarnessError::Candidate(_)));
    assert!(err.to_string().contains("001"));
    assert!(!report.passed);
    assert_eq!(report.tests[0].status, TestStatus::Failed);
    assert_eq!(report.tests[0].attempts, 2);
    assert_eq!(problem.read("run/output"), "1\n");
}

#[test]
fn test_orphan_fails_correct_solution() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "(sleep 30 >/dev/null 2>&1 &)\necho 0");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        retries_count: 3,
        ..problem.options()
    };
    let (result, report) = problem.run(options);
    match result {
        Err(HarnessError::Orphans { count, sample, .. }) => {
            assert!(count >= 1);
            assert!(sample.contains("sleep"), "{sample}");
        }
        other => panic!("expected orphans, got {:?}", other),
    }
    // integrity violations are not retried
    assert_eq!(report.tests[0].attempts, 1);
}

#[test]
fn test_reference_tampering_detected() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 1 > ../tests/001.ans\necho 1");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        retries_count: 3,
        ..problem.options()
    };
    let (result, report) = problem.run(options);
    let err = result.unwrap_err();
    assert!(matches!(err, HarnessError::Tampered { .. }), "{err:?}");
    assert!(err.is_integrity_violation());
    assert_eq!(report.tests[0].attempts, 1);
}

#[test]
fn test_no_tests_is_an_error() {
    let _guard = serial();
    let problem = Problem::new();
    let (result, _) = problem.run(problem.options());
    assert!(matches!(result, Err(HarnessError::Config(msg)) if msg == "No tests were found"));
}

#[test]
fn test_missing_answer_is_configuration_error() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 0");
    problem.file("tests/001.dat", "");

    let (result, report) = problem.run(problem.options());
    assert!(matches!(result, Err(HarnessError::Config(msg)) if msg.contains("No answer for test 001")));
    assert!(report.tests.is_empty());
}

#[test]
fn test_prepare_answers_writes_reference() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "cat");
    problem.file("tests/001.dat", "alpha\n");
    problem.file("tests/002.dat", "beta\n");
    problem.file("tests/002.ans", "stale\n");

    let options = RunnerOptions {
        prepare_answers: true,
        ..problem.options()
    };
    let (result, _) = problem.run(options);
    result.unwrap();
    assert_eq!(problem.read("tests/001.ans"), "alpha\n");
    assert_eq!(problem.read("tests/002.ans"), "beta\n");
}

#[test]
fn test_exit_code_pattern_and_local_skip() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 0\nexit 3");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");
    problem.file("tests/001.inf", "exit_code = !0\n");
    problem.file("tests/002.dat", "");
    problem.file("tests/002.ans", "0\n");

    let (result, _) = problem.run(problem.options());
    assert!(matches!(result, Err(HarnessError::Candidate(msg)) if msg.contains("code 3 on test 002")));

    let options = RunnerOptions {
        may_fail_local: vec!["002".to_string()],
        ..problem.options()
    };
    let (result, report) = problem.run(options.clone());
    result.unwrap();
    assert_eq!(report.tests[0].status, TestStatus::Passed);
    assert_eq!(report.tests[1].status, TestStatus::Skipped);

    // the pipeline ignores local allowances
    let env = HarnessEnv {
        pipeline: true,
        ..HarnessEnv::default()
    };
    let (result, _) = problem.run_with_env(options, env);
    assert!(result.is_err());
}

#[test]
fn test_params_environment_and_stderr() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo \"$1 $2 $GREETING\" >&2");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "x y hello\n");
    problem.file(
        "tests/001.inf",
        "params = x y\nenviron = \"GREETING=hello\"\ncheck_stderr\ncomment = stderr is the output\n",
    );

    let (result, _) = problem.run(problem.options());
    result.unwrap();
}

#[test]
fn test_fixture_directory_symlinked_or_copied() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "cat data.txt\necho mutated > data.txt");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "payload\n");
    problem.file("tests/001.dir/data.txt", "payload\n");

    let options = RunnerOptions {
        static_copy: true,
        ..problem.options()
    };
    let (result, _) = problem.run(options);
    result.unwrap();
    assert_eq!(problem.read("tests/001.dir/data.txt"), "payload\n");
    assert_eq!(problem.read("run/data.txt"), "mutated\n");
}

#[test]
fn test_output_file_convention() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 42 > out.txt");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "42\n");

    let options = RunnerOptions {
        output_file: Some("out.txt".to_string()),
        ..problem.options()
    };
    let (result, _) = problem.run(options.clone());
    result.unwrap();
    assert!(!problem.path().join("run/out.txt").exists());

    problem.script("solution", "echo noise\necho 42 > out.txt");
    let (result, _) = problem.run(options);
    assert!(matches!(result, Err(HarnessError::Candidate(msg)) if msg.starts_with("Unexpected output")));
}

#[test]
fn test_external_checker() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 7");
    problem.script(
        "check.sh",
        "[ \"$(cat \"$3\")\" = \"$(cat \"$4\")\" ] && [ \"$5\" = 0 ] && [ -n \"$DIRENT\" ]",
    );
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "7\n");

    let checker = problem.path().join("check.sh").display().to_string();
    let options = RunnerOptions {
        checker: checker.clone(),
        ..problem.options()
    };
    let (result, _) = problem.run(options.clone());
    result.unwrap();
    assert_eq!(problem.read("run/fake-output.txt"), "7\n");

    problem.script("solution", "echo 8");
    let (result, _) = problem.run(options);
    assert!(matches!(result, Err(HarnessError::Candidate(msg)) if msg == "Test 001 failed"));
}

#[test]
fn test_unknown_checker_rejected() {
    let _guard = serial();
    let problem = Problem::new();
    let options = RunnerOptions {
        checker: "cmp-hex".to_string(),
        ..problem.options()
    };
    let (result, _) = problem.run(options);
    assert!(matches!(result, Err(HarnessError::Config(_))));
}

#[test]
fn test_initializer_start_and_stop() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 0");
    problem.script("init.sh", "echo \"$1\" >> ../init.log");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        initializer: Some("init.sh".to_string()),
        ..problem.options()
    };
    let (result, _) = problem.run(options);
    result.unwrap();
    assert_eq!(problem.read("init.log"), "start\nstop\n");
}

#[test]
fn test_initializer_stops_even_when_candidate_fails() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "exit 1");
    problem.script("init.sh", "echo \"$1\" >> ../init.log");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        initializer: Some("init.sh".to_string()),
        ..problem.options()
    };
    let (result, _) = problem.run(options);
    assert!(result.is_err());
    assert_eq!(problem.read("init.log"), "start\nstop\n");
}

#[test]
fn test_failed_initializer_start_skips_stop() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 0");
    problem.script(
        "init.sh",
        "echo \"$1\" >> ../init.log\n[ \"$1\" = stop ] || exit 1",
    );
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        initializer: Some("init.sh".to_string()),
        ..problem.options()
    };
    let (result, _) = problem.run(options);
    assert!(matches!(result, Err(HarnessError::Config(msg)) if msg.starts_with("Failed to run initializer start")));
    assert_eq!(problem.read("init.log"), "start\n");
}

#[test]
fn test_initializer_run_till_end_is_interrupted() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 0");
    problem.script(
        "init.sh",
        "trap 'echo interrupted >> ../init.log; exit 0' INT\necho \"$1\" >> ../init.log\nwhile :; do sleep 0.05; done",
    );
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        initializer: Some("init.sh".to_string()),
        initializer_run_till_end: true,
        ..problem.options()
    };
    let (result, _) = problem.run(options);
    result.unwrap();
    assert_eq!(problem.read("init.log"), "start\ninterrupted\n");
}

#[test]
fn test_time_limit_is_fatal_only_in_pipeline() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script(
        "solution",
        "i=0\nwhile [ $i -lt 300000 ]; do i=$((i + 1)); done\necho 0",
    );
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");
    problem.file("tests/001.inf", "time_limit_ms = 1\n");

    let (result, _) = problem.run(problem.options());
    result.unwrap();

    let env = HarnessEnv {
        pipeline: true,
        ..HarnessEnv::default()
    };
    let (result, _) = problem.run_with_env(problem.options(), env);
    assert!(matches!(result, Err(HarnessError::TimeLimit(_))));
}

#[test]
fn test_interactive_wiring() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "read x\necho \"got $x\"");
    problem.script("interactor.sh", "echo ping\nread reply\necho \"$reply\" > \"$2\"");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "got ping\n");

    let options = RunnerOptions {
        interactor: Some(PathBuf::from("interactor.sh")),
        ..problem.options()
    };
    let (result, _) = problem.run(options.clone());
    result.unwrap();

    problem.script("interactor.sh", "echo broken > \"$2\"\nexit 1");
    let (result, _) = problem.run(options);
    assert!(matches!(result, Err(HarnessError::Candidate(msg)) if msg.contains("Interactor failed with code 1")));
}

#[test]
fn test_scripted_interactor_binary_in_suite() {
    let _guard = serial();
    let problem = Problem::new();
    let socket = problem.path().join("candidate.sock");
    problem.script("solution", "echo hello");
    problem.file("tests/001.dat", "# the candidate only talks through stdout\n");
    problem.file("tests/001.ans", "hello\n");
    problem.file("tests/001.inf", &format!("params = 1 {}\n", socket.display()));

    let options = RunnerOptions {
        interactor: Some(PathBuf::from(env!("CARGO_BIN_EXE_judgebox-interactor"))),
        ..problem.options()
    };
    let (result, _) = problem.run(options.clone());
    result.unwrap();

    // nobody listens on the socket: presentation error from the interactor
    problem.file("tests/001.dat", "a type unix\na send hi\n");
    let (result, _) = problem.run(options);
    assert!(matches!(result, Err(HarnessError::Candidate(msg)) if msg.contains("Interactor failed with code 2")));
    assert!(problem.read("run/output").contains("a: starting connection"));
}

#[test]
fn test_retests_repeat_the_suite() {
    let _guard = serial();
    let problem = Problem::new();
    problem.script("solution", "echo 0");
    problem.file("tests/001.dat", "");
    problem.file("tests/001.ans", "0\n");

    let options = RunnerOptions {
        retests_count: 3,
        ..problem.options()
    };
    let (result, report) = problem.run(options);
    result.unwrap();
    assert_eq!(report.tests.len(), 3);
}
