//! Test suite runner
//!
//! Runs every fixture in name order, enforcing the per-test contracts that
//! sit around one sandboxed execution: reference integrity, CPU time and
//! leaked descendants. Candidate failures are retried; integrity violations
//! and configuration errors abort the suite at once.

pub mod discovery;

use crate::config::metadata::TestConfig;
use crate::config::types::{
    HarnessEnv, HarnessError, Result, RunnerOptions, SuiteReport, TestCase, TestReport, TestStatus,
};
use crate::exec::sandbox::{RunOutcome, Sandbox};
use crate::kernel::rlimit::children_user_time;
use crate::kernel::supervisor::ProcessSupervisor;
use crate::safety::checksum::ReferenceChecksum;
use crate::verdict::checker::Checker;
use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// One successful attempt
struct Attempt {
    outcome: RunOutcome,
    cpu_time: Duration,
}

pub struct SuiteRunner {
    options: RunnerOptions,
    env: HarnessEnv,
    checker: Checker,
    supervisor: ProcessSupervisor,
}

impl SuiteRunner {
    /// Resolve the checker and register as subreaper
    pub fn new(mut options: RunnerOptions, env: HarnessEnv) -> Result<Self> {
        options.apply_env_policy(&env);
        let checker = Checker::from_selector(&options.checker)?;
        let supervisor = ProcessSupervisor::register()?;
        Ok(SuiteRunner {
            options,
            env,
            checker,
            supervisor,
        })
    }

    /// Run the suite `retests_count` times, recording results into `report`
    pub fn run(&self, report: &mut SuiteReport) -> Result<()> {
        report.pipeline = self.env.pipeline;
        for round in 0..self.options.retests_count.max(1) {
            println!("Trying tests #{}", round);
            self.run_round(report)?;
        }
        report.passed = true;
        println!("All tests passed");
        Ok(())
    }

    fn run_round(&self, report: &mut SuiteReport) -> Result<()> {
        let cases = discovery::discover(&self.options.problem_dir, &self.options.tests_dir)?;
        if cases.is_empty() {
            return Err(HarnessError::Config("No tests were found".to_string()));
        }

        let checksums = cases
            .iter()
            .map(|case| self.reference_checksum(case))
            .collect::<Result<Vec<_>>>()?;

        for (case, checksum) in cases.iter().zip(&checksums) {
            let result = self.run_test(case, checksum.as_ref());
            match result {
                Ok(test_report) => report.tests.push(test_report),
                Err((test_report, e)) => {
                    report.tests.push(test_report);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn reference_checksum(&self, case: &TestCase) -> Result<Option<ReferenceChecksum>> {
        if case.reference.is_file() {
            return ReferenceChecksum::capture(&case.reference).map(Some);
        }
        if self.options.prepare_answers {
            return Ok(None);
        }
        Err(HarnessError::Config(format!("No answer for test {}", case.name)))
    }

    fn run_test(
        &self,
        case: &TestCase,
        checksum: Option<&ReferenceChecksum>,
    ) -> std::result::Result<TestReport, (TestReport, HarnessError)> {
        info!("Running test {}", case.name);
        let mut report = TestReport {
            name: case.name.clone(),
            attempts: 0,
            status: TestStatus::Failed,
            cpu_time_secs: 0.0,
            error: None,
        };

        let config = match TestConfig::load(&case.info) {
            Ok(config) => config,
            Err(e) => {
                report.error = Some(e.to_string());
                return Err((report, e));
            }
        };

        let retries = self.options.retries_count.max(1);
        for attempt in 0..retries {
            report.attempts = attempt + 1;
            match self.attempt(case, &config, checksum) {
                Ok(done) => {
                    report.cpu_time_secs = done.cpu_time.as_secs_f64();
                    report.status = if done.outcome.skipped {
                        TestStatus::Skipped
                    } else {
                        TestStatus::Passed
                    };
                    if self.options.prepare_answers {
                        if let Err(e) = fs::write(&case.reference, &done.outcome.output) {
                            let e = HarnessError::from(e);
                            report.status = TestStatus::Failed;
                            report.error = Some(e.to_string());
                            return Err((report, e));
                        }
                    }
                    return Ok(report);
                }
                Err(e) => {
                    if e.is_integrity_violation() {
                        error!("Integrity violation on test {}: {}", case.name, e);
                    }
                    let will_retry =
                        attempt + 1 < retries && e.is_retryable() && !e.is_integrity_violation();
                    println!(
                        "Attempt {} failed with {},{} going to retry",
                        attempt,
                        e,
                        if will_retry { "" } else { " not" }
                    );
                    if !will_retry {
                        report.error = Some(e.to_string());
                        return Err((report, e));
                    }
                }
            }
        }
        let e = HarnessError::Internal("Retry loop exhausted".to_string());
        report.error = Some(e.to_string());
        Err((report, e))
    }

    /// One sandboxed run followed by the integrity, time and orphan checks
    fn attempt(
        &self,
        case: &TestCase,
        config: &TestConfig,
        checksum: Option<&ReferenceChecksum>,
    ) -> Result<Attempt> {
        let before = children_user_time()?;
        let sandbox = Sandbox::new(&self.options, &self.env, &self.checker);
        let run = sandbox.run(case, config);

        // Leaked descendants are reported even when the run itself failed
        let orphans = self.supervisor.verify_no_orphans();
        let outcome = match (run, orphans) {
            (_, Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Ok(outcome), Ok(())) => outcome,
        };

        if let Some(checksum) = checksum {
            checksum.verify()?;
        }

        let cpu_time = children_user_time()?.saturating_sub(before);
        let limit = config.time_limit_or(self.env.default_time_limit);
        check_time(cpu_time, limit, self.env.pipeline)?;

        Ok(Attempt { outcome, cpu_time })
    }
}

/// Hard failure in pipeline mode, a printed warning otherwise
fn check_time(used: Duration, limit: Duration, pipeline: bool) -> Result<()> {
    if used <= limit {
        return Ok(());
    }
    let message = format!(
        "Time limit exceed: {} > {} secs",
        used.as_secs_f64(),
        limit.as_secs_f64()
    );
    if pipeline {
        return Err(HarnessError::TimeLimit(message));
    }
    println!("ERROR: {}", message);
    warn!("{}", message);
    Ok(())
}

/// Write the machine-readable suite report
pub fn write_report(path: &Path, report: &SuiteReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| HarnessError::Internal(format!("Failed to serialize report: {}", e)))?;
    fs::write(path, json)?;
    info!("Report written to {}", path.display());
    Ok(())
}
