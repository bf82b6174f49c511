/// Candidate execution
/// One call of [`Sandbox::run`] materialises the run directory, starts the
/// initializer, runs the candidate (optionally wired to an interactor),
/// verifies its exit code and hands the produced output to the checker.
use crate::config::metadata::TestConfig;
use crate::config::types::{HarnessEnv, HarnessError, Result, RunnerOptions, TestCase};
use crate::exec::command::{join, RunContext};
use crate::exec::initializer::Initializer;
use crate::kernel::proc_table::ProcTable;
use crate::kernel::{rlimit, signal};
use crate::safety::workspace::{absolute, OverlayMode, RunDirectory};
use crate::verdict::checker::{CheckRequest, Checker};
use log::{debug, info};
use nix::unistd::Pid;
use std::fs::{self, File};
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

/// Name of the per-suite run directory inside the problem directory
pub const RUN_DIR_NAME: &str = "run";
/// Captured output handed to external checkers when no output file is configured
pub const FAKE_OUTPUT_FILE: &str = "fake-output.txt";
/// Conversation log written by the interactor, relative to the run directory
pub const INTERACTOR_OUTPUT_FILE: &str = "output";

const CHILD_LOOKUP_ATTEMPTS: u32 = 10;
const CHILD_LOOKUP_DELAY: Duration = Duration::from_millis(100);

/// Result of one candidate run that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Produced answer (captured stream, output file or interactor log)
    pub output: Vec<u8>,
    /// Exit code, or the negated signal number for a signal death
    pub exit_code: i32,
    /// A failure was tolerated because the test may fail locally
    pub skipped: bool,
}

impl RunOutcome {
    fn skipped(output: Vec<u8>, exit_code: i32) -> Self {
        RunOutcome {
            output,
            exit_code,
            skipped: true,
        }
    }
}

/// Exit code of a finished process; signal deaths map to `-signo`
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => -sig,
        (None, None) => -1,
    }
}

pub struct Sandbox<'a> {
    options: &'a RunnerOptions,
    env: &'a HarnessEnv,
    checker: &'a Checker,
    procs: ProcTable,
}

impl<'a> Sandbox<'a> {
    pub fn new(options: &'a RunnerOptions, env: &'a HarnessEnv, checker: &'a Checker) -> Self {
        Sandbox {
            options,
            env,
            checker,
            procs: ProcTable::default(),
        }
    }

    fn run_dir_path(&self) -> PathBuf {
        self.options.problem_dir.join(RUN_DIR_NAME)
    }

    /// Execute `case` once and check its output
    pub fn run(&self, case: &TestCase, config: &TestConfig) -> Result<RunOutcome> {
        let mode = OverlayMode::from_static_copy(self.options.static_copy);
        let run_dir = RunDirectory::build(&case.fixture_dir, mode, &self.run_dir_path())?;
        let ctx = RunContext::build(self.options, config, case, run_dir)?;
        println!("{}", ctx.display);

        let _initializer = match &self.options.initializer {
            Some(cmd) => Some(Initializer::start(
                cmd,
                &self.options.problem_dir,
                &ctx,
                self.options.initializer_run_till_end,
            )?),
            None => None,
        };

        let (captured, status) = match &self.options.interactor {
            Some(interactor) => match self.run_interactive(case, config, &ctx, interactor)? {
                Interactive::Finished(output, status) => (output, status),
                Interactive::Tolerated(output, status) => {
                    return Ok(RunOutcome::skipped(output, exit_code_of(status)));
                }
            },
            None => self.run_plain(config, &ctx)?,
        };
        let exit_code = exit_code_of(status);

        if self.checker.checks_exit_code() && !config.exit_code.matches(exit_code) {
            let message = format!(
                "Solution failed with code {} on test {}, expected: {}",
                exit_code, case.name, config.exit_code
            );
            if self.options.may_fail_locally(&case.name) {
                println!("{}", message);
                println!("May fail local. Skipped");
                return Ok(RunOutcome::skipped(captured, exit_code));
            }
            println!("{}", String::from_utf8_lossy(&captured));
            return Err(HarnessError::Candidate(message));
        }

        let output_file = self.options.output_file.as_deref();
        let produced = match output_file {
            Some(name) if !self.checker.is_external() || self.options.prepare_answers => {
                if !captured.is_empty() {
                    return Err(HarnessError::Candidate(format!(
                        "Unexpected output on test {}",
                        case.name
                    )));
                }
                read_produced(&ctx.run_dir.join(name), &case.name)?
            }
            _ => captured,
        };

        let mut skipped = false;
        if !self.options.prepare_answers {
            let checked_file = match output_file {
                Some(name) => {
                    if self.checker.is_external() && !produced.is_empty() {
                        return Err(HarnessError::Candidate(format!(
                            "Unexpected output on test {}",
                            case.name
                        )));
                    }
                    name
                }
                None => {
                    if self.checker.is_external() {
                        fs::write(ctx.run_dir.join(FAKE_OUTPUT_FILE), &produced)?;
                    }
                    FAKE_OUTPUT_FILE
                }
            };

            let problem_dir = absolute(&self.options.problem_dir)?;
            let request = CheckRequest {
                test_name: &case.name,
                info: &ctx.info,
                input: &ctx.input,
                reference: &ctx.reference,
                output_file: checked_file,
                exit_code,
                problem_dir: &problem_dir,
                fixture_dir: &case.fixture_dir,
                run_dir: ctx.run_dir.path(),
                eps: self.env.eps,
            };
            if let Err(e) = self.checker.check(&request, &produced) {
                if e.is_locally_skippable() && self.options.may_fail_locally(&case.name) {
                    println!("Test {} skipped", case.name);
                    skipped = true;
                } else {
                    return Err(e);
                }
            }
        }

        if let Some(name) = output_file {
            remove_if_exists(&ctx.run_dir.join(name))?;
        }

        Ok(RunOutcome {
            output: produced,
            exit_code,
            skipped,
        })
    }

    /// Prepare the candidate command: own session, tightened limits
    fn candidate_command(&self, config: &TestConfig, ctx: &RunContext) -> Command {
        let mut command = Command::new(&ctx.executable);
        command
            .arg0(&ctx.argv[0])
            .args(&ctx.argv[1..])
            .env_clear()
            .envs(&ctx.env)
            .current_dir(ctx.run_dir.path());

        let nproc = if self.env.pipeline {
            config.max_process_count
        } else {
            None
        };
        if let Some(max) = nproc {
            debug!("Limiting candidate to {} processes", max);
        }
        // SAFETY: only async-signal-safe system calls run between fork and exec
        unsafe {
            command.pre_exec(move || {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                if let Some(max) = nproc {
                    rlimit::limit_process_count(max)?;
                }
                Ok(())
            });
        }
        command
    }

    fn spawn_candidate(&self, command: &mut Command, ctx: &RunContext) -> Result<Child> {
        command.spawn().map_err(|e| {
            HarnessError::Candidate(format!(
                "Failed to start {}: {}",
                ctx.executable.display(),
                e
            ))
        })
    }

    fn run_plain(&self, config: &TestConfig, ctx: &RunContext) -> Result<(Vec<u8>, ExitStatus)> {
        let input = File::open(&ctx.input).map_err(|e| {
            HarnessError::Config(format!("Failed to open input {}: {}", ctx.input.display(), e))
        })?;
        let mut command = self.candidate_command(config, ctx);
        command.stdin(Stdio::from(input));
        if config.check_stderr {
            info!("Use stderr instead of stdout");
            command.stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::piped());
        }

        let output = self.spawn_candidate(&mut command, ctx)?.wait_with_output()?;
        let captured = if config.check_stderr {
            output.stderr
        } else {
            output.stdout
        };
        Ok((captured, output.status))
    }

    fn run_interactive(
        &self,
        case: &TestCase,
        config: &TestConfig,
        ctx: &RunContext,
        interactor: &Path,
    ) -> Result<Interactive> {
        let interactor_abs = absolute(&self.options.problem_dir.join(interactor))?;
        let interactor_rel = ctx.run_dir.relative(&interactor_abs)?;

        let mut command = self.candidate_command(config, ctx);
        command.stdin(Stdio::piped());
        if config.check_stderr {
            info!("Use stderr instead of stdout");
            command.stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::piped());
        }
        let mut candidate = self.spawn_candidate(&mut command, ctx)?;

        let pid = Pid::from_raw(candidate.id() as i32);
        let target = if self.options.user.is_some() {
            match self.procs.wait_for_child(pid, CHILD_LOOKUP_ATTEMPTS, CHILD_LOOKUP_DELAY) {
                Ok(child) => child,
                Err(e) => {
                    println!("Failed to start solution {:?}", candidate.try_wait().ok().flatten());
                    signal::kill_hard(pid)?;
                    candidate.wait()?;
                    return Err(e);
                }
            }
        } else {
            pid
        };

        let to_interactor: Stdio = match (candidate.stdout.take(), candidate.stderr.take()) {
            (Some(stdout), _) => stdout.into(),
            (None, Some(stderr)) => stderr.into(),
            (None, None) => return Err(HarnessError::Internal("Candidate stream not captured".to_string())),
        };
        let from_interactor: Stdio = candidate
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Internal("Candidate stdin not captured".to_string()))?
            .into();

        let info_arg = if ctx.info.is_file() {
            ctx.info.display().to_string()
        } else {
            String::new()
        };
        let argv = vec![
            interactor_rel,
            ctx.input.display().to_string(),
            INTERACTOR_OUTPUT_FILE.to_string(),
            ctx.reference.display().to_string(),
            target.to_string(),
            info_arg,
        ];
        println!("{}", join(&argv));

        let mut env = ctx.env.clone();
        env.extend(config.interactor_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let spawned = Command::new(&interactor_abs)
            .arg0(&argv[0])
            .args(&argv[1..])
            .env_clear()
            .envs(&env)
            .current_dir(ctx.run_dir.path())
            .stdin(to_interactor)
            .stdout(from_interactor)
            .spawn();
        let mut driver = match spawned {
            Ok(child) => child,
            Err(e) => {
                signal::kill_hard(pid)?;
                candidate.wait()?;
                return Err(HarnessError::Config(format!(
                    "Failed to start interactor {}: {}",
                    interactor_abs.display(),
                    e
                )));
            }
        };

        let candidate_status = candidate.wait()?;
        let interactor_status = driver.wait()?;
        debug!(
            "Candidate exited with {}, interactor with {}",
            candidate_status, interactor_status
        );

        let log_path = ctx.run_dir.join(INTERACTOR_OUTPUT_FILE);
        if !interactor_status.success() {
            let message = format!(
                "Interactor failed with code {} on test {}",
                exit_code_of(interactor_status),
                case.name
            );
            if self.options.may_fail_locally(&case.name) {
                println!("{}", message);
                println!("May fail local. Skipped");
                let log = fs::read(&log_path).unwrap_or_default();
                return Ok(Interactive::Tolerated(log, candidate_status));
            }
            if let Ok(log) = fs::read(&log_path) {
                println!("{}", String::from_utf8_lossy(&log));
                println!();
            }
            return Err(HarnessError::Candidate(message));
        }

        let log = read_produced(&log_path, &case.name)?;
        Ok(Interactive::Finished(log, candidate_status))
    }
}

enum Interactive {
    Finished(Vec<u8>, ExitStatus),
    Tolerated(Vec<u8>, ExitStatus),
}

fn read_produced(path: &Path, test_name: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        HarnessError::Candidate(format!(
            "No output {} on test {}: {}",
            path.display(),
            test_name,
            e
        ))
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_of_signal_death() {
        assert_eq!(exit_code_of(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code_of(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code_of(ExitStatus::from_raw(libc::SIGKILL)), -libc::SIGKILL);
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_if_exists(&dir.path().join("absent")).is_ok());
    }
}
