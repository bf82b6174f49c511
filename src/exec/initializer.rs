/// Setup/teardown helper scoped to one candidate run
///
/// The helper is started before the candidate and released when the guard
/// drops, on every exit path of the run.
use crate::config::types::{HarnessError, Result};
use crate::exec::command::{split, RunContext};
use crate::kernel::signal;
use crate::safety::workspace::absolute;
use log::{debug, warn};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;

/// Time given to a run-till-end initializer to come up
const SETTLE_DELAY: Duration = Duration::from_millis(100);

pub struct Initializer {
    program: PathBuf,
    args: Vec<String>,
    fixture_args: [PathBuf; 3],
    ctx_env: Vec<(String, String)>,
    cwd: PathBuf,
    run_till_end: bool,
    /// Helper process kept alive until the guard drops (run-till-end only)
    background: Option<Child>,
    /// Set once `start` succeeded; nothing is released before that
    acquired: bool,
}

impl Initializer {
    /// Run `start`; in run-till-end mode leave it running after a short delay
    pub fn start(cmd: &str, problem_dir: &Path, ctx: &RunContext, run_till_end: bool) -> Result<Self> {
        let mut words = split(cmd)?;
        if words.is_empty() {
            return Err(HarnessError::Config("Initializer command is empty".to_string()));
        }
        let first = words.remove(0);
        let program = absolute(&problem_dir.join(first))?;

        let mut initializer = Initializer {
            program,
            args: words,
            fixture_args: [ctx.input.clone(), ctx.reference.clone(), ctx.info.clone()],
            ctx_env: ctx.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            cwd: ctx.run_dir.path().to_path_buf(),
            run_till_end,
            background: None,
            acquired: false,
        };

        // Drop is a no-op until start succeeded, so a failed start never runs stop
        let mut child = initializer.spawn("start")?;
        if run_till_end {
            std::thread::sleep(SETTLE_DELAY);
            initializer.background = Some(child);
        } else {
            let status = child.wait()?;
            if !status.success() {
                return Err(HarnessError::Config(format!(
                    "Failed to run initializer start {}",
                    status
                )));
            }
        }
        initializer.acquired = true;
        Ok(initializer)
    }

    fn spawn(&self, verb: &str) -> Result<Child> {
        debug!("Initializer {} {}", self.program.display(), verb);
        Command::new(&self.program)
            .args(&self.args)
            .arg(verb)
            .args(&self.fixture_args)
            .env_clear()
            .envs(self.ctx_env.iter().map(|(k, v)| (k, v)))
            .current_dir(&self.cwd)
            .spawn()
            .map_err(|e| {
                HarnessError::Config(format!(
                    "Failed to start initializer {}: {}",
                    self.program.display(),
                    e
                ))
            })
    }

    fn release(&mut self) -> Result<()> {
        if self.run_till_end {
            if let Some(mut child) = self.background.take() {
                let pid = Pid::from_raw(child.id() as i32);
                signal::interrupt(pid)?;
                child.wait()?;
            }
            return Ok(());
        }

        let status = self.spawn("stop")?.wait()?;
        if !status.success() {
            warn!("Failed to run initializer stop {}", status);
        }
        Ok(())
    }
}

impl Drop for Initializer {
    fn drop(&mut self) {
        if !self.acquired {
            return;
        }
        if let Err(e) = self.release() {
            warn!("Initializer release failed: {}", e);
        }
    }
}
