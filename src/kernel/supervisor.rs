//! Process-tree supervision.
//!
//! The harness registers itself as the child subreaper of its subtree once
//! at startup. Descendants whose parent dies are then re-parented to the
//! harness instead of init, which keeps them visible in the process table
//! under our pid. After every test nothing may remain there.

use crate::config::types::{HarnessError, Result};
use crate::kernel::proc_table::{ProcTable, ProcessEntry};
use crate::kernel::signal;
use log::{debug, warn};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{getpid, Pid};
use std::sync::OnceLock;

/// How many offending processes are listed in an orphan report
pub const ORPHAN_SAMPLE: usize = 5;

static REGISTRATION: OnceLock<std::result::Result<(), nix::errno::Errno>> = OnceLock::new();

/// Proof that the subreaper registration happened.
///
/// Passed down the runner call chain so that orphan checks cannot run in a
/// process that never asked the kernel to re-parent orphans to it.
#[derive(Clone, Debug)]
pub struct ProcessSupervisor {
    pid: Pid,
    table: ProcTable,
}

impl ProcessSupervisor {
    /// Register as subreaper (idempotent for the lifetime of the process)
    pub fn register() -> Result<Self> {
        let outcome = REGISTRATION.get_or_init(|| {
            let result = nix::sys::prctl::set_child_subreaper(true);
            if result.is_ok() {
                debug!("Registered pid {} as child subreaper", getpid());
            }
            result
        });
        (*outcome).map_err(HarnessError::Nix)?;
        Ok(Self {
            pid: getpid(),
            table: ProcTable::default(),
        })
    }

    /// Live direct children of the harness.
    ///
    /// Zombies are reaped on the way: a descendant that already exited is
    /// not a leak, only an unreaped status.
    pub fn live_children(&self) -> Result<Vec<ProcessEntry>> {
        let mut live = Vec::new();
        for entry in self.table.children_of(self.pid)? {
            if entry.is_zombie() {
                let _ = waitpid(Pid::from_raw(entry.pid), Some(WaitPidFlag::WNOHANG));
                continue;
            }
            live.push(entry);
        }
        Ok(live)
    }

    /// Fail if any descendant outlived the test.
    ///
    /// Offenders are killed after being reported so that one leaking test
    /// does not poison the process table for the next one.
    pub fn verify_no_orphans(&self) -> Result<()> {
        let orphans = self.live_children()?;
        if orphans.is_empty() {
            return Ok(());
        }

        let shown = orphans.len().min(ORPHAN_SAMPLE);
        let sample = format!(
            "[{}]",
            orphans[..shown]
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        for orphan in &orphans {
            let pid = Pid::from_raw(orphan.pid);
            if let Err(e) = signal::kill_hard(pid) {
                warn!("Failed to kill orphan {}: {}", orphan.pid, e);
            }
            let _ = waitpid(pid, None);
        }

        Err(HarnessError::Orphans {
            count: orphans.len(),
            shown,
            sample,
        })
    }
}
