/// Signal delivery to candidate processes and helpers
use crate::config::types::Result;
use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;

/// Send `sig` to `pid`, treating an already-gone process as success
pub fn send(pid: Pid, sig: Signal) -> Result<()> {
    match signal::kill(pid, sig) {
        Ok(()) => {
            debug!("Sent {} to {}", sig, pid);
            Ok(())
        }
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Polite termination request (SIGTERM)
pub fn terminate(pid: Pid) -> Result<()> {
    send(pid, Signal::SIGTERM)
}

/// Interrupt, used to stop a run-till-end initializer (SIGINT)
pub fn interrupt(pid: Pid) -> Result<()> {
    send(pid, Signal::SIGINT)
}

/// Unconditional kill (SIGKILL)
pub fn kill_hard(pid: Pid) -> Result<()> {
    send(pid, Signal::SIGKILL)
}

/// Ignore SIGPIPE so that writes to a closed socket surface as `EPIPE`
pub fn ignore_sigpipe() -> Result<()> {
    // SAFETY: installing SIG_IGN has no handler code that could be unsafe
    unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) }?;
    Ok(())
}
