/// Resource accounting and limits for spawned processes
use crate::config::types::Result;
use nix::sys::resource::{getrusage, setrlimit, Resource, UsageWho};
use nix::sys::time::TimeVal;
use std::time::Duration;

fn timeval_to_duration(tv: TimeVal) -> Duration {
    Duration::from_secs(tv.tv_sec().max(0) as u64) + Duration::from_micros(tv.tv_usec().max(0) as u64)
}

/// User CPU time consumed by all waited-for descendants so far.
///
/// The runner samples this before and after a test; the difference is the
/// test's CPU usage, including grandchildren reaped through the subreaper.
pub fn children_user_time() -> Result<Duration> {
    let usage = getrusage(UsageWho::RUSAGE_CHILDREN)?;
    Ok(timeval_to_duration(usage.user_time()))
}

/// Tighten `RLIMIT_NPROC` for the calling process.
///
/// Runs between fork and exec, so it only performs the raw system call.
pub fn limit_process_count(max: u64) -> std::io::Result<()> {
    setrlimit(Resource::RLIMIT_NPROC, max, max).map_err(std::io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_time_is_monotonic() {
        let before = children_user_time().unwrap();
        let after = children_user_time().unwrap();
        assert!(after >= before);
    }

    #[test]
    fn test_timeval_conversion() {
        let tv = TimeVal::new(2, 500_000);
        assert_eq!(timeval_to_duration(tv), Duration::from_millis(2500));
    }
}
