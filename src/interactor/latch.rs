/// Barrier shared by the connections known when it was declared
use super::{InteractError, InteractResult};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

#[derive(Debug)]
pub struct Latch {
    id: usize,
    remaining: AtomicUsize,
    released: watch::Sender<bool>,
}

impl Latch {
    /// A latch expecting zero arrivals starts released
    pub fn new(id: usize, expected: usize) -> Self {
        let (released, _) = watch::channel(expected == 0);
        Latch {
            id,
            remaining: AtomicUsize::new(expected),
            released,
        }
    }

    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Register one arrival, then block until the last participant arrives
    pub async fn arrive_and_wait(&self) -> InteractResult<()> {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
            .map_err(|_| InteractError::Crash(format!("Unexpected arrive_and_wait() call on {}", self)))?;
        if previous == 1 {
            self.released.send_replace(true);
            Ok(())
        } else {
            self.wait().await;
            Ok(())
        }
    }

    /// Block until released without counting as a participant
    pub async fn wait(&self) {
        let mut rx = self.released.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|released| *released).await;
    }
}

impl fmt::Display for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Latch {}", self.id)
    }
}
