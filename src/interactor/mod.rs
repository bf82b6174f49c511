//! Scripted interactor
//!
//! Drives a multi-connection conversation against a running candidate over
//! TCP and Unix-domain sockets. Each connection follows its own command
//! queue; barriers declared in the script synchronise them.
//!
//! Dependency direction: latch -> script -> connection -> driver

pub mod connection;
pub mod driver;
pub mod latch;
pub mod script;

use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Reserved exit statuses of the interactor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractorOutcome {
    Ok,
    WrongAnswer,
    PresentationError,
    Crash,
}

impl InteractorOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            InteractorOutcome::Ok => 0,
            InteractorOutcome::WrongAnswer => 1,
            InteractorOutcome::PresentationError => 2,
            InteractorOutcome::Crash => 6,
        }
    }
}

/// Failure of a scripted conversation, classified three ways
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteractError {
    /// The candidate said something the script did not expect
    #[error("{0}")]
    WrongAnswer(String),

    /// Transport-level fault: refused connection, broken pipe, short read
    #[error("{0}")]
    Presentation(String),

    /// Malformed script, latch misuse or any other internal fault
    #[error("{0}")]
    Crash(String),
}

impl InteractError {
    pub fn outcome(&self) -> InteractorOutcome {
        match self {
            InteractError::WrongAnswer(_) => InteractorOutcome::WrongAnswer,
            InteractError::Presentation(_) => InteractorOutcome::PresentationError,
            InteractError::Crash(_) => InteractorOutcome::Crash,
        }
    }
}

pub type InteractResult<T> = std::result::Result<T, InteractError>;

/// Conversation log shared by all connections (`<name>: <message>` lines)
#[derive(Clone, Debug, Default)]
pub struct ConversationLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl ConversationLog {
    pub fn line(&self, name: &str, message: &str) {
        self.raw(format!("{}: {}\n", name, message).as_bytes());
    }

    pub fn raw(&self, bytes: &[u8]) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(bytes);
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

/// Printable form of raw conversation bytes
pub(crate) fn show(bytes: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(bytes))
}
