//! Worker failure taxonomy.

use std::io;

use thiserror::Error;

/// Message fragment that marks a descriptor-level fault.
const BAD_FD_SIGNATURE: &str = "bad file descriptor";

/// How a worker run ended unsuccessfully.
#[derive(Debug, Error)]
pub enum WorkerFault {
    /// The worker was asked to stop (Ctrl-C, SIGTERM). Never retried.
    #[error("interrupted")]
    Interrupted,

    /// An I/O error escaped the worker.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Any other worker failure.
    #[error("{0}")]
    Failed(String),

    /// The worker panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl WorkerFault {
    /// Shorthand for [`WorkerFault::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Faults that no restart can fix: the process lost a descriptor it
    /// depends on.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Interrupted => false,
            Self::Io(err) => {
                err.raw_os_error() == Some(nix::libc::EBADF) || carries_bad_fd(&err.to_string())
            },
            Self::Failed(message) | Self::Panicked(message) => carries_bad_fd(message),
        }
    }

    /// Faults that end supervision without a restart.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Short label for logs and crash records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Interrupted => "interrupted",
            Self::Io(_) => "io",
            Self::Failed(_) => "failed",
            Self::Panicked(_) => "panicked",
        }
    }
}

fn carries_bad_fd(message: &str) -> bool {
    message.to_lowercase().contains(BAD_FD_SIGNATURE)
}
