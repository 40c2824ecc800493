//! Error types for the boot sequence.
//!
//! Errors are categorized by how the boot sequence recovers from them:
//! - [`BootError::DeviceNotReady`]: a bounded wait ran out of retries
//! - [`BootError::Mount`]: the kernel rejected a mount or move
//! - [`BootError::Lookup`]: a directory could not be inspected
//! - [`BootError::InitExec`]: a user's init could not be started (non-fatal)
//!
//! Everything except `InitExec` is fatal to the current boot path and ends
//! in the recovery shell.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the userboot crates.
pub type BootResult<T> = Result<T, BootError>;

#[derive(Debug, Error)]
pub enum BootError {
    /// A bounded wait exhausted its retries.
    #[error("{} not ready", .path.display())]
    DeviceNotReady { path: PathBuf },

    /// A mount or move request was rejected.
    #[error("mount: {0}")]
    Mount(String),

    /// Reading or stat-ing a path failed for a reason other than not-found.
    #[error("lookup {}: {source}", .path.display())]
    Lookup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A user's init program could not be started.
    #[error("init for {user}: {reason}")]
    InitExec { user: String, reason: String },

    /// Interactive console input failed.
    #[error("prompt: {0}")]
    Prompt(String),

    /// Anything else.
    #[error("internal: {0}")]
    Internal(String),
}

impl BootError {
    /// Create a lookup error for `path`.
    pub fn lookup(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Lookup {
            path: path.into(),
            source,
        }
    }

    /// Create a not-ready error for `path`.
    pub fn not_ready(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotReady { path: path.into() }
    }

    /// Whether this error aborts the current boot path.
    ///
    /// Only a failed user init is swallowed; it must not affect any other
    /// user or the overall boot outcome.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InitExec { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BootError::not_ready("/dev/sda1");
        assert_eq!(err.to_string(), "/dev/sda1 not ready");

        let err = BootError::lookup(
            "/tmp/root",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "lookup /tmp/root: denied");

        let err = BootError::InitExec {
            user: "alice".into(),
            reason: "no such file".into(),
        };
        assert_eq!(err.to_string(), "init for alice: no such file");
    }

    #[test]
    fn test_only_init_exec_is_non_fatal() {
        assert!(!BootError::InitExec {
            user: "bob".into(),
            reason: "denied".into()
        }
        .is_fatal());
        assert!(BootError::Mount("busy".into()).is_fatal());
        assert!(BootError::not_ready("/dev/vda").is_fatal());
        assert!(BootError::Internal("boom".into()).is_fatal());
    }
}
