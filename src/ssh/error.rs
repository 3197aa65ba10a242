// ABOUTME: SSH-specific error types.
// ABOUTME: Covers configuration, authentication, dial, session and execution failures.

use super::transport::ExitStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by external capabilities such as [`super::Crypto`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: the {field} field cannot be empty")]
    Configuration { field: &'static str },

    #[error("failed to load key from {path}: {reason}")]
    AuthConfig { path: PathBuf, reason: String },

    #[error("failed to decrypt {field} for {username}@{host}: {source}")]
    Decrypt {
        host: String,
        username: String,
        field: &'static str,
        source: BoxError,
    },

    #[error("failed to connect to {username}@{host}:{port}: {reason}")]
    Dial {
        host: String,
        port: u16,
        username: String,
        reason: String,
    },

    #[error("failed to open session on {username}@{host}: {reason}")]
    SessionOpen {
        host: String,
        username: String,
        reason: String,
    },

    #[error("this SSH server or user does not exist: {username}@{host}")]
    NotFound { host: String, username: String },

    #[error("command `{command}` failed on {username}@{host}: {reason}")]
    Execution {
        host: String,
        username: String,
        command: String,
        status: Option<ExitStatus>,
        reason: String,
    },

    #[error("authentication failed: no method was accepted")]
    AuthenticationRejected,

    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("invalid channel state: {0}")]
    ChannelState(&'static str),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

impl Error {
    /// Exit status of the remote command, when the failure came from one.
    pub fn exit_status(&self) -> Option<&ExitStatus> {
        match self {
            Error::Execution { status, .. } => status.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
