// ABOUTME: Transport seam between the session layer and the SSH implementation.
// ABOUTME: Defines dialing, channel allocation and per-command channel primitives.

use super::credentials::{AuthMethod, HostKeyPolicy};
use super::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Read half of a remote output descriptor.
pub type Pipe = Box<dyn AsyncRead + Send + Unpin>;

/// How a remote command terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited with this status code.
    Code(u32),
    /// The command was terminated by a signal.
    Signal { name: String, message: String },
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn code(&self) -> Option<u32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            ExitStatus::Signal { .. } => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit status {code}"),
            ExitStatus::Signal { name, message } if message.is_empty() => {
                write!(f, "killed by signal {name}")
            }
            ExitStatus::Signal { name, message } => {
                write!(f, "killed by signal {name}: {message}")
            }
        }
    }
}

/// Everything a transport needs to reach and authenticate against one host.
#[derive(Debug, Clone, Copy)]
pub struct DialTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    /// Methods to try, in order.
    pub auth: &'a [AuthMethod],
    /// Upper bound for connect, handshake and authentication.
    pub timeout: Duration,
    pub host_key: &'a HostKeyPolicy,
}

/// Establishes authenticated connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self, target: &DialTarget<'_>) -> Result<Box<dyn TransportHandle>>;
}

/// One live, authenticated connection.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Allocate a channel for a single command.
    async fn open_channel(&self) -> Result<Box<dyn RemoteChannel>>;

    /// Tear down the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// A command channel within a connection.
///
/// Pipes must be requested before [`RemoteChannel::start`]; output written to a
/// descriptor nobody piped is discarded. A channel runs at most one command.
#[async_trait]
pub trait RemoteChannel: Send {
    fn stdout_pipe(&mut self) -> Result<Pipe>;

    fn stderr_pipe(&mut self) -> Result<Pipe>;

    /// One pipe carrying stdout and stderr in the order the remote wrote them.
    /// Excludes the separate pipes.
    fn combined_pipe(&mut self) -> Result<Pipe>;

    /// Begin executing `command` without waiting for it.
    async fn start(&mut self, command: &str) -> Result<()>;

    /// Wait for the started command to terminate.
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Release the channel. Safe to call in any state.
    async fn close(&mut self) -> Result<()>;
}
