// ABOUTME: Runs one command across many hosts and relays their output live.
// ABOUTME: Each target's lines are tagged with user@host and forwarded as they arrive.

use crate::ssh::{Client, Connection, Error, Logger, Result, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Something one target produced while its command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    Stdout { target: String, line: String },
    Stderr { target: String, line: String },
}

/// How a target's command ended.
#[derive(Debug)]
pub enum Outcome {
    /// Exited successfully within the timeout.
    Completed,
    /// Exited within the timeout, unsuccessfully.
    Failed(Error),
    /// Still running when the timeout expired.
    TimedOut,
}

impl Outcome {
    pub fn success(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// Label used to prefix a target's output.
pub fn target_label(username: &str, host: &str) -> String {
    format!("{username}@{host}")
}

/// Stream `command` on `connection`, sending every line to `events` as soon as
/// it is read. Returns once the command completed or timed out and both line
/// sequences are drained. A departed receiver only stops the relaying.
pub async fn relay(
    connection: &Connection,
    command: &str,
    timeout: Duration,
    events: &mpsc::UnboundedSender<FleetEvent>,
) -> Result<Outcome> {
    let target = target_label(connection.username(), connection.host());
    let mut stream = connection.read_stream(command, timeout).await?;

    let stdout = stream.take_stdout();
    let stderr = stream.take_stderr();
    tokio::join!(
        async {
            if let Some(mut lines) = stdout {
                while let Some(line) = lines.recv().await {
                    let _ = events.send(FleetEvent::Stdout {
                        target: target.clone(),
                        line,
                    });
                }
            }
        },
        async {
            if let Some(mut lines) = stderr {
                while let Some(line) = lines.recv().await {
                    let _ = events.send(FleetEvent::Stderr {
                        target: target.clone(),
                        line,
                    });
                }
            }
        }
    );

    let outcome = match stream.done().await {
        Some(true) => match stream.take_err() {
            Some(e) => Outcome::Failed(e),
            None => Outcome::Completed,
        },
        _ => Outcome::TimedOut,
    };
    tracing::debug!(host = %target, outcome = ?outcome, "fleet command finished");
    Ok(outcome)
}

/// Connect `client` through `transport`, relay `command`, and disconnect.
/// The connection is released on every path, including a command that fails
/// to start.
pub async fn run_target(
    client: &Arc<Client>,
    transport: &dyn Transport,
    logger: Option<Arc<dyn Logger>>,
    command: &str,
    timeout: Duration,
    events: &mpsc::UnboundedSender<FleetEvent>,
) -> Result<Outcome> {
    let connection = client.connect_with(transport, logger).await?;
    let outcome = relay(&connection, command, timeout, events).await;
    if let Err(e) = connection.disconnect().await {
        tracing::debug!(addr = %client.addr(), error = %e, "disconnect failed");
    }
    outcome
}
