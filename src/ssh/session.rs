// ABOUTME: A single remote command invocation on top of a transport channel.
// ABOUTME: Traces every dispatched command and offers blocking and streaming execution.

use super::client::Client;
use super::error::{Error, Result};
use super::logger::Logger;
use super::transport::{ExitStatus, Pipe, RemoteChannel};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// One command channel. The blocking helpers consume the session; a channel
/// never runs a second command.
pub struct Session {
    client: Arc<Client>,
    logger: Option<Arc<dyn Logger>>,
    channel: Box<dyn RemoteChannel>,
    command: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.client.addr())
            .field("username", &self.client.username())
            .field("command", &self.command)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        client: Arc<Client>,
        logger: Option<Arc<dyn Logger>>,
        channel: Box<dyn RemoteChannel>,
    ) -> Self {
        Self {
            client,
            logger,
            channel,
            command: None,
        }
    }

    pub fn host(&self) -> &str {
        self.client.host()
    }

    pub fn username(&self) -> &str {
        self.client.username()
    }

    /// The command passed to [`Session::start`], once started.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    fn trace(&self, command: &str) {
        if let Some(logger) = &self.logger {
            logger.debug(
                "SSH",
                &[
                    ("server", self.client.host()),
                    ("username", self.client.username()),
                    ("cmd", command),
                ],
            );
        }
    }

    fn execution_error(&self, status: Option<ExitStatus>, reason: String) -> Error {
        Error::Execution {
            host: self.client.host().to_string(),
            username: self.client.username().to_string(),
            command: self.command.clone().unwrap_or_default(),
            status,
            reason,
        }
    }

    /// Run `command` to completion, discarding its output.
    pub async fn run(mut self, command: &str) -> Result<()> {
        let result = async {
            self.start(command).await?;
            self.wait().await
        }
        .await;
        self.close().await;
        result
    }

    /// Run `command` to completion and return its stdout.
    pub async fn output(mut self, command: &str) -> Result<Vec<u8>> {
        let result = self.capture(command, false).await;
        self.close().await;
        result
    }

    /// Run `command` to completion and return stdout and stderr interleaved in
    /// arrival order.
    pub async fn combined_output(mut self, command: &str) -> Result<Vec<u8>> {
        let result = self.capture(command, true).await;
        self.close().await;
        result
    }

    async fn capture(&mut self, command: &str, combined: bool) -> Result<Vec<u8>> {
        let mut pipe = if combined {
            self.combined_pipe()?
        } else {
            self.stdout_pipe()?
        };
        self.start(command).await?;

        let mut output = Vec::new();
        pipe.read_to_end(&mut output)
            .await
            .map_err(|e| self.execution_error(None, e.to_string()))?;

        self.wait().await?;
        Ok(output)
    }

    /// Pipe connected to the command's stdout. Must be taken before starting.
    pub fn stdout_pipe(&mut self) -> Result<Pipe> {
        self.channel.stdout_pipe()
    }

    /// Pipe connected to the command's stderr. Must be taken before starting.
    pub fn stderr_pipe(&mut self) -> Result<Pipe> {
        self.channel.stderr_pipe()
    }

    /// Single pipe carrying stdout and stderr in arrival order. Must be taken
    /// before starting, instead of the separate pipes.
    pub fn combined_pipe(&mut self) -> Result<Pipe> {
        self.channel.combined_pipe()
    }

    /// Begin executing `command` without waiting for it to finish.
    pub async fn start(&mut self, command: &str) -> Result<()> {
        self.trace(command);
        self.command = Some(command.to_string());
        if let Err(e) = self.channel.start(command).await {
            return Err(self.execution_error(None, e.to_string()));
        }
        Ok(())
    }

    /// Wait for the started command. A non-zero exit or a signal is an error.
    pub async fn wait(&mut self) -> Result<()> {
        let status = match self.channel.wait().await {
            Ok(status) => status,
            Err(e) => return Err(self.execution_error(None, e.to_string())),
        };

        if status.success() {
            Ok(())
        } else {
            let reason = status.to_string();
            Err(self.execution_error(Some(status), reason))
        }
    }

    /// Release the channel.
    pub async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            tracing::debug!(
                host = %self.client.host(),
                error = %e,
                "failed to close session channel"
            );
        }
    }
}
