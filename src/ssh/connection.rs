// ABOUTME: One live authenticated connection to a host.
// ABOUTME: Opens per-command sessions and time-bounded output streams.

use super::client::Client;
use super::error::{Error, Result};
use super::logger::Logger;
use super::session::Session;
use super::stream::Stream;
use super::transport::TransportHandle;
use std::sync::Arc;
use std::time::Duration;

/// An established connection, bound to the client it was dialed from.
pub struct Connection {
    client: Arc<Client>,
    logger: Option<Arc<dyn Logger>>,
    handle: Box<dyn TransportHandle>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.client.addr())
            .field("username", &self.client.username())
            .field("traced", &self.logger.is_some())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        client: Arc<Client>,
        handle: Box<dyn TransportHandle>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Self {
        Self {
            client,
            logger,
            handle,
        }
    }

    pub fn host(&self) -> &str {
        self.client.host()
    }

    pub fn port(&self) -> u16 {
        self.client.port()
    }

    pub fn username(&self) -> &str {
        self.client.username()
    }

    /// Open a channel for a single command.
    pub async fn new_session(&self) -> Result<Session> {
        let channel = self
            .handle
            .open_channel()
            .await
            .map_err(|e| Error::SessionOpen {
                host: self.client.host().to_string(),
                username: self.client.username().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Session::new(
            Arc::clone(&self.client),
            self.logger.clone(),
            channel,
        ))
    }

    /// Start `command` and stream its output line by line for at most `timeout`.
    ///
    /// If the pipes cannot be wired or the command fails to start, the session
    /// is closed before the error is returned.
    pub async fn read_stream(&self, command: &str, timeout: Duration) -> Result<Stream> {
        let mut session = self.new_session().await?;

        let wired = async {
            let stdout = session.stdout_pipe()?;
            let stderr = session.stderr_pipe()?;
            session.start(command).await?;
            Ok::<_, Error>((stdout, stderr))
        }
        .await;

        match wired {
            Ok((stdout, stderr)) => Ok(Stream::spawn(session, stdout, stderr, timeout)),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    /// Close the connection. Sessions and streams still running on it fail.
    pub async fn disconnect(self) -> Result<()> {
        tracing::debug!(addr = %self.client.addr(), "disconnecting");
        self.handle.disconnect().await
    }
}
