// ABOUTME: Pre-validated connection parameters for one (host, username) pair.
// ABOUTME: Builds authentication methods once and dials new connections on demand.

use super::connection::Connection;
use super::credentials::{AuthMethod, Credentials, HostKeyPolicy};
use super::dial::RusshTransport;
use super::error::{Error, Result};
use super::logger::Logger;
use super::transport::{DialTarget, Transport};
use std::sync::Arc;
use std::time::Duration;

/// Immutable connection parameters for one (host, username) pair.
#[derive(Debug)]
pub struct Client {
    host: String,
    port: u16,
    username: String,
    addr: String,
    timeout: Duration,
    host_key: HostKeyPolicy,
    auth: Vec<AuthMethod>,
}

impl Client {
    /// Validate `credentials` and resolve defaults and key material.
    pub fn new(credentials: Credentials) -> Result<Self> {
        credentials.validate()?;
        let auth = credentials.auth_methods()?;
        let port = credentials.port();

        if credentials.host_key == HostKeyPolicy::AcceptAny {
            tracing::warn!(
                host = %credentials.host,
                username = %credentials.username,
                "host key verification disabled: any server key will be accepted"
            );
        }

        Ok(Self {
            addr: format!("{}:{}", credentials.host, port),
            port,
            timeout: credentials.timeout(),
            host_key: credentials.host_key,
            host: credentials.host,
            username: credentials.username,
            auth,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `host:port`, as dialed.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn host_key_policy(&self) -> &HostKeyPolicy {
        &self.host_key
    }

    pub fn auth_methods(&self) -> &[AuthMethod] {
        &self.auth
    }

    /// Connect over SSH. `logger`, when given, traces every command dispatched
    /// through the resulting connection.
    pub async fn connect(self: &Arc<Self>, logger: Option<Arc<dyn Logger>>) -> Result<Connection> {
        self.connect_with(&RusshTransport::default(), logger).await
    }

    /// Connect through an arbitrary transport. Failures are not retried.
    pub async fn connect_with(
        self: &Arc<Self>,
        transport: &dyn Transport,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Connection> {
        let target = DialTarget {
            host: &self.host,
            port: self.port,
            username: &self.username,
            auth: &self.auth,
            timeout: self.timeout,
            host_key: &self.host_key,
        };

        tracing::debug!(addr = %self.addr, username = %self.username, "dialing");

        let handle = transport.dial(&target).await.map_err(|e| Error::Dial {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            reason: e.to_string(),
        })?;

        Ok(Connection::new(Arc::clone(self), handle, logger))
    }
}
