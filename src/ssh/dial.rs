// ABOUTME: Production transport backed by russh.
// ABOUTME: Connects, authenticates in configured order and allocates session channels.

use super::channel::RusshChannel;
use super::credentials::AuthMethod;
use super::error::{Error, Result};
use super::handler::HostKeyVerifier;
use super::transport::{DialTarget, RemoteChannel, Transport, TransportHandle};
use async_trait::async_trait;
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;
use std::time::Duration;

/// Dials hosts with russh.
#[derive(Clone)]
pub struct RusshTransport {
    config: Arc<Config>,
}

impl Default for RusshTransport {
    fn default() -> Self {
        // Streams may stay silent for long periods; keep the connection alive
        // instead of timing out on inactivity.
        Self::new(Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        })
    }
}

impl RusshTransport {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn dial(&self, target: &DialTarget<'_>) -> Result<Box<dyn TransportHandle>> {
        let handler = HostKeyVerifier::new(target.host, target.port, target.host_key.clone());

        let connect = async {
            let mut handle = client::connect(
                Arc::clone(&self.config),
                (target.host, target.port),
                handler,
            )
            .await?;

            if !authenticate(&mut handle, target.username, target.auth).await? {
                return Err(Error::AuthenticationRejected);
            }
            Ok(handle)
        };

        let handle = tokio::time::timeout(target.timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout(target.timeout))??;

        Ok(Box::new(RusshHandle { handle }))
    }
}

/// Try each method in order until the server accepts one.
async fn authenticate(
    handle: &mut Handle<HostKeyVerifier>,
    username: &str,
    methods: &[AuthMethod],
) -> Result<bool> {
    if methods.is_empty() {
        return Ok(handle.authenticate_none(username).await?.success());
    }

    for method in methods {
        let accepted = match method {
            AuthMethod::PublicKey(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await?
                    .success()
            }
            AuthMethod::Password(password) => handle
                .authenticate_password(username, password.as_str())
                .await?
                .success(),
        };

        if accepted {
            return Ok(true);
        }
        tracing::debug!(username, "authentication method rejected, trying next");
    }

    Ok(false)
}

struct RusshHandle {
    handle: Handle<HostKeyVerifier>,
}

#[async_trait]
impl TransportHandle for RusshHandle {
    async fn open_channel(&self) -> Result<Box<dyn RemoteChannel>> {
        let channel = self.handle.channel_open_session().await?;
        Ok(Box::new(RusshChannel::new(channel)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)
    }
}
