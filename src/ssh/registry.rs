// ABOUTME: Registry of clients keyed by host, then by username.
// ABOUTME: Built once from configuration and read-only afterwards.

use super::client::Client;
use super::connection::Connection;
use super::credentials::{Credentials, Crypto};
use super::error::{Error, Result};
use super::logger::Logger;
use std::collections::HashMap;
use std::sync::Arc;

/// Every configured client, looked up by host and username.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, HashMap<String, Arc<Client>>>,
}

impl ClientRegistry {
    /// Build the registry from `configs`.
    ///
    /// Secrets are decrypted first when `crypto` is given. The first failing
    /// entry aborts the whole build. A later entry for the same (host, username)
    /// pair replaces an earlier one.
    pub fn build(
        configs: impl IntoIterator<Item = Credentials>,
        crypto: Option<&dyn Crypto>,
    ) -> Result<Self> {
        let mut clients: HashMap<String, HashMap<String, Arc<Client>>> = HashMap::new();

        for mut credentials in configs {
            if let Some(crypto) = crypto {
                credentials.decrypt(crypto)?;
            }

            let client = Client::new(credentials)?;
            clients
                .entry(client.host().to_string())
                .or_default()
                .insert(client.username().to_string(), Arc::new(client));
        }

        Ok(Self { clients })
    }

    pub fn lookup(&self, host: &str, username: &str) -> Result<Arc<Client>> {
        self.clients
            .get(host)
            .and_then(|users| users.get(username))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                host: host.to_string(),
                username: username.to_string(),
            })
    }

    /// Look up the client for (`host`, `username`) and connect it.
    pub async fn connect(
        &self,
        host: &str,
        username: &str,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<Connection> {
        self.lookup(host, username)?.connect(logger).await
    }

    /// All clients, in no particular order.
    pub fn clients(&self) -> impl Iterator<Item = &Arc<Client>> {
        self.clients.values().flat_map(|users| users.values())
    }

    pub fn len(&self) -> usize {
        self.clients.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
