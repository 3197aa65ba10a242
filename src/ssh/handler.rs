// ABOUTME: russh client handler enforcing the configured host key policy.
// ABOUTME: Either accepts any key or checks known_hosts with optional trust-on-first-use.

use super::credentials::HostKeyPolicy;
use russh::client;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use std::path::Path;

pub(crate) struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl HostKeyVerifier {
    pub(crate) fn new(host: &str, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.to_string(),
            port,
            policy,
        }
    }

    fn verify_known_hosts(
        &self,
        key: &ssh_key::PublicKey,
        path: Option<&Path>,
        trust_on_first_use: bool,
    ) -> bool {
        let checked = match path {
            Some(path) => check_known_hosts_path(&self.host, self.port, key, path),
            None => check_known_hosts(&self.host, self.port, key),
        };

        match checked {
            Ok(true) => true,
            Ok(false) if trust_on_first_use => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                let learned = match path {
                    Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
                    None => learn_known_hosts(&self.host, self.port, key),
                };
                if let Err(e) = learned {
                    tracing::warn!("Failed to save host key to known_hosts: {}", e);
                }
                true
            }
            Ok(false) => false,
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!(
                    "host key for {}:{} does not match known_hosts",
                    self.host,
                    self.port
                );
                false
            }
            // Unreadable known_hosts: only trust when unknown hosts are trusted anyway.
            Err(e) => {
                tracing::debug!("known_hosts check failed: {}", e);
                trust_on_first_use
            }
        }
    }
}

impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let accepted = match &self.policy {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::KnownHosts {
                path,
                trust_on_first_use,
            } => self.verify_known_hosts(server_public_key, path.as_deref(), *trust_on_first_use),
        };
        Ok(accepted)
    }
}
