// ABOUTME: Per-target connection credentials and their secret handling.
// ABOUTME: Deserializable from configuration, decrypted in place via a Crypto capability.

use super::error::{BoxError, Error, Result};
use russh::keys::{load_secret_key, ssh_key};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Decrypts secret configuration values.
pub trait Crypto: Send + Sync {
    fn decrypt_string(&self, text: &str) -> std::result::Result<String, BoxError>;
}

/// How the remote host key is checked during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept any host key without verification.
    #[default]
    AcceptAny,
    /// Verify against a known_hosts file.
    KnownHosts {
        /// Defaults to ~/.ssh/known_hosts.
        #[serde(default)]
        path: Option<PathBuf>,
        /// Record keys of hosts not yet present instead of rejecting them.
        #[serde(default)]
        trust_on_first_use: bool,
    },
}

/// Connection parameters for one (host, username) pair.
///
/// A zero `port` or `timeout` means "unset"; see [`Credentials::port`] and
/// [`Credentials::timeout`] for the effective values.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub host_key: HostKeyPolicy,
}

impl Credentials {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_host_key(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    /// Effective port.
    pub fn port(&self) -> u16 {
        if self.port == 0 { DEFAULT_PORT } else { self.port }
    }

    /// Effective dial timeout.
    pub fn timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Replace the non-empty password and passphrase with their plaintext.
    pub fn decrypt(&mut self, crypto: &dyn Crypto) -> Result<()> {
        if let Some(password) = non_empty(&self.password) {
            let plain = crypto
                .decrypt_string(password)
                .map_err(|source| self.decrypt_error("password", source))?;
            self.password = Some(plain);
        }

        if let Some(passphrase) = non_empty(&self.passphrase) {
            let plain = crypto
                .decrypt_string(passphrase)
                .map_err(|source| self.decrypt_error("passphrase", source))?;
            self.passphrase = Some(plain);
        }

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Configuration { field: "host" });
        }
        if self.username.is_empty() {
            return Err(Error::Configuration { field: "username" });
        }
        Ok(())
    }

    /// Ordered authentication methods: public key first, then password.
    pub(crate) fn auth_methods(&self) -> Result<Vec<AuthMethod>> {
        let mut methods = Vec::new();

        if let Some(path) = &self.key_file {
            let passphrase = non_empty(&self.passphrase);
            let key = load_secret_key(path, passphrase).map_err(|e| Error::AuthConfig {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            methods.push(AuthMethod::PublicKey(Arc::new(key)));
        }

        // Requires "PasswordAuthentication yes" on the server.
        if let Some(password) = non_empty(&self.password) {
            methods.push(AuthMethod::Password(password.to_string()));
        }

        Ok(methods)
    }

    fn decrypt_error(&self, field: &'static str, source: BoxError) -> Error {
        Error::Decrypt {
            host: self.host.clone(),
            username: self.username.clone(),
            field,
            source,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("host_key", &self.host_key)
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// A transport-level authentication method.
#[derive(Clone)]
pub enum AuthMethod {
    PublicKey(Arc<ssh_key::PrivateKey>),
    Password(String),
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PublicKey(key) => f
                .debug_tuple("PublicKey")
                .field(&key.algorithm().as_str())
                .finish(),
            AuthMethod::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}
