// ABOUTME: SSH client module for running commands on remote hosts.
// ABOUTME: Registry of credentialed clients, connections, sessions and output streams.

mod channel;
mod client;
mod connection;
mod credentials;
mod dial;
mod error;
mod handler;
mod logger;
mod registry;
mod session;
mod stream;
mod transport;

pub use client::Client;
pub use connection::Connection;
pub use credentials::{
    AuthMethod, Credentials, Crypto, DEFAULT_PORT, DEFAULT_TIMEOUT, HostKeyPolicy,
};
pub use dial::RusshTransport;
pub use error::{BoxError, Error, Result};
pub use logger::{Logger, TracingLogger};
pub use registry::ClientRegistry;
pub use session::Session;
pub use stream::{Done, Lines, Stream, StreamOutput};
pub use transport::{DialTarget, ExitStatus, Pipe, RemoteChannel, Transport, TransportHandle};
