// ABOUTME: Test support utilities.
// ABOUTME: Provides a scripted in-memory transport, a recording logger and test crypto.

#![allow(dead_code)]


use async_trait::async_trait;
use fleetsh::ssh::{
    AuthMethod, BoxError, Client, ClientRegistry, Connection, Credentials, Crypto, DialTarget,
    Error, ExitStatus, Logger, Pipe, RemoteChannel, Result, Transport, TransportHandle,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("fleetsh=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// What a fake remote command does once started.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
    exit: Option<ExitStatus>,
    linger: Duration,
}

#[derive(Debug, Clone)]
enum Step {
    Stdout(String),
    Stderr(String),
    Sleep(Duration),
}

impl Script {
    /// A command that prints nothing and exits 0.
    pub fn new() -> Self {
        Self {
            exit: Some(ExitStatus::Code(0)),
            ..Default::default()
        }
    }

    pub fn stdout(mut self, line: &str) -> Self {
        self.steps.push(Step::Stdout(line.to_string()));
        self
    }

    pub fn stderr(mut self, line: &str) -> Self {
        self.steps.push(Step::Stderr(line.to_string()));
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    pub fn exit(mut self, code: u32) -> Self {
        self.exit = Some(ExitStatus::Code(code));
        self
    }

    pub fn signal(mut self, name: &str) -> Self {
        self.exit = Some(ExitStatus::Signal {
            name: name.to_string(),
            message: String::new(),
        });
        self
    }

    /// Close the channel without reporting an exit status.
    pub fn vanish(mut self) -> Self {
        self.exit = None;
        self
    }

    /// Keep running this long after both descriptors are closed.
    pub fn linger(mut self, duration: Duration) -> Self {
        self.linger = duration;
        self
    }
}

/// Auth methods seen by the last dial, by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRecord {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: Vec<&'static str>,
    pub timeout: Duration,
}

/// Shared state behind the fake transport and every connection and channel it
/// creates.
#[derive(Default)]
pub struct FakeServer {
    pub script: Mutex<Script>,
    pub fail_dial: bool,
    pub fail_open: bool,
    pub fail_stderr_pipe: bool,
    pub fail_start: bool,
    pub dials: Mutex<Vec<DialRecord>>,
    pub commands: Mutex<Vec<String>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub disconnected: AtomicUsize,
}

impl FakeServer {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// Transport whose channels run a [`Script`] instead of a remote command.
#[derive(Clone)]
pub struct FakeTransport {
    pub server: Arc<FakeServer>,
}

impl FakeTransport {
    pub fn new(script: Script) -> Self {
        Self::with_server(FakeServer {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    pub fn with_server(server: FakeServer) -> Self {
        Self {
            server: Arc::new(server),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.server.script.lock() = script;
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn dial(&self, target: &DialTarget<'_>) -> Result<Box<dyn TransportHandle>> {
        self.server.dials.lock().push(DialRecord {
            host: target.host.to_string(),
            port: target.port,
            username: target.username.to_string(),
            auth: target
                .auth
                .iter()
                .map(|method| match method {
                    AuthMethod::PublicKey(_) => "publickey",
                    AuthMethod::Password(_) => "password",
                })
                .collect(),
            timeout: target.timeout,
        });

        if self.server.fail_dial {
            return Err(Error::Protocol(russh::Error::IO(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))));
        }
        Ok(Box::new(FakeHandle {
            server: Arc::clone(&self.server),
        }))
    }
}

struct FakeHandle {
    server: Arc<FakeServer>,
}

#[async_trait]
impl TransportHandle for FakeHandle {
    async fn open_channel(&self) -> Result<Box<dyn RemoteChannel>> {
        if self.server.fail_open {
            return Err(Error::ChannelState("remote channel limit reached"));
        }
        self.server.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeChannel {
            server: Arc::clone(&self.server),
            script: self.server.script.lock().clone(),
            stdout: None,
            stderr: None,
            merged: false,
            started: false,
            exit: None,
            task: None,
            closed: false,
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        self.server.disconnected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeChannel {
    server: Arc<FakeServer>,
    script: Script,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    merged: bool,
    started: bool,
    exit: Option<oneshot::Receiver<ExitStatus>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl FakeChannel {
    fn pipe(&mut self, stderr: bool) -> Result<Pipe> {
        if self.started {
            return Err(Error::ChannelState("pipe requested after the command started"));
        }
        let slot = if stderr {
            &mut self.stderr
        } else {
            &mut self.stdout
        };
        if self.merged || slot.is_some() {
            return Err(Error::ChannelState("descriptor already piped"));
        }
        let (reader, writer) = tokio::io::duplex(1024);
        *slot = Some(writer);
        Ok(Box::new(reader))
    }
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    fn stdout_pipe(&mut self) -> Result<Pipe> {
        self.pipe(false)
    }

    fn stderr_pipe(&mut self) -> Result<Pipe> {
        if self.server.fail_stderr_pipe {
            return Err(Error::ChannelState("stderr unavailable"));
        }
        self.pipe(true)
    }

    fn combined_pipe(&mut self) -> Result<Pipe> {
        if self.stderr.is_some() {
            return Err(Error::ChannelState("descriptor already piped"));
        }
        let pipe = self.pipe(false)?;
        self.merged = true;
        Ok(pipe)
    }

    async fn start(&mut self, command: &str) -> Result<()> {
        if self.server.fail_start {
            return Err(Error::Protocol(russh::Error::IO(std::io::Error::other(
                "exec request rejected",
            ))));
        }
        self.started = true;
        self.server.commands.lock().push(command.to_string());

        let (exit_tx, exit_rx) = oneshot::channel();
        self.exit = Some(exit_rx);
        self.task = Some(tokio::spawn(run_script(
            self.script.clone(),
            self.stdout.take(),
            self.stderr.take(),
            self.merged,
            exit_tx,
        )));
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let exit = self
            .exit
            .take()
            .ok_or(Error::ChannelState("command not started"))?;
        exit.await.map_err(|_| Error::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.server.closed.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_script(
    script: Script,
    mut stdout: Option<DuplexStream>,
    mut stderr: Option<DuplexStream>,
    merged: bool,
    exit: oneshot::Sender<ExitStatus>,
) {
    for step in script.steps {
        match step {
            Step::Stdout(line) => write_line(&mut stdout, &line).await,
            Step::Stderr(line) if merged => write_line(&mut stdout, &line).await,
            Step::Stderr(line) => write_line(&mut stderr, &line).await,
            Step::Sleep(duration) => tokio::time::sleep(duration).await,
        }
    }
    drop(stdout);
    drop(stderr);

    tokio::time::sleep(script.linger).await;
    if let Some(status) = script.exit {
        let _ = exit.send(status);
    }
}

async fn write_line(pipe: &mut Option<DuplexStream>, line: &str) {
    if let Some(writer) = pipe {
        let data = format!("{line}\n");
        if writer.write_all(data.as_bytes()).await.is_err() {
            *pipe = None;
        }
    }
}

/// Logger that keeps every event it receives.
#[derive(Default)]
pub struct RecordingLogger {
    pub events: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl Logger for RecordingLogger {
    fn debug(&self, event: &str, fields: &[(&str, &str)]) {
        self.events.lock().push((
            event.to_string(),
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
    }
}

/// "Decrypts" by reversing the text.
pub struct ReverseCrypto;

impl Crypto for ReverseCrypto {
    fn decrypt_string(&self, text: &str) -> std::result::Result<String, BoxError> {
        Ok(text.chars().rev().collect())
    }
}

/// Rejects every ciphertext.
pub struct FailingCrypto;

impl Crypto for FailingCrypto {
    fn decrypt_string(&self, _text: &str) -> std::result::Result<String, BoxError> {
        Err("bad ciphertext".into())
    }
}

/// Client for `deploy@web1` from a single-entry registry.
pub fn test_client() -> Arc<Client> {
    let registry = ClientRegistry::build(vec![Credentials::new("web1", "deploy")], None)
        .expect("registry should build");
    registry.lookup("web1", "deploy").expect("client should exist")
}

/// Connection to `deploy@web1` running `script` for every command.
pub async fn connect(script: Script) -> (Connection, FakeTransport) {
    let transport = FakeTransport::new(script);
    let connection = test_client()
        .connect_with(&transport, None)
        .await
        .expect("connection should succeed");
    (connection, transport)
}

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}
