// ABOUTME: Time-bounded, line-oriented streaming of a running remote command.
// ABOUTME: Scans stdout and stderr concurrently and signals completion or timeout once.

use super::error::Error;
use super::session::Session;
use super::transport::Pipe;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Lines from one output descriptor, in the order they were written.
pub type Lines = mpsc::Receiver<String>;

/// Receives `true` when the command exited in time, `false` on timeout or close.
pub type Done = oneshot::Receiver<bool>;

/// Everything a stream produced, gathered by [`Stream::collect`].
#[derive(Debug)]
pub struct StreamOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Whether the command exited before the timeout.
    pub completed: bool,
    /// Exit error of the command, when it completed unsuccessfully.
    pub error: Option<Error>,
}

impl StreamOutput {
    pub fn success(&self) -> bool {
        self.completed && self.error.is_none()
    }
}

/// Output of a started command, delivered as two line sequences plus a single
/// completion signal.
///
/// Each line sequence hands over one line at a time: a consumer that stops
/// reading stalls the corresponding descriptor, and eventually the remote
/// command. Take and drain both, or drop the receiver you do not need.
///
/// Once [`Done`] fires both line sequences are closed and the session is being
/// released. On timeout the remote command is left running; only the channel
/// is detached.
pub struct Stream {
    stdout: Option<Lines>,
    stderr: Option<Lines>,
    done: Option<Done>,
    error: Arc<Mutex<Option<Error>>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Stream {
    pub(crate) fn spawn(session: Session, stdout: Pipe, stderr: Pipe, timeout: Duration) -> Self {
        let (stdout_tx, stdout_rx) = mpsc::channel(1);
        let (stderr_tx, stderr_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let error = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let worker = Worker {
            session,
            done: done_tx,
            error: Arc::clone(&error),
            cancel: cancel.clone(),
            timeout,
        };
        let mut scanners = JoinSet::new();
        scanners.spawn(scan(stdout, stdout_tx, cancel.clone()));
        scanners.spawn(scan(stderr, stderr_tx, cancel.clone()));

        Self {
            stdout: Some(stdout_rx),
            stderr: Some(stderr_rx),
            done: Some(done_rx),
            error,
            cancel,
            worker: Some(tokio::spawn(worker.run(scanners))),
        }
    }

    /// Take the stdout line sequence. Returns `None` once taken or closed.
    pub fn take_stdout(&mut self) -> Option<Lines> {
        self.stdout.take()
    }

    /// Take the stderr line sequence. Returns `None` once taken or closed.
    pub fn take_stderr(&mut self) -> Option<Lines> {
        self.stderr.take()
    }

    /// Take the completion signal, for use in `tokio::select!`.
    pub fn take_done(&mut self) -> Option<Done> {
        self.done.take()
    }

    /// Wait for the completion signal.
    ///
    /// Returns `None` when the signal was already taken, or when the stream was
    /// closed before the signal could be delivered.
    pub async fn done(&mut self) -> Option<bool> {
        self.done.take()?.await.ok()
    }

    /// Exit error of the command. Only meaningful after [`Stream::done`]
    /// delivered `true`; a timed-out stream never records one.
    pub fn take_err(&self) -> Option<Error> {
        self.error.lock().take()
    }

    /// Abandon the stream: stop both scanners, then release the session.
    /// Calling it again is a no-op.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.stdout = None;
        self.stderr = None;
        self.done = None;
        self.worker = None;
    }

    /// Drain both line sequences concurrently and wait for completion.
    pub async fn collect(mut self) -> StreamOutput {
        let (stdout, stderr) = tokio::join!(
            drain(self.take_stdout()),
            drain(self.take_stderr())
        );
        let completed = self.done().await.unwrap_or(false);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }

        StreamOutput {
            stdout,
            stderr,
            completed,
            error: self.take_err(),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain(lines: Option<Lines>) -> Vec<String> {
    let mut collected = Vec::new();
    if let Some(mut lines) = lines {
        while let Some(line) = lines.recv().await {
            collected.push(line);
        }
    }
    collected
}

/// Controller owning the session for the lifetime of the stream.
struct Worker {
    session: Session,
    done: oneshot::Sender<bool>,
    error: Arc<Mutex<Option<Error>>>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl Worker {
    async fn run(mut self, mut scanners: JoinSet<()>) {
        let session = &mut self.session;

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            finished = tokio::time::timeout(self.timeout, async {
                while scanners.join_next().await.is_some() {}
                session.wait().await
            }) => Some(finished),
        };

        let completed = match outcome {
            Some(Ok(exit)) => {
                *self.error.lock() = exit.err();
                true
            }
            Some(Err(_)) => {
                tracing::debug!(
                    host = %self.session.host(),
                    command = self.session.command().unwrap_or_default(),
                    timeout = ?self.timeout,
                    "stream timed out, detaching from remote command"
                );
                false
            }
            None => false,
        };

        // Both line sequences are closed before completion is observable.
        self.cancel.cancel();
        while scanners.join_next().await.is_some() {}

        let _ = self.done.send(completed);
        self.session.close().await;
    }
}

/// Forward lines from `pipe` until end of stream, a read error, a departed
/// receiver or cancellation.
async fn scan(pipe: Pipe, lines: mpsc::Sender<String>, cancel: CancellationToken) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                return;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = lines.send(decode_line(&buf)) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
