// ABOUTME: russh session channel adapted to pipe-style stdout/stderr readers.
// ABOUTME: A pump task demultiplexes channel messages into bounded in-memory pipes.

use super::error::{Error, Result};
use super::transport::{ExitStatus, Pipe, RemoteChannel};
use async_trait::async_trait;
use russh::client::Msg;
use russh::{ChannelMsg, Sig};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bytes buffered per descriptor before the pump stops reading the channel.
const PIPE_CAPACITY: usize = 64 * 1024;

/// SSH extended data type code for stderr.
const EXTENDED_DATA_STDERR: u32 = 1;

enum State {
    Idle(russh::Channel<Msg>),
    Running {
        exit: Option<oneshot::Receiver<ExitStatus>>,
        pump: JoinHandle<()>,
    },
    Closed,
}

pub(crate) struct RusshChannel {
    state: State,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    /// Stderr is written to the stdout pipe.
    merged: bool,
    stop: CancellationToken,
}

impl RusshChannel {
    pub(crate) fn new(channel: russh::Channel<Msg>) -> Self {
        Self {
            state: State::Idle(channel),
            stdout: None,
            stderr: None,
            merged: false,
            stop: CancellationToken::new(),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        if !matches!(self.state, State::Idle(_)) {
            return Err(Error::ChannelState("pipe requested after the command started"));
        }
        if self.merged {
            return Err(Error::ChannelState("descriptors already combined"));
        }
        Ok(())
    }

    fn pipe(&mut self, stderr: bool) -> Result<Pipe> {
        self.ensure_idle()?;

        let slot = if stderr {
            &mut self.stderr
        } else {
            &mut self.stdout
        };
        if slot.is_some() {
            return Err(Error::ChannelState("descriptor already piped"));
        }

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        *slot = Some(writer);
        Ok(Box::new(reader))
    }
}

#[async_trait]
impl RemoteChannel for RusshChannel {
    fn stdout_pipe(&mut self) -> Result<Pipe> {
        self.pipe(false)
    }

    fn stderr_pipe(&mut self) -> Result<Pipe> {
        self.pipe(true)
    }

    fn combined_pipe(&mut self) -> Result<Pipe> {
        self.ensure_idle()?;
        if self.stdout.is_some() || self.stderr.is_some() {
            return Err(Error::ChannelState("descriptor already piped"));
        }

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        self.stdout = Some(writer);
        self.merged = true;
        Ok(Box::new(reader))
    }

    async fn start(&mut self, command: &str) -> Result<()> {
        let State::Idle(mut channel) = std::mem::replace(&mut self.state, State::Closed) else {
            return Err(Error::ChannelState("command already started"));
        };

        if let Err(e) = channel.exec(true, command).await {
            let _ = channel.close().await;
            return Err(Error::Protocol(e));
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(
            channel,
            self.stdout.take(),
            self.stderr.take(),
            self.merged,
            self.stop.clone(),
            exit_tx,
        ));
        self.state = State::Running {
            exit: Some(exit_rx),
            pump,
        };
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let State::Running { exit, .. } = &mut self.state else {
            return Err(Error::ChannelState("command not started"));
        };
        let exit = exit
            .take()
            .ok_or(Error::ChannelState("wait already called"))?;
        exit.await.map_err(|_| Error::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.stop.cancel();
        self.stdout = None;
        self.stderr = None;

        match std::mem::replace(&mut self.state, State::Closed) {
            State::Idle(channel) => channel.close().await.map_err(Error::Protocol),
            State::Running { pump, .. } => {
                let _ = pump.await;
                Ok(())
            }
            State::Closed => Ok(()),
        }
    }
}

impl Drop for RusshChannel {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Route channel messages to the pipes until the channel closes or `stop`
/// fires, then report the exit status and close the channel.
async fn pump(
    mut channel: russh::Channel<Msg>,
    mut stdout: Option<DuplexStream>,
    mut stderr: Option<DuplexStream>,
    merged: bool,
    stop: CancellationToken,
    exit: oneshot::Sender<ExitStatus>,
) {
    let mut status = None;

    loop {
        let msg = tokio::select! {
            _ = stop.cancelled() => break,
            msg = channel.wait() => msg,
        };

        let stopped = match msg {
            Some(ChannelMsg::Data { ref data }) => forward(&mut stdout, data, &stop).await,
            Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == EXTENDED_DATA_STDERR => {
                let pipe = if merged { &mut stdout } else { &mut stderr };
                forward(pipe, data, &stop).await
            }
            Some(ChannelMsg::Eof) => {
                // Readers see end of stream once the writers are gone.
                stdout = None;
                stderr = None;
                false
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                status = Some(ExitStatus::Code(exit_status));
                false
            }
            Some(ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            }) => {
                status = Some(ExitStatus::Signal {
                    name: signal_name_of(&signal_name),
                    message: error_message,
                });
                false
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => false,
        };

        if stopped {
            break;
        }
    }

    drop(stdout);
    drop(stderr);

    if let Some(status) = status {
        let _ = exit.send(status);
    }
    if let Err(e) = channel.close().await {
        tracing::debug!("channel close failed: {}", e);
    }
}

/// Write `data` to `pipe`, discarding it when nobody reads that descriptor.
/// Returns true when `stop` fired while blocked on a slow reader.
async fn forward(pipe: &mut Option<DuplexStream>, data: &[u8], stop: &CancellationToken) -> bool {
    let Some(writer) = pipe else {
        return false;
    };

    let written = tokio::select! {
        _ = stop.cancelled() => return true,
        written = writer.write_all(data) => written,
    };
    if written.is_err() {
        *pipe = None;
    }
    false
}

/// Wire name of a signal as sent in `exit-signal`, without the "SIG" prefix.
fn signal_name_of(signal: &Sig) -> String {
    let name = match signal {
        Sig::ABRT => "ABRT",
        Sig::ALRM => "ALRM",
        Sig::FPE => "FPE",
        Sig::HUP => "HUP",
        Sig::ILL => "ILL",
        Sig::INT => "INT",
        Sig::KILL => "KILL",
        Sig::PIPE => "PIPE",
        Sig::QUIT => "QUIT",
        Sig::SEGV => "SEGV",
        Sig::TERM => "TERM",
        Sig::USR1 => "USR1",
        Sig::Custom(name) => name,
    };
    name.to_string()
}
