//! Client side of the framed plain protocol.
//!
//! The client sends `ARG* ENCODING LOCALE START (STDIN)* END_STDIN`; the
//! server answers with `STDOUT`/`STDERR` chunks and finally one `EXIT`.
//! A background task reads server frames while the caller sends.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use jcli_core::frames::{frame_encode, text_frame};
use jcli_core::{
    BoxFuture, BoxedReader, BoxedWriter, CliError, CliResult, DuplexConnection, FrameDecoder, Op,
};

use crate::keepalive::Pinger;

const READ_CHUNK: usize = 8192;

/// How far the client has got through its send sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Args,
    Encoding,
    Locale,
    Started,
    StdinClosed,
}

/// What the server has told us about the command's fate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Running,
    Exited(i32),
    /// The stream broke the protocol before an exit code arrived.
    Violated(String),
    /// The stream failed at the I/O level before an exit code arrived.
    Broken(String),
}

struct SendState {
    writer: BoxedWriter,
    phase: Phase,
    encoding: Option<String>,
}

/// Cloneable sending half of a plain session.
#[derive(Clone)]
pub struct PlainHandle {
    state: Arc<Mutex<SendState>>,
    exit: watch::Receiver<ExitState>,
}

impl PlainHandle {
    async fn send(&self, op: Op, frame: Vec<u8>) -> CliResult<()> {
        let mut state = self.state.lock().await;
        if *self.exit.borrow() != ExitState::Running {
            return Err(CliError::FramingViolation(format!(
                "cannot send {op:?}: the command already finished"
            )));
        }

        let next = match (op, state.phase) {
            (Op::Arg, Phase::Args) => Phase::Args,
            (Op::Encoding, Phase::Args) => Phase::Encoding,
            // After start, an encoding frame is a no-op ping.
            (Op::Encoding, p @ (Phase::Started | Phase::StdinClosed)) => p,
            (Op::Locale, Phase::Encoding) => Phase::Locale,
            (Op::Start, Phase::Locale) => Phase::Started,
            (Op::Stdin, Phase::Started) => Phase::Started,
            (Op::EndStdin, Phase::Started) => Phase::StdinClosed,
            (op, phase) => {
                return Err(CliError::FramingViolation(format!(
                    "{op:?} may not be sent in the {phase:?} phase"
                )))
            }
        };

        // One frame, one buffer: writers must pass each buffer on whole so
        // concurrent senders never interleave inside a frame.
        state.writer.write_all(&frame).await?;
        state.writer.flush().await?;
        state.phase = next;
        Ok(())
    }

    pub async fn send_arg(&self, arg: &str) -> CliResult<()> {
        self.send(Op::Arg, text_frame(Op::Arg, arg)?).await
    }

    pub async fn send_encoding(&self, encoding: &str) -> CliResult<()> {
        self.send(Op::Encoding, text_frame(Op::Encoding, encoding)?)
            .await?;
        self.state.lock().await.encoding = Some(encoding.to_string());
        Ok(())
    }

    pub async fn send_locale(&self, locale: &str) -> CliResult<()> {
        self.send(Op::Locale, text_frame(Op::Locale, locale)?).await
    }

    pub async fn send_start(&self) -> CliResult<()> {
        self.send(Op::Start, frame_encode(Op::Start, &[])).await
    }

    pub async fn send_stdin(&self, chunk: &[u8]) -> CliResult<()> {
        self.send(Op::Stdin, frame_encode(Op::Stdin, chunk)).await
    }

    pub async fn send_end_stdin(&self) -> CliResult<()> {
        self.send(Op::EndStdin, frame_encode(Op::EndStdin, &[])).await
    }

    /// Resend the negotiated encoding, which the server ignores.
    pub async fn send_keepalive(&self) -> CliResult<()> {
        let encoding = self
            .state
            .lock()
            .await
            .encoding
            .clone()
            .unwrap_or_else(|| crate::locale::DEFAULT_ENCODING.to_string());
        self.send(Op::Encoding, text_frame(Op::Encoding, &encoding)?)
            .await
    }

    /// Send the whole command preamble: arguments, encoding, locale, start.
    pub async fn start_command(&self, args: &[String], encoding: &str, locale: &str) -> CliResult<()> {
        for arg in args {
            self.send_arg(arg).await?;
        }
        self.send_encoding(encoding).await?;
        self.send_locale(locale).await?;
        self.send_start().await
    }

    pub fn exit_state(&self) -> ExitState {
        self.exit.borrow().clone()
    }

    /// Wait for the server's verdict.
    pub async fn wait_for_exit(&self) -> CliResult<i32> {
        let mut exit = self.exit.clone();
        let state = exit
            .wait_for(|s| *s != ExitState::Running)
            .await
            .map_err(|_| CliError::Other("reader stopped without a verdict".into()))?
            .clone();
        match state {
            ExitState::Exited(code) => Ok(code),
            ExitState::Violated(msg) => Err(CliError::FramingViolation(msg)),
            ExitState::Broken(msg) => Err(CliError::Other(format!("connection lost: {msg}"))),
            ExitState::Running => Err(CliError::Other("reader stopped without a verdict".into())),
        }
    }
}

/// A running plain-protocol session.
pub struct PlainClient {
    handle: PlainHandle,
    reader: JoinHandle<()>,
}

impl PlainClient {
    /// Start reading server frames from `conn`, copying output to the
    /// given sinks.
    pub fn start(conn: DuplexConnection, stdout: BoxedWriter, stderr: BoxedWriter) -> Self {
        let (reader, writer) = conn.into_parts();
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);

        let reader = tokio::spawn(async move {
            let verdict = match read_loop(reader, stdout, stderr).await {
                Ok(code) => {
                    tracing::debug!(code, "server reported exit");
                    ExitState::Exited(code)
                }
                Err(CliError::FramingViolation(msg)) => ExitState::Violated(msg),
                Err(e) => ExitState::Broken(e.to_string()),
            };
            exit_tx.send_replace(verdict);
        });

        Self {
            handle: PlainHandle {
                state: Arc::new(Mutex::new(SendState {
                    writer,
                    phase: Phase::Args,
                    encoding: None,
                })),
                exit: exit_rx,
            },
            reader,
        }
    }

    pub fn handle(&self) -> PlainHandle {
        self.handle.clone()
    }

    pub fn reader_abort_handle(&self) -> tokio::task::AbortHandle {
        self.reader.abort_handle()
    }
}

impl std::ops::Deref for PlainClient {
    type Target = PlainHandle;

    fn deref(&self) -> &PlainHandle {
        &self.handle
    }
}

impl Pinger for PlainHandle {
    fn ping<'a>(&'a self) -> BoxFuture<'a, CliResult<()>> {
        // Detached so a caller's timeout cannot cut the frame short.
        let handle = self.clone();
        let send = tokio::spawn(async move { handle.send_keepalive().await });
        Box::pin(async move {
            send.await
                .map_err(|e| CliError::Other(format!("keepalive send failed: {e}")))?
        })
    }

    fn is_closed(&self) -> bool {
        self.exit_state() != ExitState::Running
    }
}

async fn read_loop(
    mut reader: BoxedReader,
    mut stdout: BoxedWriter,
    mut stderr: BoxedWriter,
) -> CliResult<i32> {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            let detail = if decoder.pending() > 0 {
                format!("stream ended inside a frame ({} bytes pending)", decoder.pending())
            } else {
                "stream ended before an exit code".to_string()
            };
            return Err(CliError::FramingViolation(detail));
        }

        for frame in decoder.feed(&buf[..n])? {
            match frame.op() {
                Some(Op::Stdout) => {
                    stdout.write_all(&frame.payload).await?;
                    stdout.flush().await?;
                }
                Some(Op::Stderr) => {
                    stderr.write_all(&frame.payload).await?;
                    stderr.flush().await?;
                }
                Some(Op::Exit) => return frame.exit_code(),
                Some(op) if op.is_server_bound() => {
                    return Err(CliError::FramingViolation(format!(
                        "server sent {op:?}, which only the client may send"
                    )))
                }
                Some(op) => tracing::debug!(?op, "ignoring frame"),
                None => tracing::debug!(opcode = frame.opcode, "skipping unknown frame"),
            }
        }
    }
}
