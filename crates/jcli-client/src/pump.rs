//! Forwards local standard input to the remote command.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use jcli_core::{BoxFuture, CliResult};

use crate::plain::PlainHandle;

const CHUNK: usize = 4096;

/// Where stdin chunks go.
pub trait StdinSink: Send + Sync + 'static {
    fn send_chunk<'a>(&'a self, chunk: &'a [u8]) -> BoxFuture<'a, CliResult<()>>;

    fn send_end<'a>(&'a self) -> BoxFuture<'a, CliResult<()>>;
}

impl StdinSink for PlainHandle {
    fn send_chunk<'a>(&'a self, chunk: &'a [u8]) -> BoxFuture<'a, CliResult<()>> {
        Box::pin(self.send_stdin(chunk))
    }

    fn send_end<'a>(&'a self) -> BoxFuture<'a, CliResult<()>> {
        Box::pin(self.send_end_stdin())
    }
}

/// Copy `input` to `sink` until EOF, then signal end of input.
///
/// The end marker goes out exactly once, also when reading or sending
/// fails part way.
pub fn spawn_stdin_pump<R, S>(input: R, sink: S) -> JoinHandle<CliResult<()>>
where
    R: AsyncRead + Send + Unpin + 'static,
    S: StdinSink,
{
    tokio::spawn(async move {
        let copied = copy_chunks(input, &sink).await;
        if let Err(e) = &copied {
            tracing::debug!(error = %e, "stdin forwarding stopped early");
        }
        let ended = sink.send_end().await;
        copied.and(ended)
    })
}

async fn copy_chunks<R: AsyncRead + Unpin, S: StdinSink>(mut input: R, sink: &S) -> CliResult<()> {
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.send_chunk(&buf[..n]).await?;
    }
}
