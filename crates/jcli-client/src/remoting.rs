//! Seam to the external remoting layer.
//!
//! The remoting RPC stack is not part of this crate. A [`ChannelFactory`]
//! turns the stream produced by the CLI-port handshake into a
//! [`CliEntryPoint`]; everything after that goes through the entry point.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::io::AsyncWrite;

use jcli_core::{BoxFuture, BoxedReader, BoxedWriter, CliError, CliResult, DuplexConnection};

use crate::auth;

/// Entry point protocol version this client speaks.
pub const ENTRY_POINT_VERSION: i32 = 1;

/// Groovy statement that lifts the channel's command restrictions.
pub const UNRESTRICT_SCRIPT: &str = "hudson.remoting.Channel.current().setRestricted(false)";

/// One command execution request.
pub struct Invocation {
    pub args: Vec<String>,
    pub locale: String,
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
}

/// The remote object commands are dispatched to.
pub trait CliEntryPoint: Send + Sync {
    fn protocol_version(&self) -> BoxFuture<'_, CliResult<i32>>;

    /// Run a command; resolves to its exit code.
    fn main(&self, invocation: Invocation) -> BoxFuture<'_, CliResult<i32>>;

    fn has_command<'a>(&'a self, name: &'a str) -> BoxFuture<'a, CliResult<bool>>;

    /// Open a pipe pair for an authentication protocol.
    fn authenticate<'a>(&'a self, protocol: &'a str) -> BoxFuture<'a, CliResult<DuplexConnection>>;

    fn close(&self) -> BoxFuture<'_, CliResult<()>>;
}

/// Builds a remoting channel on top of an established stream.
pub trait ChannelFactory: Send + Sync {
    fn open(&self, connection: DuplexConnection) -> BoxFuture<'_, CliResult<Box<dyn CliEntryPoint>>>;
}

/// A remoting channel whose entry point version has been checked.
pub struct RemotingSession {
    entry: Box<dyn CliEntryPoint>,
}

impl RemotingSession {
    pub async fn open(factory: &dyn ChannelFactory, connection: DuplexConnection) -> CliResult<Self> {
        let entry = factory.open(connection).await?;
        let version = entry.protocol_version().await?;
        if version != ENTRY_POINT_VERSION {
            if let Err(e) = entry.close().await {
                tracing::debug!(error = %e, "closing mismatched channel failed");
            }
            return Err(CliError::ProtocolMismatch(format!(
                "server speaks CLI entry point version {version}, expected {ENTRY_POINT_VERSION}"
            )));
        }
        Ok(Self { entry })
    }

    pub fn entry_point(&self) -> &dyn CliEntryPoint {
        self.entry.as_ref()
    }

    pub async fn execute(
        &self,
        args: Vec<String>,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> CliResult<i32> {
        self.entry
            .main(Invocation {
                args,
                locale: crate::locale::current_locale(),
                stdin,
                stdout,
                stderr,
            })
            .await
    }

    pub async fn has_command(&self, name: &str) -> CliResult<bool> {
        self.entry.has_command(name).await
    }

    /// Ask the server to lift command restrictions on this channel.
    pub async fn upgrade(&self) -> CliResult<()> {
        let output = SharedBuffer::default();
        let code = self
            .execute(
                vec!["groovy".into(), "=".into()],
                Box::new(std::io::Cursor::new(UNRESTRICT_SCRIPT.as_bytes().to_vec())),
                Box::new(output.clone()),
                Box::new(output.clone()),
            )
            .await?;
        if code != 0 {
            return Err(CliError::Other(format!(
                "failed to upgrade the channel: {}",
                output.text()
            )));
        }
        Ok(())
    }

    pub async fn authenticate(&self, keys: &[RsaPrivateKey]) -> CliResult<RsaPublicKey> {
        auth::authenticate(self.entry.as_ref(), keys).await
    }

    pub async fn close(&self) -> CliResult<()> {
        self.entry.close().await
    }
}

/// In-memory sink shared by stdout and stderr.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
