//! Transport-level types shared by every jcli connection mode.
//!
//! Whatever wire protocol established it, a connection is handed to the
//! command layer as a pair of boxed async halves.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// A boxed, sendable future, used by the object-safe capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established bidirectional byte stream.
pub struct DuplexConnection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl DuplexConnection {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn into_parts(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for DuplexConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexConnection").finish_non_exhaustive()
    }
}

/// The wire protocol a connection was made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Remoting over the advertised TCP CLI port.
    CliPort,
    /// The framed plain protocol over a duplex HTTP pair.
    Http,
    /// An exec channel through the external SSH client.
    Ssh,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CliPort => f.write_str("CLI port"),
            Self::Http => f.write_str("HTTP"),
            Self::Ssh => f.write_str("SSH"),
        }
    }
}
