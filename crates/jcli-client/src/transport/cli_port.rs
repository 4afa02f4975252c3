//! Direct TCP connection to the advertised CLI port.

use std::net::Shutdown;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use url::Url;

use jcli_core::{BoxFuture, BoxedWriter, CliError, CliResult, DuplexConnection, TransportKind};

use super::Connector;
use crate::handshake;
use crate::http::HttpContext;
use crate::probe::{self, EndpointDescriptor};
use crate::proxy::{self, NoCloseWriter, ProxyAddress};
use crate::resources::{Closable, ResourceSet};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// `TcpStream::connect` bounded by `timeout`.
pub async fn connect_tcp(address: &str, timeout: Duration) -> CliResult<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(CliError::Connect(format!("{address}: {e}"))),
        Err(_) => Err(CliError::Connect(format!(
            "{address}: timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

fn configure_socket(stream: &TcpStream) -> CliResult<()> {
    stream.set_nodelay(true)?;
    socket2::SockRef::from(stream).set_keepalive(true)?;
    Ok(())
}

/// Shuts a socket down from outside the task that owns it.
pub struct SocketCloser(std::net::TcpStream);

impl SocketCloser {
    /// Split off a handle that can close `stream` later.
    pub fn attach(stream: TcpStream) -> CliResult<(TcpStream, Self)> {
        let std_stream = stream.into_std()?;
        let handle = std_stream.try_clone()?;
        Ok((TcpStream::from_std(std_stream)?, Self(handle)))
    }
}

impl Closable for SocketCloser {
    fn name(&self) -> &str {
        "CLI port socket"
    }

    fn close(&mut self) -> CliResult<()> {
        match self.0.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Connect to `endpoint` (through `proxy` if given) and run the preamble.
pub async fn open(
    endpoint: &EndpointDescriptor,
    proxy: Option<&ProxyAddress>,
    timeout: Duration,
    resources: &ResourceSet,
) -> CliResult<DuplexConnection> {
    let address = endpoint.address();
    tracing::debug!(%address, version = endpoint.version as u8, "connecting to CLI port");

    let stream = match proxy {
        Some(proxy) => proxy::open_tunnel(proxy, &address, timeout).await?,
        None => connect_tcp(&address, timeout).await?,
    };
    configure_socket(&stream)?;
    let (stream, mut closer) = SocketCloser::attach(stream)?;

    // `io::split` halves leave the socket open when dropped; only the
    // closer shuts it down.
    let (reader, writer) = tokio::io::split(stream);
    let writer: BoxedWriter = match proxy {
        Some(_) => Box::new(NoCloseWriter::new(writer)),
        None => Box::new(writer),
    };
    match handshake::negotiate(
        endpoint.version,
        reader,
        writer,
        endpoint.identity.as_deref(),
    )
    .await
    {
        Ok(conn) => {
            resources.register(closer);
            Ok(conn)
        }
        Err(e) => {
            if let Err(close_err) = closer.close() {
                tracing::debug!(%address, error = %close_err, "closing rejected socket failed");
            }
            Err(e)
        }
    }
}

/// Discovers the CLI port and connects to it.
pub struct CliPortConnector {
    pub http: HttpContext,
    pub base: Url,
    pub proxy: Option<ProxyAddress>,
    pub connect_timeout: Duration,
    pub resources: Arc<ResourceSet>,
}

impl Connector for CliPortConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::CliPort
    }

    fn connect<'a>(&'a self) -> BoxFuture<'a, CliResult<DuplexConnection>> {
        Box::pin(async move {
            let endpoint = probe::probe(&self.http, &self.base).await?;
            open(
                &endpoint,
                self.proxy.as_ref(),
                self.connect_timeout,
                &self.resources,
            )
            .await
        })
    }
}
