//! HTTP `CONNECT` tunnelling for the direct CLI-port connection.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use jcli_core::{CliError, CliResult};

use crate::transport::cli_port::connect_tcp;

/// Longest proxy reply header we are willing to buffer.
const MAX_REPLY: usize = 16 * 1024;

/// A `host:port` HTTP proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for ProxyAddress {
    type Err = CliError;

    fn from_str(s: &str) -> CliResult<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CliError::Config(format!("port not specified in proxy {s}")))?;
        if host.is_empty() {
            return Err(CliError::Config(format!("host not specified in proxy {s}")));
        }
        let port = port
            .parse()
            .map_err(|_| CliError::Config(format!("invalid port in proxy {s}")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connect to `proxy` and ask it to tunnel to `target` (`host:port`).
pub async fn open_tunnel(
    proxy: &ProxyAddress,
    target: &str,
    timeout: Duration,
) -> CliResult<TcpStream> {
    let mut stream = connect_tcp(&proxy.to_string(), timeout).await?;
    negotiate_tunnel(&mut stream, target).await?;
    tracing::debug!(%proxy, target, "proxy tunnel established");
    Ok(stream)
}

/// Send the `CONNECT` request on `stream` and consume the reply header.
pub async fn negotiate_tunnel<S>(stream: &mut S, target: &str) -> CliResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("CONNECT {target} HTTP/1.0\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Byte at a time so nothing past the header is consumed.
    let mut reply = Vec::new();
    while !reply.ends_with(b"\r\n\r\n") {
        if reply.len() >= MAX_REPLY {
            return Err(CliError::ProxyTunnelFailed("reply header too long".into()));
        }
        match stream.read_u8().await {
            Ok(b) => reply.push(b),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(CliError::ProxyTunnelFailed(format!(
                    "connection closed mid-reply: {}",
                    String::from_utf8_lossy(&reply)
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let reply = String::from_utf8_lossy(&reply);
    if !reply.starts_with("HTTP/1.0 200 ") {
        return Err(CliError::ProxyTunnelFailed(reply.trim_end().to_string()));
    }
    Ok(())
}

/// Write half that ignores shutdown; the socket is torn down through the
/// session's resource set instead.
pub struct NoCloseWriter<W>(W);

impl<W> NoCloseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self(inner)
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for NoCloseWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
}
