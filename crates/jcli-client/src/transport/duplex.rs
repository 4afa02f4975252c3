//! A full-duplex byte stream built from two HTTP POSTs.
//!
//! Both requests go to the same endpoint and are paired on the server by a
//! random `Session` header: `Side: download` gets a long-lived response
//! body (server → client), `Side: upload` streams a chunked request body
//! (client → server).

use std::io;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, RequestBuilder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::PollSender;
use url::Url;
use uuid::Uuid;

use jcli_core::{BoxFuture, CliError, CliResult, DuplexConnection, TransportKind};

use super::Connector;
use crate::http::{self, HttpContext};
use crate::resources::ResourceSet;

pub const DUPLEX_HEADER: &str = "Hudson-Duplex";
pub const CRUMB_PATH: &str = r#"crumbIssuer/api/xml?xpath=concat(//crumbRequestField,":",//crumb)"#;
/// Relative target of the plain protocol.
pub const PLAIN_CLI_PATH: &str = "cli?remoting=false";

/// Upload chunks buffered before writes wait.
const UPLOAD_QUEUE: usize = 16;

/// A CSRF protection token: header name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub field: String,
    pub value: String,
}

/// Ask the crumb issuer for a token. Any failure means "no crumb".
pub async fn fetch_crumb(http: &HttpContext, base: &Url) -> Option<Crumb> {
    let url = http::join(base, CRUMB_PATH).ok()?;
    let response = match http.get(url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            tracing::debug!(status = %r.status(), "no crumb issued");
            return None;
        }
        Err(e) => {
            tracing::debug!(error = %e, "crumb request failed");
            return None;
        }
    };
    let text = response.text().await.ok()?;
    let (field, value) = text.trim().split_once(':')?;
    Some(Crumb {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// An established duplex HTTP pair.
pub struct FullDuplexHttpStream {
    pub session: Uuid,
    pub connection: DuplexConnection,
    /// Resolves once the upload request completes.
    pub upload: JoinHandle<CliResult<()>>,
}

impl FullDuplexHttpStream {
    pub async fn connect(http: &HttpContext, base: &Url, target: &str) -> CliResult<Self> {
        let url = http::join(base, target)?;
        let crumb = fetch_crumb(http, base).await;
        let session = Uuid::new_v4();

        let prepare = |side: &str| -> RequestBuilder {
            let request = http
                .post(url.clone())
                .header("Session", session.to_string())
                .header("Side", side);
            match &crumb {
                Some(c) => request.header(c.field.as_str(), c.value.as_str()),
                None => request,
            }
        };

        tracing::debug!(%url, %session, "establishing download side");
        let response = prepare("download")
            .send()
            .await
            .map_err(|e| CliError::Connect(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(CliError::Http(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        if !response.headers().contains_key(DUPLEX_HEADER) {
            return Err(CliError::NoServerDetected(format!(
                "{url}, or it is not serving the HTTP duplex transport"
            )));
        }
        let (failed_tx, failed_rx) = oneshot::channel::<String>();
        let body = Box::pin(response.bytes_stream().map(|r| r.map_err(io::Error::other)));
        let mut reader = WatchedDownload {
            inner: StreamReader::new(body),
            upload_failed: Some(failed_rx),
        };

        match reader.read_u8().await {
            Ok(0) => {}
            Ok(b) => {
                return Err(CliError::FramingViolation(format!(
                    "expected a zero byte to open the stream, got {b:#04x}"
                )))
            }
            Err(e) => {
                return Err(CliError::FramingViolation(format!(
                    "stream closed before it opened: {e}"
                )))
            }
        }

        tracing::debug!(%session, "establishing upload side");
        let (tx, rx) = mpsc::channel::<Vec<u8>>(UPLOAD_QUEUE);
        let chunks = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, io::Error>(chunk), rx))
        });
        let upload = prepare("upload")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::wrap_stream(chunks));
        let upload = tokio::spawn(async move {
            let result = match upload.send().await {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(CliError::Http(format!(
                    "upload side returned {}",
                    response.status()
                ))),
                Err(e) => Err(CliError::Http(format!("upload failed: {e}"))),
            };
            if let Err(e) = &result {
                tracing::debug!(%session, error = %e, "upload side failed");
                let _ = failed_tx.send(e.to_string());
            }
            result
        });

        Ok(Self {
            session,
            connection: DuplexConnection::new(reader, BodyWriter::new(tx)),
            upload,
        })
    }
}

/// The download body, cut short with the upload's error once the upload
/// side fails.
struct WatchedDownload<R> {
    inner: R,
    upload_failed: Option<oneshot::Receiver<String>>,
}

impl<R: AsyncRead + Unpin> AsyncRead for WatchedDownload<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if let Some(failed) = this.upload_failed.as_mut() {
            match Pin::new(failed).poll(cx) {
                Poll::Ready(Ok(msg)) => {
                    this.upload_failed = None;
                    return Poll::Ready(Err(io::Error::other(msg)));
                }
                // Upload finished cleanly.
                Poll::Ready(Err(_)) => this.upload_failed = None,
                Poll::Pending => {}
            }
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

/// Feeds the upload request body. Each write becomes one chunk, so a
/// buffer is never split across chunks.
pub struct BodyWriter {
    sender: PollSender<Vec<u8>>,
}

impl BodyWriter {
    pub fn new(sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            sender: PollSender::new(sender),
        }
    }
}

fn upload_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "upload stream closed")
}

impl AsyncWrite for BodyWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(self.sender.poll_reserve(cx)).map_err(|_| upload_closed())?;
        self.sender
            .send_item(buf.to_vec())
            .map_err(|_| upload_closed())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sender.close();
        Poll::Ready(Ok(()))
    }
}

/// Opens the plain protocol endpoint over a duplex HTTP pair.
pub struct HttpConnector {
    pub http: HttpContext,
    pub base: Url,
    pub resources: Arc<ResourceSet>,
}

impl Connector for HttpConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn connect<'a>(&'a self) -> BoxFuture<'a, CliResult<DuplexConnection>> {
        Box::pin(async move {
            let stream = FullDuplexHttpStream::connect(&self.http, &self.base, PLAIN_CLI_PATH).await?;
            self.resources.register(stream.upload.abort_handle());
            Ok(stream.connection)
        })
    }
}
