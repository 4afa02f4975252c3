//! AES/CFB8 stream wrappers.
//!
//! CFB8 works one byte at a time, so the wrappers transform exactly the
//! bytes that pass through and never buffer partial blocks.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::SessionKey;

type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Decrypts everything read from `inner`.
pub struct CipherReader<R> {
    inner: R,
    cipher: Aes128Cfb8Dec,
}

impl<R> CipherReader<R> {
    pub fn new(inner: R, key: &SessionKey) -> Self {
        let k = GenericArray::from_slice(key.as_bytes());
        Self {
            inner,
            cipher: Aes128Cfb8Dec::new(k, k),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CipherReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        for byte in &mut buf.filled_mut()[before..] {
            this.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
        Poll::Ready(Ok(()))
    }
}

/// Encrypts everything written to `inner`.
///
/// Encrypted bytes the inner writer has not yet accepted are held in
/// `pending` and drained before new input is taken, so the keystream never
/// advances past what the peer will see.
pub struct CipherWriter<W> {
    inner: W,
    cipher: Aes128Cfb8Enc,
    pending: Vec<u8>,
}

impl<W> CipherWriter<W> {
    pub fn new(inner: W, key: &SessionKey) -> Self {
        let k = GenericArray::from_slice(key.as_bytes());
        Self {
            inner,
            cipher: Aes128Cfb8Enc::new(k, k),
            pending: Vec::new(),
        }
    }
}

impl<W: AsyncWrite + Unpin> CipherWriter<W> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.drain(..n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CipherWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        let mut encrypted = buf.to_vec();
        for byte in &mut encrypted {
            this.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
        }
        // The input is consumed now; whatever the inner writer refuses
        // goes out on the next write or flush.
        match Pin::new(&mut this.inner).poll_write(cx, &encrypted) {
            Poll::Ready(Ok(n)) => this.pending.extend_from_slice(&encrypted[n..]),
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => this.pending = encrypted,
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
