//! The CLI-port connection preamble and its secured variant.
//!
//! Version 2 on the wire:
//!
//! ```text
//! C → S  UTF "Protocol:CLI2-connect"
//! S → C  UTF "Welcome"
//! S → C  key (server DH public key)
//! C → S  key (client DH public key)
//! ---- AES/CFB8 from here, key = IV = fold(secret, 16) ----
//! S → C  byte[] SHA1withRSA(secret) by the instance identity
//! ```
//!
//! A key is written as a UTF string holding the base64 X.509 encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use jcli_core::identity::{decode_public_key, encode_public_key, sha1_rsa_sign, sha1_rsa_verify};
use jcli_core::{codec, CliError, CliResult, DuplexConnection, InstanceIdentity};

use crate::crypto::{CipherReader, CipherWriter, DhKeyPair, DhPublicKey, SessionKey};
use crate::probe::ProtocolVersion;

pub const CLI_CONNECT: &str = "Protocol:CLI-connect";
pub const CLI2_CONNECT: &str = "Protocol:CLI2-connect";
pub const GREETING: &str = "Welcome";

/// The only signature algorithm family both sides implement.
pub const RSA_ALGORITHM: &str = "RSA";

/// A read half and a write half that speak the handshake primitives.
///
/// Every write is flushed immediately.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    pub async fn write_utf(&mut self, s: &str) -> CliResult<()> {
        codec::write_utf(&mut self.writer, s).await?;
        self.flush().await
    }

    pub async fn read_utf(&mut self) -> CliResult<String> {
        codec::read_utf(&mut self.reader).await
    }

    pub async fn write_byte_array(&mut self, data: &[u8]) -> CliResult<()> {
        codec::write_byte_array(&mut self.writer, data).await?;
        self.flush().await
    }

    pub async fn read_byte_array(&mut self) -> CliResult<Vec<u8>> {
        codec::read_byte_array(&mut self.reader).await
    }

    pub async fn write_bool(&mut self, value: bool) -> CliResult<()> {
        codec::write_bool(&mut self.writer, value).await?;
        self.flush().await
    }

    pub async fn read_bool(&mut self) -> CliResult<bool> {
        codec::read_bool(&mut self.reader).await
    }

    /// Send an X.509-encoded key.
    pub async fn write_key(&mut self, der: &[u8]) -> CliResult<()> {
        self.write_utf(&STANDARD.encode(der)).await
    }

    /// Receive an X.509-encoded key.
    pub async fn read_key(&mut self) -> CliResult<Vec<u8>> {
        let text = self.read_utf().await?;
        STANDARD
            .decode(text.trim())
            .map_err(|e| CliError::Crypto(format!("peer sent an undecodable key: {e}")))
    }

    async fn flush(&mut self) -> CliResult<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Client side of the key agreement: the server picks the group.
    /// Returns the raw shared secret.
    pub async fn diffie_hellman_client(&mut self) -> CliResult<Vec<u8>> {
        let server = DhPublicKey::from_der(&self.read_key().await?)?;
        let ours = DhKeyPair::generate(&server.group)?;
        self.write_key(&ours.public_key().to_der()?).await?;
        ours.agree(&server)
    }

    /// Switch both directions to AES/CFB8 under `key`.
    pub fn encrypt(self, key: &SessionKey) -> Connection<CipherReader<R>, CipherWriter<W>> {
        Connection {
            reader: CipherReader::new(self.reader, key),
            writer: CipherWriter::new(self.writer, key),
        }
    }

    /// Read the peer's public key and its signature over `key ‖ secret`.
    pub async fn verify_identity(&mut self, secret: &[u8]) -> CliResult<RsaPublicKey> {
        let algorithm = self.read_utf().await?;
        if algorithm != RSA_ALGORITHM {
            return Err(CliError::AuthUnsupported(format!(
                "server identity uses {algorithm}"
            )));
        }
        let der = self.read_key().await?;
        let key = decode_public_key(&der)?;
        let signature = self.read_byte_array().await?;
        if !sha1_rsa_verify(&key, &[&der, secret], &signature) {
            return Err(CliError::IdentitySpoofed);
        }
        Ok(key)
    }

    /// Send our public key and a signature over `key ‖ secret`.
    pub async fn prove_identity(&mut self, key: &RsaPrivateKey, secret: &[u8]) -> CliResult<()> {
        let der = encode_public_key(&key.to_public_key())?;
        self.write_utf(RSA_ALGORITHM).await?;
        self.write_key(&der).await?;
        let signature = sha1_rsa_sign(key, &[&der, secret])?;
        self.write_byte_array(&signature).await
    }
}

/// Run the connection preamble for `version` and hand back a buffered
/// stream ready for the remoting layer.
///
/// `identity` is the raw advertised instance identity, if any.
pub async fn negotiate<R, W>(
    version: ProtocolVersion,
    reader: R,
    writer: W,
    identity: Option<&str>,
) -> CliResult<DuplexConnection>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = Connection::new(reader, writer);
    match version {
        ProtocolVersion::V1 => {
            conn.write_utf(CLI_CONNECT).await?;
            let (r, w) = conn.into_parts();
            Ok(DuplexConnection::new(BufReader::new(r), BufWriter::new(w)))
        }
        ProtocolVersion::V2 => {
            let identity = identity.map(InstanceIdentity::from_header).transpose()?;

            conn.write_utf(CLI2_CONNECT).await?;
            let greeting = conn.read_utf().await?;
            if greeting != GREETING {
                return Err(CliError::HandshakeMismatch(format!(
                    "expected {GREETING:?}, got {greeting:?}"
                )));
            }

            let secret = conn.diffie_hellman_client().await?;
            let mut conn = conn.encrypt(&SessionKey::from_secret(&secret));

            let signature = conn.read_byte_array().await?;
            match &identity {
                Some(identity) => {
                    if !sha1_rsa_verify(&identity.key, &[&secret], &signature) {
                        return Err(CliError::IdentitySpoofed);
                    }
                    tracing::debug!(fingerprint = %identity.fingerprint, "server identity verified");
                }
                None => tracing::warn!("server advertised no instance identity; not verified"),
            }

            let (r, w) = conn.into_parts();
            Ok(DuplexConnection::new(BufReader::new(r), BufWriter::new(w)))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::dh::tests::ffdhe2048;
    use crate::crypto::DhGroup;
    use rsa::pkcs8::DecodePrivateKey;
    use tokio::io::{AsyncReadExt, DuplexStream, ReadHalf, WriteHalf};

    pub(crate) const SERVER_PEM: &str = include_str!("../../jcli-core/testdata/server_identity.pem");
    pub(crate) const CLIENT_PEM: &str = include_str!("../../jcli-core/testdata/client_key.pem");
    pub(crate) const OTHER_PEM: &str = include_str!("../../jcli-core/testdata/other_key.pem");

    pub(crate) fn pem_key(pem: &str) -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(pem).unwrap()
    }

    pub(crate) type Half = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    pub(crate) fn pipe() -> (Half, (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>)) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (sr, sw) = tokio::io::split(server);
        (Connection::new(sr, sw), tokio::io::split(client))
    }

    impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
        /// Server side of the key agreement, for fake servers.
        pub(crate) async fn diffie_hellman_server(&mut self, group: &DhGroup) -> Vec<u8> {
            let ours = DhKeyPair::generate(group).unwrap();
            self.write_key(&ours.public_key().to_der().unwrap())
                .await
                .unwrap();
            let client = DhPublicKey::from_der(&self.read_key().await.unwrap()).unwrap();
            ours.agree(&client).unwrap()
        }
    }

    /// A v2 server that signs with `signer` and then echoes four bytes.
    pub(crate) async fn fake_v2_server<R, W>(
        mut server: Connection<R, W>,
        signer: RsaPrivateKey,
        greeting: &str,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        assert_eq!(server.read_utf().await.unwrap(), CLI2_CONNECT);
        server.write_utf(greeting).await.unwrap();
        if greeting != GREETING {
            return;
        }
        let secret = server.diffie_hellman_server(&ffdhe2048()).await;
        let mut server = server.encrypt(&SessionKey::from_secret(&secret));
        let signature = sha1_rsa_sign(&signer, &[&secret]).unwrap();
        server.write_byte_array(&signature).await.unwrap();

        let mut buf = [0u8; 4];
        server.reader.read_exact(&mut buf).await.unwrap();
        server.writer.write_all(&buf).await.unwrap();
        server.writer.flush().await.unwrap();
    }

    pub(crate) fn identity_header() -> String {
        InstanceIdentity::to_header(&pem_key(SERVER_PEM).to_public_key()).unwrap()
    }

    #[tokio::test]
    async fn v2_with_valid_signature() {
        let (server, (r, w)) = pipe();
        let task = tokio::spawn(fake_v2_server(server, pem_key(SERVER_PEM), GREETING));

        let header = identity_header();
        let conn = negotiate(ProtocolVersion::V2, r, w, Some(&header))
            .await
            .unwrap();
        let (mut reader, mut writer) = conn.into_parts();
        writer.write_all(b"ping").await.unwrap();
        writer.flush().await.unwrap();
        let mut echoed = [0u8; 4];
        reader.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn v2_with_tampered_signature() {
        let (server, (r, w)) = pipe();
        let task = tokio::spawn(async move {
            let mut server = server;
            assert_eq!(server.read_utf().await.unwrap(), CLI2_CONNECT);
            server.write_utf(GREETING).await.unwrap();
            let secret = server.diffie_hellman_server(&ffdhe2048()).await;
            let mut server = server.encrypt(&SessionKey::from_secret(&secret));
            let mut signature = sha1_rsa_sign(&pem_key(SERVER_PEM), &[&secret]).unwrap();
            signature[10] ^= 0x01;
            server.write_byte_array(&signature).await.unwrap();
        });

        let header = identity_header();
        let err = negotiate(ProtocolVersion::V2, r, w, Some(&header))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::IdentitySpoofed));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn v2_signed_by_another_key() {
        let (server, (r, w)) = pipe();
        let task = tokio::spawn(fake_v2_server(server, pem_key(OTHER_PEM), GREETING));
        let header = identity_header();
        let err = negotiate(ProtocolVersion::V2, r, w, Some(&header))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::IdentitySpoofed));
        drop(task);
    }

    #[tokio::test]
    async fn v2_wrong_greeting() {
        let (server, (r, w)) = pipe();
        let task = tokio::spawn(fake_v2_server(server, pem_key(SERVER_PEM), "Unknown protocol"));
        let err = negotiate(ProtocolVersion::V2, r, w, None).await.unwrap_err();
        assert!(matches!(err, CliError::HandshakeMismatch(_)));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn v2_bad_identity_header_fails_before_sending() {
        let (mut server, (r, w)) = pipe();
        let err = negotiate(ProtocolVersion::V2, r, w, Some("%%%"))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Crypto(_)));
        // Nothing reached the server; the client halves are gone.
        let mut rest = Vec::new();
        server.reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn v1_sends_preamble_only() {
        let (mut server, (r, w)) = pipe();
        let conn = negotiate(ProtocolVersion::V1, r, w, None).await.unwrap();
        assert_eq!(server.read_utf().await.unwrap(), CLI_CONNECT);

        let (_reader, mut writer) = conn.into_parts();
        writer.write_all(b"raw").await.unwrap();
        writer.flush().await.unwrap();
        let mut buf = [0u8; 3];
        server.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"raw");
    }

    #[tokio::test]
    async fn identity_proof_round_trip() {
        let (mut server, (r, w)) = pipe();
        let mut client = Connection::new(r, w);
        let secret = b"shared-secret".to_vec();
        let client_key = pem_key(CLIENT_PEM);

        let s = secret.clone();
        let verifier = tokio::spawn(async move { server.verify_identity(&s).await });
        client.prove_identity(&client_key, &secret).await.unwrap();
        let key = verifier.await.unwrap().unwrap();
        assert_eq!(key, client_key.to_public_key());
    }
}
