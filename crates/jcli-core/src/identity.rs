//! Server instance identities and SHA1withRSA signatures.
//!
//! A server advertises its identity as the base64 encoding of an X.509
//! `SubjectPublicKeyInfo` holding an RSA key. Fingerprints are the hex
//! SHA-256 of that DER encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{CliError, CliResult};

/// Compute the full hex-encoded SHA-256 fingerprint of a DER-encoded key.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// A decoded server identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub key: RsaPublicKey,
    pub fingerprint: String,
}

impl InstanceIdentity {
    /// Decode the value of an `X-Instance-Identity` header.
    pub fn from_header(value: &str) -> CliResult<Self> {
        let der = STANDARD.decode(value.trim())?;
        let key = decode_public_key(&der)?;
        Ok(Self {
            key,
            fingerprint: fingerprint(&der),
        })
    }

    /// Encode a key the way a server advertises it.
    pub fn to_header(key: &RsaPublicKey) -> CliResult<String> {
        Ok(STANDARD.encode(encode_public_key(key)?))
    }
}

/// Parse an X.509 `SubjectPublicKeyInfo` DER blob as an RSA key.
pub fn decode_public_key(der: &[u8]) -> CliResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| CliError::Crypto(format!("invalid RSA public key: {e}")))
}

/// Encode an RSA key as X.509 `SubjectPublicKeyInfo` DER.
pub fn encode_public_key(key: &RsaPublicKey) -> CliResult<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CliError::Crypto(format!("cannot encode RSA public key: {e}")))
}

fn sha1_of(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Sign the concatenation of `parts` with SHA1withRSA (PKCS#1 v1.5).
pub fn sha1_rsa_sign(key: &RsaPrivateKey, parts: &[&[u8]]) -> CliResult<Vec<u8>> {
    Ok(key.sign(Pkcs1v15Sign::new::<Sha1>(), &sha1_of(parts))?)
}

/// Verify a SHA1withRSA signature over the concatenation of `parts`.
pub fn sha1_rsa_verify(key: &RsaPublicKey, parts: &[&[u8]], signature: &[u8]) -> bool {
    key.verify(Pkcs1v15Sign::new::<Sha1>(), &sha1_of(parts), signature)
        .is_ok()
}
