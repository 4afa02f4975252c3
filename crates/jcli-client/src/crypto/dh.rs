//! Finite-field Diffie-Hellman over server-chosen parameters.
//!
//! Public keys travel as X.509 `SubjectPublicKeyInfo` DER with the PKCS#3
//! `dhKeyAgreement` algorithm:
//!
//! ```text
//! SEQUENCE {
//!   SEQUENCE { OID 1.2.840.113549.1.3.1, SEQUENCE { INTEGER p, INTEGER g, INTEGER l OPTIONAL } }
//!   BIT STRING { INTEGER y }
//! }
//! ```

use der::asn1::{BitStringRef, ObjectIdentifier, UintRef};
use der::{Decode, Encode, Sequence};
use num_bigint::BigUint;
use rand::RngCore;

use jcli_core::{CliError, CliResult};

/// PKCS#3 `dhKeyAgreement`.
pub const DH_KEY_AGREEMENT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.3.1");

/// Smallest prime we agree to compute over.
const MIN_PRIME_BITS: u64 = 512;

#[derive(Sequence)]
struct DhParameterInfo<'a> {
    prime: UintRef<'a>,
    base: UintRef<'a>,
    #[asn1(optional = "true")]
    private_value_length: Option<u32>,
}

#[derive(Sequence)]
struct DhAlgorithm<'a> {
    algorithm: ObjectIdentifier,
    parameters: DhParameterInfo<'a>,
}

#[derive(Sequence)]
struct DhSubjectPublicKeyInfo<'a> {
    algorithm: DhAlgorithm<'a>,
    subject_public_key: BitStringRef<'a>,
}

fn der_error(e: der::Error) -> CliError {
    CliError::Crypto(format!("malformed DH key: {e}"))
}

/// Group parameters chosen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    pub prime: BigUint,
    pub base: BigUint,
    pub private_value_length: Option<u32>,
}

impl DhGroup {
    fn prime_len(&self) -> usize {
        ((self.prime.bits() + 7) / 8) as usize
    }
}

/// One side's public half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhPublicKey {
    pub group: DhGroup,
    pub y: BigUint,
}

impl DhPublicKey {
    pub fn from_der(der: &[u8]) -> CliResult<Self> {
        let info = DhSubjectPublicKeyInfo::from_der(der).map_err(der_error)?;
        if info.algorithm.algorithm != DH_KEY_AGREEMENT {
            return Err(CliError::Crypto(format!(
                "unexpected key algorithm {}",
                info.algorithm.algorithm
            )));
        }
        let params = &info.algorithm.parameters;
        let y_der = info
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| CliError::Crypto("DH public key has unused bits".into()))?;
        let y = UintRef::from_der(y_der).map_err(der_error)?;

        Ok(Self {
            group: DhGroup {
                prime: BigUint::from_bytes_be(params.prime.as_bytes()),
                base: BigUint::from_bytes_be(params.base.as_bytes()),
                private_value_length: params.private_value_length,
            },
            y: BigUint::from_bytes_be(y.as_bytes()),
        })
    }

    pub fn to_der(&self) -> CliResult<Vec<u8>> {
        let prime = self.group.prime.to_bytes_be();
        let base = self.group.base.to_bytes_be();
        let y = self.y.to_bytes_be();
        let y_der = UintRef::new(&y)
            .and_then(|u| u.to_der())
            .map_err(der_error)?;

        let info = DhSubjectPublicKeyInfo {
            algorithm: DhAlgorithm {
                algorithm: DH_KEY_AGREEMENT,
                parameters: DhParameterInfo {
                    prime: UintRef::new(&prime).map_err(der_error)?,
                    base: UintRef::new(&base).map_err(der_error)?,
                    private_value_length: self.group.private_value_length,
                },
            },
            subject_public_key: BitStringRef::from_bytes(&y_der).map_err(der_error)?,
        };
        info.to_der().map_err(der_error)
    }
}

/// An ephemeral key pair on a server-chosen group.
pub struct DhKeyPair {
    group: DhGroup,
    x: BigUint,
    y: BigUint,
}

impl DhKeyPair {
    /// Generate a fresh key pair on `group`.
    pub fn generate(group: &DhGroup) -> CliResult<Self> {
        let prime_bits = group.prime.bits();
        if prime_bits < MIN_PRIME_BITS {
            return Err(CliError::Crypto(format!(
                "DH prime too small: {prime_bits} bits"
            )));
        }
        let two = BigUint::from(2u32);
        if group.base < two || group.base >= group.prime {
            return Err(CliError::Crypto("DH generator out of range".into()));
        }

        let bits = match group.private_value_length {
            Some(l) if l > 0 => (l as u64).min(prime_bits - 1),
            _ => prime_bits - 1,
        };
        let x = random_bits(bits).max(two);
        let y = group.base.modpow(&x, &group.prime);

        Ok(Self {
            group: group.clone(),
            x,
            y,
        })
    }

    pub fn public_key(&self) -> DhPublicKey {
        DhPublicKey {
            group: self.group.clone(),
            y: self.y.clone(),
        }
    }

    /// Compute the shared secret, left-padded to the byte length of the prime.
    pub fn agree(&self, peer: &DhPublicKey) -> CliResult<Vec<u8>> {
        if peer.group != self.group {
            return Err(CliError::Crypto("peer uses different DH parameters".into()));
        }
        let one = BigUint::from(1u32);
        let upper = &self.group.prime - &one;
        if peer.y <= one || peer.y >= upper {
            return Err(CliError::Crypto("peer DH public value out of range".into()));
        }

        let secret = peer.y.modpow(&self.x, &self.group.prime).to_bytes_be();
        let len = self.group.prime_len();
        let mut padded = vec![0u8; len.saturating_sub(secret.len())];
        padded.extend(secret);
        Ok(padded)
    }
}

fn random_bits(bits: u64) -> BigUint {
    let len = ((bits + 7) / 8) as usize;
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    let excess = (len as u64 * 8 - bits) as u32;
    if let Some(first) = bytes.first_mut() {
        *first &= 0xFFu8.checked_shr(excess).unwrap_or(0);
    }
    BigUint::from_bytes_be(&bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    /// A DH public key on the ffdhe2048 group, encoded by OpenSSL.
    pub(crate) const OPENSSL_DH_KEY: &str = "MIICJTCCARcGCSqGSIb3DQEDATCCAQgCggEBAP//////////rfhUWKK7Spqv3FYgJz088di5xYPOLTaVqeE2QRRkM/vMk53OJJs++X0v42NjDHXY9oGyAq7EYXrT3x7V1f1lYSQz9R9fBm7QhWNlVT3tGvO1VxNef1fJNZhPDHDg5ot34qaJ2vPv6HId8VihNq3nNTCsyk9IOnl6vAqxgrMk+2HRCKlLssjj+7lq2rdg1/RoHU9Co945TfSuVu3nY3K7GQsHp8juCm1wngL84c334uzANATNKDQvYZFy/pzphYP/jk8SMu7ygYPD/jsbTG+tczu1/LwuwiAFxY7xg30Wg7LG80omwbLv+ohrQjhhKFyX//////////8CAQIDggEGAAKCAQEA6ESakEDFRtTiJZZv9fh6YFYSSoZnfLHYjv4+o5jXeZ4VfVdk7Iiq2f8jIyrBVBb75Ljhyrp3+go3Lk6HFNm7ljqNsHn64SAYoZgPMgGk7IkG/MpJ/wNvh769HXH/+qltaddomR2Vgm5PyTRRP1wEJiQwb9kr796Z6mq0rBzBW9ux7LTKD4BlLEr82Z6lykIh5szfh2lsQBoi9vqCCXWZ4uc9CnPIDHhpViUU4prS7UEdWA/9dgTa6D2mq6qZIjhR8g6TH+eOrVA0+jRgH0ZzPKx3wa2p3Hq5suNs3bv1XSFxF1JkMn4AZslMb44HiQI5Rtcz3RevVMkEuaGRIF/DkQ==";

    pub(crate) fn ffdhe2048() -> DhGroup {
        let der = STANDARD.decode(OPENSSL_DH_KEY).unwrap();
        DhPublicKey::from_der(&der).unwrap().group
    }

    #[test]
    fn parses_openssl_encoding() {
        let der = STANDARD.decode(OPENSSL_DH_KEY).unwrap();
        let key = DhPublicKey::from_der(&der).unwrap();
        assert_eq!(key.group.prime.bits(), 2048);
        assert_eq!(key.group.base, BigUint::from(2u32));
        assert_eq!(key.group.private_value_length, None);
        assert_eq!(key.to_der().unwrap(), der);
    }

    #[test]
    fn both_sides_agree() {
        let group = ffdhe2048();
        let server = DhKeyPair::generate(&group).unwrap();
        let client = DhKeyPair::generate(&group).unwrap();

        let a = client.agree(&server.public_key()).unwrap();
        let b = server.agree(&client.public_key()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
    }

    #[test]
    fn private_value_length_survives_encoding() {
        let mut group = ffdhe2048();
        group.private_value_length = Some(384);
        let pair = DhKeyPair::generate(&group).unwrap();
        assert!(pair.x.bits() <= 384);

        let der = pair.public_key().to_der().unwrap();
        assert_eq!(DhPublicKey::from_der(&der).unwrap().group, group);
    }

    #[test]
    fn rejects_degenerate_peer_value() {
        let group = ffdhe2048();
        let pair = DhKeyPair::generate(&group).unwrap();
        let bad = DhPublicKey {
            group: group.clone(),
            y: BigUint::from(1u32),
        };
        assert!(matches!(pair.agree(&bad), Err(CliError::Crypto(_))));
    }

    #[test]
    fn rejects_mismatched_group() {
        let group = ffdhe2048();
        let pair = DhKeyPair::generate(&group).unwrap();
        let mut other = pair.public_key();
        other.group.base = BigUint::from(5u32);
        assert!(pair.agree(&other).is_err());
    }

    #[test]
    fn rejects_other_algorithms() {
        use rsa::pkcs8::DecodePrivateKey;
        let key = rsa::RsaPrivateKey::from_pkcs8_pem(include_str!(
            "../../../jcli-core/testdata/other_key.pem"
        ))
        .unwrap();
        let rsa_spki = jcli_core::identity::encode_public_key(&key.to_public_key()).unwrap();
        assert!(matches!(
            DhPublicKey::from_der(&rsa_spki),
            Err(CliError::Crypto(_))
        ));
    }
}
