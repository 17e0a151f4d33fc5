use ring::signature;
use std::fmt;

use super::errors::{DnsSecError, Result};

/// DNSSEC signing algorithms (IANA "DNS Security Algorithm Numbers")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DnsSecAlgorithm {
    RsaMd5 = 1,
    DSA = 3,
    RsaSha1 = 5,
    DsaNsec3Sha1 = 6,
    RsaSha1Nsec3Sha1 = 7,
    RsaSha256 = 8,
    RsaSha512 = 10,
    EccGost = 12,
    EcdsaP256Sha256 = 13,
    EcdsaP384Sha384 = 14,
    Ed25519 = 15,
    Ed448 = 16,
}

impl DnsSecAlgorithm {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::RsaMd5),
            3 => Some(Self::DSA),
            5 => Some(Self::RsaSha1),
            6 => Some(Self::DsaNsec3Sha1),
            7 => Some(Self::RsaSha1Nsec3Sha1),
            8 => Some(Self::RsaSha256),
            10 => Some(Self::RsaSha512),
            12 => Some(Self::EccGost),
            13 => Some(Self::EcdsaP256Sha256),
            14 => Some(Self::EcdsaP384Sha384),
            15 => Some(Self::Ed25519),
            16 => Some(Self::Ed448),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::RsaSha1
                | Self::RsaSha1Nsec3Sha1
                | Self::RsaSha256
                | Self::RsaSha512
                | Self::EcdsaP256Sha256
                | Self::EcdsaP384Sha384
                | Self::Ed25519
        )
    }

    /// Verifies `sig` over `message` with a DNSKEY public key in wire form
    pub fn verify(&self, public_key: &[u8], message: &[u8], sig: &[u8]) -> Result<()> {
        match self {
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 | Self::RsaSha256 | Self::RsaSha512 => {
                let params = match self {
                    Self::RsaSha256 => &signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY,
                    Self::RsaSha512 => &signature::RSA_PKCS1_1024_8192_SHA512_FOR_LEGACY_USE_ONLY,
                    _ => &signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY,
                };
                rsa_components(public_key)?
                    .verify(params, message, sig)
                    .map_err(|_| DnsSecError::SignatureVerificationFailed)
            }
            Self::EcdsaP256Sha256 | Self::EcdsaP384Sha384 => {
                let alg = if *self == Self::EcdsaP256Sha256 {
                    &signature::ECDSA_P256_SHA256_FIXED
                } else {
                    &signature::ECDSA_P384_SHA384_FIXED
                };
                // ring wants the uncompressed point marker in front
                let mut key = Vec::with_capacity(public_key.len() + 1);
                key.push(0x04);
                key.extend_from_slice(public_key);
                signature::UnparsedPublicKey::new(alg, &key)
                    .verify(message, sig)
                    .map_err(|_| DnsSecError::SignatureVerificationFailed)
            }
            Self::Ed25519 => signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
                .verify(message, sig)
                .map_err(|_| DnsSecError::SignatureVerificationFailed),
            other => Err(DnsSecError::UnsupportedAlgorithm(other.to_u8())),
        }
    }
}

/// Splits an RFC 3110 RSA key into exponent and modulus
fn rsa_components(key: &[u8]) -> Result<signature::RsaPublicKeyComponents<&[u8]>> {
    let (exp_len, offset) = match key {
        [0, hi, lo, ..] => (((*hi as usize) << 8) | *lo as usize, 3),
        [len, ..] => (*len as usize, 1),
        [] => return Err(DnsSecError::InvalidPublicKey),
    };
    if key.len() <= offset + exp_len {
        return Err(DnsSecError::InvalidPublicKey);
    }

    Ok(signature::RsaPublicKeyComponents {
        e: &key[offset..offset + exp_len],
        n: &key[offset + exp_len..],
    })
}

impl fmt::Display for DnsSecAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RsaMd5 => "RSAMD5",
            Self::DSA => "DSA",
            Self::RsaSha1 => "RSASHA1",
            Self::DsaNsec3Sha1 => "DSA-NSEC3-SHA1",
            Self::RsaSha1Nsec3Sha1 => "RSASHA1-NSEC3-SHA1",
            Self::RsaSha256 => "RSASHA256",
            Self::RsaSha512 => "RSASHA512",
            Self::EccGost => "ECC-GOST",
            Self::EcdsaP256Sha256 => "ECDSAP256SHA256",
            Self::EcdsaP384Sha384 => "ECDSAP384SHA384",
            Self::Ed25519 => "ED25519",
            Self::Ed448 => "ED448",
        };
        f.write_str(name)
    }
}
