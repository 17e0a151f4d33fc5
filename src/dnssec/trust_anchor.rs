use base64::Engine;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{DnsSecError, Result};
use crate::dns::resource::DnskeyRecord;

/// Root KSK-2010 public key (key tag 19036)
pub const ROOT_KSK_2010: &str = "AwEAAagAIKlVZrpC6Ia7gEzahOR+9W29euxhJhVVLOyQbSEW0O8gcCjFFVQUTf6v58fLjwBd0YI0EzrAcQqBGCzh/RStIoO8g0NfnfL2MTJRkxoXbfDaUeVPQuYEhg37NZWAJQ9VnMVDxP/VHL496M/QZxkjf5/Efucp2gaDX6RS6CXpoY68LsvPVjR0ZSwzz1apAzvN9dlzEheX7ICJBBtuA6G3LQpzW5hOA2hzCTMjJPJ8LbqF6dsV6DoBQzgul0sGIcGOYl7OyQdXfZ57relSQageu+ipAdTTJ25AsRTAoub8ONGcLmqrAmRLKBP1dfwhYB4N7knNnulqQxA+Uk1ihz0=";

/// Root KSK-2017 public key (key tag 20326)
pub const ROOT_KSK_2017: &str = "AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3+/4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kvArMtNROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF0jLHwVN8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+eoZG+SrDK6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfdRUfhHdY6+cn8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwNR1AkUTV74bU=";

/// A root key-signing key trusted without further proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    pub key: DnskeyRecord,
    /// Year of the key rollover that introduced this key
    pub introduced: u16,
}

impl TrustAnchor {
    pub fn new(key: DnskeyRecord, introduced: u16) -> Self {
        Self { key, introduced }
    }

    fn root_rsasha256(public_key: &str, introduced: u16) -> Self {
        let public_key = base64::engine::general_purpose::STANDARD
            .decode(public_key)
            .expect("embedded trust anchor is valid base64");
        Self::new(
            DnskeyRecord {
                flags: DnskeyRecord::ZONE_FLAG | DnskeyRecord::SEP_FLAG,
                protocol: 3,
                algorithm: 8,
                public_key,
            },
            introduced,
        )
    }

    pub fn key_tag(&self) -> u16 {
        self.key.key_tag()
    }
}

/// The set of root anchors a validator trusts
#[derive(Clone)]
pub struct TrustAnchorStore {
    anchors: Arc<RwLock<Vec<TrustAnchor>>>,
}

impl TrustAnchorStore {
    /// Store holding the 2010 and 2017 root key-signing keys
    pub fn new() -> Self {
        Self::with_anchors(vec![
            TrustAnchor::root_rsasha256(ROOT_KSK_2010, 2010),
            TrustAnchor::root_rsasha256(ROOT_KSK_2017, 2017),
        ])
    }

    pub fn with_anchors(anchors: Vec<TrustAnchor>) -> Self {
        Self {
            anchors: Arc::new(RwLock::new(anchors)),
        }
    }

    pub fn add_anchor(&self, anchor: TrustAnchor) {
        self.anchors.write().push(anchor);
    }

    pub fn anchors(&self) -> Vec<TrustAnchor> {
        self.anchors.read().clone()
    }

    pub fn find_by_key_tag(&self, key_tag: u16) -> Option<TrustAnchor> {
        self.anchors
            .read()
            .iter()
            .find(|anchor| anchor.key_tag() == key_tag)
            .cloned()
    }

    /// Checks a root DNSKEY set: every key-signing key in it must equal one
    /// of the anchors. Zone-signing keys are not constrained here.
    pub fn verify_root<'a>(&self, keys: impl IntoIterator<Item = &'a DnskeyRecord>) -> Result<()> {
        let anchors = self.anchors.read();
        let mut ksk_seen = false;

        for key in keys.into_iter().filter(|key| key.is_ksk()) {
            ksk_seen = true;
            match anchors.iter().find(|anchor| anchor.key == *key) {
                Some(anchor) => debug!(
                    "Root KSK {} matches the {} trust anchor",
                    key.key_tag(),
                    anchor.introduced
                ),
                None => {
                    warn!("Root KSK {} matches no trust anchor", key.key_tag());
                    return Err(DnsSecError::TrustAnchorMismatch(key.key_tag()));
                }
            }
        }

        if !ksk_seen {
            return Err(DnsSecError::NoDnsKey);
        }
        Ok(())
    }
}

impl Default for TrustAnchorStore {
    fn default() -> Self {
        Self::new()
    }
}
