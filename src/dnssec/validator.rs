use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

use super::{
    DnsSecAlgorithm, DnsSecError, TrustAnchorStore, digest::ds_matches, errors::Result,
};
use crate::dns::common::{normalize_name, write_canonical_name};
use crate::dns::enums::DNSResourceType;
use crate::dns::resource::{DNSResource, DnskeyRecord, DsRecord, RrsigRecord};

/// Records of `rtype` owned by `name` within one section
pub fn rrset<'a>(section: &'a [DNSResource], name: &str, rtype: DNSResourceType) -> Vec<&'a DNSResource> {
    let name = normalize_name(name);
    section
        .iter()
        .filter(|rr| rr.rtype == rtype && normalize_name(&rr.name()) == name)
        .collect()
}

/// RRSIGs in `section` covering `rtype` at `name`
pub fn signatures<'a>(
    section: &'a [DNSResource],
    name: &str,
    rtype: DNSResourceType,
) -> Vec<&'a RrsigRecord> {
    rrset(section, name, DNSResourceType::RRSIG)
        .into_iter()
        .filter_map(|rr| rr.rrsig())
        .filter(|sig| sig.type_covered == rtype)
        .collect()
}

/// The byte string an RRSIG signs (RFC 4034 section 3.1.8.1): the RRSIG
/// RDATA without signature, then every record of the set in canonical
/// form and canonical order.
pub fn signed_data(rrsig: &RrsigRecord, records: &[&DNSResource]) -> Vec<u8> {
    let mut data = rrsig.signed_prefix();

    let mut rdatas: Vec<Vec<u8>> = records.iter().map(|rr| rr.canonical_rdata()).collect();
    rdatas.sort();
    rdatas.dedup();

    let Some(first) = records.first() else {
        return data;
    };

    let mut owner = Vec::new();
    let labels: Vec<String> = first.labels.iter().filter(|l| !l.is_empty()).cloned().collect();
    if (rrsig.labels as usize) < labels.len() {
        // Wildcard expansion: the signature covers "*.<closest encloser>"
        let mut wildcard = vec!["*".to_string()];
        wildcard.extend_from_slice(&labels[labels.len() - rrsig.labels as usize..]);
        write_canonical_name(&mut owner, &wildcard);
    } else {
        write_canonical_name(&mut owner, &labels);
    }

    let rtype: u16 = first.rtype.into();
    let rclass: u16 = first.rclass.into();
    for rdata in rdatas {
        data.extend_from_slice(&owner);
        data.extend_from_slice(&rtype.to_be_bytes());
        data.extend_from_slice(&rclass.to_be_bytes());
        data.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
        data.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&rdata);
    }

    data
}

/// Signature and delegation checks against a fixed set of trust anchors
pub struct DnsSecValidator {
    trust_anchors: Arc<TrustAnchorStore>,
    /// Overrides the clock used for signature validity windows
    current_time: Option<u32>,
}

impl DnsSecValidator {
    pub fn new(trust_anchors: Arc<TrustAnchorStore>) -> Self {
        Self {
            trust_anchors,
            current_time: None,
        }
    }

    /// Set current time for testing
    pub fn set_current_time(&mut self, time: u32) {
        self.current_time = Some(time);
    }

    fn get_current_time(&self) -> u32 {
        self.current_time.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        })
    }

    pub fn trust_anchors(&self) -> &TrustAnchorStore {
        &self.trust_anchors
    }

    /// Serial-number comparison of the validity window (RFC 4034 section 3.1.5)
    fn check_signature_validity(&self, rrsig: &RrsigRecord) -> Result<()> {
        let now = self.get_current_time();
        if (now.wrapping_sub(rrsig.inception) as i32) < 0 {
            return Err(DnsSecError::SignatureNotYetValid);
        }
        if (rrsig.expiration.wrapping_sub(now) as i32) < 0 {
            return Err(DnsSecError::SignatureExpired);
        }
        Ok(())
    }

    /// Verifies `records` with any of `rrsigs` made by one of `keys` of
    /// `zone`. Succeeds on the first signature that checks out.
    pub fn verify_rrset(
        &self,
        zone: &str,
        records: &[&DNSResource],
        rrsigs: &[&RrsigRecord],
        keys: &[DnskeyRecord],
    ) -> Result<()> {
        if rrsigs.is_empty() {
            return Err(DnsSecError::NoRrsig);
        }
        let zone = normalize_name(zone);
        let mut last_error = DnsSecError::NoDnsKey;

        for rrsig in rrsigs {
            if normalize_name(&rrsig.signer_name) != zone {
                trace!("Skipping RRSIG by {} while checking {}", rrsig.signer_name, zone);
                continue;
            }
            if let Err(e) = self.check_signature_validity(rrsig) {
                last_error = e;
                continue;
            }
            let Some(algorithm) = DnsSecAlgorithm::from_u8(rrsig.algorithm) else {
                last_error = DnsSecError::UnsupportedAlgorithm(rrsig.algorithm);
                continue;
            };

            let message = signed_data(rrsig, records);
            for key in keys.iter().filter(|k| {
                k.is_zone_key() && k.algorithm == rrsig.algorithm && k.key_tag() == rrsig.key_tag
            }) {
                match algorithm.verify(&key.public_key, &message, &rrsig.signature) {
                    Ok(()) => {
                        trace!(
                            "RRSIG {} {} verified with key {}",
                            zone, rrsig.type_covered, rrsig.key_tag
                        );
                        return Ok(());
                    }
                    Err(e) => last_error = e,
                }
            }
        }

        Err(last_error)
    }

    /// Checks that the DNSKEY set in `answers` is signed by one of its own
    /// key-signing keys and returns the keys.
    pub fn verify_dnskey_set(&self, zone: &str, answers: &[DNSResource]) -> Result<Vec<DnskeyRecord>> {
        let records = rrset(answers, zone, DNSResourceType::DNSKEY);
        let keys: Vec<DnskeyRecord> = records.iter().filter_map(|rr| rr.dnskey()).cloned().collect();
        if keys.is_empty() {
            return Err(DnsSecError::NoDnsKey);
        }

        let ksks: Vec<DnskeyRecord> = keys.iter().filter(|k| k.is_ksk()).cloned().collect();
        let rrsigs = signatures(answers, zone, DNSResourceType::DNSKEY);
        self.verify_rrset(zone, &records, &rrsigs, &ksks).map_err(|e| {
            warn!("DNSKEY set of {} not self-signed: {}", zone, e);
            DnsSecError::DnskeySelfVerificationFailed(normalize_name(zone))
        })?;

        debug!("DNSKEY set of {} is self-signed ({} keys)", zone, keys.len());
        Ok(keys)
    }

    /// Checks the parent's DS RRset for `child`: it must be signed by the
    /// parent keys and one DS must be a digest of a child key-signing key.
    pub fn verify_delegation(
        &self,
        parent: &str,
        child: &str,
        authority: &[DNSResource],
        parent_keys: &[DnskeyRecord],
        child_keys: &[DnskeyRecord],
    ) -> Result<()> {
        let not_verified = || DnsSecError::ZoneNotVerified(normalize_name(child));

        let ds_records = rrset(authority, child, DNSResourceType::DS);
        let rrsigs = signatures(authority, child, DNSResourceType::DS);
        self.verify_rrset(parent, &ds_records, &rrsigs, parent_keys)
            .map_err(|e| {
                warn!("DS RRset for {} not signed by {}: {}", child, parent, e);
                not_verified()
            })?;

        let ds_set: Vec<&DsRecord> = ds_records.iter().filter_map(|rr| rr.ds()).collect();
        let vouched = child_keys
            .iter()
            .filter(|key| key.is_ksk())
            .any(|key| ds_set.iter().any(|ds| ds_matches(child, key, ds)));

        if vouched {
            debug!("DS digest for {} matches a key-signing key", child);
            Ok(())
        } else {
            warn!("No DS digest for {} matches its key-signing keys", child);
            Err(not_verified())
        }
    }

    /// Verifies the root DNSKEY set against the trust anchors and its own
    /// signature.
    pub fn verify_root_keys(&self, answers: &[DNSResource]) -> Result<Vec<DnskeyRecord>> {
        let keys: Vec<DnskeyRecord> = rrset(answers, ".", DNSResourceType::DNSKEY)
            .iter()
            .filter_map(|rr| rr.dnskey())
            .cloned()
            .collect();
        self.trust_anchors.verify_root(&keys)?;
        self.verify_dnskey_set(".", answers)
    }
}
