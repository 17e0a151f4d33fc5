//! Shared helpers for the resolver integration tests: a scripted transport,
//! packet builders and a signer for test zones.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use ring::signature::{Ed25519KeyPair, KeyPair};
use rootwalk::{
    config::{ResolverConfig, RootServer},
    dns::{
        DNSPacket,
        common::{labels_from_name, normalize_name},
        enums::DNSResourceType,
        header::RCODE_NXDOMAIN,
        resource::{DNSResource, DnskeyRecord, DsRecord, RData, RrsigRecord},
    },
    dnssec::{
        DigestType, TrustAnchor,
        digest::ds_digest,
        validator::signed_data,
    },
    error::{DnsError, Result},
    transport::Transport,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Clock used for every signature made here
pub const NOW: u32 = 1_700_000_000;

pub fn server(ip: Ipv4Addr) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(ip), 53)
}

/// One query seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenQuery {
    pub server: SocketAddr,
    pub name: String,
    pub rtype: DNSResourceType,
    pub dnssec: bool,
}

type ScriptKey = (SocketAddr, String, DNSResourceType);

/// Transport answering from a script instead of the network.
///
/// Several responses for the same (server, name, type) are handed out in
/// order and the last one repeats. Unscripted queries fail like a refusing
/// server; silenced servers time out.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<HashMap<ScriptKey, VecDeque<DNSPacket>>>,
    silent: Mutex<HashSet<SocketAddr>>,
    log: Mutex<Vec<SeenQuery>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, ip: Ipv4Addr, name: &str, rtype: DNSResourceType, response: DNSPacket) {
        self.script
            .lock()
            .entry((server(ip), normalize_name(name), rtype))
            .or_default()
            .push_back(response);
    }

    pub fn silence(&self, ip: Ipv4Addr) {
        self.silent.lock().insert(server(ip));
    }

    pub fn queries(&self) -> Vec<SeenQuery> {
        self.log.lock().clone()
    }

    pub fn queries_to(&self, ip: Ipv4Addr) -> usize {
        self.log.lock().iter().filter(|q| q.server == server(ip)).count()
    }

    pub fn query_count(&self) -> usize {
        self.log.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn query(
        &self,
        name: &str,
        rtype: DNSResourceType,
        server: SocketAddr,
        _timeout: Duration,
        want_dnssec: bool,
    ) -> Result<DNSPacket> {
        let name = normalize_name(name);
        self.log.lock().push(SeenQuery {
            server,
            name: name.clone(),
            rtype,
            dnssec: want_dnssec,
        });

        if self.silent.lock().contains(&server) {
            return Err(DnsError::Timeout {
                server: server.to_string(),
            });
        }

        let mut script = self.script.lock();
        let queue = script.get_mut(&(server, name.clone(), rtype)).ok_or_else(|| {
            DnsError::Transport {
                server: server.to_string(),
                reason: format!("no scripted response for {} {}", name, rtype),
            }
        })?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or_else(|| DnsError::Transport {
            server: server.to_string(),
            reason: "empty script".to_string(),
        })
    }
}

/// Config pointing at test roots, with caching off and a fixed seed
pub fn test_config(roots: &[Ipv4Addr]) -> ResolverConfig {
    ResolverConfig {
        root_servers: roots
            .iter()
            .enumerate()
            .map(|(i, ip)| RootServer {
                letter: (b'a' + i as u8) as char,
                addr: server(*ip),
            })
            .collect(),
        enable_caching: false,
        rng_seed: Some(1),
        ..ResolverConfig::default()
    }
}

fn response_for(name: &str, rtype: DNSResourceType) -> DNSPacket {
    let mut packet = DNSPacket::query(0, name, rtype, false);
    packet.header.qr = true;
    packet
}

/// Referral to `zone`: NS records in AUTHORITY, glue (when given) in
/// ADDITIONAL
pub fn referral(
    qname: &str,
    qtype: DNSResourceType,
    zone: &str,
    servers: &[(&str, Option<Ipv4Addr>)],
) -> DNSPacket {
    let mut packet = response_for(qname, qtype);
    for (ns, glue) in servers {
        packet
            .authorities
            .push(DNSResource::new(zone, 172800, RData::NS(ns.to_string())));
        if let Some(ip) = glue {
            packet.resources.push(DNSResource::a(ns, 172800, *ip));
        }
    }
    packet.sync_counts();
    packet
}

/// Authoritative answer carrying `records`
pub fn answer(qname: &str, qtype: DNSResourceType, records: Vec<DNSResource>) -> DNSPacket {
    let mut packet = response_for(qname, qtype);
    packet.header.aa = true;
    packet.answers = records;
    packet.sync_counts();
    packet
}

pub fn a_answer(qname: &str, ip: Ipv4Addr) -> DNSPacket {
    answer(qname, DNSResourceType::A, vec![DNSResource::a(qname, 300, ip)])
}

pub fn cname(owner: &str, target: &str) -> DNSResource {
    DNSResource::new(owner, 300, RData::CNAME(target.to_string()))
}

/// Name error with only an SOA in AUTHORITY
pub fn nxdomain(qname: &str, qtype: DNSResourceType, zone: &str) -> DNSPacket {
    let mut packet = response_for(qname, qtype);
    packet.header.aa = true;
    packet.header.rcode = RCODE_NXDOMAIN;
    packet.authorities.push(DNSResource::new(
        zone,
        900,
        RData::SOA {
            mname: format!("ns1.{}", zone),
            rname: format!("hostmaster.{}", zone),
            serial: 1,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 300,
        },
    ));
    packet.sync_counts();
    packet
}

struct SigningKey {
    pair: Ed25519KeyPair,
    record: DnskeyRecord,
}

impl SigningKey {
    fn new(seed: u8, flags: u16) -> Self {
        let pair = Ed25519KeyPair::from_seed_unchecked(&[seed; 32]).unwrap();
        let record = DnskeyRecord {
            flags,
            protocol: 3,
            algorithm: 15,
            public_key: pair.public_key().as_ref().to_vec(),
        };
        Self { pair, record }
    }
}

/// Ed25519 keys for one test zone: a key-signing key, a zone-signing key
/// and optionally more zone-signing keys.
pub struct ZoneSigner {
    pub zone: String,
    ksk: SigningKey,
    zsks: Vec<SigningKey>,
}

impl ZoneSigner {
    pub fn new(zone: &str, seed: u8) -> Self {
        Self::with_zsk_count(zone, seed, 1)
    }

    pub fn with_zsk_count(zone: &str, seed: u8, zsks: usize) -> Self {
        Self {
            zone: normalize_name(zone),
            ksk: SigningKey::new(seed, DnskeyRecord::ZONE_FLAG | DnskeyRecord::SEP_FLAG),
            zsks: (0..zsks)
                .map(|i| SigningKey::new(seed.wrapping_add(100 + i as u8), DnskeyRecord::ZONE_FLAG))
                .collect(),
        }
    }

    pub fn ksk(&self) -> DnskeyRecord {
        self.ksk.record.clone()
    }

    pub fn anchor(&self) -> TrustAnchor {
        TrustAnchor::new(self.ksk(), 2017)
    }

    pub fn dnskey_records(&self) -> Vec<DNSResource> {
        std::iter::once(&self.ksk)
            .chain(self.zsks.iter())
            .map(|key| DNSResource::new(&self.zone, 3600, RData::DNSKEY(key.record.clone())))
            .collect()
    }

    fn sign_with(&self, key: &SigningKey, records: &[DNSResource]) -> DNSResource {
        let owner = records[0].name();
        let mut rrsig = RrsigRecord {
            type_covered: records[0].rtype,
            algorithm: key.record.algorithm,
            labels: labels_from_name(&owner).len() as u8,
            original_ttl: records[0].ttl,
            expiration: NOW + 86400,
            inception: NOW - 86400,
            key_tag: key.record.key_tag(),
            signer_name: self.zone.clone(),
            signature: Vec::new(),
        };
        let refs: Vec<&DNSResource> = records.iter().collect();
        rrsig.signature = key.pair.sign(&signed_data(&rrsig, &refs)).as_ref().to_vec();
        DNSResource::new(&owner, records[0].ttl, RData::RRSIG(rrsig))
    }

    /// RRSIG over `records` by the first zone-signing key
    pub fn sign(&self, records: &[DNSResource]) -> DNSResource {
        self.sign_with(&self.zsks[0], records)
    }

    /// The zone's DNSKEY RRset and its self-signature
    pub fn dnskey_answer(&self) -> Vec<DNSResource> {
        let keys = self.dnskey_records();
        let sig = self.sign_with(&self.ksk, &keys);
        keys.into_iter().chain(std::iter::once(sig)).collect()
    }

    pub fn dnskey_response(&self) -> DNSPacket {
        answer(&self.zone, DNSResourceType::DNSKEY, self.dnskey_answer())
    }

    /// DS record for this zone's key-signing key, SHA-256 digest
    pub fn ds(&self) -> DNSResource {
        let ksk = self.ksk();
        DNSResource::new(
            &self.zone,
            86400,
            RData::DS(DsRecord {
                key_tag: ksk.key_tag(),
                algorithm: ksk.algorithm,
                digest_type: DigestType::Sha256.to_u8(),
                digest: ds_digest(&self.zone, &ksk, DigestType::Sha256),
            }),
        )
    }

    /// Signs `records` and returns them followed by the signature
    pub fn signed(&self, records: Vec<DNSResource>) -> Vec<DNSResource> {
        let sig = self.sign(&records);
        records.into_iter().chain(std::iter::once(sig)).collect()
    }
}

/// Adds `child`'s DS (signed by `parent`) to a referral's AUTHORITY
pub fn with_ds(mut referral: DNSPacket, parent: &ZoneSigner, ds: DNSResource) -> DNSPacket {
    let sig = parent.sign(std::slice::from_ref(&ds));
    referral.authorities.push(ds);
    referral.authorities.push(sig);
    referral.sync_counts();
    referral
}
