//! Pure inspection of a response: did it answer, redirect or refer?

use rand::Rng;
use std::net::Ipv4Addr;

use crate::dns::{DNSPacket, enums::DNSResourceType};

/// What the first ANSWER record says about the query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerKind {
    /// The requested record type is present
    MatchingRecord,
    /// The name is an alias; carries the CNAME target
    CnameRedirect(String),
    /// Something else entirely, treated as a failure upstream
    Unexpected(DNSResourceType),
}

pub fn has_answer(msg: &DNSPacket) -> bool {
    !msg.answers.is_empty()
}

/// Classifies by the first answer record. `None` when ANSWER is empty.
pub fn classify_answer(msg: &DNSPacket, requested: DNSResourceType) -> Option<AnswerKind> {
    let first = msg.answers.first()?;

    let kind = match first.rtype {
        DNSResourceType::A if requested == DNSResourceType::A => match first.ipv4() {
            Some(_) => AnswerKind::MatchingRecord,
            None => AnswerKind::Unexpected(first.rtype),
        },
        DNSResourceType::CNAME if requested != DNSResourceType::CNAME => {
            match first.target_name() {
                Some(target) => AnswerKind::CnameRedirect(target.to_string()),
                None => AnswerKind::Unexpected(first.rtype),
            }
        }
        rtype if rtype == requested => AnswerKind::MatchingRecord,
        rtype => AnswerKind::Unexpected(rtype),
    };
    Some(kind)
}

/// IPv4 glue addresses in ADDITIONAL, in section order
pub fn referral_addresses(msg: &DNSPacket) -> Vec<Ipv4Addr> {
    msg.resources.iter().filter_map(|rr| rr.ipv4()).collect()
}

/// Name server names in AUTHORITY, in section order
pub fn authority_name_servers(msg: &DNSPacket) -> Vec<&str> {
    msg.authorities
        .iter()
        .filter(|rr| rr.rtype == DNSResourceType::NS)
        .filter_map(|rr| rr.target_name())
        .collect()
}

/// Uniform random pick among the AUTHORITY name servers
pub fn pick_authority_ns<R: Rng + ?Sized>(msg: &DNSPacket, rng: &mut R) -> Option<String> {
    let servers = authority_name_servers(msg);
    if servers.is_empty() {
        return None;
    }
    Some(servers[rng.random_range(0..servers.len())].to_string())
}

/// Zone named by the delegation in AUTHORITY, from the first NS record
pub fn delegated_zone(msg: &DNSPacket) -> Option<String> {
    msg.authorities
        .iter()
        .find(|rr| rr.rtype == DNSResourceType::NS)
        .map(|rr| rr.name())
}

/// True when AUTHORITY carries a DS record, i.e. the child zone is signed
pub fn has_delegation_signer(msg: &DNSPacket) -> bool {
    msg.authorities.iter().any(|rr| rr.rtype == DNSResourceType::DS)
}
