//! Secure resolution: the iterative walk again, but every zone cut on the
//! way down must be vouched for by its parent, starting from the root
//! trust anchors.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::validator::{rrset, signatures};
use super::{DnsSecError, DnsSecValidator};
use crate::classifier::{
    AnswerKind, classify_answer, delegated_zone, has_answer, has_delegation_signer,
    referral_addresses,
};
use crate::config::RootServer;
use crate::dns::{
    DNSPacket,
    common::normalize_name,
    enums::DNSResourceType,
    resource::{DNSResource, DnskeyRecord},
};
use crate::error::{DnsError, Result};
use crate::resolver::{GlueLedger, IterativeResolver, ResolutionStatus, ResolvedQuery};

/// Final classification of a secure resolution
#[derive(Debug, Clone, PartialEq)]
pub enum DnssecOutcome {
    /// Every zone cut and the answer itself verified
    HaveAnswer(ResolvedQuery),
    /// Some zone on the way is unsigned; the answer is unverified
    NoDnssec(ResolvedQuery),
    /// A signature or digest did not check out
    VerifyFail {
        query: ResolvedQuery,
        error: DnsSecError,
    },
}

impl DnssecOutcome {
    pub fn query(&self) -> &ResolvedQuery {
        match self {
            Self::HaveAnswer(query) | Self::NoDnssec(query) => query,
            Self::VerifyFail { query, .. } => query,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecureResolution {
    pub outcome: DnssecOutcome,
    /// Zones whose keys were verified, in the order they were reached
    pub verified_zones: Vec<String>,
}

/// Union of records gathered over repeated queries
#[derive(Debug, Clone, Default)]
pub struct Accumulated {
    pub records: Vec<DNSResource>,
    /// Queries that produced a reply
    pub replies: usize,
    /// Records of the counted type collected so far
    pub count: usize,
    pub complete: bool,
}

/// Repeats `fetch` until the union of its results holds `expected`
/// records of type `counted`, giving up after `attempts` calls. Without
/// an expected count the first reply is enough. Failed fetches use up an
/// attempt.
pub async fn accumulate_records<F, Fut>(
    expected: Option<usize>,
    attempts: usize,
    counted: DNSResourceType,
    mut fetch: F,
) -> Accumulated
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<DNSResource>>>,
{
    let mut acc = Accumulated::default();
    let mut seen = HashSet::new();

    for attempt in 0..attempts {
        let records = match fetch(attempt).await {
            Ok(records) => records,
            Err(e) => {
                debug!("Fetch attempt {} failed: {}", attempt + 1, e);
                continue;
            }
        };
        acc.replies += 1;

        for record in records {
            let key = (normalize_name(&record.name()), record.rtype, record.canonical_rdata());
            if seen.insert(key) {
                if record.rtype == counted {
                    acc.count += 1;
                }
                acc.records.push(record);
            }
        }

        acc.complete = match expected {
            Some(n) => acc.count >= n,
            None => true,
        };
        if acc.complete {
            break;
        }
        debug!(
            "Collected {} of {:?} {} records after {} attempts",
            acc.count,
            expected,
            counted,
            attempt + 1
        );
    }

    acc
}

/// Keys of the deepest zone verified so far
struct Trust {
    zone: String,
    keys: Vec<DnskeyRecord>,
}

enum SecureWalk {
    Answer {
        response: DNSPacket,
        trust: Option<Trust>,
        zones: Vec<String>,
    },
    Unresolved {
        response: DNSPacket,
        secure: bool,
        zones: Vec<String>,
    },
    Failed {
        response: DNSPacket,
        error: DnsSecError,
        zones: Vec<String>,
    },
}

/// Iterative resolution with chain-of-trust validation
pub struct SecureResolver {
    resolver: Arc<IterativeResolver>,
    validator: DnsSecValidator,
}

impl SecureResolver {
    pub fn new(resolver: Arc<IterativeResolver>, validator: DnsSecValidator) -> Self {
        Self {
            resolver,
            validator,
        }
    }

    pub fn validator(&self) -> &DnsSecValidator {
        &self.validator
    }

    /// Resolves and validates `name`/`qtype`. Validation problems come back
    /// as [`DnssecOutcome::VerifyFail`]; only exhausting every root server is
    /// an error.
    pub async fn resolve(&self, name: &str, qtype: DNSResourceType) -> Result<SecureResolution> {
        let name = normalize_name(name);
        let roots = &self.resolver.config().root_servers;
        info!("Resolving {} {} with DNSSEC validation", name, qtype);

        let mut target = name.clone();
        let mut cname_chain: Vec<String> = Vec::new();
        let mut verified_zones: Vec<String> = Vec::new();
        let mut insecure = false;
        let ledger = GlueLedger::new();

        let query = |response: DNSPacket, chain: &[String]| ResolvedQuery {
            qname: name.clone(),
            qtype,
            status: if has_answer(&response) {
                ResolutionStatus::Answered
            } else {
                ResolutionStatus::Unresolved
            },
            response,
            cname_chain: chain.to_vec(),
        };

        loop {
            let mut redirect = None;

            for root in roots {
                let walk = match self.walk_from_root(&target, qtype, root, &ledger).await {
                    Ok(walk) => walk,
                    Err(e) => {
                        warn!("Root {} ({}) failed for {}: {}", root.letter, root.addr, target, e);
                        continue;
                    }
                };

                let (response, trust) = match walk {
                    SecureWalk::Answer {
                        response,
                        trust,
                        zones,
                    } => {
                        verified_zones.extend(zones);
                        (response, trust)
                    }
                    SecureWalk::Unresolved {
                        response,
                        secure,
                        zones,
                    } => {
                        verified_zones.extend(zones);
                        let query = query(response, &cname_chain);
                        let outcome = if insecure || !secure {
                            DnssecOutcome::NoDnssec(query)
                        } else {
                            // Authenticated denial is not checked, so a
                            // missing answer in a signed zone stays unproven
                            DnssecOutcome::VerifyFail {
                                query,
                                error: DnsSecError::AnswerNotVerified(target.clone()),
                            }
                        };
                        return Ok(SecureResolution {
                            outcome,
                            verified_zones,
                        });
                    }
                    SecureWalk::Failed {
                        response,
                        error,
                        zones,
                    } => {
                        warn!("DNSSEC verification failed for {}: {}", target, error);
                        verified_zones.extend(zones);
                        return Ok(SecureResolution {
                            outcome: DnssecOutcome::VerifyFail {
                                query: query(response, &cname_chain),
                                error,
                            },
                            verified_zones,
                        });
                    }
                };

                let kind = match classify_answer(&response, qtype) {
                    Some(AnswerKind::Unexpected(found)) => {
                        warn!(
                            "{}, trying next root",
                            DnsError::UnexpectedAnswer {
                                name: target.clone(),
                                requested: qtype,
                                found,
                            }
                        );
                        continue;
                    }
                    Some(kind) => kind,
                    None => continue,
                };

                match &trust {
                    Some(trust) => {
                        if let Err(error) = self.verify_answer(&response, trust) {
                            return Ok(SecureResolution {
                                outcome: DnssecOutcome::VerifyFail {
                                    query: query(response, &cname_chain),
                                    error,
                                },
                                verified_zones,
                            });
                        }
                    }
                    None => insecure = true,
                }

                match kind {
                    AnswerKind::CnameRedirect(next) => {
                        redirect = Some(next);
                        break;
                    }
                    _ => {
                        let query = query(response, &cname_chain);
                        let outcome = if insecure {
                            info!("{} {} resolved without DNSSEC", target, qtype);
                            DnssecOutcome::NoDnssec(query)
                        } else {
                            info!("{} {} resolved and verified", target, qtype);
                            DnssecOutcome::HaveAnswer(query)
                        };
                        return Ok(SecureResolution {
                            outcome,
                            verified_zones,
                        });
                    }
                }
            }

            let Some(next) = redirect else {
                return Err(DnsError::ResolutionFailed {
                    name: name.clone(),
                    qtype,
                    roots_tried: roots.len(),
                });
            };
            if cname_chain.len() >= self.resolver.config().max_cname_hops {
                return Err(DnsError::CnameLimitExceeded(name.clone()));
            }
            info!("{} is an alias for {}", target, next);
            target = normalize_name(&next);
            cname_chain.push(next);
        }
    }

    /// Verifies the first answer RRset against the keys of the last
    /// verified zone
    fn verify_answer(&self, response: &DNSPacket, trust: &Trust) -> std::result::Result<(), DnsSecError> {
        let Some(first) = response.answers.iter().find(|rr| rr.rtype != DNSResourceType::RRSIG) else {
            return Err(DnsSecError::NoRrsig);
        };
        let owner = first.name();
        let records = rrset(&response.answers, &owner, first.rtype);
        let rrsigs = signatures(&response.answers, &owner, first.rtype);

        self.validator
            .verify_rrset(&trust.zone, &records, &rrsigs, &trust.keys)
            .map_err(|e| {
                warn!("Answer {} {} failed verification: {}", owner, first.rtype, e);
                DnsSecError::AnswerNotVerified(owner.clone())
            })
    }

    async fn walk_from_root(
        &self,
        target: &str,
        qtype: DNSResourceType,
        root: &RootServer,
        ledger: &GlueLedger,
    ) -> Result<SecureWalk> {
        let config = self.resolver.config();
        let mut zones = Vec::new();

        let root_keys = self.fetch_key_set(".", root.addr).await?;
        let keys = match self
            .check_key_set(".", &root_keys)
            .and_then(|_| self.validator.verify_root_keys(&root_keys.records))
        {
            Ok(keys) => keys,
            Err(error) => {
                return Ok(SecureWalk::Failed {
                    response: packet_with_answers(root_keys.records),
                    error,
                    zones,
                });
            }
        };
        debug!("Root DNSKEY set verified against trust anchors");
        zones.push(".".to_string());
        let mut trust = Some(Trust {
            zone: ".".to_string(),
            keys,
        });

        let mut response = self
            .resolver
            .transport()
            .query(target, qtype, root.addr, config.dnssec_timeout, true)
            .await?;
        if referral_addresses(&response).is_empty() {
            return Err(DnsError::NoGlueAtRoot(root.letter.to_string()));
        }

        let mut referrals = 0;
        while !has_answer(&response) {
            referrals += 1;
            if referrals > config.max_referrals {
                return Err(DnsError::ReferralLimitExceeded(target.to_string()));
            }

            let child = delegated_zone(&response);
            if let Some(current) = &trust {
                if child.is_none() || !has_delegation_signer(&response) {
                    info!(
                        "No DS record below {}, continuing without validation",
                        current.zone
                    );
                    trust = None;
                }
            }

            if referral_addresses(&response).is_empty()
                && !self.resolver.splice_authority_glue(&mut response, 0, ledger).await?
            {
                return Ok(SecureWalk::Unresolved {
                    response,
                    secure: trust.is_some(),
                    zones,
                });
            }

            let candidates = referral_addresses(&response);
            let (server, next) = self
                .resolver
                .query_candidates(target, qtype, &candidates, config.dnssec_timeout, true)
                .await?;

            let descended = match (&trust, child) {
                (Some(current), Some(child)) => {
                    Some((self.descend(current, &child, &response, server).await?, child))
                }
                _ => None,
            };
            match descended {
                Some((Ok(keys), child)) => {
                    info!("Zone {} verified", child);
                    zones.push(child.clone());
                    trust = Some(Trust { zone: child, keys });
                }
                Some((Err(error), _)) => {
                    return Ok(SecureWalk::Failed {
                        response,
                        error,
                        zones,
                    });
                }
                None => {}
            }

            response = next;
        }

        Ok(SecureWalk::Answer {
            response,
            trust,
            zones,
        })
    }

    /// Fetches and checks the keys of `child`, then checks the parent's DS
    /// records for it. The outer error is a transport failure, the inner
    /// one a validation failure.
    async fn descend(
        &self,
        parent: &Trust,
        child: &str,
        referral: &DNSPacket,
        server: SocketAddr,
    ) -> Result<std::result::Result<Vec<DnskeyRecord>, DnsSecError>> {
        let key_set = self.fetch_key_set(child, server).await?;
        let result = self.check_key_set(child, &key_set).and_then(|_| {
            let keys = self.validator.verify_dnskey_set(child, &key_set.records)?;
            self.validator.verify_delegation(
                &parent.zone,
                child,
                &referral.authorities,
                &parent.keys,
                &keys,
            )?;
            Ok(keys)
        });
        Ok(result)
    }

    fn check_key_set(&self, zone: &str, key_set: &Accumulated) -> std::result::Result<(), DnsSecError> {
        if key_set.complete {
            return Ok(());
        }
        Err(DnsSecError::IncompleteKeySet {
            zone: normalize_name(zone),
            expected: self.resolver.config().expected_key_count(zone).unwrap_or(1),
            found: key_set.count,
        })
    }

    /// DNSKEY set of `zone` as served by `server`, merged over several
    /// queries when the zone is known to need it
    async fn fetch_key_set(&self, zone: &str, server: SocketAddr) -> Result<Accumulated> {
        let config = self.resolver.config();
        let transport = self.resolver.transport();
        let timeout = config.dnssec_timeout;

        let acc = accumulate_records(
            config.expected_key_count(zone),
            config.dnskey_fetch_attempts,
            DNSResourceType::DNSKEY,
            |_| async move {
                transport
                    .query(zone, DNSResourceType::DNSKEY, server, timeout, true)
                    .await
                    .map(|response| response.answers)
            },
        )
        .await;

        if acc.replies == 0 {
            return Err(DnsError::Transport {
                server: server.to_string(),
                reason: format!("no DNSKEY reply for {}", zone),
            });
        }
        Ok(acc)
    }
}

fn packet_with_answers(answers: Vec<DNSResource>) -> DNSPacket {
    let mut packet = DNSPacket {
        answers,
        ..Default::default()
    };
    packet.sync_counts();
    packet
}
