use dashmap::DashSet;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::classifier::{AnswerKind, classify_answer, has_answer, pick_authority_ns, referral_addresses};
use crate::config::{ResolverConfig, RootServer};
use crate::dns::{
    DNSPacket,
    common::normalize_name,
    enums::DNSResourceType,
    resource::DNSResource,
};
use crate::error::{DnsError, Result};
use crate::transport::{Transport, UdpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStatus {
    /// ANSWER holds the requested records
    Answered,
    /// The walk hit a dead end; the response is the last one received
    Unresolved,
}

/// Outcome of one top-level resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    /// Name as originally asked, fully qualified
    pub qname: String,
    pub qtype: DNSResourceType,
    /// Final response; for a CNAME chain, the response for the last target
    pub response: DNSPacket,
    /// CNAME targets followed, in order
    pub cname_chain: Vec<String>,
    pub status: ResolutionStatus,
}

impl ResolvedQuery {
    pub fn is_answered(&self) -> bool {
        self.status == ResolutionStatus::Answered
    }

    /// Name the final records belong to
    pub fn final_name(&self) -> &str {
        self.cname_chain.last().map(String::as_str).unwrap_or(&self.qname)
    }

    /// ANSWER records without their signatures
    pub fn answer_records(&self) -> impl Iterator<Item = &DNSResource> {
        self.response
            .answers
            .iter()
            .filter(|rr| rr.rtype != DNSResourceType::RRSIG)
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.answer_records().filter_map(|rr| rr.ipv4()).collect()
    }
}

/// Hostname check used before chasing a name server name from AUTHORITY.
///
/// Same language as `^(?=.{4,255}$)([a-zA-Z0-9][a-zA-Z0-9-]{,61}[a-zA-Z0-9]\.)+[a-zA-Z0-9]{2,5}.$`:
/// one or more 2-63 character labels, then a 2-5 character alphanumeric
/// label, then exactly one more character of any kind.
pub fn is_valid_hostname(name: &str) -> bool {
    let chars: Vec<char> = name.chars().collect();
    if !(4..=255).contains(&chars.len()) {
        return false;
    }

    let body: String = chars[..chars.len() - 1].iter().collect();
    let mut parts: Vec<&str> = body.split('.').collect();
    let Some(tail) = parts.pop() else {
        return false;
    };
    if parts.is_empty()
        || !(2..=5).contains(&tail.len())
        || !tail.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return false;
    }

    parts.iter().all(|label| {
        let bytes = label.as_bytes();
        (2..=63).contains(&bytes.len())
            && bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
    })
}

/// Result of walking down from one root server
pub(crate) enum Walk {
    Answer(DNSPacket),
    Unresolved(DNSPacket),
}

/// Name server address lookups made during one top-level resolution.
///
/// A name whose lookup failed is not swept again, and a name whose lookup
/// is still in progress further up the stack is a cycle.
#[derive(Debug, Default)]
pub(crate) struct GlueLedger {
    pending: DashSet<String>,
    failed: DashSet<String>,
}

impl GlueLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Iterative resolver: root hints, referrals, glue and CNAMEs, one query
/// at a time.
pub struct IterativeResolver {
    config: Arc<ResolverConfig>,
    transport: Arc<dyn Transport>,
    cache: Arc<QueryCache>,
    /// Tie-break among AUTHORITY name servers
    rng: Mutex<StdRng>,
}

impl IterativeResolver {
    pub fn new(config: ResolverConfig, transport: Arc<dyn Transport>, cache: Arc<QueryCache>) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            config: Arc::new(config),
            transport,
            cache,
            rng: Mutex::new(rng),
        }
    }

    /// Resolver talking to real servers over UDP
    pub fn with_udp(config: ResolverConfig) -> Self {
        Self::new(config, Arc::new(UdpTransport::new()), Arc::new(QueryCache::new()))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Resolves `name`/`qtype` from the root servers down.
    ///
    /// Per-hop failures are logged and skipped. Only when every root has
    /// been tried without an answer does this return
    /// [`DnsError::ResolutionFailed`].
    pub async fn resolve(&self, name: &str, qtype: DNSResourceType) -> Result<ResolvedQuery> {
        info!("Resolving {} {}", name, qtype);
        let ledger = GlueLedger::new();
        self.resolve_at_depth(normalize_name(name), qtype, 0, &ledger).await
    }

    fn resolve_at_depth<'a>(
        &'a self,
        name: String,
        qtype: DNSResourceType,
        depth: usize,
        ledger: &'a GlueLedger,
    ) -> BoxFuture<'a, Result<ResolvedQuery>> {
        Box::pin(async move {
            if self.config.enable_caching {
                if let Some(hit) = self.cache.get(&name, qtype) {
                    debug!("Using cached result for {} {}", name, qtype);
                    return Ok(hit);
                }
            }

            let result = self.resolve_uncached(&name, qtype, depth, ledger).await?;
            if result.is_answered() {
                self.cache.put(&name, qtype, result.clone());
            }
            Ok(result)
        })
    }

    async fn resolve_uncached(
        &self,
        name: &str,
        qtype: DNSResourceType,
        depth: usize,
        ledger: &GlueLedger,
    ) -> Result<ResolvedQuery> {
        let mut target = name.to_string();
        let mut cname_chain: Vec<String> = Vec::new();

        loop {
            let mut redirect = None;

            for root in &self.config.root_servers {
                let response = match self.walk_from_root(&target, qtype, root, depth, ledger).await {
                    Ok(Walk::Answer(response)) => response,
                    Ok(Walk::Unresolved(response)) => {
                        info!("Resolution of {} {} ended without an answer", target, qtype);
                        return Ok(ResolvedQuery {
                            qname: name.to_string(),
                            qtype,
                            response,
                            cname_chain,
                            status: ResolutionStatus::Unresolved,
                        });
                    }
                    Err(e) => {
                        warn!("Root {} ({}) failed for {}: {}", root.letter, root.addr, target, e);
                        continue;
                    }
                };

                match classify_answer(&response, qtype) {
                    Some(AnswerKind::CnameRedirect(next)) => {
                        redirect = Some(next);
                        break;
                    }
                    Some(AnswerKind::Unexpected(found)) => {
                        let err = DnsError::UnexpectedAnswer {
                            name: target.clone(),
                            requested: qtype,
                            found,
                        };
                        warn!("{}, trying next root", err);
                        continue;
                    }
                    Some(AnswerKind::MatchingRecord) | None => {
                        info!("Resolved {} {} via root {}", target, qtype, root.letter);
                        return Ok(ResolvedQuery {
                            qname: name.to_string(),
                            qtype,
                            response,
                            cname_chain,
                            status: ResolutionStatus::Answered,
                        });
                    }
                }
            }

            let Some(next) = redirect else {
                return Err(DnsError::ResolutionFailed {
                    name: name.to_string(),
                    qtype,
                    roots_tried: self.config.root_servers.len(),
                });
            };
            if cname_chain.len() >= self.config.max_cname_hops {
                return Err(DnsError::CnameLimitExceeded(name.to_string()));
            }
            info!("{} is an alias for {}", target, next);
            target = normalize_name(&next);
            cname_chain.push(next);
        }
    }

    async fn walk_from_root(
        &self,
        target: &str,
        qtype: DNSResourceType,
        root: &RootServer,
        depth: usize,
        ledger: &GlueLedger,
    ) -> Result<Walk> {
        debug!("Asking root {} ({}) for {} {}", root.letter, root.addr, target, qtype);
        let response = self
            .transport
            .query(target, qtype, root.addr, self.config.hop_timeout, false)
            .await?;

        // A root without glue knows nothing about this TLD
        if referral_addresses(&response).is_empty() {
            return Err(DnsError::NoGlueAtRoot(root.letter.to_string()));
        }

        let mut response = response;
        let mut referrals = 0;
        while !has_answer(&response) {
            referrals += 1;
            if referrals > self.config.max_referrals {
                return Err(DnsError::ReferralLimitExceeded(target.to_string()));
            }

            if referral_addresses(&response).is_empty() {
                if !self.splice_authority_glue(&mut response, depth, ledger).await? {
                    return Ok(Walk::Unresolved(response));
                }
                continue;
            }

            let candidates = referral_addresses(&response);
            let (_, next) = self
                .query_candidates(target, qtype, &candidates, self.config.hop_timeout, false)
                .await?;
            response = next;
        }

        Ok(Walk::Answer(response))
    }

    /// Queries glue addresses in order; the first reply wins
    pub(crate) async fn query_candidates(
        &self,
        name: &str,
        qtype: DNSResourceType,
        candidates: &[Ipv4Addr],
        hop_timeout: Duration,
        want_dnssec: bool,
    ) -> Result<(SocketAddr, DNSPacket)> {
        for ip in candidates {
            let server = SocketAddr::new(IpAddr::V4(*ip), 53);
            match self
                .transport
                .query(name, qtype, server, hop_timeout, want_dnssec)
                .await
            {
                Ok(response) => return Ok((server, response)),
                Err(e) => debug!("Candidate {} failed, trying next: {}", server, e),
            }
        }
        Err(DnsError::ReferralExhausted(name.to_string()))
    }

    /// Picks a name server from AUTHORITY, resolves its address and adds
    /// it to ADDITIONAL as glue. `Ok(false)` when there is no usable name
    /// server name, which ends the walk.
    ///
    /// Each name server is looked up at most once per `ledger`; later
    /// referrals to a name that already failed give up without querying.
    pub(crate) async fn splice_authority_glue(
        &self,
        response: &mut DNSPacket,
        depth: usize,
        ledger: &GlueLedger,
    ) -> Result<bool> {
        let ns = {
            let mut rng = self.rng.lock();
            pick_authority_ns(response, &mut *rng)
        };
        let Some(ns) = ns else {
            debug!("No name server in AUTHORITY to follow");
            return Ok(false);
        };
        if !is_valid_hostname(&ns) {
            info!("{}", DnsError::InvalidDelegationName(ns));
            return Ok(false);
        }
        if depth >= self.config.max_glue_depth {
            return Err(DnsError::GlueDepthExceeded(ns));
        }

        let key = normalize_name(&ns);
        if ledger.failed.contains(&key) {
            return Err(DnsError::GlueUnavailable(ns));
        }
        if !ledger.pending.insert(key.clone()) {
            return Err(DnsError::GlueCycle(ns));
        }

        debug!("Resolving address of name server {}", ns);
        let glue = self
            .resolve_at_depth(key.clone(), DNSResourceType::A, depth + 1, ledger)
            .await;
        ledger.pending.remove(&key);

        let addresses = match glue {
            Ok(glue) if glue.is_answered() => glue.addresses(),
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("Lookup of name server {} failed: {}", ns, e);
                Vec::new()
            }
        };
        if addresses.is_empty() {
            ledger.failed.insert(key);
            return Err(DnsError::GlueUnavailable(ns));
        }

        for ip in addresses {
            response.resources.push(DNSResource::a(&ns, 0, ip));
        }
        response.sync_counts();
        Ok(true)
    }
}
