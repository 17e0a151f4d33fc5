use crate::dns::common::normalize_name;
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// One entry of the root hints table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootServer {
    pub letter: char,
    pub addr: SocketAddr,
}

/// IANA root hints, in letter order
const ROOT_HINTS: [(char, [u8; 4]); 13] = [
    ('a', [198, 41, 0, 4]),
    ('b', [199, 9, 14, 201]),
    ('c', [192, 33, 4, 12]),
    ('d', [199, 7, 91, 13]),
    ('e', [192, 203, 230, 10]),
    ('f', [192, 5, 5, 241]),
    ('g', [192, 112, 36, 4]),
    ('h', [198, 97, 190, 53]),
    ('i', [192, 36, 148, 17]),
    ('j', [192, 58, 128, 30]),
    ('k', [193, 0, 14, 129]),
    ('l', [199, 7, 83, 42]),
    ('m', [202, 12, 27, 33]),
];

pub fn default_root_servers() -> Vec<RootServer> {
    ROOT_HINTS
        .iter()
        .map(|&(letter, octets)| RootServer {
            letter,
            addr: SocketAddr::new(IpAddr::from(octets), 53),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Root servers, tried in order
    pub root_servers: Vec<RootServer>,

    /// Timeout for a single query in the plain resolution path
    pub hop_timeout: Duration,

    /// Timeout for a single query in the DNSSEC path
    pub dnssec_timeout: Duration,

    /// Maximum number of CNAME indirections followed for one query
    pub max_cname_hops: usize,

    /// Maximum nesting of name server address lookups
    pub max_glue_depth: usize,

    /// Maximum referrals followed from a single root before giving up on it
    pub max_referrals: usize,

    /// Whether resolved answers are memoised for the lifetime of the resolver
    pub enable_caching: bool,

    /// DNSKEY queries issued per zone while accumulating an incomplete key set
    pub dnskey_fetch_attempts: usize,

    /// Zones whose servers are known to return partial DNSKEY sets, with the
    /// number of keys the complete set holds
    pub dnskey_expected_counts: HashMap<String, usize>,

    /// Seed for the name server tie-break; `None` seeds from the OS
    pub rng_seed: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            root_servers: default_root_servers(),
            hop_timeout: Duration::from_millis(500),
            dnssec_timeout: Duration::from_secs(1),
            max_cname_hops: 10,
            max_glue_depth: 4,
            max_referrals: 16,
            enable_caching: true,
            dnskey_fetch_attempts: 8,
            dnskey_expected_counts: HashMap::from([("org.".to_string(), 4)]),
            rng_seed: None,
        }
    }
}

/// On-disk form; every field is optional and overrides the default
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    root_servers: Option<Vec<String>>,
    hop_timeout_ms: Option<u64>,
    dnssec_timeout_ms: Option<u64>,
    max_cname_hops: Option<usize>,
    max_glue_depth: Option<usize>,
    max_referrals: Option<usize>,
    enable_caching: Option<bool>,
    dnskey_fetch_attempts: Option<usize>,
    dnskey_expected_counts: Option<HashMap<String, usize>>,
    rng_seed: Option<u64>,
}

impl ResolverConfig {
    /// Loads overrides from a TOML file on top of the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut config = Self::default();

        if let Some(entries) = file.root_servers {
            config.root_servers = parse_root_servers(entries.iter().map(String::as_str))?;
        }
        if let Some(ms) = file.hop_timeout_ms {
            config.hop_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.dnssec_timeout_ms {
            config.dnssec_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = file.max_cname_hops {
            config.max_cname_hops = v;
        }
        if let Some(v) = file.max_glue_depth {
            config.max_glue_depth = v;
        }
        if let Some(v) = file.max_referrals {
            config.max_referrals = v;
        }
        if let Some(v) = file.enable_caching {
            config.enable_caching = v;
        }
        if let Some(v) = file.dnskey_fetch_attempts {
            config.dnskey_fetch_attempts = v;
        }
        if let Some(counts) = file.dnskey_expected_counts {
            config.dnskey_expected_counts = counts
                .into_iter()
                .map(|(zone, n)| (normalize_name(&zone), n))
                .collect();
        }
        if file.rng_seed.is_some() {
            config.rng_seed = file.rng_seed;
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies `ROOTWALK_*` environment overrides on top of `self`
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(roots) = std::env::var("ROOTWALK_ROOT_SERVERS") {
            self.root_servers = parse_root_servers(roots.split(','))?;
        }

        if let Ok(timeout) = std::env::var("ROOTWALK_HOP_TIMEOUT_MS") {
            self.hop_timeout = parse_millis(&timeout)?;
        }

        if let Ok(timeout) = std::env::var("ROOTWALK_DNSSEC_TIMEOUT_MS") {
            self.dnssec_timeout = parse_millis(&timeout)?;
        }

        if let Ok(hops) = std::env::var("ROOTWALK_MAX_CNAME_HOPS") {
            self.max_cname_hops = hops
                .parse()
                .map_err(|_| ConfigError::InvalidLimit(format!("max CNAME hops: {}", hops)))?;
        }

        if let Ok(depth) = std::env::var("ROOTWALK_MAX_GLUE_DEPTH") {
            self.max_glue_depth = depth
                .parse()
                .map_err(|_| ConfigError::InvalidLimit(format!("max glue depth: {}", depth)))?;
        }

        if let Ok(caching) = std::env::var("ROOTWALK_ENABLE_CACHING") {
            self.enable_caching = parse_bool(&caching, true);
        }

        if let Ok(seed) = std::env::var("ROOTWALK_RNG_SEED") {
            self.rng_seed = Some(
                seed.parse()
                    .map_err(|_| ConfigError::ParseError(format!("Invalid RNG seed: {}", seed)))?,
            );
        }

        self.validate()?;
        Ok(self)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_servers.is_empty() {
            return Err(ConfigError::InvalidRootServer(
                "At least one root server is required".to_string(),
            ));
        }

        for (name, timeout) in [
            ("hop", self.hop_timeout),
            ("DNSSEC", self.dnssec_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout(format!(
                    "{} timeout must be greater than 0",
                    name
                )));
            }
            if timeout > Duration::from_secs(30) {
                return Err(ConfigError::InvalidTimeout(format!(
                    "{} timeout too large (max 30 seconds)",
                    name
                )));
            }
        }

        if self.max_cname_hops == 0 || self.max_cname_hops > 32 {
            return Err(ConfigError::InvalidLimit(
                "CNAME hop limit must be between 1 and 32".to_string(),
            ));
        }

        if self.max_glue_depth > 16 {
            return Err(ConfigError::InvalidLimit(
                "Glue depth too large (max 16)".to_string(),
            ));
        }

        if self.max_referrals == 0 {
            return Err(ConfigError::InvalidLimit(
                "Referral limit must be greater than 0".to_string(),
            ));
        }

        if self.dnskey_fetch_attempts == 0 {
            return Err(ConfigError::InvalidLimit(
                "DNSKEY fetch attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Expected DNSKEY count for `zone`, if its servers are known to split it
    pub fn expected_key_count(&self, zone: &str) -> Option<usize> {
        self.dnskey_expected_counts.get(&normalize_name(zone)).copied()
    }
}

/// Parses `letter=ip[:port]` entries
fn parse_root_servers<'a>(
    entries: impl Iterator<Item = &'a str>,
) -> Result<Vec<RootServer>, ConfigError> {
    entries
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (letter, addr) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidRootServer(entry.to_string()))?;
            let mut letters = letter.trim().chars();
            let letter = match (letters.next(), letters.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => c.to_ascii_lowercase(),
                _ => return Err(ConfigError::InvalidRootServer(entry.to_string())),
            };
            let addr = addr.trim();
            let addr = addr
                .parse::<SocketAddr>()
                .or_else(|_| addr.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, 53)))
                .map_err(|_| ConfigError::InvalidRootServer(entry.to_string()))?;
            Ok(RootServer { letter, addr })
        })
        .collect()
}

fn parse_millis(value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidTimeout(value.to_string()))
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}
