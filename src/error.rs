use thiserror::Error;

use crate::dns::enums::DNSResourceType;

#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// A single server did not answer within the per-hop timeout
    #[error("Query to {server} timed out")]
    Timeout { server: String },

    /// Malformed, mismatched or refused reply from a single server
    #[error("Transport error talking to {server}: {reason}")]
    Transport { server: String, reason: String },

    /// A root reply carried no glue for the next zone
    #[error("Root server {0} returned no glue")]
    NoGlueAtRoot(String),

    /// None of the glue addresses of a referral answered
    #[error("No referral candidate answered for {0}")]
    ReferralExhausted(String),

    /// The name server name picked from AUTHORITY is not a valid hostname
    #[error("Invalid delegation name: {0}")]
    InvalidDelegationName(String),

    #[error("Unexpected {found} record in answer for {name} {requested}")]
    UnexpectedAnswer {
        name: String,
        requested: DNSResourceType,
        found: DNSResourceType,
    },

    #[error("CNAME chain for {0} exceeds the hop limit")]
    CnameLimitExceeded(String),

    #[error("Glue resolution for {0} exceeds the nesting limit")]
    GlueDepthExceeded(String),

    /// The name server's address is already being resolved further up
    #[error("Glue resolution for {0} depends on itself")]
    GlueCycle(String),

    /// An earlier lookup of this name server's address failed
    #[error("Address of name server {0} could not be resolved")]
    GlueUnavailable(String),

    #[error("Referral limit reached while resolving {0}")]
    ReferralLimitExceeded(String),

    /// Every root server was tried without reaching an answer
    #[error("Resolution of {name} {qtype} failed after trying {roots_tried} root servers")]
    ResolutionFailed {
        name: String,
        qtype: DNSResourceType,
        roots_tried: usize,
    },
}

impl DnsError {
    /// Per-hop failures are recovered by moving on to the next candidate
    pub fn is_transport(&self) -> bool {
        matches!(self, DnsError::Timeout { .. } | DnsError::Transport { .. })
    }
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::Io(err.to_string())
    }
}

impl From<crate::dns::ParseError> for DnsError {
    fn from(err: crate::dns::ParseError) -> Self {
        DnsError::Parse(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid root server entry: {0}")]
    InvalidRootServer(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DnsError>;
