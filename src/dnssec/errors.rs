use std::fmt;

/// DNSSEC validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum DnsSecError {
    /// No DNSKEY found for validation
    NoDnsKey,
    /// No RRSIG found for RRset
    NoRrsig,
    /// Signature expired
    SignatureExpired,
    /// Signature not yet valid
    SignatureNotYetValid,
    /// Algorithm not supported
    UnsupportedAlgorithm(u8),
    /// Digest type not supported
    UnsupportedDigestType(u8),
    /// Signature verification failed
    SignatureVerificationFailed,
    /// Invalid public key format
    InvalidPublicKey,
    /// A root key-signing key is not one of the embedded anchors
    TrustAnchorMismatch(u16),
    /// The DNSKEY set of a zone is not signed by its own key-signing key
    DnskeySelfVerificationFailed(String),
    /// The parent's DS records do not vouch for the zone's keys
    ZoneNotVerified(String),
    /// Repeated DNSKEY queries never produced the expected key count
    IncompleteKeySet {
        zone: String,
        expected: usize,
        found: usize,
    },
    /// The final answer RRset failed verification
    AnswerNotVerified(String),
}

impl fmt::Display for DnsSecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDnsKey => write!(f, "No DNSKEY record found for validation"),
            Self::NoRrsig => write!(f, "No RRSIG record found for RRset"),
            Self::SignatureExpired => write!(f, "DNSSEC signature has expired"),
            Self::SignatureNotYetValid => write!(f, "DNSSEC signature is not yet valid"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "Unsupported DNSSEC algorithm: {}", alg),
            Self::UnsupportedDigestType(digest) => write!(f, "Unsupported digest type: {}", digest),
            Self::SignatureVerificationFailed => write!(f, "DNSSEC signature verification failed"),
            Self::InvalidPublicKey => write!(f, "Invalid DNSKEY public key format"),
            Self::TrustAnchorMismatch(tag) => {
                write!(f, "Root key {} does not match any trust anchor", tag)
            }
            Self::DnskeySelfVerificationFailed(zone) => {
                write!(f, "DNSKEY set of {} is not self-signed", zone)
            }
            Self::ZoneNotVerified(zone) => write!(f, "Zone {} could not be verified", zone),
            Self::IncompleteKeySet {
                zone,
                expected,
                found,
            } => write!(
                f,
                "Collected {} of {} DNSKEY records for {}",
                found, expected, zone
            ),
            Self::AnswerNotVerified(name) => write!(f, "Answer for {} failed verification", name),
        }
    }
}

impl std::error::Error for DnsSecError {}

pub type Result<T> = std::result::Result<T, DnsSecError>;
