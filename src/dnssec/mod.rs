pub mod algorithm;
pub mod chain;
pub mod digest;
pub mod errors;
pub mod key_tag;
pub mod trust_anchor;
pub mod validator;

pub use algorithm::DnsSecAlgorithm;
pub use chain::{DnssecOutcome, SecureResolution, SecureResolver, accumulate_records};
pub use digest::DigestType;
pub use errors::DnsSecError;
pub use key_tag::calculate_key_tag;
pub use trust_anchor::{TrustAnchor, TrustAnchorStore};
pub use validator::DnsSecValidator;
