//! dig-style rendering of a finished resolution

use chrono::{DateTime, Local};
use std::fmt::Write;
use std::time::Duration;

use crate::dns::DNSPacket;
use crate::dnssec::{DnssecOutcome, SecureResolution};
use crate::resolver::ResolvedQuery;

pub const DNSSEC_NOT_SUPPORTED: &str = "DNSSEC not supported";
pub const DNSSEC_VERIFY_FAILED: &str = "DNSSec Verification failed";

/// Timing footer data
#[derive(Debug, Clone)]
pub struct QueryStats {
    pub elapsed: Duration,
    pub when: DateTime<Local>,
}

impl QueryStats {
    pub fn new(elapsed: Duration) -> Self {
        Self {
            elapsed,
            when: Local::now(),
        }
    }
}

/// Size of the final response as it went over the wire
pub fn message_size(packet: &DNSPacket) -> usize {
    packet.serialize().map(|bytes| bytes.len()).unwrap_or(0)
}

fn row(out: &mut String, name: &str, ttl: u32, rtype: &str, data: &str) {
    let _ = writeln!(
        out,
        "{:<33}{:<6}{:<5}{:<7}{}",
        name,
        ttl.to_string(),
        "IN",
        rtype,
        data
    );
}

/// QUESTION and ANSWER sections plus the timing footer. The CNAME chain
/// comes first, then the final records; every row carries the TTL of the
/// first answer record.
pub fn render_answer(query: &ResolvedQuery, stats: &QueryStats) -> String {
    let mut out = String::new();
    let qtype = query.qtype.to_string();

    out.push_str("QUESTION SECTION:\n");
    let _ = writeln!(out, "{:<39}{:<5}{:<5}\n", query.qname, "IN", qtype);

    out.push_str("ANSWER SECTION:\n");
    let ttl = query.response.answers.first().map(|rr| rr.ttl).unwrap_or(0);
    let mut left = query.qname.as_str();
    for target in &query.cname_chain {
        row(&mut out, left, ttl, "CNAME", target);
        left = target;
    }
    for record in query.answer_records() {
        row(
            &mut out,
            &record.name(),
            ttl,
            &record.rtype.to_string(),
            &record.rdata_text(),
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Query time: {} msec", stats.elapsed.as_millis());
    let _ = writeln!(out, "WHEN: {}", stats.when.format("%a %b %d %H:%M:%S %Y"));
    let _ = writeln!(out, "MSG SIZE rcvd: {}", message_size(&query.response));
    out
}

/// Verified zone cuts, then the answer or the status line
pub fn render_secure(resolution: &SecureResolution, stats: &QueryStats) -> String {
    let mut out = String::new();
    for zone in &resolution.verified_zones {
        let _ = writeln!(out, "Congrats! {} verified", zone);
    }

    match &resolution.outcome {
        DnssecOutcome::HaveAnswer(query) => {
            let _ = writeln!(out);
            out.push_str(&render_answer(query, stats));
        }
        DnssecOutcome::NoDnssec(query) => {
            let _ = writeln!(out, "{}", DNSSEC_NOT_SUPPORTED);
            let _ = writeln!(out);
            out.push_str(&render_answer(query, stats));
        }
        DnssecOutcome::VerifyFail { .. } => {
            let _ = writeln!(out, "{}", DNSSEC_VERIFY_FAILED);
        }
    }
    out
}
