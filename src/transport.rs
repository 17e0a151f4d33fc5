use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::dns::{DNSPacket, enums::DNSResourceType};
use crate::error::{DnsError, Result};

/// Large enough for DNSSEC replies at the advertised EDNS payload size
const RECV_BUFFER_SIZE: usize = 4096;

/// One query to one server. Retries and fallback belong to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn query(
        &self,
        name: &str,
        rtype: DNSResourceType,
        server: SocketAddr,
        timeout: Duration,
        want_dnssec: bool,
    ) -> Result<DNSPacket>;
}

/// Plain UDP transport; one ephemeral socket per query
pub struct UdpTransport {
    next_id: AtomicU16,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU16::new(rand::random()),
        }
    }

    async fn exchange(&self, query: &DNSPacket, server: SocketAddr) -> Result<DNSPacket> {
        let transport_err = |reason: String| DnsError::Transport {
            server: server.to_string(),
            reason,
        };

        let query_bytes = query.serialize()?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        socket.send(&query_bytes).await?;

        let mut response_buf = vec![0u8; RECV_BUFFER_SIZE];
        let response_len = socket.recv(&mut response_buf).await?;
        trace!(
            "Raw UDP response from {} ({} bytes): {:02x?}",
            server,
            response_len,
            &response_buf[..response_len.min(64)]
        );

        let response = DNSPacket::parse(&response_buf[..response_len]).map_err(|e| {
            debug!("Failed to parse UDP response from {}: {}", server, e);
            transport_err(format!("unparseable response: {}", e))
        })?;

        if response.header.id != query.header.id {
            return Err(transport_err(format!(
                "response id {} does not match query id {}",
                response.header.id, query.header.id
            )));
        }
        if !response.header.qr {
            return Err(transport_err("reply is not a response".to_string()));
        }

        debug!(
            "Response from {}: rcode={}, answers={}, authorities={}, additional={}",
            server,
            response.header.rcode,
            response.answers.len(),
            response.authorities.len(),
            response.resources.len()
        );
        Ok(response)
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn query(
        &self,
        name: &str,
        rtype: DNSResourceType,
        server: SocketAddr,
        hop_timeout: Duration,
        want_dnssec: bool,
    ) -> Result<DNSPacket> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let query = DNSPacket::query(id, name, rtype, want_dnssec);
        debug!("Querying {} for {} {} (id={})", server, name, rtype, id);

        timeout(hop_timeout, self.exchange(&query, server))
            .await
            .map_err(|_| DnsError::Timeout {
                server: server.to_string(),
            })?
    }
}
