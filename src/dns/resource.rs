use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::{
    ParseError,
    common::{PacketComponent, decode_name, labels_from_name, name_from_labels, write_canonical_name},
    enums::{DNSResourceClass, DNSResourceType},
};
use crate::dnssec::calculate_key_tag;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdlength: u16,
    /// RDATA exactly as received; may contain compression pointers
    pub rdata: Vec<u8>,
    /// Decoded RDATA for the record types the resolver inspects
    pub parsed_rdata: Option<RData>,
    /// CLASS field as sent on the wire (the OPT record stores its payload size here)
    pub raw_class: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    MX {
        preference: u16,
        exchange: String,
    },
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    DS(DsRecord),
    DNSKEY(DnskeyRecord),
    RRSIG(RrsigRecord),
}

/// Delegation signer RDATA (RFC 4034 section 5)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

/// DNSKEY RDATA (RFC 4034 section 2)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnskeyRecord {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

/// RRSIG RDATA (RFC 4034 section 3)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RrsigRecord {
    pub type_covered: DNSResourceType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: String,
    pub signature: Vec<u8>,
}

impl DsRecord {
    fn parse(rdata: &[u8]) -> Option<Self> {
        if rdata.len() < 4 {
            return None;
        }
        Some(Self {
            key_tag: u16::from_be_bytes([rdata[0], rdata[1]]),
            algorithm: rdata[2],
            digest_type: rdata[3],
            digest: rdata[4..].to_vec(),
        })
    }

    fn to_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        out.push(self.algorithm);
        out.push(self.digest_type);
        out.extend_from_slice(&self.digest);
    }
}

impl DnskeyRecord {
    /// Secure entry point flag; set on key-signing keys
    pub const SEP_FLAG: u16 = 0x0001;
    /// Zone key flag; required for any key that signs zone data
    pub const ZONE_FLAG: u16 = 0x0100;

    fn parse(rdata: &[u8]) -> Option<Self> {
        if rdata.len() < 4 {
            return None;
        }
        Some(Self {
            flags: u16::from_be_bytes([rdata[0], rdata[1]]),
            protocol: rdata[2],
            algorithm: rdata[3],
            public_key: rdata[4..].to_vec(),
        })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.public_key.len());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.push(self.protocol);
        out.push(self.algorithm);
        out.extend_from_slice(&self.public_key);
        out
    }

    pub fn key_tag(&self) -> u16 {
        calculate_key_tag(self.flags, self.protocol, self.algorithm, &self.public_key)
    }

    pub fn is_ksk(&self) -> bool {
        self.flags & Self::SEP_FLAG != 0
    }

    pub fn is_zone_key(&self) -> bool {
        self.flags & Self::ZONE_FLAG != 0
    }
}

impl RrsigRecord {
    fn parse(rdata: &[u8]) -> Option<Self> {
        if rdata.len() < 18 {
            return None;
        }
        let be32 = |i: usize| u32::from_be_bytes([rdata[i], rdata[i + 1], rdata[i + 2], rdata[i + 3]]);
        // The signer name is never compressed
        let (signer, used) = decode_name(&rdata[18..], 0, &[]).ok()?;

        Some(Self {
            type_covered: u16::from_be_bytes([rdata[0], rdata[1]]).into(),
            algorithm: rdata[2],
            labels: rdata[3],
            original_ttl: be32(4),
            expiration: be32(8),
            inception: be32(12),
            key_tag: u16::from_be_bytes([rdata[16], rdata[17]]),
            signer_name: name_from_labels(&signer),
            signature: rdata[18 + used..].to_vec(),
        })
    }

    /// RRSIG RDATA minus the signature, with the signer name in canonical form.
    /// This is the prefix of the data every RRSIG signs.
    pub fn signed_prefix(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18 + self.signer_name.len() + 2);
        out.extend_from_slice(&u16::from(self.type_covered).to_be_bytes());
        out.push(self.algorithm);
        out.push(self.labels);
        out.extend_from_slice(&self.original_ttl.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.inception.to_be_bytes());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        write_canonical_name(&mut out, &labels_from_name(&self.signer_name));
        out
    }
}

impl RData {
    /// Decodes RDATA for the supported types; `None` for anything else or
    /// for malformed data.
    pub fn parse(rtype: DNSResourceType, rdata: &[u8], packet_buf: &[u8]) -> Option<Self> {
        let name_at = |start: usize| -> Option<(String, usize)> {
            decode_name(rdata, start, packet_buf)
                .ok()
                .map(|(labels, used)| (name_from_labels(&labels), used))
        };

        match rtype {
            DNSResourceType::A => {
                let octets: [u8; 4] = rdata.try_into().ok()?;
                Some(RData::A(Ipv4Addr::from(octets)))
            }
            DNSResourceType::AAAA => {
                let octets: [u8; 16] = rdata.try_into().ok()?;
                Some(RData::AAAA(Ipv6Addr::from(octets)))
            }
            DNSResourceType::NS => name_at(0).map(|(n, _)| RData::NS(n)),
            DNSResourceType::CNAME => name_at(0).map(|(n, _)| RData::CNAME(n)),
            DNSResourceType::MX => {
                if rdata.len() < 3 {
                    return None;
                }
                let preference = u16::from_be_bytes([rdata[0], rdata[1]]);
                let (exchange, _) = name_at(2)?;
                Some(RData::MX {
                    preference,
                    exchange,
                })
            }
            DNSResourceType::SOA => {
                let (mname, used_m) = name_at(0)?;
                let (rname, used_r) = name_at(used_m)?;
                let tail = rdata.get(used_m + used_r..used_m + used_r + 20)?;
                let be32 = |i: usize| u32::from_be_bytes([tail[i], tail[i + 1], tail[i + 2], tail[i + 3]]);
                Some(RData::SOA {
                    mname,
                    rname,
                    serial: be32(0),
                    refresh: be32(4),
                    retry: be32(8),
                    expire: be32(12),
                    minimum: be32(16),
                })
            }
            DNSResourceType::DS => DsRecord::parse(rdata).map(RData::DS),
            DNSResourceType::DNSKEY => DnskeyRecord::parse(rdata).map(RData::DNSKEY),
            DNSResourceType::RRSIG => RrsigRecord::parse(rdata).map(RData::RRSIG),
            _ => None,
        }
    }

    pub fn rtype(&self) -> DNSResourceType {
        match self {
            RData::A(_) => DNSResourceType::A,
            RData::AAAA(_) => DNSResourceType::AAAA,
            RData::NS(_) => DNSResourceType::NS,
            RData::CNAME(_) => DNSResourceType::CNAME,
            RData::MX { .. } => DNSResourceType::MX,
            RData::SOA { .. } => DNSResourceType::SOA,
            RData::DS(_) => DNSResourceType::DS,
            RData::DNSKEY(_) => DNSResourceType::DNSKEY,
            RData::RRSIG(_) => DNSResourceType::RRSIG,
        }
    }

    /// Uncompressed RDATA with embedded names lower-cased (RFC 4034 section 6.2)
    pub fn to_canonical_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            RData::A(ip) => out.extend_from_slice(&ip.octets()),
            RData::AAAA(ip) => out.extend_from_slice(&ip.octets()),
            RData::NS(name) | RData::CNAME(name) => {
                write_canonical_name(&mut out, &labels_from_name(name))
            }
            RData::MX {
                preference,
                exchange,
            } => {
                out.extend_from_slice(&preference.to_be_bytes());
                write_canonical_name(&mut out, &labels_from_name(exchange));
            }
            RData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                write_canonical_name(&mut out, &labels_from_name(mname));
                write_canonical_name(&mut out, &labels_from_name(rname));
                for v in [serial, refresh, retry, expire, minimum] {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            RData::DS(ds) => ds.to_wire(&mut out),
            RData::DNSKEY(key) => out = key.to_rdata(),
            RData::RRSIG(sig) => {
                out = sig.signed_prefix();
                out.extend_from_slice(&sig.signature);
            }
        }
        out
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD;

        match self {
            RData::A(ip) => write!(f, "{}", ip),
            RData::AAAA(ip) => write!(f, "{}", ip),
            RData::NS(name) | RData::CNAME(name) => write!(f, "{}", name),
            RData::MX {
                preference,
                exchange,
            } => write!(f, "{} {}", preference, exchange),
            RData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            ),
            RData::DS(ds) => write!(
                f,
                "{} {} {} {}",
                ds.key_tag,
                ds.algorithm,
                ds.digest_type,
                hex::encode_upper(&ds.digest)
            ),
            RData::DNSKEY(key) => write!(
                f,
                "{} {} {} {}",
                key.flags,
                key.protocol,
                key.algorithm,
                b64.encode(&key.public_key)
            ),
            RData::RRSIG(sig) => write!(
                f,
                "{} {} {} {} {} {} {} {} {}",
                sig.type_covered,
                sig.algorithm,
                sig.labels,
                sig.original_ttl,
                sig.expiration,
                sig.inception,
                sig.key_tag,
                sig.signer_name,
                b64.encode(&sig.signature)
            ),
        }
    }
}

impl DNSResource {
    /// Builds an IN-class record whose RDATA is encoded from `data`
    pub fn new(name: &str, ttl: u32, data: RData) -> Self {
        let rdata = data.to_canonical_wire();
        Self {
            labels: labels_from_name(name),
            rtype: data.rtype(),
            rclass: DNSResourceClass::IN,
            ttl,
            rdlength: rdata.len() as u16,
            rdata,
            parsed_rdata: Some(data),
            raw_class: None,
        }
    }

    pub fn a(name: &str, ttl: u32, ip: Ipv4Addr) -> Self {
        Self::new(name, ttl, RData::A(ip))
    }

    pub fn name(&self) -> String {
        name_from_labels(&self.labels)
    }

    /// RDATA suitable for re-serialisation and signature checks: names
    /// decompressed and lower-cased, other types passed through verbatim.
    pub fn canonical_rdata(&self) -> Vec<u8> {
        match &self.parsed_rdata {
            Some(
                data @ (RData::NS(_) | RData::CNAME(_) | RData::MX { .. } | RData::SOA { .. }),
            ) => data.to_canonical_wire(),
            _ => self.rdata.clone(),
        }
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.parsed_rdata {
            Some(RData::A(ip)) => Some(ip),
            _ => None,
        }
    }

    /// Target name of an NS or CNAME record
    pub fn target_name(&self) -> Option<&str> {
        match &self.parsed_rdata {
            Some(RData::NS(name)) | Some(RData::CNAME(name)) => Some(name),
            _ => None,
        }
    }

    pub fn dnskey(&self) -> Option<&DnskeyRecord> {
        match &self.parsed_rdata {
            Some(RData::DNSKEY(key)) => Some(key),
            _ => None,
        }
    }

    pub fn ds(&self) -> Option<&DsRecord> {
        match &self.parsed_rdata {
            Some(RData::DS(ds)) => Some(ds),
            _ => None,
        }
    }

    pub fn rrsig(&self) -> Option<&RrsigRecord> {
        match &self.parsed_rdata {
            Some(RData::RRSIG(sig)) => Some(sig),
            _ => None,
        }
    }

    /// Presentation form of the RDATA
    pub fn rdata_text(&self) -> String {
        match &self.parsed_rdata {
            Some(data) => data.to_string(),
            None => format!("\\# {} {}", self.rdata.len(), hex::encode(&self.rdata)),
        }
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        let rdata = self.canonical_rdata();
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.raw_class.unwrap_or_else(|| self.rclass.into()))?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, rdata.len() as u16)?;
        writer.write_bytes(&rdata)?;
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        self.labels = self.read_labels(reader, packet_buf)?;
        self.rtype = reader.read_var::<u16>(16)?.into();
        let raw_class = reader.read_var::<u16>(16)?;
        self.raw_class = Some(raw_class);
        self.rclass = raw_class.into();
        self.ttl = reader.read_var::<u32>(32)?;
        self.rdlength = reader.read_var::<u16>(16)?;
        let mut buf = vec![0_u8; self.rdlength as usize];
        reader.read_bytes(&mut buf)?;
        self.parsed_rdata = RData::parse(self.rtype, &buf, packet_buf);
        self.rdata = buf;

        Ok(())
    }
}
