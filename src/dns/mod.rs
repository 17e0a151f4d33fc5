pub mod common;
pub mod edns;
pub mod enums;
pub mod header;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitReader, BitWrite, BitWriter};
use common::PacketComponent;
use edns::EdnsOpt;
use enums::DNSResourceType;
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use tracing::{debug, trace};

/// Payload size advertised when signature records are requested
pub const DNSSEC_UDP_PAYLOAD_SIZE: u16 = 4096;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    /// ADDITIONAL section, without the OPT pseudo-record
    pub resources: Vec<DNSResource>,
    /// EDNS0 OPT record if present (extracted from additional records)
    pub edns: Option<EdnsOpt>,
}

#[derive(Debug)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    CompressionLoop,
    InvalidQuestionSection,
    InvalidAnswerSection,
    InvalidAuthoritySection,
    InvalidAdditionalSection,
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "Invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "Invalid DNS label"),
            ParseError::CompressionLoop => write!(f, "DNS compression loop detected"),
            ParseError::InvalidQuestionSection => write!(f, "Invalid question section"),
            ParseError::InvalidAnswerSection => write!(f, "Invalid answer section"),
            ParseError::InvalidAuthoritySection => write!(f, "Invalid authority section"),
            ParseError::InvalidAdditionalSection => write!(f, "Invalid additional section"),
            ParseError::InvalidBitStream(e) => write!(f, "Invalid bit stream: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

impl DNSPacket {
    /// Builds a single-question iterative query. With `want_dnssec` an OPT
    /// record carrying the DO flag is attached.
    pub fn query(id: u16, name: &str, qtype: DNSResourceType, want_dnssec: bool) -> Self {
        let mut packet = DNSPacket {
            header: DNSHeader::iterative_query(id),
            questions: vec![DNSQuestion::new(name, qtype)],
            ..Default::default()
        };
        if want_dnssec {
            packet.add_edns(DNSSEC_UDP_PAYLOAD_SIZE, true);
        }
        packet
    }

    pub fn valid(&self) -> bool {
        if self.header.qdcount as usize != self.questions.len()
            || self.header.ancount as usize != self.answers.len()
            || self.header.nscount as usize != self.authorities.len()
        {
            return false;
        }

        let additional = self.resources.len() + self.edns.is_some() as usize;
        if self.header.arcount as usize != additional {
            return false;
        }

        for question in &self.questions {
            let total_length: usize = question.labels.iter().map(|l| l.len() + 1).sum();
            if total_length > 255 || question.labels.iter().any(|l| l.len() > 63) {
                return false;
            }
        }

        self.header.opcode <= 2
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        if buf.len() < 12 {
            return Err(ParseError::InvalidHeader);
        }
        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut packet = DNSPacket::default();
        packet.header.read(&mut reader, buf)?;
        debug!(
            "Parsed DNS header: id={}, qr={}, rcode={}, an={}, ns={}, ar={}",
            packet.header.id,
            packet.header.qr,
            packet.header.rcode,
            packet.header.ancount,
            packet.header.nscount,
            packet.header.arcount
        );

        for _ in 0..packet.header.qdcount {
            let mut question = DNSQuestion::default();
            question
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidQuestionSection)?;
            packet.questions.push(question);
        }

        for _ in 0..packet.header.ancount {
            let mut answer = DNSResource::default();
            answer
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidAnswerSection)?;
            packet.answers.push(answer);
        }

        for _ in 0..packet.header.nscount {
            let mut authority = DNSResource::default();
            authority
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidAuthoritySection)?;
            packet.authorities.push(authority);
        }

        for _ in 0..packet.header.arcount {
            let mut resource = DNSResource::default();
            resource
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidAdditionalSection)?;

            // The OPT pseudo-record is owned by the root name and is not part
            // of the additional data proper
            if resource.rtype == DNSResourceType::OPT && resource.labels.is_empty() {
                let edns = EdnsOpt::parse_from_resource(
                    resource.raw_class.unwrap_or(512),
                    resource.ttl,
                    &resource.rdata,
                )?;
                packet.edns = Some(edns);
                continue;
            }

            packet.resources.push(resource);
        }

        Ok(packet)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::new();
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);

        // Counts always follow the sections actually present
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = (self.resources.len() + self.edns.is_some() as usize) as u16;
        header.write(&mut writer)?;

        for question in self.questions.iter() {
            question.write(&mut writer)?;
        }
        for answer in self.answers.iter() {
            answer.write(&mut writer)?;
        }
        for authority in self.authorities.iter() {
            authority.write(&mut writer)?;
        }
        for resource in self.resources.iter() {
            resource.write(&mut writer)?;
        }

        if let Some(edns) = &self.edns {
            let (udp_payload_size, ttl, rdata) = edns.to_resource_format();
            writer.write_var::<u8>(8, 0)?;
            writer.write_var::<u16>(16, DNSResourceType::OPT.into())?;
            writer.write_var::<u16>(16, udp_payload_size)?;
            writer.write_var::<u32>(32, ttl)?;
            writer.write_var::<u16>(16, rdata.len() as u16)?;
            writer.write_bytes(&rdata)?;
        }

        Ok(buf)
    }

    pub fn add_edns(&mut self, payload_size: u16, do_flag: bool) {
        let mut edns = EdnsOpt::with_payload_size(payload_size);
        edns.set_do_flag(do_flag);
        self.edns = Some(edns);
        self.header.arcount = (self.resources.len() + 1) as u16;
    }

    pub fn dnssec_requested(&self) -> bool {
        self.edns.as_ref().map(|edns| edns.do_flag()).unwrap_or(false)
    }

    /// Name and type of the first question, if any
    pub fn question(&self) -> Option<(String, DNSResourceType)> {
        self.questions.first().map(|q| (q.name(), q.qtype))
    }

    /// Keeps the header counts in step after sections were edited in place
    pub fn sync_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = (self.resources.len() + self.edns.is_some() as usize) as u16;
    }
}
