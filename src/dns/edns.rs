use super::ParseError;

/// DNSSEC OK bit in the OPT record's flag word
const DO_BIT: u16 = 0x8000;

/// EDNS0 OPT pseudo-record (RFC 6891).
///
/// Only what the resolver needs: the advertised payload size and the DO flag
/// requesting signature records. Options are carried opaquely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOpt {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<u8>,
}

impl Default for EdnsOpt {
    fn default() -> Self {
        Self {
            udp_payload_size: 4096,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: Vec::new(),
        }
    }
}

impl EdnsOpt {
    pub fn with_payload_size(payload_size: u16) -> Self {
        Self {
            udp_payload_size: payload_size,
            ..Self::default()
        }
    }

    pub fn do_flag(&self) -> bool {
        self.flags & DO_BIT != 0
    }

    pub fn set_do_flag(&mut self, value: bool) {
        if value {
            self.flags |= DO_BIT;
        } else {
            self.flags &= !DO_BIT;
        }
    }

    /// Builds the OPT record from the CLASS, TTL and RDATA fields it was
    /// smuggled in.
    pub fn parse_from_resource(class: u16, ttl: u32, rdata: &[u8]) -> Result<Self, ParseError> {
        // Each option is code(2) + length(2) + data; reject truncated ones
        let mut pos = 0;
        while pos < rdata.len() {
            let header = rdata.get(pos..pos + 4).ok_or(ParseError::InvalidAdditionalSection)?;
            let len = u16::from_be_bytes([header[2], header[3]]) as usize;
            pos += 4 + len;
        }
        if pos != rdata.len() {
            return Err(ParseError::InvalidAdditionalSection);
        }

        Ok(Self {
            udp_payload_size: class,
            extended_rcode: (ttl >> 24) as u8,
            version: (ttl >> 16) as u8,
            flags: ttl as u16,
            options: rdata.to_vec(),
        })
    }

    /// Returns (CLASS, TTL, RDATA) for writing the OPT record
    pub fn to_resource_format(&self) -> (u16, u32, Vec<u8>) {
        let ttl = ((self.extended_rcode as u32) << 24)
            | ((self.version as u32) << 16)
            | (self.flags as u32);
        (self.udp_payload_size, ttl, self.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_do_flag_survives_resource_format() {
        let mut opt = EdnsOpt::with_payload_size(1232);
        opt.set_do_flag(true);
        let (class, ttl, rdata) = opt.to_resource_format();
        assert_eq!(class, 1232);
        assert_eq!(ttl, 0x0000_8000);

        let parsed = EdnsOpt::parse_from_resource(class, ttl, &rdata).unwrap();
        assert!(parsed.do_flag());
        assert_eq!(parsed.udp_payload_size, 1232);
    }

    #[test]
    fn test_truncated_option_rejected() {
        assert!(EdnsOpt::parse_from_resource(512, 0, &[0, 10, 0, 8, 1]).is_err());
    }
}
