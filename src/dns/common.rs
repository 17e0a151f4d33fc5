use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::ParseError;

/// Compression pointers followed before a name is rejected as a loop
const MAX_POINTER_JUMPS: usize = 16;

pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    /// Reads the component; `packet_buf` is the whole message so that
    /// compression pointers can be resolved.
    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError>;

    fn read_labels<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<Vec<String>, ParseError> {
        let mut labels = Vec::new();
        loop {
            let label_len = reader.read_var::<u8>(8)?;
            if label_len == 0 {
                break;
            }
            if label_len & 0xC0 == 0xC0 {
                let low = reader.read_var::<u8>(8)?;
                let offset = (((label_len & 0x3F) as usize) << 8) | low as usize;
                let (mut rest, _) = decode_name(packet_buf, offset, packet_buf)?;
                labels.append(&mut rest);
                break;
            }
            if label_len & 0xC0 != 0 {
                return Err(ParseError::InvalidLabel);
            }
            let mut buf = vec![0; label_len as usize];
            reader.read_bytes(&mut buf)?;
            labels.push(String::from_utf8_lossy(&buf).into_owned());
        }

        Ok(labels)
    }

    fn write_labels<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        labels: &[String],
    ) -> Result<(), ParseError> {
        for label in labels.iter().filter(|l| !l.is_empty()) {
            if label.len() > 63 {
                return Err(ParseError::InvalidLabel);
            }
            writer.write_var::<u8>(8, label.len() as u8)?;
            writer.write_bytes(label.as_bytes())?;
        }
        writer.write_var::<u8>(8, 0)?;

        Ok(())
    }
}

/// Decodes a possibly compressed name starting at `start` in `local`.
///
/// `local` is the slice the name is embedded in (the packet itself or a
/// record's RDATA); pointers always resolve against `packet`. Returns the
/// labels and the number of bytes the name occupies in `local`.
pub fn decode_name(
    local: &[u8],
    start: usize,
    packet: &[u8],
) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut data = local;
    let mut pos = start;
    let mut consumed = None;
    let mut jumps = 0;

    loop {
        let len = *data.get(pos).ok_or(ParseError::InvalidLabel)?;
        if len == 0 {
            if consumed.is_none() {
                consumed = Some(pos + 1 - start);
            }
            break;
        }
        if len & 0xC0 == 0xC0 {
            let low = *data.get(pos + 1).ok_or(ParseError::InvalidLabel)?;
            if consumed.is_none() {
                consumed = Some(pos + 2 - start);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ParseError::CompressionLoop);
            }
            data = packet;
            pos = (((len & 0x3F) as usize) << 8) | low as usize;
            continue;
        }
        if len & 0xC0 != 0 {
            return Err(ParseError::InvalidLabel);
        }
        let end = pos + 1 + len as usize;
        let bytes = data.get(pos + 1..end).ok_or(ParseError::InvalidLabel)?;
        // Labels are arbitrary octets; non-UTF-8 bytes decode as U+FFFD
        labels.push(String::from_utf8_lossy(bytes).into_owned());
        pos = end;
    }

    Ok((labels, consumed.unwrap_or(0)))
}

/// Appends `labels` to `out` in uncompressed, lower-cased wire form
pub fn write_canonical_name(out: &mut Vec<u8>, labels: &[String]) {
    for label in labels.iter().filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
    }
    out.push(0);
}

/// Splits a presentation-format name into labels; the root yields none
pub fn labels_from_name(name: &str) -> Vec<String> {
    name.split('.')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Fully-qualified presentation form, e.g. `www.example.com.`
pub fn name_from_labels(labels: &[String]) -> String {
    let mut name = String::with_capacity(labels.iter().map(|l| l.len() + 1).sum());
    for label in labels.iter().filter(|l| !l.is_empty()) {
        name.push_str(label);
        name.push('.');
    }
    if name.is_empty() {
        name.push('.');
    }
    name
}

/// Normalises a user- or wire-supplied name to lower-case FQDN form
pub fn normalize_name(name: &str) -> String {
    name_from_labels(&labels_from_name(name)).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_name() {
        let buf = [3, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0];
        let (labels, used) = decode_name(&buf, 0, &buf).unwrap();
        assert_eq!(labels, vec!["www", "example"]);
        assert_eq!(used, buf.len());
    }

    #[test]
    fn test_decode_compressed_name() {
        // "example." at offset 0, then "www" + pointer to 0 at offset 9
        let buf = [
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0, 3, b'w', b'w', b'w', 0xC0, 0x00,
        ];
        let (labels, used) = decode_name(&buf, 9, &buf).unwrap();
        assert_eq!(labels, vec!["www", "example"]);
        assert_eq!(used, 6);
    }

    #[test]
    fn test_decode_non_utf8_label() {
        let buf = [2, b'a', 0xff, 3, b'c', b'o', b'm', 0];
        let (labels, used) = decode_name(&buf, 0, &buf).unwrap();
        assert_eq!(labels, vec!["a\u{fffd}", "com"]);
        assert_eq!(used, buf.len());
    }

    #[test]
    fn test_pointer_loop_is_rejected() {
        let buf = [0xC0, 0x00];
        assert!(matches!(
            decode_name(&buf, 0, &buf),
            Err(ParseError::CompressionLoop)
        ));
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(name_from_labels(&[]), ".");
        assert_eq!(labels_from_name("www.Example.com."), vec!["www", "Example", "com"]);
        assert_eq!(normalize_name("WWW.example.COM"), "www.example.com.");
        assert_eq!(normalize_name("."), ".");

        let mut out = Vec::new();
        write_canonical_name(&mut out, &labels_from_name("Ab.c"));
        assert_eq!(out, vec![2, b'a', b'b', 1, b'c', 0]);
    }
}
