//! TiVo compatibility header.
//!
//! Files that are not real TiVo recordings are prefixed with a synthetic
//! header carrying the details XML, so the client treats them as one.
//!
//! ```text
//! "TiVo" | u16 4 | u16 flag | u16 0 | u32 total | u16 2      (16 bytes)
//! u32 chunk+12 | u32 xml_len | u16 1 | u16 0 | chunk          (descriptor 1)
//! u32 chunk+12 | u32 xml_len | u16 2 | u16 0 | chunk          (descriptor 2)
//! zero padding to a 1024-byte boundary
//! ```
//!
//! `chunk` is the XML followed by zeros up to a 4-byte boundary plus four
//! more zeros. All integers are big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::transcode::MIME_TIVO_MPEG_TS;

const MAGIC: &[u8; 4] = b"TiVo";
const FLAG_PROGRAM_STREAM: u16 = 13;
const FLAG_TRANSPORT_STREAM: u16 = 45;
const HEADER_ALIGN: usize = 1024;

/// Bytes needed to bring `len` up to a multiple of `align`.
pub fn pad(len: usize, align: usize) -> usize {
    match len % align {
        0 => 0,
        extra => align - extra,
    }
}

/// Build the header for `details_xml` sent as `mime`.
pub fn tivo_header(details_xml: &str, mime: &str) -> Bytes {
    let flag = if mime == MIME_TIVO_MPEG_TS {
        FLAG_TRANSPORT_STREAM
    } else {
        FLAG_PROGRAM_STREAM
    };

    let details = details_xml.as_bytes();
    let details_len = details.len();
    let chunk_len = details_len + pad(details_len, 4) + 4;
    let block_len = chunk_len * 2 + 40;
    let padding = pad(block_len, HEADER_ALIGN);

    let mut out = BytesMut::with_capacity(block_len + padding);
    out.put_slice(MAGIC);
    out.put_u16(4);
    out.put_u16(flag);
    out.put_u16(0);
    out.put_u32((block_len + padding) as u32);
    out.put_u16(2);

    for chunk_id in 1..=2u16 {
        out.put_u32((chunk_len + 12) as u32);
        out.put_u32(details_len as u32);
        out.put_u16(chunk_id);
        out.put_u16(0);
        out.put_slice(details);
        out.put_bytes(0, chunk_len - details_len);
    }
    out.put_bytes(0, padding);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::MIME_TIVO_MPEG;

    fn be_u16(bytes: &[u8], at: usize) -> u16 {
        u16::from_be_bytes([bytes[at], bytes[at + 1]])
    }

    fn be_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad(8, 4), 0);
        assert_eq!(pad(9, 4), 3);
        assert_eq!(pad(1000, 1024), 24);
    }

    #[test]
    fn test_header_layout() {
        let xml = "<TvBus>abc</TvBus>"; // 18 bytes
        let header = tivo_header(xml, MIME_TIVO_MPEG);

        assert_eq!(header.len() % 1024, 0);
        assert_eq!(&header[..4], b"TiVo");
        assert_eq!(be_u16(&header, 4), 4);
        assert_eq!(be_u16(&header, 6), 13);
        assert_eq!(be_u16(&header, 8), 0);
        assert_eq!(be_u32(&header, 10) as usize, header.len());
        assert_eq!(be_u16(&header, 14), 2);

        // 18 bytes of XML, 2 to align, 4 trailing zeros.
        let chunk_len = 24;
        assert_eq!(be_u32(&header, 16), chunk_len + 12);
        assert_eq!(be_u32(&header, 20), 18);
        assert_eq!(be_u16(&header, 24), 1);
        assert_eq!(&header[28..46], xml.as_bytes());
        assert!(header[46..52].iter().all(|&b| b == 0));

        let second = 28 + chunk_len as usize;
        assert_eq!(be_u16(&header, second + 8), 2);
        assert_eq!(&header[second + 12..second + 30], xml.as_bytes());
        assert!(header[second + 12 + chunk_len as usize..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_transport_stream_flag() {
        let header = tivo_header("<x/>", MIME_TIVO_MPEG_TS);
        assert_eq!(be_u16(&header, 6), 45);
    }

    #[test]
    fn test_large_details_span_blocks() {
        let xml = "x".repeat(1500);
        let header = tivo_header(&xml, MIME_TIVO_MPEG);
        // 2 * (1500 + 4) + 40 = 3048, padded to 3072.
        assert_eq!(header.len(), 3072);
    }
}
