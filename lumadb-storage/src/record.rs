//! On-disk record encoding (spec §4.1)
//!
//! Layout: `crc32(4) | offset(8) | timestamp(8) | key_len(4) | value_len(4)
//! | headers_count(4) | total_len(4) | key | value | headers...`
//! where each header is `name_len(2) | name | value_len(4) | value`. The
//! CRC covers everything from `timestamp` through the end of the headers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use lumadb_common::error::{Error, StorageError};
use lumadb_common::{Header, Record};

const CRC_LEN: usize = 4;
const FIXED_HEADER_LEN: usize = 8 + 8 + 4 + 4 + 4 + 4;

/// A record plus the encoded byte length, used by the segment writer to
/// track positions without re-encoding.
pub struct EncodedRecord {
    pub bytes: Bytes,
}

impl EncodedRecord {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode a record with its assigned offset into the on-disk wire format.
#[must_use]
pub fn encode_record(record: &Record) -> EncodedRecord {
    let offset = record.offset.unwrap_or(0);
    let key_len = record.key.as_ref().map_or(0, Bytes::len);
    let value_len = record.value.len();
    let headers_count = record.headers.len();

    let mut body = BytesMut::with_capacity(FIXED_HEADER_LEN - 4 + key_len + value_len + 64);
    body.put_i64(offset);
    body.put_i64(record.timestamp);
    body.put_i32(i32::try_from(key_len).unwrap_or(i32::MAX));
    body.put_i32(i32::try_from(value_len).unwrap_or(i32::MAX));
    body.put_i32(i32::try_from(headers_count).unwrap_or(i32::MAX));
    // total_len placeholder, patched below once the full body is known
    let total_len_pos = body.len();
    body.put_i32(0);

    if let Some(key) = &record.key {
        body.put_slice(key);
    }
    body.put_slice(&record.value);
    for header in &record.headers {
        body.put_i16(i16::try_from(header.name.len()).unwrap_or(i16::MAX));
        body.put_slice(header.name.as_bytes());
        body.put_i32(i32::try_from(header.value.len()).unwrap_or(i32::MAX));
        body.put_slice(&header.value);
    }

    let total_len = i32::try_from(body.len()).unwrap_or(i32::MAX);
    body[total_len_pos..total_len_pos + 4].copy_from_slice(&total_len.to_be_bytes());

    let crc = crc32fast::hash(&body);

    let mut framed = BytesMut::with_capacity(CRC_LEN + body.len());
    framed.put_u32(crc);
    framed.extend_from_slice(&body);

    EncodedRecord {
        bytes: framed.freeze(),
    }
}

/// Decode one record starting at the front of `buf`, returning the record
/// and the number of bytes consumed. Validates the CRC.
pub fn decode_record(buf: &[u8]) -> lumadb_common::Result<(Record, usize)> {
    if buf.len() < CRC_LEN + FIXED_HEADER_LEN {
        return Err(Error::Storage(StorageError::ReadFailed(
            "truncated record header".into(),
        )));
    }

    let mut cursor = buf;
    let crc = cursor.get_u32();
    let header_start = CRC_LEN;

    let offset = cursor.get_i64();
    let timestamp = cursor.get_i64();
    let key_len = cursor.get_i32();
    let value_len = cursor.get_i32();
    let headers_count = cursor.get_i32();
    let total_len = cursor.get_i32();

    if key_len < 0 || value_len < 0 || headers_count < 0 || total_len < 0 {
        return Err(Error::Storage(StorageError::ReadFailed(
            "negative length field in record header".into(),
        )));
    }
    let total_len = total_len as usize;

    if buf.len() < header_start + total_len {
        return Err(Error::Storage(StorageError::ReadFailed(
            "truncated record body".into(),
        )));
    }

    let body = &buf[header_start..header_start + total_len];
    let computed_crc = crc32fast::hash(body);
    if computed_crc != crc {
        return Err(Error::Storage(StorageError::CorruptSegment(offset)));
    }

    let mut rest = &body[FIXED_HEADER_LEN..];
    let key_len = key_len as usize;
    let value_len = value_len as usize;

    let key = if key_len > 0 {
        let k = Bytes::copy_from_slice(&rest[..key_len]);
        rest.advance(key_len);
        Some(k)
    } else {
        None
    };

    let value = Bytes::copy_from_slice(&rest[..value_len]);
    rest.advance(value_len);

    let mut headers = Vec::with_capacity(headers_count as usize);
    for _ in 0..headers_count {
        let name_len = rest.get_i16() as usize;
        let name = String::from_utf8_lossy(&rest[..name_len]).into_owned();
        rest.advance(name_len);
        let value_len = rest.get_i32() as usize;
        let value = Bytes::copy_from_slice(&rest[..value_len]);
        rest.advance(value_len);
        headers.push(Header { name, value });
    }

    let record = Record {
        offset: Some(offset),
        timestamp,
        key,
        value,
        headers,
    };

    Ok((record, CRC_LEN + total_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_without_key_or_headers() {
        let mut record = Record::new(Bytes::from_static(b"v1"), 1_700_000_000_000);
        record.offset = Some(0);
        let encoded = encode_record(&record);
        let (decoded, consumed) = decode_record(&encoded.bytes).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn roundtrip_with_key_and_headers() {
        let mut record = Record::new(Bytes::from_static(b"value-bytes"), 42)
            .with_key(Bytes::from_static(b"k1"))
            .with_header("trace-id", Bytes::from_static(b"abc123"));
        record.offset = Some(7);
        let encoded = encode_record(&record);
        let (decoded, _) = decode_record(&encoded.bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn rejects_corrupted_crc() {
        let mut record = Record::new(Bytes::from_static(b"v"), 1);
        record.offset = Some(0);
        let encoded = encode_record(&record);
        let mut corrupted = encoded.bytes.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        assert!(decode_record(&corrupted).is_err());
    }
}
