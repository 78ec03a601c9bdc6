//! Generic request/response framing (spec §6.1): a length-prefixed
//! (int32) request followed by a header of apiKey (int16), apiVersion
//! (int16), correlationID (int32), and a nullable clientID string.
//! Responses are length-prefixed and echo the correlation ID.
//!
//! Per-API payload encoding is explicitly out of scope ("the Kafka wire
//! codec for individual APIs... only the protocol behaviors... are in
//! scope"); payloads here are bincode-encoded request/response enums
//! (see `api.rs`) carried behind this generic frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use lumadb_common::error::{Error, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

/// Reads one length-prefixed frame. Returns `None` on clean EOF.
pub async fn read_frame(
    stream: &mut (impl AsyncRead + Unpin),
) -> std::io::Result<Option<BytesMut>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut len_buf).await {
        return if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Ok(None)
        } else {
            Err(e)
        };
    }
    let len = i32::from_be_bytes(len_buf);
    if len < 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "negative frame length"));
    }
    let mut buf = BytesMut::zeroed(len as usize);
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame(
    stream: &mut (impl AsyncWrite + Unpin),
    payload: &[u8],
) -> std::io::Result<()> {
    let mut framed = BytesMut::with_capacity(4 + payload.len());
    framed.put_i32(payload.len() as i32);
    framed.extend_from_slice(payload);
    stream.write_all(&framed).await
}

pub fn parse_header(buf: &mut Bytes) -> lumadb_common::Result<RequestHeader> {
    if buf.len() < 8 {
        return Err(Error::Protocol(ProtocolError::IncompleteMessage));
    }
    let api_key = buf.get_i16();
    let api_version = buf.get_i16();
    let correlation_id = buf.get_i32();
    let client_id = read_nullable_string(buf)?;
    Ok(RequestHeader {
        api_key,
        api_version,
        correlation_id,
        client_id,
    })
}

pub fn write_header(out: &mut BytesMut, correlation_id: i32) {
    out.put_i32(correlation_id);
}

fn read_nullable_string(buf: &mut Bytes) -> lumadb_common::Result<Option<String>> {
    if buf.len() < 2 {
        return Err(Error::Protocol(ProtocolError::IncompleteMessage));
    }
    let len = buf.get_i16();
    if len < 0 {
        return Ok(None);
    }
    if buf.len() < len as usize {
        return Err(Error::Protocol(ProtocolError::IncompleteMessage));
    }
    let s = String::from_utf8(buf.copy_to_bytes(len as usize).to_vec())
        .map_err(|e| Error::Protocol(ProtocolError::InvalidFormat(e.to_string())))?;
    Ok(Some(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut out = BytesMut::new();
        out.put_i16(0);
        out.put_i16(8);
        out.put_i32(42);
        out.put_i16(-1);
        let mut frozen = out.freeze();
        let header = parse_header(&mut frozen).unwrap();
        assert_eq!(header.api_key, 0);
        assert_eq!(header.correlation_id, 42);
        assert!(header.client_id.is_none());
    }
}
