//! Length-prefixed JSON framing for the event channel.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! JSON.  Both directions use the same framing.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Upper bound on a single frame body.  Anything larger is treated as a
/// corrupted length header.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Result of trying to pull one frame off the front of a read buffer.
#[derive(Debug)]
pub enum Decoded<T> {
    /// Not enough bytes yet; keep reading.
    Incomplete,
    /// A full frame was decoded; `consumed` bytes can be drained.
    Frame { value: T, consumed: usize },
    /// A full frame was present but its body did not decode.  The bytes are
    /// still reported as consumed so the reader can skip past it.
    Invalid { error: String, consumed: usize },
}

pub fn encode<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    if json.len() > MAX_FRAME_LEN {
        anyhow::bail!("frame too large: {} bytes", json.len());
    }
    let len = json.len() as u32;
    let mut result = Vec::with_capacity(4 + json.len());
    result.extend_from_slice(&len.to_be_bytes());
    result.extend_from_slice(&json);
    Ok(result)
}

/// Decode one frame from `data`.
///
/// Returns an error only when the length header itself is unusable; the
/// connection cannot be resynchronised after that.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> anyhow::Result<Decoded<T>> {
    if data.len() < 4 {
        return Ok(Decoded::Incomplete);
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame length {} exceeds limit", len);
    }
    if data.len() < 4 + len {
        return Ok(Decoded::Incomplete);
    }
    let consumed = 4 + len;
    match serde_json::from_slice(&data[4..consumed]) {
        Ok(value) => Ok(Decoded::Frame { value, consumed }),
        Err(e) => Ok(Decoded::Invalid {
            error: e.to_string(),
            consumed,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientRequest, Notification};
    use serde_json::json;

    #[test]
    fn test_request_encode_decode() {
        let req = ClientRequest::SetMultiroom { enabled: true };
        let encoded = encode(&req).unwrap();
        match decode::<ClientRequest>(&encoded).unwrap() {
            Decoded::Frame { value, consumed } => {
                assert_eq!(consumed, encoded.len());
                assert_eq!(value, req);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_partial_frame_waits() {
        let n = Notification::new("system", "transition_start", json!({}));
        let encoded = encode(&n).unwrap();
        assert!(matches!(
            decode::<Notification>(&encoded[..2]).unwrap(),
            Decoded::Incomplete
        ));
        assert!(matches!(
            decode::<Notification>(&encoded[..encoded.len() - 1]).unwrap(),
            Decoded::Incomplete
        ));
    }

    #[test]
    fn test_garbage_body_is_skipped() {
        let body = b"{not json";
        let mut buf = (body.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(body);
        let good = encode(&Notification::new("plugin", "metadata", json!({"a": 1}))).unwrap();
        buf.extend_from_slice(&good);

        let consumed = match decode::<Notification>(&buf).unwrap() {
            Decoded::Invalid { consumed, .. } => consumed,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(consumed, 4 + body.len());

        match decode::<Notification>(&buf[consumed..]).unwrap() {
            Decoded::Frame { value, .. } => assert_eq!(value.kind, "metadata"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_header_is_fatal() {
        let buf = u32::MAX.to_be_bytes();
        assert!(decode::<Notification>(&buf).is_err());
    }
}
