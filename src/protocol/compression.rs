//! zlib compression for packet payloads.
//!
//! PUBLISH and CONNECT payloads travel as zlib streams (RFC 1950). Payloads
//! are deflated at the best compression level before framing and inflated
//! after de-framing. An empty wire payload inflates to an empty payload.
//!
//! Rust guideline compliant 2025-01

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Write;

use crate::constants::MAX_INFLATED_LEN;
use crate::error::PushError;

/// Deflate `data` into a zlib stream.
///
/// # Errors
///
/// Returns `PushError::MalformedPacket` if the encoder fails.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>, PushError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| PushError::malformed(format!("zlib write failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| PushError::malformed(format!("zlib finish failed: {e}")))
}

/// Inflate a zlib stream.
///
/// The stream must be complete: a payload that ends before the zlib
/// trailer is rejected rather than returned partially. Output is capped at
/// [`MAX_INFLATED_LEN`] bytes.
///
/// # Errors
///
/// Returns `PushError::MalformedPacket` if the stream is corrupt, truncated,
/// or inflates past the cap.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, PushError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut inflater = Decompress::new(true);
    let initial = data.len().saturating_mul(4).clamp(256, MAX_INFLATED_LEN + 1);
    let mut inflated = Vec::with_capacity(initial);

    loop {
        if inflated.len() == inflated.capacity() {
            // one byte past the cap is enough to detect an oversized stream
            let room = inflated.capacity().min(MAX_INFLATED_LEN + 1 - inflated.len());
            inflated.reserve_exact(room);
        }

        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let consumed = usize::try_from(before_in).unwrap_or(data.len()).min(data.len());

        let status = inflater
            .decompress_vec(&data[consumed..], &mut inflated, FlushDecompress::None)
            .map_err(|e| PushError::malformed(format!("zlib inflate failed: {e}")))?;

        if inflated.len() > MAX_INFLATED_LEN {
            return Err(PushError::malformed(format!(
                "inflated payload exceeds {MAX_INFLATED_LEN} bytes"
            )));
        }
        if status == Status::StreamEnd {
            return Ok(inflated);
        }

        let progressed = inflater.total_in() != before_in || inflater.total_out() != before_out;
        if !progressed && inflated.len() < inflated.capacity() {
            return Err(PushError::malformed("zlib stream truncated"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_json() {
        let json = br#"{"pkg_name":"com.instagram.android","appid":"567067343352427"}"#;
        let deflated = deflate(json).expect("deflate");
        // zlib header with best-compression level flag
        assert_eq!(deflated[0], 0x78);
        assert_eq!(deflated[1], 0xDA);
        assert_eq!(inflate(&deflated).expect("inflate"), json);
    }

    #[test]
    fn test_repetitive_data_shrinks() {
        let data: Vec<u8> = (0..10000).map(|i| (i % 16) as u8).collect();
        let deflated = deflate(&data).expect("deflate");
        assert!(deflated.len() < data.len() / 10);
        assert_eq!(inflate(&deflated).expect("inflate"), data);
    }

    #[test]
    fn test_empty_wire_payload() {
        assert!(inflate(&[]).expect("inflate").is_empty());
    }

    #[test]
    fn test_corrupt_stream_is_malformed() {
        let err = inflate(b"definitely not zlib").expect_err("must fail");
        assert!(matches!(err, PushError::MalformedPacket(_)));
    }

    #[test]
    fn test_oversized_output_is_rejected() {
        let bomb = deflate(&vec![0u8; MAX_INFLATED_LEN + 1]).expect("deflate");
        assert!(bomb.len() < 16 * 1024);
        let err = inflate(&bomb).expect_err("must fail");
        assert!(matches!(err, PushError::MalformedPacket(_)));
    }

    #[test]
    fn test_output_at_cap_is_accepted() {
        let data = vec![7u8; MAX_INFLATED_LEN];
        let deflated = deflate(&data).expect("deflate");
        assert_eq!(inflate(&deflated).expect("inflate").len(), MAX_INFLATED_LEN);
    }

    #[test]
    fn test_truncated_stream_is_malformed() {
        let deflated = deflate(b"{\"token\":\"abc\",\"error\":\"\"}").expect("deflate");
        let err = inflate(&deflated[..deflated.len() - 6]).expect_err("must fail");
        assert!(matches!(err, PushError::MalformedPacket(_)));
    }
}
