//! Test fixtures for OTS calendar responses
//!
//! Byte-exact calendar answers built with the wire framing calendars use.

use crate::anchoring::ots::codec::{encode_varint, ATTESTATION, BITCOIN_TAG, PENDING_TAG};
use crate::anchoring::ots::types::Hash;

/// Test hash used for fixtures (SHA256 of "test fixture data")
pub const TEST_HASH: Hash = [
    0xab, 0xd2, 0x05, 0x55, 0x5c, 0x18, 0x6f, 0x83, 0x3a, 0x60, 0xc9, 0x82, 0xff, 0xc1, 0x7c, 0x45,
    0xcc, 0xa2, 0xee, 0x0a, 0x30, 0xf5, 0xb0, 0xa4, 0xe7, 0x33, 0x97, 0x83, 0xd0, 0x24, 0x21, 0x4e,
];

/// Nonce a calendar appends before aggregating a digest
pub const CALENDAR_NONCE: [u8; 16] = [
    0x5e, 0x1f, 0x6a, 0x03, 0x91, 0xc4, 0x22, 0x7b, 0x0d, 0xe8, 0x44, 0x19, 0xa7, 0x60, 0x3b, 0xf2,
];

/// Generate a test hash from arbitrary data
pub fn test_hash(data: &[u8]) -> Hash {
    use sha2::Digest;
    sha2::Sha256::digest(data).into()
}

/// `0x00 PENDING_TAG varbytes(varbytes(url))`
pub fn pending_attestation_bytes(calendar_url: &str) -> Vec<u8> {
    let mut inner = Vec::new();
    encode_varint(calendar_url.len() as u64, &mut inner);
    inner.extend_from_slice(calendar_url.as_bytes());

    let mut out = vec![ATTESTATION];
    out.extend_from_slice(&PENDING_TAG);
    encode_varint(inner.len() as u64, &mut out);
    out.extend_from_slice(&inner);
    out
}

/// `0x00 BITCOIN_TAG varbytes(varint(height))`
pub fn bitcoin_attestation_bytes(height: u64) -> Vec<u8> {
    let mut inner = Vec::new();
    encode_varint(height, &mut inner);

    let mut out = vec![ATTESTATION];
    out.extend_from_slice(&BITCOIN_TAG);
    encode_varint(inner.len() as u64, &mut out);
    out.extend_from_slice(&inner);
    out
}

/// Response to `POST /digest`: append nonce, sha256, pending attestation
pub fn mock_calendar_response(calendar_url: &str) -> Vec<u8> {
    let mut response = vec![0xf0, CALENDAR_NONCE.len() as u8];
    response.extend_from_slice(&CALENDAR_NONCE);
    response.push(0x08);
    response.extend_from_slice(&pending_attestation_bytes(calendar_url));
    response
}

/// Response to `GET /timestamp/{commitment}` once Bitcoin has confirmed
pub fn mock_upgraded_response(height: u64) -> Vec<u8> {
    let mut response = vec![0xf1, 0x04, 0x01, 0x00, 0x00, 0x00, 0x08, 0x08];
    response.extend_from_slice(&bitcoin_attestation_bytes(height));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchoring::ots::codec;
    use crate::anchoring::ots::types::Attestation;

    #[test]
    fn test_test_hash() {
        assert_eq!(test_hash(b"test fixture data"), TEST_HASH);
    }

    #[test]
    fn test_mock_calendar_response_parses() {
        let paths = codec::parse_fragment(&mock_calendar_response("https://test.calendar")).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(
            paths[0].attestation,
            Attestation::Pending {
                uri: "https://test.calendar".to_string()
            }
        );
    }

    #[test]
    fn test_mock_upgraded_response_parses() {
        let paths = codec::parse_fragment(&mock_upgraded_response(812_345)).unwrap();
        assert_eq!(paths[0].attestation, Attestation::Bitcoin { height: 812_345 });
        assert_eq!(paths[0].operations.len(), 3);
    }
}
