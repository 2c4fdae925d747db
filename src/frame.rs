//! Length-prefixed frame codec (§4.1).
//!
//! Every frame on the wire is a 4-byte big-endian length `N` followed by
//! exactly `N` payload bytes. `N == 0` denotes a heartbeat and never reaches
//! the application. There is no magic number, version, or checksum: TCP is
//! trusted for byte-level integrity.
use std::io;

/// Size in bytes of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Encode `payload` as a complete on-wire frame: header followed by bytes.
///
/// Returns an error if `payload` exceeds `max_frame_len`, or is so large the
/// length wouldn't fit in 31 bits (`2^31 - 1`, the hard ceiling from §4.1).
pub fn encode(payload: &[u8], max_frame_len: u32) -> io::Result<Vec<u8>> {
    let len = check_len(payload.len(), max_frame_len)?;
    let mut framed = Vec::with_capacity(HEADER_LEN + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Encode the zero-length heartbeat frame.
pub fn encode_heartbeat() -> [u8; HEADER_LEN] {
    0u32.to_be_bytes()
}

/// Decode a 4-byte big-endian header into a declared body length.
pub fn decode_header(header: [u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header)
}

/// Validate a payload length against the hard ceiling and the configured one.
fn check_len(len: usize, max_frame_len: u32) -> io::Result<u32> {
    const HARD_MAX: u32 = i32::MAX as u32; // 2^31 - 1

    let len: u32 = len.try_into().map_err(|_| protocol_error())?;
    if len > HARD_MAX || len > max_frame_len {
        return Err(protocol_error());
    }
    Ok(len)
}

/// Whether a declared body length is within the configured ceiling.
///
/// Used on the read side to reject an oversized frame before allocating a
/// body buffer for it (§7, "Protocol error").
pub fn check_declared_len(len: u32, max_frame_len: u32) -> io::Result<()> {
    if len > max_frame_len {
        return Err(protocol_error());
    }
    Ok(())
}

fn protocol_error() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "frame exceeds configured length ceiling")
}
