//! RTP packet assembly and inspection
//!
//! Packets are built as flat byte vectors: a 12-byte RFC 3550 header
//! followed by payload-format framing and media bytes. The inspection
//! helpers exist for receivers and tests; senders only ever append.

use byteorder::{BigEndian, ByteOrder};

/// Fixed RTP header length (no CSRC, no extension)
pub const RTP_HEADER_LEN: usize = 12;

/// An assembled outbound packet with its scheduling timestamp
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    /// Complete wire bytes, header included
    pub data: Vec<u8>,
    /// Decoding timestamp in microseconds, used for pacing
    pub dts: i64,
}

/// Write the fixed 12-byte header into the front of `buf`
///
/// `buf` must be at least [`RTP_HEADER_LEN`] long. The timestamp is the
/// presentation time in microseconds scaled to `clock_rate`, truncated
/// to 32 bits.
pub fn write_header(
    buf: &mut [u8],
    marker: bool,
    payload_type: u8,
    sequence: u16,
    pts_us: i64,
    clock_rate: u32,
    ssrc: [u8; 4],
) {
    let timestamp = scale_timestamp(pts_us, clock_rate);
    buf[0] = 0x80;
    buf[1] = if marker { 0x80 } else { 0x00 } | (payload_type & 0x7f);
    BigEndian::write_u16(&mut buf[2..4], sequence);
    BigEndian::write_u32(&mut buf[4..8], timestamp);
    buf[8..12].copy_from_slice(&ssrc);
}

/// Scale a microsecond timestamp to an RTP clock, wrapping mod 2^32
#[must_use]
pub fn scale_timestamp(pts_us: i64, clock_rate: u32) -> u32 {
    let scaled = i128::from(pts_us) * i128::from(clock_rate) / 1_000_000;
    scaled as u32
}

/// Sequence number of a packet
#[must_use]
pub fn sequence(packet: &[u8]) -> u16 {
    BigEndian::read_u16(&packet[2..4])
}

/// Timestamp field of a packet
#[must_use]
pub fn timestamp(packet: &[u8]) -> u32 {
    BigEndian::read_u32(&packet[4..8])
}

/// SSRC field of a packet
#[must_use]
pub fn ssrc(packet: &[u8]) -> u32 {
    BigEndian::read_u32(&packet[8..12])
}

/// Payload type field of a packet
#[must_use]
pub fn payload_type(packet: &[u8]) -> u8 {
    packet[1] & 0x7f
}

/// Marker bit of a packet
#[must_use]
pub fn marker(packet: &[u8]) -> bool {
    packet[1] & 0x80 != 0
}
