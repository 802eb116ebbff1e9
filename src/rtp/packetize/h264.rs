//! H.264 payload framing (RFC 3984)
//!
//! Frames arrive as Annex-B byte streams. Each NAL unit that fits goes
//! out as a single-NAL packet; larger units are fragmented as FU-A.
//! The marker bit is set only on the very last packet of the access
//! unit.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::super::packet::{OutboundPacket, RTP_HEADER_LEN};
use super::{Frame, RtpWriter, hex_string};

const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const FU_A: u8 = 28;

/// Build the `a=fmtp` value from Annex-B parameter sets
///
/// Scans for SPS (type 7) and PPS (type 8) NAL units; when both are
/// found the result carries `sprop-parameter-sets` and the
/// profile-level-id taken from the three bytes after the SPS header.
/// Otherwise only the packetization mode is advertised.
pub fn fmtp(extra: &[u8]) -> String {
    let mut sps = None;
    let mut pps = None;
    let mut profile = None;

    for nal in AnnexBUnits::new(extra) {
        match nal.first().map(|b| b & 0x1f) {
            Some(NAL_TYPE_SPS) => {
                if nal.len() >= 4 {
                    profile = Some(hex_string(&nal[1..4]));
                }
                sps = Some(BASE64.encode(nal));
            }
            Some(NAL_TYPE_PPS) => {
                pps = Some(BASE64.encode(nal));
            }
            _ => {}
        }
    }

    match (sps, pps, profile) {
        (Some(sps), Some(pps), Some(profile)) => format!(
            "packetization-mode=1;profile-level-id={profile};sprop-parameter-sets={sps},{pps};"
        ),
        _ => "packetization-mode=1".to_string(),
    }
}

/// Slice one access unit into single-NAL and FU-A packets
pub fn packetize(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN;
    let nals: Vec<&[u8]> = AnnexBUnits::new(&frame.data).collect();
    let mut out = Vec::new();

    for (n, nal) in nals.iter().enumerate() {
        let last_nal = n == nals.len() - 1;
        if nal.is_empty() {
            continue;
        }

        if nal.len() <= max {
            let mut buf = writer.begin(last_nal, frame.pts, nal.len());
            buf.extend_from_slice(nal);
            out.push(OutboundPacket {
                data: buf,
                dts: frame.dts,
            });
            continue;
        }

        // FU-A: indicator keeps the NRI bits, the original type moves
        // into the FU header with start/end flags
        let indicator = (nal[0] & 0x60) | FU_A;
        let nal_type = nal[0] & 0x1f;
        let body = &nal[1..];
        let chunk_max = max - 2;
        let chunks: Vec<&[u8]> = body.chunks(chunk_max).collect();
        let count = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let start = i == 0;
            let end = i == count - 1;
            let mut fu_header = nal_type;
            if start {
                fu_header |= 0x80;
            }
            if end {
                fu_header |= 0x40;
            }

            let mut buf = writer.begin(last_nal && end, frame.pts, chunk.len() + 2);
            buf.push(indicator);
            buf.push(fu_header);
            buf.extend_from_slice(chunk);
            out.push(OutboundPacket {
                data: buf,
                dts: frame.dts,
            });
        }
    }
    out
}

/// Iterator over NAL units in an Annex-B stream (3- or 4-byte start
/// codes), yielding units without their start codes
struct AnnexBUnits<'a> {
    data: &'a [u8],
}

impl<'a> AnnexBUnits<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AnnexBUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let start = find_start_code(self.data)?;
        let after = start.0 + start.1;
        let rest = &self.data[after..];

        let end = find_start_code(rest).map_or(rest.len(), |(pos, _)| pos);
        let nal = &rest[..end];
        self.data = &rest[end..];
        Some(nal)
    }
}

/// Position and length of the next start code, if any
fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}
