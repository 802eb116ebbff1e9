//! Payload-format framers other than H.264
//!
//! Each routine mirrors its RFC's framing: RFC 2250 for MPEG audio and
//! video, RFC 4184 for AC-3, RFC 4629 for H.263, RFC 3640 for AAC-hbr,
//! RFC 3016 for LATM, RFC 4867 for AMR, RFC 5574 for Speex, RFC 4103
//! for T.140.

use byteorder::{BigEndian, ByteOrder};

use super::super::packet::{OutboundPacket, RTP_HEADER_LEN};
use super::{Frame, RtpWriter};

fn finish(writer_buf: Vec<u8>, dts: i64, out: &mut Vec<OutboundPacket>) {
    out.push(OutboundPacket {
        data: writer_buf,
        dts,
    });
}

/// MPEG audio: 4-byte header carrying the fragment offset (RFC 2250 §3.5)
pub fn mpa(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN - 4;
    let chunks: Vec<&[u8]> = frame.data.chunks(max.max(1)).collect();
    let count = chunks.len();
    let mut out = Vec::with_capacity(count);
    let mut offset = 0u16;

    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut buf = writer.begin(i == count - 1, frame.pts, chunk.len() + 4);
        buf.extend_from_slice(&[0, 0]);
        let mut off = [0u8; 2];
        BigEndian::write_u16(&mut off, offset);
        buf.extend_from_slice(&off);
        buf.extend_from_slice(chunk);
        offset = offset.wrapping_add(chunk.len() as u16);
        finish(buf, frame.dts, &mut out);
    }
    out
}

/// MPEG video: 4-byte video-specific header with begin/end-of-slice
/// flags (RFC 2250 §3.4)
pub fn mpv(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN - 4;
    let chunks: Vec<&[u8]> = frame.data.chunks(max.max(1)).collect();
    let count = chunks.len();
    let mut out = Vec::with_capacity(count);

    for (i, chunk) in chunks.into_iter().enumerate() {
        let begin = i == 0;
        let end = i == count - 1;
        let mut header = 0u32;
        if begin {
            header |= 1 << 12;
        }
        if end {
            header |= 1 << 11;
        }

        let mut buf = writer.begin(end, frame.pts, chunk.len() + 4);
        let mut h = [0u8; 4];
        BigEndian::write_u32(&mut h, header);
        buf.extend_from_slice(&h);
        buf.extend_from_slice(chunk);
        finish(buf, frame.dts, &mut out);
    }
    out
}

/// AC-3: 2-byte payload header, frame type + count (RFC 4184 §4.1.1)
pub fn ac3(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN - 2;
    let chunks: Vec<&[u8]> = frame.data.chunks(max.max(1)).collect();
    let count = chunks.len();
    let mut out = Vec::with_capacity(count);

    for (i, chunk) in chunks.into_iter().enumerate() {
        let frame_type: u8 = if count == 1 {
            0 // one or more complete frames
        } else if i == 0 {
            2 // initial fragment
        } else {
            3 // other fragment
        };

        let mut buf = writer.begin(i == count - 1, frame.pts, chunk.len() + 2);
        buf.push(frame_type);
        buf.push(count as u8);
        buf.extend_from_slice(chunk);
        finish(buf, frame.dts, &mut out);
    }
    out
}

/// H.263-1998: 2-byte header; the picture start code's two zero bytes
/// are elided and signaled with the P bit (RFC 4629 §5.1)
pub fn h263(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN - 2;
    let mut out = Vec::new();

    let starts_with_psc = frame.data.len() >= 2 && frame.data[0] == 0 && frame.data[1] == 0;
    let payload: &[u8] = if starts_with_psc {
        &frame.data[2..]
    } else {
        &frame.data
    };

    let chunks: Vec<&[u8]> = payload.chunks(max.max(1)).collect();
    let count = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let p_bit = i == 0 && starts_with_psc;
        let mut buf = writer.begin(i == count - 1, frame.pts, chunk.len() + 2);
        buf.push(if p_bit { 0x04 } else { 0x00 });
        buf.push(0x00);
        buf.extend_from_slice(chunk);
        finish(buf, frame.dts, &mut out);
    }
    out
}

/// AAC-hbr: 16-bit AU-headers-length, one 13+3 bit AU header per packet
/// carrying the full access-unit size (RFC 3640 §3.3.6)
pub fn mp4a(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN - 4;
    let au_size = frame.data.len().min(0x1fff) as u16;
    let chunks: Vec<&[u8]> = frame.data.chunks(max.max(1)).collect();
    let count = chunks.len();
    let mut out = Vec::with_capacity(count);

    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut buf = writer.begin(i == count - 1, frame.pts, chunk.len() + 4);
        // AU-headers-length in bits
        buf.extend_from_slice(&[0x00, 0x10]);
        let header = au_size << 3;
        let mut h = [0u8; 2];
        BigEndian::write_u16(&mut h, header);
        buf.extend_from_slice(&h);
        buf.extend_from_slice(chunk);
        finish(buf, frame.dts, &mut out);
    }
    out
}

/// LATM: PayloadLengthInfo (255-run length bytes) then the payload,
/// split across packets when needed (RFC 3016 §4.3)
pub fn mp4a_latm(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN;
    let mut latm = Vec::with_capacity(frame.data.len() + frame.data.len() / 255 + 1);
    let mut remaining = frame.data.len();
    while remaining >= 255 {
        latm.push(0xff);
        remaining -= 255;
    }
    latm.push(remaining as u8);
    latm.extend_from_slice(&frame.data);

    let chunks: Vec<&[u8]> = latm.chunks(max.max(1)).collect();
    let count = chunks.len();
    let mut out = Vec::with_capacity(count);
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut buf = writer.begin(i == count - 1, frame.pts, chunk.len());
        buf.extend_from_slice(chunk);
        finish(buf, frame.dts, &mut out);
    }
    out
}

/// StreamMuxConfig bytes advertised in the LATM fmtp `config=` value
pub fn latm_mux_config(sample_rate: u32, channels: u8) -> [u8; 6] {
    const AAC_RATES: [u32; 13] = [
        96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
        8000, 7350,
    ];
    let index = AAC_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(AAC_RATES.len() + 2) as u8;

    [
        0x40,
        0x00,
        0x20 | index,
        channels << 4,
        0x3f,
        0xc0,
    ]
}

/// AMR octet-aligned: CMR byte then ToC+frames as produced by the
/// encoder (RFC 4867 §4.4)
pub fn amr(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN - 1;
    let chunks: Vec<&[u8]> = frame.data.chunks(max.max(1)).collect();
    let count = chunks.len();
    let mut out = Vec::with_capacity(count);

    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut buf = writer.begin(i == count - 1, frame.pts, chunk.len() + 1);
        // CMR: no mode request
        buf.push(0xf0);
        buf.extend_from_slice(chunk);
        finish(buf, frame.dts, &mut out);
    }
    out
}

/// Speex: one frame per packet, no payload header
pub fn speex(writer: &mut RtpWriter, frame: &Frame) -> Vec<OutboundPacket> {
    let mut buf = writer.begin(true, frame.pts, frame.data.len());
    buf.extend_from_slice(&frame.data);
    vec![OutboundPacket {
        data: buf,
        dts: frame.dts,
    }]
}

/// T.140: raw text, split at UTF-8 boundaries, marker never set
pub fn t140(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN;
    let mut out = Vec::new();
    let mut rest: &[u8] = &frame.data;

    while !rest.is_empty() {
        let mut take = rest.len().min(max.max(1));
        // Never split inside a multi-byte sequence
        while take > 0 && take < rest.len() && rest[take] & 0xc0 == 0x80 {
            take -= 1;
        }
        if take == 0 {
            take = rest.len().min(max.max(1));
        }

        let mut buf = writer.begin(false, frame.pts, take);
        buf.extend_from_slice(&rest[..take]);
        finish(buf, frame.dts, &mut out);
        rest = &rest[take..];
    }
    out
}
