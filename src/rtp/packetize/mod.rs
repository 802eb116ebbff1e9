//! Per-codec RTP payload packetization
//!
//! [`resolve`] maps an elementary-stream format onto its RTP payload
//! parameters (encoding name, clock rate, static payload type, fmtp
//! string, packetization routine); [`packetize`] slices one frame into
//! MTU-bounded packets through a shared [`RtpWriter`] so sequence
//! numbers stay strictly increasing across fragments.

mod framers;
mod h264;


use bytes::Bytes;

use crate::error::RtpError;
use crate::types::RtpConfig;

use super::packet::{self, OutboundPacket, RTP_HEADER_LEN};

/// One encoded frame (access unit) handed in by the caller
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded payload bytes
    pub data: Bytes,
    /// Presentation timestamp in microseconds
    pub pts: i64,
    /// Decoding timestamp in microseconds, used for send pacing
    pub dts: i64,
}

impl Frame {
    /// Create a frame whose decoding and presentation times coincide
    #[must_use]
    pub fn new(data: impl Into<Bytes>, pts: i64) -> Self {
        let data = data.into();
        Self { data, pts, dts: pts }
    }
}

/// Media category of a stream, drives SDP `m=` line and port choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Audio elementary stream
    Audio,
    /// Video elementary stream
    Video,
    /// Timed text
    Text,
}

impl Category {
    /// MIME major type for SDP
    #[must_use]
    pub fn mime_major(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
        }
    }
}

/// Codecs with an RTP payload mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Codec {
    Pcmu,
    Pcma,
    L16,
    L8,
    Mpa,
    Mpv,
    G726,
    Ac3,
    H263,
    H264,
    Mp4v,
    Mp4a,
    Amr,
    AmrWb,
    Speex,
    T140,
    /// Pre-muxed MPEG transport stream, static payload type 33
    Mp2t,
}

impl Codec {
    /// Four-character code used in diagnostics
    #[must_use]
    pub fn fourcc(self) -> &'static str {
        match self {
            Self::Pcmu => "ulaw",
            Self::Pcma => "alaw",
            Self::L16 => "s16b",
            Self::L8 => "u8  ",
            Self::Mpa => "mpga",
            Self::Mpv => "mpgv",
            Self::G726 => "g726",
            Self::Ac3 => "a52 ",
            Self::H263 => "H263",
            Self::H264 => "h264",
            Self::Mp4v => "mp4v",
            Self::Mp4a => "mp4a",
            Self::Amr => "samr",
            Self::AmrWb => "sawb",
            Self::Speex => "spx ",
            Self::T140 => "t140",
            Self::Mp2t => "mp2t",
        }
    }
}

/// Caller-provided description of an elementary stream
#[derive(Debug, Clone)]
pub struct StreamFormat {
    /// Codec of the stream
    pub codec: Codec,
    /// Audio sample rate in Hz (ignored for video)
    pub sample_rate: u32,
    /// Audio channel count
    pub channels: u8,
    /// Stream bitrate in bits per second (0 when unknown)
    pub bitrate: u32,
    /// Codec setup data: Annex-B parameter sets for H.264,
    /// AudioSpecificConfig for MP4A, VOS headers for MP4V
    pub extra: Vec<u8>,
}

impl StreamFormat {
    /// Describe an audio stream
    #[must_use]
    pub fn audio(codec: Codec, sample_rate: u32, channels: u8) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            bitrate: 0,
            extra: Vec::new(),
        }
    }

    /// Describe a video stream
    #[must_use]
    pub fn video(codec: Codec) -> Self {
        Self {
            codec,
            sample_rate: 0,
            channels: 0,
            bitrate: 0,
            extra: Vec::new(),
        }
    }

    /// Attach codec setup data
    #[must_use]
    pub fn with_extra(mut self, extra: impl Into<Vec<u8>>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Set the stream bitrate in bits per second
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }
}

/// Packetization routine selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketizerKind {
    /// Plain MTU split, marker on the final fragment
    Split,
    /// MPEG audio, RFC 2250 4-byte fragment-offset header
    Mpa,
    /// MPEG video, RFC 2250 video-specific header
    Mpv,
    /// AC-3, RFC 4184 2-byte payload header
    Ac3,
    /// H.263-1998, RFC 4629
    H263,
    /// H.264 single-NAL / FU-A, RFC 3984
    H264,
    /// AAC-hbr with AU headers, RFC 3640
    Mp4a,
    /// LATM-framed MPEG-4 audio, RFC 3016
    Mp4aLatm,
    /// AMR / AMR-WB octet-aligned, RFC 4867
    Amr,
    /// One Speex frame per packet, RFC 5574
    Speex,
    /// T.140 text, RFC 4103
    T140,
}

/// Resolved RTP parameters for one stream
#[derive(Debug, Clone)]
pub struct CodecParams {
    /// Static payload type when the profile defines one
    pub static_payload_type: Option<u8>,
    /// Encoding name for `a=rtpmap`
    pub encoding: &'static str,
    /// RTP clock rate
    pub clock_rate: u32,
    /// Channel count advertised in `a=rtpmap` (0 = omit)
    pub channels: u8,
    /// `a=fmtp` payload, when the codec needs one
    pub fmtp: Option<String>,
    /// Packetization routine
    pub kind: PacketizerKind,
    /// Effective MTU after packet-time shrinking
    pub mtu: usize,
    /// Media category
    pub category: Category,
}

/// Map a stream format to its RTP payload parameters
///
/// # Errors
///
/// Returns `UnsupportedG726Rate` for G.726 bitrates other than
/// 16/24/32/40 kbit/s.
#[allow(clippy::too_many_lines)]
pub fn resolve(format: &StreamFormat, config: &RtpConfig) -> Result<CodecParams, RtpError> {
    let mtu = if config.mtu <= RTP_HEADER_LEN + 16 {
        // Pessimistic IPv4 minimum, matching a degenerate configuration
        576 - 20 - 8
    } else {
        config.mtu
    };

    let mut params = CodecParams {
        static_payload_type: None,
        encoding: "",
        clock_rate: if format.sample_rate > 0 {
            format.sample_rate
        } else {
            90_000
        },
        channels: format.channels,
        fmtp: None,
        kind: PacketizerKind::Split,
        mtu,
        category: Category::Audio,
    };

    match format.codec {
        Codec::Pcmu => {
            if format.channels == 1 && format.sample_rate == 8000 {
                params.static_payload_type = Some(0);
            }
            params.encoding = "PCMU";
            set_ptime(&mut params, 20, 1);
        }
        Codec::Pcma => {
            if format.channels == 1 && format.sample_rate == 8000 {
                params.static_payload_type = Some(8);
            }
            params.encoding = "PCMA";
            set_ptime(&mut params, 20, 1);
        }
        Codec::L16 => {
            if format.channels == 1 && format.sample_rate == 44_100 {
                params.static_payload_type = Some(11);
            } else if format.channels == 2 && format.sample_rate == 44_100 {
                params.static_payload_type = Some(10);
            }
            params.encoding = "L16";
            set_ptime(&mut params, 20, 2);
        }
        Codec::L8 => {
            params.encoding = "L8";
            set_ptime(&mut params, 20, 1);
        }
        Codec::Mpa => {
            params.static_payload_type = Some(14);
            params.encoding = "MPA";
            params.clock_rate = 90_000;
            params.kind = PacketizerKind::Mpa;
        }
        Codec::Mpv => {
            params.static_payload_type = Some(32);
            params.encoding = "MPV";
            params.clock_rate = 90_000;
            params.kind = PacketizerKind::Mpv;
            params.category = Category::Video;
        }
        Codec::G726 => {
            params.encoding = match format.bitrate {
                16_000 => "G726-16",
                24_000 => "G726-24",
                32_000 => "G726-32",
                40_000 => "G726-40",
                other => {
                    return Err(RtpError::UnsupportedG726Rate { kbps: other / 1000 });
                }
            };
        }
        Codec::Ac3 => {
            params.encoding = "ac3";
            params.kind = PacketizerKind::Ac3;
        }
        Codec::H263 => {
            params.encoding = "H263-1998";
            params.clock_rate = 90_000;
            params.kind = PacketizerKind::H263;
            params.category = Category::Video;
        }
        Codec::H264 => {
            params.encoding = "H264";
            params.clock_rate = 90_000;
            params.kind = PacketizerKind::H264;
            params.category = Category::Video;
            params.fmtp = Some(h264::fmtp(&format.extra));
        }
        Codec::Mp4v => {
            params.encoding = "MP4V-ES";
            params.clock_rate = 90_000;
            params.category = Category::Video;
            if !format.extra.is_empty() {
                params.fmtp = Some(format!(
                    "profile-level-id=3; config={};",
                    hex_string(&format.extra)
                ));
            }
        }
        Codec::Mp4a => {
            if config.latm {
                params.encoding = "MP4A-LATM";
                params.kind = PacketizerKind::Mp4aLatm;
                let mux_config = framers::latm_mux_config(format.sample_rate, format.channels);
                params.fmtp = Some(format!(
                    "profile-level-id=15; object=2; cpresent=0; config={}",
                    hex_string(&mux_config)
                ));
            } else {
                params.encoding = "mpeg4-generic";
                params.kind = PacketizerKind::Mp4a;
                params.fmtp = Some(format!(
                    "streamtype=5; profile-level-id=15; mode=AAC-hbr; config={}; \
                     SizeLength=13; IndexLength=3; IndexDeltaLength=3; Profile=1;",
                    hex_string(&format.extra)
                ));
            }
        }
        Codec::Amr => {
            params.encoding = "AMR";
            params.kind = PacketizerKind::Amr;
            params.fmtp = Some("octet-align=1".to_string());
        }
        Codec::AmrWb => {
            params.encoding = "AMR-WB";
            params.kind = PacketizerKind::Amr;
            params.fmtp = Some("octet-align=1".to_string());
        }
        Codec::Speex => {
            params.encoding = "SPEEX";
            params.kind = PacketizerKind::Speex;
        }
        Codec::T140 => {
            params.encoding = "t140";
            params.clock_rate = 1000;
            params.kind = PacketizerKind::T140;
            params.category = Category::Text;
        }
        Codec::Mp2t => {
            params.static_payload_type = Some(33);
            params.encoding = "MP2T";
            params.clock_rate = 90_000;
            params.category = Category::Video;
        }
    }

    Ok(params)
}

/// Shrink the MTU down to a fixed packetization time (for audio)
fn set_ptime(params: &mut CodecParams, ptime_ms: u32, bytes_per_sample: usize) {
    let spl = ((params.clock_rate - 1) * ptime_ms / 1000 + 1) as usize;
    let bytes = bytes_per_sample * usize::from(params.channels.max(1));
    let spl = spl * bytes;

    if spl < params.mtu - RTP_HEADER_LEN {
        params.mtu = RTP_HEADER_LEN + spl;
    } else {
        // Align to a sample boundary
        params.mtu = RTP_HEADER_LEN + ((params.mtu - RTP_HEADER_LEN) / bytes) * bytes;
    }
}

/// Header state shared by all packets of one stream
#[derive(Debug)]
pub struct RtpWriter {
    /// Payload type placed in every header
    pub payload_type: u8,
    /// RTP clock rate for timestamp scaling
    pub clock_rate: u32,
    /// Fixed synchronization source
    pub ssrc: [u8; 4],
    sequence: u16,
}

impl RtpWriter {
    /// Create a writer starting at `sequence`
    #[must_use]
    pub fn new(payload_type: u8, clock_rate: u32, ssrc: [u8; 4], sequence: u16) -> Self {
        Self {
            payload_type,
            clock_rate,
            ssrc,
            sequence,
        }
    }

    /// Sequence number the next packet will carry
    #[must_use]
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Start a packet: write the header, post-increment the sequence
    pub fn begin(&mut self, marker: bool, pts: i64, capacity: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + capacity);
        buf.resize(RTP_HEADER_LEN, 0);
        packet::write_header(
            &mut buf,
            marker,
            self.payload_type,
            self.sequence,
            pts,
            self.clock_rate,
            self.ssrc,
        );
        self.sequence = self.sequence.wrapping_add(1);
        buf
    }
}

/// Slice one frame into packets according to the resolved routine
#[must_use]
pub fn packetize(
    kind: PacketizerKind,
    writer: &mut RtpWriter,
    mtu: usize,
    frame: &Frame,
) -> Vec<OutboundPacket> {
    match kind {
        PacketizerKind::Split => split(writer, mtu, frame),
        PacketizerKind::Mpa => framers::mpa(writer, mtu, frame),
        PacketizerKind::Mpv => framers::mpv(writer, mtu, frame),
        PacketizerKind::Ac3 => framers::ac3(writer, mtu, frame),
        PacketizerKind::H263 => framers::h263(writer, mtu, frame),
        PacketizerKind::H264 => h264::packetize(writer, mtu, frame),
        PacketizerKind::Mp4a => framers::mp4a(writer, mtu, frame),
        PacketizerKind::Mp4aLatm => framers::mp4a_latm(writer, mtu, frame),
        PacketizerKind::Amr => framers::amr(writer, mtu, frame),
        PacketizerKind::Speex => framers::speex(writer, frame),
        PacketizerKind::T140 => framers::t140(writer, mtu, frame),
    }
}

/// Plain split: payload sliced at the MTU, marker on the last fragment
fn split(writer: &mut RtpWriter, mtu: usize, frame: &Frame) -> Vec<OutboundPacket> {
    let max = mtu - RTP_HEADER_LEN;
    let chunks: Vec<&[u8]> = frame.data.chunks(max.max(1)).collect();
    let count = chunks.len();

    let mut out = Vec::with_capacity(count);
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut buf = writer.begin(i == count - 1, frame.pts, chunk.len());
        buf.extend_from_slice(chunk);
        out.push(OutboundPacket {
            data: buf,
            dts: frame.dts,
        });
    }
    out
}

/// Lowercase hex rendering of setup bytes for fmtp strings
fn hex_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
