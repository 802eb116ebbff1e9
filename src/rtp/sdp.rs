//! Session description generation (RFC 4566)

use std::fmt::Write as _;
use std::net::IpAddr;

use crate::types::{RtpConfig, TransportProto};

use super::session::StreamEntry;

/// Render the SDP document for a session's current streams
///
/// `control_base` prefixes an `a=control` attribute per stream, used
/// when the description is served over RTSP.
pub(super) fn generate(
    config: &RtpConfig,
    session_id: u64,
    streams: &[StreamEntry],
    control_base: Option<&str>,
) -> String {
    let destination = config.destination.as_deref().unwrap_or("0.0.0.0");
    let multicast = destination
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_multicast());

    let mut sdp = String::with_capacity(256);
    let _ = writeln!(sdp, "v=0");
    let _ = writeln!(sdp, "o=- {session_id} {session_id} IN IP4 0.0.0.0");
    let _ = writeln!(sdp, "s={}", config.session_name);
    let _ = writeln!(sdp, "t=0 0");
    match (multicast, config.ttl) {
        (true, Some(ttl)) => {
            let _ = writeln!(sdp, "c=IN IP4 {destination}/{ttl}");
        }
        _ => {
            let _ = writeln!(sdp, "c=IN IP4 {destination}");
        }
    }
    if config.rtcp_mux {
        let _ = writeln!(sdp, "a=rtcp-mux");
    }

    for (track, entry) in streams.iter().enumerate() {
        // UDP-Lite streams have no standard SDP proto token
        if config.proto == TransportProto::UdpLite {
            continue;
        }

        let params = &entry.params;
        let _ = writeln!(
            sdp,
            "m={} {} {} {}",
            params.category.mime_major(),
            entry.port,
            config.proto.sdp_proto(),
            entry.payload_type
        );
        if entry.bitrate > 0 {
            let _ = writeln!(sdp, "b=AS:{}", entry.bitrate / 1000);
        }

        if params.channels > 1 {
            let _ = writeln!(
                sdp,
                "a=rtpmap:{} {}/{}/{}",
                entry.payload_type, params.encoding, params.clock_rate, params.channels
            );
        } else {
            let _ = writeln!(
                sdp,
                "a=rtpmap:{} {}/{}",
                entry.payload_type, params.encoding, params.clock_rate
            );
        }
        if let Some(fmtp) = &params.fmtp {
            let _ = writeln!(sdp, "a=fmtp:{} {}", entry.payload_type, fmtp);
        }

        // Receivers assume RTCP on the next port up only when the RTP
        // port is even
        if !config.rtcp_mux && entry.port % 2 == 1 {
            let _ = writeln!(sdp, "a=rtcp:{}", entry.port.wrapping_add(1));
        }
        if config.proto.is_comedia() {
            let _ = writeln!(sdp, "a=setup:passive");
        }
        if let Some(base) = control_base {
            let _ = writeln!(sdp, "a=control:{base}/trackID={track}");
        }
    }

    sdp
}
