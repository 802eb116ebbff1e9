//! RTP output: packetization, secure transport, sink fan-out, SDP
//!
//! An [`RtpSession`] turns elementary-stream frames into paced RTP
//! packets delivered to one or more sinks, optionally SRTP-protected,
//! and describes itself with an SDP document.

mod endpoint;
pub mod packet;
pub mod packetize;
mod rtcp;
mod sdp;
mod session;
pub mod srtp;

#[cfg(test)]
mod session_tests;

pub use packetize::{Category, Codec, CodecParams, Frame, RtpWriter, StreamFormat};
pub use session::{RtpSession, RtpStream};
pub use srtp::SrtpSession;
