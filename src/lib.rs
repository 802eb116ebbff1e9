//! # medianet
//!
//! A pure Rust library for progressive media streaming over HTTP(S)
//! and packet-level media output over RTP.
//!
//! ## Features
//!
//! - Resumable, reconnecting HTTP(S) byte streams with range seeking
//! - Shoutcast/Icecast (ICY) metadata extraction
//! - Proxy tunneling, Basic and Digest authentication, cookies, gzip
//! - Per-codec RTP packetization with SRTP protection
//! - Multi-sink fan-out with RTCP sender reports and SDP generation
//!
//! ## Example
//!
//! ```rust,no_run
//! use medianet::{Codec, Frame, HttpConfig, HttpStream, RtpConfig, RtpSession, StreamFormat};
//!
//! # async fn example() -> Result<(), medianet::MediaNetError> {
//! // Pull a stream over HTTP
//! let mut input = HttpStream::open("http://radio.example/live", HttpConfig::default()).await?;
//!
//! // Push it back out as RTP
//! let config = RtpConfig::builder().destination("239.255.1.1").build();
//! let mut session = RtpSession::new(config);
//! let mut stream = session.add_stream(&StreamFormat::audio(Codec::Mpa, 44_100, 2)).await?;
//!
//! let mut buf = vec![0u8; 1024];
//! let n = input.read(&mut buf).await?;
//! stream.send_frame(&Frame::new(buf[..n].to_vec(), 0)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library has two independent halves joined by shared types:
//!
//! - **Input**: [`HttpStream`] - byte-oriented progressive download
//! - **Output**: [`RtpSession`] - frame-oriented packetized send
//! - **Low-level**: protocol modules - direct access to framing and SRTP

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

// Internal modules
pub mod http;
pub mod net;
pub mod rtp;

// Re-exports
pub use error::{HttpError, MediaNetError, RtpError, SrtpError};
pub use http::{HttpEvent, HttpStream, Protocol};
pub use rtp::{Codec, Frame, RtpSession, RtpStream, SrtpSession, StreamFormat};
pub use types::{Credentials, HttpConfig, RtpConfig, TransportProto};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        Codec, Credentials, Frame, HttpConfig, HttpError, HttpStream, MediaNetError, RtpConfig,
        RtpError, RtpSession, RtpStream, StreamFormat, TransportProto,
    };
}
