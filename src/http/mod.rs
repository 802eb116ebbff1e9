//! HTTP(S) progressive-streaming input
//!
//! [`HttpStream`] reads a media resource over HTTP or HTTPS with the
//! behaviors streaming callers need: byte-range resumption, automatic
//! reconnection for shoutcast-style servers, ICY metadata extraction,
//! chunked transfer decoding, proxy traversal, Basic and Digest
//! authentication, cookie forwarding across redirects, and gzip body
//! decompression.

pub mod auth;
pub mod cookies;
mod inflate;
mod session;
pub mod url;

#[cfg(test)]
mod session_tests;
#[cfg(test)]
mod url_tests;

pub use session::{HttpEvent, HttpStream, Protocol};
