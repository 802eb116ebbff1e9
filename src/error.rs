use std::io;
use thiserror::Error;

/// HTTP access errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// URL has no usable host
    #[error("invalid host in URL: {url}")]
    InvalidHost {
        /// The offending URL
        url: String,
    },

    /// Proxy URL has no usable host
    #[error("invalid proxy host: {proxy}")]
    InvalidProxy {
        /// The offending proxy URL
        proxy: String,
    },

    /// Malformed status line or header
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// Description of what failed to parse
        message: String,
    },

    /// Server requires authentication and no usable credentials are set
    #[error("authentication required by {origin}")]
    AuthRequired {
        /// Host that issued the 401
        origin: String,
    },

    /// Digest challenge uses an algorithm we do not implement
    #[error("unsupported authentication algorithm: {algorithm}")]
    UnsupportedAuth {
        /// The algorithm named by the challenge
        algorithm: String,
    },

    /// Server's Authentication-Info rspauth did not match our computation
    #[error("server authentication digest mismatch")]
    ResponseAuthMismatch,

    /// Redirect target is not http/https
    #[error("insecure redirect to {location}")]
    InsecureRedirect {
        /// The rejected Location value
        location: String,
    },

    /// Too many redirect hops
    #[error("redirect limit exceeded after {hops} hops")]
    RedirectExceeded {
        /// Number of hops followed before giving up
        hops: u32,
    },

    /// Server is an MMS-over-HTTP endpoint, which we do not speak
    #[error("MMS-over-HTTP server detected, unsupported")]
    MmsUnsupported,

    /// Fatal HTTP status
    #[error("HTTP error status {code}")]
    Status {
        /// The status code
        code: u16,
    },

    /// CONNECT tunnel through the proxy was refused
    #[error("proxy CONNECT tunnel refused (status {code})")]
    TunnelRefused {
        /// Proxy status code
        code: u16,
    },

    /// TLS setup failed
    #[error("TLS handshake with {host} failed: {message}")]
    Tls {
        /// Origin host we were verifying
        host: String,
        /// Description of the failure
        message: String,
    },

    /// Stream body decompression failed
    #[error("content decoding error: {0}")]
    ContentDecoding(String),

    /// Network I/O error
    #[error("network error: {0}")]
    Io(#[from] io::Error),
}

/// RTP output errors
#[derive(Debug, Error)]
pub enum RtpError {
    /// G.726 was requested at a bitrate with no payload format
    #[error("unsupported G.726 bitrate: {kbps} kbit/s")]
    UnsupportedG726Rate {
        /// The rejected bitrate
        kbps: u32,
    },

    /// All 32 dynamic payload type numbers are taken
    #[error("too many RTP elementary streams")]
    PayloadTypesExhausted,

    /// No free RTP port pair
    #[error("no usable RTP port")]
    PortsExhausted,

    /// Destination socket setup failed
    #[error("cannot create RTP socket for {destination}: {source}")]
    SocketSetup {
        /// Destination host:port
        destination: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Passive (COMEDIA) listener setup failed
    #[error("passive COMEDIA RTP socket failed: {0}")]
    ListenerSetup(#[source] io::Error),

    /// SRTP configuration rejected
    #[error("SRTP setup failed: {0}")]
    Srtp(#[from] SrtpError),

    /// The endpoint's sender task is gone
    #[error("sender task stopped")]
    SenderStopped,
}

/// SRTP protect/unprotect errors
#[derive(Debug, Error)]
pub enum SrtpError {
    /// Master key does not decode to the expected byte length
    #[error("bad SRTP key: expected {expected} bytes, got {actual}")]
    BadKeyLength {
        /// Expected decoded length in bytes
        expected: usize,
        /// Actual decoded length in bytes
        actual: usize,
    },

    /// Master salt does not decode to the expected byte length
    #[error("bad SRTP salt: expected {expected} bytes, got {actual}")]
    BadSaltLength {
        /// Expected decoded length in bytes
        expected: usize,
        /// Actual decoded length in bytes
        actual: usize,
    },

    /// Key or salt contains non-hex characters
    #[error("invalid hex in SRTP key material")]
    InvalidHex,

    /// Packet too short to carry an RTP header and tag
    #[error("SRTP packet truncated: {length} bytes")]
    Truncated {
        /// The packet length
        length: usize,
    },

    /// Authentication tag did not verify
    #[error("SRTP authentication failed")]
    AuthenticationFailed,
}

/// Errors from any medianet operation
#[derive(Debug, Error)]
pub enum MediaNetError {
    /// HTTP access error
    #[error("HTTP: {0}")]
    Http(#[from] HttpError),

    /// RTP output error
    #[error("RTP: {0}")]
    Rtp(#[from] RtpError),

    /// SRTP error
    #[error("SRTP: {0}")]
    SrtpFailure(#[from] SrtpError),

    /// Network I/O error
    #[error("network error: {0}")]
    Io(#[from] io::Error),
}
