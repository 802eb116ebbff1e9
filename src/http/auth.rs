//! HTTP Basic and Digest access authentication (RFC 2617)
//!
//! Challenge state lives for as long as the logical stream: it survives
//! reconnects and seeks, and is dropped on redirects and close. The
//! client nonce comes from an injected randomness source so tests can
//! pin it to the RFC's worked example.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rand::RngCore;

use crate::error::HttpError;
use crate::types::Credentials;

/// Source of client nonces for digest authentication
pub trait ClientNonceSource: Send + Sync {
    /// Produce a fresh client nonce
    fn client_nonce(&self) -> String;
}

/// Default nonce source backed by the thread RNG
#[derive(Debug, Default)]
pub struct RandomNonce;

impl ClientNonceSource for RandomNonce {
    fn client_nonce(&self) -> String {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex(&bytes)
    }
}

/// Authentication scheme named by a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Basic`: credentials sent base64-encoded
    Basic,
    /// `Digest`: RFC 2617 challenge/response
    Digest,
}

/// Parsed `WWW-Authenticate` / `Proxy-Authenticate` challenge
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// Scheme the server asked for
    pub scheme: AuthScheme,
    /// Protection realm
    pub realm: String,
    /// Protection-space URIs (informational)
    pub domain: Option<String>,
    /// Server nonce
    pub nonce: String,
    /// Opaque token echoed back verbatim
    pub opaque: Option<String>,
    /// Whether the previous request used a stale nonce
    pub stale: bool,
    /// Digest algorithm ("MD5" or "MD5-sess"); `None` means MD5
    pub algorithm: Option<String>,
    /// Offered quality-of-protection values
    pub qop: Vec<String>,
    /// Requests made against the current nonce
    nonce_count: u32,
    /// Client nonce, generated once per challenge
    client_nonce: Option<String>,
    /// H(A1), cached across requests under MD5-sess
    session_ha1: Option<String>,
}

impl AuthChallenge {
    /// Parse a challenge header value
    ///
    /// Returns `None` for schemes other than Basic and Digest.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = match header.split_once(char::is_whitespace) {
            Some((s, p)) => (s, p),
            None => (header, ""),
        };

        let scheme = if scheme.eq_ignore_ascii_case("basic") {
            AuthScheme::Basic
        } else if scheme.eq_ignore_ascii_case("digest") {
            AuthScheme::Digest
        } else {
            tracing::debug!("ignoring unknown auth scheme: {scheme}");
            return None;
        };

        let mut challenge = Self {
            scheme,
            realm: String::new(),
            domain: None,
            nonce: String::new(),
            opaque: None,
            stale: false,
            algorithm: None,
            qop: Vec::new(),
            nonce_count: 0,
            client_nonce: None,
            session_ha1: None,
        };

        for (key, value) in AuthParams::new(params) {
            if key.eq_ignore_ascii_case("realm") {
                challenge.realm = value;
            } else if key.eq_ignore_ascii_case("domain") {
                challenge.domain = Some(value);
            } else if key.eq_ignore_ascii_case("nonce") {
                challenge.nonce = value;
            } else if key.eq_ignore_ascii_case("opaque") {
                challenge.opaque = Some(value);
            } else if key.eq_ignore_ascii_case("stale") {
                challenge.stale = value.eq_ignore_ascii_case("true");
            } else if key.eq_ignore_ascii_case("algorithm") {
                challenge.algorithm = Some(value);
            } else if key.eq_ignore_ascii_case("qop") {
                challenge.qop = value.split(',').map(|q| q.trim().to_string()).collect();
            }
        }

        Some(challenge)
    }

    /// Replace the nonce, resetting the per-nonce request counter
    pub fn set_nonce(&mut self, nonce: String) {
        if nonce != self.nonce {
            self.nonce = nonce;
            self.nonce_count = 0;
            self.session_ha1 = None;
        }
    }

    /// The qop value we will use, if any
    fn chosen_qop(&self) -> Option<&str> {
        if self.qop.iter().any(|q| q == "auth") {
            Some("auth")
        } else if self.qop.iter().any(|q| q == "auth-int") {
            Some("auth-int")
        } else {
            None
        }
    }

    /// Build the `Authorization` (or `Proxy-Authorization`) value for one
    /// request
    ///
    /// Increments the nonce count; a given challenge must therefore be
    /// asked exactly once per emitted request.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAuth` when the algorithm is neither MD5 nor
    /// MD5-sess. There is no silent fallback to Basic.
    pub fn authorization(
        &mut self,
        method: &str,
        uri: &str,
        credentials: &Credentials,
        nonces: &dyn ClientNonceSource,
    ) -> Result<String, HttpError> {
        match self.scheme {
            AuthScheme::Basic => Ok(basic_authorization(credentials)),
            AuthScheme::Digest => self.digest_authorization(method, uri, credentials, nonces),
        }
    }

    fn digest_authorization(
        &mut self,
        method: &str,
        uri: &str,
        credentials: &Credentials,
        nonces: &dyn ClientNonceSource,
    ) -> Result<String, HttpError> {
        let qop = self.chosen_qop().map(str::to_string);
        self.nonce_count += 1;
        let nc = format!("{:08x}", self.nonce_count);

        let cnonce = if qop.is_some() {
            Some(
                self.client_nonce
                    .get_or_insert_with(|| nonces.client_nonce())
                    .clone(),
            )
        } else {
            None
        };

        let response = self.response_digest(
            method,
            uri,
            credentials,
            qop.as_deref(),
            &nc,
            cnonce.as_deref(),
        )?;

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            credentials.user, self.realm, self.nonce, uri, response
        );
        if let Some(opaque) = &self.opaque {
            value.push_str(&format!(", opaque=\"{opaque}\""));
        }
        if let Some(algorithm) = &self.algorithm {
            value.push_str(&format!(", algorithm={algorithm}"));
        }
        if let Some(qop) = &qop {
            let cnonce = cnonce.as_deref().unwrap_or_default();
            value.push_str(&format!(", qop={qop}, nc={nc}, cnonce=\"{cnonce}\""));
        }
        Ok(value)
    }

    /// H(A1) per RFC 2617 §3.2.2.2, with the MD5-sess variant cached
    fn h_a1(
        &mut self,
        credentials: &Credentials,
        cnonce: Option<&str>,
    ) -> Result<String, HttpError> {
        let base = md5_hex(&format!(
            "{}:{}:{}",
            credentials.user, self.realm, credentials.password
        ));

        match self.algorithm.as_deref() {
            None => Ok(base),
            Some(a) if a.eq_ignore_ascii_case("md5") => Ok(base),
            Some(a) if a.eq_ignore_ascii_case("md5-sess") => {
                if let Some(cached) = &self.session_ha1 {
                    return Ok(cached.clone());
                }
                let ha1 = md5_hex(&format!(
                    "{base}:{}:{}",
                    self.nonce,
                    cnonce.unwrap_or_default()
                ));
                self.session_ha1 = Some(ha1.clone());
                Ok(ha1)
            }
            Some(other) => Err(HttpError::UnsupportedAuth {
                algorithm: other.to_string(),
            }),
        }
    }

    fn response_digest(
        &mut self,
        method: &str,
        uri: &str,
        credentials: &Credentials,
        qop: Option<&str>,
        nc: &str,
        cnonce: Option<&str>,
    ) -> Result<String, HttpError> {
        let ha1 = self.h_a1(credentials, cnonce)?;

        // GET carries no entity body, so auth-int hashes the empty string
        let ha2 = if qop == Some("auth-int") {
            md5_hex(&format!("{method}:{uri}:{}", md5_hex("")))
        } else {
            md5_hex(&format!("{method}:{uri}"))
        };

        Ok(match qop {
            Some(qop) => md5_hex(&format!(
                "{ha1}:{}:{nc}:{}:{qop}:{ha2}",
                self.nonce,
                cnonce.unwrap_or_default()
            )),
            None => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        })
    }

    /// Check the server's `Authentication-Info` response digest
    ///
    /// `rspauth` is the digest of the response with an empty method; the
    /// nonce count and cnonce must match the ones we just sent. A
    /// `nextnonce` parameter replaces our nonce for the next request.
    ///
    /// # Errors
    ///
    /// Returns `ResponseAuthMismatch` when rspauth does not match our own
    /// computation; this is fatal, not ignorable.
    pub fn verify_authentication_info(
        &mut self,
        header: &str,
        uri: &str,
        credentials: &Credentials,
    ) -> Result<(), HttpError> {
        let mut rspauth = None;
        let mut nextnonce = None;
        let mut qop = None;
        let mut nc = None;
        for (key, value) in AuthParams::new(header) {
            if key.eq_ignore_ascii_case("rspauth") {
                rspauth = Some(value);
            } else if key.eq_ignore_ascii_case("nextnonce") {
                nextnonce = Some(value);
            } else if key.eq_ignore_ascii_case("qop") {
                qop = Some(value);
            } else if key.eq_ignore_ascii_case("nc") {
                nc = Some(value);
            }
        }

        if let Some(rspauth) = rspauth {
            let nc = nc.unwrap_or_else(|| format!("{:08x}", self.nonce_count));
            let cnonce = self.client_nonce.clone();
            let expected = self.response_digest(
                "",
                uri,
                credentials,
                qop.as_deref(),
                &nc,
                cnonce.as_deref(),
            )?;
            if expected != rspauth {
                tracing::warn!("Authentication-Info rspauth mismatch");
                return Err(HttpError::ResponseAuthMismatch);
            }
        }

        if let Some(nonce) = nextnonce {
            self.set_nonce(nonce);
        }
        Ok(())
    }
}

/// Build a `Basic` authorization value
#[must_use]
pub fn basic_authorization(credentials: &Credentials) -> String {
    let pair = format!("{}:{}", credentials.user, credentials.password);
    format!("Basic {}", BASE64.encode(pair.as_bytes()))
}

/// Iterator over `key="value"` / `key=token` pairs in a challenge
struct AuthParams<'a> {
    rest: &'a str,
}

impl<'a> AuthParams<'a> {
    fn new(params: &'a str) -> Self {
        Self { rest: params }
    }
}

impl Iterator for AuthParams<'_> {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest.trim_start_matches([' ', '\t', ',']);
        if rest.is_empty() {
            self.rest = rest;
            return None;
        }

        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_string();
        let after = &rest[eq + 1..];

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
                None => (quoted.to_string(), ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim().to_string(), &after[end..]),
                None => (after.trim().to_string(), ""),
            }
        };

        self.rest = remaining;
        Some((key, value))
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
