//! Minimal URL splitting for stream targets
//!
//! Parsing never fails outright; malformed input leaves the host empty
//! and callers treat an empty host as fatal.

/// Parsed URL pieces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Url {
    /// Scheme, lowercased ("http", "https", ...)
    pub scheme: String,
    /// User name from the authority, percent-decoding not applied
    pub user: Option<String>,
    /// Password from the authority
    pub password: Option<String>,
    /// Host; empty when the input was unparseable
    pub host: String,
    /// Port, 0 when unspecified
    pub port: u16,
    /// Path plus query, always starting with `/` when non-empty
    pub path: String,
}

impl Url {
    /// Split a raw URL into its components
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut url = Self::default();

        let rest = match raw.split_once("://") {
            Some((scheme, rest)) => {
                url.scheme = scheme.to_ascii_lowercase();
                rest
            }
            None => raw,
        };

        let (authority, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };
        url.path = path.to_string();

        let hostport = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => {
                match userinfo.split_once(':') {
                    Some((user, password)) => {
                        url.user = Some(user.to_string());
                        url.password = Some(password.to_string());
                    }
                    None => url.user = Some(userinfo.to_string()),
                }
                hostport
            }
            None => authority,
        };

        // Bracketed IPv6 literal, else host[:port]
        if let Some(stripped) = hostport.strip_prefix('[') {
            match stripped.split_once(']') {
                Some((host, rest)) => {
                    url.host = host.to_string();
                    if let Some(port) = rest.strip_prefix(':') {
                        url.port = port.parse().unwrap_or(0);
                    }
                }
                None => return Self::default(),
            }
        } else {
            match hostport.rsplit_once(':') {
                Some((host, port)) => {
                    url.host = host.to_string();
                    url.port = port.parse().unwrap_or(0);
                }
                None => url.host = hostport.to_string(),
            }
        }

        url
    }

    /// Port with the scheme default applied
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        if self.port != 0 {
            return self.port;
        }
        if self.scheme == "https" { 443 } else { 80 }
    }

    /// Path, with `/` substituted when empty
    #[must_use]
    pub fn path_or_root(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }

    /// True when the scheme requires TLS
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }
}
