//! Cookie jar threaded through an open/redirect chain

/// One stored cookie, kept close to its raw `Set-Cookie` form
#[derive(Debug, Clone)]
struct Cookie {
    name: String,
    value: String,
    /// Optional `domain=` attribute, lowercased
    domain: Option<String>,
}

/// Insertion-ordered cookie storage
///
/// At most one cookie is kept per (name, domain) pair; storing a
/// duplicate replaces the earlier value in place.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    /// Create an empty jar
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored cookies
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// True when nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Store a cookie from a raw `Set-Cookie` value
    ///
    /// Only the `NAME=VALUE` pair and the `domain` attribute are kept;
    /// a value without a parseable name is rejected.
    pub fn store(&mut self, raw: &str) {
        let mut parts = raw.split(';').map(str::trim);
        let Some(pair) = parts.next() else { return };
        let Some((name, value)) = pair.split_once('=') else {
            tracing::debug!("rejecting nameless cookie: {raw}");
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            tracing::debug!("rejecting nameless cookie: {raw}");
            return;
        }

        let mut domain = None;
        for attr in parts {
            if let Some((key, val)) = attr.split_once('=')
                && key.trim().eq_ignore_ascii_case("domain")
            {
                domain = Some(val.trim().to_ascii_lowercase());
            }
        }

        let cookie = Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain,
        };

        if let Some(existing) = self
            .cookies
            .iter_mut()
            .find(|c| c.name == cookie.name && c.domain == cookie.domain)
        {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    /// Cookies applicable to `host`, as `NAME=VALUE` strings in insertion
    /// order
    ///
    /// Domain matching is a plain substring test against the host,
    /// looser than RFC 6265 suffix matching.
    #[must_use]
    pub fn matching(&self, host: &str) -> Vec<String> {
        let host = host.to_ascii_lowercase();
        self.cookies
            .iter()
            .filter(|c| match &c.domain {
                Some(domain) => host.contains(domain.as_str()),
                None => true,
            })
            .map(|c| format!("{}={}", c.name, c.value))
            .collect()
    }
}
