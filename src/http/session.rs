//! HTTP(S) progressive-streaming session
//!
//! The session is a synchronous-looking state machine from its caller's
//! point of view: `open` resolves redirects and authentication, `read`
//! hands out body bytes with chunked/ICY/length accounting, `seek`
//! reopens at a byte offset. Transient network failure degrades to EOF
//! through bounded one-shot recoveries, never unbounded retries.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::HttpError;
use crate::net::Connection;
use crate::types::{Credentials, HttpConfig};

use super::auth::{AuthChallenge, AuthScheme, ClientNonceSource, RandomNonce, basic_authorization};
use super::cookies::CookieJar;
use super::inflate::{INPUT_CHUNK, Inflate};
use super::url::Url;

/// Metadata events emitted while streaming
#[derive(Debug, Clone)]
pub enum HttpEvent {
    /// ICY `StreamTitle` changed
    TitleChanged(String),
    /// `Icy-Name` changed
    NameChanged(String),
    /// `Icy-Genre` changed
    GenreChanged(String),
}

/// Protocol spoken by the server, from the status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Regular `HTTP/1.x` responses
    Http,
    /// Shoutcast-style `ICY` responses
    Icy,
}

/// Transfer accounting for the current response body
///
/// Exactly one mode governs how much more may be read before a new
/// request or EOF; orthogonal policies (reconnect, continuous, pacing)
/// live next to it as plain flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferMode {
    /// `Transfer-Encoding: chunked`
    Chunked {
        /// Bytes left in the current chunk
        remaining: u64,
        /// The zero-length terminator chunk was seen
        done: bool,
    },
    /// `Content-Length` (or `Content-Range` span) known
    ContentLength {
        /// Bytes left in this response body
        remaining: u64,
    },
    /// Length unknown; read until the peer closes
    Unbounded,
}

enum ReadOutcome {
    Data(usize),
    Eof,
    /// The connection died mid-body
    Dead,
    /// Continuous mode exhausted one body; a new request is due
    NeedRequest,
}

/// One logical HTTP(S) input stream
pub struct HttpStream {
    config: HttpConfig,
    nonces: Arc<dyn ClientNonceSource>,

    url: Url,
    proxy: Option<Url>,
    credentials: Option<Credentials>,
    proxy_credentials: Option<Credentials>,

    conn: Option<Connection>,
    version: u8,

    protocol: Protocol,
    status: u16,
    mime: Option<String>,
    pragma: Option<String>,
    location: Option<String>,

    mode: TransferMode,
    persistent: bool,
    icy_meta_interval: u64,
    icy_name: Option<String>,
    icy_genre: Option<String>,
    icy_title: Option<String>,
    inflate: Option<Inflate>,

    seekable: bool,
    reconnect: bool,
    continuous: bool,
    pace_control: bool,
    icecast: bool,
    mms: bool,

    position: u64,
    size: Option<u64>,
    eof: bool,

    auth: Option<AuthChallenge>,
    proxy_auth: Option<AuthChallenge>,
    auth_info: Option<String>,
    proxy_auth_info: Option<String>,

    cookies: CookieJar,
    events: broadcast::Sender<HttpEvent>,
}

impl HttpStream {
    /// Open a stream, following redirects and handling authentication
    ///
    /// # Errors
    ///
    /// Returns `InvalidHost` for unparseable URLs, `AuthRequired` when a
    /// 401 arrives and no credentials are configured, `InsecureRedirect`
    /// / `RedirectExceeded` for bad redirect chains, `MmsUnsupported`
    /// for MMS-over-HTTP servers, and connection-level errors otherwise.
    pub async fn open(raw_url: &str, config: HttpConfig) -> Result<Self, HttpError> {
        Self::open_with_nonces(raw_url, config, Arc::new(RandomNonce)).await
    }

    /// `open` with an explicit client-nonce source (tests pin it)
    ///
    /// # Errors
    ///
    /// See [`HttpStream::open`].
    pub async fn open_with_nonces(
        raw_url: &str,
        config: HttpConfig,
        nonces: Arc<dyn ClientNonceSource>,
    ) -> Result<Self, HttpError> {
        let mut target = raw_url.replace(' ', "+");
        let mut cookies = CookieJar::new();

        // Redirects restart the whole open sequence under an explicit
        // hop budget.
        for hop in 0..=config.max_redirects {
            let mut stream = Self::for_target(&target, &config, Arc::clone(&nonces))?;
            stream.cookies = std::mem::take(&mut cookies);

            stream.open_once().await?;

            if Self::is_redirect(stream.status) {
                if let Some(location) = stream.location.clone() {
                    tracing::debug!("redirection to {location}");
                    if !location.starts_with("http://") && !location.starts_with("https://") {
                        stream.disconnect();
                        return Err(HttpError::InsecureRedirect { location });
                    }
                    // Cookies carry over; auth challenges and the
                    // connection do not.
                    if config.forward_cookies {
                        cookies = std::mem::take(&mut stream.cookies);
                    }
                    stream.disconnect();
                    target = location;
                    continue;
                }
            }

            if stream.mms {
                stream.disconnect();
                return Err(HttpError::MmsUnsupported);
            }

            let _ = hop;
            return Ok(stream);
        }

        Err(HttpError::RedirectExceeded {
            hops: config.max_redirects,
        })
    }

    fn for_target(
        target: &str,
        config: &HttpConfig,
        nonces: Arc<dyn ClientNonceSource>,
    ) -> Result<Self, HttpError> {
        let url = Url::parse(target);
        if url.host.is_empty() {
            return Err(HttpError::InvalidHost {
                url: target.to_string(),
            });
        }

        let proxy = match &config.proxy {
            Some(raw) => Some(raw.clone()),
            None => std::env::var("http_proxy").ok().filter(|v| !v.is_empty()),
        };
        let proxy = match proxy {
            Some(raw) => {
                let parsed = Url::parse(&raw);
                if parsed.host.is_empty() {
                    return Err(HttpError::InvalidProxy { proxy: raw });
                }
                Some(parsed)
            }
            None => None,
        };

        let credentials = config.credentials.clone().or_else(|| {
            url.user
                .as_ref()
                .map(|user| Credentials::new(user.clone(), url.password.clone().unwrap_or_default()))
        });
        let proxy_credentials = config.proxy_credentials.clone().or_else(|| {
            proxy.as_ref().and_then(|p| {
                p.user
                    .as_ref()
                    .map(|user| Credentials::new(user.clone(), p.password.clone().unwrap_or_default()))
            })
        });

        tracing::debug!(
            "http: server='{}' port={} file='{}'",
            url.host,
            url.port_or_default(),
            url.path_or_root()
        );
        if let Some(p) = &proxy {
            tracing::debug!("      proxy {}:{}", p.host, p.port_or_default());
        }

        let (events, _) = broadcast::channel(16);
        Ok(Self {
            reconnect: config.reconnect,
            continuous: config.continuous,
            config: config.clone(),
            nonces,
            url,
            proxy,
            credentials,
            proxy_credentials,
            conn: None,
            version: 1,
            protocol: Protocol::Http,
            status: 0,
            mime: None,
            pragma: None,
            location: None,
            mode: TransferMode::Unbounded,
            persistent: false,
            icy_meta_interval: 0,
            icy_name: None,
            icy_genre: None,
            icy_title: None,
            inflate: None,
            seekable: true,
            pace_control: true,
            icecast: false,
            mms: false,
            position: 0,
            size: None,
            eof: false,
            auth: None,
            proxy_auth: None,
            auth_info: None,
            proxy_auth_info: None,
            cookies: CookieJar::new(),
            events,
        })
    }

    /// One connect+request cycle at offset 0, with the HTTP/1.0 downgrade
    /// retry and the single authenticated 401 retry
    async fn open_once(&mut self) -> Result<(), HttpError> {
        if let Err(e) = self.connect(0).await {
            tracing::debug!("switching to HTTP version 1.0 ({e})");
            self.version = 0;
            self.seekable = false;
            self.connect(0).await?;
        }

        if self.status == 401 {
            let origin = self.url.host.clone();
            if self.credentials.is_none() || self.auth.is_none() {
                self.disconnect();
                return Err(HttpError::AuthRequired { origin });
            }
            tracing::debug!("retrying with authentication");
            self.disconnect();
            self.connect(0).await?;
            if self.status == 401 {
                self.disconnect();
                return Err(HttpError::AuthRequired { origin });
            }
        }
        Ok(())
    }

    fn is_redirect(status: u16) -> bool {
        matches!(status, 301 | 302 | 303 | 307)
    }

    /// Close and re-open the transport, then issue a request at `offset`
    async fn connect(&mut self, offset: u64) -> Result<(), HttpError> {
        debug_assert!(self.conn.is_none(), "connect over a live connection");

        self.location = None;
        self.mime = None;
        self.pragma = None;
        self.mms = false;
        self.mode = TransferMode::Unbounded;
        self.icy_meta_interval = 0;
        self.icy_name = None;
        self.icy_genre = None;
        self.icy_title = None;
        self.inflate = None;
        self.size = None;
        self.position = offset;
        self.eof = false;

        let (host, port) = match &self.proxy {
            Some(p) => (p.host.clone(), p.port_or_default()),
            None => (self.url.host.clone(), self.url.port_or_default()),
        };

        let mut conn = Connection::open(&host, port).await?;

        if self.url.is_tls() {
            if self.proxy.is_some() {
                if self.version == 0 {
                    // CONNECT does not exist in HTTP/1.0
                    return Err(HttpError::Tls {
                        host: self.url.host.clone(),
                        message: "cannot tunnel TLS over HTTP/1.0 proxy".to_string(),
                    });
                }
                conn.tunnel(&self.url.host, self.url.port_or_default(), self.version)
                    .await?;
            }
            conn = conn.upgrade_tls(&self.url.host).await?;
        }

        self.conn = Some(conn);
        match self.request(offset).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Send one GET and parse the response status line and headers
    async fn request(&mut self, offset: u64) -> Result<(), HttpError> {
        let mut request = String::with_capacity(512);

        let origin_port = self.url.port_or_default();
        if self.proxy.is_some() && !self.url.is_tls() {
            // Through-proxy requests use the absolute-URI form
            request.push_str(&format!(
                "GET http://{}:{}{} HTTP/1.{}\r\n",
                self.url.host,
                origin_port,
                self.url.path_or_root(),
                self.version
            ));
        } else {
            let default_port = if self.url.is_tls() { 443 } else { 80 };
            request.push_str(&format!(
                "GET {} HTTP/1.{}\r\n",
                self.url.path_or_root(),
                self.version
            ));
            if origin_port == default_port {
                request.push_str(&format!("Host: {}\r\n", self.url.host));
            } else {
                request.push_str(&format!("Host: {}:{origin_port}\r\n", self.url.host));
            }
        }

        request.push_str(&format!("User-Agent: {}\r\n", self.config.user_agent));

        // The Range header doubles as our statement of intent to reuse
        // the connection for further ranged requests.
        if self.version == 1 && !self.continuous {
            request.push_str(&format!("Range: bytes={offset}-\r\n"));
            self.persistent = true;
        }

        for cookie in self.cookies.matching(&self.url.host) {
            tracing::debug!("sending Cookie: {cookie}");
            request.push_str(&format!("Cookie: {cookie}\r\n"));
        }

        if let Some(credentials) = self.credentials.clone() {
            let uri = self.url.path_or_root().to_string();
            let value = match &mut self.auth {
                Some(challenge) => {
                    challenge.authorization("GET", &uri, &credentials, self.nonces.as_ref())?
                }
                None => basic_authorization(&credentials),
            };
            request.push_str(&format!("Authorization: {value}\r\n"));
        }

        if self.proxy.is_some()
            && let Some(credentials) = self.proxy_credentials.clone()
        {
            let uri = self.url.path_or_root().to_string();
            let value = match &mut self.proxy_auth {
                Some(challenge) => {
                    challenge.authorization("GET", &uri, &credentials, self.nonces.as_ref())?
                }
                None => basic_authorization(&credentials),
            };
            request.push_str(&format!("Proxy-Authorization: {value}\r\n"));
        }

        // Ask shoutcast-style servers to interleave metadata
        request.push_str("Icy-MetaData: 1\r\n");

        if self.continuous {
            request.push_str("Connection: Keep-Alive\r\n");
        } else if self.version == 1 {
            request.push_str("Connection: Close\r\n");
        }
        request.push_str("\r\n");

        let conn = self.conn.as_mut().ok_or_else(connection_gone)?;
        conn.write_all(request.as_bytes()).await?;

        self.read_status_line().await?;
        self.read_headers(offset).await?;
        self.verify_auth_info()?;

        if self.status >= 400 && self.status != 401 && !Self::is_redirect(self.status) {
            return Err(HttpError::Status { code: self.status });
        }
        Ok(())
    }

    async fn read_status_line(&mut self) -> Result<(), HttpError> {
        let conn = self.conn.as_mut().ok_or_else(connection_gone)?;
        let line = conn
            .read_line()
            .await?
            .ok_or_else(|| HttpError::MalformedResponse {
                message: "failed to read answer".to_string(),
            })?;

        if let Some(rest) = line.strip_prefix("HTTP/1.") {
            self.protocol = Protocol::Http;
            self.status = parse_status_code(rest.get(2..).unwrap_or_default());
        } else if let Some(rest) = line.strip_prefix("ICY") {
            self.protocol = Protocol::Icy;
            self.status = parse_status_code(rest.trim_start());
            // ICY streams cannot seek and die without warning
            self.reconnect = true;
            self.seekable = false;
        } else {
            return Err(HttpError::MalformedResponse {
                message: format!("invalid HTTP reply '{line}'"),
            });
        }

        tracing::debug!(
            "protocol '{}' answer code {}",
            match self.protocol {
                Protocol::Http => "HTTP",
                Protocol::Icy => "ICY",
            },
            self.status
        );

        if self.status != 206 && self.status != 401 {
            self.seekable = false;
        }
        Ok(())
    }

    async fn read_headers(&mut self, offset: u64) -> Result<(), HttpError> {
        loop {
            let conn = self.conn.as_mut().ok_or_else(connection_gone)?;
            let line = conn
                .read_line()
                .await?
                .ok_or_else(|| HttpError::MalformedResponse {
                    message: "connection closed in headers".to_string(),
                })?;
            if line.is_empty() {
                return Ok(());
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(HttpError::MalformedResponse {
                    message: format!("malformed header line: {line}"),
                });
            };
            let name = name.trim();
            let value = value.trim();
            self.handle_header(name, value, offset);
        }
    }

    #[allow(clippy::too_many_lines)]
    fn handle_header(&mut self, name: &str, value: &str, offset: u64) {
        if name.eq_ignore_ascii_case("Content-Length") {
            let length: u64 = value.parse().unwrap_or(0);
            if self.continuous {
                tracing::debug!("this frame size={length}");
                self.size = None;
            } else {
                let total = offset + length;
                if self.size.is_none_or(|s| total > s) {
                    self.size = Some(total);
                }
                tracing::debug!("stream size={total}");
            }
            if !matches!(self.mode, TransferMode::Chunked { .. }) {
                self.mode = TransferMode::ContentLength { remaining: length };
            }
        } else if name.eq_ignore_ascii_case("Content-Range") {
            if let Some((start, remaining, total)) = parse_content_range(value) {
                self.position = start;
                if !matches!(self.mode, TransferMode::Chunked { .. }) {
                    self.mode = TransferMode::ContentLength { remaining };
                }
                if let Some(total) = total
                    && self.size.is_none_or(|s| total > s)
                {
                    self.size = Some(total);
                }
            }
        } else if name.eq_ignore_ascii_case("Connection") {
            if value.eq_ignore_ascii_case("close") {
                self.persistent = false;
            }
        } else if name.eq_ignore_ascii_case("Location") {
            self.location = Some(self.resolve_location(value));
        } else if name.eq_ignore_ascii_case("Content-Type") {
            self.mime = Some(value.to_string());
            tracing::debug!("Content-Type: {value}");
        } else if name.eq_ignore_ascii_case("Content-Encoding") {
            tracing::debug!("Content-Encoding: {value}");
            self.inflate = Inflate::for_encoding(value);
        } else if name.eq_ignore_ascii_case("Pragma") {
            if value.to_ascii_lowercase().starts_with("features") {
                // MMS-over-HTTP masquerading as plain HTTP
                self.mms = true;
            }
            self.pragma = Some(value.to_string());
            tracing::debug!("Pragma: {value}");
        } else if name.eq_ignore_ascii_case("Server") {
            tracing::debug!("Server: {value}");
            let lower = value.to_ascii_lowercase();
            if lower.starts_with("icecast") || lower.starts_with("nanocaster") {
                // Icecast (and live365's nanocaster, which looks the
                // same on the wire): force reconnect, disable pacing
                self.icecast = true;
                self.reconnect = true;
                self.pace_control = false;
            }
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            tracing::debug!("Transfer-Encoding: {value}");
            if value.to_ascii_lowercase().starts_with("chunked") {
                self.mode = TransferMode::Chunked {
                    remaining: 0,
                    done: false,
                };
            }
        } else if name.eq_ignore_ascii_case("Icy-MetaInt") {
            tracing::debug!("Icy-MetaInt: {value}");
            self.icy_meta_interval = value.parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("Icy-Name") {
            let normalized = normalize_utf8(value);
            if self.icy_name.as_deref() != Some(normalized.as_str()) {
                self.icy_name = Some(normalized.clone());
                let _ = self.events.send(HttpEvent::NameChanged(normalized));
            }
            self.icecast = true;
            self.reconnect = true;
            self.pace_control = false;
        } else if name.eq_ignore_ascii_case("Icy-Genre") {
            let normalized = normalize_utf8(value);
            if self.icy_genre.as_deref() != Some(normalized.as_str()) {
                self.icy_genre = Some(normalized.clone());
                let _ = self.events.send(HttpEvent::GenreChanged(normalized));
            }
        } else if name.eq_ignore_ascii_case("Set-Cookie") {
            if self.config.forward_cookies {
                tracing::debug!("storing cookie {value}");
                self.cookies.store(value);
            }
        } else if name.eq_ignore_ascii_case("WWW-Authenticate") {
            if let Some(challenge) = AuthChallenge::parse(value) {
                // A digest challenge outranks a basic one
                let keep_existing = matches!(
                    (&self.auth, challenge.scheme),
                    (Some(existing), AuthScheme::Basic) if existing.scheme == AuthScheme::Digest
                );
                if !keep_existing {
                    self.auth = Some(challenge);
                }
            }
        } else if name.eq_ignore_ascii_case("Proxy-Authenticate") {
            if let Some(challenge) = AuthChallenge::parse(value) {
                self.proxy_auth = Some(challenge);
            }
        } else if name.eq_ignore_ascii_case("Authentication-Info") {
            self.auth_info = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Proxy-Authentication-Info") {
            self.proxy_auth_info = Some(value.to_string());
        } else if name.to_ascii_lowercase().starts_with("icy-")
            || name.to_ascii_lowercase().starts_with("ice-")
            || name.to_ascii_lowercase().starts_with("x-audiocast")
        {
            tracing::debug!("Meta-Info: {name}: {value}");
        }
    }

    /// Check the server's response-auth digests gathered during header
    /// parsing; a mismatch is fatal
    fn verify_auth_info(&mut self) -> Result<(), HttpError> {
        let uri = self.url.path_or_root().to_string();
        if let Some(info) = self.auth_info.take()
            && let (Some(challenge), Some(credentials)) = (&mut self.auth, &self.credentials)
        {
            challenge.verify_authentication_info(&info, &uri, credentials)?;
        }
        if let Some(info) = self.proxy_auth_info.take()
            && let (Some(challenge), Some(credentials)) =
                (&mut self.proxy_auth, &self.proxy_credentials)
        {
            challenge.verify_authentication_info(&info, &uri, credentials)?;
        }
        Ok(())
    }

    fn resolve_location(&self, value: &str) -> String {
        if value.contains("://") {
            return value.to_string();
        }
        let slash = if value.starts_with('/') { "" } else { "/" };
        format!(
            "{}://{}:{}{slash}{value}",
            self.url.scheme,
            self.url.host,
            self.url.port_or_default()
        )
    }

    /// Read up to `buf.len()` bytes of body; `Ok(0)` is EOF
    ///
    /// # Errors
    ///
    /// Returns `ContentDecoding` for corrupt compressed bodies, and I/O
    /// errors that survive the one-shot recovery policies.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let Some(mut filter) = self.inflate.take() else {
            return self.read_raw(buf).await;
        };

        let result = loop {
            let n = filter.pop(buf);
            if n > 0 {
                break Ok(n);
            }
            if filter.is_drained() {
                break Ok(0);
            }
            let mut raw = vec![0u8; INPUT_CHUNK];
            match self.read_raw(&mut raw).await {
                Ok(0) => {
                    if let Err(e) = filter.finish() {
                        break Err(e);
                    }
                }
                Ok(n) => {
                    if let Err(e) = filter.push(&raw[..n]) {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };
        self.inflate = Some(filter);
        result
    }

    async fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        let mut recovered = false;
        let mut requested = false;
        loop {
            match self.read_once(buf).await? {
                ReadOutcome::Data(n) => return Ok(n),
                ReadOutcome::Eof => return Ok(0),
                ReadOutcome::NeedRequest => {
                    // Continuous resources hand out one body per request;
                    // ask for the next one. A second empty body in a row
                    // means the stream is really over.
                    if requested {
                        self.eof = true;
                        return Ok(0);
                    }
                    requested = true;
                    if self.request(0).await.is_err() {
                        self.disconnect();
                        self.eof = true;
                        return Ok(0);
                    }
                }
                ReadOutcome::Dead => {
                    if recovered {
                        self.disconnect();
                        self.eof = true;
                        return Ok(0);
                    }
                    recovered = true;

                    // Continuous and reconnect are mutually exclusive
                    // recovery policies; each is a one-shot.
                    if self.continuous {
                        if self.request(0).await.is_err() {
                            self.disconnect();
                            self.eof = true;
                            return Ok(0);
                        }
                    } else {
                        self.disconnect();
                        if self.reconnect {
                            tracing::debug!("got disconnected, trying to reconnect");
                            if self.connect(self.position).await.is_err() {
                                tracing::debug!("reconnection failed");
                                self.eof = true;
                                return Ok(0);
                            }
                        } else {
                            self.eof = true;
                            return Ok(0);
                        }
                    }
                }
            }
        }
    }

    async fn read_once(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, HttpError> {
        if self.conn.is_none() {
            self.eof = true;
            return Ok(ReadOutcome::Eof);
        }
        if self.eof || buf.is_empty() {
            return Ok(ReadOutcome::Eof);
        }

        let mut len = buf.len() as u64;

        // (a) total size known: never read past it
        if let Some(size) = self.size {
            if self.position >= size {
                self.eof = true;
                return Ok(ReadOutcome::Eof);
            }
            len = len.min(size - self.position);
        }

        // (b) chunked: stay inside the current chunk
        if let TransferMode::Chunked { remaining, done } = self.mode {
            if done {
                self.eof = true;
                return Ok(ReadOutcome::Eof);
            }
            if remaining == 0 {
                match self.read_chunk_size().await? {
                    0 => {
                        self.mode = TransferMode::Chunked {
                            remaining: 0,
                            done: true,
                        };
                        self.eof = true;
                        return Ok(ReadOutcome::Eof);
                    }
                    n => {
                        self.mode = TransferMode::Chunked {
                            remaining: n,
                            done: false,
                        };
                        len = len.min(n);
                    }
                }
            } else {
                len = len.min(remaining);
            }
        }

        // (c) bounded body: only ask for what this response still owes
        if let TransferMode::ContentLength { remaining } = self.mode {
            if self.continuous && remaining == 0 {
                return Ok(ReadOutcome::NeedRequest);
            }
            if remaining > 0 {
                len = len.min(remaining);
            }
        }

        // (d) ICY: stop at the next metadata boundary
        if self.icy_meta_interval > 0 {
            let next = self.icy_meta_interval - self.position % self.icy_meta_interval;
            if next == self.icy_meta_interval
                && self.position > 0
                && self.read_icy_meta().await.is_err()
            {
                // A broken metadata block means the stream is gone
                self.eof = true;
                return Ok(ReadOutcome::Eof);
            }
            len = len.min(next);
        }

        let len = usize::try_from(len).unwrap_or(usize::MAX).min(buf.len());
        let conn = self.conn.as_mut().ok_or_else(connection_gone)?;
        let n = conn.read(&mut buf[..len]).await?;

        if n == 0 {
            return Ok(ReadOutcome::Dead);
        }

        self.position += n as u64;
        match &mut self.mode {
            TransferMode::Chunked { remaining, .. } => {
                *remaining -= n as u64;
                if *remaining == 0 {
                    // Swallow the CRLF trailing the chunk payload
                    let conn = self.conn.as_mut().ok_or_else(connection_gone)?;
                    let _ = conn.read_line().await;
                }
            }
            TransferMode::ContentLength { remaining } => {
                *remaining = remaining.saturating_sub(n as u64);
            }
            TransferMode::Unbounded => {}
        }
        Ok(ReadOutcome::Data(n))
    }

    async fn read_chunk_size(&mut self) -> Result<u64, HttpError> {
        let conn = self.conn.as_mut().ok_or_else(connection_gone)?;
        let line = conn
            .read_line()
            .await?
            .ok_or_else(|| HttpError::MalformedResponse {
                message: "failed reading chunk-header line".to_string(),
            })?;
        let digits = line
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        u64::from_str_radix(digits, 16).map_err(|_| HttpError::MalformedResponse {
            message: format!("bad chunk size '{line}'"),
        })
    }

    /// Read and parse one ICY metadata block at the boundary
    async fn read_icy_meta(&mut self) -> Result<(), HttpError> {
        let conn = self.conn.as_mut().ok_or_else(connection_gone)?;

        let mut length = [0u8; 1];
        conn.read_exact(&mut length).await?;
        if length[0] == 0 {
            return Ok(());
        }

        let mut block = vec![0u8; usize::from(length[0]) * 16];
        conn.read_exact(&mut block).await?;
        let meta = String::from_utf8_lossy(&block);

        if let Some(title) = extract_stream_title(&meta) {
            let title = title.trim_end_matches('\0').to_string();
            if self.icy_title.as_deref() != Some(title.as_str()) {
                tracing::debug!("New Title={title}");
                self.icy_title = Some(title.clone());
                let _ = self.events.send(HttpEvent::TitleChanged(title));
            }
        }
        Ok(())
    }

    /// Seek to an absolute byte position by reconnecting with a Range
    ///
    /// Seeking at or past the known size probes the true end instead:
    /// reopen at `size - 1` and burn one byte so the next read reports
    /// EOF only if the size was right.
    ///
    /// # Errors
    ///
    /// Returns the reconnect failure; the stream is then at EOF.
    pub async fn seek(&mut self, position: u64) -> Result<(), HttpError> {
        tracing::debug!("trying to seek to {position}");

        if let Some(size) = self.size
            && position >= size
            && size > 0
        {
            Box::pin(self.seek(size - 1)).await?;
            self.eof = false;
            let mut probe = [0u8; 1];
            let _ = self.read(&mut probe).await?;
            return Ok(());
        }

        self.disconnect();
        if let Err(e) = self.connect(position).await {
            tracing::warn!("seek failed");
            self.eof = true;
            return Err(e);
        }
        Ok(())
    }

    /// Drop the transport; the next read reports EOF unless a policy
    /// reconnects first
    pub fn disconnect(&mut self) {
        self.conn = None;
    }

    /// Subscribe to metadata change events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HttpEvent> {
        self.events.subscribe()
    }

    /// Current logical byte position
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total size when the server stated one
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// True once the logical end of the stream was reached
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether byte-range seeking is available
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Whether the caller should pace its reads (false for shoutcast
    /// servers that burst their prebuffer)
    #[must_use]
    pub fn pace_control(&self) -> bool {
        self.pace_control
    }

    /// MIME type from `Content-Type`
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Station name from `Icy-Name`
    #[must_use]
    pub fn icy_name(&self) -> Option<&str> {
        self.icy_name.as_deref()
    }

    /// Genre from `Icy-Genre`
    #[must_use]
    pub fn icy_genre(&self) -> Option<&str> {
        self.icy_genre.as_deref()
    }

    /// Latest `StreamTitle` from the metadata interleave
    #[must_use]
    pub fn icy_title(&self) -> Option<&str> {
        self.icy_title.as_deref()
    }

    /// Response status code of the last request
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Protocol the server answered with
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Caching delay the caller should apply
    #[must_use]
    pub fn caching(&self) -> std::time::Duration {
        self.config.caching
    }
}

fn connection_gone() -> HttpError {
    HttpError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "not connected",
    ))
}

fn parse_status_code(rest: &str) -> u16 {
    rest.trim_start()
        .split(' ')
        .next()
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

/// Parse `bytes start-end/total`, tolerating `*` for the total
fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, end.checked_sub(start)? + 1, total))
}

/// Pull the `StreamTitle` value out of an ICY metadata block
///
/// Quoted values end at `<quote>;`, falling back to the first `;`;
/// unquoted values end at the first `;`.
fn extract_stream_title(meta: &str) -> Option<&str> {
    let lower = meta.to_ascii_lowercase();
    let at = lower.find("streamtitle=")?;
    let value = &meta[at + "StreamTitle=".len()..];

    let mut chars = value.chars();
    match chars.next() {
        Some(quote @ ('\'' | '"')) => {
            let inner = &value[quote.len_utf8()..];
            let closing = format!("{quote};");
            match inner.find(&closing) {
                Some(end) => Some(&inner[..end]),
                None => match inner.find(';') {
                    Some(end) => Some(&inner[..end]),
                    None => Some(inner),
                },
            }
        }
        Some(_) => match value.find(';') {
            Some(end) => Some(&value[..end]),
            None => Some(value),
        },
        None => None,
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 100-199/1000"),
            Some((100, 100, Some(1000)))
        );
        assert_eq!(parse_content_range("bytes 0-99/*"), Some((0, 100, None)));
        assert_eq!(parse_content_range("items 0-99/100"), None);
    }

    #[test]
    fn test_extract_stream_title() {
        assert_eq!(
            extract_stream_title("StreamTitle='Song Name';StreamUrl='';"),
            Some("Song Name")
        );
        // Apostrophe inside a quoted title: terminator is quote+semicolon
        assert_eq!(
            extract_stream_title("StreamTitle='It's A Song';"),
            Some("It's A Song")
        );
        assert_eq!(extract_stream_title("StreamTitle=plain;"), Some("plain"));
        assert_eq!(extract_stream_title("OtherKey='x';"), None);
    }

    #[test]
    fn test_parse_status_code() {
        assert_eq!(parse_status_code("200 OK"), 200);
        assert_eq!(parse_status_code(" 404 Not Found"), 404);
        assert_eq!(parse_status_code("garbage"), 0);
    }
}

fn normalize_utf8(value: &str) -> String {
    // Header values arrive as an opaque byte soup in practice; the lossy
    // pass guarantees valid UTF-8 downstream.
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
