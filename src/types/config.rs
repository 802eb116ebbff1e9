use std::time::Duration;

/// Username/password pair for HTTP or proxy authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub user: String,
    /// Password (may be empty)
    pub password: String,
}

impl Credentials {
    /// Create a credentials pair
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// Configuration for HTTP stream access behavior
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Explicit proxy URL; when `None` the `http_proxy` environment
    /// variable is consulted
    pub proxy: Option<String>,

    /// Credentials for the proxy, if it requires them
    pub proxy_credentials: Option<Credentials>,

    /// Credentials for the origin server; overrides any user info
    /// embedded in the URL
    pub credentials: Option<Credentials>,

    /// User agent sent with every request
    pub user_agent: String,

    /// Automatically reconnect at the current position after a sudden
    /// disconnect (default: false; forced on for ICY streams)
    pub reconnect: bool,

    /// Treat the target as a continuously rewritten resource and re-issue
    /// the request whenever one response body is exhausted (default: false)
    pub continuous: bool,

    /// Forward cookies across redirects (default: true)
    pub forward_cookies: bool,

    /// Caching/prebuffer delay advertised to the caller (default: 1200 ms)
    pub caching: Duration,

    /// Maximum redirect hops before giving up (default: 5)
    pub max_redirects: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            proxy_credentials: None,
            credentials: None,
            user_agent: concat!("medianet/", env!("CARGO_PKG_VERSION")).to_string(),
            reconnect: false,
            continuous: false,
            forward_cookies: true,
            caching: Duration::from_millis(1200),
            max_redirects: 5,
        }
    }
}

impl HttpConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> HttpConfigBuilder {
        HttpConfigBuilder::default()
    }
}

/// Builder for `HttpConfig`
#[derive(Debug, Clone, Default)]
pub struct HttpConfigBuilder {
    config: HttpConfig,
}

impl HttpConfigBuilder {
    /// Set an explicit proxy URL
    #[must_use]
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy.into());
        self
    }

    /// Set proxy credentials
    #[must_use]
    pub fn proxy_credentials(mut self, credentials: Credentials) -> Self {
        self.config.proxy_credentials = Some(credentials);
        self
    }

    /// Set origin credentials
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable auto-reconnect
    #[must_use]
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Enable or disable continuous mode
    #[must_use]
    pub fn continuous(mut self, continuous: bool) -> Self {
        self.config.continuous = continuous;
        self
    }

    /// Enable or disable cookie forwarding
    #[must_use]
    pub fn forward_cookies(mut self, forward: bool) -> Self {
        self.config.forward_cookies = forward;
        self
    }

    /// Set the caching delay
    #[must_use]
    pub fn caching(mut self, caching: Duration) -> Self {
        self.config.caching = caching;
        self
    }

    /// Set the redirect hop limit
    #[must_use]
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Build the config
    #[must_use]
    pub fn build(self) -> HttpConfig {
        self.config
    }
}

/// Transport protocol carrying RTP packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProto {
    /// Plain UDP datagrams
    Udp,
    /// TCP, passive COMEDIA establishment
    Tcp,
    /// DCCP, passive COMEDIA establishment
    Dccp,
    /// UDP-Lite with partial checksum coverage
    UdpLite,
}

impl TransportProto {
    /// True for protocols where we listen and the receiver connects
    #[must_use]
    pub fn is_comedia(self) -> bool {
        matches!(self, Self::Tcp | Self::Dccp)
    }

    /// SDP proto token for this transport
    #[must_use]
    pub fn sdp_proto(self) -> &'static str {
        match self {
            Self::Udp | Self::UdpLite => "RTP/AVP",
            Self::Tcp => "TCP/RTP/AVP",
            Self::Dccp => "DCCP/RTP/AVP",
        }
    }
}

/// Configuration for one RTP output session
#[derive(Debug, Clone)]
pub struct RtpConfig {
    /// Destination host for active sends; `None` means sinks only appear
    /// through COMEDIA accepts or explicit `add_sink` calls
    pub destination: Option<String>,

    /// Base RTP port; streams step from here in even increments
    pub port: u16,

    /// Fixed port for the first audio stream (0 = pick from base)
    pub port_audio: u16,

    /// Fixed port for the first video stream (0 = pick from base)
    pub port_video: u16,

    /// Multicast TTL / unicast hop limit (`None` = system default)
    pub ttl: Option<u32>,

    /// Transport protocol
    pub proto: TransportProto,

    /// SRTP master key as hex digits; enables SRTP when set
    pub srtp_key: Option<String>,

    /// SRTP master salt as hex digits
    pub srtp_salt: Option<String>,

    /// Multiplex RTCP on the RTP socket
    pub rtcp_mux: bool,

    /// Maximum transmission unit, RTP header included (default: 1400)
    pub mtu: usize,

    /// Delay added to every packet's timestamp before it is sent
    pub caching: Duration,

    /// Use LATM framing for MPEG-4 audio instead of mpeg4-generic
    pub latm: bool,

    /// Session name placed in the SDP `s=` line
    pub session_name: String,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            destination: None,
            port: 50004,
            port_audio: 0,
            port_video: 0,
            ttl: None,
            proto: TransportProto::Udp,
            srtp_key: None,
            srtp_salt: None,
            rtcp_mux: false,
            mtu: 1400,
            caching: Duration::from_millis(300),
            latm: false,
            session_name: "Unnamed".to_string(),
        }
    }
}

impl RtpConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> RtpConfigBuilder {
        RtpConfigBuilder::default()
    }
}

/// Builder for `RtpConfig`
#[derive(Debug, Clone, Default)]
pub struct RtpConfigBuilder {
    config: RtpConfig,
}

impl RtpConfigBuilder {
    /// Set the destination host
    #[must_use]
    pub fn destination(mut self, destination: impl Into<String>) -> Self {
        self.config.destination = Some(destination.into());
        self
    }

    /// Set the base RTP port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the TTL
    #[must_use]
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.config.ttl = Some(ttl);
        self
    }

    /// Set the transport protocol
    #[must_use]
    pub fn proto(mut self, proto: TransportProto) -> Self {
        self.config.proto = proto;
        self
    }

    /// Set SRTP master key and salt (hex digits)
    #[must_use]
    pub fn srtp(mut self, key: impl Into<String>, salt: impl Into<String>) -> Self {
        self.config.srtp_key = Some(key.into());
        self.config.srtp_salt = Some(salt.into());
        self
    }

    /// Enable RTCP multiplexing
    #[must_use]
    pub fn rtcp_mux(mut self, mux: bool) -> Self {
        self.config.rtcp_mux = mux;
        self
    }

    /// Set the MTU
    #[must_use]
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Set the caching delay
    #[must_use]
    pub fn caching(mut self, caching: Duration) -> Self {
        self.config.caching = caching;
        self
    }

    /// Use LATM framing for MPEG-4 audio
    #[must_use]
    pub fn latm(mut self, latm: bool) -> Self {
        self.config.latm = latm;
        self
    }

    /// Set the SDP session name
    #[must_use]
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = name.into();
        self
    }

    /// Build the config
    #[must_use]
    pub fn build(self) -> RtpConfig {
        self.config
    }
}
