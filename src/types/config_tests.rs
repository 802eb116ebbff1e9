use super::*;
use std::time::Duration;

#[test]
fn test_http_defaults() {
    let config = HttpConfig::default();
    assert!(config.forward_cookies);
    assert!(!config.reconnect);
    assert!(!config.continuous);
    assert_eq!(config.max_redirects, 5);
}

#[test]
fn test_http_builder() {
    let config = HttpConfig::builder()
        .proxy("http://proxy.local:3128")
        .credentials(Credentials::new("Mufasa", "Circle Of Life"))
        .reconnect(true)
        .caching(Duration::from_millis(500))
        .build();

    assert_eq!(config.proxy.as_deref(), Some("http://proxy.local:3128"));
    assert_eq!(config.credentials.as_ref().unwrap().user, "Mufasa");
    assert!(config.reconnect);
    assert_eq!(config.caching, Duration::from_millis(500));
}

#[test]
fn test_rtp_builder() {
    let config = RtpConfig::builder()
        .destination("239.255.1.2")
        .port(6000)
        .proto(TransportProto::Udp)
        .rtcp_mux(true)
        .mtu(1200)
        .build();

    assert_eq!(config.destination.as_deref(), Some("239.255.1.2"));
    assert_eq!(config.port, 6000);
    assert!(config.rtcp_mux);
    assert_eq!(config.mtu, 1200);
}

#[test]
fn test_proto_tokens() {
    assert_eq!(TransportProto::Udp.sdp_proto(), "RTP/AVP");
    assert_eq!(TransportProto::Tcp.sdp_proto(), "TCP/RTP/AVP");
    assert!(TransportProto::Tcp.is_comedia());
    assert!(!TransportProto::UdpLite.is_comedia());
}
