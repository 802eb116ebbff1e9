use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::error::RtpError;
use crate::types::RtpConfig;

use super::packet;
use super::packetize::{Codec, Frame, StreamFormat};
use super::session::RtpSession;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn quick_config() -> RtpConfig {
    RtpConfig::builder().caching(Duration::ZERO).build()
}

#[tokio::test]
async fn test_static_and_dynamic_payload_types() {
    let mut session = RtpSession::new(quick_config());

    let pcmu = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();
    assert_eq!(pcmu.payload_type(), 0);

    let h264 = session
        .add_stream(&StreamFormat::video(Codec::H264))
        .await
        .unwrap();
    assert_eq!(h264.payload_type(), 96);

    let speex = session
        .add_stream(&StreamFormat::audio(Codec::Speex, 16_000, 1))
        .await
        .unwrap();
    assert_eq!(speex.payload_type(), 97);
}

#[tokio::test]
async fn test_ports_step_in_pairs() {
    let config = RtpConfig::builder()
        .caching(Duration::ZERO)
        .port(51000)
        .build();
    let mut session = RtpSession::new(config);

    let a = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();
    let b = session
        .add_stream(&StreamFormat::video(Codec::H264))
        .await
        .unwrap();

    assert_eq!(a.port(), 51000);
    assert_eq!(b.port(), 51002);
}

#[tokio::test]
async fn test_removed_stream_frees_payload_type_and_port() {
    let mut session = RtpSession::new(quick_config());

    let first = session
        .add_stream(&StreamFormat::video(Codec::H264))
        .await
        .unwrap();
    let port = first.port();
    assert_eq!(first.payload_type(), 96);

    session.remove_stream(first).await;

    let second = session
        .add_stream(&StreamFormat::video(Codec::H264))
        .await
        .unwrap();
    assert_eq!(second.payload_type(), 96);
    assert_eq!(second.port(), port);
}

#[tokio::test]
async fn test_sdp_describes_streams() {
    let config = RtpConfig::builder()
        .caching(Duration::ZERO)
        .destination("239.255.12.42")
        .ttl(5)
        .port(52000)
        .session_name("Concert")
        .build();
    let mut session = RtpSession::new(config);

    let _audio = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();
    let _video = session
        .add_stream(
            &StreamFormat::video(Codec::H264).with_bitrate(2_000_000),
        )
        .await
        .unwrap();

    let sdp = session.sdp();
    assert!(sdp.starts_with("v=0\n"));
    assert!(sdp.contains("s=Concert\n"));
    assert!(sdp.contains("c=IN IP4 239.255.12.42/5\n"));
    assert!(sdp.contains("m=audio 52000 RTP/AVP 0\n"));
    assert!(sdp.contains("a=rtpmap:0 PCMU/8000\n"));
    assert!(sdp.contains("m=video 52002 RTP/AVP 96\n"));
    assert!(sdp.contains("b=AS:2000\n"));
    assert!(sdp.contains("a=rtpmap:96 H264/90000\n"));
    assert!(sdp.contains("a=fmtp:96 packetization-mode=1"));
}

#[tokio::test]
async fn test_sdp_control_attributes() {
    let mut session = RtpSession::new(quick_config());
    let _audio = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();

    let sdp = session.sdp_with_control("rtsp://host/stream");
    assert!(sdp.contains("a=control:rtsp://host/stream/trackID=0\n"));
}

#[tokio::test]
async fn test_frames_reach_udp_sink() {
    init_tracing();
    let config = RtpConfig::builder()
        .caching(Duration::ZERO)
        .port(53000)
        .build();
    let mut session = RtpSession::new(config);
    let mut stream = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();

    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let destination = receiver.local_addr().unwrap();
    stream.add_udp_sink(destination).await.unwrap();

    stream
        .send_frame(&Frame::new(vec![0x55u8; 160], 0))
        .await
        .unwrap();

    let mut buf = [0u8; 1500];
    let len = timeout(Duration::from_secs(5), receiver.recv(&mut buf))
        .await
        .expect("packet within deadline")
        .unwrap();
    let received = &buf[..len];

    assert_eq!(received.len(), packet::RTP_HEADER_LEN + 160);
    assert_eq!(packet::payload_type(received), 0);
    assert_eq!(&received[8..12], &stream.ssrc());
}

#[tokio::test]
async fn test_dead_sink_removed_without_disturbing_others() {
    init_tracing();
    let mut session = RtpSession::new(quick_config());
    let mut stream = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let live_client = TcpStream::connect(addr).await.unwrap();
    let (mut live_server, _) = listener.accept().await.unwrap();
    stream.add_stream_sink(live_client).await;

    let dying_client = TcpStream::connect(addr).await.unwrap();
    let (dying_server, _) = listener.accept().await.unwrap();
    stream.add_stream_sink(dying_client).await;
    assert_eq!(stream.sink_count().await, 2);

    // Kill the receiver side; subsequent writes will surface a reset
    drop(dying_server);

    let mut removed = false;
    for _ in 0..50 {
        stream
            .send_frame(&Frame::new(vec![0xaau8; 160], 0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        if stream.sink_count().await == 1 {
            removed = true;
            break;
        }
    }
    assert!(removed, "dead sink was not dropped");

    // The surviving sink kept receiving valid packets
    let mut buf = [0u8; 2048];
    let len = timeout(Duration::from_secs(5), live_server.read(&mut buf))
        .await
        .expect("data within deadline")
        .unwrap();
    assert!(len >= packet::RTP_HEADER_LEN);
    assert_eq!(buf[0], 0x80);
    assert_eq!(packet::payload_type(&buf[..len]), 0);
}

#[tokio::test]
async fn test_srtp_stream_starts_at_sequence_zero() {
    let config = RtpConfig::builder()
        .caching(Duration::ZERO)
        .srtp(
            "00112233445566778899aabbccddeeff",
            "a0a1a2a3a4a5a6a7a8a9aaabacad",
        )
        .build();
    let mut session = RtpSession::new(config);

    let stream = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();
    assert_eq!(stream.next_sequence(), 0);
}

#[tokio::test]
async fn test_bad_srtp_key_rejected() {
    let config = RtpConfig::builder()
        .caching(Duration::ZERO)
        .srtp("nothex", "a0a1a2a3a4a5a6a7a8a9aaabacad")
        .build();
    let mut session = RtpSession::new(config);

    let result = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await;
    assert!(matches!(result, Err(RtpError::Srtp(_))));
}

#[tokio::test]
async fn test_srtp_packets_verify_on_receive() {
    let key = "00112233445566778899aabbccddeeff";
    let salt = "a0a1a2a3a4a5a6a7a8a9aaabacad";
    let config = RtpConfig::builder()
        .caching(Duration::ZERO)
        .port(53010)
        .srtp(key, salt)
        .build();
    let mut session = RtpSession::new(config);
    let mut stream = session
        .add_stream(&StreamFormat::audio(Codec::Pcmu, 8000, 1))
        .await
        .unwrap();

    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    stream
        .add_udp_sink(receiver.local_addr().unwrap())
        .await
        .unwrap();

    let payload = vec![0x11u8; 160];
    stream.send_frame(&Frame::new(payload.clone(), 0)).await.unwrap();

    let mut buf = [0u8; 1500];
    let len = timeout(Duration::from_secs(5), receiver.recv(&mut buf))
        .await
        .expect("packet within deadline")
        .unwrap();

    let mut packet_bytes = buf[..len].to_vec();
    let mut receiver_ctx = super::srtp::SrtpSession::new(key, salt).unwrap();
    receiver_ctx.unprotect(&mut packet_bytes).unwrap();
    assert_eq!(&packet_bytes[packet::RTP_HEADER_LEN..], &payload[..]);
}
