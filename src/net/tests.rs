use super::*;
use tokio_test::assert_ok;
use tokio::net::TcpListener;

async fn pair_with(server_bytes: &'static [u8]) -> Connection {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(server_bytes).await.unwrap();
        sock.shutdown().await.unwrap();
    });

    Connection::open("127.0.0.1", addr.port()).await.unwrap()
}

#[tokio::test]
async fn test_read_line_crlf_and_lf() {
    let mut conn = pair_with(b"first line\r\nsecond\nthird\r\n").await;

    assert_eq!(conn.read_line().await.unwrap().unwrap(), "first line");
    assert_eq!(conn.read_line().await.unwrap().unwrap(), "second");
    assert_eq!(conn.read_line().await.unwrap().unwrap(), "third");
    assert!(conn.read_line().await.unwrap().is_none());
}

#[tokio::test]
async fn test_line_then_fixed_read_does_not_lose_body() {
    let mut conn = pair_with(b"HTTP/1.1 200 OK\r\n\r\nbodybytes").await;

    assert_eq!(conn.read_line().await.unwrap().unwrap(), "HTTP/1.1 200 OK");
    assert_eq!(conn.read_line().await.unwrap().unwrap(), "");

    let mut body = [0u8; 9];
    conn.read_exact(&mut body).await.unwrap();
    assert_eq!(&body, b"bodybytes");
}

#[tokio::test]
async fn test_read_exact_eof() {
    let mut conn = pair_with(b"abc").await;
    let mut buf = [0u8; 8];
    let err = conn.read_exact(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

/// Proxy stand-in: reads one request head, sends `reply`, then streams
/// `payload` as the tunneled bytes. Hands the request head back for
/// inspection.
async fn proxy_with(
    reply: &'static [u8],
    payload: &'static [u8],
) -> (Connection, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            tokio::io::AsyncReadExt::read_exact(&mut sock, &mut byte)
                .await
                .unwrap();
            head.push(byte[0]);
        }
        let _ = head_tx.send(String::from_utf8_lossy(&head).into_owned());
        sock.write_all(reply).await.unwrap();
        sock.write_all(payload).await.unwrap();
        sock.shutdown().await.unwrap();
    });

    let conn = Connection::open("127.0.0.1", addr.port()).await.unwrap();
    (conn, head_rx)
}

#[tokio::test]
async fn test_tunnel_accepted_then_carries_traffic() {
    let (mut conn, head) = proxy_with(
        b"HTTP/1.1 200 Connection established\r\nProxy-Agent: test\r\n\r\n",
        b"tunneled",
    )
    .await;

    assert_ok!(conn.tunnel("origin.example", 443, 1).await);

    let head = head.await.unwrap();
    assert!(head.starts_with("CONNECT origin.example:443 HTTP/1.1\r\n"));
    assert!(head.contains("Host: origin.example:443\r\n"));

    // The proxy's header block was fully consumed; only origin bytes
    // remain on the wire
    let mut body = [0u8; 8];
    assert_ok!(conn.read_exact(&mut body).await);
    assert_eq!(&body, b"tunneled");
}

#[tokio::test]
async fn test_tunnel_refused() {
    let (mut conn, _head) = proxy_with(
        b"HTTP/1.0 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"p\"\r\n\r\n",
        b"",
    )
    .await;

    let err = conn.tunnel("origin.example", 443, 1).await.unwrap_err();
    assert!(matches!(err, HttpError::TunnelRefused { code: 407 }));
}

#[test]
fn test_parse_connect_status() {
    assert_eq!(parse_connect_status("HTTP/1.1 200 OK"), Some(200));
    assert_eq!(
        parse_connect_status("HTTP/1.0 407 Proxy Authentication Required"),
        Some(407)
    );
    assert_eq!(parse_connect_status("ICY 200 OK"), None);
}
