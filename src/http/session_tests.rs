use std::io::Write as _;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::HttpError;
use crate::testing::{ConnectionScript, MockHttpServer};
use crate::types::{Credentials, HttpConfig};

use super::session::{HttpEvent, HttpStream};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn response(head: &str, body: &[u8]) -> Vec<u8> {
    let mut bytes = head.as_bytes().to_vec();
    bytes.extend_from_slice(body);
    bytes
}

async fn read_to_end(stream: &mut HttpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn test_plain_get() {
    init_tracing();
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: 5\r\n\r\n",
        b"hello",
    ))])
    .await
    .unwrap();

    let mut stream = HttpStream::open(&server.url("/track.mp3"), HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    assert_eq!(stream.mime_type(), Some("audio/mpeg"));
    assert_eq!(stream.size(), Some(5));
    // A plain 200 means the server ignored our Range
    assert!(!stream.is_seekable());

    assert_eq!(read_to_end(&mut stream).await, b"hello");
    assert!(stream.is_eof());

    let requests = server.requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /track.mp3 HTTP/1.1\r\n"));
    assert!(requests[0].contains("Range: bytes=0-\r\n"));
    assert!(requests[0].contains("Icy-MetaData: 1\r\n"));
    assert!(requests[0].contains("User-Agent: medianet/"));
}

#[tokio::test]
async fn test_spaces_in_url_become_plus() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
        b"",
    ))])
    .await
    .unwrap();

    let _ = HttpStream::open(&server.url("/my file.mp3"), HttpConfig::default())
        .await
        .unwrap();
    let requests = server.requests().await;
    assert!(requests[0].starts_with("GET /my+file.mp3 "));
}

#[tokio::test]
async fn test_chunked_transfer() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
        b"4\r\ntest\r\n0\r\n\r\n",
    ))])
    .await
    .unwrap();

    let mut stream = HttpStream::open(&server.url("/"), HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"test");
    assert!(stream.is_eof());
}

#[tokio::test]
async fn test_content_range_positions_stream() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 100-199/1000\r\nContent-Length: 100\r\n\r\n",
        &[0u8; 100],
    ))])
    .await
    .unwrap();

    let stream = HttpStream::open(&server.url("/"), HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(stream.position(), 100);
    assert_eq!(stream.size(), Some(1000));
    assert!(stream.is_seekable());
}

fn redirect_to(target: &str, extra_headers: &str) -> ConnectionScript {
    ConnectionScript::single(response(
        &format!(
            "HTTP/1.1 302 Found\r\n{extra_headers}Location: {target}\r\nContent-Length: 0\r\n\r\n"
        ),
        b"",
    ))
}

#[tokio::test]
async fn test_redirect_carries_cookies() {
    let server = MockHttpServer::start(vec![]).await.unwrap();
    server
        .push_script(redirect_to(
            &server.url("/next"),
            "Set-Cookie: token=42; path=/\r\n",
        ))
        .await;
    server
        .push_script(ConnectionScript::single(response(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n",
            b"ok",
        )))
        .await;

    let mut stream = HttpStream::open(&server.url("/start"), HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"ok");

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[0].contains("GET /start "));
    assert!(requests[1].contains("GET /next "));
    assert!(requests[1].contains("Cookie: token=42\r\n"));
}

#[tokio::test]
async fn test_redirect_without_cookie_forwarding() {
    let server = MockHttpServer::start(vec![]).await.unwrap();
    server
        .push_script(redirect_to(
            &server.url("/next"),
            "Set-Cookie: token=42\r\n",
        ))
        .await;
    server
        .push_script(ConnectionScript::single(response(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n",
            b"ok",
        )))
        .await;

    let config = HttpConfig::builder().forward_cookies(false).build();
    let mut stream = HttpStream::open(&server.url("/start"), config)
        .await
        .unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"ok");

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(!requests[1].contains("Cookie:"));
}

#[tokio::test]
async fn test_redirect_limit() {
    let server = MockHttpServer::start(vec![]).await.unwrap();
    let target = server.url("/loop");
    // One more script than the budget so the last hop still answers
    for _ in 0..4 {
        server.push_script(redirect_to(&target, "")).await;
    }

    let config = HttpConfig::builder().max_redirects(2).build();
    let result = HttpStream::open(&target, config).await;
    assert!(matches!(result, Err(HttpError::RedirectExceeded { hops: 2 })));
}

#[tokio::test]
async fn test_icy_metadata_extraction() {
    // Icy-MetaInt: 8 means a length byte every 8 body bytes; length 0x02
    // announces a 32-byte block.
    let mut body = Vec::new();
    body.extend_from_slice(b"AAAABBBB");
    body.push(0x02);
    let mut block = b"StreamTitle='Song Name';".to_vec();
    block.resize(32, 0);
    body.extend_from_slice(&block);
    body.extend_from_slice(b"CCCCDDDD");

    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "ICY 200 OK\r\nIcy-MetaInt: 8\r\nIcy-Name: Test Radio\r\nContent-Length: 49\r\n\r\n",
        &body,
    ))])
    .await
    .unwrap();

    let mut stream = HttpStream::open(&server.url("/"), HttpConfig::default())
        .await
        .unwrap();
    assert!(!stream.is_seekable());
    assert_eq!(stream.icy_name(), Some("Test Radio"));

    let mut events = stream.subscribe();

    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"AAAABBBB");

    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"CCCCDDDD");
    assert_eq!(stream.icy_title(), Some("Song Name"));

    match events.recv().await.unwrap() {
        HttpEvent::TitleChanged(title) => assert_eq!(title, "Song Name"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_gzip_body() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"plain text payload").unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        &format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            compressed.len()
        ),
        &compressed,
    ))])
    .await
    .unwrap();

    let mut stream = HttpStream::open(&server.url("/"), HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"plain text payload");
}

#[tokio::test]
async fn test_reconnect_resumes_at_position() {
    // First connection promises 8 bytes but dies after 4; the stream
    // must reopen with Range: bytes=4- and finish the read.
    let server = MockHttpServer::start(vec![
        ConnectionScript::single(response(
            "HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\n",
            b"AAAA",
        )),
        ConnectionScript::single(response(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 4-7/8\r\nContent-Length: 4\r\n\r\n",
            b"BBBB",
        )),
    ])
    .await
    .unwrap();

    let config = HttpConfig::builder().reconnect(true).build();
    let mut stream = HttpStream::open(&server.url("/"), config).await.unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"AAAABBBB");

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[1].contains("Range: bytes=4-\r\n"));
}

#[tokio::test]
async fn test_no_reconnect_means_eof() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\n",
        b"AAAA",
    ))])
    .await
    .unwrap();

    let mut stream = HttpStream::open(&server.url("/"), HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"AAAA");
    assert!(stream.is_eof());
}

#[tokio::test]
async fn test_continuous_reissues_requests() {
    let server = MockHttpServer::start(vec![ConnectionScript {
        responses: vec![
            response("HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n", b"AAAA"),
            response("HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\n", b"BBBB"),
        ],
    }])
    .await
    .unwrap();

    let config = HttpConfig::builder().continuous(true).build();
    let mut stream = HttpStream::open(&server.url("/playlist"), config)
        .await
        .unwrap();
    // Continuous requests never carry a Range and keep the connection up
    let requests = server.requests().await;
    assert!(!requests[0].contains("Range:"));
    assert!(requests[0].contains("Connection: Keep-Alive\r\n"));

    assert_eq!(read_to_end(&mut stream).await, b"AAAABBBB");
    assert_eq!(server.requests().await.len(), 2);
}

#[tokio::test]
async fn test_seek_reopens_with_range() {
    let server = MockHttpServer::start(vec![
        ConnectionScript::single(response(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-9/10\r\nContent-Length: 10\r\n\r\n",
            b"0123456789",
        )),
        ConnectionScript::single(response(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 5-9/10\r\nContent-Length: 5\r\n\r\n",
            b"56789",
        )),
    ])
    .await
    .unwrap();

    let mut stream = HttpStream::open(&server.url("/"), HttpConfig::default())
        .await
        .unwrap();
    assert!(stream.is_seekable());

    stream.seek(5).await.unwrap();
    assert_eq!(stream.position(), 5);
    assert_eq!(read_to_end(&mut stream).await, b"56789");

    let requests = server.requests().await;
    assert!(requests[1].contains("Range: bytes=5-\r\n"));
}

#[tokio::test]
async fn test_seek_past_end_probes_last_byte() {
    init_tracing();
    let server = MockHttpServer::start(vec![
        ConnectionScript::single(response(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 0-9/10\r\nContent-Length: 10\r\n\r\n",
            b"0123456789",
        )),
        ConnectionScript::single(response(
            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 9-9/10\r\nContent-Length: 1\r\n\r\n",
            b"9",
        )),
    ])
    .await
    .unwrap();

    let mut stream = HttpStream::open(&server.url("/"), HttpConfig::default())
        .await
        .unwrap();
    assert_eq!(stream.size(), Some(10));

    // Seeking to the known size reopens at size - 1 and burns the last
    // byte instead of requesting an unsatisfiable range
    stream.seek(10).await.unwrap();
    assert_eq!(stream.position(), 10);

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[1].contains("Range: bytes=9-\r\n"));

    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    assert!(stream.is_eof());
}

#[tokio::test]
async fn test_digest_challenge_retried_once() {
    let server = MockHttpServer::start(vec![
        ConnectionScript::single(response(
            "HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Digest realm=\"media\", nonce=\"abc\", qop=\"auth\"\r\nContent-Length: 0\r\n\r\n",
            b"",
        )),
        ConnectionScript::single(response(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n",
            b"ok",
        )),
    ])
    .await
    .unwrap();

    let config = HttpConfig::builder()
        .credentials(Credentials::new("user", "pw"))
        .build();
    let mut stream = HttpStream::open(&server.url("/secret"), config).await.unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"ok");

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    // First attempt is preemptive Basic, the retry answers the challenge
    assert!(requests[0].contains("Authorization: Basic "));
    assert!(requests[1].contains("Authorization: Digest username=\"user\""));
    assert!(requests[1].contains("uri=\"/secret\""));
    assert!(requests[1].contains("qop=auth"));
}

#[tokio::test]
async fn test_401_without_credentials_is_fatal() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Basic realm=\"media\"\r\nContent-Length: 0\r\n\r\n",
        b"",
    ))])
    .await
    .unwrap();

    let result = HttpStream::open(&server.url("/secret"), HttpConfig::default()).await;
    assert!(matches!(result, Err(HttpError::AuthRequired { .. })));
}

#[tokio::test]
async fn test_status_error() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        b"",
    ))])
    .await
    .unwrap();

    let result = HttpStream::open(&server.url("/missing"), HttpConfig::default()).await;
    assert!(matches!(result, Err(HttpError::Status { code: 404 })));
}

#[tokio::test]
async fn test_downgrade_to_http10_on_bad_reply() {
    let garbage = ConnectionScript::single(b"not-http at all\r\n\r\n".to_vec());
    let server = MockHttpServer::start(vec![garbage.clone(), garbage])
        .await
        .unwrap();

    let result = HttpStream::open(&server.url("/"), HttpConfig::default()).await;
    assert!(matches!(result, Err(HttpError::MalformedResponse { .. })));

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[0].contains("HTTP/1.1\r\n"));
    assert!(requests[1].contains("HTTP/1.0\r\n"));
    // 1.0 requests never ask for ranges
    assert!(!requests[1].contains("Range:"));
}

#[tokio::test]
async fn test_proxy_uses_absolute_uri() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n",
        b"ok",
    ))])
    .await
    .unwrap();

    let config = HttpConfig::builder().proxy(server.url("")).build();
    let mut stream = HttpStream::open("http://origin.invalid:8000/live", config)
        .await
        .unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"ok");

    let requests = server.requests().await;
    assert!(requests[0].starts_with("GET http://origin.invalid:8000/live HTTP/1.1\r\n"));
}

#[tokio::test]
async fn test_mms_pragma_rejected() {
    let server = MockHttpServer::start(vec![ConnectionScript::single(response(
        "HTTP/1.1 200 OK\r\nPragma: features=\"broadcast\"\r\nContent-Length: 0\r\n\r\n",
        b"",
    ))])
    .await
    .unwrap();

    let result = HttpStream::open(&server.url("/"), HttpConfig::default()).await;
    assert!(matches!(result, Err(HttpError::MmsUnsupported)));
}
