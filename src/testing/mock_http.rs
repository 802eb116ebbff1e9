//! Scripted mock HTTP origin for testing purposes.
//!
//! The server plays back canned byte-for-byte responses: each accepted
//! connection consumes the next [`ConnectionScript`], and each request
//! on that connection is answered with the script's next response. Raw
//! bytes in, raw bytes out, so tests can exercise chunked bodies, ICY
//! interleaves and truncated streams exactly as they appear on the wire.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, mpsc};

/// Responses served over one accepted connection, in request order.
///
/// When the requests outnumber the responses the connection is closed,
/// which is how tests simulate a server dropping a live stream.
#[derive(Debug, Clone, Default)]
pub struct ConnectionScript {
    /// Raw response bytes, one entry per expected request.
    pub responses: Vec<Vec<u8>>,
}

impl ConnectionScript {
    /// Script a single response for a single request.
    #[must_use]
    pub fn single(response: impl Into<Vec<u8>>) -> Self {
        Self {
            responses: vec![response.into()],
        }
    }
}

/// A mock HTTP server bound to a loopback port.
pub struct MockHttpServer {
    address: SocketAddr,
    shutdown: Option<mpsc::Sender<()>>,
    requests: Arc<RwLock<Vec<String>>>,
    scripts: Arc<Mutex<VecDeque<ConnectionScript>>>,
}

impl MockHttpServer {
    /// Starts a server that plays the given scripts, one per connection.
    ///
    /// Connections beyond the scripted count are closed immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(scripts: Vec<ConnectionScript>) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let requests = Arc::new(RwLock::new(Vec::new()));
        let scripts = Arc::new(Mutex::new(VecDeque::from(scripts)));

        let log = requests.clone();
        let queue = scripts.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let script = queue.lock().await.pop_front();
                                let Some(script) = script else { continue };
                                let log = log.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, script, log).await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("accept error: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            address,
            shutdown: Some(shutdown_tx),
            requests,
            scripts,
        })
    }

    /// Queues another connection script.
    ///
    /// Useful when a script needs the bound address in its body, e.g. a
    /// `Location` header pointing back at this server.
    pub async fn push_script(&self, script: ConnectionScript) {
        self.scripts.lock().await.push_back(script);
    }

    /// The bound loopback address.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// A URL for `path` pointing at this server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.address.port())
    }

    /// Full request texts received so far, in arrival order.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.read().await.clone()
    }

    /// Stops accepting connections.
    pub fn stop(&mut self) {
        self.shutdown.take();
    }

    async fn handle_connection(
        mut stream: TcpStream,
        script: ConnectionScript,
        log: Arc<RwLock<Vec<String>>>,
    ) {
        for response in script.responses {
            let Some(request) = Self::read_request(&mut stream).await else {
                return;
            };
            log.write().await.push(request);
            if stream.write_all(&response).await.is_err() {
                return;
            }
            let _ = stream.flush().await;
        }
        // Script exhausted; drop the connection like a dying origin.
    }

    /// Reads one request head, up to and including the blank line.
    async fn read_request(stream: &mut TcpStream) -> Option<String> {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => head.push(byte[0]),
            }
            if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
                return Some(String::from_utf8_lossy(&head).into_owned());
            }
            if head.len() > 64 * 1024 {
                return None;
            }
        }
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.shutdown.take();
    }
}
