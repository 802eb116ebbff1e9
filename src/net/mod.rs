//! Byte-stream connection management
//!
//! One [`Connection`] is one live transport channel: a TCP socket,
//! optionally tunneled through an HTTP proxy and wrapped in TLS. Reading
//! is either line-oriented (headers, chunk-size lines) or fixed-length
//! (payload bytes, ICY metadata blocks).

use std::io;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::HttpError;

#[cfg(test)]
mod tests;

const LINE_LIMIT: usize = 16 * 1024;
const READ_CHUNK: usize = 4096;

enum NetStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl NetStream {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.write_all(buf).await,
            Self::Tls(s) => s.write_all(buf).await,
        }
    }
}

/// One live transport-layer byte channel
pub struct Connection {
    stream: NetStream,
    /// Bytes read off the socket but not yet handed to the caller.
    /// Line reads and fixed reads both drain this first, so a buffered
    /// header read never swallows body bytes.
    pending: BytesMut,
}

impl Connection {
    /// Open a plain TCP connection with keep-alive set
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the connect fails.
    pub async fn open(host: &str, port: u16) -> io::Result<Self> {
        tracing::debug!("connecting to {host}:{port}");
        let stream = TcpStream::connect((host, port)).await?;

        let keepalive = socket2::TcpKeepalive::new();
        socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

        Ok(Self {
            stream: NetStream::Plain(stream),
            pending: BytesMut::new(),
        })
    }

    /// Establish a CONNECT tunnel to `host:port` through the proxy this
    /// connection is talking to
    ///
    /// Sends the plaintext CONNECT request, checks the proxy's status
    /// line for a 2xx code and discards response lines up to the blank
    /// separator. The connection is unusable after a failure; callers
    /// drop it.
    ///
    /// # Errors
    ///
    /// Returns `TunnelRefused` when the proxy answers with a non-2xx
    /// status, `MalformedResponse` when its answer is not HTTP.
    pub async fn tunnel(&mut self, host: &str, port: u16, version: u8) -> Result<(), HttpError> {
        let request =
            format!("CONNECT {host}:{port} HTTP/1.{version}\r\nHost: {host}:{port}\r\n\r\n");
        self.write_all(request.as_bytes()).await?;

        let status = self
            .read_line()
            .await?
            .ok_or_else(|| HttpError::MalformedResponse {
                message: "proxy closed connection during CONNECT".to_string(),
            })?;
        let code = parse_connect_status(&status).ok_or_else(|| HttpError::MalformedResponse {
            message: format!("bad proxy CONNECT answer: {status}"),
        })?;

        // Skip the rest of the proxy's header block
        loop {
            match self.read_line().await? {
                None => {
                    return Err(HttpError::MalformedResponse {
                        message: "proxy closed connection during CONNECT".to_string(),
                    });
                }
                Some(line) if line.is_empty() => break,
                Some(_) => {}
            }
        }

        if !(200..300).contains(&code) {
            tracing::warn!("proxy CONNECT refused with status {code}");
            return Err(HttpError::TunnelRefused { code });
        }
        Ok(())
    }

    /// Wrap the connection in TLS, verifying `origin_host`
    ///
    /// Through a proxy the TCP peer is the proxy, so the hostname checked
    /// here must be the origin's, never the proxy's.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Tls` when the name is not a valid server name
    /// or the handshake fails.
    pub async fn upgrade_tls(self, origin_host: &str) -> Result<Self, HttpError> {
        let NetStream::Plain(stream) = self.stream else {
            return Err(HttpError::Tls {
                host: origin_host.to_string(),
                message: "connection is already TLS".to_string(),
            });
        };
        debug_assert!(self.pending.is_empty());

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let name = rustls::pki_types::ServerName::try_from(origin_host.to_string()).map_err(
            |e| HttpError::Tls {
                host: origin_host.to_string(),
                message: e.to_string(),
            },
        )?;

        let connector = TlsConnector::from(Arc::new(config));
        let tls = connector
            .connect(name, stream)
            .await
            .map_err(|e| HttpError::Tls {
                host: origin_host.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!("TLS session established with {origin_host}");
        Ok(Self {
            stream: NetStream::Tls(Box::new(tls)),
            pending: BytesMut::new(),
        })
    }

    /// Read one CRLF-or-LF-terminated line, without the terminator
    ///
    /// Returns `Ok(None)` on a clean end of stream before any line byte.
    ///
    /// # Errors
    ///
    /// Returns an I/O error on socket failure, truncated line, or a line
    /// longer than the 16 KiB limit.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&self.pending[..pos]);
                self.pending.advance(pos + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            line.extend_from_slice(&self.pending);
            self.pending.clear();
            if line.len() > LINE_LIMIT {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "header line too long",
                ));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read_some(&mut chunk).await?;
            if n == 0 {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                ));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read up to `buf.len()` bytes; 0 means the connection is dead
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Ok(n);
        }
        self.stream.read_some(buf).await
    }

    /// Read exactly `buf.len()` bytes
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the stream ends first.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-read",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Write the whole buffer
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }
}

fn parse_connect_status(line: &str) -> Option<u16> {
    let rest = line.strip_prefix("HTTP/")?;
    let (_, after_version) = rest.split_once(' ')?;
    let code = after_version.split(' ').next()?;
    code.parse().ok()
}
