//! RTP output session management
//!
//! [`RtpSession`] owns the session-wide bookkeeping: dynamic payload
//! type numbers, port assignment, the SDP description. Each
//! [`add_stream`](RtpSession::add_stream) call resolves the codec's
//! payload parameters, opens the transport, and spawns a dedicated
//! sender task; the returned [`RtpStream`] is the caller's handle for
//! feeding frames into it.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::RtpError;
use crate::types::RtpConfig;

use super::endpoint::{self, Endpoint};
use super::packet::OutboundPacket;
use super::packetize::{self, Category, CodecParams, Frame, RtpWriter, StreamFormat};
use super::sdp;
use super::srtp::SrtpSession;

/// Outbound packets queued per stream before backpressure kicks in
const QUEUE_DEPTH: usize = 256;

/// Dynamic payload type numbers, 96 through 127
struct PayloadTypeAllocator {
    bitmap: u32,
}

impl PayloadTypeAllocator {
    fn new() -> Self {
        Self { bitmap: 0 }
    }

    fn acquire(&mut self) -> Result<u8, RtpError> {
        let free = (!self.bitmap).trailing_zeros();
        if free >= 32 {
            return Err(RtpError::PayloadTypesExhausted);
        }
        self.bitmap |= 1 << free;
        Ok(96 + free as u8)
    }

    fn release(&mut self, payload_type: u8) {
        if (96..128).contains(&payload_type) {
            self.bitmap &= !(1 << (payload_type - 96));
        }
    }
}

/// Session-side record of one active stream, feeds the SDP
pub(super) struct StreamEntry {
    pub(super) ssrc: [u8; 4],
    pub(super) port: u16,
    pub(super) payload_type: u8,
    pub(super) bitrate: u32,
    pub(super) params: CodecParams,
    dynamic: bool,
}

/// One RTP output session carrying any number of elementary streams
pub struct RtpSession {
    config: RtpConfig,
    session_id: u64,
    cname: String,
    payload_types: PayloadTypeAllocator,
    streams: Vec<StreamEntry>,
}

impl RtpSession {
    /// Create a session from its configuration
    #[must_use]
    pub fn new(config: RtpConfig) -> Self {
        let session_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            config,
            session_id,
            cname: format!("{:08x}@medianet", rand::random::<u32>()),
            payload_types: PayloadTypeAllocator::new(),
            streams: Vec::new(),
        }
    }

    /// Add an elementary stream and spawn its sender task
    ///
    /// # Errors
    ///
    /// Fails when the codec has no payload mapping, the dynamic payload
    /// type space or port range is exhausted, the SRTP key material is
    /// rejected, or the transport cannot be set up.
    pub async fn add_stream(&mut self, format: &StreamFormat) -> Result<RtpStream, RtpError> {
        debug!(fourcc = format.codec.fourcc(), "mapping elementary stream");
        let params = packetize::resolve(format, &self.config)?;

        let dynamic = params.static_payload_type.is_none();
        let payload_type = match params.static_payload_type {
            Some(pt) => pt,
            None => self.payload_types.acquire()?,
        };
        let port = match self.pick_port(params.category) {
            Ok(port) => port,
            Err(error) => {
                if dynamic {
                    self.payload_types.release(payload_type);
                }
                return Err(error);
            }
        };

        match self.open_stream(&params, payload_type, port, format.bitrate).await {
            Ok(stream) => Ok(stream),
            Err(error) => {
                if dynamic {
                    self.payload_types.release(payload_type);
                }
                Err(error)
            }
        }
    }

    async fn open_stream(
        &mut self,
        params: &CodecParams,
        payload_type: u8,
        port: u16,
        bitrate: u32,
    ) -> Result<RtpStream, RtpError> {
        let srtp = match &self.config.srtp_key {
            Some(key) => {
                let salt = self.config.srtp_salt.as_deref().unwrap_or("");
                Some(SrtpSession::new(key, salt)?)
            }
            None => None,
        };

        let ssrc: [u8; 4] = rand::random();
        // Under SRTP the sequence number doubles as the packet index,
        // so it starts at zero instead of a random offset
        let sequence: u16 = if srtp.is_some() { 0 } else { rand::random() };

        let listener = if self.config.proto.is_comedia() {
            Some(
                endpoint::comedia_listener(self.config.proto, port)
                    .map_err(RtpError::ListenerSetup)?,
            )
        } else {
            None
        };

        let endpoint = Arc::new(Endpoint::new(
            listener,
            self.config.proto,
            port,
            self.config.ttl,
            ssrc,
            self.cname.clone(),
            srtp.is_none(),
            self.config.rtcp_mux,
        ));

        if !self.config.proto.is_comedia()
            && let Some(host) = &self.config.destination
        {
            let destination = resolve_destination(host, port).map_err(|source| {
                RtpError::SocketSetup {
                    destination: format!("{host}:{port}"),
                    source,
                }
            })?;
            endpoint
                .add_udp_sink(destination)
                .await
                .map_err(|source| RtpError::SocketSetup {
                    destination: destination.to_string(),
                    source,
                })?;
        }

        let (queue, receiver) = mpsc::channel(QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(endpoint::sender_loop(
            receiver,
            shutdown_rx,
            Arc::clone(&endpoint),
            srtp,
            self.config.caching,
        ));

        info!(
            port,
            payload_type,
            encoding = params.encoding,
            "RTP stream added"
        );
        self.streams.push(StreamEntry {
            ssrc,
            port,
            payload_type,
            bitrate,
            params: params.clone(),
            dynamic: params.static_payload_type.is_none(),
        });

        Ok(RtpStream {
            writer: RtpWriter::new(payload_type, params.clock_rate, ssrc, sequence),
            params: params.clone(),
            queue,
            shutdown,
            task,
            endpoint,
            port,
            ssrc,
        })
    }

    /// Stop a stream's sender task and release its resources
    pub async fn remove_stream(&mut self, stream: RtpStream) {
        let RtpStream {
            queue,
            shutdown,
            task,
            ssrc,
            ..
        } = stream;

        let _ = shutdown.send(true);
        drop(queue);
        let _ = task.await;

        if let Some(index) = self.streams.iter().position(|e| e.ssrc == ssrc) {
            let entry = self.streams.remove(index);
            if entry.dynamic {
                self.payload_types.release(entry.payload_type);
            }
        }
    }

    /// Pick an RTP port for a new stream
    ///
    /// A category override wins for the first stream of that category;
    /// otherwise ports step up in pairs from the configured base,
    /// skipping pairs already in use.
    fn pick_port(&self, category: Category) -> Result<u16, RtpError> {
        let preferred = match category {
            Category::Audio => self.config.port_audio,
            Category::Video => self.config.port_video,
            Category::Text => 0,
        };
        if preferred != 0 && !self.port_taken(preferred) {
            return Ok(preferred);
        }

        let mut port = self.config.port & !1;
        loop {
            if !self.port_taken(port) {
                return Ok(port);
            }
            port = port.checked_add(2).ok_or(RtpError::PortsExhausted)?;
        }
    }

    fn port_taken(&self, port: u16) -> bool {
        self.streams
            .iter()
            .any(|e| e.port == port || e.port.wrapping_add(1) == port)
    }

    /// Session description for the current set of streams
    #[must_use]
    pub fn sdp(&self) -> String {
        sdp::generate(&self.config, self.session_id, &self.streams, None)
    }

    /// Session description with per-track `a=control` attributes
    #[must_use]
    pub fn sdp_with_control(&self, base: &str) -> String {
        sdp::generate(&self.config, self.session_id, &self.streams, Some(base))
    }

    /// Write the session description to a file
    ///
    /// # Errors
    ///
    /// Propagates the filesystem error when the file cannot be written.
    pub fn export_sdp(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.sdp())
    }
}

fn resolve_destination(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "destination has no address"))
}

/// Caller handle for one elementary stream
pub struct RtpStream {
    writer: RtpWriter,
    params: CodecParams,
    queue: mpsc::Sender<OutboundPacket>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    endpoint: Arc<Endpoint>,
    port: u16,
    ssrc: [u8; 4],
}

impl RtpStream {
    /// Packetize one frame and queue its packets for sending
    ///
    /// Applies backpressure once the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `SenderStopped` when the sender task is gone.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), RtpError> {
        let packets = packetize::packetize(self.params.kind, &mut self.writer, self.params.mtu, frame);
        for packet in packets {
            self.queue
                .send(packet)
                .await
                .map_err(|_| RtpError::SenderStopped)?;
        }
        Ok(())
    }

    /// Attach a datagram sink sending to `destination`
    ///
    /// # Errors
    ///
    /// Returns `SocketSetup` when the socket cannot be created.
    pub async fn add_udp_sink(&self, destination: SocketAddr) -> Result<(), RtpError> {
        self.endpoint
            .add_udp_sink(destination)
            .await
            .map_err(|source| RtpError::SocketSetup {
                destination: destination.to_string(),
                source,
            })
    }

    /// Attach an already-connected stream sink
    pub async fn add_stream_sink(&self, stream: TcpStream) {
        self.endpoint.add_stream_sink(stream).await;
    }

    /// Number of currently attached sinks
    pub async fn sink_count(&self) -> usize {
        self.endpoint.sink_count().await
    }

    /// Sequence number the next packet will carry
    #[must_use]
    pub fn next_sequence(&self) -> u16 {
        self.writer.next_sequence()
    }

    /// Payload type of this stream
    #[must_use]
    pub fn payload_type(&self) -> u8 {
        self.writer.payload_type
    }

    /// Advertised RTP port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Synchronization source of this stream
    #[must_use]
    pub fn ssrc(&self) -> [u8; 4] {
        self.ssrc
    }
}

#[cfg(test)]
mod tests {
    use super::PayloadTypeAllocator;
    use crate::error::RtpError;

    #[test]
    fn test_allocator_hands_out_96_up() {
        let mut alloc = PayloadTypeAllocator::new();
        assert_eq!(alloc.acquire().unwrap(), 96);
        assert_eq!(alloc.acquire().unwrap(), 97);
        assert_eq!(alloc.acquire().unwrap(), 98);
    }

    #[test]
    fn test_allocator_reuses_released_numbers() {
        let mut alloc = PayloadTypeAllocator::new();
        let a = alloc.acquire().unwrap();
        let _b = alloc.acquire().unwrap();
        alloc.release(a);
        assert_eq!(alloc.acquire().unwrap(), a);
    }

    #[test]
    fn test_allocator_exhausts_at_32() {
        let mut alloc = PayloadTypeAllocator::new();
        for expected in 96..128 {
            assert_eq!(alloc.acquire().unwrap(), expected);
        }
        assert!(matches!(
            alloc.acquire(),
            Err(RtpError::PayloadTypesExhausted)
        ));
    }

    #[test]
    fn test_release_ignores_static_types() {
        let mut alloc = PayloadTypeAllocator::new();
        alloc.release(14);
        assert_eq!(alloc.acquire().unwrap(), 96);
    }
}
