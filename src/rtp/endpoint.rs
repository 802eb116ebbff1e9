//! Sink fan-out and the per-stream sender task
//!
//! Each elementary stream owns one endpoint and one background sender
//! task. The task pulls assembled packets off a bounded queue, paces
//! them by decoding timestamp, applies SRTP when configured, and writes
//! every packet to every attached sink. A sink whose socket reports a
//! hard error is dropped without disturbing the others.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::TransportProto;

use super::packet::OutboundPacket;
use super::rtcp::RtcpSender;
use super::srtp::SrtpSession;

const IPPROTO_UDPLITE: i32 = 136;
const SOCK_DCCP: i32 = 6;
const IPPROTO_DCCP: i32 = 33;

enum SinkSocket {
    Udp {
        rtp: UdpSocket,
        /// Separate RTCP socket; `None` under rtcp-mux
        rtcp: Option<UdpSocket>,
    },
    Tcp(TcpStream),
}

struct Sink {
    id: u64,
    socket: SinkSocket,
    rtcp: Option<RtcpSender>,
}

impl Sink {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.socket {
            SinkSocket::Udp { rtp, .. } => {
                rtp.send(data).await?;
                Ok(())
            }
            SinkSocket::Tcp(stream) => stream.write_all(data).await,
        }
    }

    async fn send_rtcp(&mut self, report: &[u8]) -> io::Result<()> {
        match &mut self.socket {
            SinkSocket::Udp { rtp, rtcp } => {
                let socket = rtcp.as_ref().unwrap_or(rtp);
                socket.send(report).await?;
                Ok(())
            }
            SinkSocket::Tcp(stream) => stream.write_all(report).await,
        }
    }
}

/// Shared sink registry for one elementary stream
pub(super) struct Endpoint {
    sinks: Mutex<Vec<Sink>>,
    listener: Option<TcpListener>,
    proto: TransportProto,
    rtp_port: u16,
    ttl: Option<u32>,
    ssrc: [u8; 4],
    cname: String,
    /// RTCP is suppressed under SRTP since reports go out in the clear
    rtcp_enabled: bool,
    rtcp_mux: bool,
    next_id: AtomicU64,
}

impl Endpoint {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        listener: Option<TcpListener>,
        proto: TransportProto,
        rtp_port: u16,
        ttl: Option<u32>,
        ssrc: [u8; 4],
        cname: String,
        rtcp_enabled: bool,
        rtcp_mux: bool,
    ) -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            listener,
            proto,
            rtp_port,
            ttl,
            ssrc,
            cname,
            rtcp_enabled,
            rtcp_mux,
            next_id: AtomicU64::new(0),
        }
    }

    fn new_rtcp_state(&self) -> Option<RtcpSender> {
        self.rtcp_enabled
            .then(|| RtcpSender::new(self.ssrc, self.cname.clone()))
    }

    /// Attach a datagram sink sending to `destination`
    ///
    /// The socket binds the stream's advertised RTP port so receivers
    /// see the expected source port; the companion RTCP socket binds
    /// the next port up unless RTCP is multiplexed.
    pub(super) async fn add_udp_sink(&self, destination: SocketAddr) -> io::Result<()> {
        let rtp = self.bound_datagram(self.rtp_port, destination)?;
        let rtcp = if self.rtcp_enabled && !self.rtcp_mux {
            let mut rtcp_dest = destination;
            rtcp_dest.set_port(destination.port().wrapping_add(1));
            Some(self.bound_datagram(self.rtp_port.wrapping_add(1), rtcp_dest)?)
        } else {
            None
        };

        let sink = Sink {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            socket: SinkSocket::Udp { rtp, rtcp },
            rtcp: self.new_rtcp_state(),
        };
        debug!(sink = sink.id, %destination, "RTP sink attached");
        self.sinks.lock().await.push(sink);
        Ok(())
    }

    /// Attach an already-connected stream sink (COMEDIA accept or test
    /// harness)
    pub(super) async fn add_stream_sink(&self, stream: TcpStream) {
        let sink = Sink {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            socket: SinkSocket::Tcp(stream),
            rtcp: self.new_rtcp_state(),
        };
        debug!(sink = sink.id, "stream sink attached");
        self.sinks.lock().await.push(sink);
    }

    pub(super) async fn sink_count(&self) -> usize {
        self.sinks.lock().await.len()
    }

    fn bound_datagram(&self, local_port: u16, destination: SocketAddr) -> io::Result<UdpSocket> {
        let domain = if destination.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let protocol = match self.proto {
            TransportProto::UdpLite => Protocol::from(IPPROTO_UDPLITE),
            _ => Protocol::UDP,
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
        socket.set_reuse_address(true)?;
        // Several streams and sinks may share one advertised source port
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        if let Some(ttl) = self.ttl {
            if destination.ip().is_multicast() {
                socket.set_multicast_ttl_v4(ttl)?;
            } else {
                socket.set_ttl(ttl)?;
            }
        }

        let local: SocketAddr = if destination.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, local_port).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, local_port).into()
        };
        socket.bind(&local.into())?;
        socket.connect(&destination.into())?;
        UdpSocket::from_std(socket.into())
    }
}

/// Create the passive listener for COMEDIA transports
///
/// TCP uses a plain stream socket; DCCP is connection oriented too, so
/// the same accept loop drives it with the DCCP type and protocol.
pub(super) fn comedia_listener(proto: TransportProto, port: u16) -> io::Result<TcpListener> {
    let (ty, protocol) = match proto {
        TransportProto::Dccp => (Type::from(SOCK_DCCP), Protocol::from(IPPROTO_DCCP)),
        _ => (Type::STREAM, Protocol::TCP),
    };

    let socket = Socket::new(Domain::IPV4, ty, Some(protocol))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    let local: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&local.into())?;
    socket.listen(1)?;
    TcpListener::from_std(socket.into())
}

/// Per-stream sender loop
///
/// Runs until the stream is closed (shutdown signal or queue sender
/// dropped), then sends RTCP BYE to every sink and releases them.
pub(super) async fn sender_loop(
    mut queue: mpsc::Receiver<OutboundPacket>,
    mut shutdown: watch::Receiver<bool>,
    endpoint: Arc<Endpoint>,
    mut srtp: Option<SrtpSession>,
    caching: Duration,
) {
    let epoch = Instant::now();

    loop {
        let packet = tokio::select! {
            _ = shutdown.changed() => break,
            packet = queue.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        // Hold each packet back until its decoding time plus the
        // configured buffering delay
        let deadline = epoch + caching + Duration::from_micros(packet.dts.max(0) as u64);
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep_until(deadline) => {}
        }

        accept_pending(&endpoint).await;

        let mut data = packet.data;
        if let Some(context) = srtp.as_mut() {
            if let Err(error) = context.protect(&mut data) {
                warn!(%error, "dropping packet that failed SRTP protection");
                continue;
            }
        }

        fan_out(&endpoint, &data).await;
    }

    let mut sinks = endpoint.sinks.lock().await;
    for mut sink in sinks.drain(..) {
        let bye = sink.rtcp.as_ref().map(RtcpSender::bye);
        if let Some(bye) = bye {
            let _ = sink.send_rtcp(&bye).await;
        }
    }
}

/// Pick up any receivers that connected to the passive listener
async fn accept_pending(endpoint: &Endpoint) {
    let Some(listener) = &endpoint.listener else {
        return;
    };
    while let Some(Ok((stream, peer))) = listener.accept().now_or_never() {
        debug!(%peer, "passive RTP peer connected");
        endpoint.add_stream_sink(stream).await;
    }
}

/// Write one packet to every sink, dropping the ones that died
async fn fan_out(endpoint: &Endpoint, data: &[u8]) {
    let mut sinks = endpoint.sinks.lock().await;
    let mut dead = Vec::new();

    for (index, sink) in sinks.iter_mut().enumerate() {
        let report = sink.rtcp.as_mut().and_then(|state| state.account(data));
        if let Some(report) = report {
            let _ = sink.send_rtcp(&report).await;
        }

        if let Err(error) = sink.send(data).await {
            match error.kind() {
                // Transient route errors: one blind resend, the packet
                // is stale by the time a second retry could matter
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::HostUnreachable
                | io::ErrorKind::NetworkUnreachable
                | io::ErrorKind::NetworkDown => {
                    let _ = sink.send(data).await;
                }
                // Local resource pressure: drop this packet silently
                io::ErrorKind::WouldBlock | io::ErrorKind::OutOfMemory => {}
                _ => {
                    warn!(sink = sink.id, %error, "RTP sink failed");
                    dead.push(index);
                }
            }
        }
    }

    for index in dead.into_iter().rev() {
        let sink = sinks.remove(index);
        debug!(sink = sink.id, "dead RTP sink removed");
    }
}
