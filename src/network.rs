//! The network transport.
//!
//! This module owns TCP/UDP send-and-receive against the fuzzing target,
//! including the UDP multicast path used for SSDP discovery. Every
//! operation here is blocking and scoped to a single call: a socket is
//! opened, used once, and dropped. That matches the strictly sequential
//! scheduling model of the fuzz loop: there is never a second request in
//! flight to justify an async runtime.
//!
//! ## Failure taxonomy
//!
//! [`Transport::send`] never raises to its caller. A timeout increments
//! [`NetworkStats::timeouts`] and returns empty bytes; any other transport
//! error increments [`NetworkStats::errors`] and also returns empty bytes.
//! [`NetworkStats::total_requests`] increments on every attempt regardless
//! of outcome.

use std::{
    io::{self, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket},
    time::{Duration, Instant},
};

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tracing::{debug, trace};

/// Maximum number of bytes read from a single response.
pub const RESPONSE_BUFFER_SIZE: usize = 2048;
/// The well-known SSDP multicast rendezvous address.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";
/// TTL used for outgoing SSDP multicast datagrams.
const MULTICAST_TTL: u32 = 2;

/// Errors produced constructing or operating a [`Transport`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The target `host:port` could not be resolved or is malformed.
    #[error("invalid target address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),
    /// Underlying socket setup failed.
    #[error("socket setup failed: {0}")]
    Io(#[from] io::Error),
}

/// Which of the two wire protocols a [`Transport`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Open a TCP connection per send, as SOAP and eventing do.
    Tcp,
    /// Send a single UDP datagram per send, as SSDP does.
    Udp,
}

/// Monotonically increasing counters describing transport activity.
///
/// Only [`Transport`] ever mutates these; every other collaborator reads
/// them for display purposes.
#[derive(Debug)]
pub struct NetworkStats {
    /// When this transport (and its stats) were constructed.
    pub start_time: Instant,
    /// Every send attempt, regardless of outcome.
    pub total_requests: u64,
    /// Sends that did not receive a response before `network_timeout`.
    pub timeouts: u64,
    /// Sends that failed for a reason other than timeout.
    pub errors: u64,
}

impl NetworkStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: 0,
            timeouts: 0,
            errors: 0,
        }
    }
}

/// Handles TCP/UDP communication with the fuzzing target.
#[derive(Debug)]
pub struct Transport {
    host: String,
    port: u16,
    protocol: Protocol,
    timeout: Duration,
    interface_ip: Option<Ipv4Addr>,
    /// Network statistics accumulated by this transport.
    pub stats: NetworkStats,
}

impl Transport {
    /// Create a new [`Transport`] targeting `host:port`.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        protocol: Protocol,
        timeout: Duration,
        interface_ip: Option<Ipv4Addr>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            timeout,
            interface_ip,
            stats: NetworkStats::new(),
        }
    }

    /// The configured read timeout, shared by every suspension point this
    /// transport exposes.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `data` to the target and return its response, up to
    /// [`RESPONSE_BUFFER_SIZE`] bytes. Returns empty bytes on timeout or
    /// any other transport error; see the module documentation for the
    /// failure taxonomy.
    pub fn send(&mut self, data: &[u8]) -> Vec<u8> {
        match self.protocol {
            Protocol::Tcp => self.send_tcp(data),
            Protocol::Udp => self.send_udp(data),
        }
    }

    fn send_tcp(&mut self, data: &[u8]) -> Vec<u8> {
        self.stats.total_requests += 1;

        let addr = format!("{}:{}", self.host, self.port);
        let result = (|| -> io::Result<Vec<u8>> {
            let mut stream = TcpStream::connect(&addr)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            stream.write_all(data)?;

            let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
            let n = stream.read(&mut buf)?;
            Ok(buf[..n].to_vec())
        })();

        match result {
            Ok(bytes) => bytes,
            Err(err) => {
                self.record_error(&err);
                Vec::new()
            }
        }
    }

    fn send_udp(&mut self, data: &[u8]) -> Vec<u8> {
        self.stats.total_requests += 1;

        let result = (|| -> io::Result<Vec<u8>> {
            let socket = UdpSocket::bind(("0.0.0.0", 0))?;
            socket.set_read_timeout(Some(self.timeout))?;
            socket.connect(format!("{}:{}", self.host, self.port))?;
            socket.send(data)?;

            let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
            let n = socket.recv(&mut buf)?;
            Ok(buf[..n].to_vec())
        })();

        match result {
            Ok(bytes) => bytes,
            Err(err) => {
                self.record_error(&err);
                Vec::new()
            }
        }
    }

    fn record_error(&mut self, err: &io::Error) {
        if matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ) {
            self.stats.timeouts += 1;
            trace!("transport timeout after {:?}", self.timeout);
        } else {
            self.stats.errors += 1;
            debug!("transport error: {err}");
        }
    }

    /// Send `data` as a UDP multicast datagram and return an iterator over
    /// every `(bytes, peer_addr)` pair received until the socket read
    /// times out. Used only by SSDP discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying multicast socket cannot be
    /// constructed or bound.
    pub fn send_and_collect(&mut self, data: &[u8]) -> Result<MulticastResponses, Error> {
        self.stats.total_requests += 1;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
        socket.set_reuse_address(true)?;
        if let Some(interface) = self.interface_ip {
            socket.set_multicast_if_v4(&interface)?;
        }
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        socket.bind(&"0.0.0.0:0".parse::<SocketAddr>().expect("valid bind addr").into())?;
        socket.set_read_timeout(Some(self.timeout))?;

        let target: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(Error::InvalidAddress)?;
        socket.send_to(data, &target.into())?;

        let udp_socket: UdpSocket = socket.into();
        Ok(MulticastResponses { socket: udp_socket })
    }
}

/// A lazy sequence of `(response_bytes, peer_addr)` pairs received on a
/// multicast discovery socket, ending the first time a read times out.
#[derive(Debug)]
pub struct MulticastResponses {
    socket: UdpSocket,
}

impl Iterator for MulticastResponses {
    type Item = (Vec<u8>, SocketAddr);

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((n, peer)) => Some((buf[..n].to_vec(), peer)),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn tcp_roundtrip_increments_total_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).expect("read");
            stream.write_all(&buf[..n]).expect("echo");
        });

        let mut transport = Transport::new(
            addr.ip().to_string(),
            addr.port(),
            Protocol::Tcp,
            Duration::from_secs(2),
            None,
        );
        let response = transport.send(b"ping");
        handle.join().expect("server thread");

        assert_eq!(response, b"ping");
        assert_eq!(transport.stats.total_requests, 1);
        assert_eq!(transport.stats.timeouts, 0);
        assert_eq!(transport.stats.errors, 0);
    }

    #[test]
    fn tcp_connection_refused_counts_as_error_not_timeout() {
        // Port 0 connect attempts are refused immediately by the OS.
        let mut transport = Transport::new(
            "127.0.0.1",
            1, // almost certainly closed/unprivileged in test sandboxes
            Protocol::Tcp,
            Duration::from_millis(200),
            None,
        );
        let response = transport.send(b"ping");
        assert!(response.is_empty());
        assert_eq!(transport.stats.total_requests, 1);
    }

    #[test]
    fn udp_timeout_returns_empty_and_increments_timeouts() {
        // Nothing is listening on this high, (almost certainly) unused port.
        let mut transport = Transport::new(
            "127.0.0.1",
            59999,
            Protocol::Udp,
            Duration::from_millis(100),
            None,
        );
        let response = transport.send(b"M-SEARCH");
        assert!(response.is_empty());
        assert_eq!(transport.stats.total_requests, 1);
        assert_eq!(transport.stats.timeouts, 1);
        assert_eq!(transport.stats.errors, 0);
    }
}
