//! One-shot SSDP multicast device discovery (`--discover`).
//!
//! Distinct from the fuzz loop: a single multicast `M-SEARCH` is sent and
//! unique responses (deduplicated by `LOCATION`) are collected until the
//! socket read times out.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::RngCore;
use regex::bytes::Regex;
use tracing::info;

use crate::generator::ssdp;
use crate::network::{self, Protocol, Transport, SSDP_MULTICAST_ADDR};

/// Errors issuing the multicast discovery probe.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The multicast socket could not be constructed.
    #[error(transparent)]
    Network(#[from] network::Error),
}

/// A uniquely discovered device, keyed by its `LOCATION` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub addr: SocketAddr,
    pub location: String,
    pub server: String,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {} — {}", self.addr, self.location, self.server)
    }
}

/// Sends one multicast `M-SEARCH` and collects every uniquely-located
/// response until the socket read times out.
pub fn discover(
    timeout: Duration,
    interface_ip: Option<Ipv4Addr>,
    rng: &mut dyn RngCore,
) -> Result<Vec<Service>, Error> {
    let (host, port) = SSDP_MULTICAST_ADDR
        .rsplit_once(':')
        .expect("SSDP_MULTICAST_ADDR always has a port");
    let mut transport = Transport::new(
        host,
        port.parse().expect("SSDP_MULTICAST_ADDR port is numeric"),
        Protocol::Udp,
        timeout,
        interface_ip,
    );

    info!(?timeout, "discovering UPnP devices");
    let request = ssdp::Generator::multicast_request(rng);

    let mut services: Vec<Service> = Vec::new();
    for (data, addr) in transport.send_and_collect(&request)? {
        let location = extract_header(&data, "LOCATION").unwrap_or_default();
        let server = extract_header(&data, "SERVER").unwrap_or_default();

        if services.iter().any(|s| s.location == location) {
            continue;
        }

        let service = Service { addr, location, server };
        info!(%service, "discovered device");
        services.push(service);
    }

    Ok(services)
}

fn extract_header(data: &[u8], name: &str) -> Option<String> {
    let pattern = format!("{name}: (.*?)\r\n");
    let re = Regex::new(&pattern).expect("header pattern is a valid regex");
    let value = re.captures(data)?.get(1)?;
    Some(String::from_utf8_lossy(value.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_header_finds_value_and_stops_at_crlf() {
        let data = b"HTTP/1.1 200 OK\r\nLOCATION: http://192.168.1.1:80/device.xml\r\nSERVER: foo\r\n\r\n";
        assert_eq!(
            extract_header(data, "LOCATION").as_deref(),
            Some("http://192.168.1.1:80/device.xml")
        );
        assert_eq!(extract_header(data, "SERVER").as_deref(), Some("foo"));
    }

    #[test]
    fn extract_header_returns_none_when_absent() {
        let data = b"HTTP/1.1 200 OK\r\n\r\n";
        assert_eq!(extract_header(data, "LOCATION"), None);
    }

    #[test]
    fn service_display_matches_ip_port_location_server_format() {
        let service = Service {
            addr: "192.168.1.1:1900".parse().unwrap(),
            location: "http://192.168.1.1:80/device.xml".to_string(),
            server: "TestServer/1.0".to_string(),
        };
        assert_eq!(
            service.to_string(),
            "192.168.1.1:1900 — http://192.168.1.1:80/device.xml — TestServer/1.0"
        );
    }
}
