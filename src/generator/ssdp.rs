//! SSDP discovery/notify request generation.
//!
//! Unlike SOAP and eventing, SSDP needs no remote grammar bootstrap: both
//! request shapes are self-contained HTTP-over-UDP templates addressed at
//! a fixed `host:port`.

use rand::RngCore;
use rand::Rng;

use super::Slots;

/// Realistic `USER-AGENT` values drawn uniformly for every SSDP request.
const USER_AGENTS: &[&str] = &[
    "Windows/10.0 UPnP/1.1 MyClient/1.0",
    "Linux/5.4 UPnP/1.1 VLC/3.0",
    "Android/11 UPnP/1.1 BubbleUPnP/3.5.4",
    "MacOS/12.3 UPnP/1.1 UPnP-Inspector/0.2",
    "IoTDevice/1.0 UPnP/1.1 GenericDevice/2.0",
    "Xbox/10.0 UPnP/1.1 XboxUPnP/1.0",
    "PrinterOS/2.1 UPnP/1.1 PrinterService/1.5",
    "CustomScript/1.0 UPnP/1.1 TestTool/1.2",
    "RouterOS/6.49 UPnP/1.1 MiniUPnPd/2.2.1",
    "SmartTV/1.0 UPnP/1.1 DLNADOC/1.50",
];

/// Candidate `ST:` header values for a search request.
const SEARCH_TARGETS: &[&str] = &["ssdp:all", "upnp:rootdevice"];

fn user_agent(rng: &mut dyn RngCore) -> Vec<u8> {
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())].as_bytes().to_vec()
}

fn mx(rng: &mut dyn RngCore) -> Vec<u8> {
    rng.gen_range(1..=5).to_string().into_bytes()
}

fn search_target(rng: &mut dyn RngCore) -> Vec<u8> {
    SEARCH_TARGETS[rng.gen_range(0..SEARCH_TARGETS.len())].as_bytes().to_vec()
}

/// An `M-SEARCH * HTTP/1.1` discovery request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    host: Vec<u8>,
    port: Vec<u8>,
}

impl SearchRequest {
    fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.as_bytes().to_vec(),
            port: port.to_string().into_bytes(),
        }
    }
}

impl Slots for SearchRequest {
    fn slots(&self, rng: &mut dyn RngCore) -> Vec<Vec<u8>> {
        vec![
            self.host.clone(),
            self.port.clone(),
            b"ssdp.discover".to_vec(),
            mx(rng),
            search_target(rng),
            user_agent(rng),
        ]
    }

    fn finalize(&self, slots: &[Vec<u8>]) -> Vec<u8> {
        let [host, port, man, mx, st, user_agent] = slots else {
            panic!("SearchRequest expects exactly 6 slots");
        };
        let mut out = Vec::new();
        out.extend_from_slice(b"M-SEARCH * HTTP/1.1\r\n");
        out.extend_from_slice(b"HOST: ");
        out.extend_from_slice(host);
        out.push(b':');
        out.extend_from_slice(port);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"MAN: \"");
        out.extend_from_slice(man);
        out.extend_from_slice(b"\"\r\n");
        out.extend_from_slice(b"MX: ");
        out.extend_from_slice(mx);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"ST: ");
        out.extend_from_slice(st);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"USER-AGENT: ");
        out.extend_from_slice(user_agent);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }
}

/// A `NOTIFY * HTTP/1.1` advertisement request.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    host: Vec<u8>,
    port: Vec<u8>,
}

impl NotifyRequest {
    fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.as_bytes().to_vec(),
            port: port.to_string().into_bytes(),
        }
    }
}

impl Slots for NotifyRequest {
    fn slots(&self, rng: &mut dyn RngCore) -> Vec<Vec<u8>> {
        vec![
            self.host.clone(),
            self.port.clone(),
            b"upnp:rootdevice".to_vec(),
            b"ssdp:alive".to_vec(),
            b"uuid:device-UUID::upnp:rootdevice".to_vec(),
            b"http://192.168.1.2:80/device.xml".to_vec(),
            b"max-age=1800".to_vec(),
            user_agent(rng),
            b"1".to_vec(),
            b"1337".to_vec(),
        ]
    }

    fn finalize(&self, slots: &[Vec<u8>]) -> Vec<u8> {
        let [host, port, nt, nts, usn, location, cache_control, server, bootid, configid] = slots
        else {
            panic!("NotifyRequest expects exactly 10 slots");
        };
        let mut out = Vec::new();
        out.extend_from_slice(b"NOTIFY * HTTP/1.1\r\n");
        out.extend_from_slice(b"HOST: ");
        out.extend_from_slice(host);
        out.push(b':');
        out.extend_from_slice(port);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"NT: ");
        out.extend_from_slice(nt);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"NTS: ");
        out.extend_from_slice(nts);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"USN: ");
        out.extend_from_slice(usn);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"LOCATION: ");
        out.extend_from_slice(location);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"CACHE-CONTROL: ");
        out.extend_from_slice(cache_control);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"SERVER: ");
        out.extend_from_slice(server);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"BOOTID.UPNP.ORG: ");
        out.extend_from_slice(bootid);
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"CONFIGID.UPNP.ORG: ");
        out.extend_from_slice(configid);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }
}

/// Either of the two SSDP request shapes, chosen uniformly by
/// [`Generator::request`].
#[derive(Debug, Clone)]
pub enum Request {
    Search(SearchRequest),
    Notify(NotifyRequest),
}

impl Slots for Request {
    fn slots(&self, rng: &mut dyn RngCore) -> Vec<Vec<u8>> {
        match self {
            Request::Search(r) => r.slots(rng),
            Request::Notify(r) => r.slots(rng),
        }
    }

    fn finalize(&self, slots: &[Vec<u8>]) -> Vec<u8> {
        match self {
            Request::Search(r) => r.finalize(slots),
            Request::Notify(r) => r.finalize(slots),
        }
    }
}

/// Produces SSDP requests addressed at a fixed `host:port`.
#[derive(Debug, Clone)]
pub struct Generator {
    host: String,
    port: u16,
}

impl Generator {
    /// The generator name reported in stats and crash file names.
    pub const NAME: &'static str = "ssdp";

    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// A uniformly random Search or Notify request, not yet filled with
    /// slot values.
    pub fn request(&self, rng: &mut dyn RngCore) -> Request {
        if rng.gen_bool(0.5) {
            Request::Search(SearchRequest::new(&self.host, self.port))
        } else {
            Request::Notify(NotifyRequest::new(&self.host, self.port))
        }
    }

    /// The standing multicast `M-SEARCH` used for device discovery.
    pub fn multicast_request(rng: &mut dyn RngCore) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"M-SEARCH * HTTP/1.1\r\n");
        out.extend_from_slice(b"HOST: 239.255.255.250:1900\r\n");
        out.extend_from_slice(b"MAN: \"ssdp:discover\"\r\n");
        out.extend_from_slice(b"MX: 1\r\n");
        out.extend_from_slice(b"ST: ssdp:all\r\n");
        out.extend_from_slice(b"USER-AGENT: ");
        out.extend_from_slice(&user_agent(rng));
        out.extend_from_slice(b"\r\n\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn search_request_finalizes_to_well_formed_header_block() {
        let req = SearchRequest::new("192.168.1.1", 1900);
        let mut rng = StdRng::seed_from_u64(1);
        let slots = req.slots(&mut rng);
        let bytes = req.finalize(&slots);
        let text = String::from_utf8(bytes).expect("ascii headers");
        assert!(text.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(text.contains("HOST: 192.168.1.1:1900\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn notify_request_finalizes_to_well_formed_header_block() {
        let req = NotifyRequest::new("192.168.1.1", 1900);
        let mut rng = StdRng::seed_from_u64(2);
        let slots = req.slots(&mut rng);
        let bytes = req.finalize(&slots);
        let text = String::from_utf8(bytes).expect("ascii headers");
        assert!(text.starts_with("NOTIFY * HTTP/1.1\r\n"));
        assert!(text.contains("NTS: ssdp:alive\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn mx_is_always_in_declared_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let bytes = mx(&mut rng);
            let n: u32 = String::from_utf8(bytes).unwrap().parse().unwrap();
            assert!((1..=5).contains(&n));
        }
    }

    #[test]
    fn multicast_request_targets_standard_rendezvous_and_discovers() {
        let mut rng = StdRng::seed_from_u64(4);
        let bytes = Generator::multicast_request(&mut rng);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(text.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(text.contains("MX: 1\r\n"));
        assert!(text.contains("ST: ssdp:all\r\n"));
    }
}
