//! Shared data model and request-template abstraction for the three
//! protocol generators.
//!
//! Every request shape these generators produce (SSDP Search/Notify, SOAP
//! action invocation, eventing New/Renewal/Unsubscribe) is built the same
//! way: an ordered list of mutable parameter slots, and a finalize step
//! that interleaves those slots with literal framing bytes. The [`Slots`]
//! trait captures that shape once so `crate::strategy` can mutate any of
//! them uniformly without knowing which protocol it belongs to. SOAP's
//! two-part header/body shape is close enough to reuse the trait for each
//! part, but is still special-cased in `soap` because its header slots
//! depend on the finalized body's length.

pub mod esp;
pub mod soap;
pub mod ssdp;

/// A request template expressed as mutable parameter slots plus a way to
/// assemble the final wire bytes from them.
///
/// Implementors capture just enough fixed context (literal header names,
/// target host/port) to finalize; [`slots`](Slots::slots) returns the
/// subset of bytes a fuzzing strategy is allowed to mutate.
pub trait Slots {
    /// The parameter slots that strategies may mutate in place, in the
    /// exact order [`finalize`](Slots::finalize) expects them back. Takes
    /// an explicit RNG so every draw in a fuzzing run is reproducible
    /// from a single seed.
    fn slots(&self, rng: &mut dyn rand::RngCore) -> Vec<Vec<u8>>;

    /// Interleave `slots` with this request's literal framing bytes,
    /// producing the final wire bytes. `slots` need not be the same
    /// values returned by [`slots`](Slots::slots), only the same shape.
    fn finalize(&self, slots: &[Vec<u8>]) -> Vec<u8>;
}

/// Errors parsing a target URL or address.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The string was not a syntactically valid URL.
    #[error("invalid target url: {0}")]
    Url(#[from] url::ParseError),
    /// The URL (or `host:port` pair) was missing a host.
    #[error("target is missing a host")]
    MissingHost,
    /// The URL (or `host:port` pair) was missing a port.
    #[error("target is missing a port")]
    MissingPort,
}

/// Splits a description URL into `(base_url, host, port)`, where
/// `base_url` is `scheme://host:port` with no path.
pub fn parse_url(target: &str) -> Result<(String, String, u16), Error> {
    let parsed = url::Url::parse(target)?;
    let host = parsed.host_str().ok_or(Error::MissingHost)?.to_string();
    let port = parsed.port_or_known_default().ok_or(Error::MissingPort)?;
    let base_url = format!("{}://{}:{}", parsed.scheme(), host, port);
    Ok((base_url, host, port))
}

/// Splits a plain `host:port` pair (no scheme), as used for SSDP targets.
pub fn parse_host_port(target: &str) -> Result<(String, u16), Error> {
    let (host, port) = target.rsplit_once(':').ok_or(Error::MissingPort)?;
    let port: u16 = port.parse().map_err(|_| Error::MissingPort)?;
    if host.is_empty() {
        return Err(Error::MissingHost);
    }
    Ok((host.to_string(), port))
}

/// Ensures `path` starts with `/`, as device descriptions sometimes omit
/// the leading slash on relative URLs.
pub fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Resolves a (possibly relative) SCPD URL against a service's device
/// description `base_url`, mirroring the reference behavior: absolute
/// URLs (containing `://`) pass through untouched; relative ones are
/// slash-anchored and joined to `base_url`.
pub fn resolve_against_base(base_url: &str, maybe_relative: &str) -> String {
    if maybe_relative.contains("://") {
        maybe_relative.to_string()
    } else {
        format!("{base_url}{}", ensure_leading_slash(maybe_relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_splits_base_host_port() {
        let (base, host, port) = parse_url("http://192.168.1.1:8080/device.xml").unwrap();
        assert_eq!(base, "http://192.168.1.1:8080");
        assert_eq!(host, "192.168.1.1");
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_url_fills_default_http_port() {
        let (base, _, port) = parse_url("http://example.com/device.xml").unwrap();
        assert_eq!(port, 80);
        assert_eq!(base, "http://example.com:80");
    }

    #[test]
    fn parse_host_port_splits_ssdp_target() {
        let (host, port) = parse_host_port("239.255.255.250:1900").unwrap();
        assert_eq!(host, "239.255.255.250");
        assert_eq!(port, 1900);
    }

    #[test]
    fn ensure_leading_slash_is_idempotent() {
        assert_eq!(ensure_leading_slash("/scpd.xml"), "/scpd.xml");
        assert_eq!(ensure_leading_slash("scpd.xml"), "/scpd.xml");
    }

    #[test]
    fn resolve_against_base_passes_through_absolute_urls() {
        let resolved = resolve_against_base("http://x:80", "http://other/scpd.xml");
        assert_eq!(resolved, "http://other/scpd.xml");
    }

    #[test]
    fn resolve_against_base_joins_relative_urls() {
        let resolved = resolve_against_base("http://x:80", "scpd.xml");
        assert_eq!(resolved, "http://x:80/scpd.xml");
    }
}
