//! Status display.
//!
//! The reference implementation redraws a box-drawn terminal UI every
//! iteration. Per spec §6 the display collaborator is explicitly scoped
//! down to a plain, line-oriented status printer, not a TUI framework: it
//! receives the same facts (network stats, crash count, generator name,
//! selected/current strategy, request/response bytes) and prints them as
//! one line of stats plus two truncated previews.

use crate::network::NetworkStats;
use crate::strategy::Strategy;

/// Request/response previews are truncated to this many bytes, matching
/// the reference implementation's `MAX_REQUEST_RESPONSE_SIZE`.
const MAX_PREVIEW_BYTES: usize = 2048;

/// Prints a redraw-per-iteration status summary to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct Display;

impl Display {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Prints the one-line startup banner.
    pub fn print_banner(&self) {
        println!(
            "upnpfuzz v{} — protocol-aware UPnP fuzzer",
            env!("CARGO_PKG_VERSION")
        );
    }

    /// Prints one line summarizing network stats, crash count, and
    /// strategy selection for the iteration about to run.
    pub fn print_stats(
        &self,
        stats: &NetworkStats,
        crashes: u64,
        generator_name: &str,
        selected_strategy: Strategy,
        current_strategy: Strategy,
    ) {
        let elapsed = stats.start_time.elapsed().as_secs();
        let speed = if elapsed > 0 {
            stats.total_requests / elapsed
        } else {
            0
        };
        println!(
            "[{generator_name}] selected={} current={} requests={} timeouts={} errors={} crashes={crashes} speed={speed}/s elapsed={elapsed}s",
            selected_strategy.as_str(),
            current_strategy.as_str(),
            stats.total_requests,
            stats.timeouts,
            stats.errors,
        );
    }

    /// Prints a truncated preview of the outgoing request.
    pub fn print_request(&self, request: &[u8]) {
        println!("--- request ---");
        println!("{}", preview(request));
    }

    /// Prints a truncated preview of the incoming response.
    pub fn print_response(&self, response: &[u8]) {
        println!("--- response ---");
        println!("{}", preview(response));
    }
}

/// Renders `data` (truncated to [`MAX_PREVIEW_BYTES`]) as UTF-8 text if
/// possible, falling back to a `Debug` rendering of the raw bytes (the
/// same best-effort fallback the reference implementation uses).
fn preview(data: &[u8]) -> String {
    let truncated = &data[..data.len().min(MAX_PREVIEW_BYTES)];
    match std::str::from_utf8(truncated) {
        Ok(text) => text.to_string(),
        Err(_) => format!("{truncated:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_renders_valid_utf8_verbatim() {
        assert_eq!(preview(b"GET / HTTP/1.1\r\n"), "GET / HTTP/1.1\r\n");
    }

    #[test]
    fn preview_falls_back_to_debug_bytes_for_non_utf8() {
        let data = [0xffu8, 0xfe, 0x00];
        let rendered = preview(&data);
        assert!(rendered.contains("255"));
    }

    #[test]
    fn preview_truncates_to_the_configured_budget() {
        let data = vec![b'A'; MAX_PREVIEW_BYTES + 500];
        let rendered = preview(&data);
        assert_eq!(rendered.len(), MAX_PREVIEW_BYTES);
    }
}
