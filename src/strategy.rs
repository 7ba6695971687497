//! Per-protocol strategy dispatch: combines a protocol's grammar with one
//! of the built-in mutators or the external mutator adapter to produce
//! final wire bytes.
//!
//! SSDP and eventing requests share a single shape (`slots()`/`finalize()`
//! via [`crate::generator::Slots`]), so [`raw`], [`radamsa`], [`injection`],
//! and [`overflow`] are generic over that trait and serve both protocols.
//! SOAP's two-part header/body shape needs its own functions because the
//! header slots depend on the finalized body's length; those live under
//! the `soap` submodule.

use rand::RngCore;
use rand::Rng;

use crate::fuzzers::{injection, overflow};
use crate::generator::Slots;
use crate::mutator::{self, ExternalMutator};

/// Which strategy produced a given request, reported to the display and
/// encoded into crash file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Raw,
    All,
    Radamsa,
    Injection,
    Overflow,
}

impl Strategy {
    /// The lowercase tag used in crash file names and display output,
    /// matching the reference implementation's `Strategy` enum values.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Raw => "raw",
            Strategy::All => "all",
            Strategy::Radamsa => "radamsa",
            Strategy::Injection => "injection",
            Strategy::Overflow => "overflow",
        }
    }
}

/// The three concrete (non-meta) strategies the `ALL` meta-strategy picks
/// uniformly between on every iteration.
const ALL_CHOICES: [Strategy; 3] = [Strategy::Radamsa, Strategy::Injection, Strategy::Overflow];

/// Picks the concrete strategy an `ALL`-selected iteration actually uses.
#[must_use]
pub fn pick_all_strategy(rng: &mut dyn RngCore) -> Strategy {
    ALL_CHOICES[rng.gen_range(0..ALL_CHOICES.len())]
}

/// Builds `request` and finalizes it unmodified.
pub fn raw<T: Slots>(request: &T, rng: &mut dyn RngCore) -> Vec<u8> {
    let slots = request.slots(rng);
    request.finalize(&slots)
}

/// Builds and finalizes `request`, then passes the whole byte string
/// through the external mutator.
pub fn radamsa<T: Slots>(
    request: &T,
    rng: &mut dyn RngCore,
    mutator: &ExternalMutator,
) -> Result<Vec<u8>, mutator::Error> {
    let bytes = raw(request, rng);
    mutator.fuzz(&bytes)
}

/// Mutates `request`'s slot list via command-injection augmentation, then
/// finalizes the mutated slots.
pub fn apply_injection<T: Slots>(request: &T, rng: &mut dyn RngCore) -> Vec<u8> {
    let slots = request.slots(rng);
    let mutated = injection::mutate(&slots, rng);
    request.finalize(&mutated)
}

/// Mutates `request`'s slot list via overflow expansion, then finalizes
/// the mutated slots.
pub fn apply_overflow<T: Slots>(request: &T, rng: &mut dyn RngCore) -> Vec<u8> {
    let slots = request.slots(rng);
    let mutated = overflow::mutate(&slots, rng);
    request.finalize(&mutated)
}

/// SOAP-specific dispatch: unlike [`raw`]/[`radamsa`]/[`apply_injection`]/
/// [`apply_overflow`], every function here handles the header/body split
/// and the content-length rebinding that follow from it.
pub mod soap {
    use super::{injection, overflow, mutator, ExternalMutator, RngCore, Rng};
    use crate::generator::soap::Request;
    use crate::generator::Slots;

    /// Builds the body, binds the headers to its length, and finalizes
    /// both unmodified.
    pub fn raw(request: &Request, rng: &mut dyn RngCore) -> Vec<u8> {
        let (header_bytes, body_bytes) = finalize_unmutated(request, rng);
        [header_bytes, body_bytes].concat()
    }

    /// With probability 0.5 (and only when the body is non-empty), mutates
    /// the finalized body via the external mutator and rebuilds headers
    /// against its new length; otherwise binds headers to the unmutated
    /// body length, then mutates only the headers.
    pub fn radamsa(
        request: &Request,
        rng: &mut dyn RngCore,
        mutator: &ExternalMutator,
    ) -> Result<Vec<u8>, mutator::Error> {
        let body = request.body();
        let body_slots = body.slots(rng);
        let body_bytes = body.finalize(&body_slots);

        if !body_bytes.is_empty() && rng.gen_bool(0.5) {
            let mutated_body = mutator.fuzz(&body_bytes)?;
            let header_bytes = finalize_headers(request, rng, mutated_body.len());
            Ok([header_bytes, mutated_body].concat())
        } else {
            let header_bytes = finalize_headers(request, rng, body_bytes.len());
            let mutated_headers = mutator.fuzz(&header_bytes)?;
            Ok([mutated_headers, body_bytes].concat())
        }
    }

    /// With the same 0.5 coin as [`radamsa`], mutates either the body
    /// slots or the header slots via command-injection augmentation.
    pub fn apply_injection(request: &Request, rng: &mut dyn RngCore) -> Vec<u8> {
        mutate_one_side(request, rng, injection::mutate)
    }

    /// With the same 0.5 coin as [`radamsa`], mutates either the body
    /// slots or the header slots via overflow expansion.
    pub fn apply_overflow(request: &Request, rng: &mut dyn RngCore) -> Vec<u8> {
        mutate_one_side(request, rng, overflow::mutate)
    }

    fn mutate_one_side(
        request: &Request,
        rng: &mut dyn RngCore,
        mutate: impl Fn(&[Vec<u8>], &mut dyn RngCore) -> Vec<Vec<u8>>,
    ) -> Vec<u8> {
        let body = request.body();
        let body_slots = body.slots(rng);

        if !body_slots.is_empty() && rng.gen_bool(0.5) {
            let mutated_body_slots = mutate(&body_slots, rng);
            let body_bytes = body.finalize(&mutated_body_slots);
            let header_bytes = finalize_headers(request, rng, body_bytes.len());
            [header_bytes, body_bytes].concat()
        } else {
            let body_bytes = body.finalize(&body_slots);
            let headers = request.headers(body_bytes.len());
            let header_slots = headers.slots(rng);
            let mutated_header_slots = mutate(&header_slots, rng);
            let header_bytes = headers.finalize(&mutated_header_slots);
            [header_bytes, body_bytes].concat()
        }
    }

    fn finalize_unmutated(request: &Request, rng: &mut dyn RngCore) -> (Vec<u8>, Vec<u8>) {
        let body = request.body();
        let body_slots = body.slots(rng);
        let body_bytes = body.finalize(&body_slots);
        let header_bytes = finalize_headers(request, rng, body_bytes.len());
        (header_bytes, body_bytes)
    }

    fn finalize_headers(request: &Request, rng: &mut dyn RngCore, content_length: usize) -> Vec<u8> {
        let headers = request.headers(content_length);
        let header_slots = headers.slots(rng);
        headers.finalize(&header_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ssdp;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn all_strategy_always_picks_a_concrete_non_meta_strategy() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let picked = pick_all_strategy(&mut rng);
            assert_ne!(picked, Strategy::Raw);
            assert_ne!(picked, Strategy::All);
        }
    }

    #[test]
    fn raw_ssdp_request_is_well_formed() {
        let generator = ssdp::Generator::new("192.168.1.1", 1900);
        let mut rng = StdRng::seed_from_u64(2);
        let request = generator.request(&mut rng);
        let bytes = raw(&request, &mut rng);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn injection_preserves_finalizability() {
        let generator = ssdp::Generator::new("192.168.1.1", 1900);
        let mut rng = StdRng::seed_from_u64(3);
        let request = generator.request(&mut rng);
        let bytes = apply_injection(&request, &mut rng);
        assert!(!bytes.is_empty());
    }
}
