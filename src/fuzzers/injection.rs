//! Command-injection payload augmentation.

use rand::Rng;

/// The command token every injection payload carries. Fixed, as in the
/// source: the goal is to detect whether *any* shell/command context is
/// reachable, not to actually reboot anything.
const COMMAND: &[u8] = b"reboot";

/// Enclosure pairs an injection payload may be wrapped in.
const ENCLOSURES: &[(&[u8], &[u8])] = &[
    (b"", b""),
    (b"`", b"`"),
    (b"$(", b")"),
    (b";", b";"),
    (b"|", b""),
];

/// Delimiter bytes appended after the enclosed command, 0–6 of them drawn
/// in two independent passes of 0–3 choices each.
const DELIMITERS: &[&[u8]] = &[
    b"", b"`", b";", b"\"", b"'", b"|", b"&", b"&&", b")", b"\r", b"\n", b"%0a", b"%0d",
];

/// Appends a command-injection payload to exactly one randomly chosen slot.
///
/// Returns a new slot list of the same length as `slots`, with every slot
/// except the chosen one left byte-identical to the input.
pub fn mutate<R: Rng + ?Sized>(slots: &[Vec<u8>], rng: &mut R) -> Vec<Vec<u8>> {
    assert!(!slots.is_empty(), "cannot inject into an empty slot list");

    let idx = rng.gen_range(0..slots.len());
    let injection = injection_payload(rng);

    let mut mutated = slots.to_vec();
    mutated[idx].extend_from_slice(&injection);
    mutated
}

fn injection_payload<R: Rng + ?Sized>(rng: &mut R) -> Vec<u8> {
    let (left, right) = ENCLOSURES[rng.gen_range(0..ENCLOSURES.len())];

    let mut payload = Vec::with_capacity(COMMAND.len() + left.len() + right.len());
    payload.extend_from_slice(left);
    payload.extend_from_slice(COMMAND);
    payload.extend_from_slice(right);

    add_delimiters(&mut payload, rng);
    add_delimiters(&mut payload, rng);

    payload
}

fn add_delimiters<R: Rng + ?Sized>(payload: &mut Vec<u8>, rng: &mut R) {
    let count = rng.gen_range(0..=3);
    for _ in 0..count {
        payload.extend_from_slice(DELIMITERS[rng.gen_range(0..DELIMITERS.len())]);
    }
}
