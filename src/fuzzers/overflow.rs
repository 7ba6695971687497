//! Buffer-overflow length expansion.
//!
//! The source drives this mutator from an undocumented `patterns` table;
//! per `DESIGN.md`, this implementation parameterizes the length
//! distribution explicitly as a table of buffer-boundary-adjacent lengths
//! plus a small jitter, rather than carrying the same opacity forward.

use rand::Rng;

/// Lengths at and around common buffer boundaries (powers of two minus one,
/// and the following power of two), the canonical targets for off-by-one
/// and boundary-check bugs.
const BOUNDARY_LENGTHS: &[usize] = &[
    7, 8, 15, 16, 31, 32, 63, 64, 127, 128, 255, 256, 511, 512, 1023, 1024, 2047, 2048, 4095,
    4096, 8191, 8192, 16383, 16384, 32767, 32768, 65535, 65536,
];

/// How far above/below a chosen boundary the generated length may land.
const JITTER: i64 = 4;

/// The ASCII byte the overflow pattern repeats.
const PATTERN_BYTE: u8 = b'A';

/// Replaces exactly one randomly chosen slot with a long run of
/// [`PATTERN_BYTE`], sized per [`overflow_length`].
///
/// Returns a new slot list of the same length as `slots`.
pub fn mutate<R: Rng + ?Sized>(slots: &[Vec<u8>], rng: &mut R) -> Vec<Vec<u8>> {
    assert!(!slots.is_empty(), "cannot overflow an empty slot list");

    let idx = rng.gen_range(0..slots.len());
    let length = overflow_length(rng);

    let mut mutated = slots.to_vec();
    mutated[idx] = vec![PATTERN_BYTE; length];
    mutated
}

/// Draw a length at or near one of [`BOUNDARY_LENGTHS`].
fn overflow_length<R: Rng + ?Sized>(rng: &mut R) -> usize {
    let boundary = BOUNDARY_LENGTHS[rng.gen_range(0..BOUNDARY_LENGTHS.len())] as i64;
    let jitter = rng.gen_range(-JITTER..=JITTER);
    (boundary + jitter).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn preserves_slot_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let slots = vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()];
        let mutated = mutate(&slots, &mut rng);
        assert_eq!(mutated.len(), slots.len());
    }

    #[test]
    fn exactly_one_slot_is_replaced_by_repeated_pattern() {
        let mut rng = StdRng::seed_from_u64(99);
        let slots = vec![b"host".to_vec(), b"port".to_vec(), b"ssdp:all".to_vec()];
        let mutated = mutate(&slots, &mut rng);

        let changed: Vec<usize> = (0..slots.len())
            .filter(|&i| mutated[i] != slots[i])
            .collect();
        assert_eq!(changed.len(), 1);

        let idx = changed[0];
        assert!(mutated[idx].iter().all(|&b| b == PATTERN_BYTE));
    }

    #[test]
    fn length_lands_near_a_documented_boundary() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let len = overflow_length(&mut rng) as i64;
            let nearest = BOUNDARY_LENGTHS
                .iter()
                .map(|&b| (b as i64 - len).abs())
                .min()
                .expect("non-empty boundary table");
            assert!(nearest <= JITTER);
        }
    }
}
