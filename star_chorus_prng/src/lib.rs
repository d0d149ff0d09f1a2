// Deterministic, portable pseudo-random number generator seeded from strings.
//
// Implements xorshift32 (Marsaglia, 2003) with an FNV-1a seed derivation over
// every byte of the seed string. This is a hand-rolled implementation with
// zero external dependencies, chosen for portability and to guarantee
// identical output across all platforms.
//
// This crate is the single PRNG used across Star Chorus: `star_chorus_music`
// (candidate jitter, plan shaping) and `star_chorus_compose` (mock astro
// summaries, control draws, template selection, mock audio latency). Every
// call path builds its own `SeededRng` from a string it derives itself (see
// `derive_seed`), so no generator state is ever shared between concerns or
// between concurrent requests.
//
// **Critical constraint: determinism.** Every method on `SeededRng` must
// produce identical output given the same seed string, regardless of platform,
// compiler version, or optimization level. Never seed from the wall clock or
// from OS entropy in this module.

use serde::{Deserialize, Serialize};

/// Fallback state used when a seed string hashes to zero. Xorshift never
/// leaves the all-zero state, so zero must not be used as a seed.
pub const DEFAULT_STATE: u32 = 0x9E37_79B9;

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Xorshift32 PRNG keyed by a seed string.
///
/// Two generators built from the same string produce identical infinite
/// streams. A single-character change anywhere in the string changes the
/// derived state and therefore the whole stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeededRng {
    state: u32,
}

impl SeededRng {
    /// Create a generator from a raw 32-bit state. Zero is replaced by
    /// `DEFAULT_STATE`.
    pub fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { DEFAULT_STATE } else { seed },
        }
    }

    /// Create a generator from an arbitrary seed string.
    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(fnv1a32(seed.as_bytes()))
    }

    /// Generate the next raw `u32` in the sequence.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Generate a uniform `f64` in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Generate a uniform random value in `[low, high)`.
    ///
    /// Panics if `low >= high`.
    pub fn range_f64(&mut self, low: f64, high: f64) -> f64 {
        assert!(low < high, "range_f64: low must be less than high");
        low + self.next_f64() * (high - low)
    }

    /// Generate a uniform random integer in `[low, high)`.
    ///
    /// Uses rejection sampling to avoid modulo bias.
    /// Panics if `low >= high`.
    pub fn range_u32(&mut self, low: u32, high: u32) -> u32 {
        assert!(low < high, "range_u32: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u32() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u32();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Generate a uniform random `usize` in `[low, high)`.
    ///
    /// Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u32(low as u32, high as u32) as usize
    }

    /// Return `true` with probability `p`. `p <= 0.0` is always false,
    /// `p >= 1.0` always true.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick one element of a non-empty slice uniformly.
    ///
    /// Panics if `items` is empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        assert!(!items.is_empty(), "pick: empty slice");
        &items[self.range_usize(0, items.len())]
    }
}

/// Build the seed string for one concern of a request, e.g.
/// `derive_seed(hash, "audio")` -> `"<hash>|audio"`.
pub fn derive_seed(base: &str, purpose: &str) -> String {
    format!("{base}|{purpose}")
}

/// 32-bit FNV-1a over a byte string. Also used for deterministic table index
/// selection (`stable_index`).
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic index in `[0, len)` for a seed string. Returns 0 when
/// `len == 0`.
pub fn stable_index(seed: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    fnv1a32(seed.as_bytes()) as usize % len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism_same_seed_same_output() {
        let mut a = SeededRng::from_seed_str("40.7128|-74.006|2025-01-01T12:00:00Z");
        let mut b = SeededRng::from_seed_str("40.7128|-74.006|2025-01-01T12:00:00Z");
        for _ in 0..1000 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn single_character_change_diverges() {
        let mut a = SeededRng::from_seed_str("seed-a");
        let mut b = SeededRng::from_seed_str("seed-b");
        let va: Vec<u32> = (0..8).map(|_| a.next_u32()).collect();
        let vb: Vec<u32> = (0..8).map(|_| b.next_u32()).collect();
        assert_ne!(va, vb);
    }

    #[test]
    fn same_length_strings_differ() {
        // Seeds of equal length and equal first character must not collide.
        let mut a = SeededRng::from_seed_str("abc");
        let mut b = SeededRng::from_seed_str("abd");
        assert_ne!(a.next_u32(), b.next_u32());
    }

    #[test]
    fn zero_seed_is_not_degenerate() {
        let mut rng = SeededRng::new(0);
        let vals: Vec<u32> = (0..16).map(|_| rng.next_u32()).collect();
        assert!(vals.iter().all(|&v| v != 0));
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = SeededRng::from_seed_str("unit");
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn range_u32_within_bounds() {
        let mut rng = SeededRng::from_seed_str("range");
        for _ in 0..10_000 {
            let v = rng.range_u32(10, 20);
            assert!((10..20).contains(&v), "range_u32 out of range: {v}");
        }
    }

    #[test]
    fn range_f64_within_bounds() {
        let mut rng = SeededRng::from_seed_str("range-f64");
        for _ in 0..10_000 {
            let v = rng.range_f64(-0.1, 0.1);
            assert!((-0.1..0.1).contains(&v), "range_f64 out of range: {v}");
        }
    }

    #[test]
    fn pick_reaches_every_item() {
        let items = ["fire", "earth", "air", "water"];
        let mut rng = SeededRng::from_seed_str("pick");
        let mut seen = [false; 4];
        for _ in 0..1000 {
            let chosen = rng.pick(&items);
            let idx = items.iter().position(|i| i == chosen).unwrap();
            seen[idx] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn random_bool_extremes() {
        let mut rng = SeededRng::from_seed_str("bool");
        for _ in 0..100 {
            assert!(!rng.random_bool(0.0));
            assert!(rng.random_bool(1.0));
        }
    }

    #[test]
    fn derived_seeds_are_independent_streams() {
        let mut audio = SeededRng::from_seed_str(&derive_seed("abc123", "audio"));
        let mut astro = SeededRng::from_seed_str(&derive_seed("abc123", "astro"));
        assert_ne!(audio.next_u32(), astro.next_u32());
    }

    #[test]
    fn stable_index_is_deterministic_and_bounded() {
        for len in 1..10 {
            let a = stable_index("hash|arc", len);
            assert_eq!(a, stable_index("hash|arc", len));
            assert!(a < len);
        }
        assert_eq!(stable_index("anything", 0), 0);
    }

    #[test]
    fn serialization_roundtrip() {
        let mut rng = SeededRng::from_seed_str("serde");
        for _ in 0..100 {
            rng.next_u32();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: SeededRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u32(), restored.next_u32());
        }
    }
}
