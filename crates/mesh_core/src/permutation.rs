//! Salt-keyed permutations used to obfuscate sequential allocation indices.
//!
//! The engine only relies on the [`PermutationOracle`] contract: for a fixed
//! salt and domain width the mapping is a bijection over `[0, 2^domain_bits)`.
//! [`FeistelPermutation`] is the oracle shipped with the crate.

/// Deterministic bijection over an n-bit integer domain, keyed by a salt.
pub trait PermutationOracle: Send + Sync {
    /// Maps `value` (which must be below `2^domain_bits`) to another value in
    /// the same domain.
    fn permute(&self, value: u64, salt: i64, domain_bits: u32) -> u64;
}

const ROUNDS: usize = 6;

/// Balanced Feistel network over an even number of bits. Each round swaps the
/// halves and mixes the right half into the left one through a keyed round
/// function, so any round function yields a bijection.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeistelPermutation;

impl FeistelPermutation {
    fn round_keys(salt: i64) -> [u64; ROUNDS] {
        let mut state = salt as u64;
        let mut keys = [0u64; ROUNDS];
        for key in keys.iter_mut() {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            *key = mix(state);
        }
        keys
    }
}

impl PermutationOracle for FeistelPermutation {
    fn permute(&self, value: u64, salt: i64, domain_bits: u32) -> u64 {
        debug_assert!(domain_bits >= 2 && domain_bits <= 62 && domain_bits % 2 == 0);
        debug_assert!(value < (1u64 << domain_bits));
        let half = domain_bits / 2;
        let mask = (1u64 << half) - 1;
        let mut left = (value >> half) & mask;
        let mut right = value & mask;
        for key in Self::round_keys(salt) {
            let next = left ^ (mix(right ^ key) & mask);
            left = right;
            right = next;
        }
        (left << half) | right
    }
}

fn mix(value: u64) -> u64 {
    let mut x = value;
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
