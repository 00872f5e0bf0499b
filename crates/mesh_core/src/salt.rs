use std::num::NonZeroU64;

use rand::RngCore;

use crate::{MeshError, MeshResult};

pub const MIN_SALT: i64 = 1_000_000_000_000;
pub const MAX_SALT_EXCLUSIVE: i64 = i64::MAX;

/// Uniform draw from `[0, span)` by masking to the next power of two and
/// rejecting draws outside the span.
fn draw_below<R: RngCore + ?Sized>(rng: &mut R, span: NonZeroU64) -> u64 {
    let highest = span.get() - 1;
    let mask = if highest == 0 {
        0
    } else {
        u64::MAX >> highest.leading_zeros()
    };
    loop {
        let candidate = rng.next_u64() & mask;
        if candidate < span.get() {
            return candidate;
        }
    }
}

/// Uniform draw from `[min, max_exclusive)`.
pub fn random_between<R: RngCore + ?Sized>(
    rng: &mut R,
    min: u64,
    max_exclusive: u64,
) -> MeshResult<u64> {
    let span = max_exclusive
        .checked_sub(min)
        .and_then(NonZeroU64::new)
        .ok_or_else(|| MeshError::invalid(format!("empty range {min}..{max_exclusive}")))?;
    Ok(min + draw_below(rng, span))
}

/// High-entropy salt for id and chunk obfuscation. Not a secret.
pub fn random_salt<R: RngCore + ?Sized>(rng: &mut R) -> i64 {
    let span = NonZeroU64::new(MAX_SALT_EXCLUSIVE.abs_diff(MIN_SALT)).unwrap_or(NonZeroU64::MIN);
    MIN_SALT + draw_below(rng, span) as i64
}

pub fn thread_salt() -> i64 {
    random_salt(&mut rand::thread_rng())
}
