//! Hashers specialized for the key types used throughout the crate.

use std::hash::Hasher;

const FOLD_PRIME: u64 = 11_400_714_819_323_198_549;

/// A hasher optimized for hashing component type IDs.
///
/// `TypeId` is already a unique value of one or two machine words, so the
/// hasher folds those words together instead of running the bytes through a
/// general purpose hash function on every registry lookup.
#[derive(Default)]
pub struct ComponentTypeIdHasher(u64);

impl Hasher for ComponentTypeIdHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.0 ^= u64::from_ne_bytes(word).wrapping_mul(FOLD_PRIME);
        }
    }

    fn write_u64(&mut self, value: u64) {
        self.0 ^= value.wrapping_mul(FOLD_PRIME);
    }

    fn write_u128(&mut self, value: u128) {
        self.0 ^= (value as u64 ^ (value >> 64) as u64).wrapping_mul(FOLD_PRIME);
    }
}
