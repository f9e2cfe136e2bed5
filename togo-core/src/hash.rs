// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! FNV-1a hashes, used to produce the keys of
//! [`HashMap`](crate::collections::HashMap).

/// The hash of an empty input.
pub const IDENTITY32: u32 = 0;
/// The hash of an empty input.
pub const IDENTITY64: u64 = 0;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;
const FNV64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Calculates the 32-bit hash of `data`. Usable in const contexts, e.g.
/// `const PLAYER: u32 = hash::calc32(b"player");`.
pub const fn calc32(data: &[u8]) -> u32 {
    if data.is_empty() {
        return IDENTITY32;
    }
    let mut hash = FNV32_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u32;
        hash = hash.wrapping_mul(FNV32_PRIME);
        i += 1;
    }
    hash
}

/// Calculates the 64-bit hash of `data`. Usable in const contexts.
pub const fn calc64(data: &[u8]) -> u64 {
    if data.is_empty() {
        return IDENTITY64;
    }
    let mut hash = FNV64_OFFSET_BASIS;
    let mut i = 0;
    while i < data.len() {
        hash ^= data[i] as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
        i += 1;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::{calc32, calc64, IDENTITY32, IDENTITY64};

    #[test]
    fn empty_input_hashes_to_identity() {
        assert_eq!(IDENTITY32, calc32(b""));
        assert_eq!(IDENTITY64, calc64(b""));
    }

    #[test]
    fn matches_reference_fnv1a_values() {
        assert_eq!(0xe40c_292c, calc32(b"a"));
        assert_eq!(0xbf9c_f968, calc32(b"foobar"));
        assert_eq!(0xaf63_dc4c_8601_ec8c, calc64(b"a"));
        assert_eq!(0x8594_4171_f739_67e8, calc64(b"foobar"));
    }

    #[test]
    fn works_in_const_context() {
        const PLAYER: u32 = calc32(b"player");
        assert_eq!(PLAYER, calc32("player".as_bytes()));
    }
}
