//! Memory-hard passphrase key derivation.
//!
//! The derivation walks a pseudo-random chain through a large arena so
//! that an attacker has to pay the full memory cost for every guess:
//!
//! 1. Seed = HMAC-SHA-256 keyed by a 64-byte block holding the 8-byte
//!    salt (zero-padded), over the passphrase.
//! 2. Fill an arena of `2^exponent` bytes with an SHA-256 hash chain,
//!    32 bytes at a time, starting from the seed.
//! 3. Starting at the last 32-byte block, repeatedly hash the 32 bytes
//!    in place and jump to the (unaligned) offset named by their first
//!    four bytes, `2^(exponent - 5)` times.
//! 4. The 32 bytes at the final position are the derived key.
//!
//! Same inputs, same output, on every implementation; the test suite
//! pins cross-implementation vectors.

use hmac::{Hmac, Mac};
use secrecy::zeroize::Zeroizing;
use sha2::{Digest, Sha256};

use crate::traits::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Smallest accepted cost exponent (32-byte arena).
pub const MIN_COST_EXPONENT: u8 = 5;
/// Largest accepted cost exponent (2 GiB arena).
pub const MAX_COST_EXPONENT: u8 = 31;

/// Derive a 32-byte key from a passphrase.
///
/// `exponent` selects an arena of `2^exponent` bytes and
/// `2^(exponent - 5)` pointer-chase rounds. A missing salt is treated
/// as all zero by callers.
///
/// # Errors
///
/// Errors if `exponent` is outside [`MIN_COST_EXPONENT`],
/// [`MAX_COST_EXPONENT`], or if the arena cannot be allocated.
pub fn derive(passphrase: &[u8], exponent: u8, salt: &[u8; 8]) -> Result<Zeroizing<[u8; 32]>> {
    if !(MIN_COST_EXPONENT..=MAX_COST_EXPONENT).contains(&exponent) {
        return Err(Error::Arg(format!(
            "cost exponent must be in [{MIN_COST_EXPONENT}, {MAX_COST_EXPONENT}] (got {exponent})"
        )));
    }

    let memlen: usize = 1 << exponent;
    let mask: usize = memlen - 1;
    let rounds: u64 = 1 << (exponent - MIN_COST_EXPONENT);

    // The salt block is HMAC's block size, so it is used as the HMAC
    // key verbatim (standard ipad/opad discipline, no pre-hashing).
    let mut block = Zeroizing::new([0u8; 64]);
    block[..8].copy_from_slice(salt);
    let mut mac = match HmacSha256::new_from_slice(block.as_ref()) {
        Ok(mac) => mac,
        Err(_) => return Err(Error::Malformed("bad KDF salt block")),
    };
    mac.update(passphrase);
    let seed = Zeroizing::new(<[u8; 32]>::from(mac.finalize().into_bytes()));

    // Up to 2 GiB at the top of the range; surface allocation failure
    // instead of aborting.
    let mut arena = Vec::new();
    arena
        .try_reserve_exact(memlen + 32)
        .map_err(|_| Error::OutOfMemory)?;
    arena.resize(memlen + 32, 0u8);
    let mut arena = Zeroizing::new(arena);

    arena[..32].copy_from_slice(seed.as_ref());
    let mut p = 32;
    while p <= memlen {
        let digest = Sha256::digest(&arena[p - 32..p]);
        arena[p..p + 32].copy_from_slice(&digest);
        p += 32;
    }

    let mut ptr = memlen - 32;
    for _ in 0..rounds {
        let digest = Sha256::digest(&arena[ptr..ptr + 32]);
        arena[ptr..ptr + 32].copy_from_slice(&digest);
        let offset = u32::from_le_bytes([
            arena[ptr],
            arena[ptr + 1],
            arena[ptr + 2],
            arena[ptr + 3],
        ]) as usize;
        ptr = offset & mask;
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&arena[ptr..ptr + 32]);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; 8] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];

    #[test]
    fn pinned_vector_exponent_5() {
        let key = derive(b"password", 5, &SALT).unwrap();
        assert_eq!(
            hex::encode(key.as_ref()),
            "a0fc4ff0f37ae8714d8dc68c0444e8ccca8a7ba3ef06f617836f9c883d87e297"
        );
    }

    #[test]
    fn pinned_vector_exponent_8() {
        let key = derive(b"password", 8, &SALT).unwrap();
        assert_eq!(
            hex::encode(key.as_ref()),
            "d90eb521bee8eeb4d0c6ca8a6c725d958400c613ded3fd448ab39450da4d3ab6"
        );
    }

    #[test]
    fn pinned_vector_zero_salt() {
        let key = derive(b"password", 5, &[0u8; 8]).unwrap();
        assert_eq!(
            hex::encode(key.as_ref()),
            "868f6b024d71b8c39e37ee441797c53aee6ccd9ac1624196a8390200642f2909"
        );
    }

    #[test]
    fn deterministic() {
        let a = derive(b"correct horse", 6, &SALT).unwrap();
        let b = derive(b"correct horse", 6, &SALT).unwrap();
        assert_eq!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn salt_sensitive() {
        let a = derive(b"passphrase", 5, &SALT).unwrap();
        let b = derive(b"passphrase", 5, &[0xff; 8]).unwrap();
        assert_ne!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn passphrase_sensitive() {
        let a = derive(b"passphrase", 5, &SALT).unwrap();
        let b = derive(b"Passphrase", 5, &SALT).unwrap();
        assert_ne!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn exponent_changes_the_output() {
        let a = derive(b"passphrase", 5, &SALT).unwrap();
        let b = derive(b"passphrase", 6, &SALT).unwrap();
        assert_ne!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn exponent_below_range_is_rejected() {
        let err = derive(b"passphrase", 4, &SALT).unwrap_err();
        assert!(matches!(err, Error::Arg(_)));
    }

    #[test]
    fn exponent_above_range_is_rejected() {
        let err = derive(b"passphrase", 32, &SALT).unwrap_err();
        assert!(matches!(err, Error::Arg(_)));
    }

    #[test]
    fn empty_passphrase_is_legal() {
        // Keygen maps an empty passphrase to "no protection" before the
        // KDF is ever involved, but the function itself accepts it.
        let key = derive(b"", 5, &SALT).unwrap();
        assert_eq!(key.len(), 32);
    }
}
