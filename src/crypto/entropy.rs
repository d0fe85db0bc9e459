use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::traits::{Error, Result};

/// Fill `buf` with cryptographically secure random bytes.
///
/// Key material must never come from anything weaker; a deterministic
/// source here would make ArchiveIV collisions possible.
///
/// # Errors
///
/// Errors if the operating system's entropy source fails.
pub fn fill_secure(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| Error::Entropy(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_secure_fills_the_whole_buffer() {
        let mut buf = [0u8; 64];
        fill_secure(&mut buf).unwrap();
        // All-zero output is possible but has probability 2^-512.
        assert_ne!(buf, [0u8; 64]);
    }

    #[test]
    fn fill_secure_does_not_repeat() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        fill_secure(&mut a).unwrap();
        fill_secure(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
