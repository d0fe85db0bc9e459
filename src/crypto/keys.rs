use std::fmt;

use secrecy::zeroize::Zeroizing;
use sha2::{Digest, Sha256};
use x25519_dalek::{X25519_BASEPOINT_BYTES, x25519};

use crate::crypto::{entropy, kdf};
use crate::traits::Result;

/// Cost exponent used when deriving a secret key from a passphrase
/// (`keygen --derive` without a value). Deliberately heavier than the
/// key-protection default: the passphrase is the only secret.
pub const DERIVE_COST_EXPONENT: u8 = 29;

/// Clamp a Curve25519 private scalar in place.
///
/// Idempotent; every stored secret scalar is kept clamped.
pub fn clamp(scalar: &mut [u8; 32]) {
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;
}

/// Generate a fresh clamped secret scalar from OS entropy.
///
/// # Errors
///
/// Errors if the entropy source fails.
pub fn generate_secret() -> Result<Zeroizing<[u8; 32]>> {
    let mut scalar = Zeroizing::new([0u8; 32]);
    entropy::fill_secure(scalar.as_mut())?;
    clamp(&mut scalar);
    Ok(scalar)
}

/// Derive a clamped secret scalar deterministically from a passphrase.
///
/// Uses the memory-hard KDF with a zero salt, so the same passphrase
/// always reproduces the same key pair.
///
/// # Errors
///
/// Errors if the cost exponent is out of range or the KDF arena cannot
/// be allocated.
pub fn derive_secret(passphrase: &[u8], exponent: u8) -> Result<Zeroizing<[u8; 32]>> {
    let mut scalar = kdf::derive(passphrase, exponent, &[0u8; 8])?;
    clamp(&mut scalar);
    Ok(scalar)
}

/// Compute the public point for a secret scalar.
#[must_use]
pub fn public_from_secret(secret: &[u8; 32]) -> [u8; 32] {
    x25519(*secret, X25519_BASEPOINT_BYTES)
}

/// Truncated public-key hash, rendered as four 8-hex-digit groups.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    #[must_use]
    pub fn of(public: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self.0.chunks(4).map(hex::encode).collect();
        write!(f, "{}", groups.join("-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_is_idempotent() {
        let mut once = [0xffu8; 32];
        clamp(&mut once);
        let mut twice = once;
        clamp(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn clamp_clears_and_sets_the_right_bits() {
        let mut scalar = [0xffu8; 32];
        clamp(&mut scalar);
        assert_eq!(scalar[0] & 7, 0);
        assert_eq!(scalar[31] & 128, 0);
        assert_eq!(scalar[31] & 64, 64);
    }

    #[test]
    fn generated_secrets_are_clamped() {
        let secret = generate_secret().unwrap();
        let mut clamped = *secret;
        clamp(&mut clamped);
        assert_eq!(*secret, clamped);
    }

    #[test]
    fn public_from_secret_is_deterministic() {
        let mut secret = [7u8; 32];
        clamp(&mut secret);
        assert_eq!(public_from_secret(&secret), public_from_secret(&secret));
    }

    #[test]
    fn derive_secret_is_deterministic() {
        let a = derive_secret(b"walrus", 5).unwrap();
        let b = derive_secret(b"walrus", 5).unwrap();
        assert_eq!(a.as_ref(), b.as_ref());

        let mut clamped = *a;
        clamp(&mut clamped);
        assert_eq!(*a, clamped);
    }

    #[test]
    fn fingerprint_is_deterministic_and_key_specific() {
        let mut secret = [9u8; 32];
        clamp(&mut secret);
        let public = public_from_secret(&secret);

        assert_eq!(Fingerprint::of(&public), Fingerprint::of(&public));

        let mut other = [10u8; 32];
        clamp(&mut other);
        assert_ne!(Fingerprint::of(&public), Fingerprint::of(&public_from_secret(&other)));
    }

    #[test]
    fn fingerprint_renders_as_four_hex_groups() {
        let rendered = Fingerprint::of(&[0u8; 32]).to_string();
        let groups: Vec<&str> = rendered.split('-').collect();
        assert_eq!(groups.len(), 4);
        for group in groups {
            assert_eq!(group.len(), 8);
            assert!(group.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(group, group.to_lowercase());
        }
    }
}
