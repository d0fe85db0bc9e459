//! On-disk key files.
//!
//! Secret-key file, 64 bytes:
//!
//! ```text
//! [ salt / ChaCha20 IV (8) ]     zero if unprotected
//! [ cost exponent (1) ]          0 = unprotected
//! [ format version (1) ]
//! [ reserved (2) ]               zero
//! [ protection tag (20) ]        SHA-256(protection key)[..20], zero if unprotected
//! [ secret scalar (32) ]         ChaCha20-XORed iff protected
//! ```
//!
//! The public-key file is the bare 32-byte public point. Both files are
//! created with owner-only permissions.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use chacha20::ChaCha20Legacy;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use secrecy::zeroize::{Zeroize, Zeroizing};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::crypto::envelope::FORMAT_VERSION;
use crate::crypto::{entropy, kdf};
use crate::traits::{Error, Result};

/// Exact size of a secret-key file.
pub const SECRET_FILE_LEN: usize = 64;
/// Exact size of a public-key file.
pub const PUBLIC_FILE_LEN: usize = 32;

/// Cost exponent used to wrap the secret key (`--iterations` default).
pub const PROTECT_COST_EXPONENT: u8 = 28;

const TAG_LEN: usize = 20;

/// A decoded (but not necessarily unwrapped) secret-key file.
#[derive(Debug)]
pub struct SecretKeyFile {
    salt: [u8; 8],
    exponent: u8,
    tag: [u8; TAG_LEN],
    scalar: [u8; 32],
}

impl Drop for SecretKeyFile {
    fn drop(&mut self) {
        // The scalar is only ciphertext when protected, but zero it
        // unconditionally.
        self.scalar.zeroize();
    }
}

impl SecretKeyFile {
    /// Store `scalar` unprotected.
    #[must_use]
    pub fn plain(scalar: &[u8; 32]) -> Self {
        Self {
            salt: [0; 8],
            exponent: 0,
            tag: [0; TAG_LEN],
            scalar: *scalar,
        }
    }

    /// Wrap `scalar` under a passphrase-derived protection key.
    ///
    /// Draws a fresh salt, which also serves as the wrap IV and as the
    /// key agent's socket discriminator.
    ///
    /// # Errors
    ///
    /// Errors if the entropy source fails or the KDF cannot run.
    pub fn protect(scalar: &[u8; 32], passphrase: &[u8], exponent: u8) -> Result<Self> {
        let mut salt = [0u8; 8];
        entropy::fill_secure(&mut salt)?;

        let key = kdf::derive(passphrase, exponent, &salt)?;
        let mut wrapped = *scalar;
        keystream_xor(&key, &salt, &mut wrapped);

        Ok(Self {
            salt,
            exponent,
            tag: protection_tag(&key),
            scalar: wrapped,
        })
    }

    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.exponent != 0
    }

    #[must_use]
    pub fn salt(&self) -> &[u8; 8] {
        &self.salt
    }

    #[must_use]
    pub fn exponent(&self) -> u8 {
        self.exponent
    }

    /// Check a candidate protection key against the stored tag.
    #[must_use]
    pub fn verify_protection_key(&self, key: &[u8; 32]) -> bool {
        self.tag[..].ct_eq(&protection_tag(key)[..]).into()
    }

    /// Recover the scalar of an unprotected file.
    ///
    /// # Errors
    ///
    /// Errors if the file is passphrase-protected.
    pub fn plain_scalar(&self) -> Result<Zeroizing<[u8; 32]>> {
        if self.is_protected() {
            return Err(Error::Malformed("secret key is passphrase-protected"));
        }
        Ok(Zeroizing::new(self.scalar))
    }

    /// Unwrap the scalar with a protection key.
    ///
    /// # Errors
    ///
    /// Errors with [`Error::Passphrase`] if `key` does not match the
    /// stored protection tag.
    pub fn unwrap_scalar(&self, key: &[u8; 32]) -> Result<Zeroizing<[u8; 32]>> {
        if !self.verify_protection_key(key) {
            return Err(Error::Passphrase);
        }
        let mut scalar = Zeroizing::new(self.scalar);
        keystream_xor(key, &self.salt, &mut scalar);
        Ok(scalar)
    }

    #[must_use]
    pub fn encode(&self) -> Zeroizing<[u8; SECRET_FILE_LEN]> {
        let mut buf = Zeroizing::new([0u8; SECRET_FILE_LEN]);
        buf[0..8].copy_from_slice(&self.salt);
        buf[8] = self.exponent;
        buf[9] = FORMAT_VERSION;
        buf[12..32].copy_from_slice(&self.tag);
        buf[32..64].copy_from_slice(&self.scalar);
        buf
    }

    /// # Errors
    ///
    /// Errors if `bytes` is not exactly one secret-key file or carries
    /// an unsupported format version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_FILE_LEN {
            return Err(Error::Malformed("secret key file is malformed"));
        }
        if bytes[9] != FORMAT_VERSION {
            return Err(Error::Version(bytes[9]));
        }
        let mut file = Self {
            salt: [0; 8],
            exponent: bytes[8],
            tag: [0; TAG_LEN],
            scalar: [0; 32],
        };
        file.salt.copy_from_slice(&bytes[0..8]);
        file.tag.copy_from_slice(&bytes[12..32]);
        file.scalar.copy_from_slice(&bytes[32..64]);
        Ok(file)
    }

    /// # Errors
    ///
    /// Errors if the file is missing, unreadable, or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = Zeroizing::new(read_key_file(path, "secret key")?);
        Self::decode(&bytes)
    }

    /// Write the file with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Errors on write failure.
    pub fn store(&self, path: &Path) -> Result<()> {
        write_owner_only(path, self.encode().as_ref())
    }
}

fn protection_tag(key: &[u8; 32]) -> [u8; TAG_LEN] {
    let digest = Sha256::digest(key);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&digest[..TAG_LEN]);
    tag
}

fn keystream_xor(key: &[u8; 32], iv: &[u8; 8], buf: &mut [u8; 32]) {
    let mut cipher = ChaCha20Legacy::new(key.into(), iv.into());
    cipher.apply_keystream(buf);
}

/// # Errors
///
/// Errors if the file is missing, unreadable, or not exactly one
/// public point.
pub fn load_public(path: &Path) -> Result<[u8; 32]> {
    let bytes = read_key_file(path, "public key")?;
    if bytes.len() != PUBLIC_FILE_LEN {
        return Err(Error::Malformed("public key file is malformed"));
    }
    let mut public = [0u8; 32];
    public.copy_from_slice(&bytes);
    Ok(public)
}

/// Write the public point with owner-only permissions.
///
/// # Errors
///
/// Errors on write failure.
pub fn store_public(path: &Path, public: &[u8; 32]) -> Result<()> {
    write_owner_only(path, public)
}

fn read_key_file(path: &Path, what: &'static str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NotFound(format!("no {what} file '{}'", path.display()))
        } else {
            Error::Read(e.to_string())
        }
    })
}

fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .and_then(|mut file| file.write_all(bytes))
        .map_err(|e| Error::Write(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar() -> [u8; 32] {
        let mut scalar = [0x42u8; 32];
        crate::crypto::keys::clamp(&mut scalar);
        scalar
    }

    #[test]
    fn plain_roundtrip() {
        let file = SecretKeyFile::plain(&scalar());
        let decoded = SecretKeyFile::decode(file.encode().as_ref()).unwrap();

        assert!(!decoded.is_protected());
        assert_eq!(*decoded.plain_scalar().unwrap(), scalar());
        assert_eq!(decoded.salt(), &[0u8; 8]);
    }

    #[test]
    fn protected_roundtrip() {
        let file = SecretKeyFile::protect(&scalar(), b"hunter2", 5).unwrap();
        let decoded = SecretKeyFile::decode(file.encode().as_ref()).unwrap();

        assert!(decoded.is_protected());
        assert_eq!(decoded.exponent(), 5);

        let key = kdf::derive(b"hunter2", decoded.exponent(), decoded.salt()).unwrap();
        assert!(decoded.verify_protection_key(&key));
        assert_eq!(*decoded.unwrap_scalar(&key).unwrap(), scalar());
    }

    #[test]
    fn protected_scalar_is_not_stored_raw() {
        let file = SecretKeyFile::protect(&scalar(), b"hunter2", 5).unwrap();
        assert_ne!(file.encode()[32..64], scalar());
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let file = SecretKeyFile::protect(&scalar(), b"hunter2", 5).unwrap();

        let key = kdf::derive(b"hunter3", file.exponent(), file.salt()).unwrap();
        assert!(!file.verify_protection_key(&key));
        assert_eq!(file.unwrap_scalar(&key).unwrap_err(), Error::Passphrase);
    }

    #[test]
    fn rewrap_changes_salt_and_invalidates_old_passphrase() {
        let original = SecretKeyFile::protect(&scalar(), b"p1", 10).unwrap();
        let key1 = kdf::derive(b"p1", original.exponent(), original.salt()).unwrap();
        let recovered = original.unwrap_scalar(&key1).unwrap();

        let rewrapped = SecretKeyFile::protect(&recovered, b"p2", 14).unwrap();
        assert_ne!(rewrapped.salt(), original.salt());
        assert_eq!(rewrapped.exponent(), 14);

        let stale = kdf::derive(b"p1", rewrapped.exponent(), rewrapped.salt()).unwrap();
        assert_eq!(rewrapped.unwrap_scalar(&stale).unwrap_err(), Error::Passphrase);

        let key2 = kdf::derive(b"p2", rewrapped.exponent(), rewrapped.salt()).unwrap();
        assert_eq!(*rewrapped.unwrap_scalar(&key2).unwrap(), scalar());
    }

    #[test]
    fn layout_is_byte_exact() {
        let file = SecretKeyFile::protect(&scalar(), b"hunter2", 7).unwrap();
        let bytes = file.encode();

        assert_eq!(bytes.len(), SECRET_FILE_LEN);
        assert_eq!(&bytes[0..8], file.salt());
        assert_eq!(bytes[8], 7);
        assert_eq!(bytes[9], FORMAT_VERSION);
        assert_eq!(&bytes[10..12], &[0, 0]);

        let key = kdf::derive(b"hunter2", 7, file.salt()).unwrap();
        let digest = Sha256::digest(key.as_ref());
        assert_eq!(&bytes[12..32], &digest[..20]);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(
            SecretKeyFile::decode(&[0u8; 63]).unwrap_err(),
            Error::Malformed(_)
        ));
        assert!(matches!(
            SecretKeyFile::decode(&[0u8; 65]).unwrap_err(),
            Error::Malformed(_)
        ));
    }

    #[test]
    fn decode_rejects_wrong_version() {
        let mut bytes = *SecretKeyFile::plain(&scalar()).encode();
        bytes[9] = FORMAT_VERSION.wrapping_add(1);
        assert_eq!(
            SecretKeyFile::decode(&bytes).unwrap_err(),
            Error::Version(FORMAT_VERSION.wrapping_add(1))
        );
    }

    #[test]
    fn store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let sec_path = dir.path().join("enchive.sec");
        let pub_path = dir.path().join("enchive.pub");

        SecretKeyFile::plain(&scalar()).store(&sec_path).unwrap();
        let loaded = SecretKeyFile::load(&sec_path).unwrap();
        assert_eq!(*loaded.plain_scalar().unwrap(), scalar());

        let public = crate::crypto::keys::public_from_secret(&scalar());
        store_public(&pub_path, &public).unwrap();
        assert_eq!(load_public(&pub_path).unwrap(), public);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for path in [&sec_path, &pub_path] {
                let mode = fs::metadata(path).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o600, "{}", path.display());
            }
        }
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SecretKeyFile::load(&dir.path().join("nope.sec")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = load_public(&dir.path().join("nope.pub")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn load_oversized_public_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pub");
        fs::write(&path, [0u8; 33]).unwrap();
        assert!(matches!(load_public(&path).unwrap_err(), Error::Malformed(_)));
    }
}
