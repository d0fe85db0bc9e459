//! Ephemeral-ECDH archive envelope.
//!
//! An archive encrypts a byte stream to the owner's public key without
//! a passphrase; only the matching secret key can open it.
//!
//! # Archive Format
//!
//! ```text
//! [ archive IV (8) ]
//! [ ephemeral public key (32) ]
//! [ ciphertext (plaintext length) ]
//! [ HMAC-SHA-256 tag (32) ]
//! ```
//!
//! - A fresh ephemeral X25519 key pair is drawn per archive. Its public
//!   half is stored; the shared secret `S` with the recipient key is
//!   both the ChaCha20 key and the HMAC key.
//!
//! - The **archive IV** is the first 8 bytes of SHA-256(S), with the
//!   first byte offset by the format version. It is the ChaCha20 nonce
//!   and doubles as a recipient check: decrypting with the wrong secret
//!   key yields a different `S`, the recomputed IV disagrees, and
//!   decryption fails before any payload is touched. The version offset
//!   makes format versions cross-incompatible.
//!
//! - The tag is HMAC-SHA-256 over the **plaintext** (encrypt-and-MAC).
//!   Weaker than encrypt-then-MAC, but fixed by the on-disk format;
//!   the order must not change.
//!
//! - The tag sits at the tail, so decryption emits plaintext before it
//!   can be verified. Callers must treat the output as provisional
//!   until the function returns; the command layer writes through a
//!   delete-unless-committed file for exactly this reason.

use std::io::{self, Read, Write};

use chacha20::ChaCha20Legacy;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use secrecy::zeroize::Zeroizing;
use sha2::{Digest, Sha256};
use x25519_dalek::x25519;

use crate::crypto::keys;
use crate::traits::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Version byte folded into the archive IV and the key-file header.
pub const FORMAT_VERSION: u8 = 0;

/// Archive overhead: IV, ephemeral public key, trailing tag.
pub const OVERHEAD: usize = 8 + 32 + 32;

const TAG_LEN: usize = 32;
const CHUNK: usize = 1 << 16;

/// Read until `buf` is full or the stream ends; returns bytes read.
///
/// Transient short reads are retried, `Interrupted` included, so a
/// return shorter than `buf` always means end of stream.
fn full_read(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn archive_iv(shared: &[u8; 32]) -> [u8; 8] {
    let digest = Sha256::digest(shared);
    let mut iv = [0u8; 8];
    iv.copy_from_slice(&digest[..8]);
    iv[0] = iv[0].wrapping_add(FORMAT_VERSION);
    iv
}

fn keyed(shared: &[u8; 32], iv: &[u8; 8]) -> Result<(ChaCha20Legacy, HmacSha256)> {
    let cipher = ChaCha20Legacy::new(shared.into(), iv.into());
    let mac = HmacSha256::new_from_slice(shared).map_err(|_| Error::Malformed("bad mac key"))?;
    Ok((cipher, mac))
}

/// Encrypt `reader` to `writer` for the holder of `public`.
///
/// # Errors
///
/// Errors if the entropy source fails or on read/write failure.
pub fn encrypt(public: &[u8; 32], reader: &mut dyn Read, writer: &mut dyn Write) -> Result<()> {
    let ephemeral = keys::generate_secret()?;
    let ephemeral_public = keys::public_from_secret(&ephemeral);
    let shared = Zeroizing::new(x25519(*ephemeral, *public));

    let iv = archive_iv(&shared);
    writer
        .write_all(&iv)
        .and_then(|()| writer.write_all(&ephemeral_public))
        .map_err(|e| Error::Write(e.to_string()))?;

    let (mut cipher, mut mac) = keyed(&shared, &iv)?;

    let mut buf = Zeroizing::new(vec![0u8; CHUNK]);
    loop {
        let n = full_read(reader, &mut buf).map_err(|e| Error::Read(e.to_string()))?;
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
        cipher.apply_keystream(&mut buf[..n]);
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::Write(e.to_string()))?;
    }

    writer
        .write_all(&mac.finalize().into_bytes())
        .map_err(|e| Error::Write(e.to_string()))?;
    Ok(())
}

/// Decrypt `reader` to `writer` with the recipient's secret scalar.
///
/// Plaintext is emitted progressively; the trailing tag is only checked
/// at end of stream. On any error the bytes already written must be
/// discarded by the caller.
///
/// # Errors
///
/// Errors with [`Error::Recipient`] if the archive was not made for
/// this key, [`Error::Integrity`] on tag mismatch, and
/// [`Error::Malformed`] if the archive cannot even hold a header and a
/// tag.
pub fn decrypt(secret: &[u8; 32], reader: &mut dyn Read, writer: &mut dyn Write) -> Result<()> {
    let mut header = [0u8; 40];
    let n = full_read(reader, &mut header).map_err(|e| Error::Read(e.to_string()))?;
    if n != header.len() {
        return Err(Error::Malformed("archive is truncated"));
    }
    let mut iv = [0u8; 8];
    iv.copy_from_slice(&header[..8]);
    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(&header[8..]);

    let shared = Zeroizing::new(x25519(*secret, ephemeral_public));
    if iv != archive_iv(&shared) {
        return Err(Error::Recipient);
    }

    let (mut cipher, mut mac) = keyed(&shared, &iv)?;

    // Hold the last 32 bytes seen aside: until the stream ends they are
    // the candidate tag, everything before them is ciphertext.
    let mut buf = Zeroizing::new(vec![0u8; TAG_LEN + CHUNK]);
    let n = full_read(reader, &mut buf[..TAG_LEN]).map_err(|e| Error::Read(e.to_string()))?;
    if n != TAG_LEN {
        return Err(Error::Malformed("archive is truncated"));
    }

    loop {
        let n = full_read(reader, &mut buf[TAG_LEN..]).map_err(|e| Error::Read(e.to_string()))?;
        if n == 0 {
            break;
        }
        cipher.apply_keystream(&mut buf[..n]);
        mac.update(&buf[..n]);
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::Write(e.to_string()))?;
        buf.copy_within(n..n + TAG_LEN, 0);
    }

    if mac.verify_slice(&buf[..TAG_LEN]).is_err() {
        return Err(Error::Integrity);
    }
    Ok(())
}
