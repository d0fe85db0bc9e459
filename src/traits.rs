use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    Read(String),
    Write(String),
    Entropy(String),
    Malformed(&'static str),
    Version(u8),
    Passphrase,
    Integrity,
    Recipient,
    Clobber(PathBuf),
    NotFound(String),
    OutOfMemory,
    Arg(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(reason) => write!(f, "could not read input: {reason}"),
            Self::Write(reason) => write!(f, "could not write output: {reason}"),
            Self::Entropy(reason) => write!(f, "could not gather entropy: {reason}"),
            Self::Malformed(what) => write!(f, "{what}"),
            Self::Version(found) => write!(f, "unsupported format version ({found})"),
            Self::Passphrase => write!(f, "wrong passphrase"),
            Self::Integrity => write!(f, "archive checksum mismatch"),
            Self::Recipient => write!(f, "archive is not addressed to this key"),
            Self::Clobber(path) => {
                write!(f, "will not clobber '{}' (use --force)", path.display())
            }
            Self::NotFound(what) => write!(f, "{what}"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Arg(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Source of passphrases for key protection and unwrapping.
///
/// The crypto core never talks to a terminal; the binary plugs in a
/// terminal-backed implementation, tests plug in a canned one.
pub trait PassphraseProvider {
    /// Read one passphrase.
    ///
    /// # Errors
    ///
    /// Errors if the underlying device cannot be read.
    fn read_passphrase(&self, prompt: &str) -> Result<SecretString>;
}
