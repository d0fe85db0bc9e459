pub mod entropy;
pub mod envelope;
pub mod kdf;
pub mod keyfile;
pub mod keys;

pub use envelope::FORMAT_VERSION;
pub use keyfile::SecretKeyFile;
pub use keys::Fingerprint;
