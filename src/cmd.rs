pub mod cli;

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::time::Duration;

use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};

#[cfg(unix)]
use enchive::agent;
use enchive::keyfile::SecretKeyFile;
use enchive::traits::{Error, PassphraseProvider, Result};
use enchive::{envelope, kdf, keyfile, keys};

const ARCHIVE_SUFFIX: &str = ".enchive";
const PUBLIC_BASENAME: &str = "enchive.pub";
const SECRET_BASENAME: &str = "enchive.sec";

/// Per-invocation options shared by every command.
pub struct Context {
    pub pubkey: Option<PathBuf>,
    pub seckey: Option<PathBuf>,
    /// `0` = agent disabled.
    pub agent_timeout_secs: u64,
}

impl Context {
    fn pubkey_path(&self) -> Result<PathBuf> {
        match &self.pubkey {
            Some(path) => Ok(path.clone()),
            None => Ok(default_key_dir()?.join(PUBLIC_BASENAME)),
        }
    }

    fn seckey_path(&self) -> Result<PathBuf> {
        match &self.seckey {
            Some(path) => Ok(path.clone()),
            None => Ok(default_key_dir()?.join(SECRET_BASENAME)),
        }
    }
}

fn default_key_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("enchive"))
        .ok_or_else(|| Error::NotFound("no configuration directory (is $HOME set?)".to_string()))
}

/// A file being produced: deleted on drop unless committed.
///
/// Every output path (archives, extracted plaintext, key files being
/// written) goes through one of these so a fatal error anywhere on the
/// way never leaves a partial file behind.
struct PendingFile {
    path: PathBuf,
    armed: bool,
}

impl PendingFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

struct TerminalPassphrase;

impl PassphraseProvider for TerminalPassphrase {
    fn read_passphrase(&self, prompt: &str) -> Result<SecretString> {
        // rpassword turns echo off and truncates at the first CR/LF.
        rpassword::prompt_password(prompt)
            .map(SecretString::from)
            .map_err(|e| Error::Read(e.to_string()))
    }
}

/// Prompt for a new passphrase, enter/repeat.
fn prompt_new_passphrase(provider: &dyn PassphraseProvider, what: &str) -> Result<SecretString> {
    let first = provider.read_passphrase(&format!("{what}: "))?;
    if first.expose_secret().is_empty() {
        return Ok(first);
    }
    let second = provider.read_passphrase(&format!("{what} (repeat): "))?;
    if first.expose_secret() != second.expose_secret() {
        return Err(Error::Arg("passphrases do not match".to_string()));
    }
    Ok(first)
}

/// Recover the secret scalar: agent first, then the passphrase prompt.
///
/// A freshly accepted passphrase seeds a new agent when one is wanted;
/// failure to start it is only worth a warning.
fn unlock_secret(
    ctx: &Context,
    secfile: &SecretKeyFile,
    provider: &dyn PassphraseProvider,
) -> Result<Zeroizing<[u8; 32]>> {
    if !secfile.is_protected() {
        return secfile.plain_scalar();
    }

    #[cfg(unix)]
    if ctx.agent_timeout_secs > 0 {
        if let Some(key) = agent::query(&agent::socket_path(secfile.salt())) {
            if secfile.verify_protection_key(&key) {
                return secfile.unwrap_scalar(&key);
            }
        }
    }

    let passphrase = provider.read_passphrase("passphrase: ")?;
    let key = kdf::derive(
        passphrase.expose_secret().as_bytes(),
        secfile.exponent(),
        secfile.salt(),
    )?;
    let scalar = secfile.unwrap_scalar(&key)?;

    #[cfg(unix)]
    if ctx.agent_timeout_secs > 0
        && agent::spawn(secfile.salt(), ctx.agent_timeout_secs, &key).is_err()
    {
        eprintln!(
            "{bin}: warning: could not start the key agent",
            bin = env!("CARGO_BIN_NAME")
        );
    }

    Ok(scalar)
}

/// # Errors
///
/// Errors if key files would be clobbered, entropy or the KDF fails, or
/// the files cannot be written.
pub fn keygen(ctx: &Context, opts: &cli::KeygenArgs) -> Result<()> {
    let pub_path = ctx.pubkey_path()?;
    let sec_path = ctx.seckey_path()?;

    if !opts.edit && !opts.force {
        for path in [&pub_path, &sec_path] {
            if path.exists() {
                return Err(Error::Clobber(path.clone()));
            }
        }
    }

    let provider = TerminalPassphrase;

    let secret = if opts.edit {
        let secfile = SecretKeyFile::load(&sec_path)?;
        unlock_secret(ctx, &secfile, &provider)?
    } else if let Some(exponent) = opts.derive {
        let passphrase = prompt_new_passphrase(&provider, "derivation passphrase")?;
        keys::derive_secret(passphrase.expose_secret().as_bytes(), exponent)?
    } else {
        keys::generate_secret()?
    };
    let public = keys::public_from_secret(&secret);

    let secfile = if opts.plain {
        SecretKeyFile::plain(&secret)
    } else {
        let passphrase = prompt_new_passphrase(&provider, "protection passphrase")?;
        if passphrase.expose_secret().is_empty() {
            // An empty passphrase means "no protection".
            SecretKeyFile::plain(&secret)
        } else {
            SecretKeyFile::protect(
                &secret,
                passphrase.expose_secret().as_bytes(),
                opts.iterations,
            )?
        }
    };

    for path in [&sec_path, &pub_path] {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::Write(e.to_string()))?;
        }
    }

    let pending_sec = PendingFile::new(&sec_path);
    let pending_pub = PendingFile::new(&pub_path);
    secfile.store(&sec_path)?;
    keyfile::store_public(&pub_path, &public)?;

    if opts.fingerprint {
        println!("{}", keys::Fingerprint::of(&public));
    }

    pending_sec.commit();
    pending_pub.commit();
    Ok(())
}

/// # Errors
///
/// Errors if the public-key file is missing or malformed.
pub fn fingerprint(ctx: &Context) -> Result<()> {
    let public = keyfile::load_public(&ctx.pubkey_path()?)?;
    println!("{}", keys::Fingerprint::of(&public));
    Ok(())
}

/// # Errors
///
/// Errors if the public key cannot be loaded or the streams fail.
pub fn archive(ctx: &Context, opts: &cli::FileArgs) -> Result<()> {
    let public = keyfile::load_public(&ctx.pubkey_path()?)?;

    let outfile = match (&opts.infile, &opts.outfile) {
        (_, Some(outfile)) => Some(outfile.clone()),
        (Some(infile), None) => {
            let mut name = infile.clone().into_os_string();
            name.push(ARCHIVE_SUFFIX);
            Some(PathBuf::from(name))
        }
        (None, None) => None,
    };

    run_stream(
        opts.infile.as_deref(),
        outfile.as_deref(),
        opts.delete,
        |reader, writer| envelope::encrypt(&public, reader, writer),
    )
}

/// # Errors
///
/// Errors if the secret key cannot be loaded or unlocked, the archive
/// fails authentication, or the streams fail.
pub fn extract(ctx: &Context, opts: &cli::FileArgs) -> Result<()> {
    let secfile = SecretKeyFile::load(&ctx.seckey_path()?)?;
    let secret = unlock_secret(ctx, &secfile, &TerminalPassphrase)?;

    let outfile = match (&opts.infile, &opts.outfile) {
        (_, Some(outfile)) => Some(outfile.clone()),
        (Some(infile), None) => {
            let stripped = infile
                .to_str()
                .and_then(|name| name.strip_suffix(ARCHIVE_SUFFIX));
            match stripped {
                Some(name) if !name.is_empty() => Some(PathBuf::from(name)),
                _ => {
                    return Err(Error::Arg(format!(
                        "cannot infer output name from '{}'",
                        infile.display()
                    )));
                }
            }
        }
        (None, None) => None,
    };

    run_stream(
        opts.infile.as_deref(),
        outfile.as_deref(),
        opts.delete,
        |reader, writer| envelope::decrypt(&secret, reader, writer),
    )
}

/// Hidden entry point: the serve half of the key agent.
///
/// # Errors
///
/// Errors if the protection key cannot be read from stdin or the
/// socket cannot be created.
#[cfg(unix)]
pub fn agent(salt: &[u8; 8], timeout_secs: u64) -> Result<()> {
    // The parent hands the protection key over on the stdin pipe.
    let mut key = Zeroizing::new([0u8; 32]);
    io::stdin()
        .lock()
        .read_exact(key.as_mut())
        .map_err(|e| Error::Read(e.to_string()))?;
    agent::serve(
        &agent::socket_path(salt),
        &key,
        Duration::from_secs(timeout_secs),
    )
}

#[cfg(not(unix))]
pub fn agent(_salt: &[u8; 8], _timeout_secs: u64) -> Result<()> {
    Err(Error::Arg(
        "the key agent is not supported on this platform".to_string(),
    ))
}

/// Pipe input through `transform` into the output, committing the
/// output file only on full success.
fn run_stream(
    infile: Option<&Path>,
    outfile: Option<&Path>,
    delete_input: bool,
    transform: impl FnOnce(&mut dyn Read, &mut dyn Write) -> Result<()>,
) -> Result<()> {
    let mut reader: Box<dyn Read> = match infile {
        Some(path) => {
            let file = fs::File::open(path).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Error::NotFound(format!("no input file '{}'", path.display()))
                } else {
                    Error::Read(e.to_string())
                }
            })?;
            Box::new(file)
        }
        None => Box::new(io::stdin().lock()),
    };

    let mut pending = None;
    let mut writer: Box<dyn Write> = match outfile {
        Some(path) => {
            let file = fs::File::create(path).map_err(|e| Error::Write(e.to_string()))?;
            pending = Some(PendingFile::new(path));
            Box::new(io::BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    };

    transform(&mut reader, &mut writer)?;
    writer.flush().map_err(|e| Error::Write(e.to_string()))?;
    drop(writer);

    if let Some(pending) = pending {
        pending.commit();
    }
    if delete_input {
        if let Some(path) = infile {
            fs::remove_file(path).map_err(|e| Error::Write(e.to_string()))?;
        }
    }
    Ok(())
}
