//! Key agent: a peer process that caches a protection key.
//!
//! After a passphrase is accepted, the derived protection key can be
//! parked in a detached agent process so later extracts within the
//! session skip the prompt. One agent per secret-key file: the socket
//! is a local stream socket named after the key file's 8-byte salt
//! (lowercase hex) in the first of `$XDG_RUNTIME_DIR`, `$TMPDIR`,
//! `/tmp`.
//!
//! The protocol is a bare 32-byte handshake: connect, receive the
//! protection key, done. The client validates the key against the
//! secret-key file's protection tag, so a stale or foreign agent
//! degrades into a normal passphrase prompt. The socket must never be
//! exposed beyond the local machine; there is no framing to survive a
//! lossy transport.

use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use secrecy::zeroize::Zeroizing;

use crate::traits::{Error, Result};

/// Hidden subcommand under which the serve loop runs.
pub const COMMAND: &str = "agent";

/// Inactivity timeout when `--agent` is given without a value.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Socket address for the secret-key file whose salt is `salt`.
#[must_use]
pub fn socket_path(salt: &[u8; 8]) -> PathBuf {
    let dir = env::var_os("XDG_RUNTIME_DIR")
        .or_else(|| env::var_os("TMPDIR"))
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    dir.join(hex::encode(salt))
}

/// Ask a running agent for its cached protection key.
///
/// `None` on any failure (no agent, short read): the caller falls
/// through to the passphrase prompt.
#[must_use]
pub fn query(path: &Path) -> Option<Zeroizing<[u8; 32]>> {
    let mut stream = UnixStream::connect(path).ok()?;
    let mut key = Zeroizing::new([0u8; 32]);
    stream.read_exact(key.as_mut()).ok()?;
    Some(key)
}

/// Serve `key` on `path` until no client shows up for `timeout`.
///
/// Clients are served strictly one at a time: accept, write the key,
/// close. Every served client resets the inactivity clock. On timeout
/// the socket is unlinked and the function returns.
///
/// # Errors
///
/// Errors if the socket cannot be created.
pub fn serve(path: &Path, key: &[u8; 32], timeout: Duration) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {} // Stale socket from a dead agent.
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Write(e.to_string())),
    }
    let listener = UnixListener::bind(path).map_err(|e| Error::Write(e.to_string()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::Write(e.to_string()))?;

    // std has no accept-with-timeout; funnel accepts through a channel
    // and let `recv_timeout` keep the inactivity clock.
    let (sender, receiver) = mpsc::channel();
    let _accept = thread::spawn(move || {
        for stream in listener.incoming() {
            if sender.send(stream).is_err() {
                break;
            }
        }
    });

    while let Ok(stream) = receiver.recv_timeout(timeout) {
        if let Ok(mut stream) = stream {
            // A client that hangs up early is its own problem.
            let _ = stream.write_all(key);
        }
    }

    let _ = fs::remove_file(path);
    Ok(())
}

/// Launch a detached agent process serving `key` for this key file.
///
/// The child runs the hidden [`COMMAND`] entry point with null standard
/// streams in a fresh session, detached from the controlling terminal;
/// the key travels over the child's stdin pipe, never through argv.
/// The caller treats failure as non-fatal.
///
/// # Errors
///
/// Errors if the child cannot be spawned or fed.
pub fn spawn(salt: &[u8; 8], timeout_secs: u64, key: &[u8; 32]) -> io::Result<()> {
    let mut command = Command::new(env::current_exe()?);
    command
        .arg(COMMAND)
        .arg(hex::encode(salt))
        .arg(timeout_secs.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    // A new process group is not enough: the agent would still get the
    // session's SIGHUP when the invoking shell exits. setsid() severs
    // the session and the controlling terminal with it.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let mut child = command.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(key)?;
    }
    // Not reaped; it outlives us by design.
    Ok(())
}
