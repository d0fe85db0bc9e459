#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const ENCHIVE: &str = env!("CARGO_BIN_EXE_enchive");
const TMP_DIR: &str = env!("CARGO_TARGET_TMPDIR");

#[derive(Debug)]
pub struct Output {
    pub exit_code: i32,
    pub stdout: String,
    pub stdout_raw: Vec<u8>,
    pub stderr: String,
}

/// Fresh per-test scratch directory under the target tmpdir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = Path::new(TMP_DIR).join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Deterministic, non-trivial test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

pub fn write_test_file(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, payload(len)).unwrap();
    path
}

pub struct KeyPair {
    pub public: PathBuf,
    pub secret: PathBuf,
}

impl KeyPair {
    pub fn public(&self) -> &str {
        self.public.to_str().unwrap()
    }

    pub fn secret(&self) -> &str {
        self.secret.to_str().unwrap()
    }
}

/// Generate an unprotected key pair so no terminal is involved.
pub fn generate_plain_keys(dir: &Path, name: &str) -> KeyPair {
    let keys = KeyPair {
        public: dir.join(format!("{name}.pub")),
        secret: dir.join(format!("{name}.sec")),
    };
    let output = run(&[
        "-p",
        keys.public(),
        "-s",
        keys.secret(),
        "keygen",
        "--plain",
    ]);
    assert_eq!(output.exit_code, 0, "{output:?}");
    keys
}

pub fn run(args: &[&str]) -> Output {
    run_with_stdin(args, None)
}

pub fn run_with_stdin(args: &[&str], stdin: Option<&[u8]>) -> Output {
    let mut command = Command::new(ENCHIVE);
    command.env("NO_COLOR", "1");
    command.env_remove("PAGER");

    for arg in args {
        command.arg(arg);
    }

    let output = if let Some(stdin) = stdin {
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        let mut child = command.spawn().unwrap();
        child.stdin.take().unwrap().write_all(stdin).unwrap();
        child.wait_with_output().unwrap()
    } else {
        command.output().unwrap()
    };

    Output {
        exit_code: output.status.code().unwrap(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stdout_raw: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}

pub fn checksum(path: &Path) -> String {
    let payload = std::fs::read(path).unwrap();
    let hash = blake3::hash(&payload);
    // Hexadecimal is nicer to debug than plain bytes.
    hash.to_hex().to_string()
}
