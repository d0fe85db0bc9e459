use std::path::PathBuf;

use enchive::kdf::{MAX_COST_EXPONENT, MIN_COST_EXPONENT};
use enchive::keyfile::PROTECT_COST_EXPONENT;
use enchive::keys::DERIVE_COST_EXPONENT;

#[cfg(unix)]
const AGENT_COMMAND: &str = enchive::agent::COMMAND;
#[cfg(not(unix))]
const AGENT_COMMAND: &str = "agent";

#[cfg(unix)]
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = enchive::agent::DEFAULT_TIMEOUT_SECS;
#[cfg(not(unix))]
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 900;

/// Public commands, eligible for unambiguous abbreviation.
const COMMANDS: [&str; 4] = ["archive", "extract", "fingerprint", "keygen"];

#[derive(Debug, Eq, PartialEq)]
pub struct KeygenArgs {
    /// Cost exponent for passphrase-derived key generation.
    pub derive: Option<u8>,
    pub edit: bool,
    pub force: bool,
    pub fingerprint: bool,
    /// Cost exponent for the protection wrap.
    pub iterations: u8,
    pub plain: bool,
}

impl Default for KeygenArgs {
    fn default() -> Self {
        Self {
            derive: None,
            edit: false,
            force: false,
            fingerprint: false,
            iterations: PROTECT_COST_EXPONENT,
            plain: false,
        }
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
pub struct FileArgs {
    pub delete: bool,
    pub infile: Option<PathBuf>,
    pub outfile: Option<PathBuf>,
}

#[derive(Debug, Eq, PartialEq)]
pub enum Command {
    Keygen(KeygenArgs),
    Fingerprint,
    Archive(FileArgs),
    Extract(FileArgs),
    /// Hidden serve entry point; exact name only, never abbreviated.
    Agent { salt: [u8; 8], timeout_secs: u64 },
}

#[derive(Debug, Default, Eq, PartialEq)]
pub struct Args {
    pub command: Option<Command>,
    pub pubkey: Option<PathBuf>,
    pub seckey: Option<PathBuf>,
    /// Agent inactivity timeout; `0` means the agent is disabled.
    pub agent_timeout_secs: u64,
    pub short_help: bool,
    pub long_help: bool,
    pub version: bool,
}

impl Args {
    pub fn build_from_args<I>(cli_args: I) -> Result<Self, String>
    where
        I: Iterator<Item: AsRef<str> + ToString>,
    {
        let mut args = Self::default();
        let mut tokens = cli_args.map(|arg| arg.to_string());
        // Set once `--` is seen; everything after it is taken verbatim.
        let mut literal = false;

        // Global options come before the command word.
        let command_word = loop {
            let Some(token) = tokens.next() else {
                // Help and version requests are complete in themselves.
                if args.short_help || args.long_help || args.version {
                    return Ok(args);
                }
                return Err("missing command".to_string());
            };
            if literal || !token.starts_with('-') {
                break token;
            }
            match token.as_str() {
                "--" => literal = true,
                "-h" => args.short_help = true,
                "--help" => args.long_help = true,
                "-V" | "--version" => args.version = true,
                "-A" | "--no-agent" => args.agent_timeout_secs = 0,
                other => {
                    if let Some(value) = match_option(other, "-p", "--pubkey") {
                        let value = take_value("--pubkey", value, &mut tokens)?;
                        args.pubkey = Some(PathBuf::from(value));
                    } else if let Some(value) = match_option(other, "-s", "--seckey") {
                        let value = take_value("--seckey", value, &mut tokens)?;
                        args.seckey = Some(PathBuf::from(value));
                    } else if let Some(value) = match_option(other, "-a", "--agent") {
                        // The value is optional, so only the attached
                        // forms (`-a600`, `--agent=600`) carry one.
                        args.agent_timeout_secs = match value {
                            Some(seconds) => seconds
                                .parse()
                                .map_err(|_| format!("invalid value for '--agent': '{seconds}'"))?,
                            None => DEFAULT_AGENT_TIMEOUT_SECS,
                        };
                    } else {
                        return Err(format!("unknown option '{other}'"));
                    }
                }
            }
        };

        match resolve_command(&command_word)? {
            "keygen" => args.command = Some(parse_keygen(&mut tokens, literal)?),
            "fingerprint" => args.command = Some(parse_fingerprint(&mut tokens, literal)?),
            "archive" => {
                args.command = Some(Command::Archive(parse_file_args(&mut tokens, literal)?));
            }
            "extract" => {
                args.command = Some(Command::Extract(parse_file_args(&mut tokens, literal)?));
            }
            _ => args.command = Some(parse_agent(&mut tokens)?),
        }

        Ok(args)
    }
}

/// Resolve a possibly-abbreviated command word.
fn resolve_command(word: &str) -> Result<&'static str, String> {
    if word == AGENT_COMMAND {
        return Ok(AGENT_COMMAND);
    }
    let matches: Vec<&'static str> = COMMANDS
        .iter()
        .filter(|command| command.starts_with(word))
        .copied()
        .collect();
    match matches[..] {
        [command] => Ok(command),
        [] => Err(format!("unknown command '{word}'")),
        _ => Err(format!("ambiguous command '{word}'")),
    }
}

/// Match `token` against an option, returning its attached value.
///
/// `Some(None)` is a bare match (`-k`, `--iterations`); `Some(Some(v))`
/// carries an attached value (`-k28`, `--iterations=28`).
fn match_option(token: &str, short: &str, long: &str) -> Option<Option<String>> {
    if token == short || token == long {
        return Some(None);
    }
    if !token.starts_with("--") {
        if let Some(value) = token.strip_prefix(short) {
            return Some(Some(value.to_string()));
        }
    }
    if let Some(rest) = token.strip_prefix(long) {
        if let Some(value) = rest.strip_prefix('=') {
            return Some(Some(value.to_string()));
        }
    }
    None
}

fn take_value(
    option: &str,
    attached: Option<String>,
    tokens: &mut impl Iterator<Item = String>,
) -> Result<String, String> {
    attached
        .or_else(|| tokens.next())
        .ok_or_else(|| format!("missing value for '{option}'"))
}

fn parse_exponent(option: &str, value: &str) -> Result<u8, String> {
    let exponent: u8 = value
        .parse()
        .map_err(|_| format!("invalid value for '{option}': '{value}'"))?;
    if !(MIN_COST_EXPONENT..=MAX_COST_EXPONENT).contains(&exponent) {
        return Err(format!(
            "'{option}' must be in [{MIN_COST_EXPONENT}, {MAX_COST_EXPONENT}] (got {exponent})"
        ));
    }
    Ok(exponent)
}

fn parse_keygen(
    tokens: &mut impl Iterator<Item = String>,
    mut literal: bool,
) -> Result<Command, String> {
    let mut opts = KeygenArgs::default();
    while let Some(token) = tokens.next() {
        let token = token.as_str();
        if literal || !token.starts_with('-') {
            return Err(format!("unexpected argument '{token}'"));
        }
        match token {
            "--" => literal = true,
            "-e" | "--edit" => opts.edit = true,
            "-f" | "--force" => opts.force = true,
            "-i" | "--fingerprint" => opts.fingerprint = true,
            "-u" | "--plain" => opts.plain = true,
            other => {
                if let Some(value) = match_option(other, "-d", "--derive") {
                    // Optional value; attached forms only.
                    opts.derive = Some(match value {
                        Some(exponent) => parse_exponent("--derive", &exponent)?,
                        None => DERIVE_COST_EXPONENT,
                    });
                } else if let Some(value) = match_option(other, "-k", "--iterations") {
                    let value = take_value("--iterations", value, tokens)?;
                    opts.iterations = parse_exponent("--iterations", &value)?;
                } else {
                    return Err(format!("unknown option '{other}'"));
                }
            }
        }
    }
    if opts.derive.is_some() && opts.edit {
        return Err("--derive and --edit are mutually exclusive".to_string());
    }
    Ok(Command::Keygen(opts))
}

fn parse_fingerprint(
    tokens: &mut impl Iterator<Item = String>,
    mut literal: bool,
) -> Result<Command, String> {
    while let Some(token) = tokens.next() {
        match token.as_str() {
            "--" if !literal => literal = true,
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }
    Ok(Command::Fingerprint)
}

fn parse_file_args(
    tokens: &mut impl Iterator<Item = String>,
    mut literal: bool,
) -> Result<FileArgs, String> {
    let mut opts = FileArgs::default();
    for token in tokens {
        if !literal && token.starts_with('-') {
            match token.as_str() {
                "--" => literal = true,
                "-d" | "--delete" => opts.delete = true,
                other => return Err(format!("unknown option '{other}'")),
            }
        } else if opts.infile.is_none() {
            opts.infile = Some(PathBuf::from(token));
        } else if opts.outfile.is_none() {
            opts.outfile = Some(PathBuf::from(token));
        } else {
            return Err(format!("unexpected argument '{token}'"));
        }
    }
    Ok(opts)
}

fn parse_agent(tokens: &mut impl Iterator<Item = String>) -> Result<Command, String> {
    let salt_hex = tokens
        .next()
        .ok_or_else(|| "missing agent socket id".to_string())?;
    let timeout = tokens
        .next()
        .ok_or_else(|| "missing agent timeout".to_string())?;
    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    let salt: [u8; 8] = hex::decode(&salt_hex)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| format!("bad agent socket id '{salt_hex}'"))?;
    let timeout_secs = timeout
        .parse()
        .map_err(|_| format!("bad agent timeout '{timeout}'"))?;
    Ok(Command::Agent { salt, timeout_secs })
}
