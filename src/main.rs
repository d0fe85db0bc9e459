mod cmd;

use std::env;
use std::process;

use lessify::Pager;

use cmd::cli;

fn main() {
    let args = match cli::Args::build_from_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{bin}: {err}", bin = env!("CARGO_BIN_NAME"));
            println!("Try '{bin} -h' for help.", bin = env!("CARGO_BIN_NAME"));
            process::exit(2);
        }
    };

    if args.long_help {
        long_help();
    } else if args.short_help {
        short_help();
    } else if args.version {
        version();
    } else if let Some(command) = args.command {
        let ctx = cmd::Context {
            pubkey: args.pubkey,
            seckey: args.seckey,
            agent_timeout_secs: args.agent_timeout_secs,
        };
        if let Err(err) = run(&ctx, command) {
            eprintln!("{bin}: {err}", bin = env!("CARGO_BIN_NAME"));
            process::exit(1);
        }
    }
}

fn run(ctx: &cmd::Context, command: cli::Command) -> enchive::Result<()> {
    match command {
        cli::Command::Keygen(opts) => cmd::keygen(ctx, &opts),
        cli::Command::Fingerprint => cmd::fingerprint(ctx),
        cli::Command::Archive(opts) => cmd::archive(ctx, &opts),
        cli::Command::Extract(opts) => cmd::extract(ctx, &opts),
        cli::Command::Agent { salt, timeout_secs } => cmd::agent(&salt, timeout_secs),
    }
}

fn short_help() {
    println!("{}", short_help_message());
    println!(
        "For full help, see `{bin} --help`.",
        bin = env!("CARGO_BIN_NAME")
    );
}

fn short_help_message() -> String {
    format!(
        "\
{description}

Usage: {bin} [<options>] <command> [<args>]

Commands:
  keygen                 Generate or edit the key pair
  fingerprint            Print the public key's fingerprint
  archive                Encrypt a file to the public key
  extract                Decrypt an archive with the secret key

Options:
  -p, --pubkey <path>    Public key file to use
  -s, --seckey <path>    Secret key file to use
  -a, --agent[=<secs>]   Cache the protection key in a key agent
  -A, --no-agent         Do not touch the key agent
  -h, --help             Show this message and exit
  -V, --version          Show the version and exit
",
        description = env!("CARGO_PKG_DESCRIPTION"),
        bin = env!("CARGO_BIN_NAME"),
    )
}

fn long_help() {
    Pager::page_or_print(&format!(
        "\
{help}
Commands may be abbreviated to any unambiguous prefix; `--` ends option
parsing.

What does {package} do?
  {package} keeps one long-lived key pair. Anything can be archived to
  the public key with no passphrase, and only the (passphrase-protected)
  secret key can extract it again. Keys live in the configuration
  directory unless -p/-s say otherwise.

keygen [--derive[=N]] [--edit] [--force] [--fingerprint]
       [--iterations <N>] [--plain]
  Generate the key pair. With --derive, the secret key is computed from
  a passphrase instead of entropy, so it can be regenerated anywhere
  (N tunes the derivation cost, 5-31). With --edit, reload the existing
  secret key and rewrap it under a new passphrase. Refuses to overwrite
  key files without --force. --plain stores the secret key unprotected;
  an empty protection passphrase does the same. --fingerprint also
  prints the new key's fingerprint.

fingerprint
  Print the public key's fingerprint.

archive [--delete] [<infile> [<outfile>]]
  Encrypt <infile> to <outfile> (default: <infile>{suffix}), or filter
  standard input to standard output. --delete removes <infile> after
  the archive is fully written.

extract [--delete] [<infile> [<outfile>]]
  Decrypt <infile> to <outfile> (default: <infile> minus {suffix}), or
  filter standard input to standard output. The output only survives if
  the archive authenticates.

With --agent, a successfully entered passphrase is cached by a small
background process for <secs> seconds (default 900) of inactivity, so
repeated extracts do not prompt again.
",
        help = short_help_message(),
        package = env!("CARGO_PKG_NAME"),
        suffix = ".enchive",
    ));
}

fn version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}
