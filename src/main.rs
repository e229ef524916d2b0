use std::fs::{self, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use file_guard::{
    FileGuard, GuardConfig, GuardError, HashAlg, Severity, Snapshot, hash_file_with_buffer,
    log_event,
};
use secrecy::SecretString;

/// Exit status for a metadata store that failed its integrity check.
const EXIT_TAMPER: u8 = 3;
/// Exit status for content that no longer matches its recorded fingerprint.
const EXIT_MISMATCH: u8 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "file-guard",
    version,
    about = "Back up, fingerprint and encrypt files; detect tampering"
)]
struct Cli {
    /// Configuration file (TOML). Defaults are used when omitted.
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up, fingerprint and encrypt a file
    Secure(PasswordArgs),
    /// Decrypt a secured file and verify its fingerprint
    Unlock(PasswordArgs),
    /// Restore a file from its newest snapshot
    Restore(FileArg),
    /// Take a snapshot of a file
    Backup(FileArg),
    /// List snapshots of a file, newest first
    Versions(FileArg),
    /// Compute a file fingerprint
    Hash(HashArgs),
    /// Compare a file with its recorded fingerprint
    Verify(FileArg),
    /// Forget the recorded metadata of a file
    Purge(FileArg),
    /// Show metadata store integrity and recorded files
    Status,
}

#[derive(Args, Debug)]
struct FileArg {
    file: PathBuf,
}

#[derive(Args, Debug)]
struct PasswordArgs {
    file: PathBuf,

    /// Read password from file instead of interactive prompt
    #[arg(short = 'p', long = "password-file")]
    password_file: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum HashAlgArg {
    Sha256,
    Sha512,
    #[value(alias = "sha3256", alias = "sha3_256")]
    Sha3_256,
    Blake3,
}

impl From<HashAlgArg> for HashAlg {
    fn from(a: HashAlgArg) -> Self {
        match a {
            HashAlgArg::Sha256 => HashAlg::Sha256,
            HashAlgArg::Sha512 => HashAlg::Sha512,
            HashAlgArg::Sha3_256 => HashAlg::Sha3_256,
            HashAlgArg::Blake3 => HashAlg::Blake3,
        }
    }
}

#[derive(Args, Debug)]
struct HashArgs {
    /// File to hash
    file: PathBuf,

    /// Algorithm to use; defaults to the configured one
    #[arg(long, value_enum)]
    alg: Option<HashAlgArg>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            match err.downcast_ref::<GuardError>() {
                Some(GuardError::CriticalTamper(_)) => ExitCode::from(EXIT_TAMPER),
                Some(GuardError::IntegrityMismatch { .. }) => ExitCode::from(EXIT_MISMATCH),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = GuardConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_logging(&config);

    let open = |config| FileGuard::open(config).context("metadata store rejected");
    match cli.cmd {
        Command::Hash(a) => cmd_hash(&config, &a),
        Command::Secure(a) => cmd_secure(&mut open(config)?, &a),
        Command::Unlock(a) => cmd_unlock(&open(config)?, &a),
        Command::Restore(a) => {
            let restored = open(config)?.restore(&a.file)?;
            eprintln!(
                "Restored {} from snapshot {} ({} bytes)",
                restored.target.display(),
                restored.snapshot.stamp,
                restored.bytes
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Backup(a) => {
            let snapshot = open(config)?.backup(&a.file)?;
            eprintln!("Wrote {}", snapshot.path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Versions(a) => {
            print_versions(&open(config)?.versions(&a.file)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify(a) => {
            let verification = open(config)?.verify(&a.file)?;
            println!("{}", verification.detail());
            Ok(if verification.matched {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_MISMATCH)
            })
        }
        Command::Purge(a) => {
            if open(config)?.purge(&a.file)? {
                eprintln!("Purged metadata for {}", a.file.display());
            } else {
                eprintln!("No metadata recorded for {}", a.file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => cmd_status(&open(config)?),
    }
}

/// Log to stderr and append to the security log.
///
/// `RUST_LOG` overrides the configured level. If the log file cannot be opened,
/// logging continues on stderr only.
fn init_logging(config: &GuardConfig) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let log_path = config.log_path();
    let log_file = log_path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(&log_path));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    match log_file {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .init();
            tracing::info!(
                target: "alert",
                "session started ({} {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            );
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            log_event(
                Severity::Warning,
                format!("security log {} unavailable: {e}", log_path.display()),
            );
        }
    }
}

fn read_password(password_file: &Option<PathBuf>, prompt: &str) -> Result<SecretString> {
    if let Some(path) = password_file {
        let mut s = String::new();
        fs::File::open(path)
            .with_context(|| format!("cannot open password file {}", path.display()))?
            .read_to_string(&mut s)?;

        let secret = SecretString::new(
            s.trim_end_matches(&['\r', '\n'][..])
                .to_owned()
                .into_boxed_str(),
        );

        use zeroize::Zeroize;
        s.zeroize();
        Ok(secret)
    } else {
        let pw = rpassword::prompt_password(prompt)?;
        Ok(SecretString::new(pw.into_boxed_str()))
    }
}

fn cmd_secure(guard: &mut FileGuard, a: &PasswordArgs) -> Result<ExitCode> {
    let pw = read_password(&a.password_file, "Password: ")?;
    let report = guard
        .secure_file(&a.file, &pw)
        .with_context(|| format!("securing {} failed", a.file.display()))?;
    eprintln!("Snapshot {}", report.snapshot.path.display());
    eprintln!("Fingerprint {}", report.fingerprint);
    eprintln!("Wrote {}", report.artifact.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_unlock(guard: &FileGuard, a: &PasswordArgs) -> Result<ExitCode> {
    let pw = read_password(&a.password_file, "Password: ")?;
    let report = guard
        .unlock_file(&a.file, &pw)
        .with_context(|| format!("unlocking {} failed", a.file.display()))?;
    eprintln!("Wrote {}", report.plaintext.display());
    println!("{}", report.verification.detail());
    Ok(if report.verification.matched {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_MISMATCH)
    })
}

fn cmd_hash(config: &GuardConfig, args: &HashArgs) -> Result<ExitCode> {
    let alg = args.alg.map_or(config.hash.algorithm, HashAlg::from);
    let fingerprint = hash_file_with_buffer(&args.file, alg, config.hash.buffer_size)?;
    println!("{fingerprint}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(guard: &FileGuard) -> Result<ExitCode> {
    guard.check_store()?;
    let store = guard.store();
    println!("store: {} (intact)", store.store_path().display());
    println!("records: {}", store.len());
    for (name, record) in store.iter() {
        println!("  {name}  {}", record.hash.short(16));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_versions(snapshots: &[Snapshot]) {
    if snapshots.is_empty() {
        println!("no snapshots");
        return;
    }
    for s in snapshots {
        println!("{}  {:>10} bytes  {}", s.stamp, s.size, display_name(&s.path));
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
