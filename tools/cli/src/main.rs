//! InvisiLock CLI - password-based encryption for files, images and text.
//!
//! Every operation runs on a blocking worker so the command can be
//! interrupted with Ctrl-C or a `--timeout` deadline. Output files are
//! written through a temporary file and only appear once the whole
//! operation has succeeded.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use invisilock_common::{Error, ErrorKind, ImageFormat, PayloadKind};
use invisilock_crypto::{
    armor, inspect, Algorithm, DecryptOptions, DecryptStream, EncryptStream, EngineConfig,
    Header, KdfParams, Password,
};

const ENCRYPTED_EXTENSION: &str = "encrypted";

#[derive(Parser)]
#[command(name = "invisilock")]
#[command(about = "InvisiLock - Password-based encryption for files, images and text")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read the password from the first line of stdin instead of prompting.
    #[arg(long, global = true)]
    password_stdin: bool,

    /// Abort the operation after this many seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Cipher for new containers: "xchacha20poly1305" or "aes256gcm".
    #[arg(long, global = true)]
    algorithm: Option<String>,

    /// KDF strength: "interactive", "moderate", or "sensitive".
    #[arg(long, global = true)]
    strength: Option<String>,

    /// Plaintext bytes per chunk.
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Chunks processed in parallel.
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file, image, or text.
    Encrypt {
        #[command(subcommand)]
        payload: PayloadCommand,
    },

    /// Decrypt a file, image, or armored text.
    Decrypt {
        #[command(subcommand)]
        payload: PayloadCommand,
    },

    /// Show container header fields. No password needed.
    Inspect {
        /// Container file.
        #[arg(short, long)]
        input: PathBuf,

        /// Print the header as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Subcommand)]
enum PayloadCommand {
    /// Any file.
    File {
        /// Input file.
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default derived from the input name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// An image file (PNG, JPEG, GIF, WebP, BMP, TIFF).
    Image {
        /// Input file.
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default derived from the input name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Text, exchanged as an armored string. Reads stdin when omitted.
    Text {
        /// Text to encrypt, or armored text to decrypt.
        #[arg(short, long)]
        text: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to install logger: {}", e);
        return ExitCode::from(1);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let timeout = cli.timeout.map(Duration::from_secs);
    let from_stdin = cli.password_stdin;

    match cli.command {
        Commands::Encrypt { payload } => {
            let password = read_password(from_stdin, true)?;
            match payload {
                PayloadCommand::File { input, output } => {
                    cmd_encrypt_file(PayloadKind::File, password, input, output, config, timeout)
                        .await
                }
                PayloadCommand::Image { input, output } => {
                    cmd_encrypt_file(PayloadKind::Image, password, input, output, config, timeout)
                        .await
                }
                PayloadCommand::Text { text } => {
                    cmd_encrypt_text(password, text, config, timeout).await
                }
            }
        }

        Commands::Decrypt { payload } => {
            let password = read_password(from_stdin, false)?;
            let options = config.decrypt_options();
            match payload {
                PayloadCommand::File { input, output } => {
                    cmd_decrypt_file(PayloadKind::File, password, input, output, options, timeout)
                        .await
                }
                PayloadCommand::Image { input, output } => {
                    cmd_decrypt_file(PayloadKind::Image, password, input, output, options, timeout)
                        .await
                }
                PayloadCommand::Text { text } => {
                    cmd_decrypt_text(password, text, options, timeout).await
                }
            }
        }

        Commands::Inspect { input, json } => cmd_inspect(&input, json),

        Commands::Config => cmd_config(&config),
    }
}

/// Build the effective configuration: file first, then flag overrides.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            EngineConfig::from_json(&json)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    if let Some(algorithm) = &cli.algorithm {
        config.algorithm = algorithm.parse::<Algorithm>()?;
    }
    if let Some(strength) = &cli.strength {
        config.kdf = KdfParams::from_strength(strength)?;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    config.validate()?;
    debug!(
        algorithm = %config.algorithm,
        memory_kib = config.kdf.memory_cost,
        chunk_size = config.chunk_size,
        workers = config.workers,
        "Configuration loaded"
    );
    Ok(config)
}

/// Read the password from stdin or the terminal.
fn read_password(from_stdin: bool, confirm: bool) -> Result<Password> {
    let password = if from_stdin {
        let mut line = Vec::new();
        io::stdin()
            .lock()
            .read_until(b'\n', &mut line)
            .context("Failed to read password from stdin")?;
        strip_line_ending(&mut line);
        Password::new(line)
    } else {
        let password = prompt_password("Enter password: ")?;
        if confirm {
            let again = prompt_password("Confirm password: ")?;
            if !password.matches(&again) {
                return Err(Error::InvalidInput("Passwords do not match".to_string()).into());
            }
        }
        password
    };

    password.require_non_empty()?;
    Ok(password)
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Password> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Password::from(password))
}

fn strip_line_ending(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

/// Read text input from the argument or the rest of stdin.
fn read_text(text: Option<String>) -> Result<String> {
    match text {
        Some(text) => Ok(text),
        None => {
            let mut buf = String::new();
            io::stdin()
                .lock()
                .read_to_string(&mut buf)
                .context("Failed to read text from stdin")?;
            if buf.ends_with('\n') {
                buf.pop();
                if buf.ends_with('\r') {
                    buf.pop();
                }
            }
            Ok(buf)
        }
    }
}

fn default_encrypt_output(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    PathBuf::from(name)
}

fn default_decrypt_output(input: &Path) -> PathBuf {
    if input.extension() == Some(OsStr::new(ENCRYPTED_EXTENSION)) {
        input.with_extension("")
    } else {
        let mut name = input.as_os_str().to_owned();
        name.push(".decrypted");
        PathBuf::from(name)
    }
}

fn resolve_output(
    input: &Path,
    output: Option<PathBuf>,
    default: fn(&Path) -> PathBuf,
) -> Result<PathBuf> {
    let output = output.unwrap_or_else(|| default(input));
    if output == input {
        return Err(Error::InvalidInput(format!(
            "Output {} would overwrite the input",
            output.display()
        ))
        .into());
    }
    Ok(output)
}

/// Run a blocking operation on a worker thread.
///
/// Ctrl-C and the optional deadline set the cancel flag; the worker checks
/// it between chunks. The worker is always joined before returning so no
/// temporary output outlives the command. A worker that finishes its job
/// despite the flag still reports success.
async fn run_blocking<T, F>(timeout: Option<Duration>, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AtomicBool) -> Result<T> + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let mut handle = tokio::task::spawn_blocking(move || job(&flag));

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let reason = tokio::select! {
        joined = &mut handle => {
            return joined.context("Worker task failed")?;
        }
        _ = deadline => "operation timed out",
        _ = tokio::signal::ctrl_c() => "interrupted",
    };

    warn!("Cancelling: {}", reason);
    cancel.store(true, Ordering::SeqCst);
    match handle.await {
        Ok(Ok(value)) => {
            warn!("Operation finished before it could be cancelled");
            Ok(value)
        }
        _ => Err(Error::Cancelled(reason.to_string()).into()),
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        return Err(Error::Cancelled("operation cancelled".to_string()).into());
    }
    Ok(())
}

/// Output file that only appears at its destination after `commit`.
///
/// Dropping it without committing removes the temporary file.
struct AtomicOutput {
    temp: NamedTempFile,
    target: PathBuf,
}

impl AtomicOutput {
    fn create(target: &Path) -> Result<Self> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.temp.write_all(bytes).context("Failed to write output")?;
        Ok(())
    }

    fn commit(mut self) -> Result<()> {
        self.temp.flush().context("Failed to flush output")?;
        self.temp.as_file().sync_all().context("Failed to sync output")?;
        self.temp
            .persist(&self.target)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write {}", self.target.display()))?;
        Ok(())
    }
}

fn open_input(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Reject inputs that do not start with a known image signature.
fn require_image(file: &mut File, path: &Path) -> Result<ImageFormat> {
    let mut head = Vec::with_capacity(ImageFormat::SNIFF_LEN);
    Read::by_ref(file)
        .take(ImageFormat::SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    file.seek(SeekFrom::Start(0))
        .with_context(|| format!("Failed to read {}", path.display()))?;

    ImageFormat::sniff(&head).ok_or_else(|| {
        Error::InvalidInput(format!("{} is not a recognized image", path.display())).into()
    })
}

fn encrypt_file_job(
    kind: PayloadKind,
    password: Password,
    input: PathBuf,
    output: PathBuf,
    config: EngineConfig,
    cancel: &AtomicBool,
) -> Result<u64> {
    let mut file = open_input(&input)?;
    if kind == PayloadKind::Image {
        let format = require_image(&mut file, &input)?;
        debug!("Detected {} image", format.mime_type());
    }

    let stream = EncryptStream::new(&password, BufReader::new(file), &config)?;
    password.destroy();

    let mut sink = AtomicOutput::create(&output)?;
    let mut written = 0u64;
    for piece in stream {
        check_cancel(cancel)?;
        let piece = piece?;
        sink.write_all(&piece)?;
        written += piece.len() as u64;
    }
    check_cancel(cancel)?;
    sink.commit()?;
    Ok(written)
}

fn decrypt_file_job(
    kind: PayloadKind,
    password: Password,
    input: PathBuf,
    output: PathBuf,
    options: DecryptOptions,
    cancel: &AtomicBool,
) -> Result<u64> {
    let file = open_input(&input)?;
    let stream = DecryptStream::new(&password, BufReader::new(file), &options)?;
    password.destroy();

    let mut sink = AtomicOutput::create(&output)?;
    let mut written = 0u64;
    for chunk in stream {
        check_cancel(cancel)?;
        let chunk = chunk?;
        if written == 0 && kind == PayloadKind::Image && ImageFormat::sniff(&chunk).is_none() {
            warn!("Decrypted data does not look like a known image format");
        }
        sink.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    check_cancel(cancel)?;
    sink.commit()?;
    Ok(written)
}

/// Encrypt a file or image.
async fn cmd_encrypt_file(
    kind: PayloadKind,
    password: Password,
    input: PathBuf,
    output: Option<PathBuf>,
    config: EngineConfig,
    timeout: Option<Duration>,
) -> Result<()> {
    let output = resolve_output(&input, output, default_encrypt_output)?;
    info!("Encrypting {} {} -> {}", kind, input.display(), output.display());

    let target = output.clone();
    let written = run_blocking(timeout, move |cancel| {
        encrypt_file_job(kind, password, input, target, config, cancel)
    })
    .await?;

    println!("Encrypted {} written to {} ({} bytes)", kind, output.display(), written);
    Ok(())
}

/// Decrypt a file or image.
async fn cmd_decrypt_file(
    kind: PayloadKind,
    password: Password,
    input: PathBuf,
    output: Option<PathBuf>,
    options: DecryptOptions,
    timeout: Option<Duration>,
) -> Result<()> {
    let output = resolve_output(&input, output, default_decrypt_output)?;
    info!("Decrypting {} {} -> {}", kind, input.display(), output.display());

    let target = output.clone();
    let written = run_blocking(timeout, move |cancel| {
        decrypt_file_job(kind, password, input, target, options, cancel)
    })
    .await?;

    println!("Decrypted {} written to {} ({} bytes)", kind, output.display(), written);
    Ok(())
}

/// Encrypt text and print it armored.
async fn cmd_encrypt_text(
    password: Password,
    text: Option<String>,
    config: EngineConfig,
    timeout: Option<Duration>,
) -> Result<()> {
    let text = read_text(text)?;
    info!("Encrypting {}", PayloadKind::Text);

    let armored = run_blocking(timeout, move |cancel| {
        let stream = EncryptStream::new(&password, text.as_bytes(), &config)?;
        password.destroy();

        let mut container = Vec::new();
        for piece in stream {
            check_cancel(cancel)?;
            container.extend_from_slice(&piece?);
        }
        Ok(armor::wrap(&container))
    })
    .await?;

    println!("{}", armored);
    Ok(())
}

/// Decrypt armored text and print it.
async fn cmd_decrypt_text(
    password: Password,
    text: Option<String>,
    options: DecryptOptions,
    timeout: Option<Duration>,
) -> Result<()> {
    let container = armor::unwrap(&read_text(text)?)?;
    info!("Decrypting {}", PayloadKind::Text);

    let plaintext = run_blocking(timeout, move |cancel| {
        let stream = DecryptStream::new(&password, container.as_slice(), &options)?;
        password.destroy();

        let mut plaintext = Vec::new();
        for chunk in stream {
            check_cancel(cancel)?;
            plaintext.extend_from_slice(&chunk?);
        }
        Ok(plaintext)
    })
    .await?;

    let text = String::from_utf8(plaintext).map_err(|_| {
        Error::InvalidInput("Decrypted data is not UTF-8 text; use 'decrypt file'".to_string())
    })?;
    println!("{}", text);
    Ok(())
}

fn describe_header(header: &Header) -> serde_json::Value {
    serde_json::json!({
        "version": header.version,
        "algorithm": header.algorithm.name(),
        "salt_bytes": header.salt.len(),
        "kdf": {
            "memory_kib": header.kdf.memory_cost,
            "iterations": header.kdf.time_cost,
            "lanes": header.kdf.parallelism,
        },
        "base_nonce_bytes": header.base_nonce.len(),
        "chunk_size": header.chunk_size,
        "header_bytes": header.encoded_len(),
    })
}

/// Show container header fields.
fn cmd_inspect(input: &Path, json: bool) -> Result<()> {
    let header = inspect(BufReader::new(open_input(input)?))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&describe_header(&header))?);
        return Ok(());
    }

    println!("Container: {}", input.display());
    println!("  Format version: {}", header.version);
    println!("  Algorithm: {}", header.algorithm);
    println!("  Salt: {} bytes", header.salt.len());
    println!(
        "  KDF: Argon2id, {} KiB, {} iterations, {} lanes",
        header.kdf.memory_cost, header.kdf.time_cost, header.kdf.parallelism
    );
    println!("  Chunk size: {} bytes", header.chunk_size);
    println!("  Header size: {} bytes", header.encoded_len());

    Ok(())
}

/// Print the effective configuration.
fn cmd_config(config: &EngineConfig) -> Result<()> {
    println!("{}", config.to_json()?);
    Ok(())
}

/// Map an error onto the process exit code of its kind.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<Error>() {
            return e.exit_code();
        }
        if cause.downcast_ref::<io::Error>().is_some() {
            return ErrorKind::Io.exit_code();
        }
    }
    1
}
