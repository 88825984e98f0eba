//! CLI binary for fileshift.
//!
//! The presentation layer: maps CLI flags to `ClientConfig`, renders each
//! conversion state (progress bar while uploading, spinner while processing),
//! "downloads" the result to disk and shows the global conversion total.

use anyhow::{Context, Result};
use clap::Parser;
use fileshift::{
    detect_input_format, format_file_size, load_file, save_converted, Category, ClientConfig,
    ConversionObserver, ConversionState, ConversionTally, Converter, CounterClient, FileInfo,
    InputFormat, OutputFormat, Transport, UploadProgress,
};
use fileshift::format::supported_conversion;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

/// How long to wait for the counter after a success before exiting.
const COUNTER_GRACE: Duration = Duration::from_secs(3);

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a byte progress bar for direct uploads, a spinner for
/// staged uploads and server-side processing, and the cached conversion total.
struct CliObserver {
    bar: ProgressBar,
    quiet: bool,
    tally: Mutex<ConversionTally>,
    counted: Notify,
}

impl CliObserver {
    fn new(show_progress: bool, quiet: bool) -> Arc<Self> {
        let bar = if show_progress {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        Arc::new(Self {
            bar,
            quiet,
            tally: Mutex::new(ConversionTally::default()),
            counted: Notify::new(),
        })
    }

    fn spinner(&self, prefix: &'static str, message: &'static str) {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
        self.bar.set_message(message);
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn byte_bar(&self, total: u64) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Uploading");
        self.bar.reset_eta();
    }

    fn tally(&self) -> u64 {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner).total()
    }

    fn seed_tally(&self, value: u64) {
        self.tally
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(value);
    }
}

impl ConversionObserver for CliObserver {
    fn on_transport_selected(&self, transport: Transport, file: &FileInfo) {
        if !self.quiet {
            let line = format!(
                "{} {}  {}",
                cyan("◆"),
                bold(&format!("Converting {}", file.name)),
                dim(&format!("{} · {} upload", format_file_size(file.size), transport)),
            );
            // A hidden bar swallows println.
            if self.bar.is_hidden() {
                eprintln!("{line}");
            } else {
                self.bar.println(line);
            }
        }
        match transport {
            Transport::Direct => self.byte_bar(file.size),
            Transport::Staged => self.spinner("Uploading", "to storage…"),
        }
    }

    fn on_upload_progress(&self, progress: UploadProgress) {
        if !progress.is_indeterminate() {
            self.bar.set_position(progress.loaded);
        }
    }

    fn on_state_change(&self, state: &ConversionState) {
        match state {
            ConversionState::Processing { .. } => self.spinner("Processing", "converting on server…"),
            ConversionState::Success { .. } | ConversionState::Error { .. } | ConversionState::Idle => {
                self.bar.finish_and_clear()
            }
            ConversionState::Uploading { .. } => {}
        }
    }

    fn on_conversion_counted(&self, total: u64) {
        self.tally
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(total);
        self.counted.notify_one();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Raw photo to JPEG (default for CR2), written next to the input
  fileshift IMG_0001.CR2

  # Choose the output format and location
  fileshift photo.heic --to webp -o out/

  # Ebook to Kindle format
  fileshift novel.epub -o novel.azw3

  # Supported conversions, service health, global total
  fileshift --formats
  fileshift --health
  fileshift --stats

TRANSPORT:
  Files up to 4 MiB are uploaded directly with a byte progress bar. Larger
  files are staged in blob storage first and converted by URL; their upload
  progress is indeterminate. CR2 files may be up to 30 MiB, everything else
  up to 10 MiB.

ENVIRONMENT VARIABLES:
  FILESHIFT_API_URL            Conversion backend base URL
  FILESHIFT_MAX_FILE_SIZE      Size ceiling in bytes (all formats but CR2)
  FILESHIFT_CR2_MAX_FILE_SIZE  Size ceiling in bytes for CR2
  FILESHIFT_STAGING_THRESHOLD  Files above this many bytes use staged upload
  FILESHIFT_BLOB_TOKEN_URL     Blob token endpoint
  FILESHIFT_BLOB_UPLOAD_URL    Blob upload base URL
  FILESHIFT_STATS_URL          Conversion counter endpoint
  FILESHIFT_REQUEST_TIMEOUT    Whole-request timeout in seconds
  RUST_LOG                     Override log filter
"#;

/// Convert images and ebooks through a remote conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "fileshift",
    version,
    about = "Convert CR2/AVIF/WebP/HEIC images and EPUB/MOBI/PDF ebooks via a conversion service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// File to convert.
    #[arg(required_unless_present_any = ["formats", "health", "stats"])]
    input: Option<PathBuf>,

    /// Output format: png, jpg, webp (images) or azw3 (ebooks).
    #[arg(short = 't', long = "to", env = "FILESHIFT_OUTPUT_FORMAT")]
    to: Option<OutputFormat>,

    /// Category the file is expected to belong to. Inferred from the extension when omitted.
    #[arg(long, value_enum)]
    category: Option<CategoryArg>,

    /// Output file or directory. Default: next to the input.
    #[arg(short, long, env = "FILESHIFT_OUTPUT")]
    output: Option<PathBuf>,

    /// Conversion backend base URL.
    #[arg(long, env = "FILESHIFT_API_URL")]
    api_url: Option<String>,

    /// Size ceiling in bytes for every format except CR2.
    #[arg(long, env = "FILESHIFT_MAX_FILE_SIZE")]
    max_file_size: Option<u64>,

    /// Size ceiling in bytes for CR2.
    #[arg(long, env = "FILESHIFT_CR2_MAX_FILE_SIZE")]
    cr2_max_file_size: Option<u64>,

    /// Files above this many bytes are staged in blob storage.
    #[arg(long, env = "FILESHIFT_STAGING_THRESHOLD")]
    staging_threshold: Option<u64>,

    /// Blob token endpoint.
    #[arg(long, env = "FILESHIFT_BLOB_TOKEN_URL")]
    blob_token_url: Option<String>,

    /// Blob upload base URL.
    #[arg(long, env = "FILESHIFT_BLOB_UPLOAD_URL")]
    blob_upload_url: Option<String>,

    /// Conversion counter endpoint.
    #[arg(long, env = "FILESHIFT_STATS_URL")]
    stats_url: Option<String>,

    /// Whole-request timeout in seconds.
    #[arg(long, env = "FILESHIFT_REQUEST_TIMEOUT")]
    timeout: Option<u64>,

    /// List supported conversions and exit.
    #[arg(long)]
    formats: bool,

    /// Probe the conversion service and exit.
    #[arg(long)]
    health: bool,

    /// Print the global conversion total and exit.
    #[arg(long)]
    stats: bool,

    /// Disable progress bar.
    #[arg(long, env = "FILESHIFT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FILESHIFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FILESHIFT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CategoryArg {
    Image,
    Ebook,
}

impl From<CategoryArg> for Category {
    fn from(v: CategoryArg) -> Self {
        match v {
            CategoryArg::Image => Category::Image,
            CategoryArg::Ebook => Category::Ebook,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.formats {
        print_formats();
        return Ok(());
    }

    let config = build_config(&cli)?;
    let observer = CliObserver::new(show_progress, cli.quiet);
    let converter = Converter::builder(config.clone())
        .counter(CounterClient::http(&config).context("Failed to build counter client")?)
        .observer(observer.clone())
        .build()
        .context("Failed to build converter")?;

    // ── Service queries ──────────────────────────────────────────────────
    if cli.health {
        if converter.health_check().await {
            println!("{} {} is up", green("✔"), config.api_url);
            return Ok(());
        }
        anyhow::bail!("{} is not reachable", config.api_url);
    }

    if cli.stats {
        println!("{}", converter.read_count().await);
        return Ok(());
    }

    // ── Convert ──────────────────────────────────────────────────────────
    let input = cli
        .input
        .as_deref()
        .context("No input file given")?;
    observer.seed_tally(converter.read_count().await);

    let file = load_file(input).await.context("Failed to read input")?;
    let category = cli
        .category
        .map(Category::from)
        .or_else(|| detect_input_format(&file.name).map(|f| f.category()))
        .unwrap_or_default();

    // Ctrl-C aborts the upload instead of killing the process mid-request.
    let on_interrupt = converter.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let state = converter
        .select_file(file, category, cli.to)
        .await
        .context("Conversion failed")?;

    match state {
        ConversionState::Success { file, converted } => {
            let target = cli
                .output
                .clone()
                .unwrap_or_else(|| default_output_dir(input));
            let written = save_converted(&converted, &target)
                .await
                .context("Failed to save converted file")?;

            let _ = tokio::time::timeout(COUNTER_GRACE, observer.counted.notified()).await;

            if !cli.quiet {
                eprintln!(
                    "{}  {} ({})  →  {} ({})",
                    green("✔"),
                    file.name,
                    format_file_size(file.size),
                    bold(&written.display().to_string()),
                    format_file_size(converted.bytes.len() as u64),
                );
                let total = observer.tally();
                if total > 0 {
                    eprintln!("   {}", dim(&format!("{total} files converted so far")));
                }
            }
            Ok(())
        }
        ConversionState::Error { file, message } => {
            if !cli.quiet {
                eprintln!("{} {}  {}", red("✘"), file.name, red(&message));
            }
            anyhow::bail!("{message}")
        }
        other => anyhow::bail!("Conversion ended in unexpected state '{}'", other.phase()),
    }
}

/// Map CLI args to `ClientConfig`.
fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder();
    if let Some(ref url) = cli.api_url {
        builder = builder.api_url(url.clone());
    }
    if let Some(n) = cli.max_file_size {
        builder = builder.max_file_size(n);
    }
    if let Some(n) = cli.cr2_max_file_size {
        builder = builder.cr2_max_file_size(n);
    }
    if let Some(n) = cli.staging_threshold {
        builder = builder.staging_threshold(n);
    }
    if let Some(ref url) = cli.blob_token_url {
        builder = builder.blob_token_url(url.clone());
    }
    if let Some(ref url) = cli.blob_upload_url {
        builder = builder.blob_upload_url(url.clone());
    }
    if let Some(ref url) = cli.stats_url {
        builder = builder.stats_url(url.clone());
    }
    if let Some(secs) = cli.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    builder.build().context("Invalid configuration")
}

/// Directory of the input file, or the working directory.
fn default_output_dir(input: &Path) -> PathBuf {
    match input.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn print_formats() {
    println!("{:<6} {:<8} {:<8} {}", "INPUT", "CATEGORY", "DEFAULT", "OUTPUTS");
    for input in InputFormat::ALL {
        let Some(row) = supported_conversion(input) else {
            continue;
        };
        let outputs: Vec<&str> = row.allowed_outputs.iter().map(OutputFormat::as_str).collect();
        println!(
            "{:<6} {:<8} {:<8} {}",
            input.as_str(),
            row.category.to_string(),
            row.default_output.as_str(),
            outputs.join(", ")
        );
    }
}
