//! # fileshift
//!
//! Client side of a file-conversion service: pick a file, validate it
//! locally, ship it to the conversion backend over the right transport, and
//! track the result in a single observable state.
//!
//! ## Why two transports?
//!
//! The hosting platform in front of the conversion endpoint rejects request
//! bodies above roughly 4.5 MB. Small files go straight to the endpoint as a
//! multipart upload with byte progress. Anything larger than the staging
//! threshold (4 MiB) is first uploaded to blob storage with a short-lived
//! token, and the backend is then asked to convert it by URL.
//!
//! ## Flow Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Resolve    extension (or MIME type) → input format + default output
//!  ├─ 2. Validate   category, per-format size ceiling, non-empty, output allowed
//!  ├─ 3. Transport  ≤ 4 MiB direct multipart │ > 4 MiB blob upload + by-URL
//!  ├─ 4. Convert    uploading → processing → success | error
//!  └─ 5. Count      best-effort bump of the global conversion counter
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fileshift::{Category, ClientConfig, Converter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoints from FILESHIFT_API_URL and friends
//!     let converter = Converter::http(ClientConfig::from_env()?)?;
//!     let converted = converter
//!         .convert_to_file("IMG_0001.CR2", "out/", Category::Image, None)
//!         .await?;
//!     eprintln!("wrote {} ({})", converted.filename, converted.content_type);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fileshift` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fileshift = { version = "0.1", default-features = false }
//! ```
//!
//! ## Supported Conversions
//!
//! | Input | Category | Default output | Allowed outputs |
//! |-------|----------|----------------|-----------------|
//! | `cr2` | image | `jpg` | `png`, `jpg`, `webp` |
//! | `avif`, `webp` | image | `png` | `png`, `jpg`, `webp` |
//! | `heic`, `heif` | image | `jpg` | `png`, `jpg`, `webp` |
//! | `epub`, `mobi`, `pdf` | ebook | `azw3` | `azw3` |
//!
//! `cr2` files may be up to 30 MiB; every other format up to 10 MiB.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod counter;
pub mod error;
pub mod format;
pub mod input;
pub mod progress;
pub mod remote;
pub mod state;
pub mod transport;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ClientConfig, ClientConfigBuilder};
pub use convert::{save_converted, Converter, ConverterBuilder, StateStream};
pub use counter::{ConversionTally, CounterClient, CounterStore, HttpCounterStore};
pub use error::{ConvertError, CounterError, NETWORK_ERROR_MESSAGE};
pub use format::{
    default_output_for_tag, default_output_format, detect_input_format, download_filename,
    format_file_size, Category, InputFormat, OutputFormat, SupportedConversion,
};
pub use input::load_file;
pub use progress::{ConversionObserver, NoopObserver, Observer, ProgressReporter, UploadProgress};
pub use remote::{BlobStore, ConversionBackend, ConvertedPayload, HttpBackend, HttpBlobStore};
pub use state::{ConversionRequest, ConversionState, ConvertedFile, FileInfo, Phase, SourceFile};
pub use transport::{select_transport, use_staged_transport, Transport};
pub use validate::validate;
