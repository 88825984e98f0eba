//! Upload progress and observer hooks.
//!
//! Two integration points live here:
//!
//! * [`ProgressReporter`]: handed to the direct transport. It is called with
//!   `{loaded, total}` once per body chunk as the request streams out, forming
//!   a lazy, non-restartable sequence that ends when the request completes or
//!   fails.
//! * [`ConversionObserver`]: injected into [`crate::convert::Converter`] to
//!   receive every state transition, every byte-progress event and the
//!   refreshed conversion total. The CLI uses it to drive its progress bar.
//!
//! Observers are invoked after the state lock is released, so an
//! implementation may read the converter (e.g. `state()`). Notifications are
//! delivered one at a time in transition order; a callback must not call
//! `reset()`, `cancel()` or `select_file()` on the same converter.

use crate::state::{ConversionState, FileInfo};
use crate::transport::Transport;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Bytes sent so far out of the total to send.
///
/// `total == 0` means the size is not known and progress is indeterminate
/// (the staged transport always reports this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl UploadProgress {
    /// Clamps `loaded` to `total` whenever the total is known.
    pub fn new(loaded: u64, total: u64) -> Self {
        let loaded = if total > 0 { loaded.min(total) } else { loaded };
        Self { loaded, total }
    }

    pub const fn indeterminate() -> Self {
        Self { loaded: 0, total: 0 }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.total == 0
    }

    /// Every byte has been handed to the transport.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.loaded >= self.total
    }

    /// `0.0..=1.0`, or `None` when indeterminate.
    pub fn fraction(&self) -> Option<f64> {
        (!self.is_indeterminate()).then(|| self.loaded as f64 / self.total as f64)
    }

    pub fn percent(&self) -> Option<u8> {
        self.fraction().map(|f| (f * 100.0).round() as u8)
    }
}

impl fmt::Display for UploadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent() {
            Some(p) => write!(f, "{}/{} bytes ({p}%)", self.loaded, self.total),
            None => write!(f, "{} bytes", self.loaded),
        }
    }
}

/// Receives byte-level progress from a transport.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(UploadProgress) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(UploadProgress) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A reporter that drops every event.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, loaded: u64, total: u64) {
        (self.sink)(UploadProgress::new(loaded, total));
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Called by the converter as a conversion moves through its phases.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`: progress
/// events come from the HTTP body stream and the conversion total arrives
/// from a background task.
pub trait ConversionObserver: Send + Sync {
    /// Called after every transition with the new state.
    fn on_state_change(&self, state: &ConversionState) {
        let _ = state;
    }

    /// Called once the transport for a validated file is known.
    fn on_transport_selected(&self, transport: Transport, file: &FileInfo) {
        let _ = (transport, file);
    }

    /// Called for each byte-progress event accepted while uploading.
    fn on_upload_progress(&self, progress: UploadProgress) {
        let _ = progress;
    }

    /// Called with the post-increment total after a successful conversion.
    ///
    /// `0` means the counter could not be reached; keep the last known value.
    fn on_conversion_counted(&self, total: u64) {
        let _ = total;
    }
}

/// The default observer.
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

/// Convenience alias for the observer stored in the converter.
pub type Observer = Arc<dyn ConversionObserver>;
