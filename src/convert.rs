//! The upload/convert state machine.
//!
//! ## Lifecycle
//!
//! ```text
//!            select_file                upload done           2xx
//!   idle ─────────────────▶ uploading ─────────────▶ processing ────▶ success
//!     ▲   (validation err)      │                         │
//!     │         │               └──────── failure ────────┴─────────▶ error
//!     │         ▼
//!     └──── reset() ◀──── any phase
//! ```
//!
//! A [`Converter`] owns exactly one conversion slot. Every mutation happens
//! under one lock and bumps (or checks) a generation number: `reset()` and
//! `cancel()` advance the generation and abort the in-flight task, and every
//! late event from that task (a progress callback, a response arriving just
//! as the abort lands) is dropped because its generation no longer matches.
//! This is what guarantees that a reset during an in-flight request ends in
//! `idle`, never in a stale `success` or `error`.
//!
//! Observer delivery is serialized with the mutation that produced it: a
//! second lock is taken before the slot lock and held until the observer has
//! returned, so observers see transitions in the order they were applied and
//! the last state delivered always matches [`Converter::state`].
//!
//! The counter increment runs as a detached task after the `success`
//! transition; its outcome only reaches the observer.

use crate::config::ClientConfig;
use crate::counter::CounterClient;
use crate::error::ConvertError;
use crate::format::{download_filename, Category, OutputFormat};
use crate::input::load_file;
use crate::progress::{ConversionObserver, NoopObserver, Observer, ProgressReporter, UploadProgress};
use crate::remote::{BlobStore, ConversionBackend, ConvertedPayload, HttpBackend, HttpBlobStore};
use crate::state::{ConversionRequest, ConversionState, ConvertedFile, FileInfo, SourceFile};
use crate::transport::{select_transport, Transport};
use crate::validate::validate;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

/// Stream of state snapshots. Starts with the current state; rapid
/// intermediate states may be coalesced (use a [`ConversionObserver`] to see
/// every transition).
pub type StateStream = WatchStream<ConversionState>;

/// Drives one conversion at a time and publishes its state.
///
/// Cheap to clone; clones share the same slot.
#[derive(Clone)]
pub struct Converter {
    shared: Arc<Shared>,
}

struct Shared {
    /// Held across a mutation and its observer notifications.
    delivery: Mutex<()>,
    slot: Mutex<Slot>,
    watch: watch::Sender<ConversionState>,
    backend: Arc<dyn ConversionBackend>,
    blob: Arc<dyn BlobStore>,
    counter: Option<CounterClient>,
    observer: Observer,
    config: ClientConfig,
}

#[derive(Default)]
struct Slot {
    state: ConversionState,
    generation: u64,
    task: Option<AbortHandle>,
    transport: Option<Transport>,
}

/// A validated request that owns the slot.
struct Started {
    request: ConversionRequest,
    transport: Transport,
    generation: u64,
    registration: AbortRegistration,
}

impl Converter {
    pub fn builder(config: ClientConfig) -> ConverterBuilder {
        ConverterBuilder::new(config)
    }

    /// HTTP backend, HTTP blob store and HTTP counter for `config`.
    pub fn http(config: ClientConfig) -> Result<Self, ConvertError> {
        let counter = match CounterClient::http(&config) {
            Ok(counter) => Some(counter),
            Err(e) => {
                warn!(error = %e, "Conversion counter disabled");
                None
            }
        };
        let mut builder = ConverterBuilder::new(config);
        builder.counter = counter;
        builder.build()
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Snapshot of the current state.
    pub fn state(&self) -> ConversionState {
        self.lock().state.clone()
    }

    /// Transport chosen for the current (or last) accepted file.
    pub fn last_transport(&self) -> Option<Transport> {
        self.lock().transport
    }

    pub fn subscribe(&self) -> StateStream {
        WatchStream::new(self.shared.watch.subscribe())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Probe the conversion service.
    pub async fn health_check(&self) -> bool {
        self.shared.backend.health_check().await
    }

    /// Current global total, `0` when unknown.
    pub async fn read_count(&self) -> u64 {
        match &self.shared.counter {
            Some(counter) => counter.read_count().await,
            None => 0,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Select `file` and run the conversion to completion.
    ///
    /// Returns the resulting state. The only error is [`ConvertError::Busy`]:
    /// selecting a file while another is uploading or processing is rejected
    /// without touching the current conversion. Every other failure is
    /// reported through the `error` state.
    pub async fn select_file(
        &self,
        file: SourceFile,
        category: Category,
        output: Option<OutputFormat>,
    ) -> Result<ConversionState, ConvertError> {
        match self.convert(file, category, output).await {
            Err(e @ ConvertError::Busy { .. }) => Err(e),
            _ => Ok(self.state()),
        }
    }

    /// Like [`select_file`](Self::select_file), but returns the converted
    /// file or the error that ended the conversion.
    ///
    /// A conversion interrupted by [`reset`](Self::reset) or
    /// [`cancel`](Self::cancel) returns [`ConvertError::Cancelled`].
    pub async fn convert(
        &self,
        file: SourceFile,
        category: Category,
        output: Option<OutputFormat>,
    ) -> Result<ConvertedFile, ConvertError> {
        let Started {
            request,
            transport,
            generation,
            registration,
        } = self.begin(file, category, output)?;
        let info = request.file.info();

        let outcome = Abortable::new(self.run(&request, transport, generation), registration).await;
        match outcome {
            Ok(Ok(payload)) => {
                let converted = converted_file(&request, payload);
                if !self.succeed(generation, converted.clone()) {
                    warn!("Discarding result for superseded conversion of {}", info.name);
                    return Err(ConvertError::Cancelled);
                }
                info!(
                    file = %info.name,
                    output = %converted.filename,
                    bytes = converted.bytes.len(),
                    "Conversion succeeded"
                );
                self.count_conversion();
                Ok(converted)
            }
            Ok(Err(e)) => {
                if self.fail(generation, &e) {
                    warn!(file = %info.name, error = %e, "Conversion failed");
                    Err(e)
                } else {
                    Err(ConvertError::Cancelled)
                }
            }
            Err(_aborted) => {
                debug!("Conversion of {} aborted", info.name);
                Err(ConvertError::Cancelled)
            }
        }
    }

    /// Load `path` from disk and convert it.
    pub async fn convert_path(
        &self,
        path: impl AsRef<Path>,
        category: Category,
        output: Option<OutputFormat>,
    ) -> Result<ConvertedFile, ConvertError> {
        let file = load_file(path).await?;
        self.convert(file, category, output).await
    }

    /// Convert `input` and write the result to `output_path`.
    pub async fn convert_to_file(
        &self,
        input: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        category: Category,
        output: Option<OutputFormat>,
    ) -> Result<ConvertedFile, ConvertError> {
        let converted = self.convert_path(input, category, output).await?;
        save_converted(&converted, output_path).await?;
        Ok(converted)
    }

    /// Return to `idle` from any phase, abandoning any in-flight request.
    pub fn reset(&self) {
        let _delivery = self.deliver();
        let mut slot = self.lock();
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.transport = None;
        let state = ConversionState::Idle;
        self.publish(&mut slot, state.clone());
        drop(slot);
        debug!("Converter reset");
        self.shared.observer.on_state_change(&state);
    }

    /// Abort an in-flight conversion, ending in `error` with
    /// "Upload cancelled". Returns `false` when nothing was in flight.
    pub fn cancel(&self) -> bool {
        let _delivery = self.deliver();
        let mut slot = self.lock();
        let Some(file) = busy_file(&slot.state) else {
            return false;
        };
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        let state = ConversionState::Error {
            file,
            message: ConvertError::Cancelled.user_message(),
        };
        self.publish(&mut slot, state.clone());
        drop(slot);
        info!("Conversion cancelled");
        self.shared.observer.on_state_change(&state);
        true
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.shared.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Always taken before [`lock`](Self::lock), never inside it.
    fn deliver(&self) -> MutexGuard<'_, ()> {
        self.shared
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, slot: &mut Slot, state: ConversionState) {
        slot.state = state.clone();
        self.shared.watch.send_replace(state);
    }

    /// Validate and claim the slot.
    fn begin(
        &self,
        file: SourceFile,
        category: Category,
        output: Option<OutputFormat>,
    ) -> Result<Started, ConvertError> {
        let _delivery = self.deliver();
        let mut slot = self.lock();
        if slot.state.is_busy() {
            return Err(ConvertError::Busy {
                phase: slot.state.phase().as_str(),
            });
        }

        let info = file.info();
        slot.generation += 1;
        slot.task = None;

        let request = match validate(file, category, output, &self.shared.config) {
            Ok(request) => request,
            Err(e) => {
                slot.transport = None;
                let state = ConversionState::Error {
                    file: info.clone(),
                    message: e.user_message(),
                };
                self.publish(&mut slot, state.clone());
                drop(slot);
                info!(file = %info.name, error = %e, "File rejected");
                self.shared.observer.on_state_change(&state);
                return Err(e);
            }
        };

        let transport = select_transport(info.size, &self.shared.config);
        let progress = match transport {
            Transport::Direct => UploadProgress::new(0, info.size),
            Transport::Staged => UploadProgress::indeterminate(),
        };
        let (handle, registration) = AbortHandle::new_pair();
        slot.task = Some(handle);
        slot.transport = Some(transport);
        let generation = slot.generation;
        let state = ConversionState::Uploading {
            file: info.clone(),
            progress: Some(progress),
        };
        self.publish(&mut slot, state.clone());
        drop(slot);

        info!(
            "Converting {} ({} bytes) {} -> {} via {} upload",
            info.name, info.size, request.input, request.output, transport
        );
        self.shared.observer.on_transport_selected(transport, &info);
        self.shared.observer.on_state_change(&state);

        Ok(Started {
            request,
            transport,
            generation,
            registration,
        })
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        transport: Transport,
        generation: u64,
    ) -> Result<ConvertedPayload, ConvertError> {
        match transport {
            Transport::Direct => {
                let reporter = self.progress_reporter(generation);
                self.shared.backend.convert_upload(request, reporter).await
            }
            Transport::Staged => {
                let url = self.shared.blob.upload(request).await?;
                debug!(%url, "Staged upload complete");
                if !self.enter_processing(generation) {
                    return Err(ConvertError::Cancelled);
                }
                self.shared
                    .backend
                    .convert_url(&url, &request.file.name, request.output)
                    .await
            }
        }
    }

    fn progress_reporter(&self, generation: u64) -> ProgressReporter {
        let this = self.clone();
        ProgressReporter::new(move |progress| this.apply_progress(generation, progress))
    }

    /// Record a byte-progress event; a complete upload moves to `processing`.
    fn apply_progress(&self, generation: u64, progress: UploadProgress) {
        let _delivery = self.deliver();
        let mut slot = self.lock();
        if slot.generation != generation {
            debug!(%progress, "Ignoring progress for superseded conversion");
            return;
        }
        let ConversionState::Uploading { file, .. } = &slot.state else {
            return;
        };
        let file = file.clone();
        let state = if progress.is_complete() {
            ConversionState::Processing { file }
        } else {
            ConversionState::Uploading {
                file,
                progress: Some(progress),
            }
        };
        self.publish(&mut slot, state.clone());
        drop(slot);

        debug!(%progress, "Upload progress");
        self.shared.observer.on_upload_progress(progress);
        self.shared.observer.on_state_change(&state);
    }

    /// Apply `next` to the current state if `generation` still owns the slot.
    /// Terminal states release the abort handle.
    fn transition<F>(&self, generation: u64, next: F) -> bool
    where
        F: FnOnce(&ConversionState) -> Option<ConversionState>,
    {
        let _delivery = self.deliver();
        let mut slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        let Some(state) = next(&slot.state) else {
            return false;
        };
        if state.is_terminal() {
            slot.task = None;
        }
        self.publish(&mut slot, state.clone());
        drop(slot);
        self.shared.observer.on_state_change(&state);
        true
    }

    fn enter_processing(&self, generation: u64) -> bool {
        self.transition(generation, |current| match current {
            ConversionState::Uploading { file, .. } => Some(ConversionState::Processing {
                file: file.clone(),
            }),
            _ => None,
        })
    }

    fn succeed(&self, generation: u64, converted: ConvertedFile) -> bool {
        self.transition(generation, |current| {
            busy_file(current).map(|file| ConversionState::Success { file, converted })
        })
    }

    fn fail(&self, generation: u64, error: &ConvertError) -> bool {
        self.transition(generation, |current| {
            busy_file(current).map(|file| ConversionState::Error {
                file,
                message: error.user_message(),
            })
        })
    }

    fn count_conversion(&self) {
        let Some(counter) = self.shared.counter.clone() else {
            return;
        };
        let observer = Arc::clone(&self.shared.observer);
        tokio::spawn(async move {
            let total = counter.increment_and_fetch().await;
            observer.on_conversion_counted(total);
        });
    }
}

fn busy_file(state: &ConversionState) -> Option<FileInfo> {
    match state {
        ConversionState::Uploading { file, .. } | ConversionState::Processing { file } => {
            Some(file.clone())
        }
        _ => None,
    }
}

fn converted_file(request: &ConversionRequest, payload: ConvertedPayload) -> ConvertedFile {
    let content_type = payload
        .content_type
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or_else(|| request.output.mime_type().to_string());
    ConvertedFile {
        bytes: payload.bytes,
        content_type,
        filename: download_filename(Some(&request.file.name), request.output),
    }
}

/// Write a converted file to `path`.
///
/// When `path` is an existing directory, or ends in a separator, the suggested
/// download name is used inside it. Uses atomic write (temp file in the target
/// directory, then persist) to prevent partial files.
pub async fn save_converted(
    converted: &ConvertedFile,
    path: impl AsRef<Path>,
) -> Result<PathBuf, ConvertError> {
    let mut path = path.as_ref().to_path_buf();
    let trailing_separator = path
        .as_os_str()
        .to_string_lossy()
        .ends_with(std::path::is_separator);
    if trailing_separator || tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
        path.push(&converted.filename);
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    let bytes = converted.bytes.clone();
    let target = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("write task: {e}")))?
    .map_err(|e| ConvertError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    })?;

    debug!("Wrote {} bytes to {}", converted.bytes.len(), path.display());
    Ok(path)
}

/// Assembles a [`Converter`] from its collaborators.
///
/// Anything not supplied falls back to the HTTP implementation for the
/// config; the counter is optional and off unless given.
pub struct ConverterBuilder {
    config: ClientConfig,
    backend: Option<Arc<dyn ConversionBackend>>,
    blob: Option<Arc<dyn BlobStore>>,
    counter: Option<CounterClient>,
    observer: Option<Observer>,
}

impl ConverterBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            backend: None,
            blob: None,
            counter: None,
            observer: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn ConversionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn blob_store(mut self, blob: Arc<dyn BlobStore>) -> Self {
        self.blob = Some(blob);
        self
    }

    pub fn counter(mut self, counter: CounterClient) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ConversionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Converter, ConvertError> {
        let backend: Arc<dyn ConversionBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::new(&self.config)?),
        };
        let blob: Arc<dyn BlobStore> = match self.blob {
            Some(blob) => blob,
            None => Arc::new(HttpBlobStore::new(&self.config)?),
        };
        let (watch, _) = watch::channel(ConversionState::Idle);

        Ok(Converter {
            shared: Arc::new(Shared {
                delivery: Mutex::new(()),
                slot: Mutex::new(Slot::default()),
                watch,
                backend,
                blob,
                counter: self.counter,
                observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
                config: self.config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CounterError;
    use crate::counter::CounterStore;
    use crate::state::Phase;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Notify};

    const MIB: usize = 1024 * 1024;

    /// Reports progress in quarters, then answers with a fixed PNG.
    #[derive(Default)]
    struct QuarterBackend {
        uploads: AtomicUsize,
        from_url: AtomicUsize,
        entered: Notify,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl ConversionBackend for QuarterBackend {
        async fn convert_upload(
            &self,
            request: &ConversionRequest,
            progress: ProgressReporter,
        ) -> Result<ConvertedPayload, ConvertError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            let total = request.file.size();
            for q in 1..=4 {
                progress.report(total * q / 4, total);
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(ConvertedPayload {
                bytes: Bytes::from_static(b"\x89PNG"),
                content_type: Some("image/png".into()),
            })
        }

        async fn convert_url(
            &self,
            _url: &str,
            _filename: &str,
            _output: OutputFormat,
        ) -> Result<ConvertedPayload, ConvertError> {
            self.from_url.fetch_add(1, Ordering::SeqCst);
            Ok(ConvertedPayload {
                bytes: Bytes::from_static(b"\xff\xd8\xff"),
                content_type: None,
            })
        }
    }

    struct FixedBlob;

    #[async_trait]
    impl BlobStore for FixedBlob {
        async fn upload(&self, _request: &ConversionRequest) -> Result<String, ConvertError> {
            Ok("https://blob.test/raw-00000000.cr2".into())
        }
    }

    struct Recorder(mpsc::UnboundedSender<ConversionState>);

    impl ConversionObserver for Recorder {
        fn on_state_change(&self, state: &ConversionState) {
            let _ = self.0.send(state.clone());
        }
    }

    fn converter(backend: Arc<QuarterBackend>) -> Converter {
        Converter::builder(ClientConfig::default())
            .backend(backend)
            .blob_store(Arc::new(FixedBlob))
            .build()
            .unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ConversionState>) -> Vec<Phase> {
        let mut phases = Vec::new();
        while let Ok(state) = rx.try_recv() {
            phases.push(state.phase());
        }
        phases
    }

    #[tokio::test]
    async fn direct_progress_moves_to_processing_when_complete() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = Arc::new(QuarterBackend::default());
        let conv = Converter::builder(ClientConfig::default())
            .backend(backend.clone())
            .blob_store(Arc::new(FixedBlob))
            .observer(Arc::new(Recorder(tx)))
            .build()
            .unwrap();

        let file = SourceFile::new("photo.avif", "image/avif", vec![0u8; 1000]);
        let converted = conv.convert(file, Category::Image, None).await.unwrap();

        assert_eq!(converted.filename, "photo.png");
        assert_eq!(conv.last_transport(), Some(Transport::Direct));
        assert_eq!(
            drain(&mut rx),
            vec![
                Phase::Uploading,
                Phase::Uploading,
                Phase::Uploading,
                Phase::Uploading,
                Phase::Processing,
                Phase::Success
            ]
        );
    }

    #[tokio::test]
    async fn staged_upload_is_indeterminate_then_processing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = Arc::new(QuarterBackend::default());
        let conv = Converter::builder(ClientConfig::default())
            .backend(backend.clone())
            .blob_store(Arc::new(FixedBlob))
            .observer(Arc::new(Recorder(tx)))
            .build()
            .unwrap();

        let file = SourceFile::new("raw.cr2", "image/x-canon-cr2", vec![0u8; 5 * MIB]);
        let converted = conv
            .convert(file, Category::Image, Some(OutputFormat::Jpg))
            .await
            .unwrap();

        assert_eq!(converted.content_type, "image/jpeg");
        assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(backend.from_url.load(Ordering::SeqCst), 1);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.progress(), Some(UploadProgress::indeterminate()));
        assert_eq!(
            drain(&mut rx),
            vec![Phase::Processing, Phase::Success]
        );
    }

    #[tokio::test]
    async fn stale_progress_is_ignored_after_reset() {
        let conv = converter(Arc::new(QuarterBackend::default()));
        let file = SourceFile::new("a.avif", "", vec![0u8; 10]);
        let started = conv.begin(file, Category::Image, None).unwrap();

        conv.reset();
        conv.apply_progress(started.generation, UploadProgress::new(5, 10));
        assert!(!conv.succeed(
            started.generation,
            ConvertedFile {
                bytes: Bytes::new(),
                content_type: "image/png".into(),
                filename: "a.png".into(),
            }
        ));
        assert_eq!(conv.state(), ConversionState::Idle);
    }

    #[tokio::test]
    async fn busy_selection_is_rejected_without_transition() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(QuarterBackend {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let conv = converter(backend.clone());

        let running = {
            let conv = conv.clone();
            tokio::spawn(async move {
                conv.convert(SourceFile::new("a.webp", "", vec![1u8; 64]), Category::Image, None)
                    .await
            })
        };
        backend.entered.notified().await;
        let before = conv.state();

        let err = conv
            .select_file(SourceFile::new("b.webp", "", vec![1u8; 64]), Category::Image, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Busy { .. }));
        assert_eq!(conv.state(), before);

        gate.notify_one();
        assert!(running.await.unwrap().is_ok());
        assert_eq!(backend.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_request() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(QuarterBackend {
            gate: Some(gate),
            ..Default::default()
        });
        let conv = converter(backend.clone());

        let running = {
            let conv = conv.clone();
            tokio::spawn(async move {
                conv.convert(SourceFile::new("a.webp", "", vec![1u8; 64]), Category::Image, None)
                    .await
            })
        };
        backend.entered.notified().await;

        assert!(conv.cancel());
        assert!(matches!(running.await.unwrap(), Err(ConvertError::Cancelled)));
        assert_eq!(conv.state().error(), Some("Upload cancelled"));
        assert!(!conv.cancel());
    }

    #[tokio::test]
    async fn subscribe_starts_with_current_state() {
        use futures::StreamExt;

        let conv = converter(Arc::new(QuarterBackend::default()));
        conv.convert(SourceFile::new("a.avif", "", vec![1u8; 8]), Category::Image, None)
            .await
            .unwrap();
        let mut states = conv.subscribe();
        assert_eq!(states.next().await.map(|s| s.phase()), Some(Phase::Success));
    }

    struct CountingStore(AtomicUsize);

    #[async_trait]
    impl CounterStore for CountingStore {
        async fn read(&self) -> Result<u64, CounterError> {
            Ok(self.0.load(Ordering::SeqCst) as u64)
        }
        async fn increment(&self) -> Result<u64, CounterError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst) as u64 + 1)
        }
    }

    #[tokio::test]
    async fn counter_only_runs_after_success() {
        let store = Arc::new(CountingStore(AtomicUsize::new(0)));
        let conv = Converter::builder(ClientConfig::default())
            .backend(Arc::new(QuarterBackend::default()))
            .blob_store(Arc::new(FixedBlob))
            .counter(CounterClient::new(store.clone()))
            .build()
            .unwrap();

        let _ = conv
            .convert(SourceFile::new("a.txt", "", vec![1u8; 8]), Category::Image, None)
            .await;
        conv.convert(SourceFile::new("a.avif", "", vec![1u8; 8]), Category::Image, None)
            .await
            .unwrap();

        for _ in 0..50 {
            if store.0.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(conv.read_count().await, 1);
    }

    #[tokio::test]
    async fn save_into_directory_uses_download_name() {
        let dir = tempfile::tempdir().unwrap();
        let converted = ConvertedFile {
            bytes: Bytes::from_static(b"data"),
            content_type: "image/png".into(),
            filename: "photo.png".into(),
        };
        let written = save_converted(&converted, dir.path()).await.unwrap();
        assert_eq!(written, dir.path().join("photo.png"));
        assert_eq!(std::fs::read(&written).unwrap(), b"data");

        let explicit = dir.path().join("nested/out.png");
        let written = save_converted(&converted, &explicit).await.unwrap();
        assert_eq!(written, explicit);
        assert_eq!(std::fs::read_dir(dir.path().join("nested")).unwrap().count(), 1);
    }
}
