//! Supervisor facade for one upstream runtime.
//!
//! An [`Adapter`] owns at most one runtime process at a time. `start()` runs
//! the retry controller and, once a spawn survives the liveness probe, hands
//! the session to two threads. The reader feeds the output buffer, classifies
//! complete lines and records events. The watcher owns the process handle,
//! notices the child exiting even while a leftover background job keeps the
//! PTY open, and performs the final reap and lifecycle transition.
//!
//! Control operations never wait on the reader: `status()`, `health()` and
//! `output()` only take short locks.

use std::io::{self, Read};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::AdapterConfig;
use crate::events::{
    classify_guarded, Classification, ClassifierError, Event, EventSink, LineClassifier,
    NullClassifier, PatternClassifier,
};
use crate::output::{LineSplitter, OutputBuffer, Utf8Decoder};
use crate::pty::{display_command, resolve_command, PtyProcess, Session};
use crate::supervisor::{
    AdapterError, Crash, DerivedState, HealthLevel, HealthSnapshot, Launch, Lifecycle,
    LifecycleState, RetryPolicy, Started, StatusSnapshot,
};

/// Payload key holding the classified line.
pub const LINE_KEY: &str = "line";

/// Capacity of the event and output broadcast channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// How long the reader waits for the child to exit once output closes.
const EXIT_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the watcher checks whether the child is still alive.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the watcher waits for the reader to drain once the child is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 8192;

/// Sent by the reader when the PTY closes, with the error that closed it.
type ReaderDone = Option<io::Error>;

/// Builder for an [`Adapter`].
pub struct AdapterBuilder {
    config: AdapterConfig,
    classifier: Option<Arc<dyn LineClassifier>>,
    sink: Option<EventSink>,
}

impl AdapterBuilder {
    #[must_use]
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            classifier: None,
            sink: None,
        }
    }

    /// Use `classifier` instead of the configured pattern rules.
    #[must_use]
    pub fn classifier(mut self, classifier: impl LineClassifier + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Share an existing sink instead of opening `config.event_log`.
    #[must_use]
    pub fn sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the adapter. Nothing is spawned until `start()`.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Configuration` if a pattern rule does not
    /// compile or the event log directory cannot be created.
    pub fn build(self) -> Result<Adapter, AdapterError> {
        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None => pattern_classifier(&self.config)?,
        };
        let sink = match (self.sink, &self.config.event_log) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(
                EventSink::open(path).map_err(|e| AdapterError::Configuration(e.to_string()))?,
            ),
            (None, None) => None,
        };

        let (events, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let (chunks, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let retry = RetryPolicy {
            max_retries: self.config.max_retries,
            backoff: self.config.backoff_schedule(),
            probe_interval: self.config.probe_interval(),
        };

        Ok(Adapter {
            inner: Arc::new(Inner {
                source: self.config.source(),
                output: OutputBuffer::new(self.config.buffer_chunks),
                config: self.config,
                retry,
                classifier,
                sink,
                shared: Mutex::new(Shared::default()),
                control: tokio::sync::Mutex::new(()),
                events,
                chunks,
            }),
        })
    }
}

fn pattern_classifier(config: &AdapterConfig) -> Result<Arc<dyn LineClassifier>, AdapterError> {
    if config.patterns.is_empty() {
        return Ok(Arc::new(NullClassifier));
    }
    let mut classifier = PatternClassifier::new();
    for pattern in &config.patterns {
        classifier = classifier
            .rule(&pattern.regex, pattern.event_type.clone())
            .map_err(|e| AdapterError::Configuration(e.to_string()))?;
    }
    tracing::debug!(adapter = %config.id, rules = classifier.rules().len(), "Compiled pattern rules");
    Ok(Arc::new(classifier))
}

/// Supervisor for one upstream runtime. Cheap to clone.
///
/// Call [`stop`](Self::stop) before dropping the last handle; a running
/// runtime is otherwise left to its session threads until it exits.
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<Inner>,
}

struct Inner {
    config: AdapterConfig,
    source: String,
    retry: RetryPolicy,
    classifier: Arc<dyn LineClassifier>,
    sink: Option<EventSink>,
    output: OutputBuffer,
    shared: Mutex<Shared>,
    /// Serializes `start()` and `stop()`.
    control: tokio::sync::Mutex<()>,
    events: broadcast::Sender<Event>,
    chunks: broadcast::Sender<String>,
}

/// State crossing the reader/caller boundary.
#[derive(Default)]
struct Shared {
    lifecycle: Lifecycle,
    process: Option<Arc<PtyProcess>>,
    /// Bumped whenever a session is attached or detached; a reader only
    /// mutates state while its generation is current.
    generation: u64,
    retries: u32,
    returncode: Option<i32>,
    resolved_command: Vec<String>,
    derived: DerivedState,
    classifier_failures: u32,
}

impl Adapter {
    /// Build an adapter classifying with the configured pattern rules.
    ///
    /// # Errors
    ///
    /// See [`AdapterBuilder::build`].
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        AdapterBuilder::new(config).build()
    }

    #[must_use]
    pub fn builder(config: AdapterConfig) -> AdapterBuilder {
        AdapterBuilder::new(config)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    /// Receive every event recorded from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Recorded events as a `Stream`; lagging consumers see `Err` items.
    #[must_use]
    pub fn event_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.subscribe())
    }

    /// Receive raw decoded output chunks from now on.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<String> {
        self.inner.chunks.subscribe()
    }

    /// Start the runtime, retrying instant crashes with backoff.
    ///
    /// A no-op returning the current status if the runtime is already up.
    /// Blocks the calling task for at most attempts × (probe + backoff).
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Configuration` if no command resolves (the
    /// lifecycle is left untouched), `AdapterError::Startup` once the retry
    /// budget is spent, and `AdapterError::Spawn` if the reader thread cannot
    /// be started.
    pub async fn start(&self) -> Result<StatusSnapshot, AdapterError> {
        let _control = self.inner.control.lock().await;

        if self.inner.is_live() {
            tracing::debug!(adapter = %self.id(), "Start requested while running");
            return Ok(self.status());
        }

        let config = &self.inner.config;
        let argv = resolve_command(config.override_env.as_deref(), &config.command_candidates)?;
        let mut session = Session::new(argv.clone()).envs(config.env.clone());
        if let Some(cwd) = &config.cwd {
            session = session.cwd(cwd);
        }

        let stale = {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            let stale = shared.process.take();
            if shared.lifecycle.state().is_active() {
                shared.lifecycle.fail("runtime exited unnoticed");
            }
            shared.lifecycle.clear_error();
            shared.lifecycle.transition(LifecycleState::Starting);
            shared.retries = 0;
            shared.returncode = None;
            shared.resolved_command = argv.clone();
            stale
        };
        if let Some(stale) = stale {
            stale.kill();
            stale.kill_process_group();
        }
        tracing::info!(
            adapter = %self.id(),
            command = %display_command(&argv),
            max_retries = self.inner.retry.max_retries,
            "Starting runtime"
        );

        let mut launcher = PtyLauncher { session: &session };
        match self.inner.retry.start(&mut launcher).await {
            Ok(started) => self.attach(started),
            Err(failure) => {
                {
                    let mut shared = self.inner.shared.lock();
                    shared.retries = failure.attempts.saturating_sub(1);
                    shared.returncode = failure.last.exit_code;
                    shared.lifecycle.fail(failure.last.detail.clone());
                }
                tracing::error!(
                    adapter = %self.id(),
                    attempts = failure.attempts,
                    error = %failure.last.detail,
                    "Runtime failed to start"
                );
                Err(AdapterError::Startup {
                    attempts: failure.attempts,
                    last_error: failure.last.detail,
                })
            }
        }
    }

    fn attach(&self, started: Started<PtyProcess>) -> Result<StatusSnapshot, AdapterError> {
        let process = Arc::new(started.handle);
        let Some(reader) = process.take_reader() else {
            self.inner.shared.lock().lifecycle.fail("pty reader unavailable");
            process.kill();
            return Err(AdapterError::Io("pty reader unavailable".to_string()));
        };

        {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            let generation = shared.generation;
            shared.retries = started.retries;
            shared.process = Some(Arc::clone(&process));
            shared.classifier_failures = 0;
            shared.lifecycle.transition(LifecycleState::Running);

            if let Err(e) = self.spawn_threads(&process, reader, generation) {
                shared.generation += 1;
                shared.process = None;
                shared
                    .lifecycle
                    .fail(format!("failed to start session threads: {e}"));
                drop(shared);
                process.kill();
                process.kill_process_group();
                return Err(AdapterError::Spawn(e.to_string()));
            }
        }

        tracing::info!(
            adapter = %self.id(),
            pid = ?process.pid(),
            retries = started.retries,
            "Runtime running"
        );
        Ok(self.status())
    }

    /// Start the watcher, which holds the process handle, then the reader,
    /// which only holds the PTY output.
    fn spawn_threads(
        &self,
        process: &Arc<PtyProcess>,
        reader: Box<dyn Read + Send>,
        generation: u64,
    ) -> io::Result<()> {
        let (done_tx, done_rx) = mpsc::channel::<ReaderDone>();

        let inner = Arc::clone(&self.inner);
        let watched = Arc::clone(process);
        std::thread::Builder::new()
            .name(format!("pty-watch-{}", self.id()))
            .spawn(move || inner.watch(&watched, &done_rx, generation))?;

        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", self.id()))
            .spawn(move || {
                let read_error = inner.read_loop(reader, generation);
                // The watcher is gone if the session was already detached.
                let _ = done_tx.send(read_error);
            })?;
        Ok(())
    }

    /// Stop the runtime: SIGTERM, wait up to the grace period, then kill.
    ///
    /// Never fails and is a no-op when nothing is running. The process
    /// reference is always released.
    pub async fn stop(&self) -> StatusSnapshot {
        let _control = self.inner.control.lock().await;

        let process = {
            let mut shared = self.inner.shared.lock();
            let state = shared.lifecycle.state();
            if shared.process.is_none()
                && matches!(state, LifecycleState::Stopped | LifecycleState::Failed)
            {
                drop(shared);
                return self.status();
            }
            shared.generation += 1;
            shared.lifecycle.transition(LifecycleState::Stopping);
            shared.process.take()
        };

        if let Some(process) = process {
            tracing::info!(adapter = %self.id(), pid = ?process.pid(), "Stopping runtime");
            let code = process
                .terminate(self.inner.config.grace_period())
                .await;
            self.inner.shared.lock().returncode = code;
        }

        {
            let mut shared = self.inner.shared.lock();
            if shared.lifecycle.state() == LifecycleState::Stopping {
                shared.lifecycle.transition(LifecycleState::Stopped);
            }
        }
        self.status()
    }

    /// Send a line of input to the runtime.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::NotRunning` unless the runtime is up, and
    /// `AdapterError::Io` if the write fails.
    pub fn send(&self, text: &str) -> Result<(), AdapterError> {
        let process = {
            let shared = self.inner.shared.lock();
            let state = shared.lifecycle.state();
            match &shared.process {
                Some(process) if state.is_active() => Arc::clone(process),
                _ => return Err(AdapterError::NotRunning { state }),
            }
        };
        process.write(text).map_err(|e| {
            tracing::warn!(adapter = %self.id(), error = %e, "Write to runtime failed");
            AdapterError::from(e)
        })
    }

    /// The last `tail_chars` characters of output.
    #[must_use]
    pub fn output(&self, tail_chars: usize) -> String {
        self.inner.output.snapshot(tail_chars)
    }

    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let shared = self.inner.shared.lock();
        let alive = shared.process.as_ref().is_some_and(|p| p.probe_alive());
        let state = shared.lifecycle.state();
        StatusSnapshot {
            adapter_id: self.id().to_string(),
            state,
            running: state.is_active() && alive,
            pid: shared.process.as_ref().and_then(|p| p.pid()),
            retries: shared.retries,
            returncode: shared.returncode,
            resolved_command: shared.resolved_command.clone(),
            last_error: shared.lifecycle.last_error().map(str::to_string),
            last_transition_at: shared.lifecycle.last_transition_at(),
            health: HealthLevel::assess(state, alive),
            derived_state: shared.derived.to_map(),
        }
    }

    /// Status plus `ok = state == Running && process alive`. Never fails.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot::from_status(self.status())
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("id", &self.inner.config.id)
            .field("source", &self.inner.source)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn is_live(&self) -> bool {
        let shared = self.shared.lock();
        shared.lifecycle.state().is_active()
            && shared.process.as_ref().is_some_and(|p| p.probe_alive())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.lock().generation == generation
    }

    /// Read until the PTY closes or the session is detached.
    ///
    /// Returns the read error that closed the PTY, if any.
    fn read_loop(&self, mut reader: Box<dyn Read + Send>, generation: u64) -> ReaderDone {
        let mut decoder = Utf8Decoder::new();
        let mut splitter = LineSplitter::with_max_line_len(self.config.max_line_len);
        let mut buf = [0u8; READ_BUFFER_SIZE];

        let read_error = loop {
            match reader.read(&mut buf) {
                Ok(0) => break None,
                Ok(n) => {
                    if !self.is_current(generation) {
                        return None;
                    }
                    let text = decoder.decode(&buf[..n]);
                    self.on_text(&text, &mut splitter, generation);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // Linux reports EIO once the slave side is gone.
                Err(e) => break Some(e),
            }
        };

        let rest = decoder.finish();
        self.on_text(&rest, &mut splitter, generation);
        if let Some(line) = splitter.flush_partial() {
            self.handle_line(&line, generation);
        }
        read_error
    }

    fn on_text(&self, text: &str, splitter: &mut LineSplitter, generation: u64) {
        if text.is_empty() || !self.is_current(generation) {
            return;
        }
        self.output.on_chunk(text);
        // No subscribers is fine.
        let _ = self.chunks.send(text.to_string());
        splitter.on_chunk(text);
        for line in splitter.drain_lines() {
            self.handle_line(&line, generation);
        }
    }

    fn handle_line(&self, line: &str, generation: u64) {
        let outcome = classify_guarded(self.classifier.as_ref(), line);

        let events = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            match outcome {
                Ok(classifications) => shared.record(classifications, line, &self.source),
                Err(err) => {
                    shared.classifier_failed(&err, self.config.degraded_after, &self.config.id);
                    Vec::new()
                }
            }
        };

        for event in events {
            self.publish(event);
        }
    }

    fn publish(&self, event: Event) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&event) {
                tracing::warn!(adapter = %self.config.id, error = %e, "Failed to record event");
            }
        }
        let _ = self.events.send(event);
    }

    /// Wait for the session to end: either the reader sees the PTY close, or
    /// the child exits while something else still holds the PTY open.
    fn watch(&self, process: &PtyProcess, done: &mpsc::Receiver<ReaderDone>, generation: u64) {
        loop {
            if !self.is_current(generation) {
                return;
            }
            match done.recv_timeout(EXIT_POLL_INTERVAL) {
                Ok(read_error) => return self.finish(process, generation, read_error),
                Err(RecvTimeoutError::Disconnected) => {
                    return self.finish(process, generation, None);
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if !process.probe_alive() {
                tracing::debug!(
                    adapter = %self.config.id,
                    pid = ?process.pid(),
                    "Runtime exited, clearing its process group"
                );
                process.kill_process_group();
                let read_error = done.recv_timeout(OUTPUT_DRAIN_TIMEOUT).ok().flatten();
                return self.finish(process, generation, read_error);
            }
        }
    }

    fn finish(&self, process: &PtyProcess, generation: u64, read_error: Option<io::Error>) {
        if self.shared.lock().generation != generation {
            return;
        }

        let mut exit_code = process.reap_blocking(EXIT_REAP_TIMEOUT);
        let still_alive = exit_code.is_none();
        if still_alive {
            tracing::warn!(
                adapter = %self.config.id,
                pid = ?process.pid(),
                "Output closed while runtime alive, killing"
            );
            process.kill();
            exit_code = process.reap_blocking(EXIT_REAP_TIMEOUT);
        }
        process.kill_process_group();

        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return;
        }
        shared.generation += 1;
        shared.process = None;
        shared.returncode = exit_code;

        if !still_alive && exit_code == Some(0) {
            shared.lifecycle.transition(LifecycleState::Stopped);
            tracing::info!(adapter = %self.config.id, "Runtime exited cleanly");
            return;
        }

        let detail = if still_alive {
            match read_error {
                Some(e) => format!("pty read failed: {e}"),
                None => "pty output closed while runtime alive".to_string(),
            }
        } else {
            match exit_code {
                Some(code) => format!("runtime exited with code {code}"),
                None => "runtime exited".to_string(),
            }
        };
        tracing::warn!(adapter = %self.config.id, exit_code = ?exit_code, error = %detail, "Runtime exited");
        shared.lifecycle.fail(detail);
    }
}

impl Shared {
    fn record(
        &mut self,
        classifications: Vec<Classification>,
        line: &str,
        source: &str,
    ) -> Vec<Event> {
        self.classifier_failures = 0;
        if self.lifecycle.state() == LifecycleState::Degraded
            && self.lifecycle.transition(LifecycleState::Running)
        {
            tracing::info!(source, "Classifier recovered");
        }

        classifications
            .into_iter()
            .map(|mut classification| {
                self.derived.observe(&classification);
                classification
                    .payload
                    .insert(LINE_KEY.to_string(), Value::from(line));
                self.derived.enrich(&mut classification.payload);
                Event::new(source, classification)
            })
            .collect()
    }

    fn classifier_failed(&mut self, err: &ClassifierError, threshold: u32, adapter: &str) {
        self.classifier_failures = self.classifier_failures.saturating_add(1);
        self.lifecycle.set_error(err.to_string());
        tracing::warn!(
            adapter,
            failures = self.classifier_failures,
            error = %err,
            "Classifier failed"
        );
        if threshold > 0
            && self.classifier_failures >= threshold
            && self.lifecycle.state() == LifecycleState::Running
            && self.lifecycle.transition(LifecycleState::Degraded)
        {
            tracing::warn!(adapter, "Adapter degraded");
        }
    }
}

/// Launches the session on a fresh PTY for each attempt.
struct PtyLauncher<'a> {
    session: &'a Session,
}

impl Launch for PtyLauncher<'_> {
    type Handle = PtyProcess;

    fn launch(&mut self, attempt: u32) -> Result<PtyProcess, Crash> {
        tracing::debug!(
            attempt,
            program = %self.session.program(),
            argv = %display_command(self.session.argv()),
            "Spawning runtime"
        );
        PtyProcess::spawn(self.session).map_err(|e| Crash::spawn_failed(e.to_string()))
    }

    fn probe(&mut self, handle: &PtyProcess) -> Result<(), Crash> {
        if handle.probe_alive() {
            Ok(())
        } else {
            Err(Crash::exited(handle.exit_code()))
        }
    }
}
