//! Session controller: owns the lifetime of one narration session.
//!
//! [`SessionController`] is the synchronous face the UI talks to.  Each
//! `start` spawns a *session actor* on the runtime, which owns all mutable
//! playback state and reacts to everything through one `select!` loop:
//!
//! ```text
//!               ┌──────────── shutdown (oneshot) ◀── stop / cleanup / next start
//!               │ ┌────────── unit finished ◀──── AudioOutput
//!               │ │ ┌──────── FetchOutcome ◀───── fetch tasks
//!               ▼ ▼ ▼
//!          session actor ◀── StreamEvent ◀── pump_events (reader task)
//!               │               (not consumed while a pause is pending)
//!               ├─▶ Deduplicator → FetchPipeline → PlaybackQueue
//!               └─▶ SharedState  (via latch-gated writes)
//! ```
//!
//! Every write a session makes to [`SharedState`] happens under the state
//! lock after checking that session's [`TeardownLatch`]; the latch is tripped
//! under the same lock.  A superseded or stopped session can therefore never
//! overwrite the state of its successor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

use crate::audio::{
    AudioBackend, AudioDecoder, AudioFetcher, FetchOutcome, FetchPipeline, OutputError, UnitId,
};
use crate::config::PlaybackConfig;
use crate::playback::{PlaybackQueue, PlaybackSignal, SubtitleSynchronizer};
use crate::stream::{pump_events, Deduplicator, NarrationService, SessionRequest, StreamEvent};

use super::latch::TeardownLatch;
use super::state::{new_shared_state, snapshot, update, SessionPhase, SessionState, SharedState};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Failures reported synchronously by [`SessionController::start`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already running")]
    AlreadyRunning,

    #[error("audio output unavailable: {0}")]
    OutputUnavailable(#[from] OutputError),
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

struct SessionHandle {
    latch: TeardownLatch,
    shutdown: oneshot::Sender<()>,
}

/// Starts, stops and tears down narration sessions.  At most one session is
/// alive at a time.
pub struct SessionController {
    runtime: Handle,
    config: PlaybackConfig,
    service: Arc<dyn NarrationService>,
    fetcher: Arc<dyn AudioFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    backend: Arc<dyn AudioBackend>,
    state: SharedState,
    current: Mutex<Option<SessionHandle>>,
}

impl SessionController {
    pub fn new(
        runtime: Handle,
        config: PlaybackConfig,
        service: Arc<dyn NarrationService>,
        fetcher: Arc<dyn AudioFetcher>,
        decoder: Arc<dyn AudioDecoder>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        Self {
            runtime,
            config,
            service,
            fetcher,
            decoder,
            backend,
            state: new_shared_state(),
            current: Mutex::new(None),
        }
    }

    /// Handle to the state the UI renders.
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn snapshot(&self) -> SessionState {
        snapshot(&self.state)
    }

    /// `true` from `start` until `done`, stop or teardown.
    pub fn is_in_flight(&self) -> bool {
        self.snapshot().in_flight
    }

    /// Begin a new session.
    ///
    /// Fails with [`SessionError::AlreadyRunning`] while another session
    /// holds the start guard.  A previous session that is only draining its
    /// queue is torn down first.  The output device is opened here, so its
    /// failure is reported directly; stream failures surface later through
    /// the shared state.
    pub fn start(&self, request: SessionRequest) -> Result<(), SessionError> {
        let mut current = lock_current(&self.current);
        let previous = current.take();

        let acquired = update(&self.state, |s| {
            if s.in_flight {
                return false;
            }
            if let Some(prev) = &previous {
                if prev.latch.trip() {
                    log::info!("session: superseding previous session");
                }
            }
            *s = SessionState {
                phase: SessionPhase::Connecting,
                in_flight: true,
                ..SessionState::default()
            };
            true
        });

        if !acquired {
            *current = previous;
            log::warn!("session: start rejected, a session is already running");
            return Err(SessionError::AlreadyRunning);
        }
        if let Some(prev) = previous {
            let _ = prev.shutdown.send(());
        }

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let output = match self.backend.open(finished_tx) {
            Ok(output) => output,
            Err(e) => {
                log::error!("session: cannot open audio output: {e}");
                update(&self.state, |s| {
                    s.in_flight = false;
                    s.is_destroyed = true;
                    s.phase = SessionPhase::Error;
                    s.last_error = Some(e.to_string());
                });
                return Err(e.into());
            }
        };

        let format = output.format();
        let latch = TeardownLatch::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let link = StateLink {
            state: Arc::clone(&self.state),
            latch: latch.clone(),
        };

        let mut queue = PlaybackQueue::new(output);
        queue.subscribe(SubtitleSynchronizer::new(Arc::clone(&self.state), latch.clone()).into_listener());
        let playing = link.clone();
        queue.subscribe(Box::new(move |signal: &PlaybackSignal| {
            let audible = matches!(signal, PlaybackSignal::Started { .. });
            playing.write(|s| s.is_playing = audible);
        }));

        let actor = SessionActor {
            link,
            dedup: Deduplicator::new(self.config.max_tracked_events.max(1)),
            pipeline: FetchPipeline::new(
                Arc::clone(&self.fetcher),
                Arc::clone(&self.decoder),
                format,
                outcome_tx,
                latch.clone(),
            ),
            queue,
            captions: HashMap::new(),
            paused_until: None,
            reader: None,
        };

        log::info!(
            "session: starting for user {} ({:?})",
            request.user_id,
            request.user_feeling_input
        );
        self.runtime.spawn(actor.run(
            Arc::clone(&self.service),
            request,
            self.config.event_buffer.max(1),
            shutdown_rx,
            finished_rx,
            outcome_rx,
        ));

        *current = Some(SessionHandle {
            latch,
            shutdown: shutdown_tx,
        });
        Ok(())
    }

    /// User cancellation: silence playback, drop queued items, release the
    /// start guard and tear the session down.
    pub fn stop(&self) {
        log::info!("session: stop requested");
        self.cleanup();
    }

    /// Tear down the current session, if any.  Safe to call repeatedly and
    /// while fetches are still running.
    pub fn cleanup(&self) {
        let Some(handle) = lock_current(&self.current).take() else {
            return;
        };

        update(&self.state, |s| {
            if handle.latch.trip() {
                s.phase = SessionPhase::Stopped;
                s.in_flight = false;
                s.is_playing = false;
                s.is_destroyed = true;
                s.current_caption.clear();
            }
        });
        // The actor may already be gone after a natural finish.
        let _ = handle.shutdown.send(());
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn lock_current(
    current: &Mutex<Option<SessionHandle>>,
) -> std::sync::MutexGuard<'_, Option<SessionHandle>> {
    match current.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// StateLink
// ---------------------------------------------------------------------------

/// One session's write access to the shared state.
#[derive(Clone)]
struct StateLink {
    state: SharedState,
    latch: TeardownLatch,
}

impl StateLink {
    /// Apply `f` unless this session has been torn down.
    fn write(&self, f: impl FnOnce(&mut SessionState)) {
        update(&self.state, |s| {
            if !self.latch.is_set() {
                f(s);
            }
        });
    }

    /// Trip the latch and record the final state.  No-op when someone else
    /// already tore the session down.
    fn finish(&self, phase: SessionPhase, error: Option<String>) {
        update(&self.state, |s| {
            if !self.latch.trip() {
                return;
            }
            s.phase = phase;
            s.in_flight = false;
            s.is_playing = false;
            s.is_destroyed = true;
            s.current_caption.clear();
            if error.is_some() {
                s.last_error = error;
            }
        });
    }
}

// ---------------------------------------------------------------------------
// SessionActor
// ---------------------------------------------------------------------------

/// What woke the actor's loop.
enum Wake {
    Shutdown,
    UnitFinished(UnitId),
    Fetched(FetchOutcome),
    PauseOver,
    Event(Option<StreamEvent>),
}

/// Whether the stream should keep being read after an event.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    EndOfStream,
}

struct SessionActor {
    link: StateLink,
    dedup: Deduplicator,
    pipeline: FetchPipeline,
    queue: PlaybackQueue,
    /// `text` content waiting for the `audio_ref` with the same seq.
    captions: HashMap<u64, String>,
    paused_until: Option<Instant>,
    reader: Option<JoinHandle<()>>,
}

impl SessionActor {
    async fn run(
        mut self,
        service: Arc<dyn NarrationService>,
        request: SessionRequest,
        event_buffer: usize,
        mut shutdown: oneshot::Receiver<()>,
        mut finished_rx: mpsc::UnboundedReceiver<UnitId>,
        mut outcome_rx: mpsc::UnboundedReceiver<FetchOutcome>,
    ) {
        let opened = tokio::select! {
            biased;
            _ = &mut shutdown => {
                self.release();
                return;
            }
            opened = service.open(&request) => opened,
        };

        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                log::error!("session: failed to open narration stream: {e}");
                self.link.finish(SessionPhase::Error, Some(e.to_string()));
                self.release();
                return;
            }
        };

        let (events_tx, mut events_rx) = mpsc::channel(event_buffer);
        self.reader = Some(tokio::spawn(pump_events(source, events_tx)));
        self.link.write(|s| s.phase = SessionPhase::Streaming);
        log::info!("session: stream open");

        let mut stream_open = true;

        loop {
            let pause = self.paused_until;

            let wake = tokio::select! {
                biased;
                _ = &mut shutdown => Wake::Shutdown,
                Some(id) = finished_rx.recv() => Wake::UnitFinished(id),
                Some(outcome) = outcome_rx.recv() => Wake::Fetched(outcome),
                _ = sleep_until(pause.unwrap_or_else(Instant::now)), if pause.is_some() => Wake::PauseOver,
                event = events_rx.recv(), if stream_open && pause.is_none() => Wake::Event(event),
            };

            // A stop may land while the loop was waking; the output is off
            // limits from then on.
            if self.link.latch.is_set() {
                log::info!("session: shut down");
                break;
            }

            match wake {
                Wake::Shutdown => {
                    log::info!("session: shut down");
                    break;
                }
                Wake::UnitFinished(id) => self.queue.on_finished(id),
                Wake::Fetched(outcome) => {
                    for item in self.pipeline.accept(outcome) {
                        self.queue.push(item);
                    }
                }
                Wake::PauseOver => {
                    log::debug!("session: pause over");
                    self.paused_until = None;
                }
                Wake::Event(Some(event)) => {
                    if self.handle_event(event) == Flow::EndOfStream {
                        stream_open = false;
                        self.stop_reader();
                    }
                }
                Wake::Event(None) => {
                    log::debug!("session: event stream ended");
                    stream_open = false;
                }
            }

            if !stream_open && self.pipeline.in_flight() == 0 && self.queue.is_idle() {
                log::info!("session: narration finished");
                self.link.finish(SessionPhase::Finished, None);
                break;
            }
        }

        self.release();
    }

    /// Apply one stream event.  `done` ends the stream: nothing read after
    /// it is acted on.
    fn handle_event(&mut self, event: StreamEvent) -> Flow {
        if !self.dedup.accept(&event) {
            return Flow::Continue;
        }

        match event {
            StreamEvent::SessionStart { session_id } => {
                log::info!("session: server session {session_id}");
                self.link.write(|s| s.session_id = Some(session_id));
            }
            StreamEvent::Text { seq, content } => {
                self.captions.insert(seq, content);
            }
            StreamEvent::AudioRef {
                seq,
                url,
                text,
                duration,
            } => {
                let caption = self.caption_for(seq, text);
                log::debug!("session: seq {seq} audio {url}");
                self.pipeline.submit_url(seq, url, caption, duration);
            }
            StreamEvent::InlineAudio { seq, data, text } => {
                let caption = self.caption_for(seq, text);
                self.pipeline.submit_inline(seq, data, caption);
            }
            StreamEvent::Pause { duration_seconds } => {
                if duration_seconds <= 0.0 {
                    return Flow::Continue;
                }
                match Duration::try_from_secs_f32(duration_seconds)
                    .ok()
                    .and_then(|d| Instant::now().checked_add(d))
                {
                    Some(until) => {
                        log::debug!("session: pausing event processing for {duration_seconds}s");
                        self.paused_until = Some(until);
                    }
                    None => log::warn!("session: ignoring unrepresentable pause of {duration_seconds}s"),
                }
            }
            StreamEvent::Done => {
                log::info!("session: producer done, draining queue");
                let idle = self.queue.is_idle();
                self.link.write(|s| {
                    s.in_flight = false;
                    s.phase = SessionPhase::Draining;
                    if idle {
                        s.current_caption.clear();
                    }
                });
                return Flow::EndOfStream;
            }
            StreamEvent::Error { message } => {
                log::warn!("session: producer reported an error: {message}");
                self.link.write(|s| s.last_error = Some(message));
            }
        }
        Flow::Continue
    }

    /// Text remembered for `seq`, else the reference's own text, else empty.
    fn caption_for(&mut self, seq: u64, fallback: Option<String>) -> String {
        self.captions
            .remove(&seq)
            .or(fallback)
            .unwrap_or_default()
    }

    /// Release everything the session holds.  Runs once, after the latch is
    /// set.
    fn release(&mut self) {
        self.link.latch.trip();
        self.queue.close();
        self.pipeline.clear();
        self.dedup.clear();
        self.captions.clear();
        self.paused_until = None;
        self.stop_reader();
        log::debug!("session: resources released");
    }

    /// Drop the connection; later records are never read.
    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MockBackend, MockDecoder, MockFetcher};
    use crate::stream::MockNarrationService;

    struct Harness {
        controller: SessionController,
        backend: MockBackend,
        fetcher: Arc<MockFetcher>,
        service: Arc<MockNarrationService>,
    }

    fn harness(service: MockNarrationService, fetcher: MockFetcher, backend: MockBackend) -> Harness {
        let service = Arc::new(service);
        let fetcher = Arc::new(fetcher);
        let controller = SessionController::new(
            Handle::current(),
            PlaybackConfig::default(),
            service.clone(),
            fetcher.clone(),
            Arc::new(MockDecoder),
            Arc::new(backend.clone()),
        );
        Harness {
            controller,
            backend,
            fetcher,
            service,
        }
    }

    fn request() -> SessionRequest {
        SessionRequest::now("demo_user_001", "I feel anxious", "Sunny", "Home")
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    const BREATHE: &[&str] = &[
        r#"{"type":"session_start","session_id":"s-1"}"#,
        r#"{"seq":1,"type":"text","content":"Breathe in"}"#,
        r#"{"seq":1,"type":"audio_ref","url":"/1"}"#,
        r#"{"seq":2,"type":"text","content":"Breathe out"}"#,
        r#"{"seq":2,"type":"audio_ref","url":"/2"}"#,
        r#"{"seq":3,"type":"done"}"#,
    ];

    fn two_clips() -> MockFetcher {
        MockFetcher::new().with("/1", vec![0; 100]).with("/2", vec![0; 200])
    }

    #[tokio::test]
    async fn breathe_in_breathe_out_captions_follow_audio() {
        let h = harness(MockNarrationService::with_records(BREATHE), two_clips(), MockBackend::new());
        assert!(h.controller.snapshot().current_caption.is_empty());

        h.controller.start(request()).unwrap();
        wait_until(|| h.controller.snapshot().current_caption == "Breathe in").await;
        let s = h.controller.snapshot();
        assert!(s.is_playing);
        assert_eq!(s.session_id.as_deref(), Some("s-1"));

        // `done` arrives while seq 1 is audible; the guard is released but
        // the caption stays with the audio.
        wait_until(|| !h.controller.is_in_flight()).await;
        wait_until(|| h.backend.started_ids().len() == 1 && h.fetcher.calls().len() == 2).await;
        assert_eq!(h.controller.snapshot().current_caption, "Breathe in");

        h.backend.finish_active();
        wait_until(|| h.controller.snapshot().current_caption == "Breathe out").await;

        h.backend.finish_active();
        wait_until(|| h.controller.snapshot().phase == SessionPhase::Finished).await;
        let s = h.controller.snapshot();
        assert!(s.current_caption.is_empty());
        assert!(!s.is_playing);
        assert!(s.is_destroyed);
        assert_eq!(h.backend.started_frames(), vec![100, 200]);
        assert_eq!(h.backend.log.lock().unwrap().closes, 1);
        assert_eq!(h.service.requests()[0].user_feeling_input, "I feel anxious");
    }

    #[tokio::test]
    async fn events_after_done_are_ignored_and_session_finishes() {
        let records = [
            r#"{"seq":1,"type":"audio_ref","url":"/1","text":"last words"}"#,
            r#"{"type":"done"}"#,
            r#"{"seq":2,"type":"audio_ref","url":"/2","text":"after done"}"#,
        ];
        // The connection stays open after `done`.
        let h = harness(
            MockNarrationService::with_records(&records).hanging(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| {
            h.backend.started_ids().len() == 1
                && h.controller.snapshot().phase == SessionPhase::Draining
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.fetcher.calls(), vec!["/1".to_string()]);
        assert_eq!(h.controller.snapshot().current_caption, "last words");

        h.backend.finish_active();
        wait_until(|| h.controller.snapshot().phase == SessionPhase::Finished).await;

        let s = h.controller.snapshot();
        assert!(s.is_destroyed);
        assert!(s.current_caption.is_empty());
        assert_eq!(h.backend.log.lock().unwrap().closes, 1);
        assert_eq!(h.backend.started_ids().len(), 1);
        assert_eq!(h.fetcher.calls(), vec!["/1".to_string()]);
    }

    #[tokio::test]
    async fn done_with_nothing_pending_finishes_immediately() {
        let h = harness(
            MockNarrationService::with_records(&[r#"{"type":"done"}"#]).hanging(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| h.controller.snapshot().phase == SessionPhase::Finished).await;
        assert!(!h.controller.is_in_flight());
        wait_until(|| h.backend.log.lock().unwrap().closes == 1).await;
    }

    #[tokio::test]
    async fn bad_url_leaves_a_gap() {
        let records = [
            r#"{"seq":1,"type":"text","content":"lost"}"#,
            r#"{"seq":1,"type":"audio_ref","url":"/missing"}"#,
            r#"{"seq":2,"type":"text","content":"kept"}"#,
            r#"{"seq":2,"type":"audio_ref","url":"/2"}"#,
            "[DONE]",
        ];
        let h = harness(MockNarrationService::with_records(&records), two_clips(), MockBackend::new());

        h.controller.start(request()).unwrap();
        wait_until(|| h.controller.snapshot().current_caption == "kept").await;
        assert_eq!(h.backend.started_frames(), vec![200]);

        h.backend.finish_active();
        wait_until(|| h.controller.snapshot().phase == SessionPhase::Finished).await;
        assert_eq!(h.backend.started_ids().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_audio_ref_plays_once() {
        let records = [
            r#"{"seq":1,"type":"text","content":"Breathe in"}"#,
            r#"{"seq":1,"type":"audio_ref","url":"/1"}"#,
            r#"{"seq":1,"type":"text","content":"Breathe in"}"#,
            r#"{"seq":1,"type":"audio_ref","url":"/1"}"#,
            r#"{"type":"done"}"#,
        ];
        let h = harness(MockNarrationService::with_records(&records), two_clips(), MockBackend::new());

        h.controller.start(request()).unwrap();
        wait_until(|| !h.controller.is_in_flight() && h.backend.started_ids().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.fetcher.calls(), vec!["/1".to_string()]);

        h.backend.finish_active();
        wait_until(|| h.controller.snapshot().phase == SessionPhase::Finished).await;
        assert_eq!(h.backend.started_ids().len(), 1);
    }

    #[tokio::test]
    async fn audio_plays_in_submission_order() {
        let fetcher = two_clips().with_delay("/1", Duration::from_millis(100));
        let h = harness(MockNarrationService::with_records(BREATHE), fetcher, MockBackend::new());

        h.controller.start(request()).unwrap();
        wait_until(|| h.fetcher.calls().len() == 2).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        // /2 is decoded but must wait behind the slower /1.
        assert!(h.backend.started_ids().is_empty());

        wait_until(|| h.backend.started_ids().len() == 1).await;
        assert_eq!(h.backend.started_frames(), vec![100]);
        assert_eq!(h.controller.snapshot().current_caption, "Breathe in");

        h.backend.finish_active();
        wait_until(|| h.backend.started_ids().len() == 2).await;
        assert_eq!(h.backend.started_frames(), vec![100, 200]);
    }

    #[tokio::test]
    async fn caption_falls_back_to_audio_ref_text() {
        let records = [
            r#"{"seq":1,"type":"audio_ref","url":"/1","text":"Relax your shoulders","duration":1.5}"#,
            r#"{"seq":2,"type":"audio","content":"AAAA"}"#,
        ];
        let h = harness(
            MockNarrationService::with_records(&records).hanging(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| h.controller.snapshot().current_caption == "Relax your shoulders").await;

        h.backend.finish_active();
        // Inline audio without text shows an empty caption while audible.
        wait_until(|| h.backend.started_ids().len() == 2).await;
        let s = h.controller.snapshot();
        assert!(s.current_caption.is_empty());
        assert!(s.is_playing);
        h.controller.cleanup();
    }

    #[tokio::test]
    async fn stop_silences_and_empties_queue() {
        let h = harness(
            MockNarrationService::with_records(&BREATHE[..5]).hanging(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| h.backend.started_ids().len() == 1 && h.fetcher.calls().len() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.controller.stop();
        let s = h.controller.snapshot();
        assert_eq!(s.phase, SessionPhase::Stopped);
        assert!(!s.in_flight);
        assert!(!s.is_playing);
        assert!(s.is_destroyed);
        assert!(s.current_caption.is_empty());

        wait_until(|| h.backend.log.lock().unwrap().closes == 1).await;
        assert_eq!(h.backend.active(), None);
        // Nothing queued survives the stop.
        assert_eq!(h.backend.finish_active(), None);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.backend.started_ids().len(), 1);
    }

    #[tokio::test]
    async fn tripped_latch_stops_queue_work_before_shutdown_arrives() {
        let h = harness(
            MockNarrationService::with_records(&BREATHE[..5]).hanging(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| h.backend.started_ids().len() == 1 && h.fetcher.calls().len() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Teardown has begun but the shutdown message is not sent yet.
        lock_current(&h.controller.current)
            .as_ref()
            .unwrap()
            .latch
            .trip();
        h.backend.finish_active();

        wait_until(|| h.backend.log.lock().unwrap().closes == 1).await;
        assert_eq!(h.backend.started_ids().len(), 1);
        h.controller.cleanup();
    }

    #[tokio::test]
    async fn cleanup_twice_is_harmless() {
        let h = harness(
            MockNarrationService::with_records(&BREATHE[..3]).hanging(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| h.backend.started_ids().len() == 1).await;

        h.controller.cleanup();
        h.controller.cleanup();
        wait_until(|| h.backend.log.lock().unwrap().closes == 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let log = h.backend.log.lock().unwrap();
        assert_eq!(log.closes, 1);
        assert_eq!(log.opens, 1);
        drop(log);
        assert!(h.controller.snapshot().is_destroyed);
    }

    #[tokio::test]
    async fn cleanup_discards_fetches_in_flight() {
        let fetcher = two_clips().with_delay("/1", Duration::from_millis(100));
        let h = harness(
            MockNarrationService::with_records(&BREATHE[..3]).hanging(),
            fetcher,
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| h.fetcher.calls().len() == 1).await;
        h.controller.cleanup();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.backend.started_ids().is_empty());
        assert!(h.controller.snapshot().current_caption.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_delays_events_but_not_playback() {
        let records = [
            r#"{"seq":1,"type":"text","content":"Breathe in"}"#,
            r#"{"seq":1,"type":"audio_ref","url":"/1"}"#,
            r#"{"seq":2,"type":"pause","duration":2.0}"#,
            r#"{"seq":3,"type":"text","content":"Breathe out"}"#,
            r#"{"seq":3,"type":"audio_ref","url":"/2"}"#,
            r#"{"type":"done"}"#,
        ];
        let h = harness(MockNarrationService::with_records(&records), two_clips(), MockBackend::new());
        let started_at = Instant::now();

        h.controller.start(request()).unwrap();
        wait_until(|| h.backend.started_ids().len() == 1).await;
        assert_eq!(h.fetcher.calls(), vec!["/1".to_string()]);

        // Audio keeps draining during the pause.
        h.backend.finish_active();
        wait_until(|| !h.controller.snapshot().is_playing).await;
        assert!(h.controller.snapshot().current_caption.is_empty());
        assert_eq!(h.fetcher.calls().len(), 1);

        wait_until(|| h.fetcher.calls().len() == 2).await;
        let resumed = h.fetcher.called_at("/2").unwrap();
        assert!(resumed - started_at >= Duration::from_secs(2));

        wait_until(|| h.controller.snapshot().current_caption == "Breathe out").await;
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let h = harness(
            MockNarrationService::with_records(&[]).hanging(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        assert!(h.controller.is_in_flight());
        assert!(matches!(
            h.controller.start(request()),
            Err(SessionError::AlreadyRunning)
        ));
        assert_eq!(h.backend.log.lock().unwrap().opens, 1);
        h.controller.cleanup();
    }

    #[tokio::test]
    async fn new_start_supersedes_draining_session() {
        let records = [r#"{"seq":1,"type":"audio_ref","url":"/1"}"#, "[DONE]"];
        let h = harness(
            MockNarrationService::with_records(&records),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| !h.controller.is_in_flight() && h.backend.started_ids().len() == 1).await;
        assert_eq!(h.controller.snapshot().phase, SessionPhase::Draining);

        h.controller.start(request()).unwrap();
        wait_until(|| h.backend.log.lock().unwrap().closes == 1).await;
        wait_until(|| h.backend.started_ids().len() == 2).await;

        let s = h.controller.snapshot();
        assert_eq!(h.backend.log.lock().unwrap().opens, 2);
        assert!(!s.is_destroyed);
        assert!(s.is_playing);
        h.controller.cleanup();
    }

    #[tokio::test]
    async fn unavailable_output_fails_start() {
        let h = harness(
            MockNarrationService::with_records(BREATHE),
            two_clips(),
            MockBackend::unavailable(),
        );

        let err = h.controller.start(request()).unwrap_err();
        assert!(matches!(err, SessionError::OutputUnavailable(_)));
        let s = h.controller.snapshot();
        assert!(!s.in_flight);
        assert_eq!(s.phase, SessionPhase::Error);
        assert!(s.last_error.is_some());
        assert!(h.service.requests().is_empty());
    }

    #[tokio::test]
    async fn stream_open_failure_releases_guard() {
        let h = harness(MockNarrationService::failing(), two_clips(), MockBackend::new());

        h.controller.start(request()).unwrap();
        wait_until(|| h.controller.snapshot().phase == SessionPhase::Error).await;

        let s = h.controller.snapshot();
        assert!(!s.in_flight);
        assert!(s.is_destroyed);
        assert!(s.last_error.as_deref().unwrap_or_default().contains("500"));
        wait_until(|| h.backend.log.lock().unwrap().closes == 1).await;

        // The guard is free again.
        h.controller.start(request()).unwrap();
        h.controller.cleanup();
    }

    #[tokio::test]
    async fn broken_connection_ends_session_naturally() {
        let h = harness(
            MockNarrationService::with_records(&BREATHE[1..3]).with_read_error(),
            two_clips(),
            MockBackend::new(),
        );

        h.controller.start(request()).unwrap();
        wait_until(|| h.backend.started_ids().len() == 1).await;
        h.backend.finish_active();

        wait_until(|| h.controller.snapshot().phase == SessionPhase::Finished).await;
        assert!(!h.controller.is_in_flight());
    }

    #[tokio::test]
    async fn producer_error_is_recorded_and_session_continues() {
        let records = [
            r#"{"type":"error","message":"tts quota exceeded"}"#,
            r#"{"seq":1,"type":"audio_ref","url":"/1","text":"still here"}"#,
            "[DONE]",
        ];
        let h = harness(MockNarrationService::with_records(&records), two_clips(), MockBackend::new());

        h.controller.start(request()).unwrap();
        wait_until(|| h.controller.snapshot().current_caption == "still here").await;
        assert_eq!(
            h.controller.snapshot().last_error.as_deref(),
            Some("tts quota exceeded")
        );
        h.backend.finish_active();
        wait_until(|| h.controller.snapshot().phase == SessionPhase::Finished).await;
    }
}
