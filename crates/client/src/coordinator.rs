// crates/client/src/coordinator.rs
//! Session coordinator: owns the active subject, its frame store, the
//! subject cache and the one stream session, and applies session events to
//! them in delivery order.

use std::sync::Arc;

use noisescope_core::{
    FileTimelineStore, Frame, FrameStore, JobSpec, MemoryTimelineStore, MergeOutcome,
    SubjectCache, TimelineStore, ValidationError,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, TransportError};
use crate::image::encode_subject_image;
use crate::session::{Generation, SessionEvent, SessionState, StreamEvent, StreamSession};
use crate::subjects::{HttpSubjectDirectory, SubjectDirectory, SubjectRecord};
use crate::worker::WorkerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One request, one final image. Nothing is added to the timeline.
    SingleShot,
    /// Live stream of frames merged into the timeline.
    Streamed,
}

/// Snapshot read by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub subject: Option<String>,
    pub subject_preview: Option<String>,
    /// Encoded image sent to the worker for this subject.
    #[serde(skip)]
    pub worker_payload: Option<String>,
    pub preview: Option<String>,
    pub progress: f64,
    pub current_step: Option<u32>,
    pub follow_live: bool,
    /// Global step selected by the user while follow is off.
    pub scrub: Option<u64>,
    pub stream_error: Option<String>,
    pub session: SessionState,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            subject: None,
            subject_preview: None,
            worker_payload: None,
            preview: None,
            progress: 0.0,
            current_step: None,
            follow_live: true,
            scrub: None,
            stream_error: None,
            session: SessionState::Idle,
        }
    }
}

/// What applying one session event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    /// Session moved to `Streaming`, `Done` or `Canceled`.
    StateChanged(SessionState),
    FrameMerged {
        global_step: u64,
        outcome: MergeOutcome,
        preview_changed: bool,
    },
    Progress {
        fraction: f64,
        local_step: Option<u32>,
    },
    Failed(TransportError),
    /// The event belonged to an older or finished session and was ignored.
    StaleDropped { generation: Generation },
}

enum OffsetPolicy {
    Reset,
    Continue,
}

pub struct SessionCoordinator {
    cache: SubjectCache,
    store: FrameStore,
    view: ViewState,
    session: StreamSession,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    worker: WorkerClient,
    directory: Arc<dyn SubjectDirectory>,
}

impl SessionCoordinator {
    /// Must be called inside a Tokio runtime.
    pub fn new(
        config: &ClientConfig,
        timelines: Arc<dyn TimelineStore>,
        directory: Arc<dyn SubjectDirectory>,
    ) -> Self {
        let (session, events) =
            StreamSession::new(config.stream_url(), config.stream, config.connect_timeout);
        Self {
            cache: SubjectCache::new(timelines),
            store: FrameStore::new(),
            view: ViewState::default(),
            session,
            events,
            worker: WorkerClient::new(config),
            directory,
        }
    }

    /// File-backed timelines when `cache_dir` is set, in-memory otherwise;
    /// subjects managed through the worker's `/images` endpoints.
    pub fn from_config(config: &ClientConfig) -> Self {
        let timelines: Arc<dyn TimelineStore> = match &config.cache_dir {
            Some(dir) => Arc::new(FileTimelineStore::new(dir)),
            None => Arc::new(MemoryTimelineStore::new()),
        };
        let directory = Arc::new(HttpSubjectDirectory::new(config));
        Self::new(config, timelines, directory)
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn timeline(&self) -> &FrameStore {
        &self.store
    }

    pub fn cache(&self) -> &SubjectCache {
        &self.cache
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn generation(&self) -> Generation {
        self.session.generation()
    }

    /// Offset the next `continue_run` would use.
    pub fn continuation_offset(&self) -> u64 {
        self.store.next_offset()
    }

    /// Make `subject` the active subject.
    ///
    /// Any live stream is canceled, the outgoing timeline is saved (frames
    /// already merged are kept), and the incoming history is restored with
    /// its newest frame as the preview.
    pub async fn switch_subject(
        &mut self,
        subject: Option<String>,
        preview: Option<String>,
        worker_payload: Option<String>,
    ) {
        if self.session.cancel() {
            debug!(subject = ?self.view.subject, "canceled stream for subject switch");
        }
        self.persist_active();

        self.view = ViewState {
            subject,
            subject_preview: preview,
            worker_payload,
            session: self.session.state(),
            ..ViewState::default()
        };

        let frames = self.cache.load(self.view.subject.as_deref()).await;
        self.store = FrameStore::from_frames(frames);
        if let Some(last) = self.store.latest() {
            self.view.current_step = Some(last.local_step);
            self.view.preview = latest_image(&self.store);
        }
        info!(
            subject = ?self.view.subject,
            frames = self.store.len(),
            "switched subject"
        );
    }

    /// Run a job for `subject`, which must be the active subject.
    ///
    /// Streamed runs start from offset 0 and replace the subject's history;
    /// returns the new session generation. Single-shot runs return `None`.
    pub async fn run_diffusion(
        &mut self,
        subject: Option<&str>,
        spec: JobSpec,
        mode: RunMode,
    ) -> Result<Option<Generation>, ClientError> {
        self.check_active(subject)?;
        spec.validate()?;
        match mode {
            RunMode::SingleShot => {
                self.run_single_shot(&spec).await?;
                Ok(None)
            }
            RunMode::Streamed => Ok(Some(self.start_stream(&spec, OffsetPolicy::Reset))),
        }
    }

    /// Streamed run appended after the existing history of the active subject.
    pub fn continue_run(&mut self, spec: JobSpec) -> Result<Generation, ClientError> {
        spec.validate()?;
        Ok(self.start_stream(&spec, OffsetPolicy::Continue))
    }

    /// Stop the live run. Frames received so far stay on the timeline.
    pub fn cancel_run(&mut self) -> bool {
        let canceled = self.session.cancel();
        self.view.session = self.session.state();
        if canceled {
            info!(subject = ?self.view.subject, frames = self.store.len(), "run canceled");
        }
        canceled
    }

    /// Apply one session event. Events from an older generation, or that
    /// arrive after the session stopped being live, change nothing.
    pub fn handle_event(&mut self, event: SessionEvent) -> ViewUpdate {
        if !self.session.accept(&event) {
            debug!(generation = %event.generation, "dropping stale session event");
            return ViewUpdate::StaleDropped {
                generation: event.generation,
            };
        }
        self.view.session = self.session.state();

        match event.kind {
            StreamEvent::Opened => ViewUpdate::StateChanged(self.view.session),
            StreamEvent::Frame(frame) => self.apply_frame(frame),
            StreamEvent::Progress {
                fraction,
                local_step,
            } => {
                self.view.progress = fraction;
                if self.view.follow_live {
                    if let Some(step) = local_step {
                        self.view.current_step = Some(step);
                    }
                }
                ViewUpdate::Progress {
                    fraction,
                    local_step,
                }
            }
            StreamEvent::Done => {
                info!(subject = ?self.view.subject, frames = self.store.len(), "run finished");
                ViewUpdate::StateChanged(SessionState::Done)
            }
            StreamEvent::Canceled => ViewUpdate::StateChanged(SessionState::Canceled),
            StreamEvent::Failed(e) => {
                warn!(subject = ?self.view.subject, error = %e, "stream failed");
                self.view.stream_error = Some(e.to_string());
                ViewUpdate::Failed(e)
            }
        }
    }

    /// Wait for the next session event and apply it.
    ///
    /// Only returns `None` if the event channel closed; callers should not
    /// wait here while nothing is live.
    pub async fn next_update(&mut self) -> Option<ViewUpdate> {
        let event = self.events.recv().await?;
        Some(self.handle_event(event))
    }

    /// Pump events until the session is no longer live.
    pub async fn run_to_completion(&mut self) -> SessionState {
        while self.session.state().is_live() {
            if self.next_update().await.is_none() {
                break;
            }
        }
        self.session.state()
    }

    /// Show a historical frame. Turns follow off.
    pub fn scrub_to(&mut self, global_step: u64) -> bool {
        let Some(frame) = self.store.get(global_step) else {
            return false;
        };
        self.view.follow_live = false;
        self.view.scrub = Some(global_step);
        self.view.current_step = Some(frame.local_step);
        self.view.preview = frame.image.clone();
        true
    }

    /// Turn follow back on and jump to the newest frame.
    pub fn follow_live(&mut self) {
        self.view.follow_live = true;
        self.view.scrub = None;
        if let Some(last) = self.store.latest() {
            self.view.current_step = Some(last.local_step);
            self.view.preview = latest_image(&self.store);
        }
    }

    /// Give the identity-less active subject its durable id.
    /// Returns how many frames moved under the new id.
    pub fn assign_identity(&mut self, id: impl Into<String>) -> Result<usize, ValidationError> {
        let id = id.into();
        if self.view.subject.is_some() {
            return Err(ValidationError::SubjectMismatch {
                requested: Some(id),
                active: self.view.subject.clone(),
            });
        }
        self.cache.save(None, self.store.to_sorted_sequence());
        let moved = self.cache.rekey(&id);
        info!(subject = %id, frames = moved, "assigned subject identity");
        self.view.subject = Some(id);
        Ok(moved)
    }

    /// Validate, switch to a fresh identity-less subject, upload, then adopt
    /// the id the directory returns. A failed upload leaves the
    /// identity-less subject active.
    pub async fn upload_subject(
        &mut self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<SubjectRecord, ClientError> {
        let payload = encode_subject_image(&bytes)?;

        // A new upload never inherits an earlier identity-less history. The
        // switch saves the outgoing store, so an identity-less one is detached
        // before the transient slot is dropped.
        if self.view.subject.is_none() {
            self.session.cancel();
            self.store.clear();
        }
        self.cache.evict(None);
        self.switch_subject(None, Some(payload.clone()), Some(payload)).await;

        let record = match self.directory.upload(bytes, filename).await {
            Ok(record) => record,
            Err(e) => {
                warn!(filename, error = %e, "subject upload failed; keeping unsaved subject");
                return Err(e);
            }
        };
        self.assign_identity(record.id.clone())?;
        if record.preview.is_some() {
            self.view.subject_preview = record.preview.clone();
        }
        Ok(record)
    }

    /// Drop a subject's timeline and remove it from the directory. Deleting
    /// the active subject switches to the empty subject first.
    pub async fn delete_subject(&mut self, id: &str) -> Result<(), ClientError> {
        if self.view.subject.as_deref() == Some(id) {
            self.session.cancel();
            self.store.clear();
            self.view.subject = None;
            self.cache.evict(None);
            self.switch_subject(None, None, None).await;
        }
        self.cache.evict(Some(id));
        info!(subject = %id, "evicted subject timeline");
        self.directory.delete(id).await
    }

    pub async fn list_subjects(&self) -> Result<Vec<SubjectRecord>, ClientError> {
        self.directory.list().await
    }

    /// Cancel any live stream, save the active timeline and wait for all
    /// durable writes.
    pub async fn shutdown(&mut self) {
        self.session.shutdown().await;
        self.view.session = self.session.state();
        self.persist_active();
        self.cache.flush().await;
        let stats = self.cache.stats();
        debug!(
            writes = stats.writes(),
            failures = stats.failures(),
            "coordinator shut down"
        );
    }

    fn check_active(&self, subject: Option<&str>) -> Result<(), ValidationError> {
        if subject != self.view.subject.as_deref() {
            return Err(ValidationError::SubjectMismatch {
                requested: subject.map(str::to_string),
                active: self.view.subject.clone(),
            });
        }
        Ok(())
    }

    fn persist_active(&mut self) {
        self.cache
            .save(self.view.subject.as_deref(), self.store.to_sorted_sequence());
    }

    async fn run_single_shot(&mut self, spec: &JobSpec) -> Result<(), ClientError> {
        self.session.cancel();
        self.view.session = self.session.state();
        self.view.stream_error = None;

        match self.worker.diffuse(spec).await {
            Ok(resp) => {
                self.view.preview = Some(resp.image);
                self.view.progress = 1.0;
                self.view.current_step = Some(spec.final_step());
                Ok(())
            }
            Err(e) => {
                self.view.stream_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn start_stream(&mut self, spec: &JobSpec, policy: OffsetPolicy) -> Generation {
        // Cancel first so a late frame of the old run cannot land after the reset.
        self.session.cancel();
        let offset = match policy {
            OffsetPolicy::Reset => {
                self.store.clear();
                self.persist_active();
                0
            }
            OffsetPolicy::Continue => self.store.next_offset(),
        };

        self.view.follow_live = true;
        self.view.scrub = None;
        self.view.stream_error = None;
        self.view.progress = 0.0;
        self.view.current_step = None;

        let generation = self.session.start(spec, offset);
        self.view.session = self.session.state();
        info!(
            subject = ?self.view.subject,
            %generation,
            offset,
            steps = spec.total_steps,
            "run started"
        );
        generation
    }

    fn apply_frame(&mut self, frame: Frame) -> ViewUpdate {
        let global_step = frame.global_step;
        let local_step = frame.local_step;
        let image = frame.image.clone();

        let outcome = self.store.merge(frame);
        self.persist_active();

        let mut preview_changed = false;
        if self.view.follow_live {
            self.view.current_step = Some(local_step);
            if let Some(image) = image {
                self.view.preview = Some(image);
                preview_changed = true;
            }
        }
        ViewUpdate::FrameMerged {
            global_step,
            outcome,
            preview_changed,
        }
    }
}

/// Image of the newest frame that carries one.
fn latest_image(store: &FrameStore) -> Option<String> {
    store.iter().rev().find_map(|frame| frame.image.clone())
}
