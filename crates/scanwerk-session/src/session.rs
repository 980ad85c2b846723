// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Session state machine.
//
// Exactly one session can be open per device instance: the manager holds a
// single slot and `createSession` fails atomically while it is occupied.
// Commands run to completion under the slot lock, so session state is
// single-writer. The page pump is the one concurrent producer: it owns the
// block counter, feeds pages through the raster encoder one at a time, and
// publishes each block to the shared store only after its files are fully
// written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::ScanwerkError;
use scanwerk_core::types::{
    CaptureParams, SessionId, SessionSnapshot, SessionState, TerminalStatus,
};
use scanwerk_raster::RasterEncoder;
use scanwerk_task::{
    DeviceCapabilities, TaskError, TaskParser, negotiate_with_capabilities,
};

use crate::device::{CaptureDevice, CaptureEvent};
use crate::store::ImageBlockStore;

/// Failure of a session command: either an engine error (wrong state,
/// unknown block, I/O) or a structured task failure from `sendTask`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] ScanwerkError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// The one open session.
struct ScanSession {
    id: SessionId,
    state: SessionState,
    revision: Arc<AtomicU64>,
    created_at: DateTime<Utc>,
    capabilities: DeviceCapabilities,
    /// Negotiated parameters; absent until a task is accepted.
    params: Option<CaptureParams>,
    store: Arc<Mutex<ImageBlockStore>>,
    stop: Arc<Notify>,
    pump: Option<JoinHandle<()>>,
}

impl ScanSession {
    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Re-derive the lifecycle state from the store. Capture completion is
    /// observed here, not pushed: once the sentinel exists the session is
    /// draining while blocks remain and back to ready once all are released.
    fn refresh_state(&mut self) {
        if !matches!(self.state, SessionState::Capturing | SessionState::Draining) {
            return;
        }
        let store = self.store.lock().expect("store lock poisoned");
        if store.sentinel().is_none() {
            return;
        }
        let next = if store.is_empty() {
            SessionState::Ready
        } else {
            SessionState::Draining
        };
        drop(store);
        if self.state != next {
            debug!(from = %self.state, to = %next, "session state derived from store");
            self.state = next;
            self.bump();
        }
    }

    fn snapshot(&mut self) -> SessionSnapshot {
        self.refresh_state();
        let store = self.store.lock().expect("store lock poisoned");
        let end_of_job = store.end_of_job();
        let image_blocks = if end_of_job {
            None
        } else {
            Some(store.numbers())
        };
        SessionSnapshot {
            session_id: self.id,
            state: self.state,
            revision: self.revision.load(Ordering::SeqCst),
            end_of_job,
            image_blocks,
            created_at: self.created_at,
        }
    }
}

/// Owns the single session slot and answers the command surface.
pub struct SessionManager {
    config: EngineConfig,
    device: Arc<dyn CaptureDevice>,
    slot: Mutex<Option<ScanSession>>,
}

impl SessionManager {
    pub fn new(config: EngineConfig, device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            config,
            device,
            slot: Mutex::new(None),
        }
    }

    /// Run a command against the open session, or fail with
    /// `InvalidSessionId` when none is open.
    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut ScanSession) -> CommandResult<T>,
    ) -> CommandResult<T> {
        let mut slot = self.slot.lock().expect("session slot poisoned");
        match slot.as_mut() {
            Some(session) => f(session),
            None => Err(ScanwerkError::InvalidSessionId.into()),
        }
    }

    /// Open a session against the device. Fails while another session holds
    /// the slot.
    #[instrument(skip(self))]
    pub fn create_session(&self, device_ref: &str) -> CommandResult<SessionSnapshot> {
        let mut slot = self.slot.lock().expect("session slot poisoned");
        if let Some(existing) = slot.as_ref() {
            return Err(ScanwerkError::InvalidState {
                command: "createSession".into(),
                state: existing.state.to_string(),
            }
            .into());
        }

        let capabilities = self.device.probe()?;
        let id = SessionId::new();
        let dir = self.config.images_dir.join(id.to_string());
        let store = ImageBlockStore::create(dir)?;

        let mut session = ScanSession {
            id,
            state: SessionState::Ready,
            revision: Arc::new(AtomicU64::new(1)),
            created_at: Utc::now(),
            capabilities,
            params: None,
            store: Arc::new(Mutex::new(store)),
            stop: Arc::new(Notify::new()),
            pump: None,
        };
        let snapshot = session.snapshot();
        info!(session = %id, device = device_ref, "session created");
        *slot = Some(session);
        Ok(snapshot)
    }

    /// Parse, validate, and negotiate a capture task. On success the
    /// negotiated parameters are stored and the reply document returned; on
    /// failure the session keeps its prior state.
    #[instrument(skip_all, fields(len = text.len()))]
    pub fn send_task(&self, text: &str) -> CommandResult<serde_json::Value> {
        self.with_session(|session| {
            if !matches!(session.state, SessionState::Ready | SessionState::Configured) {
                return Err(ScanwerkError::InvalidState {
                    command: "sendTask".into(),
                    state: session.state.to_string(),
                }
                .into());
            }

            let parser = TaskParser::new(
                self.config.authority_id.clone(),
                session.capabilities.device_id.clone(),
            );
            let mut task = parser.parse(text)?;
            let outcome = negotiate_with_capabilities(&mut task, &session.capabilities)?;

            info!(
                source = %outcome.params.source,
                pixel_format = %outcome.params.pixel_format,
                "task negotiated"
            );
            session.params = Some(outcome.params);
            session.state = SessionState::Configured;
            session.bump();
            Ok(outcome.reply)
        })
    }

    /// Start the capture collaborator with the negotiated parameters (or
    /// the device defaults when no task was sent).
    #[instrument(skip(self))]
    pub fn start_capturing(&self) -> CommandResult<SessionSnapshot> {
        self.with_session(|session| {
            session.refresh_state();
            if session.state == SessionState::Capturing {
                return Err(ScanwerkError::InvalidState {
                    command: "startCapturing".into(),
                    state: session.state.to_string(),
                }
                .into());
            }

            let params = session
                .params
                .clone()
                .unwrap_or_else(|| session.capabilities.defaults.clone());

            // A stale marker from a previous run would make the new job look
            // finished before its first page.
            let (images_dir, next_number) = {
                let store = session.store.lock().expect("store lock poisoned");
                store.clear_sentinel()?;
                (
                    store.dir().to_path_buf(),
                    store.numbers().last().map_or(1, |n| n + 1),
                )
            };

            let rx = self
                .device
                .start_capture(params.clone(), session.stop.clone())?;

            let encoder = RasterEncoder::new(images_dir, self.config.keep_raw_files);
            let handle = tokio::spawn(pump_pages(
                rx,
                encoder,
                params,
                session.store.clone(),
                session.revision.clone(),
                next_number,
            ));

            session.pump = Some(handle);
            session.state = SessionState::Capturing;
            session.bump();
            info!("capturing started");
            Ok(session.snapshot())
        })
    }

    /// Pure read: current snapshot, including derived end-of-job.
    pub fn get_session(&self) -> CommandResult<SessionSnapshot> {
        self.with_session(|session| Ok(session.snapshot()))
    }

    /// Terminal status of the last capture run, if it has ended.
    pub fn job_status(&self) -> CommandResult<Option<TerminalStatus>> {
        self.with_session(|session| {
            let store = session.store.lock().expect("store lock poisoned");
            Ok(store.sentinel())
        })
    }

    /// Path of the metadata document for block `number`, plus a refreshed
    /// snapshot.
    pub fn read_image_block_metadata(
        &self,
        number: u32,
    ) -> CommandResult<(std::path::PathBuf, SessionSnapshot)> {
        self.with_session(|session| {
            let path = {
                let store = session.store.lock().expect("store lock poisoned");
                store.metadata_path(number)?
            };
            Ok((path, session.snapshot()))
        })
    }

    /// Path of the raster file for block `number`.
    pub fn read_image_block(&self, number: u32) -> CommandResult<std::path::PathBuf> {
        self.with_session(|session| {
            let store = session.store.lock().expect("store lock poisoned");
            Ok(store.raster_path(number)?)
        })
    }

    /// Release every block in the inclusive range; absent numbers are
    /// ignored. Always succeeds for an open session.
    #[instrument(skip(self))]
    pub fn release_image_blocks(
        &self,
        first: u32,
        last: u32,
    ) -> CommandResult<SessionSnapshot> {
        self.with_session(|session| {
            {
                let mut store = session.store.lock().expect("store lock poisoned");
                store.release_range(first, last);
            }
            session.bump();
            Ok(session.snapshot())
        })
    }

    /// Ask the capture collaborator to wind down. Best-effort: always
    /// succeeds, and a page already in flight may still arrive afterwards.
    #[instrument(skip(self))]
    pub fn stop_capturing(&self) -> CommandResult<SessionSnapshot> {
        self.with_session(|session| {
            session.stop.notify_one();
            info!("stop requested");
            Ok(session.snapshot())
        })
    }

    /// Tear the session down, discarding all session data.
    #[instrument(skip(self))]
    pub fn close_session(&self) -> CommandResult<SessionSnapshot> {
        let mut slot = self.slot.lock().expect("session slot poisoned");
        let Some(mut session) = slot.take() else {
            return Err(ScanwerkError::InvalidSessionId.into());
        };

        session.stop.notify_one();
        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        {
            let mut store = session.store.lock().expect("store lock poisoned");
            store.purge();
        }
        session.state = SessionState::Closed;
        session.bump();
        info!(session = %session.id, "session closed");

        Ok(SessionSnapshot {
            session_id: session.id,
            state: SessionState::Closed,
            revision: session.revision.load(Ordering::SeqCst),
            end_of_job: true,
            image_blocks: None,
            created_at: session.created_at,
        })
    }
}

/// Consume capture events, encoding pages into numbered image blocks.
///
/// This single consumer task is the only writer of new block numbers, so
/// pages signalled in rapid succession are still converted strictly one at
/// a time. An encoding failure ends the job with a distinct terminal status
/// instead of silently dropping the page.
async fn pump_pages(
    mut rx: mpsc::Receiver<CaptureEvent>,
    encoder: RasterEncoder,
    params: CaptureParams,
    store: Arc<Mutex<ImageBlockStore>>,
    revision: Arc<AtomicU64>,
    mut next_number: u32,
) {
    while let Some(event) = rx.recv().await {
        match event {
            CaptureEvent::PageReady(page) => {
                let result = encoder
                    .encode_block(&params, &page, next_number)
                    .and_then(|block| {
                        let mut store = store.lock().expect("store lock poisoned");
                        store.register(block)
                    });
                match result {
                    Ok(()) => {
                        debug!(number = next_number, "page pumped into store");
                        next_number += 1;
                        revision.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => {
                        error!(%err, number = next_number, "page encoding failed, ending job");
                        let store = store.lock().expect("store lock poisoned");
                        if let Err(err) = store.write_sentinel(TerminalStatus::ImageError) {
                            warn!(%err, "could not write failure sentinel");
                        }
                        revision.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                }
            }
            CaptureEvent::Finished(status) => {
                let store = store.lock().expect("store lock poisoned");
                if let Err(err) = store.write_sentinel(status) {
                    warn!(%err, "could not write end-of-job sentinel");
                }
                revision.fetch_add(1, Ordering::SeqCst);
                info!(status = status.as_str(), "capture job finished");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockScanner;
    use scanwerk_core::types::{PixelFormat, SourceKind};
    use std::time::Duration;

    fn manager_with(scanner: MockScanner) -> (SessionManager, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig {
            images_dir: tmp.path().join("images"),
            ..EngineConfig::default()
        };
        (SessionManager::new(config, Arc::new(scanner)), tmp)
    }

    fn manager() -> (SessionManager, tempfile::TempDir) {
        manager_with(MockScanner::new(2).with_page_delay(Duration::from_millis(2)))
    }

    async fn wait_until(
        manager: &SessionManager,
        what: &str,
        condition: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        for _ in 0..400 {
            let snapshot = manager.get_session().expect("get_session");
            if condition(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn only_one_session_at_a_time() {
        let (manager, _guard) = manager();
        manager.create_session("mock").expect("create");
        let err = manager.create_session("mock").unwrap_err();
        assert!(matches!(
            err,
            CommandError::Engine(ScanwerkError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn commands_without_session_fail_with_invalid_session_id() {
        let (manager, _guard) = manager();
        for result in [
            manager.start_capturing().map(|_| ()),
            manager.get_session().map(|_| ()),
            manager.stop_capturing().map(|_| ()),
            manager.close_session().map(|_| ()),
            manager.release_image_blocks(1, 1).map(|_| ()),
            manager.read_image_block(1).map(|_| ()),
        ] {
            assert!(matches!(
                result.unwrap_err(),
                CommandError::Engine(ScanwerkError::InvalidSessionId)
            ));
        }
    }

    #[tokio::test]
    async fn full_capture_lifecycle() {
        let (manager, _guard) = manager();
        let snapshot = manager.create_session("mock").expect("create");
        assert_eq!(snapshot.state, SessionState::Ready);
        assert_eq!(snapshot.image_blocks.as_deref(), Some(&[] as &[u32]));
        assert!(!snapshot.end_of_job);

        // The concrete scenario: gray8 from the front feeder.
        let reply = manager
            .send_task(
                r#"{"actions":[{"streams":[{"sources":[{"source":"feederFront","pixelFormats":[{"pixelFormat":"gray8"}]}]}]}]}"#,
            )
            .expect("send_task");
        assert_eq!(
            reply["actions"][0]["streams"][0]["sources"][0]["pixelFormats"][0]["pixelFormat"],
            "gray8"
        );

        let snapshot = manager.start_capturing().expect("start");
        assert_eq!(snapshot.state, SessionState::Capturing);

        // Both pages arrive, then the job drains.
        let snapshot = wait_until(&manager, "two blocks", |s| {
            s.image_blocks.as_ref().is_some_and(|b| b.len() == 2)
        })
        .await;
        assert_eq!(snapshot.image_blocks.as_deref(), Some(&[1u32, 2][..]));

        let snapshot = wait_until(&manager, "draining", |s| {
            s.state == SessionState::Draining
        })
        .await;
        assert!(!snapshot.end_of_job);
        assert_eq!(
            manager.job_status().expect("job_status"),
            Some(TerminalStatus::Success)
        );

        // First block's metadata reports the negotiated settings.
        let (meta_path, _) = manager.read_image_block_metadata(1).expect("metadata");
        let meta: scanwerk_raster::BlockMetadata =
            serde_json::from_slice(&std::fs::read(&meta_path).expect("read meta"))
                .expect("parse meta");
        assert_eq!(meta.pixel_format, PixelFormat::Gray8);
        assert_eq!(meta.source, SourceKind::FeederFront);
        assert_eq!(meta.image_number, 1);

        let raster = manager.read_image_block(1).expect("raster");
        assert!(raster.exists());

        // Release everything: end of job, list gone, state back to ready.
        let snapshot = manager.release_image_blocks(1, 2).expect("release");
        assert!(snapshot.end_of_job);
        assert_eq!(snapshot.image_blocks, None);

        let snapshot = wait_until(&manager, "ready", |s| s.state == SessionState::Ready).await;
        assert!(snapshot.end_of_job);

        let snapshot = manager.close_session().expect("close");
        assert_eq!(snapshot.state, SessionState::Closed);

        // The slot is free again.
        manager.create_session("mock").expect("create again");
    }

    #[tokio::test]
    async fn released_block_is_gone_for_good() {
        let (manager, _guard) = manager();
        manager.create_session("mock").expect("create");
        manager.start_capturing().expect("start");

        wait_until(&manager, "first block", |s| {
            s.image_blocks.as_ref().is_some_and(|b| b.contains(&1))
        })
        .await;

        manager.release_image_blocks(1, 1).expect("release");

        let err = manager.read_image_block(1).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Engine(ScanwerkError::InvalidImageBlockNumber { number: 1 })
        ));
        let snapshot = manager.get_session().expect("get_session");
        if let Some(blocks) = &snapshot.image_blocks {
            assert!(!blocks.contains(&1));
        }
    }

    #[tokio::test]
    async fn end_of_job_is_idempotent_across_polls() {
        let (manager, _guard) = manager();
        manager.create_session("mock").expect("create");
        manager.start_capturing().expect("start");

        wait_until(&manager, "job finished", |s| {
            s.state == SessionState::Draining
        })
        .await;
        manager.release_image_blocks(1, 100).expect("release");

        for _ in 0..5 {
            let snapshot = manager.get_session().expect("get_session");
            assert!(snapshot.end_of_job);
            assert_eq!(snapshot.image_blocks, None);
        }
    }

    #[tokio::test]
    async fn stop_capturing_always_reports_success() {
        let (manager, _guard) =
            manager_with(MockScanner::new(1000).with_page_delay(Duration::from_millis(2)));
        manager.create_session("mock").expect("create");
        manager.start_capturing().expect("start");

        manager.stop_capturing().expect("stop");
        // Stopping twice is equally fine.
        manager.stop_capturing().expect("stop again");

        let snapshot = wait_until(&manager, "job over", |s| {
            s.state != SessionState::Capturing
        })
        .await;
        assert_ne!(snapshot.state, SessionState::Capturing);
        assert_eq!(
            manager.job_status().expect("job_status"),
            Some(TerminalStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn encoding_failure_ends_job_with_image_error() {
        let (manager, _guard) = manager_with(
            MockScanner::new(3)
                .with_page_delay(Duration::from_millis(2))
                .with_bad_geometry(),
        );
        manager.create_session("mock").expect("create");
        manager.start_capturing().expect("start");

        let snapshot = wait_until(&manager, "job over", |s| s.end_of_job).await;
        assert!(snapshot.end_of_job);
        assert_eq!(
            manager.job_status().expect("job_status"),
            Some(TerminalStatus::ImageError)
        );
    }

    #[tokio::test]
    async fn start_capturing_twice_is_invalid_state() {
        let (manager, _guard) =
            manager_with(MockScanner::new(100).with_page_delay(Duration::from_millis(2)));
        manager.create_session("mock").expect("create");
        manager.start_capturing().expect("start");
        let err = manager.start_capturing().unwrap_err();
        assert!(matches!(
            err,
            CommandError::Engine(ScanwerkError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn send_task_failure_leaves_session_state_untouched() {
        let (manager, _guard) = manager();
        manager.create_session("mock").expect("create");

        let err = manager
            .send_task(r#"{"actions":[{"source":"flatbed"}]}"#)
            .unwrap_err();
        assert!(matches!(err, CommandError::Task(_)));

        let snapshot = manager.get_session().expect("get_session");
        assert_eq!(snapshot.state, SessionState::Ready);
    }
}
