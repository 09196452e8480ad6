//! Recording session management.
//!
//! The manager owns at most one live recording. Starting opens a fresh artifact under a daily
//! directory and launches the capture, retrying once. Stopping tears the capture down, waits for
//! it to release the artifact, and optionally deletes recordings that are too short to have
//! contained real activity.

use crate::capture::{Capture, CaptureHandle, FrameCounter};
use crate::config::{Config, Thresholds};
use chrono::{DateTime, Local};
use log::*;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("capture failed to start after {attempts} attempts")]
    Launch {
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("capture writing {} did not stop cleanly", .path.display())]
    Terminate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("a recording session is already active")]
    SessionActive,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What happened to the artifact of a finished session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Kept on disk. The frame count is known if it was read back.
    Kept { frames: Option<u64> },
    /// Deleted as a false positive.
    Deleted { frames: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionOutcome {
    pub path: PathBuf,
    pub started: DateTime<Local>,
    pub disposition: Disposition,
}

/// One contiguous recording.
pub struct RecordingSession {
    started: DateTime<Local>,
    path: PathBuf,
    handle: Box<dyn CaptureHandle>,
}

impl RecordingSession {
    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Artifact path for a session starting at `time`: `<root>/<YYYY-MM-DD>/<HH-MM-SS>.mkv`.
pub fn output_path(root: &Path, time: DateTime<Local>) -> PathBuf {
    root.join(time.format("%Y-%m-%d").to_string())
        .join(format!("{}.mkv", time.format("%H-%M-%S")))
}

pub struct SessionManager {
    source: String,
    output_dir: PathBuf,
    auto_delete: bool,
    delete_below: f64,
    retry_delay: Duration,
    capture: Box<dyn Capture>,
    counter: Box<dyn FrameCounter>,
    active: Option<RecordingSession>,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        thresholds: &Thresholds,
        capture: Box<dyn Capture>,
        counter: Box<dyn FrameCounter>,
    ) -> Self {
        Self {
            source: config.source.clone(),
            output_dir: config.output_dir.clone(),
            auto_delete: config.auto_delete,
            delete_below: thresholds.delete_below(),
            retry_delay: config.launch_retry_delay(),
            capture,
            counter,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&RecordingSession> {
        self.active.as_ref()
    }

    /// Open a new artifact and launch the capture into it.
    ///
    /// A failed launch is retried once after a fixed delay. If that fails too, no session is
    /// left behind and the error is returned.
    pub fn start(&mut self) -> Result<&RecordingSession, RecordError> {
        if self.active.is_some() {
            return Err(RecordError::SessionActive);
        }

        let started = Local::now();
        let path = output_path(&self.output_dir, started);

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let handle = match self.capture.start(&self.source, &path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("capture failed to start ({e}), retrying");
                std::thread::sleep(self.retry_delay);
                self.capture
                    .start(&self.source, &path)
                    .map_err(|source| RecordError::Launch {
                        attempts: 2,
                        source,
                    })?
            }
        };

        info!("{} recording started", started.format("%H-%M-%S"));

        Ok(self.active.insert(RecordingSession {
            started,
            path,
            handle,
        }))
    }

    /// Stop the active session, if any.
    ///
    /// The capture is always joined, even when asking it to stop fails, so no process or file
    /// handle outlives this call. Returns `Ok(None)` when nothing was recording.
    pub fn stop(&mut self) -> Result<Option<SessionOutcome>, RecordError> {
        let RecordingSession {
            started,
            path,
            mut handle,
        } = match self.active.take() {
            Some(session) => session,
            None => return Ok(None),
        };

        let terminated = handle.terminate();
        let joined = handle.join();

        info!("{} recording stopped", Local::now().format("%H-%M-%S"));

        if let Err(source) = terminated.and(joined) {
            return Err(RecordError::Terminate { path, source });
        }

        let disposition = self.dispose(&path);

        Ok(Some(SessionOutcome {
            path,
            started,
            disposition,
        }))
    }

    fn dispose(&self, path: &Path) -> Disposition {
        if !self.auto_delete {
            return Disposition::Kept { frames: None };
        }

        let frames = match self.counter.frame_count(path) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("could not read back {}, keeping it: {e}", path.display());
                return Disposition::Kept { frames: None };
            }
        };

        if (frames as f64) < self.delete_below && path.is_file() {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    info!("{} was deleted", path.display());
                    return Disposition::Deleted { frames };
                }
                Err(e) => warn!("failed to delete {}: {e}", path.display()),
            }
        }

        Disposition::Kept {
            frames: Some(frames),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("session manager dropped while recording, finalizing");
            if let Err(e) = self.stop() {
                error!("{e}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::prelude::v1::*;
    use chrono::TimeZone;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Counters shared between a mock capture and the test.
    #[derive(Clone, Default)]
    pub struct CaptureLog {
        pub launches: Arc<AtomicUsize>,
        pub terminations: Arc<AtomicUsize>,
        pub joins: Arc<AtomicUsize>,
    }

    impl CaptureLog {
        pub fn get(counter: &Arc<AtomicUsize>) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    /// Capture that fails its first `failures` launches and writes an empty artifact otherwise.
    pub struct MockCapture {
        pub failures: usize,
        pub fail_terminate: bool,
        /// Recorder dies on its own, which only shows once it is joined.
        pub crash: bool,
        pub log: CaptureLog,
    }

    impl MockCapture {
        pub fn new(failures: usize, log: &CaptureLog) -> Self {
            Self {
                failures,
                fail_terminate: false,
                crash: false,
                log: log.clone(),
            }
        }
    }

    struct MockHandle {
        fail_terminate: bool,
        crash: bool,
        log: CaptureLog,
    }

    impl Capture for MockCapture {
        fn start(&self, _source: &str, output: &Path) -> io::Result<Box<dyn CaptureHandle>> {
            let attempt = self.log.launches.fetch_add(1, Ordering::SeqCst);

            if attempt < self.failures {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no recorder"));
            }

            std::fs::write(output, b"mkv")?;

            Ok(Box::new(MockHandle {
                fail_terminate: self.fail_terminate,
                crash: self.crash,
                log: self.log.clone(),
            }))
        }
    }

    impl CaptureHandle for MockHandle {
        fn terminate(&mut self) -> io::Result<()> {
            self.log.terminations.fetch_add(1, Ordering::SeqCst);
            if self.fail_terminate {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            } else {
                Ok(())
            }
        }

        fn join(self: Box<Self>) -> io::Result<()> {
            self.log.joins.fetch_add(1, Ordering::SeqCst);
            if self.crash {
                Err(io::Error::new(io::ErrorKind::Other, "exit status: 3"))
            } else {
                Ok(())
            }
        }
    }

    pub fn config(dir: &Path) -> Config {
        Config {
            source: "rtsp://camera/stream".into(),
            output_dir: dir.to_path_buf(),
            launch_retry_delay_ms: 0,
            ..Default::default()
        }
    }

    /// M = 5, fps = 10, so recordings below 10 frames are deleted.
    pub fn thresholds() -> Thresholds {
        Thresholds {
            threshold: 350,
            start_frames: 3,
            stop_frames: 5,
            fps: 10.0,
        }
    }

    fn manager(dir: &Path, capture: MockCapture, frames: Result<u64>) -> SessionManager {
        let frames = frames.map_err(|e| e.to_string());
        SessionManager::new(
            &config(dir),
            &thresholds(),
            Box::new(capture),
            Box::new(move |_: &Path| frames.clone().map_err(|e| anyhow!(e))),
        )
    }

    #[test]
    fn artifact_path_layout() {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            output_path(Path::new("/rec"), time),
            Path::new("/rec/2024-03-09/07-05-01.mkv")
        );
    }

    #[test]
    fn start_creates_daily_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut mgr = manager(dir.path(), MockCapture::new(0, &log), Ok(100));

        let path = mgr.start().unwrap().path().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(path.extension().unwrap(), "mkv");
        assert!(mgr.active().is_some());
        assert_eq!(CaptureLog::get(&log.launches), 1);
    }

    #[test]
    fn launch_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut mgr = manager(dir.path(), MockCapture::new(1, &log), Ok(100));

        assert!(mgr.start().is_ok());
        assert!(mgr.active().is_some());
        assert_eq!(CaptureLog::get(&log.launches), 2);

        let outcome = mgr.stop().unwrap().unwrap();
        assert_eq!(outcome.disposition, Disposition::Kept { frames: Some(100) });
    }

    #[test]
    fn second_launch_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut mgr = manager(dir.path(), MockCapture::new(2, &log), Ok(100));

        assert!(matches!(
            mgr.start(),
            Err(RecordError::Launch { attempts: 2, .. })
        ));
        assert!(mgr.active().is_none());
        assert_eq!(CaptureLog::get(&log.launches), 2);
        assert!(mgr.stop().unwrap().is_none());
    }

    #[test]
    fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut mgr = manager(dir.path(), MockCapture::new(0, &log), Ok(100));

        mgr.start().unwrap();
        assert!(matches!(mgr.start(), Err(RecordError::SessionActive)));
        assert_eq!(CaptureLog::get(&log.launches), 1);
    }

    #[test]
    fn stop_finalizes_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut mgr = manager(dir.path(), MockCapture::new(0, &log), Ok(100));

        assert!(mgr.stop().unwrap().is_none());

        mgr.start().unwrap();
        assert!(mgr.stop().unwrap().is_some());
        assert!(mgr.stop().unwrap().is_none());
        assert_eq!(CaptureLog::get(&log.terminations), 1);
        assert_eq!(CaptureLog::get(&log.joins), 1);
    }

    #[test]
    fn delete_boundary() {
        for (frames, deleted) in [(7, true), (9, true), (10, false), (11, false)] {
            let dir = tempfile::tempdir().unwrap();
            let log = CaptureLog::default();
            let mut mgr = manager(dir.path(), MockCapture::new(0, &log), Ok(frames));

            mgr.start().unwrap();
            let outcome = mgr.stop().unwrap().unwrap();

            if deleted {
                assert_eq!(outcome.disposition, Disposition::Deleted { frames });
                assert!(!outcome.path.exists());
            } else {
                assert_eq!(
                    outcome.disposition,
                    Disposition::Kept {
                        frames: Some(frames)
                    }
                );
                assert!(outcome.path.exists());
            }
        }
    }

    #[test]
    fn unreadable_artifact_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut mgr = manager(
            dir.path(),
            MockCapture::new(0, &log),
            Err(anyhow!("corrupt")),
        );

        mgr.start().unwrap();
        let outcome = mgr.stop().unwrap().unwrap();
        assert_eq!(outcome.disposition, Disposition::Kept { frames: None });
        assert!(outcome.path.exists());
    }

    #[test]
    fn auto_delete_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut cfg = config(dir.path());
        cfg.auto_delete = false;

        let mut mgr = SessionManager::new(
            &cfg,
            &thresholds(),
            Box::new(MockCapture::new(0, &log)),
            Box::new(|_: &Path| -> Result<u64> { panic!("must not read back") }),
        );

        mgr.start().unwrap();
        let outcome = mgr.stop().unwrap().unwrap();
        assert_eq!(outcome.disposition, Disposition::Kept { frames: None });
    }

    #[test]
    fn failed_termination_still_joins() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut capture = MockCapture::new(0, &log);
        capture.fail_terminate = true;
        let mut mgr = manager(dir.path(), capture, Ok(1));

        mgr.start().unwrap();
        assert!(matches!(mgr.stop(), Err(RecordError::Terminate { .. })));
        assert!(mgr.active().is_none());
        assert_eq!(CaptureLog::get(&log.joins), 1);
    }

    #[test]
    fn crashed_capture_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut capture = MockCapture::new(0, &log);
        capture.crash = true;
        let mut mgr = manager(dir.path(), capture, Ok(100));

        let path = mgr.start().unwrap().path().to_path_buf();

        match mgr.stop() {
            Err(RecordError::Terminate { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected a termination error, got {other:?}"),
        }

        assert!(mgr.active().is_none());
        assert_eq!(CaptureLog::get(&log.terminations), 1);
        assert_eq!(CaptureLog::get(&log.joins), 1);
    }

    #[test]
    fn drop_finalizes_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::default();
        let mut mgr = manager(dir.path(), MockCapture::new(0, &log), Ok(100));

        mgr.start().unwrap();
        drop(mgr);
        assert_eq!(CaptureLog::get(&log.joins), 1);
    }
}
