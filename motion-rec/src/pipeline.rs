//! # Motion-triggered recording pipeline
//!
//! A dedicated ingestion thread pulls frames from the source as fast as they come and hands them
//! over through the frame queue. The calling thread scores each frame, feeds the score to the
//! trigger and starts or stops recording sessions accordingly.
//!
//! When the run ends, be it through the quit trigger, the end of the stream or a fatal error,
//! the pipeline lowers the run flag, finalizes any active recording exactly like a regular stop,
//! joins the ingestion thread and only then releases the source.

use crate::prelude::v1::*;
use crate::queue::{frame_queue, FrameSender, Recv};
use log::*;
use std::thread;
use std::time::Duration;

/// Statistics and session outcomes of a finished run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Frames read from the source, including the priming frame.
    pub frames_read: u64,
    pub frames_analyzed: u64,
    /// Malformed frames that could not be scored.
    pub frames_skipped: u64,
    /// Frames evicted from a full queue.
    pub frames_dropped: u64,
    pub sessions: Vec<SessionOutcome>,
    /// Sessions that failed to start or stop.
    pub failures: Vec<RecordError>,
    /// Why ingestion gave up, if it did not end normally.
    pub ingest_error: Option<Error>,
}

#[derive(Default)]
struct IngestReport {
    frames_read: u64,
    frames_dropped: u64,
    error: Option<Error>,
}

pub struct Pipeline {
    config: Config,
    shutdown: Shutdown,
}

impl Pipeline {
    /// Create a pipeline with a validated configuration.
    pub fn new(config: Config, shutdown: Shutdown) -> Result<Self> {
        Ok(Self {
            config: config.validate()?,
            shutdown,
        })
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Run until shutdown is requested or the source ends.
    ///
    /// The first frame is read on the calling thread to pick the detection resolution. Only a
    /// source that cannot produce that frame, or a broken session invariant, makes this return an
    /// error; individual frame and session failures are recorded in the summary instead.
    pub fn run<S: FrameSource + 'static>(
        &self,
        mut source: S,
        reducer: Box<dyn FrameReducer>,
        capture: Box<dyn Capture>,
        counter: Box<dyn FrameCounter>,
    ) -> Result<RunSummary> {
        let thresholds = self.config.thresholds(source.framerate())?;

        let mut summary = RunSummary::default();
        let mut scorer = MotionScorer::new(reducer);
        let (w, h) = prime(&mut source, &mut scorer, &mut summary)?.dim();
        info!(
            "detecting motion at {w}x{h}, {:.2} fps, stopping after {} quiet frames",
            thresholds.fps, thresholds.stop_frames
        );

        let mut manager = SessionManager::new(&self.config, &thresholds, capture, counter);
        let (tx, rx) = frame_queue(self.config.queue_capacity);

        let ingestion = {
            let shutdown = self.shutdown.clone();
            let retry_delay = self.config.read_retry_delay();
            let first_index = summary.frames_read;
            thread::Builder::new()
                .name("ingest".into())
                .spawn(move || ingest(source, tx, shutdown, retry_delay, first_index))?
        };

        let mut trigger = Trigger::new(&thresholds);
        let idle = thresholds.period() / 2;

        let analysis = (|| -> Result<()> {
            while self.shutdown.is_running() {
                let frame = match rx.next(idle) {
                    Recv::Frame(frame) => frame,
                    Recv::Idle => continue,
                    Recv::Closed => break,
                };

                let score = match scorer.score(&frame) {
                    Ok(score) => score,
                    Err(e) => {
                        warn!("{e}");
                        summary.frames_skipped += 1;
                        continue;
                    }
                };

                summary.frames_analyzed += 1;

                if self.config.testing && score > thresholds.threshold {
                    info!("motion: {score}");
                }

                match trigger.step(score) {
                    Some(TriggerEvent::StartRecording) => {
                        if self.config.testing {
                            info!("{} recording started - Testing mode", timestamp());
                        } else {
                            match manager.start() {
                                Ok(_) => {}
                                Err(RecordError::SessionActive) => {
                                    return Err(anyhow!("recording started twice"));
                                }
                                Err(e) => {
                                    error!("{e}");
                                    summary.failures.push(e);
                                    trigger.reset();
                                }
                            }
                        }
                    }
                    Some(TriggerEvent::StopRecording) => {
                        if self.config.testing {
                            info!("{} recording stopped - Testing mode", timestamp());
                        } else {
                            finish(&mut manager, &mut summary);
                        }
                    }
                    None => {}
                }
            }

            Ok(())
        })();

        // Coordinated teardown.
        self.shutdown.trigger();
        finish(&mut manager, &mut summary);
        drop(rx);

        match ingestion.join() {
            Ok((source, report)) => {
                summary.frames_read += report.frames_read;
                summary.frames_dropped = report.frames_dropped;
                summary.ingest_error = report.error;
                drop(source);
            }
            Err(_) => error!("ingestion thread panicked"),
        }

        analysis.map(|_| summary)
    }
}

fn timestamp() -> impl std::fmt::Display {
    chrono::Local::now().format("%H-%M-%S")
}

/// Read frames until one can prime the scorer.
fn prime<S: FrameSource>(
    source: &mut S,
    scorer: &mut MotionScorer,
    summary: &mut RunSummary,
) -> Result<Resolution> {
    loop {
        let frame = source
            .read_frame()?
            .ok_or_else(|| anyhow!("stream ended before the first frame"))?;

        summary.frames_read += 1;

        match scorer.prime(&frame) {
            Ok(resolution) => return Ok(resolution),
            Err(e) => {
                warn!("{e}");
                summary.frames_skipped += 1;
            }
        }
    }
}

/// Stop the active session and record how it ended.
fn finish(manager: &mut SessionManager, summary: &mut RunSummary) {
    match manager.stop() {
        Ok(Some(outcome)) => summary.sessions.push(outcome),
        Ok(None) => {}
        Err(e) => {
            error!("{e}");
            summary.failures.push(e);
        }
    }
}

/// Ingestion loop. Hands the source back once done so the caller decides when to release it.
fn ingest<S: FrameSource>(
    mut source: S,
    tx: FrameSender,
    shutdown: Shutdown,
    retry_delay: Duration,
    first_index: u64,
) -> (S, IngestReport) {
    let mut report = IngestReport::default();
    let mut retried = false;

    while shutdown.is_running() {
        match source.read_frame() {
            Ok(Some(mut frame)) => {
                retried = false;
                frame.index = first_index + report.frames_read;
                report.frames_read += 1;

                let evicted = tx.push(frame);

                if evicted > 0 {
                    report.frames_dropped += evicted as u64;
                    debug!("frame queue full, dropped {evicted} frames");
                }
            }
            Ok(None) => {
                info!("stream ended");
                break;
            }
            Err(e) if !retried => {
                warn!("failed to read frame, retrying: {e}");
                retried = true;
                thread::sleep(retry_delay);
            }
            Err(e) => {
                error!("failed to read frame, giving up: {e}");
                report.error = Some(e);
                break;
            }
        }
    }

    (source, report)
}
