//! Run configuration.
//!
//! The configuration is assembled and validated once at startup and never re-read afterwards.

use crate::prelude::v1::*;
use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;

/// Property with a lower and upper bound.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundedProp<T> {
    pub val: T,
    pub min: T,
    pub max: T,
}

impl<T> Deref for BoundedProp<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.val
    }
}

impl<T> BoundedProp<T> {
    pub const fn new(val: T, min: T, max: T) -> Self {
        Self { val, min, max }
    }
}

impl<T: PartialOrd + Copy + std::fmt::Display> BoundedProp<T> {
    /// Replace the value, keeping the bounds.
    pub fn with(self, val: T) -> Self {
        Self { val, ..self }
    }

    /// Ensure the value is within bounds.
    pub fn check(&self, name: &str) -> Result<()> {
        if self.val < self.min || self.val > self.max {
            Err(anyhow!(
                "{name} must be between {} and {}, got {}",
                self.min,
                self.max,
                self.val
            ))
        } else {
            Ok(())
        }
    }
}

/// Default and allowed range of the motion threshold.
pub const THRESHOLD: BoundedProp<u32> = BoundedProp::new(350, 1, 10000);
/// Default and allowed range of the start debounce, in frames.
pub const START_FRAMES: BoundedProp<u32> = BoundedProp::new(3, 1, 30);
/// Default and allowed range of the stop tail, in seconds.
pub const TAIL_LENGTH: BoundedProp<u32> = BoundedProp::new(8, 1, 30);

/// Operator-facing knobs.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Stream address, opened once for analysis and once per recording.
    pub source: String,
    /// Motion score required to count a frame as active.
    pub threshold: u32,
    /// Consecutive active frames needed to start recording.
    pub start_frames: u32,
    /// Seconds without activity needed to stop recording.
    pub tail_length: u32,
    /// Delete recordings barely longer than the tail.
    pub auto_delete: bool,
    /// Run the state machine without recording anything.
    pub testing: bool,
    /// Root under which daily recording directories are created.
    pub output_dir: PathBuf,
    /// Frame queue capacity. 0 means unbounded.
    pub queue_capacity: usize,
    /// Framerate to assume when the source does not report one.
    pub fps: Option<f64>,
    pub launch_retry_delay_ms: u64,
    /// How long a freshly launched capture must survive to count as started.
    pub launch_probe_ms: u64,
    /// How long to wait for a capture to finalize before killing it.
    pub stop_timeout_ms: u64,
    pub read_retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: String::new(),
            threshold: *THRESHOLD,
            start_frames: *START_FRAMES,
            tail_length: *TAIL_LENGTH,
            auto_delete: true,
            testing: false,
            output_dir: PathBuf::from("."),
            queue_capacity: 0,
            fps: None,
            launch_retry_delay_ms: 1000,
            launch_probe_ms: 500,
            stop_timeout_ms: 10000,
            read_retry_delay_ms: 500,
        }
    }
}

impl Config {
    /// Check every knob, returning the frozen configuration.
    pub fn validate(self) -> Result<Self> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("no stream address given"));
        }

        THRESHOLD.with(self.threshold).check("threshold")?;
        START_FRAMES.with(self.start_frames).check("start_frames")?;
        TAIL_LENGTH.with(self.tail_length).check("tail_length")?;

        if let Some(fps) = self.fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(anyhow!("fps must be positive, got {fps}"));
            }
        }

        Ok(self)
    }

    /// Derive the frame based thresholds once the stream framerate is known.
    ///
    /// A configured `fps` wins over the framerate reported by the source.
    pub fn thresholds(&self, source_fps: Option<f64>) -> Result<Thresholds> {
        let fps = self
            .fps
            .or(source_fps.filter(|fps| fps.is_finite() && *fps > 0.0))
            .ok_or_else(|| anyhow!("stream framerate unknown, set it explicitly"))?;

        Ok(Thresholds {
            threshold: self.threshold,
            start_frames: self.start_frames,
            stop_frames: (self.tail_length as f64 * fps).ceil() as u32,
            fps,
        })
    }

    pub fn launch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.launch_retry_delay_ms)
    }

    pub fn launch_probe(&self) -> Duration {
        Duration::from_millis(self.launch_probe_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }
}

/// Frame counts derived from the configuration and the nominal framerate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub threshold: u32,
    pub start_frames: u32,
    pub stop_frames: u32,
    pub fps: f64,
}

impl Thresholds {
    /// Recordings with fewer frames than this are considered false positives.
    pub fn delete_below(&self) -> f64 {
        self.stop_frames as f64 + self.fps / 2.0
    }

    /// Time between frames.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}
