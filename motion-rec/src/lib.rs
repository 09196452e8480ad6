//! # Motion-triggered recording
//!
//! This library watches a live video source, scores every frame for motion and drives an
//! external recorder so that only the segments containing activity end up on disk. Recordings
//! that turn out to be barely longer than the stop tail are treated as false positives and
//! deleted.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use motion_rec::prelude::v1::*;
//! ```
//!
//! Frame decoding, image reduction and process spawning live behind the
//! [`source::FrameSource`], [`detection::FrameReducer`], [`capture::Capture`] and
//! [`capture::FrameCounter`] traits, so backends can be swapped out.

pub mod capture;
pub mod config;
pub mod detection;
pub mod pipeline;
pub mod queue;
pub mod recorder;
pub mod shutdown;
pub mod source;
pub mod trigger;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            capture::{Capture, CaptureHandle, FrameCounter},
            config::{BoundedProp, Config, Thresholds},
            detection::{FrameReducer, MotionScorer, Plane, Resolution, ScoreError},
            pipeline::{Pipeline, RunSummary},
            queue::{frame_queue, FrameReceiver, FrameSender, Recv},
            recorder::{Disposition, RecordError, SessionManager, SessionOutcome},
            shutdown::Shutdown,
            source::{Frame, FrameSource},
            trigger::{Trigger, TriggerEvent, TriggerState},
        };
        pub use anyhow::{anyhow, Error, Result};
    }
}
