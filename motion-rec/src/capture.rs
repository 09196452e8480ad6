//! # Recording collaborators
//!
//! The recording path runs independently of analysis: it opens its own connection to the stream
//! and copies it to disk at full quality. These traits describe what the session manager needs
//! from that machinery.

use crate::prelude::v1::*;
use std::io;
use std::path::Path;

/// Launches recording processes.
pub trait Capture: Send {
    /// Start copying `source` into `output`.
    ///
    /// The returned handle is live: the recorder is running and writing. An error means nothing
    /// is left running.
    fn start(&self, source: &str, output: &Path) -> io::Result<Box<dyn CaptureHandle>>;
}

/// Running recording process.
pub trait CaptureHandle: Send {
    /// Ask the recorder to finish writing and exit.
    fn terminate(&mut self) -> io::Result<()>;

    /// Wait for the recorder to exit and release the output.
    ///
    /// After this returns, successfully or not, the recorder no longer runs.
    fn join(self: Box<Self>) -> io::Result<()>;
}

/// Reads back the length of a finished recording.
pub trait FrameCounter: Send {
    fn frame_count(&self, path: &Path) -> Result<u64>;
}

impl<F: Fn(&Path) -> Result<u64> + Send> FrameCounter for F {
    fn frame_count(&self, path: &Path) -> Result<u64> {
        self(path)
    }
}
