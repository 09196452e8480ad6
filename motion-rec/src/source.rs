//! # Frame sources

use crate::prelude::v1::*;

/// Single decoded video frame.
///
/// Pixels are stored as packed 8-bit BGR triplets, row by row, which is what most capture
/// backends produce natively.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Arrival order within the stream, starting from 0.
    pub index: u64,
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Frame {
    /// Number of bytes a well-formed frame of this size holds.
    pub fn expected_len(&self) -> usize {
        self.width * self.height * 3
    }

    /// Whether the buffer agrees with the frame dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    /// BGR triplet at the given coordinates.
    pub fn bgr(&self, x: usize, y: usize) -> [u8; 3] {
        let off = (y * self.width + x) * 3;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }
}

/// Live video source.
///
/// The analysis path keeps one open source for its whole run. The recording path never reads
/// through this trait; it opens its own connection to the same address.
pub trait FrameSource: Send {
    /// Read the next frame in the stream.
    ///
    /// Returns `Ok(Some(frame))` when a frame is available, `Ok(None)` once the stream has ended,
    /// and `Err` if reading failed. A failed read does not necessarily mean the stream is over.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Get the nominal framerate of the stream.
    ///
    /// On some realtime streams it may not be known, in which case `None` is returned.
    fn framerate(&self) -> Option<f64>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn framerate(&self) -> Option<f64> {
        (**self).framerate()
    }
}
