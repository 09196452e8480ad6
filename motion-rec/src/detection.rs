//! Motion scoring module

use crate::prelude::v1::*;
use nalgebra as na;

/// Reduced luma plane. Rows are image rows.
pub type Plane = na::DMatrix<u8>;

/// Minimum per-pixel difference counted as change.
const DIFF_THRESHOLD: u8 = 5;

/// Value a changed pixel takes after thresholding.
const CHANGED: f64 = 255.0;

/// Frames wider than this aspect ratio use the wide preset.
const WIDE_ASPECT: f64 = 1.55;

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("malformed frame {index}: expected {expected} bytes, got {actual}")]
    Malformed {
        index: u64,
        expected: usize,
        actual: usize,
    },
    #[error("failed to reduce frame {index}")]
    Reduce {
        index: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("reduced frame {index} is {actual:?} (rows, cols), expected {expected:?}")]
    Shape {
        index: u64,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("scorer has not seen a reference frame yet")]
    Unprimed,
}

/// Detection resolution presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// 256x144, for 16:9 and wider sources.
    Wide,
    /// 216x162, for 4:3 and squarer sources.
    Square,
}

impl Resolution {
    /// Pick the preset matching the aspect ratio of the given frame size.
    pub fn for_aspect(width: usize, height: usize) -> Self {
        if width as f64 / height as f64 > WIDE_ASPECT {
            Self::Wide
        } else {
            Self::Square
        }
    }

    /// `(width, height)` of the preset.
    pub fn dim(self) -> (usize, usize) {
        match self {
            Self::Wide => (256, 144),
            Self::Square => (216, 162),
        }
    }
}

/// Turns full frames into the small blurred grayscale planes that get compared.
///
/// Implementations resize the frame to the preset with bilinear interpolation, convert it to
/// grayscale and apply a 5x5 gaussian blur, in that order.
pub trait FrameReducer: Send {
    fn reduce(&mut self, frame: &Frame, resolution: Resolution) -> Result<Plane>;
}

impl<T: FrameReducer + ?Sized> FrameReducer for Box<T> {
    fn reduce(&mut self, frame: &Frame, resolution: Resolution) -> Result<Plane> {
        (**self).reduce(frame, resolution)
    }
}

/// Frame difference based motion scorer.
///
/// The score is the mean squared value of the thresholded absolute difference against the
/// previous reduced frame, i.e. `255^2` times the fraction of pixels that changed by more than a
/// few levels.
pub struct MotionScorer {
    reducer: Box<dyn FrameReducer>,
    primed: Option<(Resolution, Plane)>,
}

impl MotionScorer {
    pub fn new(reducer: Box<dyn FrameReducer>) -> Self {
        Self {
            reducer,
            primed: None,
        }
    }

    /// Take the first frame of the stream as the reference.
    ///
    /// The resolution preset is chosen from this frame and kept for the whole run. A frame that
    /// cannot be reduced leaves the scorer unprimed.
    pub fn prime(&mut self, first: &Frame) -> Result<Resolution, ScoreError> {
        let resolution = Resolution::for_aspect(first.width, first.height);
        let reference = reduce(&mut *self.reducer, first, resolution)?;
        self.primed = Some((resolution, reference));
        Ok(resolution)
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.primed.as_ref().map(|(resolution, _)| *resolution)
    }

    /// Score a frame against the reference and make it the new reference.
    ///
    /// Frames that fail to reduce are rejected without touching the reference.
    pub fn score(&mut self, frame: &Frame) -> Result<u32, ScoreError> {
        let (resolution, reference) = self.primed.as_mut().ok_or(ScoreError::Unprimed)?;
        let reduced = reduce(&mut *self.reducer, frame, *resolution)?;
        let score = difference_score(&reduced, reference);
        *reference = reduced;
        Ok(score)
    }
}

fn reduce(
    reducer: &mut dyn FrameReducer,
    frame: &Frame,
    resolution: Resolution,
) -> Result<Plane, ScoreError> {
    if !frame.is_well_formed() {
        return Err(ScoreError::Malformed {
            index: frame.index,
            expected: frame.expected_len(),
            actual: frame.data.len(),
        });
    }

    let plane = reducer
        .reduce(frame, resolution)
        .map_err(|e| ScoreError::Reduce {
            index: frame.index,
            source: e.into(),
        })?;

    let (w, h) = resolution.dim();

    if plane.shape() != (h, w) {
        return Err(ScoreError::Shape {
            index: frame.index,
            expected: (h, w),
            actual: plane.shape(),
        });
    }

    Ok(plane)
}

/// Mean squared error between the thresholded difference image and an all-zero image.
pub fn difference_score(a: &Plane, b: &Plane) -> u32 {
    let total = a.len();

    if total == 0 {
        return 0;
    }

    let changed = a
        .iter()
        .zip(b.iter())
        .filter(|(&a, &b)| a.abs_diff(b) > DIFF_THRESHOLD)
        .count();

    (changed as f64 * CHANGED * CHANGED / total as f64) as u32
}
