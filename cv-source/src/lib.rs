//! OpenCV frame source, frame reducer and recording inspector

use log::*;
use motion_rec::prelude::v1::*;
use opencv::core::{self, Size};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::*;
use std::path::Path;

/// Low resolution analysis connection to a stream.
pub struct CvSource {
    capture: VideoCapture,
    frame: Mat,
    read: u64,
}

impl CvSource {
    pub fn try_new(stream: &str) -> Result<Self> {
        let capture = VideoCapture::from_file(stream, CAP_ANY)?;

        if !capture.is_opened()? {
            return Err(anyhow!("failed to open {stream}"));
        }

        info!("opened {stream}");

        Ok(Self {
            capture,
            frame: Default::default(),
            read: 0,
        })
    }
}

impl FrameSource for CvSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.capture.read(&mut self.frame)? {
            return Ok(None);
        }

        if self.frame.typ() != core::CV_8UC3 {
            return Err(anyhow!("expected 8-bit BGR frames, got type {}", self.frame.typ()));
        }

        let data = if self.frame.is_continuous() {
            self.frame.data_bytes()?.to_vec()
        } else {
            self.frame.try_clone()?.data_bytes()?.to_vec()
        };

        let index = self.read;
        self.read += 1;

        Ok(Some(Frame {
            index,
            width: self.frame.cols() as _,
            height: self.frame.rows() as _,
            data,
        }))
    }

    fn framerate(&self) -> Option<f64> {
        self.capture
            .get(CAP_PROP_FPS)
            .ok()
            .filter(|fps| *fps > 0.0)
    }
}

/// Reduces frames with `imgproc`: bilinear resize, grayscale, 5x5 gaussian blur.
#[derive(Default)]
pub struct CvReducer {
    small: Mat,
    gray: Mat,
    blurred: Mat,
}

impl FrameReducer for CvReducer {
    fn reduce(&mut self, frame: &Frame, resolution: Resolution) -> Result<Plane> {
        let (w, h) = resolution.dim();

        let flat = Mat::from_slice(&frame.data)?;
        let bgr = flat.reshape(3, frame.height as _)?;

        imgproc::resize(
            &bgr,
            &mut self.small,
            Size::new(w as _, h as _),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        imgproc::cvt_color(&self.small, &mut self.gray, imgproc::COLOR_BGR2GRAY, 0)?;
        imgproc::gaussian_blur(
            &self.gray,
            &mut self.blurred,
            Size::new(5, 5),
            0.0,
            0.0,
            core::BORDER_DEFAULT,
        )?;

        Ok(Plane::from_row_slice(h, w, self.blurred.data_bytes()?))
    }
}

/// Counts frames of finished recordings through the container metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct CvFrameCounter;

impl FrameCounter for CvFrameCounter {
    fn frame_count(&self, path: &Path) -> Result<u64> {
        let name = path
            .to_str()
            .ok_or_else(|| anyhow!("{} is not valid UTF-8", path.display()))?;

        let capture = VideoCapture::from_file(name, CAP_ANY)?;

        if !capture.is_opened()? {
            return Err(anyhow!("failed to open {name}"));
        }

        let frames = capture.get(CAP_PROP_FRAME_COUNT)?;

        if frames.is_finite() && frames >= 0.0 {
            Ok(frames as u64)
        } else {
            Err(anyhow!("{name} reports {frames} frames"))
        }
    }
}
