//! Synthetic depth-camera source for demos and tests.

use std::sync::Arc;

use image::{Luma, Rgba};
use tracing::{debug, info};

use crate::image_types::{ColorImage, DepthImage, IrImage};
use crate::projection::{PinholeProjector, Projector, RigCalibration};
use crate::source::{AcquireStatus, CaptureError, FrameSource, Sample, StreamKind};

/// Invalid-depth dropout stride for the generated scene.
const DROPOUT_STRIDE: u32 = 11;

/// Scripted frame source that renders a fixed synthetic scene: a ramped
/// depth plane with periodic dropout, a colour gradient, and a flat-ish
/// infrared field.
///
/// The frame lock is modeled faithfully: `sample` returns `Some` only
/// between a `Ready` acquisition and the matching `release_frame`.
pub struct SyntheticCamera {
    calibration: RigCalibration,
    color_res: Option<(u32, u32)>,
    depth_res: Option<(u32, u32)>,
    ir_res: Option<(u32, u32)>,
    active: bool,
    frame_count: u64,
    locked: Option<Sample>,
}

impl SyntheticCamera {
    /// Create a synthetic camera with the default rig calibration.
    pub fn new() -> Result<Self, CaptureError> {
        Self::with_calibration(RigCalibration::default())
    }

    /// Create a synthetic camera for a specific rig calibration.
    pub fn with_calibration(calibration: RigCalibration) -> Result<Self, CaptureError> {
        Ok(Self {
            calibration,
            color_res: None,
            depth_res: None,
            ir_res: None,
            active: false,
            frame_count: 0,
            locked: None,
        })
    }

    /// Total frames produced so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn preferred_resolution(&self, kind: StreamKind) -> (u32, u32) {
        match kind {
            StreamKind::Color => (self.calibration.color.width, self.calibration.color.height),
            StreamKind::Depth | StreamKind::Infrared => {
                (self.calibration.depth.width, self.calibration.depth.height)
            }
        }
    }

    fn render_depth(&self, width: u32, height: u32) -> DepthImage {
        DepthImage::from_fn(width, height, |x, y| {
            if (x + y) % DROPOUT_STRIDE == 0 {
                Luma([0])
            } else {
                Luma([(600 + x + 2 * y) as u16])
            }
        })
    }

    fn render_color(&self, width: u32, height: u32) -> ColorImage {
        let phase = (self.frame_count % 256) as u8;
        ColorImage::from_fn(width, height, |x, y| {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            Rgba([r, g, phase, 255])
        })
    }

    fn render_ir(&self, width: u32, height: u32) -> IrImage {
        IrImage::from_fn(width, height, |x, y| Luma([(x * 16 + y) as u16]))
    }
}

impl FrameSource for SyntheticCamera {
    fn enable_stream(
        &mut self,
        kind: StreamKind,
        width: u32,
        height: u32,
    ) -> Result<(), CaptureError> {
        if self.active {
            return Err(CaptureError::StreamConfiguration(
                "streams cannot be enabled after start".to_string(),
            ));
        }
        let resolution = if width == 0 || height == 0 {
            self.preferred_resolution(kind)
        } else {
            (width, height)
        };
        debug!(
            "Enabling {:?} stream at {}x{}",
            kind, resolution.0, resolution.1
        );
        match kind {
            StreamKind::Color => self.color_res = Some(resolution),
            StreamKind::Depth => self.depth_res = Some(resolution),
            StreamKind::Infrared => self.ir_res = Some(resolution),
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.color_res.is_none() && self.depth_res.is_none() && self.ir_res.is_none() {
            return Err(CaptureError::StreamConfiguration(
                "no streams enabled".to_string(),
            ));
        }
        self.active = true;
        info!("Synthetic camera started");
        Ok(())
    }

    fn reset_properties(&mut self) {
        debug!("Device properties reset to defaults");
    }

    fn projector(&self) -> Result<Box<dyn Projector>, CaptureError> {
        let (depth_width, depth_height) = self.depth_res.ok_or_else(|| {
            CaptureError::ProjectionUnavailable("depth stream not enabled".to_string())
        })?;
        let (color_width, color_height) = self.color_res.unwrap_or_else(|| {
            (self.calibration.color.width, self.calibration.color.height)
        });
        Ok(Box::new(PinholeProjector::new(RigCalibration {
            depth: self.calibration.depth.scaled_to(depth_width, depth_height),
            color: self.calibration.color.scaled_to(color_width, color_height),
        })))
    }

    fn acquire_frame(&mut self) -> Result<AcquireStatus, CaptureError> {
        if !self.active {
            return Ok(AcquireStatus::NoFrame);
        }
        self.frame_count += 1;
        let sample = Sample {
            color: self
                .color_res
                .map(|(w, h)| Arc::new(self.render_color(w, h))),
            depth: self
                .depth_res
                .map(|(w, h)| Arc::new(self.render_depth(w, h))),
            ir: self.ir_res.map(|(w, h)| Arc::new(self.render_ir(w, h))),
        };
        self.locked = Some(sample);
        debug!("Captured synthetic frame {}", self.frame_count);
        Ok(AcquireStatus::Ready)
    }

    fn sample(&self) -> Option<Sample> {
        self.locked.clone()
    }

    fn release_frame(&mut self) {
        self.locked = None;
    }

    fn close(&mut self) {
        if self.active {
            self.active = false;
            self.locked = None;
            info!(
                "Synthetic camera stopped after {} frames",
                self.frame_count
            );
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Intrinsics;

    fn small_camera() -> SyntheticCamera {
        let intrinsics = Intrinsics {
            width: 8,
            height: 8,
            fx: 100.0,
            fy: 100.0,
            cx: 4.0,
            cy: 4.0,
        };
        SyntheticCamera::with_calibration(RigCalibration {
            depth: intrinsics,
            color: intrinsics,
        })
        .unwrap()
    }

    #[test]
    fn test_sample_only_available_inside_lock_window() {
        let mut camera = small_camera();
        camera.enable_stream(StreamKind::Depth, 0, 0).unwrap();
        camera.start().unwrap();

        assert!(camera.sample().is_none());
        assert_eq!(camera.acquire_frame().unwrap(), AcquireStatus::Ready);

        let sample = camera.sample().expect("frame should be locked");
        assert!(sample.depth.is_some());
        assert!(sample.color.is_none());
        assert!(sample.ir.is_none());

        camera.release_frame();
        assert!(camera.sample().is_none());
        assert_eq!(camera.frame_count(), 1);
    }

    #[test]
    fn test_acquire_before_start_yields_no_frame() {
        let mut camera = small_camera();
        camera.enable_stream(StreamKind::Depth, 0, 0).unwrap();
        assert_eq!(camera.acquire_frame().unwrap(), AcquireStatus::NoFrame);
    }

    #[test]
    fn test_start_without_streams_is_rejected() {
        let mut camera = small_camera();
        assert!(matches!(
            camera.start(),
            Err(CaptureError::StreamConfiguration(_))
        ));
    }

    #[test]
    fn test_enable_stream_after_start_is_rejected() {
        let mut camera = small_camera();
        camera.enable_stream(StreamKind::Depth, 0, 0).unwrap();
        camera.start().unwrap();
        assert!(matches!(
            camera.enable_stream(StreamKind::Color, 0, 0),
            Err(CaptureError::StreamConfiguration(_))
        ));
    }

    #[test]
    fn test_projector_matches_enabled_depth_resolution() {
        let mut camera = small_camera();
        camera.enable_stream(StreamKind::Depth, 0, 0).unwrap();
        camera.enable_stream(StreamKind::Color, 0, 0).unwrap();
        camera.start().unwrap();
        camera.acquire_frame().unwrap();

        let sample = camera.sample().unwrap();
        let depth = sample.depth.unwrap();
        let projector = camera.projector().unwrap();
        let vertices = projector.vertices(&depth).unwrap();
        assert_eq!(vertices.len(), 64);

        camera.release_frame();
    }

    #[test]
    fn test_rendered_depth_has_dropout_and_measured_pixels() {
        let camera = small_camera();
        let depth = camera.render_depth(8, 8);
        let values: Vec<u16> = depth.pixels().map(|p| p.0[0]).collect();
        assert!(values.iter().any(|&v| v == 0));
        assert!(values.iter().any(|&v| v != 0));
    }

    #[test]
    fn test_close_stops_capture() {
        let mut camera = small_camera();
        camera.enable_stream(StreamKind::Infrared, 0, 0).unwrap();
        camera.start().unwrap();
        camera.acquire_frame().unwrap();
        camera.release_frame();
        camera.close();
        assert_eq!(camera.acquire_frame().unwrap(), AcquireStatus::NoFrame);
    }
}
