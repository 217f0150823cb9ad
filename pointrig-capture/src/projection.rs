//! Depth-pixel projection: camera-space vertices and colour-image UV maps.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::image_types::DepthImage;

/// UV value emitted for depth pixels with no valid colour correspondence.
pub const INVALID_UV: Vec2 = Vec2::new(-1.0, -1.0);

/// Errors from projection queries and calibration loading.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Depth image is {actual_width}x{actual_height} but projector expects {expected_width}x{expected_height}")]
    SizeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Failed to read calibration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse calibration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Pinhole camera intrinsics at a reference resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    /// Focal length X in pixels.
    pub fx: f32,
    /// Focal length Y in pixels.
    pub fy: f32,
    /// Principal point X in pixels.
    pub cx: f32,
    /// Principal point Y in pixels.
    pub cy: f32,
}

impl Intrinsics {
    /// Kinect-style depth intrinsics at the 640x480 reference resolution.
    pub fn default_depth() -> Self {
        Self {
            width: 640,
            height: 480,
            fx: 594.21,
            fy: 591.04,
            cx: 339.5,
            cy: 242.7,
        }
    }

    /// Default colour intrinsics. The reference rig is registered, so the
    /// colour camera shares the depth camera's calibration.
    pub fn default_color() -> Self {
        Self::default_depth()
    }

    /// Rescale the intrinsics to a different stream resolution.
    pub fn scaled_to(&self, width: u32, height: u32) -> Self {
        let sx = width as f32 / self.width as f32;
        let sy = height as f32 / self.height as f32;
        Self {
            width,
            height,
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }
}

/// Calibration for a depth + colour rig.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigCalibration {
    pub depth: Intrinsics,
    pub color: Intrinsics,
}

impl RigCalibration {
    /// Load a calibration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProjectionError> {
        let path = path.as_ref();
        debug!("Loading rig calibration from: {}", path.display());
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let calibration = serde_json::from_reader(reader)?;
        Ok(calibration)
    }
}

impl Default for RigCalibration {
    fn default() -> Self {
        Self {
            depth: Intrinsics::default_depth(),
            color: Intrinsics::default_color(),
        }
    }
}

/// Maps a depth frame to per-pixel camera-space vertices and per-pixel
/// normalized colour-image coordinates.
///
/// Both queries return one entry per depth pixel in row-major order.
pub trait Projector {
    /// Camera-space vertices for every depth pixel. Unmeasured pixels
    /// (raw depth 0) yield the zero vertex.
    fn vertices(&self, depth: &DepthImage) -> Result<Vec<Vec3>, ProjectionError>;

    /// Normalized colour-image coordinates for every depth pixel. Pixels
    /// with no valid correspondence yield [`INVALID_UV`].
    fn uv_map(&self, depth: &DepthImage) -> Result<Vec<Vec2>, ProjectionError>;
}

/// Pinhole projection for a registered depth + colour rig.
///
/// Depth values pass through unscaled: vertex z is the raw device unit as
/// f32, so invalid pixels keep z == 0.
pub struct PinholeProjector {
    calibration: RigCalibration,
}

impl PinholeProjector {
    pub fn new(calibration: RigCalibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &RigCalibration {
        &self.calibration
    }

    fn check_dimensions(&self, depth: &DepthImage) -> Result<(), ProjectionError> {
        let d = &self.calibration.depth;
        let (actual_width, actual_height) = depth.dimensions();
        if actual_width != d.width || actual_height != d.height {
            return Err(ProjectionError::SizeMismatch {
                expected_width: d.width,
                expected_height: d.height,
                actual_width,
                actual_height,
            });
        }
        Ok(())
    }
}

impl Projector for PinholeProjector {
    fn vertices(&self, depth: &DepthImage) -> Result<Vec<Vec3>, ProjectionError> {
        self.check_dimensions(depth)?;
        let d = self.calibration.depth;
        let (width, height) = depth.dimensions();

        let mut vertices = Vec::with_capacity((width * height) as usize);
        for py in 0..height {
            for px in 0..width {
                let raw = depth.get_pixel(px, py).0[0];
                if raw == 0 {
                    vertices.push(Vec3::ZERO);
                    continue;
                }
                let z = raw as f32;
                vertices.push(Vec3::new(
                    (px as f32 - d.cx) / d.fx * z,
                    (py as f32 - d.cy) / d.fy * z,
                    z,
                ));
            }
        }
        Ok(vertices)
    }

    fn uv_map(&self, depth: &DepthImage) -> Result<Vec<Vec2>, ProjectionError> {
        self.check_dimensions(depth)?;
        let d = self.calibration.depth;
        let c = self.calibration.color;
        let (width, height) = depth.dimensions();

        let mut uv_map = Vec::with_capacity((width * height) as usize);
        for py in 0..height {
            for px in 0..width {
                let raw = depth.get_pixel(px, py).0[0];
                if raw == 0 {
                    uv_map.push(INVALID_UV);
                    continue;
                }
                // Reproject the depth ray through the colour camera. With a
                // registered rig the correspondence is depth-independent.
                let u = ((px as f32 - d.cx) / d.fx * c.fx + c.cx) / c.width as f32;
                let v = ((py as f32 - d.cy) / d.fy * c.fy + c.cy) / c.height as f32;
                uv_map.push(Vec2::new(u, v));
            }
        }
        Ok(uv_map)
    }
}
