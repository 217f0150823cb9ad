//! Pointrig Capture - Synchronized frame acquisition for depth-camera rigs
//!
//! This crate provides the device-side abstractions of the pointrig pipeline:
//!
//! - The `FrameSource` trait: a blocking acquire/release frame pipeline that
//!   yields synchronized colour, depth, and infrared images
//! - The `Projector` trait and a pinhole implementation that maps depth
//!   pixels to camera-space vertices and colour-image UV coordinates
//! - A `SyntheticCamera` reference source for demos and tests
//!
//! ## Example
//!
//! ```ignore
//! use pointrig_capture::{FrameSource, StreamKind, SyntheticCamera};
//!
//! let mut camera = SyntheticCamera::new()?;
//! camera.enable_stream(StreamKind::Depth, 0, 0)?;
//! camera.start()?;
//! // acquire_frame / sample / release_frame ...
//! ```

mod image_types;
mod projection;
mod source;
mod synthetic;

pub use image_types::{ColorImage, DepthImage, IrImage};
pub use projection::{
    Intrinsics, PinholeProjector, ProjectionError, Projector, RigCalibration, INVALID_UV,
};
pub use source::{AcquireStatus, CaptureError, FrameSource, Sample, StreamKind};
pub use synthetic::SyntheticCamera;
