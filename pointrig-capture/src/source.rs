//! Frame source types and the acquisition trait.

use std::sync::Arc;

use thiserror::Error;

use crate::image_types::{ColorImage, DepthImage, IrImage};
use crate::projection::Projector;

/// Errors that can occur while configuring or driving a frame source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to create device: {0}")]
    DeviceCreation(String),

    #[error("Stream configuration rejected: {0}")]
    StreamConfiguration(String),

    #[error("Failed to acquire frame: {0}")]
    AcquireFailed(String),

    #[error("Projection unavailable: {0}")]
    ProjectionUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The streams a frame source can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Color,
    Depth,
    Infrared,
}

/// Outcome of one blocking acquisition attempt.
///
/// Only `Ready` means a new frame set is locked; the other statuses are
/// recoverable and must not abort the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// A new synchronized frame set is locked and available via `sample`.
    Ready,
    /// No new frame has arrived yet.
    NoFrame,
    /// The wait expired before a frame arrived.
    Timeout,
}

/// A synchronized frame set captured for one time instant.
///
/// Streams that were absent from this capture are `None`. The image handles
/// are owned snapshots: they stay valid after `release_frame`, so retained
/// frames can be read between a release and the next acquisition.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub color: Option<Arc<ColorImage>>,
    pub depth: Option<Arc<DepthImage>>,
    pub ir: Option<Arc<IrImage>>,
}

/// A blocking acquire/release frame pipeline.
///
/// Device creation itself belongs to the concrete implementation's
/// constructor, which reports `CaptureError::DeviceCreation` when the
/// underlying device cannot be allocated.
///
/// The frame lock obtained by a `Ready` acquisition is a scoped resource:
/// callers must invoke `release_frame` exactly once per acquisition attempt,
/// on every path, before the next `acquire_frame`. A source that is never
/// released will starve.
pub trait FrameSource {
    /// Request a stream at the given resolution. Width and height of 0 ask
    /// for the source's preferred resolution for that stream.
    fn enable_stream(
        &mut self,
        kind: StreamKind,
        width: u32,
        height: u32,
    ) -> Result<(), CaptureError>;

    /// Finish stream negotiation and begin capturing.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Reset device tunables to their defaults. Best-effort.
    fn reset_properties(&mut self);

    /// Construct a projector bound to the active stream configuration.
    fn projector(&self) -> Result<Box<dyn Projector>, CaptureError>;

    /// Block until a new synchronized frame set is available or a
    /// no-frame/timeout status occurs. Locks the frame set on `Ready`.
    fn acquire_frame(&mut self) -> Result<AcquireStatus, CaptureError>;

    /// The currently locked frame set, or `None` when no frame is locked.
    fn sample(&self) -> Option<Sample>;

    /// Unlock the current frame set so the source can produce the next one.
    fn release_frame(&mut self);

    /// Release the source instance.
    fn close(&mut self);
}
