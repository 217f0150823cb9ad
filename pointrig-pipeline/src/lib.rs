//! Pointrig Pipeline - Frame loop and vertex-map export
//!
//! The pipeline crate owns the end-to-end frame lifecycle: it drives a
//! `FrameSource` through its acquire/process/release cycle, retains the most
//! recent colour and depth frames, forwards enabled streams to a display
//! sink, and exports colorized vertex maps on a schedule or on request.

mod controller;
mod display;
mod export;

pub use controller::{FrameLoop, LoopControl, LoopStats, PipelineError};
pub use display::{DisplaySink, StreamImage, TraceDisplay, STREAM_COLOUR, STREAM_DEPTH, STREAM_IR};
pub use export::{write_vertex_map, ExportError, DEFAULT_EXPORT_PATH, VERTEX_MAP_HEADER};
