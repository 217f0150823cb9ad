//! Display sink seam for on-screen stream rendering.

use pointrig_capture::{ColorImage, DepthImage, IrImage};
use tracing::debug;

/// Fixed display name for the infrared stream.
pub const STREAM_IR: &str = "IR";
/// Fixed display name for the depth stream.
pub const STREAM_DEPTH: &str = "Depth";
/// Fixed display name for the colour stream.
pub const STREAM_COLOUR: &str = "Colour";

/// Borrowed view of one stream's image, dispatched to a display sink.
pub enum StreamImage<'a> {
    Color(&'a ColorImage),
    Depth(&'a DepthImage),
    Ir(&'a IrImage),
}

impl StreamImage<'_> {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            StreamImage::Color(image) => image.dimensions(),
            StreamImage::Depth(image) => image.dimensions(),
            StreamImage::Ir(image) => image.dimensions(),
        }
    }
}

/// Renders named image streams to screen.
///
/// Dispatch is side-effect only; the frame loop never consumes a return
/// value. After all of a frame's images are dispatched the loop yields one
/// `refresh` tick so the sink can update.
pub trait DisplaySink {
    fn show(&mut self, name: &str, image: StreamImage<'_>);

    fn refresh(&mut self);
}

/// Sink that logs dispatches instead of rendering. Stands in for a real
/// display backend in headless runs.
#[derive(Debug, Default)]
pub struct TraceDisplay;

impl DisplaySink for TraceDisplay {
    fn show(&mut self, name: &str, image: StreamImage<'_>) {
        let (width, height) = image.dimensions();
        debug!("Showing {} frame {}x{}", name, width, height);
    }

    fn refresh(&mut self) {}
}
