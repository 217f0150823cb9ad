//! Frame acquisition loop and retained-frame lifecycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pointrig_capture::{
    AcquireStatus, CaptureError, ColorImage, DepthImage, FrameSource, Projector, StreamKind,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::display::{DisplaySink, StreamImage, TraceDisplay, STREAM_COLOUR, STREAM_DEPTH, STREAM_IR};
use crate::export::{self, DEFAULT_EXPORT_PATH};

const COLOUR_WIDTH: u32 = 640;
const COLOUR_HEIGHT: u32 = 480;

/// Fatal pipeline errors. Per-iteration acquisition hiccups are absorbed by
/// the loop and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
}

/// Shared handle for cooperative loop control.
///
/// Clones share the same stop flag and save request, so a handle can be
/// moved to another thread or callback while the loop polls between
/// iterations. Neither request preempts an in-flight acquisition.
#[derive(Clone, Default)]
pub struct LoopControl {
    stop: Arc<AtomicBool>,
    save_request: Arc<Mutex<Option<PathBuf>>>,
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to exit; observed at the top of the next iteration.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Ask for one vertex-map export to `path` before the next acquisition.
    /// Serviced only by `run_until_stopped`.
    pub fn request_save(&self, path: impl Into<PathBuf>) {
        let mut request = self
            .save_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *request = Some(path.into());
    }

    fn take_save_request(&self) -> Option<PathBuf> {
        self.save_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Counters maintained across one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Acquisition attempts, successful or not.
    pub acquisitions: u64,
    /// Vertex-map export attempts, including skipped no-ops.
    pub export_attempts: u64,
    /// Points written across all successful exports.
    pub exported_points: u64,
}

/// Drives a frame source through its acquire/process/release cycle.
///
/// The controller owns the source for the duration of a run: it negotiates
/// streams, pulls frame sets one at a time, retains the most recent colour
/// and depth images, forwards enabled streams to the display sink, and
/// exports vertex maps on a schedule or on request. All processing happens
/// between a release and the next acquire; the source's frame lock is
/// released exactly once per acquisition attempt.
pub struct FrameLoop<S: FrameSource> {
    source: S,
    projector: Option<Box<dyn Projector>>,
    display: Box<dyn DisplaySink>,
    last_colour: Option<Arc<ColorImage>>,
    last_depth: Option<Arc<DepthImage>>,
    show_colour: bool,
    show_depth: bool,
    show_ir: bool,
    control: LoopControl,
    export_path: PathBuf,
    stats: LoopStats,
    initialised: bool,
}

impl<S: FrameSource> FrameLoop<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            projector: None,
            display: Box::new(TraceDisplay),
            last_colour: None,
            last_depth: None,
            show_colour: false,
            show_depth: false,
            show_ir: false,
            control: LoopControl::new(),
            export_path: PathBuf::from(DEFAULT_EXPORT_PATH),
            stats: LoopStats::default(),
            initialised: false,
        }
    }

    /// Replace the default tracing display sink.
    pub fn with_display(mut self, display: Box<dyn DisplaySink>) -> Self {
        self.display = display;
        self
    }

    /// Set the vertex-map output path used by periodic exports.
    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = path.into();
        self
    }

    pub fn set_show_ir(&mut self, show: bool) {
        self.show_ir = show;
    }

    pub fn set_show_colour(&mut self, show: bool) {
        self.show_colour = show;
    }

    pub fn set_show_depth(&mut self, show: bool) {
        self.show_depth = show;
    }

    /// Shared handle for stop and save requests.
    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    pub fn request_stop(&self) {
        self.control.request_stop();
    }

    /// Export the vertex map to `path` before the next acquisition in
    /// `run_until_stopped`. The counted run mode keeps its own schedule.
    pub fn request_save_next_frame(&self, path: impl Into<PathBuf>) {
        self.control.request_save(path);
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Negotiate streams and bind the projector. Must succeed before any
    /// frame acquisition; on failure the run aborts without entering the
    /// loop.
    pub fn initialize(&mut self) -> Result<(), PipelineError> {
        self.source
            .enable_stream(StreamKind::Color, COLOUR_WIDTH, COLOUR_HEIGHT)?;
        self.source.enable_stream(StreamKind::Depth, 0, 0)?;
        self.source.enable_stream(StreamKind::Infrared, 0, 0)?;
        self.source.start()?;
        self.source.reset_properties();
        self.projector = Some(self.source.projector()?);
        self.initialised = true;
        info!("Frame source initialised");
        Ok(())
    }

    /// Acquire and process exactly `frames` frames, attempting a vertex-map
    /// export before frame index `i` whenever `i % export_every == 0`
    /// (including frame 0). `export_every` of 0 disables periodic export.
    /// Export failures are non-fatal. Shuts the source down on completion.
    pub fn run_for_frames(&mut self, frames: u64, export_every: u64) -> Result<(), PipelineError> {
        self.ensure_initialised()?;
        for frame in 0..frames {
            if export_every > 0 && frame % export_every == 0 {
                self.save_vertex_map();
            }
            self.next_frame();
            debug!("Frame {}", frame);
        }
        self.shutdown();
        Ok(())
    }

    /// Loop until a stop request is observed. A pending save request is
    /// serviced (and cleared) before each acquisition. Shuts the source
    /// down once the loop exits.
    pub fn run_until_stopped(&mut self) -> Result<(), PipelineError> {
        self.ensure_initialised()?;
        while !self.control.stop_requested() {
            if let Some(path) = self.control.take_save_request() {
                self.export_path = path;
                self.save_vertex_map();
            }
            self.next_frame();
        }
        self.shutdown();
        Ok(())
    }

    /// Release the frame source. Safe to call more than once; does nothing
    /// before a successful `initialize`.
    pub fn shutdown(&mut self) {
        if self.initialised {
            self.source.close();
            self.initialised = false;
            info!("Frame source released");
        }
    }

    fn ensure_initialised(&mut self) -> Result<(), PipelineError> {
        if self.initialised {
            Ok(())
        } else {
            self.initialize()
        }
    }

    /// One acquire/dispatch/release cycle. The frame lock is released on
    /// every path, exactly once per acquisition attempt.
    fn next_frame(&mut self) {
        self.stats.acquisitions += 1;
        match self.source.acquire_frame() {
            Ok(AcquireStatus::Ready) => {
                if let Some(sample) = self.source.sample() {
                    if let Some(ir) = &sample.ir {
                        if self.show_ir {
                            self.display.show(STREAM_IR, StreamImage::Ir(ir.as_ref()));
                        }
                    }
                    if let Some(depth) = &sample.depth {
                        self.last_depth = Some(Arc::clone(depth));
                        if self.show_depth {
                            self.display
                                .show(STREAM_DEPTH, StreamImage::Depth(depth.as_ref()));
                        }
                    }
                    if let Some(colour) = &sample.color {
                        self.last_colour = Some(Arc::clone(colour));
                        if self.show_colour {
                            self.display
                                .show(STREAM_COLOUR, StreamImage::Color(colour.as_ref()));
                        }
                    }
                    self.display.refresh();
                }
            }
            Ok(status) => trace!("No frame this iteration: {:?}", status),
            Err(e) => warn!("Frame acquisition failed: {}", e),
        }
        self.source.release_frame();
    }

    /// Export the retained depth/colour pair. A missing frame makes this a
    /// no-op rather than an error: nothing is written and no file is
    /// created or truncated.
    fn save_vertex_map(&mut self) {
        self.stats.export_attempts += 1;
        let (Some(depth), Some(colour)) = (&self.last_depth, &self.last_colour) else {
            debug!("Vertex map skipped, no depth/colour frame retained yet");
            return;
        };
        let Some(projector) = &self.projector else {
            debug!("Vertex map skipped, projector not initialised");
            return;
        };
        let result = export::write_vertex_map(depth, colour, projector.as_ref(), &self.export_path);
        match result {
            Ok(points) => {
                self.stats.exported_points += points as u64;
                info!("Saved {} points to {}", points, self.export_path.display());
            }
            Err(e) => warn!("Vertex map export failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};
    use image::{Luma, Rgba};
    use pointrig_capture::{IrImage, ProjectionError, Sample};
    use std::path::{Path, PathBuf};

    struct StubProjector;

    impl Projector for StubProjector {
        fn vertices(&self, depth: &DepthImage) -> Result<Vec<Vec3>, ProjectionError> {
            let n = (depth.width() * depth.height()) as usize;
            Ok(vec![Vec3::new(1.0, 2.0, 3.0); n])
        }

        fn uv_map(&self, depth: &DepthImage) -> Result<Vec<Vec2>, ProjectionError> {
            let n = (depth.width() * depth.height()) as usize;
            Ok(vec![Vec2::new(0.25, 0.25); n])
        }
    }

    #[derive(Clone)]
    enum Step {
        Ready(Sample),
        NoFrame,
        Timeout,
        Fail,
    }

    struct MockSource {
        steps: Vec<Step>,
        cursor: usize,
        acquires: usize,
        releases: usize,
        closes: usize,
        enabled: Vec<(StreamKind, u32, u32)>,
        locked: Option<Sample>,
        control: Option<LoopControl>,
        stop_on_acquire: Option<usize>,
        save_on_acquire: Option<(usize, PathBuf)>,
    }

    impl MockSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                cursor: 0,
                acquires: 0,
                releases: 0,
                closes: 0,
                enabled: Vec::new(),
                locked: None,
                control: None,
                stop_on_acquire: None,
                save_on_acquire: None,
            }
        }
    }

    impl FrameSource for MockSource {
        fn enable_stream(
            &mut self,
            kind: StreamKind,
            width: u32,
            height: u32,
        ) -> Result<(), CaptureError> {
            self.enabled.push((kind, width, height));
            Ok(())
        }

        fn start(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn reset_properties(&mut self) {}

        fn projector(&self) -> Result<Box<dyn Projector>, CaptureError> {
            Ok(Box::new(StubProjector))
        }

        fn acquire_frame(&mut self) -> Result<AcquireStatus, CaptureError> {
            self.acquires += 1;
            if let Some(control) = &self.control {
                if self.stop_on_acquire == Some(self.acquires) {
                    control.request_stop();
                }
                if let Some((at, path)) = &self.save_on_acquire {
                    if *at == self.acquires {
                        control.request_save(path.clone());
                    }
                }
            }
            // Repeat the last scripted step once the script runs out.
            let index = self.cursor.min(self.steps.len().saturating_sub(1));
            self.cursor += 1;
            match self.steps.get(index).cloned() {
                Some(Step::Ready(sample)) => {
                    self.locked = Some(sample);
                    Ok(AcquireStatus::Ready)
                }
                Some(Step::NoFrame) | None => Ok(AcquireStatus::NoFrame),
                Some(Step::Timeout) => Ok(AcquireStatus::Timeout),
                Some(Step::Fail) => Err(CaptureError::AcquireFailed("scripted failure".into())),
            }
        }

        fn sample(&self) -> Option<Sample> {
            self.locked.clone()
        }

        fn release_frame(&mut self) {
            self.releases += 1;
            self.locked = None;
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn frame(colour: bool, depth: bool, ir: bool) -> Sample {
        Sample {
            color: colour
                .then(|| Arc::new(ColorImage::from_pixel(4, 4, Rgba([0x30, 0x20, 0x10, 0xFF])))),
            depth: depth.then(|| Arc::new(DepthImage::from_pixel(2, 2, Luma([700])))),
            ir: ir.then(|| Arc::new(IrImage::from_pixel(2, 2, Luma([42])))),
        }
    }

    fn temp_path(dir_name: &str, file_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(file_name)
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_file(path);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir(dir);
        }
    }

    #[test]
    fn test_initialize_negotiates_all_streams() {
        let mut pipeline = FrameLoop::new(MockSource::new(vec![Step::NoFrame]));
        pipeline.initialize().unwrap();
        assert_eq!(
            pipeline.source().enabled,
            vec![
                (StreamKind::Color, 640, 480),
                (StreamKind::Depth, 0, 0),
                (StreamKind::Infrared, 0, 0),
            ]
        );
        pipeline.shutdown();
    }

    #[test]
    fn test_run_for_frames_counts_cycles_and_export_attempts() {
        let path = temp_path("pointrig_loop_counts", "vertex.csv");
        let steps = vec![Step::Ready(frame(true, true, false)); 5];
        let mut pipeline = FrameLoop::new(MockSource::new(steps)).with_export_path(&path);
        pipeline.run_for_frames(5, 2).unwrap();

        // Export attempts before frames 0, 2, and 4; frame 0 is a no-op
        // because nothing is retained yet.
        assert_eq!(pipeline.source().acquires, 5);
        assert_eq!(pipeline.source().releases, 5);
        assert_eq!(pipeline.stats().export_attempts, 3);
        assert_eq!(pipeline.stats().acquisitions, 5);
        assert_eq!(pipeline.stats().exported_points, 8);
        assert!(path.exists());
        cleanup(&path);
    }

    #[test]
    fn test_export_without_retained_frames_writes_nothing() {
        let path = temp_path("pointrig_loop_no_frames", "vertex.csv");
        let mut pipeline =
            FrameLoop::new(MockSource::new(vec![Step::NoFrame])).with_export_path(&path);
        pipeline.run_for_frames(1, 1).unwrap();

        assert_eq!(pipeline.stats().export_attempts, 1);
        assert!(!path.exists());
        cleanup(&path);
    }

    #[test]
    fn test_stop_request_completes_current_iteration() {
        let mut source = MockSource::new(vec![Step::Ready(frame(true, true, true))]);
        source.stop_on_acquire = Some(3);
        let mut pipeline = FrameLoop::new(source);
        let control = pipeline.control();
        pipeline.source_mut().control = Some(control);

        pipeline.run_until_stopped().unwrap();

        // The stop lands during acquisition 3; its release still runs and
        // no further acquisition is issued.
        assert_eq!(pipeline.source().acquires, 3);
        assert_eq!(pipeline.source().releases, 3);
        assert_eq!(pipeline.source().closes, 1);
    }

    #[test]
    fn test_save_next_frame_exports_once_before_next_acquisition() {
        let path = temp_path("pointrig_loop_save_request", "out.csv");
        let mut source = MockSource::new(vec![Step::Ready(frame(true, true, false))]);
        source.save_on_acquire = Some((1, path.clone()));
        source.stop_on_acquire = Some(3);
        let mut pipeline = FrameLoop::new(source);
        let control = pipeline.control();
        pipeline.source_mut().control = Some(control.clone());

        pipeline.run_until_stopped().unwrap();

        assert_eq!(pipeline.stats().export_attempts, 1);
        assert!(path.exists());
        // The deferred flag was cleared after servicing.
        assert!(control.take_save_request().is_none());
        cleanup(&path);
    }

    #[test]
    fn test_release_runs_once_per_attempt_for_every_sample_shape() {
        let path = temp_path("pointrig_loop_release", "vertex.csv");
        let steps = vec![
            Step::Ready(frame(true, true, true)),
            Step::Ready(frame(true, false, false)),
            Step::Ready(frame(false, true, false)),
            Step::Ready(frame(false, false, false)),
            Step::NoFrame,
            Step::Timeout,
            Step::Fail,
        ];
        let mut pipeline = FrameLoop::new(MockSource::new(steps)).with_export_path(&path);
        pipeline.run_for_frames(7, 0).unwrap();

        assert_eq!(pipeline.source().acquires, 7);
        assert_eq!(pipeline.source().releases, 7);
        assert_eq!(pipeline.stats().export_attempts, 0);
        assert!(!path.exists());
        cleanup(&path);
    }

    #[test]
    fn test_retained_frames_survive_release_until_refreshed() {
        let path = temp_path("pointrig_loop_retained", "vertex.csv");
        let mut source = MockSource::new(vec![
            Step::Ready(frame(false, true, false)),
            Step::Ready(frame(true, false, false)),
        ]);
        source.save_on_acquire = Some((2, path.clone()));
        source.stop_on_acquire = Some(3);
        let mut pipeline = FrameLoop::new(source);
        let control = pipeline.control();
        pipeline.source_mut().control = Some(control);

        pipeline.run_until_stopped().unwrap();

        // Depth came from frame 1, colour from frame 2; the export between
        // release and the next acquire sees both.
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "X,Y,Z,R,G,B");
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "1,2,3,48,32,16");
        cleanup(&path);
    }

    #[derive(Clone, Default)]
    struct RecordingDisplay {
        shown: Arc<Mutex<Vec<String>>>,
        refreshes: Arc<Mutex<usize>>,
    }

    impl DisplaySink for RecordingDisplay {
        fn show(&mut self, name: &str, _image: StreamImage<'_>) {
            self.shown.lock().unwrap().push(name.to_string());
        }

        fn refresh(&mut self) {
            *self.refreshes.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_display_dispatch_follows_toggles() {
        let display = RecordingDisplay::default();
        let steps = vec![Step::Ready(frame(true, true, true))];
        let mut pipeline =
            FrameLoop::new(MockSource::new(steps.clone())).with_display(Box::new(display.clone()));
        pipeline.set_show_ir(true);
        pipeline.set_show_depth(true);
        pipeline.set_show_colour(true);
        pipeline.run_for_frames(1, 0).unwrap();

        assert_eq!(*display.shown.lock().unwrap(), vec!["IR", "Depth", "Colour"]);
        assert_eq!(*display.refreshes.lock().unwrap(), 1);

        let display = RecordingDisplay::default();
        let mut pipeline =
            FrameLoop::new(MockSource::new(steps)).with_display(Box::new(display.clone()));
        pipeline.set_show_depth(true);
        pipeline.run_for_frames(1, 0).unwrap();

        assert_eq!(*display.shown.lock().unwrap(), vec!["Depth"]);
        assert_eq!(*display.refreshes.lock().unwrap(), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut pipeline = FrameLoop::new(MockSource::new(vec![Step::NoFrame]));
        pipeline.run_for_frames(1, 0).unwrap();
        pipeline.shutdown();
        pipeline.shutdown();
        assert_eq!(pipeline.source().closes, 1);
    }
}
