//! Colorized vertex-map export.
//!
//! Converts a depth/colour frame pair into a row-oriented CSV point cloud:
//! one record per depth pixel that has measured depth and an in-range colour
//! correspondence.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use pointrig_capture::{ColorImage, DepthImage, ProjectionError, Projector};
use thiserror::Error;
use tracing::debug;

/// Header line of the exported CSV.
pub const VERTEX_MAP_HEADER: &str = "X,Y,Z,R,G,B";

/// Export path used when no save request overrides it.
pub const DEFAULT_EXPORT_PATH: &str = "RealVertex.csv";

/// Errors from a vertex-map export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Projection failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write the colorized vertex map for one depth/colour frame pair.
///
/// The output file is opened in overwrite mode, written, and closed within
/// this call. Records are emitted in depth-image row-major order; pixels
/// with zero depth or an out-of-range UV are skipped. Returns the number of
/// records written.
pub fn write_vertex_map(
    depth: &DepthImage,
    color: &ColorImage,
    projector: &dyn Projector,
    path: &Path,
) -> Result<usize, ExportError> {
    let (width, height) = depth.dimensions();
    let num_points = (width * height) as usize;

    let vertices = projector.vertices(depth)?;
    let uv_map = projector.uv_map(depth)?;
    debug_assert_eq!(vertices.len(), num_points);
    debug_assert_eq!(uv_map.len(), num_points);

    let (color_width, color_height) = color.dimensions();
    let pixels = color.as_raw();

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", VERTEX_MAP_HEADER)?;

    let mut written = 0usize;
    for p in 0..num_points {
        let vertex = vertices[p];
        if vertex.z == 0.0 {
            continue;
        }
        let uv = uv_map[p];
        if uv.x < 0.0 || uv.x >= 1.0 || uv.y < 0.0 || uv.y >= 1.0 {
            continue;
        }

        let color_x = (uv.x * color_width as f32) as u32;
        let color_y = (uv.y * color_height as f32) as u32;
        let offset = ((color_y * color_width + color_x) * 4) as usize;
        let mut packed = u32::from_le_bytes([
            pixels[offset],
            pixels[offset + 1],
            pixels[offset + 2],
            pixels[offset + 3],
        ]);

        write!(out, "{},{},{}", vertex.x, vertex.y, vertex.z)?;
        // Three 8-bit channels, least-significant byte first; the fourth
        // (padding) byte is discarded.
        for _ in 0..3 {
            write!(out, ",{}", packed & 0xFF)?;
            packed >>= 8;
        }
        writeln!(out)?;
        written += 1;
    }

    out.flush()?;
    debug!("Wrote {} points to {}", written, path.display());
    Ok(written)
}
