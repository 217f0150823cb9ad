//! Image buffer types shared across the capture pipeline.
//!
//! Colour frames are packed RGBA (4 bytes per pixel, byte order R, G, B, A
//! from the lowest address); depth and infrared frames are single-channel
//! 16-bit. Depth values are raw device units, with 0 marking an unmeasured
//! pixel.

use image::{ImageBuffer, Luma, RgbaImage};

/// Packed 4-byte-per-pixel colour frame.
pub type ColorImage = RgbaImage;

/// Single-channel 16-bit depth frame, 0 = invalid/unmeasured.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Single-channel 16-bit infrared frame.
pub type IrImage = ImageBuffer<Luma<u16>, Vec<u16>>;
