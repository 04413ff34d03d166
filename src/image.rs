//! Owned image buffers and the orientation transform applied to them.

use crate::traits::{CameraError, Result};

/// Mirror/rotation applied to every converted frame.
///
/// The four variants are the closed set reachable by composing the two flips;
/// flipping both axes is the same transform as rotating 180 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Leave frames as delivered.
    #[default]
    None,
    /// Mirror around the vertical axis.
    FlipHorizontal,
    /// Mirror around the horizontal axis.
    FlipVertical,
    /// Rotate by 180 degrees (both flips combined).
    Rotate180,
}

impl Orientation {
    /// The transform produced by composing the requested flips.
    #[must_use]
    pub const fn from_flips(horizontal: bool, vertical: bool) -> Self {
        match (horizontal, vertical) {
            (false, false) => Self::None,
            (true, false) => Self::FlipHorizontal,
            (false, true) => Self::FlipVertical,
            (true, true) => Self::Rotate180,
        }
    }

    /// Decompose into (horizontal, vertical) flips.
    #[must_use]
    pub const fn flips(self) -> (bool, bool) {
        match self {
            Self::None => (false, false),
            Self::FlipHorizontal => (true, false),
            Self::FlipVertical => (false, true),
            Self::Rotate180 => (true, true),
        }
    }

    /// Quarter turns in the canonical rotation+mirror decomposition.
    ///
    /// A vertical flip is a 180 degree rotation followed by a horizontal
    /// mirror, so it contributes two quarter turns.
    #[must_use]
    pub const fn quarter_turns(self) -> u32 {
        match self {
            Self::None | Self::FlipHorizontal => 0,
            Self::FlipVertical | Self::Rotate180 => 2,
        }
    }

    /// Whether applying this transform exchanges width and height.
    ///
    /// Configured dimensions must be swapped whenever a transform change
    /// flips this answer.
    #[must_use]
    pub const fn swaps_dimensions(self) -> bool {
        self.quarter_turns() % 2 == 1
    }

    pub(crate) const fn to_bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::FlipHorizontal => 1,
            Self::FlipVertical => 2,
            Self::Rotate180 => 3,
        }
    }

    pub(crate) const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::FlipHorizontal,
            2 => Self::FlipVertical,
            3 => Self::Rotate180,
            _ => Self::None,
        }
    }
}

/// An owned row-major pixel image.
///
/// Frames are produced at 24 bits per pixel (RGB); the buffer also tolerates
/// 32-bit layouts where the fourth channel is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    data: Vec<u8>,
}

impl ImageBuffer {
    /// Allocate a zero-filled image.
    ///
    /// Fails on zero dimensions, a depth that is not a whole number of
    /// bytes, or a byte size that overflows.
    pub fn new(width: u32, height: u32, bits_per_pixel: u32) -> Result<Self> {
        let size = byte_size(width, height, bits_per_pixel)?;
        Ok(Self {
            width,
            height,
            bits_per_pixel,
            data: vec![0; size],
        })
    }

    /// Wrap an existing row-major buffer.
    ///
    /// Fails on degenerate geometry or when the buffer length does not
    /// match the dimensions.
    pub fn from_raw(width: u32, height: u32, bits_per_pixel: u32, data: Vec<u8>) -> Result<Self> {
        let expected = byte_size(width, height, bits_per_pixel)?;
        if data.len() != expected {
            return Err(CameraError::StreamError(format!(
                "buffer of {} bytes does not match {width}x{height} at {bits_per_pixel} bpp",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bits_per_pixel,
            data,
        })
    }

    /// Frame width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Bits per pixel.
    #[must_use]
    pub const fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    /// Raw pixel data, row-major.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    const fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel / 8) as usize
    }

    /// Byte length of one row.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    /// RGB values of the pixel at (`x`, `y`), or `None` when out of bounds
    /// or the layout carries fewer than three channels.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height || self.bytes_per_pixel() < 3 {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel();
        let r = *self.data.get(offset)?;
        let g = *self.data.get(offset + 1)?;
        let b = *self.data.get(offset + 2)?;
        Some((r, g, b))
    }

    /// Mirror the image around its vertical axis, in place.
    pub fn flip_horizontal(&mut self) {
        let bpp = self.bytes_per_pixel();
        let width = self.width as usize;
        for row in self.data.chunks_exact_mut(width * bpp) {
            for x in 0..width / 2 {
                let left = x * bpp;
                let right = (width - 1 - x) * bpp;
                for byte in 0..bpp {
                    row.swap(left + byte, right + byte);
                }
            }
        }
    }

    /// Mirror the image around its horizontal axis, in place.
    pub fn flip_vertical(&mut self) {
        let stride = self.stride();
        let height = self.height as usize;
        for y in 0..height / 2 {
            let (upper, lower) = self.data.split_at_mut((height - 1 - y) * stride);
            upper[y * stride..(y + 1) * stride].swap_with_slice(&mut lower[..stride]);
        }
    }

    /// Rotate the image by 180 degrees, in place.
    pub fn rotate_180(&mut self) {
        let bpp = self.bytes_per_pixel();
        let rotated: Vec<u8> = self
            .data
            .chunks_exact(bpp)
            .rev()
            .flatten()
            .copied()
            .collect();
        if rotated.len() == self.data.len() {
            self.data = rotated;
        }
    }

    /// Apply the given orientation transform, in place.
    pub fn apply_orientation(&mut self, orientation: Orientation) {
        match orientation {
            Orientation::None => {}
            Orientation::FlipHorizontal => self.flip_horizontal(),
            Orientation::FlipVertical => self.flip_vertical(),
            Orientation::Rotate180 => self.rotate_180(),
        }
    }
}

/// Byte length of a row-major image, rejecting degenerate geometry.
///
/// Every pixel must occupy a whole number of bytes; the flips and rotations
/// walk the buffer in pixel-sized chunks and rely on that.
fn byte_size(width: u32, height: u32, bits_per_pixel: u32) -> Result<usize> {
    if width == 0 || height == 0 || bits_per_pixel == 0 || bits_per_pixel % 8 != 0 {
        return Err(CameraError::StreamError(format!(
            "unsupported geometry {width}x{height} at {bits_per_pixel} bpp"
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul((bits_per_pixel / 8) as usize))
        .ok_or_else(|| {
            CameraError::StreamError(format!(
                "{width}x{height} at {bits_per_pixel} bpp overflows"
            ))
        })
}

/// Convert a packed YUYV buffer into RGB24, `pixel_count` pixels.
///
/// Short input is padded with black so the output length is always
/// `pixel_count * 3`.
pub(crate) fn yuyv_to_rgb24(yuyv: &[u8], pixel_count: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixel_count * 3);

    for chunk in yuyv.chunks_exact(4).take(pixel_count.div_ceil(2)) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        let (r, g, b) = yuv_to_rgb(y0, u, v);
        rgb.extend_from_slice(&[r, g, b]);
        let (r, g, b) = yuv_to_rgb(y1, u, v);
        rgb.extend_from_slice(&[r, g, b]);
    }

    rgb.resize(pixel_count * 3, 0);
    rgb
}

/// Convert YUV values to RGB using the ITU-R BT.601 formula.
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        if val < 0.0 {
            0
        } else if val > 255.0 {
            255
        } else {
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            {
                val as u8
            }
        }
    };

    (clamp(r), clamp(g), clamp(b))
}
