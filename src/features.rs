use image::{DynamicImage, RgbaImage};

use crate::error::{Error, Result};
use crate::tree::PixelTest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl GrayImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if data.len() != width as usize * height as usize {
            return Err(Error::Input(format!(
                "buffer of {} bytes does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            data,
            width,
            height,
        }
    }

    /// Convert an RGBA image with the BT.601 luma weights.
    ///
    /// Color channels are premultiplied by alpha first, so transparent
    /// regions read as black.
    pub fn from_rgba(src: &RgbaImage) -> Self {
        let data = src
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0.map(u32::from);
                ((299 * r + 587 * g + 114 * b) * a / (1000 * 255)) as u8
            })
            .collect();

        Self {
            data,
            width: src.width(),
            height: src.height(),
        }
    }

    /// Convert any decoded image.
    pub fn from_image(src: &DynamicImage) -> Self {
        Self::from_rgba(&src.to_rgba8())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at `(row, col)`, clamped to the image border.
    #[inline]
    pub fn get_clamped(&self, row: i64, col: i64) -> u8 {
        let row = row.clamp(0, self.height as i64 - 1) as usize;
        let col = col.clamp(0, self.width as i64 - 1) as usize;
        self.data[row * self.width as usize + col]
    }
}

/// `256 * cos` of `k / 32` of a turn, truncated toward zero.
const QCOS_TABLE: [i64; 33] = [
    256, 251, 236, 212, 181, 142, 97, 49, 0, -49, -97, -142, -181, -212, -236, -251, -256, -251,
    -236, -212, -181, -142, -97, -49, 0, 49, 97, 142, 181, 212, 236, 251, 256,
];

/// `256 * sin` of `k / 32` of a turn, truncated toward zero.
const QSIN_TABLE: [i64; 33] = [
    0, 49, 97, 142, 181, 212, 236, 251, 256, 251, 236, 212, 181, 142, 97, 49, 0, -49, -97, -142,
    -181, -212, -236, -251, -256, -251, -236, -212, -181, -142, -97, -49, 0,
];

/// In-plane rotation of the sampling pattern.
///
/// `angle` is a fraction of a full turn, truncated to a multiple of 1/32
/// and looked up in the same cos/sin tables the `facefinder` model was
/// published with. Angles 0 and 1 both map to `(256, 0)`, which makes
/// rotated sampling identical to axis-aligned sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    qcos: i64,
    qsin: i64,
}

impl Rotation {
    pub fn new(angle: f64) -> Self {
        let idx = ((32.0 * angle) as usize).min(QCOS_TABLE.len() - 1);
        Self {
            qcos: QCOS_TABLE[idx],
            qsin: QSIN_TABLE[idx],
        }
    }

    pub const fn identity() -> Self {
        Self { qcos: 256, qsin: 0 }
    }

    /// Scale the rotation to a window size; offsets then map to 16.16 fixed point.
    pub fn at_scale(&self, size: u32) -> WindowTransform {
        let size = size as i64;
        WindowTransform {
            qcos: self.qcos * size,
            qsin: self.qsin * size,
        }
    }
}

/// Maps pixel-test offsets to image coordinates for one window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTransform {
    qcos: i64,
    qsin: i64,
}

impl WindowTransform {
    /// Image `(row, col)` of offset `(dx, dy)` from the window centered on
    /// `(row, col)`, before clamping.
    #[inline]
    pub fn sample_point(&self, row: u32, col: u32, dx: i8, dy: i8) -> (i64, i64) {
        let (dx, dy) = (dx as i64, dy as i64);
        let r = (65536 * row as i64 + self.qcos * dy - self.qsin * dx) >> 16;
        let c = (65536 * col as i64 + self.qsin * dy + self.qcos * dx) >> 16;
        (r, c)
    }
}

/// Compute the pixel intensity difference of a test for the window at `(row, col)`.
#[inline]
pub fn compute_feature_value(
    test: &PixelTest,
    image: &GrayImage,
    row: u32,
    col: u32,
    transform: &WindowTransform,
) -> f32 {
    let (r1, c1) = transform.sample_point(row, col, test.dx1, test.dy1);
    let (r2, c2) = transform.sample_point(row, col, test.dx2, test.dy2);

    image.get_clamped(r1, c1) as f32 - image.get_clamped(r2, c2) as f32
}

/// Creates a feature extractor closure for use with tree prediction.
pub fn make_feature_extractor<'a>(
    image: &'a GrayImage,
    row: u32,
    col: u32,
    transform: &'a WindowTransform,
) -> impl Fn(&PixelTest) -> f32 + 'a {
    move |test: &PixelTest| compute_feature_value(test, image, row, col, transform)
}
