//! Drawing overlay images onto detected faces.
//!
//! The canvas is always an explicit value: [`Compositor::draw`] borrows it
//! mutably and [`Compositor::composite`] creates one from the original image
//! and hands it back inside a [`Composite`]. Nothing is kept between calls,
//! so one compositor can serve concurrent invocations.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Detection;

/// Overlay side relative to the detection window.
pub const DEFAULT_SCALE_UP: f32 = 1.2;

/// Read-only set of overlay images, one of which is drawn on each face.
#[derive(Debug, Clone)]
pub struct OverlayPool {
    assets: Vec<RgbaImage>,
}

impl OverlayPool {
    pub fn new(assets: Vec<RgbaImage>) -> Result<Self> {
        if assets.is_empty() {
            return Err(Error::Config("overlay pool is empty".into()));
        }
        if let Some(idx) = assets
            .iter()
            .position(|a| a.width() == 0 || a.height() == 0)
        {
            return Err(Error::Config(format!("overlay asset {} has no pixels", idx)));
        }
        Ok(Self { assets })
    }

    /// Load `<prefix>1.png`, `<prefix>2.png`, ... from `dir`, stopping at the
    /// first missing index. Files that fail to decode, or decode to an empty
    /// image, are skipped with a warning.
    pub fn load_numbered<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let mut assets = Vec::new();

        for index in 1.. {
            let path = dir.join(format!("{}{}.png", prefix, index));
            if !path.exists() {
                break;
            }
            let asset = match image::open(&path) {
                Ok(img) => img.to_rgba8(),
                Err(e) => {
                    tracing::warn!("Skipping overlay {:?}: {}", path, e);
                    continue;
                }
            };
            if asset.width() == 0 || asset.height() == 0 {
                tracing::warn!("Skipping empty overlay {:?}", path);
                continue;
            }
            tracing::debug!(
                "Loaded overlay {:?} ({}x{})",
                path,
                asset.width(),
                asset.height()
            );
            assets.push(asset);
        }

        if assets.is_empty() {
            return Err(Error::Config(format!(
                "no overlay found at {:?}",
                dir.join(format!("{}1.png", prefix))
            )));
        }

        Self::new(assets)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn assets(&self) -> &[RgbaImage] {
        &self.assets
    }

    /// Pick an asset uniformly at random.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &RgbaImage {
        &self.assets[rng.gen_range(0..self.assets.len())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeParams {
    /// Faces must score strictly above this to receive an overlay.
    pub confidence_threshold: f32,
    /// Largest overlay dimension as a multiple of the detection scale.
    pub scale_up: f32,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 1.0,
            scale_up: DEFAULT_SCALE_UP,
        }
    }
}

impl CompositeParams {
    pub fn validate(&self) -> Result<()> {
        if self.confidence_threshold.is_nan() {
            return Err(Error::Config("confidence threshold is NaN".into()));
        }
        if !(self.scale_up > 0.0 && self.scale_up.is_finite()) {
            return Err(Error::Config(format!(
                "overlay scale-up must be positive, got {}",
                self.scale_up
            )));
        }
        Ok(())
    }
}

/// Resize `asset` so its largest dimension is `target`, keeping its aspect ratio.
pub fn resize_overlay(asset: &RgbaImage, target: u32) -> RgbaImage {
    let (width, height) = asset.dimensions();
    let largest = width.max(height);
    if target == largest {
        return asset.clone();
    }

    let ratio = target as f64 / largest as f64;
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);

    imageops::resize(asset, new_width, new_height, FilterType::Lanczos3)
}

/// The finished canvas, the faces it was drawn for and how many received an overlay.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbaImage,
    pub faces: Vec<Detection>,
    pub drawn: usize,
}

pub struct Compositor<'a> {
    pool: &'a OverlayPool,
    params: CompositeParams,
}

impl<'a> Compositor<'a> {
    pub fn new(pool: &'a OverlayPool, params: CompositeParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { pool, params })
    }

    /// Overlay side in pixels for a detection window of `scale`.
    pub fn overlay_size(&self, scale: u32) -> u32 {
        ((scale as f32 * self.params.scale_up).round() as u32).max(1)
    }

    /// Draw an overlay centered on every cluster above the threshold.
    ///
    /// Returns the number drawn. Fails with [`Error::NoDetections`] for an
    /// empty cluster list and [`Error::NoOverlaysDrawn`] when no cluster
    /// clears the threshold; the canvas is untouched in both cases.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        canvas: &mut RgbaImage,
        clusters: &[Detection],
        rng: &mut R,
    ) -> Result<usize> {
        if clusters.is_empty() {
            return Err(Error::NoDetections);
        }

        let mut drawn = 0;
        for face in clusters {
            tracing::debug!(
                "Face at ({}, {}) size {} confidence {:.3}",
                face.col,
                face.row,
                face.scale,
                face.confidence
            );
            if face.confidence <= self.params.confidence_threshold {
                continue;
            }

            let overlay = resize_overlay(self.pool.choose(rng), self.overlay_size(face.scale));
            let x = face.col as i64 - overlay.width() as i64 / 2;
            let y = face.row as i64 - overlay.height() as i64 / 2;
            imageops::overlay(canvas, &overlay, x, y);
            drawn += 1;
        }

        if drawn == 0 {
            return Err(Error::NoOverlaysDrawn {
                detections: clusters.len(),
            });
        }

        tracing::debug!("Drew {} of {} overlays", drawn, clusters.len());
        Ok(drawn)
    }

    /// Copy `original` into a fresh canvas and draw on it.
    pub fn composite<R: Rng + ?Sized>(
        &self,
        original: &RgbaImage,
        clusters: &[Detection],
        rng: &mut R,
    ) -> Result<Composite> {
        let mut image = original.clone();
        let drawn = self.draw(&mut image, clusters, rng)?;
        Ok(Composite {
            image,
            faces: clusters.to_vec(),
            drawn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn solid(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(width, height, color)
    }

    fn exact_params() -> CompositeParams {
        CompositeParams {
            confidence_threshold: 1.0,
            scale_up: 1.0,
        }
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(OverlayPool::new(vec![]), Err(Error::Config(_))));
        assert!(matches!(
            OverlayPool::new(vec![RgbaImage::new(0, 4)]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn resize_keeps_aspect_ratio() {
        for (w, h, target) in [(60, 30, 40), (33, 50, 20), (120, 119, 37), (8, 64, 200)] {
            let resized = resize_overlay(&solid(w, h, RED), target);
            assert_eq!(resized.width().max(resized.height()), target);

            let expected = w as f64 / h as f64;
            let actual = resized.width() as f64 / resized.height() as f64;
            // One pixel of rounding on the short side
            let short = resized.width().min(resized.height()) as f64;
            assert!(
                (expected - actual).abs() <= expected.max(actual) / short,
                "{}x{} -> {}x{}",
                w,
                h,
                resized.width(),
                resized.height()
            );
        }
    }

    #[test]
    fn overlay_size_uses_scale_up() {
        let pool = OverlayPool::new(vec![solid(10, 10, RED)]).unwrap();
        let compositor = Compositor::new(&pool, CompositeParams::default()).unwrap();
        assert_eq!(compositor.overlay_size(50), 60);
        assert_eq!(compositor.overlay_size(21), 25);
    }

    #[test]
    fn no_clusters_is_no_detections_and_canvas_is_untouched() {
        let pool = OverlayPool::new(vec![solid(10, 10, RED)]).unwrap();
        let compositor = Compositor::new(&pool, exact_params()).unwrap();
        let mut canvas = solid(50, 50, BLACK);
        let mut rng = StdRng::seed_from_u64(1);

        let result = compositor.draw(&mut canvas, &[], &mut rng);
        assert!(matches!(result, Err(Error::NoDetections)));
        assert_eq!(canvas, solid(50, 50, BLACK));
    }

    #[test]
    fn clusters_below_threshold_draw_nothing() {
        let pool = OverlayPool::new(vec![solid(10, 10, RED)]).unwrap();
        let compositor = Compositor::new(&pool, exact_params()).unwrap();
        let mut canvas = solid(50, 50, BLACK);
        let mut rng = StdRng::seed_from_u64(1);

        let clusters = [Detection::new(25, 25, 10, 0.5), Detection::new(10, 10, 10, 1.0)];
        let result = compositor.draw(&mut canvas, &clusters, &mut rng);
        assert!(matches!(
            result,
            Err(Error::NoOverlaysDrawn { detections: 2 })
        ));
        assert_eq!(canvas, solid(50, 50, BLACK));
    }

    #[test]
    fn overlay_is_centered_on_detection() {
        let pool = OverlayPool::new(vec![solid(10, 10, RED)]).unwrap();
        let compositor = Compositor::new(&pool, exact_params()).unwrap();
        let original = solid(100, 100, BLACK);
        let mut rng = StdRng::seed_from_u64(7);

        let clusters = [Detection::new(40, 60, 10, 3.0)];
        let composite = compositor.composite(&original, &clusters, &mut rng).unwrap();

        assert_eq!(composite.drawn, 1);
        assert_eq!(composite.image.dimensions(), (100, 100));
        // Columns 55..65, rows 35..45
        assert_eq!(*composite.image.get_pixel(55, 35), RED);
        assert_eq!(*composite.image.get_pixel(64, 44), RED);
        assert_eq!(*composite.image.get_pixel(54, 40), BLACK);
        assert_eq!(*composite.image.get_pixel(65, 40), BLACK);
        assert_eq!(*composite.image.get_pixel(60, 34), BLACK);
        // The original is left alone
        assert_eq!(original, solid(100, 100, BLACK));
    }

    #[test]
    fn only_confident_clusters_are_counted() {
        let pool = OverlayPool::new(vec![solid(4, 4, RED)]).unwrap();
        let compositor = Compositor::new(&pool, exact_params()).unwrap();
        let mut canvas = solid(60, 60, BLACK);
        let mut rng = StdRng::seed_from_u64(3);

        let clusters = [
            Detection::new(10, 10, 4, 2.0),
            Detection::new(30, 30, 4, 0.2),
            Detection::new(50, 50, 4, 1.5),
        ];
        assert_eq!(compositor.draw(&mut canvas, &clusters, &mut rng).unwrap(), 2);
        assert_eq!(*canvas.get_pixel(30, 30), BLACK);
        assert_eq!(*canvas.get_pixel(10, 10), RED);
        assert_eq!(*canvas.get_pixel(50, 50), RED);
    }

    #[test]
    fn transparent_pixels_keep_the_background() {
        let mut asset = solid(10, 10, Rgba([255, 0, 0, 0]));
        asset.put_pixel(5, 5, RED);
        let pool = OverlayPool::new(vec![asset]).unwrap();
        let compositor = Compositor::new(&pool, exact_params()).unwrap();
        let mut canvas = solid(20, 20, BLUE);
        let mut rng = StdRng::seed_from_u64(0);

        compositor
            .draw(&mut canvas, &[Detection::new(10, 10, 10, 5.0)], &mut rng)
            .unwrap();

        assert_eq!(*canvas.get_pixel(10, 10), RED);
        assert_eq!(*canvas.get_pixel(6, 6), BLUE);
        assert_eq!(*canvas.get_pixel(14, 14), BLUE);
    }

    #[test]
    fn overlays_are_clipped_at_the_border() {
        let pool = OverlayPool::new(vec![solid(20, 20, RED)]).unwrap();
        let compositor = Compositor::new(&pool, exact_params()).unwrap();
        let mut canvas = solid(30, 30, BLACK);
        let mut rng = StdRng::seed_from_u64(0);

        let clusters = [Detection::new(2, 28, 20, 2.0)];
        assert_eq!(compositor.draw(&mut canvas, &clusters, &mut rng).unwrap(), 1);
        assert_eq!(canvas.dimensions(), (30, 30));
        assert_eq!(*canvas.get_pixel(29, 0), RED);
        assert_eq!(*canvas.get_pixel(17, 0), BLACK);
    }

    #[test]
    fn seeded_selection_is_reproducible() {
        let pool = OverlayPool::new(vec![
            solid(6, 6, RED),
            solid(6, 6, BLUE),
            solid(6, 6, Rgba([0, 255, 0, 255])),
        ])
        .unwrap();
        let compositor = Compositor::new(&pool, exact_params()).unwrap();
        let clusters: Vec<Detection> = (0..8)
            .map(|i| Detection::new(5, 5 + 10 * i, 6, 2.0))
            .collect();
        let original = solid(90, 10, BLACK);

        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            compositor.composite(&original, &clusters, &mut rng).unwrap().image
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn load_numbered_pool() {
        let dir = tempfile::tempdir().unwrap();
        for index in 1..=3 {
            solid(8, 4 * index, RED)
                .save(dir.path().join(format!("pepe_opacity{}.png", index)))
                .unwrap();
        }
        // A gap ends the pool
        solid(8, 8, RED)
            .save(dir.path().join("pepe_opacity5.png"))
            .unwrap();

        let pool = OverlayPool::load_numbered(dir.path(), "pepe_opacity").unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.assets()[2].dimensions(), (8, 12));

        assert!(matches!(
            OverlayPool::load_numbered(dir.path(), "missing"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn undecodable_overlay_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meme1.png"), b"not a png").unwrap();
        solid(6, 6, BLUE).save(dir.path().join("meme2.png")).unwrap();

        let pool = OverlayPool::load_numbered(dir.path(), "meme").unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.assets()[0].get_pixel(0, 0), &BLUE);

        std::fs::write(dir.path().join("bad1.png"), b"").unwrap();
        assert!(matches!(
            OverlayPool::load_numbered(dir.path(), "bad"),
            Err(Error::Config(_))
        ));
    }
}
