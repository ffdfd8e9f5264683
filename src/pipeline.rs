use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cluster::{cluster_detections, ClusterParams};
use crate::detector::{run_cascade, ScanParams};
use crate::error::{Error, Result};
use crate::features::GrayImage;
use crate::model::CascadeForest;
use crate::overlay::{Composite, CompositeParams, Compositor, OverlayPool};
use crate::types::Detection;

/// Every tunable of a run, flattened into one set of keys.
///
/// ```json
/// { "min_size": 40, "scale_factor": 1.2, "iou_threshold": 0.0 }
/// ```
///
/// Missing keys keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(flatten)]
    pub scan: ScanParams,
    #[serde(flatten)]
    pub cluster: ClusterParams,
    #[serde(flatten)]
    pub composite: CompositeParams,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.scan.validate()?;
        self.cluster.validate()?;
        self.composite.validate()
    }

    /// Read a JSON config file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }
}

/// Face detection and overlay for one image at a time.
///
/// The forest and overlay pool are shared read-only, so a `Pipeline` can be
/// cloned cheaply or used from several threads at once.
#[derive(Debug, Clone)]
pub struct Pipeline {
    forest: Arc<CascadeForest>,
    overlays: Arc<OverlayPool>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        forest: Arc<CascadeForest>,
        overlays: Arc<OverlayPool>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            forest,
            overlays,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn forest(&self) -> &CascadeForest {
        &self.forest
    }

    /// Scan a grayscale image and merge the raw hits into faces.
    pub fn detect_gray(&self, gray: &GrayImage) -> Result<Vec<Detection>> {
        let raw = run_cascade(&self.forest, gray, &self.config.scan)?;
        cluster_detections(&raw, &self.config.cluster)
    }

    /// Detect faces in a decoded image.
    pub fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        self.detect_gray(&GrayImage::from_image(image))
    }

    /// Detect faces and draw an overlay on each confident one.
    ///
    /// Fails with [`Error::NoDetections`] when the cascade finds nothing and
    /// with [`Error::NoOverlaysDrawn`] when no face clears the threshold.
    pub fn process<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Result<Composite> {
        let original = image.to_rgba8();
        let faces = self.detect_gray(&GrayImage::from_rgba(&original))?;

        tracing::info!(
            "Detected {} face(s) in {}x{} image",
            faces.len(),
            original.width(),
            original.height()
        );
        if faces.is_empty() {
            return Err(Error::NoDetections);
        }

        let compositor = Compositor::new(&self.overlays, self.config.composite)?;
        let composite = compositor.composite(&original, &faces, rng)?;

        tracing::info!("Drew {} overlay(s)", composite.drawn);
        Ok(composite)
    }
}
