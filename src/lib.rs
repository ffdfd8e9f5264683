//! # pepe-face
//!
//! Pure Rust cascade face detection with overlay compositing.
//!
//! This crate provides:
//! - **Model Loading**: binary decision-tree cascades, in a staged layout or
//!   the layout of pigo's pretrained `facefinder` model
//! - **Detection**: a multi-scale sliding-window scan with early rejection
//! - **Clustering**: IoU-based merging of overlapping windows into faces
//! - **Compositing**: drawing a randomly chosen overlay on every face
//!
//! ## Algorithm Overview
//!
//! 1. Convert the input image to grayscale
//! 2. For each window size from `min_size` to `max_size`:
//!    - Slide the window across the image
//!    - Walk each stage's trees, comparing pairs of pixels inside the window
//!    - Reject the window as soon as the running score drops below a stage threshold
//! 3. Merge overlapping surviving windows into one detection per face
//! 4. Draw an overlay, scaled to the face, on every confident detection
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use pepe_face::{
//!     CascadeForest, CascadeStage, CascadeTree, OverlayPool, Pipeline, PipelineConfig,
//!     PixelTest,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! // Load a trained model
//! // let forest = CascadeForest::load("facefinder", ModelFormat::Pigo).unwrap();
//!
//! // Or build a tiny one: window center brighter than its top-left corner
//! let tree = CascadeTree::complete(
//!     vec![(PixelTest::new(0, 0, -127, -127), 100.0)],
//!     vec![-2.0, 2.0],
//! )
//! .unwrap();
//! let forest = CascadeForest::new(1, vec![CascadeStage::new(vec![tree], 0.0)]).unwrap();
//!
//! let overlay = image::RgbaImage::from_pixel(8, 8, image::Rgba([0, 160, 0, 200]));
//! let overlays = OverlayPool::new(vec![overlay]).unwrap();
//!
//! let pipeline = Pipeline::new(
//!     Arc::new(forest),
//!     Arc::new(overlays),
//!     PipelineConfig::default(),
//! )
//! .unwrap();
//!
//! // A bright square on a dark background
//! let photo = image::DynamicImage::ImageLuma8(image::GrayImage::from_fn(120, 120, |x, y| {
//!     let inside = (40..80).contains(&x) && (40..80).contains(&y);
//!     image::Luma([if inside { 255 } else { 0 }])
//! }));
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let composite = pipeline.process(&photo, &mut rng).unwrap();
//! println!("Drew {} overlays", composite.drawn);
//! ```

pub mod cluster;
pub mod detector;
mod error;
mod features;
mod model;
pub mod overlay;
pub mod pigo;
mod pipeline;
mod staged;
mod tree;
mod types;

pub use cluster::{cluster_detections, ClusterParams};
pub use detector::{run_cascade, ScanParams};
pub use error::{Error, Result};
pub use features::{GrayImage, Rotation, WindowTransform};
pub use model::{load_cascade, read_cascade_bytes, CascadeForest, ModelFormat, MAX_TREE_DEPTH};
pub use overlay::{resize_overlay, Composite, CompositeParams, Compositor, OverlayPool};
pub use pipeline::{Pipeline, PipelineConfig};
pub use tree::{CascadeStage, CascadeTree, PixelTest, TreeNode};
pub use types::{BoundingBox, Detection};
