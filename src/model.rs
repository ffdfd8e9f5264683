use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tree::{CascadeStage, PixelTest};
use crate::{pigo, staged};

/// Deepest tree the loaders accept. Real models use depth 6.
pub const MAX_TREE_DEPTH: u32 = 16;

/// On-disk layout of a cascade file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    /// Staged layout with per-node thresholds.
    Staged,
    /// The `facefinder` layout: one tree per stage, binary pixel comparisons.
    #[default]
    Pigo,
}

/// The cascade classifier model.
///
/// The model consists of:
/// - A uniform tree depth
/// - An ordered list of stages, each a tree ensemble with a rejection threshold
///
/// The running score accumulates across stages. A window is rejected as soon
/// as the score drops to or below the current stage's threshold, which makes
/// the first stages the hot path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeForest {
    depth: u32,
    stages: Vec<CascadeStage>,
}

impl CascadeForest {
    /// Create a forest, checking that every tree is complete at `depth`.
    pub fn new(depth: u32, stages: Vec<CascadeStage>) -> Result<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(Error::ModelParse(format!(
                "tree depth {} outside 1..={}",
                depth, MAX_TREE_DEPTH
            )));
        }
        if stages.is_empty() {
            return Err(Error::ModelParse("cascade has no stages".into()));
        }

        let expected_nodes = (1usize << (depth + 1)) - 1;
        for (stage_idx, stage) in stages.iter().enumerate() {
            if stage.trees.is_empty() {
                return Err(Error::ModelParse(format!("stage {} has no trees", stage_idx)));
            }
            for (tree_idx, tree) in stage.trees.iter().enumerate() {
                if tree.num_nodes() != expected_nodes {
                    return Err(Error::ModelParse(format!(
                        "stage {} tree {} has {} nodes, expected {} for depth {}",
                        stage_idx,
                        tree_idx,
                        tree.num_nodes(),
                        expected_nodes,
                        depth
                    )));
                }
            }
        }

        Ok(Self { depth, stages })
    }

    /// Parse the staged layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        staged::parse_staged(bytes)
    }

    /// Parse the `facefinder` layout.
    pub fn from_pigo_bytes(bytes: &[u8]) -> Result<Self> {
        pigo::parse_pigo(bytes)
    }

    /// Parse `bytes` in the given layout.
    pub fn parse(bytes: &[u8], model_format: ModelFormat) -> Result<Self> {
        match model_format {
            ModelFormat::Staged => Self::from_bytes(bytes),
            ModelFormat::Pigo => Self::from_pigo_bytes(bytes),
        }
    }

    /// Serialize to the staged layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        staged::write_staged(self)
    }

    /// Load a model from a file, decompressing `.bz2` files on the fly.
    pub fn load<P: AsRef<Path>>(path: P, model_format: ModelFormat) -> Result<Self> {
        let path = path.as_ref();
        let bytes = read_cascade_bytes(path)?;
        let forest = Self::parse(&bytes, model_format)?;
        tracing::debug!(
            "Loaded cascade {:?}: {} stages, {} trees, depth {}",
            path,
            forest.num_stages(),
            forest.num_trees(),
            forest.depth()
        );
        Ok(forest)
    }

    /// Save the model to a file in the staged layout.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn stages(&self) -> &[CascadeStage] {
        &self.stages
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Total number of trees across all stages.
    pub fn num_trees(&self) -> usize {
        self.stages.iter().map(|stage| stage.trees.len()).sum()
    }

    /// Run the cascade on one window.
    ///
    /// Returns `None` when a stage rejects the window, otherwise the margin
    /// of the final score over the last stage threshold (always positive).
    #[inline]
    pub fn classify<F>(&self, get_feature: F) -> Option<f32>
    where
        F: Fn(&PixelTest) -> f32,
    {
        let mut score = 0.0f32;
        let mut last_threshold = 0.0f32;

        for stage in &self.stages {
            score += stage.predict(&get_feature);
            if score <= stage.threshold {
                return None;
            }
            last_threshold = stage.threshold;
        }

        Some(score - last_threshold)
    }
}

/// Read a cascade file into memory, decompressing it when the name ends in `.bz2`.
pub fn read_cascade_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);

    let mut bytes = Vec::new();
    if path.extension().is_some_and(|ext| ext == "bz2") {
        BzDecoder::new(reader).read_to_end(&mut bytes)?;
    } else {
        reader.read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

/// Load a cascade file in the given layout. See [`CascadeForest::load`].
pub fn load_cascade<P: AsRef<Path>>(path: P, model_format: ModelFormat) -> Result<CascadeForest> {
    CascadeForest::load(path, model_format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{CascadeTree, TreeNode};

    fn stump(threshold: f32, left: f32, right: f32) -> CascadeTree {
        CascadeTree::complete(
            vec![(PixelTest::new(0, 0, 0, 0), threshold)],
            vec![left, right],
        )
        .unwrap()
    }

    fn create_dummy_forest() -> CascadeForest {
        CascadeForest::new(
            1,
            vec![
                CascadeStage::new(vec![stump(0.0, -1.0, 1.0)], 0.0),
                CascadeStage::new(vec![stump(10.0, -0.5, 2.0), stump(10.0, 0.0, 0.5)], 1.5),
            ],
        )
        .unwrap()
    }

    #[test]
    fn forest_initialization() {
        let forest = create_dummy_forest();
        assert_eq!(forest.depth(), 1);
        assert_eq!(forest.num_stages(), 2);
        assert_eq!(forest.num_trees(), 3);
    }

    #[test]
    fn classify_accepts_and_reports_margin() {
        let forest = create_dummy_forest();
        // Stage 1: 1.0 > 0.0. Stage 2: 1.0 + 2.0 + 0.5 = 3.5 > 1.5. Margin 2.0.
        let q = forest.classify(|_| 20.0).unwrap();
        assert!((q - 2.0).abs() < 1e-6);
    }

    #[test]
    fn classify_rejects_early() {
        let forest = create_dummy_forest();
        // Stage 1 gives -1.0 <= 0.0
        assert_eq!(forest.classify(|_| -5.0), None);
        // Stage 1 passes with 1.0, stage 2 adds -0.5 + 0.0 => 0.5 <= 1.5
        assert_eq!(forest.classify(|_| 5.0), None);
    }

    #[test]
    fn score_equal_to_threshold_is_rejected() {
        let forest = CascadeForest::new(1, vec![CascadeStage::new(vec![stump(0.0, 0.0, 0.0)], 0.0)])
            .unwrap();
        assert_eq!(forest.classify(|_| 1.0), None);
    }

    #[test]
    fn new_rejects_bad_shapes() {
        assert!(matches!(
            CascadeForest::new(1, vec![]),
            Err(Error::ModelParse(_))
        ));
        assert!(matches!(
            CascadeForest::new(0, vec![CascadeStage::new(vec![stump(0.0, 0.0, 0.0)], 0.0)]),
            Err(Error::ModelParse(_))
        ));
        assert!(matches!(
            CascadeForest::new(1, vec![CascadeStage::new(vec![], 0.0)]),
            Err(Error::ModelParse(_))
        ));
        let lone_leaf = CascadeTree::new(vec![TreeNode::Leaf { prediction: 1.0 }]);
        assert!(matches!(
            CascadeForest::new(1, vec![CascadeStage::new(vec![lone_leaf], 0.0)]),
            Err(Error::ModelParse(_))
        ));
    }

    #[test]
    fn save_and_load_model() {
        let forest = create_dummy_forest();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.cascade");
        forest.save(&path).unwrap();

        let loaded = CascadeForest::load(&path, ModelFormat::Staged).unwrap();
        assert_eq!(loaded, forest);
    }

    #[test]
    fn load_bz2_model() {
        use bzip2::write::BzEncoder;
        use bzip2::Compression;

        let forest = create_dummy_forest();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.cascade.bz2");
        let mut encoder = BzEncoder::new(File::create(&path).unwrap(), Compression::best());
        encoder.write_all(&forest.to_bytes()).unwrap();
        encoder.finish().unwrap();

        let loaded = CascadeForest::load(&path, ModelFormat::Staged).unwrap();
        assert_eq!(loaded, forest);
        assert_eq!(read_cascade_bytes(&path).unwrap(), forest.to_bytes());

        // Plain files are read as is
        let plain = dir.path().join("forest.cascade");
        std::fs::write(&plain, forest.to_bytes()).unwrap();
        assert_eq!(read_cascade_bytes(&plain).unwrap(), forest.to_bytes());
    }
}
