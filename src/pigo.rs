//! Loader for the pigo `facefinder` cascade layout.
//!
//! This is the format of the pretrained frontal face model distributed with
//! pigo. Every tree carries its own rejection threshold and every split is a
//! plain pixel comparison:
//!
//! ```text
//! 8 bytes reserved
//! u32 depth
//! u32 num_trees
//! per tree:
//!     (2^depth - 1) x { i8 dy1, i8 dx1, i8 dy2, i8 dx2 }
//!     2^depth x f32 prediction
//!     f32 threshold
//! ```
//!
//! pigo descends to the second child when `p1 <= p2`, so ties go right. Each
//! tree is loaded as a single-tree stage whose splits compare the points in
//! swapped order against [`PIGO_SPLIT_THRESHOLD`]: for integer intensities
//! `p2 - p1 > -0.5` holds exactly when `p1 <= p2`, so the staged evaluator
//! makes the decisions pigo makes.
//!
//! # Obtaining Models
//!
//! ```bash
//! curl -LO https://raw.githubusercontent.com/esimov/pigo/master/cascade/facefinder
//! ```

use crate::error::{Error, Result};
use crate::model::CascadeForest;
use crate::staged::{tree_shape, CascadeReader};
use crate::tree::{CascadeStage, CascadeTree, PixelTest};

const RESERVED_HEADER_BYTES: usize = 8;

/// Split threshold of every tree loaded from the pigo layout.
pub const PIGO_SPLIT_THRESHOLD: f32 = -0.5;

pub(crate) fn parse_pigo(bytes: &[u8]) -> Result<CascadeForest> {
    let mut r = CascadeReader::new(bytes);

    r.skip(RESERVED_HEADER_BYTES, "reserved header")?;
    let depth = r.read_u32("tree depth")?;
    let num_trees = r.read_u32("tree count")? as usize;
    let (num_splits, num_leaves) = tree_shape(depth)?;

    if num_trees == 0 {
        return Err(Error::ModelParse("cascade has no trees".into()));
    }

    // Bytes per tree: 4 codes per split, 4 per leaf, 4 for the threshold
    let tree_bytes = 4 * num_splits + 4 * num_leaves + 4;
    if r.remaining() / tree_bytes < num_trees {
        return Err(Error::ModelParse(format!(
            "truncated input: {} trees of {} bytes need {} bytes, {} left",
            num_trees,
            tree_bytes,
            num_trees.saturating_mul(tree_bytes),
            r.remaining()
        )));
    }

    let mut stages = Vec::with_capacity(num_trees);
    for _ in 0..num_trees {
        let mut splits = Vec::with_capacity(num_splits);
        for _ in 0..num_splits {
            let dy1 = r.read_i8("split code")?;
            let dx1 = r.read_i8("split code")?;
            let dy2 = r.read_i8("split code")?;
            let dx2 = r.read_i8("split code")?;
            // Right on p1 <= p2, i.e. p2 - p1 > -0.5
            splits.push((PixelTest::new(dx2, dy2, dx1, dy1), PIGO_SPLIT_THRESHOLD));
        }

        let mut leaves = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            leaves.push(r.read_f32("leaf prediction")?);
        }

        let threshold = r.read_f32("tree threshold")?;
        let tree = CascadeTree::complete(splits, leaves)?;
        stages.push(CascadeStage::new(vec![tree], threshold));
    }

    if r.remaining() > 0 {
        tracing::debug!(
            "Ignoring {} trailing bytes after {} trees",
            r.remaining(),
            num_trees
        );
    }

    CascadeForest::new(depth, stages)
}

/// Encode a forest in the pigo layout.
///
/// Only forests made of single-tree stages whose splits all use
/// [`PIGO_SPLIT_THRESHOLD`] can be expressed; anything else is rejected with
/// [`Error::ModelParse`].
pub fn write_pigo(forest: &CascadeForest) -> Result<Vec<u8>> {
    let mut out = vec![0u8; RESERVED_HEADER_BYTES];
    out.extend_from_slice(&forest.depth().to_le_bytes());
    out.extend_from_slice(&(forest.num_stages() as u32).to_le_bytes());

    for (stage_idx, stage) in forest.stages().iter().enumerate() {
        let [tree] = stage.trees.as_slice() else {
            return Err(Error::ModelParse(format!(
                "stage {} has {} trees, the pigo layout holds one per stage",
                stage_idx,
                stage.trees.len()
            )));
        };

        for (test, threshold) in tree.splits() {
            if threshold != PIGO_SPLIT_THRESHOLD {
                return Err(Error::ModelParse(format!(
                    "stage {} has split threshold {}, the pigo layout only compares pixels",
                    stage_idx, threshold
                )));
            }
            // The stored test compares the points in swapped order
            out.extend_from_slice(&[
                test.dy2 as u8,
                test.dx2 as u8,
                test.dy1 as u8,
                test.dx1 as u8,
            ]);
        }
        for prediction in tree.leaves() {
            out.extend_from_slice(&prediction.to_le_bytes());
        }
        out.extend_from_slice(&stage.threshold.to_le_bytes());
    }

    Ok(out)
}
