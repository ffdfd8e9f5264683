//! Reader and writer for the staged cascade layout.
//!
//! All values are little-endian:
//!
//! ```text
//! u32 num_stages
//! u32 depth
//! per stage:
//!     f32 threshold
//!     u32 num_trees
//!     per tree:
//!         (2^depth - 1) x { i8 dx1, i8 dy1, i8 dx2, i8 dy2, f32 threshold }
//!         2^depth x f32 prediction
//! ```
//!
//! Splits are stored in heap order, so a tree's nodes map one to one onto
//! [`CascadeTree::complete`].

use crate::error::{Error, Result};
use crate::model::{CascadeForest, MAX_TREE_DEPTH};
use crate::tree::{CascadeStage, CascadeTree, PixelTest};

/// Upper bound for speculative allocations driven by counts read from the
/// file. Larger counts still parse, the vectors just grow as data arrives.
const MAX_PREALLOC: usize = 4096;

/// Cursor over a cascade buffer that turns running out of bytes into a
/// [`Error::ModelParse`] naming the offset and the field being read.
pub(crate) struct CascadeReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> CascadeReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            Error::ModelParse(format!(
                "truncated input: need {} bytes for {} at offset {}, {} left",
                N,
                what,
                self.pos,
                self.remaining()
            ))
        })?;
        self.pos = end;

        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    pub(crate) fn skip(&mut self, n: usize, what: &str) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::ModelParse(format!(
                "truncated input: need {} bytes for {} at offset {}, {} left",
                n,
                what,
                self.pos,
                self.remaining()
            )));
        }
        self.pos += n;
        Ok(())
    }

    pub(crate) fn read_i8(&mut self, what: &str) -> Result<i8> {
        Ok(i8::from_le_bytes(self.take::<1>(what)?))
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take::<4>(what)?))
    }

    pub(crate) fn read_f32(&mut self, what: &str) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take::<4>(what)?))
    }
}

/// Validate a depth read from a header and return the split and leaf counts.
pub(crate) fn tree_shape(depth: u32) -> Result<(usize, usize)> {
    if depth == 0 || depth > MAX_TREE_DEPTH {
        return Err(Error::ModelParse(format!(
            "tree depth {} outside 1..={}",
            depth, MAX_TREE_DEPTH
        )));
    }
    let num_leaves = 1usize << depth;
    Ok((num_leaves - 1, num_leaves))
}

pub(crate) fn parse_staged(bytes: &[u8]) -> Result<CascadeForest> {
    let mut r = CascadeReader::new(bytes);

    let num_stages = r.read_u32("stage count")? as usize;
    let depth = r.read_u32("tree depth")?;
    let (num_splits, num_leaves) = tree_shape(depth)?;

    if num_stages == 0 {
        return Err(Error::ModelParse("cascade has no stages".into()));
    }

    let mut stages = Vec::with_capacity(num_stages.min(MAX_PREALLOC));
    for _ in 0..num_stages {
        let threshold = r.read_f32("stage threshold")?;
        let num_trees = r.read_u32("tree count")? as usize;

        let mut trees = Vec::with_capacity(num_trees.min(MAX_PREALLOC));
        for _ in 0..num_trees {
            trees.push(parse_tree(&mut r, num_splits, num_leaves)?);
        }

        stages.push(CascadeStage::new(trees, threshold));
    }

    if r.remaining() > 0 {
        return Err(Error::ModelParse(format!(
            "{} trailing bytes after last stage at offset {}",
            r.remaining(),
            r.position()
        )));
    }

    CascadeForest::new(depth, stages)
}

fn parse_tree(r: &mut CascadeReader<'_>, num_splits: usize, num_leaves: usize) -> Result<CascadeTree> {
    let mut splits = Vec::with_capacity(num_splits);
    for _ in 0..num_splits {
        let dx1 = r.read_i8("split offset")?;
        let dy1 = r.read_i8("split offset")?;
        let dx2 = r.read_i8("split offset")?;
        let dy2 = r.read_i8("split offset")?;
        let threshold = r.read_f32("split threshold")?;
        splits.push((PixelTest::new(dx1, dy1, dx2, dy2), threshold));
    }

    let mut leaves = Vec::with_capacity(num_leaves);
    for _ in 0..num_leaves {
        leaves.push(r.read_f32("leaf prediction")?);
    }

    CascadeTree::complete(splits, leaves)
}

pub(crate) fn write_staged(forest: &CascadeForest) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(forest.num_stages() as u32).to_le_bytes());
    out.extend_from_slice(&forest.depth().to_le_bytes());

    for stage in forest.stages() {
        out.extend_from_slice(&stage.threshold.to_le_bytes());
        out.extend_from_slice(&(stage.trees.len() as u32).to_le_bytes());

        for tree in &stage.trees {
            for (test, threshold) in tree.splits() {
                out.extend_from_slice(&[
                    test.dx1 as u8,
                    test.dy1 as u8,
                    test.dx2 as u8,
                    test.dy2 as u8,
                ]);
                out.extend_from_slice(&threshold.to_le_bytes());
            }
            for prediction in tree.leaves() {
                out.extend_from_slice(&prediction.to_le_bytes());
            }
        }
    }

    out
}
