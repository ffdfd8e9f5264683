use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A binary pixel test defined by two offsets from the window center.
///
/// Offsets are in units of 1/256 of the window size, so `dx = 127` lands
/// just inside the right edge of the window. The feature value is the
/// intensity of the first sample minus the intensity of the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelTest {
    pub dx1: i8,
    pub dy1: i8,
    pub dx2: i8,
    pub dy2: i8,
}

impl PixelTest {
    pub const fn new(dx1: i8, dy1: i8, dx2: i8, dy2: i8) -> Self {
        Self { dx1, dy1, dx2, dy2 }
    }
}

/// A node in the decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Internal split node.
    Split {
        test: PixelTest,
        threshold: f32,
        left: u32,
        right: u32,
    },
    /// Leaf node holding the tree's vote.
    Leaf { prediction: f32 },
}

/// A single decision tree stored as an arena of nodes.
///
/// Trees are complete: the `2^depth - 1` split nodes come first in heap
/// order (node `i` has children `2i + 1` and `2i + 2`), followed by the
/// `2^depth` leaves.
///
/// Evaluation:
/// 1. Start at the root node
/// 2. At each split, compute the pixel intensity difference
/// 3. Go right if difference > threshold, left otherwise
/// 4. Return the prediction at the reached leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeTree {
    pub nodes: Vec<TreeNode>,
}

impl CascadeTree {
    /// Create a tree from raw nodes. Node 0 is the root.
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Lay out a complete tree from its splits (heap order) and leaves.
    pub fn complete(splits: Vec<(PixelTest, f32)>, leaves: Vec<f32>) -> Result<Self> {
        if leaves.len() != splits.len() + 1 {
            return Err(Error::ModelParse(format!(
                "tree with {} splits should have {} leaves, got {}",
                splits.len(),
                splits.len() + 1,
                leaves.len()
            )));
        }

        let mut nodes = Vec::with_capacity(splits.len() + leaves.len());
        for (i, (test, threshold)) in splits.into_iter().enumerate() {
            nodes.push(TreeNode::Split {
                test,
                threshold,
                left: (2 * i + 1) as u32,
                right: (2 * i + 2) as u32,
            });
        }
        nodes.extend(
            leaves
                .into_iter()
                .map(|prediction| TreeNode::Leaf { prediction }),
        );

        Ok(Self { nodes })
    }

    /// Walk from the root to a leaf and return its prediction.
    ///
    /// `get_feature` computes the pixel difference for a split's test.
    #[inline]
    pub fn predict<F>(&self, get_feature: F) -> f32
    where
        F: Fn(&PixelTest) -> f32,
    {
        let mut node_idx = 0usize;

        loop {
            match &self.nodes[node_idx] {
                TreeNode::Split {
                    test,
                    threshold,
                    left,
                    right,
                } => {
                    node_idx = if get_feature(test) > *threshold {
                        *right as usize
                    } else {
                        *left as usize
                    };
                }
                TreeNode::Leaf { prediction } => return *prediction,
            }
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Split nodes in storage order.
    pub fn splits(&self) -> impl Iterator<Item = (&PixelTest, f32)> {
        self.nodes.iter().filter_map(|node| match node {
            TreeNode::Split { test, threshold, .. } => Some((test, *threshold)),
            TreeNode::Leaf { .. } => None,
        })
    }

    /// Leaf predictions in storage order.
    pub fn leaves(&self) -> impl Iterator<Item = f32> + '_ {
        self.nodes.iter().filter_map(|node| match node {
            TreeNode::Leaf { prediction } => Some(*prediction),
            TreeNode::Split { .. } => None,
        })
    }

    /// Depth in split levels; a lone leaf has depth 0.
    pub fn depth(&self) -> usize {
        self.depth_from(0)
    }

    fn depth_from(&self, node_idx: usize) -> usize {
        match &self.nodes[node_idx] {
            TreeNode::Split { left, right, .. } => {
                1 + self
                    .depth_from(*left as usize)
                    .max(self.depth_from(*right as usize))
            }
            TreeNode::Leaf { .. } => 0,
        }
    }
}

/// A group of trees whose summed vote must clear the stage threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeStage {
    pub trees: Vec<CascadeTree>,
    pub threshold: f32,
}

impl CascadeStage {
    pub fn new(trees: Vec<CascadeTree>, threshold: f32) -> Self {
        Self { trees, threshold }
    }

    /// Sum of the votes of every tree in the stage.
    #[inline]
    pub fn predict<F>(&self, get_feature: F) -> f32
    where
        F: Fn(&PixelTest) -> f32,
    {
        self.trees.iter().map(|tree| tree.predict(&get_feature)).sum()
    }
}
