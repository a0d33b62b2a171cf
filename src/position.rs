// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Leaf labels ("positions") and the index arithmetic of a complete binary tree stored as a flat array.

use crate::{OramError, TreeHeight};
use rand::{CryptoRng, Rng, RngCore};
use std::fmt;

/// The largest supported tree height.
pub const MAXIMUM_TREE_HEIGHT: TreeHeight = 32;

pub(crate) type TreeIndex = u64;

/// Heap-style (1-based) indexing of tree nodes: the root is 1 and node `n` has children `2n` and `2n + 1`.
pub(crate) trait CompleteBinaryTreeIndex
where
    Self: Sized,
{
    fn node_on_path(&self, depth: TreeHeight, height: TreeHeight) -> Self;
    fn depth(&self) -> TreeHeight;
    fn is_leaf(&self, height: TreeHeight) -> bool;
}

impl CompleteBinaryTreeIndex for TreeIndex {
    fn node_on_path(&self, depth: TreeHeight, height: TreeHeight) -> Self {
        // We only call this method when the receiver is a leaf.
        debug_assert!(self.is_leaf(height));
        let shift = height - depth;
        self >> shift
    }

    fn depth(&self) -> TreeHeight {
        // All TreeIndex values are nonzero.
        debug_assert_ne!(*self, 0);
        TreeIndex::BITS - self.leading_zeros() - 1
    }

    fn is_leaf(&self, height: TreeHeight) -> bool {
        self.depth() == height
    }
}

/// A leaf label: an `height`-bit string identifying one root-to-leaf path.
///
/// Bit `i`, counted from the most significant end, selects the left (0) or right (1) child at depth `i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    label: u64,
    height: TreeHeight,
}

impl Position {
    /// Returns the position with leaf label `label` in a tree of height `height`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPosition` if `height` exceeds [`MAXIMUM_TREE_HEIGHT`] or `label >= 2^height`.
    pub fn new(label: u64, height: TreeHeight) -> Result<Self, OramError> {
        if height > MAXIMUM_TREE_HEIGHT {
            return Err(OramError::InvalidPosition(format!(
                "height {height} exceeds the maximum of {MAXIMUM_TREE_HEIGHT}"
            )));
        }
        if label >= leaf_count(height) {
            return Err(OramError::InvalidPosition(format!(
                "leaf {label} does not fit in {height} bits"
            )));
        }
        Ok(Self { label, height })
    }

    /// Parses a string of `0` and `1` characters; the tree height is the length of the string.
    pub fn from_bit_string(bits: &str) -> Result<Self, OramError> {
        let height = TreeHeight::try_from(bits.len())?;
        if height > MAXIMUM_TREE_HEIGHT {
            return Err(OramError::InvalidPosition(format!(
                "{height} bits exceed the maximum height of {MAXIMUM_TREE_HEIGHT}"
            )));
        }
        let mut label = 0u64;
        for c in bits.chars() {
            let bit = match c {
                '0' => 0,
                '1' => 1,
                _ => {
                    return Err(OramError::InvalidPosition(format!(
                        "{bits:?} is not a string of 0s and 1s"
                    )))
                }
            };
            label = (label << 1) | bit;
        }
        Self::new(label, height)
    }

    /// Draws a uniformly random leaf of a tree of height `height`.
    pub fn random<R: RngCore + CryptoRng>(
        height: TreeHeight,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let label = rng.gen_range(0..leaf_count(height));
        Self::new(label, height)
    }

    /// The leaf label.
    pub fn label(&self) -> u64 {
        self.label
    }

    /// The height of the tree this position belongs to.
    pub fn height(&self) -> TreeHeight {
        self.height
    }

    /// Whether `self` and `other` agree on their first `depth` bits,
    /// i.e. whether their paths share the bucket at `depth`.
    pub fn shares_bucket_at(&self, other: &Position, depth: TreeHeight) -> bool {
        if self.height != other.height || depth > self.height {
            return false;
        }
        self.tree_index().node_on_path(depth, self.height)
            == other.tree_index().node_on_path(depth, other.height)
    }

    /// The deepest level at which the paths of `self` and `other` share a bucket.
    pub fn common_depth(&self, other: &Position) -> TreeHeight {
        debug_assert_eq!(self.height, other.height);
        let differing_bits = self.label ^ other.label;
        if differing_bits == 0 {
            self.height
        } else {
            self.height - (u64::BITS - differing_bits.leading_zeros())
        }
    }

    /// The array index (root = 0) of the bucket at `depth` on the path to this leaf.
    pub fn bucket_index(&self, depth: TreeHeight) -> Result<usize, OramError> {
        if depth > self.height {
            return Err(OramError::InvalidDepth {
                depth,
                height: self.height,
            });
        }
        let node = self.tree_index().node_on_path(depth, self.height);
        Ok(usize::try_from(node - 1)?)
    }

    fn tree_index(&self) -> TreeIndex {
        (1u64 << self.height) | self.label
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..self.height).rev() {
            write!(f, "{}", (self.label >> i) & 1)?;
        }
        Ok(())
    }
}

/// The number of leaves of a tree of height `height`.
pub(crate) fn leaf_count(height: TreeHeight) -> u64 {
    1u64 << height
}

/// The number of buckets, `2^(height + 1) - 1`, of a tree of height `height`.
pub(crate) fn bucket_count(height: TreeHeight) -> Result<usize, OramError> {
    Ok(usize::try_from((leaf_count(height) << 1) - 1)?)
}
