// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Tree addressing.
//!
//! Trees are complete binary trees of height `L` (so `L + 1` levels and `2^L` leaves),
//! stored level by level: level `j` occupies buckets `2^j - 1 ..= 2^(j+1) - 2`,
//! and bucket `b` occupies slots `b * Z .. (b + 1) * Z`.
//!
//! Leaves are labelled `0..2^L`. Two ways of hanging leaves off the tree are supported.
//! Path ORAM uses the prefix layout, where the level-`j` ancestor of leaf `p` is node `p >> (L - j)`.
//! Range ORAM uses the reversed layout, where it is node `p mod 2^j`,
//! so that consecutive leaves share as few buckets as possible.

use crate::{Address, BucketSize, OramError, MAXIMUM_TREE_HEIGHT};
use rand::{CryptoRng, Rng, RngCore};
use static_assertions::const_assert;

/// A leaf label, or the index of a node within one level of a tree.
pub type TreeIndex = u64;
/// The height of a tree (the depth of its leaves).
pub type TreeHeight = u64;

const_assert!(MAXIMUM_TREE_HEIGHT < 62);

pub(crate) trait CompleteBinaryTreeIndex
where
    Self: Sized,
{
    /// The index, within level `level`, of the ancestor of this leaf in a tree of height `height`.
    fn node_on_path(&self, level: TreeHeight, height: TreeHeight) -> Self;
    /// As `node_on_path`, but for the reversed layout.
    fn node_on_reversed_path(&self, level: TreeHeight) -> Self;
    fn random_leaf<R: RngCore + CryptoRng>(height: TreeHeight, rng: &mut R) -> Self;
    fn is_leaf(&self, height: TreeHeight) -> bool;
}

impl CompleteBinaryTreeIndex for TreeIndex {
    fn node_on_path(&self, level: TreeHeight, height: TreeHeight) -> Self {
        debug_assert!(level <= height);
        self >> (height - level)
    }

    fn node_on_reversed_path(&self, level: TreeHeight) -> Self {
        self & ((1 << level) - 1)
    }

    fn random_leaf<R: RngCore + CryptoRng>(height: TreeHeight, rng: &mut R) -> Self {
        rng.gen_range(0..(1u64 << height))
    }

    fn is_leaf(&self, height: TreeHeight) -> bool {
        *self < (1 << height)
    }
}

/// Returns `ceil(log2(n))`, with `ceil_log2(0) == ceil_log2(1) == 0`.
pub fn ceil_log2(n: u64) -> TreeHeight {
    if n <= 1 {
        0
    } else {
        (u64::BITS - (n - 1).leading_zeros()).into()
    }
}

/// The dimensions of one bucket tree in physical memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeShape {
    /// The depth of the leaves.
    pub height: TreeHeight,
    /// The number of block slots per bucket.
    pub bucket_size: BucketSize,
}

impl TreeShape {
    /// Returns a new shape, rejecting trees taller than [`MAXIMUM_TREE_HEIGHT`] and empty buckets.
    pub fn new(height: TreeHeight, bucket_size: BucketSize) -> Result<Self, OramError> {
        if height > MAXIMUM_TREE_HEIGHT {
            return Err(OramError::InvalidCapacityError {
                parameter_name: "tree height",
                parameter_value: height,
            });
        }
        if bucket_size == 0 {
            return Err(OramError::InvalidCapacityError {
                parameter_name: "bucket size",
                parameter_value: 0,
            });
        }
        Ok(Self {
            height,
            bucket_size,
        })
    }

    /// The number of leaves, `2^L`.
    pub fn leaf_count(&self) -> u64 {
        1 << self.height
    }

    /// The number of buckets, `2^(L+1) - 1`.
    pub fn bucket_count(&self) -> u64 {
        (1 << (self.height + 1)) - 1
    }

    /// The number of block slots, `(2^(L+1) - 1) * Z`.
    pub fn slot_count(&self) -> Result<Address, OramError> {
        Ok(self.bucket_count() * u64::try_from(self.bucket_size)?)
    }

    /// The first slot of node `node` of level `level`.
    pub fn slot_offset(&self, level: TreeHeight, node: TreeIndex) -> Result<Address, OramError> {
        debug_assert!(level <= self.height);
        debug_assert!(node < (1 << level));
        let bucket = (1u64 << level) - 1 + node;
        Ok(bucket * u64::try_from(self.bucket_size)?)
    }

    /// The first slot of the level-`level` bucket on the path to `leaf`, in the prefix layout.
    pub fn bucket_offset(&self, leaf: TreeIndex, level: TreeHeight) -> Result<Address, OramError> {
        self.slot_offset(level, leaf.node_on_path(level, self.height))
    }
}

/// A run of consecutive nodes within one level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSpan {
    /// The first node index.
    pub first: TreeIndex,
    /// The number of nodes.
    pub length: u64,
}

/// Returns the distinct level-`level` nodes, in the reversed layout, on the paths to
/// leaves `start, start + 1, ..., start + length - 1`.
///
/// The nodes are `start mod 2^level` onward, wrapping around the level,
/// and clamped to at most `2^level` nodes. They are returned as at most two spans of consecutive indices.
pub fn level_window(level: TreeHeight, start: TreeIndex, length: u64) -> Vec<LevelSpan> {
    let width = 1u64 << level;
    let count = length.min(width);
    let first = start.node_on_reversed_path(level);

    if count == 0 {
        Vec::new()
    } else if first + count <= width {
        vec![LevelSpan {
            first,
            length: count,
        }]
    } else {
        vec![
            LevelSpan {
                first,
                length: width - first,
            },
            LevelSpan {
                first: 0,
                length: first + count - width,
            },
        ]
    }
}
