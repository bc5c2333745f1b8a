// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Client-side state shared by all sub-ORAMs of a Range ORAM.

use crate::{
    utils::{CompleteBinaryTreeIndex, TreeHeight, TreeIndex},
    Address, OramError,
};
use rand::{CryptoRng, RngCore};

/// Leaf assignments for every granularity.
///
/// At granularity `i`, the addresses are grouped into aligned runs of `2^i`.
/// Each run has one random leaf `p`, and the block at offset `k` of the run is assigned leaf
/// `p + k mod 2^h`, so a whole run sits on consecutive leaves.
#[derive(Debug)]
pub struct RangePositionMap {
    height: TreeHeight,
    run_leaves: Vec<Vec<TreeIndex>>,
}

impl RangePositionMap {
    /// Draws a random leaf for every run of every granularity `0..granularity_count`
    /// over the `2^height` padded addresses.
    pub fn new<R: RngCore + CryptoRng>(
        granularity_count: usize,
        height: TreeHeight,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let run_leaves = (0..granularity_count)
            .map(|granularity| -> Result<Vec<TreeIndex>, OramError> {
                let run_count = usize::try_from((1u64 << height) >> granularity)?;
                Ok((0..run_count)
                    .map(|_| TreeIndex::random_leaf(height, rng))
                    .collect())
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { height, run_leaves })
    }

    /// The number of granularities, and so the number of tags per block.
    pub fn granularity_count(&self) -> usize {
        self.run_leaves.len()
    }

    fn run_index(&self, granularity: usize, address: Address) -> Result<usize, OramError> {
        let capacity = 1u64 << self.height;
        if granularity >= self.run_leaves.len() || address >= capacity {
            return Err(OramError::AddressOutOfBoundsError {
                attempted: address,
                capacity,
            });
        }
        Ok(usize::try_from(address >> granularity)?)
    }

    /// The leaf of the first block of the run containing `address`.
    pub fn run_leaf(&self, granularity: usize, address: Address) -> Result<TreeIndex, OramError> {
        let run = self.run_index(granularity, address)?;
        Ok(self.run_leaves[granularity][run])
    }

    /// The leaf assigned to `address` in the tree of granularity `granularity`.
    pub fn tag(&self, granularity: usize, address: Address) -> Result<TreeIndex, OramError> {
        let run_leaf = self.run_leaf(granularity, address)?;
        let offset = address & ((1 << granularity) - 1);
        Ok((run_leaf + offset) & ((1 << self.height) - 1))
    }

    /// The leaves assigned to `address` in every tree, by granularity.
    pub fn tags(&self, address: Address) -> Result<Vec<TreeIndex>, OramError> {
        (0..self.granularity_count())
            .map(|granularity| self.tag(granularity, address))
            .collect()
    }

    /// Moves the run containing `address` to a fresh random leaf, returning it.
    pub fn rotate<R: RngCore + CryptoRng>(
        &mut self,
        granularity: usize,
        address: Address,
        rng: &mut R,
    ) -> Result<TreeIndex, OramError> {
        let run = self.run_index(granularity, address)?;
        let new_leaf = TreeIndex::random_leaf(self.height, rng);
        self.run_leaves[granularity][run] = new_leaf;
        Ok(new_leaf)
    }
}

/// The number of leaves evicted so far, summed over all accesses.
///
/// Every sub-ORAM starts its batch eviction at the current value; only the Range ORAM itself
/// advances it, once per access and after every sub-ORAM has evicted.
#[derive(Debug, Default)]
pub struct GlobalCounter(u64);

impl GlobalCounter {
    /// The current value.
    pub fn value(&self) -> u64 {
        self.0
    }

    pub(super) fn advance(&mut self, leaves: u64) {
        self.0 = self.0.wrapping_add(leaves);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn runs_sit_on_consecutive_leaves() {
        let mut rng = StdRng::seed_from_u64(0);
        let positions = RangePositionMap::new(4, 5, &mut rng).unwrap();
        assert_eq!(positions.granularity_count(), 4);

        for granularity in 0..4 {
            let run = 1u64 << granularity;
            for base in (0..32).step_by(usize::try_from(run).unwrap()) {
                let first = positions.tag(granularity, base).unwrap();
                assert_eq!(first, positions.run_leaf(granularity, base).unwrap());
                for offset in 0..run {
                    assert_eq!(
                        positions.tag(granularity, base + offset).unwrap(),
                        (first + offset) % 32
                    );
                }
            }
        }
        assert_eq!(positions.tags(9).unwrap().len(), 4);
    }

    #[test]
    fn rotation_moves_one_run() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut positions = RangePositionMap::new(3, 4, &mut rng).unwrap();
        let before: Vec<_> = (0..16).map(|a| positions.tags(a).unwrap()).collect();

        let new_leaf = positions.rotate(2, 6, &mut rng).unwrap();
        assert_eq!(positions.run_leaf(2, 4).unwrap(), new_leaf);
        for address in 0..16u64 {
            let after = positions.tags(address).unwrap();
            let index = usize::try_from(address).unwrap();
            assert_eq!(after[..2], before[index][..2]);
            if !(4..8).contains(&address) {
                assert_eq!(after[2], before[index][2]);
            }
        }
    }

    #[test]
    fn out_of_range_lookups_fail() {
        let mut rng = StdRng::seed_from_u64(0);
        let positions = RangePositionMap::new(2, 3, &mut rng).unwrap();
        assert!(positions.tag(0, 8).is_err());
        assert!(positions.tag(2, 0).is_err());
    }

    #[test]
    fn counter_only_moves_forward() {
        let mut counter = GlobalCounter::default();
        counter.advance(2);
        counter.advance(8);
        assert_eq!(counter.value(), 10);
    }
}
