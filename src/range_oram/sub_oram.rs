// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! One tree of a Range ORAM.

use super::positions::{GlobalCounter, RangePositionMap};
use crate::{
    block::{Block, PhysicalBlock},
    codec::BlockCodec,
    database::BlockStore,
    utils::{level_window, LevelSpan, TreeIndex, TreeShape},
    Address, Ciphertext, OramError,
};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;

/// The tree of granularity `i`: it holds every block, and places each aligned run of `2^i`
/// addresses on consecutive leaves. Buckets use the reversed layout, so the level-`j`
/// bucket of leaf `p` is node `p mod 2^j`.
#[derive(Debug)]
pub(crate) struct SubOram<S: BlockStore> {
    granularity: usize,
    shape: TreeShape,
    pub(crate) physical_memory: S,
    stash: BTreeMap<Address, Block>,
}

/// Keeps `block` unless `blocks` already holds a copy at least as new.
fn merge_newer(blocks: &mut BTreeMap<Address, Block>, block: Block) {
    match blocks.get(&block.id) {
        Some(existing) if existing.version >= block.version => {}
        _ => {
            blocks.insert(block.id, block);
        }
    }
}

impl<S: BlockStore> SubOram<S> {
    pub(crate) fn new<C: BlockCodec, R: RngCore + CryptoRng>(
        granularity: usize,
        shape: TreeShape,
        codec: &C,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let mut physical_memory = S::new(shape.slot_count()?)?;
        let dummies = (0..shape.slot_count()?)
            .map(|_| codec.encrypt_dummy(rng))
            .collect::<Result<Vec<_>, _>>()?;
        physical_memory.set_range(0, dummies)?;

        Ok(Self {
            granularity,
            shape,
            physical_memory,
            stash: BTreeMap::new(),
        })
    }

    pub(crate) fn stash_occupancy(&self) -> usize {
        self.stash.len()
    }

    /// Reads the buckets of `spans` at `level` and returns the real blocks whose tags match
    /// the current position map. Copies left behind by earlier accesses are dropped.
    fn read_level<C: BlockCodec>(
        &mut self,
        level: u64,
        spans: &[LevelSpan],
        positions: &RangePositionMap,
        codec: &C,
    ) -> Result<Vec<Block>, OramError> {
        let bucket_size = Address::try_from(self.shape.bucket_size)?;
        let mut blocks = Vec::new();
        for span in spans {
            let start = self.shape.slot_offset(level, span.first)?;
            let end = start + span.length * bucket_size;
            for ciphertext in self.physical_memory.get_range(start, end)? {
                if let PhysicalBlock::Real(block) = codec.decrypt_block(&ciphertext)? {
                    if block.position_tags == positions.tags(block.id)? {
                        blocks.push(block);
                    }
                }
            }
        }
        Ok(blocks)
    }

    /// Returns every block of the run starting at `base`, from the stash and from the
    /// buckets on the run's consecutive leaves, then moves the run to a fresh random leaf.
    ///
    /// `base` must be aligned to `2^i`. Addresses that were never written are absent from the result.
    pub(crate) fn read_range<C: BlockCodec, R: RngCore + CryptoRng>(
        &mut self,
        base: Address,
        positions: &mut RangePositionMap,
        codec: &C,
        rng: &mut R,
    ) -> Result<(BTreeMap<Address, Block>, TreeIndex), OramError> {
        let run = 1u64 << self.granularity;
        let end = base + run;
        let old_leaf = positions.run_leaf(self.granularity, base)?;

        let mut found: BTreeMap<Address, Block> = self
            .stash
            .range(base..end)
            .map(|(address, block)| (*address, block.clone()))
            .collect();

        for level in 0..=self.shape.height {
            let spans = level_window(level, old_leaf, run);
            for block in self.read_level(level, &spans, positions, codec)? {
                if (base..end).contains(&block.id) {
                    merge_newer(&mut found, block);
                }
            }
        }

        let new_leaf = positions.rotate(self.granularity, base, rng)?;
        log::debug!(
            "SubOram {}: read_range({}) moved run from leaf {} to {}",
            self.granularity,
            base,
            old_leaf,
            new_leaf
        );
        Ok((found, new_leaf))
    }

    /// Replaces the stash copies of every address in `window` with `window`'s blocks.
    pub(crate) fn replace_window(&mut self, window: &BTreeMap<Address, Block>) {
        self.stash.retain(|address, _| !window.contains_key(address));
        self.stash
            .extend(window.iter().map(|(address, block)| (*address, block.clone())));
    }

    /// Rewrites every bucket on the `window` consecutive leaves starting at the global counter.
    ///
    /// Those buckets are first read into the stash, then refilled level by level from the leaves up,
    /// each with up to Z stash blocks whose tag for this tree passes through it.
    pub(crate) fn batch_evict<C: BlockCodec, R: RngCore + CryptoRng>(
        &mut self,
        counter: &GlobalCounter,
        window: u64,
        positions: &RangePositionMap,
        codec: &C,
        rng: &mut R,
    ) -> Result<(), OramError> {
        let start = counter.value();

        for level in 0..=self.shape.height {
            let spans = level_window(level, start, window);
            for block in self.read_level(level, &spans, positions, codec)? {
                merge_newer(&mut self.stash, block);
            }
        }

        for level in (0..=self.shape.height).rev() {
            let spans = level_window(level, start, window);
            let mut chosen = self.select_for_level(level, &spans)?;

            for span in &spans {
                let mut ciphertexts: Vec<Ciphertext> =
                    Vec::with_capacity(usize::try_from(span.length)? * self.shape.bucket_size);
                for node in span.first..span.first + span.length {
                    let addresses = chosen.remove(&node).unwrap_or_default();
                    let filled = addresses.len();
                    for address in addresses {
                        if let Some(block) = self.stash.remove(&address) {
                            ciphertexts.push(codec.encrypt_block(&PhysicalBlock::Real(block), rng)?);
                        }
                    }
                    for _ in filled..self.shape.bucket_size {
                        ciphertexts.push(codec.encrypt_dummy(rng)?);
                    }
                }
                self.physical_memory
                    .set_range(self.shape.slot_offset(level, span.first)?, ciphertexts)?;
            }
        }
        Ok(())
    }

    /// Picks, for every node of `spans`, up to Z stash blocks whose leaf for this tree lies below it.
    fn select_for_level(
        &self,
        level: u64,
        spans: &[LevelSpan],
    ) -> Result<BTreeMap<TreeIndex, Vec<Address>>, OramError> {
        let node_mask = (1u64 << level) - 1;
        let mut chosen: BTreeMap<TreeIndex, Vec<Address>> = BTreeMap::new();
        for (address, block) in &self.stash {
            let tag = *block.position_tags.get(self.granularity).ok_or_else(|| {
                OramError::MalformedBlockError(format!("block {address} lacks a tag"))
            })?;
            let node = tag & node_mask;
            let in_window = spans
                .iter()
                .any(|span| (span.first..span.first + span.length).contains(&node));
            if in_window {
                let bucket = chosen.entry(node).or_default();
                if bucket.len() < self.shape.bucket_size {
                    bucket.push(*address);
                }
            }
        }
        Ok(chosen)
    }
}
