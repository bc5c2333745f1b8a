// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of Range ORAM.

pub mod positions;
mod sub_oram;

use crate::{
    block::Block,
    codec::{BlockCodec, PlaintextCodec},
    config::RangeOramConfig,
    database::{BlockStore, MemoryStore},
    utils::{ceil_log2, TreeHeight, TreeShape},
    Address, Operation, OramError, Payload, RangeAccess,
};
use positions::{GlobalCounter, RangePositionMap};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use sub_oram::SubOram;

/// A Range ORAM.
///
/// Holds `l + 1 = ceil(log2 max_range) + 1` trees of height `h = ceil(log2 N)`, each storing every block.
/// Tree `i` keeps every aligned run of `2^i` addresses on consecutive leaves, so a range of
/// `r <= 2^i` blocks is served by reading two runs of tree `i`. The blocks read are then pushed
/// into the stash of every tree, and every tree evicts the same `2^(i+1)` consecutive leaves,
/// chosen by a counter shared across the trees.
///
/// Each block carries one leaf tag per tree and a version, and copies whose tags no longer match
/// the position map are ignored. See [`positions::RangePositionMap`].
#[derive(Debug)]
pub struct RangeOram<S: BlockStore = MemoryStore, C: BlockCodec = PlaintextCodec> {
    sub_orams: Vec<SubOram<S>>,
    positions: RangePositionMap,
    counter: GlobalCounter,
    codec: C,
    shape: TreeShape,
    block_count: Address,
    max_range: u64,
}

impl<S: BlockStore, C: BlockCodec> RangeOram<S, C> {
    /// Returns a new `RangeOram` with every tree filled with dummies.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidArgumentError` if `config.max_range` is out of range or the codec's block
    /// size differs from `config.block_bits`, and an `InvalidCapacityError` if the other parameters
    /// are invalid or a block cannot carry a payload next to its tags.
    pub fn new<R: RngCore + CryptoRng>(
        config: RangeOramConfig,
        codec: C,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let shape = config.validate()?;
        if codec.block_bytes() * 8 != config.block_bits {
            return Err(OramError::InvalidArgumentError(format!(
                "codec block size of {} bits does not match the configured {} bits",
                codec.block_bytes() * 8,
                config.block_bits
            )));
        }

        let granularity_count = usize::try_from(ceil_log2(config.max_range))? + 1;
        if codec.max_payload_bytes(granularity_count) == 0 {
            return Err(OramError::InvalidCapacityError {
                parameter_name: "block bits",
                parameter_value: u64::try_from(config.block_bits)?,
            });
        }

        log::info!(
            "RangeOram::new(block_count = {}, max_range = {}, height = {}, sub_orams = {})",
            config.block_count,
            config.max_range,
            shape.height,
            granularity_count
        );

        let positions = RangePositionMap::new(granularity_count, shape.height, rng)?;
        let sub_orams = (0..granularity_count)
            .map(|granularity| SubOram::new(granularity, shape, &codec, rng))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            sub_orams,
            positions,
            counter: GlobalCounter::default(),
            codec,
            shape,
            block_count: config.block_count,
            max_range: config.max_range,
        })
    }

    /// The depth of the leaves, shared by every tree.
    pub fn height(&self) -> TreeHeight {
        self.shape.height
    }

    /// The number of trees.
    pub fn sub_oram_count(&self) -> usize {
        self.sub_orams.len()
    }

    /// The total number of leaves evicted so far.
    pub fn global_counter(&self) -> u64 {
        self.counter.value()
    }

    /// The number of blocks in each tree's stash, by granularity.
    pub fn stash_occupancies(&self) -> Vec<usize> {
        self.sub_orams.iter().map(SubOram::stash_occupancy).collect()
    }

    /// The untrusted memory of each tree, by granularity.
    pub fn physical_memories(&self) -> impl Iterator<Item = &S> {
        self.sub_orams.iter().map(|sub_oram| &sub_oram.physical_memory)
    }

    /// The untrusted memory of each tree, by granularity.
    pub fn physical_memories_mut(&mut self) -> impl Iterator<Item = &mut S> {
        self.sub_orams
            .iter_mut()
            .map(|sub_oram| &mut sub_oram.physical_memory)
    }

    /// The codec used for every slot of every tree.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn check_request(
        &self,
        operation: Operation,
        address: Address,
        range: u64,
        new_payloads: Option<&Vec<Payload>>,
    ) -> Result<(), OramError> {
        if range == 0 {
            return Err(OramError::InvalidArgumentError(
                "a range holds at least one block".into(),
            ));
        }
        if range > self.max_range {
            return Err(OramError::RangeTooLargeError {
                range,
                maximum: self.max_range,
            });
        }
        match address.checked_add(range) {
            Some(end) if end <= self.block_count => {}
            _ => {
                return Err(OramError::AddressOutOfBoundsError {
                    attempted: address.saturating_add(range - 1),
                    capacity: self.block_count,
                })
            }
        }

        match (operation, new_payloads) {
            (Operation::Read, None) => Ok(()),
            (Operation::Read, Some(_)) => Err(OramError::InvalidArgumentError(
                "a read takes no payloads".into(),
            )),
            (Operation::Write, None) => Err(OramError::InvalidArgumentError(
                "a write requires payloads".into(),
            )),
            (Operation::Write, Some(payloads)) => {
                if u64::try_from(payloads.len())? != range {
                    return Err(OramError::InvalidArgumentError(format!(
                        "{} payloads given for a range of {}",
                        payloads.len(),
                        range
                    )));
                }
                let capacity = self.codec.max_payload_bytes(self.sub_orams.len());
                match payloads.iter().find(|payload| payload.len() > capacity) {
                    Some(payload) => Err(OramError::PayloadTooLargeError {
                        size: payload.len(),
                        capacity,
                    }),
                    None => Ok(()),
                }
            }
        }
    }

    /// Reads the runs at `bases` from tree `granularity`, filling in never-written addresses with empty payloads.
    fn read_window<R: RngCore + CryptoRng>(
        &mut self,
        granularity: usize,
        bases: &[Address],
        rng: &mut R,
    ) -> Result<BTreeMap<Address, Block>, OramError> {
        let run = 1u64 << granularity;
        let version = self.counter.value();
        let mut window = BTreeMap::new();

        for base in bases {
            let (found, _) = self.sub_orams[granularity].read_range(
                *base,
                &mut self.positions,
                &self.codec,
                rng,
            )?;
            window.extend(found);
            for address in *base..(*base + run).min(self.block_count) {
                window
                    .entry(address)
                    .or_insert_with(|| Block::new(address, Payload::new(), 0));
            }
        }

        for (address, block) in window.iter_mut() {
            block.position_tags = self.positions.tags(*address)?;
            block.version = version;
        }
        Ok(window)
    }
}

impl<S: BlockStore, C: BlockCodec> RangeAccess for RangeOram<S, C> {
    fn block_capacity(&self) -> Address {
        self.block_count
    }

    fn max_range(&self) -> u64 {
        self.max_range
    }

    fn access_range<R: RngCore + CryptoRng>(
        &mut self,
        operation: Operation,
        address: Address,
        range: u64,
        new_payloads: Option<Vec<Payload>>,
        rng: &mut R,
    ) -> Result<BTreeMap<Address, Payload>, OramError> {
        self.check_request(operation, address, range, new_payloads.as_ref())?;

        let granularity = usize::try_from(ceil_log2(range))?;
        let run = 1u64 << granularity;
        let base = address & !(run - 1);
        let buddy = (base + run) & (self.shape.leaf_count() - 1);
        let bases = if buddy == base {
            vec![base]
        } else {
            vec![base, buddy]
        };
        log::debug!(
            "RangeOram::access_range({:?}, {}, {}) reading runs {:?} of tree {}",
            operation,
            address,
            range,
            bases,
            granularity
        );

        let mut window = self.read_window(granularity, &bases, rng)?;

        let requested = address..address + range;
        let mut result = BTreeMap::new();
        for address in requested.clone() {
            let block = window
                .get(&address)
                .ok_or(OramError::MissingBlockError { address })?;
            result.insert(address, block.payload.clone());
        }
        if let Some(payloads) = new_payloads {
            for (address, payload) in requested.zip(payloads) {
                if let Some(block) = window.get_mut(&address) {
                    block.payload = payload;
                }
            }
        }

        let evicted_leaves = 2 * run;
        for sub_oram in self.sub_orams.iter_mut() {
            sub_oram.replace_window(&window);
            sub_oram.batch_evict(
                &self.counter,
                evicted_leaves,
                &self.positions,
                &self.codec,
                rng,
            )?;
        }
        self.counter.advance(evicted_leaves);

        Ok(result)
    }
}
