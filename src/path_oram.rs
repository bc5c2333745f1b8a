// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of Path ORAM.

use crate::{
    codec::{BlockCodec, PlaintextCodec},
    config::OramConfig,
    database::{BlockStore, MemoryStore},
    position_map::{
        entries_per_chunk, recursion_depth_limit, InMemoryPositionMap, PositionMap,
        RecursivePositionMap,
    },
    stash::Stash,
    utils::{CompleteBinaryTreeIndex, TreeHeight, TreeIndex, TreeShape},
    Address, Operation, Oram, OramError, Payload,
};
use rand::{CryptoRng, RngCore};

/// A Path ORAM.
///
/// ## Parameters
///
/// - Store `S`: the untrusted memory holding the tree, `(2^(L+1) - 1) * Z` ciphertext slots.
/// - Codec `C`: encrypts blocks into fixed-size ciphertexts.
/// - [`OramConfig`]: the block count N, tree height L, block size B and bucket size Z.
///
/// Each access reads one root-to-leaf path into the stash and writes it back, leaf first,
/// packing every bucket with as many stash blocks as may legally live there.
///
/// ## Security
///
/// Every access remaps its block to a fresh uniformly random leaf, so the sequence of paths
/// touched is independent of the sequence of addresses. With Z = 4 the stash stays small
/// with overwhelming probability; it is not bounded, and an unusually large stash is
/// visible only to the client.
#[derive(Debug)]
pub struct PathOram<S: BlockStore = MemoryStore, C: BlockCodec = PlaintextCodec> {
    /// The underlying untrusted memory that the ORAM is obliviously accessing on behalf of its client.
    pub physical_memory: S,
    /// The Path ORAM stash.
    stash: Stash,
    /// The Path ORAM position map.
    position_map: PositionMap<S, C>,
    codec: C,
    shape: TreeShape,
    block_count: Address,
}

impl<S: BlockStore, C: BlockCodec> PathOram<S, C> {
    /// Returns a new `PathOram` for `config.block_count` blocks, with the position map held in memory.
    /// No address holds a block until it is first written.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidCapacityError` if `config` is invalid (see [`OramConfig::validate`]),
    /// and an `InvalidArgumentError` if the codec's block size differs from `config.block_bits`.
    pub fn new<R: RngCore + CryptoRng>(
        config: OramConfig,
        codec: C,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let shape = Self::check_config(&config, &codec)?;
        log::info!(
            "PathOram::new(block_count = {}, height = {}, bucket_size = {})",
            config.block_count,
            shape.height,
            shape.bucket_size
        );

        let position_map = PositionMap::InMemory(InMemoryPositionMap::new(
            config.block_count,
            shape.height,
            rng,
        )?);
        Self::with_position_map(config.block_count, shape, codec, position_map, rng)
    }

    /// Returns a new `PathOram` whose position map is stored in a chain of smaller Path ORAMs.
    ///
    /// Each level packs `E = floor(payload bits / (ceil(log2 N) + L))` position entries per block.
    /// The chain ends with an in-memory map once a level would need at most one block.
    ///
    /// # Errors
    ///
    /// As [`PathOram::new`], and an `InvalidCapacityError` if a block cannot hold two position entries.
    pub fn new_recursive<R: RngCore + CryptoRng>(
        config: OramConfig,
        codec: C,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let shape = Self::check_config(&config, &codec)?;
        let per_chunk = entries_per_chunk(&codec, config.block_count, shape.height)?;
        let depth_limit = recursion_depth_limit(config.block_count, per_chunk);
        Self::new_recursive_with_limit(config, codec, rng, depth_limit)
    }

    fn new_recursive_with_limit<R: RngCore + CryptoRng>(
        config: OramConfig,
        codec: C,
        rng: &mut R,
        depth_limit: u64,
    ) -> Result<Self, OramError> {
        let shape = Self::check_config(&config, &codec)?;
        let per_chunk = entries_per_chunk(&codec, config.block_count, shape.height)?;
        let chunk_count = config.block_count.div_ceil(per_chunk);

        if chunk_count <= 1 {
            return Self::new(config, codec, rng);
        }
        if depth_limit == 0 {
            return Err(OramError::InvalidCapacityError {
                parameter_name: "position map recursion depth",
                parameter_value: config.block_count,
            });
        }

        log::info!(
            "PathOram::new_recursive(block_count = {}, height = {}, entries_per_chunk = {}, chunks = {})",
            config.block_count,
            shape.height,
            per_chunk,
            chunk_count
        );

        let chunk_config = OramConfig {
            block_count: chunk_count,
            height: None,
            ..config
        };
        let chunk_oram =
            Self::new_recursive_with_limit(chunk_config, codec.clone(), rng, depth_limit - 1)?;
        let mut position_map = PositionMap::Recursive(Box::new(RecursivePositionMap::new(
            chunk_oram,
            config.block_count,
            shape.height,
            per_chunk,
        )?));
        position_map.initialize(rng)?;

        Self::with_position_map(config.block_count, shape, codec, position_map, rng)
    }

    fn check_config(config: &OramConfig, codec: &C) -> Result<TreeShape, OramError> {
        let shape = config.validate()?;
        if codec.block_bytes() * 8 != config.block_bits {
            return Err(OramError::InvalidArgumentError(format!(
                "codec block size of {} bits does not match the configured {} bits",
                codec.block_bytes() * 8,
                config.block_bits
            )));
        }
        Ok(shape)
    }

    fn with_position_map<R: RngCore + CryptoRng>(
        block_count: Address,
        shape: TreeShape,
        codec: C,
        position_map: PositionMap<S, C>,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let mut physical_memory = S::new(shape.slot_count()?)?;
        let dummies = (0..shape.slot_count()?)
            .map(|_| codec.encrypt_dummy(rng))
            .collect::<Result<Vec<_>, _>>()?;
        physical_memory.set_range(0, dummies)?;

        Ok(Self {
            physical_memory,
            stash: Stash::new(),
            position_map,
            codec,
            shape,
            block_count,
        })
    }

    /// The depth of the leaves.
    pub fn height(&self) -> TreeHeight {
        self.shape.height
    }

    /// The number of nested ORAMs holding the position map.
    pub fn recursion_height(&self) -> usize {
        self.position_map.recursion_height()
    }

    /// The number of blocks currently held in the stash.
    pub fn stash_occupancy(&self) -> usize {
        self.stash.occupancy()
    }

    /// The codec used for every slot of the tree.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn check_request(
        &self,
        operation: Operation,
        address: Address,
        new_payload: Option<&Payload>,
    ) -> Result<(), OramError> {
        if address >= self.block_count {
            return Err(OramError::AddressOutOfBoundsError {
                attempted: address,
                capacity: self.block_count,
            });
        }
        match (operation, new_payload) {
            (Operation::Read, None) => Ok(()),
            (Operation::Read, Some(_)) => Err(OramError::InvalidArgumentError(
                "a read takes no payload".into(),
            )),
            (Operation::Write, None) => Err(OramError::InvalidArgumentError(
                "a write requires a payload".into(),
            )),
            (Operation::Write, Some(payload)) => {
                let capacity = self.codec.max_payload_bytes(1);
                if payload.len() > capacity {
                    return Err(OramError::PayloadTooLargeError {
                        size: payload.len(),
                        capacity,
                    });
                }
                Ok(())
            }
        }
    }
}

impl<S: BlockStore, C: BlockCodec> Oram for PathOram<S, C> {
    fn access<R: RngCore + CryptoRng>(
        &mut self,
        operation: Operation,
        address: Address,
        new_payload: Option<Payload>,
        rng: &mut R,
    ) -> Result<Option<Payload>, OramError> {
        self.check_request(operation, address, new_payload.as_ref())?;

        // Get the position of the target block, and remap it to a fresh random leaf.
        let new_position = TreeIndex::random_leaf(self.shape.height, rng);
        let position = self
            .position_map
            .get_and_set(address, new_position, rng)?;
        log::debug!(
            "PathOram::access({:?}, {}) reading path {}",
            operation,
            address,
            position
        );

        self.stash
            .read_from_path(&mut self.physical_memory, &self.codec, &self.shape, position)?;

        let result = self
            .stash
            .access(operation, address, new_payload, new_position);

        // Evict blocks from the stash into the path that was just read.
        self.stash.write_to_path(
            &mut self.physical_memory,
            &self.codec,
            &self.shape,
            position,
            rng,
        )?;

        match (operation, result) {
            (Operation::Read, None) => Err(OramError::MissingBlockError { address }),
            (_, result) => Ok(result),
        }
    }

    fn block_capacity(&self) -> Address {
        self.block_count
    }
}
