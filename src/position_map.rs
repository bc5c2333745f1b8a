// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A recursive Path ORAM position map data structure.

use crate::{
    codec::BlockCodec,
    database::BlockStore,
    path_oram::PathOram,
    utils::{ceil_log2, CompleteBinaryTreeIndex, TreeHeight, TreeIndex},
    Address, Operation, Oram, OramError, Payload,
};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

const CHUNK_LENGTH_BYTES: usize = 4;

/// Maps each block address to the leaf its block is headed for.
#[derive(Debug)]
pub enum PositionMap<S: BlockStore, C: BlockCodec> {
    /// A table held by the client.
    InMemory(InMemoryPositionMap),
    /// A table stored in chunks inside a smaller Path ORAM, whose own position map may again be recursive.
    Recursive(Box<RecursivePositionMap<S, C>>),
}

impl<S: BlockStore, C: BlockCodec> PositionMap<S, C> {
    /// Returns the leaf currently assigned to `address` and assigns `new_leaf` in its place.
    pub fn get_and_set<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        new_leaf: TreeIndex,
        rng: &mut R,
    ) -> Result<TreeIndex, OramError> {
        match self {
            PositionMap::InMemory(map) => map.get_and_set(address, new_leaf),
            PositionMap::Recursive(map) => map.get_and_set(address, new_leaf, rng),
        }
    }

    /// Assigns every leaf in `updates`.
    pub fn set_many<R: RngCore + CryptoRng>(
        &mut self,
        updates: &BTreeMap<Address, TreeIndex>,
        rng: &mut R,
    ) -> Result<(), OramError> {
        match self {
            PositionMap::InMemory(map) => map.set_many(updates),
            PositionMap::Recursive(map) => map.set_many(updates, rng),
        }
    }

    /// Assigns a fresh uniformly random leaf to every address.
    pub fn initialize<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), OramError> {
        match self {
            PositionMap::InMemory(map) => {
                map.initialize(rng);
                Ok(())
            }
            PositionMap::Recursive(map) => map.initialize(rng),
        }
    }

    /// The number of nested ORAMs below this map.
    pub fn recursion_height(&self) -> usize {
        match self {
            PositionMap::InMemory(_) => 0,
            PositionMap::Recursive(map) => 1 + map.oram.recursion_height(),
        }
    }
}

/// The base case: one leaf per address, held by the client.
#[derive(Debug)]
pub struct InMemoryPositionMap {
    leaves: Vec<TreeIndex>,
    height: TreeHeight,
}

impl InMemoryPositionMap {
    /// Returns a map over `block_count` addresses with uniformly random leaves of a tree of height `height`.
    pub fn new<R: RngCore + CryptoRng>(
        block_count: Address,
        height: TreeHeight,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let mut result = Self {
            leaves: vec![0; usize::try_from(block_count)?],
            height,
        };
        result.initialize(rng);
        Ok(result)
    }

    fn slot(&mut self, address: Address) -> Result<&mut TreeIndex, OramError> {
        let capacity = Address::try_from(self.leaves.len())?;
        self.leaves
            .get_mut(usize::try_from(address)?)
            .ok_or(OramError::AddressOutOfBoundsError {
                attempted: address,
                capacity,
            })
    }

    fn get_and_set(&mut self, address: Address, new_leaf: TreeIndex) -> Result<TreeIndex, OramError> {
        debug_assert!(new_leaf.is_leaf(self.height));
        Ok(std::mem::replace(self.slot(address)?, new_leaf))
    }

    fn set_many(&mut self, updates: &BTreeMap<Address, TreeIndex>) -> Result<(), OramError> {
        for (address, leaf) in updates {
            debug_assert!(leaf.is_leaf(self.height));
            *self.slot(*address)? = *leaf;
        }
        Ok(())
    }

    fn initialize<R: RngCore + CryptoRng>(&mut self, rng: &mut R) {
        for leaf in self.leaves.iter_mut() {
            *leaf = TreeIndex::random_leaf(self.height, rng);
        }
    }
}

/// A position map stored in a nested Path ORAM.
///
/// The table is cut into chunks of `entries_per_chunk` consecutive addresses.
/// Chunk `c` is block `c` of the nested ORAM, holding bit-packed `(address, leaf)` pairs.
#[derive(Debug)]
pub struct RecursivePositionMap<S: BlockStore, C: BlockCodec> {
    oram: PathOram<S, C>,
    block_count: Address,
    entries_per_chunk: u64,
    address_bits: u32,
    leaf_bits: u32,
}

impl<S: BlockStore, C: BlockCodec> RecursivePositionMap<S, C> {
    /// Wraps `oram`, which must hold at least `chunk_count(block_count, ...)` blocks.
    /// The map is empty until [`RecursivePositionMap::initialize`] is called.
    pub(crate) fn new(
        oram: PathOram<S, C>,
        block_count: Address,
        height: TreeHeight,
        entries_per_chunk: u64,
    ) -> Result<Self, OramError> {
        Ok(Self {
            oram,
            block_count,
            entries_per_chunk,
            address_bits: u32::try_from(ceil_log2(block_count))?,
            leaf_bits: u32::try_from(height)?,
        })
    }

    fn chunk_of(&self, address: Address) -> Result<Address, OramError> {
        if address >= self.block_count {
            return Err(OramError::AddressOutOfBoundsError {
                attempted: address,
                capacity: self.block_count,
            });
        }
        Ok(address / self.entries_per_chunk)
    }

    fn read_chunk<R: RngCore + CryptoRng>(
        &mut self,
        chunk: Address,
        rng: &mut R,
    ) -> Result<Vec<(Address, TreeIndex)>, OramError> {
        match self.oram.access(Operation::Read, chunk, None, rng) {
            Ok(Some(payload)) => self.unpack(&payload),
            Ok(None) | Err(OramError::MissingBlockError { .. }) => Ok(Vec::new()),
            Err(error) => Err(error),
        }
    }

    fn write_chunk<R: RngCore + CryptoRng>(
        &mut self,
        chunk: Address,
        entries: &[(Address, TreeIndex)],
        rng: &mut R,
    ) -> Result<(), OramError> {
        let payload = self.pack(entries)?;
        self.oram
            .access(Operation::Write, chunk, Some(payload), rng)?;
        Ok(())
    }

    fn get_and_set<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        new_leaf: TreeIndex,
        rng: &mut R,
    ) -> Result<TreeIndex, OramError> {
        let chunk = self.chunk_of(address)?;
        log::debug!(
            "Level {} position map: get_and_set({}) in chunk {}",
            self.oram.recursion_height(),
            address,
            chunk
        );
        let mut entries = self.read_chunk(chunk, rng)?;

        // Scan the whole chunk so the client's own memory accesses do not depend on the address.
        let mut old_leaf = TreeIndex::random_leaf(self.leaf_bits.into(), rng);
        let mut found = Choice::from(0);
        for (entry_address, entry_leaf) in entries.iter_mut() {
            let is_target = entry_address.ct_eq(&address);
            old_leaf.conditional_assign(entry_leaf, is_target);
            entry_leaf.conditional_assign(&new_leaf, is_target);
            found |= is_target;
        }
        if !bool::from(found) {
            entries.push((address, new_leaf));
        }

        self.write_chunk(chunk, &entries, rng)?;
        Ok(old_leaf)
    }

    fn set_many<R: RngCore + CryptoRng>(
        &mut self,
        updates: &BTreeMap<Address, TreeIndex>,
        rng: &mut R,
    ) -> Result<(), OramError> {
        let mut by_chunk: BTreeMap<Address, Vec<(Address, TreeIndex)>> = BTreeMap::new();
        for (address, leaf) in updates {
            by_chunk
                .entry(self.chunk_of(*address)?)
                .or_default()
                .push((*address, *leaf));
        }

        for (chunk, chunk_updates) in by_chunk {
            let mut entries: BTreeMap<Address, TreeIndex> =
                self.read_chunk(chunk, rng)?.into_iter().collect();
            entries.extend(chunk_updates);
            let entries: Vec<_> = entries.into_iter().collect();
            self.write_chunk(chunk, &entries, rng)?;
        }
        Ok(())
    }

    fn initialize<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), OramError> {
        let chunk_count = self.block_count.div_ceil(self.entries_per_chunk);
        for chunk in 0..chunk_count {
            let first = chunk * self.entries_per_chunk;
            let last = (first + self.entries_per_chunk).min(self.block_count);
            let entries: Vec<_> = (first..last)
                .map(|address| {
                    (
                        address,
                        TreeIndex::random_leaf(self.leaf_bits.into(), rng),
                    )
                })
                .collect();
            self.write_chunk(chunk, &entries, rng)?;
        }
        Ok(())
    }

    fn pack(&self, entries: &[(Address, TreeIndex)]) -> Result<Payload, OramError> {
        let mut writer = BitWriter::default();
        for (address, leaf) in entries {
            writer.push(*address, self.address_bits);
            writer.push(*leaf, self.leaf_bits);
        }
        let mut payload = u32::try_from(entries.len())?.to_le_bytes().to_vec();
        payload.extend(writer.bytes);
        Ok(payload)
    }

    fn unpack(&self, payload: &[u8]) -> Result<Vec<(Address, TreeIndex)>, OramError> {
        let (length, packed) = payload
            .split_first_chunk::<CHUNK_LENGTH_BYTES>()
            .ok_or_else(|| OramError::MalformedBlockError("truncated position chunk".into()))?;
        let mut reader = BitReader {
            bytes: packed,
            position: 0,
        };
        (0..u32::from_le_bytes(*length))
            .map(|_| Ok((reader.pull(self.address_bits)?, reader.pull(self.leaf_bits)?)))
            .collect()
    }
}

/// The number of `(address, leaf)` pairs that fit in one nested block.
///
/// Each pair takes `ceil(log2 N) + L` bits.
pub(crate) fn entries_per_chunk<C: BlockCodec>(
    codec: &C,
    block_count: Address,
    height: TreeHeight,
) -> Result<u64, OramError> {
    let payload_bits = u64::try_from(
        codec
            .max_payload_bytes(1)
            .saturating_sub(CHUNK_LENGTH_BYTES)
            * 8,
    )?;
    let entry_bits = (ceil_log2(block_count) + height).max(1);
    let entries = payload_bits / entry_bits;
    if entries < 2 {
        return Err(OramError::InvalidCapacityError {
            parameter_name: "position map entries per block",
            parameter_value: entries,
        });
    }
    Ok(entries)
}

/// An upper bound on the number of nested position maps for `block_count` addresses.
pub(crate) fn recursion_depth_limit(block_count: Address, entries_per_chunk: u64) -> u64 {
    let mut remaining = block_count;
    let mut depth = 1;
    while remaining > 1 {
        remaining = remaining.div_ceil(entries_per_chunk.max(2));
        depth += 1;
    }
    depth
}

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    length: usize,
}

impl BitWriter {
    fn push(&mut self, value: u64, bits: u32) {
        for i in 0..bits {
            if self.length % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                if let Some(last) = self.bytes.last_mut() {
                    *last |= 1 << (self.length % 8);
                }
            }
            self.length += 1;
        }
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl BitReader<'_> {
    fn pull(&mut self, bits: u32) -> Result<u64, OramError> {
        let mut value = 0;
        for i in 0..bits {
            let byte = self.bytes.get(self.position / 8).ok_or_else(|| {
                OramError::MalformedBlockError("truncated position chunk".into())
            })?;
            value |= u64::from((byte >> (self.position % 8)) & 1) << i;
            self.position += 1;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::PlaintextCodec,
        database::{BlockStore, CountAccessesStore, MemoryStore},
        test_utils::init_logger,
        OramConfig,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const BLOCK_BITS: usize = 512;

    fn recursive_map<S: BlockStore>(
        block_count: Address,
        height: TreeHeight,
        rng: &mut StdRng,
    ) -> RecursivePositionMap<S, PlaintextCodec> {
        let codec = PlaintextCodec::new(BLOCK_BITS).unwrap();
        let per_chunk = entries_per_chunk(&codec, block_count, height).unwrap();
        let config = OramConfig::new(block_count.div_ceil(per_chunk)).with_block_bits(BLOCK_BITS);
        let oram = PathOram::new(config, codec, rng).unwrap();
        let mut map = RecursivePositionMap::new(oram, block_count, height, per_chunk).unwrap();
        map.initialize(rng).unwrap();
        map
    }

    #[test]
    fn entries_per_chunk_formula() {
        let codec = PlaintextCodec::new(BLOCK_BITS).unwrap();
        // 64 - 40 - 8 - 4 = 12 payload bytes = 96 bits; 14 + 12 bits per entry.
        assert_eq!(entries_per_chunk(&codec, 10_000, 12).unwrap(), 3);
        assert_eq!(entries_per_chunk(&codec, 1, 0).unwrap(), 96);

        let wide = PlaintextCodec::new(1024).unwrap();
        // 128 - 40 - 8 - 4 = 76 payload bytes = 608 bits.
        assert_eq!(entries_per_chunk(&wide, 10_000, 12).unwrap(), 23);

        let tiny = PlaintextCodec::new(8 * crate::codec::MINIMUM_BLOCK_BYTES).unwrap();
        assert!(matches!(
            entries_per_chunk(&tiny, 1 << 20, 20),
            Err(OramError::InvalidCapacityError { .. })
        ));
    }

    #[test]
    fn depth_limit() {
        assert_eq!(recursion_depth_limit(1, 9), 1);
        assert_eq!(recursion_depth_limit(9, 9), 2);
        assert_eq!(recursion_depth_limit(10, 9), 3);
        assert_eq!(recursion_depth_limit(10_000, 9), 6);
    }

    #[test]
    fn bit_packing_round_trip() {
        let mut writer = BitWriter::default();
        let values = [(5u64, 3u32), (0, 0), (1023, 10), (1, 1), (0x1234_5678_9abc, 48)];
        for (value, bits) in values {
            writer.push(value, bits);
        }
        assert_eq!(writer.bytes.len(), 8);
        let mut reader = BitReader {
            bytes: &writer.bytes,
            position: 0,
        };
        for (value, bits) in values {
            assert_eq!(reader.pull(bits).unwrap(), value);
        }
        assert!(reader.pull(8).is_err());
    }

    #[test]
    fn in_memory_get_and_set() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut map = InMemoryPositionMap::new(16, 3, &mut rng).unwrap();
        assert!(map.leaves.iter().all(|leaf| leaf.is_leaf(3)));

        let first = map.get_and_set(5, 6).unwrap();
        assert!(first.is_leaf(3));
        assert_eq!(map.get_and_set(5, 2).unwrap(), 6);
        assert!(matches!(
            map.get_and_set(16, 0),
            Err(OramError::AddressOutOfBoundsError { .. })
        ));

        map.set_many(&BTreeMap::from([(0, 1), (5, 7)])).unwrap();
        assert_eq!(map.get_and_set(0, 0).unwrap(), 1);
        assert_eq!(map.get_and_set(5, 0).unwrap(), 7);
    }

    #[test]
    fn recursive_map_tracks_a_mirror() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(0);
        let block_count = 100;
        let height = 6;
        let mut map = recursive_map::<MemoryStore>(block_count, height, &mut rng);
        let mut mirror: Vec<Option<TreeIndex>> = vec![None; 100];

        for _ in 0..300 {
            let address = rng.gen_range(0..block_count);
            let new_leaf = TreeIndex::random_leaf(height, &mut rng);
            let old_leaf = map.get_and_set(address, new_leaf, &mut rng).unwrap();
            assert!(old_leaf.is_leaf(height));
            let slot = &mut mirror[usize::try_from(address).unwrap()];
            if let Some(expected) = slot {
                assert_eq!(old_leaf, *expected);
            }
            *slot = Some(new_leaf);
        }
    }

    #[test]
    fn recursive_set_many_sets_every_entry() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut map = recursive_map::<MemoryStore>(50, 5, &mut rng);
        let updates: BTreeMap<Address, TreeIndex> =
            (0..50).step_by(3).map(|address| (address, address % 32)).collect();
        map.set_many(&updates, &mut rng).unwrap();
        for (address, leaf) in &updates {
            assert_eq!(map.get_and_set(*address, 0, &mut rng).unwrap(), *leaf);
        }
        assert!(map.set_many(&BTreeMap::from([(50, 0)]), &mut rng).is_err());
    }

    #[test]
    fn recursive_set_many_reads_and_writes_each_chunk_once() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut map = recursive_map::<CountAccessesStore>(50, 5, &mut rng);
        let per_chunk = map.entries_per_chunk;

        // Updates spread over chunks 0, 1 and 3, several per chunk.
        let addresses = [0, 1, per_chunk - 1, per_chunk + 2, 3 * per_chunk, 3 * per_chunk + 1];
        let updates: BTreeMap<Address, TreeIndex> =
            addresses.iter().map(|address| (*address, address % 32)).collect();
        let chunks_touched = 3;
        let path_slots = (map.oram.height() + 1) * 4;
        map.oram.physical_memory.reset_counts();

        map.set_many(&updates, &mut rng).unwrap();
        assert_eq!(
            map.oram.physical_memory.get_read_count(),
            2 * chunks_touched * path_slots
        );
        assert_eq!(
            map.oram.physical_memory.get_write_count(),
            2 * chunks_touched * path_slots
        );

        for (address, leaf) in &updates {
            assert_eq!(map.get_and_set(*address, 0, &mut rng).unwrap(), *leaf);
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn in_memory_rejects_leaves_outside_the_tree() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut map = InMemoryPositionMap::new(16, 3, &mut rng).unwrap();
        let _ = map.get_and_set(2, 8);
    }
}
