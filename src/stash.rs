// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM stash.

use crate::{
    block::{Block, PhysicalBlock},
    codec::BlockCodec,
    database::BlockStore,
    utils::{CompleteBinaryTreeIndex, TreeIndex, TreeShape},
    Address, Operation, OramError, Payload,
};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;

/// A block held by the client, together with the leaf it is headed for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StashEntry {
    /// The user data.
    pub payload: Payload,
    /// The target leaf.
    pub position: TreeIndex,
}

/// Client-side holding area for blocks read from the tree and not yet written back.
///
/// Entries are kept ordered by address, so eviction is deterministic given the stash contents.
#[derive(Debug, Default)]
pub struct Stash {
    entries: BTreeMap<Address, StashEntry>,
}

impl Stash {
    /// Returns an empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of real blocks held.
    pub fn occupancy(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry for `address`, if held.
    pub fn get(&self, address: Address) -> Option<&StashEntry> {
        self.entries.get(&address)
    }

    /// Reads every bucket on the path to `leaf`, root first, and adds the real blocks found
    /// to the stash. Blocks already in the stash are left untouched.
    pub fn read_from_path<S: BlockStore, C: BlockCodec>(
        &mut self,
        physical_memory: &mut S,
        codec: &C,
        shape: &TreeShape,
        leaf: TreeIndex,
    ) -> Result<(), OramError> {
        let bucket_size = Address::try_from(shape.bucket_size)?;
        for level in 0..=shape.height {
            let offset = shape.bucket_offset(leaf, level)?;
            for ciphertext in physical_memory.get_range(offset, offset + bucket_size)? {
                if let PhysicalBlock::Real(block) = codec.decrypt_block(&ciphertext)? {
                    let position = *block.position_tags.first().ok_or_else(|| {
                        OramError::MalformedBlockError(format!(
                            "block {} carries no position",
                            block.id
                        ))
                    })?;
                    self.entries.entry(block.id).or_insert(StashEntry {
                        payload: block.payload,
                        position,
                    });
                }
            }
        }
        Ok(())
    }

    /// Serves a request for `address` from the stash and moves the block to `new_position`.
    ///
    /// Returns the payload held before the request, or `None` if the block is not in the stash.
    /// A write inserts the block if it is absent; a read of an absent block changes nothing.
    pub fn access(
        &mut self,
        operation: Operation,
        address: Address,
        new_payload: Option<Payload>,
        new_position: TreeIndex,
    ) -> Option<Payload> {
        match (operation, new_payload) {
            (Operation::Write, Some(payload)) => self
                .entries
                .insert(
                    address,
                    StashEntry {
                        payload,
                        position: new_position,
                    },
                )
                .map(|old| old.payload),
            _ => self.entries.get_mut(&address).map(|entry| {
                entry.position = new_position;
                entry.payload.clone()
            }),
        }
    }

    /// Writes the path to `leaf` back, leaf first.
    ///
    /// Each bucket receives up to Z stash blocks whose target path passes through it,
    /// and is padded with freshly encrypted dummies. Blocks written out leave the stash.
    pub fn write_to_path<S: BlockStore, C: BlockCodec, R: RngCore + CryptoRng>(
        &mut self,
        physical_memory: &mut S,
        codec: &C,
        shape: &TreeShape,
        leaf: TreeIndex,
        rng: &mut R,
    ) -> Result<(), OramError> {
        for level in (0..=shape.height).rev() {
            let node = leaf.node_on_path(level, shape.height);
            let chosen: Vec<Address> = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.position.node_on_path(level, shape.height) == node)
                .map(|(address, _)| *address)
                .take(shape.bucket_size)
                .collect();

            let mut bucket = Vec::with_capacity(shape.bucket_size);
            for address in chosen {
                if let Some(entry) = self.entries.remove(&address) {
                    let block = Block::new(address, entry.payload, entry.position);
                    bucket.push(codec.encrypt_block(&PhysicalBlock::Real(block), rng)?);
                }
            }
            while bucket.len() < shape.bucket_size {
                bucket.push(codec.encrypt_dummy(rng)?);
            }

            physical_memory.set_range(shape.bucket_offset(leaf, level)?, bucket)?;
        }
        Ok(())
    }
}
