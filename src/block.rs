// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Logical blocks as held by the client.

use crate::{utils::TreeIndex, Address, Payload};
use serde::{Deserialize, Serialize};

/// A real block: a payload together with the metadata the client needs to place it in a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The logical address of the block.
    pub id: Address,
    /// The user data.
    pub payload: Payload,
    /// One leaf per tree the block lives in. A Path ORAM block carries its target leaf;
    /// a Range ORAM block carries one tag per sub-ORAM.
    pub position_tags: Vec<TreeIndex>,
    /// Orders copies of the same block; larger is newer. Path ORAM never has more than one copy
    /// and leaves this at 0.
    pub version: u64,
}

impl Block {
    /// Returns a block with a single position tag.
    pub fn new(id: Address, payload: Payload, position: TreeIndex) -> Self {
        Self {
            id,
            payload,
            position_tags: vec![position],
            version: 0,
        }
    }
}

/// The content of one slot of a bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhysicalBlock {
    /// Filler occupying a slot without holding data.
    Dummy,
    /// A real block.
    Real(Block),
}

impl PhysicalBlock {
    /// Whether this slot holds filler.
    pub fn is_dummy(&self) -> bool {
        matches!(self, PhysicalBlock::Dummy)
    }

    /// Returns the real block, if any.
    pub fn into_block(self) -> Option<Block> {
        match self {
            PhysicalBlock::Dummy => None,
            PhysicalBlock::Real(block) => Some(block),
        }
    }
}
