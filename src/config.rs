// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Construction parameters.

use crate::{
    codec::MINIMUM_BLOCK_BYTES,
    utils::{ceil_log2, TreeHeight, TreeShape},
    Address, BlockBits, BucketSize, OramError, DEFAULT_BLOCKS_PER_BUCKET, DEFAULT_BLOCK_BITS,
};

/// Parameters of a Path ORAM.
///
/// - `block_count` (N): the number of addressable blocks.
/// - `height` (L): the depth of the leaves. When absent, `ceil(log2(ceil(N / Z)))`.
/// - `block_bits` (B): the size of a block plaintext in bits; must be a multiple of 8.
/// - `bucket_size` (Z): the number of block slots per bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OramConfig {
    /// The number of addressable blocks.
    pub block_count: Address,
    /// The tree height, if fixed by the caller.
    pub height: Option<TreeHeight>,
    /// The size of a block plaintext, in bits.
    pub block_bits: BlockBits,
    /// The number of blocks per bucket.
    pub bucket_size: BucketSize,
}

impl OramConfig {
    /// Returns a configuration for `block_count` blocks with default B and Z and a derived height.
    pub fn new(block_count: Address) -> Self {
        Self {
            block_count,
            height: None,
            block_bits: DEFAULT_BLOCK_BITS,
            bucket_size: DEFAULT_BLOCKS_PER_BUCKET,
        }
    }

    /// Fixes the tree height.
    pub fn with_height(mut self, height: TreeHeight) -> Self {
        self.height = Some(height);
        self
    }

    /// Sets the block plaintext size in bits.
    pub fn with_block_bits(mut self, block_bits: BlockBits) -> Self {
        self.block_bits = block_bits;
        self
    }

    /// Sets the number of blocks per bucket.
    pub fn with_bucket_size(mut self, bucket_size: BucketSize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    /// Checks the parameters and returns the shape of the resulting tree.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidCapacityError` if N or Z is zero, if B is not a whole number of bytes
    /// or cannot hold a block header, or if the tree cannot hold N blocks.
    pub fn validate(&self) -> Result<TreeShape, OramError> {
        if self.block_count == 0 {
            return Err(OramError::InvalidCapacityError {
                parameter_name: "block count",
                parameter_value: 0,
            });
        }
        validate_block_bits(self.block_bits)?;

        let bucket_size = u64::try_from(self.bucket_size)?;
        let height = match self.height {
            Some(height) => height,
            None => ceil_log2(self.block_count.div_ceil(bucket_size.max(1))),
        };
        let shape = TreeShape::new(height, self.bucket_size)?;

        if self.block_count > shape.slot_count()? {
            return Err(OramError::InvalidCapacityError {
                parameter_name: "block count",
                parameter_value: self.block_count,
            });
        }
        Ok(shape)
    }
}

/// Parameters of a Range ORAM.
///
/// Every sub-ORAM tree has `2^ceil(log2 N)` leaves regardless of Z.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeOramConfig {
    /// The number of addressable blocks.
    pub block_count: Address,
    /// The largest range that can be accessed at once.
    pub max_range: u64,
    /// The size of a block plaintext, in bits.
    pub block_bits: BlockBits,
    /// The number of blocks per bucket.
    pub bucket_size: BucketSize,
}

impl RangeOramConfig {
    /// Returns a configuration for `block_count` blocks accepting ranges up to the whole address space.
    pub fn new(block_count: Address) -> Self {
        Self {
            block_count,
            max_range: block_count,
            block_bits: DEFAULT_BLOCK_BITS,
            bucket_size: DEFAULT_BLOCKS_PER_BUCKET,
        }
    }

    /// Sets the largest accepted range.
    pub fn with_max_range(mut self, max_range: u64) -> Self {
        self.max_range = max_range;
        self
    }

    /// Sets the block plaintext size in bits.
    pub fn with_block_bits(mut self, block_bits: BlockBits) -> Self {
        self.block_bits = block_bits;
        self
    }

    /// Sets the number of blocks per bucket.
    pub fn with_bucket_size(mut self, bucket_size: BucketSize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    /// Checks the parameters and returns the shape shared by every sub-ORAM tree.
    pub fn validate(&self) -> Result<TreeShape, OramError> {
        if self.block_count == 0 {
            return Err(OramError::InvalidCapacityError {
                parameter_name: "block count",
                parameter_value: 0,
            });
        }
        if self.max_range == 0 || self.max_range > self.block_count {
            return Err(OramError::InvalidArgumentError(format!(
                "maximum range {} must lie in 1..={}",
                self.max_range, self.block_count
            )));
        }
        validate_block_bits(self.block_bits)?;
        TreeShape::new(ceil_log2(self.block_count), self.bucket_size)
    }
}

fn validate_block_bits(block_bits: BlockBits) -> Result<(), OramError> {
    if block_bits % 8 != 0 || block_bits / 8 < MINIMUM_BLOCK_BYTES {
        return Err(OramError::InvalidCapacityError {
            parameter_name: "block bits",
            parameter_value: u64::try_from(block_bits)?,
        });
    }
    Ok(())
}
