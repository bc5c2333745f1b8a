// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An oblivious storage client.
//!
//! The client keeps a small amount of trusted state and stores fixed-size encrypted blocks
//! on an untrusted [`BlockStore`](database::BlockStore), hiding which logical addresses are
//! touched. Two protocols are provided.
//!
//! - [`PathOram`]: point reads and writes over a binary tree of buckets,
//!     with either an in-memory or a recursive position map.
//! - [`RangeOram`]: reads and writes of contiguous address ranges, served by one
//!     sub-ORAM per power-of-two range size so that a range costs about as much as one point access.
//!
//! A baseline [`NaiveRangeOram`] serves ranges as a sequence of point accesses.
//!
//! ```
//! use range_oram::{codec::PlaintextCodec, Oram, OramConfig, PathOram};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let config = OramConfig::new(8).with_block_bits(1024);
//! let codec = PlaintextCodec::new(config.block_bits).unwrap();
//! let mut oram: PathOram = PathOram::new(config, codec, &mut rng).unwrap();
//!
//! oram.write(3, b"hello".to_vec(), &mut rng).unwrap();
//! assert_eq!(oram.read(3, &mut rng).unwrap(), b"hello".to_vec());
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use std::num::TryFromIntError;
use std::str::FromStr;
use thiserror::Error;

pub mod block;
pub mod codec;
pub mod config;
pub mod database;
pub mod naive_range_oram;
pub mod path_oram;
pub mod position_map;
pub mod range_oram;
pub mod stash;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::{OramConfig, RangeOramConfig};
pub use naive_range_oram::NaiveRangeOram;
pub use path_oram::PathOram;
pub use range_oram::RangeOram;

/// The numeric type used to specify the size of an ORAM in blocks, and to index into the ORAM.
pub type Address = u64;
/// The numeric type used to specify the size of each block plaintext, in bits.
pub type BlockBits = usize;
/// The numeric type used to specify the size of an ORAM bucket in blocks.
pub type BucketSize = usize;
/// The user data carried by a block. Its length may vary up to the capacity of the codec.
pub type Payload = Vec<u8>;
/// An opaque, fixed-size encrypted block as held by the untrusted store.
pub type Ciphertext = Vec<u8>;

/// The parameter "Z" from the Path ORAM literature that sets the number of blocks per bucket.
pub const DEFAULT_BLOCKS_PER_BUCKET: BucketSize = 4;

/// The default size of a block plaintext, in bits.
pub const DEFAULT_BLOCK_BITS: BlockBits = 32768;

/// Trees taller than this are rejected, which keeps every leaf label and slot offset inside a `u64`.
pub const MAXIMUM_TREE_HEIGHT: utils::TreeHeight = 48;

/// The kind of a logical access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Return the current payload.
    Read,
    /// Return the current payload and replace it.
    Write,
}

impl FromStr for Operation {
    type Err = OramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Operation::Read),
            "write" => Ok(Operation::Write),
            other => Err(OramError::InvalidArgumentError(format!(
                "unknown operation `{other}`"
            ))),
        }
    }
}

/// Errors returned by the ORAM constructions in this crate.
#[derive(Error, Debug)]
pub enum OramError {
    /// A construction parameter is out of range.
    #[error("Invalid {parameter_name}: {parameter_value}")]
    InvalidCapacityError {
        /// The offending parameter.
        parameter_name: &'static str,
        /// Its value.
        parameter_value: u64,
    },
    /// A payload does not fit in one block.
    #[error("Payload of {size} bytes exceeds the block capacity of {capacity} bytes")]
    PayloadTooLargeError {
        /// The payload size in bytes.
        size: usize,
        /// The largest payload a block can carry, in bytes.
        capacity: usize,
    },
    /// An access was malformed, e.g. a write without a payload.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),
    /// A point read targeted an address that was never written.
    #[error("Address {address} has never been written")]
    MissingBlockError {
        /// The address that was read.
        address: Address,
    },
    /// A range access asked for more blocks than the configured maximum.
    #[error("Range of {range} blocks exceeds the maximum of {maximum}")]
    RangeTooLargeError {
        /// The requested range size.
        range: u64,
        /// The configured maximum range size.
        maximum: u64,
    },
    /// An access touched an address at or beyond the capacity.
    #[error("Attempted to access address {attempted}, but capacity is {capacity}")]
    AddressOutOfBoundsError {
        /// The offending address.
        attempted: Address,
        /// The number of addressable blocks.
        capacity: Address,
    },
    /// Errors arising from conversions between integer types.
    #[error("Arithmetic error encountered.")]
    IntegerConversionError(#[from] TryFromIntError),
    /// A decrypted block could not be decoded.
    #[error("Malformed block: {0}")]
    MalformedBlockError(String),
    /// A block could not be serialized.
    #[error("Block serialization failed: {0}")]
    SerializationError(#[from] bincode::Error),
    /// Encryption or authenticated decryption failed.
    #[error("Cipher failure")]
    CipherError,
}

/// Point access to an array of blocks, hiding which address is touched.
pub trait Oram {
    /// Returns the number of addressable blocks.
    fn block_capacity(&self) -> Address;

    /// Performs a read or write at `address`.
    ///
    /// For a read, returns the current payload. For a write, stores `new_payload` and returns
    /// the payload it replaced, if any.
    ///
    /// # Errors
    ///
    /// A read of an address that was never written returns a `MissingBlockError`. The access
    /// still reads and rewrites a full path before failing.
    fn access<R: RngCore + CryptoRng>(
        &mut self,
        operation: Operation,
        address: Address,
        new_payload: Option<Payload>,
        rng: &mut R,
    ) -> Result<Option<Payload>, OramError>;

    /// Returns the payload at `address`.
    ///
    /// # Errors
    ///
    /// Returns a `MissingBlockError` if `address` was never written.
    fn read<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        rng: &mut R,
    ) -> Result<Payload, OramError> {
        self.access(Operation::Read, address, None, rng)?
            .ok_or(OramError::MissingBlockError { address })
    }

    /// Writes `payload` to `address`, returning the previous payload if there was one.
    fn write<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        payload: Payload,
        rng: &mut R,
    ) -> Result<Option<Payload>, OramError> {
        self.access(Operation::Write, address, Some(payload), rng)
    }
}

/// Access to contiguous runs of blocks, hiding which run is touched.
pub trait RangeAccess {
    /// Returns the number of addressable blocks.
    fn block_capacity(&self) -> Address;

    /// Returns the largest range size accepted by [`RangeAccess::access_range`].
    fn max_range(&self) -> u64;

    /// Reads or writes the `range` blocks starting at `address`.
    ///
    /// Returns the payloads of the requested addresses as they were before the access.
    /// Addresses that were never written map to an empty payload.
    /// For a write, `new_payloads` must hold exactly `range` payloads, in address order.
    fn access_range<R: RngCore + CryptoRng>(
        &mut self,
        operation: Operation,
        address: Address,
        range: u64,
        new_payloads: Option<Vec<Payload>>,
        rng: &mut R,
    ) -> Result<BTreeMap<Address, Payload>, OramError>;

    /// Returns the payloads of the `range` blocks starting at `address`.
    fn read_range<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        range: u64,
        rng: &mut R,
    ) -> Result<BTreeMap<Address, Payload>, OramError> {
        self.access_range(Operation::Read, address, range, None, rng)
    }

    /// Overwrites the blocks starting at `address` with `payloads`, returning the previous payloads.
    fn write_range<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        payloads: Vec<Payload>,
        rng: &mut R,
    ) -> Result<BTreeMap<Address, Payload>, OramError> {
        let range = u64::try_from(payloads.len())?;
        self.access_range(Operation::Write, address, range, Some(payloads), rng)
    }
}
