// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A baseline range ORAM that serves a range of `r` blocks with `r` Path ORAM accesses.

use crate::{
    codec::{BlockCodec, PlaintextCodec},
    config::{OramConfig, RangeOramConfig},
    database::{BlockStore, MemoryStore},
    Address, Operation, Oram, OramError, PathOram, Payload, RangeAccess,
};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;

/// Range access over a single [`PathOram`], one point access per block.
#[derive(Debug)]
pub struct NaiveRangeOram<S: BlockStore = MemoryStore, C: BlockCodec = PlaintextCodec> {
    /// The Path ORAM serving every block.
    pub oram: PathOram<S, C>,
    max_range: u64,
}

impl<S: BlockStore, C: BlockCodec> NaiveRangeOram<S, C> {
    /// Returns a new `NaiveRangeOram` whose Path ORAM has the block count, block size and bucket size of `config`.
    pub fn new<R: RngCore + CryptoRng>(
        config: RangeOramConfig,
        codec: C,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        config.validate()?;
        let oram_config = OramConfig::new(config.block_count)
            .with_block_bits(config.block_bits)
            .with_bucket_size(config.bucket_size);
        Ok(Self {
            oram: PathOram::new(oram_config, codec, rng)?,
            max_range: config.max_range,
        })
    }
}

impl<S: BlockStore, C: BlockCodec> RangeAccess for NaiveRangeOram<S, C> {
    fn block_capacity(&self) -> Address {
        self.oram.block_capacity()
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
        let end = address
            .checked_add(range)
            .filter(|end| *end <= self.block_capacity())
            .ok_or(OramError::AddressOutOfBoundsError {
                attempted: address.saturating_add(range - 1),
                capacity: self.block_capacity(),
            })?;

        let new_payloads: Vec<Option<Payload>> = match (operation, new_payloads) {
            (Operation::Read, None) => vec![None; usize::try_from(range)?],
            (Operation::Write, Some(payloads)) if u64::try_from(payloads.len())? == range => {
                let capacity = self.oram.codec().max_payload_bytes(1);
                if let Some(payload) = payloads.iter().find(|payload| payload.len() > capacity) {
                    return Err(OramError::PayloadTooLargeError {
                        size: payload.len(),
                        capacity,
                    });
                }
                payloads.into_iter().map(Some).collect()
            }
            _ => {
                return Err(OramError::InvalidArgumentError(format!(
                    "{:?} of {} blocks with mismatched payloads",
                    operation, range
                )))
            }
        };

        let mut result = BTreeMap::new();
        for (address, new_payload) in (address..end).zip(new_payloads) {
            let previous = match self.oram.access(operation, address, new_payload, rng) {
                Ok(previous) => previous.unwrap_or_default(),
                Err(OramError::MissingBlockError { .. }) => Payload::new(),
                Err(error) => return Err(error),
            };
            result.insert(address, previous);
        }
        Ok(result)
    }
}
