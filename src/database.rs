// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Memory abstractions for Oblivious RAM.

use crate::{Address, Ciphertext, OramError};
use std::ops::Range;

/// The untrusted store: an array of opaque, equally sized ciphertext slots.
///
/// All tree buckets of one ORAM are laid out in one store, `Z` consecutive slots per bucket.
pub trait BlockStore
where
    Self: Sized,
{
    /// Returns a new store of `number_of_slots` empty slots.
    fn new(number_of_slots: Address) -> Result<Self, OramError>;
    /// Returns the number of slots.
    fn capacity(&self) -> Result<Address, OramError>;
    /// Reads the ciphertext at `index`.
    fn get(&mut self, index: Address) -> Result<Ciphertext, OramError>;
    /// Overwrites the ciphertext at `index`.
    fn set(&mut self, index: Address, ciphertext: Ciphertext) -> Result<(), OramError>;

    /// Reads the slots `start..end`.
    fn get_range(&mut self, start: Address, end: Address) -> Result<Vec<Ciphertext>, OramError> {
        (start..end).map(|index| self.get(index)).collect()
    }

    /// Overwrites the slots `start..start + ciphertexts.len()`.
    fn set_range(&mut self, start: Address, ciphertexts: Vec<Ciphertext>) -> Result<(), OramError> {
        for (index, ciphertext) in (start..).zip(ciphertexts) {
            self.set(index, ciphertext)?;
        }
        Ok(())
    }
}

fn out_of_bounds(attempted: Address, capacity: usize) -> OramError {
    match Address::try_from(capacity) {
        Ok(capacity) => OramError::AddressOutOfBoundsError {
            attempted,
            capacity,
        },
        Err(e) => e.into(),
    }
}

/// A store that keeps its slots in a `Vec`.
#[derive(Debug)]
pub struct MemoryStore(Vec<Ciphertext>);

impl MemoryStore {
    fn slot_range(&self, start: Address, end: Address) -> Result<Range<usize>, OramError> {
        let (start, end) = (usize::try_from(start)?, usize::try_from(end)?);
        if start > end || end > self.0.len() {
            return Err(out_of_bounds(Address::try_from(end)?, self.0.len()));
        }
        Ok(start..end)
    }
}

impl BlockStore for MemoryStore {
    fn new(number_of_slots: Address) -> Result<Self, OramError> {
        Ok(Self(vec![Ciphertext::new(); number_of_slots.try_into()?]))
    }

    fn capacity(&self) -> Result<Address, OramError> {
        Ok(self.0.len().try_into()?)
    }

    fn get(&mut self, index: Address) -> Result<Ciphertext, OramError> {
        self.0
            .get(usize::try_from(index)?)
            .cloned()
            .ok_or_else(|| out_of_bounds(index, self.0.len()))
    }

    fn set(&mut self, index: Address, ciphertext: Ciphertext) -> Result<(), OramError> {
        let capacity = self.0.len();
        let slot = self
            .0
            .get_mut(usize::try_from(index)?)
            .ok_or_else(|| out_of_bounds(index, capacity))?;
        *slot = ciphertext;
        Ok(())
    }

    fn get_range(&mut self, start: Address, end: Address) -> Result<Vec<Ciphertext>, OramError> {
        let range = self.slot_range(start, end)?;
        Ok(self.0[range].to_vec())
    }

    fn set_range(&mut self, start: Address, ciphertexts: Vec<Ciphertext>) -> Result<(), OramError> {
        let end = start + Address::try_from(ciphertexts.len())?;
        let range = self.slot_range(start, end)?;
        for (slot, ciphertext) in self.0[range].iter_mut().zip(ciphertexts) {
            *slot = ciphertext;
        }
        Ok(())
    }
}

/// A store that counts reads and writes.
#[derive(Debug)]
pub struct CountAccessesStore {
    data: MemoryStore,
    /// `reads[i]` tracks the total number of reads made to slot `i`.
    pub reads: Vec<u64>,
    /// `writes[i]` tracks the total number of writes made to slot `i`.
    pub writes: Vec<u64>,
}

impl CountAccessesStore {
    /// Returns the total number of reads to the store.
    pub fn get_read_count(&self) -> u64 {
        self.reads.iter().sum()
    }

    /// Returns the total number of writes to the store.
    pub fn get_write_count(&self) -> u64 {
        self.writes.iter().sum()
    }

    /// Zeroes all counters.
    pub fn reset_counts(&mut self) {
        self.reads.iter_mut().for_each(|count| *count = 0);
        self.writes.iter_mut().for_each(|count| *count = 0);
    }
}

impl BlockStore for CountAccessesStore {
    fn new(number_of_slots: Address) -> Result<Self, OramError> {
        Ok(Self {
            data: MemoryStore::new(number_of_slots)?,
            reads: vec![0u64; number_of_slots.try_into()?],
            writes: vec![0u64; number_of_slots.try_into()?],
        })
    }

    fn capacity(&self) -> Result<Address, OramError> {
        self.data.capacity()
    }

    fn get(&mut self, index: Address) -> Result<Ciphertext, OramError> {
        log::trace!("Physical read -- {}", index);

        let result = self.data.get(index)?;
        self.reads[usize::try_from(index)?] += 1;
        Ok(result)
    }

    fn set(&mut self, index: Address, ciphertext: Ciphertext) -> Result<(), OramError> {
        log::trace!("Physical write -- {}", index);

        self.data.set(index, ciphertext)?;
        self.writes[usize::try_from(index)?] += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_logger;
    use duplicate::duplicate_item;

    #[test]
    fn counts_accesses() {
        init_logger();

        let mut store = CountAccessesStore::new(8).unwrap();
        store.set(3, vec![1]).unwrap();
        store.get_range(2, 6).unwrap();
        store.set_range(6, vec![vec![2], vec![3]]).unwrap();

        assert_eq!(store.get_read_count(), 4);
        assert_eq!(store.get_write_count(), 3);
        assert_eq!(store.reads, vec![0, 0, 1, 1, 1, 1, 0, 0]);
        assert_eq!(store.writes, vec![0, 0, 0, 1, 0, 0, 1, 1]);

        store.reset_counts();
        assert_eq!(store.get_read_count() + store.get_write_count(), 0);
    }

    #[duplicate_item(
        module_name          store_type;
        [memory_store]       [MemoryStore];
        [count_access_store] [CountAccessesStore];
    )]
    mod module_name {
        use super::*;

        #[test]
        fn new_store_is_empty() {
            let mut store = store_type::new(4).unwrap();
            assert_eq!(store.capacity().unwrap(), 4);
            assert_eq!(store.get_range(0, 4).unwrap(), vec![Ciphertext::new(); 4]);
        }

        #[test]
        fn ranges_agree_with_single_slots() {
            let mut store = store_type::new(10).unwrap();
            store
                .set_range(4, vec![vec![4], vec![5], vec![6]])
                .unwrap();
            store.set(9, vec![9]).unwrap();

            assert_eq!(store.get(5).unwrap(), vec![5]);
            assert_eq!(
                store.get_range(3, 7).unwrap(),
                vec![vec![], vec![4u8], vec![5], vec![6]]
            );
            assert_eq!(store.get_range(9, 10).unwrap(), vec![vec![9u8]]);
            assert!(store.get_range(5, 5).unwrap().is_empty());
        }

        #[test]
        fn out_of_bounds_is_an_error() {
            let mut store = store_type::new(4).unwrap();
            assert!(matches!(
                store.get(4),
                Err(OramError::AddressOutOfBoundsError {
                    attempted: 4,
                    capacity: 4
                })
            ));
            assert!(store.set(7, vec![]).is_err());
            assert!(store.get_range(2, 5).is_err());
            assert!(store.set_range(3, vec![vec![], vec![]]).is_err());
        }
    }
}
