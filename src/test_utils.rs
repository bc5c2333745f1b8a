// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common test utilities: workloads checked against a mirror array, and macros generating
//! tests from them.

use crate::{
    codec::BlockCodec,
    database::{BlockStore, CountAccessesStore},
    utils::TreeShape,
    Address, Oram, OramConfig, OramError, PathOram, Payload, RangeAccess, RangeOramConfig,
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use simplelog::{Config, WriteLogger};
use std::sync::Once;

static INIT: Once = Once::new();

pub(crate) const TEST_BLOCK_BITS: usize = 512;
// Range ORAM blocks carry one tag per tree, leaving less room for the payload.
pub(crate) const RANGE_TEST_BLOCK_BITS: usize = 1024;

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

pub(crate) fn random_payload(rng: &mut StdRng) -> Payload {
    let length = rng.gen_range(0..=8);
    (0..length).map(|_| rng.gen()).collect()
}

fn check_read<T: Oram>(oram: &mut T, mirror: &[Option<Payload>], address: Address, rng: &mut StdRng) {
    let expected = &mirror[usize::try_from(address).unwrap()];
    match (oram.read(address, rng), expected) {
        (Ok(payload), Some(expected)) => assert_eq!(&payload, expected, "{address}"),
        (Err(OramError::MissingBlockError { .. }), None) => {}
        (result, expected) => panic!("read({address}) = {result:?}, expected {expected:?}"),
    }
}

/// Tests the correctness of an `Oram` on a workload of random reads and writes.
pub(crate) fn test_correctness_random_workload<T, F>(
    constructor: F,
    block_count: Address,
    bucket_size: usize,
    num_operations: u32,
) where
    T: Oram,
    F: Fn(OramConfig, &mut StdRng) -> Result<T, OramError>,
{
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let config = OramConfig::new(block_count)
        .with_bucket_size(bucket_size)
        .with_block_bits(TEST_BLOCK_BITS);

    let mut oram = constructor(config, &mut rng).unwrap();
    assert_eq!(oram.block_capacity(), block_count);
    let mut mirror_array: Vec<Option<Payload>> = vec![None; usize::try_from(block_count).unwrap()];

    for _ in 0..num_operations {
        let random_index = rng.gen_range(0..block_count);
        if rng.gen::<bool>() {
            check_read(&mut oram, &mirror_array, random_index, &mut rng);
        } else {
            let payload = random_payload(&mut rng);
            let previous = oram.write(random_index, payload.clone(), &mut rng).unwrap();
            let slot = &mut mirror_array[usize::try_from(random_index).unwrap()];
            assert_eq!(previous, *slot);
            *slot = Some(payload);
        }
    }

    for index in 0..block_count {
        check_read(&mut oram, &mirror_array, index, &mut rng);
    }
}

/// Tests the correctness of an `Oram` on repeated passes of sequential accesses 0, 1, ..., `block_count - 1`.
pub(crate) fn test_correctness_linear_workload<T, F>(
    constructor: F,
    block_count: Address,
    bucket_size: usize,
    num_operations: u32,
) where
    T: Oram,
    F: Fn(OramConfig, &mut StdRng) -> Result<T, OramError>,
{
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let config = OramConfig::new(block_count)
        .with_bucket_size(bucket_size)
        .with_block_bits(TEST_BLOCK_BITS);

    let mut oram = constructor(config, &mut rng).unwrap();
    let mut mirror_array: Vec<Option<Payload>> = vec![None; usize::try_from(block_count).unwrap()];

    let num_passes = (u64::from(num_operations) / block_count).max(1);
    for _ in 0..num_passes {
        for index in 0..block_count {
            if rng.gen::<bool>() {
                check_read(&mut oram, &mirror_array, index, &mut rng);
            } else {
                let payload = random_payload(&mut rng);
                oram.write(index, payload.clone(), &mut rng).unwrap();
                mirror_array[usize::try_from(index).unwrap()] = Some(payload);
            }
        }
    }

    for index in 0..block_count {
        check_read(&mut oram, &mirror_array, index, &mut rng);
    }
}

/// Writes every block in a random order, then reads every block in another random order,
/// checking after each access that the stash holds at most one path's worth of blocks.
pub(crate) fn test_stash_size<S, C, F>(constructor: F, block_count: Address)
where
    S: BlockStore,
    C: BlockCodec,
    F: Fn(OramConfig, &mut StdRng) -> Result<PathOram<S, C>, OramError>,
{
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let config = OramConfig::new(block_count).with_block_bits(TEST_BLOCK_BITS);
    let mut oram = constructor(config, &mut rng).unwrap();
    let bound = usize::try_from(oram.height() + 1).unwrap() * config.bucket_size;

    let mut addresses: Vec<Address> = (0..block_count).collect();
    let mut largest = 0;

    addresses.shuffle(&mut rng);
    for address in &addresses {
        oram.write(*address, address.to_le_bytes().to_vec(), &mut rng)
            .unwrap();
        largest = largest.max(oram.stash_occupancy());
        assert!(oram.stash_occupancy() <= bound);
    }

    addresses.shuffle(&mut rng);
    for address in &addresses {
        assert_eq!(
            oram.read(*address, &mut rng).unwrap(),
            address.to_le_bytes().to_vec()
        );
        largest = largest.max(oram.stash_occupancy());
        assert!(oram.stash_occupancy() <= bound);
    }

    log::info!(
        "Largest stash over {} accesses: {} (bound {})",
        2 * block_count,
        largest,
        bound
    );
}

/// Checks that every slot was read as often as it was written, and that the leaf buckets
/// were each read within 50% of the mean.
pub(crate) fn assert_leaf_reads_are_uniform(store: &CountAccessesStore, shape: &TreeShape) {
    for (reads, writes) in store.reads.iter().zip(&store.writes) {
        assert_eq!(reads, writes);
    }

    let leaf_reads: Vec<u64> = (0..shape.leaf_count())
        .map(|leaf| {
            let first = usize::try_from(shape.bucket_offset(leaf, shape.height).unwrap()).unwrap();
            store.reads[first..first + shape.bucket_size].iter().sum()
        })
        .collect();
    let expected_reads_per_leaf = leaf_reads.iter().sum::<u64>() / shape.leaf_count();
    assert!(expected_reads_per_leaf > 0);

    for (leaf, reads) in leaf_reads.iter().enumerate() {
        assert!(
            *reads > expected_reads_per_leaf - expected_reads_per_leaf / 2,
            "leaf {leaf}: {reads} reads, mean {expected_reads_per_leaf}"
        );
        assert!(
            *reads < expected_reads_per_leaf + expected_reads_per_leaf / 2,
            "leaf {leaf}: {reads} reads, mean {expected_reads_per_leaf}"
        );
    }
}

/// Tests a `RangeAccess` on random reads and writes of random ranges, against a mirror array.
/// Unwritten addresses read as empty payloads.
pub(crate) fn test_range_correctness_random_workload<T, F>(
    constructor: F,
    block_count: Address,
    max_range: u64,
    num_operations: u32,
) where
    T: RangeAccess,
    F: Fn(RangeOramConfig, &mut StdRng) -> Result<T, OramError>,
{
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);
    let config = RangeOramConfig::new(block_count)
        .with_max_range(max_range)
        .with_block_bits(RANGE_TEST_BLOCK_BITS);

    let mut oram = constructor(config, &mut rng).unwrap();
    assert_eq!(oram.block_capacity(), block_count);
    assert_eq!(oram.max_range(), max_range);
    let mut mirror_array: Vec<Payload> = vec![Payload::new(); usize::try_from(block_count).unwrap()];

    for _ in 0..num_operations {
        let range = rng.gen_range(1..=max_range);
        let address = rng.gen_range(0..=block_count - range);
        let window = usize::try_from(address).unwrap()..usize::try_from(address + range).unwrap();

        let result = if rng.gen::<bool>() {
            oram.read_range(address, range, &mut rng).unwrap()
        } else {
            let payloads: Vec<Payload> = (0..range).map(|_| random_payload(&mut rng)).collect();
            let result = oram.write_range(address, payloads.clone(), &mut rng).unwrap();
            let previous = mirror_array.splice(window.clone(), payloads).collect::<Vec<_>>();
            assert_eq!(result.values().cloned().collect::<Vec<_>>(), previous);
            continue;
        };

        assert_eq!(
            result.keys().copied().collect::<Vec<_>>(),
            (address..address + range).collect::<Vec<_>>()
        );
        assert_eq!(
            result.into_values().collect::<Vec<_>>(),
            mirror_array[window].to_vec(),
            "read_range({address}, {range})"
        );
    }

    for address in 0..block_count {
        let result = oram.read_range(address, 1, &mut rng).unwrap();
        assert_eq!(result[&address], mirror_array[usize::try_from(address).unwrap()]);
    }
}

macro_rules! create_correctness_test {
    ($function_name:ident, $constructor:ident, $block_count:expr, $bucket_size:expr, $iterations_to_test:expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $constructor _ $block_count _ $bucket_size _ $iterations_to_test>]() {
                $function_name($constructor, $block_count, $bucket_size, $iterations_to_test);
            }
        }
    };
}

macro_rules! create_correctness_tests_for_workload_and_constructor {
    ($function_name:ident, $constructor:ident) => {
        create_correctness_test!($function_name, $constructor, 1, 4, 10);
        create_correctness_test!($function_name, $constructor, 2, 1, 10);
        create_correctness_test!($function_name, $constructor, 10, 4, 100);
        create_correctness_test!($function_name, $constructor, 33, 2, 200);
        create_correctness_test!($function_name, $constructor, 64, 3, 500);
        // 256 blocks in buckets of 4, testing with 1000 operations
        create_correctness_test!($function_name, $constructor, 256, 4, 1000);
    };
}

macro_rules! create_correctness_tests_for_oram_constructor {
    ($constructor:ident) => {
        create_correctness_tests_for_workload_and_constructor!(
            test_correctness_linear_workload,
            $constructor
        );
        create_correctness_tests_for_workload_and_constructor!(
            test_correctness_random_workload,
            $constructor
        );
    };
}

pub(crate) use create_correctness_test;
pub(crate) use create_correctness_tests_for_oram_constructor;
pub(crate) use create_correctness_tests_for_workload_and_constructor;

macro_rules! create_stash_size_test {
    ($constructor:ident, $block_count:expr) => {
        paste::paste! {
            #[test]
            fn [<test_stash_size_ $constructor _ $block_count>]() {
                test_stash_size($constructor, $block_count);
            }
        }
    };
}

pub(crate) use create_stash_size_test;

macro_rules! create_range_correctness_test {
    ($constructor:ident, $block_count:expr, $max_range:expr, $iterations_to_test:expr) => {
        paste::paste! {
            #[test]
            fn [<test_range_correctness_ $constructor _ $block_count _ $max_range _ $iterations_to_test>]() {
                test_range_correctness_random_workload($constructor, $block_count, $max_range, $iterations_to_test);
            }
        }
    };
}

macro_rules! create_range_correctness_tests_for_constructor {
    ($constructor:ident) => {
        create_range_correctness_test!($constructor, 1, 1, 10);
        create_range_correctness_test!($constructor, 8, 1, 100);
        create_range_correctness_test!($constructor, 10, 4, 200);
        create_range_correctness_test!($constructor, 32, 8, 300);
        create_range_correctness_test!($constructor, 37, 37, 200);
        create_range_correctness_test!($constructor, 100, 16, 500);
    };
}

pub(crate) use create_range_correctness_test;
pub(crate) use create_range_correctness_tests_for_constructor;
