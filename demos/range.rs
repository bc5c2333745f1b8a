// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Overlapping range writes on a Range ORAM.

extern crate range_oram;

use range_oram::codec::AesGcmCodec;
use range_oram::{Address, OramError, Payload, RangeAccess, RangeOram, RangeOramConfig};
use rand::rngs::OsRng;
use simplelog::{Config, LevelFilter, SimpleLogger};
use std::collections::BTreeMap;

fn show(label: &str, blocks: &BTreeMap<Address, Payload>) {
    let rendered: Vec<String> = blocks
        .iter()
        .map(|(address, payload)| format!("{}={}", address, String::from_utf8_lossy(payload)))
        .collect();
    println!("{}: [{}]", label, rendered.join(", "));
}

fn payloads(values: &[&str]) -> Vec<Payload> {
    values.iter().map(|value| value.as_bytes().to_vec()).collect()
}

fn main() -> Result<(), OramError> {
    let _ = SimpleLogger::init(LevelFilter::Info, Config::default());
    let mut rng = OsRng;

    let config = RangeOramConfig::new(32)
        .with_max_range(8)
        .with_block_bits(1024);
    let codec = AesGcmCodec::new(config.block_bits, &mut rng)?;
    let mut oram = RangeOram::<range_oram::database::MemoryStore, _>::new(config, codec, &mut rng)?;

    oram.write_range(5, payloads(&["a", "b", "c"]), &mut rng)?;
    show("read(5, 3)", &oram.read_range(5, 3, &mut rng)?);

    let previous = oram.write_range(6, payloads(&["e", "f", "g", "h", "i"]), &mut rng)?;
    show("write(6, 5) replaced", &previous);
    show("read(5, 3)", &oram.read_range(5, 3, &mut rng)?);

    println!(
        "Global counter: {}, stash sizes: {:?}",
        oram.global_counter(),
        oram.stash_occupancies()
    );
    Ok(())
}
