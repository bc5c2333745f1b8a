// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A very simple demonstration of the use of Path ORAM.

extern crate range_oram;

use range_oram::codec::AesGcmCodec;
use range_oram::{Oram, OramConfig, OramError, PathOram};
use rand::rngs::OsRng;
use simplelog::{Config, LevelFilter, SimpleLogger};

fn main() -> Result<(), OramError> {
    let _ = SimpleLogger::init(LevelFilter::Info, Config::default());
    let mut rng = OsRng;

    let config = OramConfig::new(10).with_block_bits(1024);
    let codec = AesGcmCodec::new(config.block_bits, &mut rng)?;
    let mut oram = PathOram::<range_oram::database::MemoryStore, _>::new_recursive(
        config, codec, &mut rng,
    )?;

    oram.write(0, b"v1".to_vec(), &mut rng)?;
    oram.write(8, b"v2".to_vec(), &mut rng)?;
    let previous = oram.write(0, b"v3".to_vec(), &mut rng)?;
    println!(
        "Overwrote block 0, previously {:?}",
        previous.map(|payload| String::from_utf8_lossy(&payload).into_owned())
    );

    for address in [0, 8] {
        let payload = oram.read(address, &mut rng)?;
        println!("{}: {}", address, String::from_utf8_lossy(&payload));
    }
    Ok(())
}
