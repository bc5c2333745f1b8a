// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A simple interactive demonstration of Path ORAM and Range ORAM over the same capacity.
//!
//! Commands: `read <address>`, `write <address> <text>`, `range read <address> <length>`,
//! `range write <address> <text>...`.

use range_oram::codec::AesGcmCodec;
use range_oram::database::MemoryStore;
use range_oram::{
    Address, Operation, Oram, OramConfig, OramError, PathOram, RangeAccess, RangeOram,
    RangeOramConfig,
};
use rand::rngs::OsRng;
use rustyline::history::FileHistory;
use rustyline::Editor;

const BLOCK_BITS: usize = 4096;

fn parse_number(
    prompt: &str,
    rl: &mut Editor<(), FileHistory>,
) -> Result<u64, Box<dyn std::error::Error>> {
    Ok(loop {
        println!("{}", prompt);
        println!();
        let readline: String = rl.readline("> ")?;
        match readline.trim().parse::<u64>() {
            Ok(number) => break number,
            Err(_) => {
                println!("Expected a number. Try again.");
                continue;
            }
        }
    })
}

fn parse_address(word: Option<&str>) -> Result<Address, OramError> {
    word.and_then(|word| word.parse().ok())
        .ok_or_else(|| OramError::InvalidArgumentError("expected a number".into()))
}

fn run_command(
    line: &str,
    point_oram: &mut PathOram<MemoryStore, AesGcmCodec>,
    range_oram: &mut RangeOram<MemoryStore, AesGcmCodec>,
    rng: &mut OsRng,
) -> Result<(), OramError> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("range") => {
            let operation: Operation = words.next().unwrap_or_default().parse()?;
            let address = parse_address(words.next())?;
            let blocks = match operation {
                Operation::Read => {
                    let length = parse_address(words.next())?;
                    range_oram.read_range(address, length, rng)?
                }
                Operation::Write => {
                    let payloads = words.map(|word| word.as_bytes().to_vec()).collect();
                    range_oram.write_range(address, payloads, rng)?
                }
            };
            for (address, payload) in blocks {
                println!("{}: {}", address, String::from_utf8_lossy(&payload));
            }
        }
        Some(word) => {
            let operation: Operation = word.parse()?;
            let address = parse_address(words.next())?;
            let payload = match operation {
                Operation::Read => None,
                Operation::Write => Some(words.collect::<Vec<_>>().join(" ").into_bytes()),
            };
            match point_oram.access(operation, address, payload, rng) {
                Ok(Some(payload)) => {
                    println!("{}: {}", address, String::from_utf8_lossy(&payload))
                }
                Ok(None) | Err(OramError::MissingBlockError { .. }) => {
                    println!("{}: <never written>", address)
                }
                Err(error) => return Err(error),
            }
        }
        None => {}
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = OsRng;

    let mut rl = Editor::<(), _>::new()?;

    let capacity = parse_number("How many blocks would you like to store?", &mut rl)?;
    let max_range = parse_number("What is the longest range you will access?", &mut rl)?;

    let point_config = OramConfig::new(capacity).with_block_bits(BLOCK_BITS);
    let codec = AesGcmCodec::new(BLOCK_BITS, &mut rng)?;
    let mut point_oram = PathOram::new_recursive(point_config, codec, &mut rng)?;

    let range_config = RangeOramConfig::new(capacity)
        .with_max_range(max_range)
        .with_block_bits(BLOCK_BITS);
    let codec = AesGcmCodec::new(BLOCK_BITS, &mut rng)?;
    let mut range_oram = RangeOram::new(range_config, codec, &mut rng)?;

    println!("Commands: read A | write A TEXT | range read A LENGTH | range write A TEXT...");
    loop {
        let line: String = rl.readline("> ")?;
        if let Err(e) = run_command(&line, &mut point_oram, &mut range_oram, &mut rng) {
            println!("Error: {}", e);
        }
    }
}
