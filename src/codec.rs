// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Fixed-size block encoding and encryption.
//!
//! Every slot of every tree holds a ciphertext of the same length, whether it carries a real
//! block or a dummy. The plaintext of a block is exactly `B / 8` bytes: a little-endian `u32`
//! length, the [`PhysicalBlock`] serialized with `bincode`, then zero padding.
//!
//! `bincode` writes integers at fixed width, so a real block spends [`HEADER_BYTES`] on framing
//! and `8` bytes per position tag, and the rest of the block is available for the payload.

use crate::{block::PhysicalBlock, BlockBits, Ciphertext, OramError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{CryptoRng, RngCore};
use static_assertions::const_assert_eq;
use std::fmt;

const LENGTH_PREFIX_BYTES: usize = 4;
const VARIANT_BYTES: usize = 4;
const INTEGER_BYTES: usize = 8;
const TAG_BYTES: usize = 8;

/// The bytes of a real block's plaintext spent on anything but the payload and position tags:
/// the length prefix, the variant, the id, the payload and tag lengths, and the version.
pub const HEADER_BYTES: usize = LENGTH_PREFIX_BYTES + VARIANT_BYTES + 4 * INTEGER_BYTES;
const_assert_eq!(HEADER_BYTES, 40);

/// The smallest block plaintext that can hold a block with one position tag.
pub const MINIMUM_BLOCK_BYTES: usize = HEADER_BYTES + TAG_BYTES;

const NONCE_BYTES: usize = 12;
const AUTHENTICATION_TAG_BYTES: usize = 16;

/// Turns blocks into fixed-size ciphertexts and back.
///
/// Encryption must be randomized: writing the same block twice yields unrelated ciphertexts.
pub trait BlockCodec: Clone + fmt::Debug {
    /// The size of a block plaintext, in bytes.
    fn block_bytes(&self) -> usize;

    /// The size of every ciphertext produced by this codec, in bytes.
    fn ciphertext_bytes(&self) -> usize;

    /// Encrypts `block`, padded to the block size.
    fn encrypt_block<R: RngCore + CryptoRng>(
        &self,
        block: &PhysicalBlock,
        rng: &mut R,
    ) -> Result<Ciphertext, OramError>;

    /// Decrypts and decodes a ciphertext produced by [`BlockCodec::encrypt_block`].
    fn decrypt_block(&self, ciphertext: &[u8]) -> Result<PhysicalBlock, OramError>;

    /// The largest payload a block with `tag_count` position tags can carry, in bytes.
    fn max_payload_bytes(&self, tag_count: usize) -> usize {
        payload_capacity(self.block_bytes(), tag_count)
    }

    /// Encrypts a fresh dummy.
    fn encrypt_dummy<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<Ciphertext, OramError> {
        self.encrypt_block(&PhysicalBlock::Dummy, rng)
    }
}

fn payload_capacity(block_bytes: usize, tag_count: usize) -> usize {
    block_bytes.saturating_sub(HEADER_BYTES + TAG_BYTES * tag_count)
}

/// Encodes `block` into exactly `block_bytes` bytes.
pub fn encode(block: &PhysicalBlock, block_bytes: usize) -> Result<Vec<u8>, OramError> {
    if let PhysicalBlock::Real(block) = block {
        let capacity = payload_capacity(block_bytes, block.position_tags.len());
        if block.payload.len() > capacity {
            return Err(OramError::PayloadTooLargeError {
                size: block.payload.len(),
                capacity,
            });
        }
    }

    let body = bincode::serialize(block)?;
    if LENGTH_PREFIX_BYTES + body.len() > block_bytes {
        return Err(OramError::PayloadTooLargeError {
            size: body.len(),
            capacity: block_bytes.saturating_sub(LENGTH_PREFIX_BYTES),
        });
    }

    let mut bytes = Vec::with_capacity(block_bytes);
    bytes.extend_from_slice(&u32::try_from(body.len())?.to_le_bytes());
    bytes.extend_from_slice(&body);
    bytes.resize(block_bytes, 0);
    Ok(bytes)
}

/// Decodes a plaintext produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<PhysicalBlock, OramError> {
    let prefix: [u8; LENGTH_PREFIX_BYTES] = bytes
        .get(..LENGTH_PREFIX_BYTES)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or_else(|| {
            OramError::MalformedBlockError(format!("block of {} bytes has no length", bytes.len()))
        })?;
    let length = usize::try_from(u32::from_le_bytes(prefix))?;
    let body = bytes
        .get(LENGTH_PREFIX_BYTES..)
        .and_then(|rest| rest.get(..length))
        .ok_or_else(|| {
            OramError::MalformedBlockError(format!(
                "length {} overruns a block of {} bytes",
                length,
                bytes.len()
            ))
        })?;
    bincode::deserialize(body).map_err(|error| OramError::MalformedBlockError(error.to_string()))
}

fn block_bytes_from_bits(block_bits: BlockBits) -> Result<usize, OramError> {
    if block_bits % 8 != 0 || block_bits / 8 < MINIMUM_BLOCK_BYTES {
        return Err(OramError::InvalidCapacityError {
            parameter_name: "block bits",
            parameter_value: u64::try_from(block_bits)?,
        });
    }
    Ok(block_bits / 8)
}

/// A codec that does not encrypt. Useful for testing and for measuring protocol costs.
#[derive(Clone, Copy, Debug)]
pub struct PlaintextCodec {
    block_bytes: usize,
}

impl PlaintextCodec {
    /// Returns a codec for blocks of `block_bits` bits.
    pub fn new(block_bits: BlockBits) -> Result<Self, OramError> {
        Ok(Self {
            block_bytes: block_bytes_from_bits(block_bits)?,
        })
    }
}

impl BlockCodec for PlaintextCodec {
    fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    fn ciphertext_bytes(&self) -> usize {
        self.block_bytes
    }

    fn encrypt_block<R: RngCore + CryptoRng>(
        &self,
        block: &PhysicalBlock,
        _: &mut R,
    ) -> Result<Ciphertext, OramError> {
        encode(block, self.block_bytes)
    }

    fn decrypt_block(&self, ciphertext: &[u8]) -> Result<PhysicalBlock, OramError> {
        if ciphertext.len() != self.block_bytes {
            return Err(OramError::MalformedBlockError(format!(
                "expected {} bytes, found {}",
                self.block_bytes,
                ciphertext.len()
            )));
        }
        decode(ciphertext)
    }
}

/// AES-256-GCM under a key drawn at construction.
///
/// A ciphertext is a fresh random 96-bit nonce followed by the sealed plaintext and its tag.
#[derive(Clone)]
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
    block_bytes: usize,
}

impl fmt::Debug for AesGcmCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCodec")
            .field("block_bytes", &self.block_bytes)
            .finish_non_exhaustive()
    }
}

impl AesGcmCodec {
    /// Returns a codec for blocks of `block_bits` bits under a fresh random key.
    pub fn new<R: RngCore + CryptoRng>(
        block_bits: BlockBits,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Self::with_key(block_bits, &key)
    }

    /// Returns a codec for blocks of `block_bits` bits under `key`.
    pub fn with_key(block_bits: BlockBits, key: &[u8; 32]) -> Result<Self, OramError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| OramError::CipherError)?;
        Ok(Self {
            cipher,
            block_bytes: block_bytes_from_bits(block_bits)?,
        })
    }
}

impl BlockCodec for AesGcmCodec {
    fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    fn ciphertext_bytes(&self) -> usize {
        NONCE_BYTES + self.block_bytes + AUTHENTICATION_TAG_BYTES
    }

    fn encrypt_block<R: RngCore + CryptoRng>(
        &self,
        block: &PhysicalBlock,
        rng: &mut R,
    ) -> Result<Ciphertext, OramError> {
        let plaintext = encode(block, self.block_bytes)?;

        let mut nonce = [0u8; NONCE_BYTES];
        rng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|_| OramError::CipherError)?;

        let mut ciphertext = Vec::with_capacity(self.ciphertext_bytes());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);
        Ok(ciphertext)
    }

    fn decrypt_block(&self, ciphertext: &[u8]) -> Result<PhysicalBlock, OramError> {
        if ciphertext.len() != self.ciphertext_bytes() {
            return Err(OramError::MalformedBlockError(format!(
                "expected {} bytes, found {}",
                self.ciphertext_bytes(),
                ciphertext.len()
            )));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_BYTES);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| OramError::CipherError)?;
        decode(&plaintext)
    }
}
