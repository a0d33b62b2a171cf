// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Sealing of blocks into authenticated envelopes, and the dummy block representation.
//!
//! The plaintext of every envelope is laid out positionally, without length prefixes:
//!
//! ```text
//! block id (id_width bytes, LE) || leaf (8 bytes, LE) || payload (payload_size bytes)
//! ```
//!
//! A dummy block has every byte of the plaintext set to `0xff`.

use crate::{BlockId, OramError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{CryptoRng, Rng, RngCore};
use std::fmt;

/// The size in bytes of an envelope nonce.
pub const NONCE_SIZE: usize = 12;
/// The size in bytes of the client key.
pub const KEY_SIZE: usize = 32;
/// The size in bytes of the authentication tag appended to each ciphertext.
pub const TAG_SIZE: usize = 16;
/// The size in bytes of the sealed leaf label.
pub const LEAF_FIELD_SIZE: usize = 8;
/// The widest supported block id field.
pub const MAXIMUM_BLOCK_ID_WIDTH: usize = 32;

const DUMMY_SYMBOL: u8 = 0xff;

/// The single symmetric key held by an ORAM client.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Draws a fresh key from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen())
    }

    /// Wraps existing key material.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(..)")
    }
}

/// An authenticated ciphertext as stored by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// The total size of this envelope on the wire.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// Always false; an envelope carries at least its nonce.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serializes the envelope as `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.len());
        result.extend_from_slice(&self.nonce);
        result.extend_from_slice(&self.ciphertext);
        result
    }

    /// Parses `nonce || ciphertext`, checking that `bytes` has the fixed envelope size of its level.
    pub fn from_bytes(bytes: &[u8], envelope_size: usize) -> Result<Self, OramError> {
        if bytes.len() != envelope_size || envelope_size < NONCE_SIZE + TAG_SIZE {
            return Err(OramError::MalformedEnvelope {
                expected: envelope_size,
                actual: bytes.len(),
            });
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        Ok(Self {
            nonce: nonce_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// A decrypted block: its id, the leaf it is mapped to, and its fixed-width payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlainBlock {
    /// The logical id, or the codec's dummy id.
    pub id: BlockId,
    /// The leaf label the block was mapped to when it was sealed.
    pub leaf: u64,
    /// The fixed-width payload field.
    pub payload: Vec<u8>,
}

/// Converts blocks to and from envelopes under a single client key.
#[derive(Clone)]
pub struct BlockCodec {
    cipher: Aes256Gcm,
    id_width: usize,
    payload_size: usize,
}

impl fmt::Debug for BlockCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCodec")
            .field("id_width", &self.id_width)
            .field("payload_size", &self.payload_size)
            .finish()
    }
}

impl BlockCodec {
    /// Returns a codec for blocks with `id_width`-byte ids and `payload_size`-byte payloads.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `id_width` is 0 or larger than [`MAXIMUM_BLOCK_ID_WIDTH`].
    pub fn new(
        key: &EncryptionKey,
        id_width: usize,
        payload_size: usize,
    ) -> Result<Self, OramError> {
        if id_width == 0 || id_width > MAXIMUM_BLOCK_ID_WIDTH {
            return Err(OramError::InvalidConfiguration(format!(
                "block id width must be between 1 and {MAXIMUM_BLOCK_ID_WIDTH} bytes, got {id_width}"
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| {
            OramError::InvalidConfiguration("encryption key has the wrong length".into())
        })?;
        Ok(Self {
            cipher,
            id_width,
            payload_size,
        })
    }

    /// The sentinel id carried by dummy blocks: the largest value representable in the id field.
    pub fn dummy_id(&self) -> BlockId {
        if self.id_width >= 8 {
            BlockId::MAX
        } else {
            (1 << (8 * self.id_width)) - 1
        }
    }

    /// Whether `block` is a dummy. Its payload carries no data.
    pub fn is_dummy(&self, block: &PlainBlock) -> bool {
        block.id == self.dummy_id()
    }

    /// The width of the payload field.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// The plaintext size of every block sealed by this codec.
    pub fn plaintext_size(&self) -> usize {
        self.id_width + LEAF_FIELD_SIZE + self.payload_size
    }

    /// The wire size of every envelope produced by this codec.
    pub fn envelope_size(&self) -> usize {
        NONCE_SIZE + self.plaintext_size() + TAG_SIZE
    }

    /// Seals a real block under a freshly drawn nonce.
    ///
    /// A payload shorter than the payload field is filled with `0xff`; a longer one is rejected.
    pub fn encode<R: RngCore + CryptoRng>(
        &self,
        id: BlockId,
        leaf: u64,
        payload: &[u8],
        rng: &mut R,
    ) -> Result<Envelope, OramError> {
        if id >= self.dummy_id() {
            return Err(OramError::BlockIdOutOfRange {
                id,
                capacity: self.dummy_id(),
            });
        }
        if payload.len() > self.payload_size {
            return Err(OramError::OversizedPayload {
                len: payload.len(),
                capacity: self.payload_size,
            });
        }

        let mut plaintext = Vec::with_capacity(self.plaintext_size());
        let id_bytes = id.to_le_bytes();
        for i in 0..self.id_width {
            plaintext.push(id_bytes.get(i).copied().unwrap_or(0));
        }
        plaintext.extend_from_slice(&leaf.to_le_bytes());
        plaintext.extend_from_slice(payload);
        plaintext.resize(self.plaintext_size(), DUMMY_SYMBOL);

        self.seal(&plaintext, rng)
    }

    /// Seals a fresh dummy block. Every dummy is sealed under its own nonce,
    /// so dummies are indistinguishable from each other and from real blocks.
    pub fn encode_dummy<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<Envelope, OramError> {
        let plaintext = vec![DUMMY_SYMBOL; self.plaintext_size()];
        self.seal(&plaintext, rng)
    }

    /// Opens an envelope.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionError` if the envelope fails authentication under this key,
    /// or if its authenticated plaintext does not have the layout of this codec.
    pub fn decode(&self, envelope: &Envelope) -> Result<PlainBlock, OramError> {
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| OramError::DecryptionError)?;
        if plaintext.len() != self.plaintext_size() {
            return Err(OramError::DecryptionError);
        }

        let (id_bytes, rest) = plaintext.split_at(self.id_width);
        let (leaf_bytes, payload) = rest.split_at(LEAF_FIELD_SIZE);

        let id = if id_bytes.iter().all(|b| *b == DUMMY_SYMBOL) {
            self.dummy_id()
        } else {
            if id_bytes.iter().skip(8).any(|b| *b != 0) {
                return Err(OramError::DecryptionError);
            }
            let mut buffer = [0u8; 8];
            for (dst, src) in buffer.iter_mut().zip(id_bytes) {
                *dst = *src;
            }
            BlockId::from_le_bytes(buffer)
        };

        let mut leaf = [0u8; LEAF_FIELD_SIZE];
        leaf.copy_from_slice(leaf_bytes);

        Ok(PlainBlock {
            id,
            leaf: u64::from_le_bytes(leaf),
            payload: payload.to_vec(),
        })
    }

    fn seal<R: RngCore + CryptoRng>(
        &self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Envelope, OramError> {
        let nonce: [u8; NONCE_SIZE] = rng.gen();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| OramError::EncryptionError)?;
        Ok(Envelope { nonce, ciphertext })
    }
}
