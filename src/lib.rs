// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A client/server implementation of Path ORAM.
//!
//! The client keeps a stash, a position map and a single encryption key. The server keeps a
//! complete binary tree of fixed-capacity buckets holding authenticated ciphertext envelopes,
//! and only ever observes "one path was read, then every bucket on it was rewritten".
//! Large position maps are themselves stored in a chain of smaller Path ORAMs.

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

use rand::{CryptoRng, RngCore};
use std::num::TryFromIntError;
use thiserror::Error;

pub mod bucket;
pub mod codec;
pub mod config;
mod layout;
pub mod path_oram;
pub mod position;
pub mod position_map;
pub mod server;
pub mod stash;
pub mod tree;

#[cfg(test)]
mod test_utils;

pub use crate::codec::{BlockCodec, EncryptionKey, Envelope, PlainBlock};
pub use crate::config::OramConfig;
pub use crate::path_oram::{DefaultOram, PathOram};
pub use crate::position::Position;
pub use crate::server::{CountAccessesServer, StorageServer};
pub use crate::tree::OramTree;

/// The numeric type used to identify logical blocks.
pub type BlockId = u64;

/// The numeric type used to specify the number of blocks per bucket ("Z").
pub type BucketSize = usize;

/// The numeric type used to specify the height of a storage tree ("L").
pub type TreeHeight = u32;

/// The numeric type used to bound the number of blocks held in a stash.
pub type StashSize = usize;

/// A logical ORAM operation, as issued by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation<'a> {
    /// Returns the current payload of a block, if it has ever been written.
    Read,
    /// Replaces the payload of a block, returning the previous payload if any.
    Write(&'a [u8]),
}

/// An Oblivious RAM over variable-length byte payloads bounded by a fixed capacity.
pub trait Oram {
    /// The number of logical block ids the ORAM can address (ids are `0..block_capacity`).
    fn block_capacity(&self) -> Result<BlockId, OramError>;

    /// Performs one logical operation on block `id`.
    ///
    /// Returns the payload held by `id` before the operation, or `None` if `id` was never written.
    fn access<R: RngCore + CryptoRng>(
        &mut self,
        operation: Operation<'_>,
        id: BlockId,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError>;

    /// Obliviously reads the payload stored for `id`.
    fn read<R: RngCore + CryptoRng>(
        &mut self,
        id: BlockId,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError> {
        self.access(Operation::Read, id, rng)
    }

    /// Obliviously writes `payload` to `id`. Returns the payload previously stored at `id`.
    fn write<R: RngCore + CryptoRng>(
        &mut self,
        id: BlockId,
        payload: &[u8],
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError> {
        self.access(Operation::Write(payload), id, rng)
    }
}

/// Errors raised by the ORAM client, its codec and its storage server.
#[derive(Error, Debug)]
pub enum OramError {
    /// A leaf label was malformed or does not match the tree height.
    #[error("Invalid position: {0}")]
    InvalidPosition(String),
    /// A bucket write did not carry exactly `Z` envelopes.
    #[error("Wrong bucket size: expected {expected} envelopes, got {actual}")]
    WrongBucketSize {
        /// The bucket capacity of the tree.
        expected: BucketSize,
        /// The number of envelopes supplied.
        actual: usize,
    },
    /// A bucket write addressed a depth below the leaves.
    #[error("Invalid depth {depth} for a tree of height {height}")]
    InvalidDepth {
        /// The requested depth.
        depth: TreeHeight,
        /// The height of the tree.
        height: TreeHeight,
    },
    /// A tree was initialized with the wrong number of buckets.
    #[error("Wrong bucket count: expected {expected} buckets, got {actual}")]
    WrongBucketCount {
        /// `2^(L+1) - 1`.
        expected: usize,
        /// The number of buckets supplied.
        actual: usize,
    },
    /// The client configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A block id lies outside the address space of the ORAM.
    #[error("Block id {id} is out of range for capacity {capacity}")]
    BlockIdOutOfRange {
        /// The offending id.
        id: BlockId,
        /// The number of addressable ids.
        capacity: BlockId,
    },
    /// An envelope failed authentication.
    #[error("Envelope failed authentication")]
    DecryptionError,
    /// The AEAD primitive refused to seal a block.
    #[error("Envelope encryption failed")]
    EncryptionError,
    /// Envelope bytes do not have the length of an envelope of this level.
    #[error("Malformed envelope: expected {expected} bytes, got {actual}")]
    MalformedEnvelope {
        /// The fixed envelope length.
        expected: usize,
        /// The supplied length.
        actual: usize,
    },
    /// A payload exceeds the fixed block payload capacity.
    #[error("Payload of {len} bytes exceeds the block capacity of {capacity} bytes")]
    OversizedPayload {
        /// The length of the rejected payload.
        len: usize,
        /// The payload capacity.
        capacity: usize,
    },
    /// The stash holds more blocks than its configured bound after an access.
    #[error("Stash overflow: {occupancy} blocks exceed the bound of {bound}")]
    StashOverflow {
        /// The stash occupancy after eviction.
        occupancy: StashSize,
        /// The configured bound.
        bound: StashSize,
    },
    /// A packed position-map block did not hold exactly one record for the requested id.
    #[error("Position map level {level} has no consistent record for block {block_id}")]
    RecursiveLookupInconsistency {
        /// The recursion level holding the packed block.
        level: usize,
        /// The id whose record was looked up.
        block_id: BlockId,
    },
    /// A real block was found in a bucket that is not on the path to its own leaf.
    #[error("Block {block_id} with leaf {leaf} found off its path at depth {depth}")]
    PathInvariantViolation {
        /// The misplaced block.
        block_id: BlockId,
        /// The leaf sealed with the block.
        leaf: u64,
        /// The depth of the bucket it was read from.
        depth: TreeHeight,
    },
    /// The session hit an unrecoverable error earlier and refuses further accesses.
    #[error("The ORAM session was poisoned by an earlier unrecoverable error")]
    SessionPoisoned,
    /// Arithmetic conversion failure.
    #[error("Arithmetic error encountered.")]
    IntegerConversionError(#[from] TryFromIntError),
}

impl OramError {
    /// Returns true for programmer or configuration errors, which are never retried.
    pub fn is_protocol_parameter_error(&self) -> bool {
        matches!(
            self,
            OramError::InvalidPosition(_)
                | OramError::WrongBucketSize { .. }
                | OramError::InvalidDepth { .. }
                | OramError::WrongBucketCount { .. }
                | OramError::InvalidConfiguration(_)
                | OramError::BlockIdOutOfRange { .. }
        )
    }
}
