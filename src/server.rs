// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The boundary between an ORAM client and the untrusted server that stores its tree.

use crate::{
    bucket::Bucket, codec::Envelope, position::Position, BucketSize, OramError, TreeHeight,
};

/// The operations a Path ORAM server exposes to its client.
///
/// Implementations see only envelopes, leaf labels and depths; they never see plaintext.
pub trait StorageServer
where
    Self: Sized,
{
    /// Creates server storage from `2^(height+1) - 1` buckets of `bucket_size` envelopes each,
    /// listed in array order (root first, children of `i` at `2i+1` and `2i+2`).
    fn initialize(
        buckets: Vec<Bucket>,
        height: TreeHeight,
        bucket_size: BucketSize,
    ) -> Result<Self, OramError>;

    /// The height `L` of the stored tree.
    fn height(&self) -> TreeHeight;

    /// The number of envelopes `Z` per bucket.
    fn bucket_size(&self) -> BucketSize;

    /// Returns, in root-to-leaf order, the `Z * (L + 1)` envelopes on the path to `position`.
    fn read_path(&mut self, position: &Position) -> Result<Vec<Envelope>, OramError>;

    /// Replaces the bucket at `depth` on the path to `position` with exactly `Z` envelopes.
    fn write_bucket(
        &mut self,
        position: &Position,
        depth: TreeHeight,
        envelopes: Vec<Envelope>,
    ) -> Result<(), OramError>;

    /// The stored buckets in array order.
    fn buckets(&self) -> &[Bucket];
}

/// The observable shape of one server call. Leaf labels are deliberately not recorded:
/// two transcripts compare equal exactly when their I/O volume is identical.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerCall {
    /// A `read_path` call returning `envelopes` envelopes totalling `bytes` bytes.
    ReadPath {
        /// Number of envelopes returned.
        envelopes: usize,
        /// Total wire size of the returned envelopes.
        bytes: usize,
    },
    /// A `write_bucket` call at `depth` carrying `envelopes` envelopes totalling `bytes` bytes.
    WriteBucket {
        /// The depth of the bucket written.
        depth: TreeHeight,
        /// Number of envelopes written.
        envelopes: usize,
        /// Total wire size of the written envelopes.
        bytes: usize,
    },
}

/// A server that counts reads and writes per bucket and records the shape of every call.
#[derive(Debug)]
pub struct CountAccessesServer<S> {
    server: S,
    /// `reads[i]` tracks the total number of path reads touching bucket `i`.
    pub reads: Vec<u64>,
    /// `writes[i]` tracks the total number of writes to bucket `i`.
    pub writes: Vec<u64>,
    transcript: Vec<ServerCall>,
}

impl<S> CountAccessesServer<S> {
    /// Returns the total number of bucket reads.
    pub fn get_read_count(&self) -> u64 {
        self.reads.iter().sum()
    }

    /// Returns the total number of bucket writes.
    pub fn get_write_count(&self) -> u64 {
        self.writes.iter().sum()
    }

    /// The shapes of all calls received so far, in order.
    pub fn transcript(&self) -> &[ServerCall] {
        &self.transcript
    }

    /// Forgets all counts and the transcript.
    pub fn reset(&mut self) {
        self.reads.iter_mut().for_each(|r| *r = 0);
        self.writes.iter_mut().for_each(|w| *w = 0);
        self.transcript.clear();
    }

    /// The wrapped server.
    pub fn inner(&self) -> &S {
        &self.server
    }
}

impl<S: StorageServer> StorageServer for CountAccessesServer<S> {
    fn initialize(
        buckets: Vec<Bucket>,
        height: TreeHeight,
        bucket_size: BucketSize,
    ) -> Result<Self, OramError> {
        let number_of_buckets = buckets.len();
        Ok(Self {
            server: S::initialize(buckets, height, bucket_size)?,
            reads: vec![0u64; number_of_buckets],
            writes: vec![0u64; number_of_buckets],
            transcript: Vec::new(),
        })
    }

    fn height(&self) -> TreeHeight {
        self.server.height()
    }

    fn bucket_size(&self) -> BucketSize {
        self.server.bucket_size()
    }

    fn read_path(&mut self, position: &Position) -> Result<Vec<Envelope>, OramError> {
        log::trace!("Physical path read -- {}", position);

        let envelopes = self.server.read_path(position)?;
        for depth in 0..=position.height() {
            self.reads[position.bucket_index(depth)?] += 1;
        }
        self.transcript.push(ServerCall::ReadPath {
            envelopes: envelopes.len(),
            bytes: envelopes.iter().map(Envelope::len).sum(),
        });
        Ok(envelopes)
    }

    fn write_bucket(
        &mut self,
        position: &Position,
        depth: TreeHeight,
        envelopes: Vec<Envelope>,
    ) -> Result<(), OramError> {
        log::trace!("Physical bucket write -- {} at depth {}", position, depth);

        let call = ServerCall::WriteBucket {
            depth,
            envelopes: envelopes.len(),
            bytes: envelopes.iter().map(Envelope::len).sum(),
        };
        self.server.write_bucket(position, depth, envelopes)?;
        self.writes[position.bucket_index(depth)?] += 1;
        self.transcript.push(call);
        Ok(())
    }

    fn buckets(&self) -> &[Bucket] {
        self.server.buckets()
    }
}
