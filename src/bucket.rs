// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A Path ORAM bucket.

use crate::{codec::Envelope, BucketSize, OramError};

#[derive(Clone, PartialEq, Eq)]
/// A Path ORAM bucket: exactly `Z` envelopes, real or dummy, as stored by the server.
pub struct Bucket {
    envelopes: Vec<Envelope>,
}

impl Bucket {
    /// Builds a bucket, checking that it holds exactly `bucket_size` envelopes.
    pub fn new(envelopes: Vec<Envelope>, bucket_size: BucketSize) -> Result<Self, OramError> {
        if envelopes.len() != bucket_size {
            return Err(OramError::WrongBucketSize {
                expected: bucket_size,
                actual: envelopes.len(),
            });
        }
        Ok(Self { envelopes })
    }

    /// The envelopes held by this bucket.
    pub fn envelopes(&self) -> &[Envelope] {
        &self.envelopes
    }

    /// The number of slots in this bucket.
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// Whether the bucket has no slots.
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Contents are opaque ciphertext; only the shape is useful.
        f.debug_struct("Bucket")
            .field("slots", &self.envelopes.len())
            .finish()
    }
}
