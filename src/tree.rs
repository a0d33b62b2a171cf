// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The server-side storage tree, held in memory as a flat array of buckets.

use crate::{
    bucket::Bucket,
    codec::Envelope,
    position::{bucket_count, Position, MAXIMUM_TREE_HEIGHT},
    server::StorageServer,
    BucketSize, OramError, TreeHeight,
};

/// A complete binary tree of `2^(L+1) - 1` buckets. Bucket 0 is the root and the children
/// of bucket `i` are `2i + 1` and `2i + 2`. The shape is fixed for the life of the tree.
#[derive(Debug)]
pub struct OramTree {
    buckets: Vec<Bucket>,
    height: TreeHeight,
    bucket_size: BucketSize,
}

impl OramTree {
    fn check_position(&self, position: &Position) -> Result<(), OramError> {
        if position.height() != self.height {
            return Err(OramError::InvalidPosition(format!(
                "{}-bit leaf label for a tree of height {}",
                position.height(),
                self.height
            )));
        }
        Ok(())
    }
}

impl StorageServer for OramTree {
    fn initialize(
        buckets: Vec<Bucket>,
        height: TreeHeight,
        bucket_size: BucketSize,
    ) -> Result<Self, OramError> {
        if height > MAXIMUM_TREE_HEIGHT {
            return Err(OramError::InvalidConfiguration(format!(
                "tree height {height} exceeds the maximum of {MAXIMUM_TREE_HEIGHT}"
            )));
        }

        let expected = bucket_count(height)?;
        if buckets.len() != expected {
            return Err(OramError::WrongBucketCount {
                expected,
                actual: buckets.len(),
            });
        }
        if let Some(bucket) = buckets.iter().find(|b| b.len() != bucket_size) {
            return Err(OramError::WrongBucketSize {
                expected: bucket_size,
                actual: bucket.len(),
            });
        }

        log::debug!(
            "OramTree::initialize(L = {}, Z = {}, buckets = {})",
            height,
            bucket_size,
            expected
        );

        Ok(Self {
            buckets,
            height,
            bucket_size,
        })
    }

    fn height(&self) -> TreeHeight {
        self.height
    }

    fn bucket_size(&self) -> BucketSize {
        self.bucket_size
    }

    fn read_path(&mut self, position: &Position) -> Result<Vec<Envelope>, OramError> {
        self.check_position(position)?;

        let mut result = Vec::with_capacity(self.bucket_size * (usize::try_from(self.height)? + 1));
        for depth in 0..=self.height {
            let bucket = &self.buckets[position.bucket_index(depth)?];
            result.extend_from_slice(bucket.envelopes());
        }
        Ok(result)
    }

    fn write_bucket(
        &mut self,
        position: &Position,
        depth: TreeHeight,
        envelopes: Vec<Envelope>,
    ) -> Result<(), OramError> {
        self.check_position(position)?;
        if depth > self.height {
            return Err(OramError::InvalidDepth {
                depth,
                height: self.height,
            });
        }

        let bucket = Bucket::new(envelopes, self.bucket_size)?;
        let index = position.bucket_index(depth)?;
        self.buckets[index] = bucket;
        Ok(())
    }

    fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BlockCodec, EncryptionKey};
    use rand::{rngs::StdRng, SeedableRng};

    const Z: BucketSize = 4;

    fn dummy_tree(height: TreeHeight, codec: &BlockCodec, rng: &mut StdRng) -> OramTree {
        let buckets = (0..bucket_count(height).unwrap())
            .map(|_| {
                let envelopes = (0..Z).map(|_| codec.encode_dummy(rng).unwrap()).collect();
                Bucket::new(envelopes, Z).unwrap()
            })
            .collect();
        OramTree::initialize(buckets, height, Z).unwrap()
    }

    fn fixture() -> (OramTree, BlockCodec, StdRng) {
        let mut rng = StdRng::seed_from_u64(0);
        let codec = BlockCodec::new(&EncryptionKey::generate(&mut rng), 8, 8).unwrap();
        let tree = dummy_tree(3, &codec, &mut rng);
        (tree, codec, rng)
    }

    #[test]
    fn read_path_returns_every_bucket_on_the_path() {
        let (mut tree, _, _) = fixture();
        let position = Position::from_bit_string("011").unwrap();
        assert_eq!(tree.read_path(&position).unwrap().len(), Z * 4);
    }

    #[test]
    fn written_bucket_is_read_back_in_root_to_leaf_order() {
        let (mut tree, codec, mut rng) = fixture();
        let position = Position::from_bit_string("110").unwrap();

        let envelopes: Vec<Envelope> = (0..Z as u64)
            .map(|i| codec.encode(i, position.label(), b"x", &mut rng).unwrap())
            .collect();
        tree.write_bucket(&position, 2, envelopes.clone()).unwrap();

        let path = tree.read_path(&position).unwrap();
        assert_eq!(&path[2 * Z..3 * Z], envelopes.as_slice());

        // The sibling leaf shares the bucket at depth 2.
        let sibling = Position::from_bit_string("111").unwrap();
        let sibling_path = tree.read_path(&sibling).unwrap();
        assert_eq!(&sibling_path[2 * Z..3 * Z], envelopes.as_slice());

        // A leaf in the other half of the tree does not.
        let other = Position::from_bit_string("010").unwrap();
        assert_ne!(&tree.read_path(&other).unwrap()[2 * Z..3 * Z], envelopes.as_slice());
    }

    #[test]
    fn malformed_requests_are_rejected() {
        let (mut tree, codec, mut rng) = fixture();
        let short = Position::from_bit_string("01").unwrap();
        assert!(matches!(
            tree.read_path(&short),
            Err(OramError::InvalidPosition(_))
        ));

        let position = Position::from_bit_string("010").unwrap();
        let too_few = vec![codec.encode_dummy(&mut rng).unwrap(); Z - 1];
        assert!(matches!(
            tree.write_bucket(&position, 0, too_few),
            Err(OramError::WrongBucketSize { expected: 4, actual: 3 })
        ));

        let full = vec![codec.encode_dummy(&mut rng).unwrap(); Z];
        assert!(matches!(
            tree.write_bucket(&position, 4, full),
            Err(OramError::InvalidDepth { depth: 4, height: 3 })
        ));
    }

    #[test]
    fn initialize_checks_the_tree_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let codec = BlockCodec::new(&EncryptionKey::generate(&mut rng), 8, 8).unwrap();
        let bucket = Bucket::new(vec![codec.encode_dummy(&mut rng).unwrap(); Z], Z).unwrap();
        assert!(matches!(
            OramTree::initialize(vec![bucket.clone(); 6], 2, Z),
            Err(OramError::WrongBucketCount { expected: 7, actual: 6 })
        ));
        assert!(matches!(
            OramTree::initialize(vec![bucket; 7], 2, Z + 1),
            Err(OramError::WrongBucketSize { .. })
        ));
    }
}
