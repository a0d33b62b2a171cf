// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of Path ORAM.

use crate::{
    bucket::Bucket,
    codec::{BlockCodec, EncryptionKey, Envelope},
    config::OramConfig,
    layout::{LevelLayout, PaddedPayload, PositionRecords},
    position::{bucket_count, leaf_count, Position},
    position_map::{FlatPositionMap, PositionMap},
    server::StorageServer,
    stash::Stash,
    tree::OramTree,
    BlockId, BucketSize, Operation, Oram, OramError, StashSize, TreeHeight,
};
use rand::{seq::SliceRandom, CryptoRng, RngCore};
use std::collections::HashSet;

/// An `Oram` whose server is the in-memory [`OramTree`].
pub type DefaultOram = PathOram<OramTree>;

/// A Path ORAM client together with the server holding its tree.
///
/// The same type serves every level of the recursive chain: level 0 stores user payloads and
/// each higher level stores the packed position records of the level below it. The topmost
/// level keeps a [`FlatPositionMap`].
///
/// ## Security
///
/// Every access, at every level, issues exactly one `read_path` followed by `L + 1`
/// `write_bucket` calls of `Z` equally sized envelopes, whatever the operation and block id.
/// A read of an id that was never written still fetches and rewrites a uniformly random path.
///
/// The stash is checked against `stash_overflow_size` after every access. With Z = 4,
/// experiments from the [original Path ORAM paper](https://eprint.iacr.org/2013/280.pdf)
/// indicate that a bound of 40 is exceeded with probability below 2^{-50} (Figure 3).
/// Exceeding it is reported as `StashOverflow` and ends the session.
///
/// ## Sessions
///
/// Errors detected before the position map is touched (an id out of range, an oversized
/// payload) leave the client unchanged. Any later error may leave blocks only in the stash or
/// a bucket partially rewritten, so the client is poisoned and refuses further accesses with
/// `SessionPoisoned`.
#[derive(Debug)]
pub struct PathOram<S: StorageServer> {
    /// The untrusted storage holding this level's tree.
    server: S,
    codec: BlockCodec,
    stash: Stash,
    position_map: PositionMap<S>,
    layout: LevelLayout,
    /// 0 for user data, `i` for the `i`-th position map level.
    level: usize,
    height: TreeHeight,
    bucket_size: BucketSize,
    stash_bound: StashSize,
    poisoned: bool,
}

impl<S: StorageServer> PathOram<S> {
    /// Returns a new `PathOram` with an all-dummy tree, under a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `config` does not validate (see [`OramConfig::validate`]).
    pub fn new<R: RngCore + CryptoRng>(
        config: &OramConfig,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        Self::new_with_blocks(config, Vec::new(), rng)
    }

    /// Returns a new `PathOram` with an all-dummy tree, under `key`.
    pub fn new_with_key<R: RngCore + CryptoRng>(
        config: &OramConfig,
        key: &EncryptionKey,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        Self::new_with_key_and_blocks(config, key, Vec::new(), rng)
    }

    /// Returns a new `PathOram` whose tree initially holds `blocks`.
    ///
    /// The blocks are shuffled, each is mapped to a uniformly random leaf and stored in the deepest
    /// bucket on its path that still has room (or in the stash if there is none). The resulting
    /// positions are packed into the recursive levels the same way.
    ///
    /// # Errors
    ///
    /// Besides configuration errors, returns `BlockIdOutOfRange` or `OversizedPayload` for a bad block
    /// and `InvalidConfiguration` if an id is listed twice.
    pub fn new_with_blocks<R: RngCore + CryptoRng>(
        config: &OramConfig,
        blocks: Vec<(BlockId, Vec<u8>)>,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let key = EncryptionKey::generate(rng);
        Self::new_with_key_and_blocks(config, &key, blocks, rng)
    }

    fn new_with_key_and_blocks<R: RngCore + CryptoRng>(
        config: &OramConfig,
        key: &EncryptionKey,
        blocks: Vec<(BlockId, Vec<u8>)>,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        config.validate()?;

        let capacity = config.level_capacity(0)?;
        let padding = PaddedPayload::new(config.block_payload_size);
        let mut seen = HashSet::with_capacity(blocks.len());
        let mut padded = Vec::with_capacity(blocks.len());
        for (id, payload) in blocks {
            if id >= capacity {
                return Err(OramError::BlockIdOutOfRange { id, capacity });
            }
            if !seen.insert(id) {
                return Err(OramError::InvalidConfiguration(format!(
                    "block {id} is listed more than once"
                )));
            }
            padded.push((id, padding.pad(&payload)?));
        }

        Self::build(config, 0, config.recursion_levels(), key, padded, rng)
    }

    fn build<R: RngCore + CryptoRng>(
        config: &OramConfig,
        level: usize,
        levels: usize,
        key: &EncryptionKey,
        mut blocks: Vec<(BlockId, Vec<u8>)>,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        let height = config.level_height(level)?;
        let bucket_size = config.bucket_size;
        let layout = LevelLayout::for_level(config, level);
        let codec = BlockCodec::new(key, config.block_id_width, layout.payload_size())?;

        log::info!(
            "PathOram::new -- level {} (L = {}, Z = {}, capacity = {}, block = {} bytes, initial blocks = {})",
            level,
            height,
            bucket_size,
            leaf_count(height),
            layout.payload_size(),
            blocks.len()
        );

        // Which blocks spill into the stash must not depend on their ids.
        blocks.shuffle(rng);

        let mut slots: Vec<Vec<Envelope>> = vec![Vec::new(); bucket_count(height)?];
        let mut stash = Stash::new();
        let mut positions = Vec::with_capacity(blocks.len());
        for (id, payload) in blocks {
            let position = Position::random(height, rng)?;
            positions.push((id, position.label()));

            let mut placed = false;
            for depth in (0..=height).rev() {
                let bucket = &mut slots[position.bucket_index(depth)?];
                if bucket.len() < bucket_size {
                    bucket.push(codec.encode(id, position.label(), &payload, rng)?);
                    placed = true;
                    break;
                }
            }
            if !placed {
                stash.put(id, position, payload);
            }
        }

        let mut buckets = Vec::with_capacity(slots.len());
        for mut envelopes in slots {
            while envelopes.len() < bucket_size {
                envelopes.push(codec.encode_dummy(rng)?);
            }
            buckets.push(Bucket::new(envelopes, bucket_size)?);
        }
        let server = S::initialize(buckets, height, bucket_size)?;

        let position_map = if level == levels {
            PositionMap::Flat(FlatPositionMap::from_positions(positions))
        } else {
            let packed = match LevelLayout::for_level(config, level + 1) {
                LevelLayout::PositionRecords(records) => records.pack(&positions)?,
                LevelLayout::Data(_) => {
                    return Err(OramError::InvalidConfiguration(format!(
                        "level {} cannot hold position records",
                        level + 1
                    )))
                }
            };
            PositionMap::Recursive(Box::new(Self::build(
                config,
                level + 1,
                levels,
                key,
                packed,
                rng,
            )?))
        };

        let stash_bound = config.stash_overflow_size;
        let occupancy = stash.record_occupancy();
        if occupancy > stash_bound {
            log::error!(
                "Level {} initial stash holds {} blocks, above the bound of {}",
                level,
                occupancy,
                stash_bound
            );
            return Err(OramError::StashOverflow {
                occupancy,
                bound: stash_bound,
            });
        }

        Ok(Self {
            server,
            codec,
            stash,
            position_map,
            layout,
            level,
            height,
            bucket_size,
            stash_bound,
            poisoned: false,
        })
    }

    /// The number of recursive position-map levels above this one.
    pub fn recursion_height(&self) -> usize {
        self.position_map.recursion_height()
    }

    /// The number of blocks currently in this level's stash.
    pub fn stash_occupancy(&self) -> StashSize {
        self.stash.len()
    }

    /// The largest stash occupancy observed at the end of an access.
    pub fn peak_stash_occupancy(&self) -> StashSize {
        self.stash.peak_occupancy()
    }

    /// The servers of every level, from the data level up to the top of the recursion.
    pub fn level_servers(&self) -> Vec<&S> {
        let mut servers = vec![&self.server];
        if let PositionMap::Recursive(inner) = &self.position_map {
            servers.extend(inner.level_servers());
        }
        servers
    }

    /// Whether an earlier error has ended this session.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Ends the session and hands back the data-level server.
    pub fn close(self) -> S {
        log::info!(
            "PathOram::close -- level {} (stash = {}, peak stash = {})",
            self.level,
            self.stash.len(),
            self.stash.peak_occupancy()
        );
        self.server
    }

    pub(crate) fn position_records(&self) -> Result<PositionRecords, OramError> {
        match self.layout {
            LevelLayout::PositionRecords(records) => Ok(records),
            LevelLayout::Data(_) => Err(OramError::InvalidConfiguration(
                "the data level does not hold position records".into(),
            )),
        }
    }

    /// Performs one access to block `id` of this level.
    ///
    /// `callback` receives the current payload field of the block (`None` if it has none) and
    /// returns its replacement, or `None` to leave it as it is. Returns the payload field held
    /// before the access.
    pub(crate) fn access_block<R, F>(
        &mut self,
        id: BlockId,
        callback: F,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError>
    where
        R: RngCore + CryptoRng,
        F: FnOnce(Option<&[u8]>) -> Result<Option<Vec<u8>>, OramError>,
    {
        if self.poisoned {
            return Err(OramError::SessionPoisoned);
        }
        let capacity = leaf_count(self.height);
        if id >= capacity {
            return Err(OramError::BlockIdOutOfRange { id, capacity });
        }

        let result = self.access_path(id, callback, rng);
        if let Err(error) = &result {
            log::warn!("Level {} session poisoned: {}", self.level, error);
            self.poisoned = true;
        }
        result
    }

    fn access_path<R, F>(
        &mut self,
        id: BlockId,
        callback: F,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError>
    where
        R: RngCore + CryptoRng,
        F: FnOnce(Option<&[u8]>) -> Result<Option<Vec<u8>>, OramError>,
    {
        log::debug!("Level {} access", self.level);

        // Map the block to a fresh leaf before the server is contacted.
        let new_position = Position::random(self.height, rng)?;
        let unassigned_path = Position::random(self.height, rng)?;
        let path = self
            .position_map
            .lookup_and_remap(id, new_position, rng)?
            .unwrap_or(unassigned_path);

        self.read_path_into_stash(&path)?;

        let previous = self.stash.get(id).map(|entry| entry.payload.clone());
        match callback(previous.as_deref())? {
            Some(payload) => self.stash.put(id, new_position, payload),
            None => {
                self.stash.reposition(id, new_position);
            }
        }

        self.evict_path(&path, rng)?;

        let occupancy = self.stash.record_occupancy();
        if occupancy > self.stash_bound {
            log::error!(
                "Level {} stash holds {} blocks, above the bound of {}",
                self.level,
                occupancy,
                self.stash_bound
            );
            return Err(OramError::StashOverflow {
                occupancy,
                bound: self.stash_bound,
            });
        }

        Ok(previous)
    }

    fn read_path_into_stash(&mut self, path: &Position) -> Result<(), OramError> {
        let envelopes = self.server.read_path(path)?;
        // A path is Z * (L + 1) envelopes.
        let expected = self.bucket_size * (usize::try_from(self.height)? + 1);
        if envelopes.len() != expected {
            return Err(OramError::WrongBucketSize {
                expected,
                actual: envelopes.len(),
            });
        }

        let mut fetched = Vec::new();
        for (depth, bucket) in (0..=self.height).zip(envelopes.chunks(self.bucket_size)) {
            for envelope in bucket {
                let block = self.codec.decode(envelope)?;
                if self.codec.is_dummy(&block) {
                    continue;
                }
                let sealed = match Position::new(block.leaf, self.height) {
                    Ok(sealed) if sealed.shares_bucket_at(path, depth) => sealed,
                    _ => {
                        return Err(OramError::PathInvariantViolation {
                            block_id: block.id,
                            leaf: block.leaf,
                            depth,
                        })
                    }
                };
                fetched.push((block.id, sealed, block.payload));
            }
        }
        self.stash.merge(fetched);
        Ok(())
    }

    /// Rewrites every bucket on `path`, deepest first.
    fn evict_path<R: RngCore + CryptoRng>(
        &mut self,
        path: &Position,
        rng: &mut R,
    ) -> Result<(), OramError> {
        for depth in (0..=self.height).rev() {
            let selected = self
                .stash
                .select_for_eviction(path, depth, self.bucket_size);

            let mut envelopes = Vec::with_capacity(self.bucket_size);
            for id in selected {
                if let Some(entry) = self.stash.remove(id) {
                    envelopes.push(self.codec.encode(
                        id,
                        entry.position.label(),
                        &entry.payload,
                        rng,
                    )?);
                }
            }
            while envelopes.len() < self.bucket_size {
                envelopes.push(self.codec.encode_dummy(rng)?);
            }

            self.server.write_bucket(path, depth, envelopes)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn position_map_mut(&mut self) -> &mut PositionMap<S> {
        &mut self.position_map
    }

    /// Panics unless every real block in every level's tree sits on the path to its sealed leaf,
    /// and, where the map is client-held, that leaf is the one the map records.
    #[cfg(test)]
    pub(crate) fn assert_path_invariant(&self) {
        let flat_map = match &self.position_map {
            PositionMap::Flat(map) => Some(map),
            PositionMap::Recursive(_) => None,
        };

        for (index, bucket) in self.server.buckets().iter().enumerate() {
            let depth = (index as u64 + 1).ilog2();
            for envelope in bucket.envelopes() {
                let block = self.codec.decode(envelope).unwrap();
                if self.codec.is_dummy(&block) {
                    continue;
                }
                let sealed = Position::new(block.leaf, self.height).unwrap();
                assert_eq!(
                    sealed.bucket_index(depth).unwrap(),
                    index,
                    "level {} block {} is off its path",
                    self.level,
                    block.id
                );
                assert!(!self.stash.contains(block.id));
                if let Some(map) = flat_map {
                    assert_eq!(map.lookup(block.id), Some(block.leaf));
                }
            }
        }

        if let Some(map) = flat_map {
            for (id, entry) in self.stash.iter() {
                assert_eq!(map.lookup(*id), Some(entry.position.label()));
            }
        }

        if let PositionMap::Recursive(inner) = &self.position_map {
            inner.assert_path_invariant();
        }
    }
}

impl<S: StorageServer> Oram for PathOram<S> {
    fn block_capacity(&self) -> Result<BlockId, OramError> {
        Ok(leaf_count(self.height))
    }

    fn access<R: RngCore + CryptoRng>(
        &mut self,
        operation: Operation<'_>,
        id: BlockId,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError> {
        let padding = match self.layout {
            LevelLayout::Data(padding) => padding,
            LevelLayout::PositionRecords(_) => {
                return Err(OramError::InvalidConfiguration(
                    "position map levels are not directly addressable".into(),
                ))
            }
        };

        // Rejected here, before any state changes, so the session stays usable.
        let replacement = match operation {
            Operation::Read => None,
            Operation::Write(payload) => Some(padding.pad(payload)?),
        };

        let previous = self.access_block(id, |_| Ok(replacement), rng)?;
        previous.map(|field| padding.unpad(&field)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        server::{CountAccessesServer, ServerCall},
        test_utils::*,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn config(tree_height: TreeHeight) -> OramConfig {
        OramConfig {
            tree_height,
            block_payload_size: 16,
            ..OramConfig::default()
        }
    }

    fn recursive_config(tree_height: TreeHeight, k: usize, levels: usize) -> OramConfig {
        OramConfig {
            position_compression_factor: k,
            recursion_levels: Some(levels),
            ..config(tree_height)
        }
    }

    // Flat position map.
    create_correctness_tests!(3, 4, 8, 0, 16);
    create_correctness_tests!(6, 4, 8, 0, 16);

    // Small and large buckets.
    create_correctness_tests!(6, 3, 8, 0, 16);
    create_correctness_tests!(6, 5, 8, 0, 16);

    // Recursive position maps, down to a single-leaf top level.
    create_correctness_tests!(6, 4, 2, 3, 16);
    create_correctness_tests!(6, 4, 4, 3, 16);
    create_correctness_tests!(7, 4, 8, 2, 16);

    // Tiny and larger payloads.
    create_correctness_tests!(5, 4, 4, 1, 1);
    create_correctness_tests!(5, 4, 4, 1, 300);

    #[test]
    fn concrete_scenario() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(0);
        let config = OramConfig {
            tree_height: 3,
            bucket_size: 4,
            ..config(3)
        };
        let mut oram = DefaultOram::new(&config, &mut rng).unwrap();

        assert_eq!(oram.write(5, b"hello", &mut rng).unwrap(), None);
        assert_eq!(oram.write(2, b"world", &mut rng).unwrap(), None);
        assert_eq!(oram.read(5, &mut rng).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(oram.read(2, &mut rng).unwrap(), Some(b"world".to_vec()));
        assert_eq!(oram.read(7, &mut rng).unwrap(), None);
        oram.assert_path_invariant();
    }

    #[test]
    fn write_returns_previous_payload() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut oram = DefaultOram::new(&config(4), &mut rng).unwrap();
        assert_eq!(oram.write(9, b"first", &mut rng).unwrap(), None);
        assert_eq!(
            oram.write(9, b"", &mut rng).unwrap(),
            Some(b"first".to_vec())
        );
        assert_eq!(oram.read(9, &mut rng).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn unwritten_ids_read_as_not_found() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut oram = DefaultOram::new(&recursive_config(5, 2, 2), &mut rng).unwrap();
        for id in 0..oram.block_capacity().unwrap() {
            assert_eq!(oram.read(id, &mut rng).unwrap(), None, "{id}");
        }
        // Reading again after the position map has assigned leaves changes nothing.
        for id in 0..oram.block_capacity().unwrap() {
            assert_eq!(oram.read(id, &mut rng).unwrap(), None, "{id}");
        }
        assert_eq!(oram.stash_occupancy(), 0);
    }

    #[test]
    fn recursive_ids_across_packed_blocks() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(3);
        let k = 4;
        let mut oram = DefaultOram::new(&recursive_config(8, k, 2), &mut rng).unwrap();
        assert_eq!(oram.recursion_height(), 2);

        // 2k + 1 ids span three packed blocks; the last one starts a new block.
        let ids: Vec<BlockId> = (0..(2 * k as u64 + 1)).collect();
        for id in &ids {
            oram.write(*id, format!("block {id}").as_bytes(), &mut rng)
                .unwrap();
        }
        for id in &ids {
            assert_eq!(
                oram.read(*id, &mut rng).unwrap(),
                Some(format!("block {id}").into_bytes())
            );
        }
        oram.assert_path_invariant();
    }

    #[test]
    fn derived_recursion_reaches_the_cutoff() {
        let mut rng = StdRng::seed_from_u64(4);
        let config = OramConfig {
            position_compression_factor: 4,
            position_map_cutoff: 8,
            ..config(7)
        };
        let oram = DefaultOram::new(&config, &mut rng).unwrap();
        // Heights 7 -> 5 -> 3; 2^3 entries fit the cutoff.
        assert_eq!(oram.recursion_height(), 2);
        let heights: Vec<TreeHeight> = oram.level_servers().iter().map(|s| s.height()).collect();
        assert_eq!(heights, vec![7, 5, 3]);
    }

    #[test]
    fn oversized_payload_leaves_session_usable() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut oram =
            PathOram::<CountAccessesServer<OramTree>>::new(&config(3), &mut rng).unwrap();
        oram.write(1, b"kept", &mut rng).unwrap();
        let calls = oram.level_servers()[0].transcript().len();

        assert!(matches!(
            oram.write(1, &[0u8; 17], &mut rng),
            Err(OramError::OversizedPayload { len: 17, capacity: 16 })
        ));
        let out_of_range = oram.read(8, &mut rng).unwrap_err();
        assert!(matches!(
            out_of_range,
            OramError::BlockIdOutOfRange { id: 8, capacity: 8 }
        ));
        assert!(out_of_range.is_protocol_parameter_error());
        assert_eq!(oram.level_servers()[0].transcript().len(), calls);
        assert!(!oram.is_poisoned());

        // A payload of exactly the capacity is fine.
        oram.write(2, &[0xff; 16], &mut rng).unwrap();
        assert_eq!(oram.read(1, &mut rng).unwrap(), Some(b"kept".to_vec()));
        assert_eq!(oram.read(2, &mut rng).unwrap(), Some(vec![0xff; 16]));
    }

    #[test]
    fn transcripts_do_not_depend_on_the_workload() {
        let config = recursive_config(6, 4, 2);

        let run = |seed: u64, ids: &[BlockId], write: bool| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut oram = PathOram::<CountAccessesServer<OramTree>>::new(&config, &mut rng)
                .unwrap();
            for id in ids {
                if write {
                    let payload = vec![*id as u8; rng.gen_range(0..=16)];
                    oram.write(*id, &payload, &mut rng).unwrap();
                } else {
                    oram.read(*id, &mut rng).unwrap();
                }
            }
            oram.level_servers()
                .iter()
                .map(|server| server.transcript().to_vec())
                .collect::<Vec<Vec<ServerCall>>>()
        };

        let repeated = run(0, &[7; 40], true);
        let scattered: Vec<BlockId> = (0..40).map(|i| (i * 13) % 64).collect();
        let spread = run(1, &scattered, true);
        let reads = run(2, &scattered, false);

        assert_eq!(repeated, spread);
        assert_eq!(repeated, reads);

        for calls in &repeated {
            for call in calls {
                if let ServerCall::WriteBucket { envelopes, .. } = call {
                    assert_eq!(*envelopes, config.bucket_size);
                }
            }
        }
    }

    #[test]
    fn stash_stays_small() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(6);
        let config = OramConfig {
            tree_height: 10,
            block_payload_size: 8,
            ..OramConfig::default()
        };
        let mut oram = DefaultOram::new(&config, &mut rng).unwrap();
        let capacity = oram.block_capacity().unwrap();
        for _ in 0..4000 {
            let id = rng.gen_range(0..capacity);
            oram.write(id, b"payload", &mut rng).unwrap();
        }
        let bound = config.bucket_size * config.tree_height as usize;
        assert!(
            oram.peak_stash_occupancy() < bound,
            "peak stash occupancy {} reached Z * L = {}",
            oram.peak_stash_occupancy(),
            bound
        );
    }

    // This test is #[ignore]'d because the tree alone takes several hundred megabytes.
    #[test]
    #[ignore]
    fn stash_stays_small_at_height_20() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(7);
        let config = OramConfig {
            tree_height: 20,
            bucket_size: 4,
            block_payload_size: 1,
            block_id_width: 3,
            ..OramConfig::default()
        };
        let mut oram = DefaultOram::new(&config, &mut rng).unwrap();
        let capacity = oram.block_capacity().unwrap();
        for _ in 0..20_000 {
            let id = rng.gen_range(0..capacity);
            oram.write(id, &[1], &mut rng).unwrap();
        }
        assert!(oram.peak_stash_occupancy() < config.bucket_size * 20);
    }

    #[test]
    fn initial_blocks_are_readable() {
        init_logger();
        let mut rng = StdRng::seed_from_u64(8);
        let config = recursive_config(6, 4, 1);
        let blocks: Vec<(BlockId, Vec<u8>)> = (0..50u64)
            .map(|id| (id, format!("initial {id}").into_bytes()))
            .collect();
        let mut oram = DefaultOram::new_with_blocks(&config, blocks.clone(), &mut rng).unwrap();
        oram.assert_path_invariant();

        for (id, payload) in blocks {
            assert_eq!(oram.read(id, &mut rng).unwrap(), Some(payload));
        }
        assert_eq!(oram.read(63, &mut rng).unwrap(), None);
        oram.assert_path_invariant();
    }

    #[test]
    fn initial_blocks_are_checked() {
        let mut rng = StdRng::seed_from_u64(9);
        let config = config(3);
        assert!(matches!(
            DefaultOram::new_with_blocks(&config, vec![(8, vec![])], &mut rng),
            Err(OramError::BlockIdOutOfRange { id: 8, .. })
        ));
        assert!(matches!(
            DefaultOram::new_with_blocks(&config, vec![(1, vec![]), (1, vec![])], &mut rng),
            Err(OramError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            DefaultOram::new_with_blocks(&config, vec![(1, vec![0; 17])], &mut rng),
            Err(OramError::OversizedPayload { .. })
        ));
        assert!(matches!(
            DefaultOram::new(
                &OramConfig {
                    bucket_size: 1,
                    ..config
                },
                &mut rng
            ),
            Err(OramError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn close_returns_the_data_tree() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut oram = DefaultOram::new(&recursive_config(4, 2, 1), &mut rng).unwrap();
        oram.write(3, b"x", &mut rng).unwrap();
        let tree = oram.close();
        assert_eq!(tree.height(), 4);
        assert_eq!(tree.buckets().len(), 31);
    }

    #[test]
    fn same_key_sessions_share_a_wire_format() {
        let mut rng = StdRng::seed_from_u64(11);
        let key = EncryptionKey::generate(&mut rng);
        let first = DefaultOram::new_with_key(&config(3), &key, &mut rng).unwrap();
        let second = DefaultOram::new_with_key(&config(3), &key, &mut rng).unwrap();

        let servers = first.level_servers();
        let envelope = &servers[0].buckets()[0].envelopes()[0];
        assert!(second.codec.is_dummy(&second.codec.decode(envelope).unwrap()));
    }

    /// A server that corrupts or forges envelopes on request.
    #[derive(Debug)]
    struct TamperingServer {
        inner: OramTree,
        corrupt_next_read: bool,
        forge_with: Option<(BlockCodec, StdRng)>,
    }

    impl StorageServer for TamperingServer {
        fn initialize(
            buckets: Vec<Bucket>,
            height: TreeHeight,
            bucket_size: BucketSize,
        ) -> Result<Self, OramError> {
            Ok(Self {
                inner: OramTree::initialize(buckets, height, bucket_size)?,
                corrupt_next_read: false,
                forge_with: None,
            })
        }

        fn height(&self) -> TreeHeight {
            self.inner.height()
        }

        fn bucket_size(&self) -> BucketSize {
            self.inner.bucket_size()
        }

        fn read_path(&mut self, position: &Position) -> Result<Vec<Envelope>, OramError> {
            let mut envelopes = self.inner.read_path(position)?;
            let last = envelopes.len() - 1;
            if std::mem::take(&mut self.corrupt_next_read) {
                let mut bytes = envelopes[last].to_bytes();
                bytes[20] ^= 0x01;
                envelopes[last] = Envelope::from_bytes(&bytes, bytes.len())?;
            }
            if let Some((codec, rng)) = &mut self.forge_with {
                // A real block in the leaf bucket whose leaf differs in the last bit.
                envelopes[last] = codec.encode(0, position.label() ^ 1, &[0; 17], rng)?;
            }
            Ok(envelopes)
        }

        fn write_bucket(
            &mut self,
            position: &Position,
            depth: TreeHeight,
            envelopes: Vec<Envelope>,
        ) -> Result<(), OramError> {
            self.inner.write_bucket(position, depth, envelopes)
        }

        fn buckets(&self) -> &[Bucket] {
            self.inner.buckets()
        }
    }

    #[test]
    fn tampering_poisons_the_session() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut oram = PathOram::<TamperingServer>::new(&config(3), &mut rng).unwrap();
        oram.write(4, b"before", &mut rng).unwrap();

        oram.server.corrupt_next_read = true;
        assert!(matches!(
            oram.read(4, &mut rng),
            Err(OramError::DecryptionError)
        ));
        assert!(oram.is_poisoned());
        assert!(matches!(
            oram.read(4, &mut rng),
            Err(OramError::SessionPoisoned)
        ));
    }

    #[test]
    fn blocks_off_their_path_are_rejected() {
        let mut rng = StdRng::seed_from_u64(13);
        let key = EncryptionKey::generate(&mut rng);
        let config = config(3);
        let mut oram = PathOram::<TamperingServer>::new_with_key(&config, &key, &mut rng).unwrap();

        let codec = BlockCodec::new(&key, config.block_id_width, config.block_payload_size + 1)
            .unwrap();
        oram.server.forge_with = Some((codec, StdRng::seed_from_u64(14)));
        assert!(matches!(
            oram.read(1, &mut rng),
            Err(OramError::PathInvariantViolation { block_id: 0, depth: 3, .. })
        ));
        assert!(oram.is_poisoned());
    }

    #[test]
    fn nested_failures_poison_every_level() {
        let mut rng = StdRng::seed_from_u64(15);
        let mut oram =
            PathOram::<TamperingServer>::new(&recursive_config(4, 2, 1), &mut rng).unwrap();
        oram.write(0, b"zero", &mut rng).unwrap();

        if let PositionMap::Recursive(inner) = &mut oram.position_map {
            inner.server.corrupt_next_read = true;
        }
        assert!(matches!(
            oram.read(0, &mut rng),
            Err(OramError::DecryptionError)
        ));
        assert!(oram.is_poisoned());
        assert!(matches!(
            oram.write(0, b"again", &mut rng),
            Err(OramError::SessionPoisoned)
        ));
    }

    #[test]
    fn stash_overflow_is_surfaced() {
        let mut rng = StdRng::seed_from_u64(16);
        let config = OramConfig {
            bucket_size: 2,
            stash_overflow_size: 0,
            ..config(5)
        };
        let mut oram = DefaultOram::new(&config, &mut rng).unwrap();

        let mut overflow = None;
        for i in 0..5000u64 {
            if let Err(error) = oram.write(i % 32, b"fill", &mut rng) {
                overflow = Some(error);
                break;
            }
        }
        assert!(matches!(
            overflow,
            Some(OramError::StashOverflow { bound: 0, .. })
        ));
        assert!(matches!(
            oram.read(0, &mut rng),
            Err(OramError::SessionPoisoned)
        ));
    }
}
