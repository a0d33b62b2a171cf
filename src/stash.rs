// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-side Path ORAM stash.

use crate::{position::Position, BlockId, StashSize, TreeHeight};
use std::collections::HashMap;

/// A plaintext block held by the client between a path read and its eviction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StashEntry {
    /// The leaf the block is currently mapped to.
    pub position: Position,
    /// The fixed-width payload field of the block.
    pub payload: Vec<u8>,
    sequence: u64,
}

/// Blocks in transit, keyed by block id.
///
/// Eviction picks among eligible entries in the order they first entered the stash.
/// That order depends only on the sequence of paths read and writes issued,
/// never on the values of the block ids involved.
#[derive(Debug, Default)]
pub struct Stash {
    entries: HashMap<BlockId, StashEntry>,
    next_sequence: u64,
    peak_occupancy: StashSize,
}

impl Stash {
    /// An empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts every block of `blocks`, overwriting entries with the same id.
    pub fn merge<I: IntoIterator<Item = (BlockId, Position, Vec<u8>)>>(&mut self, blocks: I) {
        for (id, position, payload) in blocks {
            self.put(id, position, payload);
        }
    }

    /// Whether the stash holds block `id`.
    pub fn contains(&self, id: BlockId) -> bool {
        self.entries.contains_key(&id)
    }

    /// The entry for block `id`, if present.
    pub fn get(&self, id: BlockId) -> Option<&StashEntry> {
        self.entries.get(&id)
    }

    /// Inserts or replaces the entry for `id`. A replaced entry keeps its place in the eviction order.
    pub fn put(&mut self, id: BlockId, position: Position, payload: Vec<u8>) {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.position = position;
                entry.payload = payload;
            }
            None => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.entries.insert(
                    id,
                    StashEntry {
                        position,
                        payload,
                        sequence,
                    },
                );
            }
        }
    }

    /// Moves block `id` to `position`. Returns false if `id` is not in the stash.
    pub fn reposition(&mut self, id: BlockId, position: Position) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.position = position;
                true
            }
            None => false,
        }
    }

    /// Removes and returns the entry for `id`.
    pub fn remove(&mut self, id: BlockId) -> Option<StashEntry> {
        self.entries.remove(&id)
    }

    /// Returns at most `capacity` ids whose position shares the bucket at `depth` with `path`,
    /// oldest entries first.
    pub fn select_for_eviction(
        &self,
        path: &Position,
        depth: TreeHeight,
        capacity: usize,
    ) -> Vec<BlockId> {
        let mut eligible: Vec<(u64, BlockId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.position.shares_bucket_at(path, depth))
            .map(|(id, entry)| (entry.sequence, *id))
            .collect();
        eligible.sort_unstable();
        eligible
            .into_iter()
            .take(capacity)
            .map(|(_, id)| id)
            .collect()
    }

    /// The number of blocks in the stash.
    pub fn len(&self) -> StashSize {
        self.entries.len()
    }

    /// Whether the stash is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Folds the current occupancy into the peak and returns it.
    pub(crate) fn record_occupancy(&mut self) -> StashSize {
        self.peak_occupancy = self.peak_occupancy.max(self.len());
        self.len()
    }

    /// The largest occupancy recorded so far.
    pub fn peak_occupancy(&self) -> StashSize {
        self.peak_occupancy
    }

    /// Iterates over all entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&BlockId, &StashEntry)> {
        self.entries.iter()
    }
}
