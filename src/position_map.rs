// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Flat and recursive Path ORAM position maps.

use crate::{
    path_oram::PathOram, position::Position, server::StorageServer, BlockId, OramError,
};
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;

/// A position map held entirely by the client.
#[derive(Debug, Default)]
pub struct FlatPositionMap {
    leaves: HashMap<BlockId, u64>,
}

impl FlatPositionMap {
    /// A map with the given `(id, leaf)` entries.
    pub fn from_positions<I: IntoIterator<Item = (BlockId, u64)>>(positions: I) -> Self {
        Self {
            leaves: positions.into_iter().collect(),
        }
    }

    /// The leaf of `id`, or `None` if `id` was never assigned one.
    pub fn lookup(&self, id: BlockId) -> Option<u64> {
        self.leaves.get(&id).copied()
    }

    /// Maps `id` to `leaf`.
    pub fn remap(&mut self, id: BlockId, leaf: u64) {
        self.leaves.insert(id, leaf);
    }

    /// The number of assigned ids.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether no id has been assigned.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// A recursive Path ORAM position map data structure.
#[derive(Debug)]
pub enum PositionMap<S: StorageServer> {
    /// A client-held map; terminates the recursion.
    Flat(FlatPositionMap),
    /// A smaller Path ORAM whose blocks pack the records of this map.
    Recursive(Box<PathOram<S>>),
}

impl<S: StorageServer> PositionMap<S> {
    /// The number of Path ORAMs stacked above the level that owns this map.
    pub fn recursion_height(&self) -> usize {
        match self {
            PositionMap::Flat(_) => 0,
            PositionMap::Recursive(inner) => 1 + inner.recursion_height(),
        }
    }

    /// Returns the current position of `id` and maps `id` to `new_position` in the same step.
    ///
    /// In the recursive case this is one full access to the packed block holding `id`'s record:
    /// the record is rewritten in place and every other record of the block is left untouched.
    pub(crate) fn lookup_and_remap<R: RngCore + CryptoRng>(
        &mut self,
        id: BlockId,
        new_position: Position,
        rng: &mut R,
    ) -> Result<Option<Position>, OramError> {
        let height = new_position.height();
        let previous = match self {
            PositionMap::Flat(map) => {
                let previous = map.lookup(id);
                map.remap(id, new_position.label());
                previous
            }

            PositionMap::Recursive(block_oram) => {
                let records = block_oram.position_records()?;
                let packed_id = records.packed_id(id);
                log::debug!(
                    "Level {} position lookup in packed block",
                    records.level()
                );

                // Packed blocks that were never written are created on first use.
                let mut previous = None;
                block_oram.access_block(
                    packed_id,
                    |current| {
                        let mut block = match current {
                            Some(block) => block.to_vec(),
                            None => records.fresh_block(packed_id),
                        };
                        previous = records.replace_leaf(&mut block, id, new_position.label())?;
                        Ok(Some(block))
                    },
                    rng,
                )?;
                previous
            }
        };

        previous
            .map(|label| Position::new(label, height))
            .transpose()
    }
}
