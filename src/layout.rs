// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! What the payload field of a block means at each level of the recursive chain.
//!
//! Level 0 stores user payloads padded to a fixed width. Every higher level stores
//! `k` packed `(block id, leaf)` records describing the level below it.

use crate::{config::OramConfig, BlockId, OramError, TreeHeight};
use std::collections::BTreeMap;
use subtle::{ConditionallySelectable, ConstantTimeEq};

const PADDING_MARKER: u8 = 0x80;

/// The leaf value of a record whose block has never been assigned a position.
pub(crate) const UNASSIGNED: u64 = u64::MAX;

/// The payload strategy of one level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LevelLayout {
    Data(PaddedPayload),
    PositionRecords(PositionRecords),
}

impl LevelLayout {
    pub(crate) fn for_level(config: &OramConfig, level: usize) -> Self {
        if level == 0 {
            LevelLayout::Data(PaddedPayload::new(config.block_payload_size))
        } else {
            LevelLayout::PositionRecords(PositionRecords {
                level,
                id_width: config.block_id_width,
                records_per_block: config.position_compression_factor,
                compression_bits: config.compression_bits(),
            })
        }
    }

    /// The width of the payload field sealed by the codec of this level.
    pub(crate) fn payload_size(&self) -> usize {
        match self {
            LevelLayout::Data(padding) => padding.field_size(),
            LevelLayout::PositionRecords(records) => records.block_size(),
        }
    }
}

/// User payloads of at most `capacity` bytes, followed by `0x80` and zero fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PaddedPayload {
    capacity: usize,
}

impl PaddedPayload {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    fn field_size(&self) -> usize {
        self.capacity + 1
    }

    pub(crate) fn pad(&self, payload: &[u8]) -> Result<Vec<u8>, OramError> {
        if payload.len() > self.capacity {
            return Err(OramError::OversizedPayload {
                len: payload.len(),
                capacity: self.capacity,
            });
        }
        let mut field = Vec::with_capacity(self.field_size());
        field.extend_from_slice(payload);
        field.push(PADDING_MARKER);
        field.resize(self.field_size(), 0);
        Ok(field)
    }

    pub(crate) fn unpad(&self, field: &[u8]) -> Result<Vec<u8>, OramError> {
        match field.iter().rposition(|b| *b != 0) {
            Some(end) if field[end] == PADDING_MARKER && field.len() == self.field_size() => {
                Ok(field[..end].to_vec())
            }
            _ => Err(OramError::DecryptionError),
        }
    }
}

/// `records_per_block` records of `id (id_width bytes, LE) || leaf (8 bytes, LE)`.
///
/// Packed block `j` of level `level` holds the records of ids `j * k .. (j + 1) * k` of level `level - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PositionRecords {
    level: usize,
    id_width: usize,
    records_per_block: usize,
    compression_bits: TreeHeight,
}

impl PositionRecords {
    fn record_size(&self) -> usize {
        self.id_width + 8
    }

    fn block_size(&self) -> usize {
        self.records_per_block * self.record_size()
    }

    pub(crate) fn level(&self) -> usize {
        self.level
    }

    /// The packed block holding the record of `id`.
    pub(crate) fn packed_id(&self, id: BlockId) -> BlockId {
        id >> self.compression_bits
    }

    fn encode_id(&self, id: BlockId) -> Vec<u8> {
        let bytes = id.to_le_bytes();
        (0..self.id_width)
            .map(|i| bytes.get(i).copied().unwrap_or(0))
            .collect()
    }

    /// A packed block for `packed_id` whose records are all unassigned.
    pub(crate) fn fresh_block(&self, packed_id: BlockId) -> Vec<u8> {
        let mut block = Vec::with_capacity(self.block_size());
        let first = packed_id << self.compression_bits;
        for id in (first..).take(self.records_per_block) {
            block.extend_from_slice(&self.encode_id(id));
            block.extend_from_slice(&UNASSIGNED.to_le_bytes());
        }
        block
    }

    /// Overwrites the leaf of the record for `id` with `new_leaf`, returning the previous leaf
    /// (`None` if unassigned). Every record is visited and compared in constant time.
    ///
    /// # Errors
    ///
    /// Returns `RecursiveLookupInconsistency` unless exactly one record matches `id`.
    pub(crate) fn replace_leaf(
        &self,
        block: &mut [u8],
        id: BlockId,
        new_leaf: u64,
    ) -> Result<Option<u64>, OramError> {
        let inconsistent = OramError::RecursiveLookupInconsistency {
            level: self.level,
            block_id: id,
        };
        if block.len() != self.block_size() {
            return Err(inconsistent);
        }

        let target = self.encode_id(id);
        let mut matches = 0u32;
        let mut previous = 0u64;
        for record in block.chunks_exact_mut(self.record_size()) {
            let (id_bytes, leaf_bytes) = record.split_at_mut(self.id_width);
            let is_match = id_bytes.ct_eq(target.as_slice());

            let mut current = [0u8; 8];
            current.copy_from_slice(leaf_bytes);
            let current = u64::from_le_bytes(current);

            previous.conditional_assign(&current, is_match);
            let updated = u64::conditional_select(&current, &new_leaf, is_match);
            leaf_bytes.copy_from_slice(&updated.to_le_bytes());
            matches.conditional_assign(&(matches + 1), is_match);
        }

        if matches != 1 {
            return Err(inconsistent);
        }
        Ok((previous != UNASSIGNED).then_some(previous))
    }

    /// Packs `(id, leaf)` pairs into blocks. Groups with no pair produce no block.
    pub(crate) fn pack(
        &self,
        positions: &[(BlockId, u64)],
    ) -> Result<Vec<(BlockId, Vec<u8>)>, OramError> {
        let mut blocks: BTreeMap<BlockId, Vec<u8>> = BTreeMap::new();
        for (id, leaf) in positions {
            let packed_id = self.packed_id(*id);
            let block = blocks
                .entry(packed_id)
                .or_insert_with(|| self.fresh_block(packed_id));
            self.replace_leaf(block, *id, *leaf)?;
        }
        Ok(blocks.into_iter().collect())
    }
}
