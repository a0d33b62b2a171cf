// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Client construction parameters.

use crate::{
    codec::MAXIMUM_BLOCK_ID_WIDTH, position::MAXIMUM_TREE_HEIGHT, BlockId, BucketSize, OramError,
    StashSize, TreeHeight,
};

/// The default tree height `L`.
pub const DEFAULT_TREE_HEIGHT: TreeHeight = 10;

/// The parameter "Z" from the Path ORAM literature that sets the number of blocks per bucket; typical values are 3 or 4.
/// Here we adopt the more conservative setting of 4.
pub const DEFAULT_BLOCKS_PER_BUCKET: BucketSize = 4;

/// The default payload capacity of a data block, in bytes.
pub const DEFAULT_BLOCK_PAYLOAD_SIZE: usize = 4096;

/// The default width of the sealed block id field, in bytes.
pub const DEFAULT_BLOCK_ID_WIDTH: usize = 8;

/// The default number of positions stored per position block.
pub const DEFAULT_POSITIONS_PER_BLOCK: usize = 8;

/// The default number of position map entries a client is willing to hold in memory.
/// Larger position maps are stored recursively.
pub const DEFAULT_POSITION_MAP_CUTOFF: u64 = 1 << 14;

/// The default number of blocks that the stash (and recursive stashes) can hold between accesses.
///
/// With Z = 4, experiments from the [original Path ORAM paper](https://eprint.iacr.org/2013/280.pdf)
/// indicate that a bound of 40 is exceeded with probability below 2^{-50}.
pub const DEFAULT_STASH_OVERFLOW_SIZE: StashSize = 40;

/// Parameters of a Path ORAM client and its recursive position map.
///
/// ## Parameters
///
/// - `tree_height` (`L`): the data tree has `2^L` leaves and addresses block ids `0..2^L`.
///     Per-access I/O is `O(L * Z)`.
/// - `bucket_size` (`Z`): blocks per bucket. Must be at least 2. Typical values are 3, 4, or 5.
///     Along with the stash bound, this value affects the probability of stash overflow.
/// - `block_payload_size`: the largest payload, in bytes, that a write may store.
/// - `block_id_width`: bytes used for the sealed id field. The all-`0xff` id is reserved for dummies.
/// - `position_compression_factor` (`k`): position records packed per block of a recursive level.
///     Must be a power of two and at least 2. Larger `k` means fewer levels but bigger blocks.
/// - `recursion_levels`: the number of position-map ORAMs. `Some(0)` keeps the whole map on the
///     client; `None` derives the smallest count whose top map fits in `position_map_cutoff` entries.
/// - `stash_overflow_size`: the stash bound checked after every access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OramConfig {
    /// The tree height `L` of the data ORAM.
    pub tree_height: TreeHeight,
    /// The bucket capacity `Z`.
    pub bucket_size: BucketSize,
    /// The payload capacity of a data block, in bytes.
    pub block_payload_size: usize,
    /// The width of the sealed block id field, in bytes.
    pub block_id_width: usize,
    /// The number of position records packed into one block of a recursive level.
    pub position_compression_factor: usize,
    /// The number of recursive position-map levels, or `None` to derive it.
    pub recursion_levels: Option<usize>,
    /// The largest position map kept as plain client state when deriving `recursion_levels`.
    pub position_map_cutoff: u64,
    /// The largest stash occupancy tolerated after an access.
    pub stash_overflow_size: StashSize,
}

impl Default for OramConfig {
    fn default() -> Self {
        Self {
            tree_height: DEFAULT_TREE_HEIGHT,
            bucket_size: DEFAULT_BLOCKS_PER_BUCKET,
            block_payload_size: DEFAULT_BLOCK_PAYLOAD_SIZE,
            block_id_width: DEFAULT_BLOCK_ID_WIDTH,
            position_compression_factor: DEFAULT_POSITIONS_PER_BLOCK,
            recursion_levels: None,
            position_map_cutoff: DEFAULT_POSITION_MAP_CUTOFF,
            stash_overflow_size: DEFAULT_STASH_OVERFLOW_SIZE,
        }
    }
}

impl OramConfig {
    /// A configuration with a tree of height `tree_height` and default values elsewhere.
    pub fn with_tree_height(tree_height: TreeHeight) -> Self {
        Self {
            tree_height,
            ..Self::default()
        }
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfiguration` in the following cases.
    ///
    /// - `tree_height` exceeds the maximum supported height.
    /// - `bucket_size` is 0 or 1.
    /// - `block_payload_size` is 0.
    /// - `block_id_width` is 0, too wide, or too narrow for ids `0..2^L` plus the dummy sentinel.
    /// - `position_compression_factor` is 0, 1, or is not a power of two.
    /// - `position_map_cutoff` is 0.
    /// - an explicit `recursion_levels` would shrink some level below a single leaf.
    pub fn validate(&self) -> Result<(), OramError> {
        if self.tree_height > MAXIMUM_TREE_HEIGHT {
            return Err(invalid(format!(
                "tree height {} exceeds the maximum of {}",
                self.tree_height, MAXIMUM_TREE_HEIGHT
            )));
        }
        if self.bucket_size <= 1 {
            return Err(invalid(format!(
                "bucket size must be at least 2, got {}",
                self.bucket_size
            )));
        }
        if self.block_payload_size == 0 {
            return Err(invalid("block payload size must be positive".into()));
        }
        if self.block_id_width == 0 || self.block_id_width > MAXIMUM_BLOCK_ID_WIDTH {
            return Err(invalid(format!(
                "block id width must be between 1 and {} bytes, got {}",
                MAXIMUM_BLOCK_ID_WIDTH, self.block_id_width
            )));
        }
        // Ids 0..2^L must all lie strictly below the all-0xff dummy sentinel.
        if self.block_id_width < 8 && u64::from(self.tree_height) >= 8 * self.block_id_width as u64
        {
            return Err(invalid(format!(
                "{}-byte block ids cannot address 2^{} blocks",
                self.block_id_width, self.tree_height
            )));
        }
        let k = self.position_compression_factor;
        if k < 2 || !k.is_power_of_two() {
            return Err(invalid(format!(
                "position compression factor must be a power of two of at least 2, got {k}"
            )));
        }
        if self.position_map_cutoff == 0 {
            return Err(invalid("position map cutoff must be positive".into()));
        }
        if let Some(levels) = self.recursion_levels {
            let shrink = u64::from(self.compression_bits()) * u64::try_from(levels)?;
            if shrink > u64::from(self.tree_height) {
                return Err(invalid(format!(
                    "{levels} recursion levels with k = {k} exceed a tree of height {}",
                    self.tree_height
                )));
            }
        }
        Ok(())
    }

    /// `log2(k)`: how many tree levels each recursion step removes.
    pub(crate) fn compression_bits(&self) -> TreeHeight {
        self.position_compression_factor.checked_ilog2().unwrap_or(0)
    }

    /// The number of recursive position-map levels, derived from `position_map_cutoff` if not explicit.
    pub fn recursion_levels(&self) -> usize {
        if let Some(levels) = self.recursion_levels {
            return levels;
        }
        let bits = self.compression_bits();
        let mut levels = 0;
        let mut height = self.tree_height;
        while bits > 0
            && height >= bits
            && 1u64
                .checked_shl(height)
                .map_or(true, |ids| ids > self.position_map_cutoff)
        {
            height -= bits;
            levels += 1;
        }
        levels
    }

    /// The tree height of recursion level `level` (level 0 is the data ORAM).
    pub fn level_height(&self, level: usize) -> Result<TreeHeight, OramError> {
        let shrink = self.compression_bits() * TreeHeight::try_from(level)?;
        self.tree_height
            .checked_sub(shrink)
            .ok_or_else(|| invalid(format!("level {level} is deeper than the recursion allows")))
    }

    /// The number of block ids addressable at recursion level `level`.
    pub fn level_capacity(&self, level: usize) -> Result<BlockId, OramError> {
        Ok(1 << self.level_height(level)?)
    }
}

fn invalid(message: String) -> OramError {
    OramError::InvalidConfiguration(message)
}
