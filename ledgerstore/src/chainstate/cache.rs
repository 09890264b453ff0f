// Copyright (C) 2013-2020 Blockstack PBC, a public benefit corporation
// Copyright (C) 2020-2024 Stacks Open Internet Foundation
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Block ancestry metadata and ancestor search.
//!
//! Every attached block carries a `search_block_id` pointing at the
//! ancestor at `get_skip_height(height)`. Walking those pointers reaches
//! any ancestor in a number of hops logarithmic in the height.

use ledgerstore_common::util::lru_cache::LruCache;

use crate::chainstate::Error;
use crate::db::{column, Error as DBError};
use crate::store::DataStore;

/// Ancestry facts of one attached block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub height: i64,
    pub prev_id: Option<i64>,
    pub search_id: Option<i64>,
}

/// Bounded map from block id to its ancestry facts.
pub struct BlockCache {
    cache: LruCache<i64, BlockMeta>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> BlockCache {
        BlockCache {
            cache: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, block_id: i64) -> Option<BlockMeta> {
        self.cache.get(&block_id)
    }

    pub fn insert(&mut self, block_id: i64, meta: BlockMeta) {
        self.cache.insert(block_id, meta);
    }

    pub fn contains(&self, block_id: i64) -> bool {
        self.cache.contains_key(&block_id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    pub fn clear(&mut self) {
        self.cache.clear()
    }
}

fn invert_lowest_one(n: i64) -> i64 {
    n & (n - 1)
}

/// Height of the ancestor a block at `height` keeps a search pointer to.
pub fn get_skip_height(height: i64) -> i64 {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

impl DataStore {
    pub(crate) fn cache_block(
        &mut self,
        block_id: i64,
        height: i64,
        prev_id: Option<i64>,
        search_id: Option<i64>,
    ) -> BlockMeta {
        let meta = BlockMeta {
            height,
            prev_id,
            search_id,
        };
        self.block_cache.insert(block_id, meta);
        meta
    }

    /// Ancestry of an attached block. A miss reads one row.
    pub fn load_block(&mut self, block_id: i64) -> Result<BlockMeta, Error> {
        if let Some(meta) = self.block_cache.get(block_id) {
            return Ok(meta);
        }
        let row = self
            .conn
            .select_row(
                "SELECT block_height, prev_block_id, search_block_id
                   FROM block
                  WHERE block_id = ?",
                &[block_id.into()],
            )?
            .ok_or(DBError::NotFoundError)?;
        let Some(height) = column(&row, 0)?.as_i64()? else {
            // orphans have no ancestry yet
            return Err(DBError::NotFoundError.into());
        };
        let prev_id = column(&row, 1)?.as_i64()?;
        let search_id = column(&row, 2)?.as_i64()?;
        Ok(self.cache_block(block_id, height, prev_id, search_id))
    }

    /// The ancestor of `block_id` at `height`, or None if `height` is above it.
    pub fn get_block_id_at_height(
        &mut self,
        block_id: i64,
        height: i64,
    ) -> Result<Option<i64>, Error> {
        if height < 0 {
            return Ok(None);
        }
        let mut walk_id = block_id;
        let mut meta = self.load_block(walk_id)?;
        if height > meta.height {
            return Ok(None);
        }
        while meta.height > height {
            let skip = get_skip_height(meta.height);
            let skip_prev = get_skip_height(meta.height - 1);
            let use_skip = skip == height
                || (skip > height && !(skip_prev < skip - 2 && skip_prev >= height));
            walk_id = match (meta.search_id, meta.prev_id) {
                (Some(search_id), _) if use_skip => search_id,
                (_, Some(prev_id)) => prev_id,
                (_, None) => {
                    error!("Attached block has no parent above genesis";
                           "block_id" => walk_id, "height" => meta.height);
                    return Err(Error::Corruption);
                }
            };
            meta = self.load_block(walk_id)?;
        }
        Ok(Some(walk_id))
    }

    /// True if `ancestor_id` is `block_id` or one of its ancestors.
    pub fn is_descended_from(&mut self, block_id: i64, ancestor_id: i64) -> Result<bool, Error> {
        let ancestor = self.load_block(ancestor_id)?;
        Ok(self.get_block_id_at_height(block_id, ancestor.height)? == Some(ancestor_id))
    }
}
