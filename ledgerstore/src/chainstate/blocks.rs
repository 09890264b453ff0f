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

//! Block import.
//!
//! A block is *attached* once its parent is attached (or it is a genesis
//! block): it then has a height, an ancestor-search pointer, cumulative
//! work and statistics. A block whose parent is unknown or unattached is
//! stored as an orphan keyed by the parent hash, and attached when that
//! parent is.

use std::collections::HashSet;
use std::sync::Once;

use ledgerstore_common::consts::WORK_BITS;
use ledgerstore_common::util::hash::{DoubleSha256, MerkleTree};
use ledgerstore_common::util::uint::Uint256;

use crate::backend::{SqlRow, SqlValue};
use crate::chainstate::cache::{get_skip_height, BlockMeta};
use crate::chainstate::{BlockRecord, Error};
use crate::db::{column, query_int, Error as DBError};
use crate::dialect::Codec;
use crate::store::DataStore;

enum Parent {
    Genesis,
    Attached(i64),
    /// Unknown or itself an orphan
    Missing,
}

/// Header and statistics of an attached block, as needed by its children.
#[derive(Debug, Clone)]
struct ParentStats {
    chain_work: Uint256,
    time: i64,
    total_satoshis: Option<i128>,
    total_seconds: Option<i128>,
    satoshi_seconds: Option<i128>,
    total_ss: Option<i128>,
}

static APPROXIMATE_STATISTICS: Once = Once::new();

/// A statistics column. Backends that keep wide NUMERIC values as floating
/// point (SQLite past 64 bits) hand them back approximately.
fn stat_column(row: &SqlRow, index: usize) -> Result<Option<i128>, DBError> {
    let value = column(row, index)?;
    if let SqlValue::Real(f) = value {
        APPROXIMATE_STATISTICS.call_once(|| {
            warn!("Block statistics are stored as floating point and are approximate";
                  "value" => f);
        });
    }
    value.as_i128()
}

fn opt_int(codec: &Codec, v: Option<i128>) -> Result<SqlValue, DBError> {
    match v {
        Some(v) => codec.intin(v),
        None => Ok(SqlValue::Null),
    }
}

impl DataStore {
    pub fn block_id_for_hash(&mut self, hash: &DoubleSha256) -> Result<Option<i64>, Error> {
        let codec = self.codec();
        Ok(query_int(
            &mut self.conn,
            "SELECT block_id FROM block WHERE block_hash = ?",
            &[codec.hash_in(hash)],
        )?)
    }

    /// Ancestry of a block, or None if it is unknown or still an orphan.
    pub fn attached_block(&mut self, block_id: i64) -> Result<Option<BlockMeta>, Error> {
        match self.load_block(block_id) {
            Ok(meta) => Ok(Some(meta)),
            Err(Error::DBError(DBError::NotFoundError)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_orphan(&mut self, block_id: i64) -> Result<bool, Error> {
        Ok(query_int(
            &mut self.conn,
            "SELECT COUNT(1) FROM orphan_block WHERE block_id = ?",
            &[block_id.into()],
        )?
        .unwrap_or(0)
            > 0)
    }

    pub fn block_chain_work(&mut self, block_id: i64) -> Result<Uint256, Error> {
        let codec = self.codec();
        let row = self
            .conn
            .select_row(
                "SELECT block_chain_work FROM block WHERE block_id = ?",
                &[block_id.into()],
            )?
            .ok_or(DBError::NotFoundError)?;
        codec
            .binout_int(column(&row, 0)?)?
            .ok_or(Error::Corruption)
    }

    /// Import a parsed block.
    ///
    /// The block is rejected untouched if its transactions do not hash to its
    /// Merkle root. A block already stored is left alone. A genesis block is
    /// offered to `chain_id`; any other attached block is offered to every
    /// chain its parent is a candidate of. Returns the block id.
    pub fn import_block(
        &mut self,
        block: &BlockRecord,
        chain_id: Option<i64>,
    ) -> Result<i64, Error> {
        let tx_hashes = block.tx_hashes();
        let merkle_root = MerkleTree::new(&tx_hashes).root();
        if merkle_root != block.hash_merkle_root {
            warn!("Rejecting block with bad Merkle root";
                  "block" => %block.hash.be_hex_string(),
                  "declared" => %block.hash_merkle_root.be_hex_string(),
                  "computed" => %merkle_root.be_hex_string());
            return Err(Error::MerkleRootMismatch {
                block_hash: block.hash,
                tx_hashes,
            });
        }

        if let Some(block_id) = self.block_id_for_hash(&block.hash)? {
            debug!("Block already stored";
                   "block" => %block.hash.be_hex_string(), "block_id" => block_id);
            return Ok(block_id);
        }

        let mut tx_ids = Vec::with_capacity(block.transactions.len());
        for tx in block.transactions.iter() {
            tx_ids.push(self.import_tx(tx)?);
        }

        let codec = self.codec();
        let value_out: u128 = block.transactions.iter().map(|tx| tx.value_out()).sum();
        let value_out = i128::try_from(value_out).map_err(|_| DBError::Overflow)?;
        let block_id = self.conn.new_id("block")?;
        self.conn.sql(
            "INSERT INTO block (
                block_id, block_hash, block_version, block_hashMerkleRoot,
                block_nTime, block_nBits, block_nNonce, block_value_out,
                block_num_tx
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                block_id.into(),
                codec.hash_in(&block.hash),
                block.version.into(),
                codec.hash_in(&block.hash_merkle_root),
                block.time.into(),
                block.bits.into(),
                block.nonce.into(),
                codec.intin(value_out)?,
                (tx_ids.len() as i64).into(),
            ],
        )?;
        for (pos, tx_id) in tx_ids.iter().enumerate() {
            self.conn.sql(
                "INSERT INTO block_tx (block_id, tx_id, tx_pos) VALUES (?, ?, ?)",
                &[block_id.into(), (*tx_id).into(), (pos as i64).into()],
            )?;
        }

        let parent = if block.is_genesis() {
            Parent::Genesis
        } else {
            match self.block_id_for_hash(&block.hash_prev)? {
                Some(prev_id) if self.attached_block(prev_id)?.is_some() => {
                    Parent::Attached(prev_id)
                }
                _ => Parent::Missing,
            }
        };

        let prev_id = match parent {
            Parent::Genesis => None,
            Parent::Attached(prev_id) => Some(prev_id),
            Parent::Missing => {
                self.conn.sql(
                    "INSERT INTO orphan_block (block_id, block_hashPrev) VALUES (?, ?)",
                    &[block_id.into(), codec.hash_in(&block.hash_prev)],
                )?;
                info!("Stored orphan block";
                      "block" => %block.hash.be_hex_string(),
                      "parent" => %block.hash_prev.be_hex_string());
                self.imported_bytes(block.size())?;
                return Ok(block_id);
            }
        };

        let meta = self.attach_block(block_id, prev_id)?;
        debug!("Attached block";
               "block" => %block.hash.be_hex_string(),
               "block_id" => block_id,
               "height" => meta.height);
        self.offer_block_to_chains(block_id, chain_id)?;
        self.adopt_orphans(block_id, &block.hash)?;

        self.imported_bytes(block.size())?;
        Ok(block_id)
    }

    fn parent_stats(&mut self, prev_id: i64) -> Result<ParentStats, Error> {
        let codec = self.codec();
        let row = self
            .conn
            .select_row(
                "SELECT block_chain_work, block_nTime, block_total_satoshis,
                        block_total_seconds, block_satoshi_seconds, block_total_ss
                   FROM block
                  WHERE block_id = ?",
                &[prev_id.into()],
            )?
            .ok_or(DBError::NotFoundError)?;
        Ok(ParentStats {
            chain_work: codec
                .binout_int(column(&row, 0)?)?
                .ok_or(Error::Corruption)?,
            time: column(&row, 1)?.as_i64()?.ok_or(Error::Corruption)?,
            total_satoshis: stat_column(&row, 2)?,
            total_seconds: stat_column(&row, 3)?,
            satoshi_seconds: stat_column(&row, 4)?,
            total_ss: stat_column(&row, 5)?,
        })
    }

    /// Link a stored block to its attached parent (None for genesis) and
    /// fill in everything that depends on its ancestry.
    pub(crate) fn attach_block(
        &mut self,
        block_id: i64,
        prev_id: Option<i64>,
    ) -> Result<BlockMeta, Error> {
        let codec = self.codec();
        let row = self
            .conn
            .select_row(
                "SELECT block_nTime, block_nBits, block_value_out
                   FROM block
                  WHERE block_id = ?",
                &[block_id.into()],
            )?
            .ok_or(DBError::NotFoundError)?;
        let time = column(&row, 0)?.as_i64()?.ok_or(Error::Corruption)?;
        let bits = column(&row, 1)?.as_i64()?.ok_or(Error::Corruption)?;
        let bits = u32::try_from(bits).map_err(|_| Error::Corruption)?;
        let value_out = column(&row, 2)?.as_i128()?.ok_or(Error::Corruption)?;

        let (height, search_id, parent) = match prev_id {
            None => (0, None, None),
            Some(prev_id) => {
                let prev = self.load_block(prev_id)?;
                let height = prev.height + 1;
                let search_id = self.get_block_id_at_height(prev_id, get_skip_height(height))?;
                (height, search_id, Some(self.parent_stats(prev_id)?))
            }
        };
        let prev_work = parent
            .as_ref()
            .map(|p| p.chain_work)
            .unwrap_or_else(Uint256::zero);
        let chain_work = prev_work
            .checked_add(&Uint256::work_from_compact(bits))
            .ok_or(DBError::Overflow)?;

        self.conn.sql(
            "UPDATE block
                SET block_height = ?, prev_block_id = ?, search_block_id = ?,
                    block_chain_work = ?
              WHERE block_id = ?",
            &[
                height.into(),
                prev_id.into(),
                search_id.into(),
                codec.binin_int(&chain_work, WORK_BITS),
                block_id.into(),
            ],
        )?;
        let meta = self.cache_block(block_id, height, prev_id, search_id);
        if let Some(prev_id) = prev_id {
            self.conn.sql(
                "INSERT INTO block_next (block_id, next_block_id) VALUES (?, ?)",
                &[prev_id.into(), block_id.into()],
            )?;
        }

        self.populate_block_txin(block_id)?;

        let value_in = self.block_value_in(block_id)?;
        let generated = value_in.map(|value_in| value_out - value_in);
        let (total_satoshis, total_seconds, total_ss, ss_destroyed, satoshi_seconds) =
            match parent {
                None => (generated, Some(0), Some(0), 0, Some(0)),
                Some(parent) => {
                    let seconds = (time - parent.time) as i128;
                    let ss_created = parent.total_satoshis.map(|s| s * seconds);
                    let ss_destroyed = self.block_ss_destroyed(block_id, time)?;
                    (
                        parent.total_satoshis.zip(generated).map(|(a, b)| a + b),
                        parent.total_seconds.map(|s| s + seconds),
                        parent.total_ss.zip(ss_created).map(|(a, b)| a + b),
                        ss_destroyed,
                        parent
                            .satoshi_seconds
                            .zip(ss_created)
                            .map(|(a, b)| a + b - ss_destroyed),
                    )
                }
            };

        self.conn.sql(
            "UPDATE block
                SET block_value_in = ?, block_total_satoshis = ?,
                    block_total_seconds = ?, block_satoshi_seconds = ?,
                    block_total_ss = ?, block_ss_destroyed = ?
              WHERE block_id = ?",
            &[
                opt_int(&codec, value_in)?,
                opt_int(&codec, total_satoshis)?,
                opt_int(&codec, total_seconds)?,
                opt_int(&codec, satoshi_seconds)?,
                opt_int(&codec, total_ss)?,
                codec.intin(ss_destroyed)?,
                block_id.into(),
            ],
        )?;
        Ok(meta)
    }

    /// Record, for each input of the block, which block on its own
    /// ancestry created the output it spends.
    fn populate_block_txin(&mut self, block_id: i64) -> Result<(), Error> {
        let rows = self.conn.select_all(
            "SELECT txin.txin_id, obt.block_id
               FROM block_tx bt
               JOIN txin ON (txin.tx_id = bt.tx_id)
               JOIN txout ON (txin.txout_id = txout.txout_id)
               JOIN block_tx obt ON (txout.tx_id = obt.tx_id)
              WHERE bt.block_id = ?",
            &[block_id.into()],
        )?;
        let mut linked = HashSet::new();
        for row in rows.iter() {
            let txin_id = column(row, 0)?.as_i64()?.ok_or(Error::Corruption)?;
            let out_block_id = column(row, 1)?.as_i64()?.ok_or(Error::Corruption)?;
            if linked.contains(&txin_id) || self.attached_block(out_block_id)?.is_none() {
                continue;
            }
            if self.is_descended_from(block_id, out_block_id)? {
                linked.insert(txin_id);
                self.conn.sql(
                    "INSERT INTO block_txin (block_id, txin_id, out_block_id)
                     VALUES (?, ?, ?)",
                    &[block_id.into(), txin_id.into(), out_block_id.into()],
                )?;
            }
        }
        Ok(())
    }

    /// Total value spent by the block, or None while any input is unresolved.
    fn block_value_in(&mut self, block_id: i64) -> Result<Option<i128>, Error> {
        let unresolved = query_int(
            &mut self.conn,
            "SELECT COUNT(1)
               FROM block_tx bt
               JOIN txin ON (txin.tx_id = bt.tx_id)
               JOIN unlinked_txin u ON (u.txin_id = txin.txin_id)
              WHERE bt.block_id = ?",
            &[block_id.into()],
        )?
        .unwrap_or(0);
        if unresolved > 0 {
            return Ok(None);
        }
        let rows = self.conn.select_all(
            "SELECT prevout.txout_value
               FROM block_tx bt
               JOIN txin ON (txin.tx_id = bt.tx_id)
               JOIN txout prevout ON (txin.txout_id = prevout.txout_id)
              WHERE bt.block_id = ?",
            &[block_id.into()],
        )?;
        let mut value_in = 0i128;
        for row in rows.iter() {
            value_in += column(row, 0)?.as_i128()?.ok_or(Error::Corruption)?;
        }
        Ok(Some(value_in))
    }

    /// Satoshi-seconds destroyed by spending outputs created on this
    /// block's ancestry.
    fn block_ss_destroyed(&mut self, block_id: i64, time: i64) -> Result<i128, Error> {
        let rows = self.conn.select_all(
            "SELECT prevout.txout_value, ob.block_nTime
               FROM block_txin bti
               JOIN txin ON (txin.txin_id = bti.txin_id)
               JOIN txout prevout ON (prevout.txout_id = txin.txout_id)
               JOIN block ob ON (ob.block_id = bti.out_block_id)
              WHERE bti.block_id = ?",
            &[block_id.into()],
        )?;
        let mut destroyed = 0i128;
        for row in rows.iter() {
            let value = column(row, 0)?.as_i128()?.ok_or(Error::Corruption)?;
            let out_time = column(row, 1)?.as_i64()?.ok_or(Error::Corruption)?;
            destroyed += value * (time - out_time) as i128;
        }
        Ok(destroyed)
    }

    /// Attach every orphan waiting on `block_id`, then every orphan waiting
    /// on those, and so on.
    fn adopt_orphans(&mut self, block_id: i64, block_hash: &DoubleSha256) -> Result<(), Error> {
        let codec = self.codec();
        let mut pending = vec![(block_id, *block_hash)];
        while let Some((parent_id, parent_hash)) = pending.pop() {
            let rows = self.conn.select_all(
                "SELECT ob.block_id, b.block_hash
                   FROM orphan_block ob
                   JOIN block b ON (b.block_id = ob.block_id)
                  WHERE ob.block_hashPrev = ?
                  ORDER BY ob.block_id",
                &[codec.hash_in(&parent_hash)],
            )?;
            for row in rows.iter() {
                let orphan_id = column(row, 0)?.as_i64()?.ok_or(Error::Corruption)?;
                let orphan_hash = codec
                    .hash_out(column(row, 1)?)?
                    .ok_or(Error::Corruption)?;
                self.conn.sql(
                    "DELETE FROM orphan_block WHERE block_id = ?",
                    &[orphan_id.into()],
                )?;
                let meta = self.attach_block(orphan_id, Some(parent_id))?;
                info!("Adopted orphan block";
                      "block" => %orphan_hash.be_hex_string(),
                      "block_id" => orphan_id,
                      "height" => meta.height);
                self.offer_block_to_chains(orphan_id, None)?;
                pending.push((orphan_id, orphan_hash));
            }
        }
        Ok(())
    }
}
