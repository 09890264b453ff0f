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

use ledgerstore_common::consts::NULL_HASH;
use ledgerstore_common::util::hash::{DoubleSha256, MerkleTree};
use tempfile::TempDir;

use crate::chainstate::{BlockRecord, TxInRecord, TxOutRecord, TxRecord};
use crate::config::StoreConfig;
use crate::db::{column, Error as DBError};
use crate::store::DataStore;

pub mod store;

/// Easiest regtest target: every block adds 2 to the chain work.
pub const EASY_BITS: u32 = 0x207f_ffff;
/// Mainnet genesis target, worth far more than any run of easy blocks.
pub const HARD_BITS: u32 = 0x1d00_ffff;
pub const GENESIS_TIME: u32 = 1_231_006_505;
pub const COIN: u64 = 100_000_000;

pub fn p2pkh_script(fill: u8) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[fill; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

pub fn coinbase(tag: &str, value: u64) -> TxRecord {
    TxRecord {
        hash: DoubleSha256::from_data(format!("coinbase {}", tag).as_bytes()),
        version: 1,
        lock_time: 0,
        size: 134,
        inputs: vec![TxInRecord {
            prevout_hash: DoubleSha256(NULL_HASH),
            prevout_n: 0xffff_ffff,
            script_sig: tag.as_bytes().to_vec(),
            sequence: 0xffff_ffff,
        }],
        outputs: vec![TxOutRecord {
            value,
            script_pubkey: p2pkh_script(0x11),
        }],
    }
}

/// A transaction spending output `n` of `prev` into one output of `value`.
pub fn spend(tag: &str, prev: &TxRecord, n: u32, value: u64) -> TxRecord {
    TxRecord {
        hash: DoubleSha256::from_data(format!("spend {}", tag).as_bytes()),
        version: 1,
        lock_time: 0,
        size: 192,
        inputs: vec![TxInRecord {
            prevout_hash: prev.hash,
            prevout_n: n,
            script_sig: vec![0x51],
            sequence: 0xffff_ffff,
        }],
        outputs: vec![TxOutRecord {
            value,
            script_pubkey: p2pkh_script(0x22),
        }],
    }
}

/// A block on top of `prev` (genesis if None) with a coinbase and `txs`,
/// ten minutes after its parent.
pub fn make_block(
    prev: Option<&BlockRecord>,
    tag: &str,
    bits: u32,
    txs: Vec<TxRecord>,
) -> BlockRecord {
    let mut transactions = vec![coinbase(tag, 50 * COIN)];
    transactions.extend(txs);
    let tx_hashes: Vec<DoubleSha256> = transactions.iter().map(|tx| tx.hash).collect();
    BlockRecord {
        hash: DoubleSha256::from_data(format!("block {}", tag).as_bytes()),
        version: 1,
        hash_prev: prev.map(|p| p.hash).unwrap_or(DoubleSha256(NULL_HASH)),
        hash_merkle_root: MerkleTree::new(&tx_hashes).root(),
        time: prev.map(|p| p.time + 600).unwrap_or(GENESIS_TIME),
        bits,
        nonce: 0,
        transactions,
    }
}

/// `len` easy blocks on top of `base`, tagged `{prefix}{i}`.
pub fn make_branch(base: &BlockRecord, prefix: &str, len: usize) -> Vec<BlockRecord> {
    let mut branch: Vec<BlockRecord> = vec![];
    for i in 1..=len {
        let prev = branch.last().unwrap_or(base);
        let block = make_block(Some(prev), &format!("{}{}", prefix, i), EASY_BITS, vec![]);
        branch.push(block);
    }
    branch
}

/// A fresh SQLite store file, with its config.
pub fn temp_config(name: &str) -> (TempDir, StoreConfig) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(format!("{}.sqlite", name));
    let config = StoreConfig::new("sqlite", path.to_str().unwrap());
    (dir, config)
}

pub fn open_temp(name: &str) -> (TempDir, DataStore) {
    let (dir, config) = temp_config(name);
    let store = DataStore::open(&config).unwrap();
    (dir, store)
}

pub fn bitcoin_id(store: &mut DataStore) -> i64 {
    store.chain_id_for_name("Bitcoin").unwrap()
}

pub fn import_all(store: &mut DataStore, chain_id: i64, blocks: &[BlockRecord]) -> Vec<i64> {
    blocks
        .iter()
        .map(|block| store.import_block(block, Some(chain_id)).unwrap())
        .collect()
}

pub fn block_id(store: &mut DataStore, block: &BlockRecord) -> i64 {
    store.block_id_for_hash(&block.hash).unwrap().unwrap()
}

pub fn count(store: &mut DataStore, sql: &str) -> i64 {
    crate::db::query_int(store.conn(), sql, &[]).unwrap().unwrap()
}

/// One integer column of a block row.
pub fn block_int(store: &mut DataStore, block_id: i64, col: &str) -> Option<i128> {
    let row = store
        .conn()
        .select_row(
            &format!("SELECT {} FROM block WHERE block_id = ?", col),
            &[block_id.into()],
        )
        .unwrap()
        .ok_or(DBError::NotFoundError)
        .unwrap();
    column(&row, 0).unwrap().as_i128().unwrap()
}
