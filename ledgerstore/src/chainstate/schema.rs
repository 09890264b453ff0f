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

//! Dialect-neutral DDL for the chain index.
//!
//! Statements here use `BIT(n)` / `BIT VARYING(n)` for binary columns; the
//! installed dialect rewrites them when they are executed.

use ledgerstore_common::consts::{MAX_SCRIPT, WORK_BITS};

use crate::db::lock::LOCK_DDL;
use crate::db::sequence::SEQUENCES_DDL;

/// Schema version written by this software.
pub const SCHEMA_VERSION: &str = "LS1";

/// Keys with an identifier sequence, one per table.
pub const SEQUENCE_KEYS: &[&str] = &[
    "magic", "policy", "chain", "tx", "txout", "pubkey", "txin", "block",
];

pub const CONFIGVAR_DDL: &str = "CREATE TABLE configvar (
    configvar_name  VARCHAR(100) NOT NULL PRIMARY KEY,
    configvar_value VARCHAR(255)
)";

const CHAIN_SUMMARY_DDL: &str = "CREATE VIEW chain_summary AS SELECT
    cc.chain_id,
    cc.in_longest,
    b.block_id,
    b.block_hash,
    b.block_version,
    b.block_hashMerkleRoot,
    b.block_nTime,
    b.block_nBits,
    b.block_nNonce,
    cc.block_height,
    b.prev_block_id,
    prev.block_hash prev_block_hash,
    b.block_chain_work,
    b.block_num_tx,
    b.block_value_in,
    b.block_value_out,
    b.block_total_satoshis,
    b.block_total_seconds,
    b.block_satoshi_seconds,
    b.block_total_ss,
    b.block_ss_destroyed
FROM chain_candidate cc
JOIN block b ON (cc.block_id = b.block_id)
LEFT JOIN block prev ON (b.prev_block_id = prev.block_id)";

const TXOUT_DETAIL_DDL: &str = "CREATE VIEW txout_detail AS SELECT
    cc.chain_id,
    cc.in_longest,
    cc.block_id,
    b.block_hash,
    b.block_height,
    block_tx.tx_pos,
    tx.tx_id,
    tx.tx_hash,
    tx.tx_lockTime,
    tx.tx_version,
    tx.tx_size,
    txout.txout_id,
    txout.txout_pos,
    txout.txout_value,
    txout.txout_scriptPubKey,
    pubkey.pubkey_id,
    pubkey.pubkey_hash,
    pubkey.pubkey
  FROM chain_candidate cc
  JOIN block b ON (cc.block_id = b.block_id)
  JOIN block_tx ON (b.block_id = block_tx.block_id)
  JOIN tx    ON (tx.tx_id = block_tx.tx_id)
  JOIN txout ON (tx.tx_id = txout.tx_id)
  LEFT JOIN pubkey ON (txout.pubkey_id = pubkey.pubkey_id)";

/// Approximate output values. Under string-bound integers the dialect
/// casts the value column to floating point when this is created.
const TXOUT_APPROX_DDL: &str = "CREATE VIEW txout_approx AS SELECT
    txout_id,
    tx_id,
    txout_value txout_approx_value
  FROM txout";

const MAGIC_DDL: &str = "CREATE TABLE magic (
    magic_id    NUMERIC(10) NOT NULL PRIMARY KEY,
    magic       BIT(32)     UNIQUE NOT NULL,
    magic_name  VARCHAR(100) UNIQUE NOT NULL
)";

const POLICY_DDL: &str = "CREATE TABLE policy (
    policy_id   NUMERIC(10) NOT NULL PRIMARY KEY,
    policy_name VARCHAR(100) UNIQUE NOT NULL
)";

const CHAIN_DDL: &str = "CREATE TABLE chain (
    chain_id    NUMERIC(10) NOT NULL PRIMARY KEY,
    magic_id    NUMERIC(10) NULL,
    policy_id   NUMERIC(10) NULL,
    chain_name  VARCHAR(100) UNIQUE NOT NULL,
    chain_code3 CHAR(3)     NULL,
    chain_address_version BIT VARYING(800) NOT NULL,
    chain_last_block_id NUMERIC(14) NULL,
    FOREIGN KEY (magic_id)  REFERENCES magic (magic_id),
    FOREIGN KEY (policy_id) REFERENCES policy (policy_id),
    FOREIGN KEY (chain_last_block_id)
        REFERENCES block (block_id)
)";

// in_longest denormalizes chain_last_block_id and prev_block_id.
const CHAIN_CANDIDATE_DDL: &str = "CREATE TABLE chain_candidate (
    chain_id      NUMERIC(10) NOT NULL,
    block_id      NUMERIC(14) NOT NULL,
    in_longest    NUMERIC(1),
    block_height  NUMERIC(14),
    PRIMARY KEY (chain_id, block_id),
    FOREIGN KEY (block_id) REFERENCES block (block_id)
)";

const ORPHAN_BLOCK_DDL: &str = "CREATE TABLE orphan_block (
    block_id      NUMERIC(14) NOT NULL PRIMARY KEY,
    block_hashPrev BIT(256)   NOT NULL,
    FOREIGN KEY (block_id) REFERENCES block (block_id)
)";

const BLOCK_NEXT_DDL: &str = "CREATE TABLE block_next (
    block_id      NUMERIC(14) NOT NULL,
    next_block_id NUMERIC(14) NOT NULL,
    PRIMARY KEY (block_id, next_block_id),
    FOREIGN KEY (block_id) REFERENCES block (block_id),
    FOREIGN KEY (next_block_id) REFERENCES block (block_id)
)";

const TX_DDL: &str = "CREATE TABLE tx (
    tx_id         NUMERIC(26) NOT NULL PRIMARY KEY,
    tx_hash       BIT(256)    UNIQUE NOT NULL,
    tx_version    NUMERIC(10),
    tx_lockTime   NUMERIC(10),
    tx_size       NUMERIC(10)
)";

const BLOCK_TX_DDL: &str = "CREATE TABLE block_tx (
    block_id      NUMERIC(14) NOT NULL,
    tx_id         NUMERIC(26) NOT NULL,
    tx_pos        NUMERIC(10) NOT NULL,
    PRIMARY KEY (block_id, tx_id),
    UNIQUE (block_id, tx_pos),
    FOREIGN KEY (block_id)
        REFERENCES block (block_id),
    FOREIGN KEY (tx_id)
        REFERENCES tx (tx_id)
)";

const PUBKEY_DDL: &str = "CREATE TABLE pubkey (
    pubkey_id     NUMERIC(26) NOT NULL PRIMARY KEY,
    pubkey_hash   BIT(160)    UNIQUE NOT NULL,
    pubkey        BIT(520)    NULL
)";

const UNLINKED_TXIN_DDL: &str = "CREATE TABLE unlinked_txin (
    txin_id       NUMERIC(26) NOT NULL PRIMARY KEY,
    txout_tx_hash BIT(256)    NOT NULL,
    txout_pos     NUMERIC(10) NOT NULL,
    FOREIGN KEY (txin_id) REFERENCES txin (txin_id)
)";

const BLOCK_TXIN_DDL: &str = "CREATE TABLE block_txin (
    block_id      NUMERIC(14) NOT NULL,
    txin_id       NUMERIC(26) NOT NULL,
    out_block_id  NUMERIC(14) NOT NULL,
    PRIMARY KEY (block_id, txin_id),
    FOREIGN KEY (block_id) REFERENCES block (block_id),
    FOREIGN KEY (txin_id) REFERENCES txin (txin_id),
    FOREIGN KEY (out_block_id) REFERENCES block (block_id)
)";

/// Shortest unique address prefix per address version, as of the block
/// that first paid the address.
const FIRSTBITS_DDL: &str = "CREATE TABLE ls_firstbits (
    pubkey_id       NUMERIC(26) NOT NULL,
    block_id        NUMERIC(14) NOT NULL,
    address_version BIT VARYING(80) NOT NULL,
    firstbits       VARCHAR(50) NOT NULL,
    PRIMARY KEY (address_version, pubkey_id, block_id),
    FOREIGN KEY (pubkey_id) REFERENCES pubkey (pubkey_id),
    FOREIGN KEY (block_id) REFERENCES block (block_id)
)";

const FIRSTBITS_INDEX_DDL: &str = "CREATE INDEX x_ls_firstbits
    ON ls_firstbits (address_version, firstbits)";

/// The chain index schema, as shaped by the schema options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schema {
    pub keep_scriptsig: bool,
    pub use_firstbits: bool,
}

impl Schema {
    pub fn new(keep_scriptsig: bool, use_firstbits: bool) -> Schema {
        Schema {
            keep_scriptsig,
            use_firstbits,
        }
    }

    fn firstbits_objects() -> Vec<(&'static str, String)> {
        vec![
            ("ls_firstbits", FIRSTBITS_DDL.to_string()),
            ("x_ls_firstbits", FIRSTBITS_INDEX_DDL.to_string()),
        ]
    }

    fn block_ddl(&self) -> String {
        format!(
            "CREATE TABLE block (
    block_id      NUMERIC(14) NOT NULL PRIMARY KEY,
    block_hash    BIT(256)    UNIQUE NOT NULL,
    block_version NUMERIC(10),
    block_hashMerkleRoot BIT(256),
    block_nTime   NUMERIC(20),
    block_nBits   NUMERIC(10),
    block_nNonce  NUMERIC(10),
    block_height  NUMERIC(14) NULL,
    prev_block_id NUMERIC(14) NULL,
    search_block_id NUMERIC(14) NULL,
    block_chain_work BIT({}),
    block_value_in NUMERIC(30) NULL,
    block_value_out NUMERIC(30),
    block_total_satoshis NUMERIC(26) NULL,
    block_total_seconds NUMERIC(20) NULL,
    block_satoshi_seconds NUMERIC(28) NULL,
    block_total_ss NUMERIC(28) NULL,
    block_num_tx  NUMERIC(10) NOT NULL,
    block_ss_destroyed NUMERIC(28) NULL,
    FOREIGN KEY (prev_block_id)
        REFERENCES block (block_id),
    FOREIGN KEY (search_block_id)
        REFERENCES block (block_id)
)",
            WORK_BITS
        )
    }

    fn txout_ddl(&self) -> String {
        format!(
            "CREATE TABLE txout (
    txout_id      NUMERIC(26) NOT NULL PRIMARY KEY,
    tx_id         NUMERIC(26) NOT NULL,
    txout_pos     NUMERIC(10) NOT NULL,
    txout_value   NUMERIC(30) NOT NULL,
    txout_scriptPubKey BIT VARYING({}),
    pubkey_id     NUMERIC(26),
    UNIQUE (tx_id, txout_pos),
    FOREIGN KEY (pubkey_id)
        REFERENCES pubkey (pubkey_id)
)",
            8 * MAX_SCRIPT
        )
    }

    fn txin_ddl(&self) -> String {
        let script_columns = if self.keep_scriptsig {
            format!(
                ",
    txin_scriptSig BIT VARYING({}),
    txin_sequence NUMERIC(10)",
                8 * MAX_SCRIPT
            )
        } else {
            String::new()
        };
        format!(
            "CREATE TABLE txin (
    txin_id       NUMERIC(26) NOT NULL PRIMARY KEY,
    tx_id         NUMERIC(26) NOT NULL,
    txin_pos      NUMERIC(10) NOT NULL,
    txout_id      NUMERIC(26){},
    UNIQUE (tx_id, txin_pos),
    FOREIGN KEY (tx_id)
        REFERENCES tx (tx_id)
)",
            script_columns
        )
    }

    fn txin_detail_ddl(&self) -> String {
        let script_columns = if self.keep_scriptsig {
            "txin.txin_scriptSig,
    txin.txin_sequence"
        } else {
            "NULL txin_scriptSig,
    NULL txin_sequence"
        };
        format!(
            "CREATE VIEW txin_detail AS SELECT
    cc.chain_id,
    cc.in_longest,
    cc.block_id,
    b.block_hash,
    b.block_height,
    block_tx.tx_pos,
    tx.tx_id,
    tx.tx_hash,
    tx.tx_lockTime,
    tx.tx_version,
    tx.tx_size,
    txin.txin_id,
    txin.txin_pos,
    txin.txout_id prevout_id,
    {},
    prevout.txout_value txin_value,
    pubkey.pubkey_id,
    pubkey.pubkey_hash,
    pubkey.pubkey
  FROM chain_candidate cc
  JOIN block b ON (cc.block_id = b.block_id)
  JOIN block_tx ON (b.block_id = block_tx.block_id)
  JOIN tx    ON (tx.tx_id = block_tx.tx_id)
  JOIN txin  ON (tx.tx_id = txin.tx_id)
  LEFT JOIN txout prevout ON (txin.txout_id = prevout.txout_id)
  LEFT JOIN pubkey
      ON (prevout.pubkey_id = pubkey.pubkey_id)",
            script_columns
        )
    }

    /// Every schema object, by name, in creation order.
    pub fn objects(&self) -> Vec<(&'static str, String)> {
        let mut objects = vec![
            ("configvar", CONFIGVAR_DDL.to_string()),
            ("magic", MAGIC_DDL.to_string()),
            ("policy", POLICY_DDL.to_string()),
            ("block", self.block_ddl()),
            ("chain", CHAIN_DDL.to_string()),
            ("chain_candidate", CHAIN_CANDIDATE_DDL.to_string()),
            (
                "x_cc_block",
                "CREATE INDEX x_cc_block ON chain_candidate (block_id)".to_string(),
            ),
            (
                "x_cc_chain_block_height",
                "CREATE INDEX x_cc_chain_block_height
    ON chain_candidate (chain_id, block_height)"
                    .to_string(),
            ),
            (
                "x_cc_block_height",
                "CREATE INDEX x_cc_block_height ON chain_candidate (block_height)".to_string(),
            ),
            ("orphan_block", ORPHAN_BLOCK_DDL.to_string()),
            (
                "x_orphan_block_hashPrev",
                "CREATE INDEX x_orphan_block_hashPrev ON orphan_block (block_hashPrev)"
                    .to_string(),
            ),
            ("block_next", BLOCK_NEXT_DDL.to_string()),
            ("tx", TX_DDL.to_string()),
            ("block_tx", BLOCK_TX_DDL.to_string()),
            (
                "x_block_tx_tx",
                "CREATE INDEX x_block_tx_tx ON block_tx (tx_id)".to_string(),
            ),
            ("pubkey", PUBKEY_DDL.to_string()),
            ("txout", self.txout_ddl()),
            (
                "x_txout_pubkey",
                "CREATE INDEX x_txout_pubkey ON txout (pubkey_id)".to_string(),
            ),
            ("txin", self.txin_ddl()),
            (
                "x_txin_txout",
                "CREATE INDEX x_txin_txout ON txin (txout_id)".to_string(),
            ),
            ("unlinked_txin", UNLINKED_TXIN_DDL.to_string()),
            (
                "x_unlinked_txin_outpoint",
                "CREATE INDEX x_unlinked_txin_outpoint
    ON unlinked_txin (txout_tx_hash, txout_pos)"
                    .to_string(),
            ),
            ("block_txin", BLOCK_TXIN_DDL.to_string()),
            ("chain_summary", CHAIN_SUMMARY_DDL.to_string()),
            ("txout_detail", TXOUT_DETAIL_DDL.to_string()),
            ("txin_detail", self.txin_detail_ddl()),
            ("txout_approx", TXOUT_APPROX_DDL.to_string()),
            ("ls_lock", LOCK_DDL.to_string()),
        ];
        if self.use_firstbits {
            objects.extend(Schema::firstbits_objects());
        }
        objects
    }

    /// The neutral DDL of one named object, for schema upgrades.
    pub fn get_ddl(&self, key: &str) -> Option<String> {
        if key == "ls_sequences" {
            return Some(SEQUENCES_DDL.to_string());
        }
        // optional objects are available even when not enabled, so an
        // upgrade can add them
        self.objects()
            .into_iter()
            .chain(Schema::firstbits_objects())
            .find(|(name, _)| *name == key)
            .map(|(_, ddl)| ddl)
    }
}

/// Schema versions are a text prefix and a number: "LS1" < "LS2" < "LS10".
/// Versions without a trailing number sort before any that have one.
pub fn version_below(version: &str, target: &str) -> bool {
    fn split(v: &str) -> (&str, Option<u64>) {
        let digits = v.len() - v.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (prefix, num) = v.split_at(v.len() - digits);
        (prefix, num.parse().ok())
    }
    let (vp, vn) = split(version);
    let (tp, tn) = split(target);
    if vp != tp {
        return vp < tp;
    }
    vn < tn
}
