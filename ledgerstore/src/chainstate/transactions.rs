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

use ledgerstore_common::util::hash::{DoubleSha256, Hash160};
use regex::bytes::Regex;

use crate::backend::SqlValue;
use crate::chainstate::{Error, TxRecord, NULL_PUBKEY_ID};
use crate::db::{column, query_int};
use crate::store::DataStore;

lazy_static! {
    static ref SCRIPT_ADDRESS_RE: Regex =
        Regex::new(r"(?s-u)\A\x76\xa9\x14(.{20})\x88\xac\x61?\z").unwrap();
    static ref SCRIPT_PUBKEY_RE: Regex =
        Regex::new(r"(?s-u)\A(?:\x41(.{65})|\x21(.{33}))\xac\z").unwrap();
}

/// OP_RETURN alone: the output pays the network.
pub const SCRIPT_NETWORK_FEE: &[u8] = &[0x6a];

/// What an output script pays to, as far as the index cares.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptType {
    PubkeyHash(Hash160),
    /// A bare public key, compressed or not
    Pubkey(Vec<u8>),
    NetworkFee,
    Unknown,
}

pub fn classify_script(script: &[u8]) -> ScriptType {
    if let Some(caps) = SCRIPT_ADDRESS_RE.captures(script) {
        if let Some(hash) = caps.get(1).and_then(|m| Hash160::from_bytes(m.as_bytes())) {
            return ScriptType::PubkeyHash(hash);
        }
    }
    if let Some(caps) = SCRIPT_PUBKEY_RE.captures(script) {
        if let Some(pubkey) = caps.get(1).or_else(|| caps.get(2)) {
            return ScriptType::Pubkey(pubkey.as_bytes().to_vec());
        }
    }
    if script == SCRIPT_NETWORK_FEE {
        return ScriptType::NetworkFee;
    }
    ScriptType::Unknown
}

impl DataStore {
    pub fn tx_id_for_hash(&mut self, hash: &DoubleSha256) -> Result<Option<i64>, Error> {
        let codec = self.codec();
        Ok(query_int(
            &mut self.conn,
            "SELECT tx_id FROM tx WHERE tx_hash = ?",
            &[codec.hash_in(hash)],
        )?)
    }

    fn lookup_txout(&mut self, tx_hash: &DoubleSha256, pos: u32) -> Result<Option<i64>, Error> {
        let codec = self.codec();
        Ok(query_int(
            &mut self.conn,
            "SELECT txout.txout_id
               FROM txout
               JOIN tx ON (tx.tx_id = txout.tx_id)
              WHERE tx.tx_hash = ? AND txout.txout_pos = ?",
            &[codec.hash_in(tx_hash), pos.into()],
        )?)
    }

    fn pubkey_hash_to_id(&mut self, hash: &Hash160, pubkey: Option<&[u8]>) -> Result<i64, Error> {
        let codec = self.codec();
        if let Some(id) = query_int(
            &mut self.conn,
            "SELECT pubkey_id FROM pubkey WHERE pubkey_hash = ?",
            &[codec.binin(hash.as_bytes())],
        )? {
            return Ok(id);
        }
        let pubkey_id = self.conn.new_id("pubkey")?;
        self.conn.sql(
            "INSERT INTO pubkey (pubkey_id, pubkey_hash, pubkey) VALUES (?, ?, ?)",
            &[
                pubkey_id.into(),
                codec.binin(hash.as_bytes()),
                pubkey.map(|p| codec.binin(p)).unwrap_or(SqlValue::Null),
            ],
        )?;
        Ok(pubkey_id)
    }

    /// Public key row an output script pays to, if any.
    pub fn script_to_pubkey_id(&mut self, script: &[u8]) -> Result<Option<i64>, Error> {
        match classify_script(script) {
            ScriptType::PubkeyHash(hash) => self.pubkey_hash_to_id(&hash, None).map(Some),
            ScriptType::Pubkey(pubkey) => self
                .pubkey_hash_to_id(&Hash160::from_data(&pubkey), Some(&pubkey))
                .map(Some),
            ScriptType::NetworkFee => Ok(Some(NULL_PUBKEY_ID)),
            ScriptType::Unknown => Ok(None),
        }
    }

    /// Store a transaction unless its hash is already known. Returns its id.
    pub fn import_tx(&mut self, tx: &TxRecord) -> Result<i64, Error> {
        if let Some(tx_id) = self.tx_id_for_hash(&tx.hash)? {
            return Ok(tx_id);
        }
        let codec = self.codec();
        let tx_id = self.conn.new_id("tx")?;
        self.conn.sql(
            "INSERT INTO tx (tx_id, tx_hash, tx_version, tx_lockTime, tx_size)
             VALUES (?, ?, ?, ?, ?)",
            &[
                tx_id.into(),
                codec.hash_in(&tx.hash),
                tx.version.into(),
                tx.lock_time.into(),
                tx.size.into(),
            ],
        )?;

        for (pos, txout) in tx.outputs.iter().enumerate() {
            let txout_id = self.conn.new_id("txout")?;
            let pubkey_id = self.script_to_pubkey_id(&txout.script_pubkey)?;
            self.conn.sql(
                "INSERT INTO txout (txout_id, tx_id, txout_pos, txout_value,
                                    txout_scriptPubKey, pubkey_id)
                 VALUES (?, ?, ?, ?, ?, ?)",
                &[
                    txout_id.into(),
                    tx_id.into(),
                    (pos as i64).into(),
                    codec.intin(txout.value as i128)?,
                    codec.binin(&txout.script_pubkey),
                    pubkey_id.into(),
                ],
            )?;
        }

        for (pos, txin) in tx.inputs.iter().enumerate() {
            let txin_id = self.conn.new_id("txin")?;
            let txout_id = if txin.is_coinbase() {
                None
            } else {
                self.lookup_txout(&txin.prevout_hash, txin.prevout_n)?
            };
            if self.schema.keep_scriptsig {
                self.conn.sql(
                    "INSERT INTO txin (txin_id, tx_id, txin_pos, txout_id,
                                       txin_scriptSig, txin_sequence)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    &[
                        txin_id.into(),
                        tx_id.into(),
                        (pos as i64).into(),
                        txout_id.into(),
                        codec.binin(&txin.script_sig),
                        txin.sequence.into(),
                    ],
                )?;
            } else {
                self.conn.sql(
                    "INSERT INTO txin (txin_id, tx_id, txin_pos, txout_id)
                     VALUES (?, ?, ?, ?)",
                    &[
                        txin_id.into(),
                        tx_id.into(),
                        (pos as i64).into(),
                        txout_id.into(),
                    ],
                )?;
            }
            if !txin.is_coinbase() && txout_id.is_none() {
                self.conn.sql(
                    "INSERT INTO unlinked_txin (txin_id, txout_tx_hash, txout_pos)
                     VALUES (?, ?, ?)",
                    &[
                        txin_id.into(),
                        codec.hash_in(&txin.prevout_hash),
                        txin.prevout_n.into(),
                    ],
                )?;
            }
        }

        self.link_pending_inputs(tx_id, &tx.hash)?;
        Ok(tx_id)
    }

    /// Resolve inputs stored before the transaction they spend arrived.
    fn link_pending_inputs(&mut self, tx_id: i64, tx_hash: &DoubleSha256) -> Result<(), Error> {
        let codec = self.codec();
        let rows = self.conn.select_all(
            "SELECT u.txin_id, txout.txout_id
               FROM unlinked_txin u
               JOIN txout ON (txout.txout_pos = u.txout_pos)
              WHERE u.txout_tx_hash = ? AND txout.tx_id = ?",
            &[codec.hash_in(tx_hash), tx_id.into()],
        )?;
        for row in rows.iter() {
            let txin_id = column(row, 0)?.as_i64()?.ok_or(Error::Corruption)?;
            let txout_id = column(row, 1)?.as_i64()?.ok_or(Error::Corruption)?;
            self.conn.sql(
                "UPDATE txin SET txout_id = ? WHERE txin_id = ?",
                &[txout_id.into(), txin_id.into()],
            )?;
            self.conn.sql(
                "DELETE FROM unlinked_txin WHERE txin_id = ?",
                &[txin_id.into()],
            )?;
        }
        if !rows.is_empty() {
            debug!("Linked pending inputs";
                   "tx" => %tx_hash.be_hex_string(), "count" => rows.len());
        }
        Ok(())
    }
}
