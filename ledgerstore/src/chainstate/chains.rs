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

//! Chains and chain candidacy.
//!
//! A block is a candidate of a chain once it descends from a genesis block
//! offered to that chain. `chain.chain_last_block_id` is the tip, and
//! `chain_candidate.in_longest` is 1 exactly on the path from the tip to
//! genesis.

use crate::chainstate::Error;
use crate::config::ChainConfig;
use crate::db::{query_int, query_row, query_rows, Error as DBError};
use crate::store::DataStore;

impl DataStore {
    /// Id of the named chain, creating it and its magic and policy rows if
    /// needed.
    pub fn ensure_chain(&mut self, chain: &ChainConfig) -> Result<i64, DBError> {
        if let Some(chain_id) = query_int(
            &mut self.conn,
            "SELECT chain_id FROM chain WHERE chain_name = ?",
            &[chain.name.as_str().into()],
        )? {
            return Ok(chain_id);
        }
        let codec = self.codec();

        let magic_id = match query_int(
            &mut self.conn,
            "SELECT magic_id FROM magic WHERE magic = ?",
            &[codec.binin(&chain.magic)],
        )? {
            Some(magic_id) => magic_id,
            None => {
                let magic_id = self.conn.new_id("magic")?;
                self.conn.sql(
                    "INSERT INTO magic (magic_id, magic, magic_name) VALUES (?, ?, ?)",
                    &[
                        magic_id.into(),
                        codec.binin(&chain.magic),
                        chain.magic_name().into(),
                    ],
                )?;
                magic_id
            }
        };

        let policy_id = match query_int(
            &mut self.conn,
            "SELECT policy_id FROM policy WHERE policy_name = ?",
            &[chain.policy.as_str().into()],
        )? {
            Some(policy_id) => policy_id,
            None => {
                let policy_id = self.conn.new_id("policy")?;
                self.conn.sql(
                    "INSERT INTO policy (policy_id, policy_name) VALUES (?, ?)",
                    &[policy_id.into(), chain.policy.as_str().into()],
                )?;
                policy_id
            }
        };

        let chain_id = self.conn.new_id("chain")?;
        self.conn.sql(
            "INSERT INTO chain (
                chain_id, magic_id, policy_id, chain_name, chain_code3,
                chain_address_version
             ) VALUES (?, ?, ?, ?, ?, ?)",
            &[
                chain_id.into(),
                magic_id.into(),
                policy_id.into(),
                chain.name.as_str().into(),
                chain.code3.clone().into(),
                codec.binin(&chain.address_version),
            ],
        )?;
        info!("Added chain"; "chain" => %chain.name, "chain_id" => chain_id);
        Ok(chain_id)
    }

    pub fn chain_id_for_name(&mut self, name: &str) -> Result<i64, Error> {
        query_int(
            &mut self.conn,
            "SELECT chain_id FROM chain WHERE chain_name = ?",
            &[name.into()],
        )?
        .ok_or_else(|| Error::UnknownChain(name.to_string()))
    }

    /// The chain's address version bytes, for address rendering.
    pub fn chain_address_version(&mut self, chain_id: i64) -> Result<Vec<u8>, Error> {
        let codec = self.codec();
        let row = self
            .conn
            .select_row(
                "SELECT chain_address_version FROM chain WHERE chain_id = ?",
                &[chain_id.into()],
            )?
            .ok_or_else(|| Error::UnknownChain(chain_id.to_string()))?;
        codec
            .binout(row.first().ok_or(DBError::ParseError)?)?
            .ok_or(Error::Corruption)
    }

    /// Current tip of the chain, if it has any blocks.
    pub fn chain_tip(&mut self, chain_id: i64) -> Result<Option<i64>, Error> {
        query_row::<Option<i64>>(
            &mut self.conn,
            "SELECT chain_last_block_id FROM chain WHERE chain_id = ?",
            &[chain_id.into()],
        )?
        .ok_or_else(|| Error::UnknownChain(chain_id.to_string()))
    }

    /// Blocks on the chain's current best path, genesis first.
    pub fn longest_chain_block_ids(&mut self, chain_id: i64) -> Result<Vec<i64>, Error> {
        Ok(query_rows::<i64>(
            &mut self.conn,
            "SELECT block_id FROM chain_candidate
              WHERE chain_id = ? AND in_longest = 1
              ORDER BY block_height",
            &[chain_id.into()],
        )?)
    }

    /// Chains the block is a candidate of.
    pub fn candidate_chain_ids(&mut self, block_id: i64) -> Result<Vec<i64>, Error> {
        Ok(query_rows::<i64>(
            &mut self.conn,
            "SELECT chain_id FROM chain_candidate WHERE block_id = ? ORDER BY chain_id",
            &[block_id.into()],
        )?)
    }

    /// Make a newly attached block a candidate of every chain its parent is a
    /// candidate of, or of `genesis_chain_id` if it has no parent.
    pub(crate) fn offer_block_to_chains(
        &mut self,
        block_id: i64,
        genesis_chain_id: Option<i64>,
    ) -> Result<(), Error> {
        let meta = self.load_block(block_id)?;
        let chain_ids = match meta.prev_id {
            None => genesis_chain_id.into_iter().collect(),
            Some(prev_id) => self.candidate_chain_ids(prev_id)?,
        };
        for chain_id in chain_ids.into_iter() {
            self.conn.sql(
                "INSERT INTO chain_candidate (chain_id, block_id, in_longest, block_height)
                 VALUES (?, ?, 0, ?)",
                &[chain_id.into(), block_id.into(), meta.height.into()],
            )?;
            match self.chain_tip(chain_id)? {
                None => self.set_chain_tip(chain_id, None, block_id)?,
                Some(tip_id) => {
                    if self.block_chain_work(block_id)? > self.block_chain_work(tip_id)? {
                        self.set_chain_tip(chain_id, Some(tip_id), block_id)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn height_of(&mut self, block_id: Option<i64>) -> Result<i64, Error> {
        match block_id {
            None => Ok(-1),
            Some(block_id) => Ok(self.load_block(block_id)?.height),
        }
    }

    /// Move the chain's tip, flipping `in_longest` off from the old tip back
    /// to the common ancestor and on from there to the new tip.
    pub(crate) fn set_chain_tip(
        &mut self,
        chain_id: i64,
        old_tip: Option<i64>,
        new_tip: i64,
    ) -> Result<(), Error> {
        let mut old = old_tip;
        let mut new = Some(new_tip);
        let mut disconnect = vec![];
        let mut connect = vec![];
        while old != new {
            let old_height = self.height_of(old)?;
            let new_height = self.height_of(new)?;
            if new_height >= old_height {
                if let Some(block_id) = new {
                    connect.push(block_id);
                    new = self.load_block(block_id)?.prev_id;
                }
            }
            if old_height >= new_height {
                if let Some(block_id) = old {
                    disconnect.push(block_id);
                    old = self.load_block(block_id)?.prev_id;
                }
            }
        }

        for block_id in disconnect.iter() {
            self.conn.sql(
                "UPDATE chain_candidate SET in_longest = 0
                  WHERE chain_id = ? AND block_id = ?",
                &[chain_id.into(), (*block_id).into()],
            )?;
        }
        for block_id in connect.iter() {
            self.conn.sql(
                "UPDATE chain_candidate SET in_longest = 1
                  WHERE chain_id = ? AND block_id = ?",
                &[chain_id.into(), (*block_id).into()],
            )?;
        }
        self.conn.sql(
            "UPDATE chain SET chain_last_block_id = ? WHERE chain_id = ?",
            &[new_tip.into(), chain_id.into()],
        )?;

        if !disconnect.is_empty() {
            info!("Chain reorganization";
                  "chain_id" => chain_id,
                  "old_tip" => ?old_tip,
                  "new_tip" => new_tip,
                  "disconnected" => disconnect.len(),
                  "connected" => connect.len());
        }
        Ok(())
    }
}
