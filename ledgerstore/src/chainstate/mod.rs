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

//! The chain index: blocks, transactions and the chain-candidacy facts
//! derived from them.
//!
//! Records arrive fully parsed from a loader. Importing them is split across
//! the submodules, each adding an `impl DataStore` block.

use std::{error, fmt};

use ledgerstore_common::consts::NULL_HASH;
use ledgerstore_common::util::hash::DoubleSha256;

use crate::db::Error as DBError;

pub mod blocks;
pub mod cache;
pub mod chains;
pub mod schema;
pub mod transactions;

/// Serialized size of a block header.
pub const BLOCK_HEADER_SIZE: u64 = 80;

/// Public key id reserved for outputs that pay the network fee.
pub const NULL_PUBKEY_ID: i64 = 0;
pub const NULL_PUBKEY_HASH: [u8; 20] = [0u8; 20];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInRecord {
    pub prevout_hash: DoubleSha256,
    pub prevout_n: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInRecord {
    pub fn is_coinbase(&self) -> bool {
        self.prevout_hash.0 == NULL_HASH
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutRecord {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: DoubleSha256,
    pub version: u32,
    pub lock_time: u32,
    /// Serialized size in bytes
    pub size: u32,
    pub inputs: Vec<TxInRecord>,
    pub outputs: Vec<TxOutRecord>,
}

impl TxRecord {
    pub fn value_out(&self) -> u128 {
        self.outputs.iter().map(|o| o.value as u128).sum()
    }
}

/// A parsed block. Hashes are in wire byte order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: DoubleSha256,
    pub version: u32,
    pub hash_prev: DoubleSha256,
    pub hash_merkle_root: DoubleSha256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    pub transactions: Vec<TxRecord>,
}

impl BlockRecord {
    pub fn is_genesis(&self) -> bool {
        self.hash_prev.0 == NULL_HASH
    }

    pub fn tx_hashes(&self) -> Vec<DoubleSha256> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }

    pub fn size(&self) -> u64 {
        BLOCK_HEADER_SIZE
            + self
                .transactions
                .iter()
                .map(|tx| tx.size as u64)
                .sum::<u64>()
    }
}

#[derive(Debug)]
pub enum Error {
    /// The block's transactions do not hash to its declared Merkle root
    MerkleRootMismatch {
        block_hash: DoubleSha256,
        tx_hashes: Vec<DoubleSha256>,
    },
    UnknownChain(String),
    /// The index contradicts itself
    Corruption,
    DBError(DBError),
}

impl Error {
    /// True if the block itself is at fault, and retrying cannot help.
    pub fn is_invalid_block(&self) -> bool {
        matches!(self, Error::MerkleRootMismatch { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::MerkleRootMismatch { ref block_hash, .. } => write!(
                f,
                "Block header Merkle root does not match its transactions. block hash={}",
                block_hash.be_hex_string()
            ),
            Error::UnknownChain(ref name) => write!(f, "Unknown chain '{}'", name),
            Error::Corruption => write!(f, "Chain index is corrupt"),
            Error::DBError(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::DBError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<DBError> for Error {
    fn from(e: DBError) -> Error {
        Error::DBError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_names_block_in_display_order() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let err = Error::MerkleRootMismatch {
            block_hash: DoubleSha256(bytes),
            tx_hashes: vec![],
        };
        assert!(err.is_invalid_block());
        assert!(err.to_string().ends_with(&format!("block hash={}ab", "00".repeat(31))));
        assert!(!Error::Corruption.is_invalid_block());
    }
}
