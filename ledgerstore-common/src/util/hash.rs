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

use std::fmt::Write;

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::util::HexError;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash160(pub [u8; 20]);
impl_byte_array_newtype!(Hash160, 20);

/// Double SHA-256, held in wire (internal) byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DoubleSha256(pub [u8; 32]);
impl_byte_array_newtype!(DoubleSha256, 32);
impl_byte_array_serde!(DoubleSha256);

impl Hash160 {
    /// RIPEMD-160 of SHA-256
    pub fn from_data(data: &[u8]) -> Hash160 {
        let sha2_result = Sha256::digest(data);
        let ripe_160_result = Ripemd160::digest(sha2_result.as_slice());
        let mut ret = [0u8; 20];
        ret.copy_from_slice(ripe_160_result.as_slice());
        Hash160(ret)
    }
}

impl DoubleSha256 {
    pub fn from_data(data: &[u8]) -> DoubleSha256 {
        let hashed = Sha256::digest(Sha256::digest(data));
        let mut ret = [0u8; 32];
        ret.copy_from_slice(hashed.as_slice());
        DoubleSha256(ret)
    }

    pub fn zero() -> DoubleSha256 {
        DoubleSha256([0u8; 32])
    }

    /// Wire-order hex
    pub fn le_hex_string(&self) -> String {
        to_hex(&self.0)
    }

    /// Display-order (byte-reversed) hex, as ledger explorers print hashes
    pub fn be_hex_string(&self) -> String {
        let mut data = self.0;
        data.reverse();
        to_hex(&data)
    }

    /// Parse a display-order hex string
    pub fn from_be_hex(hex_str: &str) -> Result<DoubleSha256, HexError> {
        let bytes = hex_bytes(hex_str)?;
        DoubleSha256::from_bytes_be(&bytes).ok_or(HexError::BadLength(hex_str.len()))
    }
}

/// Transaction Merkle tree as ledger block headers commit to it:
/// * leaves are the transaction hashes themselves (no leaf tagging)
/// * a node hash is DoubleSha256(left + right)
/// * an odd row duplicates its last element
/// An empty tree has root hash 0x00000...00000
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleTree {
    // nodes[0] is the list of leaves
    // nodes[-1][0] is the root
    nodes: Vec<Vec<DoubleSha256>>,
}

impl MerkleTree {
    pub fn new(leaves: &[DoubleSha256]) -> MerkleTree {
        if leaves.is_empty() {
            return MerkleTree { nodes: vec![] };
        }

        let mut nodes = vec![leaves.to_vec()];
        while nodes[nodes.len() - 1].len() > 1 {
            let row = &nodes[nodes.len() - 1];
            let mut next_row = Vec::with_capacity((row.len() + 1) / 2);
            for pair in row.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next_row.push(MerkleTree::get_node_hash(left, right));
            }
            nodes.push(next_row);
        }

        MerkleTree { nodes }
    }

    fn get_node_hash(left: &DoubleSha256, right: &DoubleSha256) -> DoubleSha256 {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(left.as_bytes());
        buf[32..].copy_from_slice(right.as_bytes());
        DoubleSha256::from_data(&buf)
    }

    /// Get the Merkle root hash.
    /// will be all 0's if the tree is empty.
    pub fn root(&self) -> DoubleSha256 {
        match self.nodes.last() {
            Some(row) if !row.is_empty() => row[0],
            _ => DoubleSha256::zero(),
        }
    }

    pub fn depth(&self) -> usize {
        self.nodes.len()
    }
}

// borrowed from Andrew Poelstra's rust-bitcoin library
/// Convert a hexadecimal-encoded string to its corresponding bytes
pub fn hex_bytes(s: &str) -> Result<Vec<u8>, HexError> {
    if s.len() % 2 != 0 {
        return Err(HexError::BadLength(s.len()));
    }
    let mut v = Vec::with_capacity(s.len() / 2);
    let mut chars = s.chars();
    while let (Some(f), Some(s)) = (chars.next(), chars.next()) {
        match (f.to_digit(16), s.to_digit(16)) {
            (None, _) => return Err(HexError::BadCharacter(f)),
            (_, None) => return Err(HexError::BadCharacter(s)),
            (Some(f), Some(s)) => v.push((f * 0x10 + s) as u8),
        }
    }
    Ok(v)
}

/// Convert a slice of u8 to a hex string
pub fn to_hex(s: &[u8]) -> String {
    let mut r = String::with_capacity(s.len() * 2);
    for b in s.iter() {
        // writing to a String cannot fail
        let _ = write!(r, "{:02x}", b);
    }
    r
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn double_sha256_empty() {
        assert_eq!(
            DoubleSha256::from_data(&[]).le_hex_string(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn hash160_empty() {
        assert_eq!(
            Hash160::from_data(&[]).to_hex(),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn display_order_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[31] = 0xff;
        let h = DoubleSha256(bytes);
        assert!(h.be_hex_string().starts_with("ff"));
        assert!(h.be_hex_string().ends_with("01"));
        assert_eq!(DoubleSha256::from_be_hex(&h.be_hex_string()).unwrap(), h);
        assert_eq!(DoubleSha256::from_hex(&h.le_hex_string()).unwrap(), h);
    }

    #[test]
    fn merkle_roots() {
        let a = DoubleSha256::from_data(b"a");
        let b = DoubleSha256::from_data(b"b");
        let c = DoubleSha256::from_data(b"c");

        assert_eq!(MerkleTree::new(&[]).root(), DoubleSha256::zero());
        assert_eq!(MerkleTree::new(&[a]).root(), a);

        let ab = MerkleTree::get_node_hash(&a, &b);
        assert_eq!(MerkleTree::new(&[a, b]).root(), ab);

        let cc = MerkleTree::get_node_hash(&c, &c);
        let tree = MerkleTree::new(&[a, b, c]);
        assert_eq!(tree.root(), MerkleTree::get_node_hash(&ab, &cc));
        assert_eq!(tree.depth(), 3);

        // order matters
        assert_ne!(MerkleTree::new(&[b, a]).root(), ab);
    }

    #[test]
    fn hex_roundtrip_and_errors() {
        assert_eq!(hex_bytes("00ff10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert_eq!(to_hex(&[0xde, 0xad]), "dead");
        assert_eq!(hex_bytes("").unwrap(), Vec::<u8>::new());
        assert_eq!(hex_bytes("abc"), Err(HexError::BadLength(3)));
        assert_eq!(hex_bytes("zz"), Err(HexError::BadCharacter('z')));
    }
}
