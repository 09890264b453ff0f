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

//! Value encoders and decoders for the negotiated representations.
//!
//! Hashes are stored in wire order and displayed reversed. `hashin` takes
//! wire-order bytes; `hashin_hex` takes the display form. Each reversal
//! happens exactly once at this boundary.

use ledgerstore_common::util::hash::{hex_bytes, to_hex, DoubleSha256};
use ledgerstore_common::util::uint::Uint256;

use crate::backend::SqlValue;
use crate::db::Error;
use crate::dialect::{BinaryType, IntType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Codec {
    binary_type: BinaryType,
    int_type: IntType,
}

fn reversed(x: &[u8]) -> Vec<u8> {
    x.iter().rev().copied().collect()
}

impl Codec {
    pub fn new(binary_type: BinaryType, int_type: IntType) -> Codec {
        Codec {
            binary_type,
            int_type,
        }
    }

    pub fn binary_type(&self) -> BinaryType {
        self.binary_type
    }

    pub fn int_type(&self) -> IntType {
        self.int_type
    }

    pub fn binin(&self, x: &[u8]) -> SqlValue {
        match self.binary_type {
            BinaryType::Hex => SqlValue::Text(to_hex(x)),
            BinaryType::Native | BinaryType::Bytea | BinaryType::Binary => {
                SqlValue::Blob(x.to_vec())
            }
        }
    }

    pub fn binin_hex(&self, hex: &str) -> Result<SqlValue, Error> {
        let bytes = hex_bytes(hex)?;
        Ok(match self.binary_type {
            BinaryType::Hex => SqlValue::Text(hex.to_ascii_lowercase()),
            _ => SqlValue::Blob(bytes),
        })
    }

    pub fn binout(&self, v: &SqlValue) -> Result<Option<Vec<u8>>, Error> {
        match (self.binary_type, v) {
            (_, SqlValue::Null) => Ok(None),
            (BinaryType::Hex, SqlValue::Text(s)) => Ok(Some(hex_bytes(s.trim_end())?)),
            (BinaryType::Hex, _) => Err(Error::TypeError),
            (_, SqlValue::Blob(b)) => Ok(Some(b.clone())),
            // some drivers hand fixed-width binary back as a byte string
            (_, SqlValue::Text(s)) => Ok(Some(s.clone().into_bytes())),
            _ => Err(Error::TypeError),
        }
    }

    pub fn binout_hex(&self, v: &SqlValue) -> Result<Option<String>, Error> {
        match (self.binary_type, v) {
            (BinaryType::Hex, SqlValue::Text(s)) => {
                hex_bytes(s.trim_end())?;
                Ok(Some(s.trim_end().to_ascii_lowercase()))
            }
            _ => Ok(self.binout(v)?.map(|b| to_hex(&b))),
        }
    }

    pub fn hashin(&self, x: &[u8]) -> SqlValue {
        self.binin(&reversed(x))
    }

    pub fn hashin_hex(&self, hex: &str) -> Result<SqlValue, Error> {
        self.binin_hex(hex)
    }

    pub fn hashout(&self, v: &SqlValue) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.binout(v)?.map(|b| reversed(&b)))
    }

    pub fn hashout_hex(&self, v: &SqlValue) -> Result<Option<String>, Error> {
        self.binout_hex(v)
    }

    pub fn hash_in(&self, h: &DoubleSha256) -> SqlValue {
        self.hashin(h.as_bytes())
    }

    pub fn hash_out(&self, v: &SqlValue) -> Result<Option<DoubleSha256>, Error> {
        match self.hashout(v)? {
            None => Ok(None),
            Some(b) => DoubleSha256::from_bytes(&b)
                .map(Some)
                .ok_or(Error::ParseError),
        }
    }

    /// Bind a possibly-large integer. Under `IntType::Int` anything past
    /// the 64-bit range is an `Overflow`.
    pub fn intin(&self, n: i128) -> Result<SqlValue, Error> {
        match self.int_type {
            IntType::Int => i64::try_from(n)
                .map(SqlValue::Integer)
                .map_err(|_| Error::Overflow),
            IntType::Decimal => Ok(SqlValue::Decimal(n.to_string())),
            IntType::Str => Ok(SqlValue::Text(n.to_string())),
        }
    }

    /// Fixed-width big-endian binary form of a 256-bit quantity.
    pub fn binin_int(&self, n: &Uint256, bits: usize) -> SqlValue {
        self.binin(&n.to_be_bytes_padded(bits / 8))
    }

    pub fn binout_int(&self, v: &SqlValue) -> Result<Option<Uint256>, Error> {
        match self.binout(v)? {
            None => Ok(None),
            Some(b) => Uint256::from_be_slice(&b)
                .map(Some)
                .ok_or(Error::Overflow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codecs() -> Vec<Codec> {
        BinaryType::ALL
            .iter()
            .map(|bt| Codec::new(*bt, IntType::Int))
            .collect()
    }

    #[test]
    fn binary_values_survive() {
        let long: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let samples: Vec<&[u8]> = vec![&b""[..], &b"\x00"[..], &b"\xff\x00\x7f"[..], &long[..]];
        for codec in codecs() {
            for x in samples.iter() {
                let enc = codec.binin(x);
                assert_eq!(codec.binout(&enc).unwrap().as_deref(), Some(*x));
                assert_eq!(
                    codec.binout_hex(&enc).unwrap(),
                    Some(to_hex(x)),
                    "{:?}",
                    codec
                );
            }
            assert_eq!(codec.binout(&SqlValue::Null).unwrap(), None);
        }
    }

    #[test]
    fn hashes_reverse_once() {
        let h = DoubleSha256::from_data(b"block");
        for codec in codecs() {
            let enc = codec.hash_in(&h);
            assert_eq!(codec.hash_out(&enc).unwrap(), Some(h));

            // the display form is the reversed wire form
            let display = codec.hashout_hex(&enc).unwrap().unwrap();
            assert_eq!(display, h.be_hex_string());
            let enc2 = codec.hashin_hex(&display).unwrap();
            assert_eq!(enc, enc2);
        }
    }

    #[test]
    fn hex_columns_hold_text() {
        let codec = Codec::new(BinaryType::Hex, IntType::Int);
        assert_eq!(
            codec.binin(&[0xde, 0xad]),
            SqlValue::Text("dead".to_string())
        );
        assert_eq!(
            codec.binin_hex("BEEF").unwrap(),
            SqlValue::Text("beef".to_string())
        );
        assert!(codec.binin_hex("xyz").is_err());
        assert!(codec.binout(&SqlValue::Integer(1)).is_err());
    }

    #[test]
    fn integer_representations() {
        let big: i128 = 9226543405000000000;
        let int = Codec::new(BinaryType::Native, IntType::Int);
        assert_eq!(int.intin(5).unwrap(), SqlValue::Integer(5));
        assert!(matches!(int.intin(big), Err(Error::Overflow)));

        let dec = Codec::new(BinaryType::Native, IntType::Decimal);
        assert_eq!(
            dec.intin(big).unwrap(),
            SqlValue::Decimal("9226543405000000000".into())
        );

        let s = Codec::new(BinaryType::Native, IntType::Str);
        assert_eq!(s.intin(-3).unwrap(), SqlValue::Text("-3".into()));
    }

    #[test]
    fn work_is_fixed_width() {
        for codec in codecs() {
            let work = Uint256::work_from_compact(0x1d00ffff);
            let enc = codec.binin_int(&work, 304);
            assert_eq!(codec.binout(&enc).unwrap().unwrap().len(), 38);
            assert_eq!(codec.binout_int(&enc).unwrap(), Some(work));
        }
    }
}
