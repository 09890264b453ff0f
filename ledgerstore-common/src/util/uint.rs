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

//! 256-bit unsigned arithmetic for proof-of-work accounting.
//! Borrowed in spirit from Andrew Poelstra's rust-bitcoin `Uint256`:
//! four little-endian u64 limbs, wrapping `+`/`-`, bitwise long division.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, BitOr, Not, Shl, Shr, Sub};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Uint256(pub [u64; 4]);

impl Uint256 {
    pub fn zero() -> Uint256 {
        Uint256([0; 4])
    }

    pub fn one() -> Uint256 {
        Uint256([1, 0, 0, 0])
    }

    pub fn max() -> Uint256 {
        Uint256([u64::MAX; 4])
    }

    pub fn from_u64(n: u64) -> Uint256 {
        Uint256([n, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|limb| *limb == 0)
    }

    /// Number of significant bits
    pub fn bits(&self) -> usize {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i + (64 - self.0[i].leading_zeros() as usize);
            }
        }
        0
    }

    pub fn bit(&self, index: usize) -> bool {
        index < 256 && (self.0[index / 64] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }

    pub fn checked_add(&self, other: &Uint256) -> Option<Uint256> {
        let (sum, carry) = self.overflowing_add(other);
        if carry {
            None
        } else {
            Some(sum)
        }
    }

    fn overflowing_add(&self, other: &Uint256) -> (Uint256, bool) {
        let mut ret = [0u64; 4];
        let mut carry = false;
        for i in 0..4 {
            let (s1, c1) = self.0[i].overflowing_add(other.0[i]);
            let (s2, c2) = s1.overflowing_add(carry as u64);
            ret[i] = s2;
            carry = c1 || c2;
        }
        (Uint256(ret), carry)
    }

    /// Quotient and remainder. None on division by zero.
    pub fn checked_div_rem(&self, divisor: &Uint256) -> Option<(Uint256, Uint256)> {
        if divisor.is_zero() {
            return None;
        }
        let mut quotient = Uint256::zero();
        let mut rem = Uint256::zero();
        for i in (0..self.bits()).rev() {
            let carry = rem.bit(255);
            rem = rem << 1;
            if self.bit(i) {
                rem.0[0] |= 1;
            }
            if carry || rem >= *divisor {
                rem = rem - *divisor;
                quotient.set_bit(i);
            }
        }
        Some((quotient, rem))
    }

    pub fn from_be_bytes(bytes: &[u8; 32]) -> Uint256 {
        let mut ret = [0u64; 4];
        for (i, chunk) in bytes.chunks(8).enumerate() {
            let mut limb = [0u8; 8];
            limb.copy_from_slice(chunk);
            ret[3 - i] = u64::from_be_bytes(limb);
        }
        Uint256(ret)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut ret = [0u8; 32];
        for i in 0..4 {
            ret[8 * i..8 * (i + 1)].copy_from_slice(&self.0[3 - i].to_be_bytes());
        }
        ret
    }

    /// Big-endian bytes left-padded with zeros to `width` bytes (at least 32).
    pub fn to_be_bytes_padded(&self, width: usize) -> Vec<u8> {
        let width = width.max(32);
        let mut ret = vec![0u8; width - 32];
        ret.extend_from_slice(&self.to_be_bytes());
        ret
    }

    /// Parse big-endian bytes of any length. None if the value does not fit.
    pub fn from_be_slice(bytes: &[u8]) -> Option<Uint256> {
        let skip = bytes.len().saturating_sub(32);
        if bytes[..skip].iter().any(|b| *b != 0) {
            return None;
        }
        let mut buf = [0u8; 32];
        let tail = &bytes[skip..];
        buf[32 - tail.len()..].copy_from_slice(tail);
        Some(Uint256::from_be_bytes(&buf))
    }

    /// Decode a compact ("nBits") difficulty target.
    /// None for negative or overflowing encodings.
    pub fn from_compact(bits: u32) -> Option<Uint256> {
        let exponent = (bits >> 24) as usize;
        let mantissa = bits & 0x007f_ffff;
        if mantissa != 0 && bits & 0x0080_0000 != 0 {
            return None;
        }
        let mantissa = Uint256::from_u64(mantissa as u64);
        if exponent <= 3 {
            return Some(mantissa >> (8 * (3 - exponent)));
        }
        let shift = 8 * (exponent - 3);
        if mantissa.bits() + shift > 256 {
            return None;
        }
        Some(mantissa << shift)
    }

    /// Expected number of hashes to meet the compact target:
    /// 2^256 / (target + 1), computed as !target / (target + 1) + 1.
    /// Zero for invalid or zero targets.
    pub fn work_from_compact(bits: u32) -> Uint256 {
        let target = match Uint256::from_compact(bits) {
            Some(t) if !t.is_zero() => t,
            _ => return Uint256::zero(),
        };
        let Some(divisor) = target.checked_add(&Uint256::one()) else {
            return Uint256::one();
        };
        match (!target).checked_div_rem(&divisor) {
            Some((quotient, _)) => quotient + Uint256::one(),
            None => Uint256::zero(),
        }
    }
}

impl Ord for Uint256 {
    fn cmp(&self, other: &Uint256) -> Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Uint256 {
    fn partial_cmp(&self, other: &Uint256) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Uint256 {
    type Output = Uint256;
    /// Wrapping
    fn add(self, other: Uint256) -> Uint256 {
        self.overflowing_add(&other).0
    }
}

impl Sub for Uint256 {
    type Output = Uint256;
    /// Wrapping
    fn sub(self, other: Uint256) -> Uint256 {
        self + !other + Uint256::one()
    }
}

impl Not for Uint256 {
    type Output = Uint256;
    fn not(self) -> Uint256 {
        let Uint256(arr) = self;
        Uint256([!arr[0], !arr[1], !arr[2], !arr[3]])
    }
}

impl BitOr for Uint256 {
    type Output = Uint256;
    fn bitor(self, other: Uint256) -> Uint256 {
        let mut ret = self.0;
        for i in 0..4 {
            ret[i] |= other.0[i];
        }
        Uint256(ret)
    }
}

impl Shl<usize> for Uint256 {
    type Output = Uint256;
    fn shl(self, shift: usize) -> Uint256 {
        let mut ret = [0u64; 4];
        let word_shift = shift / 64;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift >= 4 {
                break;
            }
            ret[i + word_shift] |= self.0[i] << bit_shift;
            if bit_shift > 0 && i + word_shift + 1 < 4 {
                ret[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
            }
        }
        Uint256(ret)
    }
}

impl Shr<usize> for Uint256 {
    type Output = Uint256;
    fn shr(self, shift: usize) -> Uint256 {
        let mut ret = [0u64; 4];
        let word_shift = shift / 64;
        let bit_shift = shift % 64;
        for i in word_shift..4 {
            ret[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i > word_shift {
                ret[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }
        Uint256(ret)
    }
}

impl fmt::Debug for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for limb in self.0.iter().rev() {
            write!(f, "{:016x}", limb)?;
        }
        Ok(())
    }
}

impl fmt::Display for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifts() {
        let one = Uint256::one();
        assert_eq!((one << 64).0, [0, 1, 0, 0]);
        assert_eq!((one << 255).bits(), 256);
        assert_eq!(one << 256, Uint256::zero());
        assert_eq!((one << 130) >> 130, one);
        assert_eq!(Uint256::from_u64(0xff00) >> 8, Uint256::from_u64(0xff));
        assert_eq!(Uint256([0, 1, 0, 0]) >> 1, Uint256::from_u64(1 << 63));
    }

    #[test]
    fn add_sub_wrap() {
        let max = Uint256::max();
        assert_eq!(max + Uint256::one(), Uint256::zero());
        assert_eq!(max.checked_add(&Uint256::one()), None);
        assert_eq!(Uint256::zero() - Uint256::one(), max);
        let a = Uint256([u64::MAX, 0, 0, 0]);
        assert_eq!(a + Uint256::one(), Uint256([0, 1, 0, 0]));
        assert_eq!(Uint256([0, 1, 0, 0]) - Uint256::one(), a);
    }

    #[test]
    fn division() {
        let n = Uint256::from_u64(1_000_003);
        let d = Uint256::from_u64(97);
        let (q, r) = n.checked_div_rem(&d).unwrap();
        assert_eq!(q, Uint256::from_u64(1_000_003 / 97));
        assert_eq!(r, Uint256::from_u64(1_000_003 % 97));
        assert!(n.checked_div_rem(&Uint256::zero()).is_none());

        let big = Uint256::one() << 200;
        let (q, r) = big.checked_div_rem(&(Uint256::one() << 100)).unwrap();
        assert_eq!(q, Uint256::one() << 100);
        assert!(r.is_zero());

        let (q, _) = Uint256::max().checked_div_rem(&(Uint256::one() << 255)).unwrap();
        assert_eq!(q, Uint256::one());
    }

    #[test]
    fn compact_targets() {
        let genesis = Uint256::from_compact(0x1d00ffff).unwrap();
        assert_eq!(genesis, Uint256::from_u64(0xffff) << 208);
        assert_eq!(Uint256::from_compact(0x03123456).unwrap(), Uint256::from_u64(0x123456));
        assert_eq!(Uint256::from_compact(0x01123456).unwrap(), Uint256::from_u64(0x12));
        assert!(Uint256::from_compact(0x04923456).is_none());
        assert!(Uint256::from_compact(0xff123456).is_none());
    }

    #[test]
    fn work() {
        assert_eq!(
            Uint256::work_from_compact(0x1d00ffff),
            Uint256::from_u64(0x1_0001_0001)
        );
        assert_eq!(Uint256::work_from_compact(0), Uint256::zero());
        // easier target, less work
        assert!(Uint256::work_from_compact(0x207fffff) < Uint256::work_from_compact(0x1d00ffff));
    }

    #[test]
    fn byte_conversions() {
        let v = (Uint256::from_u64(0x0102) << 200) | Uint256::from_u64(7);
        let be = v.to_be_bytes();
        assert_eq!(be[31], 7);
        assert_eq!(Uint256::from_be_bytes(&be), v);

        let padded = v.to_be_bytes_padded(38);
        assert_eq!(padded.len(), 38);
        assert_eq!(&padded[..6], &[0u8; 6]);
        assert_eq!(Uint256::from_be_slice(&padded), Some(v));
        assert_eq!(Uint256::from_be_slice(&[1, 0]), Some(Uint256::from_u64(256)));

        let mut overflow = vec![1u8];
        overflow.extend_from_slice(&[0u8; 32]);
        assert_eq!(Uint256::from_be_slice(&overflow), None);
    }
}
