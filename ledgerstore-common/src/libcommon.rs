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

#![allow(unused_macros)]
#![allow(dead_code)]
#![allow(non_camel_case_types)]
#![cfg_attr(test, allow(unused_variables, unused_assignments))]

#[macro_use]
extern crate lazy_static;

/// Re-exported so the logging macros resolve `slog` from any dependent crate.
pub extern crate slog;

#[macro_use]
pub mod util;

pub mod consts {
    /// Hash of the (nonexistent) parent of a genesis block.
    pub const NULL_HASH: [u8; 32] = [0u8; 32];

    /// Width of the stored cumulative-work column, in bits.
    pub const WORK_BITS: usize = 304;

    /// Largest script we store, in bytes.
    pub const MAX_SCRIPT: usize = 1_000_000;
}
