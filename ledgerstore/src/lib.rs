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

#![allow(non_camel_case_types)]
#![allow(clippy::assertions_on_constants)]
#![cfg_attr(test, allow(unused_variables, unused_assignments))]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate ledgerstore_common;
#[macro_use]
extern crate serde_derive;

pub mod backend;
pub mod chainstate;
pub mod config;
pub mod db;
pub mod dialect;
pub mod store;

#[cfg(test)]
mod tests;

pub use crate::config::{ChainConfig, StoreConfig};
pub use crate::store::{DataStore, SchemaUpgrade};
