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

//! Text rewrites from dialect-neutral SQL to backend SQL.
//!
//! Neutral SQL uses `?` placeholders, `BIT(n)` / `BIT VARYING(n)` for
//! binary columns and `X'..'` for binary literals. The rewrites are plain
//! text substitutions; a quoted string that happens to contain one of
//! these patterns is rewritten too.

use regex::{Captures, Regex};

use crate::backend::ParamStyle;
use crate::dialect::{BinaryType, IntType};

lazy_static! {
    static ref BIT_TYPE: Regex = Regex::new(r"BIT((?: VARYING)?)\(([0-9]+)\)").unwrap();
    static ref HEX_LITERAL: Regex = Regex::new(r"X'((?:[0-9a-fA-F]{2})*)'").unwrap();
    static ref VARCHAR_TYPE: Regex = Regex::new(r"VARCHAR\(([0-9]+)\)").unwrap();
    static ref APPROX_TXOUT: Regex = Regex::new(r"\btxout_value txout_approx_value\b").unwrap();
    static ref TRAILING_LIMIT: Regex = Regex::new(r"(?s)^(.*)\bLIMIT\s+(\?|\d+)\s*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatementTransform {
    param_style: ParamStyle,
    binary_type: BinaryType,
    int_type: IntType,
}

impl StatementTransform {
    pub fn new(
        param_style: ParamStyle,
        binary_type: BinaryType,
        int_type: IntType,
    ) -> StatementTransform {
        StatementTransform {
            param_style,
            binary_type,
            int_type,
        }
    }

    /// Value rewrites first, placeholder syntax last.
    pub fn apply(&self, stmt: &str) -> String {
        let mut stmt = stmt.to_string();
        if self.int_type == IntType::Str {
            stmt = approximate_txout(&stmt);
        }
        stmt = match self.binary_type {
            BinaryType::Native => stmt,
            BinaryType::Hex => binary_as_hex(&stmt),
            BinaryType::Bytea => binary_as_bytea(&stmt),
            BinaryType::Binary => binary_as_binary(&stmt),
        };
        match self.param_style {
            ParamStyle::Qmark => stmt,
            ParamStyle::Format => qmark_to_format(&stmt),
            ParamStyle::Named => qmark_to_named(&stmt),
        }
    }
}

/// `%` doubles, `?` becomes `%s`.
pub fn qmark_to_format(stmt: &str) -> String {
    stmt.replace('%', "%%").replace('?', "%s")
}

/// `?` becomes `:p1`, `:p2`, ... in order of appearance.
pub fn qmark_to_named(stmt: &str) -> String {
    let mut out = String::with_capacity(stmt.len() + 8);
    let mut n = 0;
    for c in stmt.chars() {
        if c == '?' {
            n += 1;
            out.push_str(&format!(":p{}", n));
        } else {
            out.push(c);
        }
    }
    out
}

fn bit_width(caps: &Captures, per_unit: u64) -> u64 {
    caps[2].parse::<u64>().unwrap_or(0) / per_unit
}

/// Bit strings as hex text: `BIT(n)` to `CHAR(n/4)`, `BIT VARYING(n)` to
/// `VARCHAR(n/4)`, and `X'..'` literals lose their prefix.
pub fn binary_as_hex(stmt: &str) -> String {
    let stmt = BIT_TYPE.replace_all(stmt, |caps: &Captures| {
        let kind = if caps[1].is_empty() { "CHAR" } else { "VARCHAR" };
        format!("{}({})", kind, bit_width(caps, 4))
    });
    stmt.replace("X'", "'")
}

/// Bit strings as `BINARY(n/8)` / `VARBINARY(n/8)`.
pub fn binary_as_binary(stmt: &str) -> String {
    BIT_TYPE
        .replace_all(stmt, |caps: &Captures| {
            let kind = if caps[1].is_empty() {
                "BINARY"
            } else {
                "VARBINARY"
            };
            format!("{}({})", kind, bit_width(caps, 8))
        })
        .into_owned()
}

/// Bit strings as PostgreSQL `BYTEA`, literals as octal-escaped strings.
pub fn binary_as_bytea(stmt: &str) -> String {
    let stmt = BIT_TYPE.replace_all(stmt, "BYTEA");
    HEX_LITERAL
        .replace_all(&stmt, |caps: &Captures| {
            let hex = &caps[1];
            let mut out = String::from("'");
            for i in (0..hex.len()).step_by(2) {
                let byte = u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
                out.push_str(&format!("\\\\{:03o}", byte));
            }
            out.push_str("'::bytea");
            out
        })
        .into_owned()
}

/// Columns wider than `max_varchar` become `clob_type`.
pub fn fallback_to_lob(stmt: &str, max_varchar: u64, clob_type: &str) -> String {
    VARCHAR_TYPE
        .replace_all(stmt, |caps: &Captures| match caps[1].parse::<u64>() {
            Ok(width) if width <= max_varchar => caps[0].to_string(),
            _ => clob_type.to_string(),
        })
        .into_owned()
}

/// Cast the approximate output value to floating point, so backends with
/// string-bound integers never do fixed-width arithmetic on it.
pub fn approximate_txout(stmt: &str) -> String {
    APPROX_TXOUT
        .replace_all(stmt, "CAST(txout_value AS DOUBLE PRECISION) txout_approx_value")
        .into_owned()
}

/// The row bound of a trailing LIMIT clause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitArg {
    /// Bound by the last positional parameter
    Param,
    Count(usize),
}

/// Split a trailing `LIMIT n` or `LIMIT ?` off a query.
pub fn split_limit(stmt: &str) -> Option<(String, LimitArg)> {
    let caps = TRAILING_LIMIT.captures(stmt)?;
    let arg = match &caps[2] {
        "?" => LimitArg::Param,
        n => LimitArg::Count(n.parse().ok()?),
    };
    Some((caps[1].to_string(), arg))
}
