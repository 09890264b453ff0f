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

use std::{error, fmt};

use ledgerstore_common::util::HexError;

use crate::backend::{BackendError, SqlRow, SqlValue};
use crate::dialect::Dialect;

pub mod conn;
pub mod lock;
pub mod sequence;

pub use self::conn::StoreConnection;

#[derive(Debug)]
pub enum Error {
    /// No candidate value for the named dialect parameter passed its probe
    NoViableDialect(String),
    /// Stored schema version differs from this software's, and no upgrade was requested
    SchemaMismatch { found: String, expected: String },
    /// Driver error
    Backend(BackendError),
    /// Data not found
    NotFoundError,
    /// Database is corrupt -- we got data that shouldn't be there, or didn't get data when we
    /// should have
    Corruption,
    /// Parse error -- failed to load data we stored directly
    ParseError,
    /// Type error -- can't represent the given data in the database
    TypeError,
    /// Operation would overflow
    Overflow,
    /// Identifier allocation for a key that has no sequence
    NoSuchSequence(String),
    /// Could not take the advisory lock
    LockUnavailable,
    /// Other error
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::NoViableDialect(ref p) => {
                write!(f, "No working value for dialect parameter '{}'", p)
            }
            Error::SchemaMismatch {
                ref found,
                ref expected,
            } => write!(
                f,
                "Database schema version ({}) does not match software ({}). \
                 Please run with upgrade enabled to convert the database.",
                found, expected
            ),
            Error::Backend(ref e) => fmt::Display::fmt(e, f),
            Error::NotFoundError => write!(f, "Not found"),
            Error::Corruption => write!(f, "Database is corrupt"),
            Error::ParseError => write!(f, "Parse error"),
            Error::TypeError => write!(f, "Invalid or unrepresentable database type"),
            Error::Overflow => write!(f, "Numeric overflow"),
            Error::NoSuchSequence(ref k) => write!(f, "Sequence {} does not exist", k),
            Error::LockUnavailable => write!(f, "Advisory lock is unavailable"),
            Error::Other(ref s) => fmt::Display::fmt(s, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Backend(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Error {
        Error::Backend(e)
    }
}

impl From<HexError> for Error {
    fn from(_e: HexError) -> Error {
        Error::ParseError
    }
}

impl SqlValue {
    pub fn as_i64(&self) -> Result<Option<i64>, Error> {
        match self.as_i128()? {
            None => Ok(None),
            Some(v) => i64::try_from(v).map(Some).map_err(|_| Error::Overflow),
        }
    }

    /// Integer view of a numeric column, whichever way the driver returned it.
    /// Reals are truncated.
    pub fn as_i128(&self) -> Result<Option<i128>, Error> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(i) => Ok(Some(*i as i128)),
            SqlValue::Real(f) => {
                if !f.is_finite() {
                    return Err(Error::Overflow);
                }
                Ok(Some(*f as i128))
            }
            SqlValue::Text(s) | SqlValue::Decimal(s) => parse_integer_text(s).map(Some),
            SqlValue::Blob(_) => Err(Error::TypeError),
        }
    }

    pub fn as_f64(&self) -> Result<Option<f64>, Error> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(i) => Ok(Some(*i as f64)),
            SqlValue::Real(f) => Ok(Some(*f)),
            SqlValue::Text(s) | SqlValue::Decimal(s) => {
                s.trim().parse::<f64>().map(Some).map_err(|_| Error::ParseError)
            }
            SqlValue::Blob(_) => Err(Error::TypeError),
        }
    }

    pub fn as_text(&self) -> Result<Option<String>, Error> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) | SqlValue::Decimal(s) => Ok(Some(s.clone())),
            SqlValue::Integer(i) => Ok(Some(i.to_string())),
            SqlValue::Real(f) => Ok(Some(f.to_string())),
            SqlValue::Blob(b) => String::from_utf8(b.clone())
                .map(Some)
                .map_err(|_| Error::TypeError),
        }
    }
}

/// "123", "123.0" and "1.23E+2" all read as 123.
fn parse_integer_text(s: &str) -> Result<i128, Error> {
    let s = s.trim();
    if let Ok(v) = s.parse::<i128>() {
        return Ok(v);
    }
    if let Some((whole, frac)) = s.split_once('.') {
        if frac.chars().all(|c| c == '0') {
            if let Ok(v) = whole.parse::<i128>() {
                return Ok(v);
            }
        }
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(f as i128),
        _ => Err(Error::ParseError),
    }
}

/// Decode a result row. The dialect is at hand for binary columns.
pub trait FromRow<T> {
    fn from_row(row: &SqlRow, dialect: &Dialect) -> Result<T, Error>;
}

impl FromRow<i64> for i64 {
    fn from_row(row: &SqlRow, _dialect: &Dialect) -> Result<i64, Error> {
        row.first()
            .ok_or(Error::ParseError)?
            .as_i64()?
            .ok_or(Error::ParseError)
    }
}

impl FromRow<Option<i64>> for Option<i64> {
    fn from_row(row: &SqlRow, _dialect: &Dialect) -> Result<Option<i64>, Error> {
        row.first().ok_or(Error::ParseError)?.as_i64()
    }
}

/// Column accessor with the index checked.
pub fn column(row: &SqlRow, index: usize) -> Result<&SqlValue, Error> {
    row.get(index).ok_or(Error::ParseError)
}

/// boilerplate code for querying rows
pub fn query_rows<T>(
    conn: &mut StoreConnection,
    sql_query: &str,
    sql_args: &[SqlValue],
) -> Result<Vec<T>, Error>
where
    T: FromRow<T>,
{
    let rows = conn.select_all(sql_query, sql_args)?;
    let dialect = conn.dialect();
    rows.iter().map(|row| T::from_row(row, &dialect)).collect()
}

/// boilerplate code for querying a single row
///   if more than 1 row is returned, excess rows are ignored.
pub fn query_row<T>(
    conn: &mut StoreConnection,
    sql_query: &str,
    sql_args: &[SqlValue],
) -> Result<Option<T>, Error>
where
    T: FromRow<T>,
{
    match conn.select_row(sql_query, sql_args)? {
        Some(row) => {
            let dialect = conn.dialect();
            Ok(Some(T::from_row(&row, &dialect)?))
        }
        None => Ok(None),
    }
}

/// boilerplate code for querying a single integer, where NULL or no row is `None`
pub fn query_int(
    conn: &mut StoreConnection,
    sql_query: &str,
    sql_args: &[SqlValue],
) -> Result<Option<i64>, Error> {
    Ok(query_row::<Option<i64>>(conn, sql_query, sql_args)?.flatten())
}
