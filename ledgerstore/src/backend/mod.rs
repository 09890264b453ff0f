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

//! SQL backends.
//!
//! A backend is a connection factory plus the placeholder style its driver
//! expects. Connections behave like a DB-API cursor: the first statement
//! after a commit or rollback opens a transaction, every statement returns
//! its affected-row count and any result rows eagerly.

use std::sync::Arc;
use std::{error, fmt};

pub mod sqlite;
#[cfg(any(test, feature = "testing"))]
pub mod restricted;

pub use self::sqlite::SqliteBackend;

define_named_enum!(
    /// Placeholder syntax accepted by a driver.
    ParamStyle {
        Qmark("qmark"),
        Format("format"),
        Named("named"),
    }
);

/// Coarse driver error classes, after DB-API 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Lost connection, lock contention, I/O trouble. Worth one retry.
    Operational,
    /// Constraint violation
    Integrity,
    /// Bad SQL, missing table, unsupported syntax
    Programming,
    /// A value the driver cannot bind or a misuse of the driver itself
    Interface,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendError {
    pub class: ErrorClass,
    pub message: String,
}

impl BackendError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> BackendError {
        BackendError {
            class,
            message: message.into(),
        }
    }

    pub fn operational(message: impl Into<String>) -> BackendError {
        BackendError::new(ErrorClass::Operational, message)
    }

    pub fn programming(message: impl Into<String>) -> BackendError {
        BackendError::new(ErrorClass::Programming, message)
    }

    pub fn interface(message: impl Into<String>) -> BackendError {
        BackendError::new(ErrorClass::Interface, message)
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Operational
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} error: {}", self.class, self.message)
    }
}

impl error::Error for BackendError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        None
    }
}

/// A bound parameter or a fetched column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// Arbitrary-precision decimal in its canonical text form
    Decimal(String),
}

pub type SqlRow = Vec<SqlValue>;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> SqlValue {
        SqlValue::Integer(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> SqlValue {
        SqlValue::Integer(v as i64)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> SqlValue {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> SqlValue {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> SqlValue {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    /// Rows changed by an INSERT/UPDATE/DELETE, or rows returned by a query
    pub rowcount: usize,
    pub rows: Vec<SqlRow>,
}

/// One live driver connection.
pub trait BackendConnection: Send {
    /// Run one statement, opening a transaction first if none is open.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<StatementResult, BackendError>;
    fn commit(&mut self) -> Result<(), BackendError>;
    fn rollback(&mut self) -> Result<(), BackendError>;
    /// When set, lock contention fails immediately instead of waiting.
    fn set_nowait(&mut self, nowait: bool) -> Result<(), BackendError>;
    fn close(self: Box<Self>) -> Result<(), BackendError>;
}

/// Connection factory for one database.
pub trait SqlBackend: Send + Sync {
    fn name(&self) -> &str;
    fn param_style(&self) -> ParamStyle;
    fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendError>;
}

/// Resolve a configured `dbtype` to a backend.
pub fn open_backend(
    dbtype: &str,
    connect_args: &str,
) -> Result<Arc<dyn SqlBackend>, BackendError> {
    match dbtype {
        "sqlite" | "sqlite3" => Ok(Arc::new(SqliteBackend::new(connect_args))),
        _ => Err(BackendError::interface(format!(
            "unsupported dbtype '{}'",
            dbtype
        ))),
    }
}
