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

//! A SQLite backend that pretends to be a weaker database, for exercising
//! dialect negotiation and reconnect handling against capabilities SQLite
//! itself always has.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use regex::Regex;

use crate::backend::sqlite::SqliteBackend;
use crate::backend::{
    BackendConnection, BackendError, ParamStyle, SqlBackend, SqlValue, StatementResult,
};

lazy_static! {
    static ref VARCHAR_WIDTH: Regex = Regex::new(r"VARCHAR\(([0-9]+)\)").unwrap();
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"\bLIMIT\b").unwrap();
    static ref DDL_STATEMENT: Regex = Regex::new(r"^\s*(CREATE|DROP|ALTER)\b").unwrap();
    static ref FORMAT_PLACEHOLDER: Regex = Regex::new(r"%(%|s)").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct Restrictions {
    /// Reject VARCHAR columns wider than this
    pub max_varchar: Option<u64>,
    /// Reject any statement with a LIMIT clause
    pub no_limit: bool,
    /// Reject blob parameters
    pub no_blob: bool,
    /// Reject decimal parameters
    pub no_decimal: bool,
    /// Placeholder style the fake driver demands
    pub param_style: Option<ParamStyle>,
    /// Commit right after every schema statement
    pub ddl_autocommit: bool,
}

/// Shared knobs, so a test can reach into a running store.
#[derive(Debug, Default)]
pub struct RestrictedControl {
    connects: AtomicUsize,
    /// Number of upcoming statements to fail with an operational error
    fail_next: AtomicUsize,
    /// Fail every connection attempt while nonzero
    refuse_connects: AtomicUsize,
}

impl RestrictedControl {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_statements(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn refuse_connects(&self, n: usize) {
        self.refuse_connects.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_refusal(&self) -> bool {
        self.refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct RestrictedBackend {
    inner: SqliteBackend,
    restrictions: Restrictions,
    control: Arc<RestrictedControl>,
}

impl RestrictedBackend {
    pub fn new(path: &str, restrictions: Restrictions) -> RestrictedBackend {
        RestrictedBackend {
            inner: SqliteBackend::new(path),
            restrictions,
            control: Arc::new(RestrictedControl::default()),
        }
    }

    pub fn control(&self) -> Arc<RestrictedControl> {
        self.control.clone()
    }
}

impl SqlBackend for RestrictedBackend {
    fn name(&self) -> &str {
        "restricted-sqlite"
    }

    fn param_style(&self) -> ParamStyle {
        self.restrictions.param_style.unwrap_or(ParamStyle::Qmark)
    }

    fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendError> {
        if self.control.take_refusal() {
            return Err(BackendError::operational("connection refused"));
        }
        self.control.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RestrictedConnection {
            inner: Box::new(self.inner.open_raw()?),
            restrictions: self.restrictions.clone(),
            control: self.control.clone(),
        }))
    }
}

struct RestrictedConnection {
    inner: Box<dyn BackendConnection>,
    restrictions: Restrictions,
    control: Arc<RestrictedControl>,
}

impl RestrictedConnection {
    fn check(&self, sql: &str, params: &[SqlValue]) -> Result<(), BackendError> {
        if let Some(max) = self.restrictions.max_varchar {
            for cap in VARCHAR_WIDTH.captures_iter(sql) {
                let width: u64 = cap[1].parse().unwrap_or(u64::MAX);
                if width > max {
                    return Err(BackendError::programming(format!(
                        "VARCHAR({}) exceeds maximum width {}",
                        width, max
                    )));
                }
            }
        }
        if self.restrictions.no_limit && LIMIT_CLAUSE.is_match(sql) {
            return Err(BackendError::programming("LIMIT is not supported"));
        }
        for param in params {
            match param {
                SqlValue::Blob(_) if self.restrictions.no_blob => {
                    return Err(BackendError::interface("cannot bind binary parameters"));
                }
                SqlValue::Decimal(_) if self.restrictions.no_decimal => {
                    return Err(BackendError::interface("cannot bind decimal parameters"));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Map the demanded placeholder style back to what SQLite reads.
    fn native_sql(&self, sql: &str) -> Result<String, BackendError> {
        match self.param_style() {
            ParamStyle::Format => {
                if sql.contains('?') {
                    return Err(BackendError::programming("qmark placeholder in format-style SQL"));
                }
                Ok(FORMAT_PLACEHOLDER
                    .replace_all(sql, |cap: &regex::Captures| {
                        if &cap[1] == "s" {
                            "?".to_string()
                        } else {
                            "%".to_string()
                        }
                    })
                    .into_owned())
            }
            ParamStyle::Named => {
                if sql.contains('?') {
                    return Err(BackendError::programming("qmark placeholder in named-style SQL"));
                }
                Ok(sql.to_string())
            }
            ParamStyle::Qmark => Ok(sql.to_string()),
        }
    }

    fn param_style(&self) -> ParamStyle {
        self.restrictions.param_style.unwrap_or(ParamStyle::Qmark)
    }
}

impl BackendConnection for RestrictedConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<StatementResult, BackendError> {
        if self.control.take_failure() {
            return Err(BackendError::operational("server has gone away"));
        }
        self.check(sql, params)?;
        let native = self.native_sql(sql)?;
        let result = self.inner.execute(&native, params)?;
        if self.restrictions.ddl_autocommit && DDL_STATEMENT.is_match(sql) {
            self.inner.commit()?;
        }
        Ok(result)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), BackendError> {
        self.inner.rollback()
    }

    fn set_nowait(&mut self, nowait: bool) -> Result<(), BackendError> {
        self.inner.set_nowait(nowait)
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ErrorClass;

    #[test]
    fn enforces_restrictions() {
        let backend = RestrictedBackend::new(
            ":memory:",
            Restrictions {
                max_varchar: Some(100),
                no_limit: true,
                no_blob: true,
                ..Restrictions::default()
            },
        );
        let mut conn = backend.connect().unwrap();
        assert!(conn.execute("CREATE TABLE t (a VARCHAR(101))", &[]).is_err());
        conn.execute("CREATE TABLE t (a VARCHAR(100))", &[]).unwrap();
        assert!(conn.execute("SELECT a FROM t LIMIT 1", &[]).is_err());
        let err = conn
            .execute("INSERT INTO t (a) VALUES (?)", &[SqlValue::Blob(vec![1])])
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Interface);
        assert_eq!(backend.control().connects(), 1);
    }

    #[test]
    fn format_placeholders() {
        let backend = RestrictedBackend::new(
            ":memory:",
            Restrictions {
                param_style: Some(ParamStyle::Format),
                ..Restrictions::default()
            },
        );
        assert_eq!(backend.param_style(), ParamStyle::Format);
        let mut conn = backend.connect().unwrap();
        let res = conn
            .execute("SELECT %s || '%%'", &[SqlValue::Text("5".into())])
            .unwrap();
        assert_eq!(res.rows[0][0], SqlValue::Text("5%".into()));
        assert!(conn.execute("SELECT ?", &[SqlValue::Integer(1)]).is_err());
    }

    #[test]
    fn injected_failures_and_refusals() {
        let backend = RestrictedBackend::new(":memory:", Restrictions::default());
        let control = backend.control();
        let mut conn = backend.connect().unwrap();
        control.fail_next_statements(1);
        let err = conn.execute("SELECT 1", &[]).unwrap_err();
        assert!(err.is_transient());
        assert!(conn.execute("SELECT 1", &[]).is_ok());

        control.refuse_connects(1);
        assert!(backend.connect().is_err());
        assert!(backend.connect().is_ok());
        assert_eq!(control.connects(), 2);
    }
}
