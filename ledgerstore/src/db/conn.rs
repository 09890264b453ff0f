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

//! The connection and transaction manager.
//!
//! A `StoreConnection` owns one live backend connection and the dialect
//! installed on it. Every statement goes through the dialect rewrite
//! before dispatch. A statement that fails with an operational error while
//! no transaction is open is retried once on a fresh connection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{
    BackendConnection, BackendError, SqlBackend, SqlRow, SqlValue, StatementResult,
};
use crate::db::Error;
use crate::dialect::transform::{split_limit, LimitArg};
use crate::dialect::{Dialect, DialectSettings, LimitStyle};

/// Outcome of one dispatch attempt.
enum Dispatch {
    Done(StatementResult),
    /// Stale connection; worth one retry on a fresh one
    Transient(BackendError),
    Fatal(BackendError),
}

pub struct StoreConnection {
    backend: Arc<dyn SqlBackend>,
    conn: Option<Box<dyn BackendConnection>>,
    dialect: Arc<Dialect>,
    /// rewritten statements, keyed by neutral statement text
    sql_cache: HashMap<String, String>,
    in_transaction: bool,
    auto_reconnect: bool,
    log_sql: bool,
}

impl StoreConnection {
    /// Connect with the default dialect installed. Auto-reconnect stays off
    /// until the caller has finished negotiating.
    pub fn open(backend: Arc<dyn SqlBackend>, log_sql: bool) -> Result<StoreConnection, Error> {
        let conn = backend.connect()?;
        let dialect = Arc::new(Dialect::new(
            DialectSettings::default(),
            backend.param_style(),
        ));
        Ok(StoreConnection {
            backend,
            conn: Some(conn),
            dialect,
            sql_cache: HashMap::new(),
            in_transaction: false,
            auto_reconnect: false,
            log_sql,
        })
    }

    pub fn backend(&self) -> &Arc<dyn SqlBackend> {
        &self.backend
    }

    pub fn dialect(&self) -> Arc<Dialect> {
        self.dialect.clone()
    }

    /// Replace the dialect. Cached rewrites are dropped.
    pub fn install_dialect(&mut self, settings: DialectSettings) {
        self.dialect = Arc::new(Dialect::new(settings, self.backend.param_style()));
        self.sql_cache.clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn set_auto_reconnect(&mut self, auto_reconnect: bool) {
        self.auto_reconnect = auto_reconnect;
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn trace_sql(&self, what: &str, stmt: &str, params: &[SqlValue]) {
        if self.log_sql {
            info!("{}", what; "sql" => %stmt, "params" => ?params);
        } else {
            debug!("{}", what; "sql" => %stmt, "params" => ?params);
        }
    }

    fn trace_event(&self, what: &str) {
        if self.log_sql {
            info!("{}", what);
        } else {
            debug!("{}", what);
        }
    }

    fn trace_exception(&self, e: &BackendError) {
        if self.log_sql {
            info!("EXCEPTION"; "error" => %e);
        } else {
            debug!("EXCEPTION"; "error" => %e);
        }
    }

    fn rewrite(&mut self, stmt: &str) -> String {
        if let Some(cached) = self.sql_cache.get(stmt) {
            return cached.clone();
        }
        let rewritten = self.dialect.sql(stmt);
        self.sql_cache.insert(stmt.to_string(), rewritten.clone());
        rewritten
    }

    fn dispatch(&mut self, stmt: &str, params: &[SqlValue]) -> Dispatch {
        let result = match self.conn.as_mut() {
            Some(conn) => conn.execute(stmt, params),
            None => Err(BackendError::operational("not connected")),
        };
        match result {
            Ok(res) => Dispatch::Done(res),
            Err(e) if e.is_transient() && !self.in_transaction && self.auto_reconnect => {
                Dispatch::Transient(e)
            }
            Err(e) => Dispatch::Fatal(e),
        }
    }

    fn execute_with_retry(
        &mut self,
        stmt: &str,
        params: &[SqlValue],
    ) -> Result<StatementResult, BackendError> {
        match self.dispatch(stmt, params) {
            Dispatch::Done(res) => Ok(res),
            Dispatch::Fatal(e) => Err(e),
            Dispatch::Transient(e) => {
                warn!("Replacing possible stale connection"; "error" => %e);
                self.reconnect();
                if self.conn.is_none() {
                    return Err(e);
                }
                match self.dispatch(stmt, params) {
                    Dispatch::Done(res) => Ok(res),
                    Dispatch::Transient(e) | Dispatch::Fatal(e) => Err(e),
                }
            }
        }
    }

    /// Run one neutral statement. Opens a transaction if none is open.
    pub fn sql(&mut self, stmt: &str, params: &[SqlValue]) -> Result<StatementResult, Error> {
        let stmt = self.rewrite(stmt);
        self.trace_sql("EXEC", &stmt, params);
        let result = self.execute_with_retry(&stmt, params);
        self.in_transaction = true;
        result.map_err(|e| {
            self.trace_exception(&e);
            Error::Backend(e)
        })
    }

    pub fn select_row(
        &mut self,
        stmt: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqlRow>, Error> {
        Ok(self.select_all(stmt, params)?.into_iter().next())
    }

    /// Run a query and fetch every row. A trailing LIMIT is applied
    /// client-side when the backend has none.
    pub fn select_all(&mut self, stmt: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, Error> {
        if self.dialect.settings().limit_style == LimitStyle::Emulated {
            if let Some((body, limit)) = split_limit(stmt) {
                let (params, count) = match limit {
                    LimitArg::Count(n) => (params, n),
                    LimitArg::Param => {
                        let (last, rest) = params.split_last().ok_or(Error::TypeError)?;
                        let n = last.as_i64()?.ok_or(Error::TypeError)?;
                        (rest, usize::try_from(n).map_err(|_| Error::TypeError)?)
                    }
                };
                let mut rows = self.sql(&body, params)?.rows;
                rows.truncate(count);
                return Ok(rows);
            }
        }
        Ok(self.sql(stmt, params)?.rows)
    }

    /// Run a schema statement. Not retried.
    pub fn ddl(&mut self, stmt: &str) -> Result<(), Error> {
        let dialect = self.dialect.clone();
        let stmt = dialect.ddl(stmt);
        self.trace_sql("DDL", &stmt, &[]);
        let result = match self.conn.as_mut() {
            Some(conn) => conn.execute(&stmt, &[]),
            None => Err(BackendError::operational("not connected")),
        };
        if let Err(e) = result {
            self.in_transaction = true;
            self.trace_exception(&e);
            return Err(e.into());
        }
        if dialect.settings().ddl_implicit_commit {
            self.in_transaction = false;
            Ok(())
        } else {
            self.commit()
        }
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.trace_event("COMMIT");
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| BackendError::operational("not connected"))?;
        conn.commit()?;
        self.in_transaction = false;
        Ok(())
    }

    /// Roll back the open transaction. A connection that cannot even roll
    /// back is replaced.
    pub fn rollback(&mut self) -> Result<(), Error> {
        self.trace_event("ROLLBACK");
        let result = match self.conn.as_mut() {
            Some(conn) => conn.rollback(),
            None => Err(BackendError::operational("not connected")),
        };
        match result {
            Ok(()) => {
                self.in_transaction = false;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                warn!("Rollback failed; reconnecting"; "error" => %e);
                self.reconnect();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.trace_event("CLOSE");
        self.in_transaction = false;
        match self.conn.take() {
            Some(conn) => Ok(conn.close()?),
            None => Ok(()),
        }
    }

    /// Swap in a fresh connection. Never fails: teardown errors are
    /// ignored, and if the new connection cannot be opened the handle stays
    /// disconnected until the next reconnect.
    pub fn reconnect(&mut self) {
        info!("Reconnecting to database"; "backend" => self.backend.name());
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close() {
                debug!("Error closing stale connection"; "error" => %e);
            }
        }
        self.in_transaction = false;
        match self.backend.connect() {
            Ok(conn) => self.conn = Some(conn),
            Err(e) => {
                warn!("Failed to reconnect"; "error" => %e);
            }
        }
    }

    /// A second connection to the same database, outside this handle's
    /// transaction.
    pub fn connect_extra(&self) -> Result<Box<dyn BackendConnection>, Error> {
        Ok(self.backend.connect()?)
    }

    pub fn set_nowait(&mut self, nowait: bool) -> Result<(), Error> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| BackendError::operational("not connected"))?;
        Ok(conn.set_nowait(nowait)?)
    }

    /// Allocate the next identifier for `key`.
    pub fn new_id(&mut self, key: &str) -> Result<i64, Error> {
        let dialect = self.dialect();
        dialect.sequence().allocate(self, key)
    }

    pub fn create_sequence(&mut self, key: &str) -> Result<(), Error> {
        let dialect = self.dialect();
        dialect.sequence().create(self, key)
    }

    fn swallow(&mut self, result: Result<(), Error>, what: &str) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(Error::Backend(e)) => {
                debug!("Ignoring failed {}", what; "error" => %e);
                self.rollback()
            }
            Err(e) => Err(e),
        }
    }

    fn drop_if_exists(&mut self, otype: &str, name: &str) -> Result<(), Error> {
        let result = self
            .sql(&format!("DROP {} {}", otype, name), &[])
            .and_then(|_| self.commit());
        self.swallow(result, "drop")
    }

    pub fn drop_table_if_exists(&mut self, table: &str) -> Result<(), Error> {
        self.drop_if_exists("TABLE", table)
    }

    pub fn drop_view_if_exists(&mut self, view: &str) -> Result<(), Error> {
        self.drop_if_exists("VIEW", view)
    }

    pub fn drop_sequence_if_exists(&mut self, key: &str) -> Result<(), Error> {
        let dialect = self.dialect();
        let result = dialect.sequence().drop(self, key);
        self.swallow(result, "sequence drop")
    }

    pub fn drop_column_if_exists(&mut self, table: &str, column: &str) -> Result<(), Error> {
        let result = self.ddl(&format!("ALTER TABLE {} DROP COLUMN {}", table, column));
        self.swallow(result, "column drop")
    }

    /// Read every configvar row. NULL values read as empty strings.
    pub fn read_configvars(&mut self) -> Result<HashMap<String, String>, Error> {
        let rows = self.select_all("SELECT configvar_name, configvar_value FROM configvar", &[])?;
        let mut config = HashMap::new();
        for row in rows.iter() {
            let name = super::column(row, 0)?.as_text()?.ok_or(Error::ParseError)?;
            let value = super::column(row, 1)?.as_text()?.unwrap_or_default();
            config.insert(name, value);
        }
        Ok(config)
    }

    pub fn save_configvar(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let res = self.sql(
            "UPDATE configvar SET configvar_value = ? WHERE configvar_name = ?",
            &[value.into(), name.into()],
        )?;
        if res.rowcount == 0 {
            self.sql(
                "INSERT INTO configvar (configvar_name, configvar_value) VALUES (?, ?)",
                &[name.into(), value.into()],
            )?;
        }
        Ok(())
    }
}

impl Drop for StoreConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::backend::restricted::{RestrictedBackend, Restrictions};
    use crate::backend::SqliteBackend;
    use crate::db::query_rows;

    fn mem() -> StoreConnection {
        StoreConnection::open(Arc::new(SqliteBackend::new(":memory:")), false).unwrap()
    }

    #[test]
    fn tracks_transaction_state() {
        let mut conn = mem();
        assert!(!conn.in_transaction());
        conn.ddl("CREATE TABLE t (a NUMERIC(10))").unwrap();
        assert!(!conn.in_transaction());
        conn.sql("INSERT INTO t (a) VALUES (?)", &[1i64.into()])
            .unwrap();
        assert!(conn.in_transaction());
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
        let rows: Vec<i64> = query_rows(&mut conn, "SELECT a FROM t", &[]).unwrap();
        assert!(rows.is_empty());

        // failures still leave a transaction open
        assert!(conn.sql("SELECT * FROM missing", &[]).is_err());
        assert!(conn.in_transaction());
    }

    #[test]
    fn emulated_limit_matches_native() {
        for limit_style in LimitStyle::ALL {
            let mut conn = mem();
            conn.install_dialect(DialectSettings {
                limit_style: *limit_style,
                ..DialectSettings::default()
            });
            conn.ddl("CREATE TABLE t (k NUMERIC(10))").unwrap();
            for k in [8i64, 2, 6, 4] {
                conn.sql("INSERT INTO t (k) VALUES (?)", &[k.into()]).unwrap();
            }
            let rows: Vec<i64> =
                query_rows(&mut conn, "SELECT k FROM t ORDER BY k LIMIT 3", &[]).unwrap();
            assert_eq!(rows, vec![2, 4, 6]);
            let rows: Vec<i64> = query_rows(
                &mut conn,
                "SELECT k FROM t WHERE k > ? ORDER BY k LIMIT ?",
                &[2i64.into(), 2i64.into()],
            )
            .unwrap();
            assert_eq!(rows, vec![4, 6]);
        }
    }

    #[test]
    fn emulated_limit_never_sends_limit() {
        let backend = RestrictedBackend::new(
            ":memory:",
            Restrictions {
                no_limit: true,
                ..Restrictions::default()
            },
        );
        let mut conn = StoreConnection::open(Arc::new(backend), false).unwrap();
        conn.install_dialect(DialectSettings {
            limit_style: LimitStyle::Emulated,
            ..DialectSettings::default()
        });
        conn.ddl("CREATE TABLE t (k NUMERIC(10))").unwrap();
        conn.sql("INSERT INTO t (k) VALUES (1)", &[]).unwrap();
        assert_eq!(
            conn.select_all("SELECT k FROM t LIMIT 1", &[]).unwrap().len(),
            1
        );
    }

    #[test]
    fn retries_once_on_fresh_connection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry.sqlite");
        let backend = RestrictedBackend::new(path.to_str().unwrap(), Restrictions::default());
        let control = backend.control();
        let mut conn = StoreConnection::open(Arc::new(backend), false).unwrap();
        conn.set_auto_reconnect(true);
        conn.ddl("CREATE TABLE t (a NUMERIC(10))").unwrap();

        control.fail_next_statements(1);
        conn.sql("INSERT INTO t (a) VALUES (1)", &[]).unwrap();
        assert_eq!(control.connects(), 2);
        conn.commit().unwrap();

        // two failures in a row: the retry's error propagates
        control.fail_next_statements(2);
        assert!(conn.sql("SELECT a FROM t", &[]).is_err());
        assert_eq!(control.connects(), 3);
        conn.rollback().unwrap();

        // never inside a transaction
        conn.sql("INSERT INTO t (a) VALUES (2)", &[]).unwrap();
        control.fail_next_statements(1);
        assert!(conn.sql("INSERT INTO t (a) VALUES (3)", &[]).is_err());
        assert_eq!(control.connects(), 3);
    }

    #[test]
    fn no_retry_without_auto_reconnect() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noretry.sqlite");
        let backend = RestrictedBackend::new(path.to_str().unwrap(), Restrictions::default());
        let control = backend.control();
        let mut conn = StoreConnection::open(Arc::new(backend), false).unwrap();
        control.fail_next_statements(1);
        assert!(conn.sql("SELECT 1", &[]).is_err());
        assert_eq!(control.connects(), 1);
    }

    #[test]
    fn reconnect_never_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reconnect.sqlite");
        let backend = RestrictedBackend::new(path.to_str().unwrap(), Restrictions::default());
        let control = backend.control();
        let mut conn = StoreConnection::open(Arc::new(backend), false).unwrap();
        conn.set_auto_reconnect(true);

        control.refuse_connects(1);
        conn.reconnect();
        assert!(!conn.is_connected());
        // the statement reconnects and runs
        assert!(conn.sql("SELECT 1", &[]).is_ok());
        assert!(conn.is_connected());
    }

    #[test]
    fn configvars_upsert() {
        let mut conn = mem();
        conn.ddl(
            "CREATE TABLE configvar (configvar_name VARCHAR(100) NOT NULL PRIMARY KEY, \
             configvar_value VARCHAR(255))",
        )
        .unwrap();
        conn.save_configvar("a", "1").unwrap();
        conn.save_configvar("a", "2").unwrap();
        conn.sql(
            "INSERT INTO configvar (configvar_name) VALUES (?)",
            &["b".into()],
        )
        .unwrap();
        let config = conn.read_configvars().unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(config["a"], "2");
        assert_eq!(config["b"], "");
    }

    #[test]
    fn drop_helpers_swallow_missing_objects() {
        let mut conn = mem();
        conn.drop_table_if_exists("missing").unwrap();
        conn.drop_view_if_exists("missing").unwrap();
        conn.drop_sequence_if_exists("missing").unwrap();
        conn.drop_column_if_exists("missing", "a").unwrap();
        assert!(!conn.in_transaction());
    }
}
