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

use std::backtrace::Backtrace;

use rand::{thread_rng, Rng};
use rusqlite::types::{ToSql, ToSqlOutput, Value as RusqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags};

use ledgerstore_common::util::sleep_ms;

use crate::backend::{
    BackendConnection, BackendError, ErrorClass, ParamStyle, SqlBackend, SqlRow, SqlValue,
    StatementResult,
};

/// Called by `rusqlite` if we are waiting too long on a database lock.
/// Sleeps with exponential backoff plus jitter, capped near 100ms, and
/// complains loudly every ~5 minutes.
pub fn tx_busy_handler(run_count: i32) -> bool {
    const AVG_SLEEP_TIME_MS: u64 = 100;

    // Every ~5min, report an error with a backtrace
    //   5min * 60s/min * 1_000ms/s / 100ms
    const ERROR_COUNT: u32 = 3_000;

    let run_count = run_count.unsigned_abs();
    if run_count > 0 && run_count % ERROR_COUNT == 0 {
        error!("Deadlock suspected. Waited 5 minutes (estimated) for database lock.";
            "run_count" => run_count,
            "backtrace" => ?Backtrace::capture()
        );
    }

    let mut sleep_time_ms = 2u64.saturating_pow(run_count);
    sleep_time_ms = sleep_time_ms.saturating_add(thread_rng().gen_range(0..sleep_time_ms));

    if sleep_time_ms > AVG_SLEEP_TIME_MS {
        let jitter = 10;
        sleep_time_ms =
            thread_rng().gen_range((AVG_SLEEP_TIME_MS - jitter)..(AVG_SLEEP_TIME_MS + jitter));
    }

    let msg = format!("Database is locked; sleeping {sleep_time_ms}ms and trying again");
    if run_count > 10 && run_count % 10 == 0 {
        warn!("{msg}";
            "run_count" => run_count
        );
    } else {
        debug!("{msg}";
            "run_count" => run_count
        );
    }

    sleep_ms(sleep_time_ms);
    true
}

pub(crate) fn classify(e: &rusqlite::Error) -> ErrorClass {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen
            | ErrorCode::DiskFull
            | ErrorCode::OperationInterrupted
            | ErrorCode::FileLockingProtocolFailed => ErrorClass::Operational,
            ErrorCode::ConstraintViolation => ErrorClass::Integrity,
            _ => ErrorClass::Programming,
        },
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::ToSqlConversionFailure(_) => ErrorClass::Interface,
        _ => ErrorClass::Programming,
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> BackendError {
        BackendError::new(classify(&e), e.to_string())
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(RusqliteValue::Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) | SqlValue::Decimal(s) => ToSqlOutput::from(s.as_str()),
            SqlValue::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// SQLite through `rusqlite`. `connect_args` is a file path or `:memory:`.
pub struct SqliteBackend {
    path: String,
}

impl SqliteBackend {
    pub fn new(path: &str) -> SqliteBackend {
        SqliteBackend {
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn open_raw(&self) -> Result<SqliteConnection, BackendError> {
        let conn = if self.path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            let open_flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
            Connection::open_with_flags(&self.path, open_flags)?
        };
        conn.busy_handler(Some(tx_busy_handler))?;
        Ok(SqliteConnection { conn })
    }
}

impl SqlBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Qmark
    }

    fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendError> {
        Ok(Box::new(self.open_raw()?))
    }
}

pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    fn begin_if_needed(&mut self) -> Result<(), BackendError> {
        if self.conn.is_autocommit() {
            // take the write lock up front, so two writers never deadlock
            // upgrading from shared locks
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        Ok(())
    }
}

impl BackendConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<StatementResult, BackendError> {
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare(sql)?;
        if stmt.column_count() == 0 {
            let rowcount = stmt.execute(params_from_iter(params.iter()))?;
            return Ok(StatementResult {
                rowcount,
                rows: vec![],
            });
        }

        let ncols = stmt.column_count();
        let mut rows_out: Vec<SqlRow> = vec![];
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut out = Vec::with_capacity(ncols);
            for i in 0..ncols {
                out.push(value_from_ref(row.get_ref(i)?));
            }
            rows_out.push(out);
        }
        Ok(StatementResult {
            rowcount: rows_out.len(),
            rows: rows_out,
        })
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BackendError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn set_nowait(&mut self, nowait: bool) -> Result<(), BackendError> {
        if nowait {
            self.conn.busy_handler(None)?;
        } else {
            self.conn.busy_handler(Some(tx_busy_handler))?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.conn.close().map_err(|(_, e)| BackendError::from(e))
    }
}
