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

//! Advisory lock for maintenance work such as schema upgrades.
//!
//! The lock is the single `ls_lock` row, held by an uncommitted update on
//! a second connection. It is released by rolling that connection back.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::backend::BackendConnection;
use crate::db::{Error, StoreConnection};

pub const LOCK_TABLE: &str = "ls_lock";
pub const LOCK_DDL: &str = "CREATE TABLE ls_lock (
    lock_id     NUMERIC(10) NOT NULL PRIMARY KEY,
    pid         VARCHAR(255) NULL
)";

/// A held advisory lock.
pub struct StoreLock {
    conn: Box<dyn BackendConnection>,
}

impl StoreLock {
    pub fn release(mut self) -> Result<(), Error> {
        self.conn.rollback()?;
        Ok(self.conn.close()?)
    }
}

fn release_quietly(mut conn: Box<dyn BackendConnection>) {
    if let Err(e) = conn.rollback() {
        debug!("Error rolling back lock connection"; "error" => %e);
    }
    if let Err(e) = conn.close() {
        debug!("Error closing lock connection"; "error" => %e);
    }
}

/// Take the advisory lock.
///
/// Returns `Ok(None)` when the backend already refuses concurrent writers,
/// since the caller's own transaction is then exclusive by itself.
pub fn get_lock(store: &mut StoreConnection) -> Result<Option<StoreLock>, Error> {
    if store.in_transaction() {
        store.commit()?;
    }

    let mut lock_conn = store.connect_extra()?;
    let res = match lock_conn.execute(
        &format!(
            "UPDATE {} SET pid = '{}' WHERE lock_id = 1",
            LOCK_TABLE,
            std::process::id()
        ),
        &[],
    ) {
        Ok(res) => res,
        Err(e) => {
            release_quietly(lock_conn);
            return Err(e.into());
        }
    };
    if res.rowcount != 1 {
        release_quietly(lock_conn);
        return Err(Error::LockUnavailable);
    }

    // Would a concurrent writer get in? If not, we are already alone.
    let tag: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|c| c.is_ascii_alphabetic())
        .take(10)
        .map(char::from)
        .collect();
    let auto_reconnect = store.auto_reconnect();
    store.set_auto_reconnect(false);
    store.set_nowait(true)?;
    let probe = store.sql(
        "INSERT INTO configvar (configvar_name, configvar_value) VALUES (?, ?)",
        &[format!("upgrade-lock-{}", tag).into(), "x".into()],
    );
    let restored = store.set_nowait(false);
    store.set_auto_reconnect(auto_reconnect);

    let lock = match probe {
        Ok(_) => Some(StoreLock { conn: lock_conn }),
        Err(e) => {
            debug!("Backend refuses concurrent writers; not holding lock"; "error" => %e);
            release_quietly(lock_conn);
            None
        }
    };
    store.rollback()?;
    restored?;
    Ok(lock)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::backend::SqliteBackend;
    use crate::db::query_int;

    fn store_with_lock_table(path: &str) -> StoreConnection {
        let mut conn = StoreConnection::open(Arc::new(SqliteBackend::new(path)), false).unwrap();
        conn.ddl(
            "CREATE TABLE configvar (configvar_name VARCHAR(100) NOT NULL PRIMARY KEY, \
             configvar_value VARCHAR(255))",
        )
        .unwrap();
        conn.ddl(LOCK_DDL).unwrap();
        conn
    }

    #[test]
    fn single_writer_backend_needs_no_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock.sqlite");
        let mut conn = store_with_lock_table(path.to_str().unwrap());
        conn.sql("INSERT INTO ls_lock (lock_id) VALUES (1)", &[])
            .unwrap();

        assert!(get_lock(&mut conn).unwrap().is_none());
        assert!(!conn.in_transaction());

        // the probe row and the pid update were both rolled back
        let probes = query_int(
            &mut conn,
            "SELECT COUNT(*) FROM configvar WHERE configvar_name LIKE 'upgrade-lock-%'",
            &[],
        )
        .unwrap();
        assert_eq!(probes, Some(0));
        let pid = conn
            .select_row("SELECT pid FROM ls_lock WHERE lock_id = 1", &[])
            .unwrap()
            .unwrap();
        assert!(pid[0].is_null());
    }

    #[test]
    fn missing_lock_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nolock.sqlite");
        let mut conn = store_with_lock_table(path.to_str().unwrap());
        assert!(matches!(get_lock(&mut conn), Err(Error::LockUnavailable)));
    }
}
