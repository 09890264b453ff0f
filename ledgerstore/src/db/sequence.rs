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

//! Identifier allocation.
//!
//! Every sequence is keyed by a table name `key` whose primary key column
//! is `{key}_id`. A new sequence starts one past the largest id already in
//! that table. Values are unique and increasing per key, across processes,
//! but not necessarily contiguous.

use crate::db::{query_int, Error, StoreConnection};
use crate::dialect::SequenceType;

pub const SEQUENCES_TABLE: &str = "ls_sequences";
pub const DUAL_TABLE: &str = "ls_dual";

pub const SEQUENCES_DDL: &str = "CREATE TABLE ls_sequences (
    sequence_key VARCHAR(100) NOT NULL PRIMARY KEY,
    nextid      NUMERIC(30)
)";

/// Auto-increment helper tables are pruned every this many allocations.
const PRUNE_INTERVAL: i64 = 1000;

pub trait IdSequence: Send + Sync {
    /// Start a sequence for `key`. Whatever row or object this writes may
    /// still be uncommitted on return; the caller commits.
    fn create(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error>;
    fn allocate(&self, conn: &mut StoreConnection, key: &str) -> Result<i64, Error>;
    fn drop(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error>;
}

pub fn sequence_for(sequence_type: SequenceType) -> Box<dyn IdSequence> {
    match sequence_type {
        SequenceType::Update => Box::new(CounterTable),
        SequenceType::Mysql => Box::new(AutoIncrement),
        SequenceType::Oracle
        | SequenceType::Postgres
        | SequenceType::Nvf
        | SequenceType::Db2 => Box::new(NativeSequence {
            flavor: sequence_type,
        }),
    }
}

/// First id to hand out for `key`.
pub fn initial_value(conn: &mut StoreConnection, key: &str) -> Result<i64, Error> {
    let max = query_int(conn, &format!("SELECT MAX({}_id) FROM {}", key, key), &[])?;
    Ok(max.map(|m| m + 1).unwrap_or(1))
}

/// A `ls_sequences` row per key, advanced by compare-and-swap.
pub struct CounterTable;

impl CounterTable {
    fn insert(conn: &mut StoreConnection, key: &str, initial: i64) -> Result<(), Error> {
        conn.sql(
            "INSERT INTO ls_sequences (sequence_key, nextid) VALUES (?, ?)",
            &[key.into(), initial.into()],
        )?;
        Ok(())
    }
}

impl IdSequence for CounterTable {
    fn create(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error> {
        conn.commit()?;
        let initial = initial_value(conn, key)?;
        match CounterTable::insert(conn, key, initial) {
            Ok(()) => Ok(()),
            Err(Error::Backend(first)) => {
                // the counter table may not exist yet
                conn.rollback()?;
                if let Err(e) = conn.ddl(SEQUENCES_DDL) {
                    debug!("Could not create sequence table"; "error" => %e);
                    conn.rollback()?;
                    return Err(Error::Backend(first));
                }
                CounterTable::insert(conn, key, initial)
            }
            Err(e) => Err(e),
        }
    }

    fn allocate(&self, conn: &mut StoreConnection, key: &str) -> Result<i64, Error> {
        loop {
            let nextid = query_int(
                conn,
                "SELECT nextid FROM ls_sequences WHERE sequence_key = ?",
                &[key.into()],
            )?
            .ok_or_else(|| Error::NoSuchSequence(key.to_string()))?;
            let res = conn.sql(
                "UPDATE ls_sequences SET nextid = nextid + 1 WHERE sequence_key = ? AND nextid = ?",
                &[key.into(), nextid.into()],
            )?;
            if res.rowcount == 1 {
                return Ok(nextid);
            }
            info!("Contention on ls_sequences"; "key" => key, "nextid" => nextid);
        }
    }

    fn drop(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error> {
        conn.commit()?;
        conn.sql(
            "DELETE FROM ls_sequences WHERE sequence_key = ?",
            &[key.into()],
        )?;
        conn.commit()
    }
}

/// A backend sequence object named `{key}_seq`.
pub struct NativeSequence {
    flavor: SequenceType,
}

impl NativeSequence {
    fn next_value_sql(&self, key: &str) -> String {
        match self.flavor {
            SequenceType::Oracle => format!("SELECT {}_seq.NEXTVAL FROM DUAL", key),
            SequenceType::Postgres => format!("SELECT NEXTVAL('{}_seq')", key),
            SequenceType::Db2 => format!("SELECT NEXTVAL FOR {}_seq FROM {}", key, DUAL_TABLE),
            _ => format!("SELECT NEXT VALUE FOR {}_seq", key),
        }
    }

    fn ensure_dual(conn: &mut StoreConnection) -> Result<(), Error> {
        let present = conn
            .select_row(&format!("SELECT 1 FROM {}", DUAL_TABLE), &[])
            .map(|row| row.is_some());
        match present {
            Ok(true) => Ok(()),
            Ok(false) => {
                conn.sql(&format!("INSERT INTO {} (x) VALUES ('X')", DUAL_TABLE), &[])?;
                conn.commit()
            }
            Err(_) => {
                conn.rollback()?;
                conn.ddl(&format!("CREATE TABLE {} (x CHAR(1))", DUAL_TABLE))?;
                conn.sql(&format!("INSERT INTO {} (x) VALUES ('X')", DUAL_TABLE), &[])?;
                conn.commit()
            }
        }
    }
}

impl IdSequence for NativeSequence {
    fn create(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error> {
        if self.flavor == SequenceType::Db2 {
            NativeSequence::ensure_dual(conn)?;
        }
        let initial = initial_value(conn, key)?;
        conn.ddl(&format!("CREATE SEQUENCE {}_seq START WITH {}", key, initial))
    }

    fn allocate(&self, conn: &mut StoreConnection, key: &str) -> Result<i64, Error> {
        query_int(conn, &self.next_value_sql(key), &[])?.ok_or(Error::Corruption)
    }

    fn drop(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error> {
        conn.ddl(&format!("DROP SEQUENCE {}_seq", key))
    }
}

/// An auto-increment helper table `{key}_seq`; each allocation inserts an
/// empty row and reads back its key.
pub struct AutoIncrement;

impl IdSequence for AutoIncrement {
    fn create(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error> {
        let initial = initial_value(conn, key)?;
        conn.ddl(&format!(
            "CREATE TABLE {}_seq (id BIGINT AUTO_INCREMENT PRIMARY KEY) AUTO_INCREMENT={}",
            key, initial
        ))
    }

    fn allocate(&self, conn: &mut StoreConnection, key: &str) -> Result<i64, Error> {
        conn.sql(&format!("INSERT INTO {}_seq () VALUES ()", key), &[])?;
        let id = query_int(conn, "SELECT LAST_INSERT_ID()", &[])?.ok_or(Error::Corruption)?;
        if id % PRUNE_INTERVAL == 0 {
            conn.sql(
                &format!("DELETE FROM {}_seq WHERE id < ?", key),
                &[id.into()],
            )?;
        }
        Ok(id)
    }

    fn drop(&self, conn: &mut StoreConnection, key: &str) -> Result<(), Error> {
        conn.ddl(&format!("DROP TABLE {}_seq", key))
    }
}
