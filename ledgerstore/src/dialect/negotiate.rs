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

//! Empirical dialect discovery.
//!
//! Each parameter is settled in turn by installing a candidate value,
//! running a small probe against scratch objects, and keeping the first
//! candidate whose probe passes. Scratch objects are dropped after every
//! attempt. Backend errors inside a probe only mean "this candidate does
//! not work".

use std::fmt;

use ledgerstore_common::consts::MAX_SCRIPT;

use crate::backend::SqlValue;
use crate::db::sequence::DUAL_TABLE;
use crate::db::{column, query_rows, Error, StoreConnection};
use crate::dialect::{BinaryType, DialectSettings, IntType, LimitStyle, SequenceType};

const PROBE_TABLE: &str = "ls_probe_1";
const PROBE_VIEW: &str = "ls_probe_v1";

/// Widest VARCHAR the schema can ask for: a hex-encoded maximal script.
pub const WIDEST_VARCHAR: u64 = (MAX_SCRIPT * 2) as u64;

const CLOB_CANDIDATES: &[&str] = &["CLOB", "LONGTEXT", "TEXT", "LONG"];

/// Values an operator may pin instead of probing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NegotiationHints {
    pub binary_type: Option<BinaryType>,
    pub int_type: Option<IntType>,
}

type Probe = fn(&mut StoreConnection) -> Result<bool, Error>;
type Cleanup = fn(&mut StoreConnection, bool) -> Result<(), Error>;

/// Try `candidates` in order and keep the first whose probe passes.
fn adopt<T: Copy + fmt::Display>(
    conn: &mut StoreConnection,
    settings: &mut DialectSettings,
    param: &str,
    candidates: &[T],
    apply: fn(&mut DialectSettings, T),
    probe: Probe,
    cleanup: Cleanup,
) -> Result<T, Error> {
    for candidate in candidates.iter() {
        apply(settings, *candidate);
        conn.install_dialect(settings.clone());
        let passed = match probe(conn) {
            Ok(passed) => passed,
            Err(e) => {
                debug!("Dialect probe failed";
                       "param" => param, "candidate" => %candidate, "error" => %e);
                false
            }
        };
        if !passed {
            conn.rollback()?;
        }
        cleanup(conn, passed)?;
        if passed {
            info!("Negotiated dialect parameter"; "param" => param, "value" => %candidate);
            return Ok(*candidate);
        }
    }
    Err(Error::NoViableDialect(param.to_string()))
}

fn drop_probe_table(conn: &mut StoreConnection, _passed: bool) -> Result<(), Error> {
    conn.drop_table_if_exists(PROBE_TABLE)
}

fn drop_probe_view(conn: &mut StoreConnection, _passed: bool) -> Result<(), Error> {
    conn.drop_view_if_exists(PROBE_VIEW)?;
    conn.drop_table_if_exists(PROBE_TABLE)
}

fn drop_probe_sequence(conn: &mut StoreConnection, passed: bool) -> Result<(), Error> {
    conn.drop_table_if_exists(PROBE_TABLE)?;
    conn.drop_sequence_if_exists(PROBE_TABLE)?;
    if !passed {
        conn.drop_table_if_exists(DUAL_TABLE)?;
    }
    Ok(())
}

/// Is a table still there after rolling back its creation?
fn probe_ddl_implicit_commit(conn: &mut StoreConnection) -> Result<bool, Error> {
    conn.ddl("CREATE TABLE ls_probe_1 (a NUMERIC(12))")?;
    conn.rollback()?;
    conn.select_all("SELECT MAX(a) FROM ls_probe_1", &[])?;
    Ok(true)
}

/// Does a table created with the installed epilogue honor rollback?
fn probe_transactions(conn: &mut StoreConnection) -> Result<bool, Error> {
    conn.ddl("CREATE TABLE ls_probe_1 (a NUMERIC(12))")?;
    conn.sql("INSERT INTO ls_probe_1 (a) VALUES (4)", &[])?;
    conn.commit()?;
    conn.sql("INSERT INTO ls_probe_1 (a) VALUES (5)", &[])?;
    conn.rollback()?;
    let rows: Vec<i64> = query_rows(conn, "SELECT a FROM ls_probe_1", &[])?;
    Ok(rows == vec![4])
}

fn try_varchar(conn: &mut StoreConnection, width: u64) -> bool {
    let attempt = (|| -> Result<bool, Error> {
        conn.ddl(&format!(
            "CREATE TABLE ls_probe_1 (a VARCHAR({}), b VARCHAR({}))",
            width, width
        ))?;
        conn.sql("INSERT INTO ls_probe_1 (a, b) VALUES ('x', 'y')", &[])?;
        let row = conn
            .select_row("SELECT a, b FROM ls_probe_1", &[])?
            .ok_or(Error::NotFoundError)?;
        Ok(column(&row, 0)?.as_text()?.as_deref() == Some("x")
            && column(&row, 1)?.as_text()?.as_deref() == Some("y"))
    })();
    match attempt {
        Ok(ok) => ok,
        Err(e) => {
            debug!("VARCHAR probe failed"; "width" => width, "error" => %e);
            false
        }
    }
}

/// Bisect for the widest VARCHAR in `[0, 2^32)`. Returns the width and the
/// number of probes it took.
pub fn probe_max_varchar(conn: &mut StoreConnection) -> Result<(u64, usize), Error> {
    let mut lo: u64 = 0;
    let mut hi: u64 = 1 << 32;
    let mut mid = hi - 1;
    let mut probes = 0;
    loop {
        conn.drop_table_if_exists(PROBE_TABLE)?;
        probes += 1;
        if try_varchar(conn, mid) {
            lo = mid;
        } else {
            conn.rollback()?;
            hi = mid;
        }
        if lo + 1 == hi {
            conn.drop_table_if_exists(PROBE_TABLE)?;
            return Ok((lo, probes));
        }
        mid = lo + (hi - lo) / 2;
    }
}

/// Can the installed large-text type hold 10000 characters?
fn probe_clob(conn: &mut StoreConnection) -> Result<bool, Error> {
    let clob_type = conn
        .dialect()
        .settings()
        .clob_type
        .clone()
        .ok_or(Error::TypeError)?;
    let long_str = "x".repeat(10_000);
    conn.ddl(&format!("CREATE TABLE ls_probe_1 (a {})", clob_type))?;
    conn.sql(
        "INSERT INTO ls_probe_1 (a) VALUES (?)",
        &[SqlValue::Text(long_str.clone())],
    )?;
    let row = conn
        .select_row("SELECT a FROM ls_probe_1", &[])?
        .ok_or(Error::NotFoundError)?;
    Ok(column(&row, 0)?.as_text()? == Some(long_str))
}

/// Do a 256-bit hash and a variable-length script survive storage?
fn probe_binary(conn: &mut StoreConnection) -> Result<bool, Error> {
    conn.ddl(&format!(
        "CREATE TABLE ls_probe_1 (
            test_id NUMERIC(2) NOT NULL PRIMARY KEY,
            test_bit BIT(256),
            test_varbit BIT VARYING({})
        )",
        MAX_SCRIPT * 8
    ))?;
    let val: Vec<u8> = (0..=255u8).step_by(8).collect();
    let dialect = conn.dialect();
    let codec = dialect.codec();
    conn.sql(
        "INSERT INTO ls_probe_1 (test_id, test_bit, test_varbit) VALUES (?, ?, ?)",
        &[1i64.into(), codec.hashin(&val), codec.binin(&val)],
    )?;
    let row = conn
        .select_row("SELECT test_bit, test_varbit FROM ls_probe_1", &[])?
        .ok_or(Error::NotFoundError)?;
    Ok(codec.hashout(column(&row, 0)?)?.as_ref() == Some(&val)
        && codec.binout(column(&row, 1)?)?.as_ref() == Some(&val))
}

fn close_enough(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= expected.abs() * tolerance
}

/// Can large integers be bound, multiplied through the approximate-value
/// view, and read back?
fn probe_int(conn: &mut StoreConnection) -> Result<bool, Error> {
    conn.ddl(
        "CREATE TABLE ls_probe_1 (
            test_id NUMERIC(2) NOT NULL PRIMARY KEY,
            txout_value NUMERIC(30),
            i2 NUMERIC(30)
        )",
    )?;
    conn.ddl(
        "CREATE VIEW ls_probe_v1 AS SELECT test_id,
            txout_value txout_approx_value,
            txout_value i1,
            i2
          FROM ls_probe_1",
    )?;
    let dialect = conn.dialect();
    let codec = dialect.codec();

    let v1: i128 = 2099999999999999;
    let v2: i128 = 1234567890;
    conn.sql(
        "INSERT INTO ls_probe_1 (test_id, txout_value, i2) VALUES (?, ?, ?)",
        &[1i64.into(), codec.intin(v1)?, codec.intin(v2)?],
    )?;
    conn.commit()?;
    let row = conn
        .select_row(
            "SELECT txout_approx_value * i2, i1 FROM ls_probe_v1 WHERE test_id = 1",
            &[],
        )?
        .ok_or(Error::NotFoundError)?;
    let product = column(&row, 0)?.as_f64()?.ok_or(Error::TypeError)?;
    if !close_enough(product, (v1 * v2) as f64, 0.0001) {
        return Ok(false);
    }
    if column(&row, 1)?.as_i128()? != Some(v1) {
        return Ok(false);
    }

    // past the signed 64-bit range; this rejects IntType::Int on drivers
    // with 64-bit native integers
    let v3: i128 = 9226543405000000000;
    conn.sql(
        "UPDATE ls_probe_1 SET txout_value = ? WHERE test_id = 1",
        &[codec.intin(v3)?],
    )?;
    let row = conn
        .select_row("SELECT i1 FROM ls_probe_v1 WHERE test_id = 1", &[])?
        .ok_or(Error::NotFoundError)?;
    let back = column(&row, 0)?.as_f64()?.ok_or(Error::TypeError)?;
    Ok(close_enough(back, v3 as f64, 0.0001))
}

/// Do two allocations from a fresh sequence differ?
fn probe_sequence(conn: &mut StoreConnection) -> Result<bool, Error> {
    conn.ddl(
        "CREATE TABLE ls_probe_1 (
            ls_probe_1_id NUMERIC(12) NOT NULL PRIMARY KEY,
            foo VARCHAR(10)
        )",
    )?;
    conn.create_sequence(PROBE_TABLE)?;
    let id1 = conn.new_id(PROBE_TABLE)?;
    let id2 = conn.new_id(PROBE_TABLE)?;
    conn.commit()?;
    Ok(id1 != id2)
}

fn probe_limit(conn: &mut StoreConnection) -> Result<bool, Error> {
    conn.ddl("CREATE TABLE ls_probe_1 (ls_probe_1_id NUMERIC(12) NOT NULL PRIMARY KEY)")?;
    for id in [2i64, 4, 6, 8] {
        conn.sql(
            "INSERT INTO ls_probe_1 (ls_probe_1_id) VALUES (?)",
            &[id.into()],
        )?;
    }
    let rows: Vec<i64> = query_rows(
        conn,
        "SELECT ls_probe_1_id FROM ls_probe_1 ORDER BY ls_probe_1_id LIMIT 3",
        &[],
    )?;
    Ok(rows == vec![2, 4, 6])
}

/// Discover a working dialect on `conn`. The result is left installed.
pub fn negotiate(
    conn: &mut StoreConnection,
    hints: &NegotiationHints,
) -> Result<DialectSettings, Error> {
    let mut settings = DialectSettings::default();
    conn.rollback()?;
    conn.drop_view_if_exists(PROBE_VIEW)?;
    conn.drop_table_if_exists(PROBE_TABLE)?;

    adopt(
        conn,
        &mut settings,
        "ddl_implicit_commit",
        &[true, false],
        |s, v| s.ddl_implicit_commit = v,
        probe_ddl_implicit_commit,
        drop_probe_table,
    )?;

    adopt(
        conn,
        &mut settings,
        "create_table_epilogue",
        &["", " ENGINE=InnoDB"],
        |s, v| s.create_table_epilogue = v.to_string(),
        probe_transactions,
        drop_probe_table,
    )?;

    let (max_varchar, probes) = probe_max_varchar(conn)?;
    info!("Negotiated dialect parameter";
          "param" => "max_varchar", "value" => max_varchar, "probes" => probes);
    settings.max_varchar = Some(max_varchar);

    if max_varchar < WIDEST_VARCHAR {
        let found = adopt(
            conn,
            &mut settings,
            "clob_type",
            CLOB_CANDIDATES,
            |s, v| s.clob_type = Some(v.to_string()),
            probe_clob,
            drop_probe_table,
        );
        match found {
            Ok(_) => {}
            Err(Error::NoViableDialect(_)) => {
                info!("No large-text type; long columns stay VARCHAR");
                settings.clob_type = None;
            }
            Err(e) => return Err(e),
        }
    }

    let binary_types = match hints.binary_type {
        Some(forced) => vec![forced],
        None => BinaryType::ALL.to_vec(),
    };
    adopt(
        conn,
        &mut settings,
        "binary_type",
        &binary_types,
        |s, v| s.binary_type = v,
        probe_binary,
        drop_probe_table,
    )?;

    let int_types = match hints.int_type {
        Some(forced) => vec![forced],
        None => IntType::ALL.to_vec(),
    };
    adopt(
        conn,
        &mut settings,
        "int_type",
        &int_types,
        |s, v| s.int_type = v,
        probe_int,
        drop_probe_view,
    )?;

    adopt(
        conn,
        &mut settings,
        "sequence_type",
        SequenceType::ALL,
        |s, v| s.sequence_type = v,
        probe_sequence,
        drop_probe_sequence,
    )?;

    adopt(
        conn,
        &mut settings,
        "limit_style",
        LimitStyle::ALL,
        |s, v| s.limit_style = v,
        probe_limit,
        drop_probe_table,
    )?;

    conn.install_dialect(settings.clone());
    Ok(settings)
}
