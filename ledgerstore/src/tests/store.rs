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

use std::cell::Cell;
use std::sync::Arc;

use super::*;
use crate::backend::restricted::{RestrictedBackend, Restrictions};
use crate::backend::SqliteBackend;
use crate::chainstate::schema::SCHEMA_VERSION;
use crate::store::{
    SchemaUpgrade, CONFIG_KEEP_SCRIPTSIG, CONFIG_SCHEMA_VERSION, CONFIG_USE_FIRSTBITS,
};

#[test]
fn initializes_then_reopens() {
    let (_dir, mut config) = temp_config("init");
    let mut store = DataStore::open(&config).unwrap();
    assert_eq!(store.schema_version(), Some(SCHEMA_VERSION));
    assert_eq!(store.config().get("binary_type").map(|s| s.as_str()), Some("str"));
    assert_eq!(store.config().get("int_type").map(|s| s.as_str()), Some("decimal"));
    assert!(store.keep_scriptsig());
    assert!(!store.version_below(SCHEMA_VERSION));
    assert!(store.version_below("LS2"));

    let bitcoin = bitcoin_id(&mut store);
    let testnet = store.chain_id_for_name("Testnet").unwrap();
    assert_ne!(bitcoin, testnet);
    assert_eq!(store.chain_address_version(testnet).unwrap(), vec![0x6f]);
    assert_eq!(store.chain_tip(bitcoin).unwrap(), None);
    assert!(store.get_ddl("txout_detail").is_some());
    assert!(store.get_ddl("ls_sequences").is_some());
    assert!(store.get_ddl("no_such_object").is_none());
    store.close().unwrap();

    // stored settings win over the configured ones
    config.keep_scriptsig = false;
    let mut store = DataStore::open(&config).unwrap();
    assert!(store.keep_scriptsig());
    assert_eq!(
        store.config().get(CONFIG_KEEP_SCRIPTSIG).map(|s| s.as_str()),
        Some("true")
    );
    // chains are not added twice
    assert_eq!(bitcoin_id(&mut store), bitcoin);
    assert_eq!(count(&mut store, "SELECT COUNT(*) FROM chain"), 2);
    assert_eq!(count(&mut store, "SELECT COUNT(*) FROM magic"), 2);
}

#[test]
fn keep_scriptsig_off_drops_input_columns() {
    let (_dir, mut config) = temp_config("noscriptsig");
    config.keep_scriptsig = false;
    let mut store = DataStore::open(&config).unwrap();
    assert!(!store.keep_scriptsig());
    let bitcoin = bitcoin_id(&mut store);

    let genesis = make_block(None, "g", EASY_BITS, vec![]);
    let pay = spend("a", &genesis.transactions[0], 0, 10 * COIN);
    let b1 = make_block(Some(&genesis), "b1", EASY_BITS, vec![pay]);
    import_all(&mut store, bitcoin, &[genesis, b1]);

    assert!(store
        .conn()
        .select_all("SELECT txin_scriptSig FROM txin", &[])
        .is_err());
    store.rollback().unwrap();
    let rows = store
        .conn()
        .select_all("SELECT txin_scriptSig, txin_sequence FROM txin_detail", &[])
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row[0].is_null() && row[1].is_null()));
}

fn has_firstbits_table(store: &mut DataStore) -> bool {
    let found = store
        .conn()
        .select_all("SELECT COUNT(*) FROM ls_firstbits", &[])
        .is_ok();
    if !found {
        store.rollback().unwrap();
    }
    found
}

#[test]
fn firstbits_table_follows_option() {
    let (_dir, config) = temp_config("nofirstbits");
    let mut store = DataStore::open(&config).unwrap();
    assert!(!store.use_firstbits());
    assert!(!has_firstbits_table(&mut store));
    assert_eq!(
        store.config().get(CONFIG_USE_FIRSTBITS).map(|s| s.as_str()),
        Some("false")
    );

    let (_dir, mut config) = temp_config("firstbits");
    config.use_firstbits = true;
    let mut store = DataStore::open(&config).unwrap();
    assert!(store.use_firstbits());
    assert!(has_firstbits_table(&mut store));
    store.close().unwrap();

    // the stored setting wins on reopen
    config.use_firstbits = false;
    let mut store = DataStore::open(&config).unwrap();
    assert!(store.use_firstbits());
    assert_eq!(
        store.config().get(CONFIG_USE_FIRSTBITS).map(|s| s.as_str()),
        Some("true")
    );
    assert!(has_firstbits_table(&mut store));
}

struct StampVersion {
    calls: Cell<u32>,
}

impl SchemaUpgrade for StampVersion {
    fn upgrade_schema(&self, store: &mut DataStore) -> Result<(), DBError> {
        self.calls.set(self.calls.get() + 1);
        store.save_config()?;
        store.commit()
    }
}

#[test]
fn schema_version_mismatch() {
    let (_dir, mut config) = temp_config("mismatch");
    let mut store = DataStore::open(&config).unwrap();
    store.set_configvar(CONFIG_SCHEMA_VERSION, "LS0").unwrap();
    store.commit().unwrap();
    store.close().unwrap();

    match DataStore::open(&config) {
        Err(DBError::SchemaMismatch { found, expected }) => {
            assert_eq!(found, "LS0");
            assert_eq!(expected, SCHEMA_VERSION);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("opened a mismatched schema"),
    }

    config.upgrade = true;
    assert!(matches!(DataStore::open(&config), Err(DBError::Other(_))));

    let upgrader = StampVersion {
        calls: Cell::new(0),
    };
    let backend = Arc::new(SqliteBackend::new(&config.connect_args));
    let store = DataStore::open_with_backend(backend, &config, Some(&upgrader)).unwrap();
    assert_eq!(upgrader.calls.get(), 1);
    assert_eq!(store.schema_version(), Some(SCHEMA_VERSION));
    store.close().unwrap();

    // current now; the upgrader is not consulted again
    let backend = Arc::new(SqliteBackend::new(&config.connect_args));
    DataStore::open_with_backend(backend, &config, Some(&upgrader)).unwrap();
    assert_eq!(upgrader.calls.get(), 1);
}

struct RecordFirstbits {
    seen: Cell<Option<bool>>,
}

impl SchemaUpgrade for RecordFirstbits {
    fn upgrade_schema(&self, store: &mut DataStore) -> Result<(), DBError> {
        self.seen.set(Some(store.use_firstbits()));
        Ok(())
    }
}

#[test]
fn legacy_config_table() {
    let (_dir, mut config) = temp_config("legacy");
    {
        let conn = rusqlite::Connection::open(&config.connect_args).unwrap();
        conn.execute_batch(
            "CREATE TABLE config (
                 config_id NUMERIC(1) PRIMARY KEY,
                 schema_version VARCHAR(20),
                 binary_type VARCHAR(20)
             );
             INSERT INTO config VALUES (1, 'KS6', 'hex');",
        )
        .unwrap();
    }
    config.use_firstbits = true;
    config.chains = vec![];

    match DataStore::open(&config) {
        Err(DBError::SchemaMismatch { found, .. }) => assert_eq!(found, "KS6"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("opened a legacy schema"),
    }

    config.upgrade = true;
    let upgrader = RecordFirstbits {
        seen: Cell::new(None),
    };
    let backend = Arc::new(SqliteBackend::new(&config.connect_args));
    let store = DataStore::open_with_backend(backend, &config, Some(&upgrader)).unwrap();
    // the legacy table predates the option
    assert_eq!(upgrader.seen.get(), Some(false));
    assert_eq!(store.config().get("binary_type").map(|s| s.as_str()), Some("hex"));
}

#[test]
fn weak_backend_stores_hex_and_text() {
    let (_dir, config) = temp_config("weak");
    let backend = RestrictedBackend::new(
        &config.connect_args,
        Restrictions {
            no_blob: true,
            no_decimal: true,
            ..Restrictions::default()
        },
    );
    let mut store = DataStore::open_with_backend(Arc::new(backend), &config, None).unwrap();
    assert_eq!(store.config().get("binary_type").map(|s| s.as_str()), Some("hex"));
    assert_eq!(store.config().get("int_type").map(|s| s.as_str()), Some("str"));

    let bitcoin = bitcoin_id(&mut store);
    let genesis = make_block(None, "g", EASY_BITS, vec![]);
    let pay = spend("a", &genesis.transactions[0], 0, 20 * COIN);
    let b1 = make_block(Some(&genesis), "b1", EASY_BITS, vec![pay]);
    let ids = import_all(&mut store, bitcoin, &[genesis.clone(), b1.clone()]);

    assert_eq!(store.block_id_for_hash(&b1.hash).unwrap(), Some(ids[1]));
    assert_eq!(store.chain_tip(bitcoin).unwrap(), Some(ids[1]));
    assert_eq!(store.longest_chain_block_ids(bitcoin).unwrap(), ids);
    assert_eq!(block_int(&mut store, ids[1], "block_value_in"), Some(50 * COIN as i128));
    assert_eq!(
        store.block_chain_work(ids[1]).unwrap(),
        store
            .block_chain_work(ids[0])
            .unwrap()
            .checked_add(&ledgerstore_common::util::uint::Uint256::from_u64(2))
            .unwrap()
    );
}

#[test]
fn sqlite_needs_no_advisory_lock() {
    let (_dir, mut store) = open_temp("lock");
    assert!(store.get_lock().unwrap().is_none());
}

#[test]
fn retries_statement_after_lost_connection() {
    let (_dir, config) = temp_config("reconnect");
    let backend = RestrictedBackend::new(&config.connect_args, Restrictions::default());
    let control = backend.control();
    let mut store = DataStore::open_with_backend(Arc::new(backend), &config, None).unwrap();
    let before = control.connects();

    control.fail_next_statements(1);
    let bitcoin = bitcoin_id(&mut store);
    assert_eq!(control.connects(), before + 1);

    let genesis = make_block(None, "g", EASY_BITS, vec![]);
    let id = store.import_block(&genesis, Some(bitcoin)).unwrap();
    assert_eq!(store.chain_tip(bitcoin).unwrap(), Some(id));
}

#[test]
fn commit_bytes_batches_imports() {
    let (_dir, mut config) = temp_config("batch");
    let genesis = make_block(None, "g", EASY_BITS, vec![]);
    let b1 = make_block(Some(&genesis), "b1", EASY_BITS, vec![]);
    let b2 = make_block(Some(&b1), "b2", EASY_BITS, vec![]);

    // default: commit after every block
    let mut store = DataStore::open(&config).unwrap();
    let bitcoin = bitcoin_id(&mut store);
    store.import_block(&genesis, Some(bitcoin)).unwrap();
    assert!(!store.conn().in_transaction());
    store.close().unwrap();

    // b1 and b2 are 2 * (80 + 134) bytes
    config.commit_bytes = 400;
    let mut store = DataStore::open(&config).unwrap();
    store.import_block(&b1, None).unwrap();
    assert!(store.conn().in_transaction());
    store.import_block(&b2, None).unwrap();
    assert!(!store.conn().in_transaction());
}

#[test]
fn rollback_forgets_uncommitted_blocks() {
    let (_dir, mut config) = temp_config("rollback");
    config.commit_bytes = u64::MAX;
    let mut store = DataStore::open(&config).unwrap();
    let bitcoin = bitcoin_id(&mut store);
    let genesis = make_block(None, "g", EASY_BITS, vec![]);
    let id = store.import_block(&genesis, Some(bitcoin)).unwrap();
    assert!(store.attached_block(id).unwrap().is_some());

    store.rollback().unwrap();
    assert_eq!(store.block_id_for_hash(&genesis.hash).unwrap(), None);
    assert_eq!(store.attached_block(id).unwrap(), None);
    assert_eq!(store.chain_tip(bitcoin).unwrap(), None);
}

#[test]
fn concurrent_handles_allocate_distinct_ids() {
    let (_dir, config) = temp_config("concurrent");
    DataStore::open(&config).unwrap().close().unwrap();

    let workers: Vec<_> = (0..2)
        .map(|worker| {
            let config = config.clone();
            std::thread::spawn(move || {
                let mut store = DataStore::open(&config).unwrap();
                let mut ids = vec![];
                for i in 0..20 {
                    let tx = coinbase(&format!("worker {} tx {}", worker, i), COIN);
                    ids.push(store.import_tx(&tx).unwrap());
                    store.commit().unwrap();
                }
                ids
            })
        })
        .collect();
    let mut ids: Vec<i64> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 40);

    let mut store = DataStore::open(&config).unwrap();
    assert_eq!(count(&mut store, "SELECT COUNT(*) FROM tx"), 40);
    assert_eq!(count(&mut store, "SELECT COUNT(*) FROM txout"), 40);
}
