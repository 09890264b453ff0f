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

//! The store handle.
//!
//! Opening a store reads the persisted configuration. An empty database is
//! initialized: the dialect is negotiated, the schema created and the
//! negotiated values saved. A database at the current schema version just
//! reinstalls the saved dialect. Anything else needs an upgrade.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{open_backend, SqlBackend};
use crate::chainstate::cache::BlockCache;
use crate::chainstate::schema::{version_below, Schema, SCHEMA_VERSION, SEQUENCE_KEYS};
use crate::chainstate::{NULL_PUBKEY_HASH, NULL_PUBKEY_ID};
use crate::config::StoreConfig;
use crate::db::lock::{get_lock, StoreLock};
use crate::db::{column, Error, StoreConnection};
use crate::dialect::negotiate::{negotiate, NegotiationHints};
use crate::dialect::{Codec, Dialect, DialectSettings, CONFIG_BINARY_TYPE};

pub const CONFIG_SCHEMA_VERSION: &str = "schema_version";
pub const CONFIG_KEEP_SCRIPTSIG: &str = "keep_scriptsig";
pub const CONFIG_USE_FIRSTBITS: &str = "use_firstbits";

/// Brings an outdated schema up to the current version.
pub trait SchemaUpgrade {
    fn upgrade_schema(&self, store: &mut DataStore) -> Result<(), Error>;
}

pub struct DataStore {
    pub(crate) conn: StoreConnection,
    /// persisted configuration, as last read or saved
    pub(crate) config: HashMap<String, String>,
    pub(crate) schema: Schema,
    pub(crate) block_cache: BlockCache,
    commit_bytes: u64,
    bytes_since_commit: u64,
}

/// Read the persisted configuration, or None if the database is empty.
fn read_config(conn: &mut StoreConnection) -> Result<Option<HashMap<String, String>>, Error> {
    match conn.read_configvars() {
        Ok(config) if !config.is_empty() => return Ok(Some(config)),
        Ok(_) => {}
        Err(Error::Backend(e)) => {
            debug!("No configvar table"; "error" => %e);
            conn.rollback()?;
        }
        Err(e) => return Err(e),
    }

    // pre-configvar databases kept two settings in a one-row table
    match conn.select_row(
        "SELECT schema_version, binary_type FROM config WHERE config_id = 1",
        &[],
    ) {
        Ok(Some(row)) => {
            let mut config = HashMap::new();
            if let Some(version) = column(&row, 0)?.as_text()? {
                config.insert(CONFIG_SCHEMA_VERSION.to_string(), version);
            }
            if let Some(binary_type) = column(&row, 1)?.as_text()? {
                config.insert(CONFIG_BINARY_TYPE.to_string(), binary_type);
            }
            Ok(Some(config))
        }
        Ok(None) => Ok(None),
        Err(Error::Backend(e)) => {
            debug!("No legacy config table"; "error" => %e);
            conn.rollback()?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl DataStore {
    /// Open the configured database.
    pub fn open(config: &StoreConfig) -> Result<DataStore, Error> {
        let backend = open_backend(&config.dbtype, &config.connect_args)?;
        DataStore::open_with_backend(backend, config, None)
    }

    pub fn open_with_backend(
        backend: Arc<dyn SqlBackend>,
        config: &StoreConfig,
        upgrader: Option<&dyn SchemaUpgrade>,
    ) -> Result<DataStore, Error> {
        let mut conn = StoreConnection::open(backend, config.log_sql)?;
        let stored = read_config(&mut conn)?;
        let keep_scriptsig = match stored
            .as_ref()
            .and_then(|stored| stored.get(CONFIG_KEEP_SCRIPTSIG))
        {
            Some(value) => value == "true",
            None => config.keep_scriptsig,
        };
        // a database saved without the setting never created the table
        let use_firstbits = match stored.as_ref() {
            Some(stored) => stored
                .get(CONFIG_USE_FIRSTBITS)
                .map_or(false, |value| value == "true"),
            None => config.use_firstbits,
        };

        let mut store = DataStore {
            conn,
            config: stored.clone().unwrap_or_default(),
            schema: Schema::new(keep_scriptsig, use_firstbits),
            block_cache: BlockCache::new(config.block_cache_size),
            commit_bytes: config.commit_bytes,
            bytes_since_commit: 0,
        };

        match stored {
            None => store.initialize(&config.hints)?,
            Some(stored) => {
                let found = stored
                    .get(CONFIG_SCHEMA_VERSION)
                    .cloned()
                    .unwrap_or_default();
                if found != SCHEMA_VERSION {
                    match (config.upgrade, upgrader) {
                        (true, Some(upgrader)) => {
                            info!("Upgrading database schema";
                                  "from" => %found, "to" => SCHEMA_VERSION);
                            store
                                .conn
                                .install_dialect(DialectSettings::from_config(&store.config)?);
                            upgrader.upgrade_schema(&mut store)?;
                        }
                        (true, None) => {
                            return Err(Error::Other(
                                "Schema upgrade requested, but no upgrade procedure is available"
                                    .to_string(),
                            ));
                        }
                        (false, _) => {
                            return Err(Error::SchemaMismatch {
                                found,
                                expected: SCHEMA_VERSION.to_string(),
                            });
                        }
                    }
                }
            }
        }

        store
            .conn
            .install_dialect(DialectSettings::from_config(&store.config)?);
        store.conn.set_auto_reconnect(config.auto_reconnect);
        for chain in config.chains.iter() {
            store.ensure_chain(chain)?;
        }
        if store.conn.in_transaction() {
            store.conn.commit()?;
        }
        Ok(store)
    }

    /// Create the schema in an empty database.
    fn initialize(&mut self, hints: &NegotiationHints) -> Result<(), Error> {
        let settings = negotiate(&mut self.conn, hints)?;
        for (name, value) in settings.to_config() {
            self.config.insert(name.to_string(), value);
        }

        for (name, stmt) in self.schema.objects() {
            if let Err(e) = self.conn.ddl(&stmt) {
                error!("Failed to create schema object";
                       "object" => name, "sql" => %stmt, "error" => %e);
                return Err(e);
            }
        }
        for key in SEQUENCE_KEYS.iter() {
            self.conn.create_sequence(key)?;
        }
        self.conn
            .sql("INSERT INTO ls_lock (lock_id) VALUES (1)", &[])?;

        let codec = self.codec();
        self.conn.sql(
            "INSERT INTO pubkey (pubkey_id, pubkey_hash) VALUES (?, ?)",
            &[NULL_PUBKEY_ID.into(), codec.binin(&NULL_PUBKEY_HASH)],
        )?;

        self.config.insert(
            CONFIG_KEEP_SCRIPTSIG.to_string(),
            self.schema.keep_scriptsig.to_string(),
        );
        self.config.insert(
            CONFIG_USE_FIRSTBITS.to_string(),
            self.schema.use_firstbits.to_string(),
        );
        self.save_config()?;
        self.conn.commit()?;
        info!("Initialized database schema"; "version" => SCHEMA_VERSION);
        Ok(())
    }

    pub fn conn(&mut self) -> &mut StoreConnection {
        &mut self.conn
    }

    pub fn dialect(&self) -> Arc<Dialect> {
        self.conn.dialect()
    }

    pub(crate) fn codec(&self) -> Codec {
        *self.conn.dialect().codec()
    }

    pub fn keep_scriptsig(&self) -> bool {
        self.schema.keep_scriptsig
    }

    pub fn use_firstbits(&self) -> bool {
        self.schema.use_firstbits
    }

    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.config.get(CONFIG_SCHEMA_VERSION).map(|v| v.as_str())
    }

    /// True if the stored schema predates `version`.
    pub fn version_below(&self, version: &str) -> bool {
        version_below(self.schema_version().unwrap_or(""), version)
    }

    /// Dialect-neutral DDL of a named schema object.
    pub fn get_ddl(&self, key: &str) -> Option<String> {
        self.schema.get_ddl(key)
    }

    /// Save every configuration value, stamped with the current schema version.
    pub fn save_config(&mut self) -> Result<(), Error> {
        self.config.insert(
            CONFIG_SCHEMA_VERSION.to_string(),
            SCHEMA_VERSION.to_string(),
        );
        let mut names: Vec<String> = self.config.keys().cloned().collect();
        names.sort();
        for name in names.iter() {
            let value = self.config.get(name).cloned().unwrap_or_default();
            self.conn.save_configvar(name, &value)?;
        }
        Ok(())
    }

    pub fn set_configvar(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.config.insert(name.to_string(), value.to_string());
        self.conn.save_configvar(name, value)
    }

    /// Take the advisory lock for maintenance work. `Ok(None)` means the
    /// backend already keeps writers exclusive.
    pub fn get_lock(&mut self) -> Result<Option<StoreLock>, Error> {
        get_lock(&mut self.conn)
    }

    pub fn release_lock(&mut self, lock: StoreLock) -> Result<(), Error> {
        lock.release()
    }

    /// Count imported data, committing once `commit_bytes` have accumulated.
    pub fn imported_bytes(&mut self, size: u64) -> Result<(), Error> {
        self.bytes_since_commit += size;
        if self.bytes_since_commit >= self.commit_bytes {
            debug!("Committing imported data"; "bytes" => self.bytes_since_commit);
            self.conn.commit()?;
            self.bytes_since_commit = 0;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.bytes_since_commit = 0;
        self.conn.commit()
    }

    /// Discard uncommitted work. Cached ancestry may describe rolled-back
    /// blocks, so it goes too.
    pub fn rollback(&mut self) -> Result<(), Error> {
        self.bytes_since_commit = 0;
        self.block_cache.clear();
        self.conn.rollback()
    }

    pub fn close(mut self) -> Result<(), Error> {
        self.conn.close()
    }

    /// Block cache (hits, misses)
    pub fn block_cache_stats(&self) -> (u64, u64) {
        self.block_cache.stats()
    }
}
