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

use std::fs;
use std::path::PathBuf;

use ledgerstore_common::util::hash::{hex_bytes, to_hex};

use crate::dialect::negotiate::NegotiationHints;
use crate::dialect::{BinaryType, IntType};

const DEFAULT_DBTYPE: &str = "sqlite";
const DEFAULT_BLOCK_CACHE_SIZE: usize = 100_000;
const DEFAULT_KEEP_SCRIPTSIG: bool = true;
const DEFAULT_USE_FIRSTBITS: bool = false;
const DEFAULT_AUTO_RECONNECT: bool = true;

#[derive(thiserror::Error, Debug)]
/// An error occurred parsing the provided configuration
pub enum ConfigError {
    /// Error occurred reading config file
    #[error("{0}")]
    InvalidConfig(String),
    /// An error occurred parsing the TOML data
    #[error("{0}")]
    ParseError(String),
    /// A field was malformed
    #[error("identifier={0}, value={1}")]
    BadField(String, String),
}

/// One tracked ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    pub name: String,
    pub code3: Option<String>,
    pub address_version: Vec<u8>,
    /// Message-start bytes
    pub magic: Vec<u8>,
    /// Defaults to the chain name
    pub network: String,
    /// Defaults to "<network> policy"
    pub policy: String,
}

impl ChainConfig {
    pub fn new(name: &str, code3: Option<&str>, address_version: &[u8], magic: &[u8]) -> Self {
        ChainConfig {
            name: name.to_string(),
            code3: code3.map(|c| c.to_string()),
            address_version: address_version.to_vec(),
            magic: magic.to_vec(),
            network: name.to_string(),
            policy: format!("{} policy", name),
        }
    }

    pub fn bitcoin() -> Self {
        ChainConfig::new("Bitcoin", Some("BTC"), &[0x00], &[0xf9, 0xbe, 0xb4, 0xd9])
    }

    pub fn testnet() -> Self {
        ChainConfig::new("Testnet", Some("BC0"), &[0x6f], &[0xfa, 0xbf, 0xb5, 0xda])
    }

    pub fn magic_name(&self) -> String {
        format!("{} magic", self.network)
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub dbtype: String,
    /// Backend-specific connection string; a file path for SQLite
    pub connect_args: String,
    /// Negotiation values pinned by the operator
    pub hints: NegotiationHints,
    /// Run the upgrade procedure on a schema version mismatch
    pub upgrade: bool,
    /// Bytes of imported data between commits; 0 commits after every block
    pub commit_bytes: u64,
    /// Log every statement at info level instead of debug
    pub log_sql: bool,
    /// Store input scripts and sequence numbers. Fixed at initialization.
    pub keep_scriptsig: bool,
    /// Create the firstbits address-prefix table. Fixed at initialization.
    pub use_firstbits: bool,
    pub block_cache_size: usize,
    pub auto_reconnect: bool,
    pub chains: Vec<ChainConfig>,
}

impl StoreConfig {
    /// A default configuration over one database.
    pub fn new(dbtype: &str, connect_args: &str) -> Self {
        StoreConfig {
            dbtype: dbtype.to_string(),
            connect_args: connect_args.to_string(),
            hints: NegotiationHints::default(),
            upgrade: false,
            commit_bytes: 0,
            log_sql: false,
            keep_scriptsig: DEFAULT_KEEP_SCRIPTSIG,
            use_firstbits: DEFAULT_USE_FIRSTBITS,
            block_cache_size: DEFAULT_BLOCK_CACHE_SIZE,
            auto_reconnect: DEFAULT_AUTO_RECONNECT,
            chains: vec![ChainConfig::bitcoin(), ChainConfig::testnet()],
        }
    }

    pub fn load_from_str(data: &str) -> Result<Self, ConfigError> {
        RawConfigFile::load_from_str(data)?.try_into()
    }

    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        RawConfigFile::load_from_file(path)?.try_into()
    }
}

#[derive(Deserialize, Debug)]
struct RawChainConfig {
    pub name: String,
    pub code3: Option<String>,
    /// hex
    pub address_version: String,
    /// hex
    pub magic: String,
    pub network: Option<String>,
    pub policy: Option<String>,
}

impl TryFrom<RawChainConfig> for ChainConfig {
    type Error = ConfigError;

    fn try_from(raw: RawChainConfig) -> Result<Self, Self::Error> {
        let address_version = hex_bytes(&raw.address_version).map_err(|_| {
            ConfigError::BadField("address_version".to_string(), raw.address_version.clone())
        })?;
        if address_version.is_empty() {
            return Err(ConfigError::BadField(
                "address_version".to_string(),
                raw.address_version.clone(),
            ));
        }
        let magic = hex_bytes(&raw.magic)
            .map_err(|_| ConfigError::BadField("magic".to_string(), raw.magic.clone()))?;
        if magic.len() != 4 {
            return Err(ConfigError::BadField("magic".to_string(), raw.magic.clone()));
        }
        if let Some(code3) = raw.code3.as_ref() {
            if code3.chars().count() > 3 {
                return Err(ConfigError::BadField("code3".to_string(), code3.clone()));
            }
        }
        let network = raw.network.unwrap_or_else(|| raw.name.clone());
        let policy = raw.policy.unwrap_or_else(|| format!("{} policy", network));
        Ok(ChainConfig {
            name: raw.name,
            code3: raw.code3,
            address_version,
            magic,
            network,
            policy,
        })
    }
}

#[derive(Deserialize, Debug)]
struct RawConfigFile {
    pub dbtype: Option<String>,
    pub connect_args: String,
    pub binary_type: Option<String>,
    pub int_type: Option<String>,
    pub upgrade: Option<bool>,
    pub commit_bytes: Option<u64>,
    pub log_sql: Option<bool>,
    pub keep_scriptsig: Option<bool>,
    pub use_firstbits: Option<bool>,
    pub block_cache_size: Option<usize>,
    pub auto_reconnect: Option<bool>,
    #[serde(default)]
    pub chain: Vec<RawChainConfig>,
}

impl RawConfigFile {
    /// load the config from a string
    pub fn load_from_str(data: &str) -> Result<Self, ConfigError> {
        let config: RawConfigFile =
            toml::from_str(data).map_err(|e| ConfigError::ParseError(format!("{e:?}")))?;
        Ok(config)
    }

    /// load the config from a file and parse it
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        Self::try_from(&PathBuf::from(path))
    }
}

impl TryFrom<&PathBuf> for RawConfigFile {
    type Error = ConfigError;

    fn try_from(path: &PathBuf) -> Result<Self, Self::Error> {
        RawConfigFile::load_from_str(&fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidConfig(format!("failed to read config file: {e:?}"))
        })?)
    }
}

impl TryFrom<RawConfigFile> for StoreConfig {
    type Error = ConfigError;

    fn try_from(raw_data: RawConfigFile) -> Result<Self, Self::Error> {
        let dbtype = raw_data
            .dbtype
            .unwrap_or_else(|| DEFAULT_DBTYPE.to_string());
        if raw_data.connect_args.is_empty() {
            return Err(ConfigError::BadField(
                "connect_args".to_string(),
                raw_data.connect_args,
            ));
        }

        let binary_type = match raw_data.binary_type {
            None => None,
            Some(name) => Some(
                BinaryType::lookup_by_name(&name)
                    .ok_or_else(|| ConfigError::BadField("binary_type".to_string(), name))?,
            ),
        };
        let int_type = match raw_data.int_type {
            None => None,
            Some(name) => Some(
                IntType::lookup_by_name(&name)
                    .ok_or_else(|| ConfigError::BadField("int_type".to_string(), name))?,
            ),
        };

        let block_cache_size = raw_data
            .block_cache_size
            .unwrap_or(DEFAULT_BLOCK_CACHE_SIZE);
        if block_cache_size == 0 {
            return Err(ConfigError::BadField(
                "block_cache_size".to_string(),
                "0".to_string(),
            ));
        }

        let mut chains = raw_data
            .chain
            .into_iter()
            .map(ChainConfig::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if chains.is_empty() {
            chains = vec![ChainConfig::bitcoin(), ChainConfig::testnet()];
        }
        for (i, chain) in chains.iter().enumerate() {
            if chains[..i].iter().any(|c| c.name == chain.name) {
                return Err(ConfigError::BadField(
                    "chain.name".to_string(),
                    chain.name.clone(),
                ));
            }
        }
        let chain_magics: Vec<String> = chains
            .iter()
            .map(|c| format!("{}:{}", c.name, to_hex(&c.magic)))
            .collect();
        debug!("Loaded store config"; "dbtype" => %dbtype, "chains" => ?chain_magics);

        Ok(StoreConfig {
            dbtype,
            connect_args: raw_data.connect_args,
            hints: NegotiationHints {
                binary_type,
                int_type,
            },
            upgrade: raw_data.upgrade.unwrap_or(false),
            commit_bytes: raw_data.commit_bytes.unwrap_or(0),
            log_sql: raw_data.log_sql.unwrap_or(false),
            keep_scriptsig: raw_data.keep_scriptsig.unwrap_or(DEFAULT_KEEP_SCRIPTSIG),
            use_firstbits: raw_data.use_firstbits.unwrap_or(DEFAULT_USE_FIRSTBITS),
            block_cache_size,
            auto_reconnect: raw_data.auto_reconnect.unwrap_or(DEFAULT_AUTO_RECONNECT),
            chains,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = StoreConfig::load_from_str(r#"connect_args = "abe.sqlite""#).unwrap();
        assert_eq!(config, StoreConfig::new("sqlite", "abe.sqlite"));
        assert_eq!(config.chains[0].magic_name(), "Bitcoin magic");
        assert_eq!(config.chains[1].policy, "Testnet policy");
    }

    #[test]
    fn full_config() {
        let config = StoreConfig::load_from_str(
            r#"
dbtype = "sqlite3"
connect_args = "/var/lib/ledger/index.sqlite"
binary_type = "hex"
int_type = "str"
upgrade = true
commit_bytes = 100000
log_sql = true
keep_scriptsig = false
use_firstbits = true
block_cache_size = 5000
auto_reconnect = false

[[chain]]
name = "Weeds"
network = "Weedsnet"
code3 = "WDS"
address_version = "f3"
magic = "f8bfb5da"
"#,
        )
        .unwrap();
        assert_eq!(config.dbtype, "sqlite3");
        assert_eq!(config.hints.binary_type, Some(BinaryType::Hex));
        assert_eq!(config.hints.int_type, Some(IntType::Str));
        assert!(config.upgrade);
        assert_eq!(config.commit_bytes, 100000);
        assert!(!config.keep_scriptsig);
        assert!(config.use_firstbits);
        assert_eq!(config.block_cache_size, 5000);
        assert!(!config.auto_reconnect);
        assert_eq!(config.chains.len(), 1);
        let chain = &config.chains[0];
        assert_eq!(chain.address_version, vec![0xf3]);
        assert_eq!(chain.magic, vec![0xf8, 0xbf, 0xb5, 0xda]);
        assert_eq!(chain.magic_name(), "Weedsnet magic");
        assert_eq!(chain.policy, "Weedsnet policy");
    }

    #[test]
    fn bad_fields() {
        let err = StoreConfig::load_from_str(
            r#"
connect_args = "x.sqlite"
binary_type = "bytearray"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadField(ref f, _) if f == "binary_type"));

        let err = StoreConfig::load_from_str(
            r#"
connect_args = "x.sqlite"

[[chain]]
name = "Short"
address_version = "00"
magic = "f9be"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadField(ref f, _) if f == "magic"));

        let err = StoreConfig::load_from_str("connect_args = 7").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"connect_args = ":memory:""#).unwrap();
        writeln!(file, "commit_bytes = 42").unwrap();
        let config = StoreConfig::load_from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.commit_bytes, 42);

        let err = StoreConfig::load_from_file("/nonexistent/ledgerstore.toml").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }
}
