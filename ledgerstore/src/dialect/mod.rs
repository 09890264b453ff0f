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

//! The negotiated SQL dialect.
//!
//! `DialectSettings` is the persisted form: plain values, one per
//! negotiated parameter, round-tripped through the `configvar` table.
//! `Dialect` is built from settings alone and carries everything derived
//! from them: the statement rewriter, the value codec and the identifier
//! allocation strategy. It is immutable; renegotiation installs a new one.

use std::collections::HashMap;

use crate::backend::ParamStyle;
use crate::db::sequence::{sequence_for, IdSequence};
use crate::db::Error;

pub mod codec;
pub mod negotiate;
pub mod transform;

pub use self::codec::Codec;
pub use self::transform::StatementTransform;

define_named_enum!(
    /// How binary columns are declared and bound
    BinaryType {
        Native("str"),
        Hex("hex"),
        Bytea("pg-bytea"),
        Binary("binary"),
    }
);

define_named_enum!(
    /// How integers too large for the driver's native type are bound.
    ///
    /// `Int` binds the driver's native integer and so only suits drivers
    /// whose integers are unbounded. Statistics columns exceed 64 bits, so
    /// `Int` never passes negotiation against a 64-bit driver such as
    /// SQLite; forcing it there fails rather than overflowing at import.
    IntType {
        Int("int"),
        Decimal("decimal"),
        Str("str"),
    }
);

define_named_enum!(
    /// Identifier allocation strategy
    SequenceType {
        Oracle("oracle"),
        Postgres("postgres"),
        Nvf("nvf"),
        Db2("db2"),
        Mysql("mysql"),
        Update("update"),
    }
);

define_named_enum!(LimitStyle {
    Native("native"),
    Emulated("emulated"),
});

pub const CONFIG_DDL_IMPLICIT_COMMIT: &str = "ddl_implicit_commit";
pub const CONFIG_CREATE_TABLE_EPILOGUE: &str = "create_table_epilogue";
pub const CONFIG_MAX_VARCHAR: &str = "max_varchar";
pub const CONFIG_CLOB_TYPE: &str = "clob_type";
pub const CONFIG_BINARY_TYPE: &str = "binary_type";
pub const CONFIG_INT_TYPE: &str = "int_type";
pub const CONFIG_SEQUENCE_TYPE: &str = "sequence_type";
pub const CONFIG_LIMIT_STYLE: &str = "limit_style";

/// Stored in place of a large-text type name when none was found.
pub const NO_CLOB: &str = "NO_CLOB";

#[derive(Debug, Clone, PartialEq)]
pub struct DialectSettings {
    pub ddl_implicit_commit: bool,
    pub create_table_epilogue: String,
    pub max_varchar: Option<u64>,
    pub clob_type: Option<String>,
    pub binary_type: BinaryType,
    pub int_type: IntType,
    pub sequence_type: SequenceType,
    pub limit_style: LimitStyle,
}

impl Default for DialectSettings {
    fn default() -> DialectSettings {
        DialectSettings {
            ddl_implicit_commit: false,
            create_table_epilogue: String::new(),
            max_varchar: None,
            clob_type: None,
            binary_type: BinaryType::Native,
            int_type: IntType::Int,
            sequence_type: SequenceType::Update,
            limit_style: LimitStyle::Native,
        }
    }
}

fn lookup<T>(
    config: &HashMap<String, String>,
    key: &str,
    default: T,
    parse: fn(&str) -> Option<T>,
) -> Result<T, Error> {
    match config.get(key) {
        None => Ok(default),
        Some(v) => parse(v).ok_or_else(|| Error::Other(format!("Unsupported {} {}", key, v))),
    }
}

impl DialectSettings {
    /// Rebuild settings from stored configuration. Absent keys take their
    /// defaults; unknown values are an error.
    pub fn from_config(config: &HashMap<String, String>) -> Result<DialectSettings, Error> {
        let defaults = DialectSettings::default();
        let max_varchar = match config.get(CONFIG_MAX_VARCHAR).map(|s| s.trim()) {
            None | Some("") => None,
            Some(v) => Some(v.parse::<u64>().map_err(|_| Error::ParseError)?),
        };
        let clob_type = match config.get(CONFIG_CLOB_TYPE).map(|s| s.as_str()) {
            None | Some("") | Some(NO_CLOB) => None,
            Some(v) => Some(v.to_string()),
        };
        Ok(DialectSettings {
            ddl_implicit_commit: lookup(
                config,
                CONFIG_DDL_IMPLICIT_COMMIT,
                defaults.ddl_implicit_commit,
                |v| match v {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                },
            )?,
            create_table_epilogue: config
                .get(CONFIG_CREATE_TABLE_EPILOGUE)
                .cloned()
                .unwrap_or_default(),
            max_varchar,
            clob_type,
            binary_type: lookup(
                config,
                CONFIG_BINARY_TYPE,
                defaults.binary_type,
                BinaryType::lookup_by_name,
            )?,
            int_type: lookup(
                config,
                CONFIG_INT_TYPE,
                defaults.int_type,
                IntType::lookup_by_name,
            )?,
            sequence_type: lookup(
                config,
                CONFIG_SEQUENCE_TYPE,
                defaults.sequence_type,
                SequenceType::lookup_by_name,
            )?,
            limit_style: lookup(
                config,
                CONFIG_LIMIT_STYLE,
                defaults.limit_style,
                LimitStyle::lookup_by_name,
            )?,
        })
    }

    /// The configvar rows that persist these settings.
    pub fn to_config(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                CONFIG_DDL_IMPLICIT_COMMIT,
                if self.ddl_implicit_commit { "true" } else { "false" }.to_string(),
            ),
            (
                CONFIG_CREATE_TABLE_EPILOGUE,
                self.create_table_epilogue.clone(),
            ),
            (
                CONFIG_MAX_VARCHAR,
                self.max_varchar.map(|w| w.to_string()).unwrap_or_default(),
            ),
            (
                CONFIG_CLOB_TYPE,
                self.clob_type.clone().unwrap_or_else(|| NO_CLOB.to_string()),
            ),
            (CONFIG_BINARY_TYPE, self.binary_type.get_name()),
            (CONFIG_INT_TYPE, self.int_type.get_name()),
            (CONFIG_SEQUENCE_TYPE, self.sequence_type.get_name()),
            (CONFIG_LIMIT_STYLE, self.limit_style.get_name()),
        ]
    }
}

pub struct Dialect {
    settings: DialectSettings,
    param_style: ParamStyle,
    transform: StatementTransform,
    codec: Codec,
    sequence: Box<dyn IdSequence>,
}

impl Dialect {
    pub fn new(settings: DialectSettings, param_style: ParamStyle) -> Dialect {
        Dialect {
            transform: StatementTransform::new(
                param_style,
                settings.binary_type,
                settings.int_type,
            ),
            codec: Codec::new(settings.binary_type, settings.int_type),
            sequence: sequence_for(settings.sequence_type),
            settings,
            param_style,
        }
    }

    pub fn settings(&self) -> &DialectSettings {
        &self.settings
    }

    pub fn param_style(&self) -> ParamStyle {
        self.param_style
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn sequence(&self) -> &dyn IdSequence {
        self.sequence.as_ref()
    }

    /// Rewrite a dialect-neutral statement for this backend.
    pub fn sql(&self, stmt: &str) -> String {
        self.transform.apply(stmt)
    }

    /// Rewrite a schema statement: table epilogue, then the statement
    /// rewrite, then oversized VARCHARs to the large-text type.
    pub fn ddl(&self, stmt: &str) -> String {
        let mut stmt = stmt.to_string();
        if stmt.trim_start().starts_with("CREATE TABLE ") {
            stmt.push_str(&self.settings.create_table_epilogue);
        }
        let stmt = self.transform.apply(&stmt);
        match (self.settings.max_varchar, self.settings.clob_type.as_deref()) {
            (Some(max_varchar), Some(clob_type)) => {
                transform::fallback_to_lob(&stmt, max_varchar, clob_type)
            }
            _ => stmt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_survive_configvar_roundtrip() {
        let settings = DialectSettings {
            ddl_implicit_commit: true,
            create_table_epilogue: " ENGINE=InnoDB".into(),
            max_varchar: Some(65535),
            clob_type: Some("LONGTEXT".into()),
            binary_type: BinaryType::Hex,
            int_type: IntType::Str,
            sequence_type: SequenceType::Mysql,
            limit_style: LimitStyle::Emulated,
        };
        let config: HashMap<String, String> = settings
            .to_config()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(DialectSettings::from_config(&config).unwrap(), settings);

        let no_clob = DialectSettings::default();
        let config: HashMap<String, String> = no_clob
            .to_config()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(config[CONFIG_CLOB_TYPE], NO_CLOB);
        assert_eq!(DialectSettings::from_config(&config).unwrap(), no_clob);
    }

    #[test]
    fn legacy_config_takes_defaults() {
        let mut config = HashMap::new();
        config.insert("schema_version".to_string(), "LS0".to_string());
        config.insert(CONFIG_BINARY_TYPE.to_string(), "hex".to_string());
        let settings = DialectSettings::from_config(&config).unwrap();
        assert_eq!(settings.binary_type, BinaryType::Hex);
        assert_eq!(settings.sequence_type, SequenceType::Update);
        assert_eq!(settings.max_varchar, None);
    }

    #[test]
    fn rejects_unknown_values() {
        let mut config = HashMap::new();
        config.insert(CONFIG_BINARY_TYPE.to_string(), "bytearray".to_string());
        assert!(DialectSettings::from_config(&config).is_err());
    }

    #[test]
    fn ddl_rewrite_order() {
        let dialect = Dialect::new(
            DialectSettings {
                create_table_epilogue: " ENGINE=InnoDB".into(),
                max_varchar: Some(1000),
                clob_type: Some("CLOB".into()),
                binary_type: BinaryType::Hex,
                ..DialectSettings::default()
            },
            ParamStyle::Qmark,
        );
        assert_eq!(
            dialect.ddl("CREATE TABLE t (a BIT VARYING(8000), b BIT(256), c VARCHAR(10))"),
            "CREATE TABLE t (a CLOB, b CHAR(64), c VARCHAR(10)) ENGINE=InnoDB"
        );
        assert_eq!(
            dialect.ddl("CREATE VIEW v AS SELECT a FROM t"),
            "CREATE VIEW v AS SELECT a FROM t"
        );
    }
}
