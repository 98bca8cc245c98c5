// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! SQL dialects.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

bitflags! {
    /// A set of SQL dialects.
    ///
    /// Each single-bit value is one concrete dialect (a database family at a
    /// minimum version). Translation rules are keyed by sets, and a rule
    /// applies to a dialect if the rule's set contains it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct DialectCombo: u32 {
        const POSTGRESQL_9_4 = 1;
        const POSTGRESQL_9_6 = 1 << 1;
        const CLICKHOUSE_21_8 = 1 << 2;
        const CLICKHOUSE_22_10 = 1 << 3;
        const MYSQL_5_6 = 1 << 4;
        const MYSQL_8_0_12 = 1 << 5;
        const SQLITE = 1 << 6;
        /// The auxiliary computation engine.
        const COMPENG = 1 << 7;

        const POSTGRESQL = Self::POSTGRESQL_9_4.bits() | Self::POSTGRESQL_9_6.bits();
        const CLICKHOUSE = Self::CLICKHOUSE_21_8.bits() | Self::CLICKHOUSE_22_10.bits();
        const MYSQL = Self::MYSQL_5_6.bits() | Self::MYSQL_8_0_12.bits();
        const ANY = Self::POSTGRESQL.bits()
            | Self::CLICKHOUSE.bits()
            | Self::MYSQL.bits()
            | Self::SQLITE.bits()
            | Self::COMPENG.bits();
    }
}

impl DialectCombo {
    /// Reports whether a translation rule keyed by `self` applies to
    /// `dialect`.
    ///
    /// `dialect` is normally a single dialect; a combination matches only if
    /// every dialect in it is covered.
    pub fn matches(&self, dialect: DialectCombo) -> bool {
        *self == DialectCombo::ANY || self.contains(dialect)
    }

    /// The database family of this dialect, or an error if `self` spans
    /// several families or none.
    pub fn family(&self) -> Result<DialectName, MixedDialectError> {
        match *self {
            d if d.is_empty() => Err(MixedDialectError(d)),
            d if DialectCombo::POSTGRESQL.contains(d) => Ok(DialectName::Postgresql),
            d if DialectCombo::CLICKHOUSE.contains(d) => Ok(DialectName::Clickhouse),
            d if DialectCombo::MYSQL.contains(d) => Ok(DialectName::Mysql),
            DialectCombo::SQLITE => Ok(DialectName::Sqlite),
            DialectCombo::COMPENG => Ok(DialectName::Compeng),
            other => Err(MixedDialectError(other)),
        }
    }

    /// The database family of this dialect.
    ///
    /// Panics if `self` is not within a single family. Entry points that
    /// accept a caller's dialect check it with [`DialectCombo::family`].
    pub fn name(&self) -> DialectName {
        match self.family() {
            Ok(name) => name,
            Err(e) => panic!("{}", e),
        }
    }

    /// Reports whether this is the auxiliary computation engine.
    pub fn is_compeng(&self) -> bool {
        *self == DialectCombo::COMPENG
    }
}

impl fmt::Display for DialectCombo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        write!(f, "{}", self.iter_names().map(|(name, _)| name).join("|"))
    }
}

/// A dialect set that does not name exactly one database family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixedDialectError(pub DialectCombo);

impl fmt::Display for MixedDialectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not a single dialect family", self.0)
    }
}

impl std::error::Error for MixedDialectError {}

/// A database family, the unit connectors register and mutation strategies
/// are keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectName {
    Postgresql,
    Clickhouse,
    Mysql,
    Sqlite,
    Compeng,
}

impl DialectName {
    /// The character this family quotes identifiers with.
    pub fn ident_quote(&self) -> char {
        match self {
            DialectName::Clickhouse | DialectName::Mysql => '`',
            DialectName::Postgresql | DialectName::Sqlite | DialectName::Compeng => '"',
        }
    }
}

impl fmt::Display for DialectName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            DialectName::Postgresql => "postgresql",
            DialectName::Clickhouse => "clickhouse",
            DialectName::Mysql => "mysql",
            DialectName::Sqlite => "sqlite",
            DialectName::Compeng => "compeng",
        })
    }
}

/// Maps connector backend types onto dialects.
///
/// Connector packages register their backend type when they are loaded. Only
/// the computation engine is known without registration.
#[derive(Clone, Debug)]
pub struct DialectRegistry {
    backends: BTreeMap<String, DialectCombo>,
}

/// The backend type has not been registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownBackendError(pub String);

impl fmt::Display for UnknownBackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown backend type: {}", self.0)
    }
}

impl std::error::Error for UnknownBackendError {}

impl Default for DialectRegistry {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert("compeng".to_owned(), DialectCombo::COMPENG);
        DialectRegistry { backends }
    }
}

impl DialectRegistry {
    /// Registers the dialect of a backend type, replacing any previous
    /// registration.
    pub fn register(&mut self, backend_type: &str, dialect: DialectCombo) {
        self.backends.insert(backend_type.to_owned(), dialect);
    }

    /// Looks up the dialect of a backend type.
    pub fn resolve(&self, backend_type: &str) -> Result<DialectCombo, UnknownBackendError> {
        self.backends
            .get(backend_type)
            .copied()
            .ok_or_else(|| UnknownBackendError(backend_type.to_owned()))
    }
}
