// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The databases a plan runs against.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dl_query::render::ColumnInfo;
use dl_repr::{DialectCombo, Row};
use futures::stream::{self, StreamExt};

use crate::error::ExecutionError;
use crate::stream::RowChunks;

/// The database a dataset's tables live in.
#[async_trait]
pub trait SourceConnection: fmt::Debug + Send + Sync {
    /// The dialect queries must be rendered in.
    fn dialect(&self) -> DialectCombo;

    /// Runs `sql`, returning its rows lazily.
    async fn execute(&self, sql: &str) -> Result<RowChunks, ExecutionError>;
}

/// The computation engine, which runs what the source database cannot over
/// scratch tables filled with downloaded data.
#[async_trait]
pub trait CompengConnection: fmt::Debug + Send + Sync {
    async fn create_table(&self, name: &str, columns: &[ColumnInfo]) -> Result<(), ExecutionError>;

    async fn insert_rows(&self, name: &str, rows: Vec<Row>) -> Result<(), ExecutionError>;

    async fn execute(&self, sql: &str) -> Result<RowChunks, ExecutionError>;

    /// Drops the table `name` if it exists.
    async fn drop_table(&self, name: &str) -> Result<(), ExecutionError>;
}

/// Rows served for queries matching a SQL fragment.
#[derive(Debug, Clone)]
struct CannedResult {
    sql_fragment: String,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemCore {
    canned: Vec<CannedResult>,
    executed: Vec<String>,
    tables: BTreeMap<String, (Vec<ColumnInfo>, Vec<Row>)>,
    dropped: Vec<String>,
}

impl MemCore {
    fn execute(&mut self, sql: &str) -> Option<Vec<Row>> {
        self.executed.push(sql.to_string());
        self.canned
            .iter()
            .find(|c| sql.contains(&c.sql_fragment))
            .map(|c| c.rows.clone())
    }
}

fn chunks(rows: Vec<Row>) -> RowChunks {
    let chunks: Vec<Result<Vec<Row>, ExecutionError>> =
        rows.chunks(2).map(|chunk| Ok(chunk.to_vec())).collect();
    stream::iter(chunks).boxed()
}

/// An in-memory source that answers queries with canned rows.
///
/// Rows are served in chunks of two to exercise lazy consumption.
#[derive(Debug, Clone)]
pub struct MemSource {
    dialect: DialectCombo,
    core: Arc<Mutex<MemCore>>,
}

impl MemSource {
    pub fn new(dialect: DialectCombo) -> MemSource {
        MemSource {
            dialect,
            core: Arc::default(),
        }
    }

    /// Answers every query containing `sql_fragment` with `rows`.
    pub fn respond(&self, sql_fragment: &str, rows: Vec<Row>) {
        let mut core = self.core.lock().expect("lock poisoned");
        core.canned.push(CannedResult {
            sql_fragment: sql_fragment.to_string(),
            rows,
        });
    }

    /// Every query run so far.
    pub fn executed(&self) -> Vec<String> {
        self.core.lock().expect("lock poisoned").executed.clone()
    }
}

#[async_trait]
impl SourceConnection for MemSource {
    fn dialect(&self) -> DialectCombo {
        self.dialect
    }

    async fn execute(&self, sql: &str) -> Result<RowChunks, ExecutionError> {
        let rows = self.core.lock().expect("lock poisoned").execute(sql);
        match rows {
            Some(rows) => Ok(chunks(rows)),
            None => Err(ExecutionError::Source {
                message: "query failed".into(),
                db_message: Some(format!("no canned result for: {}", sql)),
            }),
        }
    }
}

/// An in-memory computation engine.
///
/// Tables are kept in memory; queries are answered with canned rows like
/// [`MemSource`] does.
#[derive(Debug, Clone, Default)]
pub struct MemCompeng {
    core: Arc<Mutex<MemCore>>,
}

impl MemCompeng {
    pub fn new() -> MemCompeng {
        MemCompeng::default()
    }

    pub fn respond(&self, sql_fragment: &str, rows: Vec<Row>) {
        let mut core = self.core.lock().expect("lock poisoned");
        core.canned.push(CannedResult {
            sql_fragment: sql_fragment.to_string(),
            rows,
        });
    }

    pub fn executed(&self) -> Vec<String> {
        self.core.lock().expect("lock poisoned").executed.clone()
    }

    /// The rows of the table `name`, if it exists.
    pub fn table(&self, name: &str) -> Option<Vec<Row>> {
        let core = self.core.lock().expect("lock poisoned");
        core.tables.get(name).map(|(_, rows)| rows.clone())
    }

    /// The names of the tables that exist.
    pub fn tables(&self) -> Vec<String> {
        let core = self.core.lock().expect("lock poisoned");
        core.tables.keys().cloned().collect()
    }

    /// Every table dropped so far, in drop order.
    pub fn dropped(&self) -> Vec<String> {
        self.core.lock().expect("lock poisoned").dropped.clone()
    }
}

#[async_trait]
impl CompengConnection for MemCompeng {
    async fn create_table(&self, name: &str, columns: &[ColumnInfo]) -> Result<(), ExecutionError> {
        let mut core = self.core.lock().expect("lock poisoned");
        if core.tables.contains_key(name) {
            return Err(ExecutionError::Compeng {
                message: format!("table {} already exists", name),
            });
        }
        core.tables.insert(name.to_string(), (columns.to_vec(), vec![]));
        Ok(())
    }

    async fn insert_rows(&self, name: &str, rows: Vec<Row>) -> Result<(), ExecutionError> {
        let mut core = self.core.lock().expect("lock poisoned");
        match core.tables.get_mut(name) {
            Some((_, existing)) => {
                existing.extend(rows);
                Ok(())
            }
            None => Err(ExecutionError::Compeng {
                message: format!("no table {}", name),
            }),
        }
    }

    async fn execute(&self, sql: &str) -> Result<RowChunks, ExecutionError> {
        let rows = self.core.lock().expect("lock poisoned").execute(sql);
        rows.map(chunks).ok_or_else(|| ExecutionError::Compeng {
            message: format!("no canned result for: {}", sql),
        })
    }

    async fn drop_table(&self, name: &str) -> Result<(), ExecutionError> {
        let mut core = self.core.lock().expect("lock poisoned");
        core.tables.remove(name);
        core.dropped.push(name.to_string());
        Ok(())
    }
}
