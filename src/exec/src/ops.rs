// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The operations of an execution plan.

use std::fmt;

use dl_query::catalog::JoinType;
use dl_query::render::ColumnInfo;
use serde::{Deserialize, Serialize};

/// A side of a [`Operation::Join`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinSide {
    Left,
    Right,
}

/// A column of a join's output, read from one of its inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOutput {
    pub side: JoinSide,
    pub column: String,
    pub alias: String,
}

/// One step of an execution plan.
///
/// Every operation consumes the streams named by [`Operation::inputs`] and
/// produces the stream named by [`Operation::output`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Runs a query on the source database.
    Download {
        query_id: String,
        sql: String,
        columns: Vec<ColumnInfo>,
        dest: String,
    },
    /// Stores a stream in a scratch table of the computation engine.
    ///
    /// The output names the table, not a stream of rows.
    Upload {
        source: String,
        dest: String,
        table_name: String,
    },
    /// Runs a query on the computation engine over uploaded tables.
    Calc {
        query_id: String,
        inputs: Vec<String>,
        sql: String,
        columns: Vec<ColumnInfo>,
        dest: String,
    },
    /// Joins two streams in process.
    Join {
        query_id: String,
        left: String,
        right: String,
        join_type: JoinType,
        /// Pairs of `(left column, right column)` that must be equal.
        on: Vec<(String, String)>,
        output: Vec<JoinOutput>,
        columns: Vec<ColumnInfo>,
        dest: String,
    },
}

impl Operation {
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Operation::Download { .. } => vec![],
            Operation::Upload { source, .. } => vec![source],
            Operation::Calc { inputs, .. } => inputs.iter().map(String::as_str).collect(),
            Operation::Join { left, right, .. } => vec![left, right],
        }
    }

    pub fn output(&self) -> &str {
        match self {
            Operation::Download { dest, .. }
            | Operation::Upload { dest, .. }
            | Operation::Calc { dest, .. }
            | Operation::Join { dest, .. } => dest,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Download { .. } => OperationKind::Download,
            Operation::Upload { .. } => OperationKind::Upload,
            Operation::Calc { .. } => OperationKind::Calc,
            Operation::Join { .. } => OperationKind::Join,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    Download,
    Upload,
    Calc,
    Join,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Download => "download",
            OperationKind::Upload => "upload",
            OperationKind::Calc => "calc",
            OperationKind::Join => "join",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operations computing a request's result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// In an order in which every operation follows those producing its
    /// inputs.
    pub operations: Vec<Operation>,
    pub result_stream_id: String,
    pub result_columns: Vec<ColumnInfo>,
}
