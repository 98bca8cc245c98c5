// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Executors for each kind of operation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dl_query::catalog::JoinType;
use dl_repr::{Row, Value};
use futures::StreamExt;
use tracing::debug;

use crate::connection::{CompengConnection, SourceConnection};
use crate::context::{OpInputs, OpOutput, UploadedTable};
use crate::error::ExecutionError;
use crate::ops::{JoinSide, Operation, OperationKind};
use crate::stream::{DataStream, LocalKeyRepresentation, StreamMeta};

/// Runs one kind of [`Operation`].
#[async_trait]
pub trait OpExecutor: fmt::Debug + Send + Sync {
    async fn execute(&self, op: &Operation, inputs: OpInputs) -> Result<OpOutput, ExecutionError>;
}

fn unexpected(expected: OperationKind, op: &Operation) -> ExecutionError {
    ExecutionError::Internal(format!("{} executor cannot run {} operations", expected, op.kind()))
}

#[derive(Debug)]
pub struct DownloadExecutor {
    pub source: Arc<dyn SourceConnection>,
}

#[async_trait]
impl OpExecutor for DownloadExecutor {
    async fn execute(&self, op: &Operation, _: OpInputs) -> Result<OpOutput, ExecutionError> {
        let Operation::Download {
            query_id,
            sql,
            columns,
            dest,
        } = op
        else {
            return Err(unexpected(OperationKind::Download, op));
        };
        debug!(query_id, %sql, "running source query");
        let chunks = self.source.execute(sql).await?;
        let stream = DataStream::lazy(dest.clone(), columns.clone(), chunks)
            .with_key(LocalKeyRepresentation::new().extend("query", sql.clone()))
            .with_meta(vec![StreamMeta {
                query_id: query_id.clone(),
                sql: Some(sql.clone()),
            }]);
        Ok(OpOutput::Stream(stream))
    }
}

#[derive(Debug)]
pub struct UploadExecutor {
    pub compeng: Arc<dyn CompengConnection>,
}

#[async_trait]
impl OpExecutor for UploadExecutor {
    async fn execute(&self, op: &Operation, mut inputs: OpInputs) -> Result<OpOutput, ExecutionError> {
        let Operation::Upload {
            dest, table_name, ..
        } = op
        else {
            return Err(unexpected(OperationKind::Upload, op));
        };
        let stream = inputs.next_stream()?;
        let columns = stream.columns.clone();
        let key = stream.key.clone();
        let meta = stream.meta.clone();
        self.compeng.create_table(table_name, &columns).await?;
        let mut chunks = stream.into_chunks();
        let mut uploaded = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            uploaded += chunk.len();
            self.compeng.insert_rows(table_name, chunk).await?;
        }
        debug!(%table_name, rows = uploaded, "uploaded stream");
        Ok(OpOutput::Table {
            dest: dest.clone(),
            table: UploadedTable {
                table_name: table_name.clone(),
                columns,
                key,
                meta,
            },
        })
    }
}

#[derive(Debug)]
pub struct CalcExecutor {
    pub compeng: Arc<dyn CompengConnection>,
}

#[async_trait]
impl OpExecutor for CalcExecutor {
    async fn execute(&self, op: &Operation, inputs: OpInputs) -> Result<OpOutput, ExecutionError> {
        let Operation::Calc {
            query_id,
            sql,
            columns,
            dest,
            ..
        } = op
        else {
            return Err(unexpected(OperationKind::Calc, op));
        };
        debug!(query_id, %sql, "running engine query");
        let chunks = self.compeng.execute(sql).await?;
        let key = LocalKeyRepresentation::merge(inputs.tables.iter().map(|t| &t.key))
            .extend("query", sql.clone());
        let mut meta: Vec<_> = inputs.tables.into_iter().flat_map(|t| t.meta).collect();
        meta.push(StreamMeta {
            query_id: query_id.clone(),
            sql: Some(sql.clone()),
        });
        let stream = DataStream::lazy(dest.clone(), columns.clone(), chunks)
            .with_key(key)
            .with_meta(meta);
        Ok(OpOutput::Stream(stream))
    }
}

/// Joins two streams in memory.
///
/// Rows match when every pair of join columns holds equal non-null values.
#[derive(Debug)]
pub struct JoinExecutor;

/// The join columns of a row, or `None` if any of them is null.
fn join_key(row: &Row, positions: &[usize]) -> Result<Option<String>, ExecutionError> {
    let mut values = Vec::with_capacity(positions.len());
    for pos in positions {
        match row.get(*pos) {
            Some(Value::Null) => return Ok(None),
            Some(value) => values.push(value),
            None => return Err(ExecutionError::Internal(format!("row has no column {}", pos))),
        }
    }
    serde_json::to_string(&values)
        .map(Some)
        .map_err(|e| ExecutionError::Internal(e.to_string()))
}

#[async_trait]
impl OpExecutor for JoinExecutor {
    async fn execute(&self, op: &Operation, mut inputs: OpInputs) -> Result<OpOutput, ExecutionError> {
        let Operation::Join {
            query_id,
            join_type,
            on,
            output,
            columns,
            dest,
            ..
        } = op
        else {
            return Err(unexpected(OperationKind::Join, op));
        };
        let left = inputs.next_stream()?;
        let right = inputs.next_stream()?;

        let mut left_on = vec![];
        let mut right_on = vec![];
        for (l, r) in on {
            left_on.push(left.column_index(l)?);
            right_on.push(right.column_index(r)?);
        }
        let mut picks = vec![];
        for out in output {
            let pos = match out.side {
                JoinSide::Left => left.column_index(&out.column)?,
                JoinSide::Right => right.column_index(&out.column)?,
            };
            picks.push((out.side, pos));
        }
        let key = LocalKeyRepresentation::merge([&left.key, &right.key]).extend(
            "join",
            format!("{:?} {:?} {}", join_type, on, query_id),
        );
        let mut meta = left.meta.clone();
        meta.extend(right.meta.iter().cloned());
        let (left_width, right_width) = (left.columns.len(), right.columns.len());
        let left_rows = left.collect().await?;
        let right_rows = right.collect().await?;

        let mut index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, row) in right_rows.iter().enumerate() {
            if let Some(key) = join_key(row, &right_on)? {
                index.entry(key).or_default().push(i);
            }
        }

        let null_left = vec![Value::Null; left_width];
        let null_right = vec![Value::Null; right_width];
        let project = |l: &Row, r: &Row| -> Row {
            picks
                .iter()
                .map(|(side, pos)| match side {
                    JoinSide::Left => l[*pos].clone(),
                    JoinSide::Right => r[*pos].clone(),
                })
                .collect()
        };
        let keep_left = matches!(join_type, JoinType::Left | JoinType::Full);
        let keep_right = matches!(join_type, JoinType::Right | JoinType::Full);
        let mut matched_right = vec![false; right_rows.len()];
        let mut rows = vec![];
        for l in &left_rows {
            let matches: &[usize] = match join_key(l, &left_on)? {
                Some(key) => index.get(&key).map(Vec::as_slice).unwrap_or_default(),
                None => &[],
            };
            for i in matches {
                matched_right[*i] = true;
                rows.push(project(l, &right_rows[*i]));
            }
            if matches.is_empty() && keep_left {
                rows.push(project(l, &null_right));
            }
        }
        if keep_right {
            for (r, matched) in right_rows.iter().zip(matched_right) {
                if !matched {
                    rows.push(project(&null_left, r));
                }
            }
        }
        debug!(%query_id, rows = rows.len(), "joined streams");
        let stream = DataStream::materialized(dest.clone(), columns.clone(), rows)
            .with_key(key)
            .with_meta(meta);
        Ok(OpOutput::Stream(stream))
    }
}

/// The executor for operations of `kind`.
pub fn executor_for(
    kind: OperationKind,
    source: &Arc<dyn SourceConnection>,
    compeng: &Arc<dyn CompengConnection>,
) -> Box<dyn OpExecutor> {
    match kind {
        OperationKind::Download => Box::new(DownloadExecutor {
            source: Arc::clone(source),
        }),
        OperationKind::Upload => Box::new(UploadExecutor {
            compeng: Arc::clone(compeng),
        }),
        OperationKind::Calc => Box::new(CalcExecutor {
            compeng: Arc::clone(compeng),
        }),
        OperationKind::Join => Box::new(JoinExecutor),
    }
}

#[cfg(test)]
mod tests {
    use dl_query::render::ColumnInfo;
    use dl_repr::DataType;

    use super::*;
    use crate::ops::JoinOutput;

    fn stream(id: &str, names: &[&str], rows: Vec<Row>) -> DataStream {
        let columns = names
            .iter()
            .map(|n| ColumnInfo {
                name: n.to_string(),
                data_type: DataType::Integer,
            })
            .collect();
        DataStream::materialized(id, columns, rows)
    }

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    async fn join(join_type: JoinType) -> Vec<Row> {
        let op = Operation::Join {
            query_id: "qq".into(),
            left: "l".into(),
            right: "r".into(),
            join_type,
            on: vec![("k".into(), "k".into())],
            output: vec![
                JoinOutput {
                    side: JoinSide::Left,
                    column: "v".into(),
                    alias: "lv".into(),
                },
                JoinOutput {
                    side: JoinSide::Right,
                    column: "v".into(),
                    alias: "rv".into(),
                },
            ],
            columns: vec![],
            dest: "qq".into(),
        };
        let left = stream(
            "l",
            &["k", "v"],
            vec![
                vec![int(1), int(10)],
                vec![int(2), int(20)],
                vec![Value::Null, int(30)],
            ],
        );
        let right = stream(
            "r",
            &["v", "k"],
            vec![
                vec![int(100), int(1)],
                vec![int(101), int(1)],
                vec![int(300), Value::Null],
                vec![int(400), int(4)],
            ],
        );
        let inputs = OpInputs {
            streams: vec![left, right],
            tables: vec![],
        };
        match JoinExecutor.execute(&op, inputs).await.unwrap() {
            OpOutput::Stream(stream) => stream.collect().await.unwrap(),
            output => panic!("unexpected output {:?}", output),
        }
    }

    #[tokio::test]
    async fn join_types() {
        let null = Value::Null;
        assert_eq!(
            join(JoinType::Inner).await,
            vec![vec![int(10), int(100)], vec![int(10), int(101)]]
        );
        assert_eq!(
            join(JoinType::Left).await,
            vec![
                vec![int(10), int(100)],
                vec![int(10), int(101)],
                vec![int(20), null.clone()],
                vec![int(30), null.clone()],
            ]
        );
        assert_eq!(
            join(JoinType::Right).await,
            vec![
                vec![int(10), int(100)],
                vec![int(10), int(101)],
                vec![null.clone(), int(300)],
                vec![null.clone(), int(400)],
            ]
        );
        assert_eq!(join(JoinType::Full).await.len(), 6);
    }

    #[tokio::test]
    async fn executors_reject_other_operations() {
        let op = Operation::Upload {
            source: "s".into(),
            dest: "t".into(),
            table_name: "t".into(),
        };
        let err = JoinExecutor.execute(&op, OpInputs::default()).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Internal("join executor cannot run upload operations".into())
        );
    }
}
