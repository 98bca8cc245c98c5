// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Streams of rows passed between operations.

use std::fmt;

use dl_query::render::ColumnInfo;
use dl_repr::Row;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// Rows produced lazily, in chunks.
pub type RowChunks = BoxStream<'static, Result<Vec<Row>, ExecutionError>>;

/// One component of a [`LocalKeyRepresentation`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataKeyPart {
    pub kind: String,
    pub value: String,
}

/// Identifies the data of a stream by how it was computed.
///
/// Each operation extends the keys of its inputs with what it did to them,
/// so equal keys mean equal data for as long as the sources do not change.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalKeyRepresentation {
    parts: Vec<DataKeyPart>,
}

impl LocalKeyRepresentation {
    pub fn new() -> LocalKeyRepresentation {
        LocalKeyRepresentation::default()
    }

    /// The key of data derived from every key in `keys`.
    pub fn merge<'a>(keys: impl IntoIterator<Item = &'a LocalKeyRepresentation>) -> LocalKeyRepresentation {
        LocalKeyRepresentation {
            parts: keys.into_iter().flat_map(|k| k.parts.iter().cloned()).collect(),
        }
    }

    pub fn extend(&self, kind: &str, value: impl Into<String>) -> LocalKeyRepresentation {
        let mut parts = self.parts.clone();
        parts.push(DataKeyPart {
            kind: kind.to_string(),
            value: value.into(),
        });
        LocalKeyRepresentation { parts }
    }

    pub fn parts(&self) -> &[DataKeyPart] {
        &self.parts
    }

    /// A fixed-size digest of the key, as an uppercase hex string.
    pub fn digest(&self) -> String {
        let mut hasher = Md5::new();
        for part in &self.parts {
            hasher.update(part.kind.as_bytes());
            hasher.update([0]);
            hasher.update(part.value.as_bytes());
            hasher.update([0]);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect()
    }
}

/// Where the rows of a stream come from.
pub enum StreamRows {
    Materialized(Vec<Row>),
    Lazy(RowChunks),
}

impl fmt::Debug for StreamRows {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StreamRows::Materialized(rows) => write!(f, "Materialized({} rows)", rows.len()),
            StreamRows::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

/// The query a stream's data was requested with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMeta {
    pub query_id: String,
    pub sql: Option<String>,
}

#[derive(Debug)]
pub struct DataStream {
    pub id: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: StreamRows,
    pub key: LocalKeyRepresentation,
    pub meta: Vec<StreamMeta>,
}

impl DataStream {
    pub fn materialized(id: impl Into<String>, columns: Vec<ColumnInfo>, rows: Vec<Row>) -> DataStream {
        DataStream {
            id: id.into(),
            columns,
            rows: StreamRows::Materialized(rows),
            key: LocalKeyRepresentation::new(),
            meta: vec![],
        }
    }

    pub fn lazy(id: impl Into<String>, columns: Vec<ColumnInfo>, chunks: RowChunks) -> DataStream {
        DataStream {
            id: id.into(),
            columns,
            rows: StreamRows::Lazy(chunks),
            key: LocalKeyRepresentation::new(),
            meta: vec![],
        }
    }

    pub fn with_key(mut self, key: LocalKeyRepresentation) -> DataStream {
        self.key = key;
        self
    }

    pub fn with_meta(mut self, meta: Vec<StreamMeta>) -> DataStream {
        self.meta = meta;
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// The position of the column `name`.
    pub fn column_index(&self, name: &str) -> Result<usize, ExecutionError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                ExecutionError::Internal(format!("stream {} has no column {}", self.id, name))
            })
    }

    /// The rows of the stream as chunks, whether or not they were
    /// materialized.
    pub fn into_chunks(self) -> RowChunks {
        match self.rows {
            StreamRows::Materialized(rows) => stream::once(async move { Ok(rows) }).boxed(),
            StreamRows::Lazy(chunks) => chunks,
        }
    }

    /// Reads every remaining row.
    pub async fn collect(self) -> Result<Vec<Row>, ExecutionError> {
        match self.rows {
            StreamRows::Materialized(rows) => Ok(rows),
            StreamRows::Lazy(chunks) => {
                let chunks: Vec<Vec<Row>> = chunks.try_collect().await?;
                Ok(chunks.into_iter().flatten().collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dl_repr::{DataType, Value};

    use super::*;

    fn columns() -> Vec<ColumnInfo> {
        vec![ColumnInfo {
            name: "a".into(),
            data_type: DataType::Integer,
        }]
    }

    #[test]
    fn keys_extend_their_inputs() {
        let base = LocalKeyRepresentation::new().extend("query", "SELECT 1");
        let other = LocalKeyRepresentation::new().extend("query", "SELECT 2");
        let merged = LocalKeyRepresentation::merge([&base, &other]).extend("query", "SELECT *");
        assert_eq!(merged.parts().len(), 3);
        assert_eq!(merged.parts()[0], base.parts()[0]);
        assert_ne!(merged.digest(), base.digest());
        assert_eq!(base.digest(), base.clone().digest());
        assert_eq!(base.digest().len(), 32);
    }

    #[tokio::test]
    async fn lazy_streams_collect_in_order() {
        let chunks = stream::iter(vec![
            Ok(vec![vec![Value::Int(1)], vec![Value::Int(2)]]),
            Ok(vec![vec![Value::Int(3)]]),
        ])
        .boxed();
        let stream = DataStream::lazy("s", columns(), chunks);
        assert_eq!(stream.column_index("a"), Ok(0));
        let rows = stream.collect().await.unwrap();
        assert_eq!(rows, [[Value::Int(1)], [Value::Int(2)], [Value::Int(3)]]);
    }

    #[tokio::test]
    async fn dropping_a_lazy_stream() {
        let chunks = stream::iter(vec![
            Ok(vec![vec![Value::Int(1)]]),
            Err(ExecutionError::Internal("never read".into())),
        ])
        .boxed();
        let mut chunks = DataStream::lazy("s", columns(), chunks).into_chunks();
        assert_eq!(chunks.next().await, Some(Ok(vec![vec![Value::Int(1)]])));
        drop(chunks);
    }
}
