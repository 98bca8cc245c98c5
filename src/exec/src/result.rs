// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The wire form of request results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ExecutionError;
use crate::postprocess::{postprocess, ColumnTypeInfo};
use crate::stream::{DataStream, StreamMeta};

/// A query that contributed to a result.
pub type QueryMeta = StreamMeta;

/// The rows of one request block, with one cell per selected legend item in
/// the order the block selects them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultBlock {
    pub block_id: u32,
    pub rows: Vec<Vec<JsonValue>>,
    pub meta: Vec<QueryMeta>,
}

impl ResultBlock {
    /// Reads the remaining rows of `stream` and converts them into their
    /// wire form.
    pub async fn from_stream(
        block_id: u32,
        stream: DataStream,
        columns: &[ColumnTypeInfo],
    ) -> Result<ResultBlock, ExecutionError> {
        let meta = stream.meta.clone();
        let rows = postprocess(stream.collect().await?, columns)?;
        Ok(ResultBlock {
            block_id,
            rows,
            meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use dl_query::render::ColumnInfo;
    use dl_repr::{DataType, Value};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn wire_form() {
        let stream = DataStream::materialized(
            "qq",
            vec![ColumnInfo {
                name: "res_1".into(),
                data_type: DataType::Integer,
            }],
            vec![vec![Value::Int(1)], vec![Value::Null]],
        )
        .with_meta(vec![StreamMeta {
            query_id: "qq".into(),
            sql: Some("SELECT 1".into()),
        }]);
        let block = ResultBlock::from_stream(0, stream, &[ColumnTypeInfo::new(DataType::Integer)])
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({
                "block_id": 0,
                "rows": [["1"], [null]],
                "meta": [{"query_id": "qq", "sql": "SELECT 1"}],
            })
        );
    }
}
