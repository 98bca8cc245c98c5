// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Requests and their legends.
//!
//! A [`RawQuerySpec`] is a request as the API receives it: a list of items,
//! each a field reference with a role, and one or more blocks that select
//! items by id. [`make_legend`] resolves every item against the dataset and
//! checks the roles are well formed.

use std::collections::BTreeSet;

use dl_repr::{DataType, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{DatasetCatalog, FieldSelector};
use crate::error::PlanningError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Isnull,
    Isnotnull,
    Startswith,
    Contains,
    Between,
}

impl FilterOp {
    /// Reports whether `n` values are acceptable for this operation.
    fn accepts_arity(&self, n: usize) -> bool {
        match self {
            FilterOp::Isnull | FilterOp::Isnotnull => n == 0,
            FilterOp::In | FilterOp::Nin => n >= 1,
            FilterOp::Between => n == 2,
            _ => n == 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// What a legend item contributes to the query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleSpec {
    /// A dimension: selected and grouped by.
    Row,
    /// A measure: selected.
    Measure,
    Filter {
        operation: FilterOp,
        #[serde(default)]
        values: Vec<Value>,
    },
    /// A tree dimension, shown down to `level` and restricted to the branch
    /// under `prefix`.
    Tree {
        level: usize,
        #[serde(default)]
        prefix: Vec<String>,
    },
    /// A pivot dimension, optionally sorted.
    Pivot {
        #[serde(default)]
        direction: Option<SortDirection>,
    },
    Annotation,
    OrderBy {
        #[serde(default)]
        direction: SortDirection,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawLegendItem {
    pub id: u32,
    pub field: FieldSelector,
    #[serde(flatten)]
    pub role: RoleSpec,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    pub block_id: u32,
    pub legend_item_ids: Vec<u32>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

/// A request as received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawQuerySpec {
    pub items: Vec<RawLegendItem>,
    pub blocks: Vec<RawBlock>,
}

impl RawQuerySpec {
    /// The only block of a request that must have exactly one.
    pub fn single_block(&self) -> Result<&RawBlock, PlanningError> {
        match self.blocks.as_slice() {
            [block] => Ok(block),
            blocks => Err(PlanningError::MultipleBlocks {
                count: blocks.len(),
            }),
        }
    }
}

/// A resolved request item.
#[derive(Clone, Debug, PartialEq)]
pub struct LegendItem {
    pub legend_item_id: u32,
    pub field_id: String,
    pub title: String,
    pub data_type: DataType,
    pub role: RoleSpec,
}

/// The resolved items of a request, in request order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Legend {
    items: Vec<LegendItem>,
}

impl Legend {
    pub fn get(&self, legend_item_id: u32) -> Option<&LegendItem> {
        self.items
            .iter()
            .find(|item| item.legend_item_id == legend_item_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LegendItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Resolves every item of `raw` against `catalog`.
pub fn make_legend(raw: &RawQuerySpec, catalog: &DatasetCatalog) -> Result<Legend, PlanningError> {
    let mut seen = BTreeSet::new();
    let mut items = Vec::with_capacity(raw.items.len());
    for item in &raw.items {
        if !seen.insert(item.id) {
            return Err(PlanningError::DuplicateLegendItem { id: item.id });
        }
        let field = catalog.resolve(&item.field)?;
        match &item.role {
            RoleSpec::Filter { operation, values } if !operation.accepts_arity(values.len()) => {
                return Err(PlanningError::InvalidFilter {
                    field: field.title.clone(),
                    operation: format!("{:?} with {} values", operation, values.len()),
                });
            }
            RoleSpec::Tree { level, .. } if *level == 0 => {
                return Err(PlanningError::InvalidFilter {
                    field: field.title.clone(),
                    operation: "tree level 0".into(),
                });
            }
            _ => {}
        }
        items.push(LegendItem {
            legend_item_id: item.id,
            field_id: field.id.clone(),
            title: field.title.clone(),
            data_type: field.data_type,
            role: item.role.clone(),
        });
    }
    debug!(items = items.len(), "made legend");
    Ok(Legend { items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::catalog;

    fn raw(json: &str) -> RawQuerySpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn resolves_by_id_and_title() {
        let spec = raw(
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"id": "f1"}, "role": "measure"},
                    {"id": 3, "field": {"title": "Sales"}, "role": "filter",
                     "operation": "GT", "values": [{"t": "int", "v": 10}]}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3]}]
            }"#,
        );
        let legend = make_legend(&spec, &catalog()).unwrap();
        assert_eq!(legend.len(), 3);
        assert_eq!(legend.get(1).unwrap().field_id, "f2");
        assert_eq!(legend.get(2).unwrap().title, "Sales");
        assert_eq!(
            legend.get(3).unwrap().role,
            RoleSpec::Filter {
                operation: FilterOp::Gt,
                values: vec![Value::Int(10)]
            }
        );
    }

    #[test]
    fn errors() {
        let duplicate = raw(
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 1, "field": {"title": "Sales"}, "role": "measure"}
                ],
                "blocks": []
            }"#,
        );
        assert_eq!(
            make_legend(&duplicate, &catalog()),
            Err(PlanningError::DuplicateLegendItem { id: 1 })
        );
        assert_eq!(
            duplicate.single_block(),
            Err(PlanningError::MultipleBlocks { count: 0 })
        );

        let unknown = raw(r#"{"items": [{"id": 1, "field": {"id": "zz"}, "role": "row"}], "blocks": []}"#);
        assert_eq!(
            make_legend(&unknown, &catalog()),
            Err(PlanningError::UnknownField {
                field: "id zz".into()
            })
        );

        let arity = raw(
            r#"{"items": [{"id": 1, "field": {"id": "f1"}, "role": "filter", "operation": "BETWEEN",
                          "values": [{"t": "int", "v": 1}]}],
                "blocks": []}"#,
        );
        assert!(matches!(
            make_legend(&arity, &catalog()),
            Err(PlanningError::InvalidFilter { .. })
        ));
    }
}
