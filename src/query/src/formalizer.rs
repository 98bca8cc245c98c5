// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Maps the roles of a block's legend items onto the parts of a query.

use std::collections::{BTreeMap, BTreeSet};

use dl_formula::Registry;
use dl_formula_parser::NodeKind;
use dl_repr::Value;
use serde::{Deserialize, Serialize};

use crate::catalog::{CalcMode, DatasetCatalog, FieldDef, FieldSelector};
use crate::error::PlanningError;
use crate::legend::{FilterOp, Legend, RawBlock, RoleSpec, SortDirection};

/// Restricts an array expression to its first `length` elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArrayPrefixSelectWrapper {
    pub length: usize,
}

/// A field as one part of a query uses it.
#[derive(Clone, Debug, PartialEq)]
pub struct SpecItem {
    pub legend_item_id: u32,
    pub field_id: String,
    pub wrapper: Option<ArrayPrefixSelectWrapper>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub item: SpecItem,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilterItem {
    pub item: SpecItem,
    pub operation: FilterOp,
    pub values: Vec<Value>,
}

/// The logical shape of one block's query.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct QuerySpec {
    pub block_id: u32,
    pub select: Vec<SpecItem>,
    pub group_by: Vec<SpecItem>,
    pub order_by: Vec<OrderItem>,
    pub filters: Vec<FilterItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Builds the query spec of `block`.
///
/// Items keep the order in which the block lists them, within each part.
/// Only dimensions are grouped by, each field and wrapper once.
pub fn make_query_spec(
    block: &RawBlock,
    legend: &Legend,
    catalog: &DatasetCatalog,
    registry: &Registry,
) -> Result<QuerySpec, PlanningError> {
    let mut spec = QuerySpec {
        block_id: block.block_id,
        limit: block.limit,
        offset: block.offset,
        ..Default::default()
    };

    let items = block
        .legend_item_ids
        .iter()
        .map(|id| {
            legend.get(*id).ok_or_else(|| PlanningError::UnknownField {
                field: format!("legend item {}", id),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Fields shown as trees are wrapped wherever they are used.
    let tree_wrapper = |field_id: &str| {
        items.iter().find_map(|item| match &item.role {
            RoleSpec::Tree { level, .. } if item.field_id == field_id => {
                Some(ArrayPrefixSelectWrapper { length: *level })
            }
            _ => None,
        })
    };

    let mut kinds = FieldKinds::new(catalog, registry);
    let mut grouped = BTreeSet::new();
    let mut group_by = |spec: &mut QuerySpec, item: &SpecItem| -> Result<(), PlanningError> {
        let field = catalog.resolve(&FieldSelector::Id(item.field_id.clone()))?;
        if !kinds.is_measure(field)? && grouped.insert((item.field_id.clone(), item.wrapper)) {
            spec.group_by.push(item.clone());
        }
        Ok(())
    };

    for item in &items {
        catalog.resolve(&FieldSelector::Id(item.field_id.clone()))?;
        let spec_item = SpecItem {
            legend_item_id: item.legend_item_id,
            field_id: item.field_id.clone(),
            wrapper: tree_wrapper(&item.field_id),
        };
        match &item.role {
            RoleSpec::Row => {
                spec.select.push(spec_item.clone());
                group_by(&mut spec, &spec_item)?;
            }
            RoleSpec::Measure | RoleSpec::Annotation => spec.select.push(spec_item),
            RoleSpec::Filter { operation, values } => spec.filters.push(FilterItem {
                item: SpecItem {
                    wrapper: None,
                    ..spec_item
                },
                operation: *operation,
                values: values.clone(),
            }),
            RoleSpec::Tree { prefix, .. } => {
                spec.select.push(spec_item.clone());
                group_by(&mut spec, &spec_item)?;
                if !prefix.is_empty() {
                    let prefix_values = prefix.iter().cloned().map(Value::String).collect();
                    spec.filters.push(FilterItem {
                        item: SpecItem {
                            wrapper: Some(ArrayPrefixSelectWrapper {
                                length: prefix.len(),
                            }),
                            ..spec_item
                        },
                        operation: FilterOp::Eq,
                        values: vec![Value::Array(prefix_values)],
                    });
                }
            }
            RoleSpec::Pivot { direction } => {
                spec.select.push(spec_item.clone());
                group_by(&mut spec, &spec_item)?;
                if let Some(direction) = direction {
                    spec.order_by.push(OrderItem {
                        item: spec_item,
                        direction: *direction,
                    });
                }
            }
            RoleSpec::OrderBy { direction } => spec.order_by.push(OrderItem {
                item: spec_item,
                direction: *direction,
            }),
        }
    }
    Ok(spec)
}

/// Tells measures, fields that aggregate, from dimensions.
///
/// A formula field is a measure if it calls an aggregate or window function
/// or references a measure.
struct FieldKinds<'a> {
    catalog: &'a DatasetCatalog,
    registry: &'a Registry,
    memo: BTreeMap<String, bool>,
    visiting: BTreeSet<String>,
}

impl<'a> FieldKinds<'a> {
    fn new(catalog: &'a DatasetCatalog, registry: &'a Registry) -> FieldKinds<'a> {
        FieldKinds {
            catalog,
            registry,
            memo: BTreeMap::new(),
            visiting: BTreeSet::new(),
        }
    }

    fn is_measure(&mut self, field: &FieldDef) -> Result<bool, PlanningError> {
        if let Some(measure) = self.memo.get(&field.id) {
            return Ok(*measure);
        }
        let CalcMode::Formula { formula } = &field.calc else {
            return Ok(false);
        };
        if !self.visiting.insert(field.id.clone()) {
            return Err(PlanningError::FieldCycle {
                field: field.title.clone(),
            });
        }
        let parsed = dl_formula_parser::parse(formula).map_err(|source| PlanningError::Parse {
            field: field.title.clone(),
            source,
        })?;
        let mut aggregates = false;
        parsed.visit_pre(parsed.root(), &mut |_, kind| {
            if let NodeKind::FuncCall(call) = kind {
                if let Some(function) = self.registry.preferred(&call.name, call.grouping.is_some()) {
                    aggregates |= function.is_aggregate() || function.is_window();
                }
            }
        });
        let mut measure = aggregates;
        if !measure {
            for name in parsed.field_names(parsed.root()) {
                let referenced = self.catalog.resolve(&FieldSelector::Title(name))?;
                if self.is_measure(referenced)? {
                    measure = true;
                    break;
                }
            }
        }
        self.visiting.remove(&field.id);
        self.memo.insert(field.id.clone(), measure);
        Ok(measure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::catalog;
    use crate::legend::{make_legend, RawQuerySpec};

    fn spec_for(json: &str) -> QuerySpec {
        spec_over(catalog(), json)
    }

    fn spec_over(catalog: DatasetCatalog, json: &str) -> QuerySpec {
        let raw: RawQuerySpec = serde_json::from_str(json).unwrap();
        let legend = make_legend(&raw, &catalog).unwrap();
        make_query_spec(raw.single_block().unwrap(), &legend, &catalog, &Registry::builtin()).unwrap()
    }

    fn formula_field(id: &str, title: &str, formula: &str) -> FieldDef {
        FieldDef {
            id: id.into(),
            title: title.into(),
            calc: CalcMode::Formula {
                formula: formula.into(),
            },
            data_type: dl_repr::DataType::Float,
            params: Default::default(),
        }
    }

    #[test]
    fn roles_map_onto_parts() {
        let spec = spec_for(
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Sales"}, "role": "measure"},
                    {"id": 3, "field": {"title": "Sales"}, "role": "order_by", "direction": "desc"},
                    {"id": 4, "field": {"title": "Region"}, "role": "filter", "operation": "ISNOTNULL"}
                ],
                "blocks": [{"block_id": 7, "legend_item_ids": [1, 2, 3, 4], "limit": 10}]
            }"#,
        );
        assert_eq!(spec.block_id, 7);
        assert_eq!(spec.limit, Some(10));
        let ids = |items: &[SpecItem]| items.iter().map(|i| i.legend_item_id).collect::<Vec<_>>();
        assert_eq!(ids(&spec.select), [1, 2]);
        assert_eq!(ids(&spec.group_by), [1]);
        assert_eq!(spec.order_by[0].item.legend_item_id, 3);
        assert_eq!(spec.order_by[0].direction, SortDirection::Desc);
        assert_eq!(spec.filters[0].operation, FilterOp::Isnotnull);
    }

    #[test]
    fn only_dimensions_are_grouped() {
        let mut catalog = catalog();
        catalog.fields.push(formula_field("t", "Total", "SUM([Sales])"));
        catalog.fields.push(formula_field("d", "Doubled", "[Total] * 2"));
        catalog.fields.push(formula_field("u", "Upper", "UPPER([Region])"));
        let spec = spec_over(
            catalog,
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Total"}, "role": "row"},
                    {"id": 3, "field": {"title": "Doubled"}, "role": "row"},
                    {"id": 4, "field": {"title": "Upper"}, "role": "row"},
                    {"id": 5, "field": {"title": "Region"}, "role": "row"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3, 4, 5]}]
            }"#,
        );
        let ids = |items: &[SpecItem]| items.iter().map(|i| i.legend_item_id).collect::<Vec<_>>();
        assert_eq!(ids(&spec.select), [1, 2, 3, 4, 5]);
        assert_eq!(ids(&spec.group_by), [1, 4]);
    }

    #[test]
    fn tree_items_are_wrapped() {
        let spec = spec_for(
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "tree", "level": 2, "prefix": ["abc"]},
                    {"id": 2, "field": {"title": "Region"}, "role": "order_by"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        );
        let wrapper = Some(ArrayPrefixSelectWrapper { length: 2 });
        assert_eq!(spec.select[0].wrapper, wrapper);
        assert_eq!(spec.group_by[0].wrapper, wrapper);
        assert_eq!(spec.order_by[0].item.wrapper, wrapper);
        assert_eq!(
            spec.filters[0].item.wrapper,
            Some(ArrayPrefixSelectWrapper { length: 1 })
        );
        assert_eq!(
            spec.filters[0].values,
            [Value::Array(vec![Value::String("abc".into())])]
        );
    }
}
