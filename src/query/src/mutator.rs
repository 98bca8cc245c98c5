// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Rewrites of compiled multi-queries ahead of execution.
//!
//! A [`QueryMutator`] takes a multi-query and returns an equivalent one that
//! the chosen processor can run. The dialect fallback moves whatever the
//! source database cannot compute onto the computation engine, either by
//! wrapping a query's computation in a new engine query or by splitting its
//! joins into per-table downloads.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use dl_dyncfg::ConfigSet;
use dl_formula::{translate, Registry, TranslationCtx, TypeEnvironment};
use dl_formula_parser::rewrite::remap_formula_obj_fields;
use dl_formula_parser::{Extract, Formula, NodeKind};
use dl_repr::{DialectCombo, DialectName, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::JoinType;
use crate::compiled::{
    apply_query_patch, qualified, split_qualified, CompiledFormulaInfo, CompiledMultiQuery,
    CompiledOrderItem, CompiledQuery, FromObject, JoinedFrom, QueryLevel, QueryPatch,
};
use crate::error::PlanningError;

/// Where a multi-query is going to be executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
    /// Everything runs on the source database.
    SourceDb,
    /// Queries the source database cannot run go to the computation engine.
    Compeng,
}

/// Types capable of rewriting a compiled multi-query.
pub trait QueryMutator: fmt::Debug {
    /// Rewrites `mq`, returning an equivalent multi-query.
    fn mutate(&self, mq: CompiledMultiQuery) -> Result<CompiledMultiQuery, PlanningError>;

    /// A string describing the mutator.
    fn debug(&self) -> String {
        format!("{:?}", self)
    }
}

/// Returns its input.
#[derive(Debug)]
pub struct IdentityMutator;

impl QueryMutator for IdentityMutator {
    fn mutate(&self, mq: CompiledMultiQuery) -> Result<CompiledMultiQuery, PlanningError> {
        Ok(mq)
    }
}

/// The mutator for a processor and dialect.
///
/// Fails if `dialect` spans more than one database family.
pub fn mutator_for<'a>(
    processor: ProcessorType,
    dialect: DialectCombo,
    registry: &'a Registry,
) -> Result<Box<dyn QueryMutator + 'a>, PlanningError> {
    Ok(match (processor, dialect.family()?) {
        (ProcessorType::SourceDb, _) | (ProcessorType::Compeng, DialectName::Compeng) => {
            Box::new(IdentityMutator)
        }
        (ProcessorType::Compeng, _) => Box::new(DialectFallbackMutator { registry, dialect }),
    })
}

/// Prepares `mq` for execution by `processor` against `dialect`.
pub fn mutate(
    mq: CompiledMultiQuery,
    dialect: DialectCombo,
    processor: ProcessorType,
    registry: &Registry,
    configs: &ConfigSet,
) -> Result<CompiledMultiQuery, PlanningError> {
    let fallback = mutator_for(processor, dialect, registry)?;
    let mut mutators: Vec<Box<dyn QueryMutator + '_>> = vec![];
    if crate::OPTIMIZE_CONST_FILTERS.get(configs) {
        mutators.push(Box::new(OptimizingQueryMutator { registry, dialect }));
    }
    mutators.push(fallback);

    let mut mq = mq;
    for mutator in mutators {
        debug!(mutator = %mutator.debug(), "mutating multi-query");
        mq = mutator.mutate(mq)?;
    }
    mq.validate()?;
    Ok(mq)
}

/// Drops filters that are always true and group-by expressions that are
/// constant.
#[derive(Debug)]
pub struct OptimizingQueryMutator<'a> {
    pub registry: &'a Registry,
    pub dialect: DialectCombo,
}

impl OptimizingQueryMutator<'_> {
    /// The value of `formula` if it reads no fields and folds to a constant.
    fn constant(&self, formula: &Formula) -> Option<Value> {
        if !formula.field_names(formula.root()).is_empty() {
            return None;
        }
        let env = TypeEnvironment::new();
        let ctx = TranslationCtx::new(self.registry, &env, self.dialect);
        translate(formula, &ctx).ok()?.constant
    }
}

impl QueryMutator for OptimizingQueryMutator<'_> {
    fn mutate(&self, mq: CompiledMultiQuery) -> Result<CompiledMultiQuery, PlanningError> {
        let mut patch = QueryPatch::default();
        for query in mq.iter() {
            let mut optimized = query.clone();
            optimized
                .filters
                .retain(|f| self.constant(&f.formula) != Some(Value::Bool(true)));
            let constant_groups: BTreeSet<&str> = query
                .group_by
                .iter()
                .filter(|g| self.constant(&g.formula).is_some())
                .map(|g| g.alias.as_str())
                .collect();
            optimized
                .group_by
                .retain(|g| !constant_groups.contains(g.alias.as_str()));
            optimized
                .dimensions
                .retain(|d| !constant_groups.contains(d.alias.as_str()));
            if optimized != *query {
                debug!(
                    query_id = %query.id,
                    filters = query.filters.len() - optimized.filters.len(),
                    group_by = constant_groups.len(),
                    "dropped constant expressions"
                );
                patch.queries.push(optimized);
            }
        }
        Ok(apply_query_patch(mq, patch))
    }
}

/// Hands out query ids of the form `{id}_{n}` that are not taken yet.
#[derive(Debug, Default, Clone)]
pub struct AliasRemapper {
    used: BTreeSet<String>,
}

impl AliasRemapper {
    pub fn new<'a>(used: impl IntoIterator<Item = &'a str>) -> AliasRemapper {
        AliasRemapper {
            used: used.into_iter().map(str::to_string).collect(),
        }
    }

    /// The id `{id}_{n}` with the smallest unused `n`, which is then taken.
    pub fn next(&mut self, id: &str) -> String {
        let mut n = 0;
        loop {
            let candidate = format!("{}_{}", id, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Moves the parts of each query that the dialect cannot compute onto the
/// computation engine.
#[derive(Debug)]
pub struct DialectFallbackMutator<'a> {
    pub registry: &'a Registry,
    pub dialect: DialectCombo,
}

impl DialectFallbackMutator<'_> {
    /// The first function called by `query` that has no translation for the
    /// dialect.
    fn unsupported_function(&self, query: &CompiledQuery) -> Option<String> {
        let mut unsupported = None;
        for info in query.formulas() {
            info.formula.visit_pre(info.formula.root(), &mut |_, kind| {
                if let NodeKind::FuncCall(call) = kind {
                    let function = self.registry.preferred(&call.name, call.grouping.is_some());
                    if unsupported.is_none()
                        && function.map_or(false, |f| f.variant(self.dialect).is_none())
                    {
                        unsupported = Some(call.name.clone());
                    }
                }
            });
        }
        unsupported
    }

    fn supports_join(&self, join_type: JoinType) -> bool {
        !matches!(
            (join_type, self.dialect.name()),
            (JoinType::Full, DialectName::Mysql | DialectName::Sqlite)
        )
    }

    /// Moves the computation of `query` into a new engine query and
    /// replaces `query` by a projection of it.
    fn wrap_in_compeng(
        &self,
        query: &CompiledQuery,
        remapper: &mut AliasRemapper,
    ) -> Vec<CompiledQuery> {
        let inner_id = remapper.next(&query.id);
        let mut inner = CompiledQuery {
            id: inner_id.clone(),
            level: QueryLevel::Compeng,
            limit: None,
            offset: None,
            ..query.clone()
        };

        // Order-by expressions the projection cannot find among the selected
        // columns are selected under hidden names.
        let selected: BTreeMap<Extract, String> = query
            .select
            .iter()
            .map(|s| (s.formula.extract(s.formula.root()), s.alias.clone()))
            .collect();
        let mut order_by = vec![];
        for (i, item) in query.order_by.iter().enumerate() {
            let extract = item.info.formula.extract(item.info.formula.root());
            let alias = match selected.get(&extract) {
                Some(alias) => alias.clone(),
                None => {
                    let alias = format!("__order_{}", i);
                    inner.select.push(CompiledFormulaInfo {
                        alias: alias.clone(),
                        wrapper: None,
                        ..item.info.clone()
                    });
                    alias
                }
            };
            order_by.push(CompiledOrderItem {
                info: CompiledFormulaInfo::new(
                    Arc::new(Formula::field(qualified(&inner_id, &alias))),
                    format!("ord_{}", i),
                ),
                direction: item.direction,
            });
        }

        let mut projection = CompiledQuery::new(
            query.id.clone(),
            QueryLevel::Compeng,
            JoinedFrom::single(FromObject::Subquery {
                query_id: inner_id.clone(),
            }),
        );
        projection.select = query
            .select
            .iter()
            .map(|s| CompiledFormulaInfo {
                original_field_id: s.original_field_id.clone(),
                ..CompiledFormulaInfo::new(
                    Arc::new(Formula::field(qualified(&inner_id, &s.alias))),
                    s.alias.clone(),
                )
            })
            .collect();
        projection.order_by = order_by;
        projection.limit = query.limit;
        projection.offset = query.offset;
        vec![projection, inner]
    }

    /// Replaces every avatar joined by `query` with a source query reading
    /// the columns `query` needs from it, and moves `query` to the engine.
    fn split_joins(
        &self,
        query: &CompiledQuery,
        remapper: &mut AliasRemapper,
    ) -> Vec<CompiledQuery> {
        let mut columns: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for info in query.formulas() {
            for name in info.formula.field_names(info.formula.root()) {
                if let Some((from, column)) = split_qualified(&name) {
                    columns
                        .entry(query.joined_from.get(from).map_or("", |f| f.id()))
                        .or_default()
                        .insert(column.to_string());
                }
            }
        }
        for join in &query.join_on {
            for condition in &join.columns {
                for (from, column) in [
                    (&join.left_from_id, &condition.left_column),
                    (&join.right_from_id, &condition.right_column),
                ] {
                    if let Some(from) = query.joined_from.get(from) {
                        columns.entry(from.id()).or_default().insert(column.clone());
                    }
                }
            }
        }

        let mut patch = vec![];
        let mut from_ids = BTreeMap::new();
        let mut mapping = BTreeMap::new();
        let mut froms = vec![];
        for from in &query.joined_from.froms {
            let FromObject::Avatar { id, .. } = from else {
                froms.push(from.clone());
                continue;
            };
            let new_id = remapper.next(&query.id);
            let mut download =
                CompiledQuery::new(new_id.clone(), QueryLevel::SourceDb, JoinedFrom::single(from.clone()));
            for column in columns.get(id.as_str()).into_iter().flatten() {
                download.select.push(CompiledFormulaInfo::new(
                    Arc::new(Formula::field(qualified(id, column))),
                    column.clone(),
                ));
                mapping.insert(qualified(id, column), qualified(&new_id, column));
            }
            froms.push(FromObject::Subquery {
                query_id: new_id.clone(),
            });
            from_ids.insert(id.clone(), new_id);
            patch.push(download);
        }

        let remap_id = |id: &String| from_ids.get(id).cloned().unwrap_or_else(|| id.clone());
        let mut engine_query = query.map_formulas(|info| {
            info.map_formula(remap_formula_obj_fields(&info.formula, &mapping))
        });
        engine_query.level = QueryLevel::Compeng;
        engine_query.joined_from = JoinedFrom {
            root_from_id: remap_id(&query.joined_from.root_from_id),
            froms,
        };
        for join in &mut engine_query.join_on {
            join.left_from_id = remap_id(&join.left_from_id);
            join.right_from_id = remap_id(&join.right_from_id);
        }
        patch.insert(0, engine_query);
        patch
    }
}

impl QueryMutator for DialectFallbackMutator<'_> {
    /// Visits queries children first, so that a query reading from one that
    /// moved to the engine moves there as well.
    fn mutate(&self, mq: CompiledMultiQuery) -> Result<CompiledMultiQuery, PlanningError> {
        let mut remapper = AliasRemapper::new(mq.ids());
        let mut patch = QueryPatch::default();
        let mut on_engine: BTreeSet<String> = mq
            .iter()
            .filter(|q| q.level == QueryLevel::Compeng)
            .map(|q| q.id.clone())
            .collect();
        for id in mq.dependency_order()? {
            let query = mq.get(id)?;
            if query.level == QueryLevel::Compeng {
                continue;
            }
            let reads_avatars = query
                .joined_from
                .froms
                .iter()
                .any(|f| matches!(f, FromObject::Avatar { .. }));
            let reads_engine = query
                .joined_from
                .subquery_ids()
                .any(|child| on_engine.contains(child));
            let unsupported_join = query
                .join_on
                .iter()
                .find(|j| !self.supports_join(j.join_type))
                .map(|j| j.join_type);
            let unsupported_function = self.unsupported_function(query);
            let queries = match (unsupported_join, unsupported_function) {
                (Some(join_type), _) => {
                    debug!(query_id = %query.id, ?join_type, "splitting unsupported join");
                    self.split_joins(query, &mut remapper)
                }
                (None, Some(function)) if reads_avatars => {
                    debug!(query_id = %query.id, %function, "splitting joins for unsupported function");
                    self.split_joins(query, &mut remapper)
                }
                (None, Some(function)) => {
                    debug!(query_id = %query.id, %function, "moving query to the engine");
                    self.wrap_in_compeng(query, &mut remapper)
                }
                (None, None) if reads_engine && reads_avatars => {
                    debug!(query_id = %query.id, "splitting joins of an engine query reader");
                    self.split_joins(query, &mut remapper)
                }
                (None, None) if reads_engine => {
                    debug!(query_id = %query.id, "moving engine query reader to the engine");
                    vec![CompiledQuery {
                        level: QueryLevel::Compeng,
                        ..query.clone()
                    }]
                }
                (None, None) => continue,
            };
            on_engine.extend(
                queries
                    .iter()
                    .filter(|q| q.level == QueryLevel::Compeng)
                    .map(|q| q.id.clone()),
            );
            patch.queries.extend(queries);
        }
        Ok(apply_query_patch(mq, patch))
    }
}

#[cfg(test)]
mod tests {
    use dl_formula_parser::parse;

    use super::*;
    use crate::catalog::tests::catalog;
    use crate::compiler::tests::{compile_request, compile_request_over};
    use crate::compiler::{BASE_QUERY_ID, TOP_QUERY_ID};

    fn running_total() -> CompiledMultiQuery {
        compile_request(
            &[("Running", "RSUM(SUM([Sales]))")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Running"}, "role": "measure"},
                    {"id": 3, "field": {"title": "Running"}, "role": "order_by", "direction": "desc"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3], "limit": 5}]
            }"#,
        )
        .unwrap()
    }

    fn mutate_with(
        mq: CompiledMultiQuery,
        dialect: DialectCombo,
        processor: ProcessorType,
    ) -> CompiledMultiQuery {
        let registry = Registry::builtin();
        let configs = crate::all_dyncfgs(ConfigSet::default());
        mutate(mq, dialect, processor, &registry, &configs).unwrap()
    }

    #[test]
    fn alias_remapper() {
        let mut remapper = AliasRemapper::new(["qq", "qq_0", "qq_2"]);
        assert_eq!(remapper.next("qq"), "qq_1");
        assert_eq!(remapper.next("qq"), "qq_3");
        assert_eq!(remapper.next("other"), "other_0");
    }

    #[test]
    fn identity_strategies() {
        let mq = running_total();
        assert_eq!(
            mutate_with(mq.clone(), DialectCombo::MYSQL_5_6, ProcessorType::SourceDb),
            mq
        );
        assert_eq!(
            mutate_with(mq.clone(), DialectCombo::COMPENG, ProcessorType::Compeng),
            mq
        );
        // Nothing to fall back from.
        assert_eq!(
            mutate_with(mq.clone(), DialectCombo::POSTGRESQL_9_6, ProcessorType::Compeng),
            mq
        );
    }

    #[test]
    fn unsupported_window_moves_to_engine() {
        let mq = running_total();
        let mutated = mutate_with(mq.clone(), DialectCombo::MYSQL_5_6, ProcessorType::Compeng);

        let before: BTreeSet<_> = mq.ids().collect();
        let new_ids: Vec<_> = mutated.ids().filter(|id| !before.contains(id)).collect();
        assert_eq!(new_ids, ["qq_1"]);

        let top = mutated.get(TOP_QUERY_ID).unwrap();
        assert_eq!(top.level, QueryLevel::Compeng);
        assert_eq!(top.joined_from.subquery_ids().collect::<Vec<_>>(), ["qq_1"]);
        assert_eq!(top.limit, Some(5));
        assert_eq!(
            top.select.iter().map(|s| s.formula.to_string()).collect::<Vec<_>>(),
            [r#"(field "qq_1.res_1")"#, r#"(field "qq_1.res_2")"#]
        );
        assert_eq!(top.order_by[0].info.formula.to_string(), r#"(field "qq_1.res_2")"#);
        assert_eq!(top.order_by[0].direction, crate::legend::SortDirection::Desc);

        let inner = mutated.get("qq_1").unwrap();
        assert_eq!(inner.level, QueryLevel::Compeng);
        assert_eq!(inner.limit, None);
        assert_eq!(
            inner.joined_from.subquery_ids().collect::<Vec<_>>(),
            [BASE_QUERY_ID]
        );
        assert_eq!(
            mutated.get(BASE_QUERY_ID).unwrap().level,
            QueryLevel::SourceDb
        );
        assert_eq!(mutated.dependency_order().unwrap(), ["qq_0", "qq_1", "qq"]);
    }

    #[test]
    fn unsupported_function_splits_joins() {
        let mq = compile_request(
            &[("Hash", "MD5([Region])")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Hash"}, "role": "row"},
                    {"id": 2, "field": {"title": "Sales"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        let mutated = mutate_with(mq, DialectCombo::SQLITE, ProcessorType::Compeng);
        assert_eq!(
            mutated.ids().collect::<Vec<_>>(),
            ["qq", "qq_0", "qq_1", "qq_2"]
        );

        let top = mutated.get(TOP_QUERY_ID).unwrap();
        assert_eq!(top.level, QueryLevel::Compeng);
        assert_eq!(top.joined_from.root_from_id, "qq_0");
        assert_eq!(top.select[0].formula.to_string(), r#"(call md5 ((field "qq_2.name")))"#);
        assert_eq!(top.join_on[0].left_from_id, "qq_0");
        assert_eq!(top.join_on[1].right_from_id, "qq_2");

        let columns = |id: &str| {
            mutated
                .get(id)
                .unwrap()
                .select
                .iter()
                .map(|s| s.alias.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(columns("qq_0"), ["city_id", "sales"]);
        assert_eq!(columns("qq_1"), ["id", "region_id"]);
        assert_eq!(columns("qq_2"), ["id", "name"]);
        assert_eq!(mutated.get("qq_2").unwrap().level, QueryLevel::SourceDb);
    }

    #[test]
    fn readers_of_engine_queries_move_to_engine() {
        let mut catalog = catalog();
        catalog.relations[0].join_type = JoinType::Full;
        let mq = compile_request_over(
            catalog,
            &[("Running", "RSUM(SUM([Sales]))")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "City"}, "role": "row"},
                    {"id": 2, "field": {"title": "Running"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        assert_eq!(mq.get(BASE_QUERY_ID).unwrap().join_on[0].join_type, JoinType::Full);

        let mutated = mutate_with(mq, DialectCombo::MYSQL_8_0_12, ProcessorType::Compeng);
        let base = mutated.get(BASE_QUERY_ID).unwrap();
        assert_eq!(base.level, QueryLevel::Compeng);
        let top = mutated.get(TOP_QUERY_ID).unwrap();
        assert_eq!(top.level, QueryLevel::Compeng);
        assert_eq!(top.joined_from.subquery_ids().collect::<Vec<_>>(), [BASE_QUERY_ID]);

        // Only the per-table downloads stay on the source.
        for id in base.joined_from.subquery_ids() {
            let download = mutated.get(id).unwrap();
            assert_eq!(download.level, QueryLevel::SourceDb);
            assert!(download.joined_from.subquery_ids().next().is_none());
        }
        for query in mutated.iter().filter(|q| q.level == QueryLevel::SourceDb) {
            for child in query.joined_from.subquery_ids() {
                assert_eq!(mutated.get(child).unwrap().level, QueryLevel::SourceDb);
            }
        }
    }

    #[test]
    fn mixed_dialects_are_rejected() {
        let registry = Registry::builtin();
        let configs = crate::all_dyncfgs(ConfigSet::default());
        let err = mutate(
            running_total(),
            DialectCombo::MYSQL_8_0_12 | DialectCombo::SQLITE,
            ProcessorType::Compeng,
            &registry,
            &configs,
        )
        .unwrap_err();
        assert!(matches!(err, PlanningError::Dialect(_)));
        assert!(mutator_for(ProcessorType::SourceDb, DialectCombo::ANY, &registry).is_err());
    }

    #[test]
    fn constant_filters_are_dropped() {
        let mut mq = compile_request(
            &[],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Sales"}, "role": "filter", "operation": "GT",
                     "values": [{"t": "int", "v": 10}]}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        let mut top = mq.get(TOP_QUERY_ID).unwrap().clone();
        top.filters.push(CompiledFormulaInfo::new(Arc::new(parse("1 = 1").unwrap()), "flt_x"));
        top.group_by.push(CompiledFormulaInfo::new(Arc::new(parse("'a'").unwrap()), "grp_x"));
        mq = apply_query_patch(mq, QueryPatch { queries: vec![top] });

        let optimized = mutate_with(mq.clone(), DialectCombo::POSTGRESQL_9_6, ProcessorType::SourceDb);
        let top = optimized.get(TOP_QUERY_ID).unwrap();
        assert_eq!(top.filters.len(), 1);
        assert_eq!(top.group_by.len(), 1);

        let configs = crate::all_dyncfgs(ConfigSet::default());
        crate::OPTIMIZE_CONST_FILTERS.set(&configs, false);
        let registry = Registry::builtin();
        let untouched = mutate(
            mq.clone(),
            DialectCombo::POSTGRESQL_9_6,
            ProcessorType::SourceDb,
            &registry,
            &configs,
        )
        .unwrap();
        assert_eq!(untouched, mq);
    }
}
