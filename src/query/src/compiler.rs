// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Compiles a [`QuerySpec`] into a [`CompiledMultiQuery`].
//!
//! Field references are first inlined: formula fields are replaced by their
//! formulas, transitively, and direct fields by qualified references to
//! their avatar column (`avatar.column`). A request without window or lookup
//! functions and without level of detail clauses then becomes a single
//! query, [`TOP_QUERY_ID`]. Otherwise it is split:
//!
//! * the base query, [`BASE_QUERY_ID`], selects and groups by every
//!   dimension and computes every maximal window-free subexpression of the
//!   remaining expressions;
//! * each aggregate with a level of detail of its own is computed by a query
//!   grouped by that level, which is left joined onto the base query on the
//!   dimensions they share. Aggregates nested in it are computed by a query
//!   of their own first;
//! * the top query reads from these and computes the windows and lookups
//!   over their columns. Windows over windows get one query per nesting
//!   level in between.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dl_formula::Registry;
use dl_formula_parser::ast::{FuncCall, LodSpecifier};
use dl_formula_parser::rewrite::replace_nodes;
use dl_formula_parser::{
    Extract, Formula, FormulaBuilder, Literal, NodeId, NodeKind, ParseCache, RECURSION_LIMIT,
};
use dl_ore::stack::{maybe_grow, CheckedRecursion, RecursionGuard};
use dl_repr::{DataType, Value};
use tracing::debug;

use crate::catalog::{CalcMode, DatasetCatalog, FieldDef, FieldSelector, JoinCondition, JoinType};
use crate::compiled::{
    qualified, split_qualified, CompiledFormulaInfo, CompiledMultiQuery, CompiledOrderItem, CompiledQuery,
    FromObject, JoinOnCondition, JoinedFrom, QueryLevel,
};
use crate::error::PlanningError;
use crate::formalizer::{ArrayPrefixSelectWrapper, FilterItem, QuerySpec, SpecItem};
use crate::legend::FilterOp;

/// The id of the query whose results answer the request.
pub const TOP_QUERY_ID: &str = "qq";
/// The id of the query a two-level request computes its windows over.
pub const BASE_QUERY_ID: &str = "qq_0";

/// Compiles requests against one dataset.
#[derive(Debug)]
pub struct Compiler<'a> {
    catalog: &'a DatasetCatalog,
    registry: &'a Registry,
    parse_cache: &'a ParseCache,
}

impl<'a> Compiler<'a> {
    pub fn new(
        catalog: &'a DatasetCatalog,
        registry: &'a Registry,
        parse_cache: &'a ParseCache,
    ) -> Compiler<'a> {
        Compiler {
            catalog,
            registry,
            parse_cache,
        }
    }

    pub fn compile(&self, spec: &QuerySpec) -> Result<CompiledMultiQuery, PlanningError> {
        let mut inliner = FieldInliner::new(self.catalog, self.parse_cache);

        let select = spec
            .select
            .iter()
            .map(|item| self.item_info(&mut inliner, item, format!("res_{}", item.legend_item_id)))
            .collect::<Result<Vec<_>, _>>()?;
        let group_by = spec
            .group_by
            .iter()
            .enumerate()
            .map(|(i, item)| self.item_info(&mut inliner, item, format!("grp_{}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        let order_by = spec
            .order_by
            .iter()
            .enumerate()
            .map(|(i, order)| {
                Ok(CompiledOrderItem {
                    info: self.item_info(&mut inliner, &order.item, format!("ord_{}", i))?,
                    direction: order.direction,
                })
            })
            .collect::<Result<Vec<_>, PlanningError>>()?;
        let filters = spec
            .filters
            .iter()
            .enumerate()
            .map(|(i, filter)| self.filter_info(&mut inliner, filter, format!("flt_{}", i)))
            .collect::<Result<Vec<_>, _>>()?;

        for (filter, item) in filters.iter().zip(&spec.filters) {
            let root = filter.formula.root();
            if self.has_windows(&filter.formula, root) || self.has_lod(&filter.formula, root) {
                return Err(PlanningError::UnsupportedFilter {
                    field: self.title(&item.item.field_id),
                });
            }
        }

        let windowed = select
            .iter()
            .chain(order_by.iter().map(|o| &o.info))
            .any(|info| self.has_windows(&info.formula, info.formula.root()));
        let forked = select
            .iter()
            .chain(order_by.iter().map(|o| &o.info))
            .any(|info| self.has_lod(&info.formula, info.formula.root()));

        let parts = QueryParts {
            select,
            group_by,
            order_by,
            filters,
            limit: spec.limit,
            offset: spec.offset,
        };
        let mq = if windowed || forked {
            self.compile_split(parts, spec)?
        } else {
            CompiledMultiQuery::new(vec![self.compile_single(parts)?])
        };
        mq.validate()?;
        debug!(
            block_id = spec.block_id,
            queries = mq.len(),
            windowed,
            forked,
            "compiled request"
        );
        Ok(mq)
    }

    fn title(&self, field_id: &str) -> String {
        self.catalog
            .field_by_id(field_id)
            .map_or_else(|| field_id.to_string(), |f| f.title.clone())
    }

    fn item_info(
        &self,
        inliner: &mut FieldInliner,
        item: &SpecItem,
        alias: String,
    ) -> Result<CompiledFormulaInfo, PlanningError> {
        let field = self.catalog.resolve(&FieldSelector::Id(item.field_id.clone()))?;
        let formula = inliner.inline(field)?;
        let formula = match item.wrapper {
            Some(wrapper) => wrap(&formula, wrapper),
            None => formula,
        };
        Ok(CompiledFormulaInfo::new(formula, alias)
            .with_field_id(&item.field_id)
            .with_wrapper(item.wrapper))
    }

    fn filter_info(
        &self,
        inliner: &mut FieldInliner,
        filter: &FilterItem,
        alias: String,
    ) -> Result<CompiledFormulaInfo, PlanningError> {
        let field = self.item_info(inliner, &filter.item, alias)?;
        let invalid = || PlanningError::InvalidFilter {
            field: self.title(&filter.item.field_id),
            operation: format!("{:?}", filter.operation),
        };
        let formula = filter_formula(&field.formula, filter.operation, &filter.values)
            .ok_or_else(invalid)?;
        Ok(field.map_formula(Arc::new(formula)))
    }

    fn is_window_call(&self, call: &FuncCall) -> bool {
        self.registry
            .preferred(&call.name, call.grouping.is_some())
            .map_or(false, |f| f.is_window() || f.is_lookup())
    }

    fn is_aggregate_call(&self, call: &FuncCall) -> bool {
        self.registry
            .preferred(&call.name, call.grouping.is_some())
            .map_or(false, |f| f.is_aggregate())
    }

    fn any_call(&self, formula: &Formula, id: NodeId, pred: impl Fn(&FuncCall) -> bool) -> bool {
        let mut found = false;
        formula.visit_pre(id, &mut |_, kind| {
            if let NodeKind::FuncCall(call) = kind {
                found |= pred(call);
            }
        });
        found
    }

    /// Reports whether the subtree at `id` calls a window or lookup function.
    fn has_windows(&self, formula: &Formula, id: NodeId) -> bool {
        self.any_call(formula, id, |call| self.is_window_call(call))
    }

    fn has_aggregates(&self, formula: &Formula) -> bool {
        self.any_call(formula, formula.root(), |call| self.is_aggregate_call(call))
    }

    /// Reports whether the subtree at `id` has an aggregate call with a level
    /// of detail other than the query's.
    fn has_lod(&self, formula: &Formula, id: NodeId) -> bool {
        self.any_call(formula, id, |call| {
            self.is_aggregate_call(call) && changes_level(call)
        })
    }

    fn joined_from<'i, I>(&self, infos: I) -> Result<(JoinedFrom, Vec<JoinOnCondition>), PlanningError>
    where
        I: IntoIterator<Item = &'i CompiledFormulaInfo>,
    {
        let required: BTreeSet<String> = infos
            .into_iter()
            .flat_map(|info| info.avatar_ids.iter().cloned())
            .collect();
        let plan = self.catalog.join_plan(&required)?;
        let froms = plan
            .iter()
            .map(|(avatar, _)| FromObject::Avatar {
                id: avatar.id.clone(),
                table: avatar.table.clone(),
            })
            .collect();
        let join_on = plan
            .iter()
            .filter_map(|(_, relation)| {
                relation.map(|r| JoinOnCondition {
                    left_from_id: r.left_avatar_id.clone(),
                    right_from_id: r.right_avatar_id.clone(),
                    join_type: r.join_type,
                    columns: r.conditions.clone(),
                })
            })
            .collect();
        let joined_from = JoinedFrom {
            root_from_id: self.catalog.root_avatar_id.clone(),
            froms,
        };
        Ok((joined_from, join_on))
    }

    fn compile_single(&self, parts: QueryParts) -> Result<CompiledQuery, PlanningError> {
        let (joined_from, join_on) = self.joined_from(parts.all())?;
        let mut query = CompiledQuery::new(TOP_QUERY_ID, QueryLevel::SourceDb, joined_from);
        query.join_on = join_on;
        query.dimensions = parts.group_by.clone();
        query.select = parts.select;
        query.group_by = parts.group_by;
        query.order_by = parts.order_by;
        query.filters = parts.filters;
        query.limit = parts.limit;
        query.offset = parts.offset;
        Ok(query)
    }

    fn compile_split(
        &self,
        parts: QueryParts,
        spec: &QuerySpec,
    ) -> Result<CompiledMultiQuery, PlanningError> {
        let mut lifted = LiftedColumns::default();
        let mut split = SplitQueries::default();

        // Dimensions are computed and grouped by in the base query.
        let mut base_dims = vec![];
        let mut level = vec![];
        for (i, dim) in parts.group_by.iter().enumerate() {
            let alias = format!("dim_{}", i);
            let extract = dim.formula.extract(dim.formula.root());
            if !level.iter().any(|d: &LevelDim| d.extract == extract) {
                level.push(LevelDim {
                    extract: extract.clone(),
                    formula: Arc::clone(&dim.formula),
                });
            }
            lifted.insert(extract, &alias);
            base_dims.push(CompiledFormulaInfo {
                alias,
                ..dim.clone()
            });
        }

        // Filters on fields listed in a BEFORE FILTER BY clause apply after
        // the windows are computed, if the field is a dimension.
        let mut bfb_titles = BTreeSet::new();
        for info in parts.select.iter().chain(parts.order_by.iter().map(|o| &o.info)) {
            info.formula.visit_pre(info.formula.root(), &mut |_, kind| {
                if let NodeKind::FuncCall(call) = kind {
                    bfb_titles.extend(call.before_filter_by.iter().cloned());
                }
            });
        }
        let filter_titles: Vec<String> = spec
            .filters
            .iter()
            .map(|item| self.title(&item.item.field_id))
            .collect();
        let mut base_filters = vec![];
        let mut top_filters = vec![];
        for (filter, title) in parts.filters.iter().zip(&filter_titles) {
            let lifted_filter = replace_nodes(&filter.formula, &lifted.dimension_replacements());
            let reads_base = lifted_filter
                .field_names(lifted_filter.root())
                .iter()
                .all(|n| split_qualified(n).map_or(false, |(from, _)| from == BASE_QUERY_ID));
            if bfb_titles.contains(title) && reads_base {
                top_filters.push(filter.map_formula(lifted_filter));
            } else {
                base_filters.push(filter.clone());
            }
        }

        // Aggregates with a level of detail of their own are computed by
        // separate queries and joined onto the base query.
        let mut forks = vec![];
        let mut fork_replacements = BTreeMap::new();
        for info in parts.select.iter().chain(parts.order_by.iter().map(|o| &o.info)) {
            let field = info
                .original_field_id
                .as_deref()
                .map_or_else(|| info.alias.clone(), |id| self.title(id));
            let mut roots = vec![];
            self.outermost_aggregates(&info.formula, info.formula.root(), &mut roots);
            for id in roots {
                let extract = info.formula.extract(id);
                if fork_replacements.contains_key(&extract) || !self.has_lod(&info.formula, id) {
                    continue;
                }
                let NodeKind::FuncCall(call) = info.formula.kind(id) else {
                    continue;
                };
                let fork_level = lod_level(&info.formula, call, &level);
                if !is_sublevel(&fork_level, &level) {
                    return Err(PlanningError::LodDimensions { field });
                }
                // Filters the aggregate is computed before are left out.
                let filters: Vec<_> = parts
                    .filters
                    .iter()
                    .zip(&filter_titles)
                    .filter(|(filter, title)| {
                        !call.before_filter_by.contains(*title)
                            && !self.has_aggregates(&filter.formula)
                    })
                    .map(|(filter, _)| filter.clone())
                    .collect();
                let fork = self.level_query(
                    &mut split,
                    &field,
                    &[(Arc::clone(&info.formula), id)],
                    &fork_level,
                    &filters,
                )?;
                let column = Formula::field(qualified(&fork.id, &fork.columns[0]));
                fork_replacements.insert(extract, Arc::new(column));
                forks.push(fork);
            }
        }
        let fork_ids: BTreeSet<&str> = forks.iter().map(|f| f.id.as_str()).collect();

        // Everything else is lifted subexpression by subexpression.
        let mut lift_all = |info: &CompiledFormulaInfo| -> CompiledFormulaInfo {
            let formula = replace_nodes(&info.formula, &fork_replacements);
            let mut roots = vec![];
            self.liftable_subtrees(&formula, formula.root(), &fork_ids, &mut roots);
            for id in roots {
                let extract = formula.extract(id);
                if !lifted.contains(&extract) {
                    lifted.lift(extract, subtree(&formula, id));
                }
            }
            info.map_formula(replace_nodes(&formula, &lifted.replacements()))
        };
        let mut select: Vec<_> = parts.select.iter().map(&mut lift_all).collect();
        let mut order_by: Vec<_> = parts
            .order_by
            .iter()
            .map(|o| CompiledOrderItem {
                info: lift_all(&o.info),
                direction: o.direction,
            })
            .collect();

        let mut base_select = base_dims.clone();
        base_select.extend(lifted.columns());
        let has_base = !base_select.is_empty() || forks.is_empty();
        let mut queries = vec![];
        let mut froms = vec![];
        let mut join_on = vec![];
        if has_base {
            let (joined_from, base_join_on) =
                self.joined_from(base_select.iter().chain(&base_filters))?;
            let mut base = CompiledQuery::new(BASE_QUERY_ID, QueryLevel::SourceDb, joined_from);
            base.join_on = base_join_on;
            base.select = base_select;
            base.group_by = base_dims.clone();
            base.dimensions = base_dims.clone();
            base.filters = base_filters;
            queries.push(base);
            froms.push(FromObject::Subquery {
                query_id: BASE_QUERY_ID.into(),
            });
        }
        queries.append(&mut split.queries);
        for fork in &forks {
            froms.push(FromObject::Subquery {
                query_id: fork.id.clone(),
            });
            // Forks without dimensions hold a single row and are cross joined.
            let columns: Vec<_> = fork
                .dims
                .iter()
                .filter_map(|(extract, alias)| {
                    Some(JoinCondition {
                        left_column: lifted.dimension_alias(extract)?.to_string(),
                        right_column: alias.clone(),
                    })
                })
                .collect();
            if has_base && !columns.is_empty() {
                join_on.push(JoinOnCondition {
                    left_from_id: BASE_QUERY_ID.into(),
                    right_from_id: fork.id.clone(),
                    join_type: JoinType::Left,
                    columns,
                });
            }
        }
        let mut joined_from = JoinedFrom {
            root_from_id: froms[0].id().to_string(),
            froms,
        };
        let mut dimensions: Vec<_> = if has_base {
            base_dims
                .iter()
                .map(|dim| {
                    CompiledFormulaInfo::new(
                        Arc::new(Formula::field(qualified(BASE_QUERY_ID, &dim.alias))),
                        dim.alias.clone(),
                    )
                })
                .collect()
        } else {
            vec![]
        };

        // Windows over windows are computed one nesting level per query.
        loop {
            let depth = select
                .iter()
                .chain(order_by.iter().map(|o| &o.info))
                .map(|info| self.window_depth(&info.formula, info.formula.root()))
                .max()
                .unwrap_or(0);
            if depth <= 1 {
                break;
            }
            let id = split.next_id();
            let dim_names: BTreeSet<String> = dimensions
                .iter()
                .flat_map(|d| d.formula.field_names(d.formula.root()))
                .collect();
            let mut columns: Vec<(Extract, Arc<Formula>, String)> = vec![];
            let mut lift_level = |info: &CompiledFormulaInfo| {
                let mut roots = vec![];
                self.window_level_subtrees(&info.formula, info.formula.root(), &dim_names, &mut roots);
                for root in roots {
                    let extract = info.formula.extract(root);
                    if !columns.iter().any(|(e, _, _)| *e == extract) {
                        let alias = format!("win_{}", columns.len());
                        columns.push((extract, subtree(&info.formula, root), alias));
                    }
                }
            };
            for info in select.iter().chain(order_by.iter().map(|o| &o.info)) {
                lift_level(info);
            }

            let mut query = CompiledQuery::new(&id, QueryLevel::SourceDb, joined_from);
            query.join_on = std::mem::take(&mut join_on);
            query.select = dimensions.clone();
            query.select.extend(
                columns
                    .iter()
                    .map(|(_, formula, alias)| CompiledFormulaInfo::new(Arc::clone(formula), alias.clone())),
            );
            // Windows without an ORDER BY clause follow the request's ordering.
            query.order_by = order_by
                .iter()
                .filter(|o| self.window_depth(&o.info.formula, o.info.formula.root()) == 0)
                .cloned()
                .collect();
            query.dimensions = dimensions.clone();
            queries.push(query);

            let mut replacements = BTreeMap::new();
            for (extract, _, alias) in &columns {
                replacements.insert(extract.clone(), Arc::new(Formula::field(qualified(&id, alias))));
            }
            for dim in &dimensions {
                let field = Formula::field(qualified(&id, &dim.alias));
                replacements.insert(dim.formula.extract(dim.formula.root()), Arc::new(field));
            }
            let remap = |info: &CompiledFormulaInfo| {
                info.map_formula(replace_nodes(&info.formula, &replacements))
            };
            select = select.iter().map(&remap).collect();
            for o in &mut order_by {
                o.info = remap(&o.info);
            }
            top_filters = top_filters.iter().map(&remap).collect();
            dimensions = dimensions
                .iter()
                .map(|dim| {
                    CompiledFormulaInfo::new(
                        Arc::new(Formula::field(qualified(&id, &dim.alias))),
                        dim.alias.clone(),
                    )
                })
                .collect();
            joined_from = JoinedFrom::single(FromObject::Subquery { query_id: id });
        }

        let mut top = CompiledQuery::new(TOP_QUERY_ID, QueryLevel::SourceDb, joined_from);
        top.join_on = join_on;
        top.select = select
            .into_iter()
            .map(|info| CompiledFormulaInfo { wrapper: None, ..info })
            .collect();
        top.order_by = order_by;
        top.filters = top_filters;
        top.dimensions = dimensions;
        top.limit = parts.limit;
        top.offset = parts.offset;
        queries.push(top);

        Ok(CompiledMultiQuery::new(queries))
    }

    /// Computes the aggregate calls `nodes` at `level`, in a query grouped
    /// by the level's dimensions. The calls' own level of detail clauses are
    /// dropped.
    ///
    /// Aggregates nested inside the calls are computed first, by a query at
    /// their own level, which must be the same for all of them and contain
    /// `level`.
    fn level_query(
        &self,
        split: &mut SplitQueries,
        field: &str,
        nodes: &[(Arc<Formula>, NodeId)],
        level: &[LevelDim],
        filters: &[CompiledFormulaInfo],
    ) -> Result<LevelQuery, PlanningError> {
        maybe_grow(|| {
            let inconsistent = || PlanningError::InconsistentAggregation {
                field: field.to_string(),
            };
            let computed: Vec<_> = nodes.iter().map(|(f, id)| without_lod(f, *id)).collect();

            let mut inner: Vec<(Arc<Formula>, NodeId)> = vec![];
            let mut inner_level: Option<Vec<LevelDim>> = None;
            for formula in &computed {
                let mut roots = vec![];
                for child in formula.kind(formula.root()).children() {
                    self.outermost_aggregates(formula, child, &mut roots);
                }
                for id in roots {
                    let NodeKind::FuncCall(call) = formula.kind(id) else {
                        continue;
                    };
                    let this_level = lod_level(formula, call, level);
                    if let Some(existing) = &inner_level {
                        if !same_level(existing, &this_level) {
                            return Err(inconsistent());
                        }
                    } else {
                        inner_level = Some(this_level);
                    }
                    let extract = formula.extract(id);
                    if !inner.iter().any(|(f, i)| f.extract(*i) == extract) {
                        inner.push((Arc::clone(formula), id));
                    }
                }
            }

            let dim_alias = |j: usize| format!("dim_{}", j);
            let (joined_from, join_on, dims, values, filters) = match inner_level {
                None => {
                    let dims: Vec<_> = level
                        .iter()
                        .enumerate()
                        .map(|(j, d)| CompiledFormulaInfo::new(Arc::clone(&d.formula), dim_alias(j)))
                        .collect();
                    let values: Vec<_> = computed
                        .iter()
                        .enumerate()
                        .map(|(k, f)| CompiledFormulaInfo::new(Arc::clone(f), format!("agg_{}", k)))
                        .collect();
                    let (joined_from, join_on) =
                        self.joined_from(dims.iter().chain(&values).chain(filters))?;
                    (joined_from, join_on, dims, values, filters.to_vec())
                }
                Some(inner_level) => {
                    if !is_sublevel(level, &inner_level) {
                        return Err(PlanningError::LodDimensions {
                            field: field.to_string(),
                        });
                    }
                    let source = self.level_query(split, field, &inner, &inner_level, filters)?;
                    let mut replacements = BTreeMap::new();
                    for ((formula, id), column) in inner.iter().zip(&source.columns) {
                        let column = Formula::field(qualified(&source.id, column));
                        replacements.insert(formula.extract(*id), Arc::new(column));
                    }
                    for (extract, alias) in &source.dims {
                        let column = Formula::field(qualified(&source.id, alias));
                        replacements.insert(extract.clone(), Arc::new(column));
                    }
                    let dims: Vec<_> = level
                        .iter()
                        .enumerate()
                        .map(|(j, d)| {
                            CompiledFormulaInfo::new(replace_nodes(&d.formula, &replacements), dim_alias(j))
                        })
                        .collect();
                    let mut values = vec![];
                    for (k, formula) in computed.iter().enumerate() {
                        let value = replace_nodes(formula, &replacements);
                        // Whatever is left outside the nested aggregates must
                        // be a dimension of their level.
                        let reads_source = value
                            .field_names(value.root())
                            .iter()
                            .all(|n| split_qualified(n).map_or(false, |(from, _)| from == source.id));
                        if !reads_source {
                            return Err(inconsistent());
                        }
                        values.push(CompiledFormulaInfo::new(value, format!("agg_{}", k)));
                    }
                    let joined_from = JoinedFrom::single(FromObject::Subquery {
                        query_id: source.id,
                    });
                    (joined_from, vec![], dims, values, vec![])
                }
            };

            let id = split.next_id();
            let mut query = CompiledQuery::new(&id, QueryLevel::SourceDb, joined_from);
            query.join_on = join_on;
            query.select = dims.iter().cloned().chain(values.iter().cloned()).collect();
            query.group_by = dims.clone();
            query.dimensions = dims.clone();
            query.filters = filters;
            split.queries.push(query);
            Ok(LevelQuery {
                id,
                dims: level
                    .iter()
                    .zip(&dims)
                    .map(|(d, info)| (d.extract.clone(), info.alias.clone()))
                    .collect(),
                columns: values.into_iter().map(|v| v.alias).collect(),
            })
        })
    }

    /// Collects the maximal subtrees under `id` that call no window or
    /// lookup function and read at least one field, none of them a column
    /// of `forks`.
    fn liftable_subtrees(
        &self,
        formula: &Formula,
        id: NodeId,
        forks: &BTreeSet<&str>,
        out: &mut Vec<NodeId>,
    ) {
        maybe_grow(|| {
            if !self.has_windows(formula, id) {
                let names = formula.field_names(id);
                let reads_fork = names.iter().any(|n| {
                    split_qualified(n).map_or(false, |(from, _)| forks.contains(from))
                });
                if !reads_fork {
                    if !names.is_empty() {
                        out.push(id);
                    }
                    return;
                }
            }
            for child in formula.kind(id).children() {
                self.liftable_subtrees(formula, child, forks, out);
            }
        })
    }

    /// Collects the maximal subtrees under `id` nested at most one window
    /// deep that call a window function or read a column other than
    /// `dimensions`.
    fn window_level_subtrees(
        &self,
        formula: &Formula,
        id: NodeId,
        dimensions: &BTreeSet<String>,
        out: &mut Vec<NodeId>,
    ) {
        maybe_grow(|| {
            let depth = self.window_depth(formula, id);
            if depth <= 1 {
                let names = formula.field_names(id);
                if depth == 1 || names.iter().any(|n| !dimensions.contains(n)) {
                    out.push(id);
                }
                return;
            }
            for child in formula.kind(id).children() {
                self.window_level_subtrees(formula, child, dimensions, out);
            }
        })
    }

    /// How many window or lookup calls deep the subtree at `id` nests.
    fn window_depth(&self, formula: &Formula, id: NodeId) -> usize {
        maybe_grow(|| {
            let kind = formula.kind(id);
            let own = match kind {
                NodeKind::FuncCall(call) => usize::from(self.is_window_call(call)),
                _ => 0,
            };
            let nested = kind
                .children()
                .into_iter()
                .map(|child| self.window_depth(formula, child))
                .max()
                .unwrap_or(0);
            own + nested
        })
    }

    /// Collects the aggregate calls under `id` not nested in another
    /// aggregate call.
    fn outermost_aggregates(&self, formula: &Formula, id: NodeId, out: &mut Vec<NodeId>) {
        maybe_grow(|| {
            let kind = formula.kind(id);
            if let NodeKind::FuncCall(call) = kind {
                if self.is_aggregate_call(call) {
                    out.push(id);
                    return;
                }
            }
            for child in kind.children() {
                self.outermost_aggregates(formula, child, out);
            }
        })
    }
}

struct QueryParts {
    select: Vec<CompiledFormulaInfo>,
    group_by: Vec<CompiledFormulaInfo>,
    order_by: Vec<CompiledOrderItem>,
    filters: Vec<CompiledFormulaInfo>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryParts {
    fn all(&self) -> impl Iterator<Item = &CompiledFormulaInfo> {
        self.select
            .iter()
            .chain(&self.group_by)
            .chain(self.order_by.iter().map(|o| &o.info))
            .chain(&self.filters)
    }
}

/// The columns of a base query and the subtrees they replace in the top
/// query.
#[derive(Default)]
struct LiftedColumns {
    dimensions: BTreeMap<Extract, String>,
    lifted: Vec<(Extract, Arc<Formula>, String)>,
}

impl LiftedColumns {
    fn insert(&mut self, extract: Extract, alias: &str) {
        self.dimensions.entry(extract).or_insert_with(|| alias.to_string());
    }

    fn dimension_alias(&self, extract: &Extract) -> Option<&str> {
        self.dimensions.get(extract).map(String::as_str)
    }

    fn contains(&self, extract: &Extract) -> bool {
        self.dimensions.contains_key(extract) || self.lifted.iter().any(|(e, _, _)| e == extract)
    }

    fn lift(&mut self, extract: Extract, formula: Arc<Formula>) {
        let alias = format!("lift_{}", self.lifted.len());
        self.lifted.push((extract, formula, alias));
    }

    fn dimension_replacements(&self) -> BTreeMap<Extract, Arc<Formula>> {
        self.dimensions
            .iter()
            .map(|(extract, alias)| {
                let field = Formula::field(qualified(BASE_QUERY_ID, alias));
                (extract.clone(), Arc::new(field))
            })
            .collect()
    }

    fn replacements(&self) -> BTreeMap<Extract, Arc<Formula>> {
        let mut out = self.dimension_replacements();
        for (extract, _, alias) in &self.lifted {
            let field = Formula::field(qualified(BASE_QUERY_ID, alias));
            out.insert(extract.clone(), Arc::new(field));
        }
        out
    }

    fn columns(&self) -> Vec<CompiledFormulaInfo> {
        self.lifted
            .iter()
            .map(|(_, formula, alias)| CompiledFormulaInfo::new(Arc::clone(formula), alias.clone()))
            .collect()
    }
}

/// Queries split off a request besides its base and top queries.
#[derive(Default)]
struct SplitQueries {
    queries: Vec<CompiledQuery>,
    last_id: usize,
}

impl SplitQueries {
    fn next_id(&mut self) -> String {
        self.last_id += 1;
        format!("{}_{}", TOP_QUERY_ID, self.last_id)
    }
}

/// A dimension of a level of detail.
#[derive(Clone)]
struct LevelDim {
    extract: Extract,
    formula: Arc<Formula>,
}

/// A query computing aggregates at one level of detail.
struct LevelQuery {
    id: String,
    /// The extract and column of each dimension of the level.
    dims: Vec<(Extract, String)>,
    /// The column of each computed aggregate.
    columns: Vec<String>,
}

/// Reports whether the call's level of detail clause differs from
/// inheriting the level of its context.
fn changes_level(call: &FuncCall) -> bool {
    match &call.lod {
        None => false,
        Some(LodSpecifier::Fixed(_)) => true,
        Some(LodSpecifier::Include(dims) | LodSpecifier::Exclude(dims)) => !dims.is_empty(),
    }
}

/// The level of detail `call` is computed at, inside a context at `parent`.
fn lod_level(formula: &Formula, call: &FuncCall, parent: &[LevelDim]) -> Vec<LevelDim> {
    let listed = |ids: &[NodeId]| -> Vec<LevelDim> {
        ids.iter()
            .map(|id| LevelDim {
                extract: formula.extract(*id),
                formula: subtree(formula, *id),
            })
            .collect()
    };
    let mut level: Vec<LevelDim> = vec![];
    let mut add = |dims: Vec<LevelDim>| {
        for dim in dims {
            if !level.iter().any(|d| d.extract == dim.extract) {
                level.push(dim);
            }
        }
    };
    match &call.lod {
        None => add(parent.to_vec()),
        Some(LodSpecifier::Fixed(ids)) => add(listed(ids)),
        Some(LodSpecifier::Include(ids)) => {
            add(parent.to_vec());
            add(listed(ids));
        }
        Some(LodSpecifier::Exclude(ids)) => {
            let excluded: BTreeSet<Extract> = ids.iter().map(|id| formula.extract(*id)).collect();
            add(parent.iter().filter(|d| !excluded.contains(&d.extract)).cloned().collect());
        }
    }
    level
}

/// Reports whether every dimension of `level` is a dimension of `of`.
fn is_sublevel(level: &[LevelDim], of: &[LevelDim]) -> bool {
    level.iter().all(|d| of.iter().any(|o| o.extract == d.extract))
}

fn same_level(a: &[LevelDim], b: &[LevelDim]) -> bool {
    is_sublevel(a, b) && is_sublevel(b, a)
}

/// Copies the subtree at `id` into a formula of its own.
fn subtree(formula: &Formula, id: NodeId) -> Arc<Formula> {
    let mut builder = FormulaBuilder::new();
    let root = builder.import(formula, id);
    Arc::new(builder.finish(root))
}

/// Copies the call at `id`, dropping its level of detail clause.
fn without_lod(formula: &Formula, id: NodeId) -> Arc<Formula> {
    let mut kind = formula.kind(id).clone();
    if let NodeKind::FuncCall(call) = &mut kind {
        call.lod = None;
    }
    let mut builder = FormulaBuilder::new();
    let kind = kind.map_children(|child| builder.import(formula, child));
    let root = builder.push(kind, formula.node(id).position);
    Arc::new(builder.finish(root))
}

/// Replaces field references with the formulas they stand for.
struct FieldInliner<'a> {
    catalog: &'a DatasetCatalog,
    parse_cache: &'a ParseCache,
    /// Inlined formulas by field id.
    memo: BTreeMap<String, Arc<Formula>>,
    /// The ids of the fields being inlined, outermost first.
    stack: Vec<String>,
    recursion_guard: RecursionGuard,
}

impl CheckedRecursion for FieldInliner<'_> {
    fn recursion_guard(&self) -> &RecursionGuard {
        &self.recursion_guard
    }
}

impl<'a> FieldInliner<'a> {
    fn new(catalog: &'a DatasetCatalog, parse_cache: &'a ParseCache) -> FieldInliner<'a> {
        FieldInliner {
            catalog,
            parse_cache,
            memo: BTreeMap::new(),
            stack: vec![],
            recursion_guard: RecursionGuard::with_limit(RECURSION_LIMIT),
        }
    }

    fn inline(&mut self, field: &FieldDef) -> Result<Arc<Formula>, PlanningError> {
        if let Some(formula) = self.memo.get(&field.id) {
            return Ok(Arc::clone(formula));
        }
        if self.stack.contains(&field.id) {
            return Err(PlanningError::FieldCycle {
                field: field.title.clone(),
            });
        }
        let inlined = match &field.calc {
            CalcMode::Direct { avatar_id, column } => {
                Arc::new(Formula::field(qualified(avatar_id, column)))
            }
            CalcMode::Formula { formula } => {
                let parsed =
                    self.parse_cache
                        .parse(formula)
                        .map_err(|source| PlanningError::Parse {
                            field: field.title.clone(),
                            source,
                        })?;
                self.stack.push(field.id.clone());
                let result = self.checked_recur_mut(|inliner| inliner.inline_references(&parsed));
                self.stack.pop();
                result?
            }
        };
        self.memo.insert(field.id.clone(), Arc::clone(&inlined));
        Ok(inlined)
    }

    fn inline_references(&mut self, parsed: &Arc<Formula>) -> Result<Arc<Formula>, PlanningError> {
        let catalog = self.catalog;
        let mut replacements = BTreeMap::new();
        for name in parsed.field_names(parsed.root()) {
            let referenced = catalog
                .field_by_title(&name)
                .ok_or_else(|| PlanningError::UnknownField {
                    field: format!("[{}]", name),
                })?;
            let inlined = self.inline(referenced)?;
            let reference = Formula::field(name);
            replacements.insert(reference.extract(reference.root()), inlined);
        }
        Ok(replace_nodes(parsed, &replacements))
    }
}

/// Wraps `formula` in an array prefix.
fn wrap(formula: &Formula, wrapper: ArrayPrefixSelectWrapper) -> Arc<Formula> {
    let mut builder = FormulaBuilder::new();
    let inner = builder.import(formula, formula.root());
    let length = i64::try_from(wrapper.length).unwrap_or(i64::MAX);
    let length = builder.literal(Literal::Integer(length));
    let root = builder.call("slice", vec![inner, length]);
    Arc::new(builder.finish(root))
}

/// Builds the condition `operation` applies to `field`, or `None` if the
/// values cannot be written as formula literals.
fn filter_formula(field: &Formula, operation: FilterOp, values: &[Value]) -> Option<Formula> {
    let mut builder = FormulaBuilder::new();
    let x = builder.import(field, field.root());
    let mut values = values
        .iter()
        .map(|v| value_node(&mut builder, v))
        .collect::<Option<Vec<_>>>()?
        .into_iter();
    let mut value = || values.next();
    let root = match operation {
        FilterOp::Eq => builder.binary("==", x, value()?),
        FilterOp::Ne => builder.binary("!=", x, value()?),
        FilterOp::Gt => builder.binary(">", x, value()?),
        FilterOp::Gte => builder.binary(">=", x, value()?),
        FilterOp::Lt => builder.binary("<", x, value()?),
        FilterOp::Lte => builder.binary("<=", x, value()?),
        FilterOp::In | FilterOp::Nin => {
            let items: Vec<_> = std::iter::from_fn(&mut value).collect();
            let list = builder.push(NodeKind::ExprList(items), 0);
            let name = if operation == FilterOp::In { "in" } else { "notin" };
            builder.binary(name, x, list)
        }
        FilterOp::Isnull => builder.unary("isnull", x),
        FilterOp::Isnotnull => {
            let isnull = builder.unary("isnull", x);
            builder.unary("not", isnull)
        }
        FilterOp::Startswith => builder.call("startswith", vec![x, value()?]),
        FilterOp::Contains => builder.call("contains", vec![x, value()?]),
        FilterOp::Between => {
            let (low, high) = (value()?, value()?);
            builder.push(
                NodeKind::Ternary {
                    name: "between".into(),
                    first: x,
                    second: low,
                    third: high,
                },
                0,
            )
        }
    };
    Some(builder.finish(root))
}

fn value_node(builder: &mut FormulaBuilder, value: &Value) -> Option<NodeId> {
    let literal = match value {
        Value::Null => return Some(builder.null()),
        Value::Bool(b) => Literal::Boolean(*b),
        Value::Int(i) => Literal::Integer(*i),
        Value::Float(f) => Literal::Float(*f),
        Value::String(s) => Literal::String(s.clone()),
        Value::Date(d) => Literal::Date(*d),
        Value::Datetime(dt) => Literal::Datetime(*dt),
        Value::Array(items) => {
            let constructor = match value.natural_type() {
                DataType::ArrayInt => "arr_int",
                DataType::ArrayStr => "arr_str",
                _ => return None,
            };
            let args = items
                .iter()
                .map(|item| value_node(builder, item))
                .collect::<Option<Vec<_>>>()?;
            return Some(builder.call(constructor, args));
        }
    };
    Some(builder.literal(literal))
}

#[cfg(test)]
pub(crate) mod tests {
    use dl_dyncfg::ConfigSet;
    use dl_formula_parser::ParseCacheMetrics;
    use dl_ore::metrics::MetricsRegistry;

    use super::*;
    use crate::catalog::tests::catalog;
    use crate::legend::{make_legend, RawQuerySpec};
    use crate::formalizer::make_query_spec;

    pub(crate) fn parse_cache() -> ParseCache {
        let configs = dl_formula_parser::all_dyncfgs(ConfigSet::default());
        ParseCache::new(&configs, ParseCacheMetrics::register_with(&MetricsRegistry::new()))
    }

    /// Compiles a request over the test catalog with extra formula fields.
    pub(crate) fn compile_request(
        extra_fields: &[(&str, &str)],
        request: &str,
    ) -> Result<CompiledMultiQuery, PlanningError> {
        compile_request_over(catalog(), extra_fields, request)
    }

    /// Compiles a request over `catalog` with extra formula fields.
    pub(crate) fn compile_request_over(
        mut catalog: DatasetCatalog,
        extra_fields: &[(&str, &str)],
        request: &str,
    ) -> Result<CompiledMultiQuery, PlanningError> {
        for (title, formula) in extra_fields {
            catalog.fields.push(FieldDef {
                id: format!("id_{}", title),
                title: title.to_string(),
                calc: CalcMode::Formula {
                    formula: formula.to_string(),
                },
                data_type: DataType::Float,
                params: Default::default(),
            });
        }
        let raw: RawQuerySpec = serde_json::from_str(request).unwrap();
        let legend = make_legend(&raw, &catalog)?;
        let registry = Registry::builtin();
        let spec = make_query_spec(raw.single_block()?, &legend, &catalog, &registry)?;
        let cache = parse_cache();
        Compiler::new(&catalog, &registry, &cache).compile(&spec)
    }

    fn formulas(infos: &[CompiledFormulaInfo]) -> Vec<String> {
        infos.iter().map(|i| format!("{}={}", i.alias, i.formula)).collect()
    }

    #[test]
    fn single_level() {
        let mq = compile_request(
            &[],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Double"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        assert_eq!(mq.ids().collect::<Vec<_>>(), [TOP_QUERY_ID]);
        let query = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(query.level, QueryLevel::SourceDb);
        assert_eq!(
            formulas(&query.select),
            [
                r#"res_1=(field "regions.name")"#,
                r#"res_2=(* (field "orders.sales") (lit 2))"#,
            ]
        );
        let froms: Vec<_> = query.joined_from.froms.iter().map(|f| f.id()).collect();
        assert_eq!(froms, ["orders", "cities", "regions"]);
        assert_eq!(query.join_on.len(), 2);
        assert_eq!(query.select[1].original_field_id.as_deref(), Some("f3"));
    }

    #[test]
    fn unused_avatars_are_not_joined() {
        let mq = compile_request(
            &[],
            r#"{
                "items": [{"id": 1, "field": {"title": "Sales"}, "role": "measure"}],
                "blocks": [{"block_id": 0, "legend_item_ids": [1]}]
            }"#,
        )
        .unwrap();
        let query = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(query.joined_from.froms.len(), 1);
        assert!(query.join_on.is_empty());
    }

    #[test]
    fn field_cycles() {
        let err = compile_request(
            &[("A", "[B] + 1"), ("B", "[A] * 2")],
            r#"{
                "items": [{"id": 1, "field": {"title": "A"}, "role": "measure"}],
                "blocks": [{"block_id": 0, "legend_item_ids": [1]}]
            }"#,
        )
        .unwrap_err();
        assert_eq!(err, PlanningError::FieldCycle { field: "A".into() });
    }

    #[test]
    fn windows_compile_to_two_levels() {
        let mq = compile_request(
            &[("Running", "RSUM(SUM([Sales]))")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Running"}, "role": "measure"},
                    {"id": 3, "field": {"title": "Region"}, "role": "order_by"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3], "limit": 5}]
            }"#,
        )
        .unwrap();
        assert_eq!(mq.ids().collect::<Vec<_>>(), [BASE_QUERY_ID, TOP_QUERY_ID]);
        assert_eq!(mq.top_queries(), [TOP_QUERY_ID]);

        let base = mq.get(BASE_QUERY_ID).unwrap();
        assert_eq!(
            formulas(&base.select),
            [
                r#"dim_0=(field "regions.name")"#,
                r#"lift_0=(call sum ((field "orders.sales")))"#,
            ]
        );
        assert_eq!(base.group_by.len(), 1);
        assert_eq!(base.limit, None);

        let top = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(
            formulas(&top.select),
            [
                r#"res_1=(field "qq_0.dim_0")"#,
                r#"res_2=(call rsum ((field "qq_0.lift_0")))"#,
            ]
        );
        assert_eq!(top.order_by[0].info.formula.to_string(), r#"(field "qq_0.dim_0")"#);
        assert!(top.group_by.is_empty());
        assert_eq!(top.dimensions.len(), 1);
        assert_eq!(top.limit, Some(5));
    }

    #[test]
    fn nested_windows_get_a_query_per_level() {
        let mq = compile_request(
            &[("Twice", "RSUM(RSUM(SUM([Sales])))")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Twice"}, "role": "measure"},
                    {"id": 3, "field": {"title": "Region"}, "role": "order_by"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3]}]
            }"#,
        )
        .unwrap();
        assert_eq!(mq.ids().collect::<Vec<_>>(), [BASE_QUERY_ID, "qq_1", TOP_QUERY_ID]);

        let inner = mq.get("qq_1").unwrap();
        assert_eq!(
            formulas(&inner.select),
            [
                r#"dim_0=(field "qq_0.dim_0")"#,
                r#"win_0=(call rsum ((field "qq_0.lift_0")))"#,
            ]
        );
        assert_eq!(inner.order_by.len(), 1);
        assert_eq!(formulas(&inner.dimensions), [r#"dim_0=(field "qq_0.dim_0")"#]);

        let top = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(
            formulas(&top.select),
            [
                r#"res_1=(field "qq_1.dim_0")"#,
                r#"res_2=(call rsum ((field "qq_1.win_0")))"#,
            ]
        );
        assert_eq!(top.joined_from.root_from_id, "qq_1");
        assert_eq!(top.order_by[0].info.formula.to_string(), r#"(field "qq_1.dim_0")"#);
        assert_eq!(formulas(&top.dimensions), [r#"dim_0=(field "qq_1.dim_0")"#]);
    }

    #[test]
    fn fixed_aggregates_are_joined_on_shared_dimensions() {
        let mq = compile_request(
            &[
                ("RegionTotal", "SUM([Sales] FIXED [Region])"),
                ("Share", "SUM([Sales]) / [RegionTotal]"),
            ],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Day"}, "role": "row"},
                    {"id": 3, "field": {"title": "RegionTotal"}, "role": "measure"},
                    {"id": 4, "field": {"title": "Share"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3, 4]}]
            }"#,
        )
        .unwrap();
        assert_eq!(mq.ids().collect::<Vec<_>>(), [BASE_QUERY_ID, "qq_1", TOP_QUERY_ID]);

        let base = mq.get(BASE_QUERY_ID).unwrap();
        assert_eq!(
            formulas(&base.select),
            [
                r#"dim_0=(field "regions.name")"#,
                r#"dim_1=(field "orders.day")"#,
                r#"lift_0=(call sum ((field "orders.sales")))"#,
            ]
        );

        let fork = mq.get("qq_1").unwrap();
        assert_eq!(
            formulas(&fork.select),
            [
                r#"dim_0=(field "regions.name")"#,
                r#"agg_0=(call sum ((field "orders.sales")))"#,
            ]
        );
        assert_eq!(formulas(&fork.group_by), [r#"dim_0=(field "regions.name")"#]);
        let froms: Vec<_> = fork.joined_from.froms.iter().map(|f| f.id()).collect();
        assert_eq!(froms, ["orders", "cities", "regions"]);

        let top = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(
            formulas(&top.select),
            [
                r#"res_1=(field "qq_0.dim_0")"#,
                r#"res_2=(field "qq_0.dim_1")"#,
                r#"res_3=(field "qq_1.agg_0")"#,
                r#"res_4=(/ (field "qq_0.lift_0") (field "qq_1.agg_0"))"#,
            ]
        );
        assert!(top.group_by.is_empty());
        assert_eq!(
            top.join_on,
            [JoinOnCondition {
                left_from_id: BASE_QUERY_ID.into(),
                right_from_id: "qq_1".into(),
                join_type: JoinType::Left,
                columns: vec![JoinCondition {
                    left_column: "dim_0".into(),
                    right_column: "dim_0".into(),
                }],
            }]
        );
    }

    #[test]
    fn excluded_dimensions_and_totals() {
        let mq = compile_request(
            &[
                ("ByRegion", "SUM([Sales] EXCLUDE [Day])"),
                ("Total", "SUM([Sales] FIXED)"),
            ],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Day"}, "role": "row"},
                    {"id": 3, "field": {"title": "ByRegion"}, "role": "measure"},
                    {"id": 4, "field": {"title": "Total"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3, 4]}]
            }"#,
        )
        .unwrap();
        assert_eq!(
            mq.ids().collect::<Vec<_>>(),
            [BASE_QUERY_ID, "qq_1", "qq_2", TOP_QUERY_ID]
        );
        assert_eq!(
            formulas(&mq.get("qq_1").unwrap().group_by),
            [r#"dim_0=(field "regions.name")"#]
        );
        let total = mq.get("qq_2").unwrap();
        assert!(total.group_by.is_empty());
        assert_eq!(formulas(&total.select), [r#"agg_0=(call sum ((field "orders.sales")))"#]);

        // The total has a single row and is cross joined.
        let top = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(top.joined_from.froms.len(), 3);
        assert_eq!(top.join_on.len(), 1);
        assert_eq!(top.join_on[0].right_from_id, "qq_1");
    }

    #[test]
    fn included_dimensions_aggregate_twice() {
        let mq = compile_request(
            &[("DailyAvg", "AVG(SUM([Sales] INCLUDE [Day]))")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "DailyAvg"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        assert_eq!(
            mq.ids().collect::<Vec<_>>(),
            [BASE_QUERY_ID, "qq_1", "qq_2", TOP_QUERY_ID]
        );
        let daily = mq.get("qq_1").unwrap();
        assert_eq!(
            formulas(&daily.select),
            [
                r#"dim_0=(field "regions.name")"#,
                r#"dim_1=(field "orders.day")"#,
                r#"agg_0=(call sum ((field "orders.sales")))"#,
            ]
        );
        let averaged = mq.get("qq_2").unwrap();
        assert_eq!(
            formulas(&averaged.select),
            [
                r#"dim_0=(field "qq_1.dim_0")"#,
                r#"agg_0=(call avg ((field "qq_1.agg_0")))"#,
            ]
        );
        assert_eq!(averaged.joined_from.root_from_id, "qq_1");
        assert_eq!(averaged.group_by.len(), 1);

        let top = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(
            formulas(&top.select),
            [r#"res_1=(field "qq_0.dim_0")"#, r#"res_2=(field "qq_2.agg_0")"#]
        );
        assert_eq!(top.join_on[0].right_from_id, "qq_2");
    }

    #[test]
    fn invalid_levels_of_detail() {
        let request = |measure: &str| {
            format!(
                r#"{{
                    "items": [
                        {{"id": 1, "field": {{"title": "Region"}}, "role": "row"}},
                        {{"id": 2, "field": {{"title": "{}"}}, "role": "measure"}}
                    ],
                    "blocks": [{{"block_id": 0, "legend_item_ids": [1, 2]}}]
                }}"#,
                measure
            )
        };
        let fields = [
            ("Finer", "SUM([Sales] INCLUDE [Day])"),
            ("Mixed", "AVG(SUM([Sales] INCLUDE [Day]) + [Sales])"),
        ];
        assert_eq!(
            compile_request(&fields, &request("Finer")).unwrap_err(),
            PlanningError::LodDimensions {
                field: "Finer".into()
            }
        );
        assert_eq!(
            compile_request(&fields, &request("Mixed")).unwrap_err(),
            PlanningError::InconsistentAggregation {
                field: "Mixed".into()
            }
        );
    }

    #[test]
    fn filters() {
        let mq = compile_request(
            &[],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Sales"}, "role": "measure"},
                    {"id": 2, "field": {"title": "Region"}, "role": "filter", "operation": "IN",
                     "values": [{"t": "string", "v": "North"}, {"t": "string", "v": "South"}]},
                    {"id": 3, "field": {"title": "Sales"}, "role": "filter", "operation": "ISNOTNULL"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3]}]
            }"#,
        )
        .unwrap();
        let query = mq.get(TOP_QUERY_ID).unwrap();
        assert_eq!(
            formulas(&query.filters),
            [
                r#"flt_0=(in (field "regions.name") ((lit "North") (lit "South")))"#,
                r#"flt_1=(not (isnull (field "orders.sales")))"#,
            ]
        );
    }

    #[test]
    fn tree_prefix() {
        let mq = compile_request(
            &[("Path", "ARR_STR([Region], 'x')")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Path"}, "role": "tree", "level": 2, "prefix": ["abc"]}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1]}]
            }"#,
        )
        .unwrap();
        let query = mq.get(TOP_QUERY_ID).unwrap();
        let path = r#"(call arr_str ((field "regions.name") (lit "x")))"#;
        assert_eq!(
            query.select[0].formula.to_string(),
            format!("(call slice ({} (lit 2)))", path)
        );
        assert_eq!(query.select[0].wrapper, Some(ArrayPrefixSelectWrapper { length: 2 }));
        assert_eq!(query.group_by[0].formula, query.select[0].formula);
        assert_eq!(
            query.filters[0].formula.to_string(),
            format!(r#"(== (call slice ({} (lit 1))) (call arr_str ((lit "abc"))))"#, path)
        );
    }
}
