// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Renders compiled queries as SQL text.
//!
//! Rendering a query renders the subqueries it reads from first, either
//! inline or, when a [`FromResolver`] says so, as references to tables
//! their results were stored in. Lookup functions are expanded here into
//! self-joins of the query's source before translation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dl_formula::{
    quote_ident, translate, Dimension, Registry, SqlExpr, TranslationCtx, TranslationError,
    TypeEnvironment,
};
use dl_formula_parser::rewrite::remap_formula_obj_fields;
use dl_formula_parser::{Formula, FormulaBuilder, Literal, NodeId, NodeKind};
use dl_ore::str::separated;
use dl_repr::{DataType, DialectCombo, DialectName};
use itertools::Itertools;
use tracing::trace;

use crate::catalog::{CalcMode, DatasetCatalog, JoinType};
use crate::compiled::{
    qualified, split_qualified, CompiledFormulaInfo, CompiledMultiQuery, CompiledQuery,
    FromObject,
};
use crate::error::PlanningError;
use crate::legend::SortDirection;

/// A column of a rendered query's result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
}

/// How a subquery appears in the FROM clause of the queries reading it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FromSource {
    /// Rendered inline, as `(SELECT ...) AS id`.
    Inline,
    /// Read from a table holding the subquery's result.
    Table {
        name: String,
        columns: Vec<ColumnInfo>,
    },
}

/// Decides how each subquery is read.
pub trait FromResolver: fmt::Debug {
    fn resolve(&self, query_id: &str) -> FromSource;
}

/// Renders every subquery inline.
#[derive(Debug)]
pub struct InlineSubqueries;

impl FromResolver for InlineSubqueries {
    fn resolve(&self, _: &str) -> FromSource {
        FromSource::Inline
    }
}

/// Everything rendering depends on besides the query.
#[derive(Debug, Clone, Copy)]
pub struct RenderCtx<'a> {
    pub registry: &'a Registry,
    pub catalog: &'a DatasetCatalog,
    pub dialect: DialectCombo,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedQuery {
    pub query_id: String,
    pub sql: String,
    pub columns: Vec<ColumnInfo>,
}

/// Renders the query `query_id` of `mq`.
pub fn render_query(
    mq: &CompiledMultiQuery,
    query_id: &str,
    ctx: &RenderCtx,
    resolver: &dyn FromResolver,
) -> Result<RenderedQuery, PlanningError> {
    let query = mq.get(query_id)?;
    let rendered = Renderer {
        mq,
        query,
        ctx,
        resolver,
        family: ctx.dialect.family()?,
    }
    .render()?;
    trace!(query_id, sql = %rendered.sql, "rendered query");
    Ok(rendered)
}

struct Renderer<'a> {
    mq: &'a CompiledMultiQuery,
    query: &'a CompiledQuery,
    ctx: &'a RenderCtx<'a>,
    resolver: &'a dyn FromResolver,
    family: DialectName,
}

/// A lookup function replaced by a column of a self-join.
struct LookupJoin {
    alias: String,
    name: String,
    /// The lookup's date argument, which must be a dimension.
    date_dim: Arc<Formula>,
    shift: LookupShift,
}

enum LookupShift {
    /// `ago`: the row `amount` units before.
    Ago { unit: String, amount: i64 },
    /// `at_date`: the row at a fixed date.
    At(Arc<Formula>),
}

impl<'a> Renderer<'a> {
    fn quote(&self, ident: &str) -> String {
        quote_ident(ident, self.family)
    }

    fn translation_error(&self, source: TranslationError) -> PlanningError {
        PlanningError::Translation {
            query_id: self.query.id.clone(),
            source,
        }
    }

    /// The SQL of a FROM object without its alias, and its columns.
    fn from_source(&self, from: &FromObject) -> Result<(String, Vec<ColumnInfo>), PlanningError> {
        match from {
            FromObject::Avatar { id, table } => {
                let columns = self
                    .ctx
                    .catalog
                    .avatar_fields(id)
                    .filter_map(|field| match &field.calc {
                        CalcMode::Direct { column, .. } => Some(ColumnInfo {
                            name: column.clone(),
                            data_type: field.data_type,
                        }),
                        CalcMode::Formula { .. } => None,
                    })
                    .unique_by(|c| c.name.clone())
                    .collect();
                let table = table.split('.').map(|part| self.quote(part)).join(".");
                Ok((table, columns))
            }
            FromObject::Subquery { query_id } => match self.resolver.resolve(query_id) {
                FromSource::Inline => {
                    let child = render_query(self.mq, query_id, self.ctx, self.resolver)?;
                    Ok((format!("({})", child.sql), child.columns))
                }
                FromSource::Table { name, columns } => Ok((self.quote(&name), columns)),
            },
        }
    }

    fn render(self) -> Result<RenderedQuery, PlanningError> {
        let query = self.query;
        let mut env = TypeEnvironment::new();
        let mut sources = BTreeMap::new();
        for from in &query.joined_from.froms {
            let (source, columns) = self.from_source(from)?;
            for column in &columns {
                env.bind_column(
                    qualified(from.id(), &column.name),
                    Some(from.id()),
                    column.name.clone(),
                    column.data_type,
                );
            }
            sources.insert(from.id().to_string(), (source, columns));
        }
        let root_id = query.joined_from.root_from_id.as_str();
        let (root_source, root_columns) =
            sources
                .get(root_id)
                .cloned()
                .ok_or_else(|| PlanningError::UnresolvedFrom {
                    query_id: query.id.clone(),
                    from_id: root_id.to_string(),
                })?;

        // Lookups become columns of self-joins of the root source.
        let mut lookups = vec![];
        let mut expand = |formula: &Arc<Formula>| -> Result<Arc<Formula>, PlanningError> {
            self.expand_lookups(formula, root_id, &mut lookups)
        };
        let select = query
            .select
            .iter()
            .map(|info| Ok((expand(&info.formula)?, info.alias.as_str())))
            .collect::<Result<Vec<_>, PlanningError>>()?;
        let order_by = query
            .order_by
            .iter()
            .map(|o| Ok((expand(&o.info.formula)?, o.direction)))
            .collect::<Result<Vec<_>, PlanningError>>()?;
        for lookup in &lookups {
            for column in &root_columns {
                env.bind_column(
                    qualified(&lookup.alias, &column.name),
                    Some(&lookup.alias),
                    column.name.clone(),
                    column.data_type,
                );
            }
        }

        let base_ctx = TranslationCtx::new(self.ctx.registry, &env, self.ctx.dialect);
        let translate_with = |formula: &Formula, ctx: &TranslationCtx| {
            translate(formula, ctx).map_err(|e| self.translation_error(e))
        };

        let mut dimensions = vec![];
        for dim in &query.dimensions {
            dimensions.push(Dimension {
                extract: dim.formula.extract(dim.formula.root()),
                expr: translate_with(&dim.formula, &base_ctx)?.expr,
            });
        }
        let dim_ctx = TranslationCtx::new(self.ctx.registry, &env, self.ctx.dialect)
            .with_dimensions(dimensions.clone());

        // Windows without an ORDER BY clause follow the ordering of the
        // query, as far as it is known before windows are computed.
        let mut order_exprs = vec![];
        let mut default_window_order = vec![];
        for (formula, direction) in &order_by {
            let expr = translate_with(formula, &dim_ctx)?.expr;
            let expr = match direction {
                SortDirection::Asc => expr,
                SortDirection::Desc => expr.desc(),
            };
            if !self.has_function(formula, |f| f.is_window()) {
                default_window_order.push(expr.clone());
            }
            order_exprs.push(expr);
        }
        let ctx = TranslationCtx::new(self.ctx.registry, &env, self.ctx.dialect)
            .with_dimensions(dimensions)
            .with_order_by(default_window_order);

        let mut select_list = vec![];
        let mut columns = vec![];
        for (formula, alias) in &select {
            let typed = translate_with(formula, &ctx)?;
            select_list.push(format!("{} AS {}", typed.to_sql(self.family), self.quote(alias)));
            columns.push(ColumnInfo {
                name: alias.to_string(),
                data_type: typed.data_type.non_const(),
            });
        }

        let mut sql = format!("SELECT {} FROM {} AS {}", select_list.join(", "), root_source, self.quote(root_id));
        let mut joined = vec![root_id];
        for join in &query.join_on {
            let (source, _) = sources.get(&join.right_from_id).ok_or_else(|| {
                PlanningError::UnresolvedFrom {
                    query_id: query.id.clone(),
                    from_id: join.right_from_id.clone(),
                }
            })?;
            let conditions = join.columns.iter().map(|c| {
                format!(
                    "{}.{} = {}.{}",
                    self.quote(&join.left_from_id),
                    self.quote(&c.left_column),
                    self.quote(&join.right_from_id),
                    self.quote(&c.right_column)
                )
            });
            sql.push_str(&format!(
                " {} {} AS {} ON ({})",
                join.join_type.as_sql(),
                source,
                self.quote(&join.right_from_id),
                separated(" AND ", conditions)
            ));
            joined.push(join.right_from_id.as_str());
        }
        for from in &query.joined_from.froms {
            if !joined.contains(&from.id()) {
                let (source, _) = &sources[from.id()];
                sql.push_str(&format!(" CROSS JOIN {} AS {}", source, self.quote(from.id())));
            }
        }
        for lookup in &lookups {
            let conditions = self.lookup_conditions(lookup, root_id, &query.dimensions, &ctx)?;
            sql.push_str(&format!(
                " {} {} AS {} ON ({})",
                JoinType::Left.as_sql(),
                root_source,
                self.quote(&lookup.alias),
                conditions.join(" AND ")
            ));
        }

        let mut where_list = vec![];
        let mut having_list = vec![];
        for filter in &query.filters {
            let expr = translate_with(&filter.formula, &ctx)?.to_sql(self.family);
            if self.has_function(&filter.formula, |f| f.is_aggregate()) {
                having_list.push(expr);
            } else {
                where_list.push(expr);
            }
        }
        if !where_list.is_empty() {
            sql.push_str(&format!(" WHERE {}", where_list.join(" AND ")));
        }
        if !query.group_by.is_empty() {
            let group_by = query
                .group_by
                .iter()
                .map(|g| Ok(translate_with(&g.formula, &ctx)?.to_sql(self.family)))
                .collect::<Result<Vec<_>, PlanningError>>()?;
            sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
        }
        if !having_list.is_empty() {
            sql.push_str(&format!(" HAVING {}", having_list.join(" AND ")));
        }
        if !order_exprs.is_empty() {
            sql.push_str(&format!(
                " ORDER BY {}",
                separated(", ", order_exprs.iter().map(|e| e.to_sql(self.family)))
            ));
        }
        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => {
                // MySQL and SQLite only accept OFFSET after LIMIT.
                match self.family {
                    DialectName::Mysql => sql.push_str(" LIMIT 18446744073709551615"),
                    DialectName::Sqlite => sql.push_str(" LIMIT -1"),
                    _ => {}
                }
                sql.push_str(&format!(" OFFSET {}", offset));
            }
            (None, None) => {}
        }

        Ok(RenderedQuery {
            query_id: query.id.clone(),
            sql,
            columns,
        })
    }

    fn has_function(&self, formula: &Formula, pred: impl Fn(&dl_formula::Function) -> bool) -> bool {
        let mut found = false;
        formula.visit_pre(formula.root(), &mut |_, kind| {
            if let NodeKind::FuncCall(call) = kind {
                if let Some(function) =
                    self.ctx.registry.preferred(&call.name, call.grouping.is_some())
                {
                    found |= pred(function);
                }
            }
        });
        found
    }

    /// Replaces every lookup call in `formula` with its value read from a
    /// new self-join, recorded in `lookups`.
    fn expand_lookups(
        &self,
        formula: &Arc<Formula>,
        root_id: &str,
        lookups: &mut Vec<LookupJoin>,
    ) -> Result<Arc<Formula>, PlanningError> {
        let mut error = None;
        let rewritten = formula.rewrite(&mut |f, id, builder| {
            let NodeKind::FuncCall(call) = f.kind(id) else {
                return None;
            };
            let function = self.ctx.registry.preferred(&call.name, false)?;
            if !function.is_lookup() || error.is_some() {
                return None;
            }
            match self.lookup_join(f, function.name, &call.args, lookups.len() + 1) {
                Ok((join, value)) => {
                    let mapping: BTreeMap<String, String> = value
                        .field_names(value.root())
                        .into_iter()
                        .filter_map(|name| {
                            let (from, column) = split_qualified(&name)?;
                            (from == root_id).then(|| (name.clone(), qualified(&join.alias, column)))
                        })
                        .collect();
                    let value = remap_formula_obj_fields(&value, &mapping);
                    lookups.push(join);
                    Some(builder.import(&value, value.root()))
                }
                Err(e) => {
                    error = Some(e);
                    None
                }
            }
        });
        match error {
            Some(e) => Err(e),
            None => Ok(rewritten.map_or_else(|| Arc::clone(formula), Arc::new)),
        }
    }

    fn lookup_join(
        &self,
        formula: &Formula,
        name: &str,
        args: &[NodeId],
        n: usize,
    ) -> Result<(LookupJoin, Arc<Formula>), PlanningError> {
        let function = self.ctx.registry.get_functions(name).iter().find(|f| f.is_lookup());
        if function.map_or(true, |f| f.variant(self.ctx.dialect).is_none()) {
            return Err(self.translation_error(TranslationError::UnsupportedForDialect {
                name: name.into(),
                dialect: self.ctx.dialect,
                arg_types: vec![],
            }));
        }
        let sub = |i: usize| -> Option<Arc<Formula>> {
            let id = *args.get(i)?;
            let mut builder = FormulaBuilder::new();
            let root = builder.import(formula, id);
            Some(Arc::new(builder.finish(root)))
        };
        let literal = |i: usize| args.get(i).map(|id| formula.kind(formula.skip_parens(*id)));
        let invalid = |message: &str| {
            self.translation_error(TranslationError::InvalidConstant {
                name: name.into(),
                message: message.into(),
            })
        };
        let (Some(value), Some(date_dim)) = (sub(0), sub(1)) else {
            return Err(invalid("expected a value and a date dimension"));
        };
        let shift = if name == "at_date" {
            LookupShift::At(sub(2).ok_or_else(|| invalid("expected a date"))?)
        } else {
            let unit = match literal(2) {
                None => "day".to_string(),
                Some(NodeKind::Literal(Literal::String(unit))) => unit.to_lowercase(),
                Some(_) => return Err(invalid("unit must be a constant string")),
            };
            let amount = match literal(3) {
                None => 1,
                Some(NodeKind::Literal(Literal::Integer(amount))) => *amount,
                Some(_) => return Err(invalid("amount must be a constant integer")),
            };
            LookupShift::Ago { unit, amount }
        };
        let join = LookupJoin {
            alias: format!("_lookup_{}", n),
            name: name.to_string(),
            date_dim,
            shift,
        };
        Ok((join, value))
    }

    fn lookup_conditions(
        &self,
        lookup: &LookupJoin,
        root_id: &str,
        dimensions: &[CompiledFormulaInfo],
        ctx: &TranslationCtx,
    ) -> Result<Vec<String>, PlanningError> {
        let date_extract = lookup.date_dim.extract(lookup.date_dim.root());
        let mut found = false;
        let mut conditions = vec![];
        for dim in dimensions {
            let mapping: BTreeMap<String, String> = dim
                .formula
                .field_names(dim.formula.root())
                .into_iter()
                .filter_map(|name| {
                    let (from, column) = split_qualified(&name)?;
                    (from == root_id).then(|| (name.clone(), qualified(&lookup.alias, column)))
                })
                .collect();
            let theirs = remap_formula_obj_fields(&dim.formula, &mapping);
            let theirs = translate(&theirs, ctx).map_err(|e| self.translation_error(e))?;
            let ours = if dim.formula.extract(dim.formula.root()) == date_extract {
                found = true;
                match &lookup.shift {
                    LookupShift::Ago { unit, amount } => {
                        let mut builder = FormulaBuilder::new();
                        let date = builder.import(&dim.formula, dim.formula.root());
                        let unit = builder.literal(Literal::String(unit.clone()));
                        let amount = builder.literal(Literal::Integer(-amount));
                        let root = builder.call("dateadd", vec![date, unit, amount]);
                        translate(&builder.finish(root), ctx)
                    }
                    LookupShift::At(date) => translate(date, ctx),
                }
            } else {
                translate(&dim.formula, ctx)
            };
            let ours = ours.map_err(|e| self.translation_error(e))?;
            conditions.push(
                SqlExpr::binary("=", theirs.expr, ours.expr).to_sql(self.family),
            );
        }
        if !found {
            return Err(PlanningError::LookupDimension {
                name: lookup.name.clone(),
            });
        }
        Ok(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::compile_request;
    use crate::compiler::TOP_QUERY_ID;

    fn render(mq: &CompiledMultiQuery, dialect: DialectCombo) -> Result<String, PlanningError> {
        let registry = Registry::builtin();
        let catalog = crate::catalog::tests::catalog();
        let ctx = RenderCtx {
            registry: &registry,
            catalog: &catalog,
            dialect,
        };
        render_query(mq, TOP_QUERY_ID, &ctx, &InlineSubqueries).map(|r| r.sql)
    }

    #[test]
    fn single_query() {
        let mq = compile_request(
            &[("Total", "SUM([Sales])")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Total"}, "role": "measure"},
                    {"id": 3, "field": {"title": "Total"}, "role": "order_by", "direction": "desc"},
                    {"id": 4, "field": {"title": "Sales"}, "role": "filter", "operation": "GT",
                     "values": [{"t": "int", "v": 10}]}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3, 4], "limit": 10, "offset": 20}]
            }"#,
        )
        .unwrap();
        let sql = render(&mq, DialectCombo::POSTGRESQL_9_6).unwrap();
        assert_eq!(
            sql,
            concat!(
                r#"SELECT "regions"."name" AS "res_1", SUM("orders"."sales") AS "res_2" "#,
                r#"FROM "public"."orders" AS "orders" "#,
                r#"LEFT JOIN "public"."cities" AS "cities" ON ("orders"."city_id" = "cities"."id") "#,
                r#"INNER JOIN "public"."regions" AS "regions" ON ("cities"."region_id" = "regions"."id") "#,
                r#"WHERE ("orders"."sales" > 10) "#,
                r#"GROUP BY "regions"."name" "#,
                r#"ORDER BY SUM("orders"."sales") DESC LIMIT 10 OFFSET 20"#,
            )
        );
        // Rendering is deterministic.
        assert_eq!(render(&mq, DialectCombo::POSTGRESQL_9_6).unwrap(), sql);
    }

    #[test]
    fn aggregate_rows_are_not_grouped() {
        let mq = compile_request(
            &[("Total", "SUM([Sales])")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Total"}, "role": "row"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        let sql = render(&mq, DialectCombo::POSTGRESQL_9_6).unwrap();
        assert!(
            sql.ends_with(r#"GROUP BY "regions"."name""#),
            "{}",
            sql
        );
    }

    #[test]
    fn aggregate_filters_go_to_having() {
        let mq = compile_request(
            &[("Total", "SUM([Sales])")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Total"}, "role": "filter", "operation": "GTE",
                     "values": [{"t": "int", "v": 5}]}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2], "offset": 3}]
            }"#,
        )
        .unwrap();
        let sql = render(&mq, DialectCombo::MYSQL_8_0_12).unwrap();
        assert!(sql.contains(" HAVING (SUM(`orders`.`sales`) >= 5)"), "{}", sql);
        assert!(!sql.contains("WHERE"), "{}", sql);
        assert!(sql.ends_with("LIMIT 18446744073709551615 OFFSET 3"), "{}", sql);
    }

    #[test]
    fn two_level_query() {
        let mq = compile_request(
            &[("Running", "RSUM(SUM([Sales]))")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Running"}, "role": "measure"},
                    {"id": 3, "field": {"title": "Region"}, "role": "order_by"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2, 3]}]
            }"#,
        )
        .unwrap();
        let sql = render(&mq, DialectCombo::POSTGRESQL_9_6).unwrap();
        assert!(
            sql.starts_with(concat!(
                r#"SELECT "qq_0"."dim_0" AS "res_1", "#,
                r#"SUM("qq_0"."lift_0") OVER (ORDER BY "qq_0"."dim_0" ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) AS "res_2" "#,
                r#"FROM (SELECT "regions"."name" AS "dim_0", SUM("orders"."sales") AS "lift_0" FROM "#,
            )),
            "{}",
            sql
        );
        assert!(sql.ends_with(r#"GROUP BY "regions"."name") AS "qq_0" ORDER BY "qq_0"."dim_0""#), "{}", sql);

        let err = render(&mq, DialectCombo::MYSQL_5_6).unwrap_err();
        assert!(matches!(
            err,
            PlanningError::Translation {
                source: TranslationError::UnsupportedForDialect { .. },
                ..
            }
        ));
    }

    #[test]
    fn nested_windows_do_not_nest_over() {
        let mq = compile_request(
            &[("Twice", "RSUM(RSUM(SUM([Sales])))")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "Twice"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        let sql = render(&mq, DialectCombo::POSTGRESQL_9_6).unwrap();
        assert!(
            sql.starts_with(concat!(
                r#"SELECT "qq_1"."dim_0" AS "res_1", "#,
                r#"SUM("qq_1"."win_0") OVER (ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) AS "res_2" "#,
                r#"FROM (SELECT "qq_0"."dim_0" AS "dim_0", "#,
                r#"SUM("qq_0"."lift_0") OVER (ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) AS "win_0" "#,
                r#"FROM (SELECT "regions"."name" AS "dim_0", SUM("orders"."sales") AS "lift_0" FROM "#,
            )),
            "{}",
            sql
        );
        assert_eq!(sql.matches(" OVER (").count(), 2, "{}", sql);
    }

    #[test]
    fn level_of_detail_is_a_joined_subquery() {
        let mq = compile_request(
            &[("RegionTotal", "SUM([Sales] FIXED [Region])")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Region"}, "role": "row"},
                    {"id": 2, "field": {"title": "RegionTotal"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        let sql = render(&mq, DialectCombo::POSTGRESQL_9_6).unwrap();
        assert!(
            sql.starts_with(r#"SELECT "qq_0"."dim_0" AS "res_1", "qq_1"."agg_0" AS "res_2" FROM (SELECT "#),
            "{}",
            sql
        );
        assert!(
            sql.contains(r#") AS "qq_0" LEFT JOIN (SELECT "regions"."name" AS "dim_0", SUM("orders"."sales") AS "agg_0" FROM "#),
            "{}",
            sql
        );
        assert!(
            sql.ends_with(r#"GROUP BY "regions"."name") AS "qq_1" ON ("qq_0"."dim_0" = "qq_1"."dim_0")"#),
            "{}",
            sql
        );
    }

    #[test]
    fn lookups_become_self_joins() {
        let mq = compile_request(
            &[("Prev", "AGO(SUM([Sales]), [Day])")],
            r#"{
                "items": [
                    {"id": 1, "field": {"title": "Day"}, "role": "row"},
                    {"id": 2, "field": {"title": "Prev"}, "role": "measure"}
                ],
                "blocks": [{"block_id": 0, "legend_item_ids": [1, 2]}]
            }"#,
        )
        .unwrap();
        let sql = render(&mq, DialectCombo::POSTGRESQL_9_6).unwrap();
        assert!(
            sql.starts_with(r#"SELECT "qq_0"."dim_0" AS "res_1", "_lookup_1"."lift_0" AS "res_2" FROM (SELECT "#),
            "{}",
            sql
        );
        assert!(sql.contains(r#") AS "_lookup_1" ON (("_lookup_1"."dim_0" = ("qq_0"."dim_0" + "#), "{}", sql);

        let err = render(&mq, DialectCombo::SQLITE).unwrap_err();
        assert!(matches!(
            err,
            PlanningError::Translation {
                source: TranslationError::UnsupportedForDialect { .. },
                ..
            }
        ));
    }
}
