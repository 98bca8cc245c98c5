// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Turns a compiled multi-query into operations.
//!
//! Each query is placed on the database that computes it. Source queries
//! read only by other source queries, and engine queries read only by other
//! engine queries, are rendered inline into their readers. Everything else
//! is materialized: source queries are downloaded, and uploaded to the
//! engine when engine queries read them.

use std::collections::BTreeMap;

use dl_dyncfg::ConfigSet;
use dl_formula::Registry;
use dl_formula_parser::NodeKind;
use dl_query::catalog::DatasetCatalog;
use dl_query::compiled::{split_qualified, CompiledMultiQuery, CompiledQuery, FromObject, QueryLevel};
use dl_query::render::{
    render_query, ColumnInfo, FromResolver, FromSource, InlineSubqueries, RenderCtx,
};
use dl_repr::DialectCombo;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, ExecutionError};
use crate::ops::{ExecutionPlan, JoinOutput, JoinSide, Operation};
use crate::{COMPENG_SCRATCH_TABLE_PREFIX, ENABLE_LOCAL_JOINS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    /// Rendered into the queries reading it.
    Inline,
    Download,
    Calc,
    Join,
}

/// Reads uploaded queries from their scratch tables and renders the rest
/// inline.
#[derive(Debug)]
struct PlanResolver<'a> {
    uploaded: &'a BTreeMap<String, (String, Vec<ColumnInfo>)>,
}

impl FromResolver for PlanResolver<'_> {
    fn resolve(&self, query_id: &str) -> FromSource {
        match self.uploaded.get(query_id) {
            Some((name, columns)) => FromSource::Table {
                name: name.clone(),
                columns: columns.clone(),
            },
            None => FromSource::Inline,
        }
    }
}

/// Plans multi-queries over one dataset.
#[derive(Debug)]
pub struct ExecutionPlanner<'a> {
    pub registry: &'a Registry,
    pub catalog: &'a DatasetCatalog,
    /// The dialect of the source database.
    pub dialect: DialectCombo,
    pub configs: &'a ConfigSet,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn plan(&self, mq: &CompiledMultiQuery) -> Result<ExecutionPlan, Error> {
        mq.validate()?;
        let order = mq.dependency_order()?;
        let result_id = match mq.top_queries().as_slice() {
            [id] => id.to_string(),
            tops => {
                return Err(ExecutionError::Internal(format!(
                    "expected a single top query, found {}",
                    tops.len()
                ))
                .into())
            }
        };
        let mut consumers: BTreeMap<&str, Vec<&CompiledQuery>> = BTreeMap::new();
        for query in mq.iter() {
            for child in query.joined_from.subquery_ids() {
                consumers.entry(child).or_default().push(query);
            }
        }
        let consumers_of = |id: &str| consumers.get(id).map(Vec::as_slice).unwrap_or_default();

        let mut placements: BTreeMap<&str, Placement> = BTreeMap::new();
        for &id in &order {
            let query = mq.get(id)?;
            let readers = consumers_of(id);
            let placement = match query.level {
                QueryLevel::SourceDb => {
                    if id == result_id || readers.iter().any(|r| r.level == QueryLevel::Compeng) {
                        Placement::Download
                    } else {
                        Placement::Inline
                    }
                }
                QueryLevel::Compeng => {
                    if let Some(reader) = readers.iter().find(|r| r.level == QueryLevel::SourceDb) {
                        return Err(ExecutionError::Internal(format!(
                            "source query {} reads engine query {}",
                            reader.id, id
                        ))
                        .into());
                    }
                    if ENABLE_LOCAL_JOINS.get(self.configs) && self.is_local_join(mq, query, &consumers)
                    {
                        Placement::Join
                    } else if id == result_id {
                        Placement::Calc
                    } else {
                        Placement::Inline
                    }
                }
            };
            placements.insert(id, placement);
        }

        let source_ctx = RenderCtx {
            registry: self.registry,
            catalog: self.catalog,
            dialect: self.dialect,
        };
        let compeng_ctx = RenderCtx {
            dialect: DialectCombo::COMPENG,
            ..source_ctx
        };
        let prefix = COMPENG_SCRATCH_TABLE_PREFIX.get(self.configs);
        let mut operations = vec![];
        let mut columns: BTreeMap<&str, Vec<ColumnInfo>> = BTreeMap::new();
        let mut uploaded: BTreeMap<String, (String, Vec<ColumnInfo>)> = BTreeMap::new();
        for &id in &order {
            let query = mq.get(id)?;
            match placements[&id] {
                Placement::Inline => continue,
                Placement::Download => {
                    let rendered = render_query(mq, id, &source_ctx, &InlineSubqueries)?;
                    operations.push(Operation::Download {
                        query_id: id.to_string(),
                        sql: rendered.sql,
                        columns: rendered.columns.clone(),
                        dest: id.to_string(),
                    });
                    columns.insert(id, rendered.columns);
                }
                Placement::Calc => {
                    let resolver = PlanResolver {
                        uploaded: &uploaded,
                    };
                    let rendered = render_query(mq, id, &compeng_ctx, &resolver)?;
                    let mut inputs = vec![];
                    self.collect_tables(mq, query, &uploaded, &mut inputs)?;
                    operations.push(Operation::Calc {
                        query_id: id.to_string(),
                        inputs,
                        sql: rendered.sql,
                        columns: rendered.columns.clone(),
                        dest: id.to_string(),
                    });
                    columns.insert(id, rendered.columns);
                }
                Placement::Join => {
                    let op = self.join_operation(query, &columns)?;
                    if let Operation::Join { columns: c, .. } = &op {
                        columns.insert(id, c.clone());
                    }
                    operations.push(op);
                }
            }

            let calc_readers = consumers_of(id).iter().any(|r| {
                r.level == QueryLevel::Compeng && placements.get(r.id.as_str()) != Some(&Placement::Join)
            });
            if calc_readers {
                let table_name = format!("{}{}", prefix, Uuid::new_v4().simple());
                operations.push(Operation::Upload {
                    source: id.to_string(),
                    dest: table_name.clone(),
                    table_name: table_name.clone(),
                });
                let cols = columns.get(id).cloned().unwrap_or_default();
                uploaded.insert(id.to_string(), (table_name, cols));
            }
        }

        let result_columns = columns.remove(result_id.as_str()).unwrap_or_default();
        debug!(%result_id, operations = operations.len(), "planned execution");
        Ok(ExecutionPlan {
            operations,
            result_stream_id: result_id,
            result_columns,
        })
    }

    /// The scratch tables `query` reads, directly or through inlined engine
    /// queries.
    fn collect_tables(
        &self,
        mq: &CompiledMultiQuery,
        query: &CompiledQuery,
        uploaded: &BTreeMap<String, (String, Vec<ColumnInfo>)>,
        out: &mut Vec<String>,
    ) -> Result<(), Error> {
        for child in query.joined_from.subquery_ids() {
            match uploaded.get(child) {
                Some((table_name, _)) => {
                    if !out.contains(table_name) {
                        out.push(table_name.clone());
                    }
                }
                None => self.collect_tables(mq, mq.get(child)?, uploaded, out)?,
            }
        }
        Ok(())
    }

    /// Whether `query` only joins two downloaded queries nothing else reads
    /// and selects their columns.
    fn is_local_join(
        &self,
        mq: &CompiledMultiQuery,
        query: &CompiledQuery,
        consumers: &BTreeMap<&str, Vec<&CompiledQuery>>,
    ) -> bool {
        let [FromObject::Subquery { query_id: left }, FromObject::Subquery { query_id: right }] =
            query.joined_from.froms.as_slice()
        else {
            return false;
        };
        let [join] = query.join_on.as_slice() else {
            return false;
        };
        let inputs_ok = [left, right].iter().all(|id| {
            let sole_reader = consumers
                .get(id.as_str())
                .map_or(false, |readers| readers.len() == 1 && readers[0].id == query.id);
            let is_source = mq
                .get(id)
                .map_or(false, |q| q.level == QueryLevel::SourceDb);
            sole_reader && is_source
        });
        let plain = query.filters.is_empty()
            && query.group_by.is_empty()
            && query.order_by.is_empty()
            && query.dimensions.is_empty()
            && query.limit.is_none()
            && query.offset.is_none();
        let joins_both = join.left_from_id == *left
            && join.right_from_id == *right
            && query.joined_from.root_from_id == *left
            && !join.columns.is_empty();
        inputs_ok && plain && joins_both && query.select.iter().all(|s| self.column_ref(query, s).is_some())
    }

    /// The side and column a select expression reads, if it is a bare
    /// column reference.
    fn column_ref(
        &self,
        query: &CompiledQuery,
        info: &dl_query::compiled::CompiledFormulaInfo,
    ) -> Option<(JoinSide, String)> {
        if info.wrapper.is_some() {
            return None;
        }
        let formula = &info.formula;
        let NodeKind::Field(name) = formula.kind(formula.skip_parens(formula.root())) else {
            return None;
        };
        let (from, column) = split_qualified(name)?;
        let join = query.join_on.first()?;
        if from == join.left_from_id {
            Some((JoinSide::Left, column.to_string()))
        } else if from == join.right_from_id {
            Some((JoinSide::Right, column.to_string()))
        } else {
            None
        }
    }

    fn join_operation(
        &self,
        query: &CompiledQuery,
        columns: &BTreeMap<&str, Vec<ColumnInfo>>,
    ) -> Result<Operation, Error> {
        let join = query
            .join_on
            .first()
            .ok_or_else(|| ExecutionError::Internal(format!("query {} joins nothing", query.id)))?;
        let input_columns = |id: &str| {
            columns.get(id).ok_or_else(|| ExecutionError::MissingStream {
                stream_id: id.to_string(),
            })
        };
        let left_columns = input_columns(&join.left_from_id)?;
        let right_columns = input_columns(&join.right_from_id)?;
        let mut output = vec![];
        let mut out_columns = vec![];
        for info in &query.select {
            let (side, column) = self.column_ref(query, info).ok_or_else(|| {
                ExecutionError::Internal(format!("{} is not a join column", info.alias))
            })?;
            let input = match side {
                JoinSide::Left => left_columns,
                JoinSide::Right => right_columns,
            };
            let data_type = input
                .iter()
                .find(|c| c.name == column)
                .map(|c| c.data_type)
                .ok_or_else(|| ExecutionError::Internal(format!("no input column {}", column)))?;
            out_columns.push(ColumnInfo {
                name: info.alias.clone(),
                data_type,
            });
            output.push(JoinOutput {
                side,
                column,
                alias: info.alias.clone(),
            });
        }
        Ok(Operation::Join {
            query_id: query.id.clone(),
            left: join.left_from_id.clone(),
            right: join.right_from_id.clone(),
            join_type: join.join_type,
            on: join
                .columns
                .iter()
                .map(|c| (c.left_column.clone(), c.right_column.clone()))
                .collect(),
            output,
            columns: out_columns,
            dest: query.id.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use dl_formula_parser::Formula;
    use dl_query::catalog::{JoinCondition, JoinType};
    use dl_query::compiled::{qualified, CompiledFormulaInfo, JoinOnCondition, JoinedFrom};
    use dl_query::mutator::{mutate, ProcessorType};

    use super::*;
    use crate::testing::{catalog, compile};

    fn planner<'a>(
        registry: &'a Registry,
        catalog: &'a DatasetCatalog,
        configs: &'a ConfigSet,
        dialect: DialectCombo,
    ) -> ExecutionPlanner<'a> {
        ExecutionPlanner {
            registry,
            catalog,
            dialect,
            configs,
        }
    }

    fn kinds(plan: &ExecutionPlan) -> Vec<String> {
        plan.operations
            .iter()
            .map(|op| match op {
                Operation::Upload { source, .. } => format!("upload {}", source),
                op => format!("{} {}", op.kind(), op.output()),
            })
            .collect()
    }

    #[test]
    fn source_only_plans_download_once() {
        let registry = Registry::builtin();
        let catalog = catalog();
        let configs = crate::testing::configs();
        let mq = compile(&catalog, r#"[{"title": "Region", "role": "row"}, {"title": "Sales", "role": "measure"}]"#);
        let plan = planner(&registry, &catalog, &configs, DialectCombo::POSTGRESQL_9_6)
            .plan(&mq)
            .unwrap();
        assert_eq!(kinds(&plan), ["download qq"]);
        assert_eq!(plan.result_stream_id, "qq");
        let names: Vec<_> = plan.result_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["res_1", "res_2"]);
    }

    #[test]
    fn engine_queries_read_uploaded_tables() {
        let registry = Registry::builtin();
        let catalog = catalog();
        let configs = crate::testing::configs();
        let mq = compile(
            &catalog,
            r#"[{"title": "Region", "role": "row"}, {"title": "Running", "role": "measure"}]"#,
        );
        let mq = mutate(
            mq,
            DialectCombo::MYSQL_5_6,
            ProcessorType::Compeng,
            &registry,
            &configs,
        )
        .unwrap();
        let plan = planner(&registry, &catalog, &configs, DialectCombo::MYSQL_5_6)
            .plan(&mq)
            .unwrap();
        assert_eq!(kinds(&plan), ["download qq_0", "upload qq_0", "calc qq"]);

        let Operation::Upload { table_name, .. } = &plan.operations[1] else {
            panic!("expected an upload");
        };
        assert!(table_name.starts_with("tmp_"));
        let Operation::Calc { inputs, sql, .. } = &plan.operations[2] else {
            panic!("expected a calc");
        };
        assert_eq!(inputs, &[table_name.clone()]);
        assert!(sql.contains(&format!("FROM \"{}\" AS \"qq_0\"", table_name)), "{}", sql);
        assert!(sql.contains("ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW"));
        let Operation::Download { sql, .. } = &plan.operations[0] else {
            panic!("expected a download");
        };
        assert!(sql.starts_with("SELECT"));
        assert!(sql.contains("`orders`"), "{}", sql);
    }

    /// Two source queries joined by an engine query that only selects their
    /// columns.
    pub(crate) fn split_join() -> CompiledMultiQuery {
        let field = |from: &str, column: &str, alias: &str| {
            CompiledFormulaInfo::new(Arc::new(Formula::field(qualified(from, column))), alias)
        };
        let mut orders = CompiledQuery::new(
            "qq_0",
            QueryLevel::SourceDb,
            JoinedFrom::single(FromObject::Avatar {
                id: "orders".into(),
                table: "public.orders".into(),
            }),
        );
        orders.select = vec![
            field("orders", "city_id", "city_id"),
            field("orders", "sales", "sales"),
        ];
        let mut cities = CompiledQuery::new(
            "qq_1",
            QueryLevel::SourceDb,
            JoinedFrom::single(FromObject::Avatar {
                id: "cities".into(),
                table: "public.cities".into(),
            }),
        );
        cities.select = vec![field("cities", "id", "id"), field("cities", "name", "name")];
        let mut top = CompiledQuery::new(
            "qq",
            QueryLevel::Compeng,
            JoinedFrom {
                root_from_id: "qq_0".into(),
                froms: vec![
                    FromObject::Subquery {
                        query_id: "qq_0".into(),
                    },
                    FromObject::Subquery {
                        query_id: "qq_1".into(),
                    },
                ],
            },
        );
        top.join_on = vec![JoinOnCondition {
            left_from_id: "qq_0".into(),
            right_from_id: "qq_1".into(),
            join_type: JoinType::Full,
            columns: vec![JoinCondition {
                left_column: "city_id".into(),
                right_column: "id".into(),
            }],
        }];
        top.select = vec![field("qq_1", "name", "res_1"), field("qq_0", "sales", "res_2")];
        CompiledMultiQuery::new(vec![top, orders, cities])
    }

    #[test]
    fn pure_joins_run_locally() {
        let registry = Registry::builtin();
        let catalog = catalog();
        let configs = crate::testing::configs();
        let mq = split_join();
        let plan = planner(&registry, &catalog, &configs, DialectCombo::SQLITE)
            .plan(&mq)
            .unwrap();
        assert_eq!(kinds(&plan), ["download qq_0", "download qq_1", "join qq"]);
        let Operation::Join { on, output, .. } = &plan.operations[2] else {
            panic!("expected a join");
        };
        assert_eq!(on, &[("city_id".to_string(), "id".to_string())]);
        assert_eq!(output[0].side, JoinSide::Right);

        ENABLE_LOCAL_JOINS.set(&configs, false);
        let plan = planner(&registry, &catalog, &configs, DialectCombo::SQLITE)
            .plan(&mq)
            .unwrap();
        assert_eq!(
            kinds(&plan),
            ["download qq_0", "upload qq_0", "download qq_1", "upload qq_1", "calc qq"]
        );
    }

    #[test]
    fn source_queries_cannot_read_engine_queries() {
        let registry = Registry::builtin();
        let catalog = catalog();
        let configs = crate::testing::configs();
        let mut inner = CompiledQuery::new(
            "qq_0",
            QueryLevel::Compeng,
            JoinedFrom::single(FromObject::Avatar {
                id: "orders".into(),
                table: "public.orders".into(),
            }),
        );
        inner.select = vec![CompiledFormulaInfo::new(
            Arc::new(Formula::field("orders.sales")),
            "sales",
        )];
        let top = CompiledQuery::new(
            "qq",
            QueryLevel::SourceDb,
            JoinedFrom::single(FromObject::Subquery {
                query_id: "qq_0".into(),
            }),
        );
        let mq = CompiledMultiQuery::new(vec![top, inner]);
        let err = planner(&registry, &catalog, &configs, DialectCombo::SQLITE)
            .plan(&mq)
            .unwrap_err();
        assert_eq!(
            err,
            Error::Execution(ExecutionError::Internal(
                "source query qq reads engine query qq_0".into()
            ))
        );
    }
}
