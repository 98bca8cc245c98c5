// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Compiled queries.
//!
//! A [`CompiledMultiQuery`] is a DAG of [`CompiledQuery`]s. Each query reads
//! from source avatars, from other queries of the same multi-query, or from
//! both; these edges are recorded in its [`JoinedFrom`]. Queries that no
//! other query reads from are *top queries*: their results are the results
//! of the request.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dl_formula_parser::Formula;

use crate::catalog::{JoinCondition, JoinType};
use crate::error::PlanningError;
use crate::formalizer::ArrayPrefixSelectWrapper;
use crate::legend::SortDirection;

/// Where a query runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryLevel {
    /// On the dataset's source database.
    SourceDb,
    /// On the auxiliary computation engine.
    Compeng,
}

/// An expression of a compiled query.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledFormulaInfo {
    pub formula: Arc<Formula>,
    /// The name of the expression's output column.
    pub alias: String,
    /// The ids of the FROM objects the expression reads from: avatars in a
    /// query over source tables, subqueries otherwise.
    pub avatar_ids: BTreeSet<String>,
    /// The dataset field the expression computes, if any.
    pub original_field_id: Option<String>,
    pub wrapper: Option<ArrayPrefixSelectWrapper>,
}

impl CompiledFormulaInfo {
    pub fn new(formula: Arc<Formula>, alias: impl Into<String>) -> CompiledFormulaInfo {
        let avatar_ids = formula
            .field_names(formula.root())
            .iter()
            .filter_map(|name| split_qualified(name).map(|(from, _)| from.to_string()))
            .collect();
        CompiledFormulaInfo {
            formula,
            alias: alias.into(),
            avatar_ids,
            original_field_id: None,
            wrapper: None,
        }
    }

    pub fn with_field_id(mut self, field_id: impl Into<String>) -> CompiledFormulaInfo {
        self.original_field_id = Some(field_id.into());
        self
    }

    pub fn with_wrapper(mut self, wrapper: Option<ArrayPrefixSelectWrapper>) -> CompiledFormulaInfo {
        self.wrapper = wrapper;
        self
    }

    /// Replaces the formula, keeping everything else but the avatars, which
    /// are recomputed.
    pub fn map_formula(&self, formula: Arc<Formula>) -> CompiledFormulaInfo {
        CompiledFormulaInfo {
            original_field_id: self.original_field_id.clone(),
            wrapper: self.wrapper,
            ..CompiledFormulaInfo::new(formula, self.alias.clone())
        }
    }
}

/// The field name of `column` of the FROM object `from_id`.
pub fn qualified(from_id: &str, column: &str) -> String {
    format!("{}.{}", from_id, column)
}

/// Splits a qualified field name into its FROM object id and column.
///
/// FROM object ids never contain a dot; column names may.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledOrderItem {
    pub info: CompiledFormulaInfo,
    pub direction: SortDirection,
}

/// Something a query reads rows from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FromObject {
    /// A table of the source database, known in the query as `id`.
    Avatar { id: String, table: String },
    /// Another query of the same multi-query, known in the query by its id.
    Subquery { query_id: String },
}

impl FromObject {
    /// The alias the object is known under within the query.
    pub fn id(&self) -> &str {
        match self {
            FromObject::Avatar { id, .. } => id,
            FromObject::Subquery { query_id } => query_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinedFrom {
    pub root_from_id: String,
    pub froms: Vec<FromObject>,
}

impl JoinedFrom {
    pub fn single(from: FromObject) -> JoinedFrom {
        JoinedFrom {
            root_from_id: from.id().to_string(),
            froms: vec![from],
        }
    }

    pub fn get(&self, id: &str) -> Option<&FromObject> {
        self.froms.iter().find(|f| f.id() == id)
    }

    /// The ids of the queries read from.
    pub fn subquery_ids(&self) -> impl Iterator<Item = &str> {
        self.froms.iter().filter_map(|f| match f {
            FromObject::Subquery { query_id } => Some(query_id.as_str()),
            FromObject::Avatar { .. } => None,
        })
    }
}

/// Joins `right_from_id` onto `left_from_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOnCondition {
    pub left_from_id: String,
    pub right_from_id: String,
    pub join_type: JoinType,
    pub columns: Vec<JoinCondition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub id: String,
    pub level: QueryLevel,
    pub select: Vec<CompiledFormulaInfo>,
    pub group_by: Vec<CompiledFormulaInfo>,
    pub order_by: Vec<CompiledOrderItem>,
    pub filters: Vec<CompiledFormulaInfo>,
    /// The dimensions windows are partitioned relative to. For a grouped
    /// query these are its group-by expressions.
    pub dimensions: Vec<CompiledFormulaInfo>,
    pub joined_from: JoinedFrom,
    pub join_on: Vec<JoinOnCondition>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl CompiledQuery {
    pub fn new(id: impl Into<String>, level: QueryLevel, joined_from: JoinedFrom) -> CompiledQuery {
        CompiledQuery {
            id: id.into(),
            level,
            select: vec![],
            group_by: vec![],
            order_by: vec![],
            filters: vec![],
            dimensions: vec![],
            joined_from,
            join_on: vec![],
            limit: None,
            offset: None,
        }
    }

    /// Every expression of the query.
    pub fn formulas(&self) -> impl Iterator<Item = &CompiledFormulaInfo> {
        self.select
            .iter()
            .chain(&self.group_by)
            .chain(self.order_by.iter().map(|o| &o.info))
            .chain(&self.filters)
            .chain(&self.dimensions)
    }

    /// Applies `f` to every expression of the query.
    pub fn map_formulas<F>(&self, mut f: F) -> CompiledQuery
    where
        F: FnMut(&CompiledFormulaInfo) -> CompiledFormulaInfo,
    {
        CompiledQuery {
            select: self.select.iter().map(&mut f).collect(),
            group_by: self.group_by.iter().map(&mut f).collect(),
            order_by: self
                .order_by
                .iter()
                .map(|o| CompiledOrderItem {
                    info: f(&o.info),
                    direction: o.direction,
                })
                .collect(),
            filters: self.filters.iter().map(&mut f).collect(),
            dimensions: self.dimensions.iter().map(&mut f).collect(),
            ..self.clone()
        }
    }
}

/// The queries of one request, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledMultiQuery {
    queries: Vec<CompiledQuery>,
}

impl CompiledMultiQuery {
    pub fn new(queries: Vec<CompiledQuery>) -> CompiledMultiQuery {
        CompiledMultiQuery { queries }
    }

    pub fn get(&self, query_id: &str) -> Result<&CompiledQuery, PlanningError> {
        self.queries
            .iter()
            .find(|q| q.id == query_id)
            .ok_or_else(|| PlanningError::NoSuchQuery {
                query_id: query_id.to_string(),
            })
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.queries.iter().any(|q| q.id == query_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledQuery> {
        self.queries.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(|q| q.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Checks that every subquery reference resolves and that the FROM graph
    /// is acyclic.
    pub fn validate(&self) -> Result<(), PlanningError> {
        for query in &self.queries {
            for from_id in query.joined_from.subquery_ids() {
                if !self.contains(from_id) {
                    return Err(PlanningError::UnresolvedFrom {
                        query_id: query.id.clone(),
                        from_id: from_id.to_string(),
                    });
                }
            }
        }
        self.dependency_order().map(|_| ())
    }

    /// The ids of the queries no other query reads from, in declaration
    /// order.
    pub fn top_queries(&self) -> Vec<&str> {
        let referenced: BTreeSet<&str> = self
            .queries
            .iter()
            .flat_map(|q| q.joined_from.subquery_ids())
            .collect();
        self.ids().filter(|id| !referenced.contains(id)).collect()
    }

    /// Every query id, ordered so that each query comes after the queries it
    /// reads from. Ties keep declaration order.
    pub fn dependency_order(&self) -> Result<Vec<&str>, PlanningError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            mq: &'a CompiledMultiQuery,
            id: &'a str,
            marks: &mut BTreeMap<&'a str, Mark>,
            out: &mut Vec<&'a str>,
        ) -> Result<(), PlanningError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(PlanningError::Cycle {
                        query_id: id.to_string(),
                    })
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            let query = mq.get(id)?;
            for child in query.joined_from.subquery_ids() {
                visit(mq, child, marks, out)?;
            }
            marks.insert(id, Mark::Done);
            out.push(id);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut out = vec![];
        for id in self.ids() {
            visit(self, id, &mut marks, &mut out)?;
        }
        Ok(out)
    }
}

/// Collects `query_id` and every query it transitively reads from.
pub fn build_requirement_subtree(
    mq: &CompiledMultiQuery,
    query_id: &str,
) -> Result<BTreeSet<String>, PlanningError> {
    let mut out = BTreeSet::new();
    let mut stack = vec![query_id.to_string()];
    while let Some(id) = stack.pop() {
        if out.contains(&id) {
            continue;
        }
        let query = mq.get(&id)?;
        stack.extend(query.joined_from.subquery_ids().map(str::to_string));
        out.insert(id);
    }
    Ok(out)
}

/// Queries to insert into or replace in a multi-query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPatch {
    pub queries: Vec<CompiledQuery>,
}

impl QueryPatch {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Upserts the queries of `patch` by id.
///
/// Replaced queries keep their position and new queries are appended in
/// patch order.
pub fn apply_query_patch(mq: CompiledMultiQuery, patch: QueryPatch) -> CompiledMultiQuery {
    let mut queries = mq.queries;
    for query in patch.queries {
        match queries.iter_mut().find(|q| q.id == query.id) {
            Some(existing) => *existing = query,
            None => queries.push(query),
        }
    }
    CompiledMultiQuery { queries }
}
