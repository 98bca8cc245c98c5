// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use dl_formula::{TranslationError, TypeError};
use dl_formula_parser::ParseError;
use dl_ore::stack::RecursionLimitError;
use dl_repr::MixedDialectError;

/// An error while turning a request into compiled queries or SQL.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PlanningError {
    #[error("unknown field {field}")]
    UnknownField { field: String },
    #[error("duplicate legend item id {id}")]
    DuplicateLegendItem { id: u32 },
    #[error("query {query_id} is part of a cycle")]
    Cycle { query_id: String },
    #[error("query {query_id} reads from unknown query {from_id}")]
    UnresolvedFrom { query_id: String, from_id: String },
    #[error("expected exactly one block, got {count}")]
    MultipleBlocks { count: usize },
    #[error("field {field} references itself")]
    FieldCycle { field: String },
    #[error("no such query {query_id}")]
    NoSuchQuery { query_id: String },
    #[error("unknown avatar {avatar_id}")]
    UnknownAvatar { avatar_id: String },
    #[error("avatar {avatar_id} is not reachable from the root avatar")]
    UnreachableAvatar { avatar_id: String },
    #[error("lookup function {name} needs its date argument among the query dimensions")]
    LookupDimension { name: String },
    #[error("filter on {field} cannot use {operation}")]
    InvalidFilter { field: String, operation: String },
    #[error("filter on field {field} references window, lookup or level of detail functions")]
    UnsupportedFilter { field: String },
    #[error("level of detail of field {field} has dimensions that are not query dimensions")]
    LodDimensions { field: String },
    #[error("field {field} mixes aggregates of different levels of detail")]
    InconsistentAggregation { field: String },
    #[error("formula of field {field}: {source}")]
    Parse {
        field: String,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("in query {query_id}: {source}")]
    Translation {
        query_id: String,
        #[source]
        source: TranslationError,
    },
    #[error("field nesting {0}")]
    Recursion(#[from] RecursionLimitError),
    #[error(transparent)]
    Dialect(#[from] MixedDialectError),
}

impl PlanningError {
    pub fn detail(&self) -> Option<String> {
        match self {
            PlanningError::Parse { source, .. } => source
                .position()
                .map(|position| format!("The error is at character {}.", position)),
            PlanningError::Translation { source, .. } => source.detail(),
            _ => None,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            PlanningError::UnknownField { .. } => {
                Some("Check that the field exists in the dataset.".into())
            }
            PlanningError::FieldCycle { .. } => {
                Some("Remove the reference from the field's formula to itself.".into())
            }
            PlanningError::MultipleBlocks { .. } => {
                Some("Split the request into one request per block.".into())
            }
            PlanningError::LodDimensions { .. } => Some(
                "Add the dimensions to the request or wrap the aggregate in another aggregate."
                    .into(),
            ),
            PlanningError::InconsistentAggregation { .. } => {
                Some("Aggregate every nested aggregate at the same level of detail.".into())
            }
            PlanningError::Type(e) => e.hint(),
            PlanningError::Translation { source, .. } => source.hint(),
            PlanningError::Dialect(_) => {
                Some("Plan against one concrete dialect, such as POSTGRESQL_9_6.".into())
            }
            _ => None,
        }
    }
}
