// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Literal rendering strategies.

use std::fmt;

use dl_repr::{DataType, DialectCombo, Value};

use crate::expr::SqlExpr;

/// Turns constant values into SQL literal expressions.
pub trait Literalizer: fmt::Debug + Send + Sync {
    fn literal(&self, value: &Value, data_type: DataType) -> SqlExpr;
}

/// Emits plain literals and leaves their typing to the database.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLiteralizer;

impl Literalizer for NativeLiteralizer {
    fn literal(&self, value: &Value, _: DataType) -> SqlExpr {
        SqlExpr::literal(value.clone())
    }
}

/// Wraps literals in casts that fix their type.
///
/// The computation engine receives queries whose inputs are scratch tables
/// with declared column types, so untyped literals would be resolved against
/// whatever the engine infers. Integers are cast to the smallest type that
/// holds them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompengLiteralizer;

impl Literalizer for CompengLiteralizer {
    fn literal(&self, value: &Value, data_type: DataType) -> SqlExpr {
        let cast = match value {
            Value::Null => None,
            Value::Int(i) => Some(if i16::try_from(*i).is_ok() {
                "SMALLINT"
            } else if i32::try_from(*i).is_ok() {
                "INTEGER"
            } else {
                "BIGINT"
            }),
            Value::Float(_) => Some("DOUBLE PRECISION"),
            Value::String(_) => Some("TEXT"),
            Value::Bool(_) => Some("BOOLEAN"),
            Value::Date(_) => Some("DATE"),
            Value::Datetime(_) => Some("TIMESTAMP"),
            Value::Array(_) => match data_type.non_const() {
                DataType::ArrayInt => Some("BIGINT[]"),
                DataType::ArrayFloat => Some("DOUBLE PRECISION[]"),
                _ => Some("TEXT[]"),
            },
        };
        SqlExpr::Literal {
            value: value.clone(),
            cast,
        }
    }
}

/// The literalizer for a dialect.
pub fn literalizer_for(dialect: DialectCombo) -> &'static dyn Literalizer {
    if dialect.is_compeng() {
        &CompengLiteralizer
    } else {
        &NativeLiteralizer
    }
}
