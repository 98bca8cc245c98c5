// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;

use dl_repr::DataType;

use crate::error::TypeError;
use crate::expr::SqlExpr;

/// The column a field name resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRef {
    /// The table or subquery alias qualifying the column, if any.
    pub table: Option<String>,
    pub column: String,
    pub data_type: DataType,
}

impl FieldRef {
    pub fn to_expr(&self) -> SqlExpr {
        SqlExpr::column(self.table.as_deref(), &self.column)
    }
}

/// Binds field names to columns for one translation pass.
#[derive(Clone, Debug, Default)]
pub struct TypeEnvironment {
    fields: BTreeMap<String, FieldRef>,
}

impl TypeEnvironment {
    pub fn new() -> TypeEnvironment {
        TypeEnvironment::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, field: FieldRef) {
        self.fields.insert(name.into(), field);
    }

    /// Binds `name` to `table.column`.
    pub fn bind_column(
        &mut self,
        name: impl Into<String>,
        table: Option<&str>,
        column: impl Into<String>,
        data_type: DataType,
    ) {
        self.bind(
            name,
            FieldRef {
                table: table.map(str::to_string),
                column: column.into(),
                data_type,
            },
        );
    }

    pub fn get(&self, name: &str) -> Result<&FieldRef, TypeError> {
        self.fields.get(name).ok_or_else(|| TypeError::UnknownField {
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
