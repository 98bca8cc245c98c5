// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::HashMap;

use dl_formula::{translate, Registry, TranslationCtx, TypeEnvironment};
use dl_repr::{DataType, DialectCombo};

/// Binds the fields every test file can refer to.
fn env() -> TypeEnvironment {
    let mut env = TypeEnvironment::new();
    env.bind_column("Sales", Some("t"), "sales", DataType::Float);
    env.bind_column("Qty", Some("t"), "qty", DataType::Integer);
    env.bind_column("City", Some("t"), "city", DataType::String);
    env.bind_column("Date", Some("t"), "order_date", DataType::Date);
    env.bind_column("Tags", Some("t"), "tags", DataType::ArrayStr);
    env
}

fn dialect(args: &HashMap<String, Vec<String>>) -> Result<DialectCombo, String> {
    let name = match args.get("dialect").and_then(|v| v.first()) {
        Some(name) => name.as_str(),
        None => return Err("missing required `dialect` argument".into()),
    };
    Ok(match name {
        "postgresql" => DialectCombo::POSTGRESQL_9_6,
        "clickhouse" => DialectCombo::CLICKHOUSE_22_10,
        "mysql" => DialectCombo::MYSQL_8_0_12,
        "mysql5" => DialectCombo::MYSQL_5_6,
        "sqlite" => DialectCombo::SQLITE,
        "compeng" => DialectCombo::COMPENG,
        other => return Err(format!("unknown dialect {}", other)),
    })
}

#[test]
fn run_tests() {
    let registry = Registry::builtin();
    let env = env();
    datadriven::walk("tests/testdata", |f| {
        f.run(|test_case| -> String {
            match test_case.directive.as_str() {
                "translate" => {
                    let dialect = match dialect(&test_case.args) {
                        Ok(dialect) => dialect,
                        Err(e) => return format!("{}\n", e),
                    };
                    let ctx = TranslationCtx::new(&registry, &env, dialect);
                    let formula = match dl_formula_parser::parse(test_case.input.trim()) {
                        Ok(formula) => formula,
                        Err(e) => return format!("parse error: {}\n", e),
                    };
                    match translate(&formula, &ctx) {
                        Ok(typed) => format!("{}\n{}\n", typed.data_type, typed.to_sql(dialect.name())),
                        Err(e) => format!("error: {}\n", e),
                    }
                }
                _ => format!("unknown directive: {}", test_case.directive),
            }
        })
    });
}
