// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Translation of formulas into SQL expressions.
//!
//! Translation type-checks and translates in a single bottom-up walk. Each
//! call is resolved against the [`Registry`], folded into a literal when all
//! of its arguments are constant and the function has a compile-time
//! evaluator, and otherwise rendered with the first translation variant that
//! applies to the target dialect.

use std::collections::{BTreeMap, BTreeSet};

use dl_formula_parser::ast::{FuncCall, LodSpecifier, WindowGrouping};
use dl_formula_parser::{Extract, Formula, Literal, NodeId, NodeKind, RECURSION_LIMIT};
use dl_ore::stack::{CheckedRecursion, RecursionGuard};
use dl_repr::{DataType, DialectCombo, DialectName, Value};
use tracing::trace;

use crate::env::TypeEnvironment;
use crate::error::{TranslationError, TypeError};
use crate::eval::eval;
use crate::expr::SqlExpr;
use crate::func::{CallArgs, Function, Registry, Translation, WindowFunc};
use crate::literal::{literalizer_for, Literalizer};

const RUNNING_FRAME: &str = "ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW";
const WHOLE_FRAME: &str = "ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING";

/// A dimension of the query a formula is translated for.
#[derive(Clone, Debug, PartialEq)]
pub struct Dimension {
    /// The structural identity of the dimension's formula.
    pub extract: Extract,
    pub expr: SqlExpr,
}

/// Everything translation depends on besides the formula itself.
#[derive(Debug)]
pub struct TranslationCtx<'a> {
    pub registry: &'a Registry,
    pub env: &'a TypeEnvironment,
    pub dialect: DialectCombo,
    /// The dimensions of the enclosing query, which `AMONG` is relative to.
    pub dimensions: Vec<Dimension>,
    /// The ordering of window functions without an `ORDER BY` clause.
    pub order_by: Vec<SqlExpr>,
}

impl<'a> TranslationCtx<'a> {
    pub fn new(
        registry: &'a Registry,
        env: &'a TypeEnvironment,
        dialect: DialectCombo,
    ) -> TranslationCtx<'a> {
        TranslationCtx {
            registry,
            env,
            dialect,
            dimensions: vec![],
            order_by: vec![],
        }
    }

    pub fn with_dimensions(mut self, dimensions: Vec<Dimension>) -> TranslationCtx<'a> {
        self.dimensions = dimensions;
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<SqlExpr>) -> TranslationCtx<'a> {
        self.order_by = order_by;
        self
    }
}

/// A translated expression and its type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedExpr {
    pub expr: SqlExpr,
    pub data_type: DataType,
    /// The value of the expression, if it is known at compile time.
    pub constant: Option<Value>,
}

impl TypedExpr {
    /// Renders the expression for the given dialect family.
    pub fn to_sql(&self, dialect: DialectName) -> String {
        self.expr.to_sql(dialect)
    }
}

/// Translates the root of `formula`.
pub fn translate(formula: &Formula, ctx: &TranslationCtx) -> Result<TypedExpr, TranslationError> {
    translate_node(formula, formula.root(), ctx)
}

/// Translates the subtree of `formula` rooted at `id`.
pub fn translate_node(
    formula: &Formula,
    id: NodeId,
    ctx: &TranslationCtx,
) -> Result<TypedExpr, TranslationError> {
    trace!(
        dialect = %ctx.dialect,
        functions = %dl_formula_parser::ast::called_functions(formula),
        "translating formula"
    );
    ctx.dialect.family()?;
    let mut translator = Translator {
        formula,
        ctx,
        literalizer: literalizer_for(ctx.dialect),
        memo: BTreeMap::new(),
        recursion_guard: RecursionGuard::with_limit(RECURSION_LIMIT),
    };
    translator.translate(id)
}

struct Translator<'t> {
    formula: &'t Formula,
    ctx: &'t TranslationCtx<'t>,
    literalizer: &'static dyn Literalizer,
    memo: BTreeMap<NodeId, TypedExpr>,
    recursion_guard: RecursionGuard,
}

impl CheckedRecursion for Translator<'_> {
    fn recursion_guard(&self) -> &RecursionGuard {
        &self.recursion_guard
    }
}

impl<'t> Translator<'t> {
    fn translate(&mut self, id: NodeId) -> Result<TypedExpr, TranslationError> {
        if let Some(typed) = self.memo.get(&id) {
            return Ok(typed.clone());
        }
        let typed = self.checked_recur_mut(|t| t.translate_inner(id))?;
        self.memo.insert(id, typed.clone());
        Ok(typed)
    }

    fn translate_inner(&mut self, id: NodeId) -> Result<TypedExpr, TranslationError> {
        let formula = self.formula;
        match formula.kind(id) {
            NodeKind::Literal(lit) => Ok(self.literal(lit)),
            NodeKind::Null => Ok(TypedExpr {
                expr: SqlExpr::null(),
                data_type: DataType::Null,
                constant: Some(Value::Null),
            }),
            NodeKind::Field(name) => {
                let field = self.ctx.env.get(name)?;
                Ok(TypedExpr {
                    expr: field.to_expr(),
                    data_type: field.data_type.non_const(),
                    constant: None,
                })
            }
            NodeKind::Parenthesized(inner) => self.translate(*inner),
            NodeKind::Unary { name, expr } => self.call(name, &[*expr], None),
            NodeKind::Binary { name, left, right } => self.call(name, &[*left, *right], None),
            NodeKind::Ternary {
                name,
                first,
                second,
                third,
            } => self.call(name, &[*first, *second, *third], None),
            NodeKind::FuncCall(call) => self.call(&call.name, &call.args, Some(call)),
            NodeKind::IfBlock { if_list, else_expr } => self.if_block(if_list, *else_expr),
            NodeKind::CaseBlock {
                case_expr,
                when_list,
                else_expr,
            } => self.case_block(*case_expr, when_list, *else_expr),
            NodeKind::ExprList(_) => Err(TypeError::TypeMismatch {
                context: "expression list".into(),
                expected: "a single value".into(),
                got: DataType::Unsupported,
            }
            .into()),
        }
    }

    fn literal(&self, lit: &Literal) -> TypedExpr {
        let (value, data_type) = match lit {
            Literal::Integer(i) => (Value::Int(*i), DataType::ConstInteger),
            Literal::Float(f) => (Value::Float(*f), DataType::ConstFloat),
            Literal::String(s) => (Value::String(s.clone()), DataType::ConstString),
            Literal::Boolean(b) => (Value::Bool(*b), DataType::ConstBoolean),
            Literal::Date(d) => (Value::Date(*d), DataType::ConstDate),
            Literal::Datetime(dt) => (Value::Datetime(*dt), DataType::ConstDatetime),
            Literal::GenericDatetime(dt) => {
                (Value::Datetime(*dt), DataType::ConstGenericDatetime)
            }
        };
        TypedExpr {
            expr: self.literalizer.literal(&value, data_type),
            data_type,
            constant: Some(value),
        }
    }

    /// Translates call arguments, splicing in the items of expression lists.
    fn args(&mut self, ids: &[NodeId]) -> Result<Vec<TypedExpr>, TranslationError> {
        let mut args = vec![];
        for id in ids {
            match self.formula.kind(self.formula.skip_parens(*id)) {
                NodeKind::ExprList(items) => {
                    for item in items {
                        args.push(self.translate(*item)?);
                    }
                }
                _ => args.push(self.translate(*id)?),
            }
        }
        Ok(args)
    }

    fn call(
        &mut self,
        name: &str,
        arg_ids: &[NodeId],
        call: Option<&FuncCall>,
    ) -> Result<TypedExpr, TranslationError> {
        let args = self.args(arg_ids)?;
        let types: Vec<DataType> = args.iter().map(|a| a.data_type).collect();
        let has_grouping = call.map_or(false, |c| c.grouping.is_some());
        let function = self.ctx.registry.resolve(name, &types, has_grouping)?;
        if let Some(call) = call {
            check_clauses(function, call)?;
        }
        if function.is_lookup() {
            return Err(TranslationError::LookupOutsideQuery {
                name: function.name.into(),
            });
        }
        if matches!(function.name, "in" | "notin") {
            for ty in &types[1..] {
                if types[0].common_supertype(ty).is_none() {
                    return Err(TypeError::NoMatchingSignature {
                        name: name.into(),
                        arg_types: types.clone(),
                    }
                    .into());
                }
            }
        }
        let return_type =
            function
                .return_type
                .resolve(&types)
                .ok_or_else(|| TypeError::NoMatchingSignature {
                    name: name.into(),
                    arg_types: types.clone(),
                })?;
        let translation = function.variant(self.ctx.dialect).ok_or_else(|| {
            TranslationError::UnsupportedForDialect {
                name: function.name.into(),
                dialect: self.ctx.dialect,
                arg_types: types.clone(),
            }
        })?;

        if function.is_foldable() {
            let constants: Option<Vec<Value>> = args.iter().map(|a| a.constant.clone()).collect();
            if let Some(value) = constants.and_then(|values| eval(function.name, &values)) {
                let data_type = return_type.as_const();
                return Ok(TypedExpr {
                    expr: self.literalizer.literal(&value, data_type),
                    data_type,
                    constant: Some(value),
                });
            }
        }

        let expr = match translation {
            Translation::Window(window) => {
                let call = call.cloned().unwrap_or_else(|| FuncCall::plain(name, vec![]));
                self.window(*window, &call, args)?
            }
            translation => translation.apply(CallArgs {
                name: function.name,
                args: args.into_iter().map(|a| a.expr).collect(),
                types,
                dialect: self.ctx.dialect,
            })?,
        };
        Ok(TypedExpr {
            expr,
            data_type: return_type,
            constant: None,
        })
    }

    fn window(
        &mut self,
        window: WindowFunc,
        call: &FuncCall,
        args: Vec<TypedExpr>,
    ) -> Result<SqlExpr, TranslationError> {
        let formula = self.formula;
        let mut partition: Vec<Dimension> = match &call.grouping {
            None | Some(WindowGrouping::Total) => vec![],
            Some(WindowGrouping::Within(dims)) => {
                let mut partition = vec![];
                for dim in dims {
                    partition.push(Dimension {
                        extract: formula.extract(*dim),
                        expr: self.translate(*dim)?.expr,
                    });
                }
                partition
            }
            Some(WindowGrouping::Among(dims)) => {
                let among: BTreeSet<Extract> = dims.iter().map(|d| formula.extract(*d)).collect();
                self.ctx
                    .dimensions
                    .iter()
                    .filter(|d| !among.contains(&d.extract))
                    .cloned()
                    .collect()
            }
        };
        if !call.ignore_dimensions.is_empty() {
            let ignored: BTreeSet<Extract> = call
                .ignore_dimensions
                .iter()
                .map(|d| formula.extract(*d))
                .collect();
            partition.retain(|d| !ignored.contains(&d.extract));
        }
        let partition_by = partition.into_iter().map(|d| d.expr).collect();

        let order_by = if call.ordering.is_empty() {
            self.ctx.order_by.clone()
        } else {
            let mut order_by = vec![];
            for item in &call.ordering {
                let expr = self.translate(item.expr)?.expr;
                order_by.push(if item.desc { expr.desc() } else { expr });
            }
            order_by
        };

        let mut args = args.into_iter();
        let (func, order_by, frame) = match window {
            WindowFunc::Aggregate(name) => {
                let args: Vec<SqlExpr> = args.map(|a| a.expr).collect();
                (SqlExpr::call(name, args), vec![], None)
            }
            WindowFunc::Running(name) => {
                let args: Vec<SqlExpr> = args.map(|a| a.expr).collect();
                (SqlExpr::call(name, args), order_by, Some(RUNNING_FRAME))
            }
            WindowFunc::Rank(name) => {
                let value = args.next().expect("rank takes a value").expr;
                let desc = match args.next().and_then(|a| a.constant) {
                    None => true,
                    Some(Value::String(dir)) if dir.eq_ignore_ascii_case("desc") => true,
                    Some(Value::String(dir)) if dir.eq_ignore_ascii_case("asc") => false,
                    Some(other) => {
                        return Err(TranslationError::InvalidConstant {
                            name: call.name.clone(),
                            message: format!("unknown direction {}", other),
                        })
                    }
                };
                let key = if desc { value.desc() } else { value };
                (SqlExpr::call(name, vec![]), vec![key], None)
            }
            WindowFunc::Lag => {
                let value = args.next().expect("lag takes a value").expr;
                let offset = args
                    .next()
                    .map(|a| a.expr)
                    .unwrap_or_else(|| self.literalizer.literal(&Value::Int(1), DataType::ConstInteger));
                match self.ctx.dialect.name() {
                    DialectName::Clickhouse => (
                        SqlExpr::call("lagInFrame", vec![value, offset]),
                        order_by,
                        Some(WHOLE_FRAME),
                    ),
                    _ => (SqlExpr::call("LAG", vec![value, offset]), order_by, None),
                }
            }
        };
        Ok(SqlExpr::Window {
            func: Box::new(func),
            partition_by,
            order_by,
            frame,
        })
    }

    fn if_block(
        &mut self,
        if_list: &[(NodeId, NodeId)],
        else_id: NodeId,
    ) -> Result<TypedExpr, TranslationError> {
        let mut branches = vec![];
        for (cond, result) in if_list {
            let cond = self.translate(*cond)?;
            if !cond.data_type.casts_to(&DataType::Boolean) {
                return Err(TypeError::TypeMismatch {
                    context: "IF condition".into(),
                    expected: DataType::Boolean.name().into(),
                    got: cond.data_type,
                }
                .into());
            }
            branches.push((cond, self.translate(*result)?));
        }
        let else_expr = self.translate(else_id)?;
        let data_type = common_type(
            "IF branches",
            branches.iter().map(|(_, r)| r).chain([&else_expr]),
        )?;

        // A fully constant block folds to the branch it selects.
        let all_constant = branches
            .iter()
            .all(|(c, r)| c.constant.is_some() && r.constant.is_some())
            && else_expr.constant.is_some();
        if all_constant {
            let chosen = branches
                .iter()
                .find(|(c, _)| c.constant == Some(Value::Bool(true)))
                .map(|(_, r)| r)
                .unwrap_or(&else_expr);
            return Ok(TypedExpr {
                expr: chosen.expr.clone(),
                data_type,
                constant: chosen.constant.clone(),
            });
        }

        Ok(TypedExpr {
            expr: SqlExpr::Case {
                operand: None,
                whens: branches.into_iter().map(|(c, r)| (c.expr, r.expr)).collect(),
                else_expr: else_branch(else_expr),
            },
            data_type: data_type.non_const(),
            constant: None,
        })
    }

    fn case_block(
        &mut self,
        case_id: NodeId,
        when_list: &[(NodeId, NodeId)],
        else_id: NodeId,
    ) -> Result<TypedExpr, TranslationError> {
        let operand = self.translate(case_id)?;
        let mut whens = vec![];
        for (value, result) in when_list {
            let value = self.translate(*value)?;
            if operand.data_type.common_supertype(&value.data_type).is_none() {
                return Err(TypeError::TypeMismatch {
                    context: "CASE value".into(),
                    expected: operand.data_type.non_const().name().into(),
                    got: value.data_type,
                }
                .into());
            }
            whens.push((value, self.translate(*result)?));
        }
        let else_expr = self.translate(else_id)?;
        let data_type = common_type(
            "CASE branches",
            whens.iter().map(|(_, r)| r).chain([&else_expr]),
        )?;
        Ok(TypedExpr {
            expr: SqlExpr::Case {
                operand: Some(Box::new(operand.expr)),
                whens: whens.into_iter().map(|(v, r)| (v.expr, r.expr)).collect(),
                else_expr: else_branch(else_expr),
            },
            data_type: data_type.non_const(),
            constant: None,
        })
    }
}

/// Rejects clauses the function does not support.
fn check_clauses(function: &Function, call: &FuncCall) -> Result<(), TranslationError> {
    let unsupported = |clause| {
        Err(TranslationError::WindowClauseNotSupported {
            name: function.name.into(),
            clause,
        })
    };
    if call.grouping.is_some() && !function.supports_grouping() {
        return unsupported("window grouping");
    }
    if !call.ordering.is_empty() && !function.supports_ordering() {
        return unsupported("ORDER BY");
    }
    if !call.ignore_dimensions.is_empty() && !function.supports_ignore_dimensions() {
        return unsupported("IGNORE DIMENSIONS");
    }
    if !call.before_filter_by.is_empty() && !function.supports_bfb() {
        return unsupported("BEFORE FILTER BY");
    }
    match &call.lod {
        None => {}
        Some(_) if !function.supports_lod() => return unsupported("level of detail"),
        // Only the identity specifiers are translatable in a single query.
        Some(LodSpecifier::Include(dims) | LodSpecifier::Exclude(dims)) if dims.is_empty() => {}
        Some(_) => return unsupported("level of detail"),
    }
    Ok(())
}

fn common_type<'a>(
    context: &str,
    mut exprs: impl Iterator<Item = &'a TypedExpr>,
) -> Result<DataType, TranslationError> {
    let Some(first) = exprs.next() else {
        return Ok(DataType::Null);
    };
    let mut ty = first.data_type;
    for expr in exprs {
        ty = ty
            .common_supertype(&expr.data_type)
            .ok_or_else(|| TypeError::TypeMismatch {
                context: context.into(),
                expected: ty.non_const().name().into(),
                got: expr.data_type,
            })?;
    }
    Ok(ty)
}

fn else_branch(else_expr: TypedExpr) -> Option<Box<SqlExpr>> {
    match else_expr.constant {
        Some(Value::Null) => None,
        _ => Some(Box::new(else_expr.expr)),
    }
}

#[cfg(test)]
mod tests {
    use dl_formula_parser::parse;

    use super::*;

    fn env() -> TypeEnvironment {
        let mut env = TypeEnvironment::new();
        env.bind_column("x", Some("t"), "x", DataType::Integer);
        env.bind_column("s", Some("t"), "s", DataType::String);
        env.bind_column("city", Some("t"), "city", DataType::String);
        env.bind_column("d", Some("t"), "d", DataType::Date);
        env
    }

    fn sql(text: &str, dialect: DialectCombo) -> Result<String, TranslationError> {
        let registry = Registry::builtin();
        let env = env();
        let ctx = TranslationCtx::new(&registry, &env, dialect);
        let formula = parse(text).unwrap();
        translate(&formula, &ctx).map(|t| t.to_sql(dialect.name()))
    }

    #[test]
    fn long_chains_translate() {
        let text = vec!["[x]"; 250].join(" + ");
        let sql = sql(&text, DialectCombo::POSTGRESQL_9_6).unwrap();
        assert_eq!(sql.matches("\"t\".\"x\"").count(), 250);

        let text = vec!["[x]"; 300].join(" + ");
        assert!(matches!(
            parse(&text),
            Err(dl_formula_parser::ParseError::Recursion(_))
        ));
        let registry = Registry::builtin();
        // Formulas built programmatically can be deeper than any parsed one;
        // translation refuses them instead of exhausting the stack.
        let mut builder = dl_formula_parser::FormulaBuilder::new();
        let mut root = builder.field("x");
        for _ in 0..10_000 {
            let x = builder.field("x");
            root = builder.binary("+", root, x);
        }
        let deep = builder.finish(root);
        assert_eq!(deep.field_names(deep.root()), ["x"]);
        let env = env();
        let ctx = TranslationCtx::new(&registry, &env, DialectCombo::POSTGRESQL_9_6);
        assert!(matches!(
            translate(&deep, &ctx),
            Err(TranslationError::Recursion(_))
        ));
    }

    #[test]
    fn deterministic() {
        let text = "IF [x] > 1 THEN CONCAT([s], 'a') ELSE UPPER([s]) END";
        let first = sql(text, DialectCombo::POSTGRESQL_9_6).unwrap();
        for _ in 0..10 {
            assert_eq!(sql(text, DialectCombo::POSTGRESQL_9_6).unwrap(), first);
        }
    }

    #[test]
    fn folding_agrees_with_eval() {
        let registry = Registry::builtin();
        let env = env();
        let ctx = TranslationCtx::new(&registry, &env, DialectCombo::POSTGRESQL_9_6);
        let formula = parse("MD5(\"DataLens\")").unwrap();
        let typed = translate(&formula, &ctx).unwrap();
        assert_eq!(typed.data_type, DataType::ConstString);
        assert_eq!(
            typed.to_sql(DialectName::Postgresql),
            "'C1FD5D9E4189FB89C1021A72F7E06C00'"
        );
        assert_eq!(
            typed.constant,
            eval("md5", &[Value::String("DataLens".into())])
        );
    }

    #[test]
    fn collation_dependent_calls_are_not_folded() {
        let registry = Registry::builtin();
        let env = env();
        for (text, dialect) in [
            ("'a' < 'B'", DialectCombo::POSTGRESQL_9_6),
            ("CONTAINS('ABC', 'b')", DialectCombo::MYSQL_8_0_12),
            ("UPPER('straße')", DialectCombo::POSTGRESQL_9_6),
        ] {
            let ctx = TranslationCtx::new(&registry, &env, dialect);
            let typed = translate(&parse(text).unwrap(), &ctx).unwrap();
            assert_eq!(typed.constant, None, "{}", text);
        }
        assert_eq!(sql("'a' = 'a'", DialectCombo::POSTGRESQL_9_6).unwrap(), "TRUE");
    }

    #[test]
    fn unsupported_dialect() {
        let err = sql("MD5([s])", DialectCombo::SQLITE).unwrap_err();
        assert_eq!(
            err.to_string(),
            "function md5 is not implemented for SQLITE dialect and given arguments (STRING)"
        );
    }

    #[test]
    fn mixed_dialects() {
        let err = sql("[x] + 1", DialectCombo::POSTGRESQL_9_6 | DialectCombo::SQLITE).unwrap_err();
        assert_eq!(
            err.to_string(),
            "POSTGRESQL_9_6|SQLITE is not a single dialect family"
        );
        assert!(sql("[x] + 1", DialectCombo::POSTGRESQL).is_ok());
    }

    #[test]
    fn lookup_outside_query() {
        let err = sql("AGO(SUM([x]), [d])", DialectCombo::POSTGRESQL_9_6).unwrap_err();
        assert_eq!(
            err,
            TranslationError::LookupOutsideQuery { name: "ago".into() }
        );
    }

    #[test]
    fn window_partitions() {
        let registry = Registry::builtin();
        let env = env();
        let city = parse("[city]").unwrap();
        let d = parse("[d]").unwrap();
        let ctx = TranslationCtx::new(&registry, &env, DialectCombo::POSTGRESQL_9_6).with_dimensions(vec![
            Dimension {
                extract: city.extract(city.root()),
                expr: SqlExpr::column(Some("t"), "city"),
            },
            Dimension {
                extract: d.extract(d.root()),
                expr: SqlExpr::column(Some("t"), "d"),
            },
        ]);
        let render = |text: &str| {
            let formula = parse(text).unwrap();
            translate(&formula, &ctx).map(|t| t.to_sql(DialectName::Postgresql))
        };
        assert_eq!(
            render("SUM(SUM([x]) AMONG [d])").unwrap(),
            "SUM(SUM(\"t\".\"x\")) OVER (PARTITION BY \"t\".\"city\")"
        );
        assert_eq!(
            render("SUM(SUM([x]) AMONG [d] IGNORE DIMENSIONS [city])").unwrap(),
            "SUM(SUM(\"t\".\"x\")) OVER ()"
        );
        assert_eq!(
            render("RSUM(SUM([x]) WITHIN [city] ORDER BY [d] DESC)").unwrap(),
            "SUM(SUM(\"t\".\"x\")) OVER (PARTITION BY \"t\".\"city\" ORDER BY \"t\".\"d\" DESC \
             ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW)"
        );
        assert_eq!(
            render("RANK(SUM([x]), 'asc' TOTAL)").unwrap(),
            "RANK() OVER (ORDER BY SUM(\"t\".\"x\"))"
        );
        assert_eq!(
            render("SUM([x] ORDER BY [d])").unwrap_err(),
            TranslationError::WindowClauseNotSupported {
                name: "sum".into(),
                clause: "ORDER BY",
            }
        );
    }

    #[test]
    fn type_errors() {
        assert!(matches!(
            sql("[nope] + 1", DialectCombo::POSTGRESQL_9_6).unwrap_err(),
            TranslationError::Type(TypeError::UnknownField { .. })
        ));
        assert!(matches!(
            sql("IF [s] THEN 1 ELSE 2 END", DialectCombo::POSTGRESQL_9_6).unwrap_err(),
            TranslationError::Type(TypeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            sql("[x] IN ('a', 'b')", DialectCombo::POSTGRESQL_9_6).unwrap_err(),
            TranslationError::Type(TypeError::NoMatchingSignature { .. })
        ));
    }

    #[test]
    fn compeng_literals() {
        assert_eq!(
            sql("[x] + 1", DialectCombo::COMPENG).unwrap(),
            "(\"t\".\"x\" + CAST(1 AS SMALLINT))"
        );
    }
}
