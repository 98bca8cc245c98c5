// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The operation registry.
//!
//! Every function and operator a formula may call is described by one or
//! more [`Function`]s: an overload group with argument type sequences, a
//! return type strategy, scope and planning flags, and an ordered list of
//! per-dialect translations. The builtin definitions live in a single table
//! in [`Registry::builtin`].

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use dl_repr::{DataType, DialectCombo, DialectName, Value};

use crate::error::{TranslationError, TypeError};
use crate::expr::SqlExpr;

bitflags! {
    /// Where a function is visible.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Scope: u32 {
        const SUGGESTED = 1;
        const DOCUMENTED = 1 << 1;
        const INTERNAL = 1 << 2;
        const STABLE = 1 << 3;
        const EXPLICIT_USAGE = 1 << 4;
        const WINDOW = 1 << 5;
        const LOOKUP = 1 << 6;
        const AGGREGATE = 1 << 7;
    }
}

impl Default for Scope {
    fn default() -> Scope {
        Scope::STABLE | Scope::EXPLICIT_USAGE | Scope::SUGGESTED | Scope::DOCUMENTED
    }
}

bitflags! {
    /// How a function takes part in query planning.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FuncFlags: u32 {
        const AGGREGATE = 1;
        const WINDOW = 1 << 1;
        const LOOKUP = 1 << 2;
        /// Accepts `TOTAL`, `WITHIN` and `AMONG`.
        const GROUPING = 1 << 3;
        /// Accepts `ORDER BY`.
        const ORDERING = 1 << 4;
        /// Accepts `FIXED`, `INCLUDE` and `EXCLUDE`.
        const LOD = 1 << 5;
        const IGNORE_DIMENSIONS = 1 << 6;
        /// Accepts `BEFORE FILTER BY`.
        const BFB = 1 << 7;
        /// Calls with constant arguments may be evaluated at compile time.
        const FOLDABLE = 1 << 8;
    }
}

/// The set of types accepted at one argument position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgType {
    Any,
    /// Any type that implicitly casts to one of the listed types.
    Of(&'static [DataType]),
}

impl ArgType {
    pub fn accepts(&self, ty: &DataType) -> bool {
        match self {
            ArgType::Any => true,
            ArgType::Of(types) => types.iter().any(|target| ty.casts_to(target)),
        }
    }
}

/// The argument types of one signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgTypeSequence {
    Exact(Vec<ArgType>),
    /// A fixed prefix followed by any number of arguments of one type.
    Variadic { fixed: Vec<ArgType>, rest: ArgType },
}

impl ArgTypeSequence {
    pub fn matches(&self, types: &[DataType]) -> bool {
        match self {
            ArgTypeSequence::Exact(params) => {
                params.len() == types.len() && params.iter().zip(types).all(|(p, t)| p.accepts(t))
            }
            ArgTypeSequence::Variadic { fixed, rest } => {
                types.len() >= fixed.len()
                    && fixed.iter().zip(types).all(|(p, t)| p.accepts(t))
                    && types[fixed.len()..].iter().all(|t| rest.accepts(t))
            }
        }
    }
}

macro_rules! params {
    ($rest:ident...) => {
        ArgTypeSequence::Variadic {
            fixed: vec![],
            rest: $rest,
        }
    };
    ($p0:ident, $rest:ident...) => {
        ArgTypeSequence::Variadic {
            fixed: vec![$p0],
            rest: $rest,
        }
    };
    ($($p:expr),*) => { ArgTypeSequence::Exact(vec![$($p),*]) };
}

macro_rules! builtins {
    {
        $(
            $name:literal => $kind:ident {
                $(
                    $($params:expr),+ => $return_type:expr $(, $flags:expr)? =>
                        [$($dialects:expr => $translation:expr),+ $(,)?];
                )+
            }
        ),+ $(,)?
    } => {{
        let mut registry = Registry::empty();
        $($(
            let function = Function {
                name: $name,
                arg_types: vec![$($params),+],
                return_type: $return_type.into(),
                scope: FuncKind::$kind.scope(),
                flags: FuncKind::$kind.flags() $(| $flags)?,
                variants: vec![$(TranslationVariant {
                    dialects: $dialects,
                    translation: $translation,
                }),+],
            };
            if let Err(e) = registry.register(function) {
                panic!("invalid builtin table: {}", e);
            }
        )+)+
        registry
    }};
}

/// How the return type of a call is derived from its argument types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnTypeStrategy {
    Fixed(DataType),
    /// The type of the argument at the index.
    FromArgs(usize),
    /// The common supertype of all arguments.
    FromArgsCommon,
    /// The element type of the array argument at the index.
    ArrayItem(usize),
}

impl From<DataType> for ReturnTypeStrategy {
    fn from(ty: DataType) -> ReturnTypeStrategy {
        ReturnTypeStrategy::Fixed(ty)
    }
}

impl ReturnTypeStrategy {
    /// The non-constant return type for the given argument types, or `None`
    /// if the arguments have no common type.
    pub fn resolve(&self, types: &[DataType]) -> Option<DataType> {
        let ty = match self {
            ReturnTypeStrategy::Fixed(ty) => *ty,
            ReturnTypeStrategy::FromArgs(i) => *types.get(*i)?,
            ReturnTypeStrategy::FromArgsCommon => {
                let (first, rest) = types.split_first()?;
                rest.iter()
                    .try_fold(*first, |acc, ty| acc.common_supertype(ty))?
            }
            ReturnTypeStrategy::ArrayItem(i) => types.get(*i)?.array_item()?,
        };
        Some(ty.non_const())
    }
}

/// The translated arguments of a call, as handed to a custom translation.
#[derive(Clone, Debug)]
pub struct CallArgs {
    pub name: &'static str,
    pub args: Vec<SqlExpr>,
    pub types: Vec<DataType>,
    pub dialect: DialectCombo,
}

impl CallArgs {
    fn family(&self) -> DialectName {
        self.dialect.name()
    }

    /// The value of a constant string argument.
    fn const_str(&self, i: usize) -> Result<&str, TranslationError> {
        match self.args.get(i) {
            Some(SqlExpr::Literal {
                value: Value::String(s),
                ..
            }) => Ok(s),
            _ => Err(TranslationError::InvalidConstant {
                name: self.name.into(),
                message: format!("argument {} must be a constant string", i + 1),
            }),
        }
    }

    fn take(self) -> Vec<SqlExpr> {
        self.args
    }
}

pub type CompileFn = fn(CallArgs) -> Result<SqlExpr, TranslationError>;

/// A window function and the shape of its `OVER` clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowFunc {
    /// An aggregate over the whole partition.
    Aggregate(&'static str),
    /// A running aggregate from the start of the partition to the current
    /// row.
    Running(&'static str),
    /// A ranking function. The second argument, if any, is the direction.
    Rank(&'static str),
    /// The value of the argument a number of rows back.
    Lag,
}

/// How a call renders in one dialect.
#[derive(Clone, Copy)]
pub enum Translation {
    /// `NAME(args)`.
    Call(&'static str),
    /// `(a op b)`.
    Infix(&'static str),
    /// `(op a)`.
    Prefix(&'static str),
    /// `(a op)`.
    Postfix(&'static str),
    Custom(CompileFn),
    Window(WindowFunc),
    /// A lookup function. Lookups are expanded into self-joins when queries
    /// are rendered and never translate as expressions.
    Lookup,
}

impl fmt::Debug for Translation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Translation::Call(name) => write!(f, "Call({})", name),
            Translation::Infix(op) => write!(f, "Infix({})", op),
            Translation::Prefix(op) => write!(f, "Prefix({})", op),
            Translation::Postfix(op) => write!(f, "Postfix({})", op),
            Translation::Custom(_) => f.write_str("Custom"),
            Translation::Window(w) => write!(f, "Window({:?})", w),
            Translation::Lookup => f.write_str("Lookup"),
        }
    }
}

impl Translation {
    /// Applies a non-window translation to translated arguments.
    pub fn apply(&self, args: CallArgs) -> Result<SqlExpr, TranslationError> {
        match self {
            Translation::Call(name) => Ok(SqlExpr::call(name, args.take())),
            Translation::Infix(op) => {
                let mut exprs = args.take().into_iter();
                match (exprs.next(), exprs.next(), exprs.next()) {
                    (Some(left), Some(right), None) => Ok(SqlExpr::binary(op, left, right)),
                    _ => unreachable!("infix operators take two arguments"),
                }
            }
            Translation::Prefix(op) => {
                let expr = args.take().into_iter().next();
                Ok(SqlExpr::prefix(op, expr.expect("prefix operators take one argument")))
            }
            Translation::Postfix(op) => {
                let expr = args.take().into_iter().next();
                Ok(SqlExpr::postfix(
                    expr.expect("postfix operators take one argument"),
                    op,
                ))
            }
            Translation::Custom(f) => f(args),
            Translation::Window(_) | Translation::Lookup => {
                unreachable!("window and lookup calls are translated by the translator")
            }
        }
    }
}

/// A translation and the dialects it applies to.
#[derive(Clone, Copy, Debug)]
pub struct TranslationVariant {
    pub dialects: DialectCombo,
    pub translation: Translation,
}

/// One overload group of a function.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: &'static str,
    pub arg_types: Vec<ArgTypeSequence>,
    pub return_type: ReturnTypeStrategy,
    pub scope: Scope,
    pub flags: FuncFlags,
    pub variants: Vec<TranslationVariant>,
}

impl Function {
    /// Reports whether any signature accepts the argument types.
    pub fn matches(&self, types: &[DataType]) -> bool {
        self.arg_types.iter().any(|seq| seq.matches(types))
    }

    /// The first translation that applies to `dialect`.
    pub fn variant(&self, dialect: DialectCombo) -> Option<&Translation> {
        self.variants
            .iter()
            .find(|v| v.dialects.matches(dialect))
            .map(|v| &v.translation)
    }

    pub fn is_aggregate(&self) -> bool {
        self.flags.contains(FuncFlags::AGGREGATE)
    }

    pub fn is_window(&self) -> bool {
        self.flags.contains(FuncFlags::WINDOW)
    }

    pub fn is_lookup(&self) -> bool {
        self.flags.contains(FuncFlags::LOOKUP)
    }

    pub fn supports_grouping(&self) -> bool {
        self.flags.contains(FuncFlags::GROUPING)
    }

    pub fn supports_ordering(&self) -> bool {
        self.flags.contains(FuncFlags::ORDERING)
    }

    pub fn supports_lod(&self) -> bool {
        self.flags.contains(FuncFlags::LOD)
    }

    pub fn supports_ignore_dimensions(&self) -> bool {
        self.flags.contains(FuncFlags::IGNORE_DIMENSIONS)
    }

    pub fn supports_bfb(&self) -> bool {
        self.flags.contains(FuncFlags::BFB)
    }

    pub fn is_foldable(&self) -> bool {
        self.flags.contains(FuncFlags::FOLDABLE)
    }

    fn dialects(&self) -> DialectCombo {
        self.variants
            .iter()
            .fold(DialectCombo::empty(), |acc, v| acc | v.dialects)
    }
}

/// The broad kind of a builtin, which determines its default scope and
/// flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FuncKind {
    Operator,
    Scalar,
    /// A scalar whose value changes between evaluations.
    Volatile,
    Aggregate,
    Window,
    Lookup,
}

impl FuncKind {
    fn scope(self) -> Scope {
        match self {
            FuncKind::Operator => Scope::INTERNAL | Scope::STABLE,
            FuncKind::Scalar | FuncKind::Volatile => Scope::default(),
            FuncKind::Aggregate => Scope::default() | Scope::AGGREGATE,
            FuncKind::Window => Scope::default() | Scope::WINDOW,
            FuncKind::Lookup => Scope::default() | Scope::LOOKUP,
        }
    }

    fn flags(self) -> FuncFlags {
        match self {
            FuncKind::Operator | FuncKind::Scalar => FuncFlags::FOLDABLE,
            FuncKind::Volatile => FuncFlags::empty(),
            FuncKind::Aggregate => FuncFlags::AGGREGATE | FuncFlags::LOD,
            FuncKind::Window => {
                FuncFlags::WINDOW
                    | FuncFlags::GROUPING
                    | FuncFlags::IGNORE_DIMENSIONS
                    | FuncFlags::BFB
            }
            FuncKind::Lookup => FuncFlags::LOOKUP | FuncFlags::IGNORE_DIMENSIONS | FuncFlags::BFB,
        }
    }
}

/// An invalid registry definition.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate definition of {name} for {dialects}")]
    DuplicateDefinition {
        name: &'static str,
        dialects: DialectCombo,
    },
}

/// All known functions, by lowercase name.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    functions: BTreeMap<&'static str, Vec<Function>>,
}

impl Registry {
    /// A registry with no functions.
    pub fn empty() -> Registry {
        Registry::default()
    }

    /// Adds an overload group.
    ///
    /// Fails if a signature of `function` is already registered under the
    /// same name for an overlapping set of dialects.
    pub fn register(&mut self, function: Function) -> Result<(), RegistryError> {
        let existing = self.functions.entry(function.name).or_default();
        for other in existing.iter() {
            if other.is_window() != function.is_window() {
                continue;
            }
            let overlap = other.dialects() & function.dialects();
            if overlap.is_empty() {
                continue;
            }
            if function.arg_types.iter().any(|seq| other.arg_types.contains(seq)) {
                return Err(RegistryError::DuplicateDefinition {
                    name: function.name,
                    dialects: overlap,
                });
            }
        }
        existing.push(function);
        Ok(())
    }

    /// Every overload group registered under `name`.
    pub fn get_functions(&self, name: &str) -> &[Function] {
        self.functions
            .get(name)
            .map(|functions| functions.as_slice())
            .unwrap_or(&[])
    }

    /// Reports whether a function is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        !self.get_functions(name).is_empty()
    }

    /// The overload group a call of `name` preferably resolves to, before
    /// argument types are known.
    ///
    /// A call with a window grouping clause prefers window functions; any
    /// other call prefers the rest.
    pub fn preferred(&self, name: &str, has_grouping: bool) -> Option<&Function> {
        let functions = self.get_functions(name);
        functions
            .iter()
            .find(|f| f.is_window() == has_grouping)
            .or_else(|| functions.first())
    }

    /// Resolves a call to the first overload group whose signature accepts
    /// the argument types, preferring window functions exactly when the call
    /// has a grouping clause.
    pub fn resolve(
        &self,
        name: &str,
        types: &[DataType],
        has_grouping: bool,
    ) -> Result<&Function, TypeError> {
        let functions = self.get_functions(name);
        if functions.is_empty() {
            return Err(TypeError::UnknownFunction { name: name.into() });
        }
        let preferred = functions.iter().filter(|f| f.is_window() == has_grouping);
        let others = functions.iter().filter(|f| f.is_window() != has_grouping);
        preferred
            .chain(others)
            .find(|f| f.matches(types))
            .ok_or_else(|| TypeError::NoMatchingSignature {
                name: name.into(),
                arg_types: types.to_vec(),
            })
    }

    /// Iterates over all overload groups.
    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.functions.values().flatten()
    }

    /// The builtin functions.
    ///
    /// Panics if the builtin table contains a duplicate definition.
    pub fn builtin() -> Registry {
        use Translation::*;
        use WindowFunc::*;

        builtins! {
            "+" => Operator {
                params!(NUMBER, NUMBER) => ReturnTypeStrategy::FromArgsCommon => [ANY_DIALECT => Infix("+")];
                params!(STRING, STRING) => DataType::String => [
                    PG_LIKE.union(SQLITE) => Infix("||"),
                    MY => Call("CONCAT"),
                    CH => Call("concat"),
                ];
            },
            "-" => Operator {
                params!(NUMBER, NUMBER) => ReturnTypeStrategy::FromArgsCommon => [ANY_DIALECT => Infix("-")];
            },
            "*" => Operator {
                params!(NUMBER, NUMBER) => ReturnTypeStrategy::FromArgsCommon => [ANY_DIALECT => Infix("*")];
            },
            "/" => Operator {
                params!(NUMBER, NUMBER) => DataType::Float => [
                    PG_LIKE => Custom(div_pg),
                    SQLITE => Custom(div_sqlite),
                    MY.union(CH) => Infix("/"),
                ];
            },
            "%" => Operator {
                params!(NUMBER, NUMBER) => ReturnTypeStrategy::FromArgsCommon => [ANY_DIALECT => Infix("%")];
            },
            "^" => Operator {
                params!(NUMBER, NUMBER) => DataType::Float => [PG_LIKE.union(MY) => Call("POWER"), CH => Call("pow")];
            },
            "neg" => Operator {
                params!(NUMBER) => ReturnTypeStrategy::FromArgs(0) => [ANY_DIALECT => Prefix("-")];
            },
            "==" => Operator {
                params!(NUMBER, NUMBER), params!(STRING, STRING), params!(TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Infix("=")];
            },
            "!=" => Operator {
                params!(NUMBER, NUMBER), params!(STRING, STRING), params!(TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Infix("<>")];
            },
            "<" => Operator {
                params!(NUMBER, NUMBER), params!(STRING, STRING), params!(TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Infix("<")];
            },
            "<=" => Operator {
                params!(NUMBER, NUMBER), params!(STRING, STRING), params!(TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Infix("<=")];
            },
            ">" => Operator {
                params!(NUMBER, NUMBER), params!(STRING, STRING), params!(TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Infix(">")];
            },
            ">=" => Operator {
                params!(NUMBER, NUMBER), params!(STRING, STRING), params!(TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Infix(">=")];
            },
            "and" => Operator {
                params!(BOOLEAN, BOOLEAN) => DataType::Boolean => [ANY_DIALECT => Infix("AND")];
            },
            "or" => Operator {
                params!(BOOLEAN, BOOLEAN) => DataType::Boolean => [ANY_DIALECT => Infix("OR")];
            },
            "not" => Operator {
                params!(BOOLEAN) => DataType::Boolean => [ANY_DIALECT => Prefix("NOT")];
            },
            "isnull" => Operator {
                params!(ANY) => DataType::Boolean => [ANY_DIALECT => Postfix("IS NULL")];
            },
            "istrue" => Operator {
                params!(BOOLEAN) => DataType::Boolean => [CH => Custom(is_true_ch), ANY_DIALECT => Postfix("IS TRUE")];
            },
            "isfalse" => Operator {
                params!(BOOLEAN) => DataType::Boolean => [CH => Custom(is_false_ch), ANY_DIALECT => Postfix("IS FALSE")];
            },
            "in" => Operator {
                params!(ANY, ANY...) => DataType::Boolean => [ANY_DIALECT => Custom(in_list)];
            },
            "notin" => Operator {
                params!(ANY, ANY...) => DataType::Boolean => [ANY_DIALECT => Custom(not_in_list)];
            },
            "like" => Operator {
                params!(STRING, STRING) => DataType::Boolean => [ANY_DIALECT => Infix("LIKE")];
            },
            "notlike" => Operator {
                params!(STRING, STRING) => DataType::Boolean => [ANY_DIALECT => Infix("NOT LIKE")];
            },
            "between" => Operator {
                params!(NUMBER, NUMBER, NUMBER), params!(STRING, STRING, STRING), params!(TEMPORAL, TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Custom(between)];
            },
            "notbetween" => Operator {
                params!(NUMBER, NUMBER, NUMBER), params!(STRING, STRING, STRING), params!(TEMPORAL, TEMPORAL, TEMPORAL) =>
                    DataType::Boolean => [ANY_DIALECT => Custom(not_between)];
            },

            // Strings.
            "concat" => Scalar {
                params!(ANY...) => DataType::String => [
                    PG_LIKE.union(MY) => Call("CONCAT"),
                    CH => Custom(concat_ch),
                    SQLITE => Custom(concat_sqlite),
                ];
            },
            "upper" => Scalar {
                params!(STRING) => DataType::String => [CH => Call("upperUTF8"), ANY_DIALECT => Call("UPPER")];
            },
            "lower" => Scalar {
                params!(STRING) => DataType::String => [CH => Call("lowerUTF8"), ANY_DIALECT => Call("LOWER")];
            },
            "len" => Scalar {
                params!(STRING) => DataType::Integer => [
                    PG_LIKE.union(MY) => Call("CHAR_LENGTH"),
                    CH => Call("lengthUTF8"),
                    SQLITE => Call("LENGTH"),
                ];
                params!(ARRAY) => DataType::Integer => [PG_LIKE => Call("CARDINALITY"), CH => Call("length")];
            },
            "left" => Scalar {
                params!(STRING, INTEGER) => DataType::String => [
                    PG_LIKE.union(MY) => Call("LEFT"),
                    CH => Custom(left_ch),
                    SQLITE => Custom(left_sqlite),
                ];
            },
            "right" => Scalar {
                params!(STRING, INTEGER) => DataType::String => [
                    PG_LIKE.union(MY) => Call("RIGHT"),
                    CH => Custom(right_ch),
                    SQLITE => Custom(right_sqlite),
                ];
            },
            "substr" => Scalar {
                params!(STRING, INTEGER), params!(STRING, INTEGER, INTEGER) => DataType::String => [
                    CH => Call("substringUTF8"),
                    ANY_DIALECT => Call("SUBSTR"),
                ];
            },
            "contains" => Scalar {
                params!(STRING, STRING) => DataType::Boolean => [
                    PG_LIKE => Custom(contains_pg),
                    MY => Custom(contains_mysql),
                    CH => Custom(contains_ch),
                    SQLITE => Custom(contains_sqlite),
                ];
            },
            "startswith" => Scalar {
                params!(STRING, STRING) => DataType::Boolean => [
                    PG_LIKE.union(MY) => Custom(startswith_pg),
                    CH => Call("startsWith"),
                    SQLITE => Custom(startswith_sqlite),
                ];
            },
            "replace" => Scalar {
                params!(STRING, STRING, STRING) => DataType::String => [CH => Call("replaceAll"), ANY_DIALECT => Call("REPLACE")];
            },
            "trim" => Scalar {
                params!(STRING) => DataType::String => [CH => Call("trimBoth"), ANY_DIALECT => Call("TRIM")];
            },
            "md5" => Scalar {
                params!(STRING) => DataType::String => [PG_LIKE.union(MY) => Custom(md5_upper), CH => Custom(md5_ch)];
            },

            // Math.
            "abs" => Scalar {
                params!(NUMBER) => ReturnTypeStrategy::FromArgs(0) => [ANY_DIALECT => Call("ABS")];
            },
            "round" => Scalar {
                params!(NUMBER), params!(NUMBER, INTEGER) => ReturnTypeStrategy::FromArgs(0) => [ANY_DIALECT => Call("ROUND")];
            },
            "floor" => Scalar {
                params!(NUMBER) => ReturnTypeStrategy::FromArgs(0) => [PG_LIKE.union(MY) => Call("FLOOR"), CH => Call("floor")];
            },
            "ceiling" => Scalar {
                params!(NUMBER) => ReturnTypeStrategy::FromArgs(0) => [PG_LIKE.union(MY) => Call("CEILING"), CH => Call("ceil")];
            },
            "power" => Scalar {
                params!(NUMBER, NUMBER) => DataType::Float => [PG_LIKE.union(MY) => Call("POWER"), CH => Call("pow")];
            },
            "sqrt" => Scalar {
                params!(NUMBER) => DataType::Float => [PG_LIKE.union(MY) => Call("SQRT"), CH => Call("sqrt")];
            },

            // Dates.
            "year" => Scalar {
                params!(TEMPORAL) => DataType::Integer => [
                    PG_LIKE => Custom(datepart_pg::<0>),
                    MY => Call("YEAR"),
                    CH => Call("toYear"),
                    SQLITE => Custom(datepart_sqlite::<0>),
                ];
            },
            "month" => Scalar {
                params!(TEMPORAL) => DataType::Integer => [
                    PG_LIKE => Custom(datepart_pg::<1>),
                    MY => Call("MONTH"),
                    CH => Call("toMonth"),
                    SQLITE => Custom(datepart_sqlite::<1>),
                ];
            },
            "day" => Scalar {
                params!(TEMPORAL) => DataType::Integer => [
                    PG_LIKE => Custom(datepart_pg::<2>),
                    MY => Call("DAY"),
                    CH => Call("toDayOfMonth"),
                    SQLITE => Custom(datepart_sqlite::<2>),
                ];
            },
            "dateadd" => Scalar {
                params!(TEMPORAL, INTEGER), params!(TEMPORAL, CONST_STRING, INTEGER) =>
                    ReturnTypeStrategy::FromArgs(0) => [PG_LIKE.union(MY).union(CH) => Custom(dateadd)];
            },
            "datetrunc" => Scalar {
                params!(TEMPORAL, CONST_STRING) => ReturnTypeStrategy::FromArgs(0) => [
                    PG_LIKE => Custom(datetrunc_pg),
                    CH => Custom(datetrunc_ch),
                ];
            },
            "now" => Volatile {
                params!() => DataType::Datetime => [
                    PG_LIKE.union(MY) => Call("NOW"),
                    CH => Call("now"),
                    SQLITE => Custom(now_sqlite),
                ];
            },

            // Type conversions.
            "int" => Scalar {
                params!(ANY) => DataType::Integer => [
                    PG_LIKE => Custom(cast_bigint),
                    MY => Custom(cast_signed),
                    CH => Call("toInt64"),
                    SQLITE => Custom(cast_integer),
                ];
            },
            "float" => Scalar {
                params!(ANY) => DataType::Float => [
                    PG_LIKE => Custom(cast_double),
                    MY => Custom(float_mysql),
                    CH => Call("toFloat64"),
                    SQLITE => Custom(cast_real),
                ];
            },
            "str" => Scalar {
                params!(ANY) => DataType::String => [
                    PG_LIKE.union(SQLITE) => Custom(cast_text),
                    MY => Custom(cast_char),
                    CH => Call("toString"),
                ];
            },
            "date" => Scalar {
                params!(ANY) => DataType::Date => [
                    PG_LIKE.union(MY) => Custom(cast_date),
                    CH => Call("toDate"),
                    SQLITE => Call("DATE"),
                ];
            },
            "datetime" => Scalar {
                params!(ANY) => DataType::Datetime => [
                    PG_LIKE => Custom(cast_timestamp),
                    MY => Custom(cast_datetime),
                    CH => Call("toDateTime"),
                    SQLITE => Call("DATETIME"),
                ];
            },
            "bool" => Scalar {
                params!(NUMBER) => DataType::Boolean => [PG_LIKE => Custom(cast_boolean), ANY_DIALECT => Custom(nonzero)];
            },

            // Aggregates.
            "sum" => Aggregate {
                params!(NUMBER) => ReturnTypeStrategy::FromArgs(0) => [ANY_DIALECT => Call("SUM")];
            },
            "avg" => Aggregate {
                params!(NUMBER) => DataType::Float => [ANY_DIALECT => Call("AVG")];
            },
            "min" => Aggregate {
                params!(ANY) => ReturnTypeStrategy::FromArgs(0) => [ANY_DIALECT => Call("MIN")];
            },
            "max" => Aggregate {
                params!(ANY) => ReturnTypeStrategy::FromArgs(0) => [ANY_DIALECT => Call("MAX")];
            },
            "count" => Aggregate {
                params!(), params!(ANY) => DataType::Integer => [ANY_DIALECT => Custom(count)];
            },
            "countd" => Aggregate {
                params!(ANY) => DataType::Integer => [ANY_DIALECT => Custom(count_distinct)];
            },

            // Window functions.
            "sum" => Window {
                params!(NUMBER) => ReturnTypeStrategy::FromArgs(0) => [WINDOWS => Window(Aggregate("SUM"))];
            },
            "avg" => Window {
                params!(NUMBER) => DataType::Float => [WINDOWS => Window(Aggregate("AVG"))];
            },
            "min" => Window {
                params!(ANY) => ReturnTypeStrategy::FromArgs(0) => [WINDOWS => Window(Aggregate("MIN"))];
            },
            "max" => Window {
                params!(ANY) => ReturnTypeStrategy::FromArgs(0) => [WINDOWS => Window(Aggregate("MAX"))];
            },
            "count" => Window {
                params!(ANY) => DataType::Integer => [WINDOWS => Window(Aggregate("COUNT"))];
            },
            "rsum" => Window {
                params!(NUMBER) => ReturnTypeStrategy::FromArgs(0), FuncFlags::ORDERING => [WINDOWS => Window(Running("SUM"))];
            },
            "rcount" => Window {
                params!(ANY) => DataType::Integer, FuncFlags::ORDERING => [WINDOWS => Window(Running("COUNT"))];
            },
            "rmin" => Window {
                params!(ANY) => ReturnTypeStrategy::FromArgs(0), FuncFlags::ORDERING => [WINDOWS => Window(Running("MIN"))];
            },
            "rmax" => Window {
                params!(ANY) => ReturnTypeStrategy::FromArgs(0), FuncFlags::ORDERING => [WINDOWS => Window(Running("MAX"))];
            },
            "ravg" => Window {
                params!(NUMBER) => DataType::Float, FuncFlags::ORDERING => [WINDOWS => Window(Running("AVG"))];
            },
            "rank" => Window {
                params!(ANY), params!(ANY, CONST_STRING) => DataType::Integer => [WINDOWS => Window(Rank("RANK"))];
            },
            "rank_dense" => Window {
                params!(ANY), params!(ANY, CONST_STRING) => DataType::Integer => [WINDOWS => Window(Rank("DENSE_RANK"))];
            },
            "lag" => Window {
                params!(ANY), params!(ANY, INTEGER) => ReturnTypeStrategy::FromArgs(0), FuncFlags::ORDERING =>
                    [WINDOWS => Window(Lag)];
            },

            // Lookups.
            "ago" => Lookup {
                params!(ANY, TEMPORAL), params!(ANY, TEMPORAL, CONST_STRING), params!(ANY, TEMPORAL, CONST_STRING, INTEGER) =>
                    ReturnTypeStrategy::FromArgs(0) => [LOOKUPS => Lookup];
            },
            "at_date" => Lookup {
                params!(ANY, TEMPORAL, TEMPORAL) => ReturnTypeStrategy::FromArgs(0) => [LOOKUPS => Lookup];
            },

            // Markup.
            "bold" => Scalar {
                params!(MARKUP) => DataType::Markup => [ANY_DIALECT => Custom(markup_bold)];
            },
            "italic" => Scalar {
                params!(MARKUP) => DataType::Markup => [ANY_DIALECT => Custom(markup_italic)];
            },
            "url" => Scalar {
                params!(STRING), params!(STRING, MARKUP) => DataType::Markup => [ANY_DIALECT => Custom(markup_url)];
            },
            "markup" => Scalar {
                params!(MARKUP...) => DataType::Markup => [ANY_DIALECT => Custom(markup_concat)];
            },

            // Arrays.
            "arr_str" => Scalar {
                params!(STRING...) => DataType::ArrayStr => [PG_LIKE.union(CH) => Custom(array)];
            },
            "arr_int" => Scalar {
                params!(INTEGER...) => DataType::ArrayInt => [PG_LIKE.union(CH) => Custom(array)];
            },
            "get_item" => Scalar {
                params!(ARRAY, INTEGER) => ReturnTypeStrategy::ArrayItem(0) => [PG_LIKE.union(CH) => Custom(get_item)];
            },
            "slice" => Scalar {
                params!(ARRAY, CONST_INTEGER) => ReturnTypeStrategy::FromArgs(0) => [PG_LIKE.union(CH) => Custom(array_slice)];
            }
        }
    }
}


const ANY: ArgType = ArgType::Any;
const NUMBER: ArgType = ArgType::Of(&[DataType::Float]);
const INTEGER: ArgType = ArgType::Of(&[DataType::Integer]);
const STRING: ArgType = ArgType::Of(&[DataType::String]);
const CONST_INTEGER: ArgType = ArgType::Of(&[DataType::ConstInteger]);
const CONST_STRING: ArgType = ArgType::Of(&[DataType::ConstString]);
const BOOLEAN: ArgType = ArgType::Of(&[DataType::Boolean]);
const TEMPORAL: ArgType = ArgType::Of(&[DataType::GenericDatetime]);
const ARRAY: ArgType = ArgType::Of(&[DataType::ArrayInt, DataType::ArrayFloat, DataType::ArrayStr]);
const MARKUP: ArgType = ArgType::Of(&[DataType::Markup, DataType::String]);

const ANY_DIALECT: DialectCombo = DialectCombo::ANY;
const PG_LIKE: DialectCombo = DialectCombo::POSTGRESQL.union(DialectCombo::COMPENG);
const MY: DialectCombo = DialectCombo::MYSQL;
const CH: DialectCombo = DialectCombo::CLICKHOUSE;
const SQLITE: DialectCombo = DialectCombo::SQLITE;
const WINDOWS: DialectCombo = PG_LIKE
    .union(DialectCombo::CLICKHOUSE)
    .union(DialectCombo::MYSQL_8_0_12);
const LOOKUPS: DialectCombo = PG_LIKE.union(DialectCombo::CLICKHOUSE);

fn two(args: CallArgs) -> (SqlExpr, SqlExpr) {
    let mut args = args.take().into_iter();
    match (args.next(), args.next()) {
        (Some(a), Some(b)) => (a, b),
        _ => unreachable!("signature guarantees two arguments"),
    }
}

fn one(args: CallArgs) -> SqlExpr {
    match args.take().into_iter().next() {
        Some(a) => a,
        None => unreachable!("signature guarantees one argument"),
    }
}

fn div_pg(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (a, b) = two(args);
    Ok(SqlExpr::binary("/", SqlExpr::cast(a, "DOUBLE PRECISION"), b))
}

fn div_sqlite(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (a, b) = two(args);
    Ok(SqlExpr::binary("/", SqlExpr::cast(a, "REAL"), b))
}

fn is_true_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::binary("=", one(args), SqlExpr::literal(Value::Int(1))))
}

fn is_false_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::binary("=", one(args), SqlExpr::literal(Value::Int(0))))
}

fn in_list_impl(args: CallArgs, negated: bool) -> SqlExpr {
    let mut args = args.take();
    let expr = args.remove(0);
    SqlExpr::InList {
        expr: Box::new(expr),
        list: args,
        negated,
    }
}

fn in_list(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(in_list_impl(args, false))
}

fn not_in_list(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(in_list_impl(args, true))
}

fn between_impl(args: CallArgs, negated: bool) -> SqlExpr {
    let mut args = args.take().into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(expr), Some(low), Some(high)) => SqlExpr::Between {
            expr: Box::new(expr),
            low: Box::new(low),
            high: Box::new(high),
            negated,
        },
        _ => unreachable!("signature guarantees three arguments"),
    }
}

fn between(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(between_impl(args, false))
}

fn not_between(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(between_impl(args, true))
}

/// Concatenates string expressions in the way `dialect` supports.
pub(crate) fn concat(parts: Vec<SqlExpr>, dialect: DialectName) -> SqlExpr {
    match dialect {
        DialectName::Sqlite => {
            let mut parts = parts.into_iter();
            let first = parts.next().unwrap_or_else(|| SqlExpr::literal(Value::String("".into())));
            parts.fold(first, |acc, part| SqlExpr::binary("||", acc, part))
        }
        DialectName::Clickhouse => SqlExpr::call("concat", parts),
        DialectName::Postgresql | DialectName::Mysql | DialectName::Compeng => {
            SqlExpr::call("CONCAT", parts)
        }
    }
}

fn concat_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let parts = args
        .args
        .into_iter()
        .zip(args.types)
        .map(|(arg, ty)| {
            if ty.non_const() == DataType::String {
                arg
            } else {
                SqlExpr::call("toString", vec![arg])
            }
        })
        .collect();
    Ok(concat(parts, DialectName::Clickhouse))
}

fn concat_sqlite(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(concat(args.take(), DialectName::Sqlite))
}

fn left_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, n) = two(args);
    Ok(SqlExpr::call(
        "substringUTF8",
        vec![s, SqlExpr::literal(Value::Int(1)), n],
    ))
}

fn left_sqlite(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, n) = two(args);
    Ok(SqlExpr::call("SUBSTR", vec![s, SqlExpr::literal(Value::Int(1)), n]))
}

fn right_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, n) = two(args);
    Ok(SqlExpr::call("substringUTF8", vec![s, SqlExpr::prefix("-", n)]))
}

fn right_sqlite(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, n) = two(args);
    Ok(SqlExpr::call("SUBSTR", vec![s, SqlExpr::prefix("-", n)]))
}

fn positive(expr: SqlExpr) -> SqlExpr {
    SqlExpr::binary(">", expr, SqlExpr::literal(Value::Int(0)))
}

fn contains_pg(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, sub) = two(args);
    Ok(positive(SqlExpr::call("STRPOS", vec![s, sub])))
}

fn contains_mysql(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, sub) = two(args);
    Ok(positive(SqlExpr::call("LOCATE", vec![sub, s])))
}

fn contains_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, sub) = two(args);
    Ok(positive(SqlExpr::call("positionUTF8", vec![s, sub])))
}

fn contains_sqlite(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, sub) = two(args);
    Ok(positive(SqlExpr::call("INSTR", vec![s, sub])))
}

fn startswith_pg(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, prefix) = two(args);
    let len = SqlExpr::call("CHAR_LENGTH", vec![prefix.clone()]);
    Ok(SqlExpr::binary("=", SqlExpr::call("LEFT", vec![s, len]), prefix))
}

fn startswith_sqlite(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (s, prefix) = two(args);
    let len = SqlExpr::call("LENGTH", vec![prefix.clone()]);
    Ok(SqlExpr::binary(
        "=",
        SqlExpr::call("SUBSTR", vec![s, SqlExpr::literal(Value::Int(1)), len]),
        prefix,
    ))
}

fn md5_upper(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::call("UPPER", vec![SqlExpr::call("MD5", args.take())]))
}

fn md5_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::call("hex", vec![SqlExpr::call("MD5", args.take())]))
}

const DATE_PARTS: [(&str, &str); 3] = [("YEAR", "%Y"), ("MONTH", "%m"), ("DAY", "%d")];

fn datepart_pg<const P: usize>(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let extract = SqlExpr::Extract {
        field: DATE_PARTS[P].0,
        expr: Box::new(one(args)),
    };
    Ok(SqlExpr::cast(extract, "INTEGER"))
}

fn datepart_sqlite<const P: usize>(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let format = SqlExpr::literal(Value::String(DATE_PARTS[P].1.into()));
    Ok(SqlExpr::cast(
        SqlExpr::call("STRFTIME", vec![format, one(args)]),
        "INTEGER",
    ))
}

const DATEADD_UNITS: &[&str] = &["second", "minute", "hour", "day", "week", "month", "quarter", "year"];

fn dateadd(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let unit = if args.args.len() == 3 {
        let unit = args.const_str(1)?.to_lowercase();
        if !DATEADD_UNITS.contains(&unit.as_str()) {
            return Err(TranslationError::InvalidConstant {
                name: args.name.into(),
                message: format!("unknown unit {}", unit),
            });
        }
        unit
    } else {
        "day".to_string()
    };
    let mut exprs = args.take();
    let amount = exprs.pop().expect("signature guarantees an amount");
    let date = exprs.remove(0);
    let interval = SqlExpr::Interval {
        amount: Box::new(amount),
        unit,
    };
    Ok(SqlExpr::binary("+", date, interval))
}

fn datetrunc_unit(args: &CallArgs) -> Result<String, TranslationError> {
    let unit = args.const_str(1)?.to_lowercase();
    if !DATEADD_UNITS.contains(&unit.as_str()) {
        return Err(TranslationError::InvalidConstant {
            name: args.name.into(),
            message: format!("unknown unit {}", unit),
        });
    }
    Ok(unit)
}

fn datetrunc_pg(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let unit = datetrunc_unit(&args)?;
    let expr = args.take().remove(0);
    Ok(SqlExpr::call(
        "DATE_TRUNC",
        vec![SqlExpr::literal(Value::String(unit)), expr],
    ))
}

fn datetrunc_ch(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let unit = datetrunc_unit(&args)?;
    let func = match unit.as_str() {
        "second" => "toStartOfSecond",
        "minute" => "toStartOfMinute",
        "hour" => "toStartOfHour",
        "day" => "toStartOfDay",
        "week" => "toMonday",
        "month" => "toStartOfMonth",
        "quarter" => "toStartOfQuarter",
        _ => "toStartOfYear",
    };
    let expr = args.take().remove(0);
    Ok(SqlExpr::call(func, vec![expr]))
}

fn now_sqlite(_: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::call(
        "DATETIME",
        vec![SqlExpr::literal(Value::String("now".into()))],
    ))
}

macro_rules! casts {
    ($($name:ident => $ty:literal),+ $(,)?) => {
        $(
            fn $name(args: CallArgs) -> Result<SqlExpr, TranslationError> {
                Ok(SqlExpr::cast(one(args), $ty))
            }
        )+
    };
}

casts! {
    cast_bigint => "BIGINT",
    cast_signed => "SIGNED",
    cast_integer => "INTEGER",
    cast_double => "DOUBLE PRECISION",
    cast_real => "REAL",
    cast_text => "TEXT",
    cast_char => "CHAR",
    cast_date => "DATE",
    cast_timestamp => "TIMESTAMP",
    cast_datetime => "DATETIME",
    cast_boolean => "BOOLEAN",
}

fn float_mysql(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::binary("+", one(args), SqlExpr::literal(Value::Float(0.0))))
}

fn nonzero(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::binary("<>", one(args), SqlExpr::literal(Value::Int(0))))
}

fn count(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let mut args = args.take();
    if args.is_empty() {
        args.push(SqlExpr::Star);
    }
    Ok(SqlExpr::call("COUNT", args))
}

fn count_distinct(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::Call {
        name: "COUNT".into(),
        args: args.take(),
        distinct: true,
    })
}

/// Serializes a markup argument: markup is passed through, strings become
/// quoted text nodes with `"` doubled.
fn markup_arg(expr: SqlExpr, ty: DataType, dialect: DialectName) -> SqlExpr {
    if ty.non_const() == DataType::Markup {
        return expr;
    }
    let replace = match dialect {
        DialectName::Clickhouse => "replaceAll",
        _ => "REPLACE",
    };
    let quote = || SqlExpr::literal(Value::String("\"".into()));
    let escaped = SqlExpr::call(
        replace,
        vec![expr, quote(), SqlExpr::literal(Value::String("\"\"".into()))],
    );
    concat(vec![quote(), escaped, quote()], dialect)
}

fn markup_node(node: &str, args: CallArgs) -> SqlExpr {
    let dialect = args.family();
    let mut parts = vec![SqlExpr::literal(Value::String(format!("({}", node)))];
    for (arg, ty) in args.args.into_iter().zip(args.types) {
        parts.push(SqlExpr::literal(Value::String(" ".into())));
        parts.push(markup_arg(arg, ty, dialect));
    }
    parts.push(SqlExpr::literal(Value::String(")".into())));
    concat(parts, dialect)
}

fn markup_bold(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(markup_node("b", args))
}

fn markup_italic(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(markup_node("i", args))
}

fn markup_url(mut args: CallArgs) -> Result<SqlExpr, TranslationError> {
    if args.args.len() == 1 {
        args.args.push(args.args[0].clone());
        args.types.push(args.types[0]);
    }
    Ok(markup_node("a", args))
}

fn markup_concat(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(markup_node("c", args))
}

fn array(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    Ok(SqlExpr::Array(args.take()))
}

fn get_item(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let (array, index) = two(args);
    Ok(SqlExpr::ArrayElement {
        array: Box::new(array),
        index: Box::new(index),
    })
}

fn array_slice(args: CallArgs) -> Result<SqlExpr, TranslationError> {
    let length = match args.args.get(1) {
        Some(SqlExpr::Literal {
            value: Value::Int(n),
            ..
        }) if *n > 0 => usize::try_from(*n).ok(),
        _ => None,
    };
    let Some(length) = length else {
        return Err(TranslationError::InvalidConstant {
            name: args.name.into(),
            message: "length must be a positive constant integer".into(),
        });
    };
    Ok(SqlExpr::ArraySlice {
        expr: Box::new(one(args)),
        length,
    })
}
