// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use dl_ore::stack::RecursionLimitError;
use dl_ore::str::separated;
use dl_repr::{DataType, DialectCombo, MixedDialectError};

/// A formula is not well typed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("unknown function {name}")]
    UnknownFunction { name: String },
    #[error("no matching signature for {name}({})", separated(", ", .arg_types))]
    NoMatchingSignature {
        name: String,
        arg_types: Vec<DataType>,
    },
    #[error("unknown field {name}")]
    UnknownField { name: String },
    #[error("{context}: expected {expected}, got {got}")]
    TypeMismatch {
        context: String,
        expected: String,
        got: DataType,
    },
}

impl TypeError {
    pub fn hint(&self) -> Option<String> {
        match self {
            TypeError::NoMatchingSignature { .. } => {
                Some("Check the argument types or add an explicit type conversion.".into())
            }
            _ => None,
        }
    }
}

/// A well typed formula cannot be expressed in the target dialect.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TranslationError {
    #[error(
        "function {name} is not implemented for {dialect} dialect and given arguments ({})",
        separated(", ", .arg_types)
    )]
    UnsupportedForDialect {
        name: String,
        dialect: DialectCombo,
        arg_types: Vec<DataType>,
    },
    #[error("lookup function {name} can only be used at the top level of a query")]
    LookupOutsideQuery { name: String },
    #[error("function {name} does not support {clause}")]
    WindowClauseNotSupported { name: String, clause: &'static str },
    #[error("invalid constant argument to {name}: {message}")]
    InvalidConstant { name: String, message: String },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Dialect(#[from] MixedDialectError),
    #[error("formula nesting {0}")]
    Recursion(#[from] RecursionLimitError),
}

impl TranslationError {
    pub fn detail(&self) -> Option<String> {
        match self {
            TranslationError::UnsupportedForDialect { .. } => Some(
                "The data source cannot compute this function and no fallback was applied.".into(),
            ),
            _ => None,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            TranslationError::Type(e) => e.hint(),
            TranslationError::WindowClauseNotSupported { clause, .. } => {
                Some(format!("Remove the {} clause.", clause))
            }
            _ => None,
        }
    }
}
