// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Type checking and SQL translation of formulas.
//!
//! The entry point is [`translate`], which resolves every call in a parsed
//! [`Formula`](dl_formula_parser::Formula) against a [`Registry`] and renders
//! the result as a [`SqlExpr`] for one target dialect. Field references are
//! resolved through a [`TypeEnvironment`].

#![deny(missing_debug_implementations)]

mod env;
mod error;
pub mod eval;
mod expr;
pub mod func;
mod literal;
mod translate;

pub use crate::env::{FieldRef, TypeEnvironment};
pub use crate::error::{TranslationError, TypeError};
pub use crate::expr::{quote_ident, SqlExpr};
pub use crate::func::{Function, Registry, RegistryError};
pub use crate::literal::{literalizer_for, CompengLiteralizer, Literalizer, NativeLiteralizer};
pub use crate::translate::{translate, translate_node, Dimension, TranslationCtx, TypedExpr};
