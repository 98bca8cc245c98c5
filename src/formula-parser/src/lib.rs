// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The formula language front end.
//!
//! A formula is a small expression over dataset fields:
//!
//! ```text
//! IF SUM([Sales]) > 100 THEN 'big' ELSE 'small' END
//! RSUM(SUM([Sales]) WITHIN [City] ORDER BY [Date])
//! ```
//!
//! [`parse`] turns formula text into an immutable [`Formula`]. Callers that
//! parse the same text repeatedly should go through a [`ParseCache`].

pub mod ast;
mod cache;
mod error;
pub mod lexer;
mod parser;
pub mod rewrite;

use dl_dyncfg::{Config, ConfigSet};

pub use crate::ast::{Extract, Formula, FormulaBuilder, Literal, NodeId, NodeKind};
pub use crate::cache::{ParseCache, ParseCacheMetrics};
pub use crate::error::ParseError;
pub use crate::parser::RECURSION_LIMIT;

/// The maximum number of parsed formulas kept by a [`ParseCache`].
pub const PARSE_CACHE_SIZE: Config<usize> = Config::new(
    "formula_parse_cache_size",
    1000,
    "The maximum number of parsed formulas kept in the parse cache.",
);

/// Parses formula text.
pub fn parse(text: &str) -> Result<Formula, ParseError> {
    parser::parse_formula(text)
}

/// Adds the full set of this crate's configs to the given set.
pub fn all_dyncfgs(configs: ConfigSet) -> ConfigSet {
    configs.add(&PARSE_CACHE_SIZE)
}
