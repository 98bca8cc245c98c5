// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Planning of chart data requests.
//!
//! A request names dataset fields by role ([`legend`]). Its block is shaped
//! into a [`QuerySpec`](formalizer::QuerySpec), compiled into a
//! [`CompiledMultiQuery`](compiled::CompiledMultiQuery) of one or two
//! levels ([`compiler`]), adapted to the processor that runs it
//! ([`mutator`]) and finally rendered as SQL ([`render`]).

#![deny(missing_debug_implementations)]

use dl_dyncfg::{Config, ConfigSet};

pub mod catalog;
pub mod compiled;
pub mod compiler;
mod error;
pub mod formalizer;
pub mod legend;
pub mod mutator;
pub mod render;

pub use crate::error::PlanningError;

/// Whether filters that are always true and constant group-by expressions
/// are dropped before execution.
pub const OPTIMIZE_CONST_FILTERS: Config<bool> = Config::new(
    "optimize_const_filters",
    true,
    "Drop constant-true filters and constant group-by expressions from compiled queries.",
);

/// Adds the full set of this crate's configs to the given set.
pub fn all_dyncfgs(configs: ConfigSet) -> ConfigSet {
    configs.add(&OPTIMIZE_CONST_FILTERS)
}
