// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Execution of compiled multi-queries.
//!
//! The [`planner`] turns a mutated multi-query into a flat list of
//! [operations](ops): downloads from the source database, uploads into
//! scratch tables of the computation engine, engine-side calculations and
//! in-process joins. The [`processor`] runs those operations as soon as
//! their input streams are ready, and [`result`] converts the rows of the
//! final stream into their wire form.

#![deny(missing_debug_implementations)]

use std::time::Duration;

use dl_dyncfg::{Config, ConfigSet};

pub mod cache;
pub mod connection;
pub mod context;
mod error;
pub mod executor;
pub mod markup;
pub mod ops;
pub mod planner;
pub mod postprocess;
pub mod processor;
pub mod request;
pub mod result;
pub mod stream;

#[cfg(test)]
mod testing;

pub use crate::error::{Error, ErrorClass, ExecutionError};

/// Whether engine queries that only join two downloaded queries run in
/// process instead of on the computation engine.
pub const ENABLE_LOCAL_JOINS: Config<bool> = Config::new(
    "enable_local_joins",
    true,
    "Run pure equi-joins of two downloaded queries in process instead of uploading them.",
);

/// The maximum number of operations of one plan that run at once.
pub const EXEC_MAX_CONCURRENT_OPS: Config<usize> = Config::new(
    "exec_max_concurrent_ops",
    8,
    "The maximum number of operations of one plan that run concurrently.",
);

/// How long mutated entities stay in the mutation cache.
pub const MUTATION_CACHE_TTL: Config<Duration> = Config::new(
    "mutation_cache_ttl",
    Duration::from_secs(60),
    "How long mutated entities stay in the mutation cache.",
);

/// The name prefix of scratch tables created on the computation engine.
pub const COMPENG_SCRATCH_TABLE_PREFIX: Config<String> = Config::new(
    "compeng_scratch_table_prefix",
    "tmp_",
    "The name prefix of scratch tables created on the computation engine.",
);

/// Adds the full set of this crate's configs to the given set.
pub fn all_dyncfgs(configs: ConfigSet) -> ConfigSet {
    configs
        .add(&ENABLE_LOCAL_JOINS)
        .add(&EXEC_MAX_CONCURRENT_OPS)
        .add(&MUTATION_CACHE_TTL)
        .add(&COMPENG_SCRATCH_TABLE_PREFIX)
}
