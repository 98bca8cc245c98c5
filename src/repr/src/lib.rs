// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Fundamental data representation.
//!
//! This module contains the types for representing data in the formula
//! compiler and query planner.
//!
//! * [`DataType`] is the logical type of a formula, a field or a column.
//! * [`DialectCombo`] is a set of target SQL dialects.
//! * [`Value`] is a single runtime value, and [`Row`] an ordered sequence of
//!   them.

#![deny(missing_debug_implementations)]

mod dialect;
mod scalar;
mod value;

pub use dialect::{
    DialectCombo, DialectName, DialectRegistry, MixedDialectError, UnknownBackendError,
};
pub use scalar::{DataType, DataTypeParams};
pub use value::{Row, Value};
