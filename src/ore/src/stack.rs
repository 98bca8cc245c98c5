// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Stack management utilities.
//!
//! Formulas and field definitions are authored by users, so any recursive
//! walk over them must be bounded. Types that recurse implement
//! [`CheckedRecursion`] by exposing a [`RecursionGuard`], and wrap each
//! recursive step in [`CheckedRecursion::checked_recur`]. Walks that have no
//! natural error path instead wrap each step in [`maybe_grow`], which moves
//! them onto a fresh stack segment before the current one runs out.

use std::cell::Cell;
use std::error::Error;
use std::fmt;

/// The red zone is the amount of stack space that must be available on the
/// current stack in order for [`maybe_grow`] to call the supplied closure
/// without allocating a new stack.
///
/// Debug builds have large frames, so the red zone is generous.
pub const STACK_RED_ZONE: usize = 64 << 10; // 64KiB

/// The size of any freshly allocated stacks.
pub const STACK_SIZE: usize = 2 << 20; // 2MiB

/// Grows the stack if necessary before invoking `f`.
///
/// This function is intended to be called at manually instrumented points
/// in a program's recursion. If the program is near the end of its stack,
/// a new segment of [`STACK_SIZE`] bytes is allocated and `f` runs on it.
#[inline(always)]
pub fn maybe_grow<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SIZE, f)
}

/// A trait for types which support bounded recursion.
pub trait CheckedRecursion {
    /// Extracts a reference to the recursion guard embedded within the type.
    fn recursion_guard(&self) -> &RecursionGuard;

    /// Checks whether it is safe to recur and calls `f` if so.
    ///
    /// If the recursion limit for the recursion guard returned by
    /// [`CheckedRecursion::recursion_guard`] has been reached, returns a
    /// `RecursionLimitError`. Otherwise, it will call `f`, passing it a
    /// reference to `self`, growing the stack first if necessary.
    fn checked_recur<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RecursionLimitError>,
    {
        self.recursion_guard().descend()?;
        let out = maybe_grow(|| f(self));
        self.recursion_guard().ascend();
        out
    }

    /// Like [`CheckedRecursion::checked_recur`], but operates on a mutable
    /// reference to `Self`.
    fn checked_recur_mut<F, T, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<RecursionLimitError>,
    {
        self.recursion_guard().descend()?;
        let out = maybe_grow(|| f(self));
        self.recursion_guard().ascend();
        out
    }
}

/// Tracks recursion depth.
///
/// See the [`CheckedRecursion`] trait for usage instructions.
#[derive(Default, Debug, Clone)]
pub struct RecursionGuard {
    depth: Cell<usize>,
    limit: usize,
}

impl RecursionGuard {
    /// Constructs a new recursion guard with the specified recursion limit.
    pub fn with_limit(limit: usize) -> RecursionGuard {
        RecursionGuard {
            depth: Cell::new(0),
            limit,
        }
    }

    /// Reports the current recursion depth.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Fails if `levels` more levels of nesting below the current depth
    /// would exceed the limit.
    ///
    /// Loops that build nested structures without recurring use this to
    /// count each level toward the limit.
    pub fn ensure_headroom(&self, levels: usize) -> Result<(), RecursionLimitError> {
        if self.depth.get().saturating_add(levels) > self.limit {
            Err(RecursionLimitError { limit: self.limit })
        } else {
            Ok(())
        }
    }

    fn descend(&self) -> Result<(), RecursionLimitError> {
        let depth = self.depth.get();
        if depth >= self.limit {
            Err(RecursionLimitError { limit: self.limit })
        } else {
            self.depth.set(depth + 1);
            Ok(())
        }
    }

    fn ascend(&self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// A [`RecursionGuard`]'s recursion limit was reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecursionLimitError {
    limit: usize,
}

impl RecursionLimitError {
    /// The limit that was exceeded.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl fmt::Display for RecursionLimitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "exceeded recursion limit of {}", self.limit)
    }
}

impl Error for RecursionLimitError {}
