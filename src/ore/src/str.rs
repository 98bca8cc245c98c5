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

//! String utilities.

use std::fmt::{self, Display};

/// Extension methods for [`str`].
pub trait StrExt {
    /// Wraps the string slice in a type whose display implementation renders
    /// the string surrounded by `quote` with every embedded `quote` doubled.
    ///
    /// ```
    /// use dl_ore::str::StrExt;
    ///
    /// assert_eq!("it's".quoted('\'').to_string(), "'it''s'");
    /// ```
    fn quoted(&self, quote: char) -> QuotedStr;
}

impl StrExt for str {
    fn quoted(&self, quote: char) -> QuotedStr {
        QuotedStr { s: self, quote }
    }
}

/// Displays a string slice surrounded by quote characters.
///
/// Constructed by [`StrExt::quoted`].
#[derive(Debug)]
pub struct QuotedStr<'a> {
    s: &'a str,
    quote: char,
}

impl<'a> Display for QuotedStr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.quote)?;
        for c in self.s.chars() {
            if c == self.quote {
                write!(f, "{}{}", c, c)?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "{}", self.quote)
    }
}

/// Creates a type whose [`Display`] implementation outputs each item in
/// `iter` separated by `separator`.
pub fn separated<'a, I>(separator: &'a str, iter: I) -> Separated<'a, I>
where
    I: IntoIterator,
    I::Item: Display,
    I: Clone,
{
    Separated { separator, iter }
}

/// Displays an iterator with a separator between its items.
///
/// Constructed by [`separated`].
#[derive(Debug)]
pub struct Separated<'a, I> {
    separator: &'a str,
    iter: I,
}

impl<'a, I> Display for Separated<'a, I>
where
    I: IntoIterator + Clone,
    I::Item: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, item) in self.iter.clone().into_iter().enumerate() {
            if i != 0 {
                write!(f, "{}", self.separator)?;
            }
            write!(f, "{}", item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separated_display() {
        assert_eq!(separated(", ", ["a", "b", "c"]).to_string(), "a, b, c");
        assert_eq!(separated(", ", Vec::<u8>::new()).to_string(), "");
    }

    #[test]
    fn quoted_display() {
        assert_eq!("abc".quoted('"').to_string(), "\"abc\"");
        assert_eq!("a\"b".quoted('"').to_string(), "\"a\"\"b\"");
    }
}
