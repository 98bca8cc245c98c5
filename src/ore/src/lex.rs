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

//! Lexing utilities.

/// A cursor over a string with a variety of lexing convenience methods.
#[derive(Debug)]
pub struct LexBuf<'a> {
    buf: &'a str,
    pos: usize,
}

impl<'a> LexBuf<'a> {
    /// Creates a new lexical buffer.
    ///
    /// The internal cursor is initialized to point at the start of `buf`.
    pub fn new(buf: &'a str) -> LexBuf<'a> {
        LexBuf { buf, pos: 0 }
    }

    /// Returns the next character in the buffer, if any, without advancing the
    /// internal cursor.
    pub fn peek(&self) -> Option<char> {
        self.buf[self.pos..].chars().next()
    }

    /// Returns a slice containing the next `n` characters in the buffer.
    ///
    /// Returns `None` if there are not `n` characters left in the buffer.
    /// Does not advance the internal cursor.
    pub fn peek_n(&self, n: usize) -> Option<&'a str> {
        let rest = &self.buf[self.pos..];
        match rest.char_indices().nth(n) {
            Some((i, _)) => Some(&rest[..i]),
            None if rest.chars().count() == n => Some(rest),
            None => None,
        }
    }

    /// Returns the previous character in the buffer, positioning the internal
    /// cursor to before the character.
    ///
    /// The next call to `LexBuf::next` will return the same character.
    ///
    /// # Panics
    ///
    /// Panics if `prev` is called when the internal cursor is positioned at
    /// the beginning of the buffer.
    pub fn prev(&mut self) -> char {
        if let Some(c) = self.buf[..self.pos].chars().rev().next() {
            self.pos -= c.len_utf8();
            c
        } else {
            panic!("LexBuf::prev called on buffer at position 0")
        }
    }

    /// Advances the internal cursor past the next character in the buffer and
    /// returns the character.
    ///
    /// Returns `None` if the buffer is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<char> {
        if let Some(c) = self.buf[self.pos..].chars().next() {
            self.pos += c.len_utf8();
            Some(c)
        } else {
            None
        }
    }

    /// Advances the internal cursor past the next character in the buffer if
    /// the next character is `ch`.
    ///
    /// Returns whether the cursor advanced.
    pub fn consume(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.next();
            true
        } else {
            false
        }
    }

    /// Advances the internal cursor past `s` if it exactly matches the next
    /// characters in the buffer, ignoring ASCII case.
    ///
    /// Returns whether the cursor advanced.
    pub fn consume_str_ignore_case(&mut self, s: &str) -> bool {
        let rest = &self.buf[self.pos..];
        if rest.len() >= s.len()
            && rest.is_char_boundary(s.len())
            && rest[..s.len()].eq_ignore_ascii_case(s)
        {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Searches the buffer for `delim`, returning the string from the current
    /// cursor position to the start of `delim`.
    ///
    /// Returns `None` if `delim` is not found in the buffer. The internal
    /// cursor is advanced past the end of `delim` on success.
    pub fn take_to_delimiter(&mut self, delim: &str) -> Option<&'a str> {
        let pos = self.pos;
        if let Some(offset) = self.buf[pos..].find(delim) {
            self.pos += offset + delim.len();
            Some(&self.buf[pos..pos + offset])
        } else {
            None
        }
    }

    /// Searches the buffer for the first character that does not satisfy
    /// `predicate`, returning the string from the current cursor position to
    /// the position of that character.
    ///
    /// The internal cursor is advanced to the character that did not match.
    pub fn take_while<P>(&mut self, mut predicate: P) -> &'a str
    where
        P: FnMut(char) -> bool,
    {
        let pos = self.pos;
        while let Some(ch) = self.peek() {
            if predicate(ch) {
                self.next();
            } else {
                break;
            }
        }
        &self.buf[pos..self.pos]
    }

    /// Reports the byte offset of the internal cursor.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Returns the string that the lexical buffer wraps.
    pub fn inner(&self) -> &'a str {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_movement() {
        let mut buf = LexBuf::new("aé#x");
        assert_eq!(buf.next(), Some('a'));
        assert_eq!(buf.peek(), Some('é'));
        assert_eq!(buf.peek_n(2), Some("é#"));
        assert_eq!(buf.next(), Some('é'));
        assert_eq!(buf.pos(), 3);
        assert_eq!(buf.prev(), 'é');
        assert_eq!(buf.pos(), 1);
        assert_eq!(buf.take_while(|ch| ch != 'x'), "é#");
        assert!(buf.consume('x'));
        assert_eq!(buf.next(), None);
        assert_eq!(buf.peek_n(1), None);
        assert_eq!(buf.peek_n(0), Some(""));
    }

    #[test]
    fn delimiters_and_keywords() {
        let mut buf = LexBuf::new("2020-01-01# then");
        assert_eq!(buf.take_to_delimiter("#"), Some("2020-01-01"));
        buf.take_while(|ch| ch == ' ');
        assert!(!buf.consume_str_ignore_case("else"));
        assert!(buf.consume_str_ignore_case("THEN"));
        assert_eq!(buf.take_to_delimiter("#"), None);
    }
}
