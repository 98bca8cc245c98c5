// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Formula lexer.
//!
//! Keywords and function names are case insensitive. Field names are written
//! in square brackets and may contain any character but `]`. Strings may be
//! quoted with either `'` or `"` and use backslash escapes. Date and datetime
//! literals are written between `#` signs, generic datetimes between `##`.

use std::fmt;
use std::str::FromStr;

use dl_ore::lex::LexBuf;

use crate::error::ParseError;

macro_rules! keywords {
    ($($variant:ident => $text:literal,)*) => {
        /// A reserved word of the formula language.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Keyword {
            $($variant,)*
        }

        impl Keyword {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text,)*
                }
            }
        }

        impl FromStr for Keyword {
            type Err = ();

            fn from_str(s: &str) -> Result<Keyword, ()> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok(Keyword::$variant);
                    }
                )*
                Err(())
            }
        }
    };
}

keywords! {
    And => "AND",
    Or => "OR",
    Not => "NOT",
    Like => "LIKE",
    In => "IN",
    Between => "BETWEEN",
    Is => "IS",
    Null => "NULL",
    True => "TRUE",
    False => "FALSE",
    If => "IF",
    Then => "THEN",
    Elseif => "ELSEIF",
    Else => "ELSE",
    End => "END",
    Case => "CASE",
    When => "WHEN",
    Total => "TOTAL",
    Within => "WITHIN",
    Among => "AMONG",
    Order => "ORDER",
    By => "BY",
    Asc => "ASC",
    Desc => "DESC",
    Before => "BEFORE",
    Filter => "FILTER",
    Ignore => "IGNORE",
    Dimensions => "DIMENSIONS",
    Fixed => "FIXED",
    Include => "INCLUDE",
    Exclude => "EXCLUDE",
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Keyword(Keyword),
    /// A bare word that is not a keyword, as written.
    Ident(String),
    /// The contents of a `[...]` field reference.
    Field(String),
    Integer(String),
    Float(String),
    String(String),
    /// The contents of a `#...#` literal.
    Date(String),
    /// The contents of a `##...##` literal.
    GenericDatetime(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl Token {
    pub fn name(&self) -> &str {
        match self {
            Token::Keyword(kw) => kw.as_str(),
            Token::Ident(_) => "identifier",
            Token::Field(_) => "field",
            Token::Integer(_) | Token::Float(_) => "number",
            Token::String(_) => "string literal",
            Token::Date(_) => "date literal",
            Token::GenericDatetime(_) => "generic datetime literal",
            Token::Op(_) => "operator",
            Token::LParen => "left parenthesis",
            Token::RParen => "right parenthesis",
            Token::Comma => "comma",
        }
    }

    pub fn value(&self) -> String {
        match self {
            Token::Keyword(kw) => kw.as_str().to_string(),
            Token::Ident(val) => val.to_string(),
            Token::Field(val) => format!("[{}]", val),
            Token::Integer(val) | Token::Float(val) => val.to_string(),
            Token::String(val) => format!("{:?}", val),
            Token::Date(val) => format!("#{}#", val),
            Token::GenericDatetime(val) => format!("##{}##", val),
            Token::Op(val) => val.to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Comma => ",".to_string(),
        }
    }

    /// How the token is described in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Keyword(kw) => kw.to_string(),
            Token::LParen | Token::RParen | Token::Comma => format!("'{}'", self.value()),
            _ => format!("{} {}", self.name(), self.value()),
        }
    }
}

macro_rules! bail {
    ($pos:expr, $($fmt:expr),*) => {
        return Err(ParseError::UnexpectedToken { position: $pos, token: format!($($fmt),*) })
    }
}

/// Converts byte offsets into 1-based character positions.
///
/// Offsets must be requested in non-decreasing order.
#[derive(Debug)]
struct Positions<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> Positions<'a> {
    fn new(text: &'a str) -> Positions<'a> {
        Positions {
            text,
            byte: 0,
            chars: 0,
        }
    }

    fn at(&mut self, byte: usize) -> usize {
        if byte < self.byte {
            return self.text[..byte].chars().count() + 1;
        }
        self.chars += self.text[self.byte..byte].chars().count();
        self.byte = byte;
        self.chars + 1
    }
}

/// Lexes a formula.
///
/// Returns a list of tokens alongside the 1-based character position of
/// their first character, and the position just past the end of the input.
pub fn lex(formula: &str) -> Result<(Vec<(Token, usize)>, usize), ParseError> {
    let buf = &mut LexBuf::new(formula);
    let positions = &mut Positions::new(formula);
    let mut tokens = vec![];
    while let Some(ch) = buf.next() {
        let pos = positions.at(buf.pos() - ch.len_utf8());
        let token = match ch {
            _ if ch.is_whitespace() => continue,
            '-' if buf.consume('-') => {
                buf.take_while(|ch| ch != '\n');
                continue;
            }
            '/' if buf.consume('*') => {
                if buf.take_to_delimiter("*/").is_none() {
                    bail!(pos, "unterminated comment");
                }
                continue;
            }
            '\'' | '"' => Token::String(lex_string(buf, ch, pos)?),
            '[' => match buf.take_to_delimiter("]") {
                Some(name) => Token::Field(name.to_string()),
                None => bail!(pos, "unterminated field reference"),
            },
            '#' if buf.consume('#') => match buf.take_to_delimiter("##") {
                Some(text) => Token::GenericDatetime(text.trim().to_string()),
                None => bail!(pos, "unterminated datetime literal"),
            },
            '#' => match buf.take_to_delimiter("#") {
                Some(text) => Token::Date(text.trim().to_string()),
                None => bail!(pos, "unterminated date literal"),
            },
            'A'..='Z' | 'a'..='z' | '_' => lex_ident(buf),
            '0'..='9' => lex_number(buf),
            '.' if matches!(buf.peek(), Some('0'..='9')) => lex_number(buf),
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '+' | '-' | '*' | '/' | '%' | '^' | '=' | '!' | '<' | '>' => lex_op(buf, ch, pos)?,
            _ => bail!(pos, "character {:?}", ch),
        };
        tokens.push((token, pos))
    }
    let end = positions.at(formula.len());
    Ok((tokens, end))
}

fn lex_ident(buf: &mut LexBuf) -> Token {
    buf.prev();
    let word = buf.take_while(|ch| matches!(ch, 'A'..='Z' | 'a'..='z' | '0'..='9' | '_'));
    match word.parse() {
        Ok(kw) => Token::Keyword(kw),
        Err(_) => Token::Ident(word.to_string()),
    }
}

fn lex_string(buf: &mut LexBuf, quote: char, pos: usize) -> Result<String, ParseError> {
    let mut s = String::new();
    loop {
        match buf.next() {
            Some(c) if c == quote => return Ok(s),
            Some('\\') => match buf.next() {
                Some('n') => s.push('\n'),
                Some('r') => s.push('\r'),
                Some('t') => s.push('\t'),
                Some(c) => s.push(c),
                None => break,
            },
            Some(c) => s.push(c),
            None => break,
        }
    }
    bail!(pos, "unterminated string")
}

fn lex_number(buf: &mut LexBuf) -> Token {
    buf.prev();
    let start = buf.pos();
    let mut is_float = false;
    buf.take_while(|ch| ch.is_ascii_digit());
    if buf.peek() == Some('.') {
        is_float = true;
        buf.next();
        buf.take_while(|ch| ch.is_ascii_digit());
    }
    if matches!(buf.peek(), Some('e' | 'E')) {
        let rest = &buf.inner()[buf.pos()..];
        let exp_follows = match rest.chars().nth(1) {
            Some('0'..='9') => true,
            Some('+' | '-') => matches!(rest.chars().nth(2), Some('0'..='9')),
            _ => false,
        };
        if exp_follows {
            is_float = true;
            buf.next();
            if !buf.consume('+') {
                buf.consume('-');
            }
            buf.take_while(|ch| ch.is_ascii_digit());
        }
    }
    let text = buf.inner()[start..buf.pos()].to_string();
    if is_float {
        Token::Float(text)
    } else {
        Token::Integer(text)
    }
}

fn lex_op(buf: &mut LexBuf, ch: char, pos: usize) -> Result<Token, ParseError> {
    let op = match ch {
        '+' => "+",
        '-' => "-",
        '*' => "*",
        '/' => "/",
        '%' => "%",
        '^' => "^",
        '=' if buf.consume('=') => "==",
        '=' => "=",
        '!' if buf.consume('=') => "!=",
        '<' if buf.consume('=') => "<=",
        '<' if buf.consume('>') => "<>",
        '<' => "<",
        '>' if buf.consume('=') => ">=",
        '>' => ">",
        _ => bail!(pos, "character {:?}", ch),
    };
    Ok(Token::Op(op))
}
