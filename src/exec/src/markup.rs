// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Rich text values.
//!
//! Databases hold markup in a compact serialized form: `(b "text")` is a
//! call of the markup function `b` on the string `text`, and calls nest.
//! Strings are double quoted, with quotes doubled to escape them. Results
//! carry markup as structured nodes instead, such as
//! `{"type": "bold", "content": {"type": "text", "content": "text"}}`.

use serde_json::{json, Value as JsonValue};

const LPAR: char = '(';
const RPAR: char = ')';
const QUOTE: char = '"';
const SEP: char = ' ';

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    #[error("malformed markup at position {pos}: {message}")]
    Malformed { message: String, pos: usize },
    #[error("unknown markup function {name}")]
    UnknownFunction { name: String },
    #[error("invalid markup: {0}")]
    Invalid(String),
}

/// A parsed markup value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkupNode {
    Text(String),
    Call { func: String, args: Vec<MarkupNode> },
}

impl MarkupNode {
    pub fn call(func: &str, args: Vec<MarkupNode>) -> MarkupNode {
        MarkupNode::Call {
            func: func.to_string(),
            args,
        }
    }

    pub fn text(text: &str) -> MarkupNode {
        MarkupNode::Text(text.to_string())
    }
}

fn malformed(message: &str, pos: usize) -> MarkupError {
    MarkupError::Malformed {
        message: message.to_string(),
        pos,
    }
}

struct Parser<'a> {
    data: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.data[self.pos..].chars().next()
    }

    fn find(&self, c: char, from: usize) -> Option<usize> {
        self.data[from..].find(c).map(|i| from + i)
    }

    fn node(&mut self) -> Result<MarkupNode, MarkupError> {
        match self.peek() {
            Some(LPAR) => self.call(),
            Some(QUOTE) => self.string(),
            Some(_) => Err(malformed("unexpected data", self.pos)),
            None => Err(malformed("unexpected end", self.pos)),
        }
    }

    fn call(&mut self) -> Result<MarkupNode, MarkupError> {
        self.pos += LPAR.len_utf8();
        let rpar = self
            .find(RPAR, self.pos)
            .ok_or_else(|| malformed("missing closing parenthesis", self.pos))?;
        let name_end = match self.find(SEP, self.pos) {
            Some(sep) if sep < rpar => sep,
            // `(br)`
            _ => {
                let func = self.data[self.pos..rpar].to_string();
                self.pos = rpar + RPAR.len_utf8();
                return Ok(MarkupNode::Call { func, args: vec![] });
            }
        };
        let func = self.data[self.pos..name_end].to_string();
        self.pos = name_end + SEP.len_utf8();
        let mut args = vec![];
        while self.peek() != Some(RPAR) {
            args.push(self.node()?);
            match self.peek() {
                Some(RPAR) => break,
                Some(SEP) => self.pos += SEP.len_utf8(),
                Some(_) => return Err(malformed("expected a separator", self.pos)),
                None => return Err(malformed("unexpected end", self.pos)),
            }
        }
        self.pos += RPAR.len_utf8();
        Ok(MarkupNode::Call { func, args })
    }

    fn string(&mut self) -> Result<MarkupNode, MarkupError> {
        self.pos += QUOTE.len_utf8();
        let mut out = String::new();
        loop {
            let quote = self
                .find(QUOTE, self.pos)
                .ok_or_else(|| malformed("unterminated string", self.pos))?;
            out.push_str(&self.data[self.pos..quote]);
            self.pos = quote + QUOTE.len_utf8();
            if self.peek() == Some(QUOTE) {
                out.push(QUOTE);
                self.pos += QUOTE.len_utf8();
            } else {
                return Ok(MarkupNode::Text(out));
            }
        }
    }
}

/// Parses the serialized form of a markup value, which must be a call.
pub fn parse(data: &str) -> Result<MarkupNode, MarkupError> {
    if !data.starts_with(LPAR) || !data.ends_with(RPAR) {
        return Err(malformed("markup must be a call", 0));
    }
    let mut parser = Parser { data, pos: 0 };
    let node = parser.node()?;
    if parser.pos != data.len() {
        return Err(malformed("extra data at the end", parser.pos));
    }
    Ok(node)
}

/// Serializes a markup value.
pub fn dump(node: &MarkupNode) -> String {
    match node {
        MarkupNode::Text(text) => {
            let escaped = text.replace(QUOTE, "\"\"");
            format!("{QUOTE}{escaped}{QUOTE}")
        }
        MarkupNode::Call { func, args } => {
            let mut out = format!("{LPAR}{func}");
            for arg in args {
                out.push(SEP);
                out.push_str(&dump(arg));
            }
            out.push(RPAR);
            out
        }
    }
}

fn empty() -> JsonValue {
    json!({"type": "concat", "children": []})
}

/// The string argument at `i`; nested calls are not strings.
fn text_arg(args: &[MarkupNode], i: usize) -> Result<&str, MarkupError> {
    match args.get(i) {
        Some(MarkupNode::Text(text)) => Ok(text),
        _ => Err(MarkupError::Invalid(format!("argument {} must be a string", i + 1))),
    }
}

fn dimension(value: &str, name: &str) -> Result<JsonValue, MarkupError> {
    if value.is_empty() {
        return Ok(JsonValue::Null);
    }
    match value.parse::<i64>() {
        Ok(n) if n >= 0 => Ok(n.into()),
        Ok(_) => Err(MarkupError::Invalid(format!("{} cannot be negative", name))),
        Err(_) => Err(MarkupError::Invalid(format!("{} must be an integer", name))),
    }
}

/// The structured form of a markup value.
///
/// Calls with the wrong number of arguments become an empty concatenation,
/// so that `NULL` arguments produced by a database read as empty text.
pub fn verbalize(node: &MarkupNode) -> Result<JsonValue, MarkupError> {
    let (func, args) = match node {
        MarkupNode::Text(text) => return Ok(json!({"type": "text", "content": text})),
        MarkupNode::Call { func, args } => (func.as_str(), args.as_slice()),
    };
    let v = verbalize;
    let node = match (func, args) {
        ("c", children) => {
            let children = children.iter().map(v).collect::<Result<Vec<_>, _>>()?;
            json!({"type": "concat", "children": children})
        }
        ("a", [_, content]) => {
            json!({"type": "url", "url": text_arg(args, 0)?, "content": v(content)?})
        }
        ("cl", [content, _]) => {
            json!({"type": "color", "color": text_arg(args, 1)?, "content": v(content)?})
        }
        ("sz", [content, _]) => {
            json!({"type": "size", "size": text_arg(args, 1)?, "content": v(content)?})
        }
        ("userinfo", [content, _]) => json!({
            "type": "user_info",
            "user_info": text_arg(args, 1)?,
            "content": v(content)?,
        }),
        ("br", []) => json!({"type": "br"}),
        ("i", [content]) => json!({"type": "italics", "content": v(content)?}),
        ("b", [content]) => json!({"type": "bold", "content": v(content)?}),
        ("img", [_, _, _, _]) => {
            let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
            json!({
                "type": "img",
                "src": non_empty(text_arg(args, 0)?),
                "width": dimension(text_arg(args, 1)?, "width")?,
                "height": dimension(text_arg(args, 2)?, "height")?,
                "alt": non_empty(text_arg(args, 3)?),
            })
        }
        ("tooltip", [text, tooltip, rest @ ..]) if rest.len() <= 1 => {
            let placement = match rest {
                [_] => text_arg(args, 2)?,
                _ => "auto",
            };
            if !["top", "right", "bottom", "left", "auto"].contains(&placement) {
                return Err(MarkupError::Invalid(format!(
                    "placement must be top, right, bottom, left or auto, not {}",
                    placement
                )));
            }
            json!({
                "type": "tooltip",
                "content": v(text)?,
                "tooltip": v(tooltip)?,
                "placement": placement,
            })
        }
        ("a" | "cl" | "sz" | "userinfo" | "br" | "i" | "b" | "img" | "tooltip", _) => empty(),
        (name, _) => {
            return Err(MarkupError::UnknownFunction {
                name: name.to_string(),
            })
        }
    };
    Ok(node)
}

/// Parses and verbalizes a serialized markup value.
pub fn parse_and_verbalize(data: &str) -> Result<JsonValue, MarkupError> {
    verbalize(&parse(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested() {
        let node = parse(r#"(c (b "Hello, ""world""") (br) "!")"#).unwrap();
        assert_eq!(
            node,
            MarkupNode::call(
                "c",
                vec![
                    MarkupNode::call("b", vec![MarkupNode::text("Hello, \"world\"")]),
                    MarkupNode::call("br", vec![]),
                    MarkupNode::text("!"),
                ]
            )
        );
        assert_eq!(dump(&node), r#"(c (b "Hello, ""world""") (br) "!")"#);
    }

    #[test]
    fn malformed_markup() {
        struct TestCase {
            input: &'static str,
            pos: usize,
        }
        let test_cases = [
            TestCase { input: "\"text\"", pos: 0 },
            TestCase { input: "(b \"text)", pos: 4 },
            TestCase { input: "(b \"a\"\"b\")x)", pos: 10 },
            TestCase { input: "(b \"a\"x)", pos: 6 },
        ];
        for tc in test_cases {
            match parse(tc.input) {
                Err(MarkupError::Malformed { pos, .. }) => assert_eq!(pos, tc.pos, "{}", tc.input),
                other => panic!("{}: unexpected {:?}", tc.input, other),
            }
        }
    }

    #[test]
    fn verbalized() {
        assert_eq!(
            parse_and_verbalize(r#"(b "text")"#).unwrap(),
            json!({"type": "bold", "content": {"type": "text", "content": "text"}})
        );
        assert_eq!(
            parse_and_verbalize(r#"(a "https://datalens.tech" (i "docs"))"#).unwrap(),
            json!({
                "type": "url",
                "url": "https://datalens.tech",
                "content": {"type": "italics", "content": {"type": "text", "content": "docs"}},
            })
        );
        assert_eq!(
            parse_and_verbalize(r#"(img "" "10" "" "logo")"#).unwrap(),
            json!({"type": "img", "src": null, "width": 10, "height": null, "alt": "logo"})
        );
        assert_eq!(
            parse_and_verbalize(r#"(tooltip "a" "b")"#).unwrap()["placement"],
            "auto"
        );
        // Arity mismatches read as empty text.
        assert_eq!(parse_and_verbalize(r#"(b "x" "y")"#).unwrap(), empty());
        assert_eq!(
            parse_and_verbalize(r#"(blink "x")"#),
            Err(MarkupError::UnknownFunction {
                name: "blink".into()
            })
        );
        assert!(matches!(
            parse_and_verbalize(r#"(tooltip "a" "b" "middle")"#),
            Err(MarkupError::Invalid(_))
        ));
    }
}
