// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Formula parser.
//!
//! A hand-written recursive descent parser over the tokens produced by
//! [`crate::lexer`]. Operators, from lowest to highest precedence:
//!
//! ```text
//! OR
//! AND
//! NOT (prefix)
//! = == != <> < <= > >=   (chains desugar to AND of pairs)
//! IS [NOT] NULL|TRUE|FALSE, [NOT] LIKE, [NOT] IN (...), [NOT] BETWEEN x AND y
//! + -
//! * / %
//! - (prefix)
//! ^ (right associative)
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use dl_ore::stack::{CheckedRecursion, RecursionGuard};

use crate::ast::{
    Formula, FormulaBuilder, FuncCall, Literal, LodSpecifier, NodeId, NodeKind, OrderingItem,
    WindowGrouping,
};
use crate::error::ParseError;
use crate::lexer::{self, Keyword, Token};

/// The maximum nesting depth of a formula.
pub const RECURSION_LIMIT: usize = 256;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses formula text into a [`Formula`].
pub fn parse_formula(text: &str) -> Result<Formula, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::EmptyFormula);
    }
    let (tokens, end) = lexer::lex(text)?;
    if tokens.is_empty() {
        // Only comments.
        return Err(ParseError::EmptyFormula);
    }
    let mut parser = Parser::new(tokens, end);
    let root = parser.parse_expr()?;
    if let Some(token) = parser.peek_token() {
        return Err(ParseError::UnexpectedToken {
            position: parser.peek_pos(),
            token: token.describe(),
        });
    }
    Ok(parser.builder.finish(root))
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    /// The index of the next token to process.
    index: usize,
    /// The position just past the end of the input.
    end: usize,
    builder: FormulaBuilder,
    recursion_guard: RecursionGuard,
}

impl CheckedRecursion for Parser {
    fn recursion_guard(&self) -> &RecursionGuard {
        &self.recursion_guard
    }
}

impl Parser {
    fn new(tokens: Vec<(Token, usize)>, end: usize) -> Parser {
        Parser {
            tokens,
            index: 0,
            end,
            builder: FormulaBuilder::new(),
            recursion_guard: RecursionGuard::with_limit(RECURSION_LIMIT),
        }
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek_nth_token(0)
    }

    fn peek_nth_token(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.index + n).map(|(t, _)| t)
    }

    fn peek_pos(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|(_, pos)| *pos)
            .unwrap_or(self.end)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(t, _)| t.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expected<T>(&self) -> Result<T, ParseError> {
        match self.peek_token() {
            Some(token) => Err(ParseError::UnexpectedToken {
                position: self.peek_pos(),
                token: token.describe(),
            }),
            None => Err(ParseError::UnexpectedEof { position: self.end }),
        }
    }

    fn peek_keyword(&self, kw: Keyword) -> bool {
        self.peek_token() == Some(&Token::Keyword(kw))
    }

    fn parse_keyword(&mut self, kw: Keyword) -> bool {
        if self.peek_keyword(kw) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn parse_keywords(&mut self, kws: &[Keyword]) -> bool {
        let matches = kws
            .iter()
            .enumerate()
            .all(|(i, kw)| self.peek_nth_token(i) == Some(&Token::Keyword(*kw)));
        if matches {
            self.index += kws.len();
        }
        matches
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<(), ParseError> {
        if self.parse_keyword(kw) {
            Ok(())
        } else {
            self.expected()
        }
    }

    fn consume_token(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.consume_token(expected) {
            Ok(())
        } else {
            self.expected()
        }
    }

    fn push(&mut self, kind: NodeKind, position: usize) -> NodeId {
        self.builder.push(kind, position)
    }

    fn binary(&mut self, name: &str, left: NodeId, right: NodeId, position: usize) -> NodeId {
        self.push(
            NodeKind::Binary {
                name: name.to_string(),
                left,
                right,
            },
            position,
        )
    }

    fn unary(&mut self, name: &str, expr: NodeId, position: usize) -> NodeId {
        self.push(
            NodeKind::Unary {
                name: name.to_string(),
                expr,
            },
            position,
        )
    }

    /// Counts one more operator of a left-deep chain, each of which nests
    /// the chain built so far one level deeper.
    fn extend_chain(&self, length: &mut usize) -> Result<(), ParseError> {
        *length += 1;
        self.recursion_guard.ensure_headroom(*length)?;
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<NodeId, ParseError> {
        self.checked_recur_mut(|parser| parser.parse_or())
    }

    fn parse_or(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let mut left = self.parse_and()?;
        let mut length = 0;
        while self.parse_keyword(Keyword::Or) {
            self.extend_chain(&mut length)?;
            let right = self.parse_and()?;
            left = self.binary("or", left, right, position);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let mut left = self.parse_not()?;
        let mut length = 0;
        while self.parse_keyword(Keyword::And) {
            self.extend_chain(&mut length)?;
            let right = self.parse_not()?;
            left = self.binary("and", left, right, position);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        if self.parse_keyword(Keyword::Not) {
            let expr = self.checked_recur_mut(|parser| parser.parse_not())?;
            Ok(self.unary("not", expr, position))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let mut left = self.parse_predicate()?;
        let mut chain: Option<NodeId> = None;
        let mut length = 0;
        loop {
            let name = match self.peek_token() {
                Some(Token::Op("=" | "==")) => "==",
                Some(Token::Op("!=" | "<>")) => "!=",
                Some(Token::Op("<")) => "<",
                Some(Token::Op("<=")) => "<=",
                Some(Token::Op(">")) => ">",
                Some(Token::Op(">=")) => ">=",
                _ => break,
            };
            self.index += 1;
            self.extend_chain(&mut length)?;
            let right = self.parse_predicate()?;
            let pair = self.binary(name, left, right, position);
            chain = Some(match chain {
                None => pair,
                Some(prev) => self.binary("and", prev, pair, position),
            });
            left = right;
        }
        Ok(chain.unwrap_or(left))
    }

    fn parse_predicate(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let expr = self.parse_additive()?;
        if self.parse_keyword(Keyword::Is) {
            let negated = self.parse_keyword(Keyword::Not);
            let name = match self.peek_token() {
                Some(Token::Keyword(Keyword::Null)) => "isnull",
                Some(Token::Keyword(Keyword::True)) => "istrue",
                Some(Token::Keyword(Keyword::False)) => "isfalse",
                _ => return self.expected(),
            };
            self.index += 1;
            let test = self.unary(name, expr, position);
            return Ok(if negated {
                self.unary("not", test, position)
            } else {
                test
            });
        }
        let negated = self.peek_keyword(Keyword::Not)
            && matches!(
                self.peek_nth_token(1),
                Some(Token::Keyword(Keyword::Like | Keyword::In | Keyword::Between))
            );
        if negated {
            self.index += 1;
        }
        let prefix = if negated { "not" } else { "" };
        if self.parse_keyword(Keyword::Like) {
            let pattern = self.parse_additive()?;
            return Ok(self.binary(&format!("{}like", prefix), expr, pattern, position));
        }
        if self.parse_keyword(Keyword::In) {
            let list_pos = self.peek_pos();
            self.expect_token(&Token::LParen)?;
            let items = self.parse_comma_separated(Parser::parse_expr)?;
            self.expect_token(&Token::RParen)?;
            let list = self.push(NodeKind::ExprList(items), list_pos);
            return Ok(self.binary(&format!("{}in", prefix), expr, list, position));
        }
        if self.parse_keyword(Keyword::Between) {
            let low = self.parse_additive()?;
            self.expect_keyword(Keyword::And)?;
            let high = self.parse_additive()?;
            return Ok(self.push(
                NodeKind::Ternary {
                    name: format!("{}between", prefix),
                    first: expr,
                    second: low,
                    third: high,
                },
                position,
            ));
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let mut left = self.parse_multiplicative()?;
        let mut length = 0;
        loop {
            let name = match self.peek_token() {
                Some(Token::Op("+")) => "+",
                Some(Token::Op("-")) => "-",
                _ => break,
            };
            self.index += 1;
            self.extend_chain(&mut length)?;
            let right = self.parse_multiplicative()?;
            left = self.binary(name, left, right, position);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let mut left = self.parse_unary()?;
        let mut length = 0;
        loop {
            let name = match self.peek_token() {
                Some(Token::Op("*")) => "*",
                Some(Token::Op("/")) => "/",
                Some(Token::Op("%")) => "%",
                _ => break,
            };
            self.index += 1;
            self.extend_chain(&mut length)?;
            let right = self.parse_unary()?;
            left = self.binary(name, left, right, position);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        if !self.consume_token(&Token::Op("-")) {
            return self.parse_power();
        }
        // A minus directly before a number literal is part of the literal,
        // unless the number is the base of a power.
        let is_number = matches!(
            self.peek_token(),
            Some(Token::Integer(_) | Token::Float(_))
        );
        if is_number && self.peek_nth_token(1) != Some(&Token::Op("^")) {
            if let Some(token) = self.next_token() {
                let lit = parse_number(&token, true, position)?;
                return Ok(self.push(NodeKind::Literal(lit), position));
            }
        }
        let expr = self.checked_recur_mut(|parser| parser.parse_unary())?;
        Ok(self.unary("neg", expr, position))
    }

    fn parse_power(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let base = self.parse_primary()?;
        if self.consume_token(&Token::Op("^")) {
            let exponent = self.checked_recur_mut(|parser| parser.parse_unary())?;
            return Ok(self.binary("^", base, exponent, position));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParseError> {
        let position = self.peek_pos();
        let token = match self.next_token() {
            Some(token) => token,
            None => return Err(ParseError::UnexpectedEof { position: self.end }),
        };
        let kind = match token {
            Token::Integer(_) | Token::Float(_) => {
                NodeKind::Literal(parse_number(&token, false, position)?)
            }
            Token::String(s) => NodeKind::Literal(Literal::String(s)),
            Token::Date(text) => NodeKind::Literal(parse_date_literal(&text, false, position)?),
            Token::GenericDatetime(text) => {
                NodeKind::Literal(parse_date_literal(&text, true, position)?)
            }
            Token::Keyword(Keyword::True) => NodeKind::Literal(Literal::Boolean(true)),
            Token::Keyword(Keyword::False) => NodeKind::Literal(Literal::Boolean(false)),
            Token::Keyword(Keyword::Null) => NodeKind::Null,
            Token::Field(name) => NodeKind::Field(name),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect_token(&Token::RParen)?;
                NodeKind::Parenthesized(inner)
            }
            Token::Keyword(Keyword::If) => self.parse_if_block()?,
            Token::Keyword(Keyword::Case) => self.parse_case_block()?,
            Token::Ident(name) if self.peek_token() == Some(&Token::LParen) => {
                self.index += 1;
                NodeKind::FuncCall(self.parse_call(name.to_lowercase())?)
            }
            token => {
                return Err(ParseError::UnexpectedToken {
                    position,
                    token: token.describe(),
                })
            }
        };
        Ok(self.push(kind, position))
    }

    /// Parses the rest of an `IF` block, after the `IF` keyword.
    fn parse_if_block(&mut self) -> Result<NodeKind, ParseError> {
        let mut if_list = vec![];
        loop {
            let cond = self.parse_expr()?;
            self.expect_keyword(Keyword::Then)?;
            let expr = self.parse_expr()?;
            if_list.push((cond, expr));
            if !self.parse_keyword(Keyword::Elseif) {
                break;
            }
        }
        let else_expr = self.parse_else()?;
        Ok(NodeKind::IfBlock { if_list, else_expr })
    }

    /// Parses the rest of a `CASE` block, after the `CASE` keyword.
    fn parse_case_block(&mut self) -> Result<NodeKind, ParseError> {
        let case_expr = self.parse_expr()?;
        let mut when_list = vec![];
        while self.parse_keyword(Keyword::When) {
            let value = self.parse_expr()?;
            self.expect_keyword(Keyword::Then)?;
            let expr = self.parse_expr()?;
            when_list.push((value, expr));
        }
        if when_list.is_empty() {
            return self.expected();
        }
        let else_expr = self.parse_else()?;
        Ok(NodeKind::CaseBlock {
            case_expr,
            when_list,
            else_expr,
        })
    }

    /// Parses `[ELSE expr] END`. A missing `ELSE` branch is `NULL`.
    fn parse_else(&mut self) -> Result<NodeId, ParseError> {
        let else_expr = if self.parse_keyword(Keyword::Else) {
            self.parse_expr()?
        } else {
            let position = self.peek_pos();
            self.push(NodeKind::Null, position)
        };
        self.expect_keyword(Keyword::End)?;
        Ok(else_expr)
    }

    /// Parses the arguments and trailing clauses of a call, after its opening
    /// parenthesis.
    fn parse_call(&mut self, name: String) -> Result<FuncCall, ParseError> {
        let mut call = FuncCall::plain(name, vec![]);
        if self.consume_token(&Token::RParen) {
            return Ok(call);
        }
        if !self.at_call_clause() {
            call.args = self.parse_comma_separated(Parser::parse_expr)?;
        }
        let mut seen_grouping = false;
        let mut seen_ordering = false;
        let mut seen_bfb = false;
        let mut seen_ignore = false;
        let mut seen_lod = false;
        loop {
            let clause_pos = self.peek_pos();
            let duplicate = |seen: &mut bool| {
                let dup = *seen;
                *seen = true;
                dup
            };
            match self.peek_token() {
                Some(Token::RParen) => {
                    self.index += 1;
                    return Ok(call);
                }
                Some(Token::Keyword(Keyword::Total | Keyword::Within | Keyword::Among)) => {
                    if duplicate(&mut seen_grouping) {
                        return self.expected();
                    }
                    call.grouping = Some(if self.parse_keyword(Keyword::Total) {
                        WindowGrouping::Total
                    } else if self.parse_keyword(Keyword::Within) {
                        WindowGrouping::Within(self.parse_dimension_list()?)
                    } else {
                        self.expect_keyword(Keyword::Among)?;
                        WindowGrouping::Among(self.parse_dimension_list()?)
                    });
                }
                Some(Token::Keyword(Keyword::Order)) => {
                    if duplicate(&mut seen_ordering) {
                        return self.expected();
                    }
                    self.index += 1;
                    self.expect_keyword(Keyword::By)?;
                    call.ordering = self.parse_comma_separated(Parser::parse_ordering_item)?;
                }
                Some(Token::Keyword(Keyword::Before)) => {
                    if duplicate(&mut seen_bfb) {
                        return self.expected();
                    }
                    if !self.parse_keywords(&[Keyword::Before, Keyword::Filter, Keyword::By]) {
                        self.index += 1;
                        return self.expected();
                    }
                    call.before_filter_by =
                        self.parse_comma_separated(|parser| match parser.peek_token() {
                            Some(Token::Field(name)) => {
                                let name = name.clone();
                                parser.index += 1;
                                Ok(name)
                            }
                            _ => parser.expected(),
                        })?;
                }
                Some(Token::Keyword(Keyword::Ignore)) => {
                    if duplicate(&mut seen_ignore) {
                        return self.expected();
                    }
                    if !self.parse_keywords(&[Keyword::Ignore, Keyword::Dimensions]) {
                        self.index += 1;
                        return self.expected();
                    }
                    call.ignore_dimensions = self.parse_dimension_list()?;
                }
                Some(Token::Keyword(Keyword::Fixed | Keyword::Include | Keyword::Exclude)) => {
                    if duplicate(&mut seen_lod) {
                        return self.expected();
                    }
                    call.lod = Some(if self.parse_keyword(Keyword::Fixed) {
                        LodSpecifier::Fixed(self.parse_dimension_list()?)
                    } else if self.parse_keyword(Keyword::Include) {
                        LodSpecifier::Include(self.parse_dimension_list()?)
                    } else {
                        self.expect_keyword(Keyword::Exclude)?;
                        LodSpecifier::Exclude(self.parse_dimension_list()?)
                    });
                }
                None => return Err(ParseError::UnexpectedEof { position: self.end }),
                Some(token) => {
                    return Err(ParseError::UnexpectedToken {
                        position: clause_pos,
                        token: token.describe(),
                    })
                }
            }
        }
    }

    fn at_call_clause(&self) -> bool {
        matches!(
            self.peek_token(),
            Some(Token::Keyword(
                Keyword::Total
                    | Keyword::Within
                    | Keyword::Among
                    | Keyword::Order
                    | Keyword::Before
                    | Keyword::Ignore
                    | Keyword::Fixed
                    | Keyword::Include
                    | Keyword::Exclude
            ))
        )
    }

    /// Parses a possibly empty list of dimensions.
    fn parse_dimension_list(&mut self) -> Result<Vec<NodeId>, ParseError> {
        if self.at_call_clause() || self.peek_token() == Some(&Token::RParen) {
            return Ok(vec![]);
        }
        self.parse_comma_separated(Parser::parse_expr)
    }

    fn parse_ordering_item(&mut self) -> Result<OrderingItem, ParseError> {
        let expr = self.parse_expr()?;
        let desc = if self.parse_keyword(Keyword::Desc) {
            true
        } else {
            self.parse_keyword(Keyword::Asc);
            false
        };
        Ok(OrderingItem { expr, desc })
    }

    fn parse_comma_separated<T, F>(&mut self, mut f: F) -> Result<Vec<T>, ParseError>
    where
        F: FnMut(&mut Parser) -> Result<T, ParseError>,
    {
        let mut values = vec![f(self)?];
        while self.consume_token(&Token::Comma) {
            values.push(f(self)?);
        }
        Ok(values)
    }
}

fn parse_number(token: &Token, negate: bool, position: usize) -> Result<Literal, ParseError> {
    let invalid = |text: &str, message: String| ParseError::InvalidLiteral {
        position,
        text: text.to_string(),
        message,
    };
    match token {
        Token::Integer(text) => {
            let signed = if negate {
                format!("-{}", text)
            } else {
                text.clone()
            };
            signed
                .parse::<i64>()
                .map(Literal::Integer)
                .map_err(|e| invalid(text, e.to_string()))
        }
        Token::Float(text) => {
            let value = text
                .parse::<f64>()
                .map_err(|e| invalid(text, e.to_string()))?;
            Ok(Literal::Float(if negate { -value } else { value }))
        }
        other => Err(invalid(&other.value(), "not a number".into())),
    }
}

/// Parses the contents of a `#...#` (or, if `generic`, `##...##`) literal.
fn parse_date_literal(text: &str, generic: bool, position: usize) -> Result<Literal, ParseError> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(Literal::Date(date));
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(if generic {
                Literal::GenericDatetime(dt)
            } else {
                Literal::Datetime(dt)
            });
        }
    }
    Err(ParseError::InvalidLiteral {
        position,
        text: text.to_string(),
        message: "invalid date or datetime value".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> String {
        parse_formula(s).unwrap().to_string()
    }

    #[test]
    fn precedence() {
        assert_eq!(
            parse("1 + 2 * 3"),
            "(+ (lit 1) (* (lit 2) (lit 3)))"
        );
        assert_eq!(
            parse("NOT [a] OR [b] AND [c]"),
            "(or (not (field \"a\")) (and (field \"b\") (field \"c\")))"
        );
        assert_eq!(parse("2 ^ 3 ^ 2"), "(^ (lit 2) (^ (lit 3) (lit 2)))");
        assert_eq!(parse("(1 + 2) * 3"), "(* (+ (lit 1) (lit 2)) (lit 3))");
    }

    #[test]
    fn unary_minus() {
        assert_eq!(parse("-5"), "(lit -5)");
        assert_eq!(parse("-2.5"), "(lit -2.5)");
        assert_eq!(parse("-[x]"), "(neg (field \"x\"))");
        assert_eq!(parse("-2 ^ 2"), "(neg (^ (lit 2) (lit 2)))");
        assert_eq!(parse("3 - -1"), "(- (lit 3) (lit -1))");
    }

    #[test]
    fn comparison_chain() {
        let formula = parse_formula("1 < [x] <= 3").unwrap();
        assert_eq!(
            formula.to_string(),
            "(and (< (lit 1) (field \"x\")) (<= (field \"x\") (lit 3)))"
        );
        assert_eq!(parse("[a] = 1"), "(== (field \"a\") (lit 1))");
        assert_eq!(parse("[a] <> 1"), "(!= (field \"a\") (lit 1))");
    }

    #[test]
    fn postfix_predicates() {
        assert_eq!(parse("[a] IS NULL"), "(isnull (field \"a\"))");
        assert_eq!(parse("[a] is not true"), "(not (istrue (field \"a\")))");
        assert_eq!(
            parse("[a] NOT IN (1, 2)"),
            "(notin (field \"a\") ((lit 1) (lit 2)))"
        );
        assert_eq!(
            parse("[a] NOT LIKE 'x%'"),
            "(notlike (field \"a\") (lit \"x%\"))"
        );
        assert_eq!(
            parse("[a] BETWEEN 1 AND 2 AND TRUE"),
            "(and (between ((field \"a\") (lit 1) (lit 2))) (lit TRUE))"
        );
    }

    #[test]
    fn blocks() {
        assert_eq!(
            parse("IF [a] THEN 1 ELSEIF [b] THEN 2 END"),
            "(if ((field \"a\") (lit 1)) ((field \"b\") (lit 2)) else (null))"
        );
        assert_eq!(
            parse("CASE [a] WHEN 1 THEN 'one' ELSE 'other' END"),
            "(case (field \"a\") ((lit 1) (lit \"one\")) else (lit \"other\"))"
        );
    }

    #[test]
    fn literals() {
        assert_eq!(parse("#2020-01-02#"), "(lit #2020-01-02#)");
        assert_eq!(
            parse("#2020-01-02 03:04:05#"),
            "(lit #2020-01-02 03:04:05#)"
        );
        assert_eq!(
            parse("##2020-01-02T03:04:05##"),
            "(lit ##2020-01-02 03:04:05##)"
        );
        assert_eq!(parse("null"), "(null)");
    }

    #[test]
    fn window_call() {
        let formula = parse_formula(
            "RSUM(SUM([Sales]) WITHIN [City] ORDER BY [Date] DESC BEFORE FILTER BY [Date])",
        )
        .unwrap();
        let root = formula.root();
        let NodeKind::FuncCall(call) = formula.kind(root) else {
            panic!("expected a call");
        };
        assert_eq!(call.name, "rsum");
        assert_eq!(call.args.len(), 1);
        assert!(matches!(&call.grouping, Some(WindowGrouping::Within(dims)) if dims.len() == 1));
        assert_eq!(call.ordering.len(), 1);
        assert!(call.ordering[0].desc);
        assert_eq!(call.before_filter_by, vec!["Date".to_string()]);
        assert_eq!(
            formula.to_string(),
            "(call rsum ((call sum ((field \"Sales\")))) within((field \"City\")) \
             order (field \"Date\") desc bfb[\"Date\"])"
        );
    }

    #[test]
    fn lod_and_ignore() {
        let formula =
            parse_formula("SUM([x] FIXED [a], [b] IGNORE DIMENSIONS [c])").unwrap();
        let NodeKind::FuncCall(call) = formula.kind(formula.root()) else {
            panic!("expected a call");
        };
        assert!(matches!(&call.lod, Some(LodSpecifier::Fixed(dims)) if dims.len() == 2));
        assert_eq!(call.ignore_dimensions.len(), 1);
        assert_eq!(parse("COUNT()"), "(call count ())");
        assert_eq!(parse("SUM([x] FIXED)"), "(call sum ((field \"x\")) fixed())");
    }

    #[test]
    fn errors() {
        assert_eq!(parse_formula("  "), Err(ParseError::EmptyFormula));
        assert_eq!(parse_formula("-- nothing"), Err(ParseError::EmptyFormula));
        assert_eq!(
            parse_formula("1 +"),
            Err(ParseError::UnexpectedEof { position: 4 })
        );
        assert_eq!(
            parse_formula("SUM([x]))"),
            Err(ParseError::UnexpectedToken {
                position: 9,
                token: "')'".into()
            })
        );
        assert_eq!(
            parse_formula("1 + THEN").unwrap_err().position(),
            Some(5)
        );
        assert!(matches!(
            parse_formula("#2020-13-45#"),
            Err(ParseError::InvalidLiteral { position: 1, .. })
        ));
    }

    #[test]
    fn recursion_limit() {
        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        assert!(matches!(
            parse_formula(&deep),
            Err(ParseError::Recursion(_))
        ));
        // Just below the limit, on the default test thread stack.
        let nested = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let formula = parse_formula(&nested).unwrap();
        assert_eq!(formula.to_string(), "(lit 1)");
    }

    #[test]
    fn operator_chains_count_toward_recursion_limit() {
        let chain = |op: &str, n: usize| vec!["[a]"; n].join(op);
        assert!(parse_formula(&chain(" + ", 200)).is_ok());
        for op in [" + ", " * ", " AND ", " OR ", " < "] {
            assert!(
                matches!(parse_formula(&chain(op, 300)), Err(ParseError::Recursion(_))),
                "{}",
                op
            );
        }
        // A long chain is refused before anything walks it.
        assert!(matches!(
            parse_formula(&chain(" + ", 200_000)),
            Err(ParseError::Recursion(_))
        ));
    }
}
