// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use dl_ore::stack::RecursionLimitError;

/// An error produced while lexing or parsing a formula.
///
/// Positions are 1-based character offsets into the formula text.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("formula is empty")]
    EmptyFormula,
    #[error("unexpected end of formula at position {position}")]
    UnexpectedEof { position: usize },
    #[error("unexpected {token} at position {position}")]
    UnexpectedToken { position: usize, token: String },
    #[error("invalid literal {text} at position {position}: {message}")]
    InvalidLiteral {
        position: usize,
        text: String,
        message: String,
    },
    #[error("formula nesting {0}")]
    Recursion(#[from] RecursionLimitError),
}

impl ParseError {
    /// The position the error refers to, if any.
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::UnexpectedEof { position }
            | ParseError::UnexpectedToken { position, .. }
            | ParseError::InvalidLiteral { position, .. } => Some(*position),
            ParseError::EmptyFormula | ParseError::Recursion(_) => None,
        }
    }
}
