// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use dl_formula::{TranslationError, TypeError};
use dl_formula_parser::ParseError;
use dl_query::PlanningError;

/// A failure while running a plan.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("source database error: {message}")]
    Source {
        message: String,
        /// The error as the database reported it.
        db_message: Option<String>,
    },
    #[error("computation engine error: {message}")]
    Compeng { message: String },
    #[error("no stream with id {stream_id}")]
    MissingStream { stream_id: String },
    #[error("cannot convert a value of result column {column}: {message}")]
    Postprocess { column: usize, message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    pub fn detail(&self) -> Option<String> {
        match self {
            ExecutionError::Source {
                db_message: Some(db_message),
                ..
            } => Some(db_message.clone()),
            _ => None,
        }
    }
}

/// Who is to blame for an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request cannot be served as written.
    BadRequest,
    /// Serving the request failed.
    Internal,
}

/// Any error produced while serving a request.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Parse(_) | Error::Type(_) | Error::Translation(_) | Error::Planning(_) => {
                ErrorClass::BadRequest
            }
            Error::Execution(_) => ErrorClass::Internal,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            Error::Translation(e) => e.detail(),
            Error::Planning(e) => e.detail(),
            Error::Execution(e) => e.detail(),
            Error::Parse(_) | Error::Type(_) => None,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            Error::Type(e) => e.hint(),
            Error::Translation(e) => e.hint(),
            Error::Planning(e) => e.hint(),
            Error::Parse(_) | Error::Execution(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        let planning = Error::from(PlanningError::MultipleBlocks { count: 2 });
        assert_eq!(planning.class(), ErrorClass::BadRequest);

        let source = Error::from(ExecutionError::Source {
            message: "query failed".into(),
            db_message: Some("relation \"t\" does not exist".into()),
        });
        assert_eq!(source.class(), ErrorClass::Internal);
        assert_eq!(source.detail().as_deref(), Some("relation \"t\" does not exist"));
    }
}
