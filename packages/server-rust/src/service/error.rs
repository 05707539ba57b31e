//! Request-level failures and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rapq_core::{Fragment, NotFoundError, ParseError};
use serde::Serialize;

use crate::execution::ExecutionError;

/// Why a query or lookup request failed.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Unknown entity, or no record with the requested identifier.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    /// A fragment did not parse or type-check.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The backend rejected or failed the query.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl QueryError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Parse(_) => StatusCode::BAD_REQUEST,
            QueryError::Execution(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::NotFound(_) => "NOT_FOUND",
            QueryError::Parse(_) => "PARSE_ERROR",
            QueryError::Execution(_) => "EXECUTION_ERROR",
        }
    }

    /// Value of the `outcome` field logged when a request completes.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            QueryError::NotFound(_) => "not_found",
            QueryError::Parse(_) => "parse_error",
            QueryError::Execution(_) => "execution_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    /// The offending fragment, for parse errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
}

impl From<&QueryError> for ErrorResponse {
    fn from(err: &QueryError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code(),
            fragment: match err {
                QueryError::Parse(parse) => Some(parse.fragment),
                _ => None,
            },
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse::from(&self));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use rapq_core::ExpressionError;

    use super::*;

    #[test]
    fn status_codes() {
        let not_found = QueryError::from(NotFoundError::Entity {
            name: "shelf".to_string(),
        });
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let rejected = QueryError::from(ExecutionError::Rejected("having requires groupBy".into()));
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(rejected.outcome(), "execution_error");
    }

    #[test]
    fn parse_errors_name_the_fragment() {
        let err = QueryError::from(ParseError {
            fragment: Fragment::OrderBy,
            source: ExpressionError::Syntax {
                position: 6,
                message: "expected expression".to_string(),
            },
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["code"], "PARSE_ERROR");
        assert_eq!(body["fragment"], "orderBy");
        assert!(body["error"].as_str().unwrap().contains("'orderBy'"));
    }

    #[test]
    fn fragment_is_omitted_for_other_errors() {
        let err = QueryError::from(NotFoundError::Record {
            entity: "book".to_string(),
            id: "9".to_string(),
        });
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert!(body.get("fragment").is_none());
        assert_eq!(body["code"], "NOT_FOUND");
    }
}
