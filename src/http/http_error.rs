use crate::executor::ExecuteError;
use actix_web::http::header::{self, HeaderValue};
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use core::fmt;
use log::error;
use std::error::Error;

#[derive(Debug)]
pub enum HttpError {
    NotFound,
    BadRequest(String),
    /// Only POST is allowed
    MethodNotAllowed,
    ServiceUnavailable(String),
    Internal(anyhow::Error),
}

impl HttpError {
    fn reason(&self) -> &'static str {
        self.status_code().canonical_reason().unwrap_or("unknown")
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let status_code = self.status_code();
        match self {
            Self::BadRequest(message) | Self::ServiceUnavailable(message) => {
                write!(f, "{}: {message}", status_code.as_str())
            }
            Self::Internal(err) => write!(f, "{}: {err:#}", status_code.as_str()),
            Self::NotFound | Self::MethodNotAllowed => {
                write!(f, "{}: {}", status_code.as_str(), self.reason())
            }
        }
    }
}

impl Error for HttpError {}

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<ExecuteError> for HttpError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Store(err) => Self::Internal(err),
            err @ ExecuteError::BrokerUnavailable { .. } => Self::ServiceUnavailable(err.to_string()),
        }
    }
}

impl ResponseError for HttpError {
    fn error_response(&self) -> HttpResponse {
        let mut res = HttpResponse::build(self.status_code());
        match self {
            Self::BadRequest(message) | Self::ServiceUnavailable(message) => res.body(message.clone()),
            Self::MethodNotAllowed => res
                .insert_header((header::ALLOW, HeaderValue::from_static("POST")))
                .body(self.reason()),
            Self::Internal(err) => {
                // Keep internal details out of the response
                error!("Internal server error: {err:?}");
                res.body(self.reason())
            }
            Self::NotFound => res.body(self.reason()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
