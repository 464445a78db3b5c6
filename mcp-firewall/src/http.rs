use core::fmt;
use core::panic::Location;
use std::error::Error as StdError;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub struct HttpErrorBuilder {
    pub code: StatusCode,
    pub loc: &'static Location<'static>,
    pub msg: Option<&'static str>,
}

impl HttpErrorBuilder {
    #[inline]
    #[track_caller]
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            loc: Location::caller(),
            msg: None,
        }
    }

    #[inline]
    pub fn err<T: Into<Box<dyn StdError + Sync + Send + 'static>>>(self) -> impl FnOnce(T) -> HttpError {
        move |source| HttpError {
            code: self.code,
            loc: self.loc,
            msg: self.msg,
            source: Some(source.into()),
        }
    }

    #[inline]
    pub fn with_msg(mut self, msg: &'static str) -> HttpErrorBuilder {
        self.msg = Some(msg);
        self
    }

    #[inline]
    pub fn msg(self, msg: &'static str) -> HttpError {
        HttpError {
            code: self.code,
            loc: self.loc,
            msg: Some(msg),
            source: None,
        }
    }
}

pub struct HttpError {
    pub code: StatusCode,
    pub loc: &'static Location<'static>,
    pub msg: Option<&'static str>,
    pub source: Option<Box<dyn StdError + Sync + Send + 'static>>,
}

impl HttpError {
    #[inline]
    #[track_caller]
    pub fn forbidden() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::FORBIDDEN)
    }

    #[inline]
    #[track_caller]
    pub fn unauthorized() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::UNAUTHORIZED)
    }

    #[inline]
    #[track_caller]
    pub fn internal() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    #[inline]
    #[track_caller]
    pub fn bad_request() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::BAD_REQUEST)
    }

    #[inline]
    #[track_caller]
    pub fn bad_gateway() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::BAD_GATEWAY)
    }

    /// HTTP 451, the status used for policy-blocked payloads.
    #[inline]
    #[track_caller]
    pub fn blocked() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS)
    }

    /// HTTP 410, the status used for unknown or expired token handles.
    #[inline]
    #[track_caller]
    pub fn gone() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::GONE)
    }

    #[inline]
    #[track_caller]
    pub fn unavailable() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::SERVICE_UNAVAILABLE)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.code, self.loc)?;

        if let Some(msg) = self.msg {
            write!(f, ": {msg}")?;
        }

        if let Some(source) = self.source.as_deref() {
            write!(f, " [source: {source}")?;
            for cause in anyhow::Chain::new(source).skip(1) {
                write!(f, ", because {cause}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        error!(error = %self);

        let message = self
            .msg
            .unwrap_or_else(|| self.code.canonical_reason().unwrap_or("unknown error"));

        let body = Json(serde_json::json!({
            "error": {
                "message": message,
                "type": error_type(self.code),
            }
        }));

        (self.code, body).into_response()
    }
}

fn error_type(code: StatusCode) -> &'static str {
    match code {
        StatusCode::BAD_REQUEST => "invalid_input",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::GONE => "token_handle_missing",
        StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => "policy_blocked",
        StatusCode::SERVICE_UNAVAILABLE => "backend_unavailable",
        StatusCode::BAD_GATEWAY => "upstream_error",
        _ => "internal",
    }
}
