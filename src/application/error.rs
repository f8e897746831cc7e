use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{pdf::PdfError, repos::RepoError},
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<PdfError> for HttpError {
    fn from(error: PdfError) -> Self {
        let (status, public_message) = match &error {
            PdfError::RenderSourceFailed { .. } | PdfError::RenderSourceUnavailable { .. } => {
                (StatusCode::BAD_GATEWAY, "Page could not be rendered for export")
            }
            PdfError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "PDF export timed out"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "PDF could not be generated"),
        };
        HttpError::from_error(
            "application::error::pdf_error_to_http_error",
            status,
            public_message,
            &error,
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(DomainError::NotFound { .. }) | AppError::Repo(RepoError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            AppError::Domain(DomainError::InvalidIdentifier { .. }) => StatusCode::BAD_REQUEST,
            AppError::Pdf(
                PdfError::RenderSourceFailed { .. } | PdfError::RenderSourceUnavailable { .. },
            ) => StatusCode::BAD_GATEWAY,
            AppError::Pdf(PdfError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Pdf(_)
            | AppError::Repo(_)
            | AppError::Infra(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(DomainError::NotFound { .. }) | AppError::Repo(RepoError::NotFound) => {
                "Resource not found"
            }
            AppError::Domain(DomainError::InvalidIdentifier { .. }) => {
                "Request could not be processed"
            }
            AppError::Pdf(_) => "PDF could not be generated",
            AppError::Repo(_) => "Page content could not be loaded",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn report(response: &Response) -> &ErrorReport {
        response
            .extensions()
            .get::<ErrorReport>()
            .expect("error report attached")
    }

    #[test]
    fn pdf_errors_map_to_gateway_statuses() {
        let upstream: HttpError = PdfError::RenderSourceFailed {
            url: "about/print".into(),
            status: 404,
            status_text: "Not Found".into(),
        }
        .into();
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);

        let slow: HttpError = PdfError::Timeout {
            stage: "layout",
            after: Duration::from_secs(1),
        }
        .into();
        assert_eq!(slow.status(), StatusCode::GATEWAY_TIMEOUT);

        let empty: HttpError = PdfError::EmptyContent.into();
        assert_eq!(empty.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unreachable_render_source_is_a_bad_gateway_on_both_paths() {
        let unreachable = || PdfError::RenderSourceUnavailable {
            url: "http://cms.test/about/print".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            AppError::from(unreachable()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            HttpError::from(unreachable()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn http_error_attaches_report_with_source_chain() {
        let error = PdfError::TempDirCreateFailed {
            path: "/tmp/folio-pdf".into(),
            source: std::io::Error::other("read-only file system"),
        };
        let response = HttpError::from(error).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = report(&response);
        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.messages[1], "read-only file system");
    }

    #[test]
    fn app_error_statuses() {
        let not_found = AppError::from(DomainError::not_found("page")).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let invalid =
            AppError::from(DomainError::invalid_identifier("A B", "bad")).into_response();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(report(&invalid).source, "application::error::AppError");
    }
}
