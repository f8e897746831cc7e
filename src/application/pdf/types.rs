use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::domain::pages::PageLink;

use super::delivery::ResponseSink;

/// Failures of the PDF pipeline, one variant per stage outcome.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("markup could not be parsed: {message}")]
    MalformedMarkup { message: String },
    #[error("no content to render")]
    EmptyContent,
    #[error("temporary directory root `{}` could not be found", root.display())]
    TempDirUnavailable { root: PathBuf },
    #[error("PDF temp directory `{}` could not be created", path.display())]
    TempDirCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("PDF could not be created: {message}")]
    RenderBackendFailed { message: String },
    #[error("could not generate pdf `{}`", path.display())]
    OutputFileMissing { path: PathBuf },
    #[error("failed rendering URL {url}: {status} - {status_text}")]
    RenderSourceFailed {
        url: String,
        status: u16,
        status_text: String,
    },
    #[error("failed fetching URL {url}: {message}")]
    RenderSourceUnavailable { url: String, message: String },
    #[error("response headers were already sent")]
    HeadersAlreadySent,
    #[error("{stage} timed out after {} ms", after.as_millis())]
    Timeout { stage: &'static str, after: Duration },
    #[error("temporary file `{}` could not be removed", path.display())]
    TempFileDeleteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid value for `{name}` header")]
    InvalidHeader { name: String },
    #[error("pdf i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl PdfError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMarkup {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::RenderBackendFailed {
            message: message.into(),
        }
    }

    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PdfError::MalformedMarkup { .. } => "malformed_markup",
            PdfError::EmptyContent => "empty_content",
            PdfError::TempDirUnavailable { .. } => "temp_dir_unavailable",
            PdfError::TempDirCreateFailed { .. } => "temp_dir_create_failed",
            PdfError::RenderBackendFailed { .. } => "render_backend_failed",
            PdfError::OutputFileMissing { .. } => "output_file_missing",
            PdfError::RenderSourceFailed { .. } => "render_source_failed",
            PdfError::RenderSourceUnavailable { .. } => "render_source_unavailable",
            PdfError::HeadersAlreadySent => "headers_already_sent",
            PdfError::Timeout { .. } => "timeout",
            PdfError::TempFileDeleteFailed { .. } => "temp_file_delete_failed",
            PdfError::InvalidHeader { .. } => "invalid_header",
            PdfError::Io(_) => "io",
        }
    }
}

/// Session state forwarded when markup is fetched through the view resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub cookie: Option<String>,
}

impl Session {
    pub fn from_cookie(cookie: impl Into<String>) -> Self {
        Self {
            cookie: Some(cookie.into()),
        }
    }
}

/// Where the markup for a render comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderSource {
    /// Markup already rendered by the caller.
    Markup(String),
    /// A page action, resolved through the view resolver.
    Page { link: String },
    /// A site-relative URL, resolved through the view resolver.
    Url(String),
}

impl RenderSource {
    pub fn page(page: &impl PageLink, action: &str) -> Self {
        Self::Page {
            link: page.link(action),
        }
    }
}

/// Where the finished document goes.
pub enum OutputTarget<'a> {
    /// Hand the temporary file to the caller; the caller owns its deletion.
    File,
    /// Stream the document as an attachment and delete the temporary file.
    Caller {
        sink: &'a mut dyn ResponseSink,
        /// Request arrived over HTTPS; attachments then need private caching.
        secure: bool,
    },
}

impl OutputTarget<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            OutputTarget::File => "file",
            OutputTarget::Caller { .. } => "caller",
        }
    }
}

pub struct RenderRequest<'a> {
    pub source: RenderSource,
    pub target: OutputTarget<'a>,
    pub output_name: String,
    pub session: Option<Session>,
}

impl<'a> RenderRequest<'a> {
    pub fn new(source: RenderSource, target: OutputTarget<'a>, output_name: impl Into<String>) -> Self {
        Self {
            source,
            target,
            output_name: output_name.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }
}

/// Result of a completed render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    /// The document stays on disk at this path; deleting it is up to the caller.
    File(PathBuf),
    /// The document was streamed to the response sink and removed from disk.
    Streamed { byte_len: u64 },
}

impl Delivered {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Delivered::File(path) => Some(path),
            Delivered::Streamed { .. } => None,
        }
    }
}
