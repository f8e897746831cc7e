//! Handing a finished document to whoever asked for it.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use super::{
    store::GeneratedDocument,
    types::{Delivered, OutputTarget, PdfError},
};

const PDF_MIME: &str = "application/pdf";
const CHUNK_SIZE: usize = 8 * 1024;

static LEGACY_AGENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"MSIE\s(6|7|8)?\.0").expect("legacy user agent pattern is valid"));

/// Minimal view of an HTTP response being assembled.
pub trait ResponseSink: Send {
    /// Whether headers can no longer be changed.
    fn headers_sent(&self) -> bool;
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), PdfError>;
    fn write_body(&mut self, chunk: &[u8]) -> Result<(), PdfError>;
}

/// In-memory sink; headers commit on the first body write.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl ResponseSink for BufferedResponse {
    fn headers_sent(&self) -> bool {
        self.committed
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), PdfError> {
        if self.committed {
            return Err(PdfError::HeadersAlreadySent);
        }
        self.headers.insert(name, value);
        Ok(())
    }

    fn write_body(&mut self, chunk: &[u8]) -> Result<(), PdfError> {
        self.committed = true;
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, Body::from(self.body)).into_response();
        *response.headers_mut() = self.headers;
        response
    }
}

/// What a caller-bound attachment looks like on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEnvelope {
    pub path: PathBuf,
    pub display_name: String,
    pub mime_type: &'static str,
    pub byte_len: u64,
}

impl DeliveryEnvelope {
    pub fn attachment(document: &GeneratedDocument, display_name: &str) -> Self {
        Self {
            path: document.path().to_path_buf(),
            display_name: display_name.to_string(),
            mime_type: PDF_MIME,
            byte_len: document.byte_len(),
        }
    }

    fn content_disposition(&self) -> String {
        format!(
            "attachment; filename={}",
            url_encode(&html_entities(&self.display_name))
        )
    }
}

/// Deliver a document to its target.
///
/// `File` hands the path over and leaves any response alone. `Caller` writes
/// an attachment to the sink; the temporary file is removed afterwards whether
/// or not streaming succeeded.
pub async fn deliver(
    document: GeneratedDocument,
    target: OutputTarget<'_>,
    display_name: &str,
) -> Result<Delivered, PdfError> {
    match target {
        OutputTarget::File => {
            let path = document.into_path()?;
            info!(
                target = "folio::pdf::delivery",
                op = "delivery::file",
                path = %path.display(),
                "PDF left on disk for caller"
            );
            Ok(Delivered::File(path))
        }
        OutputTarget::Caller { sink, secure } => {
            let envelope = DeliveryEnvelope::attachment(&document, display_name);
            let outcome = send_attachment(&envelope, sink, secure).await;
            discard(document);
            if outcome.is_ok() {
                info!(
                    target = "folio::pdf::delivery",
                    op = "delivery::caller",
                    byte_len = envelope.byte_len,
                    secure,
                    "PDF streamed to caller"
                );
            }
            outcome.map(|byte_len| Delivered::Streamed { byte_len })
        }
    }
}

/// Attachment delivery for clients that cannot cope with the regular headers.
/// Old Internet Explorer builds get an octet-stream download with public
/// caching; every other agent gets a PDF with the name in the content type.
pub async fn deliver_legacy(
    document: GeneratedDocument,
    display_name: &str,
    user_agent: &str,
    sink: &mut dyn ResponseSink,
) -> Result<Delivered, PdfError> {
    let outcome = send_legacy(&document, display_name, user_agent, sink).await;
    discard(document);
    outcome.map(|byte_len| Delivered::Streamed { byte_len })
}

async fn send_attachment(
    envelope: &DeliveryEnvelope,
    sink: &mut dyn ResponseSink,
    secure: bool,
) -> Result<u64, PdfError> {
    if sink.headers_sent() {
        return Err(PdfError::HeadersAlreadySent);
    }

    if secure {
        put(sink, header::CACHE_CONTROL, "private")?;
        put(sink, header::PRAGMA, "")?;
    }
    put(sink, header::CONTENT_DISPOSITION, &envelope.content_disposition())?;
    put(sink, header::CONTENT_TYPE, envelope.mime_type)?;
    put(sink, header::CONTENT_LENGTH, &envelope.byte_len.to_string())?;

    stream_file(&envelope.path, sink).await
}

async fn send_legacy(
    document: &GeneratedDocument,
    display_name: &str,
    user_agent: &str,
    sink: &mut dyn ResponseSink,
) -> Result<u64, PdfError> {
    if sink.headers_sent() {
        return Err(PdfError::HeadersAlreadySent);
    }

    let length = document.byte_len().to_string();
    if LEGACY_AGENT.is_match(user_agent) {
        let file_name = add_slashes(base_name(display_name));
        put(sink, header::CACHE_CONTROL, "public")?;
        put(
            sink,
            header::CONTENT_DISPOSITION,
            &format!("attachment; filename=\"{file_name}\""),
        )?;
        put(sink, header::CONTENT_TYPE, "application/octet-stream")?;
        put(
            sink,
            HeaderName::from_static("content-description"),
            "File Transfer",
        )?;
        put(sink, header::CONTENT_LENGTH, &length)?;
    } else {
        let file_name = add_slashes(display_name);
        put(
            sink,
            header::CONTENT_TYPE,
            &format!("{PDF_MIME}; name=\"{file_name}\""),
        )?;
        put(
            sink,
            header::CONTENT_DISPOSITION,
            &format!("attachment; filename={file_name}"),
        )?;
        put(sink, header::CONTENT_LENGTH, &length)?;
    }

    stream_file(document.path(), sink).await
}

fn put(sink: &mut dyn ResponseSink, name: HeaderName, value: &str) -> Result<(), PdfError> {
    let value = HeaderValue::from_str(value).map_err(|_| PdfError::InvalidHeader {
        name: name.as_str().to_string(),
    })?;
    sink.set_header(name, value)
}

async fn stream_file(path: &Path, sink: &mut dyn ResponseSink) -> Result<u64, PdfError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        sink.write_body(&buffer[..read])?;
        total += read as u64;
    }
    Ok(total)
}

fn discard(document: GeneratedDocument) {
    let path = document.path().to_path_buf();
    match document.remove() {
        Ok(()) => debug!(
            target = "folio::pdf::delivery",
            path = %path.display(),
            "Temporary PDF removed"
        ),
        Err(err) => warn!(
            target = "folio::pdf::delivery",
            op = "delivery::cleanup",
            error_kind = err.kind(),
            error = %err,
            "Temporary PDF could not be removed"
        ),
    }
}

/// HTML-escape a file name: markup-significant characters become named
/// entities and anything outside ASCII becomes a numeric reference.
fn html_entities(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            ch if ch.is_ascii() => escaped.push(ch),
            ch => escaped.push_str(&format!("&#{};", ch as u32)),
        }
    }
    escaped
}

fn url_encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn add_slashes(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\'' | '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn base_name(value: &str) -> &str {
    value
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(value)
}
