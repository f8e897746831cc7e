//! Document rendering: one renderer per destination, configured by value.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{store, types::PdfError};

pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Page formats, dimensions in PostScript points (portrait).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageSize {
    A4,
    Letter,
    Custom { width: f32, height: f32 },
}

impl PageSize {
    fn portrait(self) -> (f32, f32) {
        match self {
            PageSize::A4 => (595.28, 841.89),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Custom { width, height } => (width.min(height), width.max(height)),
        }
    }
}

impl FromStr for PageSize {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "a4" => Ok(PageSize::A4),
            "letter" => Ok(PageSize::Letter),
            other => Err(format!("unknown page size `{other}` (expected a4 or letter)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "p" | "portrait" => Ok(Orientation::Portrait),
            "l" | "landscape" => Ok(Orientation::Landscape),
            other => Err(format!("unknown orientation `{other}`")),
        }
    }
}

/// Base-14 font families available without embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFamily {
    Helvetica,
    Times,
    Courier,
}

impl FromStr for FontFamily {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "helvetica" | "sans" | "sans-serif" => Ok(FontFamily::Helvetica),
            "times" | "serif" => Ok(FontFamily::Times),
            "courier" | "mono" | "monospace" => Ok(FontFamily::Courier),
            other => Err(format!("unsupported font family `{other}`")),
        }
    }
}

/// Margins in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            left: 50.0,
            top: 35.0,
            right: 35.0,
            bottom: 25.0,
        }
    }
}

/// Layout settings for a single render. Built per call and never shared
/// mutably between renders.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub page_size: PageSize,
    pub orientation: Orientation,
    pub margins: Margins,
    pub footer_margin: f32,
    pub body_font: FontFamily,
    pub monospace_font: FontFamily,
    pub body_font_size: f32,
    pub header_font_size: f32,
    pub footer_font_size: f32,
    pub line_height: f32,
    pub auto_page_break: bool,
    /// JPEG quality for embedded images, 1..=100. At 100 pixels are embedded
    /// losslessly.
    pub image_quality: u8,
    /// Draw the document title above the content on every page.
    pub header_block: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            orientation: Orientation::Portrait,
            margins: Margins::default(),
            footer_margin: 20.0,
            body_font: FontFamily::Helvetica,
            monospace_font: FontFamily::Courier,
            body_font_size: 10.0,
            header_font_size: 12.0,
            footer_font_size: 8.0,
            line_height: 1.25,
            auto_page_break: true,
            image_quality: 100,
            header_block: false,
        }
    }
}

impl RendererConfig {
    /// Height kept free above the body for the title header.
    pub fn header_reserve(&self) -> f32 {
        if self.header_block {
            self.header_font_size * 2.0
        } else {
            0.0
        }
    }

    /// Vertical room between the margins once the header is reserved.
    pub fn body_height(&self) -> f32 {
        let (_, height) = self.page_dimensions();
        height - self.margins.top - self.margins.bottom - self.header_reserve()
    }

    /// Page width and height in points for the configured orientation.
    pub fn page_dimensions(&self) -> (f32, f32) {
        let (width, height) = self.page_size.portrait();
        match self.orientation {
            Orientation::Portrait => (width, height),
            Orientation::Landscape => (height, width),
        }
    }

    pub fn content_width(&self) -> f32 {
        let (width, _) = self.page_dimensions();
        (width - self.margins.left - self.margins.right).max(1.0)
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns markup into the bytes of a paginated document.
pub trait LayoutBackend: Send + Sync + fmt::Debug {
    fn layout(&self, markup: &str, config: &RendererConfig) -> Result<Vec<u8>, BackendError>;
}

/// Renders markup to exactly one destination path. The destination is fixed at
/// construction and `render` consumes the renderer, so concurrent renders
/// always use distinct instances.
#[derive(Debug)]
pub struct DocumentRenderer {
    backend: Arc<dyn LayoutBackend>,
    config: RendererConfig,
    destination: PathBuf,
    timeout: Duration,
}

impl DocumentRenderer {
    pub fn new(
        backend: Arc<dyn LayoutBackend>,
        config: RendererConfig,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            config,
            destination: destination.into(),
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Lay out `markup` and write the document to the destination.
    ///
    /// Returns `Ok(false)` when the backend reported success but nothing ended
    /// up at the destination.
    pub async fn render(self, markup: Option<&str>) -> Result<bool, PdfError> {
        let markup = match markup {
            Some(markup) if !markup.is_empty() => markup.to_string(),
            _ => return Err(PdfError::EmptyContent),
        };

        match tokio::fs::remove_file(&self.destination).await {
            Ok(()) => debug!(
                target = "folio::pdf::renderer",
                path = %self.destination.display(),
                "Removed stale file at render destination"
            ),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(PdfError::Io(err)),
        }

        let started_at = Instant::now();
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let markup_bytes = markup.len();
        let task = tokio::task::spawn_blocking(move || backend.layout(&markup, &config));

        let bytes = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!(
                    target = "folio::pdf::renderer",
                    op = "renderer::render",
                    result = "timeout",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Document layout exceeded its time budget"
                );
                return Err(PdfError::Timeout {
                    stage: "layout",
                    after: self.timeout,
                });
            }
            Ok(Err(join_err)) => {
                return Err(PdfError::backend(format!("layout task failed: {join_err}")));
            }
            Ok(Ok(Err(err))) => return Err(PdfError::backend(err.to_string())),
            Ok(Ok(Ok(bytes))) => bytes,
        };

        if bytes.is_empty() {
            return Err(PdfError::backend("layout produced no output"));
        }

        tokio::fs::write(&self.destination, &bytes).await?;
        let written = store::file_len(&self.destination).await?.is_some();

        info!(
            target = "folio::pdf::renderer",
            op = "renderer::render",
            result = if written { "ok" } else { "missing_output" },
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            markup_bytes,
            pdf_bytes = bytes.len(),
            path = %self.destination.display(),
            "Document rendered"
        );

        Ok(written)
    }
}
