use crate::application::error::{ErrorReport, HttpError};
use crate::domain::pages::PageRecord;
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    render_markup(template).map(Html)
}

/// Render a template to its raw markup, for consumers other than a browser.
pub fn render_markup<T: Template>(template: T) -> Result<String, HttpError> {
    template.render().map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_markup",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(site: SiteView) -> Response {
    let view = LayoutContext::new(site, ());
    let mut response = render_template_response(NotFoundTemplate { view }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// Site-wide values every layout needs.
#[derive(Clone, Debug)]
pub struct SiteView {
    pub title: String,
    /// Absolute site URL ending in `/`, used as the document base for exports.
    pub base_href: Option<String>,
}

#[derive(Clone)]
pub struct LayoutContext<T> {
    pub site: SiteView,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(site: SiteView, content: T) -> Self {
        Self { site, content }
    }
}

#[derive(Clone, Debug)]
pub struct PageView {
    pub identifier: String,
    pub title: String,
    pub summary: Option<String>,
    pub content_html: String,
    pub pdf_link: String,
}

impl From<PageRecord> for PageView {
    fn from(record: PageRecord) -> Self {
        Self {
            identifier: record.identifier.to_string(),
            pdf_link: record.pdf_link(),
            title: record.title,
            summary: record.summary,
            content_html: record.content_html,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PageSummaryView {
    pub title: String,
    pub href: String,
    pub pdf_link: String,
}

impl From<&PageRecord> for PageSummaryView {
    fn from(record: &PageRecord) -> Self {
        Self {
            title: record.title.clone(),
            href: format!("/{}", record.identifier),
            pdf_link: record.pdf_link(),
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub view: LayoutContext<Vec<PageSummaryView>>,
}

#[derive(Template)]
#[template(path = "page.html")]
pub struct PageTemplate {
    pub view: LayoutContext<PageView>,
}

/// Print rendition of a page: a standalone document without site chrome.
#[derive(Template)]
#[template(path = "pdf_page.html")]
pub struct PdfPageTemplate {
    pub view: LayoutContext<PageView>,
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {
    pub view: LayoutContext<()>,
}
