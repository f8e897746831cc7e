use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header::CACHE_CONTROL},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        error::HttpError,
        page::PageService,
        pdf::{BufferedResponse, OutputTarget, PdfService},
    },
    domain::pages::PageRecord,
    presentation::views::{
        IndexTemplate, LayoutContext, PageTemplate, PageView, PdfPageTemplate, SiteView,
        render_markup, render_not_found_response, render_template_response,
    },
};

use super::middleware::{log_responses, set_request_context};

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

#[derive(Clone)]
pub struct HttpState {
    pub pages: Arc<PageService>,
    pub pdf: Arc<PdfService>,
    pub site: SiteView,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/{identifier}", get(page_detail))
        .route("/{identifier}/print", get(page_print))
        .route("/{identifier}/topdf/{file}", get(page_pdf))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn index(State(state): State<HttpState>) -> Response {
    match state.pages.index().await {
        Ok(entries) => {
            let view = LayoutContext::new(state.site.clone(), entries);
            render_template_response(IndexTemplate { view }, StatusCode::OK)
        }
        Err(err) => err.into_response(),
    }
}

async fn page_detail(State(state): State<HttpState>, Path(identifier): Path<String>) -> Response {
    match state.pages.page_view(&identifier).await {
        Ok(Some(page)) => {
            let view = LayoutContext::new(state.site.clone(), page);
            render_template_response(PageTemplate { view }, StatusCode::OK)
        }
        Ok(None) => render_not_found_response(state.site.clone()),
        Err(err) => err.into_response(),
    }
}

/// Standalone print markup; this is what page renders fetch through the view resolver.
async fn page_print(State(state): State<HttpState>, Path(identifier): Path<String>) -> Response {
    match state.pages.page_view(&identifier).await {
        Ok(Some(page)) => {
            let view = LayoutContext::new(state.site.clone(), page);
            let mut response = render_template_response(PdfPageTemplate { view }, StatusCode::OK);
            set_no_store(&mut response);
            response
        }
        Ok(None) => render_not_found_response(state.site.clone()),
        Err(err) => err.into_response(),
    }
}

/// Export a page as a PDF attachment. The trailing file segment only names the
/// download for the browser; the served name always comes from the page.
async fn page_pdf(
    State(state): State<HttpState>,
    Path((identifier, _file)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let record = match state.pages.find(&identifier).await {
        Ok(Some(record)) => record,
        Ok(None) => return render_not_found_response(state.site.clone()),
        Err(err) => return err.into_response(),
    };

    match export_pdf(&state, record, is_secure(&headers, &uri)).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn export_pdf(
    state: &HttpState,
    record: PageRecord,
    secure: bool,
) -> Result<Response, HttpError> {
    let output_name = record.pdf_file_name();
    let view = LayoutContext::new(state.site.clone(), PageView::from(record));
    let markup = render_markup(PdfPageTemplate { view })?;

    let mut sink = BufferedResponse::new();
    state
        .pdf
        .render_content(
            &markup,
            OutputTarget::Caller {
                sink: &mut sink,
                secure,
            },
            &output_name,
        )
        .await?;

    Ok(sink.into_response())
}

async fn fallback(State(state): State<HttpState>) -> Response {
    render_not_found_response(state.site.clone())
}

fn is_secure(headers: &HeaderMap, uri: &Uri) -> bool {
    let forwarded = headers
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("https"));
    forwarded.unwrap_or_else(|| uri.scheme_str() == Some("https"))
}

fn set_no_store(response: &mut Response) {
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
}
