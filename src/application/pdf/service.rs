//! Rendering orchestration: resolve the markup, clean it up, lay it out and
//! hand the document over.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::domain::pages::PageLink;

use super::{
    delivery,
    normalize,
    renderer::{DEFAULT_RENDER_TIMEOUT, DocumentRenderer, LayoutBackend, RendererConfig},
    store::{self, GeneratedDocument, TempOutputStore},
    types::{Delivered, OutputTarget, PdfError, RenderRequest, RenderSource, Session},
};

const TEMP_PREFIX: &str = "pdf_";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub const METRIC_RENDER_TOTAL: &str = "folio_pdf_render_total";
pub const METRIC_RENDER_FAILED_TOTAL: &str = "folio_pdf_render_failed_total";
pub const METRIC_RENDER_MS: &str = "folio_pdf_render_ms";
pub const METRIC_PDF_BYTES: &str = "folio_pdf_bytes";

/// Rendered output of a site URL, as the view layer produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

/// Produces the markup behind a site-relative URL.
#[async_trait]
pub trait ViewResolver: Send + Sync {
    async fn resolve(&self, url: &str, session: Option<&Session>)
    -> Result<ViewResponse, PdfError>;
}

/// Resolves views by requesting them from the running site.
#[derive(Clone, Debug)]
pub struct HttpViewResolver {
    client: Client,
    base: Url,
}

impl HttpViewResolver {
    pub fn new(site: &str) -> Result<Self, PdfError> {
        let unavailable = |message: String| PdfError::RenderSourceUnavailable {
            url: site.to_string(),
            message,
        };
        let mut base = Url::parse(site).map_err(|err| unavailable(err.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| unavailable(err.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl ViewResolver for HttpViewResolver {
    async fn resolve(
        &self,
        url: &str,
        session: Option<&Session>,
    ) -> Result<ViewResponse, PdfError> {
        let unavailable = |message: String| PdfError::RenderSourceUnavailable {
            url: url.to_string(),
            message,
        };
        let target = self
            .base
            .join(url)
            .map_err(|err| unavailable(err.to_string()))?;

        let mut request = self.client.get(target);
        if let Some(cookie) = session.and_then(|session| session.cookie.as_deref()) {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|err| unavailable(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| unavailable(err.to_string()))?;

        Ok(ViewResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}

/// The PDF pipeline. Cheap to clone; every render works on its own
/// destination file and renderer.
#[derive(Clone)]
pub struct PdfService {
    store: Arc<TempOutputStore>,
    backend: Arc<dyn LayoutBackend>,
    renderer: RendererConfig,
    resolver: Arc<dyn ViewResolver>,
    fetch_timeout: Duration,
    render_timeout: Duration,
}

impl PdfService {
    pub fn new(
        store: Arc<TempOutputStore>,
        backend: Arc<dyn LayoutBackend>,
        resolver: Arc<dyn ViewResolver>,
    ) -> Self {
        Self {
            store,
            backend,
            renderer: RendererConfig::default(),
            resolver,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    pub fn with_renderer_config(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_timeouts(mut self, fetch: Duration, render: Duration) -> Self {
        self.fetch_timeout = fetch;
        self.render_timeout = render;
        self
    }

    pub async fn render(&self, request: RenderRequest<'_>) -> Result<Delivered, PdfError> {
        let RenderRequest {
            source,
            target,
            output_name,
            session,
        } = request;

        let markup = match source {
            RenderSource::Markup(markup) => markup,
            RenderSource::Page { link } => self.fetch(&link, session.as_ref()).await?,
            RenderSource::Url(url) => self.fetch(&url, session.as_ref()).await?,
        };

        self.render_content(&markup, target, &output_name).await
    }

    /// Render the markup a page action produces.
    pub async fn render_page(
        &self,
        page: &(impl PageLink + Sync),
        action: &str,
        target: OutputTarget<'_>,
        output_name: &str,
        session: Option<&Session>,
    ) -> Result<Delivered, PdfError> {
        let link = page.link(action);
        let markup = self.fetch(&link, session).await?;
        self.render_content(&markup, target, output_name).await
    }

    /// Render the markup served at a site-relative URL.
    pub async fn render_url(
        &self,
        url: &str,
        target: OutputTarget<'_>,
        output_name: &str,
        session: Option<&Session>,
    ) -> Result<Delivered, PdfError> {
        let markup = self.fetch(url, session).await?;
        self.render_content(&markup, target, output_name).await
    }

    /// Render markup the caller already has.
    pub async fn render_content(
        &self,
        markup: &str,
        target: OutputTarget<'_>,
        output_name: &str,
    ) -> Result<Delivered, PdfError> {
        let started_at = Instant::now();
        let target_label = target.label();

        let outcome = self.run_pipeline(markup, target, output_name).await;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_RENDER_MS, "target" => target_label)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        match &outcome {
            Ok(_) => {
                counter!(METRIC_RENDER_TOTAL, "target" => target_label).increment(1);
                info!(
                    target = "folio::pdf::service",
                    op = "pdf::render_content",
                    result = "ok",
                    output = target_label,
                    output_name,
                    elapsed_ms,
                    "PDF rendered"
                );
            }
            Err(err) => {
                counter!(METRIC_RENDER_FAILED_TOTAL, "kind" => err.kind()).increment(1);
                warn!(
                    target = "folio::pdf::service",
                    op = "pdf::render_content",
                    result = "error",
                    output = target_label,
                    output_name,
                    elapsed_ms,
                    error_kind = err.kind(),
                    error = %err,
                    "PDF render failed"
                );
            }
        }

        outcome
    }

    async fn run_pipeline(
        &self,
        markup: &str,
        target: OutputTarget<'_>,
        output_name: &str,
    ) -> Result<Delivered, PdfError> {
        self.store.ensure_directory()?;

        let normalized = match normalize::normalize(markup) {
            Ok(normalized) => normalized,
            Err(PdfError::MalformedMarkup { message }) => {
                warn!(
                    target = "folio::pdf::service",
                    op = "pdf::normalize",
                    result = "pass_through",
                    message = %message,
                    "Markup could not be normalized; rendering it as-is"
                );
                normalize::fix_entities(markup)
            }
            Err(err) => return Err(err),
        };

        // Dropping `destination` on any early return removes the file.
        let destination = self.store.allocate(TEMP_PREFIX)?;
        let rendered = DocumentRenderer::new(
            Arc::clone(&self.backend),
            self.renderer.clone(),
            destination.to_path_buf(),
        )
        .with_timeout(self.render_timeout)
        .render(Some(&normalized))
        .await?;

        if !rendered {
            return Err(PdfError::backend("generation produced no output"));
        }

        let Some(byte_len) = store::file_len(&destination).await? else {
            return Err(PdfError::OutputFileMissing {
                path: destination.to_path_buf(),
            });
        };
        histogram!(METRIC_PDF_BYTES).record(byte_len as f64);

        let document = GeneratedDocument::new(destination, byte_len);
        delivery::deliver(document, target, output_name).await
    }

    async fn fetch(&self, url: &str, session: Option<&Session>) -> Result<String, PdfError> {
        let url = url.strip_prefix('/').unwrap_or(url);
        let started_at = Instant::now();

        let response = tokio::time::timeout(self.fetch_timeout, self.resolver.resolve(url, session))
            .await
            .map_err(|_| PdfError::Timeout {
                stage: "fetch",
                after: self.fetch_timeout,
            })??;

        if response.status != 200 {
            warn!(
                target = "folio::pdf::service",
                op = "pdf::fetch",
                result = "rejected",
                url,
                status = response.status,
                "Render source answered with an error"
            );
            return Err(PdfError::RenderSourceFailed {
                url: url.to_string(),
                status: response.status,
                status_text: response.status_text,
            });
        }

        debug!(
            target = "folio::pdf::service",
            op = "pdf::fetch",
            result = "ok",
            url,
            bytes = response.body.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Render source resolved"
        );
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use httpmock::MockServer;
    use tempfile::TempDir;

    use super::*;
    use crate::application::pdf::{
        backend::PrintPdfBackend,
        delivery::BufferedResponse,
        renderer::BackendError,
    };

    #[derive(Default)]
    struct StaticResolver {
        pages: HashMap<String, String>,
        seen: Mutex<Vec<(String, Option<String>)>>,
        delay: Option<Duration>,
    }

    impl StaticResolver {
        fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        fn seen(&self) -> Vec<(String, Option<String>)> {
            self.seen.lock().expect("seen lock").clone()
        }
    }

    #[async_trait]
    impl ViewResolver for StaticResolver {
        async fn resolve(
            &self,
            url: &str,
            session: Option<&Session>,
        ) -> Result<ViewResponse, PdfError> {
            self.seen
                .lock()
                .expect("seen lock")
                .push((url.to_string(), session.and_then(|s| s.cookie.clone())));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(match self.pages.get(url) {
                Some(body) => ViewResponse {
                    status: 200,
                    status_text: "OK".into(),
                    body: body.clone(),
                },
                None => ViewResponse {
                    status: 404,
                    status_text: "Not Found".into(),
                    body: String::new(),
                },
            })
        }
    }

    #[derive(Debug)]
    struct BrokenBackend;

    impl LayoutBackend for BrokenBackend {
        fn layout(&self, _: &str, _: &RendererConfig) -> Result<Vec<u8>, BackendError> {
            Err(BackendError::new("no fonts"))
        }
    }

    struct Page(&'static str);

    impl PageLink for Page {
        fn link(&self, action: &str) -> String {
            format!("/{}/{action}", self.0)
        }
    }

    fn service(root: &TempDir, resolver: Arc<dyn ViewResolver>) -> PdfService {
        PdfService::new(
            Arc::new(TempOutputStore::new(root.path(), "pdfs")),
            Arc::new(PrintPdfBackend),
            resolver,
        )
    }

    fn leftover_files(root: &Path) -> usize {
        std::fs::read_dir(root.join("pdfs"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    const EXAMPLE: &str = r#"<base href="http://x.test/"><a href="p.html">go</a>&nbsp;text"#;

    #[tokio::test]
    async fn file_target_returns_a_readable_pdf() {
        let root = TempDir::new().expect("temp dir");
        let service = service(&root, Arc::new(StaticResolver::default()));

        let delivered = service
            .render_content(EXAMPLE, OutputTarget::File, "example.pdf")
            .await
            .expect("render");

        let path = delivered.path().expect("file output").clone();
        let bytes = std::fs::read(&path).expect("read pdf");
        assert!(bytes.starts_with(b"%PDF-"));
        assert!(path.starts_with(root.path().join("pdfs")));
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("pdf"));
    }

    #[tokio::test]
    async fn caller_target_streams_and_leaves_nothing_behind() {
        let root = TempDir::new().expect("temp dir");
        let service = service(&root, Arc::new(StaticResolver::default()));
        let mut sink = BufferedResponse::new();

        let delivered = service
            .render_content(
                EXAMPLE,
                OutputTarget::Caller {
                    sink: &mut sink,
                    secure: false,
                },
                "example.pdf",
            )
            .await
            .expect("render");

        let Delivered::Streamed { byte_len } = delivered else {
            panic!("expected a streamed delivery");
        };
        assert_eq!(sink.body().len() as u64, byte_len);
        assert!(sink.body().starts_with(b"%PDF-"));
        let expected_length = byte_len.to_string();
        assert_eq!(
            sink.headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok()),
            Some(expected_length.as_str())
        );
        assert_eq!(leftover_files(root.path()), 0);
    }

    #[tokio::test]
    async fn empty_markup_fails_without_leaving_files() {
        let root = TempDir::new().expect("temp dir");
        let service = service(&root, Arc::new(StaticResolver::default()));

        let err = service
            .render_content("", OutputTarget::File, "empty.pdf")
            .await
            .expect_err("empty markup");

        assert!(matches!(err, PdfError::EmptyContent));
        assert_eq!(leftover_files(root.path()), 0);
    }

    #[tokio::test]
    async fn backend_failure_removes_the_destination() {
        let root = TempDir::new().expect("temp dir");
        let service = PdfService::new(
            Arc::new(TempOutputStore::new(root.path(), "pdfs")),
            Arc::new(BrokenBackend),
            Arc::new(StaticResolver::default()),
        );
        let mut sink = BufferedResponse::new();

        let err = service
            .render_content(
                "<p>x</p>",
                OutputTarget::Caller {
                    sink: &mut sink,
                    secure: true,
                },
                "x.pdf",
            )
            .await
            .expect_err("backend failure");

        assert!(matches!(err, PdfError::RenderBackendFailed { .. }));
        assert!(sink.headers().is_empty());
        assert!(sink.body().is_empty());
        assert_eq!(leftover_files(root.path()), 0);
    }

    #[tokio::test]
    async fn missing_temp_root_is_reported() {
        let root = TempDir::new().expect("temp dir");
        let service = PdfService::new(
            Arc::new(TempOutputStore::new(root.path().join("gone"), "pdfs")),
            Arc::new(PrintPdfBackend),
            Arc::new(StaticResolver::default()),
        );

        let err = service
            .render_content("<p>x</p>", OutputTarget::File, "x.pdf")
            .await
            .expect_err("no temp root");
        assert!(matches!(err, PdfError::TempDirUnavailable { .. }));
    }

    #[tokio::test]
    async fn render_url_rejects_error_responses() {
        let root = TempDir::new().expect("temp dir");
        let resolver = Arc::new(StaticResolver::default());
        let service = service(&root, resolver.clone());

        let err = service
            .render_url("/missing", OutputTarget::File, "missing.pdf", None)
            .await
            .expect_err("404 source");

        match err {
            PdfError::RenderSourceFailed {
                url,
                status,
                status_text,
            } => {
                assert_eq!(url, "missing");
                assert_eq!(status, 404);
                assert_eq!(status_text, "Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(resolver.seen(), vec![("missing".to_string(), None)]);
        assert_eq!(leftover_files(root.path()), 0);
    }

    #[tokio::test]
    async fn render_page_fetches_the_action_with_the_session() {
        let root = TempDir::new().expect("temp dir");
        let resolver =
            Arc::new(StaticResolver::default().with_page("about/print", "<h1>About</h1>"));
        let service = service(&root, resolver.clone());

        let delivered = service
            .render_page(
                &Page("about"),
                "print",
                OutputTarget::File,
                "about.pdf",
                Some(&Session::from_cookie("sid=abc")),
            )
            .await
            .expect("render page");

        assert!(delivered.path().is_some_and(|path| path.exists()));
        assert_eq!(
            resolver.seen(),
            vec![("about/print".to_string(), Some("sid=abc".to_string()))]
        );
    }

    #[tokio::test]
    async fn render_request_dispatches_on_source() {
        let root = TempDir::new().expect("temp dir");
        let resolver = Arc::new(StaticResolver::default().with_page("docs", "<p>docs</p>"));
        let service = service(&root, resolver.clone());

        let request = RenderRequest::new(
            RenderSource::Url("/docs".into()),
            OutputTarget::File,
            "docs.pdf",
        )
        .with_session(Session::from_cookie("a=b"));
        let delivered = service.render(request).await.expect("render");

        assert!(delivered.path().is_some());
        assert_eq!(
            resolver.seen(),
            vec![("docs".to_string(), Some("a=b".to_string()))]
        );
    }

    #[tokio::test]
    async fn slow_sources_time_out() {
        let root = TempDir::new().expect("temp dir");
        let resolver = Arc::new(StaticResolver {
            delay: Some(Duration::from_millis(200)),
            ..StaticResolver::default()
        });
        let service = service(&root, resolver)
            .with_timeouts(Duration::from_millis(10), DEFAULT_RENDER_TIMEOUT);

        let err = service
            .render_url("slow", OutputTarget::File, "slow.pdf", None)
            .await
            .expect_err("timeout");
        assert!(matches!(err, PdfError::Timeout { stage: "fetch", .. }));
    }

    #[tokio::test]
    async fn concurrent_renders_use_distinct_files() {
        let root = TempDir::new().expect("temp dir");
        let service = service(&root, Arc::new(StaticResolver::default()));

        let tasks: Vec<_> = (0..8)
            .map(|index| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .render_content(
                            &format!("<p>document {index}</p>"),
                            OutputTarget::File,
                            "same-name.pdf",
                        )
                        .await
                })
            })
            .collect();

        let mut paths = HashSet::<PathBuf>::new();
        for task in tasks {
            let delivered = task.await.expect("join").expect("render");
            paths.insert(delivered.path().expect("file output").clone());
        }
        assert_eq!(paths.len(), 8);
    }

    #[tokio::test]
    async fn http_resolver_forwards_the_session_cookie() {
        let server = MockServer::start();
        let page = server.mock(|when, then| {
            when.method("GET")
                .path("/about/print")
                .header("cookie", "sid=abc");
            then.status(200).body("<p>printed</p>");
        });
        let missing = server.mock(|when, then| {
            when.method("GET").path("/gone");
            then.status(404).body("nope");
        });

        let resolver = HttpViewResolver::new(&server.base_url()).expect("resolver");
        let found = resolver
            .resolve("about/print", Some(&Session::from_cookie("sid=abc")))
            .await
            .expect("resolve page");
        assert_eq!(found.status, 200);
        assert_eq!(found.body, "<p>printed</p>");

        let gone = resolver.resolve("gone", None).await.expect("resolve 404");
        assert_eq!(gone.status, 404);
        assert_eq!(gone.status_text, "Not Found");

        page.assert();
        missing.assert();
    }

    #[test]
    fn http_resolver_normalizes_the_base() {
        let resolver = HttpViewResolver::new("http://cms.test/site").expect("resolver");
        assert_eq!(resolver.base().as_str(), "http://cms.test/site/");
        assert!(matches!(
            HttpViewResolver::new("not a url"),
            Err(PdfError::RenderSourceUnavailable { .. })
        ));
    }
}
