use std::sync::Arc;

use axum::http::StatusCode;
use tracing::debug;

use crate::application::error::HttpError;
use crate::application::repos::{PagesRepo, RepoError};
use crate::domain::pages::{PageIdentifier, PageRecord};
use crate::presentation::views::{PageSummaryView, PageView};

const SOURCE: &str = "application::page::PageService";

#[derive(Clone)]
pub struct PageService {
    pages: Arc<dyn PagesRepo>,
}

impl PageService {
    pub fn new(pages: Arc<dyn PagesRepo>) -> Self {
        Self { pages }
    }

    /// Look a page up by its raw URL segment. Segments that are not valid
    /// identifiers cannot name a page and resolve to `None`.
    pub async fn find(&self, identifier: &str) -> Result<Option<PageRecord>, HttpError> {
        let identifier = match PageIdentifier::parse(identifier) {
            Ok(identifier) => identifier,
            Err(err) => {
                debug!(target = "folio::pages", error = %err, "Rejected page identifier");
                return Ok(None);
            }
        };

        self.pages
            .find_by_identifier(&identifier)
            .await
            .map_err(|err| repo_failure("find_by_identifier", err))
    }

    pub async fn page_view(&self, identifier: &str) -> Result<Option<PageView>, HttpError> {
        Ok(self.find(identifier).await?.map(PageView::from))
    }

    pub async fn index(&self) -> Result<Vec<PageSummaryView>, HttpError> {
        let identifiers = self
            .pages
            .list_identifiers()
            .await
            .map_err(|err| repo_failure("list_identifiers", err))?;

        let mut entries = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let record = self
                .pages
                .find_by_identifier(&identifier)
                .await
                .map_err(|err| repo_failure("find_by_identifier", err))?;
            if let Some(record) = record {
                entries.push(PageSummaryView::from(&record));
            }
        }
        Ok(entries)
    }
}

fn repo_failure(operation: &'static str, err: RepoError) -> HttpError {
    HttpError::new(
        SOURCE,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to load page content",
        format!("{operation} failed: {err}"),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct MemoryPages {
        pages: BTreeMap<String, PageRecord>,
        broken: bool,
    }

    impl MemoryPages {
        fn with(mut self, identifier: &str, title: &str) -> Self {
            let identifier = PageIdentifier::parse(identifier).expect("identifier");
            self.pages.insert(
                identifier.to_string(),
                PageRecord {
                    identifier,
                    title: title.to_string(),
                    summary: None,
                    content_html: format!("<p>{title}</p>"),
                },
            );
            self
        }
    }

    #[async_trait]
    impl PagesRepo for MemoryPages {
        async fn find_by_identifier(
            &self,
            identifier: &PageIdentifier,
        ) -> Result<Option<PageRecord>, RepoError> {
            if self.broken {
                return Err(RepoError::from_persistence("disk on fire"));
            }
            Ok(self.pages.get(identifier.as_str()).cloned())
        }

        async fn list_identifiers(&self) -> Result<Vec<PageIdentifier>, RepoError> {
            Ok(self.pages.values().map(|page| page.identifier.clone()).collect())
        }
    }

    #[tokio::test]
    async fn page_view_carries_pdf_link() {
        let service = PageService::new(Arc::new(MemoryPages::default().with("about", "About")));

        let view = service
            .page_view("about")
            .await
            .expect("lookup")
            .expect("page exists");
        assert_eq!(view.title, "About");
        assert_eq!(view.pdf_link, "/about/topdf/about.pdf");
    }

    #[tokio::test]
    async fn invalid_and_unknown_identifiers_are_missing() {
        let service = PageService::new(Arc::new(MemoryPages::default().with("about", "About")));

        assert!(service.find("About Us").await.expect("lookup").is_none());
        assert!(service.find("contact").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn repository_failures_become_server_errors() {
        let service = PageService::new(Arc::new(MemoryPages {
            broken: true,
            ..MemoryPages::default()
        }));

        let err = service.find("about").await.expect_err("broken repo");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn index_lists_pages_in_order() {
        let service = PageService::new(Arc::new(
            MemoryPages::default()
                .with("zeta", "Zeta")
                .with("alpha", "Alpha"),
        ));

        let index = service.index().await.expect("index");
        let titles: Vec<&str> = index.iter().map(|entry| entry.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Zeta"]);
        assert_eq!(index[0].pdf_link, "/alpha/topdf/alpha.pdf");
    }
}
