//! Page documents stored as TOML files, one per page, named after the
//! page identifier (`about.toml` serves `/about`).

use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    application::repos::{PagesRepo, RepoError},
    domain::pages::{PageDocument, PageIdentifier, PageRecord},
};

const PAGE_EXTENSION: &str = "toml";

#[derive(Debug, Clone)]
pub struct FilePagesRepo {
    root: PathBuf,
}

impl FilePagesRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn document_path(&self, identifier: &PageIdentifier) -> PathBuf {
        self.root
            .join(format!("{}.{PAGE_EXTENSION}", identifier.as_str()))
    }
}

#[async_trait]
impl PagesRepo for FilePagesRepo {
    async fn find_by_identifier(
        &self,
        identifier: &PageIdentifier,
    ) -> Result<Option<PageRecord>, RepoError> {
        let path = self.document_path(identifier);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(RepoError::from_persistence(format!(
                    "failed to read `{}`: {err}",
                    path.display()
                )));
            }
        };

        let document: PageDocument =
            toml::from_str(&raw).map_err(|err| RepoError::InvalidDocument {
                identifier: identifier.to_string(),
                message: err.to_string(),
            })?;

        debug!(
            target = "folio::infra::pages",
            identifier = identifier.as_str(),
            path = %path.display(),
            "Loaded page document"
        );
        Ok(Some(document.into_record(identifier.clone())))
    }

    async fn list_identifiers(&self) -> Result<Vec<PageIdentifier>, RepoError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RepoError::from_persistence(err)),
        };

        let mut identifiers = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(RepoError::from_persistence)?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PAGE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match PageIdentifier::parse(stem) {
                Ok(identifier) => identifiers.push(identifier),
                Err(err) => warn!(
                    target = "folio::infra::pages",
                    path = %path.display(),
                    error = %err,
                    "Skipping page file with an unusable name"
                ),
            }
        }

        identifiers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(identifiers)
    }
}
