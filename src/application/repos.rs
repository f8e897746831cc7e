//! Repository traits describing page sources.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::pages::{PageIdentifier, PageRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("page `{identifier}` is not a valid document: {message}")]
    InvalidDocument { identifier: String, message: String },
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait PagesRepo: Send + Sync {
    async fn find_by_identifier(
        &self,
        identifier: &PageIdentifier,
    ) -> Result<Option<PageRecord>, RepoError>;

    async fn list_identifiers(&self) -> Result<Vec<PageIdentifier>, RepoError>;
}
