//! Scoped temporary files for generated documents.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use tempfile::TempPath;
use tracing::debug;

use super::types::PdfError;

pub const DEFAULT_TEMP_FOLDER_NAME: &str = "folio-pdf";

/// Owns the dedicated temp subdirectory and hands out unique file paths in it.
#[derive(Debug)]
pub struct TempOutputStore {
    root: PathBuf,
    folder_name: String,
    directory: OnceLock<PathBuf>,
}

impl TempOutputStore {
    pub fn new(root: impl Into<PathBuf>, folder_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            folder_name: folder_name.into(),
            directory: OnceLock::new(),
        }
    }

    /// Create the subdirectory on first use and return it. Safe to race: a
    /// directory created by a concurrent caller counts as success.
    pub fn ensure_directory(&self) -> Result<PathBuf, PdfError> {
        if let Some(directory) = self.directory.get() {
            return Ok(directory.clone());
        }

        if !self.root.is_dir() {
            return Err(PdfError::TempDirUnavailable {
                root: self.root.clone(),
            });
        }

        let path = self.root.join(&self.folder_name);
        create_private_dir(&path).map_err(|source| PdfError::TempDirCreateFailed {
            path: path.clone(),
            source,
        })?;

        debug!(
            target = "folio::pdf::store",
            path = %path.display(),
            "PDF temp directory ready"
        );

        Ok(self.directory.get_or_init(|| path).clone())
    }

    /// Reserve a fresh, empty file under the temp directory. The file is
    /// created exclusively, so concurrent callers never share a path.
    pub fn allocate(&self, prefix: &str) -> Result<TempPath, PdfError> {
        let directory = self.ensure_directory()?;
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".pdf")
            .tempfile_in(&directory)?;
        Ok(file.into_temp_path())
    }
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    match builder.create(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(err) => Err(err),
    }
}

/// A rendered document living in the temp store. Dropping it deletes the file.
#[derive(Debug)]
pub struct GeneratedDocument {
    path: TempPath,
    byte_len: u64,
}

impl GeneratedDocument {
    pub(crate) fn new(path: TempPath, byte_len: u64) -> Self {
        Self { path, byte_len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    /// Transfer ownership of the file to the caller. It is no longer deleted
    /// when this value goes away.
    pub fn into_path(self) -> Result<PathBuf, PdfError> {
        self.path.keep().map_err(|err| PdfError::Io(err.error))
    }

    /// Delete the file now. A file that is already gone counts as deleted.
    pub fn remove(self) -> Result<(), PdfError> {
        let path = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PdfError::TempFileDeleteFailed { path, source }),
        }
    }
}

/// Byte size of a file, `None` when nothing exists at the path.
pub async fn file_len(path: &Path) -> Result<Option<u64>, PdfError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(PdfError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn ensure_directory_is_idempotent() {
        let root = TempDir::new().expect("temp dir");
        let store = TempOutputStore::new(root.path(), "pdfs");

        let first = store.ensure_directory().expect("first ensure");
        let second = store.ensure_directory().expect("second ensure");

        assert_eq!(first, second);
        assert_eq!(first, root.path().join("pdfs"));
        assert!(first.is_dir());
    }

    #[test]
    fn ensure_directory_accepts_existing_directory() {
        let root = TempDir::new().expect("temp dir");
        fs::create_dir(root.path().join("pdfs")).expect("pre-create");
        let store = TempOutputStore::new(root.path(), "pdfs");
        assert!(store.ensure_directory().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn directory_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().expect("temp dir");
        let store = TempOutputStore::new(root.path(), "pdfs");
        let dir = store.ensure_directory().expect("ensure");
        let mode = fs::metadata(dir).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o077, 0, "group/other bits must be clear: {mode:o}");
    }

    #[test]
    fn missing_root_is_unavailable() {
        let root = TempDir::new().expect("temp dir");
        let store = TempOutputStore::new(root.path().join("nope"), "pdfs");
        assert!(matches!(
            store.ensure_directory(),
            Err(PdfError::TempDirUnavailable { .. })
        ));
    }

    #[test]
    fn file_in_the_way_fails_creation() {
        let root = TempDir::new().expect("temp dir");
        fs::write(root.path().join("pdfs"), b"occupied").expect("write blocker");
        let store = TempOutputStore::new(root.path(), "pdfs");
        assert!(matches!(
            store.ensure_directory(),
            Err(PdfError::TempDirCreateFailed { .. })
        ));
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let root = TempDir::new().expect("temp dir");
        let store = Arc::new(TempOutputStore::new(root.path(), "pdfs"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let path = store.allocate("pdf_").expect("allocate");
                    path.keep().expect("keep")
                })
            })
            .collect();

        let paths: HashSet<PathBuf> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();
        assert_eq!(paths.len(), 16);
        for path in &paths {
            assert!(path.starts_with(root.path().join("pdfs")));
            assert!(path.exists());
        }
    }

    #[test]
    fn generated_document_lifecycle() {
        let root = TempDir::new().expect("temp dir");
        let store = TempOutputStore::new(root.path(), "pdfs");

        let removed = GeneratedDocument::new(store.allocate("pdf_").expect("allocate"), 0);
        let removed_path = removed.path().to_path_buf();
        removed.remove().expect("remove");
        assert!(!removed_path.exists());

        let kept = GeneratedDocument::new(store.allocate("pdf_").expect("allocate"), 0);
        let kept_path = kept.into_path().expect("keep");
        assert!(kept_path.exists());

        let dropped = GeneratedDocument::new(store.allocate("pdf_").expect("allocate"), 0);
        let dropped_path = dropped.path().to_path_buf();
        drop(dropped);
        assert!(!dropped_path.exists());
    }

    #[test]
    fn removing_a_vanished_file_is_not_an_error() {
        let root = TempDir::new().expect("temp dir");
        let store = TempOutputStore::new(root.path(), "pdfs");
        let document = GeneratedDocument::new(store.allocate("pdf_").expect("allocate"), 0);
        fs::remove_file(document.path()).expect("remove underneath");
        assert!(document.remove().is_ok());
    }

    #[tokio::test]
    async fn file_len_reports_missing_files() {
        let root = TempDir::new().expect("temp dir");
        let path = root.path().join("doc.pdf");
        assert_eq!(file_len(&path).await.expect("len"), None);
        fs::write(&path, b"%PDF").expect("write");
        assert_eq!(file_len(&path).await.expect("len"), Some(4));
    }
}
