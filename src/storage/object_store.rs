//! Blob storage with two areas: `incoming` for raw uploads and
//! `organized` for routed documents. Keys are relative to their area and
//! always produced by this module, never taken verbatim from clients.

use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::core::errors::PipelineError;

pub struct ObjectStore {
    incoming_dir: PathBuf,
    organized_dir: PathBuf,
}

impl ObjectStore {
    pub fn new(incoming_dir: PathBuf, organized_dir: PathBuf) -> Self {
        Self {
            incoming_dir,
            organized_dir,
        }
    }

    /// Generate a unique incoming key for a sanitized file name:
    /// timestamp + random suffix keeps concurrent uploads of the same
    /// file name apart.
    pub fn incoming_key(file_name: &str) -> String {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{stamp}-{}-{file_name}", &suffix[..8])
    }

    pub async fn write_incoming(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let path = self.area_path(&self.incoming_dir, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(PipelineError::storage)?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(PipelineError::storage)
    }

    pub async fn read_incoming(&self, key: &str) -> Result<String, PipelineError> {
        let path = self.area_path(&self.incoming_dir, key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(PipelineError::storage)?;
        String::from_utf8(bytes)
            .map_err(|_| PipelineError::Input(format!("object {key} is not valid UTF-8 text")))
    }

    /// Copy (never move) an incoming object to a deterministic organized
    /// key. Repeating the copy is harmless, which keeps routing safe to
    /// retry.
    pub async fn copy_to_organized(
        &self,
        source_key: &str,
        organized_key: &str,
    ) -> Result<(), PipelineError> {
        let source = self.area_path(&self.incoming_dir, source_key)?;
        let dest = self.area_path(&self.organized_dir, organized_key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(PipelineError::storage)?;
        }
        tokio::fs::copy(&source, &dest)
            .await
            .map_err(PipelineError::storage)?;
        Ok(())
    }

    pub async fn organized_exists(&self, organized_key: &str) -> Result<bool, PipelineError> {
        let path = self.area_path(&self.organized_dir, organized_key)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(PipelineError::storage)?)
    }

    fn area_path(&self, area: &Path, key: &str) -> Result<PathBuf, PipelineError> {
        if key.is_empty()
            || key.split('/').any(|segment| {
                segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\')
            })
        {
            return Err(PipelineError::Input(format!("invalid object key: {key}")));
        }
        Ok(area.join(key))
    }
}

/// Reduce a client-supplied file name to a safe key suffix: drop any path
/// components, keep `[A-Za-z0-9._-]`, reject names with nothing left.
pub fn sanitize_file_name(raw: &str) -> Result<String, PipelineError> {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();

    if cleaned.is_empty() {
        return Err(PipelineError::Input(
            "file name is empty after sanitization".to_string(),
        ));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, ObjectStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(tmp.path().join("incoming"), tmp.path().join("organized"));
        (tmp, store)
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(
            sanitize_file_name("C:\\temp\\invoice.pdf").unwrap(),
            "invoice.pdf"
        );
        assert_eq!(sanitize_file_name("invoice (1).pdf").unwrap(), "invoice1.pdf");
    }

    #[test]
    fn sanitize_rejects_empty_results() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("///").is_err());
        assert!(sanitize_file_name("..").is_err());
    }

    #[test]
    fn incoming_keys_are_unique_per_call() {
        let a = ObjectStore::incoming_key("invoice.pdf");
        let b = ObjectStore::incoming_key("invoice.pdf");
        assert_ne!(a, b);
        assert!(a.ends_with("-invoice.pdf"));
    }

    #[tokio::test]
    async fn write_read_copy_roundtrip() {
        let (_tmp, store) = test_store();

        store.write_incoming("doc.txt", b"hello").await.unwrap();
        assert_eq!(store.read_incoming("doc.txt").await.unwrap(), "hello");

        store
            .copy_to_organized("doc.txt", "invoice/doc.txt")
            .await
            .unwrap();
        assert!(store.organized_exists("invoice/doc.txt").await.unwrap());

        // copy is idempotent
        store
            .copy_to_organized("doc.txt", "invoice/doc.txt")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (_tmp, store) = test_store();
        assert!(store.read_incoming("../outside.txt").await.is_err());
        assert!(store.write_incoming("a/../b", b"x").await.is_err());
    }
}
