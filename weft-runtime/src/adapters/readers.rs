//! ABOUTME: Named document readers for the document-source step
//! ABOUTME: Ships a filesystem reader; applications register their own by name

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use weft_core::{RagDocument, Result, WeftError};

/// Produces raw documents for the retrieval pipeline.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    async fn read(
        &self,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<RagDocument>>;
}

/// Registry of readers keyed by the descriptor's `reader` name.
#[derive(Default)]
pub struct ReaderRegistry {
    readers: DashMap<String, Arc<dyn DocumentReader>>,
}

impl ReaderRegistry {
    /// Registry with the built-in `file` reader installed.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::default();
        registry.register("file", Arc::new(FileReader));
        registry
    }

    pub fn register(&self, name: impl Into<String>, reader: Arc<dyn DocumentReader>) {
        self.readers.insert(name.into(), reader);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DocumentReader>> {
        self.readers
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                WeftError::configuration(format!("document reader '{name}' is not registered"))
            })
    }
}

/// Reads text files from a directory (args: `path`, optional `extension`).
pub struct FileReader;

#[async_trait]
impl DocumentReader for FileReader {
    async fn read(
        &self,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<RagDocument>> {
        let root = args
            .get("path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| WeftError::configuration("file reader requires a 'path' argument"))?;
        let extension = args
            .get("extension")
            .and_then(serde_json::Value::as_str)
            .map(str::to_ascii_lowercase);

        let mut documents = Vec::new();
        let mut pending = vec![Path::new(root).to_path_buf()];
        while let Some(path) = pending.pop() {
            let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
                WeftError::adapter(format!("cannot stat '{}': {e}", path.display()))
            })?;
            if metadata.is_dir() {
                let mut entries = tokio::fs::read_dir(&path).await.map_err(|e| {
                    WeftError::adapter(format!("cannot list '{}': {e}", path.display()))
                })?;
                while let Some(entry) = entries.next_entry().await.map_err(|e| {
                    WeftError::adapter(format!("cannot list '{}': {e}", path.display()))
                })? {
                    pending.push(entry.path());
                }
                continue;
            }
            if let Some(wanted) = &extension {
                let actual = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_ascii_lowercase);
                if actual.as_deref() != Some(wanted.as_str()) {
                    continue;
                }
            }
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                WeftError::adapter(format!("cannot read '{}': {e}", path.display()))
            })?;
            let mut doc_metadata = BTreeMap::new();
            doc_metadata.insert("source".to_string(), path.display().to_string());
            documents.push(RagDocument {
                doc_id: path.display().to_string(),
                content,
                mime_type: Some("text/plain".to_string()),
                metadata: doc_metadata,
            });
        }
        // Directory walk order is platform-dependent; stable output helps
        // downstream fingerprints.
        documents.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_reader_reads_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("nested/b.md"), "beta").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "binary").unwrap();

        let mut args = serde_json::Map::new();
        args.insert("path".into(), serde_json::json!(dir.path().to_str().unwrap()));
        args.insert("extension".into(), serde_json::json!("md"));

        let docs = FileReader.read(&args).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, "alpha");
        assert_eq!(docs[1].content, "beta");
    }

    #[test]
    fn test_unknown_reader_is_configuration_error() {
        let registry = ReaderRegistry::with_builtins();
        assert!(registry.get("file").is_ok());
        assert_eq!(
            registry.get("gdrive").err().unwrap().kind(),
            "configuration"
        );
    }
}
