//! JSON catalog repository: a file describing objects, with content files stored next to it.
//!
//! ```json
//! { "objects": [ { "id": "0900a1", "version_id": "0900b7", "modified_ms": 1700000000000,
//!                  "name": "Q3 report", "format": "pdf", "folders": ["/Finance/2024"],
//!                  "attributes": { "owner": "ops" }, "content": "blobs/0900b7.bin" } ] }
//! ```
//! `content` is relative to the catalog's directory; omit it for objects without content.

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::{CandidateCursor, Query, RepoObject, Repository};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    objects: Vec<CatalogEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    version_id: String,
    #[serde(default)]
    modified_ms: i64,
    name: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    folders: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    content: Option<PathBuf>,
}

impl CatalogEntry {
    fn to_object(&self, content: Option<Vec<u8>>) -> RepoObject {
        RepoObject {
            id: self.id.clone(),
            version_id: self.version_id.clone(),
            modified_ms: self.modified_ms,
            name: self.name.clone(),
            format: self.format.clone(),
            folder_paths: self.folders.clone(),
            attributes: self.attributes.clone(),
            content,
        }
    }
}

pub struct CatalogRepository {
    base_dir: PathBuf,
    entries: Vec<CatalogEntry>,
    by_version: HashMap<String, usize>,
}

impl CatalogRepository {
    /// Load and index the catalog. Failure to read or parse it is fatal for a run.
    pub fn open(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read catalog {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&text)
            .with_context(|| format!("parse catalog {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let by_version = file
            .objects
            .iter()
            .enumerate()
            .map(|(i, e)| (e.version_id.clone(), i))
            .collect();
        debug!(
            "Loaded catalog {} ({} objects)",
            path.display(),
            file.objects.len()
        );
        Ok(Self {
            base_dir,
            entries: file.objects,
            by_version,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Repository for CatalogRepository {
    fn list_candidates(&self, query: &str) -> Result<CandidateCursor<'_>> {
        let query = Query::parse(query)?;
        Ok(Box::new(self.entries.iter().filter_map(move |e| {
            let obj = e.to_object(None);
            query.matches(&obj).then(|| Ok(obj.candidate()))
        })))
    }

    fn fetch_object(&self, version_id: &str) -> Result<RepoObject> {
        let idx = self
            .by_version
            .get(version_id)
            .ok_or_else(|| anyhow!("object {} not found in catalog", version_id))?;
        let entry = &self.entries[*idx];
        let content = match &entry.content {
            Some(rel) => {
                let path = self.base_dir.join(rel);
                Some(
                    std::fs::read(&path)
                        .with_context(|| format!("read content {}", path.display()))?,
                )
            }
            None => None,
        };
        Ok(entry.to_object(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_catalog(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir.join("blobs")).unwrap();
        std::fs::write(dir.join("blobs/b1.bin"), b"hello").unwrap();
        let path = dir.join("catalog.json");
        std::fs::write(
            &path,
            r#"{"objects": [
                {"id": "a", "version_id": "a1", "modified_ms": 5, "name": "Folder note", "folders": ["/Notes"]},
                {"id": "b", "version_id": "b1", "modified_ms": 6, "name": "Report", "format": "pdf",
                 "folders": ["/Finance/2024"], "attributes": {"owner": "ops"}, "content": "blobs/b1.bin"}
            ]}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn lists_and_filters_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CatalogRepository::open(&write_catalog(dir.path())).unwrap();
        assert_eq!(repo.len(), 2);
        let all: Vec<_> = repo
            .list_candidates("")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 2);
        let finance: Vec<_> = repo
            .list_candidates("folder=/Finance")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(finance, vec![crate::Candidate::new("b", "b1", 6)]);
    }

    #[test]
    fn fetch_reads_content_relative_to_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let repo = CatalogRepository::open(&write_catalog(dir.path())).unwrap();
        let b = repo.fetch_object("b1").unwrap();
        assert_eq!(b.content.as_deref(), Some(&b"hello"[..]));
        assert_eq!(b.attribute("owner"), "ops");
        let a = repo.fetch_object("a1").unwrap();
        assert!(!a.has_content());
        assert!(repo.fetch_object("zz").is_err());
    }
}
