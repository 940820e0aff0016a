//! Content repository collaborator: lists candidates and fetches object content + metadata.
//!
//! The pipeline only sees the [`Repository`] trait. [`CatalogRepository`] reads a JSON catalog from disk
//! (what the CLI uses); [`MemoryRepository`] keeps objects in memory (tests and embedding programs).

mod catalog;
mod filter;
mod memory;

pub use catalog::CatalogRepository;
pub use filter::{Clause, Query};
pub use memory::MemoryRepository;

use anyhow::Result;
use std::collections::BTreeMap;

use crate::Candidate;

/// Server-side cursor over candidates. Dropping it releases the cursor, including after an error.
pub type CandidateCursor<'a> = Box<dyn Iterator<Item = Result<Candidate>> + 'a>;

/// One object revision as fetched for export.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoObject {
    pub id: String,
    pub version_id: String,
    pub modified_ms: i64,
    /// Display name; becomes the file name after sanitizing.
    pub name: String,
    /// Format extension without the dot (`pdf`, `docx`). May be empty.
    pub format: String,
    /// Folder paths the object is linked into; the first one is used for export.
    pub folder_paths: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    /// None when the object carries no content.
    pub content: Option<Vec<u8>>,
}

impl RepoObject {
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn candidate(&self) -> Candidate {
        Candidate::new(self.id.as_str(), self.version_id.as_str(), self.modified_ms)
    }

    /// Value for a manifest column: built-in fields first, then attributes. Missing → empty.
    pub fn attribute(&self, name: &str) -> String {
        match name {
            "id" => self.id.clone(),
            "version_id" => self.version_id.clone(),
            "modified_ms" => self.modified_ms.to_string(),
            "name" => self.name.clone(),
            "format" => self.format.clone(),
            _ => self.attributes.get(name).cloned().unwrap_or_default(),
        }
    }
}

pub trait Repository: Send + Sync {
    /// Open a cursor over candidates matching `query`. An error here, or from the cursor, is fatal for the build step.
    fn list_candidates(&self, query: &str) -> Result<CandidateCursor<'_>>;

    /// Fetch one revision with its content.
    fn fetch_object(&self, version_id: &str) -> Result<RepoObject>;
}
