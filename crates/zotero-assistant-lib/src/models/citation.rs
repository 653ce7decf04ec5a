// Citation models
// Cited spans returned with a completed run.

use serde::{Deserialize, Serialize};

use super::item::ItemReference;

/// Rectangle on a PDF page, in PDF user-space coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Boxes on a single page (zero-based page index)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageLocation {
    pub page_index: u32,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
}

/// Metadata describing one cited span
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitationMetadata {
    /// Unique within a run
    pub citation_id: String,
    /// Set when the run completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zotero_key: Option<String>,
    /// Reference outside the user's library (web/search result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_source_id: Option<String>,
    #[serde(default)]
    pub locations: Vec<PageLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl CitationMetadata {
    pub fn item_reference(&self) -> Option<ItemReference> {
        match (self.library_id, self.zotero_key.as_deref()) {
            (Some(library_id), Some(key)) if !key.is_empty() => {
                Some(ItemReference::new(library_id, key))
            }
            _ => None,
        }
    }

    /// Identity of the cited source, used for consecutive-citation checks
    pub fn source_key(&self) -> Option<String> {
        if let Some(item) = self.item_reference() {
            return Some(item.to_string());
        }
        self.external_source_id
            .as_ref()
            .map(|id| format!("ext:{}", id))
    }

    /// First cited page, zero-based
    pub fn first_page(&self) -> Option<u32> {
        self.locations.iter().map(|l| l.page_index).min()
    }
}
