// Zotero item references
// Identity of library items and attachments as the assistant sees them.

use serde::{Deserialize, Serialize};

/// Default library id of the local user library
pub const USER_LIBRARY_ID: i64 = 1;

/// Composite identity of a Zotero item: library id + item key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemReference {
    pub library_id: i64,
    pub zotero_key: String,
}

impl ItemReference {
    pub fn new(library_id: i64, zotero_key: impl Into<String>) -> Self {
        Self {
            library_id,
            zotero_key: zotero_key.into(),
        }
    }

    /// Parse the `"<library_id>-<KEY>"` form used in citation tags.
    /// A bare key resolves to the user library.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        match value.split_once('-') {
            Some((library, key)) => {
                let library_id = library.trim().parse::<i64>().ok()?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some(Self::new(library_id, key.to_uppercase()))
            }
            None => Some(Self::new(USER_LIBRARY_ID, value.to_uppercase())),
        }
    }
}

impl std::fmt::Display for ItemReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.library_id, self.zotero_key)
    }
}

/// Item facts resolved from the host item store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub reference: ItemReference,
    pub title: Option<String>,
    pub is_attachment: bool,
    /// Attachment file is present on disk
    pub file_exists: bool,
    pub content_type: Option<String>,
}

/// Why the backend could not see an item the user referenced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// Item no longer exists in the local library
    NotInLibrary,
    /// Attachment exists but its file is not downloaded
    FileMissing,
    /// Attachment type the backend cannot read
    UnsupportedType,
    /// Item is local and readable, so the backend copy is behind
    NotSynced,
    /// Lookup failed; classification is best effort
    Unknown,
}

impl std::fmt::Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingReason::NotInLibrary => write!(f, "not_in_library"),
            MissingReason::FileMissing => write!(f, "file_missing"),
            MissingReason::UnsupportedType => write!(f, "unsupported_type"),
            MissingReason::NotSynced => write!(f, "not_synced"),
            MissingReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Item the backend reported as missing, with the local classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissingItem {
    pub reference: ItemReference,
    pub reason: MissingReason,
    pub run_id: String,
}
