// Citation and annotation tag utilities
// Parses the tags the assistant embeds in streamed text: citations,
// annotation references and note blocks.

use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use crate::models::citation::CitationMetadata;
use crate::models::item::ItemReference;

// ============================================================================
// Regex Patterns
// ============================================================================

/// Pattern for citation tags: <citation id="c1" citation_key="1-ABCD" page="3"/>
static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<citation\b([^>]*?)/?>(?:\s*</citation>)?").expect("Invalid citation regex")
});

/// Pattern for annotation references: <annotation id="a1"/>
static ANNOTATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<annotation\b([^>]*?)/?>(?:\s*</annotation>)?").expect("Invalid annotation regex")
});

/// Pattern for tag attributes, double or single quoted
static ATTRIBUTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("Invalid attribute regex")
});

/// Opening tag of a note block: <note title="...">
static NOTE_OPEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<note\b([^>]*)>").expect("Invalid note regex"));

const NOTE_CLOSE: &str = "</note>";

/// Separator that breaks a run of consecutive citations
const PARAGRAPH_BREAK: &str = "\n\n";

// ============================================================================
// Attributes
// ============================================================================

/// Parse `name="value"` pairs. Names are lowercased and dashes become
/// underscores, so `att-id` and `att_id` are the same attribute.
pub fn parse_attributes(raw: &str) -> BTreeMap<String, String> {
    ATTRIBUTE_PATTERN
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_lowercase().replace('-', "_");
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some((name, value.trim().to_string()))
        })
        .collect()
}

fn item_key_from(value: &str, library_hint: Option<i64>) -> Option<String> {
    if value.contains('-') {
        return ItemReference::parse(value).map(|item| item.to_string());
    }
    let item = ItemReference::parse(value)?;
    match library_hint {
        Some(library_id) => Some(ItemReference::new(library_id, item.zotero_key).to_string()),
        None => Some(item.to_string()),
    }
}

/// Canonical source key for a citation tag.
///
/// Priority: `citation_key`, then attachment id (`att_id`/`attachment_id`),
/// then `item_id`, then an external id rendered as `ext:<id>`. Library-item
/// keys come out as `"<library_id>-<KEY>"`.
pub fn normalize_citation_key(attributes: &BTreeMap<String, String>) -> Option<String> {
    let library_hint = attributes
        .get("library_id")
        .and_then(|v| v.parse::<i64>().ok());

    if let Some(key) = attributes.get("citation_key").filter(|v| !v.is_empty()) {
        if let Some(external) = key.strip_prefix("ext:") {
            return Some(format!("ext:{}", external.trim()));
        }
        if let Some(normalized) = item_key_from(key, library_hint) {
            return Some(normalized);
        }
    }

    for name in ["att_id", "attachment_id", "item_id"] {
        if let Some(value) = attributes.get(name).filter(|v| !v.is_empty()) {
            if let Some(normalized) = item_key_from(value, library_hint) {
                return Some(normalized);
            }
        }
    }

    ["external_id", "external_source_id"]
        .iter()
        .find_map(|name| attributes.get(*name).filter(|v| !v.is_empty()))
        .map(|id| format!("ext:{}", id))
}

// ============================================================================
// Citation Tags
// ============================================================================

/// One citation tag found in text
#[derive(Debug, Clone, PartialEq)]
pub struct CitationTag {
    pub citation_id: Option<String>,
    /// Normalized source key, see `normalize_citation_key`
    pub key: Option<String>,
    pub page: Option<u32>,
    pub attributes: BTreeMap<String, String>,
    pub start_index: usize,
    pub end_index: usize,
    /// Same source as the previous tag with no paragraph break in between
    pub consecutive: bool,
}

impl CitationTag {
    /// Whether this tag refers to the given citation record
    pub fn matches(&self, citation: &CitationMetadata) -> bool {
        if let Some(id) = &self.citation_id {
            if id == &citation.citation_id {
                return true;
            }
        }
        match (&self.key, citation.source_key()) {
            (Some(key), Some(source)) => key == &source,
            _ => false,
        }
    }

    /// Citation record this tag renders, by id first and then by source
    pub fn resolve<'a>(&self, citations: &'a [CitationMetadata]) -> Option<&'a CitationMetadata> {
        if let Some(id) = &self.citation_id {
            if let Some(found) = citations.iter().find(|c| &c.citation_id == id) {
                return Some(found);
            }
        }
        citations.iter().find(|c| self.matches(c))
    }
}

/// Parse citation tags in order of position, flagging consecutive ones.
///
/// Consecutiveness is positional: a tag is consecutive when its key equals the
/// key of the immediately preceding tag and the text between them holds no
/// paragraph break.
pub fn parse_citations(content: &str) -> Vec<CitationTag> {
    let mut tags: Vec<CitationTag> = Vec::new();

    for caps in CITATION_PATTERN.captures_iter(content) {
        let (Some(full_match), Some(raw)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        let attributes = parse_attributes(raw.as_str());
        let key = normalize_citation_key(&attributes);
        let page = attributes.get("page").and_then(|p| p.parse::<u32>().ok());

        let consecutive = match (tags.last(), &key) {
            (Some(prev), Some(key)) => {
                prev.key.as_deref() == Some(key.as_str())
                    && !content[prev.end_index..full_match.start()].contains(PARAGRAPH_BREAK)
            }
            _ => false,
        };

        tags.push(CitationTag {
            citation_id: attributes.get("id").cloned(),
            key,
            page,
            attributes,
            start_index: full_match.start(),
            end_index: full_match.end(),
            consecutive,
        });
    }

    tags
}

/// Remove citation tags that repeat the preceding source ("ibid" collapse)
pub fn collapse_duplicate_citations(content: &str) -> String {
    let tags = parse_citations(content);
    let mut result = String::with_capacity(content.len());
    let mut cursor = 0;

    for tag in tags.iter().filter(|t| t.consecutive) {
        result.push_str(&content[cursor..tag.start_index]);
        cursor = tag.end_index;
    }
    result.push_str(&content[cursor..]);
    result
}

/// Content with all citation and annotation tags removed
pub fn strip_tags(content: &str) -> String {
    let result = CITATION_PATTERN.replace_all(content, "");
    ANNOTATION_PATTERN.replace_all(&result, "").to_string()
}

/// Check if content contains any citation tags
pub fn has_citations(content: &str) -> bool {
    CITATION_PATTERN.is_match(content)
}

// ============================================================================
// Annotation References
// ============================================================================

/// Ids of proposed actions referenced in text, in first-seen order
pub fn extract_annotation_refs(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    ANNOTATION_PATTERN
        .captures_iter(content)
        .filter_map(|caps| {
            let attributes = parse_attributes(caps.get(1)?.as_str());
            attributes.get("id").filter(|id| !id.is_empty()).cloned()
        })
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

// ============================================================================
// Note Blocks
// ============================================================================

/// Note proposed inline in the response text
#[derive(Debug, Clone, PartialEq)]
pub struct NoteBlock {
    pub title: Option<String>,
    pub content: String,
    /// False while the closing tag has not streamed in yet
    pub complete: bool,
}

/// Response text split around note blocks
#[derive(Debug, Clone, PartialEq)]
pub enum TextSegment {
    Text(String),
    Note(NoteBlock),
}

/// Split content into plain text and note blocks. An unterminated trailing
/// note is returned as an incomplete block.
pub fn split_note_blocks(content: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    while let Some(caps) = NOTE_OPEN_PATTERN.captures_at(content, cursor) {
        let Some(open) = caps.get(0) else { break };

        let before = &content[cursor..open.start()];
        if !before.trim().is_empty() {
            segments.push(TextSegment::Text(before.to_string()));
        }

        let title = caps
            .get(1)
            .map(|raw| parse_attributes(raw.as_str()))
            .and_then(|attrs| attrs.get("title").cloned())
            .filter(|t| !t.is_empty());

        let body_start = open.end();
        match content[body_start..].find(NOTE_CLOSE) {
            Some(offset) => {
                segments.push(TextSegment::Note(NoteBlock {
                    title,
                    content: content[body_start..body_start + offset].trim().to_string(),
                    complete: true,
                }));
                cursor = body_start + offset + NOTE_CLOSE.len();
            }
            None => {
                segments.push(TextSegment::Note(NoteBlock {
                    title,
                    content: content[body_start..].trim().to_string(),
                    complete: false,
                }));
                cursor = content.len();
            }
        }
    }

    let rest = &content[cursor..];
    if !rest.trim().is_empty() {
        segments.push(TextSegment::Text(rest.to_string()));
    }
    segments
}
