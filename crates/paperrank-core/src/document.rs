//! Structured full-text extraction payloads.
//!
//! Extraction services return nested JSON (sections, authors, references).
//! These records are validated when ingested: malformed nested entries are
//! dropped and counted rather than failing the whole document.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Characters of body content kept when composing embedding input.
pub const MAX_CONTENT_CHARS: usize = 8000;

/// A body section of an extracted paper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

/// An author as named inside the extracted document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub name: String,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A bibliography entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub doi: Option<String>,
}

/// Body text either split into sections or delivered as one blob.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Body {
    Sections { sections: Vec<Section> },
    Plain { text: String },
    #[default]
    Empty,
}

/// Validated extraction output for one paper.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub body: Body,
    pub authors: Vec<AuthorRef>,
    pub references: Vec<Reference>,
}

/// Raw wire shape as produced by the extraction service.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    title: Option<String>,
    #[serde(alias = "abstract")]
    abstract_text: Option<String>,
    sections: Vec<serde_json::Value>,
    full_text: Option<String>,
    authors: Vec<serde_json::Value>,
    references: Vec<serde_json::Value>,
}

/// Result of validating a raw extraction payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedDocument {
    pub document: ExtractedDocument,
    /// Nested entries that failed validation and were left out.
    pub dropped: usize,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Deserialize each element, keeping those that parse and pass `keep`.
fn validated<T, F>(raw: Vec<serde_json::Value>, keep: F, dropped: &mut usize) -> Vec<T>
where
    T: for<'de> Deserialize<'de>,
    F: Fn(&T) -> bool,
{
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<T>(value) {
            Ok(item) if keep(&item) => out.push(item),
            _ => *dropped += 1,
        }
    }
    out
}

impl ExtractedDocument {
    /// Parse and validate an extraction payload.
    ///
    /// Fails only when the payload is not a JSON object at all.
    pub fn parse(json: &str) -> Result<ParsedDocument> {
        let raw: RawDocument = serde_json::from_str(json)?;
        let mut dropped = 0;

        let sections: Vec<Section> = validated(
            raw.sections,
            |s: &Section| !s.content.trim().is_empty(),
            &mut dropped,
        );
        let body = if !sections.is_empty() {
            Body::Sections { sections }
        } else if let Some(text) = non_blank(raw.full_text) {
            Body::Plain { text }
        } else {
            Body::Empty
        };

        let authors = validated(
            raw.authors,
            |a: &AuthorRef| !a.name.trim().is_empty(),
            &mut dropped,
        );
        let references = validated(
            raw.references,
            |r: &Reference| !r.title.trim().is_empty(),
            &mut dropped,
        );

        Ok(ParsedDocument {
            document: ExtractedDocument {
                title: non_blank(raw.title),
                abstract_text: non_blank(raw.abstract_text),
                body,
                authors,
                references,
            },
            dropped,
        })
    }

    /// Flattened body text, sections joined as `title: content`.
    pub fn body_text(&self) -> Option<String> {
        match &self.body {
            Body::Sections { sections } => {
                let parts: Vec<String> = sections
                    .iter()
                    .map(|s| match &s.title {
                        Some(title) if !title.trim().is_empty() => {
                            format!("{}: {}", title.trim(), s.content.trim())
                        }
                        _ => s.content.trim().to_string(),
                    })
                    .collect();
                Some(parts.join(" "))
            }
            Body::Plain { text } => Some(text.clone()),
            Body::Empty => None,
        }
    }

    /// Text fed to the embedding model.
    ///
    /// `fallback_title` and `fallback_abstract` come from the paper metadata
    /// and are used when the extraction lacks them.
    pub fn embedding_text(
        &self,
        fallback_title: Option<&str>,
        fallback_abstract: Option<&str>,
    ) -> Option<String> {
        compose_embedding_text(
            self.title.as_deref().or(fallback_title),
            self.abstract_text.as_deref().or(fallback_abstract),
            self.body_text().as_deref(),
        )
    }
}

/// Compose `Title: .. Abstract: .. Content: ..` with the content capped.
pub fn compose_embedding_text(
    title: Option<&str>,
    abstract_text: Option<&str>,
    content: Option<&str>,
) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(format!("Title: {}", title));
    }
    if let Some(abs) = abstract_text.map(str::trim).filter(|a| !a.is_empty()) {
        parts.push(format!("Abstract: {}", abs));
    }
    if let Some(content) = content.map(str::trim).filter(|c| !c.is_empty()) {
        if content.chars().count() > MAX_CONTENT_CHARS {
            let capped: String = content.chars().take(MAX_CONTENT_CHARS).collect();
            parts.push(format!("Content: {}...", capped));
        } else {
            parts.push(format!("Content: {}", content));
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}
