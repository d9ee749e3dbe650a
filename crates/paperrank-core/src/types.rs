use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Embeddings and rankings
// =============================================================================

/// One paper's embedding as read from the store.
///
/// Immutable once created; regeneration replaces the record wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperEmbedding {
    pub id: i64,
    pub title: String,
    pub vector: Vec<f32>,
    pub model_tag: String,
    pub generated_at: DateTime<Utc>,
}

impl PaperEmbedding {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A record excluded from a ranking cycle, with the reason it was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEmbedding {
    pub id: i64,
    pub reason: String,
}

/// One entry of a source paper's Top-K list.
///
/// `rank` starts at 1. For a fixed source, `score` never increases with rank
/// and equal scores are ordered by ascending `target_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedNeighbor {
    pub source_id: i64,
    pub rank: usize,
    pub target_id: i64,
    pub target_title: String,
    pub score: f64,
}

// =============================================================================
// Entities and associations
// =============================================================================

/// A named entity (an author) that may be duplicated by repeated ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntity {
    pub id: i64,
    pub name: String,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Link between a paper and an entity. `(paper_id, entity_id)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub paper_id: i64,
    pub entity_id: i64,
    pub order: i64,
    pub flags: AssociationFlags,
}

/// Per-association flags carried through a merge untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationFlags {
    pub corresponding: bool,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Outcome of a single stage invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure,
    Timeout,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Success => "success",
            StageOutcome::Failure => "failure",
            StageOutcome::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts describing how much of the corpus has embeddings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_papers: u64,
    pub with_embeddings: u64,
}

impl CorpusStats {
    /// Share of papers with an embedding, in percent.
    pub fn coverage_pct(&self) -> f64 {
        if self.total_papers == 0 {
            0.0
        } else {
            self.with_embeddings as f64 / self.total_papers as f64 * 100.0
        }
    }
}

impl std::fmt::Display for CorpusStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} papers, {} with embeddings ({:.1}%)",
            self.total_papers,
            self.with_embeddings,
            self.coverage_pct()
        )
    }
}
