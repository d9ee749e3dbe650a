//! In-process extract/embed stage.
//!
//! Fills the embedding of papers that lack one. Input text comes from the
//! stored extraction payload when present, otherwise from title and
//! abstract.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use paperrank_core::cancel::CancelFlag;
use paperrank_core::document::{compose_embedding_text, ExtractedDocument};
use paperrank_storage::{Database, PaperRepository, PendingPaper};

use crate::error::StageError;
use crate::stage::{Stage, StageParams, StageReport};

/// Text-to-vector model.
pub trait Embedder: Send + Sync {
    /// Tag stored with each vector.
    fn model_tag(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, StageError>;
}

/// Deterministic hash-seeded embedder for offline runs and tests.
///
/// Identical text always yields the identical unit vector, on any
/// platform or toolchain: component `i` is drawn from
/// SHA-256(text bytes ++ little-endian `i`).
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for HashEmbedder {
    fn model_tag(&self) -> &str {
        "hash-embedder-v2"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, StageError> {
        if text.trim().is_empty() {
            return Err(StageError::Failed("cannot embed empty text".to_string()));
        }

        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|i| hash_component(text, i) as f32)
            .collect();

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// Raw component in [-1, 1] before normalisation.
fn hash_component(text: &str, index: usize) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) as f64 / u64::MAX as f64) * 2.0 - 1.0
}

/// Counts from one embed pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmbedTally {
    pub embedded: usize,
    pub failed: usize,
    /// Papers with no usable text.
    pub skipped: usize,
    /// Nested extraction entries dropped during validation.
    pub dropped_entries: usize,
}

/// Text to embed for a pending paper.
fn paper_text(paper: &PendingPaper, dropped: &mut usize) -> Option<String> {
    let from_extraction = paper.extraction.as_deref().and_then(|json| {
        match ExtractedDocument::parse(json) {
            Ok(parsed) => {
                *dropped += parsed.dropped;
                parsed
                    .document
                    .embedding_text(Some(&paper.title), paper.abstract_text.as_deref())
            }
            Err(e) => {
                warn!(paper_id = paper.id, error = %e, "Unreadable extraction payload, using metadata");
                None
            }
        }
    });

    from_extraction
        .or_else(|| compose_embedding_text(Some(&paper.title), paper.abstract_text.as_deref(), None))
}

/// Mark a paper as attempted so the next pass serves untried papers first.
fn note_attempt(papers: &PaperRepository, id: i64) {
    if let Err(e) = papers.record_embedding_failure(id) {
        warn!(paper_id = id, error = %e, "Failed to record embedding attempt");
    }
}

/// Embed up to `limit` pending papers. Blocking.
///
/// Papers that fail or have no text are marked attempted, which moves them
/// behind untried papers in later passes.
pub fn embed_pending(
    papers: &PaperRepository,
    embedder: &dyn Embedder,
    limit: u64,
    cancel: &CancelFlag,
) -> Result<EmbedTally, StageError> {
    let pending = papers.missing_embeddings(limit)?;
    let mut tally = EmbedTally::default();

    for paper in &pending {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let Some(text) = paper_text(paper, &mut tally.dropped_entries) else {
            debug!(paper_id = paper.id, "No text to embed");
            tally.skipped += 1;
            note_attempt(papers, paper.id);
            continue;
        };

        let stored = embedder
            .embed(&text)
            .and_then(|v| Ok(papers.set_embedding(paper.id, &v, embedder.model_tag(), Utc::now())?));
        match stored {
            Ok(()) => tally.embedded += 1,
            Err(e) => {
                warn!(paper_id = paper.id, error = %e, "Embedding failed");
                tally.failed += 1;
                note_attempt(papers, paper.id);
            }
        }
    }
    Ok(tally)
}

pub struct EmbedStage {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
    batch_limit: u64,
}

impl EmbedStage {
    pub fn new(db: Arc<Database>, embedder: Arc<dyn Embedder>, batch_limit: u64) -> Self {
        Self {
            db,
            embedder,
            batch_limit,
        }
    }
}

#[async_trait]
impl Stage for EmbedStage {
    fn name(&self) -> &str {
        "extract"
    }

    async fn run(&self, params: &StageParams) -> Result<StageReport, StageError> {
        let db = self.db.clone();
        let embedder = self.embedder.clone();
        let limit = self.batch_limit;
        let cancel = params.cancel.clone();

        let tally = tokio::task::spawn_blocking(move || {
            embed_pending(&PaperRepository::new(db), embedder.as_ref(), limit, &cancel)
        })
        .await??;

        info!(
            embedded = tally.embedded,
            failed = tally.failed,
            skipped = tally.skipped,
            dropped_entries = tally.dropped_entries,
            "Embed pass finished"
        );

        if tally.embedded == 0 && tally.failed > 0 {
            return Err(StageError::Failed(format!(
                "all {} embedding attempts failed",
                tally.failed
            )));
        }
        Ok(StageReport::new(format!(
            "embedded {}, failed {}, skipped {}",
            tally.embedded, tally.failed, tally.skipped
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperrank_storage::NewPaper;

    fn repo() -> PaperRepository {
        PaperRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn add(repo: &PaperRepository, id: i64, title: &str, extraction: Option<&str>) {
        repo.insert(&NewPaper {
            id: Some(id),
            title: title.to_string(),
            abstract_text: Some("An abstract.".into()),
            extraction: extraction.map(str::to_string),
        })
        .unwrap();
    }

    /// Embedder that fails for any text mentioning "poison".
    struct Picky;

    impl Embedder for Picky {
        fn model_tag(&self) -> &str {
            "picky"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn embed(&self, text: &str) -> Result<Vec<f32>, StageError> {
            if text.contains("poison") {
                Err(StageError::Failed("model rejected input".into()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    #[test]
    fn test_hash_embedder_is_deterministic_unit_vector() {
        let e = HashEmbedder::new(64);
        let a = e.embed("transformers").unwrap();
        let b = e.embed("transformers").unwrap();
        let c = e.embed("convolutions").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(e.embed("  ").is_err());
    }

    #[test]
    fn test_hash_components_are_pinned() {
        assert!((hash_component("transformers", 0) - -0.0031077469763545196).abs() < 1e-9);
        assert!((hash_component("transformers", 1) - 0.2747908988015302).abs() < 1e-9);
    }

    #[test]
    fn test_paper_text_prefers_extraction() {
        let paper = PendingPaper {
            id: 1,
            title: "Meta title".into(),
            abstract_text: None,
            extraction: Some(r#"{"full_text": "Body text.", "authors": [{"name": ""}]}"#.into()),
        };
        let mut dropped = 0;
        let text = paper_text(&paper, &mut dropped).unwrap();
        assert_eq!(text, "Title: Meta title Content: Body text.");
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_paper_text_falls_back_on_bad_payload() {
        let paper = PendingPaper {
            id: 1,
            title: "Meta title".into(),
            abstract_text: Some("Abs.".into()),
            extraction: Some("not json".into()),
        };
        let mut dropped = 0;
        assert_eq!(
            paper_text(&paper, &mut dropped).unwrap(),
            "Title: Meta title Abstract: Abs."
        );
    }

    #[test]
    fn test_embed_pending_counts_failures_and_continues() {
        let papers = repo();
        add(&papers, 1, "Good paper", None);
        add(&papers, 2, "poison paper", None);
        add(&papers, 3, "Another good one", None);

        let tally = embed_pending(&papers, &Picky, 10, &CancelFlag::new()).unwrap();
        assert_eq!(tally.embedded, 2);
        assert_eq!(tally.failed, 1);

        let stats = papers.stats().unwrap();
        assert_eq!(stats.with_embeddings, 2);
        let left: Vec<i64> = papers
            .missing_embeddings(10)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(left, vec![2]);
    }

    #[test]
    fn test_failing_papers_do_not_starve_the_queue() {
        let papers = repo();
        add(&papers, 1, "poison a", None);
        add(&papers, 2, "poison b", None);
        add(&papers, 3, "good c", None);

        let first = embed_pending(&papers, &Picky, 2, &CancelFlag::new()).unwrap();
        assert_eq!(first.embedded, 0);
        assert_eq!(first.failed, 2);

        let second = embed_pending(&papers, &Picky, 2, &CancelFlag::new()).unwrap();
        assert_eq!(second.embedded, 1);

        let left: Vec<i64> = papers
            .missing_embeddings(10)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        // Paper 1 has failed twice, paper 2 once.
        assert_eq!(left, vec![2, 1]);
    }

    #[test]
    fn test_embed_pending_cancelled() {
        let papers = repo();
        add(&papers, 1, "Good paper", None);
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            embed_pending(&papers, &Picky, 10, &cancel),
            Err(StageError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_stage_fails_when_every_attempt_fails() {
        let db = Arc::new(Database::in_memory().unwrap());
        let papers = PaperRepository::new(db.clone());
        add(&papers, 1, "poison", None);

        let stage = EmbedStage::new(db, Arc::new(Picky), 10);
        let params = StageParams {
            iteration: 0,
            query: "q".into(),
            target_count: 10,
            cancel: CancelFlag::new(),
        };
        assert!(stage.run(&params).await.is_err());
    }
}
