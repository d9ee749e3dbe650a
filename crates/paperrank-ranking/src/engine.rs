//! All-pairs similarity ranking with bounded Top-K lists.
//!
//! The sequential mode scores each unordered pair once and offers the value
//! to both endpoints' selections. The parallel mode gives each source row to
//! a rayon task that scores it against every other record and owns only
//! that source's selection, so memory stays at one bounded list per source.
//! Cosine is computed with commutative operations, so `score(a, b)` and
//! `score(b, a)` are bitwise equal; with selection under a total order both
//! modes produce identical output.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use paperrank_core::cancel::CancelFlag;
use paperrank_core::config::RankingConfig;
use paperrank_core::types::{PaperEmbedding, RankedNeighbor, RejectedEmbedding};

use crate::error::RankingError;
use crate::similarity::{cosine_with_norms, norm};
use crate::topk::{Candidate, TopK};

/// Parameters of one ranking run.
#[derive(Clone, Debug)]
pub struct RankingOptions {
    pub top_k: usize,
    /// Required vector dimension. Inferred from the snapshot when `None`.
    pub expected_dim: Option<usize>,
    pub parallel: bool,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            top_k: 30,
            expected_dim: None,
            parallel: true,
        }
    }
}

impl From<&RankingConfig> for RankingOptions {
    fn from(config: &RankingConfig) -> Self {
        Self {
            top_k: config.top_k,
            expected_dim: config.expected_dim,
            parallel: config.parallel,
        }
    }
}

/// The ranked neighbor list of one source record.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceRanking {
    pub source_id: i64,
    pub source_title: String,
    pub model_tag: String,
    pub neighbors: Vec<RankedNeighbor>,
}

/// Result of a ranking run.
#[derive(Clone, Debug, Default)]
pub struct RankingOutput {
    /// Dimension shared by all ranked records, if any record was accepted.
    pub dimension: Option<usize>,
    /// One entry per accepted record, ascending by source id.
    pub sources: Vec<SourceRanking>,
    pub rejected: Vec<RejectedEmbedding>,
}

impl RankingOutput {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Neighbor list for a source id.
    pub fn neighbors(&self, source_id: i64) -> Option<&[RankedNeighbor]> {
        self.sources
            .binary_search_by_key(&source_id, |s| s.source_id)
            .ok()
            .map(|i| self.sources[i].neighbors.as_slice())
    }
}

/// Records accepted for ranking plus those excluded.
#[derive(Debug, Default)]
pub struct Partition {
    pub dimension: Option<usize>,
    pub accepted: Vec<PaperEmbedding>,
    pub rejected: Vec<RejectedEmbedding>,
}

/// Pick the ranking dimension: the configured one, else the most common
/// dimension, ties going to the one seen first in id order.
pub fn select_dimension(records: &[PaperEmbedding], expected: Option<usize>) -> Option<usize> {
    if expected.is_some() {
        return expected;
    }

    let mut counts: HashMap<usize, (usize, usize)> = HashMap::new();
    for (pos, record) in records.iter().enumerate() {
        if record.vector.is_empty() {
            continue;
        }
        counts
            .entry(record.dimension())
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, pos));
    }

    counts
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then_with(|| fb.cmp(fa)))
        .map(|(dim, _)| dim)
}

/// Split records into a rankable set of one dimension and rejects.
///
/// Input is sorted by id first; later duplicates of an id are rejected.
pub fn partition(mut records: Vec<PaperEmbedding>, expected: Option<usize>) -> Partition {
    records.sort_by_key(|r| r.id);
    let dimension = select_dimension(&records, expected);

    let mut seen = HashSet::with_capacity(records.len());
    let mut accepted = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        let reason = if !seen.insert(record.id) {
            Some("duplicate id".to_string())
        } else if record.vector.iter().any(|v| !v.is_finite()) {
            Some("non-finite component".to_string())
        } else if Some(record.dimension()) != dimension {
            Some(format!(
                "dimension mismatch: got {}, expected {}",
                record.dimension(),
                dimension.unwrap_or(0)
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!(paper_id = record.id, %reason, "Excluding embedding from ranking");
                rejected.push(RejectedEmbedding {
                    id: record.id,
                    reason,
                });
            }
            None => accepted.push(record),
        }
    }

    Partition {
        dimension,
        accepted,
        rejected,
    }
}

/// Computes Top-K neighbor lists over an in-memory snapshot.
#[derive(Clone, Debug)]
pub struct RankingEngine {
    options: RankingOptions,
}

impl RankingEngine {
    pub fn new(options: RankingOptions) -> Result<Self, RankingError> {
        if options.top_k == 0 {
            return Err(RankingError::InvalidParameter(
                "top_k must be at least 1".into(),
            ));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &RankingOptions {
        &self.options
    }

    /// Rank every valid record against every other.
    ///
    /// Fewer than two valid records yields an empty output, not an error.
    /// `cancel` is checked once per source row.
    pub fn rank(
        &self,
        records: Vec<PaperEmbedding>,
        cancel: &CancelFlag,
    ) -> Result<RankingOutput, RankingError> {
        let Partition {
            dimension,
            accepted,
            rejected,
        } = partition(records, self.options.expected_dim);

        if accepted.len() < 2 {
            info!(
                valid = accepted.len(),
                rejected = rejected.len(),
                "Not enough embeddings to rank"
            );
            return Ok(RankingOutput {
                dimension,
                sources: Vec::new(),
                rejected,
            });
        }

        let norms: Vec<f64> = accepted.iter().map(|r| norm(&r.vector)).collect();
        let selections = if self.options.parallel {
            self.select_parallel(&accepted, &norms, cancel)?
        } else {
            self.select_sequential(&accepted, &norms, cancel)?
        };

        let sources = accepted
            .iter()
            .zip(selections)
            .map(|(record, top)| SourceRanking {
                source_id: record.id,
                source_title: record.title.clone(),
                model_tag: record.model_tag.clone(),
                neighbors: top
                    .into_sorted()
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| RankedNeighbor {
                        source_id: record.id,
                        rank: i + 1,
                        target_id: c.target_id,
                        target_title: accepted[c.index].title.clone(),
                        score: c.score,
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        info!(
            sources = sources.len(),
            rejected = rejected.len(),
            dimension = ?dimension,
            top_k = self.options.top_k,
            "Ranking complete"
        );

        Ok(RankingOutput {
            dimension,
            sources,
            rejected,
        })
    }

    fn select_sequential(
        &self,
        records: &[PaperEmbedding],
        norms: &[f64],
        cancel: &CancelFlag,
    ) -> Result<Vec<TopK>, RankingError> {
        let n = records.len();
        let mut tops = vec![TopK::new(self.options.top_k); n];
        for i in 0..n {
            if cancel.is_cancelled() {
                return Err(RankingError::Cancelled);
            }
            score_row(records, norms, i, &mut tops);
        }
        Ok(tops)
    }

    fn select_parallel(
        &self,
        records: &[PaperEmbedding],
        norms: &[f64],
        cancel: &CancelFlag,
    ) -> Result<Vec<TopK>, RankingError> {
        let n = records.len();
        let k = self.options.top_k;
        debug!(records = n, threads = rayon::current_num_threads(), "Parallel ranking");

        (0..n)
            .into_par_iter()
            .map(|i| {
                if cancel.is_cancelled() {
                    return Err(RankingError::Cancelled);
                }
                Ok(score_source(records, norms, i, k))
            })
            .collect()
    }
}

/// Selection for source `i` against every other record.
fn score_source(records: &[PaperEmbedding], norms: &[f64], i: usize, k: usize) -> TopK {
    let source = &records[i];
    let mut top = TopK::new(k);
    for (j, target) in records.iter().enumerate() {
        if j == i {
            continue;
        }
        top.offer(Candidate {
            score: cosine_with_norms(&source.vector, norms[i], &target.vector, norms[j]),
            target_id: target.id,
            index: j,
        });
    }
    top
}

/// Score row `i` against every later record and mirror each value.
fn score_row(records: &[PaperEmbedding], norms: &[f64], i: usize, tops: &mut [TopK]) {
    let source = &records[i];
    for j in (i + 1)..records.len() {
        let target = &records[j];
        let score = cosine_with_norms(&source.vector, norms[i], &target.vector, norms[j]);
        tops[i].offer(Candidate {
            score,
            target_id: target.id,
            index: j,
        });
        tops[j].offer(Candidate {
            score,
            target_id: source.id,
            index: i,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn emb(id: i64, vector: Vec<f32>) -> PaperEmbedding {
        PaperEmbedding {
            id,
            title: format!("paper {}", id),
            vector,
            model_tag: "test".into(),
            generated_at: Utc::now(),
        }
    }

    fn engine(top_k: usize, parallel: bool) -> RankingEngine {
        RankingEngine::new(RankingOptions {
            top_k,
            expected_dim: None,
            parallel,
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let result = RankingEngine::new(RankingOptions {
            top_k: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(RankingError::InvalidParameter(_))));
    }

    #[test]
    fn test_select_dimension_majority() {
        let records = vec![
            emb(1, vec![1.0, 0.0, 0.0]),
            emb(2, vec![1.0, 0.0]),
            emb(3, vec![0.0, 1.0]),
        ];
        assert_eq!(select_dimension(&records, None), Some(2));
        assert_eq!(select_dimension(&records, Some(3)), Some(3));
    }

    #[test]
    fn test_select_dimension_tie_prefers_first_seen() {
        let records = vec![emb(1, vec![1.0, 0.0, 0.0]), emb(2, vec![1.0, 0.0])];
        assert_eq!(select_dimension(&records, None), Some(3));
        assert_eq!(select_dimension(&[], None), None);
    }

    #[test]
    fn test_partition_rejects_mismatch_and_duplicates() {
        let records = vec![
            emb(3, vec![1.0, 1.0]),
            emb(1, vec![1.0, 0.0]),
            emb(2, vec![1.0, 0.0, 5.0]),
            emb(1, vec![0.5, 0.5]),
            emb(4, vec![f32::NAN, 0.0]),
        ];
        let p = partition(records, None);
        let accepted: Vec<i64> = p.accepted.iter().map(|r| r.id).collect();
        let rejected: Vec<i64> = p.rejected.iter().map(|r| r.id).collect();
        assert_eq!(accepted, vec![1, 3]);
        assert_eq!(rejected, vec![1, 2, 4]);
        assert!(p.rejected[1].reason.starts_with("dimension mismatch"));
    }

    #[test]
    fn test_single_record_yields_empty_output() {
        let out = engine(5, false)
            .rank(vec![emb(1, vec![1.0, 0.0])], &CancelFlag::new())
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(out.dimension, Some(2));
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let out = engine(1, false)
            .rank(
                vec![emb(1, vec![0.0, 0.0]), emb(2, vec![1.0, 0.0])],
                &CancelFlag::new(),
            )
            .unwrap();
        assert_eq!(out.neighbors(1).unwrap()[0].score, 0.0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let records = vec![emb(1, vec![1.0]), emb(2, vec![2.0])];
        for parallel in [false, true] {
            let result = engine(1, parallel).rank(records.clone(), &cancel);
            assert!(matches!(result, Err(RankingError::Cancelled)));
        }
    }

    #[test]
    fn test_per_source_selection_matches_mirrored_pass() {
        let records: Vec<PaperEmbedding> = (0..12)
            .map(|i| {
                let x = i as f32;
                emb(i + 1, vec![x.sin(), (x * 0.7).cos(), 0.3 * x - 1.0])
            })
            .collect();
        let norms: Vec<f64> = records.iter().map(|r| norm(&r.vector)).collect();
        let e = engine(4, false);
        let mirrored = e
            .select_sequential(&records, &norms, &CancelFlag::new())
            .unwrap();

        let key = |top: TopK| -> Vec<(i64, u64)> {
            top.into_sorted()
                .into_iter()
                .map(|c| (c.target_id, c.score.to_bits()))
                .collect()
        };
        for (i, top) in mirrored.into_iter().enumerate() {
            let own = score_source(&records, &norms, i, 4);
            assert!(own.len() <= 4);
            assert_eq!(key(own), key(top));
        }
    }

    #[test]
    fn test_neighbors_lookup_missing_source() {
        let out = engine(1, false)
            .rank(
                vec![emb(1, vec![1.0, 0.0]), emb(2, vec![0.0, 1.0])],
                &CancelFlag::new(),
            )
            .unwrap();
        assert!(out.neighbors(3).is_none());
        assert_eq!(out.neighbors(2).unwrap()[0].target_id, 1);
        assert_eq!(out.neighbors(2).unwrap()[0].target_title, "paper 1");
    }
}
