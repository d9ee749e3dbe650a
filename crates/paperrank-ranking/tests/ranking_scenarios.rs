//! End-to-end ranking properties over the public API.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use paperrank_core::cancel::CancelFlag;
use paperrank_core::types::PaperEmbedding;
use paperrank_ranking::writer::TIMESTAMP_COLUMN;
use paperrank_ranking::{
    ColumnSink, MemorySink, RankedResultWriter, RankingEngine, RankingOptions, RowLayout,
    SqliteColumnStore,
};
use paperrank_storage::Database;

fn emb(id: i64, vector: Vec<f32>) -> PaperEmbedding {
    PaperEmbedding {
        id,
        title: format!("Paper {}", id),
        vector,
        model_tag: "all-mpnet-base-v2".into(),
        generated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

/// Deterministic pseudo-random vectors with some exact duplicates so ties
/// occur.
fn corpus(n: i64, dim: usize) -> Vec<PaperEmbedding> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    (1..=n)
        .map(|id| {
            if id % 7 == 0 {
                return emb(id, vec![1.0; dim]);
            }
            let v = (0..dim)
                .map(|_| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    ((state >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
                })
                .collect();
            emb(id, v)
        })
        .collect()
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
fn two_dimensional_example() {
    let records = vec![
        emb(1, vec![1.0, 0.0]),
        emb(2, vec![0.0, 1.0]),
        emb(3, vec![1.0, 1.0]),
        emb(4, vec![-1.0, 0.0]),
    ];
    let out = engine(2, false).rank(records, &CancelFlag::new()).unwrap();
    let list = out.neighbors(1).unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].rank, 1);
    assert_eq!(list[0].target_id, 3);
    assert!((list[0].score - 0.7071).abs() < 1e-4);
    assert_eq!(list[1].rank, 2);
    assert_eq!(list[1].target_id, 2);
    assert_eq!(list[1].score, 0.0);
    assert!(list.iter().all(|n| n.target_id != 4));
}

#[test]
fn list_length_is_min_of_k_and_n_minus_one() {
    for (n, k) in [(2, 30), (5, 3), (5, 4), (12, 30), (40, 10)] {
        let out = engine(k, true).rank(corpus(n, 8), &CancelFlag::new()).unwrap();
        assert_eq!(out.sources.len(), n as usize);
        for source in &out.sources {
            assert_eq!(source.neighbors.len(), k.min(n as usize - 1));
            assert!(source.neighbors.iter().all(|nb| nb.target_id != source.source_id));
        }
    }
}

#[test]
fn scores_non_increasing_with_id_tie_break() {
    let out = engine(10, false).rank(corpus(60, 4), &CancelFlag::new()).unwrap();
    for source in &out.sources {
        for pair in source.neighbors.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                assert!(pair[0].target_id < pair[1].target_id);
            }
        }
        for (i, nb) in source.neighbors.iter().enumerate() {
            assert_eq!(nb.rank, i + 1);
        }
    }
}

#[test]
fn mirrored_scores_are_bitwise_equal() {
    let out = engine(59, false).rank(corpus(60, 16), &CancelFlag::new()).unwrap();
    for source in &out.sources {
        for nb in &source.neighbors {
            let back = out
                .neighbors(nb.target_id)
                .unwrap()
                .iter()
                .find(|m| m.target_id == source.source_id)
                .expect("full lists contain every other record");
            assert_eq!(back.score.to_bits(), nb.score.to_bits());
        }
    }
}

#[test]
fn parallel_matches_sequential() {
    let records = corpus(150, 12);
    let seq = engine(7, false).rank(records.clone(), &CancelFlag::new()).unwrap();
    let par = engine(7, true).rank(records, &CancelFlag::new()).unwrap();
    assert_eq!(seq.sources, par.sources);
}

#[test]
fn malformed_records_do_not_abort_the_batch() {
    let mut records = corpus(10, 3);
    records.push(emb(11, vec![1.0, 2.0]));
    records.push(emb(12, vec![f32::INFINITY, 0.0, 0.0]));

    let out = engine(3, true).rank(records, &CancelFlag::new()).unwrap();
    assert_eq!(out.sources.len(), 10);
    let rejected: Vec<i64> = out.rejected.iter().map(|r| r.id).collect();
    assert_eq!(rejected, vec![11, 12]);
    assert!(out.neighbors(11).is_none());
}

fn without_timestamp(sink: &dyn ColumnSink, table: &str, key: &str) -> Vec<(String, String)> {
    sink.get_row(table, key)
        .unwrap()
        .unwrap()
        .cells
        .into_iter()
        .filter(|(c, _)| c != TIMESTAMP_COLUMN)
        .collect()
}

#[test]
fn rewriting_identical_input_yields_identical_rows() {
    let db = Arc::new(Database::in_memory().unwrap());
    let sinks: Vec<Box<dyn ColumnSink>> = vec![
        Box::new(MemorySink::new()) as Box<dyn ColumnSink>,
        Box::new(SqliteColumnStore::new(db)),
    ];
    let layout = RowLayout::default();

    for sink in &sinks {
        let writer = RankedResultWriter::new(sink.as_ref(), layout.clone());
        let out = engine(5, true).rank(corpus(20, 6), &CancelFlag::new()).unwrap();

        let first = writer
            .write_all(&out, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), &CancelFlag::new())
            .unwrap();
        let before: Vec<_> = (1..=20)
            .map(|id| without_timestamp(sink.as_ref(), &layout.table, &layout.row_key(id)))
            .collect();

        let again = engine(5, true).rank(corpus(20, 6), &CancelFlag::new()).unwrap();
        let second = writer
            .write_all(&again, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(), &CancelFlag::new())
            .unwrap();
        let after: Vec<_> = (1..=20)
            .map(|id| without_timestamp(sink.as_ref(), &layout.table, &layout.row_key(id)))
            .collect();

        assert!(first.table_created);
        assert!(!second.table_created);
        assert_eq!(first.written, 20);
        assert_eq!(second.written, 20);
        assert_eq!(before, after);

        let stamped = sink
            .get_row(&layout.table, &layout.row_key(1))
            .unwrap()
            .unwrap();
        assert!(stamped.get(TIMESTAMP_COLUMN).unwrap().starts_with("2024-03-02"));
    }
}
