//! Bounded Top-K selection.
//!
//! A size-K min-heap per source keeps the K best candidates seen so far.
//! "Best" is a total order: higher score first, then lower target id, so
//! the retained set does not depend on the order candidates arrive in.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A directed candidate entry for one source.
#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    pub score: f64,
    pub target_id: i64,
    /// Position of the target in the ranked record set.
    pub index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Greater means ranked higher.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.target_id.cmp(&self.target_id))
    }
}

/// Retains the `k` highest-ranked candidates offered to it.
#[derive(Clone, Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<Candidate>>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Offer a candidate, evicting the current minimum if it ranks lower.
    pub fn offer(&mut self, candidate: Candidate) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
            return;
        }
        if let Some(Reverse(worst)) = self.heap.peek() {
            if candidate > *worst {
                self.heap.pop();
                self.heap.push(Reverse(candidate));
            }
        }
    }

    /// Retained candidates, best first.
    pub fn into_sorted(self) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = self.heap.into_iter().map(|Reverse(c)| c).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(score: f64, target_id: i64) -> Candidate {
        Candidate {
            score,
            target_id,
            index: target_id as usize,
        }
    }

    fn ids(top: TopK) -> Vec<i64> {
        top.into_sorted().iter().map(|c| c.target_id).collect()
    }

    #[test]
    fn test_keeps_highest_scores() {
        let mut top = TopK::new(2);
        for (s, id) in [(0.1, 1), (0.9, 2), (0.5, 3), (-1.0, 4), (0.7, 5)] {
            top.offer(c(s, id));
        }
        assert_eq!(ids(top), vec![2, 5]);
    }

    #[test]
    fn test_ties_prefer_lower_target_id() {
        let mut top = TopK::new(2);
        for id in [9, 4, 7, 1] {
            top.offer(c(0.5, id));
        }
        assert_eq!(ids(top), vec![1, 4]);
    }

    #[test]
    fn test_order_of_arrival_does_not_matter() {
        let entries = [(0.3, 10), (0.3, 2), (0.8, 5), (0.1, 1), (0.8, 3)];
        let mut forward = TopK::new(3);
        let mut backward = TopK::new(3);
        for e in entries {
            forward.offer(c(e.0, e.1));
        }
        for e in entries.iter().rev() {
            backward.offer(c(e.0, e.1));
        }
        assert_eq!(ids(forward), vec![3, 5, 2]);
        assert_eq!(ids(backward), vec![3, 5, 2]);
    }

    #[test]
    fn test_zero_capacity_retains_nothing() {
        let mut top = TopK::new(0);
        top.offer(c(1.0, 1));
        assert!(top.is_empty());
    }
}
