//! Reports produced by the merge engine.

use std::fmt;

use serde::Serialize;

use crate::store::{DuplicateGroup, EntityCounts};

/// A duplicate group that could not be merged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of a merge run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub groups_found: usize,
    pub groups_merged: usize,
    pub groups_failed: Vec<GroupFailure>,
    pub associations_moved: u64,
    pub associations_discarded: u64,
    pub entities_deleted: u64,
    /// Names still held by more than one entity after the run.
    pub residual_duplicates: usize,
}

impl MergeReport {
    /// True when every group merged and no duplicate names remain.
    pub fn is_clean(&self) -> bool {
        self.groups_failed.is_empty() && self.residual_duplicates == 0
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Duplicate groups:        {}", self.groups_found)?;
        writeln!(f, "Groups merged:           {}", self.groups_merged)?;
        writeln!(f, "Groups failed:           {}", self.groups_failed.len())?;
        writeln!(f, "Associations moved:      {}", self.associations_moved)?;
        writeln!(f, "Associations discarded:  {}", self.associations_discarded)?;
        writeln!(f, "Entities deleted:        {}", self.entities_deleted)?;
        write!(f, "Residual duplicates:     {}", self.residual_duplicates)?;
        for failure in &self.groups_failed {
            write!(f, "\n  failed '{}': {}", failure.name, failure.error)?;
        }
        Ok(())
    }
}

/// Read-only view of the current duplication level.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DuplicateReport {
    pub counts: EntityCounts,
    pub group_count: usize,
    /// Largest groups first, at most the configured sample size.
    pub sample: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    /// Share of entities that are redundant copies of another name, in percent.
    pub fn duplicate_pct(&self) -> f64 {
        if self.counts.total == 0 {
            0.0
        } else {
            (self.counts.total - self.counts.distinct_names) as f64 / self.counts.total as f64
                * 100.0
        }
    }
}

impl fmt::Display for DuplicateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Entities:             {}", self.counts.total)?;
        writeln!(f, "Distinct names:       {}", self.counts.distinct_names)?;
        writeln!(f, "Distinct external ids: {}", self.counts.distinct_external_ids)?;
        writeln!(f, "Without external id:  {}", self.counts.without_external_id)?;
        writeln!(f, "Duplicate rate:       {:.1}%", self.duplicate_pct())?;
        write!(f, "Duplicate groups:     {}", self.group_count)?;
        for group in &self.sample {
            let external: Vec<&str> = group
                .external_ids
                .iter()
                .map(|e| e.as_deref().unwrap_or("-"))
                .collect();
            write!(
                f,
                "\n  {} x{}  ids={:?}  external={:?}",
                group.name,
                group.ids.len(),
                group.ids,
                external
            )?;
        }
        Ok(())
    }
}
