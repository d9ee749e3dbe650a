//! Duplicate detection and merge driver.

use tracing::{error, info, warn};

use crate::error::MergeError;
use crate::report::{DuplicateReport, GroupFailure, MergeReport};
use crate::store::EntityStore;

/// Merges entities that share an identical name.
///
/// Name equality is the only identity signal; distinct people with the
/// same name are merged, and spelling variants are not.
pub struct MergeEngine<S> {
    store: S,
}

impl<S: EntityStore> MergeEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Merge every duplicate group, then re-scan for leftovers.
    ///
    /// Only listing the groups can fail the whole run; a failing group is
    /// recorded in the report and the remaining groups still run.
    pub fn run(&self) -> Result<MergeReport, MergeError> {
        let groups = self.store.duplicate_groups()?;
        info!(groups = groups.len(), "Duplicate groups found");

        let mut report = MergeReport {
            groups_found: groups.len(),
            ..Default::default()
        };

        for group in &groups {
            let Some(canonical) = group.canonical() else {
                report.groups_failed.push(GroupFailure {
                    name: group.name.clone(),
                    error: MergeError::EmptyGroup(group.name.clone()).to_string(),
                });
                continue;
            };

            match self.store.merge_group(canonical, group.losers()) {
                Ok(merged) => {
                    info!(
                        name = %group.name,
                        canonical,
                        losers = group.losers().len(),
                        moved = merged.moved,
                        discarded = merged.discarded,
                        "Merged duplicate group"
                    );
                    report.groups_merged += 1;
                    report.associations_moved += merged.moved;
                    report.associations_discarded += merged.discarded;
                    report.entities_deleted += merged.deleted;
                }
                Err(e) => {
                    warn!(name = %group.name, canonical, error = %e, "Group merge rolled back");
                    report.groups_failed.push(GroupFailure {
                        name: group.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.residual_duplicates = self.store.duplicate_groups()?.len();
        if report.residual_duplicates > 0 {
            error!(
                residual = report.residual_duplicates,
                "Duplicate names remain after merge"
            );
        } else {
            info!(
                merged = report.groups_merged,
                deleted = report.entities_deleted,
                "Merge complete, no duplicates remain"
            );
        }
        Ok(report)
    }

    /// Describe current duplication without changing anything.
    pub fn report(&self, sample_limit: usize) -> Result<DuplicateReport, MergeError> {
        let counts = self.store.counts()?;
        let mut groups = self.store.duplicate_groups()?;
        let group_count = groups.len();

        groups.sort_by(|a, b| b.ids.len().cmp(&a.ids.len()).then_with(|| a.name.cmp(&b.name)));
        groups.truncate(sample_limit);

        Ok(DuplicateReport {
            counts,
            group_count,
            sample: groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    use crate::store::{DuplicateGroup, EntityCounts, GroupMerge};
    use paperrank_core::error::PaperrankError;

    /// In-memory store whose merge fails for chosen canonical ids.
    struct FakeStore {
        groups: RefCell<Vec<DuplicateGroup>>,
        failing: HashSet<i64>,
    }

    impl FakeStore {
        fn new(groups: Vec<(&str, Vec<i64>)>, failing: &[i64]) -> Self {
            Self {
                groups: RefCell::new(
                    groups
                        .into_iter()
                        .map(|(name, ids)| DuplicateGroup {
                            name: name.to_string(),
                            external_ids: vec![None; ids.len()],
                            ids,
                        })
                        .collect(),
                ),
                failing: failing.iter().copied().collect(),
            }
        }
    }

    impl EntityStore for FakeStore {
        fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>, MergeError> {
            Ok(self.groups.borrow().clone())
        }

        fn merge_group(&self, canonical: i64, losers: &[i64]) -> Result<GroupMerge, MergeError> {
            if self.failing.contains(&canonical) {
                return Err(PaperrankError::Storage("database is locked".into()).into());
            }
            self.groups
                .borrow_mut()
                .retain(|g| g.canonical() != Some(canonical));
            Ok(GroupMerge {
                moved: losers.len() as u64,
                discarded: 0,
                deleted: losers.len() as u64,
            })
        }

        fn counts(&self) -> Result<EntityCounts, MergeError> {
            Ok(EntityCounts::default())
        }
    }

    #[test]
    fn test_failed_group_does_not_block_others() {
        let store = FakeStore::new(vec![("A", vec![1, 2]), ("B", vec![3, 4, 5]), ("C", vec![6, 7])], &[3]);
        let report = MergeEngine::new(store).run().unwrap();

        assert_eq!(report.groups_found, 3);
        assert_eq!(report.groups_merged, 2);
        assert_eq!(report.groups_failed.len(), 1);
        assert_eq!(report.groups_failed[0].name, "B");
        assert_eq!(report.entities_deleted, 2);
        assert_eq!(report.residual_duplicates, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_report_samples_largest_groups() {
        let store = FakeStore::new(vec![("A", vec![1, 2]), ("B", vec![3, 4, 5]), ("C", vec![6, 7])], &[]);
        let report = MergeEngine::new(store).report(2).unwrap();
        assert_eq!(report.group_count, 3);
        let names: Vec<&str> = report.sample.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_empty_group_is_reported() {
        let store = FakeStore::new(vec![("Ghost", vec![])], &[]);
        let report = MergeEngine::new(store).run().unwrap();
        assert_eq!(report.groups_failed.len(), 1);
    }
}
