//! Pending-migration planning. Run this before touching the store.
//!
//! Rules enforced:
//! 1. A migration is pending when its version has no record.
//! 2. Pending migrations keep the set's ascending version order.
//! 3. No pending migration may sort below the highest applied version;
//!    that would mean the recorded history has a gap.

use std::collections::HashSet;

use store::MigrationRecord;

use crate::{Migration, MigrationError, MigrationSet};

/// Return the migrations from `set` that have not been applied yet.
///
/// # Errors
/// [`MigrationError::OutOfOrder`] if a pending version is lower than the
/// highest applied version.
pub fn pending_migrations<'a>(
    set: &'a MigrationSet,
    applied: &[MigrationRecord],
) -> Result<Vec<&'a Migration>, MigrationError> {
    let applied_versions: HashSet<i64> = applied.iter().map(|r| r.version).collect();
    let highest_applied = applied_versions.iter().copied().max();

    let pending: Vec<&Migration> = set
        .iter()
        .filter(|m| !applied_versions.contains(&m.version))
        .collect();

    if let (Some(first), Some(highest)) = (pending.first(), highest_applied) {
        if first.version < highest {
            return Err(MigrationError::OutOfOrder {
                version: first.version,
                name: first.name.clone(),
                highest_applied: highest,
            });
        }
    }

    Ok(pending)
}

/// Applied versions that `set` does not contain.
pub(crate) fn unknown_versions(set: &MigrationSet, applied: &[MigrationRecord]) -> Vec<i64> {
    let known: HashSet<i64> = set.iter().map(|m| m.version).collect();
    let mut unknown: Vec<i64> = applied
        .iter()
        .map(|r| r.version)
        .filter(|v| !known.contains(v))
        .collect();
    unknown.sort_unstable();
    unknown
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn set(versions: &[i64]) -> MigrationSet {
        MigrationSet::new(
            versions
                .iter()
                .map(|v| Migration::new(*v, format!("m{v}"), "SELECT 1"))
                .collect(),
        )
        .expect("valid set")
    }

    fn records(versions: &[i64]) -> Vec<MigrationRecord> {
        versions
            .iter()
            .map(|v| MigrationRecord { version: *v, name: format!("m{v}"), applied_at: Utc::now() })
            .collect()
    }

    fn versions(pending: &[&Migration]) -> Vec<i64> {
        pending.iter().map(|m| m.version).collect()
    }

    #[test]
    fn everything_is_pending_on_empty_history() {
        let set = set(&[1, 2, 3]);
        let pending = pending_migrations(&set, &[]).expect("no history");
        assert_eq!(versions(&pending), vec![1, 2, 3]);
    }

    #[test]
    fn applied_prefix_is_skipped() {
        let set = set(&[1, 2, 3]);
        let pending = pending_migrations(&set, &records(&[1, 2])).expect("valid history");
        assert_eq!(versions(&pending), vec![3]);
    }

    #[test]
    fn fully_applied_set_has_nothing_pending() {
        let set = set(&[1, 2]);
        let pending = pending_migrations(&set, &records(&[2, 1])).expect("valid history");
        assert!(pending.is_empty());
    }

    #[test]
    fn gap_in_history_is_out_of_order() {
        // v2 was never applied but v3 was.
        let set = set(&[1, 2, 3]);
        let result = pending_migrations(&set, &records(&[1, 3]));
        assert!(matches!(
            result,
            Err(MigrationError::OutOfOrder { version: 2, highest_applied: 3, .. })
        ));
    }

    #[test]
    fn new_migration_older_than_history_is_out_of_order() {
        let set = set(&[5, 10, 15]);
        let result = pending_migrations(&set, &records(&[10, 15]));
        assert!(matches!(result, Err(MigrationError::OutOfOrder { version: 5, .. })));
    }

    #[test]
    fn unknown_applied_versions_are_listed() {
        let set = set(&[1, 2]);
        assert_eq!(unknown_versions(&set, &records(&[9, 1, 7])), vec![7, 9]);
    }
}
