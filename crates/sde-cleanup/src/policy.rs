//! Retention policy
//!
//! Given identifiers sorted oldest-first, the surplus is the prefix of length
//! `len - desired_count`. The desired count is applied verbatim: `0` retires
//! every managed database. This is operator-declared policy and deliberately
//! has no safety floor.

use crate::version::{sort_by_version, DatabaseIdentifier};

/// Split of a snapshot into what is dropped and what is kept
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Oldest identifiers beyond the retention count, oldest first
    pub to_drop: Vec<DatabaseIdentifier>,
    /// Newest `desired_count` identifiers, oldest first
    pub retained: Vec<DatabaseIdentifier>,
}

/// Select the identifiers to delete from a version-sorted list.
///
/// `sorted` must be ascending by [`crate::version::compare`]. Returns the
/// first `max(0, len - desired_count)` elements. A negative count (rejected by
/// the CRD schema) selects the whole list rather than panicking.
pub fn select_for_deletion(
    sorted: &[DatabaseIdentifier],
    desired_count: i64,
) -> &[DatabaseIdentifier] {
    let len = i64::try_from(sorted.len()).unwrap_or(i64::MAX);
    let surplus = len.saturating_sub(desired_count);
    if surplus <= 0 {
        return &[];
    }
    let surplus = usize::try_from(surplus).unwrap_or(usize::MAX).min(sorted.len());
    &sorted[..surplus]
}

/// Sort a discovered snapshot by version and split it by retention count.
pub fn plan_retention(mut live: Vec<DatabaseIdentifier>, desired_count: i64) -> RetentionPlan {
    sort_by_version(&mut live);
    let surplus = select_for_deletion(&live, desired_count).len();
    let retained = live.split_off(surplus);
    RetentionPlan {
        to_drop: live,
        retained,
    }
}
