//! Participant list reconciliation
//!
//! Diffs consecutive participant lists by `user_id`. Removal of the local
//! viewer is never announced by the server; it is inferred here from the
//! viewer's id disappearing after it was once confirmed present.

use crate::types::Participant;
use std::collections::HashSet;

/// Outcome of comparing two participant lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// In `next` but not in `previous`
    pub joined: Vec<Participant>,
    /// In `previous` but not in `next`
    pub removed: Vec<Participant>,
    /// The local non-host viewer was confirmed present before and is gone now
    pub self_removed: bool,
}

/// Pure join/removal diff keyed by `user_id`
pub fn diff_participants(
    previous: &[Participant],
    next: &[Participant],
) -> (Vec<Participant>, Vec<Participant>) {
    let prev_ids: HashSet<&str> = previous.iter().map(|p| p.user_id.as_str()).collect();
    let next_ids: HashSet<&str> = next.iter().map(|p| p.user_id.as_str()).collect();

    let joined = next
        .iter()
        .filter(|p| !prev_ids.contains(p.user_id.as_str()))
        .cloned()
        .collect();
    let removed = previous
        .iter()
        .filter(|p| !next_ids.contains(p.user_id.as_str()))
        .cloned()
        .collect();

    (joined, removed)
}

/// Stateful reconciler for one viewer.
///
/// Remembers whether the viewer has ever appeared in a snapshot, so that an
/// early empty or partial list is not mistaken for a kick.
#[derive(Debug, Clone)]
pub struct ParticipantReconciler {
    local_user_id: String,
    confirmed_present: bool,
}

impl ParticipantReconciler {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            confirmed_present: false,
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Whether the viewer has appeared in any snapshot so far
    pub fn confirmed_present(&self) -> bool {
        self.confirmed_present
    }

    pub fn reconcile(
        &mut self,
        previous: &[Participant],
        next: &[Participant],
        is_host: bool,
    ) -> Reconciliation {
        let (joined, removed) = diff_participants(previous, next);

        let present_now = next.iter().any(|p| p.user_id == self.local_user_id);
        let self_removed = !is_host && self.confirmed_present && !present_now;
        if present_now {
            self.confirmed_present = true;
        }

        Reconciliation {
            joined,
            removed,
            self_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantStatus;

    fn p(user: &str) -> Participant {
        Participant {
            id: format!("p-{user}"),
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
            avatar_ref: None,
            status: ParticipantStatus::Joined,
        }
    }

    fn ids(list: &[Participant]) -> Vec<&str> {
        list.iter().map(|p| p.user_id.as_str()).collect()
    }

    #[test]
    fn test_diff_joins_and_removals() {
        let prev = vec![p("a"), p("b"), p("c")];
        let next = vec![p("b"), p("c"), p("d")];
        let (joined, removed) = diff_participants(&prev, &next);
        assert_eq!(ids(&joined), vec!["d"]);
        assert_eq!(ids(&removed), vec!["a"]);
    }

    #[test]
    fn test_diff_partitions_without_overlap() {
        let lists = [
            vec![],
            vec![p("a")],
            vec![p("a"), p("b")],
            vec![p("b"), p("c"), p("d")],
            vec![p("e")],
        ];
        for prev in &lists {
            for next in &lists {
                let (joined, removed) = diff_participants(prev, next);
                let joined: HashSet<_> = ids(&joined).into_iter().collect();
                let removed: HashSet<_> = ids(&removed).into_iter().collect();
                let prev_ids: HashSet<_> = ids(prev).into_iter().collect();
                let next_ids: HashSet<_> = ids(next).into_iter().collect();
                let unchanged: HashSet<_> = prev_ids.intersection(&next_ids).copied().collect();

                assert!(joined.is_disjoint(&removed));
                assert!(joined.is_disjoint(&unchanged));
                assert!(removed.is_disjoint(&unchanged));
                let rebuilt_next: HashSet<_> = joined.union(&unchanged).copied().collect();
                let rebuilt_prev: HashSet<_> = removed.union(&unchanged).copied().collect();
                assert_eq!(rebuilt_next, next_ids);
                assert_eq!(rebuilt_prev, prev_ids);
            }
        }
    }

    #[test]
    fn test_status_change_is_not_a_join() {
        let prev = vec![p("a")];
        let mut ready = p("a");
        ready.status = ParticipantStatus::Ready;
        let (joined, removed) = diff_participants(&prev, &[ready]);
        assert!(joined.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn test_first_empty_snapshot_is_not_a_kick() {
        let mut rec = ParticipantReconciler::new("b");
        let out = rec.reconcile(&[], &[], false);
        assert!(!out.self_removed);
        let out = rec.reconcile(&[], &[p("a")], false);
        assert!(!out.self_removed);
        assert!(!rec.confirmed_present());
    }

    #[test]
    fn test_self_removed_after_confirmed_presence() {
        let mut rec = ParticipantReconciler::new("b");
        rec.reconcile(&[], &[p("a"), p("b")], false);
        assert!(rec.confirmed_present());

        let out = rec.reconcile(&[p("a"), p("b")], &[p("a")], false);
        assert!(out.self_removed);
        assert_eq!(ids(&out.removed), vec!["b"]);
    }

    #[test]
    fn test_host_never_self_removed() {
        let mut rec = ParticipantReconciler::new("host");
        rec.reconcile(&[], &[p("host"), p("a")], true);
        let out = rec.reconcile(&[p("host"), p("a")], &[p("a")], true);
        assert!(!out.self_removed);
    }

    #[test]
    fn test_self_removed_iff_confirmed_and_absent() {
        for confirmed in [false, true] {
            for present_next in [false, true] {
                for is_host in [false, true] {
                    let mut rec = ParticipantReconciler::new("me");
                    if confirmed {
                        rec.reconcile(&[], &[p("me")], is_host);
                    }
                    let next = if present_next { vec![p("me")] } else { vec![p("x")] };
                    let out = rec.reconcile(&[], &next, is_host);
                    assert_eq!(out.self_removed, confirmed && !present_next && !is_host);
                }
            }
        }
    }
}
