//! Decision tracker: detects when the host resets one of our submissions.
//!
//! DESIGN
//! ======
//! The tracker keeps a snapshot `phase_key → decision_id` of the local
//! team's submissions, rebuilt whole from every successful fetch. Any phase
//! whose old decision id is missing from the new snapshot is a confirmed
//! deletion. Confirmed deletions are coalesced by the engine's debounce
//! slot into a single `reset_counter` increment.
//!
//! Delete events never bump the counter on their own. An event for our
//! team always requests a refresh; when it names a decision we never saw,
//! its phase is held as an unverified claim and is only confirmed if the
//! refreshed snapshot shows that phase still has no decision.
//!
//! Deletes naming another team are ignored: one team's reset never leaks
//! into another team's client.

use std::collections::{BTreeSet, HashMap, HashSet};

use uuid::Uuid;

use crate::model::TeamDecision;

/// `phase_key → decision_id` for the local team.
pub type DecisionSnapshot = HashMap<String, Uuid>;

/// Result of folding one fetch into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRefresh {
    pub current: DecisionSnapshot,
    /// Sorted, deduplicated phases whose decision disappeared.
    pub deleted_phase_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteReaction {
    /// Not ours; nothing to do.
    Ignore,
    /// Re-fetch the snapshot before deciding anything.
    Refresh,
}

#[derive(Debug)]
pub struct DecisionTracker {
    team_id: Uuid,
    snapshot: DecisionSnapshot,
    seen: HashSet<Uuid>,
    unverified_claims: BTreeSet<String>,
    reset_pending: bool,
    reset_counter: u64,
}

impl DecisionTracker {
    #[must_use]
    pub fn new(team_id: Uuid) -> Self {
        Self {
            team_id,
            snapshot: DecisionSnapshot::new(),
            seen: HashSet::new(),
            unverified_claims: BTreeSet::new(),
            reset_pending: false,
            reset_counter: 0,
        }
    }

    /// Replace the snapshot with a fresh fetch and report confirmed
    /// deletions. When a phase has several rows, the latest submission wins.
    pub fn apply_fetch(&mut self, decisions: &[TeamDecision]) -> SnapshotRefresh {
        let mut latest: HashMap<&str, &TeamDecision> = HashMap::new();
        for decision in decisions.iter().filter(|d| d.team_id == self.team_id) {
            latest
                .entry(decision.phase_key.as_str())
                .and_modify(|kept| {
                    if decision.submitted_at > kept.submitted_at {
                        *kept = decision;
                    }
                })
                .or_insert(decision);
        }

        let next: DecisionSnapshot = latest
            .into_iter()
            .map(|(phase_key, decision)| (phase_key.to_owned(), decision.id))
            .collect();
        let next_ids: HashSet<Uuid> = next.values().copied().collect();

        let mut deleted: BTreeSet<String> = self
            .snapshot
            .iter()
            .filter(|(_, id)| !next_ids.contains(id))
            .map(|(phase_key, _)| phase_key.clone())
            .collect();

        for claim in std::mem::take(&mut self.unverified_claims) {
            if !next.contains_key(&claim) && !self.snapshot.contains_key(&claim) {
                deleted.insert(claim);
            }
        }

        self.seen.extend(next_ids);
        self.snapshot.clone_from(&next);

        SnapshotRefresh { current: next, deleted_phase_keys: deleted.into_iter().collect() }
    }

    /// React to a `decision_deleted` notification.
    pub fn on_delete_event(&mut self, decision_id: Uuid, team_id: Uuid, phase_key: &str) -> DeleteReaction {
        if team_id != self.team_id {
            return DeleteReaction::Ignore;
        }
        if !self.seen.contains(&decision_id) {
            self.unverified_claims.insert(phase_key.to_owned());
        }
        DeleteReaction::Refresh
    }

    /// Record that at least one deletion was confirmed in the current
    /// debounce window.
    pub fn note_deletions(&mut self) {
        self.reset_pending = true;
    }

    /// Close the debounce window. Increments the counter once if any
    /// deletion was noted; returns the counter.
    pub fn commit_reset(&mut self) -> u64 {
        if std::mem::take(&mut self.reset_pending) {
            self.reset_counter += 1;
        }
        self.reset_counter
    }

    #[must_use]
    pub fn reset_counter(&self) -> u64 {
        self.reset_counter
    }

    /// Sorted phase keys the team currently has a decision for.
    #[must_use]
    pub fn submitted_phase_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.snapshot.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
#[path = "decision_test.rs"]
mod tests;
