//! One-ballot-per-voter accounting for the active vote.
//!
//! The ballot table lives inside the store's mutation lock, so it is only
//! ever touched while a commit is being prepared.

use std::collections::HashMap;

use super::show_state::{ShowState, Tally, VoteStage};

/// Last choice per durable voter identity, for the current vote only.
#[derive(Debug, Default)]
pub struct VoteTally {
    ballots: HashMap<String, usize>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ballot_count(&self) -> usize {
        self.ballots.len()
    }

    pub fn clear(&mut self) {
        self.ballots.clear();
    }

    /// Record `voter_id`'s choice against `state` and return the new tally.
    ///
    /// Returns `None` (and records nothing) when there is no vote in the
    /// `voting` stage, when `choice` is not 0 or 1, or when the voter
    /// repeats their current choice.
    pub fn cast(&mut self, state: &ShowState, voter_id: &str, choice: usize) -> Option<Tally> {
        let vote = state.active_vote.as_ref()?;
        if vote.state != VoteStage::Voting || choice > 1 {
            return None;
        }

        let previous = self.ballots.get(voter_id).copied();
        if previous == Some(choice) {
            return None;
        }

        let mut tally = state.vote_tally.unwrap_or([0, 0]);
        if let Some(previous) = previous {
            tally[previous] = tally[previous].saturating_sub(1);
        }
        tally[choice] += 1;
        self.ballots.insert(voter_id.to_string(), choice);
        Some(tally)
    }

    /// Reset ballots and tally when the active vote's identity changes.
    ///
    /// A vote appearing, disappearing or being swapped for one with a new id
    /// clears every ballot; the tally restarts at `[0, 0]` if a vote is now
    /// active and becomes `None` otherwise.
    pub fn reconcile(&mut self, prev: &ShowState, next: &mut ShowState) {
        let prev_id = prev.active_vote.as_ref().map(|v| v.id.as_str());
        let next_id = next.active_vote.as_ref().map(|v| v.id.as_str());

        if prev_id != next_id {
            self.clear();
            next.vote_tally = next.active_vote.as_ref().map(|_| [0, 0]);
        } else if next.active_vote.is_none() {
            next.vote_tally = None;
        }
    }
}
