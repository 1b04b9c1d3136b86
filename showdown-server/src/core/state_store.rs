//! The single writer of the show state.
//!
//! Every mutation runs under one async mutex, which is the mutation queue:
//! commits are fully serialized and each publishes exactly one
//! [`StateChange`] before the lock is released. Readers only ever see
//! immutable `Arc<ShowState>` snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use super::bracket;
use super::error::{PatchError, StoreError};
use super::event_bus::{ChangeBus, StateChange};
use super::patch::{self, PatchOperation};
use super::persistence::Persistence;
use super::show_state::{
    ActiveVote, BracketNode, Competitor, Entry, FieldSet, PresentationMode, ShowState, Tally,
    TreePath,
};
use super::vote_tally::VoteTally;

/// Top-level fields to merge into the state. `None` leaves a field as is;
/// for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub competitors: Option<BTreeMap<String, Competitor>>,
    pub entries: Option<BTreeMap<String, Entry>>,
    pub bracket: Option<Option<BracketNode>>,
    pub active_vote: Option<Option<ActiveVote>>,
    pub vote_tally: Option<Option<Tally>>,
    pub bracket_highlight: Option<Option<Vec<TreePath>>>,
    pub presentation_mode: Option<PresentationMode>,
    pub embedded_frame_url: Option<String>,
}

impl StateUpdate {
    fn merge_into(self, state: &mut ShowState) {
        if let Some(v) = self.competitors {
            state.competitors = v;
        }
        if let Some(v) = self.entries {
            state.entries = v;
        }
        if let Some(v) = self.bracket {
            state.bracket = v;
        }
        if let Some(v) = self.active_vote {
            state.active_vote = v;
        }
        if let Some(v) = self.vote_tally {
            state.vote_tally = v;
        }
        if let Some(v) = self.bracket_highlight {
            state.bracket_highlight = v;
        }
        if let Some(v) = self.presentation_mode {
            state.presentation_mode = v;
        }
        if let Some(v) = self.embedded_frame_url {
            state.embedded_frame_url = v;
        }
    }
}

struct StoreInner {
    state: Arc<ShowState>,
    tally: VoteTally,
}

pub struct StateStore {
    inner: Mutex<StoreInner>,
    bus: Arc<ChangeBus>,
    persistence: Option<Persistence>,
}

impl StateStore {
    pub fn new(initial: ShowState, bus: Arc<ChangeBus>, persistence: Option<Persistence>) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                state: Arc::new(initial),
                tally: VoteTally::new(),
            }),
            bus,
            persistence,
        }
    }

    pub async fn snapshot(&self) -> Arc<ShowState> {
        self.inner.lock().await.state.clone()
    }

    /// Subscribe to the change bus together with the snapshot the first
    /// received change will follow, so no commit falls in between.
    pub async fn subscribe(&self) -> (Arc<ShowState>, broadcast::Receiver<StateChange>) {
        let inner = self.inner.lock().await;
        (inner.state.clone(), self.bus.subscribe())
    }

    /// Apply `ops` in order as one commit. On any failure nothing changes.
    pub async fn apply_patches(&self, ops: &[PatchOperation]) -> Result<FieldSet, StoreError> {
        let mut inner = self.inner.lock().await;

        let tree = serde_json::to_value(&*inner.state).map_err(PatchError::Schema)?;
        let patched = patch::apply(&tree, ops)?;
        let next: ShowState = serde_json::from_value(patched).map_err(PatchError::Schema)?;
        validate(&next, Some(&*inner.state))?;

        Ok(self.commit(&mut inner, next))
    }

    /// Replace the bracket with a fresh one of `slots` leaves and clear
    /// every entry's competitor assignment and the highlight.
    pub async fn regenerate_bracket(&self, slots: usize) -> Result<FieldSet, StoreError> {
        let tree = bracket::generate(slots)?;

        let mut inner = self.inner.lock().await;
        let mut next = (*inner.state).clone();
        next.bracket = Some(tree);
        next.bracket_highlight = None;
        for entry in next.entries.values_mut() {
            entry.competitor_id.clear();
        }
        Ok(self.commit(&mut inner, next))
    }

    /// Merge `update` into the state as one commit.
    pub async fn set_fields(&self, update: StateUpdate) -> FieldSet {
        let mut inner = self.inner.lock().await;
        let mut next = (*inner.state).clone();
        update.merge_into(&mut next);
        self.commit(&mut inner, next)
    }

    /// Swap in a whole new state, subject to the same invariants as a patch.
    pub async fn replace_state(&self, state: ShowState) -> Result<FieldSet, StoreError> {
        validate(&state, None)?;
        let mut inner = self.inner.lock().await;
        Ok(self.commit(&mut inner, state))
    }

    /// Record a voter's ballot for the active vote.
    ///
    /// Returns the new tally, or `None` when the ballot was ignored (no vote
    /// in the voting stage, bad index, or an unchanged choice).
    pub async fn cast_vote(&self, voter_id: &str, choice: usize) -> Option<Tally> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let tally = inner.tally.cast(&inner.state, voter_id, choice)?;
        let mut next = (*inner.state).clone();
        StateUpdate {
            vote_tally: Some(Some(tally)),
            ..StateUpdate::default()
        }
        .merge_into(&mut next);
        self.commit(inner, next);
        Some(tally)
    }

    /// Install `next`, persist durable fields and publish the change.
    ///
    /// A mutation that changes nothing is not a commit: nothing is published.
    fn commit(&self, inner: &mut StoreInner, mut next: ShowState) -> FieldSet {
        let previous = inner.state.clone();

        inner.tally.reconcile(&previous, &mut next);
        if previous.presentation_mode == PresentationMode::Bracket
            && next.presentation_mode != PresentationMode::Bracket
        {
            next.bracket_highlight = None;
        }
        prune_highlight(&mut next);

        let changed = FieldSet::changed_between(&previous, &next);
        if changed.is_empty() {
            return changed;
        }

        let next = Arc::new(next);
        inner.state = next.clone();

        if !changed.intersection(FieldSet::durable()).is_empty() {
            if let Some(persistence) = &self.persistence {
                persistence.save(&next);
            }
        }

        log::debug!("Committed state change {:?}", changed);
        self.bus.publish(StateChange {
            previous,
            next,
            changed,
        });
        changed
    }
}

/// Drop highlight paths that no longer address a node of the bracket.
fn prune_highlight(state: &mut ShowState) {
    let Some(paths) = state.bracket_highlight.as_mut() else {
        return;
    };
    let before = paths.len();
    paths.retain(|path| {
        state
            .bracket
            .as_ref()
            .is_some_and(|root| root.at_path(path).is_some())
    });
    if paths.len() != before {
        log::debug!("Dropped {} stale highlight path(s)", before - paths.len());
    }
    if paths.is_empty() {
        state.bracket_highlight = None;
    }
}

/// Bracket invariants that the schema alone cannot express.
///
/// Highlight paths are only checked when `previous` had a different
/// highlight; otherwise stale paths are pruned at commit.
fn validate(state: &ShowState, previous: Option<&ShowState>) -> Result<(), PatchError> {
    if let Some(root) = &state.bracket {
        validate_node(root, state)?;
    }
    if previous.is_some_and(|prev| prev.bracket_highlight == state.bracket_highlight) {
        return Ok(());
    }
    for path in state.bracket_highlight.iter().flatten() {
        let found = state.bracket.as_ref().and_then(|root| root.at_path(path));
        if found.is_none() {
            return Err(PatchError::Invariant(format!(
                "highlight path {:?} does not address a bracket node",
                path
            )));
        }
    }
    Ok(())
}

fn validate_node(node: &BracketNode, state: &ShowState) -> Result<(), PatchError> {
    let BracketNode::Match(m) = node else {
        return Ok(());
    };
    match m.winning_index {
        -1 => {}
        0 | 1 => {
            let winner = m.winner().and_then(BracketNode::resolve);
            match winner {
                Some(id) if state.entries.contains_key(id) => {}
                _ => {
                    return Err(PatchError::Invariant(format!(
                        "winningIndex {} does not point at a resolved entry",
                        m.winning_index
                    )))
                }
            }
        }
        other => {
            return Err(PatchError::Invariant(format!(
                "winningIndex must be -1, 0 or 1, got {}",
                other
            )))
        }
    }
    validate_node(&m.items[0], state)?;
    validate_node(&m.items[1], state)
}
