//! Per-audience views of the show state.
//!
//! A [`Channel`] is the parameter set of one broadcast router: which fields
//! the audience may see, how each one is projected, and which fields are
//! coalesced rather than pushed immediately.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use super::show_state::{Field, FieldSet, ShowState, VoteItem, VoteStage};

/// Minimum spacing between pushes of throttled fields (the live tally).
pub const TALLY_THROTTLE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Admin,
    BigScreen,
    Voter,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelKind::Admin => "admin",
            ChannelKind::BigScreen => "big-screen",
            ChannelKind::Voter => "voter",
        })
    }
}

type Projection = fn(&ShowState, Field) -> Value;

#[derive(Clone)]
pub struct Channel {
    pub kind: ChannelKind,
    /// Fields this audience can see at all.
    pub interest: FieldSet,
    /// Fields whose lone changes are coalesced into one push per window.
    pub throttled: FieldSet,
    pub throttle_window: Duration,
    project: Projection,
}

impl Channel {
    /// The operator console: every field, verbatim.
    pub fn admin() -> Self {
        Self {
            kind: ChannelKind::Admin,
            interest: FieldSet::all(),
            throttled: FieldSet::only(Field::VoteTally),
            throttle_window: TALLY_THROTTLE_WINDOW,
            project: field_value,
        }
    }

    /// The crowd-facing display: everything except a vote still in staging.
    pub fn big_screen() -> Self {
        Self {
            kind: ChannelKind::BigScreen,
            interest: FieldSet::all(),
            throttled: FieldSet::only(Field::VoteTally),
            throttle_window: TALLY_THROTTLE_WINDOW,
            project: big_screen_value,
        }
    }

    /// Individual voters: the two choices of a vote that is open for voting.
    pub fn voter() -> Self {
        Self {
            kind: ChannelKind::Voter,
            interest: FieldSet::only(Field::ActiveVote),
            throttled: FieldSet::EMPTY,
            throttle_window: TALLY_THROTTLE_WINDOW,
            project: voter_value,
        }
    }

    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }

    /// Visible value of `field`. Callers must only ask for fields of interest.
    pub fn project_field(&self, state: &ShowState, field: Field) -> Value {
        (self.project)(state, field)
    }

    /// Every visible field, as sent on connect.
    pub fn full_projection(&self, state: &ShowState) -> Map<String, Value> {
        self.project_fields(state, self.interest)
    }

    pub fn project_fields(&self, state: &ShowState, fields: FieldSet) -> Map<String, Value> {
        fields
            .intersection(self.interest)
            .iter()
            .map(|field| (field.key().to_string(), self.project_field(state, field)))
            .collect()
    }

    /// Fields whose visible value may move when `changed` do. The tally's
    /// visibility follows the vote's stage.
    pub fn affected(&self, changed: FieldSet) -> FieldSet {
        let mut fields = changed;
        if changed.contains(Field::ActiveVote) {
            fields.insert(Field::VoteTally);
        }
        fields.intersection(self.interest)
    }

    /// The subset of `fields` whose visible value differs between states.
    pub fn diff(&self, previous: &ShowState, next: &ShowState, fields: FieldSet) -> Map<String, Value> {
        fields
            .intersection(self.interest)
            .iter()
            .filter_map(|field| {
                let before = self.project_field(previous, field);
                let after = self.project_field(next, field);
                (before != after).then(|| (field.key().to_string(), after))
            })
            .collect()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind)
            .field("interest", &self.interest)
            .field("throttled", &self.throttled)
            .field("throttle_window", &self.throttle_window)
            .finish()
    }
}

fn field_value(state: &ShowState, field: Field) -> Value {
    let value = match field {
        Field::Competitors => serde_json::to_value(&state.competitors),
        Field::Entries => serde_json::to_value(&state.entries),
        Field::Bracket => serde_json::to_value(&state.bracket),
        Field::ActiveVote => serde_json::to_value(&state.active_vote),
        Field::VoteTally => serde_json::to_value(state.vote_tally),
        Field::BracketHighlight => serde_json::to_value(&state.bracket_highlight),
        Field::PresentationMode => serde_json::to_value(state.presentation_mode),
        Field::EmbeddedFrameUrl => serde_json::to_value(&state.embedded_frame_url),
    };
    value.unwrap_or_default()
}

fn is_staging(state: &ShowState) -> bool {
    matches!(&state.active_vote, Some(v) if v.state == VoteStage::Staging)
}

fn big_screen_value(state: &ShowState, field: Field) -> Value {
    match field {
        Field::ActiveVote | Field::VoteTally if is_staging(state) => Value::Null,
        _ => field_value(state, field),
    }
}

#[derive(Serialize)]
struct OpenBallot<'a> {
    id: &'a str,
    items: &'a [VoteItem; 2],
}

fn voter_value(state: &ShowState, field: Field) -> Value {
    match (field, &state.active_vote) {
        (Field::ActiveVote, Some(vote)) if vote.state == VoteStage::Voting => {
            serde_json::to_value(OpenBallot {
                id: &vote.id,
                items: &vote.items,
            })
            .unwrap_or_default()
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::show_state::ActiveVote;
    use serde_json::json;

    fn with_vote(stage: VoteStage) -> ShowState {
        let item = VoteItem {
            label: "Rust".into(),
            competitor_id: "c1".into(),
            color_index: 2,
        };
        ShowState {
            active_vote: Some(ActiveVote {
                id: "v1".into(),
                state: stage,
                items: [item.clone(), item],
            }),
            vote_tally: Some([4, 2]),
            ..ShowState::default()
        }
    }

    #[test]
    fn voter_sees_only_open_ballot() {
        let voter = Channel::voter();
        for stage in [VoteStage::Staging, VoteStage::Introducing, VoteStage::Results] {
            let view = voter.full_projection(&with_vote(stage));
            assert_eq!(Value::Object(view), json!({ "activeVote": null }));
        }

        let view = voter.full_projection(&with_vote(VoteStage::Voting));
        assert_eq!(view.len(), 1);
        let vote = &view["activeVote"];
        assert_eq!(vote["id"], "v1");
        assert_eq!(vote["items"][0]["label"], "Rust");
        assert!(vote.get("state").is_none());
    }

    #[test]
    fn big_screen_hides_staged_vote_and_its_tally() {
        let screen = Channel::big_screen();
        let staged = screen.full_projection(&with_vote(VoteStage::Staging));
        assert_eq!(staged["activeVote"], Value::Null);
        assert_eq!(staged["voteTally"], Value::Null);

        let introducing = screen.full_projection(&with_vote(VoteStage::Introducing));
        assert_eq!(introducing["activeVote"]["state"], "introducing");
        assert_eq!(introducing["voteTally"], json!([4, 2]));
    }

    #[test]
    fn admin_sees_everything() {
        let view = Channel::admin().full_projection(&with_vote(VoteStage::Staging));
        assert_eq!(view.len(), Field::ALL.len());
        assert_eq!(view["activeVote"]["state"], "staging");
    }

    #[test]
    fn diff_skips_invisible_changes() {
        let voter = Channel::voter();
        let staged = with_vote(VoteStage::Staging);
        let introducing = with_vote(VoteStage::Introducing);
        let voting = with_vote(VoteStage::Voting);

        assert!(voter.diff(&staged, &introducing, FieldSet::all()).is_empty());
        let diff = voter.diff(&introducing, &voting, FieldSet::all());
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec!["activeVote"]);
    }
}
