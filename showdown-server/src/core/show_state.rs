//! The show state document and its top-level field vocabulary.
//!
//! `ShowState` is the single canonical value owned by the `StateStore`.
//! Its serde shape is the wire shape: patches address it by these names and
//! every channel push is keyed by them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type Tally = [u32; 2];

/// Child-index route from the bracket root to a node, e.g. `[0, 1]`.
pub type TreePath = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub label: String,
    #[serde(rename = "slidesURL")]
    pub slides_url: String,
    /// Empty when no competitor is assigned.
    pub competitor_id: String,
    pub color_index: u32,
}

/// A bracket slot: either an entry id (empty = unresolved) or a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BracketNode {
    Leaf(String),
    Match(BracketMatch),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatch {
    pub items: Box<[BracketNode; 2]>,
    /// -1 while undecided, otherwise the index of the winning child.
    pub winning_index: i8,
}

impl BracketNode {
    pub fn unresolved() -> Self {
        BracketNode::Leaf(String::new())
    }

    pub fn undecided_match() -> Self {
        BracketNode::Match(BracketMatch {
            items: Box::new([BracketNode::unresolved(), BracketNode::unresolved()]),
            winning_index: -1,
        })
    }

    /// The entry id this slot currently stands for, if any.
    pub fn resolve(&self) -> Option<&str> {
        match self {
            BracketNode::Leaf(id) if id.is_empty() => None,
            BracketNode::Leaf(id) => Some(id),
            BracketNode::Match(m) => m.winner().and_then(BracketNode::resolve),
        }
    }

    pub fn at_path(&self, path: &[u8]) -> Option<&BracketNode> {
        let Some((&first, rest)) = path.split_first() else {
            return Some(self);
        };
        match self {
            BracketNode::Match(m) => m.items.get(usize::from(first))?.at_path(rest),
            BracketNode::Leaf(_) => None,
        }
    }

    /// Returns `(leaf slots, internal nodes)`.
    pub fn counts(&self) -> (usize, usize) {
        match self {
            BracketNode::Leaf(_) => (1, 0),
            BracketNode::Match(m) => {
                let (l0, i0) = m.items[0].counts();
                let (l1, i1) = m.items[1].counts();
                (l0 + l1, i0 + i1 + 1)
            }
        }
    }
}

impl BracketMatch {
    pub fn winner(&self) -> Option<&BracketNode> {
        match self.winning_index {
            0 => Some(&self.items[0]),
            1 => Some(&self.items[1]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteStage {
    Staging,
    Introducing,
    Voting,
    Results,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteItem {
    pub label: String,
    pub competitor_id: String,
    pub color_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveVote {
    pub id: String,
    pub state: VoteStage,
    pub items: [VoteItem; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresentationMode {
    #[default]
    Url,
    Bracket,
    CompetitorScores,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ShowState {
    pub competitors: BTreeMap<String, Competitor>,
    pub entries: BTreeMap<String, Entry>,
    pub bracket: Option<BracketNode>,
    pub active_vote: Option<ActiveVote>,
    pub vote_tally: Option<Tally>,
    pub bracket_highlight: Option<Vec<TreePath>>,
    pub presentation_mode: PresentationMode,
    #[serde(rename = "embeddedFrameURL")]
    pub embedded_frame_url: String,
}

/// A top-level field of [`ShowState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Competitors,
    Entries,
    Bracket,
    ActiveVote,
    VoteTally,
    BracketHighlight,
    PresentationMode,
    EmbeddedFrameUrl,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Competitors,
        Field::Entries,
        Field::Bracket,
        Field::ActiveVote,
        Field::VoteTally,
        Field::BracketHighlight,
        Field::PresentationMode,
        Field::EmbeddedFrameUrl,
    ];

    /// Wire name, identical to the serde key in `ShowState`.
    pub fn key(self) -> &'static str {
        match self {
            Field::Competitors => "competitors",
            Field::Entries => "entries",
            Field::Bracket => "bracket",
            Field::ActiveVote => "activeVote",
            Field::VoteTally => "voteTally",
            Field::BracketHighlight => "bracketHighlight",
            Field::PresentationMode => "presentationMode",
            Field::EmbeddedFrameUrl => "embeddedFrameURL",
        }
    }

    /// Durable fields are written to storage whenever they change.
    pub fn is_durable(self) -> bool {
        matches!(self, Field::Competitors | Field::Entries | Field::Bracket)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A small set of [`Field`]s.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSet(u16);

impl FieldSet {
    pub const EMPTY: FieldSet = FieldSet(0);

    pub fn all() -> Self {
        Field::ALL.into_iter().collect()
    }

    pub fn durable() -> Self {
        Field::ALL.into_iter().filter(|f| f.is_durable()).collect()
    }

    pub fn only(field: Field) -> Self {
        FieldSet(field.bit())
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub fn contains(self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersection(self, other: FieldSet) -> FieldSet {
        FieldSet(self.0 & other.0)
    }

    /// True when every field of `self` is also in `other`.
    pub fn is_subset(self, other: FieldSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(move |f| self.contains(*f))
    }

    /// One entry per top-level field whose value differs between the two states.
    pub fn changed_between(prev: &ShowState, next: &ShowState) -> FieldSet {
        let mut set = FieldSet::EMPTY;
        let mut mark = |changed: bool, field: Field| {
            if changed {
                set.insert(field);
            }
        };
        mark(prev.competitors != next.competitors, Field::Competitors);
        mark(prev.entries != next.entries, Field::Entries);
        mark(prev.bracket != next.bracket, Field::Bracket);
        mark(prev.active_vote != next.active_vote, Field::ActiveVote);
        mark(prev.vote_tally != next.vote_tally, Field::VoteTally);
        mark(prev.bracket_highlight != next.bracket_highlight, Field::BracketHighlight);
        mark(prev.presentation_mode != next.presentation_mode, Field::PresentationMode);
        mark(prev.embedded_frame_url != next.embedded_frame_url, Field::EmbeddedFrameUrl);
        set
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        let mut set = FieldSet::EMPTY;
        for field in iter {
            set.insert(field);
        }
        set
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
