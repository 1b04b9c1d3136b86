//! Balanced single-elimination bracket generation.

use std::collections::VecDeque;

use super::error::BracketError;
use super::show_state::{BracketMatch, BracketNode};

/// Smallest bracket worth generating: two first-round matches.
pub const MIN_BRACKET_SLOTS: usize = 4;

/// Largest bracket the engine will build.
pub const MAX_BRACKET_SLOTS: usize = 1024;

/// Build a bracket with exactly `slots` unresolved leaf slots.
///
/// Starts from a root match with two empty slots and expands leaves into
/// matches breadth-first, left to right, until there are `slots` leaves.
/// Earlier rounds therefore fill up first.
pub fn generate(slots: usize) -> Result<BracketNode, BracketError> {
    if !(MIN_BRACKET_SLOTS..=MAX_BRACKET_SLOTS).contains(&slots) {
        return Err(BracketError::InvalidBracketSize(slots));
    }

    let mut root = BracketNode::undecided_match();
    let mut remaining = slots - 2;
    // Paths of matches whose children are still plain slots, in BFS order.
    let mut frontier: VecDeque<Vec<u8>> = VecDeque::from([Vec::new()]);

    'expand: while let Some(path) = frontier.pop_front() {
        for child in 0..2u8 {
            if remaining == 0 {
                break 'expand;
            }
            let Some(BracketNode::Match(parent)) = node_at_mut(&mut root, &path) else {
                break 'expand;
            };
            parent.items[usize::from(child)] = BracketNode::undecided_match();
            remaining -= 1;

            let mut child_path = path.clone();
            child_path.push(child);
            frontier.push_back(child_path);
        }
    }

    Ok(root)
}

fn node_at_mut<'a>(node: &'a mut BracketNode, path: &[u8]) -> Option<&'a mut BracketNode> {
    let Some((&first, rest)) = path.split_first() else {
        return Some(node);
    };
    match node {
        BracketNode::Match(BracketMatch { items, .. }) => {
            node_at_mut(items.get_mut(usize::from(first))?, rest)
        }
        BracketNode::Leaf(_) => None,
    }
}
