//! Dispatch table for inbound WebSocket messages.
//!
//! Each channel accepts a different, tiny command vocabulary. Anything that
//! does not parse or arrives out of context is logged and dropped; the
//! connection stays open and the sender gets no reply.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::broadcast_router::RouterHandle;
use super::state_store::StateStore;

/// What a connection is allowed to send, and where it goes.
pub enum Inbound {
    Admin { big_screen: RouterHandle },
    BigScreen,
    Voter { store: Arc<StateStore>, voter_id: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
enum AdminAction {
    /// Out-of-band presentation cue, forwarded untouched.
    BigScreenBroadcast { message: Value },
}

/// Dispatch one text frame received on a channel.
pub async fn dispatch(inbound: &Inbound, text: &str) {
    match inbound {
        Inbound::Admin { big_screen } => dispatch_admin(big_screen, text),
        Inbound::Voter { store, voter_id } => dispatch_vote(store, voter_id, text).await,
        Inbound::BigScreen => log::warn!("Unexpected message on big-screen channel"),
    }
}

// ============================================================================
// Admin
// ============================================================================

fn dispatch_admin(big_screen: &RouterHandle, text: &str) {
    match serde_json::from_str::<AdminAction>(text) {
        Ok(AdminAction::BigScreenBroadcast { message }) => {
            log::debug!(
                "Relaying admin message to {} big-screen client(s)",
                big_screen.connection_count()
            );
            big_screen.relay(&message);
        }
        Err(e) => log::warn!("Invalid admin WS message: {}", e),
    }
}

// ============================================================================
// Voter
// ============================================================================

async fn dispatch_vote(store: &StateStore, voter_id: &str, text: &str) {
    let Some(choice) = parse_vote_command(text) else {
        log::warn!("Unexpected voter message: {:?}", truncate(text));
        return;
    };
    match store.cast_vote(voter_id, choice).await {
        Some(tally) => log::debug!("Ballot from {} for {} -> {:?}", voter_id, choice, tally),
        None => log::debug!("Ballot from {} for {} ignored", voter_id, choice),
    }
}

/// Parse `v:<n>` or `vote index=<n>` into a choice index.
///
/// Only the syntax is checked here; the range and the vote's stage are
/// checked by the tally.
pub fn parse_vote_command(text: &str) -> Option<usize> {
    let text = text.trim();
    let digits = text
        .strip_prefix("v:")
        .or_else(|| text.strip_prefix("vote index="))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(64) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
