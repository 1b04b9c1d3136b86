//! Fan-out of state changes to one audience's open connections.
//!
//! One router task runs per [`Channel`]. It consumes the change bus, turns
//! each committed change into the (possibly empty) partial projection that
//! audience is allowed to see, applies the channel's throttle policy and
//! queues the result on every connection. Connects and relays are routed
//! through the same task so that a new connection always receives its full
//! snapshot before any incremental update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use super::channels::{Channel, ChannelKind};
use super::event_bus::StateChange;
use super::show_state::{FieldSet, ShowState};

/// Per-connection outbound queue depth. A peer that falls this far behind
/// is dropped and will resync on reconnect.
const OUTBOUND_QUEUE: usize = 256;

pub type ConnectionId = u64;

/// Frames queued for a connection's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
}

/// The router-side end of one open connection.
///
/// Dropping it also fires the kill signal, so a connection removed from the
/// table for any reason is torn down without draining its queue.
pub struct Connection {
    tx: mpsc::Sender<Outbound>,
    alive: Arc<AtomicBool>,
    kill: Option<oneshot::Sender<()>>,
}

impl Connection {
    /// Queue a frame. Returns false when the connection should be dropped.
    pub fn send(&self, frame: Outbound) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Dropping connection with a full outbound queue");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Clear the liveness flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Tear the socket down now, ahead of any queued frames.
    pub fn terminate(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Liveness flag shared between a socket reader and the monitor.
#[derive(Clone)]
pub struct Heartbeat(Arc<AtomicBool>);

impl Heartbeat {
    /// Record that the peer answered a ping or sent anything at all.
    pub fn beat(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// The socket-side end of one open connection.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub outbound: mpsc::Receiver<Outbound>,
    pub heartbeat: Heartbeat,
    /// Resolves when the router or the liveness monitor drops the connection.
    pub terminated: oneshot::Receiver<()>,
}

impl ConnectionHandle {
    pub fn mark_alive(&self) {
        self.heartbeat.beat();
    }
}

enum RouterCommand {
    Connect(oneshot::Sender<ConnectionHandle>),
    Disconnect(ConnectionId),
    Relay(String),
}

/// Cloneable handle to a running router.
#[derive(Clone)]
pub struct RouterHandle {
    kind: ChannelKind,
    commands: mpsc::UnboundedSender<RouterCommand>,
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl RouterHandle {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Open a connection. Its queue starts with the full visible projection.
    pub async fn connect(&self) -> Option<ConnectionHandle> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(RouterCommand::Connect(reply)).ok()?;
        rx.await.ok()
    }

    pub fn disconnect(&self, id: ConnectionId) {
        let _ = self.commands.send(RouterCommand::Disconnect(id));
    }

    /// Forward an opaque message verbatim to every open connection.
    pub fn relay(&self, message: &Value) {
        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = self.commands.send(RouterCommand::Relay(text));
            }
            Err(e) => log::warn!("Cannot relay message to {}: {}", self.kind, e),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn connections(&self) -> &DashMap<ConnectionId, Connection> {
        &self.connections
    }
}

#[derive(Serialize)]
struct Push<'a> {
    state: &'a Map<String, Value>,
}

pub struct BroadcastRouter {
    channel: Channel,
    current: Arc<ShowState>,
    connections: Arc<DashMap<ConnectionId, Connection>>,
    /// Throttled fields waiting for the window to close.
    pending: Option<(Instant, FieldSet)>,
    lagged: bool,
    next_id: ConnectionId,
}

impl BroadcastRouter {
    /// Start a router task. `initial` must be the snapshot `changes` follows.
    pub fn spawn(
        channel: Channel,
        initial: Arc<ShowState>,
        changes: broadcast::Receiver<StateChange>,
    ) -> RouterHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(DashMap::new());
        let handle = RouterHandle {
            kind: channel.kind,
            commands: commands_tx,
            connections: connections.clone(),
        };

        let router = Self {
            channel,
            current: initial,
            connections,
            pending: None,
            lagged: false,
            next_id: 1,
        };
        tokio::spawn(router.run(changes, commands_rx));
        handle
    }

    async fn run(
        mut self,
        mut changes: broadcast::Receiver<StateChange>,
        mut commands: mpsc::UnboundedReceiver<RouterCommand>,
    ) {
        loop {
            let deadline = self.pending.map(|(at, _)| at);
            tokio::select! {
                received = changes.recv() => match received {
                    Ok(change) => self.on_change(change),
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("{} router lagged, skipped {} changes", self.channel.kind, n);
                        self.lagged = true;
                    }
                    Err(RecvError::Closed) => break,
                },
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_pending();
                }
            }
        }
        log::debug!("{} router stopped", self.channel.kind);
    }

    fn on_change(&mut self, change: StateChange) {
        self.current = change.next.clone();

        if self.lagged {
            // Intermediate changes are gone; resend everything visible.
            self.lagged = false;
            self.pending = None;
            let full = self.channel.full_projection(&self.current);
            self.push(&full);
            return;
        }

        let relevant = change.changed.intersection(self.channel.interest);
        if relevant.is_empty() {
            return;
        }

        if relevant.is_subset(self.channel.throttled) {
            match &mut self.pending {
                Some((_, fields)) => {
                    for field in relevant.iter() {
                        fields.insert(field);
                    }
                }
                None => {
                    self.pending = Some((Instant::now() + self.channel.throttle_window, relevant));
                }
            }
            return;
        }

        let affected = self.channel.affected(relevant);
        let mut state = self.channel.diff(&change.previous, &change.next, affected);
        // An immediate push supersedes the pending throttled one.
        if let Some((_, fields)) = self.pending.take() {
            state.extend(self.channel.project_fields(&change.next, fields));
        }
        if !state.is_empty() {
            self.push(&state);
        }
    }

    fn flush_pending(&mut self) {
        if let Some((_, fields)) = self.pending.take() {
            let state = self.channel.project_fields(&self.current, fields);
            if !state.is_empty() {
                self.push(&state);
            }
        }
    }

    fn on_command(&mut self, command: RouterCommand) {
        match command {
            RouterCommand::Connect(reply) => {
                let id = self.next_id;
                self.next_id += 1;

                let (tx, outbound) = mpsc::channel(OUTBOUND_QUEUE);
                let alive = Arc::new(AtomicBool::new(true));
                let (kill, terminated) = oneshot::channel();
                let connection = Connection {
                    tx,
                    alive: alive.clone(),
                    kill: Some(kill),
                };

                let full = self.channel.full_projection(&self.current);
                let Some(text) = encode(&full) else {
                    return;
                };
                if !connection.send(Outbound::Text(text)) {
                    return;
                }

                let handle = ConnectionHandle {
                    id,
                    outbound,
                    heartbeat: Heartbeat(alive),
                    terminated,
                };
                if reply.send(handle).is_ok() {
                    self.connections.insert(id, connection);
                    log::info!(
                        "{} client connected (total: {})",
                        self.channel.kind,
                        self.connections.len()
                    );
                }
            }
            RouterCommand::Disconnect(id) => {
                if self.connections.remove(&id).is_some() {
                    log::info!(
                        "{} client disconnected (total: {})",
                        self.channel.kind,
                        self.connections.len()
                    );
                }
            }
            RouterCommand::Relay(text) => {
                self.connections
                    .retain(|_, conn| conn.send(Outbound::Text(text.clone())));
            }
        }
    }

    fn push(&self, state: &Map<String, Value>) {
        let Some(text) = encode(state) else {
            return;
        };
        log::debug!(
            "{} push of {} field(s) to {} client(s)",
            self.channel.kind,
            state.len(),
            self.connections.len()
        );
        self.connections
            .retain(|_, conn| conn.send(Outbound::Text(text.clone())));
    }
}

fn encode(state: &Map<String, Value>) -> Option<String> {
    match serde_json::to_string(&Push { state }) {
        Ok(text) => Some(text),
        Err(e) => {
            log::error!("Failed to encode state push: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::ChangeBus;
    use crate::core::show_state::{ActiveVote, Field, VoteItem, VoteStage};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        bus: ChangeBus,
        current: Arc<ShowState>,
    }

    impl Harness {
        fn new(state: ShowState) -> Self {
            Self {
                bus: ChangeBus::new(),
                current: Arc::new(state),
            }
        }

        fn router(&self, channel: Channel) -> RouterHandle {
            BroadcastRouter::spawn(channel, self.current.clone(), self.bus.subscribe())
        }

        fn commit(&mut self, edit: impl FnOnce(&mut ShowState)) {
            let mut next = (*self.current).clone();
            edit(&mut next);
            let next = Arc::new(next);
            let changed = FieldSet::changed_between(&self.current, &next);
            self.bus.publish(StateChange {
                previous: self.current.clone(),
                next: next.clone(),
                changed,
            });
            self.current = next;
        }
    }

    fn vote(stage: VoteStage) -> ActiveVote {
        let item = VoteItem {
            label: "Option".into(),
            competitor_id: String::new(),
            color_index: 0,
        };
        ActiveVote {
            id: "v1".into(),
            state: stage,
            items: [item.clone(), item],
        }
    }

    /// Let the router task drain its inputs without reaching its deadline.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(conn: &mut ConnectionHandle) -> Vec<Value> {
        let mut pushes = Vec::new();
        while let Ok(frame) = conn.outbound.try_recv() {
            match frame {
                Outbound::Text(text) => pushes.push(serde_json::from_str(&text).unwrap()),
                other => panic!("unexpected frame {:?}", other),
            }
        }
        pushes
    }

    #[tokio::test(start_paused = true)]
    async fn connect_receives_full_projection_first() {
        let harness = Harness::new(ShowState::default());
        let admin = harness.router(Channel::admin());
        let voter = harness.router(Channel::voter());

        let mut conn = admin.connect().await.unwrap();
        let pushes = drain(&mut conn);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0]["state"].as_object().unwrap().len(), Field::ALL.len());

        let mut conn = voter.connect().await.unwrap();
        assert_eq!(drain(&mut conn), vec![json!({ "state": { "activeVote": null } })]);
        assert_eq!(voter.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_push_contains_only_changed_fields() {
        let mut harness = Harness::new(ShowState::default());
        let admin = harness.router(Channel::admin());
        let mut conn = admin.connect().await.unwrap();
        drain(&mut conn);

        harness.commit(|s| s.embedded_frame_url = "https://slides".into());
        settle().await;
        assert_eq!(
            drain(&mut conn),
            vec![json!({ "state": { "embeddedFrameURL": "https://slides" } })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tally_bursts_coalesce_to_one_trailing_push() {
        let mut harness = Harness::new(ShowState {
            active_vote: Some(vote(VoteStage::Voting)),
            vote_tally: Some([0, 0]),
            ..ShowState::default()
        });
        let screen = harness.router(Channel::big_screen());
        let mut conn = screen.connect().await.unwrap();
        drain(&mut conn);

        for n in 1..=10 {
            harness.commit(|s| s.vote_tally = Some([n, 0]));
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(drain(&mut conn).is_empty(), "pushed inside the window");
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(drain(&mut conn), vec![json!({ "state": { "voteTally": [10, 0] } })]);

        // The next burst opens a fresh window.
        harness.commit(|s| s.vote_tally = Some([10, 1]));
        settle().await;
        assert!(drain(&mut conn).is_empty());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(drain(&mut conn), vec![json!({ "state": { "voteTally": [10, 1] } })]);
    }

    #[tokio::test(start_paused = true)]
    async fn other_change_carries_pending_tally_immediately() {
        let mut harness = Harness::new(ShowState {
            active_vote: Some(vote(VoteStage::Voting)),
            vote_tally: Some([0, 0]),
            ..ShowState::default()
        });
        let admin = harness.router(Channel::admin());
        let mut conn = admin.connect().await.unwrap();
        drain(&mut conn);

        harness.commit(|s| s.vote_tally = Some([3, 1]));
        settle().await;
        assert!(drain(&mut conn).is_empty());

        harness.commit(|s| {
            if let Some(v) = s.active_vote.as_mut() {
                v.state = VoteStage::Results;
            }
        });
        settle().await;
        let pushes = drain(&mut conn);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0]["state"]["voteTally"], json!([3, 1]));
        assert_eq!(pushes[0]["state"]["activeVote"]["state"], "results");

        // Nothing trails behind the superseded window.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(drain(&mut conn).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn voter_sees_vote_only_once_voting_opens() {
        let mut harness = Harness::new(ShowState::default());
        let voter = harness.router(Channel::voter());
        let mut conn = voter.connect().await.unwrap();
        drain(&mut conn);

        harness.commit(|s| {
            s.active_vote = Some(vote(VoteStage::Staging));
            s.vote_tally = Some([0, 0]);
        });
        harness.commit(|s| {
            if let Some(v) = s.active_vote.as_mut() {
                v.state = VoteStage::Introducing;
            }
        });
        settle().await;
        assert!(drain(&mut conn).is_empty());

        harness.commit(|s| {
            if let Some(v) = s.active_vote.as_mut() {
                v.state = VoteStage::Voting;
            }
        });
        harness.commit(|s| s.vote_tally = Some([1, 0]));
        settle().await;
        let pushes = drain(&mut conn);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0]["state"]["activeVote"]["id"], "v1");
    }

    #[tokio::test(start_paused = true)]
    async fn big_screen_ignores_staging_changes() {
        let mut harness = Harness::new(ShowState::default());
        let screen = harness.router(Channel::big_screen());
        let mut conn = screen.connect().await.unwrap();
        drain(&mut conn);

        harness.commit(|s| {
            s.active_vote = Some(vote(VoteStage::Staging));
            s.vote_tally = Some([0, 0]);
        });
        settle().await;
        assert!(drain(&mut conn).is_empty());

        harness.commit(|s| {
            if let Some(v) = s.active_vote.as_mut() {
                v.state = VoteStage::Introducing;
            }
        });
        settle().await;
        let pushes = drain(&mut conn);
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0]["state"]["activeVote"]["state"], "introducing");
        assert_eq!(pushes[0]["state"]["voteTally"], json!([0, 0]));
    }

    #[tokio::test(start_paused = true)]
    async fn relay_is_forwarded_verbatim() {
        let harness = Harness::new(ShowState::default());
        let screen = harness.router(Channel::big_screen());
        let mut conn = screen.connect().await.unwrap();
        drain(&mut conn);

        screen.relay(&json!({ "iframe": { "action": "next-slide" } }));
        settle().await;
        assert_eq!(
            drain(&mut conn),
            vec![json!({ "iframe": { "action": "next-slide" } })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_removes_connection() {
        let mut harness = Harness::new(ShowState::default());
        let admin = harness.router(Channel::admin());
        let conn = admin.connect().await.unwrap();
        assert_eq!(admin.connection_count(), 1);

        admin.disconnect(conn.id);
        settle().await;
        assert_eq!(admin.connection_count(), 0);

        // Pushing with nobody connected is harmless.
        harness.commit(|s| s.embedded_frame_url = "x".into());
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_socket_is_pruned_on_next_push() {
        let mut harness = Harness::new(ShowState::default());
        let admin = harness.router(Channel::admin());
        let conn = admin.connect().await.unwrap();
        drop(conn);

        harness.commit(|s| s.embedded_frame_url = "x".into());
        settle().await;
        assert_eq!(admin.connection_count(), 0);
    }
}
