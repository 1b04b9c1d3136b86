pub mod bracket;
pub mod broadcast_router;
pub mod channels;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod identity;
pub mod liveness;
pub mod patch;
pub mod persistence;
pub mod show_server;
pub mod show_state;
pub mod state_store;
pub mod vote_tally;
pub mod web_dispatch;

pub use broadcast_router::{BroadcastRouter, RouterHandle};
pub use channels::{Channel, ChannelKind};
pub use config::ServerConfig;
pub use error::{BracketError, ConfigError, PatchError, PersistError, ServerError, StoreError};
pub use event_bus::{ChangeBus, StateChange};
pub use liveness::LivenessMonitor;
pub use patch::PatchOperation;
pub use persistence::Persistence;
pub use show_server::AppState;
pub use show_state::{Field, FieldSet, ShowState};
pub use state_store::{StateStore, StateUpdate};
pub use vote_tally::VoteTally;
