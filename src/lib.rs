mod ai;
mod bitboard;
mod board;
pub mod bus;
mod common;
mod config;
pub mod delta;
mod error;
pub mod gateway;
pub mod identity;
mod logging;
pub mod protocol;
pub mod registry;
mod roster;
pub mod rules;
pub mod session;
mod ship;
pub mod store;
pub mod transport;

pub use ai::*;
pub use bitboard::{BitBoard, BitBoardError};
pub use board::*;
pub use bus::{BroadcastBus, BusError, EventBus, Subscription, SubscriptionError};
pub use common::*;
pub use config::*;
pub use delta::{Delta, Event};
pub use error::*;
pub use gateway::Gateway;
pub use identity::{IdentityResolver, TrustingResolver};
pub use logging::{init_logging, LOG_ENV};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use registry::{SessionInfo, SessionRegistry};
pub use roster::*;
pub use rules::{Action, FinishReason, GameSummary, Phase, RulesEngine, TurnState};
pub use session::{Accepted, Mutation, Persistence, SessionHandle, SessionSnapshot, SessionState};
pub use ship::*;
pub use store::{MemorySessionStore, SessionStore, StoredSnapshot};
pub use transport::in_memory::InMemoryTransport;
pub use transport::tcp::TcpTransport;
pub use transport::Transport;
