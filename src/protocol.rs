use serde::{Deserialize, Serialize};

use crate::common::{PlayerId, SessionId};
use crate::config::RulesConfig;
use crate::delta::Delta;
use crate::error::RejectReason;
use crate::registry::SessionInfo;
use crate::rules::Action;
use crate::session::SessionSnapshot;

/// Current protocol version. Increment when making breaking changes to the
/// message format.
pub const PROTOCOL_VERSION: u32 = 2;

/// Messages exchanged between a client and the session gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // client -> server
    /// First frame of every connection.
    Hello { version: u32, token: String },
    CreateSession { name: String, config: RulesConfig },
    ListSessions,
    JoinSession { session_id: SessionId },
    /// Submit an action. `actor` must match the identity of the connection.
    Action {
        session_id: SessionId,
        actor: PlayerId,
        action: Action,
    },
    /// Fetch a fresh snapshot and (re)subscribe to the session.
    Resume { session_id: SessionId },
    /// Follow a session as a spectator.
    Watch { session_id: SessionId },
    /// Drop the current session subscription.
    Leave,
    Ping,

    // server -> client
    Welcome { version: u32, player: PlayerId },
    SessionCreated(SessionInfo),
    SessionList(Vec<SessionInfo>),
    Snapshot(SessionSnapshot),
    Delta(Delta),
    /// Sent to the submitting connection only.
    ActionRejected {
        session_id: Option<SessionId>,
        reason: RejectReason,
    },
    Error(String),
    Pong,
}
