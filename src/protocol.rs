//! Sub-world wire protocol.
//!
//! This module owns **every message that crosses the connection** between a
//! presence client and the world server.
//!
//! ## Message namespaces
//!
//! | Namespace  | Direction          | Delivery              |
//! |------------|--------------------|-----------------------|
//! | `server/*` | server → client    | fire-and-forget msg   |
//! | `client/*` | client → server    | fire-and-forget msg   |
//! | *(bare)*   | client → server    | request / response    |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with snake_case JSON.
//! 2. Inbound messages decode into the closed [`ServerMessage`] enum; the
//!    dispatcher matches it exhaustively, so adding a kind is a compile error
//!    until it is handled.
//! 3. Unknown message names are not errors at the connection level: the
//!    caller logs and drops them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{AnimationState, ParticipantInfo, Pose, Quat, Vec3};

// ---------------------------------------------------------------------------
// Participant state  (server/UserStates entries, client/UserState)
// ---------------------------------------------------------------------------

/// Pose + animation of one participant at one instant.
///
/// Sent by every client each reporting interval and echoed back by the server
/// inside [`BatchedState`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ParticipantState {
    #[serde(default)]
    pub animation: AnimationState,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Quat,
}

impl ParticipantState {
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }
}

// ---------------------------------------------------------------------------
// Inbound messages  (server/*)
// ---------------------------------------------------------------------------

/// A chat line relayed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    pub speaker_id: String,
    pub speaker_name: String,
    pub text: String,
}

/// Latest known state for a set of participants, keyed by participant id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchedState {
    pub entries: BTreeMap<String, ParticipantState>,
}

/// A participant entered the sub-world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserJoin {
    pub participant: ParticipantInfo,
}

/// A participant left the sub-world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserExit {
    pub participant_id: String,
}

// ---------------------------------------------------------------------------
// Requests  (client → server, request/response)
// ---------------------------------------------------------------------------

/// Authenticate into a sub-world.  Reply: [`JoinSubWorldResponse`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinSubWorld {
    pub token: String,
    pub local_id: String,
    /// Milliseconds since the Unix epoch at which `token` was issued.
    pub timestamp: u64,
    pub sub_world_id: String,
}

/// Initial world state returned by a successful join.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldState {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub participants: Vec<ParticipantInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinSubWorldResponse {
    pub current_user: ParticipantInfo,
    pub world_state: WorldState,
}

/// Post a chat line.  Reply: [`SendChatAck`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendChat {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendChatAck {}

// ---------------------------------------------------------------------------
// Closed inbound message set
// ---------------------------------------------------------------------------

/// Every inbound message kind the dispatcher understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Chat(Chat),
    BatchedState(BatchedState),
    UserJoin(UserJoin),
    UserExit(UserExit),
}

/// Failure to turn a named inbound payload into a [`ServerMessage`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown message name '{0}'")]
    UnknownMessage(String),

    #[error("malformed '{name}' payload: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ServerMessage {
    /// Decode a payload received under message `name`.
    pub fn decode(name: &str, payload: serde_json::Value) -> Result<Self, DecodeError> {
        let malformed = |source| DecodeError::Malformed {
            name: name.to_string(),
            source,
        };

        match name {
            names::CHAT => serde_json::from_value(payload)
                .map(ServerMessage::Chat)
                .map_err(malformed),
            names::BATCHED_STATE => serde_json::from_value(payload)
                .map(ServerMessage::BatchedState)
                .map_err(malformed),
            names::USER_JOIN => serde_json::from_value(payload)
                .map(ServerMessage::UserJoin)
                .map_err(malformed),
            names::USER_EXIT => serde_json::from_value(payload)
                .map(ServerMessage::UserExit)
                .map_err(malformed),
            other => Err(DecodeError::UnknownMessage(other.to_string())),
        }
    }

    /// Wire name this message travels under.
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::Chat(_) => names::CHAT,
            ServerMessage::BatchedState(_) => names::BATCHED_STATE,
            ServerMessage::UserJoin(_) => names::USER_JOIN,
            ServerMessage::UserExit(_) => names::USER_EXIT,
        }
    }

    /// Serialise the payload half (used by test servers and fixtures).
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            ServerMessage::Chat(m) => serde_json::to_value(m),
            ServerMessage::BatchedState(m) => serde_json::to_value(m),
            ServerMessage::UserJoin(m) => serde_json::to_value(m),
            ServerMessage::UserExit(m) => serde_json::to_value(m),
        }
    }
}

// ---------------------------------------------------------------------------
// Message names
// ---------------------------------------------------------------------------

/// All message names used by the sub-world protocol, as constants.
pub mod names {
    pub const CHAT: &str = "server/Chat";
    pub const BATCHED_STATE: &str = "server/UserStates";
    pub const USER_JOIN: &str = "server/UserJoin";
    pub const USER_EXIT: &str = "server/UserExit";

    pub const USER_STATE: &str = "client/UserState";

    pub const JOIN_SUB_WORLD: &str = "JoinSubWorld";
    pub const SEND_CHAT: &str = "SendChat";

    /// Inbound names the dispatcher handles.
    pub const INBOUND: [&str; 4] = [CHAT, BATCHED_STATE, USER_JOIN, USER_EXIT];
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
