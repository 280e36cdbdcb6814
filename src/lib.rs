//! World Presence Client
//!
//! Client-side half of a shared-world presence protocol: keeps a session
//! with a world server, reports the local participant on a fixed cadence,
//! and turns the server's batched updates about everyone else into smooth
//! locally-rendered motion.
//!
//! ## Architecture
//!
//! ```text
//! Session  (session.rs)                ← lifecycle, failure policy, tasks
//!   ├── Transport  (transport/)        ← connect / call / send / inbound
//!   ├── reporter   (reporter.rs)       ← client/UserState every 100 ms
//!   └── SessionState  (state.rs)       ← single serialized timeline
//!         ├── dispatch     (dispatch.rs)  ← Chat / UserStates / Join / Exit
//!         ├── WorldStateMirror (mirror.rs)
//!         ├── Reconciler   (reconcile.rs) ← lerp + slerp over 100 ms
//!         ├── ChatLog      (chat.rs)      ← last 7 entries
//!         └── Presentation (presentation.rs) → host rendering
//! ```
//!
//! The local participant is self-authoritative: the first batched-state entry
//! naming it places it at the server's spawn pose, and later echoes are never
//! applied.

// Protocol and state types are always available (no client feature needed).
pub mod chat;
mod dispatch;
pub mod error;
pub mod events;
pub mod mirror;
pub mod presentation;
pub mod protocol;
pub mod reconcile;
pub mod settings;
pub mod state;
pub mod types;

// Runtime modules require the `client` feature.
#[cfg(feature = "client")]
pub mod reporter;
#[cfg(feature = "client")]
pub mod session;
#[cfg(feature = "client")]
pub mod transport;

pub use chat::{BoundedLog, ChatEntry, ChatLog, CHAT_LOG_CAPACITY};
pub use error::{ConnectError, JoinError, SendChatError, SessionError};
pub use events::SessionEvent;
pub use mirror::{LocalParticipant, RemoteParticipant, WorldStateMirror};
pub use presentation::{ChannelPresentation, EventStream, NoPresentation, Presentation};
pub use protocol::ServerMessage;
pub use reconcile::{Reconciler, DEFAULT_RECONCILE_DURATION};
pub use settings::{ClientSettings, SessionConfig};
pub use state::SessionState;
pub use types::{
    AnimationState, DisconnectReason, ParticipantInfo, Pose, Quat, SessionStatus, Vec3,
};

// Convenience re-exports (client only)
#[cfg(feature = "client")]
pub use session::Session;
#[cfg(feature = "client")]
pub use transport::{TcpTransport, TcpTransportConfig, Transport, TransportError};
