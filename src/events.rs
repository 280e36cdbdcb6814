//! Semantic session events delivered to the presentation thread.
//!
//! These are **processed** events: the session has already applied the
//! network data to its own state before emitting them.  No serde or transport
//! types appear here.
//!
//! All coordinates are world-space metres.

use std::time::Duration;

use crate::types::{AnimationState, Pose};

/// A single semantic session event, safe to pass across the thread boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------
    ConnectFailed {
        message: String,
    },
    JoinFailed {
        message: String,
    },
    Joined {
        world_name: String,
    },
    /// The session ended.  Only `manual == false` warrants a notice.
    ConnectionLost {
        manual: bool,
    },
    RoomStatus {
        headcount: usize,
        latency: Option<Duration>,
    },

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------
    ParticipantCreated {
        id: String,
        display_name: String,
        visual_id: u32,
        pose: Pose,
        /// The camera should follow this one.
        is_local: bool,
    },
    ParticipantRemoved {
        id: String,
    },
    /// One reconciliation step for a remote participant.
    PoseUpdated {
        id: String,
        pose: Pose,
        animation: AnimationState,
    },

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------
    ChatBubble {
        participant_id: String,
        text: String,
    },
    ChatAppended {
        line: String,
    },
}
