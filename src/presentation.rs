//! Presentation hooks.
//!
//! The session never renders anything itself.  It reports what changed
//! through [`Presentation`], whose methods all default to no-ops so an
//! embedder implements only what it draws.
//!
//! ## Threading model
//!
//! ```text
//! Session tasks (Tokio)        │  Host / UI thread
//! ──────────────────────────── │ ─────────────────────────
//! dispatch / step / report     │
//!   → Presentation::*          │
//!     ChannelPresentation      │  EventStream::poll()
//!       → tx.send(event)       │    → rx.try_recv()
//! ```
//!
//! Hooks run under the session lock, so implementations must not block.
//! [`ChannelPresentation`] queues [`SessionEvent`]s on a `crossbeam_channel`
//! for a host thread that cannot be called into directly.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::time::Duration;

use crate::events::SessionEvent;
use crate::types::{AnimationState, ParticipantInfo, Pose};

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[allow(unused_variables)]
pub trait Presentation: Send + 'static {
    /// A participant became visible.  `is_local` marks the camera target.
    fn participant_created(&mut self, info: &ParticipantInfo, pose: &Pose, is_local: bool) {}

    fn participant_removed(&mut self, id: &str) {}

    /// Called once per reconciliation step.
    fn participant_pose_updated(&mut self, id: &str, pose: &Pose, animation: AnimationState) {}

    /// Transient speech bubble above a rendered remote participant.
    fn chat_bubble(&mut self, participant_id: &str, text: &str) {}

    fn chat_message_appended(&mut self, line: &str) {}

    fn room_status_changed(&mut self, headcount: usize, latency: Option<Duration>) {}

    fn world_joined(&mut self, world_name: &str) {}

    fn connection_lost(&mut self, manual: bool) {}

    fn join_failed(&mut self, message: &str) {}

    fn connect_failed(&mut self, message: &str) {}
}

/// Discards every hook call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPresentation;

impl Presentation for NoPresentation {}

// ---------------------------------------------------------------------------
// Channel-backed implementation
// ---------------------------------------------------------------------------

/// Forwards hook calls as [`SessionEvent`]s.  Never blocks: if the host has
/// gone away the events are dropped.
#[derive(Debug, Clone)]
pub struct ChannelPresentation {
    tx: Sender<SessionEvent>,
}

/// Host-side half of a [`ChannelPresentation`].
#[derive(Debug, Clone)]
pub struct EventStream {
    rx: Receiver<SessionEvent>,
}

impl ChannelPresentation {
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, EventStream { rx })
    }

    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("presentation receiver dropped; discarding event");
        }
    }
}

impl Presentation for ChannelPresentation {
    fn participant_created(&mut self, info: &ParticipantInfo, pose: &Pose, is_local: bool) {
        self.emit(SessionEvent::ParticipantCreated {
            id: info.id.clone(),
            display_name: info.name.clone(),
            visual_id: info.visual_id,
            pose: *pose,
            is_local,
        });
    }

    fn participant_removed(&mut self, id: &str) {
        self.emit(SessionEvent::ParticipantRemoved { id: id.into() });
    }

    fn participant_pose_updated(&mut self, id: &str, pose: &Pose, animation: AnimationState) {
        self.emit(SessionEvent::PoseUpdated {
            id: id.into(),
            pose: *pose,
            animation,
        });
    }

    fn chat_bubble(&mut self, participant_id: &str, text: &str) {
        self.emit(SessionEvent::ChatBubble {
            participant_id: participant_id.into(),
            text: text.into(),
        });
    }

    fn chat_message_appended(&mut self, line: &str) {
        self.emit(SessionEvent::ChatAppended { line: line.into() });
    }

    fn room_status_changed(&mut self, headcount: usize, latency: Option<Duration>) {
        self.emit(SessionEvent::RoomStatus { headcount, latency });
    }

    fn world_joined(&mut self, world_name: &str) {
        self.emit(SessionEvent::Joined {
            world_name: world_name.into(),
        });
    }

    fn connection_lost(&mut self, manual: bool) {
        self.emit(SessionEvent::ConnectionLost { manual });
    }

    fn join_failed(&mut self, message: &str) {
        self.emit(SessionEvent::JoinFailed {
            message: message.into(),
        });
    }

    fn connect_failed(&mut self, message: &str) {
        self.emit(SessionEvent::ConnectFailed {
            message: message.into(),
        });
    }
}

impl EventStream {
    /// Drain all pending events without blocking.
    pub fn poll(&self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Block up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.rx.recv_timeout(timeout).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_presentation_preserves_order() {
        let (mut p, events) = ChannelPresentation::new();
        p.world_joined("Room A");
        p.chat_message_appended("Bob: hi");
        p.connection_lost(false);

        assert_eq!(
            events.poll(),
            vec![
                SessionEvent::Joined {
                    world_name: "Room A".into()
                },
                SessionEvent::ChatAppended {
                    line: "Bob: hi".into()
                },
                SessionEvent::ConnectionLost { manual: false },
            ]
        );
        assert!(events.poll().is_empty());
    }

    #[test]
    fn emitting_after_host_dropped_does_not_panic() {
        let (mut p, events) = ChannelPresentation::new();
        drop(events);
        p.participant_removed("u2");
    }

    #[test]
    fn participant_created_carries_metadata() {
        let (mut p, events) = ChannelPresentation::new();
        let info = ParticipantInfo::new("u2", "Bob", 42);
        p.participant_created(&info, &Pose::default(), false);
        match &events.poll()[..] {
            [SessionEvent::ParticipantCreated {
                id,
                display_name,
                visual_id,
                is_local,
                ..
            }] => {
                assert_eq!(id, "u2");
                assert_eq!(display_name, "Bob");
                assert_eq!(*visual_id, 42);
                assert!(!is_local);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
