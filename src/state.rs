//! Session state: the single serialized timeline every session task shares.
//!
//! Inbound dispatch, reporter sampling and reconciliation stepping all go
//! through `&mut SessionState`, so whoever owns it (the supervisor wraps it in
//! one mutex) decides the ordering.  Lifecycle transitions live here too, which
//! is what keeps "no tick after teardown" checkable under the same lock.

use std::time::{Duration, Instant};

use crate::chat::{ChatEntry, ChatLog};
use crate::error::{ConnectError, JoinError, SessionError};
use crate::mirror::{LocalParticipant, WorldStateMirror};
use crate::presentation::Presentation;
use crate::protocol::{JoinSubWorldResponse, ParticipantState};
use crate::reconcile::Reconciler;
use crate::types::{DisconnectReason, ParticipantInfo, SessionStatus};

pub struct SessionState<P> {
    pub(crate) status: SessionStatus,
    /// Fixed by the join handshake.
    pub(crate) local_id: Option<String>,
    /// Created on the first inbound state entry that names `local_id`.
    pub(crate) local: Option<LocalParticipant>,
    pub(crate) mirror: Option<WorldStateMirror>,
    pub(crate) reconciler: Reconciler,
    pub(crate) chat: ChatLog,
    pub(crate) presentation: P,
}

impl<P: Presentation> SessionState<P> {
    pub fn new(presentation: P, reconcile_duration: Duration) -> Self {
        Self {
            status: SessionStatus::Idle,
            local_id: None,
            local: None,
            mirror: None,
            reconciler: Reconciler::new(reconcile_duration),
            chat: ChatLog::default(),
            presentation,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn local(&self) -> Option<&LocalParticipant> {
        self.local.as_ref()
    }

    pub fn mirror(&self) -> Option<&WorldStateMirror> {
        self.mirror.as_ref()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }

    /// Participants currently drawn: the local one plus every rendered remote.
    pub fn headcount(&self) -> usize {
        let remotes = self.mirror.as_ref().map_or(0, |m| m.remote_count());
        remotes + usize::from(self.local.is_some())
    }

    /// What the outbound reporter should send right now, if anything.  While
    /// joined this is `None` only until the server first reports our spawn.
    pub fn outbound_sample(&self) -> Option<ParticipantState> {
        if !self.status.is_joined() {
            return None;
        }
        self.local.as_ref().map(LocalParticipant::state)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// `Idle → Connecting`.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Idle {
            return Err(SessionError::AlreadyStarted(self.status));
        }
        self.status = SessionStatus::Connecting;
        Ok(())
    }

    /// `Connecting → Joining`.  `false` if the session was torn down while
    /// the connect was in flight.
    pub fn connect_succeeded(&mut self) -> bool {
        if self.status != SessionStatus::Connecting {
            return false;
        }
        self.status = SessionStatus::Joining;
        true
    }

    /// `Connecting → Disconnected(forced)`.
    pub fn connect_failed(&mut self, err: &ConnectError) -> bool {
        if self.status != SessionStatus::Connecting {
            return false;
        }
        self.status = SessionStatus::Disconnected(DisconnectReason::Forced);
        self.presentation.connect_failed(&err.message);
        true
    }

    /// `Joining → Disconnected(forced)`.
    pub fn join_failed(&mut self, err: &JoinError) -> bool {
        if self.status != SessionStatus::Joining {
            return false;
        }
        self.status = SessionStatus::Disconnected(DisconnectReason::Forced);
        self.presentation.join_failed(&err.message);
        true
    }

    /// `Joining → Joined`: seed the mirror and remember the local id.  The
    /// local participant waits for its first server-reported spawn pose.
    pub fn join_succeeded(&mut self, res: JoinSubWorldResponse) -> bool {
        if self.status != SessionStatus::Joining {
            return false;
        }

        let JoinSubWorldResponse {
            current_user,
            world_state,
        } = res;
        let mirror = WorldStateMirror::from_join(world_state, &current_user);
        self.presentation.world_joined(&mirror.world_name);

        self.mirror = Some(mirror);
        self.local_id = Some(current_user.id);
        self.status = SessionStatus::Joined;
        true
    }

    /// Create the local participant at `spawn`.  Only the first call after
    /// join does anything; later self entries are echoes and are ignored.
    pub(crate) fn spawn_local(&mut self, spawn: &ParticipantState) -> bool {
        if self.local.is_some() {
            return false;
        }
        let (Some(id), Some(mirror)) = (self.local_id.as_deref(), self.mirror.as_ref()) else {
            return false;
        };

        let local = LocalParticipant::spawned_at(id, spawn);
        let info = ParticipantInfo {
            name: mirror.display_name(id).to_string(),
            ..mirror
                .participant(id)
                .cloned()
                .unwrap_or_else(|| ParticipantInfo::new(id, "", 0))
        };
        log::debug!("local participant '{}' spawned at {}", id, local.position);
        self.presentation
            .participant_created(&info, &local.pose(), true);
        self.local = Some(local);
        true
    }

    /// Enter `Disconnected(reason)` and cancel every reconciliation task.
    ///
    /// Returns `false` when the session had already ended.  Leaving `Joined`
    /// reports `connection_lost` exactly once.
    pub fn teardown(&mut self, reason: DisconnectReason) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let was_joined = self.status.is_joined();
        self.status = SessionStatus::Disconnected(reason);

        let cancelled = self.reconciler.clear();
        log::debug!("session torn down ({reason:?}); cancelled {cancelled} reconciliation tasks");

        if was_joined {
            self.presentation
                .connection_lost(reason == DisconnectReason::Manual);
        }
        true
    }

    // -----------------------------------------------------------------------
    // Timer-driven work
    // -----------------------------------------------------------------------

    /// Advance every reconciliation task to `now` and publish the new poses.
    ///
    /// Returns how many participants moved.
    pub fn step_reconciliation(&mut self, now: Instant) -> usize {
        if !self.status.is_joined() {
            return 0;
        }
        let Some(mirror) = self.mirror.as_mut() else {
            return 0;
        };

        let mut moved = 0;
        for step in self.reconciler.step(now) {
            let Some(remote) = mirror.remote_mut(&step.id) else {
                continue;
            };
            remote.rendered = step.pose;
            self.presentation
                .participant_pose_updated(&step.id, &step.pose, remote.animation);
            moved += 1;
        }
        moved
    }

    /// Report headcount and latency to the presentation layer.
    pub fn publish_room_status(&mut self, latency: Option<Duration>) {
        if !self.status.is_joined() {
            return;
        }
        let headcount = self.headcount();
        self.presentation.room_status_changed(headcount, latency);
    }

    /// Apply local input to the local participant.  `false` before join or
    /// after teardown.
    pub fn update_local<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut LocalParticipant),
    {
        if !self.status.is_joined() {
            return false;
        }
        match self.local.as_mut() {
            Some(local) => {
                f(local);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    pub(crate) fn push_chat(&mut self, entry: ChatEntry) {
        let line = entry.to_string();
        self.chat.append(entry);
        self.presentation.chat_message_appended(&line);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEvent;
    use crate::presentation::{ChannelPresentation, EventStream};
    use crate::protocol::WorldState;
    use crate::reconcile::DEFAULT_RECONCILE_DURATION;
    use crate::types::{AnimationState, Vec3};

    fn fresh() -> (SessionState<ChannelPresentation>, EventStream) {
        let (p, events) = ChannelPresentation::new();
        (SessionState::new(p, DEFAULT_RECONCILE_DURATION), events)
    }

    fn join_response() -> JoinSubWorldResponse {
        JoinSubWorldResponse {
            current_user: ParticipantInfo::new("u1", "Me", 1),
            world_state: WorldState {
                name: "Room A".into(),
                ..Default::default()
            },
        }
    }

    fn joined() -> (SessionState<ChannelPresentation>, EventStream) {
        let (mut st, events) = fresh();
        st.begin_connect().unwrap();
        assert!(st.connect_succeeded());
        assert!(st.join_succeeded(join_response()));
        events.poll();
        (st, events)
    }

    fn spawn() -> ParticipantState {
        ParticipantState {
            animation: AnimationState::Idle,
            position: Vec3::new(12.0, 0.0, -4.0),
            ..Default::default()
        }
    }

    /// Joined, with the local participant already placed by the server.
    fn spawned() -> (SessionState<ChannelPresentation>, EventStream) {
        let (mut st, events) = joined();
        assert!(st.spawn_local(&spawn()));
        events.poll();
        (st, events)
    }

    #[test]
    fn happy_path_transitions() {
        let (mut st, events) = fresh();
        assert_eq!(st.status(), SessionStatus::Idle);
        st.begin_connect().unwrap();
        assert_eq!(st.status(), SessionStatus::Connecting);
        assert!(st.connect_succeeded());
        assert_eq!(st.status(), SessionStatus::Joining);
        assert!(st.join_succeeded(join_response()));
        assert_eq!(st.status(), SessionStatus::Joined);
        assert_eq!(st.local_id(), Some("u1"));
        assert!(st.local().is_none());
        assert_eq!(st.mirror().unwrap().world_name, "Room A");
        assert_eq!(
            events.poll(),
            vec![SessionEvent::Joined {
                world_name: "Room A".into()
            }]
        );
    }

    #[test]
    fn local_spawns_once_at_reported_pose() {
        let (mut st, events) = joined();
        assert!(st.spawn_local(&spawn()));
        assert_eq!(st.local().unwrap().id, "u1");
        assert_eq!(st.local().unwrap().position, Vec3::new(12.0, 0.0, -4.0));
        match &events.poll()[..] {
            [SessionEvent::ParticipantCreated {
                id,
                display_name,
                is_local: true,
                pose,
                ..
            }] => {
                assert_eq!(id, "u1");
                assert_eq!(display_name, "Me");
                assert_eq!(pose.position, Vec3::new(12.0, 0.0, -4.0));
            }
            other => panic!("unexpected events: {other:?}"),
        }

        assert!(!st.spawn_local(&ParticipantState::default()));
        assert_eq!(st.local().unwrap().position, Vec3::new(12.0, 0.0, -4.0));
        assert!(events.poll().is_empty());
    }

    #[test]
    fn begin_connect_twice_is_rejected() {
        let (mut st, _events) = fresh();
        st.begin_connect().unwrap();
        assert!(matches!(
            st.begin_connect(),
            Err(SessionError::AlreadyStarted(SessionStatus::Connecting))
        ));
    }

    #[test]
    fn connect_failure_is_forced_and_reported() {
        let (mut st, events) = fresh();
        st.begin_connect().unwrap();
        assert!(st.connect_failed(&ConnectError::new("unreachable")));
        assert_eq!(
            st.status(),
            SessionStatus::Disconnected(DisconnectReason::Forced)
        );
        assert_eq!(
            events.poll(),
            vec![SessionEvent::ConnectFailed {
                message: "unreachable".into()
            }]
        );
        // Terminal: nothing moves it any more.
        assert!(!st.connect_succeeded());
        assert!(!st.teardown(DisconnectReason::Manual));
    }

    #[test]
    fn join_failure_is_forced_and_reported() {
        let (mut st, events) = fresh();
        st.begin_connect().unwrap();
        st.connect_succeeded();
        assert!(st.join_failed(&JoinError::new("world full")));
        assert_eq!(
            st.status(),
            SessionStatus::Disconnected(DisconnectReason::Forced)
        );
        assert_eq!(
            events.poll(),
            vec![SessionEvent::JoinFailed {
                message: "world full".into()
            }]
        );
        assert!(st.local().is_none());
    }

    #[test]
    fn teardown_reports_once_and_clears_tasks() {
        let (mut st, events) = joined();
        let now = Instant::now();
        st.reconciler
            .submit("u2", Default::default(), Default::default(), now);

        assert!(st.teardown(DisconnectReason::Forced));
        assert!(!st.teardown(DisconnectReason::Forced));
        assert!(st.reconciler().is_empty());
        assert_eq!(
            events.poll(),
            vec![SessionEvent::ConnectionLost { manual: false }]
        );
    }

    #[test]
    fn manual_teardown_before_join_reports_nothing() {
        let (mut st, events) = fresh();
        st.begin_connect().unwrap();
        assert!(st.teardown(DisconnectReason::Manual));
        assert!(!st.connect_succeeded());
        assert!(events.poll().is_empty());
    }

    #[test]
    fn outbound_sample_only_while_joined_and_spawned() {
        let (st, _events) = joined();
        assert!(st.outbound_sample().is_none());

        let (mut st, _events) = spawned();
        assert_eq!(st.outbound_sample(), Some(spawn()));
        st.teardown(DisconnectReason::Manual);
        assert!(st.outbound_sample().is_none());
    }

    #[test]
    fn update_local_requires_join() {
        let (mut st, _events) = fresh();
        assert!(!st.update_local(|l| l.position.x = 1.0));

        let (mut st, _events) = joined();
        assert!(!st.update_local(|l| l.position.x = 1.0));

        let (mut st, _events) = spawned();
        assert!(st.update_local(|l| l.position.x = 1.0));
        assert_eq!(st.local().unwrap().position.x, 1.0);
    }

    #[test]
    fn room_status_counts_local_participant() {
        let (mut st, events) = spawned();
        st.publish_room_status(Some(Duration::from_millis(42)));
        assert_eq!(
            events.poll(),
            vec![SessionEvent::RoomStatus {
                headcount: 1,
                latency: Some(Duration::from_millis(42))
            }]
        );
    }
}
