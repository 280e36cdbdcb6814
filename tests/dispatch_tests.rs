//! Inbound dispatch and reconciliation tests, driven with explicit clocks.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::time::{Duration, Instant};
    use world_presence::protocol::{
        names, BatchedState, Chat, JoinSubWorldResponse, ParticipantState, ServerMessage,
        UserExit, UserJoin, WorldState,
    };
    use world_presence::{
        AnimationState, ChannelPresentation, ChatEntry, DisconnectReason, EventStream,
        ParticipantInfo, Pose, Quat, SessionEvent, SessionState, Vec3, CHAT_LOG_CAPACITY,
        DEFAULT_RECONCILE_DURATION,
    };

    const EPS: f32 = 1e-4;

    fn joined_state() -> (SessionState<ChannelPresentation>, EventStream) {
        let (p, events) = ChannelPresentation::new();
        let mut st = SessionState::new(p, DEFAULT_RECONCILE_DURATION);
        st.begin_connect().unwrap();
        assert!(st.connect_succeeded());
        assert!(st.join_succeeded(JoinSubWorldResponse {
            current_user: ParticipantInfo::new("u1", "Me", 7),
            world_state: WorldState {
                id: "w1".into(),
                name: "Room A".into(),
                participants: vec![
                    ParticipantInfo::new("u1", "Me", 7),
                    ParticipantInfo::new("u2", "Bob", 42),
                ],
            },
        }));
        events.poll();
        (st, events)
    }

    fn state_at(x: f32, yaw: f32, animation: AnimationState) -> ParticipantState {
        ParticipantState {
            animation,
            position: Vec3::new(x, 0.0, 0.0),
            rotation: Quat::from_yaw(yaw),
        }
    }

    fn batch(entries: &[(&str, ParticipantState)]) -> ServerMessage {
        ServerMessage::BatchedState(BatchedState {
            entries: entries
                .iter()
                .map(|(id, s)| (id.to_string(), *s))
                .collect(),
        })
    }

    fn rendered(st: &SessionState<ChannelPresentation>, id: &str) -> Pose {
        st.mirror().unwrap().remote(id).unwrap().rendered
    }

    // -----------------------------------------------------------------------
    // Batched state
    // -----------------------------------------------------------------------

    #[test]
    fn unseen_remote_is_created_at_reported_pose() {
        let (mut st, events) = joined_state();
        let t0 = Instant::now();

        st.dispatch(batch(&[("u2", state_at(3.0, 0.5, AnimationState::Wave))]), t0);

        let bob = st.mirror().unwrap().remote("u2").unwrap();
        assert_eq!(bob.display_name, "Bob");
        assert_eq!(bob.visual_id, 42);
        assert_eq!(bob.rendered.position, Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(bob.animation, AnimationState::Wave);
        // Direct placement: no smoothing task for the first sighting.
        assert!(!st.reconciler().is_active("u2"));

        match &events.poll()[..] {
            [SessionEvent::ParticipantCreated {
                id,
                display_name,
                is_local: false,
                ..
            }] => {
                assert_eq!(id, "u2");
                assert_eq!(display_name, "Bob");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn unknown_remote_gets_placeholder_name() {
        let (mut st, _events) = joined_state();
        st.dispatch(
            batch(&[("ghost", state_at(0.0, 0.0, AnimationState::Idle))]),
            Instant::now(),
        );
        let ghost = st.mirror().unwrap().remote("ghost").unwrap();
        assert_eq!(ghost.display_name, "???");
        assert_eq!(ghost.visual_id, 0);
    }

    #[test]
    fn first_self_entry_places_local_then_echoes_are_ignored() {
        let (mut st, events) = joined_state();
        assert!(st.local().is_none());
        let t0 = Instant::now();

        st.dispatch(batch(&[("u1", state_at(12.0, 1.0, AnimationState::Walking))]), t0);
        let local = st.local().unwrap();
        assert_eq!(local.position, Vec3::new(12.0, 0.0, 0.0));
        assert!(local.rotation.angle_to(Quat::from_yaw(1.0)) < 1e-2);
        assert_eq!(local.animation, AnimationState::Walking);
        match &events.poll()[..] {
            [SessionEvent::ParticipantCreated {
                id,
                display_name,
                visual_id,
                is_local: true,
                ..
            }] => {
                assert_eq!(id, "u1");
                assert_eq!(display_name, "Me");
                assert_eq!(*visual_id, 7);
            }
            other => panic!("unexpected events: {other:?}"),
        }

        st.update_local(|l| l.position = Vec3::new(1.0, 2.0, 3.0));
        st.dispatch(batch(&[("u1", state_at(99.0, 0.0, AnimationState::Punch))]), t0);

        let local = st.local().unwrap();
        assert_eq!(local.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(local.animation, AnimationState::Walking);
        assert!(st.mirror().unwrap().remote("u1").is_none());
        assert!(st.reconciler().is_empty());
        assert!(events.poll().is_empty());
    }

    #[test]
    fn known_remote_converges_on_goal_within_window() {
        let (mut st, events) = joined_state();
        let t0 = Instant::now();
        st.dispatch(batch(&[("u2", state_at(0.0, 0.0, AnimationState::Idle))]), t0);
        st.dispatch(
            batch(&[("u2", state_at(10.0, 1.0, AnimationState::Walking))]),
            t0,
        );
        events.poll();

        // Animation switches immediately; pose is smoothed.
        assert_eq!(
            st.mirror().unwrap().remote("u2").unwrap().animation,
            AnimationState::Walking
        );
        assert!(st.reconciler().is_active("u2"));

        st.step_reconciliation(t0 + Duration::from_millis(50));
        let half = rendered(&st, "u2");
        assert!((half.position.x - 5.0).abs() < EPS);
        assert!(half.rotation.angle_to(Quat::from_yaw(0.5)) < 1e-2);

        st.step_reconciliation(t0 + DEFAULT_RECONCILE_DURATION);
        let done = rendered(&st, "u2");
        assert_eq!(done.position, Vec3::new(10.0, 0.0, 0.0));
        assert!(!st.reconciler().is_active("u2"));

        let updates: Vec<_> = events
            .poll()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::PoseUpdated { .. }))
            .collect();
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn new_update_restarts_from_current_rendered_pose() {
        let (mut st, _events) = joined_state();
        let t0 = Instant::now();
        st.dispatch(batch(&[("u2", state_at(0.0, 0.0, AnimationState::Idle))]), t0);
        st.dispatch(batch(&[("u2", state_at(10.0, 0.0, AnimationState::Idle))]), t0);

        let t1 = t0 + Duration::from_millis(40);
        st.step_reconciliation(t1);
        assert!((rendered(&st, "u2").position.x - 4.0).abs() < EPS);

        // Superseding update: fresh full window from x=4, not from x=0.
        st.dispatch(batch(&[("u2", state_at(20.0, 0.0, AnimationState::Idle))]), t1);
        let task = st.reconciler().task("u2").unwrap();
        assert!((task.start.position.x - 4.0).abs() < EPS);
        assert_eq!(task.duration, DEFAULT_RECONCILE_DURATION);

        st.step_reconciliation(t1 + Duration::from_millis(50));
        assert!((rendered(&st, "u2").position.x - 12.0).abs() < EPS);
    }

    #[test]
    fn exit_then_reappear_is_placed_directly() {
        let (mut st, events) = joined_state();
        let t0 = Instant::now();
        st.dispatch(batch(&[("u2", state_at(0.0, 0.0, AnimationState::Idle))]), t0);
        st.dispatch(batch(&[("u2", state_at(10.0, 0.0, AnimationState::Idle))]), t0);
        st.dispatch(
            ServerMessage::UserExit(UserExit {
                participant_id: "u2".into(),
            }),
            t0,
        );
        assert!(st.reconciler().is_empty());
        assert!(st.mirror().unwrap().remote("u2").is_none());

        events.poll();
        st.dispatch(batch(&[("u2", state_at(7.0, 0.0, AnimationState::Idle))]), t0);
        assert_eq!(rendered(&st, "u2").position, Vec3::new(7.0, 0.0, 0.0));
        assert!(!st.reconciler().is_active("u2"));
        // Roster entry went with the exit.
        assert_eq!(st.mirror().unwrap().remote("u2").unwrap().display_name, "???");
    }

    // -----------------------------------------------------------------------
    // Roster + chat
    // -----------------------------------------------------------------------

    #[test]
    fn join_and_exit_are_announced() {
        let (mut st, events) = joined_state();
        let now = Instant::now();
        st.dispatch(
            ServerMessage::UserJoin(UserJoin {
                participant: ParticipantInfo::new("u3", "Carol", 5),
            }),
            now,
        );
        st.dispatch(batch(&[("u3", state_at(1.0, 0.0, AnimationState::Idle))]), now);
        st.dispatch(
            ServerMessage::UserExit(UserExit {
                participant_id: "u3".into(),
            }),
            now,
        );

        let lines: Vec<String> = st.chat().entries().map(|e| e.to_string()).collect();
        assert_eq!(lines, vec!["Carol joined the room", "Carol left the room"]);

        let evs = events.poll();
        assert!(evs.contains(&SessionEvent::ParticipantRemoved { id: "u3".into() }));
        assert!(st.mirror().unwrap().participant("u3").is_none());
    }

    #[test]
    fn exit_of_never_rendered_participant_skips_removal_hook() {
        let (mut st, events) = joined_state();
        st.dispatch(
            ServerMessage::UserExit(UserExit {
                participant_id: "u2".into(),
            }),
            Instant::now(),
        );
        let evs = events.poll();
        assert_eq!(
            evs,
            vec![SessionEvent::ChatAppended {
                line: "Bob left the room".into()
            }]
        );
    }

    #[test]
    fn chat_from_rendered_speaker_shows_bubble() {
        let (mut st, events) = joined_state();
        let now = Instant::now();
        st.dispatch(batch(&[("u2", state_at(0.0, 0.0, AnimationState::Idle))]), now);
        events.poll();

        st.dispatch(
            ServerMessage::Chat(Chat {
                speaker_id: "u2".into(),
                speaker_name: "Bob".into(),
                text: "hello".into(),
            }),
            now,
        );

        assert_eq!(
            events.poll(),
            vec![
                SessionEvent::ChatBubble {
                    participant_id: "u2".into(),
                    text: "hello".into()
                },
                SessionEvent::ChatAppended {
                    line: "Bob: hello".into()
                },
            ]
        );
        assert_eq!(st.chat().newest(), Some(&ChatEntry::message("Bob", "hello")));
    }

    #[test]
    fn chat_overflow_keeps_newest_seven() {
        let (mut st, _events) = joined_state();
        let now = Instant::now();
        for i in 0..(CHAT_LOG_CAPACITY + 3) {
            st.dispatch(
                ServerMessage::Chat(Chat {
                    speaker_id: "u9".into(),
                    speaker_name: "Zed".into(),
                    text: format!("m{i}"),
                }),
                now,
            );
        }
        let texts: Vec<&str> = st.chat().entries().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4", "m5", "m6", "m7", "m8", "m9"]);
    }

    // -----------------------------------------------------------------------
    // Lifecycle gating
    // -----------------------------------------------------------------------

    #[test]
    fn messages_after_teardown_are_dropped() {
        let (mut st, events) = joined_state();
        let t0 = Instant::now();
        st.dispatch(batch(&[("u2", state_at(0.0, 0.0, AnimationState::Idle))]), t0);
        st.dispatch(batch(&[("u2", state_at(5.0, 0.0, AnimationState::Idle))]), t0);
        st.teardown(DisconnectReason::Forced);
        events.poll();

        st.dispatch(batch(&[("u2", state_at(9.0, 0.0, AnimationState::Idle))]), t0);
        assert_eq!(st.step_reconciliation(t0 + Duration::from_millis(50)), 0);
        assert!(st.reconciler().is_empty());
        assert!(events.poll().is_empty());
    }

    #[test]
    fn decoded_wire_payload_dispatches() {
        let (mut st, _events) = joined_state();
        let msg = ServerMessage::decode(
            names::BATCHED_STATE,
            json!({
                "entries": {
                    "u2": {
                        "animation": "walking",
                        "position": { "x": 1.0, "y": 0.0, "z": 2.0 }
                    }
                }
            }),
        )
        .unwrap();
        st.dispatch(msg, Instant::now());

        let bob = st.mirror().unwrap().remote("u2").unwrap();
        assert_eq!(bob.rendered.position, Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(bob.rendered.rotation, Quat::identity());
        assert_eq!(bob.animation, AnimationState::Walking);
    }
}
