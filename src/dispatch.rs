//! Inbound event dispatcher.
//!
//! ## Event contract (inbound)
//!
//! | Message             | Effect                                                   |
//! |---------------------|----------------------------------------------------------|
//! | `server/Chat`       | chat log + announcement, speech bubble on the speaker    |
//! | `server/UserStates` | spawn self once, then skip it; spawn/reconcile remotes   |
//! | `server/UserJoin`   | roster insert + "joined" announcement                    |
//! | `server/UserExit`   | roster/entity/task removal + "left" announcement         |
//!
//! Messages arriving before the join completes or after teardown are dropped.

use std::time::Instant;

use crate::chat::ChatEntry;
use crate::presentation::Presentation;
use crate::protocol::{BatchedState, Chat, ServerMessage, UserExit, UserJoin};
use crate::state::SessionState;

impl<P: Presentation> SessionState<P> {
    /// Apply one inbound message at time `now`.
    pub fn dispatch(&mut self, msg: ServerMessage, now: Instant) {
        if !self.status.is_joined() || self.mirror.is_none() {
            log::debug!(
                "dropping '{}' received while {}",
                msg.name(),
                self.status
            );
            return;
        }

        match msg {
            ServerMessage::Chat(chat) => self.on_chat(chat),
            ServerMessage::BatchedState(batch) => self.on_batched_state(batch, now),
            ServerMessage::UserJoin(join) => self.on_user_join(join),
            ServerMessage::UserExit(exit) => self.on_user_exit(exit),
        }
    }

    fn on_chat(&mut self, chat: Chat) {
        let has_entity = self
            .mirror
            .as_ref()
            .is_some_and(|m| m.remote(&chat.speaker_id).is_some());
        if has_entity {
            self.presentation.chat_bubble(&chat.speaker_id, &chat.text);
        }
        self.push_chat(ChatEntry::message(chat.speaker_name, chat.text));
    }

    fn on_batched_state(&mut self, batch: BatchedState, now: Instant) {
        for (id, state) in batch.entries {
            // Self-authority: the first report places us, echoes never move us.
            if self.local_id.as_deref() == Some(id.as_str()) {
                self.spawn_local(&state);
                continue;
            }

            let Some(mirror) = self.mirror.as_mut() else {
                return;
            };
            match mirror.remote_mut(&id) {
                Some(remote) => {
                    remote.animation = state.animation;
                    let current = remote.rendered;
                    self.reconciler.submit(&id, current, state.pose(), now);
                }
                None => {
                    let remote = mirror.spawn_remote(&id, &state);
                    log::debug!("participant '{}' first seen at {}", id, remote.rendered);
                    let info = remote.info();
                    let pose = remote.rendered;
                    self.presentation.participant_created(&info, &pose, false);
                }
            }
        }
    }

    fn on_user_join(&mut self, join: UserJoin) {
        let Some(mirror) = self.mirror.as_mut() else {
            return;
        };
        let participant = join.participant;
        mirror.add_participant(participant.clone());
        let name = mirror.display_name(&participant.id).to_string();
        log::info!("participant '{}' ({}) joined", participant.id, name);
        self.push_chat(ChatEntry::joined(name));
    }

    fn on_user_exit(&mut self, exit: UserExit) {
        let Some(mirror) = self.mirror.as_mut() else {
            return;
        };
        let id = exit.participant_id;
        let name = mirror.display_name(&id).to_string();
        mirror.remove_participant(&id);
        let had_entity = mirror.remove_remote(&id).is_some();
        self.reconciler.cancel(&id);

        if had_entity {
            self.presentation.participant_removed(&id);
        }
        log::info!("participant '{}' ({}) left", id, name);
        self.push_chat(ChatEntry::left(name));
    }
}
