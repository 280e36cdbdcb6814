//! `WorldStateMirror` – local mirror of the joined sub-world.
//!
//! The mirror answers questions like:
//! - "What is this room called?"
//! - "Who is in the roster, and what do they look like?"
//! - "Where is remote participant X drawn right now?"
//!
//! The mirror is NOT thread-safe by itself; it lives inside the session
//! state and is only touched under the session lock.

use std::collections::HashMap;

use crate::protocol::{ParticipantState, WorldState};
use crate::types::{AnimationState, ParticipantInfo, Pose, Quat, Vec3};

/// Display name used when a participant shows up before its roster entry.
pub const UNKNOWN_NAME: &str = "???";

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// The participant this client controls.  Only local input mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalParticipant {
    pub id: String,
    pub animation: AnimationState,
    pub position: Vec3,
    pub rotation: Quat,
}

impl LocalParticipant {
    /// Place the participant where the server first reported it.
    pub fn spawned_at(id: impl Into<String>, state: &ParticipantState) -> Self {
        Self {
            id: id.into(),
            animation: state.animation,
            position: state.position,
            rotation: state.rotation,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    /// Snapshot sent by the outbound reporter.
    pub fn state(&self) -> ParticipantState {
        ParticipantState {
            animation: self.animation,
            position: self.position,
            rotation: self.rotation,
        }
    }
}

/// Another participant as drawn locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteParticipant {
    pub id: String,
    pub display_name: String,
    pub visual_id: u32,
    /// Interpolated pose actually shown; trails the server by at most one
    /// reconciliation window.
    pub rendered: Pose,
    pub animation: AnimationState,
}

impl RemoteParticipant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo::new(self.id.clone(), self.display_name.clone(), self.visual_id)
    }
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WorldStateMirror {
    pub world_name: String,
    /// Roster metadata, keyed by participant id.
    pub roster: HashMap<String, ParticipantInfo>,
    /// Rendered remote participants, keyed by participant id.
    pub remotes: HashMap<String, RemoteParticipant>,
}

impl WorldStateMirror {
    /// Seed from the join response.  `current_user` is added to the roster
    /// when the server left it out.
    pub fn from_join(world: WorldState, current_user: &ParticipantInfo) -> Self {
        let mut roster: HashMap<String, ParticipantInfo> = world
            .participants
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        roster
            .entry(current_user.id.clone())
            .or_insert_with(|| current_user.clone());

        Self {
            world_name: world.name,
            roster,
            remotes: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    pub fn add_participant(&mut self, info: ParticipantInfo) {
        self.roster.insert(info.id.clone(), info);
    }

    pub fn remove_participant(&mut self, id: &str) -> Option<ParticipantInfo> {
        self.roster.remove(id)
    }

    pub fn participant(&self, id: &str) -> Option<&ParticipantInfo> {
        self.roster.get(id)
    }

    /// Roster name for `id`, or `???` when unknown or blank.
    pub fn display_name(&self, id: &str) -> &str {
        match self.roster.get(id) {
            Some(p) if !p.name.is_empty() => &p.name,
            _ => UNKNOWN_NAME,
        }
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    // ------------------------------------------------------------------
    // Remote participants
    // ------------------------------------------------------------------

    /// Create the rendered entity for `id` at `state`, using roster metadata.
    pub fn spawn_remote(&mut self, id: &str, state: &ParticipantState) -> &RemoteParticipant {
        let (display_name, visual_id) = match self.roster.get(id) {
            Some(p) => (self.display_name(id).to_string(), p.visual_id),
            None => (UNKNOWN_NAME.to_string(), 0),
        };
        self.remotes.insert(
            id.to_string(),
            RemoteParticipant {
                id: id.to_string(),
                display_name,
                visual_id,
                rendered: state.pose(),
                animation: state.animation,
            },
        );
        &self.remotes[id]
    }

    pub fn remote(&self, id: &str) -> Option<&RemoteParticipant> {
        self.remotes.get(id)
    }

    pub fn remote_mut(&mut self, id: &str) -> Option<&mut RemoteParticipant> {
        self.remotes.get_mut(id)
    }

    pub fn remove_remote(&mut self, id: &str) -> Option<RemoteParticipant> {
        self.remotes.remove(id)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
