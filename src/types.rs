//! Core presence types shared across all modules.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Linear interpolation towards `to`.  `t` is not clamped.
    pub fn lerp(self, to: Vec3, t: f32) -> Vec3 {
        Vec3::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Unit quaternion rotation (`w` is the scalar part).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quat {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Rotation of `radians` around the vertical (Y) axis.
    pub fn from_yaw(radians: f32) -> Self {
        let half = radians * 0.5;
        Self::new(0.0, half.sin(), 0.0, half.cos())
    }

    pub fn dot(self, other: Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalize(self) -> Quat {
        let len = self.length();
        if len <= f32::EPSILON {
            return Quat::identity();
        }
        Quat::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    fn scale(self, s: f32) -> Quat {
        Quat::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    fn add(self, other: Quat) -> Quat {
        Quat::new(
            self.x + other.x,
            self.y + other.y,
            self.z + other.z,
            self.w + other.w,
        )
    }

    /// Spherical linear interpolation along the shortest arc.
    ///
    /// Falls back to normalised lerp when the two rotations are nearly
    /// parallel, where `sin(theta)` would lose precision.
    pub fn slerp(self, to: Quat, t: f32) -> Quat {
        let mut cos_theta = self.dot(to);
        let mut to = to;
        if cos_theta < 0.0 {
            cos_theta = -cos_theta;
            to = to.scale(-1.0);
        }

        if cos_theta > 0.9995 {
            return self.scale(1.0 - t).add(to.scale(t)).normalize();
        }

        let theta = cos_theta.acos();
        let sin_theta = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin_theta;
        let b = (t * theta).sin() / sin_theta;
        self.scale(a).add(to.scale(b))
    }

    /// Angle in radians between two rotations (0 when equivalent).
    pub fn angle_to(self, other: Quat) -> f32 {
        let d = self.normalize().dot(other.normalize()).abs().min(1.0);
        2.0 * d.acos()
    }
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Position + orientation of a participant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} q({:.3}, {:.3}, {:.3}, {:.3})",
            self.position, self.rotation.x, self.rotation.y, self.rotation.z, self.rotation.w
        )
    }
}

// ---------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------

/// Animation clip a participant is currently playing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnimationState {
    #[default]
    Idle,
    Walking,
    Wave,
    Punch,
    /// Anything newer servers send that this client does not know.
    #[serde(other)]
    Unknown,
}

impl AnimationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationState::Idle => "idle",
            AnimationState::Walking => "walking",
            AnimationState::Wave => "wave",
            AnimationState::Punch => "punch",
            AnimationState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AnimationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Roster metadata for a participant, as the server describes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Packed RGBA colour used to tint the participant's avatar.
    #[serde(default)]
    pub visual_id: u32,
}

impl ParticipantInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, visual_id: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            visual_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// User-initiated teardown.  No notice is surfaced.
    Manual,
    /// Connect failure, join rejection or transport loss.
    Forced,
}

/// Supervisor lifecycle.  `Disconnected` is terminal for a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Joining,
    Joined,
    Disconnected(DisconnectReason),
}

impl SessionStatus {
    pub fn is_joined(&self) -> bool {
        matches!(self, SessionStatus::Joined)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Disconnected(_))
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => f.write_str("idle"),
            SessionStatus::Connecting => f.write_str("connecting"),
            SessionStatus::Joining => f.write_str("joining"),
            SessionStatus::Joined => f.write_str("joined"),
            SessionStatus::Disconnected(DisconnectReason::Manual) => {
                f.write_str("disconnected (manual)")
            }
            SessionStatus::Disconnected(DisconnectReason::Forced) => {
                f.write_str("disconnected (forced)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
