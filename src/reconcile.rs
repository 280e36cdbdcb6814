//! Participant reconciler: smooths remote participants towards the latest
//! pose the server reported for them.
//!
//! Every remote participant has at most one [`ReconciliationTask`].  A new
//! goal replaces the running task and restarts interpolation from whatever
//! pose is *currently rendered*, never from the previous goal, so a dropped or
//! late update cannot produce a visible jump.  Position is interpolated
//! linearly; rotation is slerped from the rotation held when the task started.
//!
//! The reconciler is clock-agnostic: callers pass `now` explicitly, which is
//! what lets the session drive it from a timer and tests drive it by hand.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::Pose;

/// Default smoothing window; matches the outbound reporting interval.
pub const DEFAULT_RECONCILE_DURATION: Duration = Duration::from_millis(100);

/// Pose at `ratio` of the way from `start` to `goal`.
///
/// `ratio` is clamped to `[0, 1]`; at `1` the goal is returned exactly.
pub fn interpolate(start: &Pose, goal: &Pose, ratio: f32) -> Pose {
    let t = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    if t >= 1.0 {
        return *goal;
    }
    Pose::new(
        start.position.lerp(goal.position, t),
        start.rotation.slerp(goal.rotation, t),
    )
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationTask {
    pub target_id: String,
    pub start: Pose,
    pub goal: Pose,
    pub started_at: Instant,
    pub duration: Duration,
}

impl ReconciliationTask {
    /// Elapsed fraction of the task at `now`, clamped to `[0, 1]`.
    pub fn ratio_at(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    pub fn pose_at(&self, now: Instant) -> Pose {
        interpolate(&self.start, &self.goal, self.ratio_at(now))
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.ratio_at(now) >= 1.0
    }
}

/// One interpolation step produced by [`Reconciler::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoseStep {
    pub id: String,
    pub pose: Pose,
    /// The task reached its goal and has been retired.
    pub finished: bool,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Owns every in-flight reconciliation task, keyed by participant id.
///
/// Removing a task is the cancellation mechanism; it is always idempotent.
#[derive(Debug)]
pub struct Reconciler {
    duration: Duration,
    tasks: HashMap<String, ReconciliationTask>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_RECONCILE_DURATION)
    }
}

impl Reconciler {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            tasks: HashMap::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start smoothing `id` from `current` (its rendered pose) towards `goal`.
    ///
    /// Returns `true` when an existing task was cancelled to make way.
    pub fn submit(&mut self, id: &str, current: Pose, goal: Pose, now: Instant) -> bool {
        let task = ReconciliationTask {
            target_id: id.to_string(),
            start: current,
            goal,
            started_at: now,
            duration: self.duration,
        };
        self.tasks.insert(id.to_string(), task).is_some()
    }

    /// Drop the task for `id`, discarding any progress.  No-op when absent.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.tasks.remove(id).is_some()
    }

    /// Cancel everything.  Returns how many tasks were running.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        n
    }

    pub fn task(&self, id: &str) -> Option<&ReconciliationTask> {
        self.tasks.get(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Advance every task to `now`.  Completed tasks yield their exact goal
    /// and are retired.
    pub fn step(&mut self, now: Instant) -> Vec<PoseStep> {
        let mut steps = Vec::with_capacity(self.tasks.len());
        self.tasks.retain(|id, task| {
            let finished = task.is_complete(now);
            steps.push(PoseStep {
                id: id.clone(),
                pose: task.pose_at(now),
                finished,
            });
            !finished
        });
        steps
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
