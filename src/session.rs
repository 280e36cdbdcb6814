//! Session supervisor.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start──► Connecting ──ok──► Joining ──ok──► Joined
//!                     │                 │               │
//!                     └──fail──┐   fail─┘     lost/disconnect
//!                              ▼                        ▼
//!                  Disconnected(forced)     Disconnected(forced|manual)
//! ```
//!
//! ## Tasks while joined
//!
//! | Task          | Cadence               | Work                                   |
//! |---------------|-----------------------|----------------------------------------|
//! | inbound pump  | per transport event   | decode + `SessionState::dispatch`      |
//! | reporter      | `report_interval`     | send `client/UserState`                |
//! | stepper       | `reconcile_step`      | `SessionState::step_reconciliation`    |
//! | room status   | `room_status_interval`| headcount + heartbeat latency          |
//!
//! All four share one `Arc<Mutex<SessionState>>` and one shutdown signal.
//! The lock is only ever held for synchronous work, never across an await.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::chat::ChatEntry;
use crate::error::{ConnectError, JoinError, Result, SendChatError, SessionError};
use crate::mirror::LocalParticipant;
use crate::presentation::Presentation;
use crate::protocol::{names, DecodeError, JoinSubWorld, JoinSubWorldResponse, SendChat, ServerMessage};
use crate::reporter::spawn_reporter;
use crate::settings::{unix_millis, SessionConfig};
use crate::state::SessionState;
use crate::transport::{InboundReceiver, Transport, TransportEvent};
use crate::types::{DisconnectReason, SessionStatus};

pub struct Session<T: Transport, P: Presentation> {
    config: SessionConfig,
    transport: Arc<T>,
    state: Arc<Mutex<SessionState<P>>>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport, P: Presentation> Session<T, P> {
    pub fn new(config: SessionConfig, transport: T, presentation: P) -> Self {
        let state = SessionState::new(presentation, config.reconcile_duration);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            transport: Arc::new(transport),
            state: Arc::new(Mutex::new(state)),
            shutdown: Arc::new(shutdown),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status()
    }

    /// Run `f` against the current state under the session lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&SessionState<P>) -> R) -> R {
        f(&*self.state.lock())
    }

    /// Snapshot of the chat log, oldest first.
    pub fn chat_entries(&self) -> Vec<ChatEntry> {
        self.state.lock().chat().to_vec()
    }

    /// Background tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().iter().filter(|h| !h.is_finished()).count()
    }

    // -----------------------------------------------------------------------
    // Start-up
    // -----------------------------------------------------------------------

    /// Connect, join and start the session tasks.
    ///
    /// Connect and join failures leave the session in
    /// `Disconnected(forced)` and have already been reported to the
    /// presentation layer when this returns.
    pub async fn start(&self) -> Result<()> {
        self.state.lock().begin_connect()?;
        tracing::info!(endpoint = %self.config.endpoint, "connecting");

        let inbound = match self.transport.connect().await {
            Ok(rx) => rx,
            Err(e) => {
                let err = ConnectError::new(e.to_string());
                tracing::warn!("{err}");
                let reported = self.state.lock().connect_failed(&err);
                return Err(if reported {
                    err.into()
                } else {
                    SessionError::Cancelled
                });
            }
        };

        let proceed = self.state.lock().connect_succeeded();
        if !proceed {
            self.transport.disconnect(true);
            return Err(SessionError::Cancelled);
        }

        tracing::info!(
            sub_world = %self.config.sub_world_id,
            local_id = %self.config.local_id,
            "joining"
        );
        let response = match self.join().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("{err}");
                let reported = self.state.lock().join_failed(&err);
                self.transport.disconnect(true);
                return Err(if reported {
                    err.into()
                } else {
                    SessionError::Cancelled
                });
            }
        };

        let latency = self.transport.last_heartbeat_latency();
        let joined = {
            let mut st = self.state.lock();
            let joined = st.join_succeeded(response);
            if joined {
                st.publish_room_status(latency);
                if let Some(world) = st.mirror() {
                    tracing::info!(
                        world = %world.world_name,
                        participants = world.roster_len(),
                        "joined"
                    );
                }
            }
            joined
        };
        if !joined {
            self.transport.disconnect(true);
            return Err(SessionError::Cancelled);
        }

        self.spawn_tasks(inbound);
        Ok(())
    }

    async fn join(&self) -> std::result::Result<JoinSubWorldResponse, JoinError> {
        let request = JoinSubWorld {
            token: self.config.token.clone(),
            local_id: self.config.local_id.clone(),
            timestamp: unix_millis(),
            sub_world_id: self.config.sub_world_id.clone(),
        };
        let payload = serde_json::to_value(&request).map_err(|e| JoinError::new(e.to_string()))?;

        let call = self.transport.call(names::JOIN_SUB_WORLD, payload);
        let reply = match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(JoinError::new(e.to_string())),
            Err(_) => {
                return Err(JoinError::new(format!(
                    "no reply within {:?}",
                    self.config.call_timeout
                )))
            }
        };

        serde_json::from_value(reply)
            .map_err(|e| JoinError::new(format!("malformed join response: {e}")))
    }

    fn spawn_tasks(&self, inbound: InboundReceiver) {
        let mut tasks = self.tasks.lock();
        // A disconnect that raced the join has already run its abort pass.
        if !self.status().is_joined() {
            return;
        }

        tasks.push(spawn_pump(
            Arc::clone(&self.state),
            inbound,
            Arc::clone(&self.shutdown),
        ));
        tasks.push(spawn_reporter(
            Arc::clone(&self.state),
            Arc::clone(&self.transport),
            self.config.report_interval,
            self.shutdown.subscribe(),
        ));
        tasks.push(self.spawn_stepper());
        tasks.push(self.spawn_room_status());
        tracing::debug!("{} session tasks running", tasks.len());
    }

    fn spawn_stepper(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let every = self.config.reconcile_step;
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                let now = Instant::now().into_std();
                let joined = {
                    let mut st = state.lock();
                    let joined = st.status().is_joined();
                    if joined {
                        st.step_reconciliation(now);
                    }
                    joined
                };
                if !joined {
                    break;
                }
            }
        })
    }

    fn spawn_room_status(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let transport = Arc::clone(&self.transport);
        let every = self.config.room_status_interval;
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            // Already published once at join.
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                let latency = transport.last_heartbeat_latency();
                let joined = {
                    let mut st = state.lock();
                    st.publish_room_status(latency);
                    st.status().is_joined()
                };
                if !joined {
                    break;
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Local input
    // -----------------------------------------------------------------------

    /// Post a chat line.  Blank input is ignored.  On failure the original
    /// text comes back in the error so the caller can restore it.
    ///
    /// The line is not added to the local log here; the server's broadcast
    /// `server/Chat` puts it there like everyone else's.
    pub async fn send_chat(&self, text: &str) -> std::result::Result<(), SendChatError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let fail = |reason: String| SendChatError {
            reason,
            text: text.to_string(),
        };

        if !self.status().is_joined() {
            return Err(fail("not joined".into()));
        }
        let payload = serde_json::to_value(SendChat {
            text: text.to_string(),
        })
        .map_err(|e| fail(e.to_string()))?;

        match self.transport.call(names::SEND_CHAT, payload).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("chat send failed: {e}");
                Err(fail(e.to_string()))
            }
        }
    }

    /// Mutate the local participant (movement, animation).  Picked up by the
    /// next report.  `false` when not joined, or before the server has
    /// placed the local participant.
    pub fn update_local<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut LocalParticipant),
    {
        self.state.lock().update_local(f)
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Leave voluntarily.  Stops every task before closing the transport so
    /// no report or reconciliation step runs afterwards.
    pub fn disconnect(&self) {
        let changed = self.state.lock().teardown(DisconnectReason::Manual);
        self.stop_tasks();
        self.transport.disconnect(true);
        if changed {
            tracing::info!("disconnected by request");
        }
    }

    fn stop_tasks(&self) {
        self.shutdown.send_replace(true);
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl<T: Transport, P: Presentation> Drop for Session<T, P> {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

/// Drain transport events into the state until the connection ends.
fn spawn_pump<P: Presentation>(
    state: Arc<Mutex<SessionState<P>>>,
    mut inbound: InboundReceiver,
    shutdown: Arc<watch::Sender<bool>>,
) -> JoinHandle<()> {
    let mut stop = shutdown.subscribe();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = stop.changed() => return,
                event = inbound.recv() => event,
            };

            let (reason, detail) = match event {
                Some(TransportEvent::Message { name, payload }) => {
                    match ServerMessage::decode(&name, payload) {
                        Ok(msg) => {
                            let now = Instant::now().into_std();
                            state.lock().dispatch(msg, now);
                        }
                        Err(DecodeError::UnknownMessage(name)) => {
                            tracing::debug!("ignoring unknown message '{name}'");
                        }
                        Err(e) => tracing::warn!("dropping inbound message: {e}"),
                    }
                    continue;
                }
                Some(TransportEvent::Disconnected { manual, reason }) => {
                    let kind = if manual {
                        DisconnectReason::Manual
                    } else {
                        DisconnectReason::Forced
                    };
                    (kind, reason)
                }
                None => (DisconnectReason::Forced, Some("inbound channel closed".into())),
            };

            let changed = state.lock().teardown(reason);
            shutdown.send_replace(true);
            if changed {
                match detail {
                    Some(detail) => tracing::warn!(?reason, "connection lost: {detail}"),
                    None => tracing::warn!(?reason, "connection lost"),
                }
            }
            return;
        }
    })
}
