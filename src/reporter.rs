//! Outbound state reporter.
//!
//! Every `interval` the local participant's animation, position and rotation
//! are sampled and sent as one `client/UserState` message.  Ticks before the
//! server has reported our spawn send nothing.  The loop ends on the first
//! tick that finds the session no longer joined, or as soon as the shutdown
//! signal fires, so nothing is sent after teardown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::presentation::Presentation;
use crate::protocol::names;
use crate::state::SessionState;
use crate::transport::Transport;

pub fn spawn_reporter<T, P>(
    state: Arc<Mutex<SessionState<P>>>,
    transport: Arc<T>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Transport,
    P: Presentation,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // A late tick is a stale sample; just wait for the next one.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sent: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let (joined, sample) = {
                let st = state.lock();
                (st.status().is_joined(), st.outbound_sample())
            };
            if !joined {
                break;
            }
            let Some(sample) = sample else {
                continue;
            };
            match serde_json::to_value(&sample) {
                Ok(payload) => {
                    transport.send(names::USER_STATE, payload);
                    sent += 1;
                }
                Err(e) => tracing::warn!("could not encode local state: {e}"),
            }
        }

        tracing::debug!("state reporter stopped after {sent} report(s)");
    })
}
