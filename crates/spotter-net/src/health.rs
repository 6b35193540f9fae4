//! Connectivity monitoring against `GET /health`.
//!
//! [`ConnectivityMonitor`] is the pure state machine: it folds probe results
//! into a binary state and reports transitions.  [`spawn_monitor`] drives it
//! from a background task on the interval described by [`HealthPolicy`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use spotter_shared::constants::{
    DEFAULT_HEALTH_INTERVAL_SECS, DEFAULT_MAX_PROBE_INTERVAL_SECS, DEFAULT_PROBE_TIMEOUT_SECS,
};
use spotter_shared::ConnectivityState;

use crate::api::ChatApi;

/// Probe cadence and backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// Interval between probes while connected.
    pub interval: Duration,
    /// A probe slower than this counts as failed.
    pub probe_timeout: Duration,
    /// Growth factor of the interval per consecutive failure.
    pub backoff_multiplier: f64,
    /// Upper bound of the backed-off interval.
    pub max_interval: Duration,
    /// State assumed before the first probe completes.
    pub initial_state: ConnectivityState,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_HEALTH_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(DEFAULT_MAX_PROBE_INTERVAL_SECS),
            initial_state: ConnectivityState::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityTransition {
    /// disconnected → connected; the engine flushes its queue.
    Restored,
    /// connected → disconnected
    Lost,
}

impl ConnectivityTransition {
    pub fn state(&self) -> ConnectivityState {
        match self {
            Self::Restored => ConnectivityState::Connected,
            Self::Lost => ConnectivityState::Disconnected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: ConnectivityState,
    consecutive_failures: u32,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        Self {
            state: initial,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Fold one probe result in; returns the transition it caused, if any.
    pub fn record_probe(&mut self, ok: bool) -> Option<ConnectivityTransition> {
        let next = if ok {
            self.consecutive_failures = 0;
            ConnectivityState::Connected
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            ConnectivityState::Disconnected
        };

        let transition = match (self.state, next) {
            (ConnectivityState::Disconnected, ConnectivityState::Connected) => {
                Some(ConnectivityTransition::Restored)
            }
            (ConnectivityState::Connected, ConnectivityState::Disconnected) => {
                Some(ConnectivityTransition::Lost)
            }
            _ => None,
        };
        self.state = next;
        transition
    }

    /// Delay before the next probe: the base interval while healthy,
    /// exponential backoff capped at `max_interval` while failing.
    pub fn next_delay(&self, policy: &HealthPolicy) -> Duration {
        if self.consecutive_failures <= 1 {
            return policy.interval;
        }
        let exp = (self.consecutive_failures - 1).min(16) as i32;
        let factor = policy.backoff_multiplier.max(1.0).powi(exp);
        let secs = policy.interval.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(policy.max_interval.as_secs_f64()))
            .max(policy.interval.min(policy.max_interval))
    }
}

/// Handle to a running monitor task.
pub struct MonitorHandle {
    /// Latest state; readable without waiting.
    pub state: watch::Receiver<ConnectivityState>,
    /// Every transition, in order.
    pub transitions: mpsc::Receiver<ConnectivityTransition>,
    pub task: JoinHandle<()>,
}

/// Spawn the probe loop.  The first probe runs immediately.
///
/// The loop ends when both the state watch and the transition receiver have
/// been dropped.
pub fn spawn_monitor(api: Arc<dyn ChatApi>, policy: HealthPolicy) -> MonitorHandle {
    let (state_tx, state_rx) = watch::channel(policy.initial_state);
    let (transition_tx, transition_rx) = mpsc::channel(16);

    let task = tokio::spawn(async move {
        let mut monitor = ConnectivityMonitor::new(policy.initial_state);
        info!(interval = ?policy.interval, "Connectivity monitor started");

        loop {
            let ok = match tokio::time::timeout(policy.probe_timeout, api.health()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!(error = %e, "Health probe failed");
                    false
                }
                Err(_) => {
                    debug!(timeout = ?policy.probe_timeout, "Health probe timed out");
                    false
                }
            };

            if let Some(transition) = monitor.record_probe(ok) {
                match transition {
                    ConnectivityTransition::Restored => info!("Connectivity restored"),
                    ConnectivityTransition::Lost => warn!("Connectivity lost"),
                }
                state_tx.send_replace(monitor.state());
                if transition_tx.send(transition).await.is_err() && state_tx.is_closed() {
                    break;
                }
            } else if state_tx.is_closed() && transition_tx.is_closed() {
                break;
            }

            tokio::time::sleep(monitor.next_delay(&policy)).await;
        }

        debug!("Connectivity monitor stopped");
    });

    MonitorHandle {
        state: state_rx,
        transitions: transition_rx,
        task,
    }
}
