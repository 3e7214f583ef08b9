/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Native callback bridge.
//!
//! Hardware completion callbacks arrive on arbitrary threads. The bridge turns
//! each one into a small correlation-tagged [`HalEvent`] and posts it into the
//! bounded channel of the conductor currently attached. It never touches step
//! or queue state.
//!
//! ```text
//! HAL thread ──on_actuator_step_complete──► NativeBridge ──try_send──► conductor
//!                                               │
//!                                               └──on_session_complete──► SessionObserver
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ActuatorId, HalCallbacks, ManagerCallbacks, SessionId, StepId, VibrationId};

// ── Events ────────────────────────────────────────────────────────────────────

/// Message posted from a hardware thread to the conductor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    StepComplete {
        actuator: ActuatorId,
        vibration: VibrationId,
        step: StepId,
    },
    SyncedComplete {
        vibration: VibrationId,
    },
}

/// Receives session completion notifications.
pub trait SessionObserver: Send + Sync {
    fn on_session_complete(&self, session: SessionId);
}

// ── NativeBridge ──────────────────────────────────────────────────────────────

struct Route {
    vibration: VibrationId,
    tx: mpsc::Sender<HalEvent>,
}

/// Routes hardware callbacks to the conductor of the active vibration.
#[derive(Default)]
pub struct NativeBridge {
    route: Mutex<Option<Route>>,
    session_observer: Mutex<Option<Arc<dyn SessionObserver>>>,
}

impl NativeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh bounded channel for `vibration`, replacing any previous
    /// route. Callbacks for other vibrations are dropped from now on.
    pub fn attach(&self, vibration: VibrationId, capacity: usize) -> mpsc::Receiver<HalEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.route.lock() = Some(Route { vibration, tx });
        rx
    }

    /// Remove the route if it still belongs to `vibration`.
    pub fn detach(&self, vibration: VibrationId) {
        let mut route = self.route.lock();
        if route.as_ref().is_some_and(|r| r.vibration == vibration) {
            *route = None;
        }
    }

    pub fn set_session_observer(&self, observer: Option<Arc<dyn SessionObserver>>) {
        *self.session_observer.lock() = observer;
    }

    fn post(&self, vibration: VibrationId, event: HalEvent) {
        let route = self.route.lock();
        let Some(route) = route.as_ref().filter(|r| r.vibration == vibration) else {
            debug!(vibration, ?event, "no conductor for callback, ignoring");
            return;
        };
        match route.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(vibration, ?event, "callback channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(vibration, "conductor already finished, ignoring callback");
            }
        }
    }
}

impl HalCallbacks for NativeBridge {
    fn on_actuator_step_complete(&self, actuator: ActuatorId, vibration: VibrationId, step: StepId) {
        self.post(
            vibration,
            HalEvent::StepComplete {
                actuator,
                vibration,
                step,
            },
        );
    }
}

impl ManagerCallbacks for NativeBridge {
    fn on_synced_group_complete(&self, vibration: VibrationId) {
        self.post(vibration, HalEvent::SyncedComplete { vibration });
    }

    fn on_session_complete(&self, session: SessionId) {
        let observer = self.session_observer.lock().clone();
        match observer {
            Some(observer) => observer.on_session_complete(session),
            None => debug!(session, "session complete with no observer"),
        }
    }
}

// ── Deferred completion ───────────────────────────────────────────────────────

/// Run `task` after `delay`.
///
/// Uses the tokio runtime of the calling thread when there is one (the
/// conductor thread always has one), otherwise a short-lived OS thread.
pub fn post_delayed(delay: Duration, task: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                task();
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                task();
            });
        }
    }
}

/// Completion closure for `(actuator, vibration, step)` that reports through
/// `callbacks`.
pub fn completion_for(
    callbacks: Arc<dyn HalCallbacks>,
    actuator: ActuatorId,
    vibration: VibrationId,
    step: StepId,
) -> impl FnOnce() + Send + 'static {
    move || callbacks.on_actuator_step_complete(actuator, vibration, step)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
