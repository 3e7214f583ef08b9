/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Lock-protected actuator bookkeeping shared by both backends.
//!
//! Each backend keeps its hardware calls, state transition and observer
//! broadcast inside one [`ActuatorCore::lock`] acquisition, so a concurrent
//! `register_observer` can never slip between a state write and its
//! broadcast.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use super::{ActuatorId, ActuatorInfo, ActuatorState, HalCallbacks, StateObserver};

/// Everything guarded by the actuator lock.
pub struct CoreState {
    id: ActuatorId,
    pub info: ActuatorInfo,
    pub info_loaded: bool,
    pub callbacks: Option<Arc<dyn HalCallbacks>>,
    state: ActuatorState,
    amplitude: f32,
    observers: Vec<Arc<dyn StateObserver>>,
}

impl CoreState {
    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Write `new` and broadcast only if the Idle / active flag flipped.
    pub fn set_state(&mut self, new: ActuatorState) {
        let was_active = self.state.is_active();
        self.state = new;
        let active = new.is_active();
        self.amplitude = if active { -1.0 } else { 0.0 };
        if was_active != active {
            debug!(actuator = self.id, active, "actuator state flipped");
            for observer in &self.observers {
                observer.on_state_changed(self.id, active);
            }
        }
    }

    /// Amplitude is only tracked while the actuator is vibrating.
    pub fn record_amplitude(&mut self, amplitude: f32) {
        if self.state == ActuatorState::Vibrating {
            self.amplitude = amplitude;
        }
    }
}

/// State + observers + info of one actuator behind a single lock.
pub struct ActuatorCore {
    id: ActuatorId,
    inner: Mutex<CoreState>,
}

impl ActuatorCore {
    pub fn new(id: ActuatorId) -> Self {
        Self {
            id,
            inner: Mutex::new(CoreState {
                id,
                info: ActuatorInfo::new(id),
                info_loaded: false,
                callbacks: None,
                state: ActuatorState::Idle,
                amplitude: 0.0,
                observers: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> ActuatorId {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.inner.lock()
    }

    pub fn info(&self) -> ActuatorInfo {
        self.inner.lock().info.clone()
    }

    pub fn state(&self) -> ActuatorState {
        self.inner.lock().state
    }

    pub fn current_amplitude(&self) -> f32 {
        self.inner.lock().amplitude
    }

    pub fn callbacks(&self) -> Option<Arc<dyn HalCallbacks>> {
        self.inner.lock().callbacks.clone()
    }

    /// Register and deliver the current state atomically.
    pub fn register_observer(&self, observer: Arc<dyn StateObserver>) -> bool {
        let mut inner = self.inner.lock();
        if inner.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        observer.on_state_changed(self.id, inner.state.is_active());
        inner.observers.push(observer);
        true
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn StateObserver>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.observers.len();
        inner.observers.retain(|o| !Arc::ptr_eq(o, observer));
        inner.observers.len() != before
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<bool>>,
    }

    impl StateObserver for Recorder {
        fn on_state_changed(&self, _actuator: ActuatorId, active: bool) {
            self.seen.lock().push(active);
        }
    }

    #[test]
    fn registration_reports_current_state_immediately() {
        let core = ActuatorCore::new(1);
        let rec = Arc::new(Recorder::default());
        assert!(core.register_observer(rec.clone()));
        assert_eq!(*rec.seen.lock(), vec![false]);
        // duplicate registration is refused
        assert!(!core.register_observer(rec.clone()));
        assert_eq!(rec.seen.lock().len(), 1);
    }

    #[test]
    fn only_idle_active_flips_are_broadcast() {
        let core = ActuatorCore::new(1);
        let rec = Arc::new(Recorder::default());
        core.register_observer(rec.clone());

        core.lock().set_state(ActuatorState::Vibrating);
        core.lock().set_state(ActuatorState::Vibrating);
        core.lock().set_state(ActuatorState::UnderExternalControl);
        core.lock().set_state(ActuatorState::Idle);
        core.lock().set_state(ActuatorState::Idle);

        assert_eq!(*rec.seen.lock(), vec![false, true, false]);
    }

    #[test]
    fn amplitude_follows_state() {
        let core = ActuatorCore::new(1);
        core.lock().record_amplitude(0.5);
        assert_eq!(core.current_amplitude(), 0.0, "ignored while idle");

        core.lock().set_state(ActuatorState::Vibrating);
        assert_eq!(core.current_amplitude(), -1.0);
        core.lock().record_amplitude(0.5);
        assert_eq!(core.current_amplitude(), 0.5);

        core.lock().set_state(ActuatorState::Idle);
        assert_eq!(core.current_amplitude(), 0.0);
    }

    #[test]
    fn unregistered_observer_stops_hearing() {
        let core = ActuatorCore::new(1);
        let rec = Arc::new(Recorder::default());
        let as_dyn: Arc<dyn StateObserver> = rec.clone();
        core.register_observer(as_dyn.clone());
        assert!(core.unregister_observer(&as_dyn));
        assert!(!core.unregister_observer(&as_dyn));
        core.lock().set_state(ActuatorState::Vibrating);
        assert_eq!(*rec.seen.lock(), vec![false]);
    }
}
