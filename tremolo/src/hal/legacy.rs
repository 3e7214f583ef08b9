/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Backend over a synchronous driver binding.
//!
//! The driver has no completion callbacks at all: every successful drive call
//! schedules a deferred timer that reports the completion through the native
//! bridge once the returned duration elapses.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::bridge::{completion_for, post_delayed};
use super::state::ActuatorCore;
use super::{
    drive_result, ActuatorControl, ActuatorId, ActuatorInfo, ActuatorState, Capabilities, HalCallbacks, HalError,
    StateObserver, StepId, VibrationId,
};
use crate::effect::{EffectId, EffectStrength, PrebakedSegment, PrimitiveSegment, PwlePoint, RampSegment, VendorEffect};

// ── Driver binding ────────────────────────────────────────────────────────────

/// Synchronous, register-level driver interface.
///
/// Every call returns promptly. Calls that start a vibration return the
/// duration the driver committed to.
pub trait LegacyDriver: Send + Sync {
    fn load_info(&self, id: ActuatorId) -> Result<ActuatorInfo, HalError>;
    fn on(&self, millis: u64) -> Result<(), HalError>;
    fn off(&self) -> Result<(), HalError>;
    fn set_amplitude(&self, amplitude: f32) -> Result<(), HalError>;
    fn set_external_control(&self, enabled: bool) -> Result<(), HalError>;
    fn perform_effect(&self, effect: EffectId, strength: EffectStrength) -> Result<u64, HalError>;
    fn compose(&self, primitives: &[PrimitiveSegment]) -> Result<u64, HalError>;
    fn compose_pwle(&self, ramps: &[RampSegment]) -> Result<u64, HalError>;
    fn always_on_enable(&self, slot: i32, effect: EffectId, strength: EffectStrength) -> Result<(), HalError>;
    fn always_on_disable(&self, slot: i32) -> Result<(), HalError>;
}

// ── LegacyActuator ────────────────────────────────────────────────────────────

pub struct LegacyActuator {
    core: ActuatorCore,
    driver: Arc<dyn LegacyDriver>,
}

impl LegacyActuator {
    pub fn new(id: ActuatorId, driver: Arc<dyn LegacyDriver>) -> Self {
        Self {
            core: ActuatorCore::new(id),
            driver,
        }
    }

    fn load_info(&self) -> bool {
        let id = self.core.id();
        match self.driver.load_info(id) {
            Ok(info) => {
                let mut inner = self.core.lock();
                inner.info = info;
                inner.info_loaded = true;
                true
            }
            Err(e) => {
                error!(actuator = id, error = %e, "failed to load actuator info");
                false
            }
        }
    }

    /// Shared tail of every drive call: flip state and arm the timer.
    fn on_started(
        &self,
        inner: &mut super::state::CoreState,
        vibration: VibrationId,
        step: StepId,
        duration_ms: u64,
    ) {
        inner.set_state(ActuatorState::Vibrating);
        match inner.callbacks.clone() {
            Some(callbacks) => post_delayed(
                Duration::from_millis(duration_ms),
                completion_for(callbacks, self.core.id(), vibration, step),
            ),
            None => warn!(actuator = self.core.id(), "no callbacks attached, completion will be missed"),
        }
    }

    fn drive_code(&self, what: &str, e: &HalError) -> i64 {
        error!(actuator = self.core.id(), error = %e, "{} failed", what);
        e.drive_code()
    }
}

impl ActuatorControl for LegacyActuator {
    fn id(&self) -> ActuatorId {
        self.core.id()
    }

    fn init(&self, callbacks: Arc<dyn HalCallbacks>) {
        self.core.lock().callbacks = Some(callbacks);
        if !self.load_info() {
            warn!(actuator = self.core.id(), "init could not load actuator info, running degraded");
        }
        // Reset the hardware in case this is a restart rather than a fresh boot.
        self.set_external_control(false);
        self.stop();
    }

    fn query_info(&self) -> bool {
        if self.core.lock().info_loaded {
            return true;
        }
        self.load_info()
    }

    fn info(&self) -> ActuatorInfo {
        self.core.info()
    }

    fn state(&self) -> ActuatorState {
        self.core.state()
    }

    fn current_amplitude(&self) -> f32 {
        self.core.current_amplitude()
    }

    fn register_observer(&self, observer: Arc<dyn StateObserver>) -> bool {
        self.core.register_observer(observer)
    }

    fn unregister_observer(&self, observer: &Arc<dyn StateObserver>) -> bool {
        self.core.unregister_observer(observer)
    }

    fn drive_for_duration(&self, vibration: VibrationId, step: StepId, millis: u64) -> i64 {
        let mut inner = self.core.lock();
        match self.driver.on(millis) {
            Ok(()) => {
                self.on_started(&mut inner, vibration, step, millis);
                drive_result(millis)
            }
            Err(e) => self.drive_code("on", &e),
        }
    }

    fn drive_prebaked(&self, vibration: VibrationId, step: StepId, prebaked: &PrebakedSegment) -> i64 {
        let mut inner = self.core.lock();
        match self.driver.perform_effect(prebaked.effect_id, prebaked.strength) {
            Ok(0) => 0,
            Ok(duration) => {
                self.on_started(&mut inner, vibration, step, duration);
                drive_result(duration)
            }
            Err(e) => self.drive_code("perform", &e),
        }
    }

    fn drive_composition(&self, vibration: VibrationId, step: StepId, primitives: &[PrimitiveSegment]) -> i64 {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::COMPOSE_EFFECTS) {
            return 0;
        }
        match self.driver.compose(primitives) {
            Ok(0) => 0,
            Ok(duration) => {
                self.on_started(&mut inner, vibration, step, duration);
                drive_result(duration)
            }
            Err(e) => self.drive_code("compose", &e),
        }
    }

    fn drive_ramps(&self, vibration: VibrationId, step: StepId, ramps: &[RampSegment]) -> i64 {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS) {
            return 0;
        }
        match self.driver.compose_pwle(ramps) {
            Ok(0) => 0,
            Ok(duration) => {
                self.on_started(&mut inner, vibration, step, duration);
                drive_result(duration)
            }
            Err(e) => self.drive_code("compose_pwle", &e),
        }
    }

    fn drive_piecewise_waveform(&self, _vibration: VibrationId, _step: StepId, _points: &[PwlePoint]) -> i64 {
        // Envelope effects did not exist in this driver generation.
        0
    }

    fn drive_vendor_effect(&self, _vibration: VibrationId, _step: StepId, _effect: &VendorEffect) -> i64 {
        0
    }

    fn stop(&self) {
        let mut inner = self.core.lock();
        if let Err(e) = self.driver.off() {
            error!(actuator = self.core.id(), error = %e, "off failed");
        }
        inner.set_state(ActuatorState::Idle);
    }

    fn set_external_control(&self, enabled: bool) -> bool {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::EXTERNAL_CONTROL) {
            return false;
        }
        if let Err(e) = self.driver.set_external_control(enabled) {
            error!(actuator = self.core.id(), error = %e, enabled, "set_external_control failed");
        }
        inner.set_state(if enabled {
            ActuatorState::UnderExternalControl
        } else {
            ActuatorState::Idle
        });
        true
    }

    fn set_always_on(&self, slot: i32, effect: Option<&PrebakedSegment>) -> bool {
        let inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::ALWAYS_ON_CONTROL) {
            return false;
        }
        let result = match effect {
            Some(p) => self.driver.always_on_enable(slot, p.effect_id, p.strength),
            None => self.driver.always_on_disable(slot),
        };
        drop(inner);
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(actuator = self.core.id(), slot, error = %e, "always-on update failed");
                false
            }
        }
    }

    fn set_amplitude(&self, amplitude: f32) -> bool {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::AMPLITUDE_CONTROL) {
            return false;
        }
        match self.driver.set_amplitude(amplitude) {
            Ok(()) => {
                inner.record_amplitude(amplitude);
                true
            }
            Err(e) => {
                error!(actuator = self.core.id(), amplitude, error = %e, "set_amplitude failed");
                false
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectId, PrimitiveId, Segment};
    use crate::hal::bridge::{HalEvent, NativeBridge};
    use crate::hal::sim::{HalCall, SimulatedActuator};
    use crate::hal::INDEFINITE;

    fn actuator(caps: Capabilities) -> (Arc<SimulatedActuator>, LegacyActuator, Arc<NativeBridge>) {
        let sim = SimulatedActuator::builder(1)
            .capabilities(caps)
            .effect(EffectId::CLICK, 20)
            .primitive(PrimitiveId::CLICK, 12)
            .build();
        let legacy = LegacyActuator::new(1, sim.clone());
        let bridge = Arc::new(NativeBridge::new());
        legacy.init(bridge.clone());
        (sim, legacy, bridge)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_on_simulates_completion_after_duration() {
        let (sim, legacy, bridge) = actuator(Capabilities::empty());
        let mut rx = bridge.attach(10, 8);

        assert_eq!(legacy.drive_for_duration(10, 1, 200), 200);
        assert!(legacy.is_active());
        assert_eq!(legacy.current_amplitude(), -1.0);

        tokio::time::sleep(Duration::from_millis(199)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            HalEvent::StepComplete {
                actuator: 1,
                vibration: 10,
                step: 1
            }
        );
        assert!(sim.calls().contains(&HalCall::On { actuator: 1, millis: 200 }));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_duration_is_indefinite_not_a_failure() {
        let (_sim, legacy, _bridge) = actuator(Capabilities::empty());
        assert_eq!(legacy.drive_for_duration(1, 1, u64::MAX), INDEFINITE);
        assert!(legacy.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn driver_failure_reports_negative_and_stays_idle() {
        let (sim, legacy, _bridge) = actuator(Capabilities::empty());
        sim.fail_drives(Some(HalError::failed("bus error")));
        assert_eq!(legacy.drive_for_duration(1, 1, 100), -1);
        assert!(!legacy.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn composition_is_capability_gated() {
        let (_sim, legacy, _bridge) = actuator(Capabilities::empty());
        let click = match Segment::primitive(PrimitiveId::CLICK, 1.0, 0) {
            Segment::Primitive(p) => p,
            _ => unreachable!(),
        };
        assert_eq!(legacy.drive_composition(1, 1, &[click]), 0);

        let (_sim, legacy, _bridge) = actuator(Capabilities::COMPOSE_EFFECTS);
        assert_eq!(legacy.drive_composition(1, 1, &[click]), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn pwle_v2_and_vendor_are_never_supported() {
        let (_sim, legacy, _bridge) = actuator(Capabilities::all());
        assert_eq!(legacy.drive_piecewise_waveform(1, 1, &[]), 0);
        assert_eq!(legacy.drive_vendor_effect(1, 1, &VendorEffect::new(vec![])), 0);
    }

    #[test]
    fn amplitude_and_external_control_need_capabilities() {
        let (_sim, legacy, _bridge) = actuator(Capabilities::empty());
        assert!(!legacy.set_amplitude(0.5));
        assert!(!legacy.set_external_control(true));
        assert!(!legacy.set_always_on(1, None));

        let (_sim, legacy, _bridge) =
            actuator(Capabilities::AMPLITUDE_CONTROL | Capabilities::EXTERNAL_CONTROL);
        assert!(legacy.set_external_control(true));
        assert_eq!(legacy.state(), ActuatorState::UnderExternalControl);
        assert!(legacy.set_amplitude(0.5));
        assert_eq!(legacy.current_amplitude(), -1.0, "not vibrating: amplitude untouched");
        legacy.stop();
        assert_eq!(legacy.state(), ActuatorState::Idle);
    }

    #[test]
    fn info_load_is_retried_until_it_succeeds() {
        let sim = SimulatedActuator::builder(3)
            .capabilities(Capabilities::AMPLITUDE_CONTROL)
            .failing_info_loads(1)
            .build();
        let legacy = LegacyActuator::new(3, sim.clone());
        legacy.init(Arc::new(NativeBridge::new()));
        assert!(legacy.info().capabilities.is_empty(), "degraded until retry");
        assert!(legacy.query_info());
        assert!(legacy.info().has_capability(Capabilities::AMPLITUDE_CONTROL));
        assert!(legacy.query_info(), "already loaded");
        assert_eq!(sim.info_load_attempts(), 2);
    }
}
