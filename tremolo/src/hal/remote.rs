/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Backend over a capability-negotiated remote HAL.
//!
//! Completion callbacks are real when the actuator advertises them: the
//! remote end invokes the [`HalCompletion`] it was handed, which reports
//! `(actuator, vibration, step)` through the native bridge. `on` and
//! `perform` fall back to a deferred timer when the matching callback
//! capability is missing. Compositions, PWLEs and vendor effects always carry
//! a callback.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::bridge::{completion_for, post_delayed};
use super::state::{ActuatorCore, CoreState};
use super::{
    drive_result, ActuatorControl, ActuatorId, ActuatorInfo, ActuatorState, Capabilities, HalCallbacks, HalError,
    StateObserver, StepId, VibrationId, INDEFINITE,
};
use crate::effect::{EffectId, EffectStrength, PrebakedSegment, PrimitiveSegment, PwlePoint, RampSegment, VendorEffect};

/// One-shot completion handed to the remote end.
pub type HalCompletion = Box<dyn FnOnce() + Send + 'static>;

// ── Remote interface ──────────────────────────────────────────────────────────

/// Remote vibrator interface. Every call is a single request/response round
/// trip; nothing blocks on the vibration itself.
pub trait RemoteVibrator: Send + Sync {
    fn get_info(&self, id: ActuatorId) -> Result<ActuatorInfo, HalError>;
    fn on(&self, millis: u64, callback: Option<HalCompletion>) -> Result<(), HalError>;
    fn off(&self) -> Result<(), HalError>;
    fn set_amplitude(&self, amplitude: f32) -> Result<(), HalError>;
    fn set_external_control(&self, enabled: bool) -> Result<(), HalError>;
    /// Returns the effect duration in ms, `0` when the id is unsupported.
    fn perform(
        &self,
        effect: EffectId,
        strength: EffectStrength,
        callback: Option<HalCompletion>,
    ) -> Result<u64, HalError>;
    fn compose(&self, primitives: &[PrimitiveSegment], callback: HalCompletion) -> Result<(), HalError>;
    fn compose_pwle(&self, ramps: &[RampSegment], callback: HalCompletion) -> Result<(), HalError>;
    fn compose_pwle_v2(&self, points: &[PwlePoint], callback: HalCompletion) -> Result<(), HalError>;
    fn perform_vendor_effect(&self, effect: &VendorEffect, callback: HalCompletion) -> Result<(), HalError>;
    fn always_on_enable(&self, slot: i32, effect: EffectId, strength: EffectStrength) -> Result<(), HalError>;
    fn always_on_disable(&self, slot: i32) -> Result<(), HalError>;
}

// ── RemoteActuator ────────────────────────────────────────────────────────────

pub struct RemoteActuator {
    core: ActuatorCore,
    hal: Arc<dyn RemoteVibrator>,
}

impl RemoteActuator {
    pub fn new(id: ActuatorId, hal: Arc<dyn RemoteVibrator>) -> Self {
        Self {
            core: ActuatorCore::new(id),
            hal,
        }
    }

    fn load_info(&self) -> bool {
        let id = self.core.id();
        match self.hal.get_info(id) {
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

    fn completion(&self, inner: &CoreState, vibration: VibrationId, step: StepId) -> Option<HalCompletion> {
        match inner.callbacks.clone() {
            Some(callbacks) => Some(Box::new(completion_for(callbacks, self.core.id(), vibration, step))),
            None => {
                warn!(actuator = self.core.id(), "no callbacks attached, completion will be missed");
                None
            }
        }
    }

    /// Completion that must always be handed over: a no-op when no callbacks
    /// are attached.
    fn required_completion(&self, inner: &CoreState, vibration: VibrationId, step: StepId) -> HalCompletion {
        self.completion(inner, vibration, step).unwrap_or_else(|| Box::new(|| {}))
    }

    fn failed(&self, what: &str, e: &HalError) -> i64 {
        error!(actuator = self.core.id(), error = %e, "{} failed", what);
        e.drive_code()
    }

    /// Hand `callback` to the remote end when supported, else arm a timer.
    fn split_callback(
        &self,
        inner: &CoreState,
        has_callback: bool,
        vibration: VibrationId,
        step: StepId,
    ) -> (Option<HalCompletion>, Option<HalCompletion>) {
        let completion = self.completion(inner, vibration, step);
        if has_callback {
            (completion, None)
        } else {
            (None, completion)
        }
    }
}

fn composition_duration(info: &ActuatorInfo, primitives: &[PrimitiveSegment]) -> u64 {
    primitives
        .iter()
        .map(|p| info.primitive_duration_ms(p.primitive) + u64::from(p.delay_ms))
        .sum()
}

impl ActuatorControl for RemoteActuator {
    fn id(&self) -> ActuatorId {
        self.core.id()
    }

    fn init(&self, callbacks: Arc<dyn HalCallbacks>) {
        self.core.lock().callbacks = Some(callbacks);
        if !self.load_info() {
            warn!(actuator = self.core.id(), "init could not load actuator info, running degraded");
        }
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
        let has_callback = inner.info.has_capability(Capabilities::ON_CALLBACK);
        let (callback, deferred) = self.split_callback(&inner, has_callback, vibration, step);
        match self.hal.on(millis, callback) {
            Ok(()) => {
                inner.set_state(ActuatorState::Vibrating);
                if let Some(deferred) = deferred {
                    post_delayed(Duration::from_millis(millis), deferred);
                }
                drive_result(millis)
            }
            Err(e) => self.failed("on", &e),
        }
    }

    fn drive_prebaked(&self, vibration: VibrationId, step: StepId, prebaked: &PrebakedSegment) -> i64 {
        let mut inner = self.core.lock();
        let has_callback = inner.info.has_capability(Capabilities::PERFORM_CALLBACK);
        let (callback, deferred) = self.split_callback(&inner, has_callback, vibration, step);
        match self.hal.perform(prebaked.effect_id, prebaked.strength, callback) {
            Ok(0) => 0,
            Ok(duration) => {
                inner.set_state(ActuatorState::Vibrating);
                if let Some(deferred) = deferred {
                    post_delayed(Duration::from_millis(duration), deferred);
                }
                drive_result(duration)
            }
            Err(e) => self.failed("perform", &e),
        }
    }

    fn drive_composition(&self, vibration: VibrationId, step: StepId, primitives: &[PrimitiveSegment]) -> i64 {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::COMPOSE_EFFECTS) {
            return 0;
        }
        let duration = composition_duration(&inner.info, primitives);
        if duration == 0 {
            return 0;
        }
        let callback = self.required_completion(&inner, vibration, step);
        match self.hal.compose(primitives, callback) {
            Ok(()) => {
                inner.set_state(ActuatorState::Vibrating);
                drive_result(duration)
            }
            Err(e) => self.failed("compose", &e),
        }
    }

    fn drive_ramps(&self, vibration: VibrationId, step: StepId, ramps: &[RampSegment]) -> i64 {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS) {
            return 0;
        }
        let duration: u64 = ramps.iter().map(|r| r.duration_ms).sum();
        if duration == 0 {
            return 0;
        }
        let callback = self.required_completion(&inner, vibration, step);
        match self.hal.compose_pwle(ramps, callback) {
            Ok(()) => {
                inner.set_state(ActuatorState::Vibrating);
                drive_result(duration)
            }
            Err(e) => self.failed("compose_pwle", &e),
        }
    }

    fn drive_piecewise_waveform(&self, vibration: VibrationId, step: StepId, points: &[PwlePoint]) -> i64 {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS_V2) {
            return 0;
        }
        let duration: u64 = points.iter().map(|p| p.time_ms).sum();
        if duration == 0 {
            return 0;
        }
        let callback = self.required_completion(&inner, vibration, step);
        match self.hal.compose_pwle_v2(points, callback) {
            Ok(()) => {
                inner.set_state(ActuatorState::Vibrating);
                drive_result(duration)
            }
            Err(e) => self.failed("compose_pwle_v2", &e),
        }
    }

    fn drive_vendor_effect(&self, vibration: VibrationId, step: StepId, effect: &VendorEffect) -> i64 {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::PERFORM_VENDOR_EFFECTS) {
            return 0;
        }
        let callback = self.required_completion(&inner, vibration, step);
        match self.hal.perform_vendor_effect(effect, callback) {
            Ok(()) => {
                inner.set_state(ActuatorState::Vibrating);
                INDEFINITE
            }
            Err(e) => self.failed("perform_vendor_effect", &e),
        }
    }

    fn stop(&self) {
        let mut inner = self.core.lock();
        if let Err(e) = self.hal.off() {
            error!(actuator = self.core.id(), error = %e, "off failed");
        }
        inner.set_state(ActuatorState::Idle);
    }

    fn set_external_control(&self, enabled: bool) -> bool {
        let mut inner = self.core.lock();
        if !inner.info.has_capability(Capabilities::EXTERNAL_CONTROL) {
            return false;
        }
        if let Err(e) = self.hal.set_external_control(enabled) {
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
        if !self.core.lock().info.has_capability(Capabilities::ALWAYS_ON_CONTROL) {
            return false;
        }
        let result = match effect {
            Some(p) => self.hal.always_on_enable(slot, p.effect_id, p.strength),
            None => self.hal.always_on_disable(slot),
        };
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
        match self.hal.set_amplitude(amplitude) {
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
    use crate::effect::{PrimitiveId, VendorEffect};
    use crate::hal::bridge::{HalEvent, NativeBridge};
    use crate::hal::sim::{HalCall, SimulatedActuator};

    fn remote(sim: &Arc<SimulatedActuator>) -> (RemoteActuator, Arc<NativeBridge>) {
        let actuator = RemoteActuator::new(sim.id(), sim.clone());
        let bridge = Arc::new(NativeBridge::new());
        actuator.init(bridge.clone());
        (actuator, bridge)
    }

    fn click(delay_ms: u32) -> PrimitiveSegment {
        PrimitiveSegment {
            primitive: PrimitiveId::CLICK,
            scale: 1.0,
            delay_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn on_callback_comes_from_the_hal_when_supported() {
        let sim = SimulatedActuator::builder(2)
            .capabilities(Capabilities::ON_CALLBACK)
            .latency_ms(5)
            .build();
        let (actuator, bridge) = remote(&sim);
        let mut rx = bridge.attach(1, 8);

        assert_eq!(actuator.drive_for_duration(1, 9, 100), 100);
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert!(rx.try_recv().is_err(), "hal latency delays the real callback");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            HalEvent::StepComplete {
                actuator: 2,
                vibration: 1,
                step: 9
            }
        );
        assert_eq!(sim.callbacks_handed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn on_without_callback_capability_uses_timer() {
        let sim = SimulatedActuator::builder(2).latency_ms(5).build();
        let (actuator, bridge) = remote(&sim);
        let mut rx = bridge.attach(1, 8);

        actuator.drive_for_duration(1, 3, 100);
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert!(rx.try_recv().is_ok(), "timer ignores hal latency");
        assert_eq!(sim.callbacks_handed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn composition_duration_sums_primitives_and_delays() {
        let sim = SimulatedActuator::builder(0)
            .capabilities(Capabilities::COMPOSE_EFFECTS)
            .primitive(PrimitiveId::CLICK, 12)
            .build();
        let (actuator, _bridge) = remote(&sim);
        assert_eq!(actuator.drive_composition(1, 1, &[click(0), click(30)]), 54);
        assert!(actuator.is_active());
        assert!(sim.calls().contains(&HalCall::Compose { actuator: 0, count: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_effect_is_indefinite() {
        let sim = SimulatedActuator::builder(0)
            .capabilities(Capabilities::PERFORM_VENDOR_EFFECTS)
            .build();
        let (actuator, _bridge) = remote(&sim);
        assert_eq!(actuator.drive_vendor_effect(1, 1, &VendorEffect::new(vec![1, 2])), INDEFINITE);

        let plain = SimulatedActuator::builder(1).build();
        let (actuator, _bridge) = remote(&plain);
        assert_eq!(actuator.drive_vendor_effect(1, 1, &VendorEffect::new(vec![1])), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_prebaked_is_zero_not_failure() {
        let sim = SimulatedActuator::builder(0).effect(EffectId::CLICK, 20).build();
        let (actuator, _bridge) = remote(&sim);
        let tick = PrebakedSegment {
            effect_id: EffectId::TICK,
            strength: EffectStrength::Medium,
            should_fallback: false,
        };
        assert_eq!(actuator.drive_prebaked(1, 1, &tick), 0);
        assert!(!actuator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_remote_is_a_failure_and_stop_still_goes_idle() {
        let sim = SimulatedActuator::builder(0).build();
        let (actuator, _bridge) = remote(&sim);
        assert_eq!(actuator.drive_for_duration(1, 1, 50), 50);
        sim.fail_drives(Some(HalError::DeadObject));
        assert_eq!(actuator.drive_for_duration(1, 2, 50), -1);
        actuator.stop();
        assert_eq!(actuator.state(), ActuatorState::Idle);
    }
}
