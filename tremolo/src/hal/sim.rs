/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-process simulated hardware.
//!
//! [`SimulatedActuator`] speaks both raw interfaces ([`LegacyDriver`] and
//! [`RemoteVibrator`]), so either backend can be exercised against the same
//! description. [`SimulatedManagerHal`] covers the manager interface. Every
//! call lands in a shared [`HalCallLog`] with its timestamp on the tokio
//! clock, which makes paused-time tests deterministic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::bridge::post_delayed;
use super::legacy::LegacyDriver;
use super::manager::{HalSession, ManagerHal};
use super::remote::{HalCompletion, RemoteVibrator};
use super::{ActuatorId, ActuatorInfo, Capabilities, FrequencyProfile, HalError, ManagerCapabilities};
use crate::config::ActuatorConfig;
use crate::effect::{EffectId, EffectStrength, PrimitiveId, PrimitiveSegment, PwlePoint, RampSegment, VendorEffect};

// ── Call log ──────────────────────────────────────────────────────────────────

/// One recorded hardware call.
#[derive(Debug, Clone, PartialEq)]
pub enum HalCall {
    On { actuator: ActuatorId, millis: u64 },
    Off { actuator: ActuatorId },
    SetAmplitude { actuator: ActuatorId, amplitude: f32 },
    SetExternalControl { actuator: ActuatorId, enabled: bool },
    Perform { actuator: ActuatorId, effect: EffectId, strength: EffectStrength },
    Compose { actuator: ActuatorId, count: usize },
    ComposePwle { actuator: ActuatorId, count: usize },
    ComposePwleV2 { actuator: ActuatorId, count: usize },
    PerformVendor { actuator: ActuatorId },
    AlwaysOn { actuator: ActuatorId, slot: i32, enabled: bool },
    PrepareSynced { ids: Vec<ActuatorId> },
    TriggerSynced,
    CancelSynced,
    StartSession { ids: Vec<ActuatorId> },
    EndSession { abort: bool },
    ClearSessions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HalLogEntry {
    /// Milliseconds since the log was created.
    pub at_ms: u64,
    pub call: HalCall,
}

/// Timestamped, append-only record of hardware calls.
pub struct HalCallLog {
    origin: Instant,
    entries: Mutex<Vec<HalLogEntry>>,
}

impl HalCallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn record(&self, call: HalCall) {
        let at_ms = self.origin.elapsed().as_millis() as u64;
        self.entries.lock().push(HalLogEntry { at_ms, call });
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.entries.lock().iter().map(|e| e.call.clone()).collect()
    }

    pub fn entries(&self) -> Vec<HalLogEntry> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ── SimulatedActuator ─────────────────────────────────────────────────────────

pub struct SimulatedActuatorBuilder {
    info: ActuatorInfo,
    latency: Duration,
    info_failures: u32,
    manual_completion: bool,
    log: Option<Arc<HalCallLog>>,
}

impl SimulatedActuatorBuilder {
    /// Replace the whole description, keeping nothing set before.
    pub fn info(mut self, info: ActuatorInfo) -> Self {
        self.info = info;
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    pub fn effect(mut self, effect: EffectId, duration_ms: u64) -> Self {
        self.info
            .supported_effects
            .get_or_insert_with(BTreeMap::new)
            .insert(effect, duration_ms);
        self
    }

    pub fn primitive(mut self, primitive: PrimitiveId, duration_ms: u64) -> Self {
        self.info.supported_primitives.insert(primitive, duration_ms);
        self
    }

    pub fn frequency(mut self, profile: FrequencyProfile) -> Self {
        self.info.frequency_profile = profile;
        self
    }

    pub fn composition_size_max(mut self, max: usize) -> Self {
        self.info.composition_size_max = max;
        self
    }

    pub fn pwle_size_max(mut self, max: usize) -> Self {
        self.info.pwle_size_max = max;
        self
    }

    pub fn pwle_primitive_duration_max_ms(mut self, max: u64) -> Self {
        self.info.pwle_primitive_duration_max_ms = max;
        self
    }

    pub fn max_envelope_effect_size(mut self, max: usize) -> Self {
        self.info.max_envelope_effect_size = max;
        self
    }

    /// Extra delay before a hardware callback fires.
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency = Duration::from_millis(ms);
        self
    }

    /// Number of info loads that fail before one succeeds.
    pub fn failing_info_loads(mut self, count: u32) -> Self {
        self.info_failures = count;
        self
    }

    /// Hold hardware callbacks until [`SimulatedActuator::complete_now`].
    pub fn manual_completion(mut self) -> Self {
        self.manual_completion = true;
        self
    }

    pub fn log(mut self, log: Arc<HalCallLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Arc<SimulatedActuator> {
        Arc::new(SimulatedActuator {
            info: self.info,
            latency: self.latency,
            info_failures_left: AtomicU32::new(self.info_failures),
            info_attempts: AtomicU32::new(0),
            manual_completion: self.manual_completion,
            held: Mutex::new(Vec::new()),
            callbacks_handed: AtomicU32::new(0),
            failure: Mutex::new(None),
            log: self.log.unwrap_or_else(HalCallLog::new),
        })
    }
}

/// Simulated motor driven through either raw interface.
pub struct SimulatedActuator {
    info: ActuatorInfo,
    latency: Duration,
    info_failures_left: AtomicU32,
    info_attempts: AtomicU32,
    manual_completion: bool,
    held: Mutex<Vec<HalCompletion>>,
    callbacks_handed: AtomicU32,
    failure: Mutex<Option<HalError>>,
    log: Arc<HalCallLog>,
}

impl SimulatedActuator {
    pub fn builder(id: ActuatorId) -> SimulatedActuatorBuilder {
        SimulatedActuatorBuilder {
            info: ActuatorInfo::new(id),
            latency: Duration::ZERO,
            info_failures: 0,
            manual_completion: false,
            log: None,
        }
    }

    /// Start from a configured description instead of degraded info.
    pub fn from_config(config: &ActuatorConfig) -> SimulatedActuatorBuilder {
        Self::builder(config.info.id).info(config.info.clone()).latency_ms(config.hal_latency_ms)
    }

    pub fn id(&self) -> ActuatorId {
        self.info.id
    }

    pub fn log(&self) -> &Arc<HalCallLog> {
        &self.log
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.log.calls()
    }

    /// Make every drive call fail with `failure` until cleared with `None`.
    pub fn fail_drives(&self, failure: Option<HalError>) {
        *self.failure.lock() = failure;
    }

    pub fn info_load_attempts(&self) -> u32 {
        self.info_attempts.load(Ordering::SeqCst)
    }

    /// Hardware callbacks received from the remote backend so far.
    pub fn callbacks_handed(&self) -> u32 {
        self.callbacks_handed.load(Ordering::SeqCst)
    }

    /// Fire every held callback now, as if the motor stopped by itself.
    pub fn complete_now(&self) -> usize {
        let held: Vec<_> = std::mem::take(&mut *self.held.lock());
        let count = held.len();
        for callback in held {
            callback();
        }
        count
    }

    fn check_failure(&self) -> Result<(), HalError> {
        match self.failure.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn load(&self) -> Result<ActuatorInfo, HalError> {
        self.info_attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.info_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.info_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(HalError::failed("info not ready"));
        }
        Ok(self.info.clone())
    }

    fn effect_duration(&self, effect: EffectId) -> u64 {
        self.info
            .supported_effects
            .as_ref()
            .and_then(|t| t.get(&effect).copied())
            .unwrap_or(0)
    }

    fn composition_duration(&self, primitives: &[PrimitiveSegment]) -> u64 {
        primitives
            .iter()
            .map(|p| self.info.primitive_duration_ms(p.primitive) + u64::from(p.delay_ms))
            .sum()
    }

    /// Schedule (or hold) a hardware callback for an effect of `duration_ms`.
    fn schedule(&self, duration_ms: Option<u64>, callback: HalCompletion) {
        self.callbacks_handed.fetch_add(1, Ordering::SeqCst);
        match duration_ms {
            Some(ms) if !self.manual_completion => {
                post_delayed(Duration::from_millis(ms) + self.latency, callback);
            }
            _ => self.held.lock().push(callback),
        }
    }
}

impl LegacyDriver for SimulatedActuator {
    fn load_info(&self, _id: ActuatorId) -> Result<ActuatorInfo, HalError> {
        self.load()
    }

    fn on(&self, millis: u64) -> Result<(), HalError> {
        self.log.record(HalCall::On {
            actuator: self.id(),
            millis,
        });
        self.check_failure()
    }

    fn off(&self) -> Result<(), HalError> {
        self.log.record(HalCall::Off { actuator: self.id() });
        Ok(())
    }

    fn set_amplitude(&self, amplitude: f32) -> Result<(), HalError> {
        self.log.record(HalCall::SetAmplitude {
            actuator: self.id(),
            amplitude,
        });
        Ok(())
    }

    fn set_external_control(&self, enabled: bool) -> Result<(), HalError> {
        self.log.record(HalCall::SetExternalControl {
            actuator: self.id(),
            enabled,
        });
        Ok(())
    }

    fn perform_effect(&self, effect: EffectId, strength: EffectStrength) -> Result<u64, HalError> {
        self.log.record(HalCall::Perform {
            actuator: self.id(),
            effect,
            strength,
        });
        self.check_failure()?;
        Ok(self.effect_duration(effect))
    }

    fn compose(&self, primitives: &[PrimitiveSegment]) -> Result<u64, HalError> {
        self.log.record(HalCall::Compose {
            actuator: self.id(),
            count: primitives.len(),
        });
        self.check_failure()?;
        Ok(self.composition_duration(primitives))
    }

    fn compose_pwle(&self, ramps: &[RampSegment]) -> Result<u64, HalError> {
        self.log.record(HalCall::ComposePwle {
            actuator: self.id(),
            count: ramps.len(),
        });
        self.check_failure()?;
        Ok(ramps.iter().map(|r| r.duration_ms).sum())
    }

    fn always_on_enable(&self, slot: i32, _effect: EffectId, _strength: EffectStrength) -> Result<(), HalError> {
        self.log.record(HalCall::AlwaysOn {
            actuator: self.id(),
            slot,
            enabled: true,
        });
        Ok(())
    }

    fn always_on_disable(&self, slot: i32) -> Result<(), HalError> {
        self.log.record(HalCall::AlwaysOn {
            actuator: self.id(),
            slot,
            enabled: false,
        });
        Ok(())
    }
}

impl RemoteVibrator for SimulatedActuator {
    fn get_info(&self, _id: ActuatorId) -> Result<ActuatorInfo, HalError> {
        self.load()
    }

    fn on(&self, millis: u64, callback: Option<HalCompletion>) -> Result<(), HalError> {
        LegacyDriver::on(self, millis)?;
        if let Some(callback) = callback {
            self.schedule(Some(millis), callback);
        }
        Ok(())
    }

    fn off(&self) -> Result<(), HalError> {
        LegacyDriver::off(self)
    }

    fn set_amplitude(&self, amplitude: f32) -> Result<(), HalError> {
        LegacyDriver::set_amplitude(self, amplitude)
    }

    fn set_external_control(&self, enabled: bool) -> Result<(), HalError> {
        LegacyDriver::set_external_control(self, enabled)
    }

    fn perform(
        &self,
        effect: EffectId,
        strength: EffectStrength,
        callback: Option<HalCompletion>,
    ) -> Result<u64, HalError> {
        let duration = self.perform_effect(effect, strength)?;
        if let (Some(callback), true) = (callback, duration > 0) {
            self.schedule(Some(duration), callback);
        }
        Ok(duration)
    }

    fn compose(&self, primitives: &[PrimitiveSegment], callback: HalCompletion) -> Result<(), HalError> {
        let duration = LegacyDriver::compose(self, primitives)?;
        self.schedule(Some(duration), callback);
        Ok(())
    }

    fn compose_pwle(&self, ramps: &[RampSegment], callback: HalCompletion) -> Result<(), HalError> {
        let duration = LegacyDriver::compose_pwle(self, ramps)?;
        self.schedule(Some(duration), callback);
        Ok(())
    }

    fn compose_pwle_v2(&self, points: &[PwlePoint], callback: HalCompletion) -> Result<(), HalError> {
        self.log.record(HalCall::ComposePwleV2 {
            actuator: self.id(),
            count: points.len(),
        });
        self.check_failure()?;
        self.schedule(Some(points.iter().map(|p| p.time_ms).sum()), callback);
        Ok(())
    }

    fn perform_vendor_effect(&self, _effect: &VendorEffect, callback: HalCompletion) -> Result<(), HalError> {
        self.log.record(HalCall::PerformVendor { actuator: self.id() });
        self.check_failure()?;
        // Only the vendor knows when this ends.
        self.schedule(None, callback);
        Ok(())
    }

    fn always_on_enable(&self, slot: i32, effect: EffectId, strength: EffectStrength) -> Result<(), HalError> {
        LegacyDriver::always_on_enable(self, slot, effect, strength)
    }

    fn always_on_disable(&self, slot: i32) -> Result<(), HalError> {
        LegacyDriver::always_on_disable(self, slot)
    }
}

// ── SimulatedManagerHal ───────────────────────────────────────────────────────

struct SimSession {
    log: Arc<HalCallLog>,
    dead: Arc<AtomicBool>,
}

impl HalSession for SimSession {
    fn close(&self) -> Result<(), HalError> {
        self.end(false)
    }

    fn abort(&self) -> Result<(), HalError> {
        self.end(true)
    }
}

impl SimSession {
    fn end(&self, abort: bool) -> Result<(), HalError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(HalError::DeadObject);
        }
        self.log.record(HalCall::EndSession { abort });
        Ok(())
    }
}

/// Simulated manager HAL. Synced-group and session callbacks are held until
/// the test fires them.
pub struct SimulatedManagerHal {
    ids: Vec<ActuatorId>,
    capabilities: ManagerCapabilities,
    log: Arc<HalCallLog>,
    fail_prepare: AtomicBool,
    fail_trigger: AtomicBool,
    sessions_dead: Arc<AtomicBool>,
    synced_callback: Mutex<Option<HalCompletion>>,
    session_callbacks: Mutex<Vec<HalCompletion>>,
}

impl SimulatedManagerHal {
    pub fn new(ids: Vec<ActuatorId>, capabilities: ManagerCapabilities, log: Arc<HalCallLog>) -> Arc<Self> {
        Arc::new(Self {
            ids,
            capabilities,
            log,
            fail_prepare: AtomicBool::new(false),
            fail_trigger: AtomicBool::new(false),
            sessions_dead: Arc::new(AtomicBool::new(false)),
            synced_callback: Mutex::new(None),
            session_callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn fail_trigger(&self, fail: bool) {
        self.fail_trigger.store(fail, Ordering::SeqCst);
    }

    /// Fire the held synced-group callback, if any.
    pub fn complete_synced(&self) -> bool {
        let callback = self.synced_callback.lock().take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Fire every held session callback in start order.
    pub fn complete_sessions(&self) {
        let held: Vec<_> = std::mem::take(&mut *self.session_callbacks.lock());
        for callback in held {
            callback();
        }
    }

    /// Make every open session handle report a dead remote.
    pub fn kill_sessions(&self) {
        self.sessions_dead.store(true, Ordering::SeqCst);
    }
}

impl ManagerHal for SimulatedManagerHal {
    fn get_capabilities(&self) -> Result<ManagerCapabilities, HalError> {
        Ok(self.capabilities)
    }

    fn get_actuator_ids(&self) -> Result<Vec<ActuatorId>, HalError> {
        Ok(self.ids.clone())
    }

    fn prepare_synced(&self, ids: &[ActuatorId]) -> Result<(), HalError> {
        self.log.record(HalCall::PrepareSynced { ids: ids.to_vec() });
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(HalError::failed("prepare refused"));
        }
        Ok(())
    }

    fn trigger_synced(&self, callback: Option<HalCompletion>) -> Result<(), HalError> {
        self.log.record(HalCall::TriggerSynced);
        if self.fail_trigger.load(Ordering::SeqCst) {
            return Err(HalError::failed("trigger refused"));
        }
        *self.synced_callback.lock() = callback;
        Ok(())
    }

    fn cancel_synced(&self) -> Result<(), HalError> {
        self.log.record(HalCall::CancelSynced);
        self.synced_callback.lock().take();
        Ok(())
    }

    fn start_session(&self, ids: &[ActuatorId], callback: HalCompletion) -> Result<Arc<dyn HalSession>, HalError> {
        self.log.record(HalCall::StartSession { ids: ids.to_vec() });
        self.session_callbacks.lock().push(callback);
        Ok(Arc::new(SimSession {
            log: self.log.clone(),
            dead: self.sessions_dead.clone(),
        }))
    }

    fn clear_sessions(&self) -> Result<(), HalError> {
        self.log.record(HalCall::ClearSessions);
        self.session_callbacks.lock().clear();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
