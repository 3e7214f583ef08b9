/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Step conductor: plays one combined vibration to its end.
//!
//! [`StepConductor::run`] owns the [`StepQueue`] of a single vibration. It is
//! the only code that calls `play`, `cancel` or `cancel_immediately` on a
//! step. Hardware callbacks and cancel requests reach it as messages.
//!
//! ```text
//!   HAL thread ──HalEvent──────┐
//!                              ▼
//!   caller ──CancelMode──► run loop ──pop_due──► Step::play ──► follow-up steps
//!                              │                                      │
//!                              └──────────── StepQueue ◄──────────────┘
//! ```
//!
//! # Step kinds
//!
//! | Step | Role |
//! |---|---|
//! | `StartCombined` | drives the first step of every actuator, group-synced when possible |
//! | `SetAmplitude` | amplitude hold; one on call per non-zero run |
//! | `PerformPrebaked` / `PerformVendor` | hardware effects |
//! | `ComposePrimitives` / `ComposePwle` / `ComposePwleV2` | batched compositions |
//! | `CompleteEffect` / `RampOff` / `TurnOff` | per-actuator cleanup |
//! | `Finish` | barrier; reports the vibrator off |
//!
//! # Design decisions
//!
//! | Topic | Choice |
//! |---|---|
//! | Clock | `tokio::time::Instant`, so tests run on a paused clock |
//! | Ties | equal start times run in insertion order |
//! | Barrier | `StartTime::AfterPending`, ordered after any concrete instant |
//! | Stale callbacks | matched by `(actuator, step id)` and dropped when nothing waits |

pub mod amplitude;
pub mod complete;
pub mod compose;
pub mod finish;
pub mod perform;
pub mod queue;
pub mod start;
pub mod step;

pub use queue::StepQueue;
pub use step::{OffDeadline, StartTime, Step, StepContext};

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::VibrationConfig;
use crate::effect::{CallerIdentity, CombinedVibration};
use crate::hal::bridge::{HalEvent, NativeBridge};
use crate::hal::manager::GroupController;
use crate::hal::VibrationId;
use start::StartCombinedStep;

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Telemetry sink; each is called at most once per vibration.
pub trait TelemetryHooks: Send + Sync {
    fn note_vibrator_on(&self, caller: &CallerIdentity, duration_ms: u64);
    fn note_vibrator_off(&self, caller: &CallerIdentity);
}

/// Everything a conductor needs from the service, injected at assembly.
#[derive(Clone)]
pub struct ConductorEnv {
    pub group: GroupController,
    pub bridge: Arc<NativeBridge>,
    pub config: Arc<VibrationConfig>,
    pub telemetry: Arc<dyn TelemetryHooks>,
}

impl ConductorEnv {
    pub fn new(
        group: GroupController,
        bridge: Arc<NativeBridge>,
        config: Arc<VibrationConfig>,
        telemetry: Arc<dyn TelemetryHooks>,
    ) -> Self {
        Self {
            group,
            bridge,
            config,
            telemetry,
        }
    }
}

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// Let every actuator ramp down and turn off through its cleanup steps.
    Graceful,
    /// Stop everything now.
    Immediate,
}

/// How a vibration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VibrationStatus {
    Finished,
    Cancelled,
    /// Nothing could be started.
    IgnoredUnsupported,
    Failed,
}

// ── StepConductor ─────────────────────────────────────────────────────────────

pub struct StepConductor {
    ctx: StepContext,
    queue: StepQueue,
    bridge: Arc<NativeBridge>,
    capacity: usize,
    cancelled: Option<CancelMode>,
}

impl StepConductor {
    pub fn new(vibration: VibrationId, combined: CombinedVibration, caller: CallerIdentity, env: ConductorEnv) -> Self {
        let capacity = env.config.callback_queue_capacity();
        let ctx = StepContext::new(vibration, caller, env.group, env.config, env.telemetry);
        let mut queue = StepQueue::new();
        queue.push(Box::new(StartCombinedStep::new(combined, Instant::now())));
        Self {
            ctx,
            queue,
            bridge: env.bridge,
            capacity,
            cancelled: None,
        }
    }

    pub fn vibration(&self) -> VibrationId {
        self.ctx.vibration()
    }

    /// Play until the queue drains.
    pub async fn run(mut self, mut cancels: mpsc::UnboundedReceiver<CancelMode>) -> VibrationStatus {
        let vibration = self.ctx.vibration();
        let mut events = self.bridge.attach(vibration, self.capacity);
        let mut cancels_open = true;
        let mut events_open = true;
        debug!(vibration, "conductor started");

        loop {
            while cancels_open {
                match cancels.try_recv() {
                    Ok(mode) => self.on_cancel(mode),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => cancels_open = false,
                }
            }
            while events_open {
                match events.try_recv() {
                    Ok(event) => self.on_event(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => events_open = false,
                }
            }

            let now = Instant::now();
            if let Some(step) = self.queue.pop_due(now) {
                self.play(step);
                continue;
            }
            if self.queue.is_empty() {
                break;
            }

            let wake = self.queue.next_wake();
            tokio::select! {
                biased;
                mode = cancels.recv(), if cancels_open => match mode {
                    Some(mode) => self.on_cancel(mode),
                    None => cancels_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_event(event),
                    None => events_open = false,
                },
                _ = sleep_until(wake.unwrap_or(now)), if wake.is_some() => {}
                else => {
                    warn!(vibration, pending = self.queue.len(), "nothing can wake the conductor, stopping");
                    self.on_cancel(CancelMode::Immediate);
                }
            }
        }

        self.bridge.detach(vibration);
        let status = self.status();
        info!(vibration, ?status, "vibration ended");
        status
    }

    fn play(&mut self, step: Box<dyn Step>) {
        debug!(vibration = self.ctx.vibration(), step = step.name(), actuator = ?step.actuator(), "play");
        let next = step.play(&mut self.ctx);
        self.queue.extend(next);
    }

    fn on_event(&mut self, event: HalEvent) {
        let now = Instant::now();
        match event {
            HalEvent::StepComplete { actuator, step, .. } => {
                if !self.queue.accept_completion(actuator, Some(step), now) {
                    debug!(vibration = self.ctx.vibration(), actuator, step, "ignoring stale callback");
                }
            }
            HalEvent::SyncedComplete { .. } => {
                let released = self.queue.accept_synced(now);
                debug!(vibration = self.ctx.vibration(), released, "synced group complete");
            }
        }
    }

    fn on_cancel(&mut self, mode: CancelMode) {
        if self.cancelled == Some(CancelMode::Immediate) {
            return;
        }
        debug!(vibration = self.ctx.vibration(), ?mode, "cancel");
        self.cancelled = Some(mode);
        match mode {
            CancelMode::Immediate => {
                for step in self.queue.drain_reversed() {
                    step.cancel_immediately(&mut self.ctx);
                }
            }
            CancelMode::Graceful => {
                for step in self.queue.drain_in_order() {
                    let cleanup = step.cancel(&mut self.ctx);
                    self.queue_cleanup(cleanup);
                }
            }
        }
    }

    /// Only cleanup steps may outlive a graceful cancel. Anything else a
    /// `cancel` hands back is stopped on the spot.
    fn queue_cleanup(&mut self, steps: Vec<Box<dyn Step>>) {
        for step in steps {
            if step.is_cleanup() {
                self.queue.push(step);
            } else {
                warn!(vibration = self.ctx.vibration(), step = step.name(), "non-cleanup step after cancel, stopping it");
                step.cancel_immediately(&mut self.ctx);
            }
        }
    }

    fn status(&self) -> VibrationStatus {
        match (self.cancelled, self.ctx.start_result()) {
            (_, Some(result)) if result < 0 => VibrationStatus::Failed,
            (Some(_), _) => VibrationStatus::Cancelled,
            (None, Some(result)) if result > 0 => VibrationStatus::Finished,
            (None, _) => VibrationStatus::IgnoredUnsupported,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::effect::{Amplitude, ComposedEffect, EffectId, PrimitiveId, PwleSegment, Segment, VendorEffect};
    use crate::hal::manager::{ActuatorFactory, ActuatorManager, DefaultActuatorManager};
    use crate::hal::remote::RemoteActuator;
    use crate::hal::sim::{HalCall, HalCallLog, HalLogEntry, SimulatedActuator, SimulatedActuatorBuilder, SimulatedManagerHal};
    use crate::hal::{ActuatorControl, ActuatorId, Capabilities, HalCallbacks, HalError, ManagerCapabilities};

    #[derive(Default)]
    struct Recorder {
        on: Mutex<Vec<u64>>,
        off: Mutex<u32>,
    }

    impl TelemetryHooks for Recorder {
        fn note_vibrator_on(&self, _caller: &CallerIdentity, duration_ms: u64) {
            self.on.lock().push(duration_ms);
        }

        fn note_vibrator_off(&self, _caller: &CallerIdentity) {
            *self.off.lock() += 1;
        }
    }

    struct Rig {
        log: Arc<HalCallLog>,
        manager_hal: Arc<SimulatedManagerHal>,
        sims: Vec<Arc<SimulatedActuator>>,
        bridge: Arc<NativeBridge>,
        telemetry: Arc<Recorder>,
        env: ConductorEnv,
    }

    const BASIC: Capabilities = Capabilities::ON_CALLBACK.union(Capabilities::AMPLITUDE_CONTROL);

    fn rig(manager_caps: ManagerCapabilities, config: VibrationConfig, builders: Vec<SimulatedActuatorBuilder>) -> Rig {
        let log = HalCallLog::new();
        let sims: Vec<Arc<SimulatedActuator>> = builders.into_iter().map(|b| b.log(log.clone()).build()).collect();
        let by_id: BTreeMap<ActuatorId, Arc<SimulatedActuator>> = sims.iter().map(|s| (s.id(), s.clone())).collect();
        let ids: Vec<ActuatorId> = sims.iter().map(|s| s.id()).collect();
        let manager_hal = SimulatedManagerHal::new(ids, manager_caps, log.clone());
        let factory: ActuatorFactory = Box::new(move |id: ActuatorId| -> Arc<dyn ActuatorControl> {
            let sim = by_id
                .get(&id)
                .cloned()
                .unwrap_or_else(|| SimulatedActuator::builder(id).build());
            Arc::new(RemoteActuator::new(id, sim))
        });
        let manager = Arc::new(DefaultActuatorManager::new(manager_hal.clone(), factory));
        let bridge = Arc::new(NativeBridge::new());
        manager.init(bridge.clone());
        log.clear();

        let telemetry = Arc::new(Recorder::default());
        let env = ConductorEnv::new(
            GroupController::new(manager),
            bridge.clone(),
            Arc::new(config),
            telemetry.clone(),
        );
        Rig {
            log,
            manager_hal,
            sims,
            bridge,
            telemetry,
            env,
        }
    }

    fn single(builder: SimulatedActuatorBuilder, config: VibrationConfig) -> Rig {
        rig(ManagerCapabilities::empty(), config, vec![builder])
    }

    fn ramp_config(ramp_down_ms: i64, ramp_step_ms: i64) -> VibrationConfig {
        VibrationConfig {
            ramp_down_duration_ms: ramp_down_ms,
            ramp_step_duration_ms: ramp_step_ms,
            ..VibrationConfig::default()
        }
    }

    fn waveform(timings: &[u64], amplitudes: &[f32], repeat: Option<usize>) -> CombinedVibration {
        let amplitudes: Vec<Amplitude> = amplitudes.iter().map(|&a| Amplitude::Level(a)).collect();
        CombinedVibration::mono(ComposedEffect::waveform(timings, &amplitudes, repeat))
    }

    fn conductor(rig: &Rig, combined: CombinedVibration) -> StepConductor {
        StepConductor::new(1, combined, CallerIdentity::new(1000, "com.example"), rig.env.clone())
    }

    async fn play_to_end(rig: &Rig, combined: CombinedVibration) -> VibrationStatus {
        let (_tx, rx) = mpsc::unbounded_channel();
        conductor(rig, combined).run(rx).await
    }

    fn entry(at_ms: u64, call: HalCall) -> HalLogEntry {
        HalLogEntry { at_ms, call }
    }

    fn on(actuator: ActuatorId, millis: u64) -> HalCall {
        HalCall::On { actuator, millis }
    }

    fn amp(actuator: ActuatorId, amplitude: f32) -> HalCall {
        HalCall::SetAmplitude { actuator, amplitude }
    }

    fn off(actuator: ActuatorId) -> HalCall {
        HalCall::Off { actuator }
    }

    fn click_group(manager_caps: ManagerCapabilities) -> Rig {
        let builders = (0..2)
            .map(|id| SimulatedActuator::builder(id).capabilities(BASIC).effect(EffectId::CLICK, 20))
            .collect();
        rig(manager_caps, VibrationConfig::default(), builders)
    }

    fn perform(actuator: ActuatorId) -> HalCall {
        HalCall::Perform {
            actuator,
            effect: EffectId::CLICK,
            strength: crate::effect::EffectStrength::Medium,
        }
    }

    // ── Single actuator ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn single_hold_turns_on_once_and_finishes() {
        let rig = single(SimulatedActuator::builder(0).capabilities(BASIC), VibrationConfig::default());
        let start = Instant::now();

        let status = play_to_end(&rig, waveform(&[200], &[1.0], None)).await;

        assert_eq!(status, VibrationStatus::Finished);
        assert_eq!(
            rig.log.entries(),
            vec![entry(0, on(0, 200)), entry(0, amp(0, 1.0)), entry(200, off(0))]
        );
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        assert_eq!(*rig.telemetry.on.lock(), vec![200]);
        assert_eq!(*rig.telemetry.off.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_amplitude_gaps_turn_off_and_keep_the_timeline() {
        let rig = single(SimulatedActuator::builder(0).capabilities(BASIC), VibrationConfig::default());

        let status = play_to_end(
            &rig,
            waveform(&[1000, 500, 2000, 1500, 2000], &[1.0, 0.0, 0.5, 0.0, 1.0], None),
        )
        .await;

        assert_eq!(status, VibrationStatus::Finished);
        assert_eq!(
            rig.log.entries(),
            vec![
                entry(0, on(0, 1000)),
                entry(0, amp(0, 1.0)),
                entry(1000, off(0)),
                entry(1500, on(0, 2000)),
                entry(1500, amp(0, 0.5)),
                entry(3500, off(0)),
                entry(5000, on(0, 2000)),
                entry(5000, amp(0, 1.0)),
                entry(7000, off(0)),
            ]
        );
        assert_eq!(*rig.telemetry.on.lock(), vec![7000]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_waveform_runs_until_cancelled() {
        let rig = single(SimulatedActuator::builder(0).capabilities(BASIC), VibrationConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(conductor(&rig, waveform(&[100, 100], &[1.0, 0.5], Some(0))).run(rx));

        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(CancelMode::Graceful).unwrap();
        let status = task.await.unwrap();

        assert_eq!(status, VibrationStatus::Cancelled);
        assert_eq!(
            rig.log.entries(),
            vec![
                entry(0, on(0, 5000)),
                entry(0, amp(0, 1.0)),
                entry(100, amp(0, 0.5)),
                entry(200, amp(0, 1.0)),
                entry(300, amp(0, 0.5)),
                entry(350, off(0)),
            ]
        );
        assert_eq!(*rig.telemetry.on.lock(), vec![u64::MAX]);
        assert_eq!(*rig.telemetry.off.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_cancel_ramps_down_in_steps() {
        let rig = single(SimulatedActuator::builder(0).capabilities(BASIC), ramp_config(20, 5));
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(conductor(&rig, waveform(&[1000], &[1.0], None)).run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(CancelMode::Graceful).unwrap();
        assert_eq!(task.await.unwrap(), VibrationStatus::Cancelled);

        assert_eq!(
            rig.log.entries(),
            vec![
                entry(0, on(0, 1020)),
                entry(0, amp(0, 1.0)),
                entry(100, amp(0, 0.75)),
                entry(105, amp(0, 0.5)),
                entry(110, amp(0, 0.25)),
                entry(120, off(0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_cancel_stops_at_once() {
        let rig = single(SimulatedActuator::builder(0).capabilities(BASIC), ramp_config(20, 5));
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(conductor(&rig, waveform(&[1000], &[1.0], None)).run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(CancelMode::Immediate).unwrap();
        assert_eq!(task.await.unwrap(), VibrationStatus::Cancelled);

        assert_eq!(
            rig.log.entries(),
            vec![entry(0, on(0, 1020)), entry(0, amp(0, 1.0)), entry(100, off(0))]
        );
        assert_eq!(*rig.telemetry.off.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_start_touches_nothing() {
        let rig = single(SimulatedActuator::builder(0).capabilities(BASIC), VibrationConfig::default());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(CancelMode::Graceful).unwrap();

        let status = conductor(&rig, waveform(&[100], &[1.0], None)).run(rx).await;

        assert_eq!(status, VibrationStatus::Cancelled);
        assert!(rig.log.calls().is_empty());
        assert!(rig.telemetry.on.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn early_stop_turns_the_actuator_back_on() {
        let rig = single(
            SimulatedActuator::builder(0).capabilities(BASIC).manual_completion(),
            VibrationConfig::default(),
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(conductor(&rig, waveform(&[100, 100], &[1.0, 0.5], None)).run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rig.sims[0].complete_now(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rig.sims[0].complete_now(), 1);
        assert_eq!(task.await.unwrap(), VibrationStatus::Finished);

        assert_eq!(
            rig.log.entries(),
            vec![
                entry(0, on(0, 200)),
                entry(0, amp(0, 1.0)),
                entry(50, on(0, 150)),
                entry(50, amp(0, 1.0)),
                entry(100, amp(0, 0.5)),
                entry(250, off(0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_callback_waits_for_the_extra_timeout() {
        let rig = single(
            SimulatedActuator::builder(0).capabilities(BASIC).manual_completion(),
            VibrationConfig::default(),
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(conductor(&rig, waveform(&[100], &[1.0], None)).run(rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        // Wrong step id: must not release anything.
        rig.bridge.on_actuator_step_complete(0, 1, 99);
        assert_eq!(task.await.unwrap(), VibrationStatus::Finished);

        assert_eq!(
            rig.log.entries(),
            vec![entry(0, on(0, 100)), entry(0, amp(0, 1.0)), entry(1100, off(0))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn primitives_are_batched_by_composition_size() {
        let builder = SimulatedActuator::builder(0)
            .capabilities(Capabilities::COMPOSE_EFFECTS)
            .primitive(PrimitiveId::CLICK, 10)
            .composition_size_max(2);
        let rig = single(builder, VibrationConfig::default());
        let clicks = vec![Segment::primitive(PrimitiveId::CLICK, 1.0, 0); 3];

        let status = play_to_end(&rig, CombinedVibration::mono(ComposedEffect::new(clicks, None))).await;

        assert_eq!(status, VibrationStatus::Finished);
        assert_eq!(
            rig.log.entries(),
            vec![
                entry(0, HalCall::Compose { actuator: 0, count: 2 }),
                entry(20, HalCall::Compose { actuator: 0, count: 1 }),
                entry(30, off(0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn envelope_segments_become_control_points() {
        let builder = SimulatedActuator::builder(0).capabilities(Capabilities::COMPOSE_PWLE_EFFECTS_V2);
        let rig = single(builder, VibrationConfig::default());
        let pwle = |start: f32, end: f32, duration_ms: u64| {
            Segment::Pwle(PwleSegment {
                start_amplitude: start,
                end_amplitude: end,
                start_frequency_hz: 120.0,
                end_frequency_hz: 160.0,
                duration_ms,
            })
        };
        let effect = ComposedEffect::new(vec![pwle(0.0, 1.0, 20), pwle(1.0, 0.0, 30)], None);

        let status = play_to_end(&rig, CombinedVibration::mono(effect)).await;

        assert_eq!(status, VibrationStatus::Finished);
        assert_eq!(
            rig.log.entries(),
            vec![
                entry(0, HalCall::ComposePwleV2 { actuator: 0, count: 3 }),
                entry(50, off(0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_effect_waits_for_its_callback() {
        let builder = SimulatedActuator::builder(0).capabilities(Capabilities::PERFORM_VENDOR_EFFECTS);
        let rig = single(builder, VibrationConfig::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(conductor(&rig, CombinedVibration::mono(VendorEffect::new(vec![7]))).run(rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rig.sims[0].complete_now(), 1);
        assert_eq!(task.await.unwrap(), VibrationStatus::Finished);

        assert_eq!(
            rig.log.entries(),
            vec![entry(0, HalCall::PerformVendor { actuator: 0 }), entry(500, off(0))]
        );
        assert_eq!(*rig.telemetry.on.lock(), vec![u64::MAX]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_effect_is_ignored_without_telemetry() {
        let builder = SimulatedActuator::builder(0).capabilities(BASIC).effect(EffectId::TICK, 10);
        let rig = single(builder, VibrationConfig::default());

        let status = play_to_end(&rig, CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false))).await;

        assert_eq!(status, VibrationStatus::IgnoredUnsupported);
        assert!(rig.telemetry.on.lock().is_empty());
        assert_eq!(*rig.telemetry.off.lock(), 0);
    }

    // ── Synchronized groups ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn two_actuators_start_through_the_synced_group() {
        let rig = click_group(ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_PERFORM);

        let mono = CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false));
        let status = play_to_end(&rig, mono).await;

        assert_eq!(status, VibrationStatus::Finished);
        let calls = rig.log.calls();
        assert_eq!(
            calls[..4],
            [
                HalCall::PrepareSynced { ids: vec![0, 1] },
                perform(0),
                perform(1),
                HalCall::TriggerSynced,
            ]
        );
        assert!(!calls.contains(&HalCall::CancelSynced));
        assert_eq!(*rig.telemetry.on.lock(), vec![20]);
        assert_eq!(*rig.telemetry.off.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_drive_unwinds_the_group() {
        let rig = click_group(ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_PERFORM);
        rig.sims[1].fail_drives(Some(HalError::failed("driver fault")));

        let mono = CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false));
        let status = play_to_end(&rig, mono).await;

        assert_eq!(status, VibrationStatus::Failed);
        assert_eq!(
            rig.log.calls(),
            vec![
                HalCall::PrepareSynced { ids: vec![0, 1] },
                perform(0),
                perform(1),
                off(0),
                HalCall::CancelSynced,
            ]
        );
        assert!(rig.telemetry.on.lock().is_empty());
        assert_eq!(*rig.telemetry.off.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trigger_cancels_the_group_but_keeps_the_barrier() {
        let rig = click_group(ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_PERFORM);
        rig.manager_hal.fail_trigger(true);

        let mono = CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false));
        let status = play_to_end(&rig, mono).await;

        assert_eq!(status, VibrationStatus::Finished);
        let calls = rig.log.calls();
        assert_eq!(
            calls[..5],
            [
                HalCall::PrepareSynced { ids: vec![0, 1] },
                perform(0),
                perform(1),
                HalCall::TriggerSynced,
                HalCall::CancelSynced,
            ]
        );
        assert!(calls.contains(&off(0)) && calls.contains(&off(1)));
        assert_eq!(*rig.telemetry.on.lock(), vec![20]);
        assert_eq!(*rig.telemetry.off.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_prepare_falls_back_to_separate_starts() {
        let rig = click_group(ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_PERFORM);
        rig.manager_hal.fail_prepare(true);

        let mono = CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false));
        assert_eq!(play_to_end(&rig, mono).await, VibrationStatus::Finished);

        let calls = rig.log.calls();
        assert_eq!(
            calls[..3],
            [HalCall::PrepareSynced { ids: vec![0, 1] }, perform(0), perform(1)]
        );
        assert!(!calls
            .iter()
            .any(|c| matches!(c, HalCall::TriggerSynced | HalCall::CancelSynced)));
        assert_eq!(*rig.telemetry.on.lock(), vec![20]);
        assert_eq!(*rig.telemetry.off.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_prepare_capability_starts_actuators_one_by_one() {
        let rig = click_group(ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_ON);

        let mono = CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false));
        assert_eq!(play_to_end(&rig, mono).await, VibrationStatus::Finished);

        let calls = rig.log.calls();
        assert_eq!(calls[..2], [perform(0), perform(1)]);
        assert!(!calls.iter().any(|c| matches!(c, HalCall::PrepareSynced { .. } | HalCall::TriggerSynced)));
    }

    #[tokio::test(start_paused = true)]
    async fn synced_completion_releases_every_actuator() {
        let builders = (0..2)
            .map(|id| {
                SimulatedActuator::builder(id)
                    .capabilities(BASIC | Capabilities::PERFORM_CALLBACK)
                    .effect(EffectId::CLICK, 20)
                    .manual_completion()
            })
            .collect();
        let caps = ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_PERFORM | ManagerCapabilities::TRIGGER_CALLBACK;
        let rig = rig(caps, VibrationConfig::default(), builders);
        let (_tx, rx) = mpsc::unbounded_channel();
        let mono = CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false));
        let task = tokio::spawn(conductor(&rig, mono).run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rig.manager_hal.complete_synced());
        assert_eq!(task.await.unwrap(), VibrationStatus::Finished);

        let offs: Vec<HalLogEntry> = rig
            .log
            .entries()
            .into_iter()
            .filter(|e| matches!(e.call, HalCall::Off { .. }))
            .collect();
        assert_eq!(offs, vec![entry(50, off(0)), entry(50, off(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn stereo_plays_distinct_effects() {
        let builders = (0..2).map(|id| SimulatedActuator::builder(id).capabilities(BASIC)).collect();
        let rig = rig(ManagerCapabilities::empty(), VibrationConfig::default(), builders);
        let stereo = CombinedVibration::stereo()
            .with_actuator(1, ComposedEffect::new(vec![Segment::step(0.5, 40)], None))
            .with_actuator(0, ComposedEffect::new(vec![Segment::step(1.0, 80)], None));

        assert_eq!(play_to_end(&rig, stereo).await, VibrationStatus::Finished);

        let entries = rig.log.entries();
        assert_eq!(entries[0], entry(0, on(1, 40)));
        assert_eq!(entries[2], entry(0, on(0, 80)));
        assert!(entries.contains(&entry(40, off(1))));
        assert!(entries.contains(&entry(80, off(0))));
        assert_eq!(*rig.telemetry.on.lock(), vec![80]);
    }

    // ── Cancel contract ───────────────────────────────────────────────────────

    struct Marker {
        cleanup: bool,
        stopped: Arc<AtomicBool>,
    }

    impl Step for Marker {
        fn name(&self) -> &'static str {
            "Marker"
        }

        fn start_time(&self) -> StartTime {
            StartTime::WhenComplete
        }

        fn is_cleanup(&self) -> bool {
            self.cleanup
        }

        fn play(self: Box<Self>, _ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
            Vec::new()
        }

        fn cancel(self: Box<Self>, _ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
            Vec::new()
        }

        fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Hands back its children when cancelled.
    struct Parent(Vec<Box<dyn Step>>);

    impl Step for Parent {
        fn name(&self) -> &'static str {
            "Parent"
        }

        fn start_time(&self) -> StartTime {
            StartTime::WhenComplete
        }

        fn play(self: Box<Self>, _ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
            Vec::new()
        }

        fn cancel(self: Box<Self>, _ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
            self.0
        }

        fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {}
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_cancel_keeps_only_cleanup_steps() {
        let rig = single(SimulatedActuator::builder(0).capabilities(BASIC), VibrationConfig::default());
        let mut c = conductor(&rig, waveform(&[100], &[1.0], None));
        let kept = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        c.queue.push(Box::new(Parent(vec![
            Box::new(Marker {
                cleanup: true,
                stopped: kept.clone(),
            }),
            Box::new(Marker {
                cleanup: false,
                stopped: dropped.clone(),
            }),
        ])));

        c.on_cancel(CancelMode::Graceful);

        assert_eq!(c.queue.len(), 1);
        assert!(!kept.load(Ordering::SeqCst));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(rig.log.calls().is_empty());
    }
}
