/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Service assembly: request intake and the dedicated vibration thread.
//!
//! ```text
//! request_vibration ──scale──► adapt/validate ──► Job ──► vibration thread
//!        │                      (per actuator)             └─ StepConductor::run, one job at a time
//!        └──► VibrationHandle ◄──── status (watch) ◄───────────┘
//! ```
//!
//! A new request supersedes the one in flight with a graceful cancel. Its
//! job waits on the thread until the previous conductor has drained.

pub mod error;

pub use error::RequestError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::adapter::DeviceAdapter;
use crate::conductor::{CancelMode, ConductorEnv, StepConductor, TelemetryHooks, VibrationStatus};
use crate::config::VibrationConfig;
use crate::effect::{CallerIdentity, CombinedVibration, Usage};
use crate::hal::bridge::NativeBridge;
use crate::hal::manager::{ActuatorManager, GroupController};
use crate::hal::{ActuatorId, SessionId, StateObserver, VibrationId};
use crate::scaler::{IntensityProvider, VibrationScaler};

// ── Telemetry ─────────────────────────────────────────────────────────────────

/// Telemetry sink that only logs.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl TelemetryHooks for LogTelemetry {
    fn note_vibrator_on(&self, caller: &CallerIdentity, duration_ms: u64) {
        info!(uid = caller.uid, package = %caller.package, duration_ms, "vibrator on");
    }

    fn note_vibrator_off(&self, caller: &CallerIdentity) {
        info!(uid = caller.uid, package = %caller.package, "vibrator off");
    }
}

// ── VibrationHandle ───────────────────────────────────────────────────────────

/// Caller-side handle of one accepted vibration.
#[derive(Debug, Clone)]
pub struct VibrationHandle {
    id: VibrationId,
    cancels: mpsc::UnboundedSender<CancelMode>,
    status: watch::Receiver<Option<VibrationStatus>>,
}

impl VibrationHandle {
    pub fn id(&self) -> VibrationId {
        self.id
    }

    /// Ramp down and stop. No-op once the vibration ended.
    pub fn cancel(&self) {
        // The conductor drops its receiver when done.
        let _ = self.cancels.send(CancelMode::Graceful);
    }

    pub fn cancel_immediately(&self) {
        let _ = self.cancels.send(CancelMode::Immediate);
    }

    /// End status, `None` while still playing.
    pub fn status(&self) -> Option<VibrationStatus> {
        *self.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_some()
    }

    /// Wait for the end status. A vibration whose job was lost (thread gone)
    /// reports [`VibrationStatus::Failed`].
    pub async fn wait(&self) -> VibrationStatus {
        let mut status = self.status.clone();
        let outcome = match status.wait_for(Option::is_some).await {
            Ok(done) => *done,
            Err(_) => None,
        };
        outcome.unwrap_or(VibrationStatus::Failed)
    }

    /// Blocking variant of [`wait`](Self::wait). Must not be called from
    /// inside a tokio runtime.
    pub fn wait_blocking(&self) -> VibrationStatus {
        match tokio::runtime::Builder::new_current_thread().build() {
            Ok(runtime) => runtime.block_on(self.wait()),
            Err(e) => {
                error!(vibration = self.id, error = %e, "cannot build a runtime to wait on");
                VibrationStatus::Failed
            }
        }
    }
}

// ── Vibration thread ──────────────────────────────────────────────────────────

struct Job {
    conductor: StepConductor,
    cancels: mpsc::UnboundedReceiver<CancelMode>,
    status: watch::Sender<Option<VibrationStatus>>,
}

/// One OS thread with a current-thread runtime, running conductors one
/// after the other.
struct VibrationThread {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl VibrationThread {
    fn spawn() -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread = std::thread::Builder::new()
            .name("vibration".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "vibration thread could not start its runtime");
                        return;
                    }
                };
                runtime.block_on(async move {
                    while let Some(job) = rx.recv().await {
                        let vibration = job.conductor.vibration();
                        let status = job.conductor.run(job.cancels).await;
                        debug!(vibration, ?status, "job done");
                        job.status.send_replace(Some(status));
                    }
                });
                debug!("vibration thread exiting");
            })?;
        Ok(Self {
            jobs: Some(tx),
            thread: Some(thread),
        })
    }

    fn submit(&self, job: Job) -> Result<(), RequestError> {
        let jobs = self.jobs.as_ref().ok_or(RequestError::ThreadStopped)?;
        jobs.send(job).map_err(|_| RequestError::ThreadStopped)
    }
}

impl Drop for VibrationThread {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("vibration thread panicked");
            }
        }
    }
}

// ── VibratorService ───────────────────────────────────────────────────────────

pub struct VibratorService {
    manager: Arc<dyn ActuatorManager>,
    config: Arc<VibrationConfig>,
    scaler: VibrationScaler,
    adapter: DeviceAdapter,
    env: ConductorEnv,
    current: Mutex<Option<VibrationHandle>>,
    next_id: AtomicU64,
    // Dropped last: joining waits for the running conductor.
    thread: VibrationThread,
}

impl VibratorService {
    /// Initialize the manager against `bridge` and start the vibration
    /// thread.
    pub fn new(
        manager: Arc<dyn ActuatorManager>,
        bridge: Arc<NativeBridge>,
        config: Arc<VibrationConfig>,
        intensities: Arc<dyn IntensityProvider>,
        telemetry: Arc<dyn TelemetryHooks>,
    ) -> std::io::Result<Self> {
        manager.init(bridge.clone());
        let ramp_step_ms = config.ramp_step_duration().as_millis() as u64;
        let adapter = DeviceAdapter::new(config.fallback_effects().clone(), ramp_step_ms);
        let scaler = VibrationScaler::new(config.clone(), intensities);
        let env = ConductorEnv::new(GroupController::new(manager.clone()), bridge, config.clone(), telemetry);
        Ok(Self {
            manager,
            config,
            scaler,
            adapter,
            env,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            thread: VibrationThread::spawn()?,
        })
    }

    /// Retry what failed during init (actuator info loads).
    pub fn on_system_ready(&self) {
        self.manager.on_system_ready();
    }

    pub fn scaler(&self) -> &VibrationScaler {
        &self.scaler
    }

    pub fn actuator_ids(&self) -> Vec<ActuatorId> {
        self.manager.actuator_ids()
    }

    /// Scale, adapt and validate `combined` for every target actuator, then
    /// hand it to the vibration thread.
    ///
    /// The whole request is rejected when any actuator cannot play its part.
    pub fn request_vibration(
        &self,
        combined: CombinedVibration,
        usage: Usage,
        caller: CallerIdentity,
    ) -> Result<VibrationHandle, RequestError> {
        if combined.is_empty() {
            return Err(RequestError::EmptyVibration);
        }

        let mut prepared = CombinedVibration::stereo();
        for (id, effect) in combined.expand(&self.manager.actuator_ids()) {
            let actuator = self.manager.actuator(id).ok_or(RequestError::UnknownActuator { id })?;
            let scaled = self.scaler.scale(&effect, usage);
            let adapted = self
                .adapter
                .adapt(&actuator.info(), &scaled)
                .ok_or(RequestError::UnsupportedEffect { actuator: id })?;
            prepared = prepared.with_actuator(id, adapted.resolve(self.config.default_amplitude()));
        }
        if prepared.is_empty() {
            return Err(RequestError::EmptyVibration);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(None);
        let handle = VibrationHandle {
            id,
            cancels: cancel_tx,
            status: status_rx,
        };
        info!(vibration = id, ?usage, uid = caller.uid, package = %caller.package, "vibration requested");

        self.thread.submit(Job {
            conductor: StepConductor::new(id, prepared, caller, self.env.clone()),
            cancels: cancel_rx,
            status: status_tx,
        })?;

        if let Some(previous) = self.current.lock().replace(handle.clone()) {
            if !previous.is_finished() {
                debug!(vibration = previous.id(), by = id, "superseded");
                previous.cancel();
            }
        }
        Ok(handle)
    }

    /// Gracefully cancel whatever is playing.
    pub fn cancel_current(&self) {
        if let Some(current) = self.current.lock().as_ref() {
            current.cancel();
        }
    }

    pub fn is_actuator_active(&self, id: ActuatorId) -> bool {
        self.manager.actuator(id).is_some_and(|a| a.is_active())
    }

    pub fn register_actuator_state_observer(&self, id: ActuatorId, observer: Arc<dyn StateObserver>) -> bool {
        match self.manager.actuator(id) {
            Some(actuator) => actuator.register_observer(observer),
            None => {
                warn!(actuator = id, "cannot observe unknown actuator");
                false
            }
        }
    }

    pub fn unregister_actuator_state_observer(&self, id: ActuatorId, observer: &Arc<dyn StateObserver>) -> bool {
        self.manager
            .actuator(id)
            .is_some_and(|actuator| actuator.unregister_observer(observer))
    }

    pub fn start_session(&self, ids: &[ActuatorId]) -> Option<SessionId> {
        self.manager.start_session(ids)
    }

    pub fn end_session(&self, session: SessionId, abort: bool) -> bool {
        self.manager.end_session(session, abort)
    }
}

impl Drop for VibratorService {
    fn drop(&mut self) {
        if let Some(current) = self.current.lock().take() {
            current.cancel_immediately();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::effect::{ComposedEffect, EffectId};
    use crate::hal::manager::{ActuatorFactory, LegacyActuatorManager};
    use crate::hal::remote::RemoteActuator;
    use crate::hal::sim::{HalCall, HalCallLog, SimulatedActuator};
    use crate::hal::{ActuatorControl, Capabilities};
    use crate::scaler::IntensitySettings;

    const WAIT: Duration = Duration::from_secs(5);

    fn service(log: Arc<HalCallLog>) -> VibratorService {
        let factory: ActuatorFactory = Box::new(move |id: ActuatorId| -> Arc<dyn ActuatorControl> {
            let sim = SimulatedActuator::builder(id)
                .capabilities(Capabilities::ON_CALLBACK | Capabilities::AMPLITUDE_CONTROL)
                .effect(EffectId::TICK, 10)
                .log(log.clone())
                .build();
            Arc::new(RemoteActuator::new(id, sim))
        });
        let manager = Arc::new(LegacyActuatorManager::new(vec![0], factory));
        let config = Arc::new(VibrationConfig::default());
        let intensities = Arc::new(IntensitySettings::from_config(&config));
        VibratorService::new(
            manager,
            Arc::new(NativeBridge::new()),
            config,
            intensities,
            Arc::new(LogTelemetry),
        )
        .unwrap()
    }

    fn caller() -> CallerIdentity {
        CallerIdentity::new(1000, "com.example")
    }

    #[test]
    fn rejects_empty_and_unknown_targets() {
        let svc = service(HalCallLog::new());
        assert_eq!(
            svc.request_vibration(CombinedVibration::stereo(), Usage::Touch, caller()).unwrap_err(),
            RequestError::EmptyVibration
        );
        let stray = CombinedVibration::stereo().with_actuator(9, ComposedEffect::one_shot(10));
        assert_eq!(
            svc.request_vibration(stray, Usage::Touch, caller()).unwrap_err(),
            RequestError::UnknownActuator { id: 9 }
        );
    }

    #[test]
    fn rejects_effects_the_actuator_cannot_play() {
        let svc = service(HalCallLog::new());
        let click = CombinedVibration::mono(ComposedEffect::prebaked(EffectId::CLICK, false));
        assert_eq!(
            svc.request_vibration(click, Usage::Touch, caller()).unwrap_err(),
            RequestError::UnsupportedEffect { actuator: 0 }
        );
    }

    #[tokio::test]
    async fn plays_a_one_shot_to_the_end() {
        let log = HalCallLog::new();
        let svc = service(log.clone());
        log.clear();

        let handle = svc
            .request_vibration(CombinedVibration::mono(ComposedEffect::one_shot(30)), Usage::Touch, caller())
            .unwrap();
        let status = tokio::time::timeout(WAIT, handle.wait()).await.unwrap();

        assert_eq!(status, VibrationStatus::Finished);
        assert_eq!(log.calls()[0], HalCall::On { actuator: 0, millis: 30 });
        assert!(log.calls().contains(&HalCall::Off { actuator: 0 }));
        assert!(!svc.is_actuator_active(0));

        // Cancelling a finished vibration changes nothing.
        let calls = log.calls().len();
        handle.cancel();
        handle.cancel_immediately();
        assert_eq!(handle.status(), Some(VibrationStatus::Finished));
        assert_eq!(log.calls().len(), calls);
    }

    #[tokio::test]
    async fn new_request_supersedes_the_current_one() {
        let svc = service(HalCallLog::new());
        let long = svc
            .request_vibration(CombinedVibration::mono(ComposedEffect::one_shot(5000)), Usage::Alarm, caller())
            .unwrap();
        let short = svc
            .request_vibration(CombinedVibration::mono(ComposedEffect::one_shot(20)), Usage::Touch, caller())
            .unwrap();

        assert_ne!(long.id(), short.id());
        assert_eq!(tokio::time::timeout(WAIT, long.wait()).await.unwrap(), VibrationStatus::Cancelled);
        assert_eq!(tokio::time::timeout(WAIT, short.wait()).await.unwrap(), VibrationStatus::Finished);
    }

    #[test]
    fn observers_see_the_actuator_turn_on_and_off() {
        struct Count(AtomicUsize);
        impl StateObserver for Count {
            fn on_state_changed(&self, _actuator: ActuatorId, _active: bool) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let svc = service(HalCallLog::new());
        let count = Arc::new(Count(AtomicUsize::new(0)));
        let observer: Arc<dyn StateObserver> = count.clone();
        assert!(svc.register_actuator_state_observer(0, observer.clone()));
        assert!(!svc.register_actuator_state_observer(7, observer.clone()));

        let handle = svc
            .request_vibration(CombinedVibration::mono(ComposedEffect::one_shot(20)), Usage::Touch, caller())
            .unwrap();
        assert_eq!(handle.wait_blocking(), VibrationStatus::Finished);
        // Initial state on registration, then on and off.
        assert_eq!(count.0.load(Ordering::SeqCst), 3);
        assert!(svc.unregister_actuator_state_observer(0, &observer));
    }
}
