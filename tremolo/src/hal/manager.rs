/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Actuator registry, multi-actuator synchronization and sessions.
//!
//! Two managers implement [`ActuatorManager`]:
//!
//! | Manager | Sync / sessions | Actuator ids from |
//! |---|---|---|
//! | [`DefaultActuatorManager`] | gated by [`ManagerCapabilities`] | the manager HAL |
//! | [`LegacyActuatorManager`] | never | a fixed list |
//!
//! The registry is populated once by `init` and is read-only afterwards;
//! only the info-retry path in `on_system_ready` touches the actuators again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::bridge::NativeBridge;
use super::remote::HalCompletion;
use super::{ActuatorControl, ActuatorId, HalError, ManagerCallbacks, ManagerCapabilities, SessionId, VibrationId};

/// Builds the backend for one actuator id.
pub type ActuatorFactory = Box<dyn Fn(ActuatorId) -> Arc<dyn ActuatorControl> + Send + Sync>;

// ── Manager HAL ───────────────────────────────────────────────────────────────

/// Raw manager interface.
pub trait ManagerHal: Send + Sync {
    fn get_capabilities(&self) -> Result<ManagerCapabilities, HalError>;
    fn get_actuator_ids(&self) -> Result<Vec<ActuatorId>, HalError>;
    fn prepare_synced(&self, ids: &[ActuatorId]) -> Result<(), HalError>;
    fn trigger_synced(&self, callback: Option<HalCompletion>) -> Result<(), HalError>;
    fn cancel_synced(&self) -> Result<(), HalError>;
    fn start_session(&self, ids: &[ActuatorId], callback: HalCompletion) -> Result<Arc<dyn HalSession>, HalError>;
    fn clear_sessions(&self) -> Result<(), HalError>;
}

/// Handle of one open vibration session.
pub trait HalSession: Send + Sync {
    fn close(&self) -> Result<(), HalError>;
    fn abort(&self) -> Result<(), HalError>;
}

// ── ActuatorManager ───────────────────────────────────────────────────────────

pub trait ActuatorManager: Send + Sync {
    /// Populate the registry and reset any state left by a previous run.
    fn init(&self, bridge: Arc<NativeBridge>);

    /// Retry info loads that failed during `init`.
    fn on_system_ready(&self);

    fn capabilities(&self) -> ManagerCapabilities;

    /// Ids in registry order.
    fn actuator_ids(&self) -> Vec<ActuatorId>;

    fn actuator(&self, id: ActuatorId) -> Option<Arc<dyn ActuatorControl>>;

    fn prepare_synced(&self, ids: &[ActuatorId]) -> bool;

    fn trigger_synced(&self, vibration: VibrationId) -> bool;

    fn cancel_synced(&self) -> bool;

    /// Opens a session over `ids`. `None` when sessions are unsupported or
    /// the HAL refused.
    fn start_session(&self, ids: &[ActuatorId]) -> Option<SessionId>;

    fn end_session(&self, session: SessionId, abort: bool) -> bool;
}

// ── DefaultActuatorManager ────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    capabilities: ManagerCapabilities,
    ids: Vec<ActuatorId>,
    actuators: BTreeMap<ActuatorId, Arc<dyn ActuatorControl>>,
    bridge: Option<Arc<NativeBridge>>,
}

type Sessions = Arc<Mutex<BTreeMap<SessionId, Arc<dyn HalSession>>>>;

pub struct DefaultActuatorManager {
    hal: Arc<dyn ManagerHal>,
    factory: ActuatorFactory,
    registry: Mutex<Registry>,
    sessions: Sessions,
    next_session: AtomicU64,
}

impl DefaultActuatorManager {
    pub fn new(hal: Arc<dyn ManagerHal>, factory: ActuatorFactory) -> Self {
        Self {
            hal,
            factory,
            registry: Mutex::new(Registry::default()),
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
            next_session: AtomicU64::new(1),
        }
    }

    fn has(&self, capability: ManagerCapabilities) -> bool {
        self.registry.lock().capabilities.contains(capability)
    }

    /// Open session ids, in ascending order.
    pub fn open_sessions(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().copied().collect()
    }
}

impl ActuatorManager for DefaultActuatorManager {
    fn init(&self, bridge: Arc<NativeBridge>) {
        let capabilities = self.hal.get_capabilities().unwrap_or_else(|e| {
            error!(error = %e, "failed to load manager capabilities");
            ManagerCapabilities::empty()
        });
        let ids = self.hal.get_actuator_ids().unwrap_or_else(|e| {
            error!(error = %e, "failed to load actuator ids");
            Vec::new()
        });

        let mut actuators = BTreeMap::new();
        for &id in &ids {
            let actuator = (self.factory)(id);
            actuator.init(bridge.clone());
            actuators.insert(id, actuator);
        }
        info!(?ids, capabilities = ?capabilities, "actuator manager initialized");

        *self.registry.lock() = Registry {
            capabilities,
            ids,
            actuators,
            bridge: Some(bridge),
        };

        // Leftovers from a previous process must not fire later.
        if capabilities.contains(ManagerCapabilities::SYNC) {
            self.cancel_synced();
        }
        if capabilities.contains(ManagerCapabilities::START_SESSIONS) {
            if let Err(e) = self.hal.clear_sessions() {
                error!(error = %e, "failed to clear sessions");
            }
            self.sessions.lock().clear();
        }
    }

    fn on_system_ready(&self) {
        let actuators: Vec<_> = self.registry.lock().actuators.values().cloned().collect();
        for actuator in actuators {
            if !actuator.query_info() {
                warn!(actuator = actuator.id(), "actuator info still unavailable");
            }
        }
    }

    fn capabilities(&self) -> ManagerCapabilities {
        self.registry.lock().capabilities
    }

    fn actuator_ids(&self) -> Vec<ActuatorId> {
        self.registry.lock().ids.clone()
    }

    fn actuator(&self, id: ActuatorId) -> Option<Arc<dyn ActuatorControl>> {
        self.registry.lock().actuators.get(&id).cloned()
    }

    fn prepare_synced(&self, ids: &[ActuatorId]) -> bool {
        if !self.has(ManagerCapabilities::SYNC) {
            return false;
        }
        match self.hal.prepare_synced(ids) {
            Ok(()) => true,
            Err(e) => {
                error!(?ids, error = %e, "prepare_synced failed");
                false
            }
        }
    }

    fn trigger_synced(&self, vibration: VibrationId) -> bool {
        let (capabilities, bridge) = {
            let registry = self.registry.lock();
            (registry.capabilities, registry.bridge.clone())
        };
        if !capabilities.contains(ManagerCapabilities::SYNC) {
            return false;
        }
        let callback: Option<HalCompletion> = match bridge {
            Some(bridge) if capabilities.contains(ManagerCapabilities::TRIGGER_CALLBACK) => {
                Some(Box::new(move || bridge.on_synced_group_complete(vibration)))
            }
            _ => None,
        };
        match self.hal.trigger_synced(callback) {
            Ok(()) => true,
            Err(e) => {
                error!(vibration, error = %e, "trigger_synced failed");
                false
            }
        }
    }

    fn cancel_synced(&self) -> bool {
        if !self.has(ManagerCapabilities::SYNC) {
            return false;
        }
        match self.hal.cancel_synced() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "cancel_synced failed");
                false
            }
        }
    }

    fn start_session(&self, ids: &[ActuatorId]) -> Option<SessionId> {
        let bridge = {
            let registry = self.registry.lock();
            if !registry.capabilities.contains(ManagerCapabilities::START_SESSIONS) {
                return None;
            }
            registry.bridge.clone()
        };
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let sessions = self.sessions.clone();
        let callback: HalCompletion = Box::new(move || {
            sessions.lock().remove(&session);
            match bridge {
                Some(bridge) => bridge.on_session_complete(session),
                None => debug!(session, "session complete before bridge attached"),
            }
        });
        match self.hal.start_session(ids, callback) {
            Ok(handle) => {
                self.sessions.lock().insert(session, handle);
                debug!(session, ?ids, "session started");
                Some(session)
            }
            Err(e) => {
                error!(?ids, error = %e, "start_session failed");
                None
            }
        }
    }

    fn end_session(&self, session: SessionId, abort: bool) -> bool {
        let Some(handle) = self.sessions.lock().get(&session).cloned() else {
            debug!(session, "end_session for unknown session");
            return false;
        };
        let result = if abort { handle.abort() } else { handle.close() };
        match result {
            Ok(()) => true,
            Err(HalError::DeadObject) => {
                warn!(session, "session handle is dead, dropping it");
                self.sessions.lock().remove(&session);
                false
            }
            Err(e) => {
                error!(session, abort, error = %e, "end_session failed");
                false
            }
        }
    }
}

// ── LegacyActuatorManager ─────────────────────────────────────────────────────

/// Registry over a fixed id list with no manager HAL behind it.
pub struct LegacyActuatorManager {
    ids: Vec<ActuatorId>,
    factory: ActuatorFactory,
    actuators: Mutex<BTreeMap<ActuatorId, Arc<dyn ActuatorControl>>>,
}

impl LegacyActuatorManager {
    pub fn new(ids: Vec<ActuatorId>, factory: ActuatorFactory) -> Self {
        Self {
            ids,
            factory,
            actuators: Mutex::new(BTreeMap::new()),
        }
    }
}

impl ActuatorManager for LegacyActuatorManager {
    fn init(&self, bridge: Arc<NativeBridge>) {
        let mut actuators = BTreeMap::new();
        for &id in &self.ids {
            let actuator = (self.factory)(id);
            actuator.init(bridge.clone());
            actuators.insert(id, actuator);
        }
        info!(ids = ?self.ids, "legacy actuator manager initialized");
        *self.actuators.lock() = actuators;
    }

    fn on_system_ready(&self) {
        let actuators: Vec<_> = self.actuators.lock().values().cloned().collect();
        for actuator in actuators {
            if !actuator.query_info() {
                warn!(actuator = actuator.id(), "actuator info still unavailable");
            }
        }
    }

    fn capabilities(&self) -> ManagerCapabilities {
        ManagerCapabilities::empty()
    }

    fn actuator_ids(&self) -> Vec<ActuatorId> {
        self.ids.clone()
    }

    fn actuator(&self, id: ActuatorId) -> Option<Arc<dyn ActuatorControl>> {
        self.actuators.lock().get(&id).cloned()
    }

    fn prepare_synced(&self, _ids: &[ActuatorId]) -> bool {
        false
    }

    fn trigger_synced(&self, _vibration: VibrationId) -> bool {
        false
    }

    fn cancel_synced(&self) -> bool {
        false
    }

    fn start_session(&self, _ids: &[ActuatorId]) -> Option<SessionId> {
        None
    }

    fn end_session(&self, _session: SessionId, _abort: bool) -> bool {
        false
    }
}

// ── GroupController ───────────────────────────────────────────────────────────

/// Two-phase synchronized start over the manager, as used by the conductor.
#[derive(Clone)]
pub struct GroupController {
    manager: Arc<dyn ActuatorManager>,
}

impl GroupController {
    pub fn new(manager: Arc<dyn ActuatorManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<dyn ActuatorManager> {
        &self.manager
    }

    /// Prepare `ids` for a synchronized start.
    ///
    /// Fails without touching the HAL when fewer than two actuators take
    /// part or when the manager lacks any of `required`.
    pub fn prepare(&self, required: ManagerCapabilities, ids: &[ActuatorId]) -> bool {
        if ids.len() < 2 {
            return false;
        }
        let capabilities = self.manager.capabilities();
        if !capabilities.contains(required) {
            debug!(
                required = ?required,
                missing = ?(required - capabilities),
                "manager cannot sync this combination"
            );
            return false;
        }
        self.manager.prepare_synced(ids)
    }

    pub fn trigger(&self, vibration: VibrationId) -> bool {
        self.manager.trigger_synced(vibration)
    }

    pub fn cancel(&self) -> bool {
        self.manager.cancel_synced()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::bridge::{HalEvent, SessionObserver};
    use crate::hal::remote::RemoteActuator;
    use crate::hal::sim::{HalCall, HalCallLog, SimulatedActuator, SimulatedManagerHal};

    fn setup(caps: ManagerCapabilities) -> (Arc<SimulatedManagerHal>, DefaultActuatorManager, Arc<HalCallLog>) {
        let log = HalCallLog::new();
        let hal = SimulatedManagerHal::new(vec![3, 1], caps, log.clone());
        let factory_log = log.clone();
        let factory: ActuatorFactory = Box::new(move |id: ActuatorId| -> Arc<dyn ActuatorControl> {
            let sim = SimulatedActuator::builder(id).log(factory_log.clone()).build();
            Arc::new(RemoteActuator::new(id, sim))
        });
        (hal.clone(), DefaultActuatorManager::new(hal, factory), log)
    }

    #[test]
    fn init_builds_registry_in_hal_order_and_resets_sync_state() {
        let (_hal, manager, log) = setup(ManagerCapabilities::SYNC | ManagerCapabilities::START_SESSIONS);
        manager.init(Arc::new(NativeBridge::new()));

        assert_eq!(manager.actuator_ids(), vec![3, 1]);
        assert!(manager.actuator(1).is_some());
        assert!(manager.actuator(2).is_none());
        let calls = log.calls();
        assert!(calls.contains(&HalCall::CancelSynced));
        assert!(calls.contains(&HalCall::ClearSessions));
        assert!(calls.contains(&HalCall::Off { actuator: 3 }));
    }

    #[test]
    fn sync_calls_need_sync_capability() {
        let (_hal, manager, log) = setup(ManagerCapabilities::empty());
        manager.init(Arc::new(NativeBridge::new()));
        assert!(!manager.prepare_synced(&[1, 3]));
        assert!(!manager.trigger_synced(1));
        assert!(!manager.cancel_synced());
        assert!(!log.calls().iter().any(|c| matches!(c, HalCall::PrepareSynced { .. })));
    }

    #[test]
    fn group_controller_checks_required_capabilities_first() {
        let (_hal, manager, log) = setup(ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_ON);
        manager.init(Arc::new(NativeBridge::new()));
        let group = GroupController::new(Arc::new(manager));

        let perform = ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_PERFORM;
        assert!(!group.prepare(perform, &[1, 3]));
        assert!(!group.prepare(ManagerCapabilities::SYNC, &[1]), "single actuator never syncs");
        assert!(group.prepare(ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_ON, &[1, 3]));
        let prepares: Vec<_> = log
            .calls()
            .into_iter()
            .filter(|c| matches!(c, HalCall::PrepareSynced { .. }))
            .collect();
        assert_eq!(prepares, vec![HalCall::PrepareSynced { ids: vec![1, 3] }]);
    }

    #[test]
    fn trigger_callback_is_routed_only_with_capability() {
        let (hal, manager, _log) = setup(ManagerCapabilities::SYNC | ManagerCapabilities::TRIGGER_CALLBACK);
        let bridge = Arc::new(NativeBridge::new());
        manager.init(bridge.clone());
        let mut rx = bridge.attach(42, 4);

        assert!(manager.prepare_synced(&[1, 3]));
        assert!(manager.trigger_synced(42));
        hal.complete_synced();
        assert_eq!(rx.try_recv().unwrap(), HalEvent::SyncedComplete { vibration: 42 });

        let (hal, manager, _log) = setup(ManagerCapabilities::SYNC);
        let bridge = Arc::new(NativeBridge::new());
        manager.init(bridge.clone());
        let mut rx = bridge.attach(42, 4);
        assert!(manager.trigger_synced(42));
        hal.complete_synced();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn session_lifecycle() {
        struct Seen(Mutex<Vec<SessionId>>);
        impl SessionObserver for Seen {
            fn on_session_complete(&self, session: SessionId) {
                self.0.lock().push(session);
            }
        }

        let (hal, manager, log) = setup(ManagerCapabilities::START_SESSIONS);
        let bridge = Arc::new(NativeBridge::new());
        let seen = Arc::new(Seen(Mutex::new(Vec::new())));
        bridge.set_session_observer(Some(seen.clone()));
        manager.init(bridge);

        let first = manager.start_session(&[1]).unwrap();
        let second = manager.start_session(&[3]).unwrap();
        assert_eq!(manager.open_sessions(), vec![first, second]);

        assert!(manager.end_session(first, false));
        hal.complete_sessions();
        assert!(manager.open_sessions().is_empty());
        assert_eq!(*seen.0.lock(), vec![first, second]);
        assert!(log.calls().contains(&HalCall::EndSession { abort: false }));
        assert!(!manager.end_session(first, true), "already gone");
    }

    #[test]
    fn dead_session_is_dropped() {
        let (hal, manager, _log) = setup(ManagerCapabilities::START_SESSIONS);
        manager.init(Arc::new(NativeBridge::new()));
        let session = manager.start_session(&[1]).unwrap();
        hal.kill_sessions();
        assert!(!manager.end_session(session, true));
        assert!(manager.open_sessions().is_empty());
    }

    #[test]
    fn legacy_manager_refuses_sync_and_sessions() {
        let log = HalCallLog::new();
        let factory: ActuatorFactory = Box::new(move |id: ActuatorId| -> Arc<dyn ActuatorControl> {
            let sim = SimulatedActuator::builder(id).log(log.clone()).build();
            Arc::new(RemoteActuator::new(id, sim))
        });
        let manager = LegacyActuatorManager::new(vec![0], factory);
        manager.init(Arc::new(NativeBridge::new()));
        assert_eq!(manager.actuator_ids(), vec![0]);
        assert!(manager.actuator(0).is_some());
        assert!(manager.capabilities().is_empty());
        assert!(!manager.prepare_synced(&[0]));
        assert!(manager.start_session(&[0]).is_none());
        assert!(!manager.end_session(1, false));
    }

    #[test]
    fn sessions_unsupported_without_capability() {
        let (_hal, manager, _log) = setup(ManagerCapabilities::SYNC);
        manager.init(Arc::new(NativeBridge::new()));
        assert!(manager.start_session(&[1]).is_none());
    }
}
