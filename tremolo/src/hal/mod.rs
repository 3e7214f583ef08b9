/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Actuator capability model and the single actuator control contract.
//!
//! ```text
//! hal/
//! ├── mod.rs      – ids, capabilities, ActuatorInfo, ActuatorControl trait
//! ├── state.rs    – state + observer bookkeeping shared by both backends
//! ├── bridge.rs   – native callback bridge and deferred completion timers
//! ├── legacy.rs   – backend over a synchronous driver binding (simulated completion)
//! ├── remote.rs   – backend over a capability-negotiated remote HAL (real callbacks)
//! ├── manager.rs  – actuator manager (registry, group sync, sessions)
//! └── sim.rs      – in-process simulated hardware used by tests and the demo
//! ```
//!
//! # Three-way drive result
//!
//! Every `drive_*` call returns an `i64`:
//!
//! | Value | Meaning |
//! |---|---|
//! | `> 0` | started; expected duration in ms, [`INDEFINITE`] when unknown |
//! | `0` | input not supported by this actuator; skip it |
//! | `< 0` | hardware or driver failure |

pub mod bridge;
pub mod legacy;
pub mod manager;
pub mod remote;
pub mod sim;
pub mod state;

use std::collections::BTreeMap;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::effect::{EffectId, PrebakedSegment, PrimitiveId, PrimitiveSegment, PwlePoint, RampSegment, VendorEffect};

// ── Identifiers ───────────────────────────────────────────────────────────────

pub type ActuatorId = i32;
pub type VibrationId = u64;
pub type StepId = u64;
pub type SessionId = u64;

/// Drive result reported for effects whose duration the framework cannot know.
pub const INDEFINITE: i64 = i64::MAX;

/// Successful drive result for `ms`. Durations past `i64::MAX` saturate to
/// [`INDEFINITE`] instead of wrapping into the failure range.
pub fn drive_result(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(INDEFINITE)
}

// ── Capabilities ──────────────────────────────────────────────────────────────

bitflags! {
    /// Per-actuator hardware capabilities.
    ///
    /// Bit layout matches the hardware interface, so raw values reported by a
    /// driver can be taken with [`Capabilities::from_bits_truncate`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u64 {
        const ON_CALLBACK               = 1 << 0;
        const PERFORM_CALLBACK          = 1 << 1;
        const AMPLITUDE_CONTROL         = 1 << 2;
        const EXTERNAL_CONTROL          = 1 << 3;
        const EXTERNAL_AMPLITUDE_CONTROL = 1 << 4;
        const COMPOSE_EFFECTS           = 1 << 5;
        const ALWAYS_ON_CONTROL         = 1 << 6;
        const GET_RESONANT_FREQUENCY    = 1 << 7;
        const GET_Q_FACTOR              = 1 << 8;
        const FREQUENCY_CONTROL         = 1 << 9;
        const COMPOSE_PWLE_EFFECTS      = 1 << 10;
        const PERFORM_VENDOR_EFFECTS    = 1 << 11;
        const COMPOSE_PWLE_EFFECTS_V2   = 1 << 12;
    }
}

bitflags! {
    /// Capabilities of the actuator manager (multi-actuator coordination).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ManagerCapabilities: u64 {
        const SYNC                  = 1 << 0;
        const PREPARE_ON            = 1 << 1;
        const PREPARE_PERFORM       = 1 << 2;
        const PREPARE_COMPOSE       = 1 << 3;
        const MIXED_TRIGGER_ON      = 1 << 4;
        const MIXED_TRIGGER_PERFORM = 1 << 5;
        const MIXED_TRIGGER_COMPOSE = 1 << 6;
        const TRIGGER_CALLBACK      = 1 << 7;
        const START_SESSIONS        = 1 << 8;
    }
}

/// Parse a lower-case flag name as used in config files (`"on_callback"`).
pub fn capability_from_name(name: &str) -> Option<Capabilities> {
    Capabilities::from_name(&name.to_ascii_uppercase())
}

pub fn manager_capability_from_name(name: &str) -> Option<ManagerCapabilities> {
    ManagerCapabilities::from_name(&name.to_ascii_uppercase())
}

// ── ActuatorInfo ──────────────────────────────────────────────────────────────

/// Supported frequency band and resonance.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrequencyProfile {
    pub resonant_hz: Option<f32>,
    pub min_hz: f32,
    pub max_hz: f32,
}

impl FrequencyProfile {
    /// `true` when the profile describes a real band.
    pub fn is_valid(&self) -> bool {
        self.min_hz > 0.0 && self.max_hz >= self.min_hz
    }

    /// Inclusive on both ends.
    pub fn contains(&self, hz: f32) -> bool {
        self.is_valid() && hz >= self.min_hz && hz <= self.max_hz
    }
}

/// Answer to "does this actuator support prebaked effect X?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectSupport {
    Yes,
    No,
    /// The actuator did not publish a supported-effects table.
    Unknown,
}

/// Static description of one actuator.
///
/// Starts out degraded (no capabilities) and is replaced wholesale once the
/// hardware answers a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActuatorInfo {
    pub id: ActuatorId,
    pub capabilities: Capabilities,
    /// Effect id → duration in ms. `None` when the table is unknown.
    pub supported_effects: Option<BTreeMap<EffectId, u64>>,
    /// Primitive id → duration in ms.
    pub supported_primitives: BTreeMap<PrimitiveId, u64>,
    pub primitive_delay_max_ms: u32,
    /// Max primitives per composition call; `0` means unlimited.
    pub composition_size_max: usize,
    /// Max ramps per PWLE v1 call; `0` means unlimited.
    pub pwle_size_max: usize,
    /// Longest single ramp accepted; `0` means unlimited.
    pub pwle_primitive_duration_max_ms: u64,
    /// Max control points per PWLE v2 call; `0` means unlimited.
    pub max_envelope_effect_size: usize,
    pub q_factor: Option<f32>,
    pub frequency_profile: FrequencyProfile,
}

impl ActuatorInfo {
    /// Degraded info: no optional capabilities, nothing known.
    pub fn new(id: ActuatorId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn has_capability(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn effect_support(&self, effect: EffectId) -> EffectSupport {
        match &self.supported_effects {
            None => EffectSupport::Unknown,
            Some(table) if table.contains_key(&effect) => EffectSupport::Yes,
            Some(_) => EffectSupport::No,
        }
    }

    pub fn is_primitive_supported(&self, primitive: PrimitiveId) -> bool {
        self.has_capability(Capabilities::COMPOSE_EFFECTS)
            && self.supported_primitives.contains_key(&primitive)
    }

    /// Duration of `primitive`, `0` when unsupported.
    pub fn primitive_duration_ms(&self, primitive: PrimitiveId) -> u64 {
        self.supported_primitives.get(&primitive).copied().unwrap_or(0)
    }
}

// ── Actuator state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorState {
    Idle,
    Vibrating,
    UnderExternalControl,
}

impl ActuatorState {
    /// Observable flag: anything other than `Idle` counts as active.
    pub fn is_active(self) -> bool {
        self != ActuatorState::Idle
    }
}

/// Subscriber to Idle ↔ active flips of one actuator.
///
/// Called with the actuator lock held; implementations must be quick and must
/// not call back into the actuator.
pub trait StateObserver: Send + Sync {
    fn on_state_changed(&self, actuator: ActuatorId, active: bool);
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure reported by a raw hardware interface.
///
/// Backends fold this into the three-way drive result; it never reaches the
/// scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("operation not supported by the hardware")]
    Unsupported,

    #[error("hardware call failed: {reason}")]
    Failed { reason: String },

    #[error("remote hardware service died")]
    DeadObject,
}

impl HalError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HalError::Failed {
            reason: reason.into(),
        }
    }

    /// Three-way code for this error: `0` for unsupported, `-1` otherwise.
    pub fn drive_code(&self) -> i64 {
        match self {
            HalError::Unsupported => 0,
            HalError::Failed { .. } | HalError::DeadObject => -1,
        }
    }
}

// ── Callbacks ─────────────────────────────────────────────────────────────────

/// Per-actuator completion sink, invoked from hardware/bridge threads.
pub trait HalCallbacks: Send + Sync {
    fn on_actuator_step_complete(&self, actuator: ActuatorId, vibration: VibrationId, step: StepId);
}

/// Manager-level completion sink, invoked from hardware/bridge threads.
pub trait ManagerCallbacks: Send + Sync {
    fn on_synced_group_complete(&self, vibration: VibrationId);
    fn on_session_complete(&self, session: SessionId);
}

// ── ActuatorControl ───────────────────────────────────────────────────────────

/// Drive one actuator. Implemented once per hardware generation.
///
/// All implementations guarantee the same observable state machine:
///
/// * a positive drive result moves the state to `Vibrating`;
/// * `stop()` moves it to `Idle` even when the hardware call fails;
/// * observers hear about Idle ↔ active flips exactly once, under the lock;
/// * `current_amplitude()` is `-1.0` right after a drive call, `0.0` when
///   idle, and the last programmed value after `set_amplitude`.
pub trait ActuatorControl: Send + Sync {
    fn id(&self) -> ActuatorId;

    /// Attach completion callbacks, load info and reset the hardware.
    fn init(&self, callbacks: Arc<dyn HalCallbacks>);

    /// Retry the info load if the last attempt failed. Returns whether the
    /// info is now fully loaded.
    fn query_info(&self) -> bool;

    /// Current info snapshot (degraded until a load succeeds).
    fn info(&self) -> ActuatorInfo;

    fn state(&self) -> ActuatorState;

    fn is_active(&self) -> bool {
        self.state().is_active()
    }

    fn current_amplitude(&self) -> f32;

    /// Registers `observer` and immediately reports the current state to it.
    /// Returns `false` if it was already registered.
    fn register_observer(&self, observer: Arc<dyn StateObserver>) -> bool;

    fn unregister_observer(&self, observer: &Arc<dyn StateObserver>) -> bool;

    fn drive_for_duration(&self, vibration: VibrationId, step: StepId, millis: u64) -> i64;

    fn drive_prebaked(&self, vibration: VibrationId, step: StepId, prebaked: &PrebakedSegment) -> i64;

    fn drive_composition(&self, vibration: VibrationId, step: StepId, primitives: &[PrimitiveSegment]) -> i64;

    /// PWLE v1.
    fn drive_ramps(&self, vibration: VibrationId, step: StepId, ramps: &[RampSegment]) -> i64;

    /// PWLE v2.
    fn drive_piecewise_waveform(&self, vibration: VibrationId, step: StepId, points: &[PwlePoint]) -> i64;

    fn drive_vendor_effect(&self, vibration: VibrationId, step: StepId, effect: &VendorEffect) -> i64;

    fn stop(&self);

    fn set_external_control(&self, enabled: bool) -> bool;

    fn set_always_on(&self, slot: i32, effect: Option<&PrebakedSegment>) -> bool;

    fn set_amplitude(&self, amplitude: f32) -> bool;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
