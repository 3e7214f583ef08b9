/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Configuration loading and management.
//!
//! The expected YAML structure is:
//! ```yaml
//! vibration:
//!   default_amplitude: 255
//!   scale_level_gain: 1.4
//!   scale_mode: exponential
//!   ramp_down_duration_ms: 0
//!   default_intensities:
//!     alarm: high
//!   fallback_effects:
//!     tick:
//!       - { primitive: tick, scale: 1.0, delay_ms: 0 }
//! actuators:
//!   0:
//!     backend: remote
//!     capabilities: [on_callback, amplitude_control]
//!     supported_effects: { click: 20 }
//! manager:
//!   capabilities: [sync, prepare_on, prepare_perform]
//! ```
//!
//! Every section is optional. Raw values are kept as written; the
//! [`VibrationConfig`] getters apply the sanitizing rules.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::effect::{EffectId, Intensity, PrimitiveId, Segment, Usage};
use crate::hal::{
    capability_from_name, manager_capability_from_name, ActuatorId, ActuatorInfo, Capabilities, FrequencyProfile,
    ManagerCapabilities,
};

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    vibration: VibrationSection,
    #[serde(default)]
    actuators: BTreeMap<ActuatorId, ActuatorEntry>,
    manager: Option<ManagerEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct VibrationSection {
    default_amplitude: Option<i64>,
    scale_level_gain: Option<f32>,
    scale_mode: Option<String>,
    scale_factors: Option<Vec<f32>>,
    external_scale_factors: Option<Vec<f32>>,
    ramp_down_duration_ms: Option<i64>,
    ramp_step_duration_ms: Option<i64>,
    callbacks_extra_timeout_ms: Option<i64>,
    callback_queue_capacity: Option<usize>,
    #[serde(default)]
    default_intensities: BTreeMap<String, String>,
    #[serde(default)]
    fallback_effects: BTreeMap<String, Vec<FallbackPrimitive>>,
}

#[derive(Debug, Deserialize)]
struct FallbackPrimitive {
    primitive: String,
    #[serde(default = "default_primitive_scale")]
    scale: f32,
    #[serde(default)]
    delay_ms: u32,
}

fn default_primitive_scale() -> f32 {
    1.0
}

#[derive(Debug, Default, Deserialize)]
struct ActuatorEntry {
    backend: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    supported_effects: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    supported_primitives: BTreeMap<String, u64>,
    frequency: Option<FrequencyEntry>,
    #[serde(default)]
    composition_size_max: usize,
    #[serde(default)]
    pwle_size_max: usize,
    #[serde(default)]
    pwle_primitive_duration_max_ms: u64,
    #[serde(default)]
    max_envelope_effect_size: usize,
    #[serde(default)]
    hal_latency_ms: u64,
}

#[derive(Debug, Deserialize)]
struct FrequencyEntry {
    min_hz: f32,
    max_hz: f32,
    resonant_hz: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ManagerEntry {
    #[serde(default)]
    capabilities: Vec<String>,
}

// ── VibrationConfig ───────────────────────────────────────────────────────────

const DEFAULT_AMPLITUDE: i64 = 255;
const DEFAULT_SCALE_LEVEL_GAIN: f32 = 1.4;
const DEFAULT_RAMP_STEP_DURATION_MS: i64 = 5;
const DEFAULT_CALLBACKS_EXTRA_TIMEOUT_MS: i64 = 1000;
const DEFAULT_CALLBACK_QUEUE_CAPACITY: usize = 64;

/// How a scale level turns into a scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// `gain ^ level`.
    #[default]
    Exponential,
    /// Fixed five-entry table; device scale factors then apply linearly.
    Table,
}

/// Tunables of the vibration pipeline.
///
/// Fields hold values exactly as configured. Read them through the getters.
#[derive(Debug, Clone)]
pub struct VibrationConfig {
    pub default_amplitude: i64,
    pub scale_level_gain: f32,
    pub scale_mode: ScaleMode,
    /// Per intensity LOW, MEDIUM, HIGH.
    pub scale_factors: Option<Vec<f32>>,
    pub external_scale_factors: Option<Vec<f32>>,
    pub ramp_down_duration_ms: i64,
    pub ramp_step_duration_ms: i64,
    pub callbacks_extra_timeout_ms: i64,
    pub callback_queue_capacity: usize,
    pub default_intensities: BTreeMap<Usage, Intensity>,
    pub fallback_effects: BTreeMap<EffectId, Vec<Segment>>,
}

impl Default for VibrationConfig {
    fn default() -> Self {
        Self {
            default_amplitude: DEFAULT_AMPLITUDE,
            scale_level_gain: DEFAULT_SCALE_LEVEL_GAIN,
            scale_mode: ScaleMode::Exponential,
            scale_factors: None,
            external_scale_factors: None,
            ramp_down_duration_ms: 0,
            ramp_step_duration_ms: DEFAULT_RAMP_STEP_DURATION_MS,
            callbacks_extra_timeout_ms: DEFAULT_CALLBACKS_EXTRA_TIMEOUT_MS,
            callback_queue_capacity: DEFAULT_CALLBACK_QUEUE_CAPACITY,
            default_intensities: BTreeMap::new(),
            fallback_effects: BTreeMap::new(),
        }
    }
}

fn valid_factors(factors: &Option<Vec<f32>>) -> Option<&[f32]> {
    factors
        .as_deref()
        .filter(|f| f.len() == 3 && f.iter().all(|&x| x > 0.0))
}

fn non_negative_ms(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

impl VibrationConfig {
    /// Default amplitude normalised to `(0, 1]`.
    pub fn default_amplitude(&self) -> f32 {
        let raw = if (1..=255).contains(&self.default_amplitude) {
            self.default_amplitude
        } else {
            DEFAULT_AMPLITUDE
        };
        raw as f32 / 255.0
    }

    pub fn scale_level_gain(&self) -> f32 {
        if self.scale_level_gain > 1.0 {
            self.scale_level_gain
        } else {
            DEFAULT_SCALE_LEVEL_GAIN
        }
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    pub fn has_vibration_scale_factors(&self) -> bool {
        valid_factors(&self.scale_factors).is_some()
    }

    pub fn has_external_vibration_scale_factors(&self) -> bool {
        valid_factors(&self.external_scale_factors).is_some()
    }

    /// Device scale factor for `intensity`, or `default` when none is set.
    pub fn vibration_scale_factor(&self, intensity: Intensity, default: f32) -> f32 {
        Self::factor_for(valid_factors(&self.scale_factors), intensity, default)
    }

    /// Same as [`vibration_scale_factor`](Self::vibration_scale_factor) but
    /// for external vibrations, falling back to the regular factors.
    pub fn external_vibration_scale_factor(&self, intensity: Intensity, default: f32) -> f32 {
        match valid_factors(&self.external_scale_factors) {
            Some(factors) => Self::factor_for(Some(factors), intensity, default),
            None => self.vibration_scale_factor(intensity, default),
        }
    }

    fn factor_for(factors: Option<&[f32]>, intensity: Intensity, default: f32) -> f32 {
        let index = intensity.level() - 1;
        match factors {
            Some(f) if index >= 0 => f.get(index as usize).copied().unwrap_or(default),
            _ => default,
        }
    }

    pub fn ramp_down_duration(&self) -> Duration {
        non_negative_ms(self.ramp_down_duration_ms)
    }

    pub fn ramp_step_duration(&self) -> Duration {
        non_negative_ms(self.ramp_step_duration_ms)
    }

    pub fn callbacks_extra_timeout(&self) -> Duration {
        non_negative_ms(self.callbacks_extra_timeout_ms)
    }

    pub fn callback_queue_capacity(&self) -> usize {
        self.callback_queue_capacity.max(1)
    }

    /// Configured default intensity for `usage`, MEDIUM when unset.
    pub fn default_intensity(&self, usage: Usage) -> Intensity {
        self.default_intensities
            .get(&usage)
            .copied()
            .unwrap_or(Intensity::Medium)
    }

    pub fn fallback_effects(&self) -> &BTreeMap<EffectId, Vec<Segment>> {
        &self.fallback_effects
    }
}

// ── Actuator / manager descriptions ───────────────────────────────────────────

/// Which raw interface drives an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Remote,
    Legacy,
}

/// Description of one (simulated) actuator.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorConfig {
    pub backend: Backend,
    pub info: ActuatorInfo,
    pub hal_latency_ms: u64,
}

// ── ConfigManager ─────────────────────────────────────────────────────────────

/// Loads and holds the configuration from a YAML file.
#[derive(Debug, Default)]
pub struct ConfigManager {
    vibration: VibrationConfig,
    actuators: BTreeMap<ActuatorId, ActuatorConfig>,
    /// `None` when no manager section is present (legacy manager).
    manager_capabilities: Option<ManagerCapabilities>,
    loaded: bool,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path`, replacing everything loaded before.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or if the YAML is
    /// structurally invalid. Unknown names inside lists are skipped with a
    /// warning.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading vibration configuration from: {}", path.display());

        *self = Self::default();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        self.vibration = convert_vibration(file.vibration);
        for (id, entry) in file.actuators {
            let actuator = convert_actuator(id, entry);
            debug!(
                actuator = id,
                backend = ?actuator.backend,
                capabilities = ?actuator.info.capabilities,
                "actuator configured"
            );
            self.actuators.insert(id, actuator);
        }
        self.manager_capabilities = file.manager.map(|m| {
            m.capabilities.iter().fold(ManagerCapabilities::empty(), |acc, name| {
                match manager_capability_from_name(name) {
                    Some(c) => acc | c,
                    None => {
                        warn!(name = %name, "unknown manager capability, ignoring");
                        acc
                    }
                }
            })
        });

        self.loaded = true;
        info!(
            "Successfully loaded {} actuator(s), manager: {}",
            self.actuators.len(),
            if self.manager_capabilities.is_some() { "default" } else { "legacy" },
        );
        Ok(())
    }

    pub fn vibration(&self) -> &VibrationConfig {
        &self.vibration
    }

    pub fn actuators(&self) -> &BTreeMap<ActuatorId, ActuatorConfig> {
        &self.actuators
    }

    pub fn manager_capabilities(&self) -> Option<ManagerCapabilities> {
        self.manager_capabilities
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

fn convert_vibration(section: VibrationSection) -> VibrationConfig {
    let defaults = VibrationConfig::default();

    let scale_mode = match section.scale_mode.as_deref() {
        None | Some("exponential") => ScaleMode::Exponential,
        Some("table") => ScaleMode::Table,
        Some(other) => {
            warn!(mode = other, "unknown scale mode, using exponential");
            ScaleMode::Exponential
        }
    };

    let mut default_intensities = BTreeMap::new();
    for (usage, intensity) in &section.default_intensities {
        let Some(usage_value) = Usage::from_name(usage) else {
            warn!(usage = %usage, "unknown usage, ignoring");
            continue;
        };
        let value = Intensity::from_name(intensity).unwrap_or_else(|| {
            warn!(usage = %usage, intensity = %intensity, "invalid intensity, using medium");
            Intensity::Medium
        });
        default_intensities.insert(usage_value, value);
    }

    let mut fallback_effects = BTreeMap::new();
    for (name, primitives) in section.fallback_effects {
        let Some(effect) = EffectId::from_name(&name) else {
            warn!(effect = %name, "unknown fallback effect, ignoring");
            continue;
        };
        let segments: Vec<Segment> = primitives
            .iter()
            .filter_map(|p| match PrimitiveId::from_name(&p.primitive) {
                Some(id) => Some(Segment::primitive(id, p.scale, p.delay_ms)),
                None => {
                    warn!(effect = %name, primitive = %p.primitive, "unknown primitive in fallback, skipping");
                    None
                }
            })
            .collect();
        if !segments.is_empty() {
            fallback_effects.insert(effect, segments);
        }
    }

    VibrationConfig {
        default_amplitude: section.default_amplitude.unwrap_or(defaults.default_amplitude),
        scale_level_gain: section.scale_level_gain.unwrap_or(defaults.scale_level_gain),
        scale_mode,
        scale_factors: section.scale_factors,
        external_scale_factors: section.external_scale_factors,
        ramp_down_duration_ms: section.ramp_down_duration_ms.unwrap_or(defaults.ramp_down_duration_ms),
        ramp_step_duration_ms: section.ramp_step_duration_ms.unwrap_or(defaults.ramp_step_duration_ms),
        callbacks_extra_timeout_ms: section
            .callbacks_extra_timeout_ms
            .unwrap_or(defaults.callbacks_extra_timeout_ms),
        callback_queue_capacity: section
            .callback_queue_capacity
            .unwrap_or(defaults.callback_queue_capacity),
        default_intensities,
        fallback_effects,
    }
}

fn convert_actuator(id: ActuatorId, entry: ActuatorEntry) -> ActuatorConfig {
    let backend = match entry.backend.as_deref() {
        None | Some("remote") => Backend::Remote,
        Some("legacy") => Backend::Legacy,
        Some(other) => {
            warn!(actuator = id, backend = other, "unknown backend, using remote");
            Backend::Remote
        }
    };

    let mut info = ActuatorInfo::new(id);
    for name in &entry.capabilities {
        match capability_from_name(name) {
            Some(c) => info.capabilities |= c,
            None => warn!(actuator = id, name = %name, "unknown capability, ignoring"),
        }
    }
    info.supported_effects = entry.supported_effects.map(|table| {
        table
            .iter()
            .filter_map(|(name, &ms)| {
                let effect = EffectId::from_name(name);
                if effect.is_none() {
                    warn!(actuator = id, effect = %name, "unknown effect, ignoring");
                }
                effect.map(|e| (e, ms))
            })
            .collect()
    });
    for (name, &ms) in &entry.supported_primitives {
        match PrimitiveId::from_name(name) {
            Some(p) => {
                info.supported_primitives.insert(p, ms);
            }
            None => warn!(actuator = id, primitive = %name, "unknown primitive, ignoring"),
        }
    }
    if let Some(f) = entry.frequency {
        info.frequency_profile = FrequencyProfile {
            resonant_hz: f.resonant_hz,
            min_hz: f.min_hz,
            max_hz: f.max_hz,
        };
        if !info.frequency_profile.is_valid() {
            warn!(actuator = id, min_hz = f.min_hz, max_hz = f.max_hz, "invalid frequency band");
        }
    }
    info.composition_size_max = entry.composition_size_max;
    info.pwle_size_max = entry.pwle_size_max;
    info.pwle_primitive_duration_max_ms = entry.pwle_primitive_duration_max_ms;
    info.max_envelope_effect_size = entry.max_envelope_effect_size;
    if info.capabilities.contains(Capabilities::COMPOSE_EFFECTS) && info.supported_primitives.is_empty() {
        warn!(actuator = id, "compose_effects without any supported primitive");
    }

    ActuatorConfig {
        backend,
        info,
        hal_latency_ms: entry.hal_latency_ms,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
