/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Amplitude / intensity scaling.
//!
//! A scale level is the distance between the user's current intensity and
//! the default intensity for the usage. Playing at the default intensity
//! never scales an effect.
//!
//! | Level | Table factor | Exponential factor |
//! |---|---|---|
//! | -2 | 0.6 | `gain^-2` |
//! | -1 | 0.8 | `gain^-1` |
//! | 0 | 1.0 | 1.0 |
//! | 1 | 1.2 | `gain` |
//! | 2 | 1.4 | `gain^2` |

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{ScaleMode, VibrationConfig};
use crate::effect::{EffectStrength, Intensity, Usage, VibrationEffect};

const SCALE_FACTOR_NONE: f32 = 1.0;
const ADAPTIVE_SCALE_NONE: f32 = 1.0;

// ── Intensity settings ────────────────────────────────────────────────────────

/// Source of user intensity settings.
pub trait IntensityProvider: Send + Sync {
    fn default_intensity(&self, usage: Usage) -> Intensity;
    fn current_intensity(&self, usage: Usage) -> Intensity;
}

/// In-memory settings: configured defaults, overridable current values.
pub struct IntensitySettings {
    defaults: BTreeMap<Usage, Intensity>,
    current: Mutex<BTreeMap<Usage, Intensity>>,
}

impl IntensitySettings {
    pub fn from_config(config: &VibrationConfig) -> Self {
        let defaults = Usage::ALL
            .iter()
            .map(|&usage| (usage, config.default_intensity(usage)))
            .collect();
        Self {
            defaults,
            current: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_current(&self, usage: Usage, intensity: Intensity) {
        self.current.lock().insert(usage, intensity);
    }
}

impl IntensityProvider for IntensitySettings {
    fn default_intensity(&self, usage: Usage) -> Intensity {
        self.defaults.get(&usage).copied().unwrap_or(Intensity::Medium)
    }

    fn current_intensity(&self, usage: Usage) -> Intensity {
        self.current
            .lock()
            .get(&usage)
            .copied()
            .unwrap_or_else(|| self.default_intensity(usage))
    }
}

// ── ScaleLevel ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScaleLevel {
    VeryLow = -2,
    Low = -1,
    None = 0,
    High = 1,
    VeryHigh = 2,
}

impl ScaleLevel {
    pub fn from_delta(delta: i32) -> Option<Self> {
        match delta {
            -2 => Some(ScaleLevel::VeryLow),
            -1 => Some(ScaleLevel::Low),
            0 => Some(ScaleLevel::None),
            1 => Some(ScaleLevel::High),
            2 => Some(ScaleLevel::VeryHigh),
            _ => None,
        }
    }

    fn table_factor(self) -> f32 {
        match self {
            ScaleLevel::VeryLow => 0.6,
            ScaleLevel::Low => 0.8,
            ScaleLevel::None => SCALE_FACTOR_NONE,
            ScaleLevel::High => 1.2,
            ScaleLevel::VeryHigh => 1.4,
        }
    }
}

fn intensity_to_strength(intensity: Intensity) -> EffectStrength {
    match intensity {
        Intensity::Low => EffectStrength::Light,
        Intensity::Medium => EffectStrength::Medium,
        Intensity::High => EffectStrength::Strong,
        Intensity::Off => {
            warn!(?intensity, "unexpected intensity for effect strength");
            EffectStrength::Strong
        }
    }
}

// ── VibrationScaler ───────────────────────────────────────────────────────────

pub struct VibrationScaler {
    config: Arc<VibrationConfig>,
    intensities: Arc<dyn IntensityProvider>,
    adaptive_scales: Mutex<BTreeMap<Usage, f32>>,
}

impl VibrationScaler {
    pub fn new(config: Arc<VibrationConfig>, intensities: Arc<dyn IntensityProvider>) -> Self {
        Self {
            config,
            intensities,
            adaptive_scales: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &VibrationConfig {
        &self.config
    }

    pub fn scale_level(&self, usage: Usage) -> ScaleLevel {
        let current = self.intensities.current_intensity(usage);
        if current == Intensity::Off {
            return ScaleLevel::None;
        }
        let delta = current.level() - self.intensities.default_intensity(usage).level();
        ScaleLevel::from_delta(delta).unwrap_or_else(|| {
            warn!(?usage, delta, "invalid scale level, not scaling");
            ScaleLevel::None
        })
    }

    /// Scale factor for `usage`. Device-configured factors take precedence
    /// over the level-derived one.
    pub fn scale_factor(&self, usage: Usage, external: bool) -> f32 {
        let current = self.intensities.current_intensity(usage);
        if current == Intensity::Off {
            return SCALE_FACTOR_NONE;
        }
        let level_factor = self.level_to_factor(self.scale_level(usage));
        if external {
            self.config.external_vibration_scale_factor(current, level_factor)
        } else {
            self.config.vibration_scale_factor(current, level_factor)
        }
    }

    fn level_to_factor(&self, level: ScaleLevel) -> f32 {
        match self.config.scale_mode() {
            ScaleMode::Table => level.table_factor(),
            ScaleMode::Exponential => {
                if level == ScaleLevel::None {
                    return SCALE_FACTOR_NONE;
                }
                let gain = self.config.scale_level_gain();
                let factor = gain.powi(level as i32);
                if factor > 0.0 {
                    factor
                } else {
                    warn!(?level, gain, factor, "invalid scale factor, not scaling");
                    SCALE_FACTOR_NONE
                }
            }
        }
    }

    pub fn adaptive_scale(&self, usage: Usage) -> f32 {
        self.adaptive_scales
            .lock()
            .get(&usage)
            .copied()
            .unwrap_or(ADAPTIVE_SCALE_NONE)
    }

    fn effect_strength(&self, usage: Usage) -> EffectStrength {
        let mut intensity = self.intensities.current_intensity(usage);
        if intensity == Intensity::Off {
            intensity = self.intensities.default_intensity(usage);
        }
        intensity_to_strength(intensity)
    }

    /// Resolve, apply strength, scale, then the adaptive scale on top.
    /// Prebaked segments get their strength here and nowhere else.
    pub fn scale(&self, effect: &VibrationEffect, usage: Usage) -> VibrationEffect {
        let strength = self.effect_strength(usage);
        let factor = self.scale_factor(usage, false);
        let adaptive = self.adaptive_scale(usage);
        debug!(?usage, ?strength, factor, adaptive, "scaling effect");

        let resolved = effect
            .resolve(self.config.default_amplitude())
            .apply_effect_strength(strength);
        let scaled = if self.config.scale_mode() == ScaleMode::Table && self.config.has_vibration_scale_factors() {
            resolved.scale_linearly(factor)
        } else {
            resolved.scale(factor)
        };
        scaled.apply_adaptive_scale(adaptive)
    }

    pub fn update_adaptive_scale(&self, usage: Usage, scale: f32) {
        self.adaptive_scales.lock().insert(usage, scale);
    }

    pub fn remove_adaptive_scale(&self, usage: Usage) {
        self.adaptive_scales.lock().remove(&usage);
    }

    pub fn clear_adaptive_scales(&self) {
        self.adaptive_scales.lock().clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
