/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Declarative vibration requests.
//!
//! ```text
//! CombinedVibration ──┬── Mono(effect)            mirrored to every actuator
//!                     └── Stereo[(id, effect)..]  one effect per actuator
//!
//! VibrationEffect ──┬── Composed { segments, repeat_index }
//!                   └── Vendor   { opaque payload }
//! ```
//!
//! All types here are immutable values: every transform (`resolve`, `scale`,
//! `apply_effect_strength`, ...) returns a new effect.

pub mod segment;

pub use segment::{
    Amplitude, BasicPwleSegment, EffectId, PrebakedSegment, PrimitiveId, PrimitiveSegment,
    PwlePoint, PwleSegment, RampSegment, Segment, StepSegment,
};

use crate::hal::ActuatorId;

// ── Request attributes ────────────────────────────────────────────────────────

/// Prebaked effect strength understood by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EffectStrength {
    Light,
    #[default]
    Medium,
    Strong,
}

/// User-facing vibration intensity setting.
///
/// Ordered so that `current - default` yields the scale level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Intensity {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Intensity {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "off" => Some(Intensity::Off),
            "low" => Some(Intensity::Low),
            "medium" => Some(Intensity::Medium),
            "high" => Some(Intensity::High),
            _ => None,
        }
    }

    pub fn level(self) -> i32 {
        self as i32
    }
}

/// Usage category of a request, used to pick intensities and scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Usage {
    Unknown,
    Alarm,
    Ringtone,
    Notification,
    Communication,
    Touch,
    PhysicalEmulation,
    HardwareFeedback,
    Accessibility,
    Media,
}

impl Usage {
    pub const ALL: [Usage; 10] = [
        Usage::Unknown,
        Usage::Alarm,
        Usage::Ringtone,
        Usage::Notification,
        Usage::Communication,
        Usage::Touch,
        Usage::PhysicalEmulation,
        Usage::HardwareFeedback,
        Usage::Accessibility,
        Usage::Media,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unknown" => Some(Usage::Unknown),
            "alarm" => Some(Usage::Alarm),
            "ringtone" => Some(Usage::Ringtone),
            "notification" => Some(Usage::Notification),
            "communication" => Some(Usage::Communication),
            "touch" => Some(Usage::Touch),
            "physical_emulation" => Some(Usage::PhysicalEmulation),
            "hardware_feedback" => Some(Usage::HardwareFeedback),
            "accessibility" => Some(Usage::Accessibility),
            "media" => Some(Usage::Media),
            _ => None,
        }
    }
}

/// Who asked for the vibration; forwarded verbatim to telemetry hooks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub uid: u32,
    pub package: String,
}

impl CallerIdentity {
    pub fn new(uid: u32, package: impl Into<String>) -> Self {
        Self {
            uid,
            package: package.into(),
        }
    }
}

// ── ComposedEffect ────────────────────────────────────────────────────────────

/// Ordered segment list plus an optional repeat index.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedEffect {
    segments: Vec<Segment>,
    repeat_index: Option<usize>,
}

impl ComposedEffect {
    /// A `repeat_index` outside the segment list is dropped.
    pub fn new(segments: Vec<Segment>, repeat_index: Option<usize>) -> Self {
        let repeat_index = repeat_index.filter(|&i| i < segments.len());
        Self {
            segments,
            repeat_index,
        }
    }

    /// Single hold at the device default amplitude.
    pub fn one_shot(duration_ms: u64) -> Self {
        Self::new(
            vec![Segment::Step(StepSegment {
                amplitude: Amplitude::Default,
                frequency_hz: 0.0,
                duration_ms,
            })],
            None,
        )
    }

    /// Waveform with explicit per-timing amplitudes.
    ///
    /// Extra timings or amplitudes beyond the shorter of the two are ignored.
    pub fn waveform(timings: &[u64], amplitudes: &[Amplitude], repeat: Option<usize>) -> Self {
        let segments = timings
            .iter()
            .zip(amplitudes)
            .map(|(&duration_ms, &amplitude)| {
                Segment::Step(StepSegment {
                    amplitude,
                    frequency_hz: 0.0,
                    duration_ms,
                })
            })
            .collect();
        Self::new(segments, repeat)
    }

    /// On/off pattern: even positions are off, odd positions play at the
    /// default amplitude.
    pub fn on_off_pattern(timings: &[u64], repeat: Option<usize>) -> Self {
        let amplitudes: Vec<Amplitude> = (0..timings.len())
            .map(|i| {
                if i % 2 == 0 {
                    Amplitude::Level(0.0)
                } else {
                    Amplitude::Default
                }
            })
            .collect();
        Self::waveform(timings, &amplitudes, repeat)
    }

    pub fn prebaked(effect_id: EffectId, should_fallback: bool) -> Self {
        Self::new(vec![Segment::prebaked(effect_id, should_fallback)], None)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn repeat_index(&self) -> Option<usize> {
        self.repeat_index
    }

    /// Total duration: `None` if any segment's duration is unknown,
    /// `u64::MAX` for repeating effects.
    pub fn duration_ms(&self) -> Option<u64> {
        if self.repeat_index.is_some() {
            return Some(u64::MAX);
        }
        self.segments
            .iter()
            .try_fold(0u64, |acc, s| s.duration_ms().map(|d| acc.saturating_add(d)))
    }

    fn map_segments(&self, f: impl Fn(&Segment) -> Segment) -> Self {
        Self {
            segments: self.segments.iter().map(f).collect(),
            repeat_index: self.repeat_index,
        }
    }
}

// ── VendorEffect ──────────────────────────────────────────────────────────────

/// Opaque vendor-defined effect; its duration is unknown to the framework.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorEffect {
    pub vendor_data: Vec<u8>,
    pub strength: EffectStrength,
    pub scale: f32,
    pub adaptive_scale: f32,
}

impl VendorEffect {
    pub fn new(vendor_data: Vec<u8>) -> Self {
        Self {
            vendor_data,
            strength: EffectStrength::Medium,
            scale: 1.0,
            adaptive_scale: 1.0,
        }
    }
}

// ── VibrationEffect ───────────────────────────────────────────────────────────

/// Effect played by one actuator.
#[derive(Debug, Clone, PartialEq)]
pub enum VibrationEffect {
    Composed(ComposedEffect),
    Vendor(VendorEffect),
}

impl VibrationEffect {
    /// `None` when the duration is only known to the hardware.
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            VibrationEffect::Composed(c) => c.duration_ms(),
            VibrationEffect::Vendor(_) => None,
        }
    }

    pub fn resolve(&self, default_amplitude: f32) -> Self {
        match self {
            VibrationEffect::Composed(c) => {
                VibrationEffect::Composed(c.map_segments(|s| s.resolve(default_amplitude)))
            }
            VibrationEffect::Vendor(v) => VibrationEffect::Vendor(v.clone()),
        }
    }

    pub fn apply_effect_strength(&self, strength: EffectStrength) -> Self {
        match self {
            VibrationEffect::Composed(c) => {
                VibrationEffect::Composed(c.map_segments(|s| s.apply_effect_strength(strength)))
            }
            VibrationEffect::Vendor(v) => VibrationEffect::Vendor(VendorEffect {
                strength,
                ..v.clone()
            }),
        }
    }

    pub fn scale(&self, factor: f32) -> Self {
        match self {
            VibrationEffect::Composed(c) => {
                VibrationEffect::Composed(c.map_segments(|s| s.scale(factor)))
            }
            VibrationEffect::Vendor(v) => VibrationEffect::Vendor(VendorEffect {
                scale: factor,
                ..v.clone()
            }),
        }
    }

    pub fn scale_linearly(&self, factor: f32) -> Self {
        match self {
            VibrationEffect::Composed(c) => {
                VibrationEffect::Composed(c.map_segments(|s| s.scale_linearly(factor)))
            }
            VibrationEffect::Vendor(v) => VibrationEffect::Vendor(VendorEffect {
                scale: factor,
                ..v.clone()
            }),
        }
    }

    /// Applied last, on top of the settings scale.
    pub fn apply_adaptive_scale(&self, factor: f32) -> Self {
        match self {
            VibrationEffect::Composed(c) => {
                VibrationEffect::Composed(c.map_segments(|s| s.scale_linearly(factor)))
            }
            VibrationEffect::Vendor(v) => VibrationEffect::Vendor(VendorEffect {
                adaptive_scale: factor,
                ..v.clone()
            }),
        }
    }
}

impl From<ComposedEffect> for VibrationEffect {
    fn from(c: ComposedEffect) -> Self {
        VibrationEffect::Composed(c)
    }
}

impl From<VendorEffect> for VibrationEffect {
    fn from(v: VendorEffect) -> Self {
        VibrationEffect::Vendor(v)
    }
}

// ── CombinedVibration ─────────────────────────────────────────────────────────

/// A whole request across one or many actuators.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedVibration {
    /// Same effect on every available actuator.
    Mono(VibrationEffect),
    /// Distinct effects, kept in construction order.
    Stereo(Vec<(ActuatorId, VibrationEffect)>),
}

impl CombinedVibration {
    pub fn mono(effect: impl Into<VibrationEffect>) -> Self {
        CombinedVibration::Mono(effect.into())
    }

    pub fn stereo() -> Self {
        CombinedVibration::Stereo(Vec::new())
    }

    /// Add or replace the effect for `id`. Replacing keeps the original
    /// position. No-op on a mono vibration.
    pub fn with_actuator(mut self, id: ActuatorId, effect: impl Into<VibrationEffect>) -> Self {
        if let CombinedVibration::Stereo(entries) = &mut self {
            let effect = effect.into();
            match entries.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = effect,
                None => entries.push((id, effect)),
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CombinedVibration::Mono(_) => false,
            CombinedVibration::Stereo(entries) => entries.is_empty(),
        }
    }

    /// Expand into `(actuator, effect)` pairs against the available ids.
    ///
    /// Mono follows `available` order; stereo follows construction order and
    /// keeps ids that are not available, so the caller can reject them.
    pub fn expand(&self, available: &[ActuatorId]) -> Vec<(ActuatorId, VibrationEffect)> {
        match self {
            CombinedVibration::Mono(effect) => {
                available.iter().map(|&id| (id, effect.clone())).collect()
            }
            CombinedVibration::Stereo(entries) => entries.clone(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
