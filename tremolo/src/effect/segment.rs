/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Atomic waveform units.
//!
//! Every kind-specific decision in the crate (validation, adaptation, drive
//! dispatch, step selection) matches on [`Segment`] exhaustively, so adding a
//! kind forces each of those sites to be revisited.
//!
//! | Kind | Played by | Duration known? |
//! |---|---|---|
//! | `Step` | `drive_for_duration` + `set_amplitude` | yes |
//! | `Prebaked` | `drive_prebaked` | no (hardware reports it) |
//! | `Primitive` | `drive_composition` | no (depends on the actuator table) |
//! | `Ramp` | `drive_ramps` (PWLE v1) | yes |
//! | `Pwle` | `drive_piecewise_waveform` (PWLE v2) | yes |
//! | `BasicPwle` | never, must be converted upstream | yes |

use super::EffectStrength;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Hardware prebaked effect id.
///
/// A newtype rather than an enum: hardware may report ids this crate has no
/// name for, and those must survive the round trip untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EffectId(pub i32);

impl EffectId {
    pub const CLICK: EffectId = EffectId(0);
    pub const DOUBLE_CLICK: EffectId = EffectId(1);
    pub const TICK: EffectId = EffectId(2);
    pub const THUD: EffectId = EffectId(3);
    pub const POP: EffectId = EffectId(4);
    pub const HEAVY_CLICK: EffectId = EffectId(5);
    pub const TEXTURE_TICK: EffectId = EffectId(21);

    /// Parse a config-file name such as `"click"` or `"heavy_click"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "click" => Some(Self::CLICK),
            "double_click" => Some(Self::DOUBLE_CLICK),
            "tick" => Some(Self::TICK),
            "thud" => Some(Self::THUD),
            "pop" => Some(Self::POP),
            "heavy_click" => Some(Self::HEAVY_CLICK),
            "texture_tick" => Some(Self::TEXTURE_TICK),
            _ => None,
        }
    }
}

impl std::fmt::Display for EffectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            Self::CLICK => "CLICK",
            Self::DOUBLE_CLICK => "DOUBLE_CLICK",
            Self::TICK => "TICK",
            Self::THUD => "THUD",
            Self::POP => "POP",
            Self::HEAVY_CLICK => "HEAVY_CLICK",
            Self::TEXTURE_TICK => "TEXTURE_TICK",
            EffectId(other) => return write!(f, "{}", other),
        };
        f.write_str(name)
    }
}

/// Composition primitive id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimitiveId(pub i32);

impl PrimitiveId {
    pub const NOOP: PrimitiveId = PrimitiveId(0);
    pub const CLICK: PrimitiveId = PrimitiveId(1);
    pub const THUD: PrimitiveId = PrimitiveId(2);
    pub const SPIN: PrimitiveId = PrimitiveId(3);
    pub const QUICK_RISE: PrimitiveId = PrimitiveId(4);
    pub const SLOW_RISE: PrimitiveId = PrimitiveId(5);
    pub const QUICK_FALL: PrimitiveId = PrimitiveId(6);
    pub const TICK: PrimitiveId = PrimitiveId(7);
    pub const LOW_TICK: PrimitiveId = PrimitiveId(8);

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "noop" => Some(Self::NOOP),
            "click" => Some(Self::CLICK),
            "thud" => Some(Self::THUD),
            "spin" => Some(Self::SPIN),
            "quick_rise" => Some(Self::QUICK_RISE),
            "slow_rise" => Some(Self::SLOW_RISE),
            "quick_fall" => Some(Self::QUICK_FALL),
            "tick" => Some(Self::TICK),
            "low_tick" => Some(Self::LOW_TICK),
            _ => None,
        }
    }
}

// ── Amplitude scaling curves ──────────────────────────────────────────────────

/// Gamma applied to scale factors before they touch an intensity.
const SCALE_GAMMA: f32 = 0.65;

/// Gamma-corrected scaling of a `[0, 1]` intensity.
///
/// Scaling down is a plain multiplication by the corrected factor. Scaling up
/// goes through a normalised `tanh` curve so the result converges to 1.0
/// instead of clipping.
pub(crate) fn scale_intensity(intensity: f32, factor: f32) -> f32 {
    let scale = factor.powf(1.0 / SCALE_GAMMA);
    if factor <= 1.0 {
        return (intensity * scale).clamp(0.0, 1.0);
    }
    let extra_scale = factor.powf(4.0 - factor);
    let x = intensity * scale * extra_scale;
    let max_x = scale * extra_scale;
    let exp_x = x.exp();
    let exp_max_x = max_x.exp();
    let a = (exp_max_x + 1.0) / (exp_max_x - 1.0);
    let fx = (exp_x - 1.0) / (exp_x + 1.0);
    (a * fx).clamp(0.0, 1.0)
}

/// Linear scaling of a `[0, 1]` intensity, clamped.
pub(crate) fn scale_linearly(intensity: f32, factor: f32) -> f32 {
    (intensity * factor).clamp(0.0, 1.0)
}

// ── Amplitude ─────────────────────────────────────────────────────────────────

/// Amplitude of a hold segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amplitude {
    /// Placeholder resolved to the device default amplitude before playback.
    Default,
    /// Normalised level in `[0, 1]`. `0.0` means the actuator is off.
    Level(f32),
}

impl Amplitude {
    /// Numeric value, treating an unresolved default as full scale.
    pub fn value(self) -> f32 {
        match self {
            Amplitude::Default => 1.0,
            Amplitude::Level(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        matches!(self, Amplitude::Level(v) if v == 0.0)
    }

    fn map(self, f: impl Fn(f32) -> f32) -> Self {
        match self {
            Amplitude::Default => Amplitude::Default,
            Amplitude::Level(v) => Amplitude::Level(f(v)),
        }
    }
}

// ── Segment payloads ──────────────────────────────────────────────────────────

/// Hold an amplitude (and optionally a frequency) for a fixed duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSegment {
    pub amplitude: Amplitude,
    /// `0.0` means "actuator default / resonant frequency".
    pub frequency_hz: f32,
    pub duration_ms: u64,
}

/// A hardware prebaked effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrebakedSegment {
    pub effect_id: EffectId,
    pub strength: EffectStrength,
    /// Whether an unsupported id may be replaced by a registered fallback.
    pub should_fallback: bool,
}

/// One primitive of a composition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveSegment {
    pub primitive: PrimitiveId,
    pub scale: f32,
    pub delay_ms: u32,
}

/// Linear ramp between two amplitude/frequency pairs (PWLE v1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampSegment {
    pub start_amplitude: f32,
    pub end_amplitude: f32,
    pub start_frequency_hz: f32,
    pub end_frequency_hz: f32,
    pub duration_ms: u64,
}

/// Envelope segment in absolute frequency (PWLE v2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwleSegment {
    pub start_amplitude: f32,
    pub end_amplitude: f32,
    pub start_frequency_hz: f32,
    pub end_frequency_hz: f32,
    pub duration_ms: u64,
}

/// Legacy two-point envelope in perceptual units (intensity / sharpness).
///
/// Must be converted to [`PwleSegment`]s before it reaches an actuator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicPwleSegment {
    pub start_intensity: f32,
    pub end_intensity: f32,
    pub start_sharpness: f32,
    pub end_sharpness: f32,
    pub duration_ms: u64,
}

/// One control point handed to `drive_piecewise_waveform`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwlePoint {
    pub amplitude: f32,
    pub frequency_hz: f32,
    pub time_ms: u64,
}

// ── Segment ───────────────────────────────────────────────────────────────────

/// Closed set of segment kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Step(StepSegment),
    Prebaked(PrebakedSegment),
    Primitive(PrimitiveSegment),
    Ramp(RampSegment),
    Pwle(PwleSegment),
    BasicPwle(BasicPwleSegment),
}

impl Segment {
    pub fn step(amplitude: f32, duration_ms: u64) -> Self {
        Segment::Step(StepSegment {
            amplitude: Amplitude::Level(amplitude),
            frequency_hz: 0.0,
            duration_ms,
        })
    }

    pub fn prebaked(effect_id: EffectId, should_fallback: bool) -> Self {
        Segment::Prebaked(PrebakedSegment {
            effect_id,
            strength: EffectStrength::Medium,
            should_fallback,
        })
    }

    pub fn primitive(primitive: PrimitiveId, scale: f32, delay_ms: u32) -> Self {
        Segment::Primitive(PrimitiveSegment {
            primitive,
            scale,
            delay_ms,
        })
    }

    /// Duration in milliseconds, or `None` when only the hardware knows it.
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Segment::Step(s) => Some(s.duration_ms),
            Segment::Ramp(s) => Some(s.duration_ms),
            Segment::Pwle(s) => Some(s.duration_ms),
            Segment::BasicPwle(s) => Some(s.duration_ms),
            Segment::Prebaked(_) | Segment::Primitive(_) => None,
        }
    }

    /// Replace [`Amplitude::Default`] with `default_amplitude`.
    pub fn resolve(&self, default_amplitude: f32) -> Self {
        match self {
            Segment::Step(s) if s.amplitude == Amplitude::Default => Segment::Step(StepSegment {
                amplitude: Amplitude::Level(default_amplitude),
                ..*s
            }),
            other => other.clone(),
        }
    }

    pub fn apply_effect_strength(&self, strength: EffectStrength) -> Self {
        match self {
            Segment::Prebaked(p) => Segment::Prebaked(PrebakedSegment { strength, ..*p }),
            other => other.clone(),
        }
    }

    /// Gamma-corrected scaling of every amplitude carried by the segment.
    pub fn scale(&self, factor: f32) -> Self {
        self.map_amplitudes(|v| scale_intensity(v, factor))
    }

    pub fn scale_linearly(&self, factor: f32) -> Self {
        self.map_amplitudes(|v| scale_linearly(v, factor))
    }

    fn map_amplitudes(&self, f: impl Fn(f32) -> f32) -> Self {
        match self {
            Segment::Step(s) => Segment::Step(StepSegment {
                amplitude: s.amplitude.map(&f),
                ..*s
            }),
            Segment::Prebaked(p) => Segment::Prebaked(*p),
            Segment::Primitive(p) => Segment::Primitive(PrimitiveSegment {
                scale: f(p.scale),
                ..*p
            }),
            Segment::Ramp(r) => Segment::Ramp(RampSegment {
                start_amplitude: f(r.start_amplitude),
                end_amplitude: f(r.end_amplitude),
                ..*r
            }),
            Segment::Pwle(p) => Segment::Pwle(PwleSegment {
                start_amplitude: f(p.start_amplitude),
                end_amplitude: f(p.end_amplitude),
                ..*p
            }),
            Segment::BasicPwle(b) => Segment::BasicPwle(BasicPwleSegment {
                start_intensity: f(b.start_intensity),
                end_intensity: f(b.end_intensity),
                ..*b
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_down_is_gamma_corrected_multiplication() {
        let scaled = scale_intensity(0.5, 0.8);
        let expected = 0.5 * 0.8f32.powf(1.0 / SCALE_GAMMA);
        assert!((scaled - expected).abs() < 1e-6);
        assert!(scaled < 0.5 * 0.8, "gamma pushes scale-down further");
    }

    #[test]
    fn scale_up_never_exceeds_full_scale() {
        for factor in [1.2f32, 1.4, 1.96] {
            let full = scale_intensity(1.0, factor);
            assert!((full - 1.0).abs() < 1e-5, "factor {} → {}", factor, full);
            let half = scale_intensity(0.5, factor);
            assert!(half > 0.5 && half < 1.0, "factor {} → {}", factor, half);
        }
    }

    #[test]
    fn unit_factor_is_identity() {
        assert!((scale_intensity(0.3, 1.0) - 0.3).abs() < 1e-6);
        assert_eq!(scale_linearly(0.3, 1.0), 0.3);
    }

    #[test]
    fn resolve_only_touches_default_amplitude() {
        let default = Segment::Step(StepSegment {
            amplitude: Amplitude::Default,
            frequency_hz: 0.0,
            duration_ms: 10,
        });
        assert_eq!(default.resolve(0.6), Segment::step(0.6, 10));
        assert_eq!(Segment::step(0.2, 10).resolve(0.6), Segment::step(0.2, 10));
    }

    #[test]
    fn zero_amplitude_survives_scaling() {
        let off = Segment::step(0.0, 50).scale(1.4);
        match off {
            Segment::Step(s) => assert!(s.amplitude.is_zero()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn effect_strength_only_applies_to_prebaked() {
        let p = Segment::prebaked(EffectId::CLICK, true).apply_effect_strength(EffectStrength::Strong);
        assert!(matches!(p, Segment::Prebaked(PrebakedSegment { strength: EffectStrength::Strong, .. })));
        let s = Segment::step(1.0, 10);
        assert_eq!(s.apply_effect_strength(EffectStrength::Light), s);
    }

    #[test]
    fn effect_names_parse_and_display() {
        assert_eq!(EffectId::from_name("heavy_click"), Some(EffectId::HEAVY_CLICK));
        assert_eq!(EffectId::from_name("nope"), None);
        assert_eq!(EffectId::TICK.to_string(), "TICK");
        assert_eq!(EffectId(99).to_string(), "99");
        assert_eq!(PrimitiveId::from_name("quick_rise"), Some(PrimitiveId::QUICK_RISE));
    }
}
