/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-actuator segment adaptation and validation.
//!
//! Runs once per request, before any hardware is driven:
//!
//! ```text
//! segments ──► PrebakedFallback ──► RampToStep ──► StepToRamp ──► SplitRamps ──► validators
//!                 (splice)          (no PWLE)      (PWLE + freq)   (max ramp)      (all must pass)
//! ```
//!
//! Every adapter takes the segment list by `&mut` and returns the new repeat
//! index. Adapters and validators read [`ActuatorInfo`] only; they never
//! touch actuator state.

pub mod fallback;
pub mod ramp;
pub mod validate;

use std::collections::BTreeMap;

use tracing::warn;

use crate::effect::{ComposedEffect, EffectId, Segment, VibrationEffect};
use crate::hal::ActuatorInfo;

pub use fallback::PrebakedFallbackAdapter;
pub use ramp::{RampToStepAdapter, SplitRampsAdapter, StepToRampAdapter};
pub use validate::{BasicPwleValidator, PrebakedValidator, PrimitiveValidator, PwleV2Validator};

// ── Traits ────────────────────────────────────────────────────────────────────

/// Rewrites a segment list into something `info` can play.
pub trait SegmentAdapter: Send + Sync {
    /// Adapt `segments` in place and return the updated repeat index.
    fn adapt(&self, info: &ActuatorInfo, segments: &mut Vec<Segment>, repeat_index: Option<usize>) -> Option<usize>;
}

/// Decides whether `info` can play a segment list exactly as given.
pub trait SegmentValidator: Send + Sync {
    fn has_valid_segments(&self, info: &ActuatorInfo, segments: &[Segment]) -> bool;
}

// ── DeviceAdapter ─────────────────────────────────────────────────────────────

/// The fixed adapters chain followed by the validators chain.
pub struct DeviceAdapter {
    adapters: Vec<Box<dyn SegmentAdapter>>,
    validators: Vec<Box<dyn SegmentValidator>>,
}

impl DeviceAdapter {
    pub fn new(fallbacks: BTreeMap<EffectId, Vec<Segment>>, ramp_step_duration_ms: u64) -> Self {
        Self {
            adapters: vec![
                Box::new(PrebakedFallbackAdapter::new(fallbacks)),
                Box::new(RampToStepAdapter::new(ramp_step_duration_ms)),
                Box::new(StepToRampAdapter),
                Box::new(SplitRampsAdapter),
            ],
            validators: vec![
                Box::new(PwleV2Validator),
                Box::new(PrimitiveValidator),
                Box::new(BasicPwleValidator),
                Box::new(PrebakedValidator),
            ],
        }
    }

    /// Run the adapters chain over `segments`.
    pub fn adapt_segments(
        &self,
        info: &ActuatorInfo,
        segments: &mut Vec<Segment>,
        mut repeat_index: Option<usize>,
    ) -> Option<usize> {
        for adapter in &self.adapters {
            repeat_index = adapter.adapt(info, segments, repeat_index);
        }
        repeat_index.filter(|&i| i < segments.len())
    }

    pub fn has_valid_segments(&self, info: &ActuatorInfo, segments: &[Segment]) -> bool {
        self.validators.iter().all(|v| v.has_valid_segments(info, segments))
    }

    /// Adapt `effect` for `info`. `None` when the adapted effect still cannot
    /// be played.
    ///
    /// Vendor effects are opaque and pass through unchanged.
    pub fn adapt(&self, info: &ActuatorInfo, effect: &VibrationEffect) -> Option<VibrationEffect> {
        let composed = match effect {
            VibrationEffect::Composed(c) => c,
            VibrationEffect::Vendor(_) => return Some(effect.clone()),
        };
        let mut segments = composed.segments().to_vec();
        let repeat_index = self.adapt_segments(info, &mut segments, composed.repeat_index());
        if !self.has_valid_segments(info, &segments) {
            warn!(actuator = info.id, "effect has segments this actuator cannot play");
            return None;
        }
        Some(ComposedEffect::new(segments, repeat_index).into())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{PrimitiveId, RampSegment, VendorEffect};
    use crate::hal::Capabilities;

    fn info(caps: Capabilities) -> ActuatorInfo {
        let mut info = ActuatorInfo::new(0);
        info.capabilities = caps;
        info
    }

    fn ramp(start: f32, end: f32, duration_ms: u64) -> Segment {
        Segment::Ramp(RampSegment {
            start_amplitude: start,
            end_amplitude: end,
            start_frequency_hz: 0.0,
            end_frequency_hz: 0.0,
            duration_ms,
        })
    }

    #[test]
    fn chain_splices_fallback_then_converts_its_ramps() {
        let fallbacks = BTreeMap::from([(EffectId::TICK, vec![ramp(0.0, 1.0, 20)])]);
        let adapter = DeviceAdapter::new(fallbacks, 10);
        let mut info = info(Capabilities::empty());
        info.supported_effects = Some(BTreeMap::new());

        let effect = ComposedEffect::new(
            vec![Segment::prebaked(EffectId::TICK, true), Segment::step(0.5, 100)],
            Some(1),
        );
        let adapted = adapter.adapt(&info, &effect.into()).unwrap();
        let VibrationEffect::Composed(c) = adapted else {
            panic!("vendor")
        };
        // tick → 1 ramp → 2 steps of 10 ms; the hold moves to index 2.
        assert_eq!(c.segments().len(), 3);
        assert_eq!(c.repeat_index(), Some(2));
        assert!(c.segments().iter().all(|s| matches!(s, Segment::Step(_))));
    }

    #[test]
    fn any_invalid_segment_rejects_the_effect() {
        let adapter = DeviceAdapter::new(BTreeMap::new(), 5);
        let effect = ComposedEffect::new(
            vec![Segment::step(1.0, 10), Segment::primitive(PrimitiveId::SPIN, 1.0, 0)],
            None,
        );
        assert!(adapter.adapt(&info(Capabilities::COMPOSE_EFFECTS), &effect.into()).is_none());
    }

    #[test]
    fn vendor_effect_passes_through() {
        let adapter = DeviceAdapter::new(BTreeMap::new(), 5);
        let effect: VibrationEffect = VendorEffect::new(vec![7]).into();
        assert_eq!(adapter.adapt(&info(Capabilities::empty()), &effect), Some(effect));
    }

    #[test]
    fn unknown_support_keeps_prebaked_for_the_hardware_to_decide() {
        let adapter = DeviceAdapter::new(BTreeMap::new(), 5);
        let effect: VibrationEffect = ComposedEffect::prebaked(EffectId::POP, true).into();
        assert_eq!(adapter.adapt(&info(Capabilities::empty()), &effect), Some(effect));
    }
}
