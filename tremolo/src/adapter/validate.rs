/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Validators. Each one owns a single segment kind and passes every other
//! kind through, so the exhaustive matches below are where a new kind has to
//! be classified.

use tracing::warn;

use super::SegmentValidator;
use crate::effect::Segment;
use crate::hal::{ActuatorInfo, Capabilities, EffectSupport};

/// PWLE v2 needs the capability and both frequencies inside the band.
pub struct PwleV2Validator;

impl SegmentValidator for PwleV2Validator {
    fn has_valid_segments(&self, info: &ActuatorInfo, segments: &[Segment]) -> bool {
        segments.iter().all(|segment| match segment {
            Segment::Pwle(p) => {
                let band = &info.frequency_profile;
                info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS_V2)
                    && band.contains(p.start_frequency_hz)
                    && band.contains(p.end_frequency_hz)
            }
            Segment::Step(_)
            | Segment::Prebaked(_)
            | Segment::Primitive(_)
            | Segment::Ramp(_)
            | Segment::BasicPwle(_) => true,
        })
    }
}

pub struct PrimitiveValidator;

impl SegmentValidator for PrimitiveValidator {
    fn has_valid_segments(&self, info: &ActuatorInfo, segments: &[Segment]) -> bool {
        segments.iter().all(|segment| match segment {
            Segment::Primitive(p) => info.is_primitive_supported(p.primitive),
            Segment::Step(_)
            | Segment::Prebaked(_)
            | Segment::Ramp(_)
            | Segment::Pwle(_)
            | Segment::BasicPwle(_) => true,
        })
    }
}

/// Basic PWLE must have been converted before it gets here.
pub struct BasicPwleValidator;

impl SegmentValidator for BasicPwleValidator {
    fn has_valid_segments(&self, info: &ActuatorInfo, segments: &[Segment]) -> bool {
        let found = segments.iter().any(|segment| match segment {
            Segment::BasicPwle(_) => true,
            Segment::Step(_)
            | Segment::Prebaked(_)
            | Segment::Primitive(_)
            | Segment::Ramp(_)
            | Segment::Pwle(_) => false,
        });
        if found {
            warn!(actuator = info.id, "unconverted basic PWLE segment reached validation");
        }
        !found
    }
}

/// Rejects prebaked ids the actuator says it does not support. Unknown
/// support is left to the drive call.
pub struct PrebakedValidator;

impl SegmentValidator for PrebakedValidator {
    fn has_valid_segments(&self, info: &ActuatorInfo, segments: &[Segment]) -> bool {
        segments.iter().all(|segment| match segment {
            Segment::Prebaked(p) => info.effect_support(p.effect_id) != EffectSupport::No,
            Segment::Step(_)
            | Segment::Primitive(_)
            | Segment::Ramp(_)
            | Segment::Pwle(_)
            | Segment::BasicPwle(_) => true,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
