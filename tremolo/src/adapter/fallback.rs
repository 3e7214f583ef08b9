/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::collections::BTreeMap;

use tracing::debug;

use super::SegmentAdapter;
use crate::effect::{EffectId, Segment};
use crate::hal::{ActuatorInfo, EffectSupport};

/// Replaces prebaked effects the actuator explicitly does not support with a
/// registered fallback composition, spliced in at the same position.
pub struct PrebakedFallbackAdapter {
    fallbacks: BTreeMap<EffectId, Vec<Segment>>,
}

impl PrebakedFallbackAdapter {
    pub fn new(fallbacks: BTreeMap<EffectId, Vec<Segment>>) -> Self {
        Self { fallbacks }
    }

    fn fallback_for(&self, info: &ActuatorInfo, segment: &Segment) -> Option<&Vec<Segment>> {
        match segment {
            Segment::Prebaked(p) if p.should_fallback && info.effect_support(p.effect_id) == EffectSupport::No => {
                self.fallbacks.get(&p.effect_id)
            }
            _ => None,
        }
    }
}

impl SegmentAdapter for PrebakedFallbackAdapter {
    fn adapt(&self, info: &ActuatorInfo, segments: &mut Vec<Segment>, mut repeat_index: Option<usize>) -> Option<usize> {
        let mut i = 0;
        while i < segments.len() {
            let Some(fallback) = self.fallback_for(info, &segments[i]).cloned() else {
                i += 1;
                continue;
            };
            let k = fallback.len();
            debug!(actuator = info.id, index = i, segments = k, "splicing prebaked fallback");
            segments.splice(i..=i, fallback);
            // Only a repeat target past the splice point moves.
            repeat_index = repeat_index.map(|r| if r > i { r + k - 1 } else { r });
            i += k;
        }
        repeat_index
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
