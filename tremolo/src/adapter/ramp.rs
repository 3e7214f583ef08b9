/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Conversions between holds and ramps.

use super::SegmentAdapter;
use crate::effect::{Amplitude, RampSegment, Segment, StepSegment};
use crate::hal::{ActuatorInfo, Capabilities};

fn lerp(start: f32, end: f32, t: f32) -> f32 {
    start + (end - start) * t
}

/// Replace the segment at `index` with `replacement` and shift a repeat index
/// that points past it.
fn replace_at(
    segments: &mut Vec<Segment>,
    index: usize,
    replacement: Vec<Segment>,
    repeat_index: Option<usize>,
) -> Option<usize> {
    let k = replacement.len();
    segments.splice(index..=index, replacement);
    repeat_index.map(|r| if r > index { r + k - 1 } else { r })
}

// ── RampToStep ────────────────────────────────────────────────────────────────

/// Approximates ramps with a staircase of holds on actuators without PWLE
/// support.
pub struct RampToStepAdapter {
    step_duration_ms: u64,
}

impl RampToStepAdapter {
    pub fn new(step_duration_ms: u64) -> Self {
        Self { step_duration_ms }
    }

    fn staircase(&self, ramp: &RampSegment, keep_frequency: bool) -> Vec<Segment> {
        let frequency = |hz: f32| if keep_frequency { hz } else { 0.0 };
        if ramp.start_amplitude == ramp.end_amplitude && ramp.start_frequency_hz == ramp.end_frequency_hz {
            return vec![Segment::Step(StepSegment {
                amplitude: Amplitude::Level(ramp.start_amplitude),
                frequency_hz: frequency(ramp.start_frequency_hz),
                duration_ms: ramp.duration_ms,
            })];
        }
        let count = ramp.duration_ms.div_ceil(self.step_duration_ms).max(1);
        (0..count)
            .map(|i| {
                let t = if count > 1 { i as f32 / (count - 1) as f32 } else { 1.0 };
                let duration_ms = if i + 1 == count {
                    ramp.duration_ms - self.step_duration_ms * (count - 1)
                } else {
                    self.step_duration_ms
                };
                Segment::Step(StepSegment {
                    amplitude: Amplitude::Level(lerp(ramp.start_amplitude, ramp.end_amplitude, t)),
                    frequency_hz: frequency(lerp(ramp.start_frequency_hz, ramp.end_frequency_hz, t)),
                    duration_ms,
                })
            })
            .collect()
    }
}

impl SegmentAdapter for RampToStepAdapter {
    fn adapt(&self, info: &ActuatorInfo, segments: &mut Vec<Segment>, mut repeat_index: Option<usize>) -> Option<usize> {
        if info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS) || self.step_duration_ms == 0 {
            return repeat_index;
        }
        let keep_frequency = info.has_capability(Capabilities::FREQUENCY_CONTROL);
        let mut i = 0;
        while i < segments.len() {
            let Segment::Ramp(ramp) = segments[i] else {
                i += 1;
                continue;
            };
            let steps = self.staircase(&ramp, keep_frequency);
            let k = steps.len();
            repeat_index = replace_at(segments, i, steps, repeat_index);
            i += k;
        }
        repeat_index
    }
}

// ── StepToRamp ────────────────────────────────────────────────────────────────

/// Holds that carry an explicit frequency are played as flat ramps on
/// actuators with PWLE support.
pub struct StepToRampAdapter;

impl SegmentAdapter for StepToRampAdapter {
    fn adapt(&self, info: &ActuatorInfo, segments: &mut Vec<Segment>, repeat_index: Option<usize>) -> Option<usize> {
        if !info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS) {
            return repeat_index;
        }
        for segment in segments.iter_mut() {
            if let Segment::Step(step) = *segment {
                if step.frequency_hz != 0.0 {
                    let amplitude = step.amplitude.value();
                    *segment = Segment::Ramp(RampSegment {
                        start_amplitude: amplitude,
                        end_amplitude: amplitude,
                        start_frequency_hz: step.frequency_hz,
                        end_frequency_hz: step.frequency_hz,
                        duration_ms: step.duration_ms,
                    });
                }
            }
        }
        repeat_index
    }
}

// ── SplitRamps ────────────────────────────────────────────────────────────────

/// Splits ramps longer than the actuator's per-ramp limit into equal pieces.
pub struct SplitRampsAdapter;

impl SplitRampsAdapter {
    fn split(ramp: &RampSegment, max_ms: u64) -> Vec<Segment> {
        let count = ramp.duration_ms.div_ceil(max_ms);
        let base = ramp.duration_ms / count;
        let mut elapsed = 0;
        (0..count)
            .map(|i| {
                let duration_ms = if i + 1 == count { ramp.duration_ms - elapsed } else { base };
                let t0 = elapsed as f32 / ramp.duration_ms as f32;
                elapsed += duration_ms;
                let t1 = elapsed as f32 / ramp.duration_ms as f32;
                Segment::Ramp(RampSegment {
                    start_amplitude: lerp(ramp.start_amplitude, ramp.end_amplitude, t0),
                    end_amplitude: lerp(ramp.start_amplitude, ramp.end_amplitude, t1),
                    start_frequency_hz: lerp(ramp.start_frequency_hz, ramp.end_frequency_hz, t0),
                    end_frequency_hz: lerp(ramp.start_frequency_hz, ramp.end_frequency_hz, t1),
                    duration_ms,
                })
            })
            .collect()
    }
}

impl SegmentAdapter for SplitRampsAdapter {
    fn adapt(&self, info: &ActuatorInfo, segments: &mut Vec<Segment>, mut repeat_index: Option<usize>) -> Option<usize> {
        let max_ms = info.pwle_primitive_duration_max_ms;
        if max_ms == 0 || !info.has_capability(Capabilities::COMPOSE_PWLE_EFFECTS) {
            return repeat_index;
        }
        let mut i = 0;
        while i < segments.len() {
            match segments[i] {
                Segment::Ramp(ramp) if ramp.duration_ms > max_ms => {
                    let pieces = Self::split(&ramp, max_ms);
                    let k = pieces.len();
                    repeat_index = replace_at(segments, i, pieces, repeat_index);
                    i += k;
                }
                _ => i += 1,
            }
        }
        repeat_index
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
