/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Batched composition steps: primitives, PWLE v1 ramps and PWLE v2
//! envelopes.
//!
//! Each step takes the longest run of same-kind segments starting at its
//! position, capped by the actuator's per-call limit (`0` = unlimited), and
//! hands it to the hardware in one call. The follow-up starts after the
//! duration the hardware reported.

use tokio::time::Instant;
use tracing::debug;

use super::step::{next_composed_step, ActuatorStepState, ComposedPosition, StartTime, Step, StepContext};
use crate::effect::{PrimitiveSegment, PwlePoint, PwleSegment, RampSegment, Segment};
use crate::hal::{ActuatorId, StepId};

/// Collect consecutive segments from `position` for which `pick` returns a
/// payload, at most `limit` of them.
fn collect_run<T>(position: &ComposedPosition, limit: usize, pick: impl Fn(&Segment) -> Option<T>) -> Vec<T> {
    let cap = if limit == 0 { usize::MAX } else { limit };
    position.effect.segments()[position.index.min(position.effect.segments().len())..]
        .iter()
        .map_while(pick)
        .take(cap)
        .collect()
}

/// Shared tail of every batch step: record the drive result and schedule
/// whatever comes after the batch.
fn finish_batch(
    mut base: ActuatorStepState,
    position: ComposedPosition,
    ctx: &mut StepContext,
    played: usize,
    result: i64,
) -> Vec<Box<dyn Step>> {
    let now = Instant::now();
    let start = if played == 0 {
        StartTime::At(base.start.instant().unwrap_or(now))
    } else {
        base.handle_on_result(ctx, result);
        base.next_start(now)
    };
    let index = position.advance(played.max(1));
    vec![next_composed_step(ctx, start, base.actuator, position.effect, index, base.deadline)]
}

// ── Primitives ────────────────────────────────────────────────────────────────

pub(crate) struct ComposePrimitivesStep {
    base: ActuatorStepState,
    position: ComposedPosition,
}

impl ComposePrimitivesStep {
    pub fn new(base: ActuatorStepState, position: ComposedPosition) -> Self {
        Self { base, position }
    }
}

impl Step for ComposePrimitivesStep {
    fn name(&self) -> &'static str {
        "ComposePrimitives"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn play(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let limit = self.base.actuator.info().composition_size_max;
        let batch: Vec<PrimitiveSegment> = collect_run(&self.position, limit, |s| match s {
            Segment::Primitive(p) => Some(*p),
            _ => None,
        });
        let result = if batch.is_empty() {
            0
        } else {
            let result = self.base.actuator.drive_composition(ctx.vibration(), self.base.id, &batch);
            debug!(actuator = self.base.actuator_id(), count = batch.len(), result, "composition");
            result
        };
        finish_batch(self.base, self.position, ctx, batch.len(), result)
    }

    fn cancel(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        self.base.cancel_to_cleanup(ctx)
    }

    fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {
        self.base.cancel_immediately();
    }

    fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        self.base.accept_completion(actuator, step, now)
    }
}

// ── PWLE v1 ───────────────────────────────────────────────────────────────────

pub(crate) struct ComposePwleStep {
    base: ActuatorStepState,
    position: ComposedPosition,
}

impl ComposePwleStep {
    pub fn new(base: ActuatorStepState, position: ComposedPosition) -> Self {
        Self { base, position }
    }
}

impl Step for ComposePwleStep {
    fn name(&self) -> &'static str {
        "ComposePwle"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn play(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let limit = self.base.actuator.info().pwle_size_max;
        let batch: Vec<RampSegment> = collect_run(&self.position, limit, |s| match s {
            Segment::Ramp(r) => Some(*r),
            _ => None,
        });
        let result = if batch.is_empty() {
            0
        } else {
            let result = self.base.actuator.drive_ramps(ctx.vibration(), self.base.id, &batch);
            debug!(actuator = self.base.actuator_id(), count = batch.len(), result, "pwle composition");
            result
        };
        finish_batch(self.base, self.position, ctx, batch.len(), result)
    }

    fn cancel(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        self.base.cancel_to_cleanup(ctx)
    }

    fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {
        self.base.cancel_immediately();
    }

    fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        self.base.accept_completion(actuator, step, now)
    }
}

// ── PWLE v2 ───────────────────────────────────────────────────────────────────

/// Control points for a run of envelope segments: the first segment's start
/// point at time 0, then every segment's end point.
pub(crate) fn envelope_points(segments: &[PwleSegment]) -> Vec<PwlePoint> {
    let Some(first) = segments.first() else {
        return Vec::new();
    };
    let mut points = Vec::with_capacity(segments.len() + 1);
    points.push(PwlePoint {
        amplitude: first.start_amplitude,
        frequency_hz: first.start_frequency_hz,
        time_ms: 0,
    });
    points.extend(segments.iter().map(|s| PwlePoint {
        amplitude: s.end_amplitude,
        frequency_hz: s.end_frequency_hz,
        time_ms: s.duration_ms,
    }));
    points
}

pub(crate) struct ComposePwleV2Step {
    base: ActuatorStepState,
    position: ComposedPosition,
}

impl ComposePwleV2Step {
    pub fn new(base: ActuatorStepState, position: ComposedPosition) -> Self {
        Self { base, position }
    }
}

impl Step for ComposePwleV2Step {
    fn name(&self) -> &'static str {
        "ComposePwleV2"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn play(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        // The limit counts control points, one more than segments.
        let max_points = self.base.actuator.info().max_envelope_effect_size;
        let limit = if max_points == 0 { 0 } else { max_points.saturating_sub(1).max(1) };
        let batch: Vec<PwleSegment> = collect_run(&self.position, limit, |s| match s {
            Segment::Pwle(p) => Some(*p),
            _ => None,
        });
        let result = if batch.is_empty() {
            0
        } else {
            let points = envelope_points(&batch);
            let result = self.base.actuator.drive_piecewise_waveform(ctx.vibration(), self.base.id, &points);
            debug!(actuator = self.base.actuator_id(), points = points.len(), result, "envelope composition");
            result
        };
        finish_batch(self.base, self.position, ctx, batch.len(), result)
    }

    fn cancel(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        self.base.cancel_to_cleanup(ctx)
    }

    fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {
        self.base.cancel_immediately();
    }

    fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        self.base.accept_completion(actuator, step, now)
    }
}
