/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Amplitude holds.
//!
//! A run of non-zero holds is driven by a single on call; the steps that
//! follow inside the run only re-program the amplitude. Every follow-up is
//! scheduled from this step's own start time so scheduling latency never
//! accumulates along the waveform.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::step::{next_composed_step, ActuatorStepState, ComposedPosition, StartTime, Step, StepContext};
use crate::effect::Segment;
use crate::hal::{ActuatorId, StepId};

pub(crate) struct SetAmplitudeStep {
    base: ActuatorStepState,
    position: ComposedPosition,
}

impl SetAmplitudeStep {
    pub fn new(base: ActuatorStepState, position: ComposedPosition) -> Self {
        Self { base, position }
    }

    fn next_steps(self, ctx: &mut StepContext, start: StartTime, played: usize) -> Vec<Box<dyn Step>> {
        let index = self.position.advance(played);
        vec![next_composed_step(
            ctx,
            start,
            self.base.actuator,
            self.position.effect,
            index,
            self.base.deadline,
        )]
    }

    /// The actuator stopped before this step was due: turn it back on for
    /// the rest of the run plus the time left until `start`.
    fn turn_back_on(&mut self, ctx: &mut StepContext, until_start: Duration) {
        let on = self.position.on_duration_ms(ctx.config().ramp_down_duration());
        if on == 0 {
            return;
        }
        let duration = on + until_start.as_millis() as u64;
        let expected = self.base.actuator.current_amplitude();
        debug!(
            actuator = self.base.actuator_id(),
            step = self.base.id,
            duration_ms = duration,
            "actuator stopped early, turning it back on"
        );
        if self.base.start_vibrating(ctx, duration) > 0 && expected > 0.0 {
            self.base.change_amplitude(expected);
        }
    }
}

impl Step for SetAmplitudeStep {
    fn name(&self) -> &'static str {
        "SetAmplitude"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn play(mut self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let now = Instant::now();
        let start = self.base.start.instant().unwrap_or(now);

        if self.base.completion_received && now < start {
            self.turn_back_on(ctx, start - now);
            self.base.completion_received = false;
            // Run again at the original time.
            return vec![self as Box<dyn Step>];
        }

        let segment = match self.position.segment() {
            Some(Segment::Step(s)) => Some(*s),
            Some(other) => {
                warn!(actuator = self.base.actuator_id(), segment = ?other, "not an amplitude hold, skipping");
                None
            }
            None => None,
        };
        let Some(segment) = segment.filter(|s| s.duration_ms > 0) else {
            return self.next_steps(ctx, StartTime::At(start), 1);
        };

        let amplitude = segment.amplitude.value();
        if amplitude == 0.0 {
            if self.base.deadline.is_pending(now) || self.base.actuator.is_active() {
                self.base.stop_vibrating();
            }
        } else {
            if !self.base.deadline.covers(start) {
                let on = self.position.on_duration_ms(ctx.config().ramp_down_duration());
                if on > 0 {
                    self.base.start_vibrating(ctx, on);
                }
            }
            self.base.change_amplitude(amplitude);
        }

        let next = StartTime::At(start + Duration::from_millis(segment.duration_ms));
        self.next_steps(ctx, next, 1)
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
