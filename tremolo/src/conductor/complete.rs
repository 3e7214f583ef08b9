/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cleanup steps that end one actuator's effect.
//!
//! ```text
//! CompleteEffect ──► RampOff ──► RampOff ... ──► TurnOff
//!       │                                          ▲
//!       └──────────── no ramp needed ──────────────┘
//! ```
//!
//! Each of them turns the actuator off as soon as its completion callback
//! arrives; the rest of the chain is then skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::step::{ActuatorStepState, OffDeadline, StartTime, Step, StepContext, RAMP_OFF_AMPLITUDE_MIN};
use crate::hal::{ActuatorControl, ActuatorId, StepId};

// ── CompleteEffect ────────────────────────────────────────────────────────────

pub(crate) struct CompleteEffectStep {
    base: ActuatorStepState,
    cancelled: bool,
}

impl CompleteEffectStep {
    pub fn new(
        ctx: &mut StepContext,
        start: StartTime,
        cancelled: bool,
        actuator: Arc<dyn ActuatorControl>,
        deadline: OffDeadline,
    ) -> Self {
        Self {
            base: ActuatorStepState::new(ctx, start, actuator, deadline),
            cancelled,
        }
    }
}

impl Step for CompleteEffectStep {
    fn name(&self) -> &'static str {
        "CompleteEffect"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn is_cleanup(&self) -> bool {
        true
    }

    fn play(mut self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        if self.base.completion_received {
            self.base.stop_vibrating();
            return Vec::new();
        }

        let now = Instant::now();
        let config = ctx.config();
        let amplitude = self.base.actuator.current_amplitude();
        let ramp_down = match self.base.deadline.remaining_on(now, config.callbacks_extra_timeout()) {
            Some(remaining) => remaining.min(config.ramp_down_duration()),
            None => config.ramp_down_duration(),
        };
        let ramp_step = config.ramp_step_duration();

        if amplitude < RAMP_OFF_AMPLITUDE_MIN || ramp_step.is_zero() || ramp_down <= ramp_step {
            if self.cancelled {
                self.base.stop_vibrating();
                return Vec::new();
            }
            let at = self.base.deadline.turn_off_time(now);
            let deadline = self.base.deadline;
            return vec![Box::new(TurnOffStep::new(ctx, at, self.base.actuator, deadline))];
        }

        let steps = (ramp_down.as_millis() / ramp_step.as_millis()) as f32;
        let delta = amplitude / steps;
        let deadline = if self.cancelled {
            OffDeadline::At {
                at: now + ramp_down,
                awaiting: self.base.deadline.awaiting().unwrap_or(self.base.id),
            }
        } else {
            self.base.deadline
        };
        debug!(
            actuator = self.base.actuator_id(),
            duration_ms = ramp_down.as_millis() as u64,
            amplitude,
            delta,
            "ramping down"
        );
        let start = StartTime::At(self.base.start.instant().unwrap_or(now));
        vec![Box::new(RampOffStep::new(
            ctx,
            start,
            amplitude - delta,
            delta,
            self.base.actuator,
            deadline,
        ))]
    }

    fn cancel(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        if self.cancelled {
            // Cancelled twice: no more ramping.
            let now = Instant::now();
            return vec![Box::new(TurnOffStep::new(ctx, StartTime::At(now), self.base.actuator, self.base.deadline))];
        }
        self.base.cancel_to_cleanup(ctx)
    }

    fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {
        self.base.cancel_immediately();
    }

    fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        self.base.accept_completion(actuator, step, now)
    }
}

// ── RampOff ───────────────────────────────────────────────────────────────────

pub(crate) struct RampOffStep {
    base: ActuatorStepState,
    target: f32,
    delta: f32,
}

impl RampOffStep {
    pub fn new(
        ctx: &mut StepContext,
        start: StartTime,
        target: f32,
        delta: f32,
        actuator: Arc<dyn ActuatorControl>,
        deadline: OffDeadline,
    ) -> Self {
        Self {
            base: ActuatorStepState::new(ctx, start, actuator, deadline),
            target,
            delta,
        }
    }
}

impl Step for RampOffStep {
    fn name(&self) -> &'static str {
        "RampOff"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn is_cleanup(&self) -> bool {
        true
    }

    fn play(mut self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        if self.base.completion_received {
            self.base.stop_vibrating();
            return Vec::new();
        }
        let now = Instant::now();
        self.base.change_amplitude(self.target);

        let next_target = self.target - self.delta;
        if next_target < RAMP_OFF_AMPLITUDE_MIN {
            let at = self.base.deadline.turn_off_time(now);
            let deadline = self.base.deadline;
            return vec![Box::new(TurnOffStep::new(ctx, at, self.base.actuator, deadline))];
        }
        let start = self.base.start.instant().unwrap_or(now) + ctx.config().ramp_step_duration();
        let (delta, deadline) = (self.delta, self.base.deadline);
        vec![Box::new(RampOffStep::new(
            ctx,
            StartTime::At(start),
            next_target,
            delta,
            self.base.actuator,
            deadline,
        ))]
    }

    fn cancel(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let now = Instant::now();
        vec![Box::new(TurnOffStep::new(ctx, StartTime::At(now), self.base.actuator, self.base.deadline))]
    }

    fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {
        self.base.cancel_immediately();
    }

    fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        self.base.accept_completion(actuator, step, now)
    }
}

// ── TurnOff ───────────────────────────────────────────────────────────────────

pub(crate) struct TurnOffStep {
    base: ActuatorStepState,
}

impl TurnOffStep {
    pub fn new(
        ctx: &mut StepContext,
        start: StartTime,
        actuator: Arc<dyn ActuatorControl>,
        deadline: OffDeadline,
    ) -> Self {
        Self {
            base: ActuatorStepState::new(ctx, start, actuator, deadline),
        }
    }
}

impl Step for TurnOffStep {
    fn name(&self) -> &'static str {
        "TurnOff"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn is_cleanup(&self) -> bool {
        true
    }

    fn play(mut self: Box<Self>, _ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        if let Some(at) = self.base.start.instant() {
            let late = Instant::now().saturating_duration_since(at);
            if late > Duration::ZERO {
                debug!(actuator = self.base.actuator_id(), late_ms = late.as_millis() as u64, "turning off late");
            }
        }
        self.base.stop_vibrating();
        Vec::new()
    }

    fn cancel(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let now = Instant::now();
        vec![Box::new(TurnOffStep::new(ctx, StartTime::At(now), self.base.actuator, self.base.deadline))]
    }

    fn cancel_immediately(mut self: Box<Self>, _ctx: &mut StepContext) {
        self.base.stop_vibrating();
    }

    fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        self.base.accept_completion(actuator, step, now)
    }
}
