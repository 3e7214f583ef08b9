/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Prebaked and vendor effect steps.

use tokio::time::Instant;
use tracing::debug;

use super::complete::CompleteEffectStep;
use super::step::{next_composed_step, ActuatorStepState, ComposedPosition, StartTime, Step, StepContext};
use crate::effect::{Segment, VendorEffect};
use crate::hal::{ActuatorId, StepId};

// ── Prebaked ──────────────────────────────────────────────────────────────────

pub(crate) struct PerformPrebakedStep {
    base: ActuatorStepState,
    position: ComposedPosition,
}

impl PerformPrebakedStep {
    pub fn new(base: ActuatorStepState, position: ComposedPosition) -> Self {
        Self { base, position }
    }
}

impl Step for PerformPrebakedStep {
    fn name(&self) -> &'static str {
        "PerformPrebaked"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn play(mut self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let now = Instant::now();
        let start = match self.position.segment() {
            Some(Segment::Prebaked(prebaked)) => {
                let prebaked = *prebaked;
                // Fallbacks were substituted before the vibration started.
                let result = self.base.actuator.drive_prebaked(ctx.vibration(), self.base.id, &prebaked);
                debug!(actuator = self.base.actuator_id(), effect = ?prebaked.effect_id, result, "prebaked");
                self.base.handle_on_result(ctx, result);
                self.base.next_start(now)
            }
            _ => StartTime::At(self.base.start.instant().unwrap_or(now)),
        };
        let index = self.position.advance(1);
        vec![next_composed_step(
            ctx,
            start,
            self.base.actuator,
            self.position.effect,
            index,
            self.base.deadline,
        )]
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

// ── Vendor ────────────────────────────────────────────────────────────────────

/// Opaque vendor payload. Its duration is never known, so completion only
/// comes from the actuator callback or a cancel.
pub(crate) struct PerformVendorStep {
    base: ActuatorStepState,
    effect: VendorEffect,
}

impl PerformVendorStep {
    pub fn new(base: ActuatorStepState, effect: VendorEffect) -> Self {
        Self { base, effect }
    }
}

impl Step for PerformVendorStep {
    fn name(&self) -> &'static str {
        "PerformVendor"
    }

    fn start_time(&self) -> StartTime {
        self.base.start
    }

    fn actuator(&self) -> Option<ActuatorId> {
        Some(self.base.actuator_id())
    }

    fn play(mut self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let now = Instant::now();
        let result = self.base.actuator.drive_vendor_effect(ctx.vibration(), self.base.id, &self.effect);
        debug!(actuator = self.base.actuator_id(), result, "vendor effect");
        self.base.handle_on_result(ctx, result);
        let start = self.base.next_start(now);
        let deadline = self.base.deadline;
        vec![Box::new(CompleteEffectStep::new(ctx, start, false, self.base.actuator, deadline))]
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
