/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Entry step of a combined vibration.
//!
//! Starts every actuator's effect at the same instant, through a prepared
//! synchronized group when there is more than one actuator and the manager
//! can sync that combination. Any failure unwinds everything already
//! started before the step returns.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::finish::FinishStep;
use super::step::{first_actuator_step, StartTime, Step, StepContext};
use crate::effect::{CombinedVibration, Segment, VibrationEffect};
use crate::hal::{ActuatorControl, ActuatorId, ManagerCapabilities, INDEFINITE};

/// Effects resolved against the registry, in start order.
pub(crate) type DeviceEffectMap = Vec<(ActuatorId, Arc<dyn ActuatorControl>, VibrationEffect)>;

/// Manager capabilities a synchronized start of `effects` needs.
pub(crate) fn required_sync_capabilities(effects: &DeviceEffectMap) -> ManagerCapabilities {
    let mut prepare = ManagerCapabilities::empty();
    for (_, _, effect) in effects {
        prepare |= match effect {
            VibrationEffect::Vendor(_) => ManagerCapabilities::PREPARE_PERFORM,
            VibrationEffect::Composed(composed) => match composed.segments().first() {
                Some(Segment::Prebaked(_)) => ManagerCapabilities::PREPARE_PERFORM,
                Some(Segment::Step(_)) => ManagerCapabilities::PREPARE_ON,
                Some(Segment::Primitive(_)) => ManagerCapabilities::PREPARE_COMPOSE,
                _ => ManagerCapabilities::empty(),
            },
        };
    }

    let mut required = ManagerCapabilities::SYNC | prepare;
    let mixed = [
        (ManagerCapabilities::PREPARE_ON, ManagerCapabilities::MIXED_TRIGGER_ON),
        (ManagerCapabilities::PREPARE_PERFORM, ManagerCapabilities::MIXED_TRIGGER_PERFORM),
        (ManagerCapabilities::PREPARE_COMPOSE, ManagerCapabilities::MIXED_TRIGGER_COMPOSE),
    ];
    for (kind, trigger) in mixed {
        if prepare.contains(kind) && !(prepare - kind).is_empty() {
            required |= trigger;
        }
    }
    required
}

/// Expected duration of an effect as a drive result: unknown is `-1`,
/// endless is [`INDEFINITE`].
fn effect_duration(effect: &VibrationEffect) -> i64 {
    match effect.duration_ms() {
        None => -1,
        Some(u64::MAX) => INDEFINITE,
        Some(ms) => i64::try_from(ms).unwrap_or(INDEFINITE),
    }
}

pub(crate) struct StartCombinedStep {
    vibration: CombinedVibration,
    start: Instant,
}

impl StartCombinedStep {
    pub fn new(vibration: CombinedVibration, start: Instant) -> Self {
        Self { vibration, start }
    }

    fn effect_map(&self, ctx: &StepContext) -> DeviceEffectMap {
        let manager = ctx.group().manager();
        self.vibration
            .expand(&manager.actuator_ids())
            .into_iter()
            .filter_map(|(id, effect)| match manager.actuator(id) {
                Some(actuator) => Some((id, actuator, effect)),
                None => {
                    warn!(actuator = id, "no such actuator, skipping its effect");
                    None
                }
            })
            .collect()
    }

    /// Play one actuator's first step, collecting its follow-ups.
    fn play_actuator_step(
        ctx: &mut StepContext,
        step: Box<dyn Step>,
        effect: &VibrationEffect,
        next: &mut Vec<Box<dyn Step>>,
    ) -> i64 {
        ctx.reset_on_result();
        next.extend(step.play(ctx));
        let result = ctx.last_on_result();
        if result < 0 {
            return result;
        }
        result.max(effect_duration(effect))
    }

    /// Returns the longest started duration, `0` when nothing started and
    /// `-1` on failure.
    fn start_vibrating(ctx: &mut StepContext, effects: DeviceEffectMap, next: &mut Vec<Box<dyn Step>>) -> i64 {
        if effects.is_empty() {
            return 0;
        }
        let now = Instant::now();
        let ids: Vec<ActuatorId> = effects.iter().map(|(id, _, _)| *id).collect();
        let required = required_sync_capabilities(&effects);
        let first_steps: Vec<(Box<dyn Step>, VibrationEffect)> = effects
            .into_iter()
            .map(|(_, actuator, effect)| (first_actuator_step(ctx, StartTime::At(now), actuator, &effect), effect))
            .collect();

        let prepared = first_steps.len() > 1 && ctx.group().prepare(required, &ids);
        let mut longest = 0;
        let mut failed = false;
        for (step, effect) in first_steps {
            let result = Self::play_actuator_step(ctx, step, &effect, next);
            if result < 0 {
                failed = true;
                break;
            }
            longest = longest.max(result);
        }

        // A missed trigger only aborts the group; started actuators keep playing.
        let triggered = prepared && !failed && longest > 0 && ctx.group().trigger(ctx.vibration());

        if failed {
            warn!(vibration = ctx.vibration(), ?ids, "start failed, unwinding");
            for step in next.drain(..).rev() {
                step.cancel_immediately(ctx);
            }
        }
        if prepared && !triggered {
            if !failed && longest > 0 {
                warn!(vibration = ctx.vibration(), "synced trigger failed, cancelling the group");
            }
            ctx.group().cancel();
        }

        if failed {
            -1
        } else {
            longest
        }
    }
}

impl Step for StartCombinedStep {
    fn name(&self) -> &'static str {
        "StartCombined"
    }

    fn start_time(&self) -> StartTime {
        StartTime::At(self.start)
    }

    fn play(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let effects = self.effect_map(ctx);
        let mut next = Vec::new();
        let result = Self::start_vibrating(ctx, effects, &mut next);
        ctx.set_start_result(result);
        debug!(vibration = ctx.vibration(), result, steps = next.len(), "combined start");

        if result > 0 {
            let estimate = if result == INDEFINITE { u64::MAX } else { result as u64 };
            info!(vibration = ctx.vibration(), duration_ms = estimate, "vibration started");
            ctx.telemetry().note_vibrator_on(ctx.caller(), estimate);
            next.push(Box::new(FinishStep));
        }
        next
    }

    fn cancel(self: Box<Self>, _ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        Vec::new()
    }

    fn cancel_immediately(self: Box<Self>, _ctx: &mut StepContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{ComposedEffect, EffectId, VendorEffect};
    use crate::hal::legacy::LegacyActuator;
    use crate::hal::sim::SimulatedActuator;

    fn map(effects: Vec<VibrationEffect>) -> DeviceEffectMap {
        effects
            .into_iter()
            .enumerate()
            .map(|(i, effect)| {
                let id = i as ActuatorId;
                let actuator: Arc<dyn ActuatorControl> =
                    Arc::new(LegacyActuator::new(id, SimulatedActuator::builder(id).build()));
                (id, actuator, effect)
            })
            .collect()
    }

    #[test]
    fn uniform_prebaked_needs_prepare_perform_only() {
        let click: VibrationEffect = ComposedEffect::prebaked(EffectId::CLICK, false).into();
        let required = required_sync_capabilities(&map(vec![click.clone(), click]));
        assert_eq!(required, ManagerCapabilities::SYNC | ManagerCapabilities::PREPARE_PERFORM);
    }

    #[test]
    fn mixed_kinds_need_mixed_triggers() {
        let click: VibrationEffect = ComposedEffect::prebaked(EffectId::CLICK, false).into();
        let hold: VibrationEffect = ComposedEffect::one_shot(100).into();
        let vendor: VibrationEffect = VendorEffect::new(vec![1, 2]).into();
        let required = required_sync_capabilities(&map(vec![hold, click, vendor]));
        assert_eq!(
            required,
            ManagerCapabilities::SYNC
                | ManagerCapabilities::PREPARE_ON
                | ManagerCapabilities::PREPARE_PERFORM
                | ManagerCapabilities::MIXED_TRIGGER_ON
                | ManagerCapabilities::MIXED_TRIGGER_PERFORM
        );
    }

    #[test]
    fn effect_duration_maps_unknown_and_endless() {
        let vendor: VibrationEffect = VendorEffect::new(vec![]).into();
        assert_eq!(effect_duration(&vendor), -1);
        let hold: VibrationEffect = ComposedEffect::one_shot(30).into();
        assert_eq!(effect_duration(&hold), 30);
    }
}
