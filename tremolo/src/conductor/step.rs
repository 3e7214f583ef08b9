/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The [`Step`] contract and the state shared by every per-actuator step.
//!
//! A step is consumed by `play`, `cancel` or `cancel_immediately`. Anything
//! it wants to happen later comes back as new steps, which is also how a
//! waveform continues: the follow-up carries the segment position and the
//! pending off deadline forward.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::amplitude::SetAmplitudeStep;
use super::complete::CompleteEffectStep;
use super::compose::{ComposePrimitivesStep, ComposePwleStep, ComposePwleV2Step};
use super::perform::{PerformPrebakedStep, PerformVendorStep};
use super::TelemetryHooks;
use crate::config::VibrationConfig;
use crate::effect::{CallerIdentity, ComposedEffect, Segment, VibrationEffect};
use crate::hal::manager::GroupController;
use crate::hal::{ActuatorControl, ActuatorId, StepId, VibrationId, INDEFINITE};

// ── StartTime ─────────────────────────────────────────────────────────────────

/// When a step becomes eligible to run.
///
/// The derived order puts every concrete instant first, then steps that only
/// a completion callback (or cancellation) can release, then the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartTime {
    At(Instant),
    /// Waits for a completion callback with no timeout.
    WhenComplete,
    /// Runs only once nothing else is queued.
    AfterPending,
}

impl StartTime {
    /// `base + duration_ms`, or [`StartTime::WhenComplete`] for an
    /// indefinite duration.
    pub fn after(base: Instant, duration_ms: i64) -> Self {
        if duration_ms == INDEFINITE {
            return StartTime::WhenComplete;
        }
        base.checked_add(Duration::from_millis(duration_ms.max(0) as u64))
            .map_or(StartTime::WhenComplete, StartTime::At)
    }

    pub fn instant(self) -> Option<Instant> {
        match self {
            StartTime::At(at) => Some(at),
            StartTime::WhenComplete | StartTime::AfterPending => None,
        }
    }

    pub fn is_due(self, now: Instant) -> bool {
        match self {
            StartTime::At(at) => at <= now,
            StartTime::WhenComplete => false,
            StartTime::AfterPending => true,
        }
    }
}

// ── OffDeadline ───────────────────────────────────────────────────────────────

/// Until when a step waits for the actuator to report that it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffDeadline {
    /// Nothing driven, no callback expected.
    Idle,
    /// Driven by step `awaiting`; the callback is accepted until `at`.
    At { at: Instant, awaiting: StepId },
    /// Driven for an unknown duration by step `awaiting`.
    Indefinite { awaiting: StepId },
}

impl OffDeadline {
    pub fn is_pending(&self, now: Instant) -> bool {
        match *self {
            OffDeadline::Idle => false,
            OffDeadline::At { at, .. } => at > now,
            OffDeadline::Indefinite { .. } => true,
        }
    }

    /// Whether the actuator is expected to still be on at `instant`.
    pub fn covers(&self, instant: Instant) -> bool {
        match *self {
            OffDeadline::Idle => false,
            OffDeadline::At { at, .. } => instant < at,
            OffDeadline::Indefinite { .. } => true,
        }
    }

    pub fn awaiting(&self) -> Option<StepId> {
        match *self {
            OffDeadline::Idle => None,
            OffDeadline::At { awaiting, .. } | OffDeadline::Indefinite { awaiting } => Some(awaiting),
        }
    }

    /// Expected on-time left at `now`, without the callback grace period.
    /// `None` means unbounded.
    pub fn remaining_on(&self, now: Instant, grace: Duration) -> Option<Duration> {
        match *self {
            OffDeadline::Idle => Some(Duration::ZERO),
            OffDeadline::At { at, .. } => Some(at.saturating_duration_since(now).saturating_sub(grace)),
            OffDeadline::Indefinite { .. } => None,
        }
    }

    /// When a turn-off waiting on this deadline should run.
    pub fn turn_off_time(&self, now: Instant) -> StartTime {
        match *self {
            OffDeadline::Idle => StartTime::At(now),
            OffDeadline::At { at, .. } => StartTime::At(at),
            OffDeadline::Indefinite { .. } => StartTime::WhenComplete,
        }
    }
}

// ── Step ──────────────────────────────────────────────────────────────────────

/// One schedulable unit of work. Only the conductor task ever calls these.
pub trait Step: Send {
    fn name(&self) -> &'static str;

    fn start_time(&self) -> StartTime;

    /// Actuator this step drives, if any.
    fn actuator(&self) -> Option<ActuatorId> {
        None
    }

    /// Cleanup steps are what a graceful cancel leaves behind.
    fn is_cleanup(&self) -> bool {
        false
    }

    fn play(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>>;

    /// Graceful cancel. Returns the cleanup steps to run instead.
    fn cancel(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>>;

    /// Tear down right now, from the conductor task, without follow-ups.
    fn cancel_immediately(self: Box<Self>, ctx: &mut StepContext);

    /// Offer a completion callback. `step` is `None` for a synced-group
    /// completion, which matches whatever the actuator is waiting on.
    ///
    /// Returns true when the step should run now.
    fn accept_completion(&mut self, _actuator: ActuatorId, _step: Option<StepId>, _now: Instant) -> bool {
        false
    }
}

// ── StepContext ───────────────────────────────────────────────────────────────

/// Per-vibration state handed to every step.
pub struct StepContext {
    vibration: VibrationId,
    caller: CallerIdentity,
    group: GroupController,
    config: Arc<VibrationConfig>,
    telemetry: Arc<dyn TelemetryHooks>,
    next_step_id: StepId,
    last_on_result: i64,
    start_result: Option<i64>,
}

impl StepContext {
    pub fn new(
        vibration: VibrationId,
        caller: CallerIdentity,
        group: GroupController,
        config: Arc<VibrationConfig>,
        telemetry: Arc<dyn TelemetryHooks>,
    ) -> Self {
        Self {
            vibration,
            caller,
            group,
            config,
            telemetry,
            next_step_id: 1,
            last_on_result: 0,
            start_result: None,
        }
    }

    pub fn vibration(&self) -> VibrationId {
        self.vibration
    }

    pub fn caller(&self) -> &CallerIdentity {
        &self.caller
    }

    pub fn group(&self) -> &GroupController {
        &self.group
    }

    pub fn config(&self) -> &VibrationConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetryHooks> {
        &self.telemetry
    }

    fn allocate_step_id(&mut self) -> StepId {
        let id = self.next_step_id;
        self.next_step_id += 1;
        id
    }

    /// Drive result of the most recent actuator step, reset by the entry
    /// step around each per-actuator start.
    pub(crate) fn last_on_result(&self) -> i64 {
        self.last_on_result
    }

    pub(crate) fn reset_on_result(&mut self) {
        self.last_on_result = 0;
    }

    /// Longest duration started by the entry step: `> 0` started, `0` nothing
    /// to play, `< 0` failed. `None` until the entry step ran.
    pub fn start_result(&self) -> Option<i64> {
        self.start_result
    }

    pub(crate) fn set_start_result(&mut self, result: i64) {
        self.start_result = Some(result);
    }
}

// ── Per-actuator step state ───────────────────────────────────────────────────

/// Amplitudes below this are treated as off when ramping down.
pub(crate) const RAMP_OFF_AMPLITUDE_MIN: f32 = 1e-3;

/// State common to every step that drives one actuator.
pub(crate) struct ActuatorStepState {
    pub id: StepId,
    pub start: StartTime,
    pub actuator: Arc<dyn ActuatorControl>,
    pub deadline: OffDeadline,
    pub completion_received: bool,
    pub on_result: i64,
}

impl ActuatorStepState {
    pub fn new(ctx: &mut StepContext, start: StartTime, actuator: Arc<dyn ActuatorControl>, deadline: OffDeadline) -> Self {
        Self {
            id: ctx.allocate_step_id(),
            start,
            actuator,
            deadline,
            completion_received: false,
            on_result: 0,
        }
    }

    pub fn actuator_id(&self) -> ActuatorId {
        self.actuator.id()
    }

    /// Record a drive result and, when something started, arm the deadline
    /// for its completion callback.
    pub fn handle_on_result(&mut self, ctx: &mut StepContext, result: i64) -> i64 {
        self.on_result = result;
        ctx.last_on_result = result;
        if result == INDEFINITE {
            self.deadline = OffDeadline::Indefinite { awaiting: self.id };
        } else if result > 0 {
            let now = Instant::now();
            let wait = Duration::from_millis(result as u64) + ctx.config().callbacks_extra_timeout();
            self.deadline = match now.checked_add(wait) {
                Some(at) => OffDeadline::At { at, awaiting: self.id },
                None => OffDeadline::Indefinite { awaiting: self.id },
            };
        }
        result
    }

    pub fn start_vibrating(&mut self, ctx: &mut StepContext, duration_ms: u64) -> i64 {
        let result = self.actuator.drive_for_duration(ctx.vibration(), self.id, duration_ms);
        debug!(actuator = self.actuator_id(), step = self.id, duration_ms, result, "actuator on");
        self.handle_on_result(ctx, result)
    }

    pub fn change_amplitude(&self, amplitude: f32) {
        if !self.actuator.set_amplitude(amplitude) {
            debug!(actuator = self.actuator_id(), amplitude, "amplitude not applied");
        }
    }

    pub fn stop_vibrating(&mut self) {
        debug!(actuator = self.actuator_id(), step = self.id, "actuator off");
        self.actuator.stop();
        self.deadline = OffDeadline::Idle;
    }

    /// Where follow-ups go: right after what this step started, or now.
    pub fn next_start(&self, now: Instant) -> StartTime {
        if self.on_result > 0 {
            StartTime::after(now, self.on_result)
        } else {
            StartTime::At(now)
        }
    }

    pub fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        if self.actuator_id() != actuator {
            return false;
        }
        let Some(awaiting) = self.deadline.awaiting() else {
            return false;
        };
        if step.is_some_and(|s| s != awaiting) {
            return false;
        }
        let accepted = self.deadline.is_pending(now);
        // Either way this step no longer waits on that drive.
        self.deadline = OffDeadline::Idle;
        self.completion_received = true;
        accepted
    }

    /// Graceful cancel of a step that may have left the actuator running.
    pub fn cancel_to_cleanup(self, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        let now = Instant::now();
        vec![Box::new(CompleteEffectStep::new(
            ctx,
            StartTime::At(now),
            true,
            self.actuator,
            self.deadline,
        ))]
    }

    pub fn cancel_immediately(mut self) {
        if self.deadline.is_pending(Instant::now()) {
            self.stop_vibrating();
        }
    }
}

// ── Composed effect position ──────────────────────────────────────────────────

/// Minimum on-time for a repeating waveform that never turns off.
const REPEATING_EFFECT_ON_DURATION_MS: u64 = 5000;

/// Where a step is inside a composed effect.
#[derive(Clone)]
pub(crate) struct ComposedPosition {
    pub effect: Arc<ComposedEffect>,
    pub index: usize,
}

impl ComposedPosition {
    pub fn segment(&self) -> Option<&Segment> {
        self.effect.segments().get(self.index)
    }

    /// Index after playing `played` segments, wrapped around the repeat
    /// index. Past the end when the effect does not repeat.
    pub fn advance(&self, played: usize) -> usize {
        let next = self.index + played;
        let len = self.effect.segments().len();
        match self.effect.repeat_index() {
            Some(repeat) if next >= len => repeat + (next - len) % (len - repeat),
            _ => next,
        }
    }

    /// How long the actuator should be turned on for starting here: the run
    /// of consecutive non-zero holds, wrapping once through the loop.
    pub fn on_duration_ms(&self, ramp_down: Duration) -> u64 {
        let segments = self.effect.segments();
        let len = segments.len();
        let start = self.index;
        let mut repeat = self.effect.repeat_index();
        let mut i = start;
        let mut timing = 0u64;
        while i < len {
            match &segments[i] {
                Segment::Step(s) if !s.amplitude.is_zero() => timing = timing.saturating_add(s.duration_ms),
                _ => break,
            }
            i += 1;
            if i == len {
                if let Some(r) = repeat.take() {
                    i = r;
                }
            }
            if i == start {
                return timing.max(REPEATING_EFFECT_ON_DURATION_MS);
            }
        }
        if i == len && self.effect.repeat_index().is_none() {
            // Ends on non-zero amplitude: leave room to ramp down.
            timing = timing.saturating_add(ramp_down.as_millis() as u64);
        }
        timing
    }
}

/// Build the step that plays `index` of `effect`, or the completion step
/// once the effect is exhausted.
pub(crate) fn next_composed_step(
    ctx: &mut StepContext,
    start: StartTime,
    actuator: Arc<dyn ActuatorControl>,
    effect: Arc<ComposedEffect>,
    index: usize,
    deadline: OffDeadline,
) -> Box<dyn Step> {
    let index = if index >= effect.segments().len() {
        match effect.repeat_index() {
            Some(repeat) => repeat,
            None => return Box::new(CompleteEffectStep::new(ctx, start, false, actuator, deadline)),
        }
    } else {
        index
    };
    let position = ComposedPosition { effect, index };
    let base = ActuatorStepState::new(ctx, start, actuator, deadline);
    match position.segment() {
        Some(Segment::Prebaked(_)) => Box::new(PerformPrebakedStep::new(base, position)),
        Some(Segment::Primitive(_)) => Box::new(ComposePrimitivesStep::new(base, position)),
        Some(Segment::Ramp(_)) => Box::new(ComposePwleStep::new(base, position)),
        Some(Segment::Pwle(_)) => Box::new(ComposePwleV2Step::new(base, position)),
        Some(Segment::Step(_)) | Some(Segment::BasicPwle(_)) | None => Box::new(SetAmplitudeStep::new(base, position)),
    }
}

/// First step for one actuator's effect.
pub(crate) fn first_actuator_step(
    ctx: &mut StepContext,
    start: StartTime,
    actuator: Arc<dyn ActuatorControl>,
    effect: &VibrationEffect,
) -> Box<dyn Step> {
    match effect {
        VibrationEffect::Composed(composed) => {
            next_composed_step(ctx, start, actuator, Arc::new(composed.clone()), 0, OffDeadline::Idle)
        }
        VibrationEffect::Vendor(vendor) => {
            let base = ActuatorStepState::new(ctx, start, actuator, OffDeadline::Idle);
            Box::new(PerformVendorStep::new(base, vendor.clone()))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Amplitude;

    fn position(timings: &[u64], amplitudes: &[f32], repeat: Option<usize>, index: usize) -> ComposedPosition {
        let amplitudes: Vec<Amplitude> = amplitudes.iter().map(|&a| Amplitude::Level(a)).collect();
        ComposedPosition {
            effect: Arc::new(ComposedEffect::waveform(timings, &amplitudes, repeat)),
            index,
        }
    }

    #[test]
    fn start_time_orders_instants_before_waiting_and_barrier() {
        let now = Instant::now();
        let later = StartTime::At(now + Duration::from_secs(3600));
        assert!(StartTime::At(now) < later);
        assert!(later < StartTime::WhenComplete);
        assert!(StartTime::WhenComplete < StartTime::AfterPending);
        assert_eq!(StartTime::after(now, INDEFINITE), StartTime::WhenComplete);
        assert_eq!(StartTime::after(now, 20), StartTime::At(now + Duration::from_millis(20)));
    }

    #[test]
    fn deadline_is_pending_strictly_before_its_instant() {
        let now = Instant::now();
        let deadline = OffDeadline::At {
            at: now + Duration::from_millis(10),
            awaiting: 1,
        };
        assert!(deadline.is_pending(now));
        assert!(!deadline.is_pending(now + Duration::from_millis(10)));
        assert!(!OffDeadline::Idle.is_pending(now));
        assert!(OffDeadline::Indefinite { awaiting: 1 }.is_pending(now));
        assert_eq!(
            deadline.remaining_on(now, Duration::from_millis(4)),
            Some(Duration::from_millis(6))
        );
        assert_eq!(deadline.remaining_on(now, Duration::from_secs(1)), Some(Duration::ZERO));
    }

    #[test]
    fn on_duration_merges_nonzero_run_and_adds_ramp_down_at_the_end() {
        let ramp = Duration::from_millis(30);
        let p = position(&[100, 0, 50, 20, 40], &[1.0, 0.3, 0.5, 0.0, 1.0], None, 0);
        assert_eq!(p.on_duration_ms(ramp), 150, "zero-duration hold does not break the run");
        let tail = ComposedPosition { index: 4, ..p };
        assert_eq!(tail.on_duration_ms(ramp), 70);
    }

    #[test]
    fn repeating_run_covering_the_loop_gets_the_minimum_on_time() {
        let p = position(&[100, 100], &[1.0, 0.5], Some(0), 0);
        assert_eq!(p.on_duration_ms(Duration::ZERO), 5000);
        let gap = position(&[100, 100], &[1.0, 0.0], Some(0), 0);
        assert_eq!(gap.on_duration_ms(Duration::from_millis(30)), 100, "no ramp-down on repeat");
    }

    #[test]
    fn advance_wraps_into_the_loop() {
        let p = position(&[10, 10, 10], &[1.0, 1.0, 1.0], Some(1), 2);
        assert_eq!(p.advance(1), 1);
        assert_eq!(p.advance(2), 2);
        let once = position(&[10, 10], &[1.0, 1.0], None, 1);
        assert_eq!(once.advance(1), 2);
    }
}
