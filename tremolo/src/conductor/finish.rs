/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Barrier that closes a started vibration.

use tracing::debug;

use super::step::{StartTime, Step, StepContext};

/// Runs once nothing else is queued and reports the vibrator off exactly
/// once, whichever path (play or either cancel) consumes it.
pub(crate) struct FinishStep;

impl FinishStep {
    fn vibrator_off(ctx: &StepContext) {
        debug!(vibration = ctx.vibration(), "vibration finished");
        ctx.telemetry().note_vibrator_off(ctx.caller());
    }
}

impl Step for FinishStep {
    fn name(&self) -> &'static str {
        "Finish"
    }

    fn start_time(&self) -> StartTime {
        StartTime::AfterPending
    }

    fn is_cleanup(&self) -> bool {
        true
    }

    fn play(self: Box<Self>, ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        Self::vibrator_off(ctx);
        Vec::new()
    }

    fn cancel(self: Box<Self>, _ctx: &mut StepContext) -> Vec<Box<dyn Step>> {
        // Still the barrier after a graceful cancel.
        vec![self as Box<dyn Step>]
    }

    fn cancel_immediately(self: Box<Self>, ctx: &mut StepContext) {
        Self::vibrator_off(ctx);
    }
}
