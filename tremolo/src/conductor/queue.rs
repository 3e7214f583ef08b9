/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ordered step storage for one vibration.
//!
//! Pending steps are keyed by `(start time, insertion sequence)`, so equal
//! start times run first-in first-out. Steps released early by a completion
//! callback move to a separate FIFO that always runs before timed work.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tokio::time::Instant;

use super::step::{StartTime, Step};
use crate::hal::{ActuatorId, StepId};

#[derive(Default)]
pub struct StepQueue {
    next: BTreeMap<(StartTime, u64), Box<dyn Step>>,
    completed: VecDeque<(u64, Box<dyn Step>)>,
    seq: u64,
}

impl StepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Box<dyn Step>) {
        let seq = self.seq;
        self.seq += 1;
        self.next.insert((step.start_time(), seq), step);
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = Box<dyn Step>>) {
        for step in steps {
            self.push(step);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty() && self.completed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.next.len() + self.completed.len()
    }

    /// Next step to play at `now`, if any is due.
    pub fn pop_due(&mut self, now: Instant) -> Option<Box<dyn Step>> {
        if let Some((_, step)) = self.completed.pop_front() {
            return Some(step);
        }
        let (&(start, _), _) = self.next.first_key_value()?;
        match start {
            StartTime::AfterPending if self.next.len() > 1 => None,
            start if start.is_due(now) => self.next.pop_first().map(|(_, step)| step),
            _ => None,
        }
    }

    /// Earliest concrete start time still pending.
    pub fn next_wake(&self) -> Option<Instant> {
        self.next.keys().next().and_then(|(start, _)| start.instant())
    }

    /// Hand a completion callback to the first pending step that accepts it.
    pub fn accept_completion(&mut self, actuator: ActuatorId, step: Option<StepId>, now: Instant) -> bool {
        let key = self
            .next
            .iter_mut()
            .find_map(|(key, pending)| pending.accept_completion(actuator, step, now).then_some(*key));
        match key.and_then(|key| self.next.remove(&key).map(|s| (key.1, s))) {
            Some(entry) => {
                self.completed.push_back(entry);
                true
            }
            None => false,
        }
    }

    /// A synced-group completion releases every actuator of the vibration.
    pub fn accept_synced(&mut self, now: Instant) -> usize {
        let actuators: BTreeSet<ActuatorId> = self.next.values().filter_map(|s| s.actuator()).collect();
        actuators
            .into_iter()
            .filter(|&id| self.accept_completion(id, None, now))
            .count()
    }

    /// Every step, newest first.
    pub fn drain_reversed(&mut self) -> Vec<Box<dyn Step>> {
        let mut all: Vec<(u64, Box<dyn Step>)> = self.completed.drain(..).collect();
        all.extend(std::mem::take(&mut self.next).into_iter().map(|((_, seq), s)| (seq, s)));
        all.sort_by(|a, b| b.0.cmp(&a.0));
        all.into_iter().map(|(_, s)| s).collect()
    }

    /// Every step in play order.
    pub fn drain_in_order(&mut self) -> Vec<Box<dyn Step>> {
        let mut all: Vec<Box<dyn Step>> = self.completed.drain(..).map(|(_, s)| s).collect();
        all.extend(std::mem::take(&mut self.next).into_values());
        all
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
