/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Why a vibration request was turned down.
//!
//! Only request intake produces these. Once a vibration is handed to the
//! vibration thread, failures are reported through its
//! [`VibrationStatus`](crate::conductor::VibrationStatus) instead.

use thiserror::Error;

use crate::hal::ActuatorId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Stereo vibration without any actuator, or no actuator registered.
    #[error("vibration has no effect to play")]
    EmptyVibration,

    #[error("actuator {id} is not registered")]
    UnknownActuator { id: ActuatorId },

    /// The adapted effect still contains segments the actuator cannot play.
    #[error("actuator {actuator} cannot play the requested effect")]
    UnsupportedEffect { actuator: ActuatorId },

    #[error("vibration thread is not running")]
    ThreadStopped,
}
