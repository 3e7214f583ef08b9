/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Tremolo – vibration step conductor
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── effect/      – segments, composed / vendor effects, combined vibrations
//! ├── config/      – YAML vibration, actuator and manager configuration
//! ├── hal/         – actuator controllers, manager, callback bridge, simulator
//! ├── scaler/      – intensity driven effect scaling
//! ├── adapter/     – per-device segment adapters and validators
//! ├── conductor/   – step queue and the steps that play one vibration
//! └── service/     – request intake and the vibration thread
//! ```

pub mod adapter;
pub mod config;
pub mod conductor;
pub mod effect;
pub mod hal;
pub mod scaler;
pub mod service;
