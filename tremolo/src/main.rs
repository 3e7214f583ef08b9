/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use tremolo::config::{ActuatorConfig, Backend, ConfigManager};
use tremolo::effect::{CallerIdentity, CombinedVibration, ComposedEffect, EffectId, Usage, VibrationEffect};
use tremolo::hal::bridge::NativeBridge;
use tremolo::hal::legacy::LegacyActuator;
use tremolo::hal::manager::{ActuatorFactory, ActuatorManager, DefaultActuatorManager, LegacyActuatorManager};
use tremolo::hal::remote::RemoteActuator;
use tremolo::hal::sim::{HalCallLog, SimulatedActuator, SimulatedManagerHal};
use tremolo::hal::{ActuatorControl, ActuatorId, ActuatorInfo, Capabilities};
use tremolo::scaler::IntensitySettings;
use tremolo::service::{LogTelemetry, VibratorService};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Tremolo vibration step conductor, driving simulated hardware.
///
/// Example:
///   tremolo --config demos/dual_actuator.yaml --waveform 0,100,50,200 \
///           --repeat 0 --cancel-after 800 --actuators 0,1
#[derive(Debug, Parser)]
#[command(
    name = "tremolo",
    about = "Tremolo – plays one vibration on simulated actuators",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML vibration / actuator configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Play a single hold of this many milliseconds.
    #[arg(short = 'o', long = "oneshot", conflicts_with_all = ["waveform", "prebaked"])]
    oneshot: Option<u64>,

    /// Play an off/on timing pattern (first entry is off).
    #[arg(short = 'w', long = "waveform", value_delimiter = ',', conflicts_with = "prebaked")]
    waveform: Option<Vec<u64>>,

    /// Repeat index into the waveform.
    #[arg(short = 'r', long = "repeat", requires = "waveform")]
    repeat: Option<usize>,

    /// Play a prebaked effect by name (click, tick, thud, ...).
    #[arg(short = 'p', long = "prebaked")]
    prebaked: Option<String>,

    /// Target only these actuators (stereo). Default plays on all of them.
    #[arg(short = 'a', long = "actuators", value_delimiter = ',')]
    actuators: Option<Vec<ActuatorId>>,

    /// Usage category used for intensity scaling.
    #[arg(short = 'u', long = "usage", default_value = "touch")]
    usage: String,

    /// Gracefully cancel the vibration after this many milliseconds.
    #[arg(long = "cancel-after")]
    cancel_after: Option<u64>,
}

// ── Hardware assembly ─────────────────────────────────────────────────────────

/// One remote actuator with basic capabilities, used without a config file.
fn default_actuators() -> BTreeMap<ActuatorId, ActuatorConfig> {
    let mut info = ActuatorInfo::new(0);
    info.capabilities = Capabilities::ON_CALLBACK | Capabilities::AMPLITUDE_CONTROL;
    BTreeMap::from([(
        0,
        ActuatorConfig {
            backend: Backend::Remote,
            info,
            hal_latency_ms: 0,
        },
    )])
}

fn actuator_factory(actuators: BTreeMap<ActuatorId, ActuatorConfig>, log: Arc<HalCallLog>) -> ActuatorFactory {
    Box::new(move |id: ActuatorId| -> Arc<dyn ActuatorControl> {
        let (backend, builder) = match actuators.get(&id) {
            Some(config) => (config.backend, SimulatedActuator::from_config(config)),
            None => {
                warn!(actuator = id, "actuator missing from configuration, simulating degraded hardware");
                (Backend::Remote, SimulatedActuator::builder(id))
            }
        };
        let sim = builder.log(log.clone()).build();
        match backend {
            Backend::Remote => Arc::new(RemoteActuator::new(id, sim)),
            Backend::Legacy => Arc::new(LegacyActuator::new(id, sim)),
        }
    })
}

fn build_manager(config: &ConfigManager, log: &Arc<HalCallLog>) -> Arc<dyn ActuatorManager> {
    let actuators = if config.actuators().is_empty() {
        default_actuators()
    } else {
        config.actuators().clone()
    };
    let ids: Vec<ActuatorId> = actuators.keys().copied().collect();
    let factory = actuator_factory(actuators, log.clone());
    match config.manager_capabilities() {
        Some(capabilities) => {
            let hal = SimulatedManagerHal::new(ids, capabilities, log.clone());
            Arc::new(DefaultActuatorManager::new(hal, factory))
        }
        None => Arc::new(LegacyActuatorManager::new(ids, factory)),
    }
}

// ── Request assembly ──────────────────────────────────────────────────────────

fn requested_effect(cli: &Cli) -> Result<VibrationEffect> {
    if let Some(name) = &cli.prebaked {
        let effect = EffectId::from_name(name).with_context(|| format!("Unknown prebaked effect: {name}"))?;
        return Ok(ComposedEffect::prebaked(effect, true).into());
    }
    if let Some(timings) = &cli.waveform {
        if timings.is_empty() {
            bail!("Waveform needs at least one timing");
        }
        return Ok(ComposedEffect::on_off_pattern(timings, cli.repeat).into());
    }
    Ok(ComposedEffect::one_shot(cli.oneshot.unwrap_or(200)).into())
}

fn requested_vibration(cli: &Cli, effect: VibrationEffect) -> CombinedVibration {
    match &cli.actuators {
        Some(ids) => ids
            .iter()
            .fold(CombinedVibration::stereo(), |combined, &id| combined.with_actuator(id, effect.clone())),
        None => CombinedVibration::mono(effect),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<()> {
    let mut config_manager = ConfigManager::new();
    match &cli.config {
        Some(path) => config_manager
            .load_from_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
        None => warn!("No configuration file provided, using one default actuator"),
    }

    let usage = Usage::from_name(&cli.usage).with_context(|| format!("Unknown usage: {}", cli.usage))?;
    let effect = requested_effect(&cli)?;
    let combined = requested_vibration(&cli, effect);

    let log = HalCallLog::new();
    let vibration_config = Arc::new(config_manager.vibration().clone());
    let intensities = Arc::new(IntensitySettings::from_config(&vibration_config));
    let service = VibratorService::new(
        build_manager(&config_manager, &log),
        Arc::new(NativeBridge::new()),
        vibration_config,
        intensities,
        Arc::new(LogTelemetry),
    )
    .context("Failed to start the vibration thread")?;
    info!(actuators = ?service.actuator_ids(), "service ready");
    log.clear();

    let handle = service
        .request_vibration(combined, usage, CallerIdentity::new(0, "tremolo-cli"))
        .context("Vibration request rejected")?;

    if let Some(ms) = cli.cancel_after {
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            info!(after_ms = ms, "cancelling");
            canceller.cancel();
        });
    }

    let status = handle.wait().await;

    info!("Recorded {} hardware call(s):", log.entries().len());
    for entry in log.entries() {
        info!("  +{at:>5}ms  {call:?}", at = entry.at_ms, call = entry.call);
    }
    info!(vibration = handle.id(), ?status, "vibration ended");
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialise structured logging.
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=info).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    info!("Tremolo starting up...");

    let cli = Cli::parse();
    info!(
        config   = ?cli.config,
        oneshot  = ?cli.oneshot,
        waveform = ?cli.waveform,
        prebaked = ?cli.prebaked,
        targets  = ?cli.actuators,
        "Configuration"
    );

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}
