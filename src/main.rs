// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Command-line entry point for the Raman imaging instrument
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use tokio::signal;

use raman_control::camera::frame::frame_stats;
use raman_control::camera::settings::{AcquisitionMode, AcquisitionSettings, Roi};
use raman_control::config::{self, Config, SpectrometerConfig};
use raman_control::storage::DataWriter;
use raman_control::thermal::{LifecycleTask, ThermalLifecycleController};
use raman_control::{Acquisition, CameraError, RamanCamera, Slit, Spectrometer, ThermalOutcome};

/// Control of a cooled Andor camera and Shamrock spectrograph for Raman imaging
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the simulated camera and spectrograph
    #[arg(long)]
    simulate: bool,

    /// Directory of the Andor SDK libraries
    #[arg(long)]
    sdk_path: Option<String>,

    /// Output directory for frames, spectra and parameter dumps
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect without cooling, print camera information and temperature
    Status,

    /// Cool the sensor to the target temperature
    Cool {
        /// Target temperature in °C
        #[arg(long, allow_negative_numbers = true)]
        target: Option<f64>,
    },

    /// Warm the sensor up to the safe temperature
    Warm {
        /// Safe temperature in °C
        #[arg(long, allow_negative_numbers = true)]
        safe: Option<f64>,
    },

    /// Cool, acquire, save frame, spectrum and metadata, then warm up
    Acquire {
        #[arg(long, value_enum, default_value_t = ModeArg::Single)]
        mode: ModeArg,

        /// Exposures summed in accumulate mode
        #[arg(long)]
        accumulations: Option<u32>,

        /// Frames read in run-till-abort mode (unbounded until Ctrl-C if absent)
        #[arg(long)]
        frames: Option<u32>,

        /// Exposure time in seconds
        #[arg(long)]
        exposure: Option<f64>,

        /// Region of interest as x,y,w,h
        #[arg(long)]
        roi: Option<Roi>,

        /// Acquire at the current sensor temperature
        #[arg(long)]
        no_cool: bool,
    },

    /// Preview frames in live mode
    Live {
        #[arg(long, default_value_t = 10)]
        frames: usize,

        /// Preview rate, at most 1000 frames per second
        #[arg(long, default_value_t = 5.0, value_parser = parse_fps)]
        fps: f64,
    },

    /// Configure the spectrograph and dump its parameters
    Spectrometer {
        /// Center wavelength in meters
        #[arg(long)]
        wavelength: Option<f64>,

        /// Grating, counting from 1
        #[arg(long)]
        grating: Option<u32>,

        /// Move the turret even if the grating is already selected
        #[arg(long)]
        force: bool,

        /// Slit index (1-4) or name
        #[arg(long, requires = "slit_width")]
        slit: Option<Slit>,

        /// Slit width in meters
        #[arg(long, requires = "slit")]
        slit_width: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Single,
    Accumulate,
    RunTillAbort,
}

/// Frame rates whose period is at least one millisecond
fn parse_fps(value: &str) -> Result<f64, String> {
    let fps: f64 = value
        .parse()
        .map_err(|_| format!("`{}` is not a number", value))?;
    if fps.is_finite() && fps > 0.0 && fps <= MAX_FPS {
        Ok(fps)
    } else {
        Err(format!("frame rate must be in (0, {}]", MAX_FPS))
    }
}

const MAX_FPS: f64 = 1000.0;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = &args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        Config::from_file(validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    let command = args.command.unwrap_or(Command::Status);
    let (target, safe, exposure, roi) = match &command {
        Command::Cool { target } => (*target, None, None, None),
        Command::Warm { safe } => (None, *safe, None, None),
        Command::Acquire { exposure, roi, .. } => (None, None, *exposure, *roi),
        _ => (None, None, None, None),
    };
    config.apply_args(
        args.simulate,
        args.sdk_path.clone(),
        args.save_path.clone(),
        target,
        safe,
        exposure,
        roi,
    );
    config::utils::validate_specific_rules(&config)?;

    match command {
        Command::Status => status(config).await,
        Command::Cool { .. } => cool(config).await,
        Command::Warm { .. } => warm(config).await,
        Command::Acquire {
            mode,
            accumulations,
            frames,
            no_cool,
            ..
        } => {
            let mode = match mode {
                ModeArg::Single => AcquisitionMode::Single,
                ModeArg::Accumulate => AcquisitionMode::Accumulate {
                    count: accumulations.unwrap_or(config.camera.acquisition.accumulations),
                },
                ModeArg::RunTillAbort => AcquisitionMode::RunTillAbort { max_frames: frames },
            };
            config.thermal.cool_on_connect = !no_cool;
            acquire(config, mode).await
        }
        Command::Live { frames, fps } => live(config, frames, fps).await,
        Command::Spectrometer {
            wavelength,
            grating,
            force,
            slit,
            slit_width,
        } => spectrometer(config, wavelength, grating, force, slit.zip(slit_width)),
    }
}

/// Wait for a lifecycle task, printing the temperature once per second.
///
/// Ctrl-C cancels the running loop; the task still reports how it ended.
async fn watch(
    controller: &ThermalLifecycleController,
    task: LifecycleTask,
) -> Result<ThermalOutcome> {
    info!("Waiting for {} to finish (Ctrl-C to cancel)", task.operation());
    let finished = task.finished();
    tokio::pin!(finished);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut cancelled = false;

    loop {
        tokio::select! {
            result = &mut finished => return Ok(result?),
            _ = ticker.tick() => println!("{}", controller.get_temp()),
            signal = signal::ctrl_c(), if !cancelled => {
                signal?;
                info!("Received shutdown signal, cancelling");
                controller.cancel();
                cancelled = true;
            }
        }
    }
}

/// Disconnect the camera, waiting for the warm-up if one is configured
async fn shutdown(mut camera: RamanCamera) -> Result<()> {
    let task = match camera.disconnect() {
        Ok(task) => task,
        Err(e) => {
            camera.controller().safe_close();
            return Err(e.into());
        }
    };
    if let Some(task) = task {
        let outcome = watch(camera.controller(), task).await?;
        println!("Warm-up {}", outcome);
    }
    Ok(())
}

/// Shut the camera down whatever `result` is, then return it
async fn finish<T>(camera: RamanCamera, result: Result<T>) -> Result<T> {
    let shutdown = shutdown(camera).await;
    match result {
        Ok(value) => shutdown.map(|()| value),
        Err(e) => {
            if let Err(shutdown) = shutdown {
                error!("Shutdown after failure also failed: {:#}", shutdown);
            }
            Err(e)
        }
    }
}

async fn status(mut config: Config) -> Result<()> {
    config.thermal.cool_on_connect = false;
    config.thermal.warm_before_close = false;
    let mut camera = RamanCamera::new(config);
    camera.connect()?;
    if let Some(info) = camera.info() {
        println!("Camera: {}", info);
    }
    println!("{}", camera.get_temp());
    shutdown(camera).await
}

async fn cool(mut config: Config) -> Result<()> {
    config.thermal.cool_on_connect = true;
    let mut camera = RamanCamera::new(config);
    let cooling = match camera.connect()? {
        Some(task) => watch(camera.controller(), task)
            .await
            .map(|outcome| println!("Cooling {}", outcome)),
        None => Ok(()),
    };
    finish(camera, cooling).await
}

async fn warm(mut config: Config) -> Result<()> {
    config.thermal.cool_on_connect = false;
    config.thermal.warm_before_close = false;
    let safe = config.thermal.safe_temperature_c;
    let mut camera = RamanCamera::new(config);
    camera.connect()?;
    let outcome = match camera.controller().spawn_warm(safe) {
        Ok(task) => watch(camera.controller(), task).await,
        Err(e) => Err(e.into()),
    };
    let outcome = finish(camera, outcome).await?;
    println!("Warm-up {}", outcome);
    Ok(())
}

/// Run a blocking acquisition off the async runtime; Ctrl-C stops run-till-abort
async fn run_acquisition(
    mut camera: RamanCamera,
    mode: AcquisitionMode,
) -> Result<(RamanCamera, Result<Acquisition, CameraError>)> {
    let token = camera.acquisition_cancel_token();
    let mut handle = tokio::task::spawn_blocking(move || {
        let result = camera.acquire(mode);
        (camera, result)
    });
    let mut cancelled = false;
    loop {
        tokio::select! {
            joined = &mut handle => return Ok(joined?),
            signal = signal::ctrl_c(), if !cancelled => {
                cancelled = true;
                // the camera lives in the blocking task until it returns
                if let Err(e) = signal {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                    continue;
                }
                info!("Received shutdown signal, stopping acquisition");
                token.cancel();
            }
        }
    }
}

async fn acquire(config: Config, mode: AcquisitionMode) -> Result<()> {
    let settings = AcquisitionSettings::from(&config.camera.acquisition);
    let spectrometer_config = config.spectrometer.clone();
    let mut camera = RamanCamera::new(config);
    let cooling = camera.connect()?;

    if let Err(e) = prepare(&mut camera, cooling, spectrometer_config, settings).await {
        return finish(camera, Err(e)).await;
    }
    let (camera, result) = run_acquisition(camera, mode).await?;
    let saved = result
        .map_err(anyhow::Error::from)
        .and_then(|acquisition| Ok(camera.save(&acquisition)?));
    let saved = finish(camera, saved).await?;

    println!("Frame saved to {}", saved.frame.display());
    println!("Spectrum saved to {}", saved.spectrum.display());
    println!("Metadata saved to {}", saved.metadata.display());
    Ok(())
}

/// Wait for the cool-down, dump the spectrograph parameters and apply the settings
async fn prepare(
    camera: &mut RamanCamera,
    cooling: Option<LifecycleTask>,
    spectrometer_config: SpectrometerConfig,
    settings: AcquisitionSettings,
) -> Result<()> {
    if let Some(task) = cooling {
        let outcome = watch(camera.controller(), task).await?;
        println!("Cooling {}", outcome);
        if !outcome.is_reached() {
            warn!("Target temperature not reached, acquiring anyway");
        }
    }

    if spectrometer_config.enabled {
        let mut spectrometer = Spectrometer::new(spectrometer_config);
        match spectrometer.connect() {
            Ok(info) => {
                println!("Spectrometer: {}", info);
                let file = camera.config().storage.spectrometer_params_file.clone();
                let writer = DataWriter::from_config(&camera.config().storage)?;
                if let Err(e) = spectrometer.save_parameters(&writer, &file) {
                    warn!("Could not write spectrometer parameters: {}", e);
                }
            }
            Err(e) => warn!("Spectrometer unavailable: {}", e),
        }
    }

    camera.apply_settings(settings)?;
    Ok(())
}

async fn live(config: Config, frames: usize, fps: f64) -> Result<()> {
    let mut camera = RamanCamera::new(config);
    // a cooling task keeps running in the background and is cancelled on disconnect
    let _cooling = camera.connect()?;
    let result = preview(&mut camera, frames, fps).await;
    finish(camera, result).await
}

async fn preview(camera: &mut RamanCamera, frames: usize, fps: f64) -> Result<()> {
    camera.start_live()?;

    let period = Duration::from_secs_f64(1.0 / fps.clamp(0.1, MAX_FPS));
    let mut ticker = tokio::time::interval(period);
    let mut shown = 0;
    while shown < frames {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(frame) = camera.live_frame()? {
                    shown += 1;
                    let stats = frame_stats(&frame);
                    info!(
                        "Frame {}/{}: min {} max {} mean {:.1} | {}",
                        shown, frames, stats.min, stats.max, stats.mean, camera.get_temp()
                    );
                }
            }
            signal = signal::ctrl_c() => {
                signal?;
                info!("Received shutdown signal, leaving live mode");
                break;
            }
        }
    }

    camera.stop_live()?;
    Ok(())
}

fn spectrometer(
    config: Config,
    wavelength: Option<f64>,
    grating: Option<u32>,
    force: bool,
    slit: Option<(Slit, f64)>,
) -> Result<()> {
    let mut spectrometer = Spectrometer::new(config.spectrometer.clone());
    let info = spectrometer.connect()?;
    println!("Spectrometer: {}", info);

    if let Some(grating) = grating {
        spectrometer.set_grating(grating, force)?;
    }
    if let Some(wavelength) = wavelength {
        spectrometer.set_wavelength(wavelength)?;
    }
    if let Some((slit, width)) = slit {
        spectrometer.set_slit_width(slit, width)?;
    }

    if let Some(params) = spectrometer.parameters()? {
        for (name, value) in &params {
            println!("{}: {}", name, value);
        }
    }
    let writer = DataWriter::from_config(&config.storage)?;
    spectrometer.save_parameters(&writer, &config.storage.spectrometer_params_file)?;
    spectrometer.disconnect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn simulated_camera(cool_on_connect: bool) -> (RamanCamera, TempDir) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.save_path = dir.path().to_path_buf();
        config.thermal.cool_on_connect = cool_on_connect;
        (RamanCamera::new(config), dir)
    }

    #[test]
    fn test_live_frame_rate_bounds() {
        assert_eq!(parse_fps("5").unwrap(), 5.0);
        assert_eq!(parse_fps("1000").unwrap(), 1000.0);
        assert!(parse_fps("0").is_err());
        assert!(parse_fps("-2").is_err());
        assert!(parse_fps("1e10").is_err());
        assert!(parse_fps("inf").is_err());
        assert!(parse_fps("NaN").is_err());
        assert!(parse_fps("fast").is_err());

        assert!(Args::try_parse_from(["raman_control", "live", "--fps", "1e10"]).is_err());
        assert!(Args::try_parse_from(["raman_control", "live", "--fps", "30"]).is_ok());
    }

    #[tokio::test]
    async fn test_failure_while_cooling_still_closes_camera() {
        let (mut camera, _dir) = simulated_camera(true);
        let cooling = camera.connect().unwrap();
        assert!(cooling.is_some());
        let controller = camera.controller().clone();

        let result: Result<()> = finish(camera, Err(anyhow::anyhow!("frame read failed"))).await;

        assert_eq!(result.unwrap_err().to_string(), "frame read failed");
        assert!(!controller.is_connected());
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_preview_at_max_rate() {
        let (mut camera, _dir) = simulated_camera(false);
        camera.connect().unwrap();
        let controller = camera.controller().clone();

        let result = preview(&mut camera, 2, MAX_FPS).await;
        assert!(result.is_ok());
        assert!(!camera.is_live());

        finish(camera, result).await.unwrap();
        assert!(!controller.is_connected());
    }
}
