//! Camera access.
//!
//! A camera is opened once, negotiated against the device capabilities
//! and drained by a background thread that keeps only the most recent
//! decoded frame.
use std::io;

use clap::ValueEnum;
use image::RgbImage;
use rscam::{Camera, Config, IntervalInfo, ResolutionInfo};
use tokio::sync::watch;

use crate::{error::StartupError, meter::METER};

const FORMAT: &[u8] = b"MJPG";

/// Which way the camera points on devices that have more than one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Facing {
    Front,
    Back,
}

/// Validated capture request. The delivered resolution is whatever the
/// device negotiates closest to the ideal.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Back,
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.ideal_width == 0 || self.ideal_height == 0 {
            return Err(StartupError::Unsupported(format!(
                "invalid capture request {}x{}",
                self.ideal_width, self.ideal_height
            )));
        }
        Ok(())
    }

    /// Device node for the requested facing. The outward-pointing camera
    /// enumerates first on the devices this runs on.
    fn device(&self) -> &'static str {
        match self.facing {
            Facing::Back => "/dev/video0",
            Facing::Front => "/dev/video1",
        }
    }
}

/// Anything that can hand the pipeline its latest frame.
pub trait FrameSource {
    /// Most recent decoded frame, or `None` before the first one lands.
    fn current_frame(&self) -> Option<RgbImage>;
}

/// Continuously capturing camera with a latest-frame accessor.
///
/// Dropping the handle stops the capture thread and releases the device.
pub struct CameraHandle {
    rx: watch::Receiver<Option<RgbImage>>,
}

impl FrameSource for CameraHandle {
    fn current_frame(&self) -> Option<RgbImage> {
        self.rx.borrow().clone()
    }
}

/// Open the camera described by `config` and start background capture.
pub fn open(config: &CameraConfig) -> Result<CameraHandle, StartupError> {
    config.validate()?;

    let device = config.device();
    let mut cam = Camera::new(device).map_err(|err| match err.kind() {
        io::ErrorKind::PermissionDenied => StartupError::Permission(device.to_owned()),
        _ => StartupError::Unsupported(format!("{device}: {err}")),
    })?;

    let resolution = negotiate_resolution(&cam, (config.ideal_width, config.ideal_height))?;
    let frame_rate = get_max_frame_rate(&cam, resolution)?;
    log::info!(
        "Using camera {device} at {}x{} ({}/{} fps)",
        resolution.0,
        resolution.1,
        frame_rate.1,
        frame_rate.0
    );

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format: FORMAT,
        ..Default::default()
    })
    .map_err(|err| StartupError::Unsupported(format!("{device}: {err}")))?;

    let (tx, rx) = watch::channel(None);
    std::thread::spawn(move || capture_loop(cam, tx));

    Ok(CameraHandle { rx })
}

/// Drain the camera into the latest-frame slot until every handle is gone.
fn capture_loop(cam: Camera, tx: watch::Sender<Option<RgbImage>>) {
    loop {
        match cam.capture() {
            Ok(frame) => {
                let image: RgbImage = match turbojpeg::decompress_image(&frame[..]) {
                    Ok(image) => image,
                    Err(err) => {
                        log::warn!("Dropping undecodable frame: {err}");
                        continue;
                    }
                };
                METER.tick_captured();
                if tx.send(Some(image)).is_err() {
                    break;
                }
            }
            Err(err) => {
                log::error!("Capture stopped: {err}");
                break;
            }
        }
    }
}

/// Pick the supported resolution closest to the ideal one.
fn negotiate_resolution(cam: &Camera, ideal: (u32, u32)) -> Result<(u32, u32), StartupError> {
    let resolution_info = cam
        .resolutions(FORMAT)
        .map_err(|err| StartupError::Unsupported(err.to_string()))?;
    log::debug!("Found resolutions: {:?}", &resolution_info);

    match resolution_info {
        ResolutionInfo::Discretes(resolutions) => closest_discrete(&resolutions, ideal),
        ResolutionInfo::Stepwise { min, max, step } => {
            Some((
                align_stepwise(ideal.0, min.0, max.0, step.0),
                align_stepwise(ideal.1, min.1, max.1, step.1),
            ))
        }
    }
    .ok_or_else(|| StartupError::Unsupported("no supported resolution".into()))
}

fn closest_discrete(resolutions: &[(u32, u32)], ideal: (u32, u32)) -> Option<(u32, u32)> {
    resolutions
        .iter()
        .min_by_key(|res| res.0.abs_diff(ideal.0) + res.1.abs_diff(ideal.1))
        .copied()
}

fn align_stepwise(ideal: u32, min: u32, max: u32, step: u32) -> u32 {
    let clamped = ideal.clamp(min, max);
    match step {
        0 => clamped,
        _ => min + (clamped - min) / step * step,
    }
}

/// Get the maximum supported frame rate for the negotiated resolution.
fn get_max_frame_rate(cam: &Camera, resolution: (u32, u32)) -> Result<(u32, u32), StartupError> {
    let interval_info = cam
        .intervals(FORMAT, resolution)
        .map_err(|err| StartupError::Unsupported(err.to_string()))?;
    log::debug!("Found frame rates: {:?}", &interval_info);

    match interval_info {
        IntervalInfo::Discretes(frame_rates) => frame_rates
            .iter()
            .map(|(denominator, numerator)| ((denominator, numerator), numerator / denominator))
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|((&d, &n), _)| (d, n)),
        IntervalInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| StartupError::Unsupported("no supported frame rate".into()))
}
