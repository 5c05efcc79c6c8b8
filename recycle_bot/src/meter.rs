//! Throughput counters and the live-tensor gauge.
//!
use std::{
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    classified_frames: AtomicU64,
    live_tensors: AtomicI64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            classified_frames: AtomicU64::new(0),
            live_tensors: AtomicI64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_classified(&self) {
        self.classified_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_captured(&self) -> u64 {
        self.captured_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_classified(&self) -> u64 {
        self.classified_frames.swap(0, Ordering::Relaxed)
    }

    /// Number of pipeline tensors currently alive. Must read zero between
    /// iterations, otherwise the loop is leaking.
    pub fn live_tensors(&self) -> i64 {
        self.live_tensors.load(Ordering::Relaxed)
    }
}

/// Guard tied to one tensor. Acquiring bumps the live-tensor gauge,
/// dropping decrements it.
pub struct TensorGuard(());

impl TensorGuard {
    pub fn acquire() -> Self {
        METER.live_tensors.fetch_add(1, Ordering::Relaxed);
        TensorGuard(())
    }
}

impl Drop for TensorGuard {
    fn drop(&mut self) {
        METER.live_tensors.fetch_sub(1, Ordering::Relaxed);
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let captured_frames = METER.get_reset_captured();
            let classified_frames = METER.get_reset_classified();
            let elapsed = start.elapsed().as_secs_f32();
            let fps_captured = captured_frames as f32 / elapsed;
            let fps_classified = classified_frames as f32 / elapsed;

            if captured_frames > 0 {
                log::info!("Captured frames per second: {fps_captured:.2}")
            }
            if classified_frames > 0 {
                log::info!("Classified frames per second: {fps_classified:.2}")
            }
        }
    })
}
