// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Publish-rate health tracking.
//!
//! Observers are notified after every cloud handed to the sink and are
//! entirely decoupled from batching; a processor without observers behaves
//! identically.

use crate::cloud::PointCloud;
use std::{
    collections::VecDeque,
    fmt,
    time::{Duration, Instant},
};
use tracing::{info, warn};

/// Notified once for every emitted cloud.
pub trait FrameObserver: Send {
    fn on_cloud(&mut self, cloud: &PointCloud);

    /// Called periodically while no packets arrive.
    fn on_idle(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    /// Publish rate inside the tolerance window.
    Ok,
    /// Publish rate outside the tolerance window.
    Warn,
    /// Nothing published during the last window.
    Stale,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "ok"),
            HealthStatus::Warn => write!(f, "frequency out of range"),
            HealthStatus::Stale => write!(f, "stale"),
        }
    }
}

/// Sliding-window frequency tracker with tick/update semantics.
#[derive(Debug)]
pub struct FrequencyDiagnostics {
    name: String,
    expected_hz: f64,
    tolerance: f64,
    window: Duration,
    ticks: VecDeque<Instant>,
    status: HealthStatus,
}

impl FrequencyDiagnostics {
    /// Track `name` published at `expected_hz`, accepting a relative error
    /// of `tolerance` over a `window` long sliding window.
    pub fn new(name: &str, expected_hz: f64, tolerance: f64, window: Duration) -> Self {
        let capacity = (expected_hz * window.as_secs_f64() * 2.0).ceil() as usize + 1;
        Self {
            name: name.to_string(),
            expected_hz,
            tolerance,
            window,
            ticks: VecDeque::with_capacity(capacity),
            status: HealthStatus::Stale,
        }
    }

    /// Tracker for the 10 Hz or 20 Hz rotation rate of a lidar mode.
    pub fn for_lidar(name: &str, frequency: u32) -> Self {
        Self::new(name, frequency as f64, 0.1, Duration::from_secs(2))
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.expire(now);
        self.ticks.push_back(now);
    }

    /// Frequency measured over the window, in Hz.
    pub fn frequency(&self) -> f64 {
        self.ticks.len() as f64 / self.window.as_secs_f64()
    }

    pub fn update(&mut self) -> HealthStatus {
        self.update_at(Instant::now())
    }

    /// Recompute the status, logging when it changes.
    pub fn update_at(&mut self, now: Instant) -> HealthStatus {
        self.expire(now);

        let freq = self.frequency();
        let min = self.expected_hz * (1.0 - self.tolerance);
        let max = self.expected_hz * (1.0 + self.tolerance);
        let status = if self.ticks.is_empty() {
            HealthStatus::Stale
        } else if freq < min || freq > max {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        };

        if status != self.status {
            match status {
                HealthStatus::Ok => info!("{}: {} at {:.1} Hz", self.name, status, freq),
                _ => warn!(
                    "{}: {} at {:.1} Hz, expected {:.1} Hz",
                    self.name, status, freq, self.expected_hz
                ),
            }
            self.status = status;
        }

        status
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.ticks.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            self.ticks.pop_front();
        }
    }
}

impl FrameObserver for FrequencyDiagnostics {
    fn on_cloud(&mut self, _cloud: &PointCloud) {
        self.tick();
        self.update();
    }

    fn on_idle(&mut self) {
        self.update();
    }
}
