// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_lidarcloud::{
    Error,
    pipeline::{PartialScanPolicy, ProcessorConfig},
};
use serde_json::json;
use std::{path::PathBuf, time::Duration};
use tracing::level_filters::LevelFilter;
use zenoh::config::{Config, WhatAmI};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Hostname or IP address of the LiDAR, used to fetch the sensor
    /// metadata over its HTTP API when --metadata is not given.
    #[arg(env, required_unless_present = "metadata")]
    pub target: Option<String>,

    /// Read the sensor metadata from this JSON file instead of the sensor.
    #[arg(long, env)]
    pub metadata: Option<PathBuf>,

    /// Number of one second polls waiting for the sensor to reach RUNNING.
    #[arg(long, env, default_value = "60")]
    pub metadata_attempts: usize,

    /// UDP port receiving lidar packets, defaults to the sensor
    /// configuration.
    #[arg(long, env)]
    pub udp_port_lidar: Option<u16>,

    /// UDP port receiving IMU packets, defaults to the sensor configuration.
    #[arg(long, env)]
    pub udp_port_imu: Option<u16>,

    /// Prefix added to the sensor, lidar and imu frame names.
    #[arg(long, env, default_value = "")]
    pub tf_prefix: String,

    /// lidar base topic, clouds are published on {base}/points and imu
    /// readings on {base}/imu
    #[arg(long, env, default_value = "rt/lidar")]
    pub lidar_topic: String,

    /// Drop revolutions missing any column instead of publishing them.
    #[arg(long, env)]
    pub drop_partial: bool,

    /// Warn when cloud timestamps lag host time by more than this many
    /// seconds, 0 disables the check.
    #[arg(long, env, default_value = "5.0")]
    pub max_clock_skew: f64,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// zenoh connection mode
    #[arg(long, env, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env)]
    no_multicast_scouting: bool,
}

impl Args {
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            partial_scan: match self.drop_partial {
                true => PartialScanPolicy::Drop,
                false => PartialScanPolicy::Emit,
            },
            max_clock_skew: (self.max_clock_skew > 0.0)
                .then(|| Duration::from_secs_f64(self.max_clock_skew)),
        }
    }

    /// Frame name with the configured prefix applied.
    pub fn frame(&self, name: &str) -> String {
        match self.tf_prefix.is_empty() {
            true => name.to_string(),
            false => format!("{}/{}", self.tf_prefix.trim_end_matches('/'), name),
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();
        let mut insert = |key: &str, value: serde_json::Value| {
            config
                .insert_json5(key, &value.to_string())
                .map_err(|e| Error::Config(format!("zenoh {}: {}", key, e)))
        };

        insert("mode", json!(args.mode))?;

        if !args.connect.is_empty() {
            insert("connect/endpoints", json!(args.connect))?;
        }

        if !args.listen.is_empty() {
            insert("listen/endpoints", json!(args.listen))?;
        }

        if args.no_multicast_scouting {
            insert("scouting/multicast/enabled", json!(false))?;
        }

        insert("scouting/multicast/interface", json!("lo"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["lidarcloud", "os-122.local"]);
        assert_eq!(args.target.as_deref(), Some("os-122.local"));
        let config = args.processor_config();
        assert_eq!(config.partial_scan, PartialScanPolicy::Emit);
        assert_eq!(config.max_clock_skew, Some(Duration::from_secs(5)));
        assert_eq!(args.frame("os_lidar"), "os_lidar");
    }

    #[test]
    fn test_metadata_file_replaces_target() {
        let args = Args::parse_from([
            "lidarcloud",
            "--metadata",
            "sensor.json",
            "--drop-partial",
            "--max-clock-skew",
            "0",
            "--tf-prefix",
            "front/",
        ]);
        assert!(args.target.is_none());
        let config = args.processor_config();
        assert_eq!(config.partial_scan, PartialScanPolicy::Drop);
        assert_eq!(config.max_clock_skew, None);
        assert_eq!(args.frame("os_imu"), "front/os_imu");
    }

    #[test]
    fn test_zenoh_config() {
        let args = Args::parse_from([
            "lidarcloud",
            "host",
            "--connect",
            "tcp/127.0.0.1:7447",
            "--no-multicast-scouting",
        ]);
        assert!(Config::try_from(args).is_ok());
    }
}
