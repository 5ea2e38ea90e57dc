// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ouster sensor metadata and packet header types.
//!
//! The metadata mirrors the JSON documents served by the sensor HTTP API
//! under `/api/v1/sensor/metadata`. It is fetched once at startup and is
//! read-only afterwards; every other component is derived from it.

use crate::lidar::Error;
use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr, thread::sleep, time::Duration};
use tracing::{debug, info};

/// Row-major 4x4 identity used when a transform is missing from metadata.
pub const IDENTITY_TRANSFORM: [f64; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

fn identity_transform() -> [f64; 16] {
    IDENTITY_TRANSFORM
}

fn default_profile_lidar() -> String {
    "LEGACY".to_string()
}

fn default_profile_imu() -> String {
    "LEGACY".to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub status: String,
    #[serde(default)]
    pub build_rev: String,
    #[serde(default)]
    pub prod_sn: String,
    #[serde(default)]
    pub prod_pn: String,
    #[serde(default)]
    pub prod_line: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LidarDataFormat {
    #[serde(default = "default_profile_lidar")]
    pub udp_profile_lidar: String,
    #[serde(default = "default_profile_imu")]
    pub udp_profile_imu: String,
    pub columns_per_packet: usize,
    pub columns_per_frame: usize,
    pub pixels_per_column: usize,
    pub column_window: [usize; 2],
    #[serde(default)]
    pub pixel_shift_by_row: Vec<i16>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamIntrinsics {
    pub beam_altitude_angles: Vec<f64>,
    pub beam_azimuth_angles: Vec<f64>,
    pub lidar_origin_to_beam_origin_mm: f64,
    #[serde(default = "identity_transform")]
    pub beam_to_lidar_transform: [f64; 16],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuIntrinsics {
    #[serde(default = "identity_transform")]
    pub imu_to_sensor_transform: [f64; 16],
}

impl Default for ImuIntrinsics {
    fn default() -> Self {
        Self {
            imu_to_sensor_transform: IDENTITY_TRANSFORM,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LidarIntrinsics {
    #[serde(default = "identity_transform")]
    pub lidar_to_sensor_transform: [f64; 16],
}

impl Default for LidarIntrinsics {
    fn default() -> Self {
        Self {
            lidar_to_sensor_transform: IDENTITY_TRANSFORM,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigParams {
    #[serde(default)]
    pub lidar_mode: String,
    #[serde(default)]
    pub udp_port_lidar: u16,
    #[serde(default)]
    pub udp_port_imu: u16,
    #[serde(default)]
    pub timestamp_mode: String,
}

impl Default for ConfigParams {
    fn default() -> Self {
        Self {
            lidar_mode: "1024x10".to_string(),
            udp_port_lidar: 7502,
            udp_port_imu: 7503,
            timestamp_mode: "TIME_FROM_INTERNAL_OSC".to_string(),
        }
    }
}

/// Complete sensor description required before any packet is processed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    pub sensor_info: SensorInfo,
    #[serde(default)]
    pub config_params: ConfigParams,
    pub lidar_data_format: LidarDataFormat,
    pub beam_intrinsics: BeamIntrinsics,
    #[serde(default)]
    pub imu_intrinsics: ImuIntrinsics,
    #[serde(default)]
    pub lidar_intrinsics: LidarIntrinsics,
}

impl SensorMetadata {
    /// Parse metadata from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let metadata: SensorMetadata = serde_json::from_str(json)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Load metadata from a JSON file such as one saved next to a recording.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let reader = BufReader::new(File::open(path)?);
        let metadata: SensorMetadata = serde_json::from_reader(reader)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Fetch metadata from a live sensor over its HTTP API.
    ///
    /// Polls `sensor_info` once per second until the sensor reports
    /// `RUNNING`, giving up after `attempts` polls.
    pub fn fetch(target: &str, attempts: usize) -> Result<Self, Error> {
        let api = format!("http://{}/api/v1/sensor", target);

        let mut sensor_info = None;
        for attempt in 0..attempts {
            let info = ureq::get(&format!("{}/metadata/sensor_info", api))
                .call()?
                .body_mut()
                .read_json::<SensorInfo>()?;
            if info.status == "RUNNING" {
                info!("LiDAR {} running firmware {}", info.prod_sn, info.build_rev);
                sensor_info = Some(info);
                break;
            }
            debug!("waiting for LiDAR: status {} attempt {}", info.status, attempt);
            sleep(Duration::from_secs(1));
        }
        let sensor_info = sensor_info.ok_or_else(|| {
            Error::Metadata(format!("sensor not running after {} attempts", attempts))
        })?;

        let config_params = ureq::get(&format!("{}/config", api))
            .call()?
            .body_mut()
            .read_json::<ConfigParams>()?;
        let lidar_data_format = ureq::get(&format!("{}/metadata/lidar_data_format", api))
            .call()?
            .body_mut()
            .read_json::<LidarDataFormat>()?;
        let beam_intrinsics = ureq::get(&format!("{}/metadata/beam_intrinsics", api))
            .call()?
            .body_mut()
            .read_json::<BeamIntrinsics>()?;
        let imu_intrinsics = ureq::get(&format!("{}/metadata/imu_intrinsics", api))
            .call()?
            .body_mut()
            .read_json::<ImuIntrinsics>()?;
        let lidar_intrinsics = ureq::get(&format!("{}/metadata/lidar_intrinsics", api))
            .call()?
            .body_mut()
            .read_json::<LidarIntrinsics>()?;

        let metadata = SensorMetadata {
            sensor_info,
            config_params,
            lidar_data_format,
            beam_intrinsics,
            imu_intrinsics,
            lidar_intrinsics,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check the internal consistency of the metadata.
    pub fn validate(&self) -> Result<(), Error> {
        let format = &self.lidar_data_format;
        let rows = format.pixels_per_column;
        let cols = format.columns_per_frame;

        if rows == 0 || cols == 0 || format.columns_per_packet == 0 {
            return Err(Error::Metadata(format!(
                "invalid dimensions {}x{} with {} columns per packet",
                cols, rows, format.columns_per_packet
            )));
        }
        if self.beam_intrinsics.beam_altitude_angles.len() != rows
            || self.beam_intrinsics.beam_azimuth_angles.len() != rows
        {
            return Err(Error::Metadata(format!(
                "expected {} beam angles, got {} altitude and {} azimuth",
                rows,
                self.beam_intrinsics.beam_altitude_angles.len(),
                self.beam_intrinsics.beam_azimuth_angles.len()
            )));
        }
        if !format.pixel_shift_by_row.is_empty() && format.pixel_shift_by_row.len() != rows {
            return Err(Error::Metadata(format!(
                "expected {} pixel shifts, got {}",
                rows,
                format.pixel_shift_by_row.len()
            )));
        }
        if format.column_window[0] >= cols || format.column_window[1] >= cols {
            return Err(Error::Metadata(format!(
                "column window {:?} outside {} columns",
                format.column_window, cols
            )));
        }

        Ok(())
    }

    /// Number of columns inside the configured column window, which may
    /// wrap past the end of the revolution.
    pub fn window_columns(&self) -> usize {
        let [start, end] = self.lidar_data_format.column_window;
        if start <= end {
            end - start + 1
        } else {
            self.cols() - start + end + 1
        }
    }

    /// Pixels per column (H).
    pub fn rows(&self) -> usize {
        self.lidar_data_format.pixels_per_column
    }

    /// Columns per frame (W).
    pub fn cols(&self) -> usize {
        self.lidar_data_format.columns_per_frame
    }

    /// The configured lidar mode, falling back to the frame width at 10 Hz.
    pub fn lidar_mode(&self) -> LidarMode {
        self.config_params
            .lidar_mode
            .parse()
            .unwrap_or(LidarMode {
                columns: self.cols(),
                frequency: 10,
            })
    }

    /// IMU frame to sensor frame, translation in metres.
    pub fn imu_to_sensor(&self) -> Isometry3<f64> {
        transform_to_isometry(&self.imu_intrinsics.imu_to_sensor_transform)
    }

    /// Lidar frame to sensor frame, translation in metres.
    pub fn lidar_to_sensor(&self) -> Isometry3<f64> {
        transform_to_isometry(&self.lidar_intrinsics.lidar_to_sensor_transform)
    }
}

/// Convert a row-major 4x4 homogeneous transform with translation in
/// millimetres into a rigid isometry with translation in metres.
pub fn transform_to_isometry(matrix: &[f64; 16]) -> Isometry3<f64> {
    let rotation = Matrix3::new(
        matrix[0], matrix[1], matrix[2], //
        matrix[4], matrix[5], matrix[6], //
        matrix[8], matrix[9], matrix[10],
    );
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&rotation));
    let translation = Translation3::new(matrix[3] * 1e-3, matrix[7] * 1e-3, matrix[11] * 1e-3);
    Isometry3::from_parts(translation, rotation)
}

/// Column count and rotation rate, written as `COLxHZ` (e.g. `1024x10`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LidarMode {
    pub columns: usize,
    pub frequency: u32,
}

impl FromStr for LidarMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (columns, frequency) = s
            .split_once('x')
            .ok_or_else(|| Error::Config(format!("invalid lidar mode: {}", s)))?;
        let columns = columns
            .parse()
            .map_err(|_| Error::Config(format!("invalid lidar mode columns: {}", s)))?;
        let frequency = frequency
            .parse()
            .map_err(|_| Error::Config(format!("invalid lidar mode frequency: {}", s)))?;
        Ok(LidarMode { columns, frequency })
    }
}

impl fmt::Display for LidarMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.frequency)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ShotLimiting {
    Normal,
    Imminent(u8),
    Limiting(u8),
    Invalid(u8),
}

impl fmt::Display for ShotLimiting {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            ShotLimiting::Normal => write!(f, "Normal"),
            ShotLimiting::Imminent(seconds) => write!(f, "Limiting in {} seconds", seconds),
            ShotLimiting::Limiting(range) => {
                write!(f, "Limiting to approximately {}% range", range)
            }
            ShotLimiting::Invalid(val) => write!(f, "Invalid shot limiting value: {}", val),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ShutdownStatus {
    Normal,
    Imminent(u8),
    Invalid(u8),
}

impl fmt::Display for ShutdownStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            ShutdownStatus::Normal => write!(f, "Normal"),
            ShutdownStatus::Imminent(seconds) => {
                write!(f, "Shutdown imminent in {} seconds", seconds)
            }
            ShutdownStatus::Invalid(val) => write!(f, "Invalid shutdown status value: {}", val),
        }
    }
}

/// Thermal and shutdown state reported in the packet header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SensorStatus {
    pub shot_limiting: ShotLimiting,
    pub shutdown_status: ShutdownStatus,
}

impl Default for SensorStatus {
    fn default() -> Self {
        Self {
            shot_limiting: ShotLimiting::Normal,
            shutdown_status: ShutdownStatus::Normal,
        }
    }
}

/// Header prepended to lidar packets by the non-legacy UDP profiles.
///
/// Borrowed view over the first [`PacketHeader::LEN`] bytes of a packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PacketHeader<'a> {
    slice: &'a [u8],
}

impl<'a> PacketHeader<'a> {
    /// Length of the header in bytes.
    pub const LEN: usize = 32;

    /// Packet type of lidar data packets.
    pub const LIDAR_PACKET_TYPE: u16 = 1;

    pub fn parse(slice: &'a [u8]) -> Result<PacketHeader<'a>, Error> {
        if slice.len() < Self::LEN {
            return Err(Error::PacketSize {
                expected: Self::LEN,
                actual: slice.len(),
            });
        }

        let header = PacketHeader { slice };
        if header.packet_type() != Self::LIDAR_PACKET_TYPE {
            return Err(Error::UnknownPacketType(header.packet_type()));
        }

        Ok(header)
    }

    pub fn packet_type(&self) -> u16 {
        u16::from_le_bytes([self.slice[0], self.slice[1]])
    }

    /// Index of the lidar scan, increments every rotation.
    pub fn frame_id(&self) -> u16 {
        u16::from_le_bytes([self.slice[2], self.slice[3]])
    }

    /// Updates on every reinit and reboot of the sensor.
    pub fn init_id(&self) -> u32 {
        u32::from_le_bytes([self.slice[4], self.slice[5], self.slice[6], 0])
    }

    pub fn serial_number(&self) -> u64 {
        u64::from_le_bytes([
            self.slice[7],
            self.slice[8],
            self.slice[9],
            self.slice[10],
            self.slice[11],
            0,
            0,
            0,
        ])
    }

    /// Raw alert flags bitmask.
    pub fn alert_flags(&self) -> u8 {
        self.slice[12]
    }

    pub fn shot_limiting(&self) -> ShotLimiting {
        match self.slice[19] & 0x0f {
            0 => ShotLimiting::Normal,
            1 => ShotLimiting::Imminent(self.slice[17]),
            2 => ShotLimiting::Limiting(3),
            3 => ShotLimiting::Limiting(6),
            4 => ShotLimiting::Limiting(9),
            5 => ShotLimiting::Limiting(12),
            6 => ShotLimiting::Limiting(16),
            7 => ShotLimiting::Limiting(21),
            8 => ShotLimiting::Limiting(25),
            9 => ShotLimiting::Limiting(27),
            val => ShotLimiting::Invalid(val),
        }
    }

    pub fn shutdown_status(&self) -> ShutdownStatus {
        match self.slice[18] & 0x0f {
            0 => ShutdownStatus::Normal,
            1 => ShutdownStatus::Imminent(self.slice[16]),
            val => ShutdownStatus::Invalid(val),
        }
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus {
            shot_limiting: self.shot_limiting(),
            shutdown_status: self.shutdown_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OS1_METADATA: &str = r#"{
        "sensor_info": {
            "status": "RUNNING",
            "build_rev": "v2.5.2",
            "prod_sn": "122201000999",
            "prod_pn": "840-102145-D",
            "prod_line": "OS-1-64"
        },
        "config_params": {
            "lidar_mode": "1024x20",
            "udp_port_lidar": 7502,
            "udp_port_imu": 7503,
            "timestamp_mode": "TIME_FROM_INTERNAL_OSC"
        },
        "lidar_data_format": {
            "udp_profile_lidar": "LEGACY",
            "columns_per_packet": 16,
            "columns_per_frame": 1024,
            "pixels_per_column": 4,
            "column_window": [0, 1023],
            "pixel_shift_by_row": [12, 4, -4, -12]
        },
        "beam_intrinsics": {
            "beam_altitude_angles": [16.6, 5.5, -5.5, -16.6],
            "beam_azimuth_angles": [3.1, 1.0, -1.0, -3.1],
            "lidar_origin_to_beam_origin_mm": 15.806
        },
        "imu_intrinsics": {
            "imu_to_sensor_transform": [1, 0, 0, 6.253, 0, 1, 0, -11.775, 0, 0, 1, 7.645, 0, 0, 0, 1]
        },
        "lidar_intrinsics": {
            "lidar_to_sensor_transform": [-1, 0, 0, 0, 0, -1, 0, 0, 0, 0, 1, 36.18, 0, 0, 0, 1]
        }
    }"#;

    #[test]
    fn test_parse_metadata() {
        let metadata = SensorMetadata::from_json(OS1_METADATA).unwrap();
        assert_eq!(metadata.rows(), 4);
        assert_eq!(metadata.cols(), 1024);
        assert_eq!(metadata.lidar_data_format.udp_profile_imu, "LEGACY");
        assert_eq!(
            metadata.lidar_mode(),
            LidarMode {
                columns: 1024,
                frequency: 20
            }
        );
        assert_eq!(
            metadata.beam_intrinsics.beam_to_lidar_transform,
            IDENTITY_TRANSFORM
        );
    }

    #[test]
    fn test_window_columns() {
        let mut metadata = SensorMetadata::from_json(OS1_METADATA).unwrap();
        assert_eq!(metadata.window_columns(), 1024);

        metadata.lidar_data_format.column_window = [256, 767];
        assert_eq!(metadata.window_columns(), 512);

        metadata.lidar_data_format.column_window = [1000, 23];
        assert_eq!(metadata.window_columns(), 48);
    }

    #[test]
    fn test_metadata_beam_count_mismatch() {
        let json = OS1_METADATA.replace("[3.1, 1.0, -1.0, -3.1]", "[3.1, 1.0]");
        assert!(matches!(
            SensorMetadata::from_json(&json),
            Err(Error::Metadata(_))
        ));
    }

    #[test]
    fn test_metadata_truncated_json() {
        assert!(matches!(
            SensorMetadata::from_json(&OS1_METADATA[..100]),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_lidar_to_sensor_transform() {
        let metadata = SensorMetadata::from_json(OS1_METADATA).unwrap();
        let iso = metadata.lidar_to_sensor();
        assert!((iso.translation.vector.z - 0.03618).abs() < 1e-9);
        // 180 degree yaw
        let p = iso.rotation * nalgebra::Vector3::new(1.0, 0.0, 0.0);
        assert!((p.x + 1.0).abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
    }

    #[test]
    fn test_lidar_mode_parse() {
        let mode: LidarMode = "2048x10".parse().unwrap();
        assert_eq!(mode.columns, 2048);
        assert_eq!(mode.frequency, 10);
        assert_eq!(mode.to_string(), "2048x10");
        assert!("2048".parse::<LidarMode>().is_err());
        assert!("axb".parse::<LidarMode>().is_err());
    }

    #[test]
    fn test_packet_header() {
        let mut buf = [0u8; 32];
        buf[0] = 1;
        buf[2..4].copy_from_slice(&513u16.to_le_bytes());
        buf[4..7].copy_from_slice(&[0x01, 0x02, 0x03]);
        buf[18] = 0x01;
        buf[16] = 30;
        buf[19] = 0x04;

        let header = PacketHeader::parse(&buf).unwrap();
        assert_eq!(header.frame_id(), 513);
        assert_eq!(header.init_id(), 0x030201);
        assert_eq!(header.shutdown_status(), ShutdownStatus::Imminent(30));
        assert_eq!(header.shot_limiting(), ShotLimiting::Limiting(9));
        assert_ne!(header.status(), SensorStatus::default());

        buf[0] = 2;
        assert!(matches!(
            PacketHeader::parse(&buf),
            Err(Error::UnknownPacketType(2))
        ));
        assert!(matches!(
            PacketHeader::parse(&buf[..10]),
            Err(Error::PacketSize { .. })
        ));
    }
}
