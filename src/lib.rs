// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst LiDAR Cloud Library
//!
//! Assembles the UDP packet stream of an Ouster OS sensor into complete,
//! timestamped point clouds.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────┐     ┌──────────────┐     ┌────────────┐
//! │  PacketSource   │ ──► │ PacketFormat  │ ──► │ ScanBatcher  │ ──► │ LidarScan  │
//! │  (UDP/replay)   │     │ (decode)      │     │ (accumulate) │     │ (borrowed) │
//! └─────────────────┘     └───────────────┘     └──────────────┘     └────────────┘
//!                                                                          │
//!                               ┌──────────────┐     ┌────────────┐        ▼
//!                               │     Sink     │ ◄── │ PointCloud │ ◄── scan_to_cloud
//!                               │ (publisher)  │     │  (reused)  │     (with XyzLut)
//!                               └──────────────┘     └────────────┘
//! ```
//!
//! The batcher owns the only scan buffer and the processor owns the only
//! cloud buffer; both are overwritten in place every revolution, so the
//! steady state does not allocate.
//!
//! # Modules
//!
//! - [`format`]: Packet layouts for the supported UDP profiles
//! - [`lut`]: Per-pixel direction and offset lookup table
//! - [`scan`]: Scan buffer and revolution batching
//! - [`cloud`]: Scan to point cloud conversion
//! - [`imu`]: IMU packet decoding
//! - [`ouster`]: Sensor metadata and packet header types
//! - [`pipeline`]: Packet processors and the [`pipeline::Sink`] traits
//! - [`diagnostics`]: Publish rate tracking
//! - [`formats`]: PointCloud2 packing
//! - [`packet_source`]: Packet source abstraction for testing
//! - [`lidar`]: Error type and clocks
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_lidarcloud::{ouster::SensorMetadata, scan::ScanBatcher, lut::XyzLut};
//!
//! let metadata = SensorMetadata::from_file("sensor.json")?;
//! let mut batcher = ScanBatcher::from_metadata(&metadata)?;
//! let lut = XyzLut::new(&metadata)?;
//! let mut cloud = PointCloud::new(metadata.cols(), metadata.rows());
//!
//! loop {
//!     let len = socket.recv(&mut buf)?;
//!     if batcher.batch(&buf[..len])? {
//!         scan_to_cloud(&lut, batcher.scan(), &mut cloud)?;
//!     }
//! }
//! ```

pub mod cloud;
pub mod diagnostics;
pub mod format;
pub mod formats;
pub mod imu;
pub mod lidar;
pub mod lut;
pub mod ouster;
pub mod packet_source;
pub mod pipeline;
pub mod scan;

// Re-exports for convenience
pub use cloud::{PointCloud, scan_to_cloud};
pub use format::{Channel, PacketFormat, UdpProfile};
pub use formats::PointFieldType;
pub use lidar::Error;
pub use lut::XyzLut;
pub use ouster::SensorMetadata;
pub use packet_source::PacketSource;
pub use pipeline::{CloudProcessor, CloudSink, ImuSink, Sink};
pub use scan::{LidarScan, ScanBatcher};
