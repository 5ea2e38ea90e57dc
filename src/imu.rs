// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Stateless IMU packet decoding.

use crate::{format::PacketFormat, lidar::Error};
use nalgebra::{Quaternion, Vector3};
use std::f64::consts::PI;

/// Standard gravity in m/s^2, the accelerometer reports in g.
pub const STANDARD_G: f64 = 9.80665;

const LINEAR_ACCELERATION_VARIANCE: f64 = 0.01;
const ANGULAR_VELOCITY_VARIANCE: f64 = 6e-4;

/// One IMU sample in SI units.
///
/// The sensor provides no orientation estimate: `orientation` is the zero
/// quaternion and its covariance is `-1` on the diagonal, which marks it
/// unknown to ROS consumers.
#[derive(Clone, Debug, PartialEq)]
pub struct ImuReading {
    /// Gyroscope read time in nanoseconds.
    pub timestamp: u64,
    pub orientation: Quaternion<f64>,
    pub orientation_covariance: [f64; 9],
    /// rad/s
    pub angular_velocity: Vector3<f64>,
    pub angular_velocity_covariance: [f64; 9],
    /// m/s^2
    pub linear_acceleration: Vector3<f64>,
    pub linear_acceleration_covariance: [f64; 9],
}

fn diagonal(value: f64) -> [f64; 9] {
    let mut m = [0.0; 9];
    m[0] = value;
    m[4] = value;
    m[8] = value;
    m
}

/// Decode one IMU packet.
///
/// The only failure is a packet whose length does not match the IMU
/// layout, reported as [`Error::PacketSize`].
pub fn decode_imu(format: &PacketFormat, buf: &[u8]) -> Result<ImuReading, Error> {
    let packet = format.imu_packet(buf)?;
    let [ax, ay, az] = packet.acceleration();
    let [gx, gy, gz] = packet.angular_velocity();
    let deg = PI / 180.0;

    Ok(ImuReading {
        timestamp: packet.gyro_timestamp(),
        orientation: Quaternion::new(0.0, 0.0, 0.0, 0.0),
        orientation_covariance: [-1.0; 9],
        angular_velocity: Vector3::new(gx as f64 * deg, gy as f64 * deg, gz as f64 * deg),
        angular_velocity_covariance: diagonal(ANGULAR_VELOCITY_VARIANCE),
        linear_acceleration: Vector3::new(
            ax as f64 * STANDARD_G,
            ay as f64 * STANDARD_G,
            az as f64 * STANDARD_G,
        ),
        linear_acceleration_covariance: diagonal(LINEAR_ACCELERATION_VARIANCE),
    })
}
