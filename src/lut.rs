// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-pixel coordinate lookup table.
//!
//! Each pixel `(row, col)` of a scan has a direction vector and an offset
//! such that its Cartesian position in the sensor frame is
//! `direction * range + offset`, with range in millimetres and the result
//! in metres. The direction already carries the millimetre to metre range
//! unit, so it is a unit vector scaled by `1e-3`.

use crate::{lidar::Error, ouster::SensorMetadata};
use ndarray::Array2;
use std::f64::consts::PI;

/// Range unit applied to raw millimetre ranges.
pub const RANGE_UNIT: f64 = 0.001;

#[derive(Clone, Debug, PartialEq)]
pub struct XyzLut {
    rows: usize,
    cols: usize,
    /// `(rows * cols, 3)`, indexed by `row * cols + col`.
    direction: Array2<f64>,
    /// `(rows * cols, 3)`, indexed by `row * cols + col`.
    offset: Array2<f64>,
}

impl XyzLut {
    /// Build the table from beam intrinsics and the lidar to sensor
    /// transform found in the metadata.
    pub fn new(metadata: &SensorMetadata) -> Result<Self, Error> {
        Self::from_beams(
            metadata.cols(),
            metadata.rows(),
            metadata.beam_intrinsics.lidar_origin_to_beam_origin_mm,
            &metadata.lidar_intrinsics.lidar_to_sensor_transform,
            &metadata.beam_intrinsics.beam_azimuth_angles,
            &metadata.beam_intrinsics.beam_altitude_angles,
        )
    }

    /// Build the table from explicit beam geometry.
    ///
    /// Angles are in degrees, `transform` is a row-major 4x4 homogeneous
    /// matrix with its translation in millimetres.
    pub fn from_beams(
        cols: usize,
        rows: usize,
        lidar_origin_to_beam_origin_mm: f64,
        transform: &[f64; 16],
        azimuth_angles_deg: &[f64],
        altitude_angles_deg: &[f64],
    ) -> Result<Self, Error> {
        if cols == 0 || azimuth_angles_deg.len() != rows || altitude_angles_deg.len() != rows {
            return Err(Error::Metadata(format!(
                "cannot build {}x{} lookup table from {} azimuth and {} altitude angles",
                cols,
                rows,
                azimuth_angles_deg.len(),
                altitude_angles_deg.len()
            )));
        }

        let n = rows * cols;
        let mut direction = Array2::<f64>::zeros((n, 3));
        let mut offset = Array2::<f64>::zeros((n, 3));
        let azimuth_radians = 2.0 * PI / cols as f64;

        for row in 0..rows {
            let azimuth = -azimuth_angles_deg[row] * PI / 180.0;
            let altitude = altitude_angles_deg[row] * PI / 180.0;

            for col in 0..cols {
                let encoder = 2.0 * PI - col as f64 * azimuth_radians;
                let i = row * cols + col;

                let d = [
                    (encoder + azimuth).cos() * altitude.cos(),
                    (encoder + azimuth).sin() * altitude.cos(),
                    altitude.sin(),
                ];
                // beam origin sits on a circle around the lidar origin
                let o = [
                    (encoder.cos() - d[0]) * lidar_origin_to_beam_origin_mm,
                    (encoder.sin() - d[1]) * lidar_origin_to_beam_origin_mm,
                    -d[2] * lidar_origin_to_beam_origin_mm,
                ];

                for axis in 0..3 {
                    let r = &transform[axis * 4..axis * 4 + 3];
                    direction[[i, axis]] =
                        (r[0] * d[0] + r[1] * d[1] + r[2] * d[2]) * RANGE_UNIT;
                    offset[[i, axis]] = (r[0] * o[0] + r[1] * o[1] + r[2] * o[2]
                        + transform[axis * 4 + 3])
                        * RANGE_UNIT;
                }
            }
        }

        Ok(Self {
            rows,
            cols,
            direction,
            offset,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Direction of pixel `(row, col)`, metres per millimetre of range.
    #[inline]
    pub fn direction(&self, row: usize, col: usize) -> [f64; 3] {
        let i = row * self.cols + col;
        [
            self.direction[[i, 0]],
            self.direction[[i, 1]],
            self.direction[[i, 2]],
        ]
    }

    /// Offset of pixel `(row, col)` in metres.
    #[inline]
    pub fn offset(&self, row: usize, col: usize) -> [f64; 3] {
        let i = row * self.cols + col;
        [self.offset[[i, 0]], self.offset[[i, 1]], self.offset[[i, 2]]]
    }

    /// Cartesian position of pixel `(row, col)` at `range` millimetres.
    ///
    /// A zero range means no return and maps to the zero vector.
    #[inline]
    pub fn project(&self, row: usize, col: usize, range: u32) -> [f32; 3] {
        if range == 0 {
            return [0.0; 3];
        }

        let i = row * self.cols + col;
        let r = range as f64;
        [
            (self.direction[[i, 0]] * r + self.offset[[i, 0]]) as f32,
            (self.direction[[i, 1]] * r + self.offset[[i, 1]]) as f32,
            (self.direction[[i, 2]] * r + self.offset[[i, 2]]) as f32,
        ]
    }
}
