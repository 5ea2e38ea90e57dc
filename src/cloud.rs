// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Scan to point cloud conversion.
//!
//! [`PointCloud`] is a dense, organized cloud with one point per pixel,
//! stored as a structure of arrays and indexed by `row * width + col`. The
//! buffer is allocated once and overwritten by every conversion.
//!
//! Pixels without a return (range 0) are written as the zero vector with
//! all attributes copied through, so the cloud always holds exactly
//! `width * height` points.

use crate::{format::Channel, lidar::Error, lut::XyzLut, scan::LidarScan};
use ndarray::{ErrorKind, ShapeError};
use tracing::instrument;

/// One point of a [`PointCloud`], assembled on demand.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Nanoseconds since the cloud timestamp.
    pub t: u32,
    pub reflectivity: u16,
    /// Signal photons.
    pub intensity: u16,
    /// Near-infrared photons.
    pub ambient: u16,
    /// Pixel row, the beam index.
    pub ring: u16,
    /// Range in millimetres.
    pub range: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointCloud {
    width: usize,
    height: usize,
    timestamp: u64,
    frame_id: u16,
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
    t: Vec<u32>,
    reflectivity: Vec<u16>,
    intensity: Vec<u16>,
    ambient: Vec<u16>,
    ring: Vec<u16>,
    range: Vec<u32>,
}

impl PointCloud {
    /// Allocate a cloud for `width` columns by `height` rows.
    pub fn new(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            width,
            height,
            timestamp: 0,
            frame_id: 0,
            x: vec![0.0; n],
            y: vec![0.0; n],
            z: vec![0.0; n],
            t: vec![0; n],
            reflectivity: vec![0; n],
            intensity: vec![0; n],
            ambient: vec![0; n],
            ring: vec![0; n],
            range: vec![0; n],
        }
    }

    /// Convert a scan into a freshly allocated cloud.
    pub fn from_scan(lut: &XyzLut, scan: &LidarScan) -> Result<Self, Error> {
        let mut cloud = Self::new(scan.width(), scan.height());
        scan_to_cloud(lut, scan, &mut cloud)?;
        Ok(cloud)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Total number of points, `width * height`.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Capture time in nanoseconds of the first column with data.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Sensor frame id of the revolution.
    pub fn frame_id(&self) -> u16 {
        self.frame_id
    }

    #[inline]
    pub fn x(&self) -> &[f32] {
        &self.x
    }

    #[inline]
    pub fn y(&self) -> &[f32] {
        &self.y
    }

    #[inline]
    pub fn z(&self) -> &[f32] {
        &self.z
    }

    #[inline]
    pub fn t(&self) -> &[u32] {
        &self.t
    }

    #[inline]
    pub fn reflectivity(&self) -> &[u16] {
        &self.reflectivity
    }

    #[inline]
    pub fn intensity(&self) -> &[u16] {
        &self.intensity
    }

    #[inline]
    pub fn ambient(&self) -> &[u16] {
        &self.ambient
    }

    #[inline]
    pub fn ring(&self) -> &[u16] {
        &self.ring
    }

    #[inline]
    pub fn range(&self) -> &[u32] {
        &self.range
    }

    /// Point at `row`, `col`.
    pub fn point(&self, row: usize, col: usize) -> Point {
        let i = row * self.width + col;
        Point {
            x: self.x[i],
            y: self.y[i],
            z: self.z[i],
            t: self.t[i],
            reflectivity: self.reflectivity[i],
            intensity: self.intensity[i],
            ambient: self.ambient[i],
            ring: self.ring[i],
            range: self.range[i],
        }
    }
}

/// Convert a completed scan into `cloud`.
///
/// The cloud timestamp is the first nonzero column timestamp. A scan
/// without one never received a valid column and yields
/// [`Error::InvalidScan`], leaving `cloud` untouched.
#[instrument(skip_all)]
pub fn scan_to_cloud(
    lut: &XyzLut,
    scan: &LidarScan,
    cloud: &mut PointCloud,
) -> Result<(), Error> {
    let (w, h) = (scan.width(), scan.height());
    if lut.cols() != w || lut.rows() != h || cloud.width != w || cloud.height != h {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
    }

    let timestamp = scan.first_valid_timestamp().ok_or(Error::InvalidScan)?;
    cloud.timestamp = timestamp;
    cloud.frame_id = scan.frame_id().unwrap_or_default();

    let range = scan.range();
    let reflectivity = scan.channel(Channel::Reflectivity);
    let signal = scan.channel(Channel::Signal);
    let near_ir = scan.channel(Channel::NearIr);

    for row in 0..h {
        for col in 0..w {
            let i = row * w + col;
            let r = range[[row, col]];
            let [x, y, z] = lut.project(row, col, r);
            let dt = scan.header(col).timestamp.saturating_sub(timestamp);

            cloud.x[i] = x;
            cloud.y[i] = y;
            cloud.z[i] = z;
            cloud.t[i] = dt.min(u32::MAX as u64) as u32;
            cloud.reflectivity[i] = reflectivity[[row, col]] as u16;
            cloud.intensity[i] = signal[[row, col]] as u16;
            cloud.ambient[i] = near_ir[[row, col]] as u16;
            cloud.ring[i] = row as u16;
            cloud.range[i] = r;
        }
    }

    Ok(())
}
