// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! PointCloud2 packing of [`PointCloud`] buffers.
//!
//! Points are written row-major in the organized layout of the cloud, one
//! 28-byte little-endian record per point:
//!
//! ```text
//! ┌───────┬───────┬───────┬───────┬─────────┬───────────┬─────────┬────────┬─────────┐
//! │ x:f32 │ y:f32 │ z:f32 │ t:u32 │ refl:u16│ intens:u16│ amb:u16 │ring:u16│range:u32│
//! │ 0     │ 4     │ 8     │ 12    │ 16      │ 18        │ 20      │ 22     │ 24      │
//! └───────┴───────┴───────┴───────┴─────────┴───────────┴─────────┴────────┴─────────┘
//! ```

use crate::cloud::PointCloud;
use edgefirst_schemas::sensor_msgs::PointField;

/// Bytes per packed point.
pub const POINT_STEP: usize = 28;

/// Point field data types for PointCloud2 messages.
///
/// These values correspond to the ROS sensor_msgs/PointField datatype field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(dead_code)]
pub enum PointFieldType {
    INT8 = 1,
    UINT8 = 2,
    INT16 = 3,
    UINT16 = 4,
    INT32 = 5,
    UINT32 = 6,
    FLOAT32 = 7,
    FLOAT64 = 8,
}

fn field(name: &str, offset: u32, datatype: PointFieldType) -> PointField {
    PointField {
        name: String::from(name),
        offset,
        datatype: datatype as u8,
        count: 1,
    }
}

/// Field descriptions of the 28-byte point layout.
pub fn cloud_fields() -> Vec<PointField> {
    vec![
        field("x", 0, PointFieldType::FLOAT32),
        field("y", 4, PointFieldType::FLOAT32),
        field("z", 8, PointFieldType::FLOAT32),
        field("t", 12, PointFieldType::UINT32),
        field("reflectivity", 16, PointFieldType::UINT16),
        field("intensity", 18, PointFieldType::UINT16),
        field("ambient", 20, PointFieldType::UINT16),
        field("ring", 22, PointFieldType::UINT16),
        field("range", 24, PointFieldType::UINT32),
    ]
}

/// Pack a cloud into a newly allocated buffer.
pub fn format_cloud(cloud: &PointCloud) -> Vec<u8> {
    let mut data = Vec::with_capacity(POINT_STEP * cloud.len());
    format_cloud_into(cloud, &mut data);
    data
}

/// Pack a cloud into `out`, resizing it to `POINT_STEP * cloud.len()`.
///
/// Reusing `out` across frames avoids an allocation per frame.
#[inline(never)]
pub fn format_cloud_into(cloud: &PointCloud, out: &mut Vec<u8>) {
    out.resize(POINT_STEP * cloud.len(), 0);

    let (x, y, z) = (cloud.x(), cloud.y(), cloud.z());
    let (t, range) = (cloud.t(), cloud.range());
    let (reflectivity, intensity) = (cloud.reflectivity(), cloud.intensity());
    let (ambient, ring) = (cloud.ambient(), cloud.ring());

    for (index, point) in out.chunks_exact_mut(POINT_STEP).enumerate() {
        point[0..4].copy_from_slice(&x[index].to_le_bytes());
        point[4..8].copy_from_slice(&y[index].to_le_bytes());
        point[8..12].copy_from_slice(&z[index].to_le_bytes());
        point[12..16].copy_from_slice(&t[index].to_le_bytes());
        point[16..18].copy_from_slice(&reflectivity[index].to_le_bytes());
        point[18..20].copy_from_slice(&intensity[index].to_le_bytes());
        point[20..22].copy_from_slice(&ambient[index].to_le_bytes());
        point[22..24].copy_from_slice(&ring[index].to_le_bytes());
        point[24..28].copy_from_slice(&range[index].to_le_bytes());
    }
}
