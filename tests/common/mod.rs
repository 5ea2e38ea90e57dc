// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Synthetic packet and metadata builders shared by the integration tests.

#![allow(dead_code)]

use edgefirst_lidarcloud::{PacketFormat, SensorMetadata, UdpProfile, ouster::PacketHeader};
use serde_json::json;

/// Range written for pixel `row` of measurement id `m_id`.
pub fn range_of(m_id: u16, row: usize) -> u32 {
    1000 + m_id as u32 * 4 + row as u32
}

/// Timestamp written for measurement id `m_id`, zero when `base` is zero.
pub fn timestamp_of(base: u64, m_id: u16) -> u64 {
    if base == 0 { 0 } else { base + m_id as u64 * 48_828 }
}

/// Legacy lidar packet carrying the given measurement ids.
pub fn legacy_packet(pf: &PacketFormat, ids: &[u16], frame_id: u16, base_ts: u64) -> Vec<u8> {
    assert_eq!(pf.profile, UdpProfile::Legacy);
    let mut buf = vec![0u8; pf.lidar_packet_size()];
    let size = pf.column_size();

    for (col, &m_id) in ids.iter().enumerate() {
        let c = &mut buf[col * size..(col + 1) * size];
        c[0..8].copy_from_slice(&timestamp_of(base_ts, m_id).to_le_bytes());
        c[8..10].copy_from_slice(&m_id.to_le_bytes());
        c[10..12].copy_from_slice(&frame_id.to_le_bytes());
        for row in 0..pf.pixels_per_column {
            let px = 16 + row * 12;
            c[px..px + 4].copy_from_slice(&range_of(m_id, row).to_le_bytes());
            c[px + 4..px + 6].copy_from_slice(&(row as u16 + 1).to_le_bytes());
            c[px + 6..px + 8].copy_from_slice(&(m_id % 512).to_le_bytes());
            c[px + 8..px + 10].copy_from_slice(&(m_id / 2).to_le_bytes());
        }
        c[size - 4..].copy_from_slice(&[0xff; 4]);
    }

    buf
}

/// RNG19_RFL8_SIG16_NIR16 lidar packet carrying the given measurement ids.
pub fn single_return_packet(
    pf: &PacketFormat,
    ids: &[u16],
    frame_id: u16,
    base_ts: u64,
) -> Vec<u8> {
    assert_eq!(pf.profile, UdpProfile::SingleReturn);
    let mut buf = vec![0u8; pf.lidar_packet_size()];
    buf[0..2].copy_from_slice(&PacketHeader::LIDAR_PACKET_TYPE.to_le_bytes());
    buf[2..4].copy_from_slice(&frame_id.to_le_bytes());

    let size = pf.column_size();
    for (col, &m_id) in ids.iter().enumerate() {
        let start = PacketHeader::LEN + col * size;
        let c = &mut buf[start..start + size];
        c[0..8].copy_from_slice(&timestamp_of(base_ts, m_id).to_le_bytes());
        c[8..10].copy_from_slice(&m_id.to_le_bytes());
        c[10..12].copy_from_slice(&1u16.to_le_bytes());
        for row in 0..pf.pixels_per_column {
            let px = 12 + row * 12;
            c[px..px + 4].copy_from_slice(&range_of(m_id, row).to_le_bytes());
            c[px + 4] = row as u8 + 1;
            c[px + 6..px + 8].copy_from_slice(&(m_id % 512).to_le_bytes());
            c[px + 8..px + 10].copy_from_slice(&(m_id / 2).to_le_bytes());
        }
    }

    buf
}

/// RNG15_RFL8_NIR8 lidar packet carrying the given measurement ids.
///
/// Ranges are written in 8 mm units, truncating [`range_of`].
pub fn low_data_packet(pf: &PacketFormat, ids: &[u16], frame_id: u16, base_ts: u64) -> Vec<u8> {
    assert_eq!(pf.profile, UdpProfile::LowData);
    let mut buf = vec![0u8; pf.lidar_packet_size()];
    buf[0..2].copy_from_slice(&PacketHeader::LIDAR_PACKET_TYPE.to_le_bytes());
    buf[2..4].copy_from_slice(&frame_id.to_le_bytes());

    let size = pf.column_size();
    for (col, &m_id) in ids.iter().enumerate() {
        let start = PacketHeader::LEN + col * size;
        let c = &mut buf[start..start + size];
        c[0..8].copy_from_slice(&timestamp_of(base_ts, m_id).to_le_bytes());
        c[8..10].copy_from_slice(&m_id.to_le_bytes());
        c[10..12].copy_from_slice(&1u16.to_le_bytes());
        for row in 0..pf.pixels_per_column {
            let px = 12 + row * 4;
            let range = (range_of(m_id, row) >> 3) as u16;
            c[px..px + 2].copy_from_slice(&range.to_le_bytes());
            c[px + 2] = row as u8 + 1;
            c[px + 3] = (m_id % 256) as u8;
        }
    }

    buf
}

/// One revolution of packets with consecutive ids starting at zero.
pub fn revolution(pf: &PacketFormat, frame_id: u16, base_ts: u64) -> Vec<Vec<u8>> {
    let cpp = pf.columns_per_packet;
    (0..pf.columns_per_frame / cpp)
        .map(|p| {
            let ids: Vec<u16> = (p * cpp..(p + 1) * cpp).map(|id| id as u16).collect();
            match pf.profile {
                UdpProfile::Legacy => legacy_packet(pf, &ids, frame_id, base_ts),
                UdpProfile::SingleReturn => single_return_packet(pf, &ids, frame_id, base_ts),
                UdpProfile::LowData => low_data_packet(pf, &ids, frame_id, base_ts),
            }
        })
        .collect()
}

/// 48 byte IMU packet.
pub fn imu_packet(gyro_ts: u64, accel: [f32; 3], gyro: [f32; 3]) -> Vec<u8> {
    let mut buf = vec![0u8; 48];
    buf[0..8].copy_from_slice(&gyro_ts.to_le_bytes());
    buf[8..16].copy_from_slice(&gyro_ts.to_le_bytes());
    buf[16..24].copy_from_slice(&gyro_ts.to_le_bytes());
    for (i, v) in accel.iter().chain(gyro.iter()).enumerate() {
        buf[24 + i * 4..28 + i * 4].copy_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Metadata of an `h` beam sensor in `cols`x10 mode.
pub fn metadata(profile: &str, h: usize, cols: usize, cpp: usize) -> SensorMetadata {
    let altitude: Vec<f64> = (0..h).map(|i| 16.0 - 32.0 * i as f64 / h as f64).collect();
    let azimuth: Vec<f64> = (0..h).map(|i| [4.2, 1.4, -1.4, -4.2][i % 4]).collect();
    let shifts: Vec<i16> = (0..h).map(|i| [12, 4, -4, -12][i % 4]).collect();

    let doc = json!({
        "sensor_info": {
            "status": "RUNNING",
            "prod_sn": "992109000123",
            "prod_line": "OS-1-64",
            "build_rev": "v2.5.2"
        },
        "config_params": {
            "lidar_mode": format!("{}x10", cols),
            "udp_port_lidar": 7502,
            "udp_port_imu": 7503,
            "timestamp_mode": "TIME_FROM_PTP_1588"
        },
        "lidar_data_format": {
            "udp_profile_lidar": profile,
            "udp_profile_imu": "LEGACY",
            "columns_per_packet": cpp,
            "columns_per_frame": cols,
            "pixels_per_column": h,
            "column_window": [0, cols - 1],
            "pixel_shift_by_row": shifts
        },
        "beam_intrinsics": {
            "beam_altitude_angles": altitude,
            "beam_azimuth_angles": azimuth,
            "lidar_origin_to_beam_origin_mm": 15.806
        },
        "imu_intrinsics": {
            "imu_to_sensor_transform": [1, 0, 0, 6.253, 0, 1, 0, -11.775, 0, 0, 1, 7.645, 0, 0, 0, 1]
        },
        "lidar_intrinsics": {
            "lidar_to_sensor_transform": [-1, 0, 0, 0, 0, -1, 0, 0, 0, 0, 1, 36.18, 0, 0, 0, 1]
        }
    });

    match SensorMetadata::from_json(&doc.to_string()) {
        Ok(metadata) => metadata,
        Err(e) => panic!("invalid test metadata: {}", e),
    }
}
