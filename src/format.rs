// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet format descriptor for Ouster lidar and IMU packets.
//!
//! A [`PacketFormat`] is derived once from [`SensorMetadata`] and describes
//! the fixed binary layout of a packet for the configured UDP profile. All
//! decoding goes through borrowed, size-checked views ([`LidarPacket`],
//! [`ImuPacket`]) so individual accessors never see a short buffer.
//!
//! # Lidar packet layouts
//!
//! ```text
//! LEGACY
//! ┌──────────────────────────────────────────────┐ × columns_per_packet
//! │ ts:u64 │ m_id:u16 │ f_id:u16 │ encoder:u32    │ 16B column header
//! │ H × [ range:u32(20b) │ rfl:u16 │ sig:u16 │ nir:u16 │ pad:u16 ] │
//! │ status:u32 (0xffffffff = valid)               │ 4B column footer
//! └──────────────────────────────────────────────┘
//!
//! RNG19_RFL8_SIG16_NIR16 / RNG15_RFL8_NIR8
//! ┌─────────────────────┐
//! │ packet header 32B   │ (packet type, frame id, init id, serial, status)
//! ├─────────────────────┤ × columns_per_packet
//! │ ts:u64 │ m_id:u16 │ status:u16 │ H × pixel (12B / 4B) │
//! ├─────────────────────┤
//! │ packet footer 32B   │
//! └─────────────────────┘
//! ```
//!
//! All fields are little-endian.

use crate::{
    lidar::Error,
    ouster::{PacketHeader, SensorMetadata},
};
use std::{fmt, str::FromStr};

/// Per-pixel measurement channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Range in millimetres.
    Range,
    /// Calibrated reflectivity.
    Reflectivity,
    /// Signal photons, published as intensity.
    Signal,
    /// Near-infrared (ambient) photons.
    NearIr,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Range,
        Channel::Reflectivity,
        Channel::Signal,
        Channel::NearIr,
    ];

    fn index(self) -> usize {
        match self {
            Channel::Range => 0,
            Channel::Reflectivity => 1,
            Channel::Signal => 2,
            Channel::NearIr => 3,
        }
    }
}

/// UDP lidar data profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UdpProfile {
    #[default]
    Legacy,
    /// `RNG19_RFL8_SIG16_NIR16`
    SingleReturn,
    /// `RNG15_RFL8_NIR8`
    LowData,
}

impl FromStr for UdpProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEGACY" => Ok(UdpProfile::Legacy),
            "RNG19_RFL8_SIG16_NIR16" => Ok(UdpProfile::SingleReturn),
            "RNG15_RFL8_NIR8" => Ok(UdpProfile::LowData),
            other => Err(Error::UnsupportedProfile(other.to_string())),
        }
    }
}

impl fmt::Display for UdpProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UdpProfile::Legacy => write!(f, "LEGACY"),
            UdpProfile::SingleReturn => write!(f, "RNG19_RFL8_SIG16_NIR16"),
            UdpProfile::LowData => write!(f, "RNG15_RFL8_NIR8"),
        }
    }
}

/// Location of one channel inside a pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FieldLayout {
    offset: usize,
    bytes: usize,
    mask: u32,
    shift: u32,
}

impl FieldLayout {
    const fn new(offset: usize, bytes: usize, mask: u32, shift: u32) -> Self {
        Self {
            offset,
            bytes,
            mask,
            shift,
        }
    }

    #[inline]
    fn read(&self, pixel: &[u8]) -> u32 {
        let b = &pixel[self.offset..self.offset + self.bytes];
        let raw = match self.bytes {
            1 => b[0] as u32,
            2 => u16::from_le_bytes([b[0], b[1]]) as u32,
            _ => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        };
        (raw & self.mask) << self.shift
    }
}

/// Fixed offsets of the legacy IMU packet.
mod imu {
    pub const PACKET_SIZE: usize = 48;
    pub const SYS_TS: usize = 0;
    pub const ACCEL_TS: usize = 8;
    pub const GYRO_TS: usize = 16;
    pub const ACCEL: usize = 24;
    pub const GYRO: usize = 36;
}

/// Binary layout of lidar and IMU packets for one sensor configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketFormat {
    pub profile: UdpProfile,
    pub pixels_per_column: usize,
    pub columns_per_packet: usize,
    pub columns_per_frame: usize,
    packet_header_size: usize,
    packet_footer_size: usize,
    column_header_size: usize,
    column_footer_size: usize,
    pixel_size: usize,
    fields: [Option<FieldLayout>; 4],
}

impl PacketFormat {
    pub fn new(
        profile: UdpProfile,
        pixels_per_column: usize,
        columns_per_packet: usize,
        columns_per_frame: usize,
    ) -> Self {
        let (packet_header_size, packet_footer_size, column_header_size, column_footer_size) =
            match profile {
                UdpProfile::Legacy => (0, 0, 16, 4),
                UdpProfile::SingleReturn | UdpProfile::LowData => (PacketHeader::LEN, 32, 12, 0),
            };

        let (pixel_size, fields) = match profile {
            UdpProfile::Legacy => (
                12,
                [
                    Some(FieldLayout::new(0, 4, 0x000f_ffff, 0)),
                    Some(FieldLayout::new(4, 2, 0xffff, 0)),
                    Some(FieldLayout::new(6, 2, 0xffff, 0)),
                    Some(FieldLayout::new(8, 2, 0xffff, 0)),
                ],
            ),
            UdpProfile::SingleReturn => (
                12,
                [
                    Some(FieldLayout::new(0, 4, 0x0007_ffff, 0)),
                    Some(FieldLayout::new(4, 1, 0xff, 0)),
                    Some(FieldLayout::new(6, 2, 0xffff, 0)),
                    Some(FieldLayout::new(8, 2, 0xffff, 0)),
                ],
            ),
            // Range is reported in 8mm units.
            UdpProfile::LowData => (
                4,
                [
                    Some(FieldLayout::new(0, 2, 0x7fff, 3)),
                    Some(FieldLayout::new(2, 1, 0xff, 0)),
                    None,
                    Some(FieldLayout::new(3, 1, 0xff, 0)),
                ],
            ),
        };

        Self {
            profile,
            pixels_per_column,
            columns_per_packet,
            columns_per_frame,
            packet_header_size,
            packet_footer_size,
            column_header_size,
            column_footer_size,
            pixel_size,
            fields,
        }
    }

    pub fn from_metadata(metadata: &SensorMetadata) -> Result<Self, Error> {
        let format = &metadata.lidar_data_format;
        let profile = format.udp_profile_lidar.parse()?;
        if format.udp_profile_imu != "LEGACY" {
            return Err(Error::UnsupportedProfile(format.udp_profile_imu.clone()));
        }

        Ok(Self::new(
            profile,
            format.pixels_per_column,
            format.columns_per_packet,
            format.columns_per_frame,
        ))
    }

    /// Size in bytes of one column including its header and footer.
    pub fn column_size(&self) -> usize {
        self.column_header_size
            + self.pixels_per_column * self.pixel_size
            + self.column_footer_size
    }

    /// Expected size in bytes of a lidar packet.
    pub fn lidar_packet_size(&self) -> usize {
        self.packet_header_size
            + self.columns_per_packet * self.column_size()
            + self.packet_footer_size
    }

    /// Expected size in bytes of an IMU packet.
    pub fn imu_packet_size(&self) -> usize {
        imu::PACKET_SIZE
    }

    /// Whether `channel` is carried by this profile.
    pub fn has_channel(&self, channel: Channel) -> bool {
        self.fields[channel.index()].is_some()
    }

    /// Validate a lidar packet buffer and return a decoding view over it.
    pub fn lidar_packet<'a>(&'a self, buf: &'a [u8]) -> Result<LidarPacket<'a>, Error> {
        let expected = self.lidar_packet_size();
        if buf.len() != expected {
            return Err(Error::PacketSize {
                expected,
                actual: buf.len(),
            });
        }

        let header = match self.profile {
            UdpProfile::Legacy => None,
            _ => Some(PacketHeader::parse(buf)?),
        };

        Ok(LidarPacket {
            format: self,
            buf,
            header,
        })
    }

    /// Validate an IMU packet buffer and return a decoding view over it.
    pub fn imu_packet<'a>(&self, buf: &'a [u8]) -> Result<ImuPacket<'a>, Error> {
        if buf.len() != imu::PACKET_SIZE {
            return Err(Error::PacketSize {
                expected: imu::PACKET_SIZE,
                actual: buf.len(),
            });
        }
        Ok(ImuPacket { buf })
    }
}

/// Size-checked view over one lidar packet.
#[derive(Clone, Copy, Debug)]
pub struct LidarPacket<'a> {
    format: &'a PacketFormat,
    buf: &'a [u8],
    header: Option<PacketHeader<'a>>,
}

impl<'a> LidarPacket<'a> {
    /// Number of columns carried by the packet.
    pub fn column_count(&self) -> usize {
        self.format.columns_per_packet
    }

    /// Packet header for non-legacy profiles.
    pub fn header(&self) -> Option<&PacketHeader<'a>> {
        self.header.as_ref()
    }

    #[inline]
    fn column(&self, col: usize) -> &'a [u8] {
        let size = self.format.column_size();
        let start = self.format.packet_header_size + col * size;
        &self.buf[start..start + size]
    }

    /// Column timestamp in nanoseconds since the sensor epoch.
    ///
    /// # Panics
    ///
    /// Panics if `col >= column_count()`.
    #[inline]
    pub fn timestamp_of_column(&self, col: usize) -> u64 {
        let c = self.column(col);
        u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
    }

    /// Measurement id, the column index within the revolution.
    #[inline]
    pub fn measurement_id_of_column(&self, col: usize) -> u16 {
        let c = self.column(col);
        u16::from_le_bytes([c[8], c[9]])
    }

    /// Frame id of the revolution this column belongs to.
    #[inline]
    pub fn frame_id_of_column(&self, col: usize) -> u16 {
        match &self.header {
            Some(header) => header.frame_id(),
            None => {
                let c = self.column(col);
                u16::from_le_bytes([c[10], c[11]])
            }
        }
    }

    /// Whether the sensor flagged this column as carrying valid data.
    #[inline]
    pub fn column_is_valid(&self, col: usize) -> bool {
        let c = self.column(col);
        match self.format.profile {
            UdpProfile::Legacy => {
                let s = self.format.column_header_size
                    + self.format.pixels_per_column * self.format.pixel_size;
                u32::from_le_bytes([c[s], c[s + 1], c[s + 2], c[s + 3]]) == 0xffff_ffff
            }
            _ => u16::from_le_bytes([c[10], c[11]]) & 0x01 != 0,
        }
    }

    /// Raw value of `channel` for pixel `row` of column `col`.
    ///
    /// Channels the profile does not carry read as zero. Range is always
    /// returned in millimetres.
    #[inline]
    pub fn pixel_value(&self, col: usize, row: usize, channel: Channel) -> u32 {
        match self.format.fields[channel.index()] {
            Some(field) => {
                let start = self.format.column_header_size + row * self.format.pixel_size;
                let column = self.column(col);
                field.read(&column[start..start + self.format.pixel_size])
            }
            None => 0,
        }
    }
}

/// Size-checked view over one IMU packet.
#[derive(Clone, Copy, Debug)]
pub struct ImuPacket<'a> {
    buf: &'a [u8],
}

impl ImuPacket<'_> {
    #[inline]
    fn u64_at(&self, offset: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buf[offset..offset + 8]);
        u64::from_le_bytes(b)
    }

    #[inline]
    fn f32_at(&self, offset: usize) -> f32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buf[offset..offset + 4]);
        f32::from_le_bytes(b)
    }

    /// Time the IMU packet was assembled, nanoseconds.
    pub fn sys_timestamp(&self) -> u64 {
        self.u64_at(imu::SYS_TS)
    }

    /// Accelerometer read time, nanoseconds.
    pub fn accel_timestamp(&self) -> u64 {
        self.u64_at(imu::ACCEL_TS)
    }

    /// Gyroscope read time, nanoseconds.
    pub fn gyro_timestamp(&self) -> u64 {
        self.u64_at(imu::GYRO_TS)
    }

    /// Linear acceleration in g.
    pub fn acceleration(&self) -> [f32; 3] {
        [
            self.f32_at(imu::ACCEL),
            self.f32_at(imu::ACCEL + 4),
            self.f32_at(imu::ACCEL + 8),
        ]
    }

    /// Angular velocity in degrees per second.
    pub fn angular_velocity(&self) -> [f32; 3] {
        [
            self.f32_at(imu::GYRO),
            self.f32_at(imu::GYRO + 4),
            self.f32_at(imu::GYRO + 8),
        ]
    }
}
