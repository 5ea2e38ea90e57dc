// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Scan buffer and revolution batching.
//!
//! The [`ScanBatcher`] owns exactly one [`LidarScan`] and overwrites it in
//! place across revolutions. When a column of the next revolution arrives,
//! [`ScanBatcher::batch`] returns `Ok(true)` and the completed revolution
//! stays readable through [`ScanBatcher::scan`] until the next call.
//!
//! ```text
//!            batch(pkt) == false                  batch(pkt) == true
//!   ┌───────────────────────────────┐   ┌────────────────────────────────┐
//!   │ columns written at m_id        │   │ m_id <= last m_id, or new       │
//!   │ (accumulating)                 │──►│ frame id: scan is complete,     │
//!   └───────────────────────────────┘   │ rest of the packet is carried   │
//!                ▲                       └────────────────────────────────┘
//!                │  next batch(): reset scan, replay carried columns     │
//!                └───────────────────────────────────────────────────────┘
//! ```
//!
//! The carried columns live in a packet-sized slot allocated once, so the
//! steady state performs no allocation.

use crate::{
    format::{Channel, LidarPacket, PacketFormat},
    lidar::Error,
    ouster::{SensorMetadata, SensorStatus},
};
use ndarray::Array2;
use tracing::{debug, trace};

/// Per-column metadata recorded alongside the pixel data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColumnHeader {
    /// Column timestamp in nanoseconds, zero when the column never arrived.
    pub timestamp: u64,
    pub measurement_id: u16,
    pub frame_id: u16,
    /// Set when the column was written during the current revolution.
    pub valid: bool,
}

/// One revolution of W columns by H pixels.
///
/// Channel images are `(H, W)` arrays holding the raw staggered data, the
/// same arrangement the sensor measures in.
#[derive(Clone, Debug, PartialEq)]
pub struct LidarScan {
    width: usize,
    height: usize,
    frame_id: Option<u16>,
    channels: [Array2<u32>; 4],
    headers: Vec<ColumnHeader>,
}

impl LidarScan {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            frame_id: None,
            channels: [
                Array2::zeros((height, width)),
                Array2::zeros((height, width)),
                Array2::zeros((height, width)),
                Array2::zeros((height, width)),
            ],
            headers: vec![ColumnHeader::default(); width],
        }
    }

    /// Columns per revolution (W).
    pub fn width(&self) -> usize {
        self.width
    }

    /// Pixels per column (H).
    pub fn height(&self) -> usize {
        self.height
    }

    /// Frame id of the revolution held in the buffer.
    pub fn frame_id(&self) -> Option<u16> {
        self.frame_id
    }

    /// `(H, W)` image of one channel.
    pub fn channel(&self, channel: Channel) -> &Array2<u32> {
        &self.channels[Self::slot(channel)]
    }

    /// Range image in millimetres.
    pub fn range(&self) -> &Array2<u32> {
        self.channel(Channel::Range)
    }

    pub fn headers(&self) -> &[ColumnHeader] {
        &self.headers
    }

    pub fn header(&self, col: usize) -> &ColumnHeader {
        &self.headers[col]
    }

    /// Number of columns written during this revolution.
    pub fn populated_columns(&self) -> usize {
        self.headers.iter().filter(|h| h.valid).count()
    }

    /// Whether every column of the revolution was received.
    pub fn is_complete(&self) -> bool {
        self.populated_columns() == self.width
    }

    /// Timestamp of the first column with a nonzero timestamp.
    ///
    /// Columns that never received a packet keep a zero timestamp, so this
    /// is the earliest usable capture time of the scan.
    pub fn first_valid_timestamp(&self) -> Option<u64> {
        self.headers
            .iter()
            .map(|h| h.timestamp)
            .find(|&ts| ts != 0)
    }

    /// Shift each row by its pixel offset so columns line up in azimuth.
    ///
    /// `shifts` is the `pixel_shift_by_row` list from the sensor metadata.
    pub fn destagger(&self, channel: Channel, shifts: &[i16]) -> Array2<u32> {
        let src = self.channel(channel);
        let mut out = Array2::zeros((self.height, self.width));
        let w = self.width as i64;

        for (row, shift) in shifts.iter().enumerate().take(self.height) {
            let shift = (*shift as i64).rem_euclid(w) as usize;
            for col in 0..self.width {
                out[[row, (col + shift) % self.width]] = src[[row, col]];
            }
        }

        out
    }

    /// Zero every pixel and column header for the next revolution.
    pub fn reset(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.fill(0);
        }
        self.headers.fill(ColumnHeader::default());
        self.frame_id = None;
    }

    fn slot(channel: Channel) -> usize {
        match channel {
            Channel::Range => 0,
            Channel::Reflectivity => 1,
            Channel::Signal => 2,
            Channel::NearIr => 3,
        }
    }

    fn write_column(&mut self, packet: &LidarPacket<'_>, col: usize, m_id: usize) {
        for channel in Channel::ALL {
            let image = &mut self.channels[Self::slot(channel)];
            for row in 0..self.height {
                image[[row, m_id]] = packet.pixel_value(col, row, channel);
            }
        }

        self.headers[m_id] = ColumnHeader {
            timestamp: packet.timestamp_of_column(col),
            measurement_id: m_id as u16,
            frame_id: packet.frame_id_of_column(col),
            valid: true,
        };
    }
}

/// Revolution state tracked between columns.
#[derive(Clone, Copy, Debug, Default)]
struct Cursor {
    last_measurement_id: Option<u16>,
    dropped_columns: u64,
}

impl Cursor {
    /// Write columns `start..` of `packet` into `scan`.
    ///
    /// Returns the index of the first column belonging to the next
    /// revolution, leaving it and everything after it unwritten.
    fn apply(
        &mut self,
        scan: &mut LidarScan,
        packet: &LidarPacket<'_>,
        start: usize,
    ) -> Option<usize> {
        for col in start..packet.column_count() {
            let m_id = packet.measurement_id_of_column(col);
            let f_id = packet.frame_id_of_column(col);

            if !packet.column_is_valid(col) || m_id as usize >= scan.width {
                trace!("dropping column m_id={} f_id={}", m_id, f_id);
                self.dropped_columns += 1;
                continue;
            }

            match (self.last_measurement_id, scan.frame_id) {
                (Some(last), Some(frame_id)) => {
                    if f_id == frame_id.wrapping_sub(1) {
                        trace!("dropping reordered column m_id={} f_id={}", m_id, f_id);
                        self.dropped_columns += 1;
                        continue;
                    }
                    if m_id <= last || f_id != frame_id {
                        return Some(col);
                    }
                }
                _ => scan.frame_id = Some(f_id),
            }

            scan.write_column(packet, col, m_id as usize);
            self.last_measurement_id = Some(m_id);
        }

        None
    }
}

/// Accumulates lidar packets into revolutions.
///
/// Packets must be fed in arrival order from a single owner; the batcher is
/// a plain `&mut self` state machine with no internal synchronization.
#[derive(Debug)]
pub struct ScanBatcher {
    format: PacketFormat,
    scan: LidarScan,
    cursor: Cursor,
    carry: Vec<u8>,
    carry_from: Option<usize>,
    status: Option<SensorStatus>,
}

impl ScanBatcher {
    pub fn new(format: PacketFormat) -> Self {
        let scan = LidarScan::new(format.columns_per_frame, format.pixels_per_column);
        let carry = vec![0u8; format.lidar_packet_size()];

        Self {
            format,
            scan,
            cursor: Cursor::default(),
            carry,
            carry_from: None,
            status: None,
        }
    }

    pub fn from_metadata(metadata: &SensorMetadata) -> Result<Self, Error> {
        Ok(Self::new(PacketFormat::from_metadata(metadata)?))
    }

    pub fn format(&self) -> &PacketFormat {
        &self.format
    }

    /// Read-only view of the scan buffer.
    ///
    /// Immediately after [`Self::batch`] returns `Ok(true)` this is the
    /// completed revolution.
    pub fn scan(&self) -> &LidarScan {
        &self.scan
    }

    /// Sensor status from the header of the last accepted packet, `None`
    /// for the legacy profile.
    pub fn status(&self) -> Option<&SensorStatus> {
        self.status.as_ref()
    }

    /// Columns dropped so far for invalid status, out-of-range measurement
    /// id or late arrival.
    pub fn dropped_columns(&self) -> u64 {
        self.cursor.dropped_columns
    }

    /// Feed one lidar packet.
    ///
    /// Returns `Ok(true)` when the packet carried the first column of the
    /// next revolution: the scan buffer then holds the completed revolution
    /// and must be read before the next call. A packet of the wrong size is
    /// rejected with [`Error::PacketSize`] and leaves the batcher untouched.
    pub fn batch(&mut self, buf: &[u8]) -> Result<bool, Error> {
        let Self {
            format,
            scan,
            cursor,
            carry,
            carry_from,
            status,
        } = self;

        let packet = format.lidar_packet(buf)?;
        if let Some(header) = packet.header() {
            *status = Some(header.status());
        }

        if let Some(from) = carry_from.take() {
            scan.reset();
            cursor.last_measurement_id = None;
            // Size was checked when the carry was stored.
            let carried = format.lidar_packet(carry)?;
            if let Some(col) = cursor.apply(scan, &carried, from) {
                debug!(
                    "discarding {} carried columns that wrap again",
                    carried.column_count() - col
                );
            }
        }

        match cursor.apply(scan, &packet, 0) {
            Some(col) => {
                carry.copy_from_slice(buf);
                *carry_from = Some(col);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
