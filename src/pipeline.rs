// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet to sink processing.
//!
//! [`CloudProcessor`] owns the batcher, lookup table and reusable cloud
//! buffer and drives them for every lidar packet. It must be fed from a
//! single task in arrival order. [`ImuProcessor`] is stateless apart from
//! its counters. They hand their results to a [`CloudSink`] and an
//! [`ImuSink`] respectively, which a single [`Sink`] may implement together.

use crate::{
    cloud::{PointCloud, scan_to_cloud},
    diagnostics::FrameObserver,
    format::PacketFormat,
    imu::{ImuReading, decode_imu},
    lidar::{Error, wall_clock},
    lut::XyzLut,
    ouster::{SensorMetadata, SensorStatus},
    scan::ScanBatcher,
};
use nalgebra::Isometry3;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

/// Frame of the sensor housing, the frame clouds are expressed in.
pub const SENSOR_FRAME: &str = "os_sensor";
pub const LIDAR_FRAME: &str = "os_lidar";
pub const IMU_FRAME: &str = "os_imu";

/// Consumer of completed clouds and the sensor's static transforms.
///
/// Implementations borrow the cloud only for the duration of the call, the
/// buffer is overwritten by the next revolution.
pub trait CloudSink {
    fn publish_cloud(&mut self, cloud: &PointCloud) -> Result<(), Error>;

    /// Publish a static transform from `parent` to `child`.
    fn publish_transform(
        &mut self,
        parent: &str,
        child: &str,
        transform: &Isometry3<f64>,
    ) -> Result<(), Error>;
}

pub trait ImuSink {
    fn publish_imu(&mut self, imu: &ImuReading) -> Result<(), Error>;
}

/// Consumer of every kind of processed data.
pub trait Sink: CloudSink + ImuSink {}

impl<T: CloudSink + ImuSink + ?Sized> Sink for T {}

/// What to do with a revolution missing some of its columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartialScanPolicy {
    /// Emit it, missing columns hold zero range.
    #[default]
    Emit,
    /// Drop it when fewer columns than the configured column window
    /// arrived.
    Drop,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorConfig {
    pub partial_scan: PartialScanPolicy,
    /// Warn when a cloud is older than host time minus this duration.
    /// `None` disables the check.
    pub max_clock_skew: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            partial_scan: PartialScanPolicy::Emit,
            max_clock_skew: Some(Duration::from_secs(5)),
        }
    }
}

/// Result of handling one lidar packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Packet batched, revolution still in progress.
    Pending,
    /// Revolution completed and handed to the sink.
    Emitted,
    /// Revolution completed without any timestamped column.
    DroppedInvalid,
    /// Revolution incomplete and the policy drops partial scans.
    DroppedPartial,
    /// Revolution completed but the sink failed.
    PublishFailed,
    /// Packet rejected, batcher state unchanged.
    Malformed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub packets: u64,
    pub malformed: u64,
    pub scans: u64,
    pub emitted: u64,
    pub invalid: u64,
    pub partial: u64,
}

pub struct CloudProcessor {
    batcher: ScanBatcher,
    lut: XyzLut,
    cloud: PointCloud,
    config: ProcessorConfig,
    observers: Vec<Box<dyn FrameObserver>>,
    stats: ProcessorStats,
    status: SensorStatus,
    expected_columns: usize,
    skewed: bool,
}

impl CloudProcessor {
    pub fn new(metadata: &SensorMetadata, config: ProcessorConfig) -> Result<Self, Error> {
        let format = PacketFormat::from_metadata(metadata)?;
        let lut = XyzLut::new(metadata)?;
        let mut processor = Self::from_parts(format, lut, config)?;
        processor.expected_columns = metadata.window_columns();
        Ok(processor)
    }

    /// Assemble a processor from an explicit format and lookup table.
    ///
    /// The column window is taken to span the whole revolution.
    pub fn from_parts(
        format: PacketFormat,
        lut: XyzLut,
        config: ProcessorConfig,
    ) -> Result<Self, Error> {
        if lut.cols() != format.columns_per_frame || lut.rows() != format.pixels_per_column {
            return Err(Error::Metadata(format!(
                "lookup table is {}x{} but packets carry {}x{} scans",
                lut.cols(),
                lut.rows(),
                format.columns_per_frame,
                format.pixels_per_column
            )));
        }

        let cloud = PointCloud::new(format.columns_per_frame, format.pixels_per_column);
        let expected_columns = format.columns_per_frame;
        Ok(Self {
            batcher: ScanBatcher::new(format),
            lut,
            cloud,
            config,
            observers: Vec::new(),
            stats: ProcessorStats::default(),
            status: SensorStatus::default(),
            expected_columns,
            skewed: false,
        })
    }

    pub fn add_observer(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.push(observer);
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    pub fn batcher(&self) -> &ScanBatcher {
        &self.batcher
    }

    /// Last sensor status seen in a packet header.
    pub fn status(&self) -> &SensorStatus {
        &self.status
    }

    /// The most recently converted cloud.
    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    /// Let observers refresh time-based state while the stream is silent.
    pub fn idle(&mut self) {
        for observer in self.observers.iter_mut() {
            observer.on_idle();
        }
    }

    /// Batch one lidar packet, converting and publishing the revolution it
    /// completes.
    pub fn handle_lidar_packet(&mut self, buf: &[u8], sink: &mut dyn CloudSink) -> ScanOutcome {
        self.stats.packets += 1;

        match self.batcher.batch(buf) {
            Ok(false) => {
                self.check_status();
                ScanOutcome::Pending
            }
            Ok(true) => {
                self.check_status();
                self.stats.scans += 1;
                self.emit(sink)
            }
            Err(err) => {
                self.stats.malformed += 1;
                debug!("dropping lidar packet: {}", err);
                ScanOutcome::Malformed
            }
        }
    }

    #[instrument(skip_all)]
    fn emit(&mut self, sink: &mut dyn CloudSink) -> ScanOutcome {
        let scan = self.batcher.scan();

        if !scan.is_complete() {
            let populated = scan.populated_columns();
            trace!(
                "scan frame_id={:?} has {} of {} columns",
                scan.frame_id(),
                populated,
                scan.width()
            );
            if self.config.partial_scan == PartialScanPolicy::Drop
                && populated < self.expected_columns
            {
                self.stats.partial += 1;
                return ScanOutcome::DroppedPartial;
            }
        }

        match scan_to_cloud(&self.lut, scan, &mut self.cloud) {
            Ok(()) => {}
            Err(Error::InvalidScan) => {
                self.stats.invalid += 1;
                warn!("dropping scan frame_id={:?}: {}", scan.frame_id(), Error::InvalidScan);
                return ScanOutcome::DroppedInvalid;
            }
            Err(err) => {
                self.stats.invalid += 1;
                error!("scan conversion failed: {}", err);
                return ScanOutcome::DroppedInvalid;
            }
        }

        self.check_clock_skew();

        if let Err(err) = sink.publish_cloud(&self.cloud) {
            error!("cloud publish error: {}", err);
            return ScanOutcome::PublishFailed;
        }
        self.stats.emitted += 1;

        for observer in self.observers.iter_mut() {
            observer.on_cloud(&self.cloud);
        }

        ScanOutcome::Emitted
    }

    fn check_clock_skew(&mut self) {
        let Some(max) = self.config.max_clock_skew else {
            return;
        };
        let now = match wall_clock() {
            Ok(now) => now,
            Err(err) => {
                debug!("clock skew check skipped: {}", err);
                return;
            }
        };

        let stamp = self.cloud.timestamp();
        let skewed = stamp.saturating_add(max.as_nanos() as u64) < now;
        if skewed != self.skewed {
            if skewed {
                warn!(
                    "cloud timestamp is {:.3}s behind host time, check the sensor timestamp mode",
                    (now - stamp) as f64 * 1e-9
                );
            } else {
                info!("cloud timestamps back within {:?} of host time", max);
            }
            self.skewed = skewed;
        }
    }

    /// Log changes to the thermal and shutdown status carried in the
    /// packet header of non-legacy profiles.
    fn check_status(&mut self) {
        let Some(status) = self.batcher.status() else {
            return;
        };

        if status.shot_limiting != self.status.shot_limiting {
            warn!("shot limiting: {}", status.shot_limiting);
            self.status.shot_limiting = status.shot_limiting.clone();
        }

        if status.shutdown_status != self.status.shutdown_status {
            warn!("shutdown status: {}", status.shutdown_status);
            self.status.shutdown_status = status.shutdown_status.clone();
        }
    }
}

/// Publish the lidar and IMU mounting transforms relative to the sensor
/// frame, unmodified from the metadata.
pub fn publish_static_transforms(
    metadata: &SensorMetadata,
    sink: &mut dyn CloudSink,
) -> Result<(), Error> {
    sink.publish_transform(SENSOR_FRAME, LIDAR_FRAME, &metadata.lidar_to_sensor())?;
    sink.publish_transform(SENSOR_FRAME, IMU_FRAME, &metadata.imu_to_sensor())?;
    Ok(())
}

pub struct ImuProcessor {
    format: PacketFormat,
    packets: u64,
    malformed: u64,
}

impl ImuProcessor {
    pub fn new(format: PacketFormat) -> Self {
        Self {
            format,
            packets: 0,
            malformed: 0,
        }
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Decode and publish one IMU packet, returning whether it reached the
    /// sink.
    pub fn handle_imu_packet(&mut self, buf: &[u8], sink: &mut dyn ImuSink) -> bool {
        self.packets += 1;

        let imu = match decode_imu(&self.format, buf) {
            Ok(imu) => imu,
            Err(err) => {
                self.malformed += 1;
                debug!("dropping imu packet: {}", err);
                return false;
            }
        };

        match sink.publish_imu(&imu) {
            Ok(()) => true,
            Err(err) => {
                error!("imu publish error: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::UdpProfile,
        ouster::{IDENTITY_TRANSFORM, ShotLimiting, ShutdownStatus},
    };
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    const W: usize = 16;
    const H: usize = 2;
    const COLS: usize = 4;

    #[derive(Default)]
    struct RecordingSink {
        clouds: Vec<(u64, usize)>,
        imu: Vec<ImuReading>,
        transforms: Vec<(String, String, Isometry3<f64>)>,
        fail: bool,
    }

    impl CloudSink for RecordingSink {
        fn publish_cloud(&mut self, cloud: &PointCloud) -> Result<(), Error> {
            if self.fail {
                return Err(Error::Sink("closed".to_string()));
            }
            self.clouds.push((cloud.timestamp(), cloud.len()));
            Ok(())
        }

        fn publish_transform(
            &mut self,
            parent: &str,
            child: &str,
            transform: &Isometry3<f64>,
        ) -> Result<(), Error> {
            self.transforms
                .push((parent.to_string(), child.to_string(), *transform));
            Ok(())
        }
    }

    impl ImuSink for RecordingSink {
        fn publish_imu(&mut self, imu: &ImuReading) -> Result<(), Error> {
            self.imu.push(imu.clone());
            Ok(())
        }
    }

    struct Counter(Arc<AtomicUsize>);

    impl FrameObserver for Counter {
        fn on_cloud(&mut self, _cloud: &PointCloud) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn format() -> PacketFormat {
        PacketFormat::new(UdpProfile::Legacy, H, COLS, W)
    }

    fn processor(config: ProcessorConfig) -> CloudProcessor {
        let lut =
            XyzLut::from_beams(W, H, 0.0, &IDENTITY_TRANSFORM, &[0.0, 0.0], &[1.0, -1.0])
                .unwrap();
        CloudProcessor::from_parts(format(), lut, config).unwrap()
    }

    fn packet(first: u16, ts: u64) -> Vec<u8> {
        let pf = format();
        let mut buf = vec![0u8; pf.lidar_packet_size()];
        let size = pf.column_size();
        for col in 0..COLS {
            let m_id = first + col as u16;
            let c = &mut buf[col * size..(col + 1) * size];
            let col_ts = if ts == 0 { 0 } else { ts + m_id as u64 };
            c[0..8].copy_from_slice(&col_ts.to_le_bytes());
            c[8..10].copy_from_slice(&m_id.to_le_bytes());
            for row in 0..H {
                c[16 + row * 12..20 + row * 12].copy_from_slice(&1500u32.to_le_bytes());
            }
            c[size - 4..].copy_from_slice(&[0xff; 4]);
        }
        buf
    }

    fn feed(
        p: &mut CloudProcessor,
        sink: &mut RecordingSink,
        firsts: &[u16],
        ts: u64,
    ) -> Vec<ScanOutcome> {
        firsts
            .iter()
            .map(|&f| p.handle_lidar_packet(&packet(f, ts), sink))
            .collect()
    }

    #[test]
    fn test_revolution_emitted_once() {
        let mut p = processor(ProcessorConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        p.add_observer(Box::new(Counter(count.clone())));
        let mut sink = RecordingSink::default();

        let outcomes = feed(&mut p, &mut sink, &[0, 4, 8, 12, 0], 7_000);
        assert_eq!(&outcomes[..4], &[ScanOutcome::Pending; 4]);
        // stale sensor time still emits, only a warning is logged
        assert_eq!(outcomes[4], ScanOutcome::Emitted);
        assert_eq!(sink.clouds, vec![(7_000, W * H)]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(p.stats().emitted, 1);
        assert_eq!(p.stats().packets, 5);
    }

    #[test]
    fn test_zero_timestamps_never_reach_sink() {
        let mut p = processor(ProcessorConfig::default());
        let mut sink = RecordingSink::default();

        let outcomes = feed(&mut p, &mut sink, &[0, 4, 8, 12, 0], 0);
        assert_eq!(outcomes[4], ScanOutcome::DroppedInvalid);
        assert!(sink.clouds.is_empty());
        assert_eq!(p.stats().invalid, 1);
    }

    #[test]
    fn test_partial_scan_policy() {
        let mut sink = RecordingSink::default();
        let mut p = processor(ProcessorConfig::default());
        let outcomes = feed(&mut p, &mut sink, &[0, 4, 0], 100);
        assert_eq!(outcomes[2], ScanOutcome::Emitted);

        let mut p = processor(ProcessorConfig {
            partial_scan: PartialScanPolicy::Drop,
            max_clock_skew: None,
        });
        let outcomes = feed(&mut p, &mut sink, &[0, 4, 0, 4, 8, 12, 0], 100);
        assert_eq!(outcomes[2], ScanOutcome::DroppedPartial);
        assert_eq!(outcomes[6], ScanOutcome::Emitted);
        assert_eq!(p.stats().partial, 1);
        assert_eq!(sink.clouds.len(), 2);
    }

    #[test]
    fn test_malformed_packet_skipped() {
        let mut p = processor(ProcessorConfig::default());
        let mut sink = RecordingSink::default();

        assert_eq!(p.handle_lidar_packet(&packet(0, 10), &mut sink), ScanOutcome::Pending);
        assert_eq!(p.handle_lidar_packet(&[0u8; 33], &mut sink), ScanOutcome::Malformed);
        let outcomes = feed(&mut p, &mut sink, &[4, 8, 12, 0], 10);
        assert_eq!(outcomes[3], ScanOutcome::Emitted);
        assert_eq!(p.stats().malformed, 1);
    }

    #[test]
    fn test_sink_failure_reported() {
        let mut p = processor(ProcessorConfig::default());
        let mut sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let outcomes = feed(&mut p, &mut sink, &[0, 4, 8, 12, 0], 10);
        assert_eq!(outcomes[4], ScanOutcome::PublishFailed);
        assert_eq!(p.stats().emitted, 0);
    }

    #[test]
    fn test_header_status_changes_tracked() {
        let pf = PacketFormat::new(UdpProfile::SingleReturn, H, COLS, W);
        let lut =
            XyzLut::from_beams(W, H, 0.0, &IDENTITY_TRANSFORM, &[0.0, 0.0], &[1.0, -1.0])
                .unwrap();
        let mut p = CloudProcessor::from_parts(pf.clone(), lut, ProcessorConfig::default())
            .unwrap();
        let mut sink = RecordingSink::default();

        let mut pkt = vec![0u8; pf.lidar_packet_size()];
        pkt[0] = 1;
        assert_eq!(p.handle_lidar_packet(&pkt, &mut sink), ScanOutcome::Pending);
        assert_eq!(p.status(), &SensorStatus::default());

        // thermal shot limiting to about 12% range, shutdown in 20 seconds
        pkt[19] = 0x05;
        pkt[18] = 0x01;
        pkt[16] = 20;
        p.handle_lidar_packet(&pkt, &mut sink);
        assert_eq!(p.status().shot_limiting, ShotLimiting::Limiting(12));
        assert_eq!(p.status().shutdown_status, ShutdownStatus::Imminent(20));

        // a malformed packet does not touch the status
        p.handle_lidar_packet(&pkt[..64], &mut sink);
        assert_eq!(p.status().shot_limiting, ShotLimiting::Limiting(12));

        pkt[16..20].copy_from_slice(&[0; 4]);
        p.handle_lidar_packet(&pkt, &mut sink);
        assert_eq!(p.status(), &SensorStatus::default());
    }

    #[derive(Default)]
    struct ImuOnly(Vec<u64>);

    impl ImuSink for ImuOnly {
        fn publish_imu(&mut self, imu: &ImuReading) -> Result<(), Error> {
            self.0.push(imu.timestamp);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TransformsOnly(Vec<String>);

    impl CloudSink for TransformsOnly {
        fn publish_cloud(&mut self, _cloud: &PointCloud) -> Result<(), Error> {
            Err(Error::Sink("no cloud publisher".to_string()))
        }

        fn publish_transform(
            &mut self,
            _parent: &str,
            child: &str,
            _transform: &Isometry3<f64>,
        ) -> Result<(), Error> {
            self.0.push(child.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_split_sinks() {
        let mut imu = ImuProcessor::new(format());
        let mut imu_sink = ImuOnly::default();
        let mut buf = vec![0u8; 48];
        buf[16..24].copy_from_slice(&7u64.to_le_bytes());
        assert!(imu.handle_imu_packet(&buf, &mut imu_sink));
        assert_eq!(imu_sink.0, vec![7]);

        let metadata = SensorMetadata {
            sensor_info: Default::default(),
            config_params: Default::default(),
            lidar_data_format: crate::ouster::LidarDataFormat {
                udp_profile_lidar: "LEGACY".to_string(),
                udp_profile_imu: "LEGACY".to_string(),
                columns_per_packet: COLS,
                columns_per_frame: W,
                pixels_per_column: H,
                column_window: [0, W - 1],
                pixel_shift_by_row: vec![0; H],
            },
            beam_intrinsics: crate::ouster::BeamIntrinsics {
                beam_altitude_angles: vec![1.0, -1.0],
                beam_azimuth_angles: vec![0.0, 0.0],
                lidar_origin_to_beam_origin_mm: 0.0,
                beam_to_lidar_transform: IDENTITY_TRANSFORM,
            },
            imu_intrinsics: Default::default(),
            lidar_intrinsics: Default::default(),
        };
        let mut tf_sink = TransformsOnly::default();
        publish_static_transforms(&metadata, &mut tf_sink).unwrap();
        assert_eq!(tf_sink.0, vec![LIDAR_FRAME, IMU_FRAME]);
    }

    #[test]
    fn test_lut_shape_mismatch() {
        let lut = XyzLut::from_beams(W, 1, 0.0, &IDENTITY_TRANSFORM, &[0.0], &[0.0]).unwrap();
        assert!(matches!(
            CloudProcessor::from_parts(format(), lut, ProcessorConfig::default()),
            Err(Error::Metadata(_))
        ));
    }

    #[test]
    fn test_imu_bad_then_good() {
        let mut imu = ImuProcessor::new(format());
        let mut sink = RecordingSink::default();

        let mut buf = vec![0u8; 48];
        buf[16..24].copy_from_slice(&42u64.to_le_bytes());

        assert!(!imu.handle_imu_packet(&buf[..47], &mut sink));
        assert!(imu.handle_imu_packet(&buf, &mut sink));
        assert_eq!(imu.malformed(), 1);
        assert_eq!(imu.packets(), 2);
        assert_eq!(sink.imu.len(), 1);
        assert_eq!(sink.imu[0].timestamp, 42);
    }
}
