// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::args::Args;
use edgefirst_lidarcloud::{
    Error,
    cloud::PointCloud,
    formats::{POINT_STEP, cloud_fields, format_cloud_into},
    imu::ImuReading,
    lidar::wall_clock,
    pipeline::{CloudSink, IMU_FRAME, ImuSink, SENSOR_FRAME},
};
use edgefirst_schemas::{
    builtin_interfaces::Time,
    geometry_msgs::{Quaternion, Transform, TransformStamped, Vector3},
    sensor_msgs::{IMU, PointCloud2},
    serde_cdr,
    std_msgs::Header,
};
use nalgebra::Isometry3;
use serde::Serialize;
use tracing::{instrument, trace};
use zenoh::{
    Session, Wait,
    bytes::{Encoding, ZBytes},
    pubsub::Publisher,
    qos::{CongestionControl, Priority},
};

/// Nanoseconds to a ROS time stamp.
pub fn time_from_nanos(nanos: u64) -> Time {
    Time {
        sec: (nanos / 1_000_000_000) as i32,
        nanosec: (nanos % 1_000_000_000) as u32,
    }
}

/// Organized PointCloud2 carrying `data`, which must already hold the
/// packed points of `cloud`.
pub fn cloud_message(cloud: &PointCloud, frame_id: String, data: Vec<u8>) -> PointCloud2 {
    PointCloud2 {
        header: Header {
            stamp: time_from_nanos(cloud.timestamp()),
            frame_id,
        },
        height: cloud.height() as u32,
        width: cloud.width() as u32,
        fields: cloud_fields(),
        is_bigendian: false,
        point_step: POINT_STEP as u32,
        row_step: (POINT_STEP * cloud.width()) as u32,
        data,
        is_dense: true,
    }
}

pub fn imu_message(imu: &ImuReading, frame_id: String) -> IMU {
    IMU {
        header: Header {
            stamp: time_from_nanos(imu.timestamp),
            frame_id,
        },
        orientation: Quaternion {
            x: imu.orientation.i,
            y: imu.orientation.j,
            z: imu.orientation.k,
            w: imu.orientation.w,
        },
        orientation_covariance: imu.orientation_covariance,
        angular_velocity: Vector3 {
            x: imu.angular_velocity.x,
            y: imu.angular_velocity.y,
            z: imu.angular_velocity.z,
        },
        angular_velocity_covariance: imu.angular_velocity_covariance,
        linear_acceleration: Vector3 {
            x: imu.linear_acceleration.x,
            y: imu.linear_acceleration.y,
            z: imu.linear_acceleration.z,
        },
        linear_acceleration_covariance: imu.linear_acceleration_covariance,
    }
}

pub fn transform_message(
    parent: String,
    child: String,
    transform: &Isometry3<f64>,
    stamp: Time,
) -> TransformStamped {
    let translation = &transform.translation.vector;
    let rotation = &transform.rotation;

    TransformStamped {
        header: Header {
            stamp,
            frame_id: parent,
        },
        child_frame_id: child,
        transform: Transform {
            translation: Vector3 {
                x: translation.x,
                y: translation.y,
                z: translation.z,
            },
            rotation: Quaternion {
                x: rotation.i,
                y: rotation.j,
                z: rotation.k,
                w: rotation.w,
            },
        },
    }
}

fn declare_error(topic: &str, e: impl std::fmt::Display) -> Error {
    Error::Sink(format!("failed to create publisher {}: {}", topic, e))
}

fn encode<T: Serialize>(msg: &T, schema: &str) -> Result<(ZBytes, Encoding), Error> {
    let msg = ZBytes::from(serde_cdr::serialize(msg).map_err(|e| Error::Sink(e.to_string()))?);
    let enc = Encoding::APPLICATION_CDR.with_schema(schema);
    Ok((msg, enc))
}

async fn declare(
    session: &Session,
    topic: String,
    priority: Priority,
    congestion_control: CongestionControl,
) -> Result<Publisher<'static>, Error> {
    session
        .declare_publisher(topic.clone())
        .priority(priority)
        .congestion_control(congestion_control)
        .await
        .map_err(|e| declare_error(&topic, e))
}

fn put(publisher: &Publisher<'static>, (msg, enc): (ZBytes, Encoding)) -> Result<(), Error> {
    publisher
        .put(msg)
        .encoding(enc)
        .wait()
        .map_err(|e| Error::Sink(format!("{}: {}", publisher.key_expr(), e)))?;
    trace!("{} message sent", publisher.key_expr());
    Ok(())
}

/// Publishes clouds on `{topic}/points` and the static transforms on
/// `rt/tf_static` as CDR encoded ROS2 messages.
pub struct CloudPublisher {
    points: Publisher<'static>,
    tf_static: Publisher<'static>,
    args: Args,
    sensor_frame: String,
    /// Packed point buffer reused across clouds.
    data: Vec<u8>,
}

impl CloudPublisher {
    pub async fn new(session: &Session, args: &Args) -> Result<Self, Error> {
        let points = declare(
            session,
            format!("{}/points", args.lidar_topic),
            Priority::DataHigh,
            CongestionControl::Drop,
        )
        .await?;
        let tf_static = declare(
            session,
            "rt/tf_static".to_string(),
            Priority::Background,
            CongestionControl::Block,
        )
        .await?;

        Ok(Self {
            points,
            tf_static,
            args: args.clone(),
            sensor_frame: args.frame(SENSOR_FRAME),
            data: Vec::new(),
        })
    }
}

impl CloudSink for CloudPublisher {
    #[instrument(skip_all)]
    fn publish_cloud(&mut self, cloud: &PointCloud) -> Result<(), Error> {
        let mut data = std::mem::take(&mut self.data);
        format_cloud_into(cloud, &mut data);

        let msg = cloud_message(cloud, self.sensor_frame.clone(), data);
        let encoded = encode(&msg, "sensor_msgs/msg/PointCloud2");
        self.data = msg.data;

        put(&self.points, encoded?)
    }

    fn publish_transform(
        &mut self,
        parent: &str,
        child: &str,
        transform: &Isometry3<f64>,
    ) -> Result<(), Error> {
        let msg = transform_message(
            self.args.frame(parent),
            self.args.frame(child),
            transform,
            time_from_nanos(wall_clock()?),
        );
        put(
            &self.tf_static,
            encode(&msg, "geometry_msgs/msg/TransformStamped")?,
        )
    }
}

/// Publishes IMU readings on `{topic}/imu`.
pub struct ImuPublisher {
    imu: Publisher<'static>,
    imu_frame: String,
}

impl ImuPublisher {
    pub async fn new(session: &Session, args: &Args) -> Result<Self, Error> {
        let imu = declare(
            session,
            format!("{}/imu", args.lidar_topic),
            Priority::DataHigh,
            CongestionControl::Drop,
        )
        .await?;

        Ok(Self {
            imu,
            imu_frame: args.frame(IMU_FRAME),
        })
    }
}

impl ImuSink for ImuPublisher {
    fn publish_imu(&mut self, imu: &ImuReading) -> Result<(), Error> {
        let msg = imu_message(imu, self.imu_frame.clone());
        put(&self.imu, encode(&msg, "sensor_msgs/msg/Imu")?)
    }
}
