// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;
mod publisher;

use args::Args;
use clap::Parser as _;
use edgefirst_lidarcloud::{
    Error,
    diagnostics::FrequencyDiagnostics,
    format::PacketFormat,
    ouster::SensorMetadata,
    packet_source::{PacketSource, UdpSource},
    pipeline::{CloudProcessor, ImuProcessor, publish_static_transforms},
};
use kanal::{AsyncReceiver, AsyncSender, ReceiveErrorTimeout, Receiver, Sender};
use publisher::{CloudPublisher, ImuPublisher};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// Largest UDP payload read from the sensor.
const MAX_PACKET_SIZE: usize = 16 * 1024;

/// Kernel receive buffer requested for the lidar socket.
const SOCKET_BUFSIZE: usize = 16 * 1024 * 1024;

/// Packet buffers in flight between a reader and its processor.
const CHANNEL_DEPTH: usize = 128;

async fn load_metadata(args: &Args) -> Result<SensorMetadata, Box<dyn std::error::Error>> {
    if let Some(path) = &args.metadata {
        info!("loading sensor metadata from {}", path.display());
        return Ok(SensorMetadata::from_file(path)?);
    }

    let target = args
        .target
        .clone()
        .ok_or_else(|| Error::Config("either a target or --metadata is required".to_string()))?;
    let attempts = args.metadata_attempts;
    info!("fetching sensor metadata from {}", target);
    let metadata =
        tokio::task::spawn_blocking(move || SensorMetadata::fetch(&target, attempts)).await??;
    Ok(metadata)
}

fn bind_addr(port: u16) -> String {
    format!("0.0.0.0:{}", port)
}

/// Read packets from `source` into pooled buffers and forward them to the
/// processing thread.
async fn udp_reader(
    name: &'static str,
    mut source: impl PacketSource,
    tx: AsyncSender<Vec<u8>>,
    pool: AsyncReceiver<Vec<u8>>,
) {
    while source.has_more() {
        let mut buf = match pool.try_recv() {
            Ok(Some(buf)) => buf,
            _ => Vec::with_capacity(MAX_PACKET_SIZE),
        };
        buf.resize(MAX_PACKET_SIZE, 0);

        let len = match source.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                error!("{} recv error: {}", name, e);
                continue;
            }
        };
        buf.truncate(len);

        if tx.send(buf).await.is_err() {
            debug!("{} processor closed", name);
            return;
        }
    }
}

/// Owns the cloud processor, the single consumer of lidar packets.
fn lidar_thread(
    mut processor: CloudProcessor,
    mut sink: CloudPublisher,
    rx: Receiver<Vec<u8>>,
    pool: Sender<Vec<u8>>,
) {
    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(buf) => {
                info_span!("lidar_packet")
                    .in_scope(|| processor.handle_lidar_packet(&buf, &mut sink));
                let _ = pool.try_send(buf);
            }
            Err(ReceiveErrorTimeout::Timeout) => processor.idle(),
            Err(_) => break,
        }
    }

    let stats = processor.stats();
    info!(
        "lidar processor stopped: {} packets, {} malformed, {} clouds, {} invalid, {} partial",
        stats.packets, stats.malformed, stats.emitted, stats.invalid, stats.partial
    );
}

fn imu_thread(
    mut processor: ImuProcessor,
    mut sink: ImuPublisher,
    rx: Receiver<Vec<u8>>,
    pool: Sender<Vec<u8>>,
) {
    while let Ok(buf) = rx.recv() {
        processor.handle_imu_packet(&buf, &mut sink);
        let _ = pool.try_send(buf);
    }

    info!(
        "imu processor stopped: {} packets, {} malformed",
        processor.packets(),
        processor.malformed()
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.rust_log)
        .init();

    let metadata = load_metadata(&args).await?;
    let format = PacketFormat::from_metadata(&metadata)?;
    let mode = metadata.lidar_mode();
    info!(
        "sensor {} {} mode {} profile {} ({}x{})",
        metadata.sensor_info.prod_line,
        metadata.sensor_info.prod_sn,
        mode,
        format.profile,
        format.columns_per_frame,
        format.pixels_per_column
    );
    if metadata.config_params.timestamp_mode == "TIME_FROM_INTERNAL_OSC" {
        warn!("sensor uses its internal clock, cloud stamps will not match host time");
    }

    let session = zenoh::open(zenoh::Config::try_from(args.clone())?)
        .await
        .map_err(|e| Error::Sink(format!("zenoh session: {}", e)))?;
    debug!("opened zenoh session");

    let mut lidar_sink = CloudPublisher::new(&session, &args).await?;
    let imu_sink = ImuPublisher::new(&session, &args).await?;
    publish_static_transforms(&metadata, &mut lidar_sink)?;

    let mut processor = CloudProcessor::new(&metadata, args.processor_config())?;
    processor.add_observer(Box::new(FrequencyDiagnostics::for_lidar(
        "lidar/points",
        mode.frequency,
    )));
    let imu_processor = ImuProcessor::new(format);

    let lidar_port = args
        .udp_port_lidar
        .unwrap_or(match metadata.config_params.udp_port_lidar {
            0 => 7502,
            port => port,
        });
    let imu_port = args
        .udp_port_imu
        .unwrap_or(match metadata.config_params.udp_port_imu {
            0 => 7503,
            port => port,
        });
    let lidar_source = UdpSource::bind(&bind_addr(lidar_port), SOCKET_BUFSIZE).await?;
    let imu_source = UdpSource::bind(&bind_addr(imu_port), SOCKET_BUFSIZE / 16).await?;
    info!("receiving lidar on {} and imu on {}", lidar_port, imu_port);

    let (lidar_tx, lidar_rx) = kanal::bounded_async(CHANNEL_DEPTH);
    let (lidar_pool_tx, lidar_pool_rx) = kanal::bounded_async(CHANNEL_DEPTH);
    let (imu_tx, imu_rx) = kanal::bounded_async(CHANNEL_DEPTH);
    let (imu_pool_tx, imu_pool_rx) = kanal::bounded_async(CHANNEL_DEPTH);

    std::thread::Builder::new()
        .name("lidar".to_string())
        .spawn(move || {
            lidar_thread(
                processor,
                lidar_sink,
                lidar_rx.to_sync(),
                lidar_pool_tx.to_sync(),
            )
        })?;
    std::thread::Builder::new()
        .name("imu".to_string())
        .spawn(move || {
            imu_thread(
                imu_processor,
                imu_sink,
                imu_rx.to_sync(),
                imu_pool_tx.to_sync(),
            )
        })?;

    let lidar_reader = tokio::spawn(udp_reader("lidar", lidar_source, lidar_tx, lidar_pool_rx));
    let imu_reader = tokio::spawn(udp_reader("imu", imu_source, imu_tx, imu_pool_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        res = lidar_reader => error!("lidar reader exited: {:?}", res),
        res = imu_reader => error!("imu reader exited: {:?}", res),
    }

    Ok(())
}
