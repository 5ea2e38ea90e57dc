// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction.
//!
//! A [`PacketSource`] yields one raw lidar or IMU packet per call:
//!
//! - **Live operation**: [`UdpSource`] reads a UDP socket
//! - **Testing**: [`ReplaySource`] replays pre-recorded packets
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_lidarcloud::packet_source::{PacketSource, ReplaySource};
//!
//! let mut source = ReplaySource::new(packets);
//! let mut buf = [0u8; 16 * 1024];
//! while source.has_more() {
//!     let len = source.recv(&mut buf).await?;
//!     processor.handle_lidar_packet(&buf[..len], &mut sink);
//! }
//! ```

use crate::lidar::Error;
use std::{future::Future, pin::Pin};
use tracing::{debug, warn};

/// Trait for packet sources.
pub trait PacketSource: Send {
    /// Receive the next packet into the provided buffer.
    ///
    /// # Returns
    /// - `Ok(len)` - Number of bytes received
    /// - `Err` - I/O or source error
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>>;

    /// Check if more packets are available.
    ///
    /// For infinite sources (like UDP), always returns `true`.
    fn has_more(&self) -> bool;
}

/// UDP socket packet source for live sensor operation.
pub struct UdpSource {
    socket: tokio::net::UdpSocket,
}

impl UdpSource {
    /// Create a new UDP source from an existing socket.
    pub fn new(socket: tokio::net::UdpSocket) -> Self {
        Self { socket }
    }

    /// Bind to `addr`, requesting a kernel receive buffer of `bufsize`
    /// bytes so a full revolution of packets can queue while a scan is
    /// being published.
    pub async fn bind(addr: &str, bufsize: usize) -> Result<Self, Error> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        set_socket_bufsize(&socket, bufsize);
        debug!("listening on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(target_os = "linux")]
fn set_socket_bufsize(socket: &tokio::net::UdpSocket, size: usize) {
    use std::os::fd::AsRawFd;

    let size = size as libc::c_int;
    let err = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const _ as *const libc::c_void,
            std::mem::size_of_val(&size) as libc::socklen_t,
        )
    };
    if err != 0 {
        warn!(
            "setsockopt SO_RCVBUF failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn set_socket_bufsize(_socket: &tokio::net::UdpSocket, _size: usize) {}

impl PacketSource for UdpSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move {
            let len = self.socket.recv(buf).await?;
            Ok(len)
        })
    }

    fn has_more(&self) -> bool {
        true
    }
}

/// Replays a fixed sequence of packets, then reports end of stream.
pub struct ReplaySource {
    packets: Vec<Vec<u8>>,
    index: usize,
}

impl ReplaySource {
    pub fn new(packets: Vec<Vec<u8>>) -> Self {
        Self { packets, index: 0 }
    }
}

impl PacketSource for ReplaySource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move {
            if self.index >= self.packets.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "no more packets",
                )));
            }

            let packet = &self.packets[self.index];
            let len = packet.len().min(buf.len());
            buf[..len].copy_from_slice(&packet[..len]);
            self.index += 1;
            Ok(len)
        })
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }
}
