// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Crate-wide error type and clock helpers.
//!
//! Decode-level errors ([`Error::PacketSize`], [`Error::UnknownPacketType`],
//! [`Error::InvalidScan`]) are meant to be handled locally by dropping the
//! packet or scan. Startup errors ([`Error::Metadata`],
//! [`Error::UnsupportedProfile`], [`Error::Config`]) are fatal.

use std::fmt;

/// Common error type for packet decoding, batching and startup.
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket, file operations)
    Io(std::io::Error),
    /// Malformed metadata JSON
    Json(serde_json::Error),
    /// Sensor HTTP API error
    Http(ureq::Error),
    /// System time error
    SystemTime(std::time::SystemTimeError),
    /// Shape error from ndarray operations
    Shape(ndarray::ShapeError),
    /// Packet length does not match the fixed size of the profile
    PacketSize { expected: usize, actual: usize },
    /// Unknown packet type in a packet header
    UnknownPacketType(u16),
    /// UDP profile string not understood by the packet format descriptor
    UnsupportedProfile(String),
    /// Sensor metadata is missing or inconsistent
    Metadata(String),
    /// Completed scan holds no column with a nonzero timestamp
    InvalidScan,
    /// Configuration error
    Config(String),
    /// Publishing to the output sink failed
    Sink(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "json error: {}", err),
            Error::Http(err) => write!(f, "http error: {}", err),
            Error::SystemTime(err) => write!(f, "system time error: {}", err),
            Error::Shape(err) => write!(f, "shape error: {}", err),
            Error::PacketSize { expected, actual } => write!(
                f,
                "packet size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            Error::UnknownPacketType(typ) => write!(f, "unknown packet type: {}", typ),
            Error::UnsupportedProfile(profile) => write!(f, "unsupported udp profile: {}", profile),
            Error::Metadata(msg) => write!(f, "sensor metadata error: {}", msg),
            Error::InvalidScan => write!(f, "scan has no column with a valid timestamp"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Sink(msg) => write!(f, "publish error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Http(err)
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(err: std::time::SystemTimeError) -> Self {
        Error::SystemTime(err)
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err)
    }
}

/// Wall clock time in nanoseconds since the Unix epoch.
///
/// Sensor timestamps are compared against this clock when checking for
/// clock skew between the lidar and the host.
pub fn wall_clock() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PacketSize {
            expected: 12608,
            actual: 100,
        };
        assert_eq!(
            err.to_string(),
            "packet size mismatch: expected 12608 bytes, got 100"
        );
        assert_eq!(
            Error::UnsupportedProfile("DUAL".to_string()).to_string(),
            "unsupported udp profile: DUAL"
        );
    }

    #[test]
    fn test_wall_clock_is_epoch_based() {
        assert!(wall_clock().unwrap() > 1_600_000_000_000_000_000);
    }
}
