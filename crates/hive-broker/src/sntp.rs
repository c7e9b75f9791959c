//! Minimal SNTP (RFC 4330) client time source.

use crate::clock::TimeSource;
use crate::error::ClockError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

const PACKET_LEN: usize = 48;

/// Queries one SNTP server, e.g. `pool.ntp.org:123`.
#[derive(Debug, Clone)]
pub struct SntpTimeSource {
    address: String,
    timeout: Duration,
}

impl SntpTimeSource {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Builds a client request: LI 0, version 4, mode 3 (client).
pub fn request_packet() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = 0b00_100_011;
    packet
}

/// Extracts the server transmit timestamp from a response.
///
/// # Errors
///
/// Returns `ClockError::InvalidResponse` for short packets, non-server
/// modes, kiss-of-death replies (stratum 0), and unset timestamps.
pub fn parse_response(packet: &[u8]) -> Result<DateTime<Utc>, ClockError> {
    if packet.len() < PACKET_LEN {
        return Err(ClockError::InvalidResponse(format!(
            "packet of {} bytes",
            packet.len()
        )));
    }
    let mode = packet[0] & 0b111;
    if mode != 4 && mode != 5 {
        return Err(ClockError::InvalidResponse(format!("mode {mode}")));
    }
    if packet[1] == 0 {
        return Err(ClockError::InvalidResponse("kiss-of-death".to_string()));
    }

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let fraction = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    if seconds == 0 {
        return Err(ClockError::InvalidResponse(
            "transmit timestamp unset".to_string(),
        ));
    }

    let unix_seconds = i64::from(seconds) - NTP_UNIX_OFFSET;
    let nanos = ((u64::from(fraction) * 1_000_000_000) >> 32) as u32;
    DateTime::from_timestamp(unix_seconds, nanos)
        .ok_or_else(|| ClockError::InvalidResponse("timestamp out of range".to_string()))
}

#[async_trait]
impl TimeSource for SntpTimeSource {
    fn name(&self) -> &str {
        &self.address
    }

    async fn now(&self) -> Result<DateTime<Utc>, ClockError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.address.as_str()).await?;
        socket.send(&request_packet()).await?;

        let mut response = [0u8; PACKET_LEN];
        let received = tokio::time::timeout(self.timeout, socket.recv(&mut response))
            .await
            .map_err(|_| ClockError::Timeout(self.address.clone()))??;
        parse_response(&response[..received])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(seconds: u32, fraction: u32) -> [u8; PACKET_LEN] {
        let mut packet = [0u8; PACKET_LEN];
        packet[0] = 0b00_100_100;
        packet[1] = 2;
        packet[40..44].copy_from_slice(&seconds.to_be_bytes());
        packet[44..48].copy_from_slice(&fraction.to_be_bytes());
        packet
    }

    #[test]
    fn request_is_a_version_4_client_packet() {
        let packet = request_packet();
        assert_eq!((packet[0] >> 3) & 0b111, 4);
        assert_eq!(packet[0] & 0b111, 3);
    }

    #[test]
    fn parses_transmit_timestamp() {
        // 2026-01-01T00:00:00.500Z
        let unix = 1_767_225_600i64;
        let packet = response((unix + NTP_UNIX_OFFSET) as u32, 1 << 31);
        let at = parse_response(&packet).expect("should parse");
        assert_eq!(hive_types::format_timestamp(at), "2026-01-01T00:00:00.500Z");
    }

    #[test]
    fn rejects_malformed_responses() {
        assert!(parse_response(&[0u8; 12]).is_err());

        let mut kiss = response(3_900_000_000, 0);
        kiss[1] = 0;
        assert!(parse_response(&kiss).is_err());

        let mut client_mode = response(3_900_000_000, 0);
        client_mode[0] = 0b00_100_011;
        assert!(parse_response(&client_mode).is_err());

        assert!(parse_response(&response(0, 0)).is_err());
    }
}
