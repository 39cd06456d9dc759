//! Client for the RControlStation location feed.
//!
//! The station exposes a line-oriented TCP service: after connecting, the
//! client sends a single `SUB <interval_ms>` line (0 asks for the server's
//! default rate) and the station streams `POS <lat> <lon>` records back,
//! one per line. Anything else on the wire is ignored.

use std::io;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RcsConfig {
    pub host: String,
    pub port: u16,
    /// Requested update interval; 0 leaves the rate to the server.
    pub interval_ms: u32,
}

impl Default for RcsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 65191,
            interval_ms: 0,
        }
    }
}

/// One location fix from the station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetFix {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

#[derive(Debug, Error)]
pub enum RcsError {
    #[error("connect {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("subscribe: {0}")]
    Subscribe(io::Error),
}

/// A running subscription to the station.
///
/// Fixes arrive on a bounded channel; once the feed closes or errors,
/// `next_fix` returns `None` and the provider is done.
pub struct LocationProvider {
    rx: mpsc::Receiver<TargetFix>,
}

impl LocationProvider {
    pub async fn connect(cfg: &RcsConfig) -> Result<Self, RcsError> {
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| RcsError::Connect { addr: addr.clone(), source })?;
        info!("rcs: connected to {}", addr);

        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(format!("SUB {}\n", cfg.interval_ms).as_bytes())
            .await
            .map_err(RcsError::Subscribe)?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            // Keep the write half alive so the station does not see a
            // half-closed socket.
            let _write = write_half;
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_line(line.trim()) {
                        Some(fix) => {
                            if tx.send(fix).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            if !line.trim().is_empty() {
                                debug!("rcs: ignoring line {:?}", line);
                            }
                        }
                    },
                    Ok(None) => {
                        info!("rcs: feed closed");
                        return;
                    }
                    Err(e) => {
                        warn!("rcs: read error: {e}");
                        return;
                    }
                }
            }
        });

        Ok(Self { rx })
    }

    /// `None` once the feed has stopped.
    pub async fn next_fix(&mut self) -> Option<TargetFix> {
        self.rx.recv().await
    }
}

fn parse_line(line: &str) -> Option<TargetFix> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "POS" {
        return None;
    }
    let latitude_deg: f64 = parts.next()?.parse().ok()?;
    let longitude_deg: f64 = parts.next()?.parse().ok()?;
    if !latitude_deg.is_finite()
        || !longitude_deg.is_finite()
        || latitude_deg.abs() > 90.0
        || longitude_deg.abs() > 180.0
    {
        return None;
    }
    Some(TargetFix { latitude_deg, longitude_deg })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_pos_record() {
        let fix = parse_line("POS 57.7149500 12.8913400").unwrap();
        assert!((fix.latitude_deg - 57.71495).abs() < 1e-9);
        assert!((fix.longitude_deg - 12.89134).abs() < 1e-9);
    }

    #[test]
    fn test_parses_negative_coordinates() {
        let fix = parse_line("POS -33.8688 -70.6693").unwrap();
        assert!(fix.latitude_deg < 0.0);
        assert!(fix.longitude_deg < 0.0);
    }

    #[test]
    fn test_ignores_other_records() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("HELLO"), None);
        assert_eq!(parse_line("STATUS ok"), None);
        assert_eq!(parse_line("POS"), None);
        assert_eq!(parse_line("POS 57.7"), None);
        assert_eq!(parse_line("POS north east"), None);
    }

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        assert_eq!(parse_line("POS 91.0 12.0"), None);
        assert_eq!(parse_line("POS 57.7 181.0"), None);
        assert_eq!(parse_line("POS NaN 12.0"), None);
    }
}
