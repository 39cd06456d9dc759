//! Operator-facing connection URLs.
//!
//! The formats match what ground-station tooling expects:
//!
//! - UDP:    `udp://[bind_host][:bind_port]` (listen), `udpout://host:port` (send)
//! - TCP:    `tcp://[server_host][:server_port]`
//! - Serial: `serial:///path/to/serial/dev[:baudrate]`
//!
//! To connect to a simulator, `udp://:14540` is the usual choice.

use thiserror::Error;

const DEFAULT_UDP_PORT: u16 = 14540;
const DEFAULT_TCP_HOST: &str = "127.0.0.1";
const DEFAULT_TCP_PORT: u16 = 5760;
const DEFAULT_BAUD: u32 = 57600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("unsupported scheme in {0:?}, expected udp://, tcp:// or serial://")]
    Scheme(String),
    #[error("invalid port in {0:?}")]
    Port(String),
    #[error("invalid baud rate in {0:?}")]
    Baud(String),
    #[error("missing serial device path in {0:?}")]
    Device(String),
    #[error("missing host in {0:?}")]
    Host(String),
}

/// A parsed transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Bind locally and wait for the autopilot to send to us.
    UdpIn { host: String, port: u16 },
    /// Send to a remote autopilot endpoint.
    UdpOut { host: String, port: u16 },
    Tcp { host: String, port: u16 },
    Serial { path: String, baud: u32 },
}

impl Transport {
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        if let Some(rest) = url.strip_prefix("udpout://") {
            let (host, port) = split_host_port(url, rest, DEFAULT_UDP_PORT)?;
            if host.is_empty() {
                return Err(UrlError::Host(url.to_string()));
            }
            return Ok(Self::UdpOut { host, port });
        }

        if let Some(rest) = url.strip_prefix("udp://") {
            let (host, port) = split_host_port(url, rest, DEFAULT_UDP_PORT)?;
            let host = if host.is_empty() { "0.0.0.0".into() } else { host };
            return Ok(Self::UdpIn { host, port });
        }

        if let Some(rest) = url.strip_prefix("tcp://") {
            let (host, port) = split_host_port(url, rest, DEFAULT_TCP_PORT)?;
            let host = if host.is_empty() { DEFAULT_TCP_HOST.into() } else { host };
            return Ok(Self::Tcp { host, port });
        }

        if let Some(rest) = url.strip_prefix("serial://") {
            return parse_serial(url, rest);
        }

        Err(UrlError::Scheme(url.to_string()))
    }

    /// The address string the mavlink crate's `connect` understands.
    pub fn connect_address(&self) -> String {
        match self {
            Self::UdpIn { host, port } => format!("udpin:{}:{}", host, port),
            Self::UdpOut { host, port } => format!("udpout:{}:{}", host, port),
            Self::Tcp { host, port } => format!("tcpout:{}:{}", host, port),
            Self::Serial { path, baud } => format!("serial:{}:{}", path, baud),
        }
    }
}

fn split_host_port(url: &str, rest: &str, default_port: u16) -> Result<(String, u16), UrlError> {
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| UrlError::Port(url.to_string()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), default_port)),
    }
}

fn parse_serial(url: &str, rest: &str) -> Result<Transport, UrlError> {
    // The device path itself contains no ':', so the last colon (if any)
    // separates the baud rate.
    let (path, baud) = match rest.rsplit_once(':') {
        Some((path, baud)) => {
            let baud = baud.parse().map_err(|_| UrlError::Baud(url.to_string()))?;
            (path, baud)
        }
        None => (rest, DEFAULT_BAUD),
    };
    if path.is_empty() {
        return Err(UrlError::Device(url.to_string()));
    }
    Ok(Transport::Serial { path: path.to_string(), baud })
}
