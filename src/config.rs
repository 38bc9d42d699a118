use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::cli::Args;
use crate::prefs::Prefs;
use crate::probe::{DEFAULT_PACKET_SIZE, resolve_endpoint};

/// Default UDP port of the echo endpoint (also the local receive port)
pub const DEFAULT_PROBE_PORT: u16 = 1235;

/// Default TCP port of the collection server
pub const DEFAULT_UPLOAD_PORT: u16 = 1234;

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Echo endpoint probes are sent to
    pub probe_addr: SocketAddr,
    /// Local UDP port to send from and receive on (0 = ephemeral)
    pub local_port: u16,
    /// Collection server for the bulk upload (None = skip upload)
    pub upload_addr: Option<SocketAddr>,
    /// Probe and reply datagram length
    pub packet_size: usize,
    /// Delay before the first probe
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,
    /// Interval between probes
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// How long to keep receiving after sending stops
    #[serde(with = "duration_serde")]
    pub drain: Duration,
    /// Upload connect timeout
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Decode worker threads
    pub decode_workers: usize,
    /// Pending replies allowed before new ones are dropped
    pub decode_queue: usize,
    /// Skip record creation while no location fix is known
    pub require_location: bool,
    /// Session length (None = until interrupted)
    #[serde(default, with = "option_duration_serde")]
    pub duration: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PROBE_PORT),
            local_port: 0,
            upload_addr: None,
            packet_size: DEFAULT_PACKET_SIZE,
            initial_delay: Duration::from_millis(100),
            interval: Duration::from_millis(250),
            drain: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            decode_workers: 2,
            decode_queue: 256,
            require_location: true,
            duration: None,
        }
    }
}

impl Config {
    /// Build the runtime config from CLI args, falling back to saved preferences
    pub fn from_args(args: &Args, prefs: &Prefs) -> Result<Self> {
        let server = args
            .server
            .as_deref()
            .or(prefs.server.as_deref())
            .context("No echo server given and none saved; pass SERVER")?;
        let probe_addr = resolve_endpoint(server, args.port)?;

        let upload_addr = if args.no_upload {
            None
        } else {
            let host = args
                .upload_server
                .as_deref()
                .or(prefs.upload_server.as_deref())
                .unwrap_or_else(|| server_host(server));
            Some(resolve_endpoint(host, args.upload_port)?)
        };

        Ok(Self {
            probe_addr,
            local_port: args.local_port.unwrap_or(args.port),
            upload_addr,
            packet_size: args.packet_size,
            initial_delay: Duration::from_millis(100),
            interval: args.interval_duration(),
            drain: args.drain_duration(),
            connect_timeout: args.connect_timeout_duration(),
            decode_workers: args.workers,
            decode_queue: args.queue,
            require_location: !args.allow_no_location,
            duration: args.duration_limit(),
        })
    }
}

/// Host part of "host[:port]" for reuse as the upload host
fn server_host(server: &str) -> &str {
    if server.parse::<IpAddr>().is_ok() {
        return server;
    }
    match server.parse::<SocketAddr>() {
        Ok(_) => server
            .rsplit_once(':')
            .map(|(host, _)| host.trim_start_matches('[').trim_end_matches(']'))
            .unwrap_or(server),
        Err(_) => server.split(':').next().unwrap_or(server),
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Serde helper for Option<Duration>
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<f64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs_f64))
    }
}
