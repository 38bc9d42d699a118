use clap::Parser;
use std::time::Duration;

use crate::config::{DEFAULT_PROBE_PORT, DEFAULT_UPLOAD_PORT};
use crate::probe::{DEFAULT_PACKET_SIZE, MIN_PACKET_SIZE};

/// Measure network path latency and loss against a UDP echo server,
/// then upload every measurement to a collector
#[derive(Parser, Debug, Clone)]
#[command(name = "linkprobe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Echo server (host or host:port); defaults to the last one used
    pub server: Option<String>,

    /// Echo server UDP port when SERVER has none
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PROBE_PORT)]
    pub port: u16,

    /// Local UDP port to send from and receive on (defaults to --port)
    #[arg(long = "local-port")]
    pub local_port: Option<u16>,

    /// Collection server host (defaults to the echo server host)
    #[arg(long = "upload-server")]
    pub upload_server: Option<String>,

    /// Collection server TCP port
    #[arg(long = "upload-port", default_value_t = DEFAULT_UPLOAD_PORT)]
    pub upload_port: u16,

    /// Don't upload measurements at the end of the session
    #[arg(long = "no-upload")]
    pub no_upload: bool,

    /// Probe interval in seconds
    #[arg(short = 'i', long = "interval", default_value = "0.25")]
    pub interval: f64,

    /// Session length in seconds (0 = until Ctrl+C)
    #[arg(short = 'd', long = "duration", default_value = "0")]
    pub duration: f64,

    /// Seconds to keep receiving after sending stops
    #[arg(long = "drain", default_value = "5")]
    pub drain: f64,

    /// Upload connect timeout in seconds
    #[arg(long = "connect-timeout", default_value = "10")]
    pub connect_timeout: f64,

    /// Probe datagram size in bytes (must match the echo server)
    #[arg(short = 's', long = "size", default_value_t = DEFAULT_PACKET_SIZE)]
    pub packet_size: usize,

    /// Reply decode worker threads
    #[arg(long = "workers", default_value = "2")]
    pub workers: usize,

    /// Replies allowed to wait for a decode worker
    #[arg(long = "queue", default_value = "256")]
    pub queue: usize,

    /// Fixed latitude for every probe
    #[arg(long = "lat", requires = "lon", allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Fixed longitude for every probe
    #[arg(long = "lon", requires = "lat", allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Location accuracy in meters
    #[arg(long = "accuracy", requires = "lat")]
    pub accuracy: Option<f32>,

    /// Ground speed in m/s
    #[arg(long = "speed", requires = "lat", allow_hyphen_values = true)]
    pub speed: Option<f32>,

    /// Bearing in degrees
    #[arg(long = "bearing", requires = "lat")]
    pub bearing: Option<f32>,

    /// Network type label recorded with every probe (e.g. WiFi, LTE)
    #[arg(long = "network-type")]
    pub network_type: Option<String>,

    /// Downstream bandwidth estimate in kbps
    #[arg(long = "down-kbps")]
    pub down_kbps: Option<u32>,

    /// Upstream bandwidth estimate in kbps
    #[arg(long = "up-kbps")]
    pub up_kbps: Option<u32>,

    /// Raw GSM signal level (ASU; 99 = unavailable)
    #[arg(long = "gsm-asu")]
    pub gsm_asu: Option<i32>,

    /// Raw LTE signal level (ASU; 99 = unavailable)
    #[arg(long = "lte-asu")]
    pub lte_asu: Option<i32>,

    /// Record probes even without a location fix
    #[arg(long = "allow-no-location")]
    pub allow_no_location: bool,

    /// Print all records as JSON when the session ends
    #[arg(long = "json")]
    pub json: bool,

    /// Print a summary report when the session ends
    #[arg(long = "report")]
    pub report: bool,

    /// Verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    /// Get probe interval as Duration
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    /// Get drain window as Duration
    pub fn drain_duration(&self) -> Duration {
        Duration::from_secs_f64(self.drain)
    }

    /// Get upload connect timeout as Duration
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout)
    }

    /// Session length, None when running until interrupted
    pub fn duration_limit(&self) -> Option<Duration> {
        (self.duration > 0.0).then(|| Duration::from_secs_f64(self.duration))
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.interval <= 0.0 {
            return Err("Interval must be positive".into());
        }

        // Upper bound on send rate
        const MIN_INTERVAL: f64 = 0.01;
        if self.interval < MIN_INTERVAL {
            return Err(format!("Interval cannot be below {}s", MIN_INTERVAL));
        }

        if self.duration < 0.0 {
            return Err("Duration cannot be negative".into());
        }

        if self.drain < 0.0 {
            return Err("Drain window cannot be negative".into());
        }

        if self.connect_timeout <= 0.0 {
            return Err("Connect timeout must be positive".into());
        }

        if self.packet_size < MIN_PACKET_SIZE {
            return Err(format!("Packet size must be at least {} bytes", MIN_PACKET_SIZE));
        }
        const MAX_PACKET_SIZE: usize = 65_507;
        if self.packet_size > MAX_PACKET_SIZE {
            return Err(format!("Packet size cannot exceed {} bytes", MAX_PACKET_SIZE));
        }

        if self.workers == 0 {
            return Err("Workers must be at least 1".into());
        }
        const MAX_WORKERS: usize = 64;
        if self.workers > MAX_WORKERS {
            return Err(format!("Workers cannot exceed {} (resource limit)", MAX_WORKERS));
        }

        if self.queue == 0 {
            return Err("Queue must hold at least 1 reply".into());
        }

        if let Some(lat) = self.lat
            && !(-90.0..=90.0).contains(&lat)
        {
            return Err(format!("Latitude out of range: {}", lat));
        }
        if let Some(lon) = self.lon
            && !(-180.0..=180.0).contains(&lon)
        {
            return Err(format!("Longitude out of range: {}", lon));
        }

        if let Some(bearing) = self.bearing
            && !(0.0..360.0).contains(&bearing)
        {
            return Err(format!("Bearing out of range: {}", bearing));
        }
        if let Some(speed) = self.speed
            && speed < 0.0
        {
            return Err("Speed cannot be negative".into());
        }

        if self.no_upload && self.upload_server.is_some() {
            return Err("Cannot combine --no-upload with --upload-server".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("linkprobe").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_validate() {
        let args = parse(&["10.0.0.1"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.interval_duration(), Duration::from_millis(250));
        assert_eq!(args.drain_duration(), Duration::from_secs(5));
        assert_eq!(args.duration_limit(), None);
    }

    #[test]
    fn test_negative_coordinates_parse() {
        let args = parse(&["10.0.0.1", "--lat", "-33.86", "--lon", "-151.2"]);
        assert_eq!(args.lat, Some(-33.86));
        assert_eq!(args.lon, Some(-151.2));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_motion_flags() {
        let args = parse(&[
            "10.0.0.1", "--lat", "1", "--lon", "2", "--speed", "13.5", "--bearing", "270",
        ]);
        assert_eq!(args.speed, Some(13.5));
        assert_eq!(args.bearing, Some(270.0));
        assert!(args.validate().is_ok());

        let bad = parse(&["x", "--lat", "1", "--lon", "2", "--bearing", "360"]);
        assert!(bad.validate().is_err());
        let bad = parse(&["x", "--lat", "1", "--lon", "2", "--speed", "-1"]);
        assert!(bad.validate().is_err());

        // Motion without a position is meaningless
        assert!(Args::try_parse_from(["linkprobe", "x", "--speed", "3"]).is_err());
    }

    #[test]
    fn test_lat_requires_lon() {
        let result = Args::try_parse_from(["linkprobe", "10.0.0.1", "--lat", "10"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(parse(&["x", "--interval", "0"]).validate().is_err());
        assert!(parse(&["x", "--interval", "0.001"]).validate().is_err());
        assert!(parse(&["x", "--size", "8"]).validate().is_err());
        assert!(parse(&["x", "--workers", "0"]).validate().is_err());
        assert!(parse(&["x", "--queue", "0"]).validate().is_err());
        assert!(parse(&["x", "--lat", "91", "--lon", "0"]).validate().is_err());
        assert!(
            parse(&["x", "--no-upload", "--upload-server", "y"])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_duration_limit() {
        let args = parse(&["x", "--duration", "90"]);
        assert_eq!(args.duration_limit(), Some(Duration::from_secs(90)));
    }
}
