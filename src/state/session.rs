use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::record::{MeasurementRecord, ProbeContext};

/// Lifecycle of a measurement session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    /// Sending and receiving
    Running,
    /// Sending stopped, still collecting in-flight replies
    Draining,
    Stopped,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// True while the receiver is active
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Point-in-time view of a session for status display
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    /// Probe ids allocated so far
    pub sent: u32,
    /// Records created (probes sent with usable context)
    pub records: usize,
    /// Records with a correlated reply
    pub answered: usize,
    pub context: ProbeContext,
}

impl StatusSnapshot {
    /// Multi-line status text
    pub fn status_text(&self) -> String {
        let location = match self.context.location {
            Some(loc) => format!("{:.4}, {:.4}", loc.latitude, loc.longitude),
            None => "Unknown".to_string(),
        };
        let signal = |level: Option<u8>| {
            level.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string())
        };
        format!(
            "State: {}\nPackets: {} sent, {} recorded, {} answered\nLocation: {}\nNetwork Type: {}\nSignal: {}, {}",
            self.state,
            self.sent,
            self.records,
            self.answered,
            location,
            self.context.network_type.as_deref().unwrap_or("Unknown"),
            signal(self.context.gsm_asu),
            signal(self.context.lte_asu),
        )
    }
}

/// Round-trip statistics over a set of records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RttStats {
    pub received: u64,
    #[serde(with = "duration_serde")]
    pub min_rtt: Duration,
    #[serde(with = "duration_serde")]
    pub max_rtt: Duration,
    pub mean_rtt: f64, // microseconds
    pub m2: f64,       // for stddev calculation
    pub jitter: f64,   // microseconds
    #[serde(skip)]
    last_rtt: Option<Duration>,
}

impl Default for RttStats {
    fn default() -> Self {
        Self {
            received: 0,
            min_rtt: Duration::MAX,
            max_rtt: Duration::ZERO,
            mean_rtt: 0.0,
            m2: 0.0,
            jitter: 0.0,
            last_rtt: None,
        }
    }
}

impl RttStats {
    /// Update stats with a new RTT sample
    pub fn record(&mut self, rtt: Duration) {
        self.received += 1;

        let rtt_micros = rtt.as_micros() as f64;

        if rtt < self.min_rtt {
            self.min_rtt = rtt;
        }
        if rtt > self.max_rtt {
            self.max_rtt = rtt;
        }

        // Welford's online algorithm for mean and variance
        let delta = rtt_micros - self.mean_rtt;
        self.mean_rtt += delta / self.received as f64;
        let delta2 = rtt_micros - self.mean_rtt;
        self.m2 += delta * delta2;

        // RFC 3550-style smoothed RTT variation
        if let Some(last) = self.last_rtt {
            let diff = (rtt_micros - last.as_micros() as f64).abs();
            self.jitter += (diff - self.jitter) / 16.0;
        }
        self.last_rtt = Some(rtt);
    }

    pub fn avg_rtt(&self) -> Duration {
        Duration::from_micros(self.mean_rtt as u64)
    }

    pub fn stddev(&self) -> Duration {
        if self.received < 2 {
            return Duration::ZERO;
        }
        let variance = self.m2 / self.received as f64;
        Duration::from_micros(variance.sqrt() as u64)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_micros(self.jitter as u64)
    }
}

/// Outcome of a finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Probe ids allocated by the sender
    pub sent: u32,
    /// Records in creation order
    pub records: Vec<MeasurementRecord>,
}

impl SessionSummary {
    pub fn answered(&self) -> usize {
        self.records.iter().filter(|r| r.is_answered()).count()
    }

    /// Loss over recorded probes, in percent
    pub fn loss_pct(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            (1.0 - (self.answered() as f64 / self.records.len() as f64)) * 100.0
        }
    }

    /// Round-trip statistics in record order
    pub fn rtt_stats(&self) -> RttStats {
        let mut stats = RttStats::default();
        for rtt in self.records.iter().filter_map(|r| r.round_trip_time_ms()) {
            stats.record(Duration::from_millis(rtt as u64));
        }
        stats
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::record::{Location, ProbeId};

    fn record(id: u32, rtt: Option<u32>) -> MeasurementRecord {
        let mut r = MeasurementRecord::new(ProbeId(id), id as u64 * 250, ProbeContext::default());
        if let Some(rtt) = rtt {
            r.apply_reply(id as u64 * 250 + rtt as u64, 0, Some(rtt));
        }
        r
    }

    #[test]
    fn test_rtt_stats_initial_state() {
        let stats = RttStats::default();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.min_rtt, Duration::MAX);
        assert_eq!(stats.max_rtt, Duration::ZERO);
        assert_eq!(stats.stddev(), Duration::ZERO);
    }

    #[test]
    fn test_rtt_stats_welford_algorithm() {
        let mut stats = RttStats::default();

        // Mean = 20ms, population stddev ~8.16ms
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(20));
        stats.record(Duration::from_millis(30));

        assert_eq!(stats.received, 3);
        assert_eq!(stats.min_rtt, Duration::from_millis(10));
        assert_eq!(stats.max_rtt, Duration::from_millis(30));
        assert_eq!(stats.avg_rtt().as_millis(), 20);

        let stddev_us = stats.stddev().as_micros();
        assert!(stddev_us > 8000 && stddev_us < 8500);
    }

    #[test]
    fn test_rtt_stats_jitter_smoothing() {
        let mut stats = RttStats::default();
        stats.record(Duration::from_millis(10));
        assert_eq!(stats.jitter(), Duration::ZERO);

        stats.record(Duration::from_millis(50));
        let after_jump = stats.jitter();
        assert!(after_jump > Duration::ZERO);

        for _ in 0..10 {
            stats.record(Duration::from_millis(50));
        }
        assert!(stats.jitter() < after_jump);
    }

    #[test]
    fn test_summary_loss_and_stats() {
        let summary = SessionSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            sent: 4,
            records: vec![record(0, Some(40)), record(1, None), record(2, Some(60)), record(3, None)],
        };

        assert_eq!(summary.answered(), 2);
        assert!((summary.loss_pct() - 50.0).abs() < 0.01);

        let stats = summary.rtt_stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.avg_rtt(), Duration::from_millis(50));
    }

    #[test]
    fn test_empty_summary_has_no_loss() {
        let summary = SessionSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            sent: 0,
            records: Vec::new(),
        };
        assert_eq!(summary.loss_pct(), 0.0);
    }

    #[test]
    fn test_status_text() {
        let snapshot = StatusSnapshot {
            state: SessionState::Running,
            sent: 12,
            records: 10,
            answered: 9,
            context: ProbeContext {
                location: Some(Location::new(63.41889, 10.40278)),
                network_type: Some("LTE".into()),
                gsm_asu: Some(17),
                ..Default::default()
            },
        };

        let text = snapshot.status_text();
        assert!(text.contains("State: running"));
        assert!(text.contains("Packets: 12 sent, 10 recorded, 9 answered"));
        assert!(text.contains("Location: 63.4189, 10.4028"));
        assert!(text.contains("Network Type: LTE"));
        assert!(text.contains("Signal: 17, -"));
    }

    #[test]
    fn test_session_state_activity() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Running.is_active());
        assert!(SessionState::Draining.is_active());
        assert!(!SessionState::Stopped.is_active());
        assert_eq!(SessionState::default(), SessionState::Idle);
    }
}
