use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence identifier of a single probe, unique within a session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeId(pub u32);

impl ProbeId {
    /// Encode as the 4-byte big-endian wire prefix
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Decode from the 4-byte big-endian wire prefix
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A location fix supplied by the host environment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: Option<f32>,
    /// Ground speed in m/s
    pub speed: Option<f32>,
    /// Bearing in degrees
    pub bearing: Option<f32>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            bearing: None,
        }
    }
}

/// Contextual telemetry captured when a probe is sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeContext {
    pub location: Option<Location>,
    /// Link type label ("WiFi", "LTE", "HSPA", ...)
    pub network_type: Option<String>,
    pub downstream_kbps: Option<u32>,
    pub upstream_kbps: Option<u32>,
    /// GSM signal level (ASU, 0-97)
    pub gsm_asu: Option<u8>,
    /// LTE signal level (ASU, 0-97)
    pub lte_asu: Option<u8>,
}

/// Full context and outcome of one probe.
///
/// Context fields are fixed at construction. The reply outcome can only be
/// written through [`MeasurementRecord::apply_reply`], which accepts the
/// first reply and ignores any later one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub packet_id: ProbeId,
    /// Wall-clock time the record was created (informational)
    pub recorded_at: DateTime<Utc>,
    /// Send time on the session clock (ms)
    pub send_time_ms: u64,
    pub context: ProbeContext,

    reply_time_ms: Option<u64>,
    server_reply_time: Option<i64>,
    round_trip_time_ms: Option<u32>,
}

impl MeasurementRecord {
    pub fn new(packet_id: ProbeId, send_time_ms: u64, context: ProbeContext) -> Self {
        Self {
            packet_id,
            recorded_at: Utc::now(),
            send_time_ms,
            context,
            reply_time_ms: None,
            server_reply_time: None,
            round_trip_time_ms: None,
        }
    }

    /// Receive time of the matching reply on the session clock (ms)
    pub fn reply_time_ms(&self) -> Option<u64> {
        self.reply_time_ms
    }

    /// Reply-processing time reported by the echo endpoint (its own clock)
    pub fn server_reply_time(&self) -> Option<i64> {
        self.server_reply_time
    }

    /// Round trip in milliseconds; absent means no reply (yet)
    pub fn round_trip_time_ms(&self) -> Option<u32> {
        self.round_trip_time_ms
    }

    /// True once a reply has been correlated to this record
    pub fn is_answered(&self) -> bool {
        self.reply_time_ms.is_some()
    }

    /// Write the reply outcome. Returns false (and changes nothing) if an
    /// outcome was already applied.
    pub fn apply_reply(
        &mut self,
        reply_time_ms: u64,
        server_reply_time: i64,
        round_trip_time_ms: Option<u32>,
    ) -> bool {
        if self.is_answered() {
            return false;
        }
        self.reply_time_ms = Some(reply_time_ms);
        self.server_reply_time = Some(server_reply_time);
        self.round_trip_time_ms = round_trip_time_ms;
        true
    }
}
