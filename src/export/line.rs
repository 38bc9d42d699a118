use std::fmt::Display;

use crate::state::MeasurementRecord;

/// Column order of [`record_line`]
pub const RECORD_COLUMNS: [&str; 16] = [
    "packet_id",
    "recorded_at",
    "send_time_ms",
    "reply_time_ms",
    "server_reply_time",
    "round_trip_time_ms",
    "latitude",
    "longitude",
    "accuracy",
    "speed",
    "bearing",
    "network_type",
    "downstream_kbps",
    "upstream_kbps",
    "gsm_asu",
    "lte_asu",
];

/// Header line naming each column
pub fn header_line() -> String {
    RECORD_COLUMNS.join(",")
}

/// One record as a fixed-arity comma-separated line.
/// Absent values are written as `null`.
pub fn record_line(record: &MeasurementRecord) -> String {
    let ctx = &record.context;
    let location = ctx.location.as_ref();

    let fields = [
        record.packet_id.to_string(),
        record.recorded_at.to_rfc3339(),
        record.send_time_ms.to_string(),
        opt(record.reply_time_ms()),
        opt(record.server_reply_time()),
        opt(record.round_trip_time_ms()),
        opt(location.map(|l| l.latitude)),
        opt(location.map(|l| l.longitude)),
        opt(location.and_then(|l| l.accuracy)),
        opt(location.and_then(|l| l.speed)),
        opt(location.and_then(|l| l.bearing)),
        ctx.network_type
            .as_deref()
            .map(escape_csv)
            .unwrap_or_else(|| "null".to_string()),
        opt(ctx.downstream_kbps),
        opt(ctx.upstream_kbps),
        opt(ctx.gsm_asu),
        opt(ctx.lte_asu),
    ];
    fields.join(",")
}

/// Lines for a whole record set, in order
pub fn record_lines(records: &[MeasurementRecord]) -> Vec<String> {
    records.iter().map(record_line).collect()
}

fn opt<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

/// Escape a string for CSV (quote if contains comma, quote, or newline).
/// A literal `null` is quoted too so it never reads as an absent value.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s == "null" {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Location, ProbeContext, ProbeId};

    #[test]
    fn test_unanswered_record_without_context() {
        let record = MeasurementRecord::new(ProbeId(7), 1_850, ProbeContext::default());
        let line = record_line(&record);
        let fields: Vec<&str> = line.split(',').collect();

        assert_eq!(fields.len(), RECORD_COLUMNS.len());
        assert_eq!(fields[0], "7");
        assert_eq!(fields[2], "1850");
        assert!(fields[3..].iter().all(|f| *f == "null"));
    }

    #[test]
    fn test_answered_record_with_context() {
        let mut location = Location::new(59.91, 10.75);
        location.accuracy = Some(12.5);
        let context = ProbeContext {
            location: Some(location),
            network_type: Some("LTE".into()),
            downstream_kbps: Some(20_000),
            upstream_kbps: Some(5_000),
            gsm_asu: None,
            lte_asu: Some(40),
        };
        let mut record = MeasurementRecord::new(ProbeId(0), 100, context);
        record.apply_reply(145, 9_000, Some(45));

        let line = record_line(&record);
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), RECORD_COLUMNS.len());
        assert_eq!(&fields[3..], &[
            "145", "9000", "45", "59.91", "10.75", "12.5", "null", "null", "LTE", "20000",
            "5000", "null", "40"
        ]);
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("WiFi"), "WiFi");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("null"), "\"null\"");
        assert_eq!(escape_csv("nullable"), "nullable");
    }

    #[test]
    fn test_network_type_named_null_is_distinct_from_absent() {
        let context = ProbeContext {
            network_type: Some("null".into()),
            ..Default::default()
        };
        let named = record_line(&MeasurementRecord::new(ProbeId(0), 0, context));
        let absent = record_line(&MeasurementRecord::new(ProbeId(0), 0, ProbeContext::default()));

        let column = RECORD_COLUMNS.iter().position(|c| *c == "network_type").unwrap();
        assert_eq!(named.split(',').nth(column), Some("\"null\""));
        assert_eq!(absent.split(',').nth(column), Some("null"));
    }

    #[test]
    fn test_header_matches_columns() {
        assert_eq!(header_line().split(',').count(), RECORD_COLUMNS.len());
        assert!(header_line().starts_with("packet_id,recorded_at"));
    }
}
