use anyhow::Result;
use std::io::Write;

use crate::state::SessionSummary;

/// Export a finished session (including every record) as pretty JSON
pub fn export_json<W: Write>(summary: &SessionSummary, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MeasurementRecord, ProbeContext, ProbeId};
    use chrono::Utc;

    #[test]
    fn test_export_json_contains_records() {
        let mut answered = MeasurementRecord::new(ProbeId(0), 0, ProbeContext::default());
        answered.apply_reply(30, 5, Some(30));
        let summary = SessionSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            sent: 2,
            records: vec![
                answered,
                MeasurementRecord::new(ProbeId(1), 250, ProbeContext::default()),
            ],
        };

        let mut buf = Vec::new();
        export_json(&summary, &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        assert_eq!(value["sent"], 2);
        assert_eq!(value["records"][0]["round_trip_time_ms"], 30);
        assert!(value["records"][1]["round_trip_time_ms"].is_null());
    }
}
