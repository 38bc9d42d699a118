use std::io::Write;

use crate::state::SessionSummary;

/// Generate a text report similar to mtr --report
pub fn generate_report<W: Write>(summary: &SessionSummary, mut writer: W) -> std::io::Result<()> {
    writeln!(
        writer,
        "linkprobe report ({} - {})",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.finished_at.format("%H:%M:%S UTC")
    )?;
    writeln!(writer)?;

    writeln!(
        writer,
        "{:>6} {:>8} {:>8} {:>6} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Sent", "Recorded", "Answered", "Loss%", "Avg", "Min", "Max", "StdDev", "Jitter"
    )?;
    writeln!(writer, "{}", "-".repeat(80))?;

    let stats = summary.rtt_stats();
    let (avg, min, max, stddev, jitter) = if stats.received > 0 {
        (
            format!("{:.1}ms", stats.avg_rtt().as_secs_f64() * 1000.0),
            format!("{:.1}ms", stats.min_rtt.as_secs_f64() * 1000.0),
            format!("{:.1}ms", stats.max_rtt.as_secs_f64() * 1000.0),
            format!("{:.1}ms", stats.stddev().as_secs_f64() * 1000.0),
            format!("{:.1}ms", stats.jitter().as_secs_f64() * 1000.0),
        )
    } else {
        ("-".into(), "-".into(), "-".into(), "-".into(), "-".into())
    };

    writeln!(
        writer,
        "{:>6} {:>8} {:>8} {:>5.1}% {:>8} {:>8} {:>8} {:>8} {:>8}",
        summary.sent,
        summary.records.len(),
        summary.answered(),
        summary.loss_pct(),
        avg,
        min,
        max,
        stddev,
        jitter
    )?;

    // Unmeasured ids: sent while no location was known
    let unrecorded = (summary.sent as usize).saturating_sub(summary.records.len());
    if unrecorded > 0 {
        writeln!(writer)?;
        writeln!(writer, "{} probes sent without a record", unrecorded)?;
    }

    Ok(())
}
