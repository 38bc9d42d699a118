use crate::state::ProbeId;

/// Callbacks from the probe loops to whatever owns the correlation store.
///
/// `on_sent` is called from the sender task, `on_received` from receive
/// workers, possibly concurrently. Times are session-clock milliseconds.
pub trait ProbeListener: Send + Sync {
    /// A probe id was allocated and is about to be transmitted
    fn on_sent(&self, id: ProbeId, send_time_ms: u64);

    /// A reply for `id` arrived at `reply_time_ms`
    fn on_received(&self, id: ProbeId, reply_time_ms: u64, server_reply_time: i64);
}
