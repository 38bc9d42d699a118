use anyhow::Result;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::probe::{build_probe, send_probe};
use crate::state::{ProbeId, SessionClock};
use crate::trace::listener::ProbeListener;

/// The probe engine sends one probe per interval to the echo endpoint
pub struct ProbeEngine {
    dest: SocketAddr,
    packet_size: usize,
    initial_delay: Duration,
    interval: Duration,
    socket: UdpSocket,
    listener: Arc<dyn ProbeListener>,
    clock: SessionClock,
    next_id: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl ProbeEngine {
    pub fn new(
        config: &Config,
        socket: UdpSocket,
        listener: Arc<dyn ProbeListener>,
        clock: SessionClock,
        next_id: Arc<AtomicU32>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dest: config.probe_addr,
            packet_size: config.packet_size,
            initial_delay: config.initial_delay,
            interval: config.interval,
            socket,
            listener,
            clock,
            next_id,
            cancel,
        }
    }

    /// Run until cancelled. The first probe goes out after the initial delay
    /// so the receive side is ready for its reply.
    pub async fn run(self) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        info!(dest = %self.dest, interval_ms = self.interval.as_millis() as u64, "Sender started");

        let mut interval = create_probe_interval(self.interval);
        loop {
            tokio::select! {
                // Checked first so no probe is emitted once sending is stopped
                biased;
                _ = self.cancel.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    self.send_next();
                }
            }
        }

        info!(sent = self.next_id.load(Ordering::Acquire), "Sender stopped");
        Ok(())
    }

    /// Allocate the next id, register it, then transmit
    fn send_next(&self) -> ProbeId {
        let id = ProbeId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let payload = build_probe(id, self.packet_size);

        // Register before sending so a fast reply always finds its entry
        let send_time_ms = self.clock.now_ms();
        self.listener.on_sent(id, send_time_ms);

        match send_probe(&self.socket, &payload, self.dest) {
            Ok(_) => debug!(%id, send_time_ms, "Probe sent"),
            // Counts as loss for this id; the loop keeps going
            Err(e) => warn!(%id, error = %e, "Failed to send probe"),
        }

        id
    }
}

/// Fixed-delay probe interval: a late tick pushes the schedule back
/// instead of bursting to catch up
pub fn create_probe_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
