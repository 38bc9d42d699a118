use anyhow::Result;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::probe::{ReplySocket, is_poll_timeout};
use crate::state::SessionClock;
use crate::trace::listener::ProbeListener;
use crate::trace::workers::{Datagram, DecodePool, DispatchError, panic_message};

/// Configuration for the reply receiver
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Expected reply length; longer datagrams are truncated to it
    pub packet_size: usize,
    /// Decode worker threads
    pub workers: usize,
    /// Datagrams that may wait for a worker before new ones are dropped
    pub queue_capacity: usize,
}

/// Within a run of receive errors, only every Nth one is logged
const ERROR_LOG_EVERY: u32 = 50;

/// Pause after a receive error so a persistent failure cannot spin the thread
const ERROR_BACKOFF: Duration = Duration::from_millis(5);

/// The receiver blocks on the probe socket and hands replies to decode workers.
///
/// Receive errors never end the loop: an unreachable echo endpoint can make
/// reads fail for a while (ICMP port-unreachable surfaces as a reset on some
/// platforms) and replies must be picked up again once the path recovers.
/// Only cancellation stops it.
pub struct Receiver<S = UdpSocket> {
    socket: S,
    listener: Arc<dyn ProbeListener>,
    clock: SessionClock,
    cancel: CancellationToken,
    config: ReceiverConfig,
    consecutive_errors: u32,
}

impl<S: ReplySocket> Receiver<S> {
    pub fn new(
        socket: S,
        listener: Arc<dyn ProbeListener>,
        clock: SessionClock,
        cancel: CancellationToken,
        config: ReceiverConfig,
    ) -> Self {
        Self {
            socket,
            listener,
            clock,
            cancel,
            config,
            consecutive_errors: 0,
        }
    }

    /// Run the receiver on a dedicated thread (blocking I/O).
    ///
    /// Returns once cancelled, after every queued datagram has been handled.
    pub fn run_blocking(mut self) -> Result<()> {
        let pool = DecodePool::new(
            self.config.workers,
            self.config.queue_capacity,
            self.listener.clone(),
        )?;

        // One spare byte so oversize replies are visible as such
        let mut buffer = vec![0u8; self.config.packet_size + 1];
        let mut dropped: u64 = 0;

        info!(workers = self.config.workers, "Receiver started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.socket.recv_reply(&mut buffer) {
                Ok((len, source)) => {
                    // Timestamp before anything else touches the packet
                    let received_at_ms = self.clock.now_ms();
                    self.note_recovery();

                    let len = len.min(self.config.packet_size);
                    let datagram = Datagram {
                        data: buffer[..len].to_vec(),
                        received_at_ms,
                    };

                    match pool.dispatch(datagram) {
                        Ok(()) => {}
                        Err(DispatchError::Full) => {
                            dropped += 1;
                            warn!(%source, dropped, "Decode queue full, dropping reply");
                        }
                        Err(DispatchError::Closed) => break,
                    }
                }
                Err(e) if is_poll_timeout(&e) => {
                    // Normal idle poll
                    self.note_recovery();
                }
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        // Socket torn down during stop; not a failure
                        break;
                    }

                    self.consecutive_errors += 1;
                    if self.consecutive_errors == 1
                        || self.consecutive_errors % ERROR_LOG_EVERY == 0
                    {
                        warn!(
                            error = %e,
                            count = self.consecutive_errors,
                            "Receive error, still listening"
                        );
                    }
                    std::thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        // Finish in-flight decode work before the controller reads the store
        pool.shutdown();
        debug!(dropped, "Receiver stopped");
        Ok(())
    }

    fn note_recovery(&mut self) {
        if self.consecutive_errors > 0 {
            info!(errors = self.consecutive_errors, "Receive recovered");
            self.consecutive_errors = 0;
        }
    }
}

/// Spawn the receiver on a dedicated OS thread
pub fn spawn_receiver<S: ReplySocket + 'static>(
    receiver: Receiver<S>,
) -> std::thread::JoinHandle<Result<()>> {
    std::thread::spawn(move || {
        // Catch panics and convert to error with details
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| receiver.run_blocking())) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "Receiver panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    })
}
