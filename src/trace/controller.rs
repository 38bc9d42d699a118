//! Session lifecycle: `Idle → Running → Draining → Stopped`.
//!
//! Stopping is two-phase. `stop_sending` ends the sender while the receiver
//! keeps correlating replies for probes already in flight; `stop` then ends
//! the receiver and hands out the finished records. Stopping both at once
//! would count every probe sent within one round trip of the stop as lost.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::probe::create_probe_socket;
use crate::state::{
    ContextSource, MeasurementRecord, ProbeId, SessionClock, SessionState, SessionSummary,
    StatusSnapshot,
};
use crate::trace::engine::ProbeEngine;
use crate::trace::listener::ProbeListener;
use crate::trace::receiver::{Receiver, ReceiverConfig, spawn_receiver};
use crate::trace::store::{Correlation, CorrelationStore, SharedStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action} while session is {from}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },
}

/// Listener that turns probe events into measurement records
pub struct Recorder {
    store: SharedStore,
    context: Arc<dyn ContextSource>,
    state: watch::Receiver<SessionState>,
    require_location: bool,
}

impl Recorder {
    pub fn new(
        store: SharedStore,
        context: Arc<dyn ContextSource>,
        state: watch::Receiver<SessionState>,
        require_location: bool,
    ) -> Self {
        Self {
            store,
            context,
            state,
            require_location,
        }
    }
}

impl ProbeListener for Recorder {
    fn on_sent(&self, id: ProbeId, send_time_ms: u64) {
        if *self.state.borrow() != SessionState::Running {
            return;
        }

        let context = self.context.snapshot();
        if context.location.is_none() && self.require_location {
            // Accepted gap: this id stays unmeasured
            debug!(%id, "Location not known, probe not recorded");
            return;
        }

        let record = MeasurementRecord::new(id, send_time_ms, context);
        self.store.insert(id, send_time_ms, record);
    }

    fn on_received(&self, id: ProbeId, reply_time_ms: u64, server_reply_time: i64) {
        match self.store.correlate(id, reply_time_ms, server_reply_time) {
            Correlation::Matched { round_trip_ms } => {
                debug!(%id, rtt_ms = ?round_trip_ms, "Reply correlated");
            }
            Correlation::Unknown => debug!(%id, "Could not find probe for reply"),
            Correlation::Duplicate => debug!(%id, "Duplicate reply ignored"),
        }
    }
}

/// Handles of the loops belonging to the current session
struct ActiveLoops {
    sender_cancel: CancellationToken,
    sender: Option<tokio::task::JoinHandle<Result<()>>>,
    receiver_cancel: CancellationToken,
    receiver: Option<std::thread::JoinHandle<Result<()>>>,
    local_addr: SocketAddr,
}

impl ActiveLoops {
    fn cancel_all(&self) {
        self.sender_cancel.cancel();
        self.receiver_cancel.cancel();
    }
}

/// Owns one measurement session at a time: the store, both probe loops and
/// the lifecycle state
pub struct SessionController {
    config: Config,
    context: Arc<dyn ContextSource>,
    store: SharedStore,
    state: watch::Sender<SessionState>,
    next_id: Arc<AtomicU32>,
    started_at: Option<DateTime<Utc>>,
    loops: Option<ActiveLoops>,
}

impl SessionController {
    pub fn new(config: Config, context: Arc<dyn ContextSource>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            context,
            store: Arc::new(CorrelationStore::new()),
            state,
            next_id: Arc::new(AtomicU32::new(0)),
            started_at: None,
            loops: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The session's correlation store (read access for status display)
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Local address probes are sent from, while a session is active
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.loops.as_ref().map(|l| l.local_addr)
    }

    /// Probe ids allocated in the current (or last) session
    pub fn sent(&self) -> u32 {
        self.next_id.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            sent: self.sent(),
            records: self.store.len(),
            answered: self.store.answered(),
            context: self.context.snapshot(),
        }
    }

    fn transition_error(&self, action: &'static str) -> anyhow::Error {
        SessionError::InvalidTransition {
            from: self.state(),
            action,
        }
        .into()
    }

    /// Start a fresh session. Must be called within a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state(), SessionState::Idle | SessionState::Stopped) {
            return Err(self.transition_error("start"));
        }

        self.store.clear();
        self.next_id = Arc::new(AtomicU32::new(0));
        let clock = SessionClock::start();

        // Receive socket is bound before the sender exists
        let socket = create_probe_socket(self.config.probe_addr.is_ipv6(), self.config.local_port)?;
        let send_socket = socket
            .try_clone()
            .context("Failed to clone probe socket for sending")?;
        let local_addr = socket.local_addr()?;

        self.context.attach();
        self.state.send_replace(SessionState::Running);

        let listener: Arc<dyn ProbeListener> = Arc::new(Recorder::new(
            self.store.clone(),
            self.context.clone(),
            self.state.subscribe(),
            self.config.require_location,
        ));

        let receiver_cancel = CancellationToken::new();
        let receiver = spawn_receiver(Receiver::new(
            socket,
            listener.clone(),
            clock,
            receiver_cancel.clone(),
            ReceiverConfig {
                packet_size: self.config.packet_size,
                workers: self.config.decode_workers,
                queue_capacity: self.config.decode_queue,
            },
        ));

        let sender_cancel = CancellationToken::new();
        let engine = ProbeEngine::new(
            &self.config,
            send_socket,
            listener,
            clock,
            self.next_id.clone(),
            sender_cancel.clone(),
        );
        let sender = tokio::spawn(engine.run());

        self.loops = Some(ActiveLoops {
            sender_cancel,
            sender: Some(sender),
            receiver_cancel,
            receiver: Some(receiver),
            local_addr,
        });
        self.started_at = Some(Utc::now());

        info!(
            dest = %self.config.probe_addr,
            local = %local_addr,
            "Session started"
        );
        Ok(())
    }

    /// Stop emitting probes; replies keep being correlated
    pub async fn stop_sending(&mut self) -> Result<()> {
        if self.state() != SessionState::Running {
            return Err(self.transition_error("stop sending"));
        }

        if let Some(loops) = self.loops.as_mut() {
            loops.sender_cancel.cancel();
            if let Some(handle) = loops.sender.take() {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Sender exited with error"),
                    Err(e) => warn!(error = %e, "Sender task failed"),
                }
            }
        }

        self.state.send_replace(SessionState::Draining);
        info!(sent = self.sent(), "Sending stopped, draining replies");
        Ok(())
    }

    /// End the session and return its records. Stops sending first if that
    /// has not happened yet (no drain window in that case).
    pub async fn stop(&mut self) -> Result<SessionSummary> {
        match self.state() {
            SessionState::Running => self.stop_sending().await?,
            SessionState::Draining => {}
            _ => return Err(self.transition_error("stop")),
        }

        if let Some(mut loops) = self.loops.take() {
            loops.receiver_cancel.cancel();
            if let Some(handle) = loops.receiver.take() {
                // Join off the async workers; the receiver wakes within one poll interval
                match tokio::task::spawn_blocking(move || handle.join()).await {
                    Ok(Ok(Ok(()))) => {}
                    Ok(Ok(Err(e))) => warn!(error = %e, "Receiver exited with error"),
                    Ok(Err(_)) => warn!("Receiver thread panicked"),
                    Err(e) => warn!(error = %e, "Failed to join receiver"),
                }
            }
        }

        self.context.detach();
        let records = self.store.take_records();
        self.state.send_replace(SessionState::Stopped);

        let summary = SessionSummary {
            started_at: self.started_at.unwrap_or_else(Utc::now),
            finished_at: Utc::now(),
            sent: self.sent(),
            records,
        };
        info!(
            sent = summary.sent,
            records = summary.records.len(),
            answered = summary.answered(),
            "Session stopped"
        );
        Ok(summary)
    }

    /// Two-phase stop with a drain window between the phases
    pub async fn shutdown(&mut self, drain: Duration) -> Result<SessionSummary> {
        if self.state() == SessionState::Running {
            self.stop_sending().await?;
            tokio::time::sleep(drain).await;
        }
        self.stop().await
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Never leave loops running behind a dropped controller
        if let Some(loops) = &self.loops {
            loops.cancel_all();
        }
    }
}
