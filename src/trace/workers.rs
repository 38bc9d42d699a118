//! Bounded decode worker pool.
//!
//! The receive thread only copies the datagram and its receive time into a
//! bounded queue; a fixed set of workers decode and correlate. A flood of
//! replies fills the queue and gets dropped at the door instead of spawning
//! unbounded work.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

use crate::probe::decode_reply;
use crate::trace::listener::ProbeListener;

/// A received datagram waiting to be decoded
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Vec<u8>,
    /// Session-clock time sampled right after the read returned
    pub received_at_ms: u64,
}

/// Why a datagram could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    Full,
    Closed,
}

pub struct DecodePool {
    tx: Option<Sender<Datagram>>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    /// Start `workers` decode threads sharing a queue of `capacity` datagrams
    pub fn new(workers: usize, capacity: usize, listener: Arc<dyn ProbeListener>) -> Result<Self> {
        let (tx, rx) = bounded::<Datagram>(capacity.max(1));

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let listener = listener.clone();
            let handle = std::thread::Builder::new()
                .name(format!("decode-{}", i))
                .spawn(move || worker_loop(rx, listener))
                .context("Failed to spawn decode worker")?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
        })
    }

    /// Queue a datagram without blocking
    pub fn dispatch(&self, datagram: Datagram) -> Result<(), DispatchError> {
        let Some(tx) = &self.tx else {
            return Err(DispatchError::Closed);
        };
        tx.try_send(datagram).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::Full,
            TrySendError::Disconnected(_) => DispatchError::Closed,
        })
    }

    /// Close the queue and wait until every queued datagram is handled
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        // Dropping the sender ends the workers' iterators once the queue drains
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Decode worker exited abnormally");
            }
        }
    }
}

impl Drop for DecodePool {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

fn worker_loop(rx: Receiver<Datagram>, listener: Arc<dyn ProbeListener>) {
    for datagram in rx.iter() {
        // One bad packet must not take the worker down
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handle_datagram(&datagram, listener.as_ref())
        }));
        if let Err(payload) = outcome {
            error!(panic = %panic_message(payload.as_ref()), "Decode task panicked");
        }
    }
}

fn handle_datagram(datagram: &Datagram, listener: &dyn ProbeListener) {
    match decode_reply(&datagram.data) {
        Ok(reply) => listener.on_received(reply.id, datagram.received_at_ms, reply.server_time),
        Err(e) => debug!(error = %e, "Discarding malformed reply"),
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
