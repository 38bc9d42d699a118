//! External context feed.
//!
//! Location, link type, bandwidth and radio signal levels come from the host
//! environment. The probe engine only reads a snapshot of them when a probe
//! is sent; everything here is the seam between the engine and whatever
//! supplies those values.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::record::{Location, ProbeContext};

/// Raw signal reading meaning "unavailable"
pub const ASU_UNAVAILABLE: i32 = 99;

/// Highest valid signal level on the ASU scale
pub const ASU_MAX: i32 = 97;

/// Normalize a raw ASU reading. The sentinel and out-of-range values map to None.
pub fn asu_level(raw: i32) -> Option<u8> {
    if raw == ASU_UNAVAILABLE || !(0..=ASU_MAX).contains(&raw) {
        None
    } else {
        Some(raw as u8)
    }
}

/// Source of the contextual telemetry attached to each probe
pub trait ContextSource: Send + Sync {
    /// Current best-known context
    fn snapshot(&self) -> ProbeContext;

    /// Start accepting updates (session start)
    fn attach(&self) {}

    /// Stop accepting updates (session stop)
    fn detach(&self) {}
}

/// In-process context store fed by host glue or CLI flags
#[derive(Debug, Default)]
pub struct SharedContext {
    current: RwLock<ProbeContext>,
    attached: AtomicBool,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context with fixed values that is always attached
    pub fn fixed(context: ProbeContext) -> Self {
        Self {
            current: RwLock::new(context),
            attached: AtomicBool::new(true),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Replace the last known location fix
    pub fn set_location(&self, location: Option<Location>) {
        if !self.is_attached() {
            return;
        }
        self.current.write().location = location;
    }

    /// Update link type and bandwidth estimates
    pub fn set_network(
        &self,
        network_type: Option<String>,
        downstream_kbps: Option<u32>,
        upstream_kbps: Option<u32>,
    ) {
        if !self.is_attached() {
            return;
        }
        let mut current = self.current.write();
        current.network_type = network_type;
        current.downstream_kbps = downstream_kbps;
        current.upstream_kbps = upstream_kbps;
    }

    /// Record raw GSM/LTE readings. An unavailable reading keeps the last
    /// known level for that radio.
    pub fn record_signal_levels(&self, gsm_raw: Option<i32>, lte_raw: Option<i32>) {
        if !self.is_attached() {
            return;
        }
        let mut current = self.current.write();
        if let Some(level) = gsm_raw.and_then(asu_level) {
            current.gsm_asu = Some(level);
        }
        if let Some(level) = lte_raw.and_then(asu_level) {
            current.lte_asu = Some(level);
        }
    }
}

impl ContextSource for SharedContext {
    fn snapshot(&self) -> ProbeContext {
        self.current.read().clone()
    }

    fn attach(&self) {
        self.attached.store(true, Ordering::Release);
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}
