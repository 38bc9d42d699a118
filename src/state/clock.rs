use std::time::Instant;

/// Monotonic millisecond clock anchored at session start.
///
/// Send and reply times share this clock so their difference is a true
/// round trip. Cloning keeps the same origin.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the session started
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SessionClock::start();
        let a = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a + 5);
    }

    #[test]
    fn test_clone_shares_origin() {
        let clock = SessionClock::start();
        std::thread::sleep(Duration::from_millis(3));
        let copy = clock;
        assert!(copy.now_ms() >= 3);
    }
}
