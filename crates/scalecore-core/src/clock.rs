//! Injectable time source (§9 design note: "inject a clock interface so
//! tests can drive cooldown and ack-timeout deterministically").

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A source of both wall-clock (`DateTime<Utc>`, for timestamps surfaced
/// to operators) and monotonic (`Instant`, for duration math) time.
///
/// Production code uses [`SystemClock`]; tests use a fake that can be
/// advanced under test control without sleeping.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;
    /// Current monotonic instant.
    fn now_instant(&self) -> Instant;
}

/// The real wall-clock/monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_instant(&self) -> Instant {
        Instant::now()
    }
}

/// A shared, dynamically-dispatched clock handle, cheap to clone and pass
/// down through handler/broker/worker construction.
pub type SharedClock = Arc<dyn Clock>;

/// Builds the default production clock handle.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A deterministic test clock. `Instant` cannot be constructed directly
/// in stable Rust, so this anchors all monotonic reads to the instant the
/// fake was created and tracks an explicit offset on top of it.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::{Clock, DateTime, Duration, Instant, Utc};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// A fake clock that only advances when told to.
    pub struct FakeClock {
        anchor: Instant,
        utc_anchor: DateTime<Utc>,
        offset: Mutex<Duration>,
    }

    impl FakeClock {
        /// Creates a fake clock anchored at the real current time.
        #[must_use]
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                anchor: Instant::now(),
                utc_anchor: Utc::now(),
                offset: Mutex::new(Duration::ZERO),
            })
        }

        /// Advances both the wall-clock and monotonic view by `d`.
        pub fn advance(&self, d: Duration) {
            *self.offset.lock() += d;
        }
    }

    impl Clock for FakeClock {
        fn now_utc(&self) -> DateTime<Utc> {
            self.utc_anchor + chrono::Duration::from_std(*self.offset.lock()).unwrap_or_default()
        }

        fn now_instant(&self) -> Instant {
            self.anchor + *self.offset.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeClock;
    use super::*;

    #[test]
    fn fake_clock_advances_on_command() {
        let clock = FakeClock::new();
        let t0 = clock.now_instant();
        clock.advance(Duration::from_secs(5));
        let t1 = clock.now_instant();
        assert_eq!(t1 - t0, Duration::from_secs(5));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let t0 = clock.now_instant();
        std::thread::sleep(Duration::from_millis(1));
        assert!(clock.now_instant() >= t0);
    }
}
