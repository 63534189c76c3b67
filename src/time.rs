//! Wall-clock bounds for busy-polling loops
//!
//! The driver never sleeps; every wait is a spin on a register. The only
//! notion of time it needs is a monotonic microsecond counter supplied by
//! the platform, which [`Timeout`] turns into a deadline.

/// Monotonic time source provided by the platform
pub trait Timer {
    /// Microseconds since an arbitrary, fixed origin
    fn now_us(&self) -> u64;

    /// Busy-wait for at least `us` microseconds
    fn delay_us(&self, us: u64) {
        let deadline = self.now_us().saturating_add(us);
        while self.now_us() < deadline {
            core::hint::spin_loop();
        }
    }
}

impl<T: Timer + ?Sized> Timer for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, us: u64) {
        (**self).delay_us(us)
    }
}

/// A deadline on a [`Timer`]
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    deadline_us: u64,
}

impl Timeout {
    /// Deadline `ms` milliseconds from now
    pub fn from_ms<T: Timer + ?Sized>(timer: &T, ms: u64) -> Self {
        Self {
            deadline_us: timer.now_us().saturating_add(ms.saturating_mul(1000)),
        }
    }

    /// Whether the deadline has passed
    pub fn is_expired<T: Timer + ?Sized>(&self, timer: &T) -> bool {
        timer.now_us() > self.deadline_us
    }
}
