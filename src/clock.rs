/// Time base for every bit-timed operation.
///
/// Timing is expressed as absolute deadlines on a monotonic microsecond
/// counter instead of chained busy-wait delays, so the time spent between
/// two waits (GPIO access, SPI register pokes) does not stretch a bit.
pub trait BitClock {
    /// Microseconds since an arbitrary, fixed epoch.
    fn now_us(&mut self) -> u64;

    /// Busy-wait until `now_us() >= deadline_us`.
    fn spin_until(&mut self, deadline_us: u64) {
        while self.now_us() < deadline_us {}
    }

    /// Busy-wait for `us` microseconds from now.
    fn spin_for(&mut self, us: u64) {
        let deadline = self.now_us() + us;
        self.spin_until(deadline);
    }

    /// Deadline `us` from now, or none when `us` is `None`.
    fn deadline_after(&mut self, us: Option<u64>) -> Option<u64> {
        us.map(|us| self.now_us() + us)
    }
}
