use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Nanosecond-precision time source used for expiration decisions.
///
/// The pool reads the ticker on every cache insert, lookup, and cleanup
/// pass. Tests inject a [`FakeTicker`] through
/// [`PoolBuilder::ticker`](crate::PoolBuilder::ticker) to drive expiry
/// deterministically.
pub trait Ticker: Send + Sync {
	/// Current reading in nanoseconds. Must be monotonically non-decreasing.
	fn read(&self) -> i64;
}

/// Default ticker backed by the monotonic clock.
pub struct SystemTicker {
	origin: Instant,
}

impl SystemTicker {
	pub fn new() -> Self {
		Self {
			origin: Instant::now(),
		}
	}
}

impl Default for SystemTicker {
	fn default() -> Self {
		Self::new()
	}
}

impl Ticker for SystemTicker {
	fn read(&self) -> i64 {
		self.origin.elapsed().as_nanos() as i64
	}
}

/// Manually advanced ticker for deterministic expiration tests.
///
/// Starts at zero and only moves when [`advance`](FakeTicker::advance) is
/// called.
#[derive(Default)]
pub struct FakeTicker {
	nanos: AtomicI64,
}

impl FakeTicker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Advance the clock by `duration`.
	pub fn advance(&self, duration: Duration) {
		self.nanos.fetch_add(duration.as_nanos() as i64, Ordering::Release);
	}
}

impl Ticker for FakeTicker {
	fn read(&self) -> i64 {
		self.nanos.load(Ordering::Acquire)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn system_ticker_is_monotonic() {
		let ticker = SystemTicker::new();
		let first = ticker.read();
		let second = ticker.read();
		assert!(second >= first);
	}

	#[test]
	fn fake_ticker_advances() {
		let ticker = FakeTicker::new();
		assert_eq!(ticker.read(), 0);

		ticker.advance(Duration::from_secs(1));
		assert_eq!(ticker.read(), 1_000_000_000);

		ticker.advance(Duration::from_nanos(5));
		assert_eq!(ticker.read(), 1_000_000_005);
	}
}
