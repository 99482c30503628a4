use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counters, bumped on the hot paths with relaxed ordering.
#[derive(Default)]
pub(crate) struct StatsCounters {
	pub created: AtomicU64,
	pub borrows: AtomicU64,
	pub releases: AtomicU64,
	pub removals: AtomicU64,
	pub hits: AtomicU64,
	pub misses: AtomicU64,
	pub handoffs: AtomicU64,
}

impl StatsCounters {
	pub(crate) fn snapshot(&self) -> PoolStats {
		PoolStats {
			created: self.created.load(Ordering::Relaxed),
			borrows: self.borrows.load(Ordering::Relaxed),
			releases: self.releases.load(Ordering::Relaxed),
			removals: self.removals.load(Ordering::Relaxed),
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			handoffs: self.handoffs.load(Ordering::Relaxed),
		}
	}
}

/// Point-in-time snapshot of pool activity.
///
/// Counters are maintained with relaxed atomics: a snapshot taken during
/// concurrent activity is approximate, one taken at quiescence is exact.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
	/// Resources constructed by the loader.
	pub created: u64,
	/// Successful borrows, including handoff takeovers.
	pub borrows: u64,
	/// Releases and invalidations of live handles.
	pub releases: u64,
	/// Resources removed for good (evicted, expired, or invalidated).
	pub removals: u64,
	/// Borrows served from an idle pooled resource.
	pub hits: u64,
	/// Borrows that had to construct a new resource.
	pub misses: u64,
	/// Borrows served by direct transfer from a timed release.
	pub handoffs: u64,
}

impl PoolStats {
	/// Fraction of borrows served without constructing a resource.
	pub fn hit_rate(&self) -> f64 {
		if self.borrows == 0 {
			0.0
		} else {
			(self.hits + self.handoffs) as f64 / self.borrows as f64
		}
	}

	/// Handles currently outstanding (borrowed but not yet released).
	pub fn outstanding(&self) -> u64 {
		self.borrows.saturating_sub(self.releases)
	}
}
