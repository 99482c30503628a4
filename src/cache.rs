use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ahash::RandomState;
use crossbeam_queue::SegQueue;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::key::ResourceKey;
use crate::time::Ticker;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemovalCause {
	/// `invalidate` / `invalidate_all`.
	Explicit,
	/// Evicted to satisfy the size or weight bound.
	Capacity,
	/// Aged out by `expire_after_access` or `expire_after_write`.
	Expired,
}

/// A removal awaiting processing by the pool.
///
/// Removals are never acted upon while the cache lock is held; they are
/// queued here and drained by the pool after the mutating call returns, on
/// whichever thread performed it.
pub(crate) struct Removal<K, R> {
	pub key: Arc<ResourceKey<K, R>>,
	pub resource: Arc<R>,
	pub cause: RemovalCause,
}

/// Capacity and expiration policy, assembled by the builder.
pub(crate) struct CachePolicy {
	pub maximum_size: Option<u64>,
	pub maximum_weight: Option<u64>,
	pub expire_after_access: Option<Duration>,
	pub expire_after_write: Option<Duration>,
}

struct CacheEntry<R> {
	resource: Arc<R>,
	weight: u64,
	written_at: i64,
	accessed_at: i64,
}

struct CacheState<K, R> {
	/// Insertion order doubles as the recency order: lookups move the entry
	/// to the back, so index 0 is always the eviction candidate.
	entries: IndexMap<Arc<ResourceKey<K, R>>, CacheEntry<R>, RandomState>,
	total_weight: u64,
}

/// Weighted, expiring store of `ResourceKey -> Arc<R>`.
///
/// One entry per physical resource, keyed by `ResourceKey` identity. The
/// cache is oblivious to key status: it evicts idle and in-flight entries
/// alike and reports every removal through the notification queue.
pub(crate) struct ResourceCache<K, R> {
	state: Mutex<CacheState<K, R>>,
	pending: SegQueue<Removal<K, R>>,
	ticker: Arc<dyn Ticker>,
	policy: CachePolicy,
	entry_count: AtomicUsize,
}

impl<K, R> ResourceCache<K, R> {
	pub(crate) fn new(policy: CachePolicy, ticker: Arc<dyn Ticker>) -> Self {
		Self {
			state: Mutex::new(CacheState {
				entries: IndexMap::with_hasher(RandomState::new()),
				total_weight: 0,
			}),
			pending: SegQueue::new(),
			ticker,
			policy,
			entry_count: AtomicUsize::new(0),
		}
	}

	/// Insert a new entry, evicting from the least recently used end until
	/// the configured bound holds again. The freshly inserted entry is
	/// itself evictable (a zero-capacity cache removes it immediately).
	pub(crate) fn insert(&self, key: Arc<ResourceKey<K, R>>, resource: Arc<R>, weight: u64) {
		let now = self.ticker.read();
		let mut state = self.state.lock();

		let previous = state.entries.insert(
			key,
			CacheEntry {
				resource,
				weight,
				written_at: now,
				accessed_at: now,
			},
		);
		debug_assert!(previous.is_none(), "resource keys are unique per instance");
		state.total_weight += weight;
		self.entry_count.fetch_add(1, Ordering::Relaxed);

		while self.over_capacity(&state) {
			let Some((victim, entry)) = state.entries.shift_remove_index(0) else {
				break;
			};
			state.total_weight -= entry.weight;
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
			self.pending.push(Removal {
				key: victim,
				resource: entry.resource,
				cause: RemovalCause::Capacity,
			});
		}
	}

	/// Look up a resource and refresh its recency. An expired entry is
	/// removed on the spot and reported as a miss.
	pub(crate) fn get(&self, key: &Arc<ResourceKey<K, R>>) -> Option<Arc<R>> {
		let now = self.ticker.read();
		let mut state = self.state.lock();

		let (key, mut entry) = state.entries.shift_remove_entry(key)?;
		if self.is_expired(&entry, now) {
			state.total_weight -= entry.weight;
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
			self.pending.push(Removal {
				key,
				resource: entry.resource,
				cause: RemovalCause::Expired,
			});
			return None;
		}

		entry.accessed_at = now;
		let resource = entry.resource.clone();
		// Re-insert at the back: most recently used.
		state.entries.insert(key, entry);
		Some(resource)
	}

	pub(crate) fn invalidate(&self, key: &Arc<ResourceKey<K, R>>) {
		let mut state = self.state.lock();
		if let Some((key, entry)) = state.entries.shift_remove_entry(key) {
			state.total_weight -= entry.weight;
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
			self.pending.push(Removal {
				key,
				resource: entry.resource,
				cause: RemovalCause::Explicit,
			});
		}
	}

	pub(crate) fn invalidate_all(&self) {
		let mut state = self.state.lock();
		state.total_weight = 0;
		self.entry_count.store(0, Ordering::Relaxed);
		for (key, entry) in state.entries.drain(..) {
			self.pending.push(Removal {
				key,
				resource: entry.resource,
				cause: RemovalCause::Explicit,
			});
		}
	}

	/// Sweep out every expired entry. Both expiration policies require a
	/// full scan since access reordering destroys the write order.
	pub(crate) fn clean_up(&self) {
		let now = self.ticker.read();
		let mut state = self.state.lock();

		let expired: Vec<Arc<ResourceKey<K, R>>> = state
			.entries
			.iter()
			.filter(|(_, entry)| self.is_expired(entry, now))
			.map(|(key, _)| key.clone())
			.collect();

		for key in expired {
			if let Some((key, entry)) = state.entries.shift_remove_entry(&key) {
				state.total_weight -= entry.weight;
				self.entry_count.fetch_sub(1, Ordering::Relaxed);
				self.pending.push(Removal {
					key,
					resource: entry.resource,
					cause: RemovalCause::Expired,
				});
			}
		}
	}

	/// Next removal awaiting processing, if any.
	pub(crate) fn pop_removal(&self) -> Option<Removal<K, R>> {
		self.pending.pop()
	}

	pub(crate) fn len(&self) -> usize {
		self.entry_count.load(Ordering::Relaxed)
	}

	fn over_capacity(&self, state: &CacheState<K, R>) -> bool {
		if let Some(max) = self.policy.maximum_size {
			return state.entries.len() as u64 > max;
		}
		if let Some(max) = self.policy.maximum_weight {
			return state.total_weight > max;
		}
		false
	}

	fn is_expired(&self, entry: &CacheEntry<R>, now: i64) -> bool {
		if let Some(ttl) = self.policy.expire_after_access {
			if now - entry.accessed_at >= ttl.as_nanos() as i64 {
				return true;
			}
		}
		if let Some(ttl) = self.policy.expire_after_write {
			if now - entry.written_at >= ttl.as_nanos() as i64 {
				return true;
			}
		}
		false
	}
}
