use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::builder::PoolBuilder;
use crate::cache::{Removal, ResourceCache};
use crate::error::PoolError;
use crate::handle::Handle;
use crate::key::{ResourceKey, Status};
use crate::queues::{HandoffOutcome, TransferQueue, TransferQueues};
use crate::stats::{PoolStats, StatsCounters};
use crate::traits::{CategoryKey, ResourceLifecycle, ResourceLoader, Weigher};

/// A keyed object pool backed by a single weighted, expiring cache.
///
/// Callers [`borrow`](MultiwayPool::borrow) a resource for a category, use
/// it exclusively through the returned [`Handle`], and release it; released
/// resources become available to later borrowers of the same category.
/// Because all resources live in one cache, the capacity and expiration
/// bounds apply uniformly across categories rather than per key.
///
/// The pool is cheap to clone (it is a reference) and safe to share across
/// threads:
///
/// ```
/// use multiway_pool::{BoxError, PoolBuilder};
///
/// let pool = PoolBuilder::new()
/// 	.maximum_size(32)
/// 	.build(|shard: &u32| -> Result<String, BoxError> {
/// 		Ok(format!("session-{shard}"))
/// 	});
///
/// let mut handle = pool.borrow(7)?;
/// assert_eq!(handle.get()?, "session-7");
/// handle.release();
///
/// // The released session is reused, not reconstructed.
/// let again = pool.borrow(7)?;
/// assert_eq!(again.get()?, "session-7");
/// assert_eq!(pool.stats().created, 1);
/// # Ok::<(), multiway_pool::PoolError>(())
/// ```
pub struct MultiwayPool<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	inner: Arc<PoolInner<K, R>>,
}

impl<K, R> Clone for MultiwayPool<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<K, R> MultiwayPool<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	/// Equivalent to [`PoolBuilder::new`].
	pub fn builder() -> PoolBuilder<K, R> {
		PoolBuilder::new()
	}

	pub(crate) fn from_inner(inner: PoolInner<K, R>) -> Self {
		Self {
			inner: Arc::new(inner),
		}
	}

	/// Borrow a resource for `category`.
	///
	/// Serves, in order: a resource published by a concurrent timed release
	/// of the same category, an idle pooled resource, or a newly loaded
	/// one. Never blocks waiting for a resource; the only error is a loader
	/// failure, which leaves the pool untouched.
	pub fn borrow(&self, category: K) -> Result<Handle<K, R>, PoolError> {
		PoolInner::borrow(&self.inner, category)
	}

	/// Number of resources currently cached (idle and in-flight).
	pub fn size(&self) -> u64 {
		self.inner.cache.len() as u64
	}

	/// Synchronously drain pending expiration and eviction work, then
	/// discard empty unreferenced transfer queues.
	///
	/// With an injected [`Ticker`](crate::Ticker) this makes expiry
	/// deterministic: advance the ticker, call `clean_up`, observe the
	/// removals.
	pub fn clean_up(&self) {
		self.inner.cache.clean_up();
		self.inner.drain_removals();
		self.inner.queues.prune();
	}

	/// Evict every cached resource. In-flight resources are retired and
	/// finish their terminal cleanup when their handles release.
	pub fn invalidate_all(&self) {
		self.inner.cache.invalidate_all();
		self.inner.drain_removals();
	}

	/// Counter snapshot of pool activity.
	pub fn stats(&self) -> PoolStats {
		self.inner.stats.snapshot()
	}
}

pub(crate) struct PoolInner<K, R> {
	pub(crate) cache: ResourceCache<K, R>,
	pub(crate) queues: TransferQueues<K, R>,
	pub(crate) loader: Box<dyn ResourceLoader<K, R>>,
	pub(crate) lifecycle: Arc<dyn ResourceLifecycle<K, R>>,
	pub(crate) weigher: Option<Arc<dyn Weigher<K, R>>>,
	pub(crate) stats: StatsCounters,
}

impl<K, R> PoolInner<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	pub(crate) fn borrow(this: &Arc<Self>, category: K) -> Result<Handle<K, R>, PoolError> {
		let queue = this.queues.get_or_create(&category);

		// A timed release parked on this category hands its resource over
		// directly; the key keeps its InFlight status.
		if let Some((key, resource)) = queue.try_claim() {
			this.stats.handoffs.fetch_add(1, Ordering::Relaxed);
			this.stats.borrows.fetch_add(1, Ordering::Relaxed);
			this.guard_hook("on_borrow", || this.lifecycle.on_borrow(&category, &resource));
			return Ok(Handle::new(this.clone(), queue, key, resource));
		}

		while let Some(key) = queue.poll_idle() {
			if !key.transition(Status::Idle, Status::InFlight) {
				// Eviction retired the key after it was queued.
				continue;
			}
			if let Some(resource) = this.cache.get(&key) {
				this.stats.hits.fetch_add(1, Ordering::Relaxed);
				this.stats.borrows.fetch_add(1, Ordering::Relaxed);
				this.guard_hook("on_borrow", || this.lifecycle.on_borrow(&category, &resource));
				return Ok(Handle::new(this.clone(), queue, key, resource));
			}
			// The entry vanished (expired, or evicted on another thread)
			// between dequeue and lookup. Either this thread reaches Dead
			// first and the pending removal fires the hook, or the evictor
			// already retired the key and left the resource parked for the
			// terminal path here.
			if !key.transition(Status::InFlight, Status::Dead) {
				this.complete_retired(&key);
			}
			this.drain_removals();
		}

		let resource = this.loader.load(&category).map_err(PoolError::Loader)?;
		let resource = Arc::new(resource);
		let weight = this.weight_of(&category, &resource);
		let key = Arc::new(ResourceKey::new(category, Status::InFlight));
		this.cache.insert(key.clone(), resource.clone(), weight);
		this.drain_removals();

		this.stats.created.fetch_add(1, Ordering::Relaxed);
		this.stats.misses.fetch_add(1, Ordering::Relaxed);
		this.stats.borrows.fetch_add(1, Ordering::Relaxed);
		this.guard_hook("on_create", || this.lifecycle.on_create(key.category(), &resource));
		this.guard_hook("on_borrow", || this.lifecycle.on_borrow(key.category(), &resource));
		Ok(Handle::new(this.clone(), queue, key, resource))
	}

	pub(crate) fn release(
		&self,
		key: &Arc<ResourceKey<K, R>>,
		resource: &Arc<R>,
		queue: &TransferQueue<K, R>,
	) {
		self.stats.releases.fetch_add(1, Ordering::Relaxed);
		self.recycle(key, resource, queue, true);
	}

	/// Timed release: publish the still-in-flight key for direct transfer
	/// and block until a borrower claims it, a later timed release displaces
	/// it, or `delay` elapses. The unclaimed outcomes fall back to the
	/// normal release path.
	pub(crate) fn release_after(
		&self,
		key: &Arc<ResourceKey<K, R>>,
		resource: &Arc<R>,
		queue: &Arc<TransferQueue<K, R>>,
		delay: Duration,
	) {
		self.stats.releases.fetch_add(1, Ordering::Relaxed);
		// The release hook fires at publication: however the window
		// resolves, this borrow/release pair is complete.
		self.guard_hook("on_release", || self.lifecycle.on_release(key.category(), resource));
		let token = queue.publish_handoff(key.clone(), resource.clone());
		match queue.await_handoff(&token, delay) {
			HandoffOutcome::Claimed => {}
			HandoffOutcome::Displaced | HandoffOutcome::Expired => {
				self.recycle(key, resource, queue, false);
			}
		}
	}

	pub(crate) fn invalidate(&self, key: &Arc<ResourceKey<K, R>>, resource: &Arc<R>) {
		self.stats.releases.fetch_add(1, Ordering::Relaxed);
		// Release precedes removal in the hook order, so fire it before any
		// transition makes the key eligible for removal processing.
		self.guard_hook("on_release", || self.lifecycle.on_release(key.category(), resource));
		self.cache.invalidate(key);
		self.drain_removals();
		loop {
			if key.transition(Status::InFlight, Status::Dead)
				|| key.transition(Status::Retired, Status::Dead)
			{
				break;
			}
			if key.status() == Status::Dead {
				panic!("resource key {} invalidated twice", key.id());
			}
		}
		self.fire_removal(key, resource);
	}

	/// Return a key to circulation, or complete the terminal path if the
	/// cache evicted it while it was out.
	///
	/// The release hook fires before the CAS: while the key is still
	/// `InFlight` the eviction listener defers to this thread, so the
	/// removal hook cannot jump ahead of the release hook.
	fn recycle(
		&self,
		key: &Arc<ResourceKey<K, R>>,
		resource: &Arc<R>,
		queue: &TransferQueue<K, R>,
		fire_release: bool,
	) {
		if fire_release {
			self.guard_hook("on_release", || self.lifecycle.on_release(key.category(), resource));
		}
		if key.transition(Status::InFlight, Status::Idle) {
			queue.push_idle(key.clone());
			return;
		}
		match key.status() {
			Status::Retired => {
				if key.transition(Status::Retired, Status::Dead) {
					self.fire_removal(key, resource);
				} else {
					panic!("retired resource key {} completed by another thread", key.id());
				}
			}
			status => panic!("resource key {} released in impossible state {status:?}", key.id()),
		}
	}

	/// Finish `Retired -> Dead` for a key this thread raised to `InFlight`
	/// but whose cache entry vanished before the lookup. The evictor parked
	/// the resource before retiring the key.
	fn complete_retired(&self, key: &Arc<ResourceKey<K, R>>) {
		if key.transition(Status::Retired, Status::Dead) {
			let resource = key
				.take_parked()
				.unwrap_or_else(|| panic!("retired resource key {} has no parked resource", key.id()));
			self.fire_removal(key, &resource);
		}
	}

	pub(crate) fn drain_removals(&self) {
		while let Some(removal) = self.cache.pop_removal() {
			self.process_removal(removal);
		}
	}

	/// The eviction listener: cooperate with any in-flight holder to walk
	/// the key to `Dead` without double-firing hooks.
	fn process_removal(&self, removal: Removal<K, R>) {
		let Removal { key, resource, cause } = removal;
		tracing::trace!(id = key.id(), ?cause, "processing cache removal");
		loop {
			match key.status() {
				Status::Idle => {
					if key.transition(Status::Idle, Status::Retired) {
						if let Some(queue) = self.queues.get(key.category()) {
							queue.remove(&key);
						}
						if key.transition(Status::Retired, Status::Dead) {
							self.fire_removal(&key, &resource);
						}
						return;
					}
				}
				Status::InFlight => {
					// Park first: the moment Retired becomes visible the
					// holder may complete the terminal path.
					key.park(resource.clone());
					if key.transition(Status::InFlight, Status::Retired) {
						return;
					}
					key.take_parked();
				}
				Status::Retired => {
					if key.transition(Status::Retired, Status::Dead) {
						self.fire_removal(&key, &resource);
						return;
					}
				}
				Status::Dead => {
					// A borrower discarded the key after losing the lookup
					// race; it could not supply the resource, so the hook
					// fires here instead.
					self.fire_removal(&key, &resource);
					return;
				}
			}
		}
	}

	/// Fire `on_removal` at most once per resource.
	fn fire_removal(&self, key: &Arc<ResourceKey<K, R>>, resource: &Arc<R>) {
		if key.claim_removal() {
			self.stats.removals.fetch_add(1, Ordering::Relaxed);
			self.guard_hook("on_removal", || self.lifecycle.on_removal(key.category(), resource));
		}
	}

	fn weight_of(&self, category: &K, resource: &Arc<R>) -> u64 {
		match &self.weigher {
			Some(weigher) => u64::from(weigher.weigh(category, resource).max(1)),
			None => 1,
		}
	}

	/// User hooks run to completion or are reported and dropped; they never
	/// interrupt a state transition.
	fn guard_hook(&self, hook: &'static str, f: impl FnOnce()) {
		if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
			tracing::error!(hook, "resource lifecycle hook panicked");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU64, AtomicUsize};
	use std::thread;

	use crate::error::BoxError;

	#[derive(Default)]
	struct Counting {
		created: AtomicUsize,
		borrows: AtomicUsize,
		releases: AtomicUsize,
		removals: AtomicUsize,
	}

	impl Counting {
		fn counts(&self) -> (usize, usize, usize, usize) {
			(
				self.created.load(Ordering::Relaxed),
				self.borrows.load(Ordering::Relaxed),
				self.releases.load(Ordering::Relaxed),
				self.removals.load(Ordering::Relaxed),
			)
		}
	}

	impl<K, R> ResourceLifecycle<K, R> for Counting {
		fn on_create(&self, _: &K, _: &R) {
			self.created.fetch_add(1, Ordering::Relaxed);
		}

		fn on_borrow(&self, _: &K, _: &R) {
			self.borrows.fetch_add(1, Ordering::Relaxed);
		}

		fn on_release(&self, _: &K, _: &R) {
			self.releases.fetch_add(1, Ordering::Relaxed);
		}

		fn on_removal(&self, _: &K, _: &R) {
			self.removals.fetch_add(1, Ordering::Relaxed);
		}
	}

	fn sequence_loader<K: Send + Sync>() -> impl Fn(&K) -> Result<u64, BoxError> {
		let next = AtomicU64::new(0);
		move |_: &K| Ok(next.fetch_add(1, Ordering::Relaxed))
	}

	fn counting_pool() -> (MultiwayPool<&'static str, u64>, Arc<Counting>) {
		let lifecycle = Arc::new(Counting::default());
		let pool = PoolBuilder::new()
			.lifecycle(lifecycle.clone())
			.build(sequence_loader());
		(pool, lifecycle)
	}

	#[test]
	fn release_returns_key_to_queue() {
		let (pool, lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		let key = handle.key.clone();
		assert_eq!(key.status(), Status::InFlight);
		assert_eq!(pool.size(), 1);
		assert_eq!(lifecycle.counts(), (1, 1, 0, 0));

		handle.release();
		assert_eq!(key.status(), Status::Idle);
		assert_eq!(pool.size(), 1);
		assert_eq!(pool.inner.queues.idle_count(), 1);
		assert_eq!(lifecycle.counts(), (1, 1, 1, 0));
	}

	#[test]
	fn evict_when_idle_goes_straight_to_dead() {
		let (pool, lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		let key = handle.key.clone();
		handle.release();
		assert_eq!(key.status(), Status::Idle);

		pool.invalidate_all();
		assert_eq!(pool.size(), 0);
		assert_eq!(key.status(), Status::Dead);
		assert_eq!(pool.inner.queues.idle_count(), 0);
		assert_eq!(lifecycle.counts(), (1, 1, 1, 1));
	}

	#[test]
	fn evict_while_in_flight_defers_to_the_holder() {
		let (pool, lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		let key = handle.key.clone();

		pool.invalidate_all();
		assert_eq!(pool.size(), 0);
		assert_eq!(key.status(), Status::Retired);
		assert_eq!(lifecycle.counts(), (1, 1, 0, 0));

		handle.release();
		assert_eq!(key.status(), Status::Dead);
		assert_eq!(lifecycle.counts(), (1, 1, 1, 1));
	}

	#[test]
	fn borrow_discards_key_whose_entry_vanished() {
		let (pool, lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		let stale = handle.key.clone();
		handle.release();

		// Remove the entry out from under the queue; the notification stays
		// pending, as if an evictor on another thread had not drained yet.
		pool.inner.cache.invalidate(&stale);

		let mut fresh = pool.borrow("db").unwrap();
		assert_ne!(fresh.key.id(), stale.id());
		assert_eq!(stale.status(), Status::Dead);
		// The pending removal fired the hook for the stale resource.
		assert_eq!(lifecycle.removals.load(Ordering::Relaxed), 1);
		assert_eq!(lifecycle.created.load(Ordering::Relaxed), 2);
		fresh.release();
	}

	#[test]
	fn evictor_parks_resource_for_losing_borrower() {
		let (pool, lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		let key = handle.key.clone();
		handle.release();

		pool.inner.cache.invalidate(&key);
		// Borrower wins the dequeue CAS, then the evictor drains before the
		// borrower notices its cache lookup missed.
		assert!(key.transition(Status::Idle, Status::InFlight));
		pool.inner.drain_removals();
		assert_eq!(key.status(), Status::Retired);

		// The borrower's path: the InFlight -> Dead discard fails, so the
		// parked resource completes the terminal cleanup.
		assert!(!key.transition(Status::InFlight, Status::Dead));
		pool.inner.complete_retired(&key);
		assert_eq!(key.status(), Status::Dead);
		assert_eq!(lifecycle.removals.load(Ordering::Relaxed), 1);
	}

	#[test]
	fn invalidate_while_in_flight() {
		let (pool, lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		let key = handle.key.clone();

		handle.invalidate();
		assert_eq!(pool.size(), 0);
		assert_eq!(key.status(), Status::Dead);
		assert_eq!(lifecycle.counts(), (1, 1, 1, 1));
	}

	#[test]
	fn invalidate_after_eviction_completes_terminal_path() {
		let (pool, lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		let key = handle.key.clone();

		pool.invalidate_all();
		assert_eq!(key.status(), Status::Retired);
		assert_eq!(lifecycle.counts(), (1, 1, 0, 0));

		handle.invalidate();
		assert_eq!(key.status(), Status::Dead);
		assert_eq!(lifecycle.counts(), (1, 1, 1, 1));
	}

	#[test]
	fn empty_queues_are_pruned_once_unreferenced() {
		let (pool, _lifecycle) = counting_pool();

		let mut handle = pool.borrow("db").unwrap();
		assert_eq!(pool.inner.queues.len(), 1);
		handle.release();

		pool.invalidate_all();
		// The handle still references the queue.
		pool.clean_up();
		assert_eq!(pool.inner.queues.len(), 1);

		drop(handle);
		pool.clean_up();
		assert_eq!(pool.inner.queues.len(), 0);
	}

	#[test]
	fn borrow_storm_settles_into_queues() {
		let lifecycle = Arc::new(Counting::default());
		let pool: MultiwayPool<u64, u64> = PoolBuilder::new()
			.maximum_size(10)
			.lifecycle(lifecycle.clone())
			.build(sequence_loader());

		thread::scope(|scope| {
			for worker in 0..8 {
				let pool = pool.clone();
				scope.spawn(move || {
					for i in 0..100u64 {
						let mut handle = pool.borrow((worker + i) % 13).unwrap();
						thread::yield_now();
						handle.release();
					}
				});
			}
		});
		pool.clean_up();

		let (_, borrows, releases, removals) = lifecycle.counts();
		let created = lifecycle.created.load(Ordering::Relaxed);
		assert_eq!(borrows, 800);
		assert_eq!(releases, 800);
		assert!(pool.size() <= 10);
		assert_eq!(created, pool.size() as usize + removals);
		// Every cached resource is idle and queued at quiescence.
		assert_eq!(pool.inner.queues.idle_count() as u64, pool.size());
	}
}
