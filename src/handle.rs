use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::key::ResourceKey;
use crate::pool::PoolInner;
use crate::queues::TransferQueue;
use crate::traits::CategoryKey;

/// Exclusive ownership of one borrowed resource.
///
/// A handle is single-use: the first of [`release`](Handle::release),
/// [`release_after`](Handle::release_after), or
/// [`invalidate`](Handle::invalidate) consumes it, after which
/// [`get`](Handle::get) fails with [`PoolError::HandleConsumed`] and further
/// releases are no-ops. Dropping a live handle is equivalent to `release()`,
/// so a resource is always returned to the pool on scope exit, even on an
/// early return or a panic.
///
/// A handle is not meant to be shared: concurrent `get` and `release` on
/// the same handle is prevented by the `&mut` receivers.
#[must_use = "dropping a handle releases the resource back to the pool"]
pub struct Handle<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	pub(crate) pool: Arc<PoolInner<K, R>>,
	pub(crate) queue: Arc<TransferQueue<K, R>>,
	pub(crate) key: Arc<ResourceKey<K, R>>,
	pub(crate) resource: Arc<R>,
	pub(crate) consumed: bool,
}

impl<K, R> std::fmt::Debug for Handle<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Handle")
			.field("consumed", &self.consumed)
			.finish_non_exhaustive()
	}
}

impl<K, R> Handle<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	pub(crate) fn new(
		pool: Arc<PoolInner<K, R>>,
		queue: Arc<TransferQueue<K, R>>,
		key: Arc<ResourceKey<K, R>>,
		resource: Arc<R>,
	) -> Self {
		Self {
			pool,
			queue,
			key,
			resource,
			consumed: false,
		}
	}

	/// The category this resource was borrowed for.
	pub fn category(&self) -> &K {
		self.key.category()
	}

	/// Access the borrowed resource.
	pub fn get(&self) -> Result<&R, PoolError> {
		if self.consumed {
			Err(PoolError::HandleConsumed)
		} else {
			Ok(&self.resource)
		}
	}

	/// Return the resource to the pool for reuse. Idempotent: releasing a
	/// consumed handle does nothing and counts no lifecycle hooks.
	pub fn release(&mut self) {
		if !self.consumed {
			self.consumed = true;
			self.pool.release(&self.key, &self.resource, &self.queue);
		}
	}

	/// Return the resource after holding it available for direct transfer.
	///
	/// The handle is consumed immediately. For up to `delay` the resource is
	/// reserved for the next borrower of the same category, which receives
	/// it without queueing; the call blocks until that transfer happens or
	/// the delay elapses, in which case the resource is pooled normally.
	pub fn release_after(&mut self, delay: Duration) {
		if !self.consumed {
			self.consumed = true;
			self.pool.release_after(&self.key, &self.resource, &self.queue, delay);
		}
	}

	/// Discard the resource instead of returning it to the pool. The
	/// removal hook fires before this returns.
	pub fn invalidate(&mut self) {
		if !self.consumed {
			self.consumed = true;
			self.pool.invalidate(&self.key, &self.resource);
		}
	}
}

impl<K, R> Drop for Handle<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	fn drop(&mut self) {
		self.release();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::builder::PoolBuilder;
	use crate::error::BoxError;

	fn pool() -> crate::MultiwayPool<u32, String> {
		PoolBuilder::new().build(|n: &u32| -> Result<String, BoxError> { Ok(n.to_string()) })
	}

	#[test]
	fn get_fails_after_release() {
		let pool = pool();
		let mut handle = pool.borrow(1).unwrap();
		assert_eq!(handle.get().unwrap(), "1");

		handle.release();
		assert!(matches!(handle.get(), Err(PoolError::HandleConsumed)));
	}

	#[test]
	fn double_release_is_a_noop() {
		let pool = pool();
		let mut handle = pool.borrow(1).unwrap();

		handle.release();
		handle.release();
		handle.invalidate();

		let stats = pool.stats();
		assert_eq!(stats.releases, 1);
		assert_eq!(stats.removals, 0);
		assert_eq!(pool.size(), 1);
	}

	#[test]
	fn drop_releases_back_to_the_pool() {
		let pool = pool();
		{
			let _handle = pool.borrow(1).unwrap();
		}

		let stats = pool.stats();
		assert_eq!(stats.borrows, 1);
		assert_eq!(stats.releases, 1);
		assert_eq!(pool.size(), 1);
	}

	#[test]
	fn category_is_visible_through_the_handle() {
		let pool = pool();
		let mut handle = pool.borrow(9).unwrap();
		assert_eq!(*handle.category(), 9);
		handle.release();
	}
}
