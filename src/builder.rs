use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CachePolicy, ResourceCache};
use crate::pool::{MultiwayPool, PoolInner};
use crate::queues::TransferQueues;
use crate::stats::StatsCounters;
use crate::time::{SystemTicker, Ticker};
use crate::traits::{CategoryKey, NoopLifecycle, ResourceLifecycle, ResourceLoader, Weigher};

/// Configures and builds a [`MultiwayPool`].
///
/// All options default to off: an unconfigured pool caches resources
/// without bound and never expires them. Capacity may be bounded by entry
/// count *or* by weight, not both; misconfiguration panics at the call
/// site, since it is a programming error rather than a runtime condition.
///
/// ```
/// use std::time::Duration;
/// use multiway_pool::{BoxError, PoolBuilder};
///
/// let pool = PoolBuilder::new()
/// 	.maximum_weight(64)
/// 	.weigher(|_shard: &u32, buffer: &Vec<u8>| buffer.len() as u32)
/// 	.expire_after_access(Duration::from_secs(300))
/// 	.build(|shard: &u32| -> Result<Vec<u8>, BoxError> {
/// 		Ok(vec![0; *shard as usize])
/// 	});
///
/// let mut handle = pool.borrow(16)?;
/// assert_eq!(handle.get()?.len(), 16);
/// # Ok::<(), multiway_pool::PoolError>(())
/// ```
pub struct PoolBuilder<K, R> {
	maximum_size: Option<u64>,
	maximum_weight: Option<u64>,
	weigher: Option<Arc<dyn Weigher<K, R>>>,
	expire_after_access: Option<Duration>,
	expire_after_write: Option<Duration>,
	ticker: Option<Arc<dyn Ticker>>,
	lifecycle: Option<Arc<dyn ResourceLifecycle<K, R>>>,
}

impl<K, R> PoolBuilder<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self {
			maximum_size: None,
			maximum_weight: None,
			weigher: None,
			expire_after_access: None,
			expire_after_write: None,
			ticker: None,
			lifecycle: None,
		}
	}

	/// Bound the pool to at most `size` cached resources (entries, not
	/// categories). The least recently used resource is evicted first,
	/// whether idle or in flight.
	pub fn maximum_size(mut self, size: u64) -> Self {
		assert!(self.maximum_size.is_none(), "maximum size was already set");
		assert!(
			self.maximum_weight.is_none(),
			"maximum size cannot be combined with maximum weight"
		);
		self.maximum_size = Some(size);
		self
	}

	/// Bound the pool by the summed weight of cached resources. Requires a
	/// [`weigher`](PoolBuilder::weigher).
	pub fn maximum_weight(mut self, weight: u64) -> Self {
		assert!(self.maximum_weight.is_none(), "maximum weight was already set");
		assert!(
			self.maximum_size.is_none(),
			"maximum weight cannot be combined with maximum size"
		);
		self.maximum_weight = Some(weight);
		self
	}

	/// Weigh each resource once, at creation. Results below 1 are clamped
	/// to 1 so every entry counts against the bound.
	pub fn weigher(mut self, weigher: impl Weigher<K, R> + 'static) -> Self {
		assert!(self.weigher.is_none(), "weigher was already set");
		self.weigher = Some(Arc::new(weigher));
		self
	}

	/// Evict resources that have gone unused for `duration`.
	pub fn expire_after_access(mut self, duration: Duration) -> Self {
		assert!(self.expire_after_access.is_none(), "expire after access was already set");
		self.expire_after_access = Some(duration);
		self
	}

	/// Evict resources older than `duration`, regardless of use.
	pub fn expire_after_write(mut self, duration: Duration) -> Self {
		assert!(self.expire_after_write.is_none(), "expire after write was already set");
		self.expire_after_write = Some(duration);
		self
	}

	/// Override the expiration time source. Defaults to the monotonic
	/// clock; tests inject a [`FakeTicker`](crate::FakeTicker).
	pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
		self.ticker = Some(ticker);
		self
	}

	/// Observe resource lifetime events.
	pub fn lifecycle(mut self, lifecycle: Arc<dyn ResourceLifecycle<K, R>>) -> Self {
		self.lifecycle = Some(lifecycle);
		self
	}

	/// Build the pool around `loader`, which supplies a new resource
	/// whenever a category has no idle one available.
	pub fn build(self, loader: impl ResourceLoader<K, R> + 'static) -> MultiwayPool<K, R> {
		assert_eq!(
			self.maximum_weight.is_some(),
			self.weigher.is_some(),
			"maximum weight and a weigher must be configured together"
		);

		let ticker = self.ticker.unwrap_or_else(|| Arc::new(SystemTicker::new()));
		let cache = ResourceCache::new(
			CachePolicy {
				maximum_size: self.maximum_size,
				maximum_weight: self.maximum_weight,
				expire_after_access: self.expire_after_access,
				expire_after_write: self.expire_after_write,
			},
			ticker,
		);

		MultiwayPool::from_inner(PoolInner {
			cache,
			queues: TransferQueues::new(),
			loader: Box::new(loader),
			lifecycle: self.lifecycle.unwrap_or_else(|| Arc::new(NoopLifecycle)),
			weigher: self.weigher,
			stats: StatsCounters::default(),
		})
	}
}

impl<K, R> Default for PoolBuilder<K, R>
where
	K: CategoryKey,
	R: Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
