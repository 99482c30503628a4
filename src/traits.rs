use std::hash::Hash;

use crate::error::BoxError;

/// Marker trait for category keys.
///
/// A category identifies a family of interchangeable resources: every
/// resource created for the same category can serve any borrower of that
/// category. Blanket-implemented for any suitable type.
pub trait CategoryKey: Clone + Eq + Hash + Send + Sync + 'static {}

impl<T> CategoryKey for T where T: Clone + Eq + Hash + Send + Sync + 'static {}

/// Supplies new resources on demand.
///
/// Invoked synchronously on the borrowing thread whenever a category has no
/// idle resource available. A loader failure propagates unchanged out of
/// [`MultiwayPool::borrow`](crate::MultiwayPool::borrow) and leaves the pool
/// untouched.
///
/// Closures of the shape `Fn(&K) -> Result<R, BoxError>` implement this
/// trait directly:
///
/// ```
/// use multiway_pool::{BoxError, PoolBuilder};
///
/// let pool = PoolBuilder::new().build(
/// 	|port: &u16| -> Result<String, BoxError> { Ok(format!("conn:{port}")) },
/// );
/// let mut handle = pool.borrow(8080)?;
/// assert_eq!(handle.get()?, "conn:8080");
/// # Ok::<(), multiway_pool::PoolError>(())
/// ```
pub trait ResourceLoader<K, R>: Send + Sync {
	fn load(&self, category: &K) -> Result<R, BoxError>;
}

impl<K, R, F> ResourceLoader<K, R> for F
where
	F: Fn(&K) -> Result<R, BoxError> + Send + Sync,
{
	fn load(&self, category: &K) -> Result<R, BoxError> {
		self(category)
	}
}

/// Observer of resource lifetime events.
///
/// All methods default to no-ops. Hooks fire on the thread performing the
/// transition, so implementations must be prepared for concurrent calls. A
/// panicking hook is caught, reported, and does not corrupt pool state.
///
/// For every resource the pool guarantees: `on_create` precedes every
/// `on_borrow`, every `on_borrow` pairs with exactly one `on_release`, and
/// `on_removal` (if the resource is ever evicted or invalidated) is last
/// and fires exactly once.
pub trait ResourceLifecycle<K, R>: Send + Sync {
	/// A new resource was loaded and cached.
	fn on_create(&self, category: &K, resource: &R) {
		let _ = (category, resource);
	}

	/// A resource was lent out to a borrower.
	fn on_borrow(&self, category: &K, resource: &R) {
		let _ = (category, resource);
	}

	/// A borrower returned a resource.
	fn on_release(&self, category: &K, resource: &R) {
		let _ = (category, resource);
	}

	/// A resource left the pool for good.
	fn on_removal(&self, category: &K, resource: &R) {
		let _ = (category, resource);
	}
}

/// No-op lifecycle used when the builder is given none.
pub(crate) struct NoopLifecycle;

impl<K, R> ResourceLifecycle<K, R> for NoopLifecycle {}

/// Computes the weight of a cached resource.
///
/// Only consulted when the pool is bounded by
/// [`maximum_weight`](crate::PoolBuilder::maximum_weight). Weights below 1
/// are clamped to 1 so that every entry contributes to the bound.
///
/// Closures of the shape `Fn(&K, &R) -> u32` implement this trait directly.
pub trait Weigher<K, R>: Send + Sync {
	fn weigh(&self, category: &K, resource: &R) -> u32;
}

impl<K, R, F> Weigher<K, R> for F
where
	F: Fn(&K, &R) -> u32 + Send + Sync,
{
	fn weigh(&self, category: &K, resource: &R) -> u32 {
		self(category, resource)
	}
}
