use thiserror::Error;

/// Boxed error type produced by user-supplied resource loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by pool operations.
///
/// The pool itself is infallible in steady state: the only failure that
/// crosses the `borrow` boundary is a loader failure, and the only handle
/// failure is using a handle after it has been consumed. An impossible
/// state-machine transition is a bug in the pool and panics instead.
#[derive(Debug, Error)]
pub enum PoolError {
	/// The user-supplied loader failed while constructing a new resource.
	/// Nothing was mutated: no cache entry, queue slot, or key exists for
	/// the failed load.
	#[error("resource loader failed")]
	Loader(#[source] BoxError),

	/// The handle was already released or invalidated.
	#[error("handle was already released")]
	HandleConsumed,
}
