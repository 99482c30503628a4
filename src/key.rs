use std::convert::TryFrom;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Ownership state of a pooled resource.
///
/// Transitions are performed exclusively through compare-and-swap so that a
/// borrower, a releaser, and the cache's eviction processing can race on
/// the same key without locks:
///
/// - `Idle` — cached and sitting in its category's transfer queue.
/// - `InFlight` — lent out to exactly one live handle (still cached).
/// - `Retired` — evicted from the cache while a holder was outstanding;
///   the holder completes the terminal cleanup on release.
/// - `Dead` — terminal; the key is referenced by neither cache, queue, nor
///   handle, and the removal hook has fired exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Status {
	Idle = 0,
	InFlight = 1,
	Retired = 2,
	Dead = 3,
}

impl TryFrom<u8> for Status {
	type Error = u8;

	fn try_from(val: u8) -> Result<Self, Self::Error> {
		match val {
			0 => Ok(Status::Idle),
			1 => Ok(Status::InFlight),
			2 => Ok(Status::Retired),
			3 => Ok(Status::Dead),
			_ => Err(val),
		}
	}
}

/// Identity counter shared by every pool in the process.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Identity token for one physical resource.
///
/// The key doubles as the cache key and as the element circulating through
/// the transfer queues. Identity (hash and equality) is the unique `id`,
/// never the category: many keys of the same category coexist in the cache,
/// one per physical resource.
pub(crate) struct ResourceKey<K, R> {
	category: K,
	id: u64,
	status: AtomicU8,
	/// Latch guaranteeing the removal hook fires at most once per resource.
	removal_done: AtomicBool,
	/// Resource parked by the eviction processing when it retires an
	/// in-flight key, so the thread that later completes Retired -> Dead can
	/// still hand the resource to the removal hook.
	parked: Mutex<Option<Arc<R>>>,
}

impl<K, R> ResourceKey<K, R> {
	pub(crate) fn new(category: K, status: Status) -> Self {
		Self {
			category,
			id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
			status: AtomicU8::new(status as u8),
			removal_done: AtomicBool::new(false),
			parked: Mutex::new(None),
		}
	}

	pub(crate) fn category(&self) -> &K {
		&self.category
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn status(&self) -> Status {
		let val = self.status.load(Ordering::Acquire);
		Status::try_from(val).expect("invalid status stored in atomic")
	}

	/// Attempt the `from -> to` transition. Returns false if another thread
	/// won the race and the state is no longer `from`.
	pub(crate) fn transition(&self, from: Status, to: Status) -> bool {
		self.status
			.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
	}

	/// Claim the right to fire the removal hook. True exactly once.
	pub(crate) fn claim_removal(&self) -> bool {
		!self.removal_done.swap(true, Ordering::AcqRel)
	}

	pub(crate) fn park(&self, resource: Arc<R>) {
		*self.parked.lock() = Some(resource);
	}

	pub(crate) fn take_parked(&self) -> Option<Arc<R>> {
		self.parked.lock().take()
	}
}

impl<K, R> Hash for ResourceKey<K, R> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl<K, R> PartialEq for ResourceKey<K, R> {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl<K, R> Eq for ResourceKey<K, R> {}

impl<K: std::fmt::Debug, R> std::fmt::Debug for ResourceKey<K, R> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourceKey")
			.field("category", &self.category)
			.field("id", &self.id)
			.field("status", &self.status())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_of_same_category_are_distinct() {
		let a: ResourceKey<&str, ()> = ResourceKey::new("db", Status::InFlight);
		let b: ResourceKey<&str, ()> = ResourceKey::new("db", Status::InFlight);

		assert_ne!(a.id(), b.id());
		assert_ne!(a, b);
	}

	#[test]
	fn transition_follows_cas_semantics() {
		let key: ResourceKey<u32, ()> = ResourceKey::new(1, Status::InFlight);

		assert!(key.transition(Status::InFlight, Status::Idle));
		assert_eq!(key.status(), Status::Idle);

		// Lost race: the state is no longer InFlight.
		assert!(!key.transition(Status::InFlight, Status::Retired));
		assert_eq!(key.status(), Status::Idle);

		assert!(key.transition(Status::Idle, Status::Retired));
		assert!(key.transition(Status::Retired, Status::Dead));
		assert_eq!(key.status(), Status::Dead);
	}

	#[test]
	fn removal_claim_is_exactly_once() {
		let key: ResourceKey<u32, ()> = ResourceKey::new(1, Status::Idle);

		assert!(key.claim_removal());
		assert!(!key.claim_removal());
		assert!(!key.claim_removal());
	}

	#[test]
	fn parked_resource_round_trips() {
		let key: ResourceKey<u32, String> = ResourceKey::new(1, Status::InFlight);
		assert!(key.take_parked().is_none());

		key.park(Arc::new("session".to_string()));
		let parked = key.take_parked().expect("resource was parked");
		assert_eq!(*parked, "session");
		assert!(key.take_parked().is_none());
	}
}
