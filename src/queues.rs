use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::key::{ResourceKey, Status};
use crate::traits::CategoryKey;

/// Outcome of a timed handoff publication, from the releaser's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandoffOutcome {
	/// A borrower took over the key; the releaser is done.
	Claimed,
	/// A later timed release took the slot; proceed with a normal release.
	Displaced,
	/// The delay elapsed unclaimed; proceed with a normal release.
	Expired,
}

const HANDOFF_PENDING: u8 = 0;
const HANDOFF_CLAIMED: u8 = 1;
const HANDOFF_DISPLACED: u8 = 2;

/// Shared flag tying one timed release to its slot occupancy.
pub(crate) struct HandoffToken {
	state: AtomicU8,
}

impl HandoffToken {
	fn new() -> Self {
		Self {
			state: AtomicU8::new(HANDOFF_PENDING),
		}
	}

	fn state(&self) -> u8 {
		self.state.load(Ordering::Acquire)
	}

	fn set(&self, state: u8) {
		self.state.store(state, Ordering::Release);
	}
}

struct HandoffEntry<K, R> {
	key: Arc<ResourceKey<K, R>>,
	resource: Arc<R>,
	token: Arc<HandoffToken>,
}

/// FIFO of idle keys for one category, plus the single-slot handoff channel
/// used by timed releases.
///
/// Keys are enqueued only while `Idle`; eviction processing removes retired
/// keys, and any straggler is filtered out at dequeue by the status CAS in
/// the borrow loop.
pub(crate) struct TransferQueue<K, R> {
	idle: Mutex<VecDeque<Arc<ResourceKey<K, R>>>>,
	handoff: Mutex<Option<HandoffEntry<K, R>>>,
	slot_changed: Condvar,
}

impl<K, R> TransferQueue<K, R> {
	fn new() -> Self {
		Self {
			idle: Mutex::new(VecDeque::new()),
			handoff: Mutex::new(None),
			slot_changed: Condvar::new(),
		}
	}

	/// Append a key that was just transitioned to `Idle`. The status is
	/// re-read under the queue lock: if eviction processing retired the key
	/// after the releaser's CAS, its queue removal has either already run
	/// (skip the push) or will run after this lock is released (push, let
	/// the removal find it).
	pub(crate) fn push_idle(&self, key: Arc<ResourceKey<K, R>>) {
		let mut idle = self.idle.lock();
		if key.status() == Status::Idle {
			idle.push_back(key);
		}
	}

	pub(crate) fn poll_idle(&self) -> Option<Arc<ResourceKey<K, R>>> {
		self.idle.lock().pop_front()
	}

	/// Best-effort removal on behalf of eviction processing.
	pub(crate) fn remove(&self, key: &ResourceKey<K, R>) {
		self.idle.lock().retain(|queued| queued.id() != key.id());
	}

	/// Publish a still-in-flight key for direct transfer. A previous
	/// occupant is displaced (most recent release wins) and its releaser is
	/// woken to fall back to the normal release path.
	pub(crate) fn publish_handoff(
		&self,
		key: Arc<ResourceKey<K, R>>,
		resource: Arc<R>,
	) -> Arc<HandoffToken> {
		let token = Arc::new(HandoffToken::new());
		let mut slot = self.handoff.lock();
		if let Some(previous) = slot.replace(HandoffEntry {
			key,
			resource,
			token: token.clone(),
		}) {
			previous.token.set(HANDOFF_DISPLACED);
		}
		self.slot_changed.notify_all();
		token
	}

	/// Claim the published key, if any, marking the slot consumed. The key
	/// keeps its `InFlight` status: ownership moves straight from releaser
	/// to borrower.
	pub(crate) fn try_claim(&self) -> Option<(Arc<ResourceKey<K, R>>, Arc<R>)> {
		let mut slot = self.handoff.lock();
		let entry = slot.take()?;
		entry.token.set(HANDOFF_CLAIMED);
		self.slot_changed.notify_all();
		Some((entry.key, entry.resource))
	}

	/// Block the releasing thread until its publication is claimed,
	/// displaced, or `delay` elapses. On expiry the slot is reclaimed under
	/// the lock, so no borrower can win it afterwards.
	pub(crate) fn await_handoff(&self, token: &Arc<HandoffToken>, delay: Duration) -> HandoffOutcome {
		let deadline = Instant::now() + delay;
		let mut slot = self.handoff.lock();
		loop {
			match token.state() {
				HANDOFF_CLAIMED => return HandoffOutcome::Claimed,
				HANDOFF_DISPLACED => return HandoffOutcome::Displaced,
				_ => {}
			}
			if self.slot_changed.wait_until(&mut slot, deadline).timed_out() {
				match token.state() {
					HANDOFF_CLAIMED => return HandoffOutcome::Claimed,
					HANDOFF_DISPLACED => return HandoffOutcome::Displaced,
					_ => {}
				}
				if slot.as_ref().is_some_and(|entry| Arc::ptr_eq(&entry.token, token)) {
					*slot = None;
				}
				return HandoffOutcome::Expired;
			}
		}
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.idle.lock().is_empty() && self.handoff.lock().is_none()
	}

	#[cfg(test)]
	pub(crate) fn idle_len(&self) -> usize {
		self.idle.lock().len()
	}
}

/// Lazily allocated mapping of category -> transfer queue.
pub(crate) struct TransferQueues<K, R> {
	queues: RwLock<HashMap<K, Arc<TransferQueue<K, R>>, RandomState>>,
}

impl<K: CategoryKey, R> TransferQueues<K, R> {
	pub(crate) fn new() -> Self {
		Self {
			queues: RwLock::new(HashMap::with_hasher(RandomState::new())),
		}
	}

	pub(crate) fn get_or_create(&self, category: &K) -> Arc<TransferQueue<K, R>> {
		if let Some(queue) = self.queues.read().get(category) {
			return queue.clone();
		}
		self.queues
			.write()
			.entry(category.clone())
			.or_insert_with(|| Arc::new(TransferQueue::new()))
			.clone()
	}

	pub(crate) fn get(&self, category: &K) -> Option<Arc<TransferQueue<K, R>>> {
		self.queues.read().get(category).cloned()
	}

	/// Discard queues that are empty and unreferenced. Every live handle
	/// holds an `Arc` to its queue, so a category with outstanding borrows
	/// is never pruned; re-allocation on next use is cheap.
	pub(crate) fn prune(&self) {
		self.queues
			.write()
			.retain(|_, queue| Arc::strong_count(queue) > 1 || !queue.is_empty());
	}

	pub(crate) fn len(&self) -> usize {
		self.queues.read().len()
	}

	/// Total idle keys across all categories.
	#[cfg(test)]
	pub(crate) fn idle_count(&self) -> usize {
		self.queues.read().values().map(|queue| queue.idle_len()).sum()
	}
}
