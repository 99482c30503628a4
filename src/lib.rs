#![doc = include_str!("../README.md")]

mod builder;
mod cache;
mod error;
mod handle;
mod key;
mod pool;
mod queues;
mod stats;
mod time;
mod traits;

pub use builder::PoolBuilder;
pub use error::{BoxError, PoolError};
pub use handle::Handle;
pub use pool::MultiwayPool;
pub use stats::PoolStats;
pub use time::{FakeTicker, SystemTicker, Ticker};
pub use traits::{CategoryKey, ResourceLifecycle, ResourceLoader, Weigher};
