//! Object pool: cache + write-behind decorator over the storage engine

mod entry;
mod object_pool;

pub use object_pool::{ObjectPool, PoolStats};
