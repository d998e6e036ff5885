//! mixcoin-pool
//!
//! Pool state for in-flight chunks: the in-memory [`PoolManager`] with its
//! single exclusion domain, write-through persistence via [`PoolDb`], and
//! startup restore.

pub mod db;
pub mod pool;

pub use db::PoolDb;
pub use pool::{PoolCounts, PoolManager};
