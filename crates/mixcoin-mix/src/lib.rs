//! mixcoin-mix
//!
//! The mixing policy layer: the auditable fee decision and the randomized
//! delay scheduler that dispatches mixed payouts.

pub mod fee;
pub mod scheduler;

pub use fee::{fee_seed, is_fee};
pub use scheduler::{DelayScheduler, SchedulerConfig};
