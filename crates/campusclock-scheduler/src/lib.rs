//! # CampusClock Scheduler
//! The daily fan-out and the per-attempt executor.
//!
//! One wall-clock trigger per day enumerates opted-in users, draws an
//! independent jittered target time for each, records one pending attempt,
//! and parks one delayed tokio task per attempt. Jobs never share state
//! beyond the store; a started job runs to a terminal outcome.

pub mod daemon;
pub mod daily;
pub mod dispatch;
pub mod executor;

pub use daemon::run_daemon;
pub use daily::next_daily_fire;
pub use dispatch::{dispatch_daily, jittered_time};
pub use executor::execute_attempt;
