//! Rate-limited batch dispatch of pending campaign sends across channels.

pub mod worker;

pub use worker::{CycleOutcome, DispatchWorker};
