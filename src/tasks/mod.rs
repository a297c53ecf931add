//! Background Tasks Module
//!
//! Contains the scheduling machinery that runs outside caller threads.
//!
//! # Tasks
//! - Expiration sweep: one-shot timers re-armed to the next item's expiry

mod sweeper;

pub use sweeper::{schedule_sweep, Sweep, SweepTimer};
