//! Background Tasks Module
//!
//! Contains background tasks that run periodically while drivers are alive.
//!
//! # Tasks
//! - Expiry sweep: removes expired entries at a configured interval, in chunks

mod sweep;

pub use sweep::{spawn_sweep_task, Sweep, SweepTask};
