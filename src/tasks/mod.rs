//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is alive.
//!
//! # Tasks
//! - Sweep: Evicts expired cache entries at the configured maintenance step

mod sweeper;

pub(crate) use sweeper::Sweeper;
