//! Background Tasks Module
//!
//! Long-running tasks owned by the cache service.
//!
//! # Tasks
//! - Disk writer: applies disk mutations in order, off the fetch path
//! - Expiry sweep: purges expired entries from both tiers at intervals

mod cleanup;
mod disk_writer;

pub use cleanup::spawn_cleanup_task;
pub use disk_writer::{
    spawn_disk_writer, spawn_disk_writer_with_capacity, DiskWriter, DEFAULT_QUEUE_CAPACITY,
};
