//! Offline-first cache for the DevBytes video playlist.
//!
//! Consumers observe the playlist stored in SQLite; refreshes fetch it from
//! the network and replace the stored copy. See [`cache`] for the generic
//! machinery and [`devbytes`] for the playlist-specific types.

pub mod cache;
pub mod config;
pub mod devbytes;
pub mod logging;
