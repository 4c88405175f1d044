//! Storage tiers
//!
//! - [`LocalTier`]: directories under a local cache root, checked first
//! - [`RemoteTier`]: archives in an object store, consulted on local misses
//!
//! Both address entries by the same [`CacheKey`](crate::key::CacheKey).

mod local;
mod remote;

pub use local::{copy_dir_contents, LocalTier};
pub use remote::{archive_format, open_store, RemoteTier};
