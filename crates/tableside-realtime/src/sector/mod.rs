//! Waiter sector-assignment lookups.

pub mod cached;
pub mod redis_lookup;
pub mod static_lookup;

pub use cached::CachedSectorLookup;
pub use redis_lookup::RedisSectorLookup;
pub use static_lookup::StaticSectorLookup;
