//! Runtime abstractions the engine relies on but does not implement itself.
//!
//! The only one needed by field caching is a key-value store: `get(key)` and
//! `set(key, value, ttl)`. Implementations live elsewhere, `runtime-local` has an
//! in-memory one.

pub mod kv;
