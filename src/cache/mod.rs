//! 共享缓存模块：对外部键值存储的容错封装，提供 TTL 与 JSON 序列化。
//!
//! # Shared Cache Module
//!
//! A thin, fail-soft wrapper over a shared external key-value store. The
//! wrapper prioritizes caller availability over correctness: connectivity
//! errors never propagate, they degrade to cache misses.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`SharedCache`] | Fail-soft cache with namespacing, TTL and JSON values |
//! | [`CacheBackend`] | Trait over the underlying store protocol |
//! | [`RedisStore`] | Network store backend (atomic INCRBY, PING health) |
//! | [`MemoryStore`] | In-process backend for tests and store-less runs |
//! | [`classification_key`] | Stable request digest used as the cache key |
//!
//! ## Fail-soft contract
//!
//! `get` returns `None` and `set`/`delete` return `false` on any backend
//! error; a failed operation marks the cache unhealthy and later calls
//! short-circuit, except that one call per probe cooldown is let through to
//! re-probe the backend. The cache restores itself once the store answers
//! again; an explicit [`SharedCache::health`] probe skips the cooldown.

mod backend;
mod key;
mod store;

pub use backend::{CacheBackend, MemoryStore, RedisStore, UnreachableStore};
pub use key::{classification_key, input_digest};
pub use store::{CacheConfig, CacheHealth, CacheStats, SharedCache};
