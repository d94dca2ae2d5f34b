//! Sliding-window store adapters.
//!
//! - `InMemorySlidingWindow` - single process, tests and development
//! - `RedisSlidingWindow` - shared across processes via Lua scripts
//! - `BlockingLimiter` - synchronous facade for non-async callers

mod blocking;
mod in_memory;
mod redis;

pub use blocking::BlockingLimiter;
pub use in_memory::InMemorySlidingWindow;
pub use redis::RedisSlidingWindow;
