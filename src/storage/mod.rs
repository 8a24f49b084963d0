mod cache;
mod models;
pub mod text;

pub use cache::{CacheBackend, CacheError, FileCache, MemoryCache};
pub use models::*;
