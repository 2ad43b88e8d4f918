//! Correlation of issue lifecycles with commits, and the artifact cache.

pub mod cache;
pub mod causality;

pub use cache::{CacheKey, CacheStats, CachedEngine, LruCache};
pub use causality::{CausalityOptions, CausalityResult, HistoryReport, IssueHistory};
