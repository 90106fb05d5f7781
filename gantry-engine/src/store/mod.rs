//! Shared stores
//!
//! The cache store and workspace store are the engine's only shared mutable
//! resources. Both are append-only (new keys / new artifacts only), so jobs
//! never contend beyond per-key atomicity.

pub mod cache;
pub mod workspace;

pub use cache::CacheStore;
pub use workspace::WorkspaceStore;
