//! Lowest level crate of `kiln`. Includes the backend-agnostic bookkeeping structures used by
//! `kiln-api` for descriptor slot allocation and frame-delayed destruction

pub mod frame_buckets;
pub use frame_buckets::FrameBuckets;

pub mod index_pool;
pub use index_pool::IndexPool;
