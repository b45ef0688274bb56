//! Content digests and the parallel hashing pool.

pub mod digest;
pub mod engine;
