//! Tree scanning and cheap metadata-based change detection.

pub mod detector;
pub mod walker;
