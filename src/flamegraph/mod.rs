//! Flamegraph construction and rendering.
//!
//! This module nests matched calls into a frame tree by timestamp
//! containment and renders that tree as an SVG flamegraph.

pub mod builder;
pub mod generator;

// Re-export main types
pub use builder::{build, FlameFrame, FlameGraph};
pub use generator::{generate_flamegraph, FlamegraphConfig};
