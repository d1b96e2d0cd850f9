//! Scratch-memory management for intermediate tensors.
//!
//! Intermediate results of a contraction tree live in one shared arena
//! that is sized during compilation and allocated exactly once. The
//! arena is a two-sided stack: reservations made on even tree layers
//! grow from the front of the allocation, odd layers from the back, so
//! the interleaved reserve/release pattern of post-order tree
//! evaluation reuses memory without fragmenting.

mod arena;

pub use arena::{ScratchArena, ScratchHandle, ScratchMemory};
