//! Hybrid scheduler runner.
//!
//! Split into focused submodules:
//! - `core`: HybridScheduler struct, constructor, accessors, shutdown
//! - `execution`: admission, local and remote submission, awaiting

mod core;
mod execution;
#[cfg(test)]
mod tests;

pub use self::core::HybridScheduler;
